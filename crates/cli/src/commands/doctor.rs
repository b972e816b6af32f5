//! `matagent doctor`: Diagnose setup problems.

use matagent_config::AppConfig;
use matagent_core::provider::ProviderFactory;
use matagent_providers::ConfiguredProviderFactory;

pub async fn run() -> Result<(), Box<dyn std::error::Error>> {
    println!("matagent doctor");
    println!("===============\n");

    let mut issues = 0;

    let config_path = AppConfig::config_dir().join("config.toml");
    if !config_path.exists() {
        println!("  -  No config file, using defaults (run `matagent onboard` to create one)");
    }

    let config = match AppConfig::load() {
        Ok(config) => {
            println!("  ok Config valid");
            config
        }
        Err(e) => {
            println!("  !! Config invalid: {e}");
            println!("\n  1 issue found.");
            return Ok(());
        }
    };

    match matagent_tools::default_registry(&config) {
        Ok(registry) => println!("  ok Tool registry resolves ({} root tools)", registry.len()),
        Err(e) => {
            println!("  !! Tool registry: {e}");
            issues += 1;
        }
    }

    if config.materials.api_key.is_some() {
        match matagent_tools::Toolset::new(&config).verify_materials_key(None).await {
            Ok(()) => println!("  ok Materials Project key accepted"),
            Err(e) => {
                println!("  !! Materials Project key: {e}");
                issues += 1;
            }
        }
    } else {
        println!("  !! No Materials Project key; set MP_API_KEY");
        issues += 1;
    }

    match ConfiguredProviderFactory::from_config(&config).build(None) {
        Ok(provider) => match provider.verify_credentials().await {
            Ok(()) => println!("  ok Provider credentials accepted ({})", provider.name()),
            Err(e) => {
                println!("  !! Provider rejected credentials: {e}");
                issues += 1;
            }
        },
        Err(e) => {
            println!("  !! {e}");
            issues += 1;
        }
    }

    println!();
    if issues == 0 {
        println!("  All checks passed!");
    } else {
        println!("  {issues} issue(s) found. See above for details.");
    }

    Ok(())
}
