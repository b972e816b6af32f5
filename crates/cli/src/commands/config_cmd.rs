//! `matagent config`: Configuration management commands.

use matagent_config::AppConfig;

pub async fn validate() -> Result<(), Box<dyn std::error::Error>> {
    println!("Validating configuration...");

    match AppConfig::load() {
        Ok(config) => {
            println!("   Config parsed successfully");

            let mut warnings = Vec::new();
            if !config.has_api_key() {
                warnings.push("No API key set (set OPENAI_API_KEY or MATAGENT_API_KEY)".to_string());
            }
            if config.materials.api_key.is_none() {
                warnings.push("No Materials Project key set (set MP_API_KEY)".to_string());
            }
            if let Err(e) = matagent_tools::default_registry(&config) {
                warnings.push(format!("Tool registry does not resolve: {e}"));
            }

            if warnings.is_empty() {
                println!("   All checks passed");
            } else {
                println!();
                for w in &warnings {
                    println!("   warning: {w}");
                }
            }

            println!();
            println!("   Model:      {}", config.model);
            println!("   Base URL:   {}", config.base_url);
            println!("   Max steps:  {}", config.agent.max_steps);
            println!("   Gateway:    {}:{}", config.gateway.host, config.gateway.port);
            println!("   Experts:    {}", config.experts.len());
        }
        Err(e) => {
            println!("   Config error: {e}");
            return Err(e.into());
        }
    }

    Ok(())
}

pub async fn show() -> Result<(), Box<dyn std::error::Error>> {
    let config = AppConfig::load().map_err(|e| format!("Failed to load config: {e}"))?;
    println!("{}", toml::to_string_pretty(&redacted(config))?);
    Ok(())
}

pub async fn path() -> Result<(), Box<dyn std::error::Error>> {
    let config_path = AppConfig::config_dir().join("config.toml");
    println!("{}", config_path.display());
    Ok(())
}

fn redacted(mut config: AppConfig) -> AppConfig {
    let mask = |key: &mut Option<String>| {
        if key.is_some() {
            *key = Some("***".into());
        }
    };
    mask(&mut config.api_key);
    mask(&mut config.materials.api_key);
    config
}
