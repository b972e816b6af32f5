//! `matagent tools`: List the tools visible to the top-level run.

use matagent_config::AppConfig;

pub async fn run() -> Result<(), Box<dyn std::error::Error>> {
    let config = AppConfig::load().map_err(|e| format!("Failed to load config: {e}"))?;
    let catalog = matagent_tools::default_catalog(&config)?;
    let registry = catalog.build_registry(&config.root_tools)?;

    println!("Root tools ({}):", registry.len());
    for entry in registry.entries() {
        let kind = if entry.is_composite() { "expert" } else { "tool" };
        println!("  [{kind}] {}", entry.spec().render());
    }

    let hidden: Vec<String> = catalog
        .names()
        .into_iter()
        .filter(|name| registry.get(name).is_none())
        .collect();
    if !hidden.is_empty() {
        println!();
        println!("Available to experts only: {}", hidden.join(", "));
    }

    Ok(())
}
