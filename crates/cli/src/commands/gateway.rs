//! `matagent gateway`: Start the HTTP API server.

use matagent_config::AppConfig;

pub async fn run(port_override: Option<u16>) -> Result<(), Box<dyn std::error::Error>> {
    let mut config = AppConfig::load().map_err(|e| format!("Failed to load config: {e}"))?;

    if let Some(port) = port_override {
        config.gateway.port = port;
    }

    println!("matagent gateway");
    println!("   Listening:   {}:{}", config.gateway.host, config.gateway.port);
    println!("   Model:       {}", config.model);
    println!("   Wire format: {:?}", config.gateway.wire_format);
    if !config.has_api_key() {
        println!("   No server API key set; clients must send apiKey with each chat");
    }

    matagent_gateway::start(config).await?;

    Ok(())
}
