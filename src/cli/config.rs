use crate::config::generate::generate_starter_config;
use crate::config::load_config;
use std::fs;
use std::path::{Path, PathBuf};

pub fn init(stdout: bool) -> Result<(), Box<dyn std::error::Error>> {
    let config_content = generate_starter_config();
    if stdout {
        print!("{}", config_content);
        return Ok(());
    }

    let config_path = dirs::home_dir()
        .map(|home| home.join(".config/logferry/config.yml"))
        .unwrap_or_else(|| PathBuf::from("/etc/logferry/config.yml"));
    write_new_config(&config_path, &config_content)?;
    println!("Config file written to {}", config_path.display());
    Ok(())
}

/// Write a config file, refusing to replace an existing one
pub fn write_new_config(path: &Path, content: &str) -> Result<(), Box<dyn std::error::Error>> {
    if path.exists() {
        return Err(format!(
            "config file already exists at {}; remove it first or use --stdout",
            path.display()
        )
        .into());
    }
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    fs::write(path, content)?;
    Ok(())
}

pub fn check(config_path: Option<&Path>) -> Result<(), Box<dyn std::error::Error>> {
    let path = config_path.ok_or("No config file found. Use --config to specify a path.")?;
    println!("Validating config file: {}", path.display());

    let config = load_config(path)?;
    let sources = crate::source::expand_sources(&config.sources)?;
    println!("Config is valid");
    println!("  agent id:  {}", config.resolved_agent_id());
    println!("  endpoint:  {}", config.shipper.endpoint);
    println!("  sources:   {}", sources.len());
    for source in &sources {
        let target = match (&source.path, &source.config.listen) {
            (Some(path), _) => path.display().to_string(),
            (None, Some(listen)) => listen.clone(),
            (None, None) => "-".to_string(),
        };
        println!("    {} ({})", source.source_id, target);
    }
    Ok(())
}
