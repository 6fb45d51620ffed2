//! `strata config`: Configuration management commands.

use super::load_config;
use strata_config::AppConfig;

const REDACTED: &str = "[REDACTED]";

pub fn show() -> Result<(), Box<dyn std::error::Error>> {
    let config = redacted(load_config()?);
    println!("{}", toml::to_string_pretty(&config)?);
    Ok(())
}

pub fn init(force: bool) -> Result<(), Box<dyn std::error::Error>> {
    let config_dir = AppConfig::config_dir();
    let config_path = config_dir.join("config.toml");
    if config_path.exists() && !force {
        println!("  Config already exists: {}", config_path.display());
        println!("  Run with --force to overwrite.");
        return Ok(());
    }
    std::fs::create_dir_all(&config_dir)?;
    std::fs::write(&config_path, AppConfig::default_toml())?;
    println!("  Wrote default config to {}", config_path.display());
    Ok(())
}

/// Replace every secret with a placeholder.
fn redacted(mut config: AppConfig) -> AppConfig {
    if config.api_key.is_some() {
        config.api_key = Some(REDACTED.into());
    }
    for provider in config.providers.values_mut() {
        if provider.api_key.is_some() {
            provider.api_key = Some(REDACTED.into());
        }
    }
    config
}

#[cfg(test)]
mod tests {
    use super::*;
    use strata_config::ProviderConfig;

    #[test]
    fn secrets_are_redacted() {
        let mut config = AppConfig::default();
        config.api_key = Some("sk-live-123".into());
        config.providers.insert(
            "openai".into(),
            ProviderConfig {
                api_key: Some("sk-openai".into()),
                api_url: None,
                default_model: None,
            },
        );
        let shown = toml::to_string_pretty(&redacted(config)).unwrap();
        assert!(!shown.contains("sk-live-123"));
        assert!(!shown.contains("sk-openai"));
        assert!(shown.contains(REDACTED));
    }

    #[test]
    fn default_toml_round_trips() {
        let parsed: AppConfig = toml::from_str(&AppConfig::default_toml()).unwrap();
        assert!(parsed.validate().is_ok());
    }
}
