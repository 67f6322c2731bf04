//! Config command handlers

use std::path::PathBuf;

use anyhow::{bail, Context, Result};

use quire_core::Config;

use crate::output::{Output, OutputFormat};

/// Keys accepted by `quire config set`
const KEYS: &[&str] = &[
    "data_dir",
    "remote_url",
    "sync_enabled",
    "push_debounce_ms",
    "pull_page_size",
    "push_batch_size",
    "index_batch_size",
    "retry_initial_ms",
    "retry_max_ms",
    "retry_max_attempts",
    "log_file",
];

fn effective_path(config_path: Option<&PathBuf>) -> PathBuf {
    config_path
        .cloned()
        .unwrap_or_else(Config::config_file_path)
}

/// Show current configuration
pub fn show(config_path: Option<&PathBuf>, output: &Output) -> Result<()> {
    let config =
        Config::load_with_cli_override(config_path).context("Failed to load configuration")?;

    match output.format {
        OutputFormat::Json => {
            output.json(&serde_json::to_value(&config)?);
        }
        OutputFormat::Quiet => {
            println!("{}", config.data_dir.display());
        }
        OutputFormat::Human => {
            println!("Configuration:");
            println!("  data_dir:           {}", config.data_dir.display());
            println!(
                "  remote_url:         {}",
                config.remote_url.as_deref().unwrap_or("(not set)")
            );
            println!("  sync_enabled:       {}", config.sync_enabled);
            println!("  push_debounce_ms:   {}", config.push_debounce_ms);
            println!("  pull_page_size:     {}", config.pull_page_size);
            println!("  push_batch_size:    {}", config.push_batch_size);
            println!("  index_batch_size:   {}", config.index_batch_size);
            println!("  retry_initial_ms:   {}", config.retry_initial_ms);
            println!("  retry_max_ms:       {}", config.retry_max_ms);
            println!("  retry_max_attempts: {}", config.retry_max_attempts);
            println!(
                "  log_file:           {}",
                config
                    .log_file
                    .as_ref()
                    .map(|p| p.display().to_string())
                    .unwrap_or_else(|| "(not set)".to_string())
            );
            println!();
            println!("Config file: {}", effective_path(config_path).display());
        }
    }

    Ok(())
}

/// Print the config file in use
pub fn path(config_path: Option<&PathBuf>, output: &Output) -> Result<()> {
    let path = effective_path(config_path);
    match output.format {
        OutputFormat::Json => output.json(&serde_json::json!({ "path": path })),
        _ => println!("{}", path.display()),
    }
    Ok(())
}

/// Set a configuration value
pub fn set(
    key: String,
    value: String,
    config_path: Option<&PathBuf>,
    output: &Output,
) -> Result<()> {
    let mut config =
        Config::load_with_cli_override(config_path).context("Failed to load configuration")?;

    apply(&mut config, &key, &value)?;

    config
        .save_to(&effective_path(config_path))
        .context("Failed to save configuration")?;

    output.success(&format!("Set {} = {}", key, value));

    Ok(())
}

/// Update one field of `config` from its string form
fn apply(config: &mut Config, key: &str, value: &str) -> Result<()> {
    let optional = |value: &str| {
        if value.is_empty() || value == "none" {
            None
        } else {
            Some(value.to_string())
        }
    };

    match key {
        "data_dir" => config.data_dir = value.into(),
        "remote_url" => config.remote_url = optional(value),
        "sync_enabled" => {
            config.sync_enabled = value
                .parse()
                .context("Invalid value for sync_enabled. Use 'true' or 'false'.")?;
        }
        "push_debounce_ms" => config.push_debounce_ms = number(key, value)?,
        "pull_page_size" => config.pull_page_size = positive(key, value)?,
        "push_batch_size" => config.push_batch_size = positive(key, value)?,
        "index_batch_size" => config.index_batch_size = positive(key, value)?,
        "retry_initial_ms" => config.retry_initial_ms = number(key, value)?,
        "retry_max_ms" => config.retry_max_ms = number(key, value)?,
        "retry_max_attempts" => config.retry_max_attempts = number(key, value)?,
        "log_file" => config.log_file = optional(value).map(PathBuf::from),
        _ => {
            bail!(
                "Unknown configuration key: '{}'\nValid keys: {}",
                key,
                KEYS.join(", ")
            );
        }
    }
    Ok(())
}

fn number<T: std::str::FromStr>(key: &str, value: &str) -> Result<T> {
    value
        .trim()
        .parse()
        .map_err(|_| anyhow::anyhow!("Invalid value for {}: expected a number", key))
}

fn positive(key: &str, value: &str) -> Result<usize> {
    match number(key, value)? {
        0 => bail!("Invalid value for {}: must be at least 1", key),
        n => Ok(n),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_apply_known_keys() {
        let mut config = Config::default();
        apply(&mut config, "remote_url", "https://records.example.com").unwrap();
        apply(&mut config, "sync_enabled", "true").unwrap();
        apply(&mut config, "push_debounce_ms", "250").unwrap();
        apply(&mut config, "index_batch_size", "64").unwrap();

        assert_eq!(
            config.remote_url.as_deref(),
            Some("https://records.example.com")
        );
        assert!(config.sync_enabled);
        assert_eq!(config.push_debounce_ms, 250);
        assert_eq!(config.index_batch_size, 64);

        apply(&mut config, "remote_url", "none").unwrap();
        assert!(config.remote_url.is_none());
    }

    #[test]
    fn test_apply_rejects_bad_values() {
        let mut config = Config::default();
        assert!(apply(&mut config, "sync_enabled", "maybe").is_err());
        assert!(apply(&mut config, "pull_page_size", "0").is_err());
        assert!(apply(&mut config, "retry_max_ms", "soon").is_err());

        let err = apply(&mut config, "favorite_tag", "x").unwrap_err();
        assert!(err.to_string().contains("Valid keys"));
    }

    #[test]
    fn test_set_writes_file() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(
            &path,
            format!("data_dir = {:?}\n", dir.path().join("data").display().to_string()),
        )
        .unwrap();
        let output = Output::new(OutputFormat::Quiet);

        set("pull_page_size".into(), "25".into(), Some(&path), &output).unwrap();

        let content = std::fs::read_to_string(&path).unwrap();
        assert!(content.contains("pull_page_size = 25"));
    }
}
