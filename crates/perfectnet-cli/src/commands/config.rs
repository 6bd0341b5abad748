//! Configuration management commands.

use std::path::Path;

use anyhow::{Result, bail};

use super::load_config;

/// Show the effective configuration after every layer is merged.
pub fn show(project: &Path, format: &str) -> Result<()> {
    let config = load_config(project)?;

    match format {
        "json" => {
            let json = serde_json::to_string_pretty(&config.masked())?;
            println!("{json}");
        }
        "toml" => {
            print!("{}", config.to_toml_string()?);
        }
        other => bail!("Unknown format '{other}'. Use 'toml' or 'json'."),
    }

    Ok(())
}
