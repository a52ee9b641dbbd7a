//! Show or persist the resolved configuration.

use anyhow::Context;
use tethercap_common::config::AppConfig;

pub fn run(write: bool) -> anyhow::Result<()> {
    let config = AppConfig::load();
    println!("{}", serde_json::to_string_pretty(&config)?);

    if write {
        config.save().context("Failed to write config file")?;
        tracing::info!("Configuration written");
    }
    Ok(())
}
