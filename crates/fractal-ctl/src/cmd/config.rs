//! `config` — show or initialise the configuration file.

use anyhow::{Context, Result};

use fractal_core::FractalConfig;

pub fn show(config: &FractalConfig) -> Result<()> {
    println!("# {}", FractalConfig::file_path().display());
    let text = toml::to_string_pretty(config).context("failed to render config")?;
    print!("{text}");
    Ok(())
}

pub fn init() -> Result<()> {
    let path = FractalConfig::write_default_if_missing().context("failed to write default config")?;
    println!("Config at {}", path.display());
    Ok(())
}
