use anyhow::Result;
use serde::Serialize;
use sirius_core::background::BackgroundConfig;
use sirius_core::extract::ExtractConfig;

#[derive(Serialize)]
struct FullConfig {
    background: BackgroundConfig,
    extract: ExtractConfig,
}

/// Print the default background and extraction configuration as TOML.
pub fn run() -> Result<()> {
    let config = FullConfig {
        background: BackgroundConfig::default(),
        extract: ExtractConfig::default(),
    };
    let toml_str = toml::to_string_pretty(&config)?;
    print!("{}", toml_str);
    Ok(())
}
