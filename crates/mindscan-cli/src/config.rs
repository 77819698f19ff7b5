//! Model configuration for the CLI

use mindscan_classifiers::HybridModelConfig;
use std::path::Path;
use tracing::warn;

/// Load configuration from file and CLI overrides
pub fn load(config_path: &str, cli: &crate::Cli) -> anyhow::Result<HybridModelConfig> {
    load_with_overrides(config_path, cli.device, cli.max_length)
}

fn load_with_overrides(
    config_path: &str,
    device: Option<mindscan_classifiers::DeviceSpec>,
    max_length: Option<usize>,
) -> anyhow::Result<HybridModelConfig> {
    // Try to load from file, or use defaults
    let mut config = if Path::new(config_path).exists() {
        HybridModelConfig::from_file(config_path)?
    } else {
        warn!("{} not found, using default configuration", config_path);
        HybridModelConfig::default()
    };

    // Apply CLI overrides
    if let Some(device) = device {
        config.inference.device = device;
    }

    if let Some(max_length) = max_length {
        config.inference.max_length = max_length;
    }

    config.validate()?;
    Ok(config)
}
