//! Bus config loader (strict parsing).

pub mod schema;

use std::fs;

use overlink_core::error::{OverlinkError, Result};

pub use schema::{BusConfig, OverlaySection, RegistrySection, StreamRole, StreamSection};

pub fn load_from_file(path: &str) -> Result<BusConfig> {
    let s = fs::read_to_string(path)
        .map_err(|e| OverlinkError::Config(format!("read config failed ({path}): {e}")))?;
    load_from_str(&s)
}

pub fn load_from_str(s: &str) -> Result<BusConfig> {
    let cfg: BusConfig = serde_yaml::from_str(s)
        .map_err(|e| OverlinkError::Config(format!("invalid yaml: {e}")))?;
    cfg.validate()?;
    Ok(cfg)
}
