//! Facilities for reading runtime configuration values
use figment::{
    providers::{Env, Format, Toml},
    Figment,
};
use serde::Deserialize;
#[allow(unused_imports)]
use tracing::{debug, error, info, trace, warn};

/// Extractor configuration
#[derive(Debug, Deserialize)]
pub struct Config {
    /// The data client hardware identifier (5 characters)
    pub hw_id: String,
    /// The manufacturer key (5 characters)
    pub m_key: String,
    /// The manufacturer identifier (2 characters)
    pub m_id: String,
    /// Directory scanned recursively for encrypted cells
    pub input_dir: String,
    /// Directory receiving the decrypted cells
    pub output_dir: String,
    /// Path to the permit listing (PERMIT.TXT)
    pub permit_file: String,
    /// Single cell decompressed limit (the cell is skipped if exceeded)
    #[serde(default = "Config::default_max_unzip_size")]
    pub max_unzip_size: u64,
}

impl Config {
    /// Loads the configuration from a `toml` file
    pub fn new() -> Result<Self, Box<dyn std::error::Error>> {
        let config: Self = Figment::new()
            .merge(Toml::file("s63extract.toml"))
            .merge(Env::prefixed("S63EXTRACT__").split("__"))
            .extract()
            .map_err(|err| {
                error!("Failed to validate configuration: {}", err);
                err
            })?;
        if config.max_unzip_size > i64::MAX as u64 {
            error!(
                "Value of max_unzip_size too large (must be strictly < {})",
                i64::MAX
            );
            return Err("Value of max_unzip_size too large".into());
        }
        Ok(config)
    }

    /// Returns the default decompression bound
    fn default_max_unzip_size() -> u64 {
        256 * 1024 * 1024
    }
}
