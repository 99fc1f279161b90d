use std::io;
use std::path::PathBuf;

use sweep_core::error::WatchdogConfigError;
use thiserror::Error;

/// Failures surfaced by the host binary.
#[derive(Debug, Error)]
pub enum HostError {
    #[error("{}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("invalid configuration in {}: {source}", path.display())]
    Config {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
    #[error("unknown channel type `{0}` (expected AWGN, TDL-A, TDL-B or TDL-C)")]
    UnknownChannel(String),
    #[error("invalid [watchdog] section: {0}")]
    Watchdog(#[from] WatchdogConfigError),
    #[error("csv output failed: {0}")]
    Csv(#[from] csv::Error),
}
