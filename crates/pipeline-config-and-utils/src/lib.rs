//! Configuration, paths and logging for the telemetry pipeline tools.

mod config;
mod error;
mod logging;
mod paths;

pub use config::{ChannelSettings, Config, DEFAULT_INGESTION_URL, DEFAULT_LOG_LEVEL};
pub use error::{CoreError, CoreResult};
pub use logging::{init_logging, parse_level, LogWriter};
pub use paths::Paths;
