pub mod config;
pub mod logging;
pub mod paths;

pub use config::{
    Config, ConfigError, LogLevel, LoggingConfig, PanelConfig, PanelMode, PluginEntry,
    ValidationError, WrapperConfig,
};
pub use logging::{init_logging, init_wrapper_logging, LoggingError, LoggingGuard};
pub use paths::{AppDirs, DirsError};

pub const APP_NAME: &str = "bladebar";
pub const APP_AUTHOR: &str = "Blade";
pub const APP_QUALIFIER: &str = "org";

/// Environment variable carrying the bus directory from the panel to its wrappers.
pub const BUS_DIR_ENV: &str = "BLADEBAR_BUS_DIR";

/// Environment variable carrying the wrapper log filter.
pub const LOG_ENV: &str = "BLADEBAR_LOG";
