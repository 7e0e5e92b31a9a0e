//! Application and engine configuration

mod app_config;
mod engine_settings;

pub use app_config::{AppConfig, LogFormat, LoggingConfig, StoreSettings};
pub use engine_settings::{EngineSettings, ParticipationLimit, DEFAULT_ROBOT_REGEX};
