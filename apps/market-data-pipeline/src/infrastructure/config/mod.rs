//! Configuration Module
//!
//! Configuration loading for the pipeline service.

mod settings;

pub use settings::{
    ApiCredentials, BroadcastSettings, BrokerBackend, BrokerSettings, ConfigError,
    DEFAULT_QUOTE_API_URL, PipelineConfig, PublisherSettings, ServerSettings, SupervisorMode,
    SupervisorSettings, TopicSettings,
};
