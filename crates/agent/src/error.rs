use thiserror::Error;

#[derive(Debug, Error)]
pub enum AgentError {
    #[error("configuration error: {0}")]
    Config(String),

    #[error("failed to read settings file: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse settings file: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("failed to parse gateway configuration: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("certificate watcher error: {0}")]
    Watch(#[from] notify::Error),

    #[error("messaging error: {0}")]
    Messaging(#[from] ponder_messaging::MessagingError),
}
