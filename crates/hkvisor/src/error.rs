/// Errors that stop the daemon before or while wiring the pipeline.
///
/// Per-camera failures never surface here; subscribers and the dispatcher
/// log and absorb them.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Config error: {0}")]
    Config(#[from] crate::config::ConfigError),

    #[error("HTTP client error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Mail transport error: {0}")]
    Notify(#[from] crate::notify::NotifyError),

    #[error("Task error: {0}")]
    Join(#[from] tokio::task::JoinError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
