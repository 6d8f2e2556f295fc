use thiserror::Error;

#[derive(Error, Debug)]
pub enum CaptureError {
    #[error("Failed to connect to Chrome: {0}")]
    ConnectionFailed(String),

    #[error("Failed to launch Chrome: {0}")]
    LaunchFailed(String),

    #[error("Navigation failed: {0}")]
    NavigationFailed(String),

    #[error("No page available")]
    NoPage,

    #[error("Script evaluation failed: {0}")]
    Script(String),

    #[error("Element handle {0} is no longer valid")]
    StaleElement(u64),

    #[error("CDP error: {0}")]
    Cdp(#[from] chromiumoxide::error::CdpError),

    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("Image error: {0}")]
    Image(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Other error: {0}")]
    Other(String),
}

pub type Result<T> = std::result::Result<T, CaptureError>;
