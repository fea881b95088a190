//! Error types for the feed core

use thiserror::Error;

/// Feed core errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FeedError {
    #[error("Transport unavailable: {0}")]
    TransportUnavailable(String),

    #[error("Subscription channel is closed")]
    ChannelClosed,

    #[error("Event queue is full")]
    QueueFull,

    #[error("Session is closed")]
    SessionClosed,

    #[error("Invalid time: {0}")]
    InvalidTime(String),

    #[error("Configuration error: {0}")]
    Config(String),
}

impl From<chrono::ParseError> for FeedError {
    fn from(err: chrono::ParseError) -> Self {
        FeedError::InvalidTime(err.to_string())
    }
}

impl<T> From<tokio::sync::mpsc::error::SendError<T>> for FeedError {
    fn from(_: tokio::sync::mpsc::error::SendError<T>) -> Self {
        FeedError::ChannelClosed
    }
}

pub type Result<T> = std::result::Result<T, FeedError>;
