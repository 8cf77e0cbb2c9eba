//! Error types for the navigation core.

pub type Result<T> = std::result::Result<T, NavError>;

#[derive(Debug, thiserror::Error)]
pub enum NavError {
    /// Transport-level failure talking to the position source.
    #[error("connection error: {0}")]
    Connection(String),

    /// The three viewing planes do not meet in a single point.
    #[error("degenerate plane geometry: |det| = {det:.3e} is below {eps:.1e}")]
    DegenerateGeometry { det: f64, eps: f64 },

    /// Placement basis failed the orthonormality check.
    #[error("invalid placement basis: {0}")]
    InvalidBasis(String),

    /// `start` was called while a session is already running.
    #[error("a navigation session is already active")]
    SessionActive,

    /// No tool center has been resolved yet.
    #[error("no tool center available")]
    NoToolCenter,

    /// The controller was composed without any viewports.
    #[error("no viewports configured")]
    NoViewports,

    /// The named reference viewport is not among the configured viewports.
    #[error("unknown reference viewport: {0}")]
    UnknownViewport(String),

    /// The background task owning the state has shut down.
    #[error("navigation task is no longer running")]
    ChannelClosed,
}
