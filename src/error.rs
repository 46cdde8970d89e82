use std::io;
use thiserror::Error;

/// Crate-wide error taxonomy.
///
/// `SourceUnavailable` and `NoDataAvailable` are recoverable: the dispatch
/// loop treats the affected iteration as "no new data" and keeps polling.
/// `CommandChannel` and `ConfirmationLine` are fatal: the loop cannot safely
/// keep issuing device commands on a broken path. `AuditPublish` is logged
/// and otherwise ignored so that losing the audit trail never stops
/// stimulation delivery.
#[derive(Debug, Error)]
pub enum Error {
    #[error("failed to load config from {path}: {reason}")]
    Config { path: String, reason: String },

    #[error("marker source unavailable: {0}")]
    SourceUnavailable(#[source] io::Error),

    #[error("no marker data buffered yet")]
    NoDataAvailable,

    #[error("stimulation command channel: {0}")]
    CommandChannel(#[source] io::Error),

    #[error("hardware confirmation line: {0}")]
    ConfirmationLine(#[source] io::Error),

    #[error("audit publish failed: {0}")]
    AuditPublish(String),
}

impl Error {
    /// Whether the dispatch loop must transition to `Failed` on this error.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Error::CommandChannel(_) | Error::ConfirmationLine(_))
    }
}
