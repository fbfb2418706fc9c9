use thiserror::Error;

/// Transient failure signatures that justify a requeue. CDP surfaces most
/// session loss as protocol-level errors whose variants are not stable, so
/// the allow-list matches on message text the way browsers actually report
/// these conditions.
const TRANSIENT_SIGNATURES: &[&str] = &[
    "timeout",
    "timed out",
    "target closed",
    "session closed",
    "page closed",
    "browser closed",
    "protocol error",
    "connection closed",
    "websocket",
];

/// Everything that can go wrong while harvesting one card.
#[derive(Debug, Error)]
pub enum ScrapeError {
    /// The browser failed to launch; fatal to the whole run.
    #[error("browser launch failed: {0}")]
    Launch(String),

    /// CDP transport or protocol failure.
    #[error("browser error: {0}")]
    Browser(#[from] chromiumoxide::error::CdpError),

    /// A navigation, element or response wait ran out of time.
    #[error("timed out waiting for {0}")]
    Timeout(String),

    /// The worker's page or its target is gone.
    #[error("browser session closed: {0}")]
    SessionClosed(String),

    /// An expected sales payload failed the validating decode. Usually means
    /// the wrong response was matched, so it is worth a retry.
    #[error("malformed sales payload: {0}")]
    MalformedResponse(String),

    /// The persistence sink failed for a non-duplicate reason.
    #[error("store error: {0}")]
    Store(#[from] sqlx::Error),
}

impl ScrapeError {
    /// Whether a job that failed with this error should be requeued.
    pub fn is_recoverable(&self) -> bool {
        match self {
            ScrapeError::Timeout(_) => true,
            ScrapeError::SessionClosed(_) => true,
            ScrapeError::MalformedResponse(_) => true,
            ScrapeError::Browser(err) => {
                if matches!(err, chromiumoxide::error::CdpError::Timeout) {
                    return true;
                }
                let message = err.to_string().to_lowercase();
                TRANSIENT_SIGNATURES
                    .iter()
                    .any(|signature| message.contains(signature))
            }
            ScrapeError::Launch(_) => false,
            ScrapeError::Store(_) => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wait_timeouts_are_recoverable() {
        assert!(ScrapeError::Timeout("navigation".into()).is_recoverable());
        assert!(ScrapeError::SessionClosed("target detached".into()).is_recoverable());
    }

    #[test]
    fn malformed_payloads_are_recoverable() {
        // A decode failure most often means the wrong response was matched.
        assert!(ScrapeError::MalformedResponse("missing field `data`".into()).is_recoverable());
    }

    #[test]
    fn store_failures_are_fatal() {
        let err = ScrapeError::Store(sqlx::Error::PoolClosed);
        assert!(!err.is_recoverable());
    }

    #[test]
    fn launch_failures_are_fatal() {
        assert!(!ScrapeError::Launch("no chromium binary".into()).is_recoverable());
    }
}
