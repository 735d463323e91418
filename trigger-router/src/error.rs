//! Error markers understood by the retry executor and the worker harness
//!
//! Application code uses `anyhow::Result` throughout; these types are attached
//! to an error chain to change how it is handled.

/// Marks an error that must not be retried
///
/// The wrapped error stays reachable through `source()`, so callers can still
/// downcast to it.
#[derive(Debug, thiserror::Error)]
#[error("not retryable")]
pub struct NonRetryable {
    #[source]
    source: anyhow::Error,
}

/// Returned when shutdown interrupts an operation between attempts
#[derive(Debug, Clone, Copy, thiserror::Error)]
#[error("operation cancelled by shutdown")]
pub struct Cancelled;

/// A record that could not be pushed to its next queue
///
/// Carries the record as it was when routing failed, including an audit id
/// assigned on the way, so the harness parks that payload instead of the one
/// it popped.
#[derive(Debug, thiserror::Error)]
#[error("failed to route {key} to {queue}")]
pub struct Unrouted {
    pub key: String,
    pub queue: String,
    pub payload: String,
}

/// Wrap any error so the retry executor gives up immediately
pub fn non_retryable(err: impl Into<anyhow::Error>) -> anyhow::Error {
    anyhow::Error::new(NonRetryable { source: err.into() })
}

/// True if a `NonRetryable` marker appears anywhere in the chain
pub fn is_non_retryable(err: &anyhow::Error) -> bool {
    err.downcast_ref::<NonRetryable>().is_some() || err.chain().any(|c| c.is::<NonRetryable>())
}

/// True if the operation stopped because of shutdown
pub fn is_cancelled(err: &anyhow::Error) -> bool {
    err.downcast_ref::<Cancelled>().is_some() || err.chain().any(|c| c.is::<Cancelled>())
}

/// Payload to park for a failed item, if routing got far enough to update it
pub fn unrouted_payload(err: &anyhow::Error) -> Option<&str> {
    err.downcast_ref::<Unrouted>().map(|u| u.payload.as_str())
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Context;

    #[test]
    fn test_non_retryable_survives_context() {
        let err = non_retryable(anyhow::anyhow!("bad payload"))
            .context("while routing record");
        assert!(is_non_retryable(&err));
        assert!(format!("{:#}", err).contains("bad payload"));
    }

    #[test]
    fn test_non_retryable_keeps_original_error() {
        let decode = can_signal_decoder::DecoderError::ScanError {
            line: 3,
            reason: "odd payload".to_string(),
        };
        let err = non_retryable(decode).context("scanning capture");

        let original = err
            .chain()
            .find_map(|c| c.downcast_ref::<can_signal_decoder::DecoderError>());
        assert!(matches!(
            original,
            Some(can_signal_decoder::DecoderError::ScanError { line: 3, .. })
        ));
    }

    #[test]
    fn test_plain_error_is_retryable() {
        let err = anyhow::anyhow!("connection reset");
        assert!(!is_non_retryable(&err));
        assert!(!is_cancelled(&err));
    }

    #[test]
    fn test_cancelled_as_context() {
        let err = anyhow::anyhow!("timeout").context(Cancelled);
        assert!(is_cancelled(&err));
    }
}
