//! Bounded waiting on blocking collaborator calls

use std::sync::mpsc::{self, RecvTimeoutError};
use std::thread;
use std::time::Duration;
use tracing::warn;

use crate::error::{ReleaseError, Result};

/// Run `call` on a worker thread and wait at most `timeout` for it
///
/// A timeout is a `Transport` failure. The worker is left to finish on its
/// own; its late result is discarded.
pub fn bounded<T, F>(label: &str, timeout: Duration, call: F) -> Result<T>
where
    F: FnOnce() -> Result<T> + Send + 'static,
    T: Send + 'static,
{
    let (tx, rx) = mpsc::channel();
    thread::Builder::new()
        .name(format!("call-{}", label))
        .spawn(move || {
            // Receiver may be gone after a timeout
            let _ = tx.send(call());
        })?;

    match rx.recv_timeout(timeout) {
        Ok(result) => result,
        Err(RecvTimeoutError::Timeout) => {
            warn!("{} did not answer within {:?}", label, timeout);
            Err(ReleaseError::transport(format!(
                "{} timed out after {}s",
                label,
                timeout.as_secs_f32()
            )))
        }
        Err(RecvTimeoutError::Disconnected) => Err(ReleaseError::transport(format!(
            "{} aborted without a result",
            label
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_result_passes_through() {
        let value = bounded("quick", Duration::from_secs(5), || Ok(42)).unwrap();
        assert_eq!(value, 42);

        let err = bounded::<(), _>("failing", Duration::from_secs(5), || {
            Err(ReleaseError::merge_conflict("nope"))
        })
        .unwrap_err();
        assert!(matches!(err, ReleaseError::MergeConflict(_)));
    }

    #[test]
    fn test_timeout_is_transport_error() {
        let err = bounded("slow", Duration::from_millis(20), || {
            thread::sleep(Duration::from_millis(500));
            Ok(())
        })
        .unwrap_err();
        assert!(matches!(err, ReleaseError::Transport(ref msg) if msg.contains("slow")));
    }

    #[test]
    fn test_panicking_call_is_transport_error() {
        let err = bounded::<(), _>("panicky", Duration::from_secs(5), || panic!("boom"))
            .unwrap_err();
        assert!(matches!(err, ReleaseError::Transport(_)));
    }
}
