//! Maps remote errors to recovery actions.
//!
//! The engine never branches on raw remote errors. Every failure goes
//! through [`classify`], which logs it once at the right level and names
//! the single recovery the engine should take.

use std::time::Duration;

use crate::remote::RemoteError;

/// How long to wait before a full resync after a cursor expires. The pause
/// lets the remote settle instead of hammering it with an immediate
/// from-scratch fetch.
pub const RESYNC_DELAY: Duration = Duration::from_secs(30);

/// The single recovery the engine takes for a failed remote call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecoveryAction {
    /// Stop talking to the remote until provisioning succeeds again
    Suspend,
    /// Discard both cursors and refetch everything after `delay`
    FullResync { delay: Duration },
    /// Transient; leave all local state as-is and retry on the next cycle
    RetryLater,
}

/// Classify a remote failure and log it.
pub fn classify(error: &RemoteError) -> RecoveryAction {
    match error {
        RemoteError::NotAuthenticated => {
            tracing::warn!("Remote account unavailable; suspending sync");
            RecoveryAction::Suspend
        }
        RemoteError::TokenExpired => {
            tracing::warn!(
                delay_secs = RESYNC_DELAY.as_secs(),
                "Change cursor expired; scheduling full resync"
            );
            RecoveryAction::FullResync { delay: RESYNC_DELAY }
        }
        RemoteError::QuotaExceeded => {
            tracing::warn!("Remote storage quota exceeded; changes stay pending");
            RecoveryAction::RetryLater
        }
        RemoteError::PartialFailure { saved, failures } => {
            // The uploader already confirmed the accepted subset and
            // resubmitted what it could; whatever is left stays pending.
            tracing::warn!(
                saved = saved.len(),
                failed = failures.len(),
                "Partial batch failure; rejected records stay pending"
            );
            RecoveryAction::RetryLater
        }
        RemoteError::Network(reason) => {
            tracing::debug!(%reason, "Remote unreachable; will retry");
            RecoveryAction::RetryLater
        }
        RemoteError::Api(reason) => {
            tracing::error!(%reason, "Unexpected remote error");
            RecoveryAction::RetryLater
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_auth_failure_suspends() {
        assert_eq!(classify(&RemoteError::NotAuthenticated), RecoveryAction::Suspend);
    }

    #[test]
    fn test_expired_token_schedules_delayed_resync() {
        assert_eq!(
            classify(&RemoteError::TokenExpired),
            RecoveryAction::FullResync { delay: RESYNC_DELAY }
        );
    }

    #[test]
    fn test_transient_errors_retry() {
        assert_eq!(
            classify(&RemoteError::Network("timeout".into())),
            RecoveryAction::RetryLater
        );
        assert_eq!(classify(&RemoteError::QuotaExceeded), RecoveryAction::RetryLater);
        assert_eq!(
            classify(&RemoteError::Api("500".into())),
            RecoveryAction::RetryLater
        );
        assert_eq!(
            classify(&RemoteError::PartialFailure { saved: vec![], failures: vec![] }),
            RecoveryAction::RetryLater
        );
    }
}
