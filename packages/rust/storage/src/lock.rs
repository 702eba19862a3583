//! Bounded-wait lock acquisition.

use std::time::Duration;

use careerkb_shared::{CareerKbError, Result};
use tokio::sync::{Mutex, MutexGuard};

/// Acquire `lock` or fail with [`CareerKbError::LockTimeout`] after `timeout`.
pub(crate) async fn acquire<'a>(
    lock: &'a Mutex<()>,
    resource: &'static str,
    timeout: Duration,
) -> Result<MutexGuard<'a, ()>> {
    tokio::time::timeout(timeout, lock.lock())
        .await
        .map_err(|_| CareerKbError::LockTimeout {
            resource,
            timeout_ms: timeout.as_millis() as u64,
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn contended_lock_times_out() {
        let lock = Mutex::new(());
        let _held = acquire(&lock, "staging", Duration::from_millis(50))
            .await
            .unwrap();

        let err = acquire(&lock, "staging", Duration::from_millis(20))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            CareerKbError::LockTimeout {
                resource: "staging",
                timeout_ms: 20
            }
        ));
    }
}
