//! Optional process-wide façade over a single [`SessionCore`] (§4.1, §9).
//!
//! Most embedders only ever need one runtime per process; this mirrors the
//! config module's `OnceLock` singleton pattern instead of forcing every
//! caller to thread an `Arc<SessionCore>` through their own state.

use std::sync::{Arc, OnceLock};

use tokio::sync::Mutex;

use crate::config::RuntimeConfig;
use crate::errors::Result;
use crate::session::SessionCore;

static SHARED: OnceLock<Mutex<Option<Arc<SessionCore>>>> = OnceLock::new();

fn slot() -> &'static Mutex<Option<Arc<SessionCore>>> {
    SHARED.get_or_init(|| Mutex::new(None))
}

/// Build and install the process-wide [`SessionCore`].
///
/// Without `force`, a prior install is returned as-is and `config` is
/// discarded. With `force`, the existing instance is disposed first and
/// replaced with one built from `config`.
pub async fn configure(config: RuntimeConfig, force: bool) -> Result<Arc<SessionCore>> {
    let mut guard = slot().lock().await;

    if let Some(existing) = guard.take() {
        if !force {
            *guard = Some(existing.clone());
            return Ok(existing);
        }
        existing.dispose().await?;
    }

    let core = SessionCore::configure(config).await?;
    *guard = Some(core.clone());
    Ok(core)
}

/// The process-wide [`SessionCore`], if [`configure`] has been called.
pub async fn shared() -> Option<Arc<SessionCore>> {
    slot().lock().await.clone()
}

/// Dispose and clear the process-wide [`SessionCore`], if any.
pub async fn shutdown() -> Result<()> {
    let mut guard = slot().lock().await;
    if let Some(core) = guard.take() {
        core.dispose().await?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_config() -> RuntimeConfig {
        RuntimeConfig {
            api_base: "https://ex/api".to_string(),
            api_key: "key".to_string(),
            product_slug: "p".to_string(),
            storage_prefix: format!("singleton-test-{}:", std::process::id()),
            auto_validate_interval_secs: 0,
            heartbeat_interval_secs: 0,
            ..RuntimeConfig::default()
        }
    }

    // These all touch the one process-wide slot; run serially so one test's
    // configure/shutdown can't interleave with another's.

    #[tokio::test]
    #[serial_test::serial(singleton)]
    async fn configure_without_prior_install_succeeds() {
        let core = configure(test_config(), false).await.unwrap();
        assert!(shared().await.is_some());
        core.dispose().await.unwrap();
        shutdown().await.unwrap();
    }

    #[tokio::test]
    #[serial_test::serial(singleton)]
    async fn configure_twice_without_force_returns_existing() {
        let first = configure(test_config(), false).await.unwrap();
        let second = configure(test_config(), false).await.unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        assert!(Arc::ptr_eq(&first, &shared().await.unwrap()));
        shutdown().await.unwrap();
    }

    #[tokio::test]
    #[serial_test::serial(singleton)]
    async fn configure_with_force_replaces_existing() {
        let _first = configure(test_config(), false).await.unwrap();
        let second = configure(test_config(), true).await.unwrap();
        assert!(Arc::ptr_eq(&second, &shared().await.unwrap()));
        shutdown().await.unwrap();
    }

    #[tokio::test]
    #[serial_test::serial(singleton)]
    async fn shutdown_without_configure_is_a_no_op() {
        shutdown().await.unwrap();
        assert!(shared().await.is_none());
    }
}
