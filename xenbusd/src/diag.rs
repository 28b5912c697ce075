//! Best-effort diagnostic publication.
//!
//! Probe statistics are written back into the store with weak writes so a
//! monitor can pick them up; a failing store never fails a probe pass.

use crate::probe::ProbePass;
use xenbus_store::Store;

/// Publish the device count of each pass.
pub const DIAG_DEVICES: u32 = 1 << 0;
/// Publish the per-pass error count.
pub const DIAG_ERRORS: u32 = 1 << 1;

/// Diagnostic reporting configuration.
#[derive(Debug, Clone)]
pub struct DiagConfig {
    /// Store path to publish under; `None` disables publication. The path
    /// must lie outside the watched bus subtree.
    pub report_path: Option<String>,
    /// Bitwise OR of the `DIAG_*` flags.
    pub flags: u32,
}

impl Default for DiagConfig {
    fn default() -> Self {
        DiagConfig {
            report_path: None,
            flags: DIAG_DEVICES | DIAG_ERRORS,
        }
    }
}

/// Write the selected statistics below the configured path.
pub async fn publish(store: &dyn Store, config: &DiagConfig, pass: &ProbePass) {
    let Some(base) = &config.report_path else {
        return;
    };
    if config.flags & DIAG_DEVICES != 0 {
        store
            .write_weak(&format!("{base}/devices"), pass.devices.to_string().as_bytes())
            .await;
    }
    if config.flags & DIAG_ERRORS != 0 {
        store
            .write_weak(&format!("{base}/errors"), pass.errors.to_string().as_bytes())
            .await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use xenbus_store::MemoryStore;

    #[tokio::test]
    async fn test_publish_selected_stats() {
        let store = MemoryStore::new();
        let config = DiagConfig {
            report_path: Some("control/xenbusd".to_string()),
            flags: DIAG_DEVICES,
        };
        let pass = ProbePass {
            devices: 4,
            errors: 1,
            ..Default::default()
        };

        publish(&store, &config, &pass).await;
        assert_eq!(store.read("control/xenbusd/devices").await.unwrap(), b"4");
        assert!(!store.exists("control/xenbusd/errors").await);
    }

    #[tokio::test]
    async fn test_publish_disabled() {
        let store = MemoryStore::new();
        let pass = ProbePass::default();
        publish(&store, &DiagConfig::default(), &pass).await;
        assert!(!store.exists("control").await);
    }
}
