//! Device records and the device-model seam.

use crate::busid::BusId;
use crate::error::Result;
use async_trait::async_trait;
use std::collections::HashMap;
use tokio::sync::Mutex;
use tracing::{debug, info};

/// One discovered backend device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackendDevice {
    /// Device type, e.g. `vif`.
    pub devicetype: String,
    /// Full store path of the backend node.
    pub nodename: String,
    /// Derived bus identifier, `<type>-<frontend-domid>-<id>`.
    pub bus_id: BusId,
    /// Domain id of the frontend half.
    pub frontend_domid: u32,
    /// Store path of the frontend node.
    pub frontend_path: String,
}

/// The external bus/device model the prober hands discoveries to.
///
/// The reference wires these as bus function pointers; here the model is
/// injected. Implementations own device lifecycle from `device_found` until
/// the matching `device_gone`.
#[async_trait]
pub trait DeviceModel: Send + Sync {
    /// Whether a device for this nodename is already registered. Known
    /// nodes are skipped on re-probe so an unchanged namespace produces no
    /// duplicate registrations.
    async fn known(&self, nodename: &str) -> bool;

    /// A new backend node was discovered and resolved.
    async fn device_found(&self, device: BackendDevice) -> Result<()>;

    /// A previously discovered node disappeared from the store.
    async fn device_gone(&self, nodename: &str);
}

/// Default in-process device model: a registry keyed by nodename.
pub struct BusRegistry {
    devices: Mutex<HashMap<String, BackendDevice>>,
}

impl BusRegistry {
    pub fn new() -> Self {
        BusRegistry {
            devices: Mutex::new(HashMap::new()),
        }
    }

    pub async fn len(&self) -> usize {
        self.devices.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.devices.lock().await.is_empty()
    }

    pub async fn get(&self, nodename: &str) -> Option<BackendDevice> {
        self.devices.lock().await.get(nodename).cloned()
    }

    /// All registered bus ids, sorted.
    pub async fn bus_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self
            .devices
            .lock()
            .await
            .values()
            .map(|d| d.bus_id.to_string())
            .collect();
        ids.sort();
        ids
    }
}

impl Default for BusRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl DeviceModel for BusRegistry {
    async fn known(&self, nodename: &str) -> bool {
        self.devices.lock().await.contains_key(nodename)
    }

    async fn device_found(&self, device: BackendDevice) -> Result<()> {
        info!(bus_id = %device.bus_id, nodename = %device.nodename, "device registered");
        self.devices
            .lock()
            .await
            .insert(device.nodename.clone(), device);
        Ok(())
    }

    async fn device_gone(&self, nodename: &str) {
        if self.devices.lock().await.remove(nodename).is_some() {
            info!(nodename = %nodename, "device removed");
        } else {
            debug!(nodename = %nodename, "removal for unknown device");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::busid::BusId;

    fn device(nodename: &str, bus_id: &str) -> BackendDevice {
        let mut parts = bus_id.splitn(3, '-');
        let devicetype = parts.next().unwrap().to_string();
        let domid: u32 = parts.next().unwrap().parse().unwrap();
        let devid = parts.next().unwrap();
        BackendDevice {
            devicetype: devicetype.clone(),
            nodename: nodename.to_string(),
            bus_id: BusId::format(&devicetype, domid, devid).unwrap(),
            frontend_domid: domid,
            frontend_path: format!("device/{devicetype}/{domid}/{devid}"),
        }
    }

    #[tokio::test]
    async fn test_registry_roundtrip() {
        let registry = BusRegistry::new();
        registry
            .device_found(device("backend/vif/3/0", "vif-3-0"))
            .await
            .unwrap();
        assert!(registry.known("backend/vif/3/0").await);
        assert_eq!(registry.len().await, 1);
        assert_eq!(registry.bus_ids().await, vec!["vif-3-0"]);

        registry.device_gone("backend/vif/3/0").await;
        assert!(registry.is_empty().await);
    }

    #[tokio::test]
    async fn test_reregistration_replaces() {
        let registry = BusRegistry::new();
        registry
            .device_found(device("backend/vif/3/0", "vif-3-0"))
            .await
            .unwrap();
        registry
            .device_found(device("backend/vif/3/0", "vif-3-0"))
            .await
            .unwrap();
        assert_eq!(registry.len().await, 1);
    }
}
