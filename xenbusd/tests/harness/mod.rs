//! Test fixtures: a populated in-memory store and a recording device model.

#![allow(dead_code)]

use async_trait::async_trait;
use std::collections::HashSet;
use std::time::Duration;
use tokio::sync::Mutex;
use xenbus_store::{MemoryStore, Store};
use xenbusd::device::{BackendDevice, DeviceModel};
use xenbusd::error::Result;

/// Device model that records every callback.
pub struct Recorder {
    registered: Mutex<HashSet<String>>,
    found: Mutex<Vec<BackendDevice>>,
    gone: Mutex<Vec<String>>,
}

impl Recorder {
    pub fn new() -> Self {
        Recorder {
            registered: Mutex::new(HashSet::new()),
            found: Mutex::new(Vec::new()),
            gone: Mutex::new(Vec::new()),
        }
    }

    /// Every `device_found` call, in order.
    pub async fn found(&self) -> Vec<BackendDevice> {
        self.found.lock().await.clone()
    }

    /// Every `device_gone` call, in order.
    pub async fn gone(&self) -> Vec<String> {
        self.gone.lock().await.clone()
    }

    /// Bus ids of all found devices, sorted.
    pub async fn found_bus_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self
            .found
            .lock()
            .await
            .iter()
            .map(|d| d.bus_id.to_string())
            .collect();
        ids.sort();
        ids
    }

    pub async fn registered_count(&self) -> usize {
        self.registered.lock().await.len()
    }
}

#[async_trait]
impl DeviceModel for Recorder {
    async fn known(&self, nodename: &str) -> bool {
        self.registered.lock().await.contains(nodename)
    }

    async fn device_found(&self, device: BackendDevice) -> Result<()> {
        self.registered
            .lock()
            .await
            .insert(device.nodename.clone());
        self.found.lock().await.push(device);
        Ok(())
    }

    async fn device_gone(&self, nodename: &str) {
        self.registered.lock().await.remove(nodename);
        self.gone.lock().await.push(nodename.to_string());
    }
}

/// Create a complete backend node plus its frontend counterpart.
pub async fn seed_device(store: &MemoryStore, devicetype: &str, domid: u32, devid: &str) {
    let backend = format!("backend/{devicetype}/{domid}/{devid}");
    let frontend = format!("device/{devicetype}/{domid}/{devid}");
    store.write(&frontend, b"").await.unwrap();
    store
        .write(
            &format!("{backend}/frontend-id"),
            domid.to_string().as_bytes(),
        )
        .await
        .unwrap();
    store
        .write(&format!("{backend}/frontend"), frontend.as_bytes())
        .await
        .unwrap();
}

/// Poll an async condition until it holds or the timeout expires.
pub async fn wait_for<F, Fut>(what: &str, mut check: F)
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    for _ in 0..200 {
        if check().await {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("timed out waiting for {what}");
}
