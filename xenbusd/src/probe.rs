//! Directory enumeration: walking the bus subtree and registering devices.

use crate::busid::{self, BusId};
use crate::config::BusConfig;
use crate::device::{BackendDevice, DeviceModel};
use crate::error::Result;
use crate::frontend;
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, warn};
use xenbus_store::{Store, StoreError};

/// Accumulated results of one enumeration pass.
#[derive(Debug, Default)]
pub struct ProbePass {
    /// Every backend nodename seen this pass, new or already known.
    pub seen: HashSet<String>,
    /// Nodes successfully probed.
    pub devices: usize,
    /// Per-item failures recorded without aborting the pass.
    pub errors: usize,
}

/// Walks the `root/<type>/<frontend>/<id>` namespace and hands resolved
/// devices to the model.
pub struct Prober {
    store: Arc<dyn Store>,
    model: Arc<dyn DeviceModel>,
    config: BusConfig,
}

impl Prober {
    pub fn new(store: Arc<dyn Store>, model: Arc<dyn DeviceModel>, config: BusConfig) -> Self {
        Prober {
            store,
            model,
            config,
        }
    }

    /// Probe one backend node: parse its path, resolve the frontend half,
    /// derive the bus id and hand the record to the device model.
    ///
    /// Registration is skipped for nodes the model already knows, so an
    /// unchanged namespace re-probes without duplicate registrations.
    pub async fn probe_node(&self, nodename: &str, pass: &mut ProbePass) -> Result<()> {
        debug!(nodename = %nodename, "probing node");
        let (devicetype, devid) = busid::parse_nodename(nodename)?;
        let info = frontend::resolve_frontend(self.store.as_ref(), nodename).await?;
        let bus_id = BusId::format(devicetype, info.domid, devid)?;

        if !self.model.known(nodename).await {
            self.model
                .device_found(BackendDevice {
                    devicetype: devicetype.to_string(),
                    nodename: nodename.to_string(),
                    bus_id,
                    frontend_domid: info.domid,
                    frontend_path: info.path,
                })
                .await?;
        }
        pass.seen.insert(nodename.to_string());
        pass.devices += 1;
        Ok(())
    }

    /// Probe every instance under `root/type/<domid>`.
    ///
    /// The first failing instance aborts its remaining siblings and becomes
    /// the call's result; iteration at the outer levels continues. Returns
    /// the number of instances probed.
    pub async fn probe_domain(
        &self,
        devicetype: &str,
        domid: &str,
        pass: &mut ProbePass,
    ) -> Result<usize> {
        let dir = format!("{}/{}", self.config.type_dir(devicetype), domid);
        let names = self.store.directory(&dir).await?;
        let mut probed = 0;
        for name in names {
            let nodename = format!("{dir}/{name}");
            self.probe_node(&nodename, pass).await?;
            probed += 1;
        }
        Ok(probed)
    }

    /// Probe every domain directory under `root/type`.
    pub async fn probe_type(&self, devicetype: &str, pass: &mut ProbePass) {
        let dir = self.config.type_dir(devicetype);
        let domids = match self.store.directory(&dir).await {
            Ok(v) => v,
            // The type directory vanishing between listings is normal.
            Err(StoreError::NotFound(_)) => return,
            Err(e) => {
                warn!(dir = %dir, error = %e, "listing type directory failed");
                pass.errors += 1;
                return;
            }
        };
        for domid in domids {
            if let Err(e) = self.probe_domain(devicetype, &domid, pass).await {
                pass.errors += 1;
                if e.is_data_error() {
                    debug!(devicetype = %devicetype, domid = %domid, error = %e, "skipping inconsistent node");
                } else {
                    warn!(devicetype = %devicetype, domid = %domid, error = %e, "domain probe failed");
                }
            }
        }
    }

    /// One full enumeration pass over the bus subtree.
    pub async fn probe_all(&self) -> ProbePass {
        let mut pass = ProbePass::default();
        let types = if self.config.device_types.is_empty() {
            match self.store.directory(&self.config.root).await {
                Ok(v) => v,
                // No bus root yet means an empty bus, not a failure.
                Err(StoreError::NotFound(_)) => Vec::new(),
                Err(e) => {
                    warn!(root = %self.config.root, error = %e, "listing bus root failed");
                    pass.errors += 1;
                    Vec::new()
                }
            }
        } else {
            self.config.device_types.clone()
        };
        for devicetype in types {
            self.probe_type(&devicetype, &mut pass).await;
        }
        pass
    }
}
