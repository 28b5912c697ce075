//! Backend-bus prober: discovers backend devices in the store namespace,
//! matches them to their frontends and keeps the device set synchronized
//! as the store changes.

pub mod busid;
pub mod config;
pub mod device;
pub mod diag;
pub mod error;
pub mod frontend;
pub mod probe;
pub mod watch;

pub use busid::{BUS_ID_SIZE, BusId};
pub use config::BusConfig;
pub use device::{BackendDevice, BusRegistry, DeviceModel};
pub use error::{ProbeError, Result};
pub use watch::{BusDispatcher, Startup};
