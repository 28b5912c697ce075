//! Bus configuration.

/// Default store socket path.
pub const DEFAULT_STORE_SOCKET: &str = "/run/xenstored/socket";

/// Default bus root node.
pub const DEFAULT_ROOT: &str = "backend";

/// Configuration for one probed bus.
///
/// The reference design kept these as static bus-type fields; here they are
/// explicit so several bus instances can coexist.
#[derive(Debug, Clone)]
pub struct BusConfig {
    /// Root of the bus subtree, e.g. `backend`.
    pub root: String,
    /// Nesting depth below the root: `type/frontend/id`.
    pub levels: usize,
    /// Device types to probe; empty means every type under the root.
    pub device_types: Vec<String>,
}

impl Default for BusConfig {
    fn default() -> Self {
        BusConfig {
            root: DEFAULT_ROOT.to_string(),
            levels: 3,
            device_types: Vec::new(),
        }
    }
}

impl BusConfig {
    pub fn new(root: impl Into<String>) -> Self {
        BusConfig {
            root: root.into(),
            ..Default::default()
        }
    }

    /// The path of a device type directory: `root/type`.
    pub fn type_dir(&self, devicetype: &str) -> String {
        format!("{}/{}", self.root, devicetype)
    }

    /// The segments of `path` below the root, or `None` when the path lies
    /// outside the bus subtree.
    pub fn strip_root<'a>(&self, path: &'a str) -> Option<Vec<&'a str>> {
        if path == self.root {
            return Some(Vec::new());
        }
        let rest = path.strip_prefix(self.root.as_str())?.strip_prefix('/')?;
        Some(rest.split('/').filter(|s| !s.is_empty()).collect())
    }
}
