//! Bus identifier derivation from backend node paths.
//!
//! `backend/<type>/<fe-uuid>/<id>` becomes `<type>-<fe-domid>-<id>`.

use crate::error::{ProbeError, Result};
use std::fmt;

/// Capacity of a formatted bus id, including the terminating byte of the
/// reference layout. Formatting fails rather than truncates.
pub const BUS_ID_SIZE: usize = 20;

/// A bus identifier, guaranteed to fit the fixed capacity.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct BusId(String);

impl BusId {
    /// Format `<type>-<domid>-<devid>`, failing with `Overflow` when the
    /// result would not fit in [`BUS_ID_SIZE`].
    pub fn format(devicetype: &str, domid: u32, devid: &str) -> Result<Self> {
        let id = format!("{devicetype}-{domid}-{devid}");
        if id.len() >= BUS_ID_SIZE {
            return Err(ProbeError::Overflow(id));
        }
        Ok(BusId(id))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for BusId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Split a backend node path into its device type and instance id.
///
/// The segment after the first `/` is the type; it must be non-empty and
/// followed by another `/`. The substring after the last `/` is the
/// instance id.
pub fn parse_nodename(nodename: &str) -> Result<(&str, &str)> {
    let malformed = || ProbeError::MalformedPath(nodename.to_string());

    let rest = match nodename.split_once('/') {
        Some((_, rest)) => rest,
        None => return Err(malformed()),
    };
    let typelen = rest.find('/').ok_or_else(malformed)?;
    if typelen == 0 {
        return Err(malformed());
    }
    let devicetype = &rest[..typelen];

    let devid = &nodename[nodename.rfind('/').unwrap() + 1..];
    Ok((devicetype, devid))
}
