//! Frontend cross-reference resolution.
//!
//! A backend node carries `frontend-id` (the frontend's domain id, decimal
//! text) and `frontend` (the absolute path of the frontend node). Both are
//! read as one snapshot, then validated in a fixed order: missing field,
//! empty reference, dangling reference.

use crate::error::{ProbeError, Result};
use xenbus_store::Store;

/// A resolved frontend reference.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FrontendInfo {
    pub domid: u32,
    pub path: String,
}

/// Resolve the frontend half of a backend node.
///
/// The failure checks run in sequence and short-circuit: either key absent
/// yields `MissingField`, an empty `frontend` yields `EmptyReference`, and
/// a `frontend` path missing from the store yields `DanglingReference`.
pub async fn resolve_frontend(store: &dyn Store, nodename: &str) -> Result<FrontendInfo> {
    let mut values = store
        .gather(nodename, &["frontend-id", "frontend"])
        .await?
        .into_iter();
    let frontend_id = values.next().flatten().ok_or(ProbeError::MissingField {
        nodename: nodename.to_string(),
        key: "frontend-id",
    })?;
    let frontend = values.next().flatten().ok_or(ProbeError::MissingField {
        nodename: nodename.to_string(),
        key: "frontend",
    })?;

    let domid = parse_field(nodename, "frontend-id", &frontend_id)?
        .trim()
        .parse()
        .map_err(|_| ProbeError::InvalidField {
            nodename: nodename.to_string(),
            key: "frontend-id",
            value: String::from_utf8_lossy(&frontend_id).into_owned(),
        })?;
    let path = parse_field(nodename, "frontend", &frontend)?.to_string();

    if path.is_empty() {
        return Err(ProbeError::EmptyReference {
            nodename: nodename.to_string(),
        });
    }
    if !store.exists(&path).await {
        return Err(ProbeError::DanglingReference {
            nodename: nodename.to_string(),
            frontend: path,
        });
    }

    Ok(FrontendInfo { domid, path })
}

fn parse_field<'a>(nodename: &str, key: &'static str, value: &'a [u8]) -> Result<&'a str> {
    std::str::from_utf8(value).map_err(|_| ProbeError::InvalidField {
        nodename: nodename.to_string(),
        key,
        value: String::from_utf8_lossy(value).into_owned(),
    })
}
