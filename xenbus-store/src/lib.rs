//! Client library for the xenstore hierarchical key/value store.
//!
//! Provides the wire protocol codec, an async client speaking it over the
//! store's Unix socket, an in-memory store with the same watch semantics,
//! and the [`Store`] trait both implement.

pub mod client;
pub mod error;
pub mod memory;
mod notify;
pub mod store;
pub mod wire;

pub use client::XenStore;
pub use error::{Result, StoreError};
pub use memory::MemoryStore;
pub use store::{Store, WatchEvent};
