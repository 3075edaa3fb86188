#![doc = include_str!("../README.md")]
//! ## Feature flags
#![doc = document_features::document_features!()]
//!

// Public modules
mod common;
mod error;

#[cfg(feature = "async")]
pub mod async_dht;
mod dht;
pub mod rpc;

pub use crate::common::{
    messages, Id, KBucket, Node, RoutingTable, ID_SIZE, MAX_BUCKET_SIZE_K, NUM_BUCKETS,
    STALE_TIME,
};
pub use dht::{Dht, DhtBuilder, FindValue, Testnet};
pub use error::{Error, Result};
