//! Core discovery over SOOD multicast.
//!
//! [`DiscoveryClient`] sends one query and collects the cores that answer;
//! [`select_core`] picks the one to connect to.

mod client;
pub mod sood;
mod types;

pub use client::{Accepted, DiscoveryClient, ReplyCollector};
pub use types::{select_core, DiscoveryError, DiscoveryResult};
