//! # Purchase Queue Redis
//!
//! `Redis` implementations of the fast-store traits:
//!
//! - [`RedisAdmissionStore`]: wait line and slot set, mutated only by Lua
//!   scripts so capacity checks and grants are one atomic step
//! - [`RedisConfigRepository`]: per-event queue configuration
//!
//! Both share a [`redis::aio::ConnectionManager`], which reconnects on its
//! own; clone it into [`RedisAdmissionStore::from_manager`] and
//! [`RedisConfigRepository::from_manager`] to use one connection.
//!
//! Requires `Redis` 6 or later.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

mod admission;
mod config;
mod error;
pub mod keys;
pub mod scripts;

pub use admission::RedisAdmissionStore;
pub use config::RedisConfigRepository;

use purchase_queue_core::Result;
use redis::aio::ConnectionManager;

/// Open a connection manager to share between the stores.
///
/// # Errors
///
/// Returns [`purchase_queue_core::QueueError::StoreUnavailable`] if `Redis`
/// cannot be reached.
pub async fn connect(redis_url: &str) -> Result<ConnectionManager> {
    let client =
        redis::Client::open(redis_url).map_err(error::store_error("create Redis client"))?;
    ConnectionManager::new(client)
        .await
        .map_err(error::store_error("create Redis connection manager"))
}
