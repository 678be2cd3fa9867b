//! agent-bridge-worker library
//!
//! Worker side of the host ↔ agent bridge:
//! - Line-delimited JSON protocol over stdin/stdout
//! - Correlated callbacks from the worker back to the host wallet
//! - Agent session dispatch and metadata reconciliation of engine results

pub mod channel;
pub mod config;
pub mod dispatch;
pub mod engine;
pub mod error;
pub mod lifecycle;
pub mod message;
pub mod network;
pub mod reconcile;
pub mod session;
pub mod transport;
pub mod wallet;
