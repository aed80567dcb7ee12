//! CL8Y bridge relayer
//!
//! Watches every configured chain for deposits, routes each one to the
//! destination chain's writer, and votes on (then executes) the matching
//! proposal there.

pub mod api;
pub mod blockstore;
pub mod chain;
pub mod config;
pub mod connection;
pub mod db;
pub mod error;
pub mod evm;
pub mod hash;
pub mod listener;
pub mod manager;
pub mod metrics;
pub mod proposal;
pub mod retry;
pub mod router;
pub mod stop;
pub mod types;
pub mod writer;
