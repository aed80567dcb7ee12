//! EVM chain adapter

pub mod connection;
pub mod contracts;

pub use connection::EvmConnection;
