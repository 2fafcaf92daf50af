//! Testing utilities for kafka-bridge
//!
//! Only compiled for unit tests. `helpers` builds a gateway over the
//! in-memory backend plus small request fixtures.

#![cfg(test)]

pub mod helpers;

pub use helpers::TestGateway;
