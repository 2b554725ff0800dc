//! Test support infrastructure.
//!
//! Only compiled for unit tests. Fakes stand in for the network, the Wasm
//! runtime, and the compute module so the loader, phase controller, host,
//! and client can be driven deterministically.

#![cfg(test)]

mod fakes;

pub use fakes::{FakeFetcher, FakeRuntime};
