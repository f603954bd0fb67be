//! AutoAttend library: portable BLE presence agent.
//!
//! Turns a stream of BLE advertisements into `checkin`/`checkout` reports for
//! people carrying a badge that broadcasts a known signature, and keeps the
//! device firmware current over the air. All logic lives here with no platform
//! dependencies, testable on any host with `cargo test`. The ESP32 binary in
//! `firmware-std/` is a thin consumer that provides the radio, network, flash
//! and clock.
//!
//! Modules:
//! - `scanner`, `extract`, `hex`: advertisement parsing, signature matching
//!   and identifier derivation
//! - `presence`: enter/leave state machine
//! - `protocol`, `transport`, `delivery`: server API and reliable reporting
//! - `ota`: firmware update state machine
//! - `agent`: the scan loop tying it together
//!
//! `no_std`, no allocator; collections are `heapless`.

#![cfg_attr(not(test), no_std)]

pub mod agent;
pub mod config;
pub mod defaults;
pub mod delivery;
pub mod error;
pub mod extract;
pub mod hex;
pub mod ota;
pub mod presence;
pub mod protocol;
pub mod scanner;
pub mod transport;

#[cfg(test)]
mod testing;

pub use error::Error;
