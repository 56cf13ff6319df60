//! Environmental telemetry node: sampling, batch averaging that survives deep
//! sleep, and publishing to a cloud channel and a local admin broker.
//!
//! Everything here is hardware independent. The ESP32 firmware binary wires
//! the traits in [`sensors`], [`transport`] and [`power`] to real peripherals.
#![cfg_attr(not(test), no_std)]

pub mod aggregator;
pub mod config;
pub mod connectivity;
pub mod constants;
pub mod controller;
pub mod power;
pub mod publisher;
pub mod record;
pub mod remote_config;
pub mod sensors;
pub mod transport;

#[cfg(test)]
mod testing;
