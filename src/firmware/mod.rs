//! ESP32 implementations of the node's hardware and network seams.

pub mod mqtt;
pub mod power;
pub mod sensors;
pub mod store;
pub mod wifi;
