//! Lumen - REST bridge for Zigbee devices
//!
//! Exposes a synchronous HTTP API over the asynchronous zigbee2mqtt bus:
//! - Correlation bridge: publish a command, suspend the caller until the
//!   gateway confirms, bounded by a timeout
//! - Live device-state cache and a bounded event history, fed from the
//!   inbound message stream
//! - Health tracking for the gateway connection

// Correlation core: cache, event log, health, pending-request bridge
pub mod bridge;

// Layered configuration (defaults <- TOML <- environment)
pub mod config;

// Topic codec and rumqttc transport
pub mod mqtt;

// axum REST surface
pub mod server;

// Shared value types and the error taxonomy
pub mod types;
