//! # Application Layer Network Protocols
//!
//! Application layer (OSI Layer 7) protocols that run on top of the core
//! network traits. Each protocol works with any type implementing
//! [`Connection`](crate::network::Connection) and uses fixed-size buffers.
//!
//! ## Available Protocols
//!
//! - **[`mqtt`]**: non-blocking MQTT 3.1.1 session engine used by the hub transport

/// MQTT client implementation.
///
/// Provides a non-blocking MQTT 3.1.1 session for lightweight publish-subscribe
/// messaging, driven by repeated calls to [`Client::poll`](mqtt::Client::poll).
pub mod mqtt;
