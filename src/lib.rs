//! # iothub-mqtt - device transport for cloud IoT hubs
//!
//! A `no_std` MQTT transport that keeps an IoT device connected to its cloud
//! hub, delivers telemetry with acknowledgment tracking and retries, and
//! dispatches cloud-to-device messages back to the application.
//!
//! ## Features
//!
//! ### Hub transport
//! - **Connection lifecycle**: connect, subscribe, exponential backoff, recovery
//! - **Credentials**: SAS tokens signed from a device key, supplied tokens, x509
//! - **Delivery**: QoS 1 publishing, PUBACK tracking, bounded resends
//! - **Topics**: message properties encoded in and decoded from topic names
//!
//! ### MQTT engine
//! - Non-blocking MQTT 3.1.1 session with keep-alive
//! - Fixed-size buffers, no allocator needed
//!
//! ## Usage
//!
//! Add this to your `Cargo.toml`:
//!
//! ```toml
//! [dependencies]
//! iothub-mqtt = "0.1.0"
//! ```
//!
//! The platform supplies a network factory implementing
//! [`Connect`](network::Connect) and [`Configure`](network::Configure)
//! (normally a TLS socket) and a [`Clock`](iothub::Clock). Everything else is
//! driven from [`Transport::do_work`](iothub::Transport::do_work); see
//! [`iothub::Transport`] for a full example.
//!
//! ## Platform Support
//!
//! This library is designed to work on:
//! - Embedded microcontrollers (ARM Cortex-M, RISC-V, etc.)
//! - Linux-based IoT devices (Raspberry Pi, etc.)
//! - Any platform supporting Rust's `core` library
//!
//! ## Optional Features
//!
//! - `std`: Enable standard library support (default: disabled)
//! - `defmt`: Enable defmt formatting of errors and states for embedded debugging
//!
//! Diagnostics go through the [`log`](https://docs.rs/log) facade; install any
//! logger to see them.

#![cfg_attr(not(feature = "std"), no_std)]
#![deny(missing_docs)]
#![warn(missing_debug_implementations)]

/// Network abstraction layer and the MQTT protocol engine.
///
/// Defines the byte-stream traits a platform implements and the MQTT 3.1.1
/// session that runs over them.
pub mod network;

/// The hub transport.
///
/// Connection management, credentials, message delivery in both directions,
/// and the [`Transport`](iothub::Transport) facade tying them together.
pub mod iothub;
