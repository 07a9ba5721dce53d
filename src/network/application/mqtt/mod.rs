//! MQTT 3.1.1 protocol engine for embedded systems.
//!
//! This module provides the MQTT session used by the hub transport. It is
//! designed for `no_std` environments and for cooperative scheduling: nothing
//! here blocks, and time only advances when the caller passes a new tick.
//!
//! # Protocol Overview
//!
//! MQTT uses a publish-subscribe pattern where:
//! - **Publishers** send messages to topics
//! - **Subscribers** receive messages from topics they're interested in
//! - **Brokers** route messages between publishers and subscribers
//!
//! # Key Features
//!
//! - MQTT 3.1.1 framing for CONNECT, PUBLISH, SUBSCRIBE, UNSUBSCRIBE and their acknowledgements
//! - Quality of Service levels 0 and 1, with automatic PUBACK for incoming QoS 1
//! - Persistent sessions (`clean_session = false`)
//! - Keep-alive pings with a bounded response budget
//! - Fixed-size buffers for predictable memory usage
//!
//! # Usage
//!
//! [`Client::connect`] writes CONNECT and returns immediately; the broker's
//! answer and every later packet come back through [`Client::poll`] as an
//! [`Event`].

/// Packet encoding and decoding.
pub mod packet;

/// The session engine.
pub mod client;

pub use client::{Client, Event};
pub use packet::{ConnectReturnCode, Options, PublishPacket, QoS};
