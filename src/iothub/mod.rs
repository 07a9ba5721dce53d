//! Device transport for a cloud IoT hub over MQTT.
//!
//! This module keeps one device connected to its hub and moves messages in
//! both directions on top of the [`mqtt`](crate::network::application::mqtt)
//! session engine:
//!
//! - **Device to cloud**: the application queues [`PendingMessage`]s in a
//!   [`SendQueue`]. Each is published at QoS 1 on
//!   `devices/{id}/messages/events/`, tracked until its PUBACK, resent when the
//!   acknowledgment is overdue, and finally resolved through its completion
//!   callback with a [`ConfirmationResult`].
//! - **Cloud to device**: after [`Transport::subscribe`], messages published
//!   on `devices/{id}/messages/devicebound/#` are decoded and handed to a
//!   [`MessageHandler`].
//!
//! # Cooperative model
//!
//! Nothing runs in the background. The owner calls [`Transport::do_work`]
//! repeatedly; each call reads the [`Clock`], advances the connection
//! lifecycle, and handles whatever the network has ready without blocking.
//! Timers only move forward while `do_work` is being called.
//!
//! # Identity
//!
//! A device authenticates with a symmetric key (SAS tokens are signed and
//! renewed automatically), a SAS token supplied by the application, or an
//! x509 client certificate configured on the network through
//! [`Transport::set_option`].

/// Client configuration.
pub mod config;
/// Connection lifecycle.
pub mod connection;
/// SAS tokens and x509.
pub mod credentials;
mod error;
/// Cloud-to-device dispatch.
pub mod inbound;
/// Messages and their queue.
pub mod message;
/// Device-to-cloud delivery.
pub mod outbound;
mod time;
/// Topic names and property encoding.
pub mod topic;
mod transport;

pub use config::{ClientConfig, DeviceConfig, RetryPolicy};
pub use connection::ConnectionState;
pub use error::{Error, IotHubResult};
pub use message::{
    ConfirmationCallback, ConfirmationResult, Message, MessageDisposition, MessageHandler,
    PendingMessage, Properties, SendQueue, SendStatus,
};
pub use time::Clock;
pub use transport::{
    DeviceHandle, DeviceTransport, MAX_EVENTS_PER_PUMP, OPTION_KEEP_ALIVE, OPTION_LOG_TRACE, OPTION_TRUSTED_CERT,
    OPTION_X509_CERT, OPTION_X509_PRIVATE_KEY, Transport,
};
