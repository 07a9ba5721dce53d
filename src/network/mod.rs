//! A network abstraction layer for embedded systems
//!
//! This module provides the byte-stream traits the hub transport is built on.
//! A platform supplies a [`Connect`] implementation (usually a TLS socket
//! factory) whose connections implement [`Connection`]; everything above this
//! layer is transport agnostic.
//!
//! Connections are expected to be non-blocking: [`Read::read`] returns `Ok(0)`
//! when no bytes are available yet, and any `Err` is treated as a broken link.

#![deny(unsafe_code)]

/// Common error types for network operations
pub mod error;

/// Application layer protocols running on top of a [`Connection`]
pub mod application;

/// Re-exports of common traits
pub mod prelude {
    pub use super::{Close, Configure, Connect, Connection, Read, Write};
}

/// Non-blocking read half of a connection.
pub trait Read {
    /// Associated error type
    type Error: core::fmt::Debug;
    /// Read available data from the connection, returning `Ok(0)` when none is pending
    fn read(&mut self, buf: &mut [u8]) -> Result<usize, Self::Error>;
}

/// Write half of a connection.
pub trait Write {
    /// Associated error type
    type Error: core::fmt::Debug;
    /// Write data to the connection
    fn write(&mut self, buf: &[u8]) -> Result<usize, Self::Error>;
    /// Flush the write buffer
    fn flush(&mut self) -> Result<(), Self::Error>;
}

/// Closing a connection releases it.
pub trait Close {
    /// Associated error type
    type Error: core::fmt::Debug;
    /// Close the connection
    fn close(self) -> Result<(), Self::Error>;
}

/// A synchronous, non-blocking connection
pub trait Connection: Read + Write + Close {}

/// A synchronous connector (client)
pub trait Connect {
    /// Associated connection type
    type Connection: Connection;
    /// Associated error type
    type Error: core::fmt::Debug;
    /// Open a connection to `remote`
    fn connect(&mut self, remote: &str) -> Result<Self::Connection, Self::Error>;
}

/// A typed option value handed through an option surface.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OptionValue<'a> {
    /// A boolean switch.
    Bool(bool),
    /// An integer setting.
    Int(i32),
    /// A string setting, such as a PEM certificate.
    Str(&'a str),
}

/// The option surface of a secure transport.
///
/// Options set here apply to every connection opened afterwards, which is
/// how client certificates, private keys and trusted roots reach the TLS layer.
pub trait Configure {
    /// Associated error type
    type Error: core::fmt::Debug;
    /// Apply a named option
    fn set_option(&mut self, name: &str, value: OptionValue<'_>) -> Result<(), Self::Error>;
}
