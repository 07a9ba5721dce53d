//! The public face of the hub transport.

use super::config::{ClientConfig, DeviceConfig, MAX_HOST_LEN};
use super::connection::{ConnectionManager, ConnectionState};
use super::error::{Error, IotHubResult};
use super::inbound;
use super::message::{ConfirmationResult, MessageHandler, SendQueue, SendStatus};
use super::outbound::OutboundPipeline;
use super::time::Clock;
use crate::network::application::mqtt::Event;
use crate::network::{Configure, Connect, OptionValue};
use heapless::String;

/// Session events handled per pump at most, so one pump cannot run forever.
pub const MAX_EVENTS_PER_PUMP: usize = 32;

/// Option toggling packet tracing. Takes a [`OptionValue::Bool`].
pub const OPTION_LOG_TRACE: &str = "logtrace";
/// Option setting the keep-alive in seconds. Takes a [`OptionValue::Int`].
pub const OPTION_KEEP_ALIVE: &str = "keepalive";
/// Option carrying the client certificate (x509 identity only).
pub const OPTION_X509_CERT: &str = "x509certificate";
/// Option carrying the client private key (x509 identity only).
pub const OPTION_X509_PRIVATE_KEY: &str = "x509privatekey";
/// Option carrying the trusted root certificates.
pub const OPTION_TRUSTED_CERT: &str = "TrustedCerts";

/// The operations a device transport binding offers to the client library
/// above it.
///
/// Bindings are chosen at compile time, so the trait is generic rather than
/// object safe. [`Transport`] is the MQTT binding.
pub trait DeviceTransport<C>: Sized {
    /// Byte-stream factory the binding connects with.
    type Network;
    /// Time source of the binding.
    type Clock;

    /// Validate `config` and build the binding.
    fn create(config: &ClientConfig, network: Self::Network, clock: Self::Clock) -> IotHubResult<Self>;
    /// Resolve everything still held and release the binding.
    fn destroy(self, queue: &mut SendQueue<C>);
    /// Ask for cloud-to-device messages.
    fn subscribe(&mut self) -> IotHubResult<()>;
    /// Stop cloud-to-device messages.
    fn unsubscribe(&mut self);
    /// Run one pump.
    fn do_work<H: MessageHandler + ?Sized>(&mut self, queue: &mut SendQueue<C>, handler: &mut H);
    /// Whether messages are still pending or in flight.
    fn get_send_status(&self, queue: &SendQueue<C>) -> SendStatus;
    /// Set a binding option.
    fn set_option(&mut self, name: &str, value: OptionValue<'_>) -> IotHubResult<()>;
}

/// Proof of a successful [`Transport::register`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeviceHandle(());

/// An MQTT transport to the hub for a single device.
///
/// All work happens in [`Transport::do_work`], which the owner calls
/// repeatedly; no call blocks. Messages to send are taken from the owner's
/// [`SendQueue`], and each one is resolved exactly once through its
/// completion callback, including when the transport is destroyed or dropped.
///
/// # Examples
///
/// ```rust,no_run
/// use iothub_mqtt::iothub::{
///     ClientConfig, Clock, ConfirmationCallback, ConfirmationResult, Message, MessageDisposition,
///     PendingMessage, SendQueue, Transport,
/// };
/// # use iothub_mqtt::network::OptionValue;
/// # use iothub_mqtt::network::prelude::*;
/// # struct Tls;
/// # impl Read for Tls { type Error = (); fn read(&mut self, _: &mut [u8]) -> Result<usize, ()> { Ok(0) } }
/// # impl Write for Tls {
/// #     type Error = ();
/// #     fn write(&mut self, b: &[u8]) -> Result<usize, ()> { Ok(b.len()) }
/// #     fn flush(&mut self) -> Result<(), ()> { Ok(()) }
/// # }
/// # impl Close for Tls { type Error = (); fn close(self) -> Result<(), ()> { Ok(()) } }
/// # impl Connection for Tls {}
/// # struct Net;
/// # impl Connect for Net {
/// #     type Connection = Tls;
/// #     type Error = ();
/// #     fn connect(&mut self, _: &str) -> Result<Tls, ()> { Ok(Tls) }
/// # }
/// # impl Configure for Net {
/// #     type Error = ();
/// #     fn set_option(&mut self, _: &str, _: OptionValue<'_>) -> Result<(), ()> { Ok(()) }
/// # }
/// # struct Ticks;
/// # impl Clock for Ticks {
/// #     fn tick_ms(&self) -> u64 { 0 }
/// #     fn unix_time(&self) -> Option<u64> { Some(1_700_000_000) }
/// # }
///
/// fn sent(result: ConfirmationResult, id: u32) {
///     let _ = (result, id);
/// }
///
/// let config = ClientConfig::with_device_key("dev1", "c2VjcmV0", "hub", "azure-devices.net");
/// let mut transport = Transport::create(&config, Net, Ticks).unwrap();
/// transport.subscribe().unwrap();
///
/// let mut queue: SendQueue<u32> = SendQueue::new();
/// let message = Message::new(b"{\"temp\":21.5}").unwrap();
/// let callback: ConfirmationCallback<u32> = sent;
/// let _ = queue.push_back(PendingMessage::new(message, Some(callback), 1));
///
/// let mut handler = |_: &Message| MessageDisposition::Accepted;
/// loop {
///     transport.do_work(&mut queue, &mut handler);
/// }
/// ```
pub struct Transport<N: Connect + Configure, K: Clock, C> {
    connection: ConnectionManager<N>,
    outbound: OutboundPipeline<C>,
    clock: K,
    registered: bool,
}

impl<N: Connect + Configure, K: Clock, C> Transport<N, K, C> {
    /// Validate `config` and build a transport. No connection is opened until
    /// the first [`Transport::do_work`].
    pub fn create(config: &ClientConfig, network: N, clock: K) -> IotHubResult<Self> {
        config.validate()?;
        let connection = ConnectionManager::new(config, network)?;
        log::info!(
            "transport created for {} on {}",
            config.device_id,
            connection.host()
        );
        Ok(Self {
            connection,
            outbound: OutboundPipeline::new(config.retry_policy),
            clock,
            registered: false,
        })
    }

    /// Resolve every pending and in-flight message with
    /// [`ConfirmationResult::BecauseDestroy`] and close the connection.
    pub fn destroy(mut self, queue: &mut SendQueue<C>) {
        while let Some(pending) = queue.pop_front() {
            pending.complete(ConfirmationResult::BecauseDestroy);
        }
        self.shutdown();
    }

    /// The pump. Call it repeatedly.
    ///
    /// One call advances the connection lifecycle, retries or fails overdue
    /// messages, publishes pending ones, then handles what the broker sent:
    /// PUBACKs resolve messages and PUBLISHes go to `handler`.
    pub fn do_work<H: MessageHandler + ?Sized>(&mut self, queue: &mut SendQueue<C>, handler: &mut H) {
        let now = self.clock.tick_ms();

        self.connection.step(&self.clock);
        self.outbound.sweep(&mut self.connection, now);
        self.outbound.send_pending(queue, &mut self.connection, now);

        for _ in 0..MAX_EVENTS_PER_PUMP {
            let Some(event) = self.connection.poll(now) else {
                break;
            };
            match event {
                Event::PubAck { packet_id } => self.outbound.on_puback(packet_id),
                Event::Publish(publish) => {
                    if self.connection.subscribe_requested() {
                        inbound::dispatch(&publish, handler);
                    } else {
                        log::debug!("dropping message on {}, not subscribed", publish.topic);
                    }
                }
                _ => {}
            }
        }
    }

    /// Ask for cloud-to-device messages.
    pub fn subscribe(&mut self) -> IotHubResult<()> {
        self.connection.request_subscribe();
        Ok(())
    }

    /// Stop cloud-to-device messages.
    pub fn unsubscribe(&mut self) {
        let now = self.clock.tick_ms();
        self.connection.cancel_subscribe(now);
    }

    /// Set a transport option.
    ///
    /// `logtrace`, `keepalive`, `x509certificate`, `x509privatekey` and
    /// `TrustedCerts` are understood here; any other name goes straight to the
    /// network's own option surface.
    pub fn set_option(&mut self, name: &str, value: OptionValue<'_>) -> IotHubResult<()> {
        match (name, value) {
            (OPTION_LOG_TRACE, OptionValue::Bool(on)) => {
                self.connection.set_trace(on);
                Ok(())
            }
            (OPTION_KEEP_ALIVE, OptionValue::Int(secs)) => {
                let secs = u16::try_from(secs).map_err(|_| {
                    log::error!("keep-alive {} out of range", secs);
                    Error::InvalidArgument
                })?;
                self.connection.set_keep_alive(secs);
                Ok(())
            }
            (OPTION_X509_CERT | OPTION_X509_PRIVATE_KEY, OptionValue::Str(_)) => {
                if !self.connection.credentials().is_x509() {
                    log::error!("{} needs an x509 identity", name);
                    return Err(Error::InvalidArgument);
                }
                self.forward_option(name, value)?;
                self.connection.force_reconnect();
                Ok(())
            }
            (OPTION_TRUSTED_CERT, OptionValue::Str(_)) => {
                self.forward_option(name, value)?;
                self.connection.force_reconnect();
                Ok(())
            }
            (
                OPTION_LOG_TRACE | OPTION_KEEP_ALIVE | OPTION_X509_CERT | OPTION_X509_PRIVATE_KEY
                | OPTION_TRUSTED_CERT,
                _,
            ) => {
                log::error!("wrong value type for option {}", name);
                Err(Error::InvalidArgument)
            }
            _ => self.forward_option(name, value),
        }
    }

    /// [`SendStatus::Idle`] when `queue` and the in-flight list are both empty.
    pub fn get_send_status(&self, queue: &SendQueue<C>) -> SendStatus {
        if queue.is_empty() && self.outbound.is_empty() {
            SendStatus::Idle
        } else {
            SendStatus::Busy
        }
    }

    /// Bind the device the transport was created for.
    ///
    /// Only that device can be registered, and only once.
    pub fn register(&mut self, device: &DeviceConfig) -> IotHubResult<DeviceHandle> {
        if device.device_key.is_some() && device.device_sas_token.is_some() {
            log::error!("register: device key and SAS token are mutually exclusive");
            return Err(Error::InvalidArgument);
        }
        if device.device_id != self.connection.device_id() {
            log::error!("register: device id {} does not match", device.device_id);
            return Err(Error::DeviceMismatch);
        }
        let credentials = self.connection.credentials();
        if credentials.is_key_derived()
            && !device.device_key.is_some_and(|key| credentials.matches_key(key))
        {
            log::error!("register: device key does not match");
            return Err(Error::DeviceMismatch);
        }
        if self.registered {
            log::error!("register: {} is already registered", device.device_id);
            return Err(Error::AlreadyRegistered);
        }
        self.registered = true;
        Ok(DeviceHandle(()))
    }

    /// Release the registration made by [`Transport::register`].
    pub fn unregister(&mut self, _device: DeviceHandle) {
        self.registered = false;
    }

    /// The host the transport connects to.
    pub fn get_hostname(&self) -> IotHubResult<String<MAX_HOST_LEN>> {
        String::try_from(self.connection.host()).map_err(|_| Error::CapacityExceeded)
    }

    /// Current connection state.
    pub fn state(&self) -> ConnectionState {
        self.connection.state()
    }

    /// Consecutive connection failures.
    pub fn failure_count(&self) -> u8 {
        self.connection.failure_count()
    }

    /// Current reconnect backoff in milliseconds.
    pub fn backoff_ms(&self) -> u64 {
        self.connection.backoff_ms()
    }

    /// Number of messages awaiting acknowledgment.
    pub fn in_flight_count(&self) -> usize {
        self.outbound.len()
    }

    fn forward_option(&mut self, name: &str, value: OptionValue<'_>) -> IotHubResult<()> {
        self.connection
            .network_mut()
            .set_option(name, value)
            .map_err(|e| {
                log::error!("network rejected option {}: {:?}", name, e);
                Error::InvalidArgument
            })
    }

    fn shutdown(&mut self) {
        self.outbound.fail_all(ConfirmationResult::BecauseDestroy);
        self.connection.disconnect();
    }
}

impl<N: Connect + Configure, K: Clock, C> DeviceTransport<C> for Transport<N, K, C> {
    type Network = N;
    type Clock = K;

    fn create(config: &ClientConfig, network: N, clock: K) -> IotHubResult<Self> {
        Transport::create(config, network, clock)
    }

    fn destroy(self, queue: &mut SendQueue<C>) {
        Transport::destroy(self, queue)
    }

    fn subscribe(&mut self) -> IotHubResult<()> {
        Transport::subscribe(self)
    }

    fn unsubscribe(&mut self) {
        Transport::unsubscribe(self)
    }

    fn do_work<H: MessageHandler + ?Sized>(&mut self, queue: &mut SendQueue<C>, handler: &mut H) {
        Transport::do_work(self, queue, handler)
    }

    fn get_send_status(&self, queue: &SendQueue<C>) -> SendStatus {
        Transport::get_send_status(self, queue)
    }

    fn set_option(&mut self, name: &str, value: OptionValue<'_>) -> IotHubResult<()> {
        Transport::set_option(self, name, value)
    }
}

impl<N: Connect + Configure, K: Clock, C> core::fmt::Debug for Transport<N, K, C> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Transport")
            .field("connection", &self.connection)
            .field("in_flight", &self.outbound.len())
            .field("registered", &self.registered)
            .finish_non_exhaustive()
    }
}

impl<N: Connect + Configure, K: Clock, C> Drop for Transport<N, K, C> {
    fn drop(&mut self) {
        self.shutdown();
    }
}
