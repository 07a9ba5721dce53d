//! Connection lifecycle: connect, subscribe, recover.
//!
//! [`ConnectionManager`] owns the network factory and the MQTT session and is
//! the only code that changes [`ConnectionState`]. It is advanced by
//! [`ConnectionManager::step`] once per pump and fed session events through
//! [`ConnectionManager::poll`].
//!
//! ```text
//! Disconnected -> TokenPending -> Connecting --CONNACK--> Connected
//!      ^                              |                     | subscribe requested
//!      |                              | rejected            v
//!      +------ Error <----------------+              Subscribing --SUBACK--> Subscribed
//!              ^  I/O error, missed ping, connect timeout (from any state)
//! ```
//!
//! `Error` never survives a call: the session is torn down on the spot, the
//! failure counter goes up, and the next attempt waits out a backoff of
//! `min(2 s * 2^(failures - 1), 30 s)` measured from the start of the failed
//! attempt. An unanswered SUBSCRIBE is sent again after [`SUBACK_TIMEOUT_MS`].

use super::config::{ClientConfig, MAX_DEVICE_ID_LEN, MAX_HOST_LEN};
use super::credentials::CredentialProvider;
use super::error::{Error, IotHubResult};
use super::time::{Clock, elapsed_ms};
use super::topic::{Topic, devicebound_filter};
use crate::network::Connect;
use crate::network::application::mqtt::{Client, Event, Options, QoS};
use crate::network::error::Error as NetworkError;
use core::fmt::Write as _;
use heapless::String;

/// Keep-alive used until the application sets one, in seconds.
pub const DEFAULT_KEEP_ALIVE_SECS: u16 = 240;
/// Consecutive failures after which the counter stops growing.
pub const MAX_FAILURE_COUNT: u8 = 5;
/// Backoff after the first failure, in milliseconds.
const BASE_BACKOFF_MS: u64 = 2_000;
/// Longest backoff, in milliseconds.
pub const MAX_BACKOFF_MS: u64 = 30_000;
/// Time allowed between CONNECT and CONNACK, in milliseconds.
pub const CONNECT_TIMEOUT_MS: u64 = 30_000;
/// Time allowed between SUBSCRIBE and SUBACK, in milliseconds.
pub const SUBACK_TIMEOUT_MS: u64 = 30_000;

const CLIENT_TYPE: &str = "iothubclient";

/// Username capacity: host, device id and the client type tag.
const USERNAME_LEN: usize = MAX_HOST_LEN + MAX_DEVICE_ID_LEN + 64;

/// Where the connection stands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// No session. The next step may start one.
    Disconnected,
    /// Obtaining the password for CONNECT.
    TokenPending,
    /// CONNECT sent, waiting for CONNACK.
    Connecting,
    /// Session accepted. Publishing is allowed.
    Connected,
    /// SUBSCRIBE sent, waiting for SUBACK.
    Subscribing,
    /// Cloud-to-device delivery is active.
    Subscribed,
    /// A failure is being torn down.
    Error,
}

#[cfg(feature = "defmt")]
impl defmt::Format for ConnectionState {
    fn format(&self, f: defmt::Formatter) {
        match self {
            ConnectionState::Disconnected => defmt::write!(f, "Disconnected"),
            ConnectionState::TokenPending => defmt::write!(f, "TokenPending"),
            ConnectionState::Connecting => defmt::write!(f, "Connecting"),
            ConnectionState::Connected => defmt::write!(f, "Connected"),
            ConnectionState::Subscribing => defmt::write!(f, "Subscribing"),
            ConnectionState::Subscribed => defmt::write!(f, "Subscribed"),
            ConnectionState::Error => defmt::write!(f, "Error"),
        }
    }
}

/// Drives one device's MQTT session through its lifecycle.
pub struct ConnectionManager<N: Connect> {
    network: N,
    session: Option<Client<N::Connection>>,
    state: ConnectionState,
    credentials: CredentialProvider,
    host: String<MAX_HOST_LEN>,
    device_id: String<MAX_DEVICE_ID_LEN>,
    username: String<USERNAME_LEN>,
    devicebound: Topic,
    keep_alive_secs: u16,
    trace: bool,
    subscribe_requested: bool,
    subscribe_rejected: bool,
    subscribe_packet_id: Option<u16>,
    failure_count: u8,
    last_attempt_ms: u64,
    connect_started_ms: u64,
    subscribe_sent_ms: u64,
    connected_at_ms: u64,
    packet_id: u16,
}

impl<N: Connect> core::fmt::Debug for ConnectionManager<N> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("ConnectionManager")
            .field("state", &self.state)
            .field("host", &self.host)
            .field("failure_count", &self.failure_count)
            .field("subscribe_requested", &self.subscribe_requested)
            .finish_non_exhaustive()
    }
}

impl<N: Connect> ConnectionManager<N> {
    /// Create a manager for a validated configuration. Nothing is opened yet.
    pub fn new(config: &ClientConfig, network: N) -> IotHubResult<Self> {
        let mut username = String::new();
        write!(
            username,
            "{}/{}/DeviceClientType={}%2F{}",
            config.hub_host()?,
            config.device_id,
            CLIENT_TYPE,
            env!("CARGO_PKG_VERSION")
        )
        .map_err(|_| Error::InvalidConfig)?;

        Ok(Self {
            network,
            session: None,
            state: ConnectionState::Disconnected,
            credentials: CredentialProvider::new(config)?,
            host: config.host()?,
            device_id: String::try_from(config.device_id).map_err(|_| Error::InvalidConfig)?,
            username,
            devicebound: devicebound_filter(config.device_id)?,
            keep_alive_secs: DEFAULT_KEEP_ALIVE_SECS,
            trace: false,
            subscribe_requested: false,
            subscribe_rejected: false,
            subscribe_packet_id: None,
            failure_count: 0,
            last_attempt_ms: 0,
            connect_started_ms: 0,
            subscribe_sent_ms: 0,
            connected_at_ms: 0,
            packet_id: 0,
        })
    }

    /// Current state.
    pub fn state(&self) -> ConnectionState {
        self.state
    }

    /// Consecutive connection failures, at most [`MAX_FAILURE_COUNT`].
    pub fn failure_count(&self) -> u8 {
        self.failure_count
    }

    /// How long the next attempt waits after a failure.
    pub fn backoff_ms(&self) -> u64 {
        match self.failure_count {
            0 => 0,
            n => (BASE_BACKOFF_MS << (n - 1)).min(MAX_BACKOFF_MS),
        }
    }

    /// The host connections are opened to.
    pub fn host(&self) -> &str {
        &self.host
    }

    /// The configured device id.
    pub fn device_id(&self) -> &str {
        &self.device_id
    }

    /// The credential provider.
    pub fn credentials(&self) -> &CredentialProvider {
        &self.credentials
    }

    /// The network factory, for option changes.
    pub fn network_mut(&mut self) -> &mut N {
        &mut self.network
    }

    /// Whether publishing is allowed right now.
    pub fn can_publish(&self) -> bool {
        matches!(
            self.state,
            ConnectionState::Connected | ConnectionState::Subscribing | ConnectionState::Subscribed
        )
    }

    /// Whether the application wants cloud-to-device messages.
    pub fn subscribe_requested(&self) -> bool {
        self.subscribe_requested
    }

    /// Keep-alive for the next CONNECT, in seconds.
    pub fn keep_alive_secs(&self) -> u16 {
        self.keep_alive_secs
    }

    /// Ask for cloud-to-device delivery. The SUBSCRIBE goes out on a later step.
    pub fn request_subscribe(&mut self) {
        self.subscribe_requested = true;
    }

    /// Withdraw cloud-to-device delivery.
    pub fn cancel_subscribe(&mut self, now_ms: u64) {
        self.subscribe_requested = false;
        self.subscribe_rejected = false;
        if !matches!(
            self.state,
            ConnectionState::Subscribing | ConnectionState::Subscribed
        ) {
            return;
        }
        self.subscribe_packet_id = None;
        self.state = ConnectionState::Connected;
        let id = self.allocate_packet_id(|_| false);
        let result = match self.session.as_mut() {
            Some(session) => session.unsubscribe(id, &self.devicebound, now_ms),
            None => Ok(()),
        };
        if let Err(e) = result {
            self.fail("UNSUBSCRIBE failed", e);
        }
    }

    /// Toggle packet tracing, now and for later sessions.
    pub fn set_trace(&mut self, on: bool) {
        self.trace = on;
        if let Some(session) = self.session.as_mut() {
            session.set_trace(on);
        }
    }

    /// Change the keep-alive. A live session is recycled so the value takes effect.
    pub fn set_keep_alive(&mut self, secs: u16) {
        if secs == self.keep_alive_secs {
            return;
        }
        self.keep_alive_secs = secs;
        if self.session.is_some() {
            log::info!("keep-alive changed to {} s, reconnecting", secs);
            self.disconnect();
        }
    }

    /// Recycle a live session, for example after a TLS option changed.
    pub fn force_reconnect(&mut self) {
        if self.session.is_some() {
            log::info!("transport options changed, reconnecting");
            self.disconnect();
        }
    }

    /// Advance the lifecycle by one step.
    pub fn step<K: Clock>(&mut self, clock: &K) {
        let now = clock.tick_ms();
        match self.state {
            ConnectionState::Disconnected => {
                if self.failure_count > 0 && elapsed_ms(self.last_attempt_ms, now) < self.backoff_ms() {
                    return;
                }
                self.last_attempt_ms = now;
                self.state = ConnectionState::TokenPending;
                self.open(clock, now);
            }
            ConnectionState::TokenPending => self.open(clock, now),
            ConnectionState::Connecting => {
                if elapsed_ms(self.connect_started_ms, now) > CONNECT_TIMEOUT_MS {
                    self.fail("no CONNACK", NetworkError::Timeout);
                }
            }
            ConnectionState::Connected => {
                if self.renew_if_due(now) {
                    return;
                }
                if self.subscribe_requested && !self.subscribe_rejected {
                    self.send_subscribe(now);
                }
            }
            ConnectionState::Subscribing => {
                if self.renew_if_due(now) {
                    return;
                }
                if elapsed_ms(self.subscribe_sent_ms, now) > SUBACK_TIMEOUT_MS {
                    log::warn!("no SUBACK for {}, subscribing again", self.devicebound);
                    self.subscribe_packet_id = None;
                    self.state = ConnectionState::Connected;
                    self.send_subscribe(now);
                }
            }
            ConnectionState::Subscribed => {
                self.renew_if_due(now);
            }
            ConnectionState::Error => self.teardown(),
        }
    }

    /// Publish at QoS 1 on the current session.
    ///
    /// A write failure tears the session down before the error is returned.
    pub fn publish(&mut self, topic: &str, payload: &[u8], packet_id: u16, now_ms: u64) -> IotHubResult<()> {
        if !self.can_publish() {
            return Err(Error::Network(NetworkError::NotOpen));
        }
        let Some(session) = self.session.as_mut() else {
            return Err(Error::Network(NetworkError::NotOpen));
        };
        if let Err(e) = session.publish(topic, payload, QoS::AtLeastOnce, Some(packet_id), now_ms) {
            self.fail("PUBLISH failed", e);
            return Err(Error::Network(e));
        }
        Ok(())
    }

    /// Next session event, after applying its effect on the lifecycle.
    ///
    /// Returns `None` when the session has nothing more this pump. PUBACK and
    /// PUBLISH events are left for the message pipelines.
    pub fn poll(&mut self, now_ms: u64) -> Option<Event> {
        let session = self.session.as_mut()?;
        let event = match session.poll(now_ms) {
            Ok(Some(event)) => event,
            Ok(None) => return None,
            Err(e) => {
                self.fail("session I/O error", e);
                return None;
            }
        };
        match &event {
            Event::ConnAck { code, .. } => {
                if self.state != ConnectionState::Connecting {
                    log::warn!("unexpected CONNACK in {:?}", self.state);
                } else if code.is_accepted() {
                    log::info!("connected to {}", self.host);
                    self.state = ConnectionState::Connected;
                    self.failure_count = 0;
                    self.connected_at_ms = now_ms;
                } else {
                    log::error!("connection rejected: {}", code.reason());
                    self.fail("CONNACK rejected", NetworkError::ConnectionRefused);
                }
            }
            Event::SubAck { packet_id, granted } => {
                if self.subscribe_packet_id == Some(*packet_id) {
                    self.subscribe_packet_id = None;
                    if *granted {
                        log::info!("subscribed to {}", self.devicebound);
                        self.state = ConnectionState::Subscribed;
                    } else {
                        log::error!("subscription to {} refused", self.devicebound);
                        self.subscribe_rejected = true;
                        self.state = ConnectionState::Connected;
                    }
                }
            }
            Event::NoPingResponse => {
                self.fail("no PINGRESP", NetworkError::Timeout);
            }
            Event::UnsubAck { .. } | Event::PingResp | Event::PubAck { .. } | Event::Publish(_) => {}
        }
        Some(event)
    }

    /// Next free packet id in `1..=65534`, skipping ids `in_use` reports.
    pub fn allocate_packet_id(&mut self, in_use: impl Fn(u16) -> bool) -> u16 {
        loop {
            self.packet_id = if self.packet_id >= u16::MAX - 1 {
                1
            } else {
                self.packet_id + 1
            };
            if !in_use(self.packet_id) && self.subscribe_packet_id != Some(self.packet_id) {
                return self.packet_id;
            }
        }
    }

    /// Close the session gracefully. Counts as neither success nor failure.
    pub fn disconnect(&mut self) {
        if let Some(session) = self.session.take() {
            if let Err(e) = session.disconnect() {
                log::debug!("DISCONNECT not delivered: {:?}", e);
            }
        }
        self.subscribe_packet_id = None;
        self.subscribe_rejected = false;
        self.state = ConnectionState::Disconnected;
    }

    fn open<K: Clock>(&mut self, clock: &K, now: u64) {
        let password = match self.credentials.password(clock) {
            Ok(password) => password,
            Err(e) => {
                log::error!("no credential for CONNECT: {:?}", e);
                self.state = ConnectionState::Error;
                self.teardown();
                return;
            }
        };

        let connection = match self.network.connect(&self.host) {
            Ok(connection) => connection,
            Err(e) => {
                log::error!("failure connecting to {}: {:?}", self.host, e);
                self.state = ConnectionState::Error;
                self.teardown();
                return;
            }
        };

        let options = Options {
            client_id: self.device_id.as_str(),
            username: Some(self.username.as_str()),
            password,
            keep_alive_seconds: self.keep_alive_secs,
            clean_session: false,
        };
        match Client::connect(connection, &options, now) {
            Ok(mut session) => {
                session.set_trace(self.trace);
                self.session = Some(session);
                self.connect_started_ms = now;
                self.state = ConnectionState::Connecting;
                log::debug!("CONNECT sent to {}", self.host);
            }
            Err(e) => {
                log::error!("CONNECT not sent: {:?}", e);
                self.state = ConnectionState::Error;
                self.teardown();
            }
        }
    }

    fn send_subscribe(&mut self, now: u64) {
        let id = self.allocate_packet_id(|_| false);
        let Some(session) = self.session.as_mut() else {
            return;
        };
        match session.subscribe(id, &self.devicebound, QoS::AtLeastOnce, now) {
            Ok(()) => {
                self.subscribe_packet_id = Some(id);
                self.subscribe_sent_ms = now;
                self.state = ConnectionState::Subscribing;
            }
            Err(e) => self.fail("SUBSCRIBE failed", e),
        }
    }

    fn renew_if_due(&mut self, now: u64) -> bool {
        if !self.credentials.renewal_due(self.connected_at_ms, now) {
            return false;
        }
        log::info!("SAS token nearing expiry, reconnecting");
        self.disconnect();
        true
    }

    fn fail(&mut self, what: &str, e: NetworkError) {
        log::error!("{}: {:?}", what, e);
        self.state = ConnectionState::Error;
        self.teardown();
    }

    fn teardown(&mut self) {
        if let Some(session) = self.session.take() {
            session.close();
        }
        self.subscribe_packet_id = None;
        self.subscribe_rejected = false;
        self.failure_count = (self.failure_count + 1).min(MAX_FAILURE_COUNT);
        self.state = ConnectionState::Disconnected;
        log::warn!(
            "disconnected, {} consecutive failures, backoff {} ms from the last attempt",
            self.failure_count,
            self.backoff_ms()
        );
    }
}
