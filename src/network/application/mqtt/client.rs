//! A non-blocking MQTT 3.1.1 session engine.
//!
//! The [`Client`] owns one open [`Connection`] and never waits on it. Requests
//! (`publish`, `subscribe`, ...) are written immediately; everything the broker
//! sends back is surfaced by [`Client::poll`] as an [`Event`], one per call.
//! Time is passed in by the caller as a millisecond tick so the keep-alive
//! logic can be driven by any clock.
//!
//! # Keep-alive
//!
//! When nothing has been sent for a full keep-alive interval the engine sends a
//! PINGREQ. If the matching PINGRESP does not arrive within the ping budget
//! (a third of the keep-alive, at most 80 seconds) `poll` reports
//! [`Event::NoPingResponse`] and the caller is expected to drop the session.
//!
//! # Examples
//!
//! ```rust,no_run
//! use iothub_mqtt::network::application::mqtt::{Client, Event, Options, QoS};
//! # use iothub_mqtt::network::Connection;
//! # struct MockConnection;
//! # impl Connection for MockConnection {}
//! # impl iothub_mqtt::network::Read for MockConnection {
//! #     type Error = ();
//! #     fn read(&mut self, _buf: &mut [u8]) -> Result<usize, Self::Error> { Ok(0) }
//! # }
//! # impl iothub_mqtt::network::Write for MockConnection {
//! #     type Error = ();
//! #     fn write(&mut self, buf: &[u8]) -> Result<usize, Self::Error> { Ok(buf.len()) }
//! #     fn flush(&mut self) -> Result<(), Self::Error> { Ok(()) }
//! # }
//! # impl iothub_mqtt::network::Close for MockConnection {
//! #     type Error = ();
//! #     fn close(self) -> Result<(), Self::Error> { Ok(()) }
//! # }
//!
//! let options = Options {
//!     client_id: "sensor_device_01",
//!     username: None,
//!     password: None,
//!     keep_alive_seconds: 60,
//!     clean_session: true,
//! };
//! let mut client = Client::connect(MockConnection, &options, 0).unwrap();
//! client.subscribe(1, "commands/#", QoS::AtLeastOnce, 0).unwrap();
//! while let Some(event) = client.poll(10).unwrap() {
//!     if let Event::Publish(message) = event {
//!         let _ = message.topic;
//!     }
//! }
//! ```

use super::packet::{self, ConnectReturnCode, Options, Packet, PublishPacket, QoS};
use crate::network::error::Error;
use crate::network::{Close, Connection, Read};

/// Size of the receive buffer. A packet larger than this is discarded.
pub const RX_BUFFER_LEN: usize = 2560;

/// Upper bound of the ping budget in seconds.
const MAX_PING_BUDGET_SECS: u64 = 80;

/// Read chunk size.
const READ_CHUNK: usize = 256;

/// Something the broker told us.
#[derive(Debug, PartialEq, Eq, Clone)]
pub enum Event {
    /// The broker answered CONNECT.
    ConnAck {
        /// Whether a stored session was resumed.
        session_present: bool,
        /// Outcome of the connection attempt.
        code: ConnectReturnCode,
    },
    /// The broker answered SUBSCRIBE.
    SubAck {
        /// Identifier of the SUBSCRIBE.
        packet_id: u16,
        /// `false` when the broker refused the topic filter.
        granted: bool,
    },
    /// The broker answered UNSUBSCRIBE.
    UnsubAck {
        /// Identifier of the UNSUBSCRIBE.
        packet_id: u16,
    },
    /// The broker acknowledged a QoS 1 PUBLISH.
    PubAck {
        /// Identifier of the PUBLISH.
        packet_id: u16,
    },
    /// An application message arrived.
    Publish(PublishPacket),
    /// The broker answered PINGREQ.
    PingResp,
    /// A PINGREQ went unanswered for the whole ping budget.
    NoPingResponse,
}

/// An open MQTT session over a non-blocking connection.
pub struct Client<C: Connection> {
    connection: C,
    rx: heapless::Vec<u8, RX_BUFFER_LEN>,
    /// Bytes of an oversized packet still to be thrown away.
    discard: usize,
    keep_alive_ms: u64,
    ping_budget_ms: u64,
    last_sent_ms: u64,
    ping_sent_at: Option<u64>,
    trace: bool,
}

impl<C: Connection> Client<C> {
    /// Send CONNECT over `connection` and return the session.
    ///
    /// The CONNACK arrives later through [`Client::poll`]. If CONNECT cannot be
    /// written the connection is closed and the write error returned.
    pub fn connect(mut connection: C, options: &Options, now_ms: u64) -> Result<Self, Error> {
        if let Err(e) = packet::write_connect(&mut connection, options) {
            let _ = connection.close();
            return Err(e);
        }
        let keep_alive_secs = options.keep_alive_seconds as u64;
        let ping_budget_secs = (keep_alive_secs / 3).clamp(1, MAX_PING_BUDGET_SECS);
        Ok(Self {
            connection,
            rx: heapless::Vec::new(),
            discard: 0,
            keep_alive_ms: keep_alive_secs * 1000,
            ping_budget_ms: ping_budget_secs * 1000,
            last_sent_ms: now_ms,
            ping_sent_at: None,
            trace: false,
        })
    }

    /// Log every packet sent and received at `info` level.
    pub fn set_trace(&mut self, on: bool) {
        self.trace = on;
    }

    /// Publish a message. QoS 1 and 2 need a packet identifier.
    pub fn publish(
        &mut self,
        topic: &str,
        payload: &[u8],
        qos: QoS,
        packet_id: Option<u16>,
        now_ms: u64,
    ) -> Result<(), Error> {
        packet::write_publish(&mut self.connection, topic, payload, qos, packet_id)?;
        if self.trace {
            log::info!(
                "-> PUBLISH id={:?} qos={} topic={} len={}",
                packet_id,
                qos as u8,
                topic,
                payload.len()
            );
        }
        self.last_sent_ms = now_ms;
        Ok(())
    }

    /// Subscribe to a single topic filter.
    pub fn subscribe(
        &mut self,
        packet_id: u16,
        topic_filter: &str,
        qos: QoS,
        now_ms: u64,
    ) -> Result<(), Error> {
        packet::write_subscribe(&mut self.connection, packet_id, topic_filter, qos)?;
        if self.trace {
            log::info!("-> SUBSCRIBE id={} filter={}", packet_id, topic_filter);
        }
        self.last_sent_ms = now_ms;
        Ok(())
    }

    /// Withdraw a subscription.
    pub fn unsubscribe(&mut self, packet_id: u16, topic_filter: &str, now_ms: u64) -> Result<(), Error> {
        packet::write_unsubscribe(&mut self.connection, packet_id, topic_filter)?;
        if self.trace {
            log::info!("-> UNSUBSCRIBE id={} filter={}", packet_id, topic_filter);
        }
        self.last_sent_ms = now_ms;
        Ok(())
    }

    /// Send DISCONNECT and close the connection.
    pub fn disconnect(mut self) -> Result<(), Error> {
        let sent = packet::write_disconnect(&mut self.connection);
        if self.trace {
            log::info!("-> DISCONNECT");
        }
        let closed = self.connection.close().map_err(|_| Error::ConnectionClosed);
        sent.and(closed)
    }

    /// Close the connection without telling the broker.
    pub fn close(self) {
        if self.connection.close().is_err() {
            log::debug!("connection close reported an error");
        }
    }

    /// Drive the session.
    ///
    /// Returns the next broker event, or `Ok(None)` when nothing is pending.
    /// Any `Err` means the session is unusable and should be closed.
    pub fn poll(&mut self, now_ms: u64) -> Result<Option<Event>, Error> {
        loop {
            if self.discard == 0 {
                if let Some(event) = self.next_buffered(now_ms)? {
                    return Ok(Some(event));
                }
            }

            let mut chunk = [0u8; READ_CHUNK];
            let room = if self.discard > 0 {
                self.discard.min(READ_CHUNK)
            } else {
                (RX_BUFFER_LEN - self.rx.len()).min(READ_CHUNK)
            };
            let n = self
                .connection
                .read(&mut chunk[..room])
                .map_err(|_| Error::ReadError)?;
            if n == 0 {
                return self.keep_alive(now_ms);
            }
            if self.discard > 0 {
                self.discard -= n;
            } else {
                self.rx
                    .extend_from_slice(&chunk[..n])
                    .map_err(|_| Error::BufferOverflow)?;
            }
        }
    }

    /// Decode buffered packets until one produces an event or the buffer runs dry.
    fn next_buffered(&mut self, now_ms: u64) -> Result<Option<Event>, Error> {
        loop {
            if let Some((remaining_len, header_len)) = packet::decode_header(&self.rx)? {
                let total = header_len + remaining_len;
                if total > RX_BUFFER_LEN {
                    log::error!("dropping {} byte packet 0x{:02x}, too large", total, self.rx[0]);
                    self.discard = total - self.rx.len();
                    self.rx.clear();
                    return Ok(None);
                }
            }

            let Some((packet, used)) = packet::decode(&self.rx)? else {
                return Ok(None);
            };
            let rest = self.rx.len() - used;
            self.rx.copy_within(used.., 0);
            self.rx.truncate(rest);

            if let Some(event) = self.handle(packet, now_ms)? {
                return Ok(Some(event));
            }
        }
    }

    fn handle(&mut self, packet: Packet, now_ms: u64) -> Result<Option<Event>, Error> {
        if self.trace {
            log::info!("<- {:?}", PacketSummary(&packet));
        }
        let event = match packet {
            Packet::ConnAck {
                session_present,
                code,
            } => Event::ConnAck {
                session_present,
                code,
            },
            Packet::Publish(publish) => {
                if let (QoS::AtLeastOnce, Some(id)) = (publish.qos, publish.packet_id) {
                    self.puback(id, now_ms)?;
                }
                Event::Publish(publish)
            }
            Packet::MalformedPublish { packet_id } => {
                log::error!("dropping PUBLISH {:?}, topic or payload not representable", packet_id);
                if let Some(id) = packet_id {
                    self.puback(id, now_ms)?;
                }
                return Ok(None);
            }
            Packet::PubAck { packet_id } => Event::PubAck { packet_id },
            Packet::SubAck {
                packet_id,
                return_codes,
            } => Event::SubAck {
                packet_id,
                granted: !return_codes.is_empty()
                    && return_codes.iter().all(|c| *c != packet::SUBACK_FAILURE),
            },
            Packet::UnsubAck { packet_id } => Event::UnsubAck { packet_id },
            Packet::PingResp => {
                self.ping_sent_at = None;
                Event::PingResp
            }
            Packet::Other(header) => {
                log::debug!("ignoring packet 0x{:02x}", header);
                return Ok(None);
            }
        };
        Ok(Some(event))
    }

    fn puback(&mut self, packet_id: u16, now_ms: u64) -> Result<(), Error> {
        packet::write_puback(&mut self.connection, packet_id)?;
        if self.trace {
            log::info!("-> PUBACK id={}", packet_id);
        }
        self.last_sent_ms = now_ms;
        Ok(())
    }

    fn keep_alive(&mut self, now_ms: u64) -> Result<Option<Event>, Error> {
        if self.keep_alive_ms == 0 {
            return Ok(None);
        }
        match self.ping_sent_at {
            Some(sent) if now_ms.saturating_sub(sent) >= self.ping_budget_ms => {
                self.ping_sent_at = None;
                Ok(Some(Event::NoPingResponse))
            }
            Some(_) => Ok(None),
            None if now_ms.saturating_sub(self.last_sent_ms) >= self.keep_alive_ms => {
                packet::write_pingreq(&mut self.connection)?;
                if self.trace {
                    log::info!("-> PINGREQ");
                }
                self.last_sent_ms = now_ms;
                self.ping_sent_at = Some(now_ms);
                Ok(None)
            }
            None => Ok(None),
        }
    }
}

impl<C: Connection> core::fmt::Debug for Client<C> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Client")
            .field("buffered", &self.rx.len())
            .field("keep_alive_ms", &self.keep_alive_ms)
            .field("ping_sent_at", &self.ping_sent_at)
            .finish_non_exhaustive()
    }
}

/// Short log form of a packet, without payload bytes.
struct PacketSummary<'a>(&'a Packet);

impl core::fmt::Debug for PacketSummary<'_> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self.0 {
            Packet::ConnAck { code, .. } => write!(f, "CONNACK {}", code.reason()),
            Packet::Publish(p) => write!(
                f,
                "PUBLISH id={:?} topic={} len={}",
                p.packet_id,
                p.topic,
                p.payload.len()
            ),
            Packet::MalformedPublish { packet_id } => write!(f, "PUBLISH id={:?} (malformed)", packet_id),
            Packet::PubAck { packet_id } => write!(f, "PUBACK id={}", packet_id),
            Packet::SubAck { packet_id, .. } => write!(f, "SUBACK id={}", packet_id),
            Packet::UnsubAck { packet_id } => write!(f, "UNSUBACK id={}", packet_id),
            Packet::PingResp => write!(f, "PINGRESP"),
            Packet::Other(h) => write!(f, "0x{:02x}", h),
        }
    }
}
