//! MQTT 3.1.1 control packet encoding and decoding.
//!
//! Outgoing packets are written straight to a [`Write`] in pieces (fixed
//! header, variable header, payload) so large publishes never need a packet
//! sized scratch buffer. Incoming packets are decoded from the session's
//! receive buffer with [`decode`].

use crate::network::Write;
use crate::network::error::Error;
use heapless::{String, Vec};

// MQTT Control Packet types - these are the fixed header packet type values
/// MQTT CONNECT packet type identifier.
pub const CONNECT: u8 = 0x10;
/// MQTT CONNACK packet type identifier.
pub const CONNACK: u8 = 0x20;
/// MQTT PUBLISH packet type identifier.
pub const PUBLISH: u8 = 0x30;
/// MQTT PUBACK packet type identifier.
pub const PUBACK: u8 = 0x40;
/// MQTT SUBSCRIBE packet type identifier (with the mandatory reserved flags).
pub const SUBSCRIBE: u8 = 0x82;
/// MQTT SUBACK packet type identifier.
pub const SUBACK: u8 = 0x90;
/// MQTT UNSUBSCRIBE packet type identifier (with the mandatory reserved flags).
pub const UNSUBSCRIBE: u8 = 0xA2;
/// MQTT UNSUBACK packet type identifier.
pub const UNSUBACK: u8 = 0xB0;
/// MQTT PINGREQ packet type identifier.
pub const PINGREQ: u8 = 0xC0;
/// MQTT PINGRESP packet type identifier.
pub const PINGRESP: u8 = 0xD0;
/// MQTT DISCONNECT packet type identifier.
pub const DISCONNECT: u8 = 0xE0;

/// MQTT protocol name as defined in the specification.
const PROTOCOL_NAME: &[u8] = b"MQTT";
/// MQTT protocol level for version 3.1.1.
const PROTOCOL_LEVEL: u8 = 4;

/// Largest value the remaining length field can carry.
const MAX_REMAINING_LEN: usize = 268_435_455;

/// Maximum topic length accepted in either direction.
pub const MAX_TOPIC_LEN: usize = 1024;
/// Maximum application payload carried by a PUBLISH.
pub const MAX_PAYLOAD_LEN: usize = 1024;
/// Maximum number of return codes kept from a SUBACK.
pub const MAX_SUBACK_CODES: usize = 4;

/// SUBACK return code signalling a rejected subscription.
pub const SUBACK_FAILURE: u8 = 0x80;

/// Quality of Service levels for MQTT messages.
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub enum QoS {
    /// At most once delivery.
    AtMostOnce = 0,
    /// At least once delivery.
    AtLeastOnce = 1,
    /// Exactly once delivery.
    ExactlyOnce = 2,
}

impl QoS {
    fn from_bits(bits: u8) -> Result<Self, Error> {
        match bits {
            0 => Ok(QoS::AtMostOnce),
            1 => Ok(QoS::AtLeastOnce),
            2 => Ok(QoS::ExactlyOnce),
            _ => Err(Error::ProtocolError),
        }
    }
}

/// CONNACK return codes.
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub enum ConnectReturnCode {
    /// Connection accepted.
    Accepted,
    /// The broker does not support MQTT 3.1.1.
    UnacceptableVersion,
    /// The client identifier is not allowed.
    IdentifierRejected,
    /// The broker is unavailable.
    ServerUnavailable,
    /// The username or password is malformed or wrong.
    BadUsernamePassword,
    /// The client is not authorized to connect.
    NotAuthorized,
    /// A return code outside the 3.1.1 range.
    Unknown(u8),
}

impl ConnectReturnCode {
    /// Map a raw CONNACK return code.
    pub fn from_u8(code: u8) -> Self {
        match code {
            0 => ConnectReturnCode::Accepted,
            1 => ConnectReturnCode::UnacceptableVersion,
            2 => ConnectReturnCode::IdentifierRejected,
            3 => ConnectReturnCode::ServerUnavailable,
            4 => ConnectReturnCode::BadUsernamePassword,
            5 => ConnectReturnCode::NotAuthorized,
            other => ConnectReturnCode::Unknown(other),
        }
    }

    /// Whether the broker accepted the connection.
    pub fn is_accepted(&self) -> bool {
        *self == ConnectReturnCode::Accepted
    }

    /// Human readable reason, used in logs.
    pub fn reason(&self) -> &'static str {
        match self {
            ConnectReturnCode::Accepted => "Accepted",
            ConnectReturnCode::UnacceptableVersion => "Unacceptable Version",
            ConnectReturnCode::IdentifierRejected => "Id Rejected",
            ConnectReturnCode::ServerUnavailable => "Server Unavailable",
            ConnectReturnCode::BadUsernamePassword => "Bad Username/Password",
            ConnectReturnCode::NotAuthorized => "Not Authorized",
            ConnectReturnCode::Unknown(_) => "Unknown",
        }
    }
}

/// Options carried by a CONNECT packet.
///
/// # Examples
///
/// ```rust
/// use iothub_mqtt::network::application::mqtt::Options;
///
/// let options = Options {
///     client_id: "my_iot_device",
///     username: None,
///     password: None,
///     keep_alive_seconds: 60,
///     clean_session: true,
/// };
/// assert_eq!(options.keep_alive_seconds, 60);
/// ```
#[derive(Debug, Clone)]
pub struct Options<'a> {
    /// The client identifier, must be unique within the broker.
    pub client_id: &'a str,
    /// Optional user name.
    pub username: Option<&'a str>,
    /// Optional password, such as a SAS token.
    pub password: Option<&'a str>,
    /// The keep-alive time interval in seconds, 0 disables keep-alive.
    pub keep_alive_seconds: u16,
    /// Whether to start a clean session.
    pub clean_session: bool,
}

/// An incoming MQTT publish message.
#[derive(Debug, PartialEq, Eq, Clone)]
pub struct PublishPacket {
    /// The topic on which the message was published.
    pub topic: String<MAX_TOPIC_LEN>,
    /// The message payload data.
    pub payload: Vec<u8, MAX_PAYLOAD_LEN>,
    /// Delivery guarantee the broker used.
    pub qos: QoS,
    /// Packet identifier, present for QoS 1 and 2.
    pub packet_id: Option<u16>,
}

/// A decoded broker-to-client packet.
#[derive(Debug, PartialEq, Eq, Clone)]
pub enum Packet {
    /// Connection acknowledgement.
    ConnAck {
        /// Whether the broker resumed a stored session.
        session_present: bool,
        /// Outcome of the connection attempt.
        code: ConnectReturnCode,
    },
    /// Application message.
    Publish(PublishPacket),
    /// A PUBLISH whose topic or payload could not be represented.
    MalformedPublish {
        /// Identifier to acknowledge so the broker stops redelivering it.
        packet_id: Option<u16>,
    },
    /// Publish acknowledgement.
    PubAck {
        /// Identifier of the acknowledged PUBLISH.
        packet_id: u16,
    },
    /// Subscribe acknowledgement.
    SubAck {
        /// Identifier of the acknowledged SUBSCRIBE.
        packet_id: u16,
        /// One granted QoS or [`SUBACK_FAILURE`] per requested filter.
        return_codes: Vec<u8, MAX_SUBACK_CODES>,
    },
    /// Unsubscribe acknowledgement.
    UnsubAck {
        /// Identifier of the acknowledged UNSUBSCRIBE.
        packet_id: u16,
    },
    /// Ping response.
    PingResp,
    /// Any other packet type, identified by its first header byte.
    Other(u8),
}

/// Write the CONNECT packet for `options`.
pub fn write_connect<W: Write>(w: &mut W, options: &Options) -> Result<(), Error> {
    // --- Variable Header ---
    let mut vh: Vec<u8, 10> = Vec::new();
    vh.extend_from_slice(&(PROTOCOL_NAME.len() as u16).to_be_bytes())
        .map_err(|_| Error::BufferOverflow)?;
    vh.extend_from_slice(PROTOCOL_NAME)
        .map_err(|_| Error::BufferOverflow)?;
    vh.push(PROTOCOL_LEVEL).map_err(|_| Error::BufferOverflow)?;

    let mut connect_flags = 0;
    if options.clean_session {
        connect_flags |= 0x02;
    }
    if options.username.is_some() {
        connect_flags |= 0x80;
    }
    if options.password.is_some() {
        connect_flags |= 0x40;
    }
    vh.push(connect_flags).map_err(|_| Error::BufferOverflow)?;
    vh.extend_from_slice(&options.keep_alive_seconds.to_be_bytes())
        .map_err(|_| Error::BufferOverflow)?;

    // --- Payload lengths ---
    let mut remaining_len = vh.len() + string_field_len(options.client_id)?;
    if let Some(username) = options.username {
        remaining_len += string_field_len(username)?;
    }
    if let Some(password) = options.password {
        remaining_len += string_field_len(password)?;
    }

    write_fixed_header(w, CONNECT, remaining_len)?;
    write_all(w, &vh)?;
    write_string_field(w, options.client_id)?;
    if let Some(username) = options.username {
        write_string_field(w, username)?;
    }
    if let Some(password) = options.password {
        write_string_field(w, password)?;
    }
    w.flush().map_err(|_| Error::WriteError)
}

/// Write a PUBLISH packet. `packet_id` is required for QoS 1 and 2.
pub fn write_publish<W: Write>(
    w: &mut W,
    topic: &str,
    payload: &[u8],
    qos: QoS,
    packet_id: Option<u16>,
) -> Result<(), Error> {
    let mut flags = PUBLISH;
    if qos != QoS::AtMostOnce {
        if packet_id.is_none() {
            return Err(Error::ProtocolError);
        }
        flags |= (qos as u8) << 1;
    }

    let id_len = if qos == QoS::AtMostOnce { 0 } else { 2 };
    let remaining_len = string_field_len(topic)? + id_len + payload.len();

    write_fixed_header(w, flags, remaining_len)?;
    write_string_field(w, topic)?;
    if let (true, Some(id)) = (qos != QoS::AtMostOnce, packet_id) {
        write_all(w, &id.to_be_bytes())?;
    }
    write_all(w, payload)?;
    w.flush().map_err(|_| Error::WriteError)
}

/// Write a SUBSCRIBE packet for a single topic filter.
pub fn write_subscribe<W: Write>(
    w: &mut W,
    packet_id: u16,
    topic_filter: &str,
    qos: QoS,
) -> Result<(), Error> {
    let remaining_len = 2 + string_field_len(topic_filter)? + 1;
    write_fixed_header(w, SUBSCRIBE, remaining_len)?;
    write_all(w, &packet_id.to_be_bytes())?;
    write_string_field(w, topic_filter)?;
    write_all(w, &[qos as u8])?;
    w.flush().map_err(|_| Error::WriteError)
}

/// Write an UNSUBSCRIBE packet for a single topic filter.
pub fn write_unsubscribe<W: Write>(
    w: &mut W,
    packet_id: u16,
    topic_filter: &str,
) -> Result<(), Error> {
    let remaining_len = 2 + string_field_len(topic_filter)?;
    write_fixed_header(w, UNSUBSCRIBE, remaining_len)?;
    write_all(w, &packet_id.to_be_bytes())?;
    write_string_field(w, topic_filter)?;
    w.flush().map_err(|_| Error::WriteError)
}

/// Write a PUBACK for an incoming QoS 1 PUBLISH.
pub fn write_puback<W: Write>(w: &mut W, packet_id: u16) -> Result<(), Error> {
    let id = packet_id.to_be_bytes();
    write_all(w, &[PUBACK, 2, id[0], id[1]])?;
    w.flush().map_err(|_| Error::WriteError)
}

/// Write a PINGREQ.
pub fn write_pingreq<W: Write>(w: &mut W) -> Result<(), Error> {
    write_all(w, &[PINGREQ, 0])?;
    w.flush().map_err(|_| Error::WriteError)
}

/// Write a DISCONNECT.
pub fn write_disconnect<W: Write>(w: &mut W) -> Result<(), Error> {
    write_all(w, &[DISCONNECT, 0])?;
    w.flush().map_err(|_| Error::WriteError)
}

/// Decode one packet from the front of `buf`.
///
/// Returns `Ok(None)` while the packet is still incomplete, otherwise the
/// packet together with the number of bytes it occupied.
pub fn decode(buf: &[u8]) -> Result<Option<(Packet, usize)>, Error> {
    let Some((remaining_len, header_len)) = decode_header(buf)? else {
        return Ok(None);
    };
    let total = header_len + remaining_len;
    if buf.len() < total {
        return Ok(None);
    }

    let header = buf[0];
    let body = &buf[header_len..total];
    let packet = match header & 0xF0 {
        CONNACK => {
            if body.len() != 2 {
                return Err(Error::ProtocolError);
            }
            Packet::ConnAck {
                session_present: body[0] & 0x01 != 0,
                code: ConnectReturnCode::from_u8(body[1]),
            }
        }
        PUBLISH => decode_publish(header, body)?,
        PUBACK => Packet::PubAck {
            packet_id: read_packet_id(body)?,
        },
        SUBACK => {
            let packet_id = read_packet_id(body)?;
            let mut return_codes = Vec::new();
            for code in body[2..].iter().take(MAX_SUBACK_CODES) {
                // take() bounds the loop to the vector capacity
                let _ = return_codes.push(*code);
            }
            Packet::SubAck {
                packet_id,
                return_codes,
            }
        }
        UNSUBACK => Packet::UnsubAck {
            packet_id: read_packet_id(body)?,
        },
        PINGRESP => Packet::PingResp,
        _ => Packet::Other(header),
    };
    Ok(Some((packet, total)))
}

/// Decode the fixed header, returning the remaining length and the header size.
pub fn decode_header(buf: &[u8]) -> Result<Option<(usize, usize)>, Error> {
    if buf.is_empty() {
        return Ok(None);
    }
    let mut remaining_len = 0usize;
    let mut multiplier = 1usize;
    for i in 0..4 {
        let Some(byte) = buf.get(1 + i) else {
            return Ok(None);
        };
        remaining_len += (*byte as usize & 127) * multiplier;
        if byte & 0x80 == 0 {
            return Ok(Some((remaining_len, 2 + i)));
        }
        multiplier *= 128;
    }
    Err(Error::ProtocolError)
}

fn decode_publish(header: u8, body: &[u8]) -> Result<Packet, Error> {
    let qos = QoS::from_bits((header >> 1) & 0x03)?;
    if body.len() < 2 {
        return Err(Error::ProtocolError);
    }
    let topic_len = u16::from_be_bytes([body[0], body[1]]) as usize;
    let id_len = if qos == QoS::AtMostOnce { 0 } else { 2 };
    if body.len() < 2 + topic_len + id_len {
        return Err(Error::ProtocolError);
    }
    let topic_bytes = &body[2..2 + topic_len];
    let packet_id = if id_len == 2 {
        Some(read_packet_id(&body[2 + topic_len..])?)
    } else {
        None
    };
    let payload_bytes = &body[2 + topic_len + id_len..];

    let topic = core::str::from_utf8(topic_bytes)
        .ok()
        .and_then(|t| String::try_from(t).ok());
    let payload = Vec::from_slice(payload_bytes).ok();
    match (topic, payload) {
        (Some(topic), Some(payload)) => Ok(Packet::Publish(PublishPacket {
            topic,
            payload,
            qos,
            packet_id,
        })),
        _ => Ok(Packet::MalformedPublish { packet_id }),
    }
}

fn read_packet_id(body: &[u8]) -> Result<u16, Error> {
    match body {
        [hi, lo, ..] => Ok(u16::from_be_bytes([*hi, *lo])),
        _ => Err(Error::ProtocolError),
    }
}

fn string_field_len(s: &str) -> Result<usize, Error> {
    if s.len() > u16::MAX as usize {
        return Err(Error::BufferOverflow);
    }
    Ok(2 + s.len())
}

fn write_string_field<W: Write>(w: &mut W, s: &str) -> Result<(), Error> {
    write_all(w, &(s.len() as u16).to_be_bytes())?;
    write_all(w, s.as_bytes())
}

fn write_fixed_header<W: Write>(w: &mut W, first: u8, remaining_len: usize) -> Result<(), Error> {
    let mut fixed_header: Vec<u8, 5> = Vec::new();
    fixed_header.push(first).map_err(|_| Error::BufferOverflow)?;
    encode_remaining_length(&mut fixed_header, remaining_len)?;
    write_all(w, &fixed_header)
}

/// Write the whole buffer, retrying short writes.
fn write_all<W: Write>(w: &mut W, mut buf: &[u8]) -> Result<(), Error> {
    while !buf.is_empty() {
        match w.write(buf) {
            Ok(0) | Err(_) => return Err(Error::WriteError),
            Ok(n) => buf = &buf[n..],
        }
    }
    Ok(())
}

/// Encode the remaining length field for an MQTT packet.
///
/// Each byte carries 7 bits of the length; the high bit marks a continuation.
/// This allows values from 0 to 268,435,455 in at most four bytes.
fn encode_remaining_length(buf: &mut Vec<u8, 5>, mut len: usize) -> Result<(), Error> {
    if len > MAX_REMAINING_LEN {
        return Err(Error::BufferOverflow);
    }
    loop {
        let mut byte = (len % 128) as u8;
        len /= 128;
        if len > 0 {
            byte |= 0x80;
        }
        buf.push(byte).map_err(|_| Error::BufferOverflow)?;
        if len == 0 {
            break;
        }
    }
    Ok(())
}
