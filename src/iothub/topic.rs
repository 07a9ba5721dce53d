//! Topic names and the property encoding carried in them.
//!
//! The hub transports message properties inside the MQTT topic as a
//! URL-encoded `key=value&key=value` list:
//!
//! ```text
//! devices/{deviceId}/messages/events/{properties}        device to cloud
//! devices/{deviceId}/messages/devicebound/{properties}   cloud to device
//! ```
//!
//! System properties use keys starting with `$.`, which appear on the wire as
//! `%24.`. Outbound messages carry `$.mid` and `$.cid`; inbound system
//! properties are dropped before the application sees the message.

use super::error::{Error, IotHubResult};
use super::message::{MAX_KEY_LEN, MAX_VALUE_LEN, Message, Properties};
use crate::network::application::mqtt::packet::MAX_TOPIC_LEN;
use core::fmt::Write as _;
use heapless::{String, Vec};

/// A topic name or filter.
pub type Topic = String<MAX_TOPIC_LEN>;

const MESSAGE_ID_KEY: &str = "$.mid";
const CORRELATION_ID_KEY: &str = "$.cid";

/// Encoded key prefix shared by all system properties.
const SYSTEM_PROPERTY_PREFIX: &str = "%24.";
/// Reserved keys that are stripped along with system properties.
const RESERVED_KEYS: [&str; 2] = ["iothub-operation", "iothub-ack"];

/// `devices/{device_id}/messages/events/`
pub fn event_topic_prefix(device_id: &str) -> IotHubResult<Topic> {
    let mut topic = Topic::new();
    write!(topic, "devices/{}/messages/events/", device_id).map_err(|_| Error::CapacityExceeded)?;
    Ok(topic)
}

/// `devices/{device_id}/messages/devicebound/#`
pub fn devicebound_filter(device_id: &str) -> IotHubResult<Topic> {
    let mut topic = Topic::new();
    write!(topic, "devices/{}/messages/devicebound/#", device_id)
        .map_err(|_| Error::CapacityExceeded)?;
    Ok(topic)
}

/// Build the publish topic of `message`.
///
/// Application properties come first in insertion order, followed by the
/// message id and correlation id when set.
pub fn publish_topic(device_id: &str, message: &Message) -> IotHubResult<Topic> {
    let mut topic = event_topic_prefix(device_id)?;
    let system = [
        (MESSAGE_ID_KEY, message.message_id()),
        (CORRELATION_ID_KEY, message.correlation_id()),
    ];
    let system = system
        .iter()
        .filter_map(|(k, v)| v.map(|v| (*k, v)));

    for (i, (key, value)) in message.properties().iter().chain(system).enumerate() {
        if i > 0 {
            push_str(&mut topic, "&")?;
        }
        url_encode_into(&mut topic, key)?;
        push_str(&mut topic, "=")?;
        url_encode_into(&mut topic, value)?;
    }
    Ok(topic)
}

/// Parse the application properties out of a received topic.
///
/// Everything up to the last `/` is the routing prefix. Empty segments and
/// segments without `=` are skipped, system and reserved keys are dropped.
/// A malformed escape fails the whole topic.
///
/// Returns how many well-formed properties were left out because they did not
/// fit: too many of them, or a key or value longer than a [`Properties`] entry.
pub fn decode_properties(topic: &str, properties: &mut Properties) -> IotHubResult<usize> {
    let section = match topic.rfind('/') {
        Some(i) => &topic[i + 1..],
        None => topic,
    };
    let mut left_out = 0;
    for segment in section.split('&') {
        let Some((key, value)) = segment.split_once('=') else {
            continue;
        };
        if key.is_empty() || is_system_key(key) {
            continue;
        }
        let decoded = url_decode::<MAX_KEY_LEN>(key)
            .and_then(|key| Ok((key, url_decode::<MAX_VALUE_LEN>(value)?)))
            .and_then(|(key, value)| properties.insert(&key, &value));
        match decoded {
            Ok(()) => {}
            Err(Error::CapacityExceeded) => left_out += 1,
            Err(e) => return Err(e),
        }
    }
    Ok(left_out)
}

fn is_system_key(key: &str) -> bool {
    key.starts_with(SYSTEM_PROPERTY_PREFIX) || RESERVED_KEYS.iter().any(|r| key.starts_with(r))
}

/// Append `s` to `out`, escaping every byte outside `A-Z a-z 0-9 ! ( ) * - . _`.
pub fn url_encode_into<const N: usize>(out: &mut String<N>, s: &str) -> IotHubResult<()> {
    for byte in s.bytes() {
        if is_unreserved(byte) {
            out.push(byte as char).map_err(|_| Error::CapacityExceeded)?;
        } else {
            write!(out, "%{:02x}", byte).map_err(|_| Error::CapacityExceeded)?;
        }
    }
    Ok(())
}

fn is_unreserved(byte: u8) -> bool {
    byte.is_ascii_alphanumeric() || matches!(byte, b'!' | b'(' | b')' | b'*' | b'-' | b'.' | b'_')
}

/// Decode `%xx` escapes (either hex case).
pub fn url_decode<const N: usize>(s: &str) -> IotHubResult<String<N>> {
    let mut bytes: Vec<u8, N> = Vec::new();
    let mut input = s.bytes();
    while let Some(byte) = input.next() {
        let decoded = if byte == b'%' {
            let hi = input.next().and_then(hex_value);
            let lo = input.next().and_then(hex_value);
            match (hi, lo) {
                (Some(hi), Some(lo)) => hi << 4 | lo,
                _ => return Err(Error::InvalidArgument),
            }
        } else {
            byte
        };
        bytes.push(decoded).map_err(|_| Error::CapacityExceeded)?;
    }
    let text = core::str::from_utf8(&bytes).map_err(|_| Error::InvalidArgument)?;
    String::try_from(text).map_err(|_| Error::CapacityExceeded)
}

fn hex_value(c: u8) -> Option<u8> {
    match c {
        b'0'..=b'9' => Some(c - b'0'),
        b'a'..=b'f' => Some(c - b'a' + 10),
        b'A'..=b'F' => Some(c - b'A' + 10),
        _ => None,
    }
}

fn push_str<const N: usize>(out: &mut String<N>, s: &str) -> IotHubResult<()> {
    out.push_str(s).map_err(|_| Error::CapacityExceeded)
}
