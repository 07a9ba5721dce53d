//! Mock network, clock and recording helpers for transport testing

#![allow(dead_code)]

use iothub_mqtt::iothub::{
    ClientConfig, Clock, ConfirmationCallback, ConfirmationResult, Message, MessageDisposition, PendingMessage,
    SendQueue, Transport,
};
use iothub_mqtt::network::application::mqtt::packet::decode_header;
use iothub_mqtt::network::error::Error;
use iothub_mqtt::network::{Close, Configure, Connect, Connection, OptionValue, Read, Write};
use std::cell::{Cell, RefCell};
use std::collections::VecDeque;
use std::rc::Rc;

/// Wall-clock origin reported by [`ManualClock`]
pub const EPOCH: u64 = 1_700_000_000;

/// Everything the mock network has seen, shared with the test
#[derive(Debug, Default)]
pub struct NetState {
    /// Bytes the broker will deliver next
    pub inbound: VecDeque<u8>,
    /// Bytes the client wrote on the current connection
    pub outbound: Vec<u8>,
    /// Whether the current connection is open
    pub open: bool,
    /// Make every read and write on the current connection fail
    pub fail_io: bool,
    /// Refuse new connections
    pub refuse: bool,
    /// Reject every option
    pub reject_options: bool,
    /// Number of connection attempts
    pub connects: usize,
    /// Number of connections closed
    pub closes: usize,
    /// Hosts connected to, in order
    pub hosts: Vec<String>,
    /// Options forwarded to the network
    pub options: Vec<(String, String)>,
}

pub type Shared = Rc<RefCell<NetState>>;

/// Connection backed by [`NetState`]
#[derive(Debug)]
pub struct MockConnection {
    state: Shared,
}

impl Read for MockConnection {
    type Error = Error;

    fn read(&mut self, buf: &mut [u8]) -> Result<usize, Self::Error> {
        let mut state = self.state.borrow_mut();
        if state.fail_io {
            return Err(Error::ReadError);
        }
        let n = buf.len().min(state.inbound.len());
        for (slot, byte) in buf.iter_mut().zip(state.inbound.drain(..n)) {
            *slot = byte;
        }
        Ok(n)
    }
}

impl Write for MockConnection {
    type Error = Error;

    fn write(&mut self, buf: &[u8]) -> Result<usize, Self::Error> {
        let mut state = self.state.borrow_mut();
        if state.fail_io {
            return Err(Error::WriteError);
        }
        state.outbound.extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> Result<(), Self::Error> {
        Ok(())
    }
}

impl Close for MockConnection {
    type Error = Error;

    fn close(self) -> Result<(), Self::Error> {
        let mut state = self.state.borrow_mut();
        state.open = false;
        state.closes += 1;
        Ok(())
    }
}

impl Connection for MockConnection {}

/// Network factory handing out [`MockConnection`]s
#[derive(Debug, Clone, Default)]
pub struct MockNetwork {
    pub state: Shared,
}

impl Connect for MockNetwork {
    type Connection = MockConnection;
    type Error = Error;

    fn connect(&mut self, remote: &str) -> Result<Self::Connection, Self::Error> {
        let mut state = self.state.borrow_mut();
        state.connects += 1;
        state.hosts.push(remote.to_string());
        if state.refuse {
            return Err(Error::ConnectionRefused);
        }
        state.inbound.clear();
        state.outbound.clear();
        state.open = true;
        state.fail_io = false;
        Ok(MockConnection {
            state: self.state.clone(),
        })
    }
}

impl Configure for MockNetwork {
    type Error = Error;

    fn set_option(&mut self, name: &str, value: OptionValue<'_>) -> Result<(), Self::Error> {
        let mut state = self.state.borrow_mut();
        if state.reject_options {
            return Err(Error::ProtocolError);
        }
        state.options.push((name.to_string(), format!("{:?}", value)));
        Ok(())
    }
}

/// Clock advanced by hand
#[derive(Debug, Clone, Default)]
pub struct ManualClock {
    pub now: Rc<Cell<u64>>,
}

impl ManualClock {
    pub fn advance(&self, ms: u64) {
        self.now.set(self.now.get() + ms);
    }
}

impl Clock for ManualClock {
    fn tick_ms(&self) -> u64 {
        self.now.get()
    }

    fn unix_time(&self) -> Option<u64> {
        Some(EPOCH + self.now.get() / 1000)
    }
}

/// A packet the client wrote, decoded
#[derive(Debug, Clone, PartialEq)]
pub enum Sent {
    Connect {
        client_id: String,
        username: Option<String>,
        password: Option<String>,
        keep_alive: u16,
        clean_session: bool,
    },
    Publish {
        topic: String,
        packet_id: Option<u16>,
        payload: Vec<u8>,
    },
    Subscribe {
        packet_id: u16,
        filter: String,
    },
    Unsubscribe {
        packet_id: u16,
        filter: String,
    },
    PubAck(u16),
    PingReq,
    Disconnect,
    Other(u8),
}

fn read_u16(body: &mut &[u8]) -> u16 {
    let value = u16::from_be_bytes([body[0], body[1]]);
    *body = &body[2..];
    value
}

fn read_str(body: &mut &[u8]) -> String {
    let len = read_u16(body) as usize;
    let s = String::from_utf8(body[..len].to_vec()).unwrap();
    *body = &body[len..];
    s
}

/// Split a byte stream into the packets it holds
pub fn parse_packets(mut bytes: &[u8]) -> Vec<Sent> {
    let mut packets = Vec::new();
    while !bytes.is_empty() {
        let (len, header) = decode_header(bytes).unwrap().unwrap();
        let first = bytes[0];
        let mut body = &bytes[header..header + len];
        let packet = match first & 0xF0 {
            0x10 => {
                read_str(&mut body);
                let _level = body[0];
                let flags = body[1];
                body = &body[2..];
                let keep_alive = read_u16(&mut body);
                let client_id = read_str(&mut body);
                let username = (flags & 0x80 != 0).then(|| read_str(&mut body));
                let password = (flags & 0x40 != 0).then(|| read_str(&mut body));
                Sent::Connect {
                    client_id,
                    username,
                    password,
                    keep_alive,
                    clean_session: flags & 0x02 != 0,
                }
            }
            0x30 => {
                let topic = read_str(&mut body);
                let packet_id = ((first >> 1) & 0x03 != 0).then(|| read_u16(&mut body));
                Sent::Publish {
                    topic,
                    packet_id,
                    payload: body.to_vec(),
                }
            }
            0x40 => Sent::PubAck(read_u16(&mut body)),
            0x80 => {
                let packet_id = read_u16(&mut body);
                Sent::Subscribe {
                    packet_id,
                    filter: read_str(&mut body),
                }
            }
            0xA0 => {
                let packet_id = read_u16(&mut body);
                Sent::Unsubscribe {
                    packet_id,
                    filter: read_str(&mut body),
                }
            }
            0xC0 => Sent::PingReq,
            0xE0 => Sent::Disconnect,
            other => Sent::Other(other),
        };
        packets.push(packet);
        bytes = &bytes[header + len..];
    }
    packets
}

fn remaining_length(mut len: usize, out: &mut Vec<u8>) {
    loop {
        let mut byte = (len % 128) as u8;
        len /= 128;
        if len > 0 {
            byte |= 0x80;
        }
        out.push(byte);
        if len == 0 {
            break;
        }
    }
}

pub fn connack(code: u8) -> Vec<u8> {
    vec![0x20, 0x02, 0x00, code]
}

pub fn puback(packet_id: u16) -> Vec<u8> {
    let id = packet_id.to_be_bytes();
    vec![0x40, 0x02, id[0], id[1]]
}

pub fn suback(packet_id: u16, code: u8) -> Vec<u8> {
    let id = packet_id.to_be_bytes();
    vec![0x90, 0x03, id[0], id[1], code]
}

/// A QoS 1 PUBLISH from the broker
pub fn publish(topic: &str, payload: &[u8], packet_id: u16) -> Vec<u8> {
    let mut out = vec![0x32];
    remaining_length(2 + topic.len() + 2 + payload.len(), &mut out);
    out.extend_from_slice(&(topic.len() as u16).to_be_bytes());
    out.extend_from_slice(topic.as_bytes());
    out.extend_from_slice(&packet_id.to_be_bytes());
    out.extend_from_slice(payload);
    out
}

/// Completion log shared by every message of a test
pub type Results = Rc<RefCell<Vec<(u32, ConfirmationResult)>>>;

/// Callback context: message number and the log to record into
pub type Ctx = (u32, Results);

fn record(result: ConfirmationResult, (id, results): Ctx) {
    results.borrow_mut().push((id, result));
}

/// A message the handler received
#[derive(Debug, Clone, PartialEq)]
pub struct Received {
    pub body: Vec<u8>,
    pub properties: Vec<(String, String)>,
}

pub type Device = Transport<MockNetwork, ManualClock, Ctx>;

/// A transport wired to mocks
pub struct Harness {
    pub transport: Device,
    pub queue: SendQueue<Ctx>,
    pub net: Shared,
    pub clock: ManualClock,
    pub results: Results,
    pub received: Rc<RefCell<Vec<Received>>>,
    pub disposition: MessageDisposition,
}

pub const DEVICE_ID: &str = "dev1";
pub const DEVICE_KEY: &str = "c2VjcmV0LWtleQ==";
pub const HUB: &str = "hub";
pub const SUFFIX: &str = "azure-devices.net";

pub fn keyed_config() -> ClientConfig<'static> {
    ClientConfig::with_device_key(DEVICE_ID, DEVICE_KEY, HUB, SUFFIX)
}

impl Harness {
    pub fn new() -> Self {
        Self::with_config(&keyed_config())
    }

    pub fn with_config(config: &ClientConfig) -> Self {
        let network = MockNetwork::default();
        let net = network.state.clone();
        let clock = ManualClock::default();
        let transport = Transport::create(config, network, clock.clone()).unwrap();
        Self {
            transport,
            queue: SendQueue::new(),
            net,
            clock,
            results: Results::default(),
            received: Rc::default(),
            disposition: MessageDisposition::Accepted,
        }
    }

    pub fn pump(&mut self) {
        let received = self.received.clone();
        let disposition = self.disposition;
        let mut handler = move |message: &Message| {
            received.borrow_mut().push(Received {
                body: message.body().to_vec(),
                properties: message
                    .properties()
                    .iter()
                    .map(|(k, v)| (k.to_string(), v.to_string()))
                    .collect(),
            });
            disposition
        };
        self.transport.do_work(&mut self.queue, &mut handler);
    }

    pub fn advance(&mut self, ms: u64) {
        self.clock.advance(ms);
    }

    pub fn inject(&self, bytes: &[u8]) {
        self.net.borrow_mut().inbound.extend(bytes.iter().copied());
    }

    /// Packets written since the last call
    pub fn sent(&self) -> Vec<Sent> {
        let bytes = std::mem::take(&mut self.net.borrow_mut().outbound);
        parse_packets(&bytes)
    }

    pub fn connects(&self) -> usize {
        self.net.borrow().connects
    }

    pub fn send(&mut self, id: u32, message: Message) {
        let callback: ConfirmationCallback<Ctx> = record;
        let pending = PendingMessage::new(message, Some(callback), (id, self.results.clone()));
        assert!(self.queue.push_back(pending).is_ok());
    }

    pub fn results(&self) -> Vec<(u32, ConfirmationResult)> {
        self.results.borrow().clone()
    }

    /// Pump through CONNECT and an accepted CONNACK
    pub fn connect(&mut self) {
        self.pump();
        self.sent();
        self.inject(&connack(0));
        self.pump();
    }

    /// Connect, subscribe and grant the subscription
    pub fn connect_and_subscribe(&mut self) {
        self.connect();
        self.transport.subscribe().unwrap();
        self.pump();
        let id = self
            .sent()
            .into_iter()
            .find_map(|p| match p {
                Sent::Subscribe { packet_id, .. } => Some(packet_id),
                _ => None,
            })
            .unwrap();
        self.inject(&suback(id, 1));
        self.pump();
    }

    /// Publishes among the packets written since the last call
    pub fn published(&self) -> Vec<(String, u16)> {
        self.sent()
            .into_iter()
            .filter_map(|p| match p {
                Sent::Publish {
                    topic,
                    packet_id: Some(id),
                    ..
                } => Some((topic, id)),
                _ => None,
            })
            .collect()
    }

    pub fn destroy(self) -> Vec<(u32, ConfirmationResult)> {
        let Harness {
            transport,
            mut queue,
            results,
            ..
        } = self;
        transport.destroy(&mut queue);
        let resolved = results.borrow().clone();
        resolved
    }
}
