//! Device-to-cloud delivery.
//!
//! Messages move from the application's [`SendQueue`] onto the wire and into
//! an awaiting-acknowledgment list, where they stay until the matching PUBACK
//! arrives or the retry budget runs out. Every message leaves the pipeline
//! through exactly one call to [`PendingMessage::complete`].

use super::config::RetryPolicy;
use super::connection::ConnectionManager;
use super::message::{ConfirmationResult, PendingMessage, SendQueue};
use super::time::elapsed_ms;
use super::topic::{Topic, publish_topic};
use crate::network::Connect;
use heapless::Vec;

/// Messages that may await acknowledgment at once.
pub const MAX_IN_FLIGHT: usize = 8;

/// A published message waiting for its PUBACK.
#[derive(Debug)]
struct InFlightMessage<C> {
    pending: PendingMessage<C>,
    packet_id: u16,
    topic: Topic,
    published_at_ms: u64,
    retry_count: u8,
}

/// The awaiting-acknowledgment side of delivery.
#[derive(Debug)]
pub struct OutboundPipeline<C> {
    in_flight: Vec<InFlightMessage<C>, MAX_IN_FLIGHT>,
    policy: RetryPolicy,
}

impl<C> OutboundPipeline<C> {
    /// An empty pipeline with the given retry policy.
    pub fn new(policy: RetryPolicy) -> Self {
        Self {
            in_flight: Vec::new(),
            policy,
        }
    }

    /// Number of messages awaiting acknowledgment.
    pub fn len(&self) -> usize {
        self.in_flight.len()
    }

    /// Whether nothing awaits acknowledgment.
    pub fn is_empty(&self) -> bool {
        self.in_flight.is_empty()
    }

    /// Whether `packet_id` belongs to a message awaiting acknowledgment.
    pub fn contains(&self, packet_id: u16) -> bool {
        self.in_flight.iter().any(|m| m.packet_id == packet_id)
    }

    /// Republish or fail messages whose acknowledgment is overdue.
    ///
    /// A message that has used up its retries is failed with
    /// [`ConfirmationResult::MessageTimeout`] whatever the connection state.
    /// Otherwise it is republished under a fresh packet id, but only while
    /// publishing is allowed.
    pub fn sweep<N: Connect>(&mut self, connection: &mut ConnectionManager<N>, now_ms: u64) {
        let resend_ms = self.policy.resend_interval_secs as u64 * 1000;
        let mut i = 0;
        while i < self.in_flight.len() {
            let entry = &self.in_flight[i];
            if elapsed_ms(entry.published_at_ms, now_ms) <= resend_ms {
                i += 1;
                continue;
            }

            if entry.retry_count >= self.policy.max_retries {
                let entry = self.in_flight.remove(i);
                log::warn!(
                    "message {} unacknowledged after {} retries",
                    entry.packet_id,
                    entry.retry_count
                );
                entry.pending.complete(ConfirmationResult::MessageTimeout);
                continue;
            }

            if !connection.can_publish() {
                i += 1;
                continue;
            }

            let in_flight = &self.in_flight;
            let packet_id =
                connection.allocate_packet_id(|id| in_flight.iter().any(|m| m.packet_id == id));
            let entry = &mut self.in_flight[i];
            let body = entry.pending.message().body();
            match connection.publish(&entry.topic, body, packet_id, now_ms) {
                Ok(()) => {
                    log::warn!(
                        "resending message {} as {} (retry {})",
                        entry.packet_id,
                        packet_id,
                        entry.retry_count + 1
                    );
                    entry.packet_id = packet_id;
                    entry.published_at_ms = now_ms;
                    entry.retry_count += 1;
                    i += 1;
                }
                Err(_) => {
                    let entry = self.in_flight.remove(i);
                    entry.pending.complete(ConfirmationResult::Error);
                }
            }
        }
    }

    /// Publish pending messages, oldest first, while the connection allows
    /// and there is room to track them.
    pub fn send_pending<N: Connect>(
        &mut self,
        queue: &mut SendQueue<C>,
        connection: &mut ConnectionManager<N>,
        now_ms: u64,
    ) {
        while connection.can_publish() && !self.in_flight.is_full() {
            let Some(pending) = queue.pop_front() else {
                break;
            };
            let topic = match publish_topic(connection.device_id(), pending.message()) {
                Ok(topic) => topic,
                Err(e) => {
                    log::error!("cannot build publish topic: {:?}", e);
                    pending.complete(ConfirmationResult::Error);
                    continue;
                }
            };

            let in_flight = &self.in_flight;
            let packet_id =
                connection.allocate_packet_id(|id| in_flight.iter().any(|m| m.packet_id == id));
            if let Err(e) = connection.publish(&topic, pending.message().body(), packet_id, now_ms) {
                log::error!("publish of message {} failed: {:?}", packet_id, e);
                pending.complete(ConfirmationResult::Error);
                continue;
            }

            log::debug!("published message {} to {}", packet_id, topic);
            let entry = InFlightMessage {
                pending,
                packet_id,
                topic,
                published_at_ms: now_ms,
                retry_count: 0,
            };
            if let Err(entry) = self.in_flight.push(entry) {
                // the loop condition guarantees room
                entry.pending.complete(ConfirmationResult::Error);
            }
        }
    }

    /// Resolve the message acknowledged by `packet_id`. Unknown ids are ignored.
    pub fn on_puback(&mut self, packet_id: u16) {
        match self.in_flight.iter().position(|m| m.packet_id == packet_id) {
            Some(i) => {
                let entry = self.in_flight.remove(i);
                log::debug!("message {} acknowledged", packet_id);
                entry.pending.complete(ConfirmationResult::Ok);
            }
            None => log::debug!("ignoring PUBACK for unknown id {}", packet_id),
        }
    }

    /// Resolve every message awaiting acknowledgment with `result`.
    pub fn fail_all(&mut self, result: ConfirmationResult) {
        while let Some(entry) = self.in_flight.pop() {
            entry.pending.complete(result);
        }
    }
}
