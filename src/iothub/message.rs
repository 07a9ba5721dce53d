//! Messages, their properties, and the pending-message queue.

use super::error::{Error, IotHubResult};
use heapless::{Deque, String, Vec};

/// Largest message body.
pub const MAX_BODY_LEN: usize = 1024;
/// Properties a message can carry.
pub const MAX_PROPERTIES: usize = 8;
/// Longest property name.
pub const MAX_KEY_LEN: usize = 64;
/// Longest property value, also used for message and correlation ids.
pub const MAX_VALUE_LEN: usize = 128;
/// Capacity of a [`SendQueue`].
pub const SEND_QUEUE_LEN: usize = 16;

/// Application properties of a message, kept in insertion order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Properties {
    entries: Vec<(String<MAX_KEY_LEN>, String<MAX_VALUE_LEN>), MAX_PROPERTIES>,
}

impl Properties {
    /// An empty property set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set `key` to `value`. An existing key keeps its position.
    pub fn insert(&mut self, key: &str, value: &str) -> IotHubResult<()> {
        if key.is_empty() {
            return Err(Error::InvalidArgument);
        }
        let value: String<MAX_VALUE_LEN> =
            String::try_from(value).map_err(|_| Error::CapacityExceeded)?;
        if let Some(entry) = self.entries.iter_mut().find(|(k, _)| k == key) {
            entry.1 = value;
            return Ok(());
        }
        let key = String::try_from(key).map_err(|_| Error::CapacityExceeded)?;
        self.entries
            .push((key, value))
            .map_err(|_| Error::CapacityExceeded)
    }

    /// Value of `key`.
    pub fn get(&self, key: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    /// Properties in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// Number of properties.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether there are no properties.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// A device-to-cloud or cloud-to-device message.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Message {
    body: Vec<u8, MAX_BODY_LEN>,
    properties: Properties,
    message_id: Option<String<MAX_VALUE_LEN>>,
    correlation_id: Option<String<MAX_VALUE_LEN>>,
}

impl Message {
    /// A message carrying `body`.
    pub fn new(body: &[u8]) -> IotHubResult<Self> {
        Ok(Self {
            body: Vec::from_slice(body).map_err(|_| Error::CapacityExceeded)?,
            ..Self::default()
        })
    }

    /// The message body.
    pub fn body(&self) -> &[u8] {
        &self.body
    }

    /// Application properties.
    pub fn properties(&self) -> &Properties {
        &self.properties
    }

    /// Mutable application properties.
    pub fn properties_mut(&mut self) -> &mut Properties {
        &mut self.properties
    }

    /// The message id system property.
    pub fn message_id(&self) -> Option<&str> {
        self.message_id.as_deref()
    }

    /// Set the message id system property.
    pub fn set_message_id(&mut self, id: &str) -> IotHubResult<()> {
        self.message_id = Some(String::try_from(id).map_err(|_| Error::CapacityExceeded)?);
        Ok(())
    }

    /// The correlation id system property.
    pub fn correlation_id(&self) -> Option<&str> {
        self.correlation_id.as_deref()
    }

    /// Set the correlation id system property.
    pub fn set_correlation_id(&mut self, id: &str) -> IotHubResult<()> {
        self.correlation_id = Some(String::try_from(id).map_err(|_| Error::CapacityExceeded)?);
        Ok(())
    }
}

/// How a send ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfirmationResult {
    /// The hub acknowledged the message.
    Ok,
    /// The transport was destroyed first.
    BecauseDestroy,
    /// No acknowledgment after every retry.
    MessageTimeout,
    /// The message could not be published.
    Error,
}

/// Completion callback of a sent message.
pub type ConfirmationCallback<C> = fn(ConfirmationResult, C);

/// A message waiting to be sent, with its completion callback.
#[derive(Debug)]
pub struct PendingMessage<C> {
    message: Message,
    callback: Option<ConfirmationCallback<C>>,
    context: C,
}

impl<C> PendingMessage<C> {
    /// Wrap `message`. `callback` is invoked exactly once with `context`.
    pub fn new(message: Message, callback: Option<ConfirmationCallback<C>>, context: C) -> Self {
        Self {
            message,
            callback,
            context,
        }
    }

    /// The wrapped message.
    pub fn message(&self) -> &Message {
        &self.message
    }

    /// Resolve the message, consuming it.
    pub fn complete(self, result: ConfirmationResult) {
        if let Some(callback) = self.callback {
            callback(result, self.context);
        }
    }
}

/// Messages waiting to be sent, oldest first.
///
/// Owned by the application and lent to the transport on each pump.
pub type SendQueue<C> = Deque<PendingMessage<C>, SEND_QUEUE_LEN>;

/// Whether the transport still holds undelivered messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendStatus {
    /// Nothing pending or awaiting acknowledgment.
    Idle,
    /// At least one message is pending or awaiting acknowledgment.
    Busy,
}

/// What the application did with a cloud-to-device message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageDisposition {
    /// Processed.
    Accepted,
    /// Refused.
    Rejected,
    /// Not processed this time.
    Abandoned,
}

/// Receiver of cloud-to-device messages.
pub trait MessageHandler {
    /// Handle one message.
    fn on_message(&mut self, message: &Message) -> MessageDisposition;
}

impl<F> MessageHandler for F
where
    F: FnMut(&Message) -> MessageDisposition,
{
    fn on_message(&mut self, message: &Message) -> MessageDisposition {
        self(message)
    }
}

#[cfg(feature = "defmt")]
impl defmt::Format for ConfirmationResult {
    fn format(&self, f: defmt::Formatter) {
        match self {
            ConfirmationResult::Ok => defmt::write!(f, "Ok"),
            ConfirmationResult::BecauseDestroy => defmt::write!(f, "BecauseDestroy"),
            ConfirmationResult::MessageTimeout => defmt::write!(f, "MessageTimeout"),
            ConfirmationResult::Error => defmt::write!(f, "Error"),
        }
    }
}
