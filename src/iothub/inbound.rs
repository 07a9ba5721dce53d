//! Cloud-to-device delivery.

use super::message::{Message, MessageDisposition, MessageHandler};
use super::topic::decode_properties;
use crate::network::application::mqtt::PublishPacket;

/// Hand a received PUBLISH to the application.
///
/// The message is built from the payload and the application properties in
/// the topic, then passed to `handler`. Nothing is sent back to the broker
/// whatever the disposition; the session already acknowledged the PUBLISH.
/// Properties beyond what a [`Message`] holds are left off. A message with a
/// malformed topic or an oversized body is dropped without calling `handler`.
pub fn dispatch<H: MessageHandler + ?Sized>(publish: &PublishPacket, handler: &mut H) {
    let mut message = match Message::new(&publish.payload) {
        Ok(message) => message,
        Err(e) => {
            log::error!("dropping message on {}: {:?}", publish.topic, e);
            return;
        }
    };
    match decode_properties(&publish.topic, message.properties_mut()) {
        Ok(0) => {}
        Ok(n) => log::warn!("{} properties on {} did not fit, delivering the rest", n, publish.topic),
        Err(e) => {
            log::error!("dropping message on {}, bad properties: {:?}", publish.topic, e);
            return;
        }
    }

    match handler.on_message(&message) {
        MessageDisposition::Accepted => log::trace!("message on {} accepted", publish.topic),
        disposition => log::warn!("message on {} not accepted: {:?}", publish.topic, disposition),
    }
}
