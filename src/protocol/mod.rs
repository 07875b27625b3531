//! Message envelopes and topic conventions
//!
//! Everything that crosses the wire is defined here: the request/response
//! JSON envelopes, the queued-message record, QoS levels, and the topic
//! canonicalization rules.

pub mod messages;
pub mod topics;

pub use messages::{
    InboundMessage, PresenceMessage, QosLevel, QueuedMessage, ResponseEnvelope, ResponseStatus,
    EXPIRY_FIELD, REPLY_TO_FIELD, REQUEST_ID_FIELD,
};
pub use topics::{canonicalize_topic, validate_client_id, TopicSet, ValidationError};
