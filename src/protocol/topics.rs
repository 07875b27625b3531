//! Topic canonicalization and client id validation
//!
//! All topics used by the crate flow through [`canonicalize_topic`] so that
//! equality checks in the dispatcher are exact string comparisons.

use thiserror::Error;

pub fn canonicalize_topic(topic: &str) -> String {
    if topic.is_empty() {
        return "/".to_string();
    }

    let mut result = if topic.starts_with('/') {
        topic.to_string()
    } else {
        format!("/{topic}")
    };

    while result.contains("//") {
        result = result.replace("//", "/");
    }

    if result.len() > 1 && result.ends_with('/') {
        result.pop();
    }

    result
}

pub fn validate_client_id(client_id: &str) -> Result<(), ValidationError> {
    if client_id.is_empty() {
        return Err(ValidationError::EmptyClientId);
    }

    for ch in client_id.chars() {
        if !ch.is_ascii_alphanumeric() && ch != '.' && ch != '_' && ch != '-' {
            return Err(ValidationError::InvalidClientIdChar(ch));
        }
    }

    Ok(())
}

/// Validation errors for topic/client naming
#[derive(Debug, Error, PartialEq)]
pub enum ValidationError {
    #[error("Client ID cannot be empty")]
    EmptyClientId,
    #[error("Client ID contains invalid character: '{0}'")]
    InvalidClientIdChar(char),
}

/// The topic namespace a client operates in.
///
/// All clients sharing a root see the same well-known request topic;
/// reply and status topics are per client id.
#[derive(Debug, Clone, PartialEq)]
pub struct TopicSet {
    root: String,
}

impl TopicSet {
    pub fn new(root: &str) -> Self {
        Self {
            root: canonicalize_topic(root),
        }
    }

    pub fn root(&self) -> &str {
        &self.root
    }

    /// Well-known request topic shared by all clients under this root:
    /// `<root>/requests`
    pub fn request_topic(&self) -> String {
        canonicalize_topic(&format!("{}/requests", self.root))
    }

    /// Per-client reply destination: `<root>/clients/<id>/reply`
    pub fn reply_topic(&self, client_id: &str) -> String {
        canonicalize_topic(&format!("{}/clients/{client_id}/reply", self.root))
    }

    /// Per-client presence topic: `<root>/clients/<id>/status`
    pub fn status_topic(&self, client_id: &str) -> String {
        canonicalize_topic(&format!("{}/clients/{client_id}/status", self.root))
    }

    /// Plain pub/sub data topic: `<root>/data/<suffix>`
    pub fn data_topic(&self, suffix: &str) -> String {
        canonicalize_topic(&format!("{}/data/{suffix}", self.root))
    }
}
