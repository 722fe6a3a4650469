use cirrus_core::{AppResult, NonEmptyString};
use serde::{Deserialize, Serialize};

/// Hard ceiling on messages returned by one receive call.
pub const MAX_RECEIVE_MESSAGES: usize = 10;

/// One received queue message; holding it is a lease until the visibility timeout.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueMessage {
    message_id: NonEmptyString,
    body: String,
    receipt_handle: NonEmptyString,
}

impl QueueMessage {
    /// Creates a received message.
    pub fn new(
        message_id: impl Into<String>,
        body: impl Into<String>,
        receipt_handle: impl Into<String>,
    ) -> AppResult<Self> {
        Ok(Self {
            message_id: NonEmptyString::new(message_id)?,
            body: body.into(),
            receipt_handle: NonEmptyString::new(receipt_handle)?,
        })
    }

    /// Returns the queue-assigned message id.
    #[must_use]
    pub fn message_id(&self) -> &str {
        self.message_id.as_str()
    }

    /// Returns the raw message body.
    #[must_use]
    pub fn body(&self) -> &str {
        self.body.as_str()
    }

    /// Returns the receipt handle used for deletion.
    #[must_use]
    pub fn receipt_handle(&self) -> &str {
        self.receipt_handle.as_str()
    }
}

/// Returns the queue name from a queue URL or ARN.
#[must_use]
pub fn queue_name(queue_id: &str) -> &str {
    let trimmed = queue_id.trim_end_matches('/');
    trimmed
        .rsplit(['/', ':'])
        .next()
        .filter(|name| !name.is_empty())
        .unwrap_or(trimmed)
}

/// Returns the object key of the archived copy of one incoming message.
#[must_use]
pub fn archived_message_key(archive_prefix: &str, queue_id: &str, message_id: &str) -> String {
    format!(
        "{}/{}/{message_id}",
        archive_prefix.trim_end_matches('/'),
        queue_name(queue_id)
    )
}
