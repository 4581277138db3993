//! Mailbox trait definition.
//!
//! This module defines the [`Mailbox`] trait which abstracts over the remote
//! mail backend, plus the error taxonomy shared by all implementations. The
//! watcher only ever talks to a `Mailbox`, which keeps the polling logic
//! testable against an in-memory fake.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;

#[cfg(test)]
use mockall::automock;

/// Result type alias for mailbox operations.
pub type Result<T> = std::result::Result<T, MailboxError>;

/// Errors that can occur during mailbox operations.
///
/// The taxonomy separates transient transport failures, which the poll loop
/// retries with a longer sleep, from request or programming errors, which it
/// does not.
#[derive(Debug, thiserror::Error)]
pub enum MailboxError {
    /// Authentication failed or credentials expired.
    #[error("authentication failed: {0}")]
    Authentication(String),

    /// Network or connection error.
    #[error("connection error: {0}")]
    Connection(String),

    /// Rate limit exceeded.
    #[error("rate limit exceeded, retry after {retry_after_secs:?} seconds")]
    RateLimited {
        /// Seconds to wait before retrying, if known.
        retry_after_secs: Option<u64>,
    },

    /// Requested resource was not found.
    #[error("not found: {0}")]
    NotFound(String),

    /// Invalid request or parameters.
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// Internal error.
    #[error("internal error: {0}")]
    Internal(String),
}

impl MailboxError {
    /// Returns whether the error is worth retrying on the next poll.
    ///
    /// Expired credentials, network failures, rate limiting, and a message
    /// disappearing between list and fetch are all conditions the next
    /// iteration can recover from. Invalid requests and internal errors are
    /// programming errors and terminate the watcher instead.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            MailboxError::Authentication(_)
                | MailboxError::Connection(_)
                | MailboxError::RateLimited { .. }
                | MailboxError::NotFound(_)
        )
    }
}

/// Provider-assigned identifier for an individual message.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MessageId(pub String);

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for MessageId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for MessageId {
    fn from(s: &str) -> Self {
        Self(s.to_owned())
    }
}

/// Trait for mailbox backends.
///
/// Implementations delegate to the remote mail API and fail with whatever
/// [`MailboxError`] the transport raises; retry policy lives in the caller.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait Mailbox: Send + Sync {
    /// Lists identifiers of unread messages received today.
    ///
    /// "Today" is the local calendar day, computed once per call. Returns an
    /// empty vector when nothing matches, never an error for the empty case.
    /// The order of the returned identifiers is provider-defined and is
    /// preserved by callers as arrival order.
    async fn list_unread_today(&self) -> Result<Vec<MessageId>>;

    /// Fetches the subject line of a message.
    ///
    /// Returns a placeholder string when the message has no Subject header.
    async fn fetch_subject(&self, id: &MessageId) -> Result<String>;

    /// Marks a message as read.
    ///
    /// Idempotent: marking an already-read message is not an error.
    async fn mark_read(&self, id: &MessageId) -> Result<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn message_id_display() {
        let id = MessageId::from("19203abc");
        assert_eq!(id.to_string(), "19203abc");
    }

    #[test]
    fn message_id_hash() {
        use std::collections::HashSet;
        let mut set = HashSet::new();
        set.insert(MessageId::from("m1"));
        assert!(set.contains(&MessageId::from("m1")));
        assert!(!set.contains(&MessageId::from("m2")));
    }

    #[test]
    fn mailbox_error_display() {
        let auth_err = MailboxError::Authentication("token expired".to_string());
        assert_eq!(auth_err.to_string(), "authentication failed: token expired");

        let rate_err = MailboxError::RateLimited {
            retry_after_secs: Some(60),
        };
        assert!(rate_err.to_string().contains("rate limit"));
    }

    #[test]
    fn transient_classification() {
        assert!(MailboxError::Connection("reset by peer".into()).is_transient());
        assert!(MailboxError::Authentication("401".into()).is_transient());
        assert!(MailboxError::RateLimited {
            retry_after_secs: None
        }
        .is_transient());
        assert!(MailboxError::NotFound("m1".into()).is_transient());

        assert!(!MailboxError::InvalidRequest("bad query".into()).is_transient());
        assert!(!MailboxError::Internal("parse response".into()).is_transient());
    }
}
