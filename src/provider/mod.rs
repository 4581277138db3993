//! Mailbox provider implementations.
//!
//! This module contains the [`Mailbox`] trait and its Gmail implementation:
//!
//! - [`GmailMailbox`] - Gmail REST API with OAuth 2.0
//!
//! # Architecture
//!
//! The mailbox abstraction is a thin call surface over the remote mail API.
//! It exposes exactly the three operations the watcher needs: list today's
//! unread messages, fetch a message's subject, and mark a message read.
//! There is no local retry; transport and protocol failures surface as
//! [`MailboxError`] and the caller decides whether to retry.

mod gmail;
mod traits;

pub use gmail::GmailMailbox;
pub use traits::{Mailbox, MailboxError, MessageId, Result};

#[cfg(test)]
pub use traits::MockMailbox;
