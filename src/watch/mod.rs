//! The polling loop.
//!
//! The [`Watcher`] drives the whole program: list today's unread messages,
//! announce the ones not seen before, mark them read, sleep, repeat. It owns
//! the [`SeenSet`] of already-announced identifiers, so the set can be
//! constructed with deterministic contents in tests instead of living in
//! module-level state.
//!
//! # Failure policy
//!
//! Transient errors (network, rate limiting, expired credentials, a message
//! vanishing between list and fetch) are logged at the iteration boundary
//! and followed by a longer sleep. Anything else is a programming error and
//! terminates the loop.

use std::collections::HashSet;
use std::time::Duration;

use crate::config::PollSettings;
use crate::notify::{sanitize, Notifier};
use crate::provider::{Mailbox, MailboxError, MessageId};

/// Errors that can escape a poll iteration.
#[derive(Debug, thiserror::Error)]
pub enum WatchError {
    /// The mailbox call failed.
    #[error(transparent)]
    Mailbox(#[from] MailboxError),

    /// Writing the announcement to the console failed.
    #[error("console output error: {0}")]
    Console(#[from] std::io::Error),
}

impl WatchError {
    /// Returns whether the next iteration should retry after a backoff.
    pub fn is_transient(&self) -> bool {
        match self {
            WatchError::Mailbox(e) => e.is_transient(),
            // A console hiccup should not kill a long-running watcher.
            WatchError::Console(_) => true,
        }
    }
}

/// Identifiers already announced in this process's lifetime.
///
/// Grows monotonically and lives only in memory; a restart starts empty and
/// may re-announce messages that are still unread on the server.
#[derive(Debug, Clone, Default)]
pub struct SeenSet(HashSet<MessageId>);

impl SeenSet {
    /// Creates an empty set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns whether the identifier has already been announced.
    pub fn contains(&self, id: &MessageId) -> bool {
        self.0.contains(id)
    }

    /// Records an identifier; returns `false` if it was already present.
    pub fn insert(&mut self, id: MessageId) -> bool {
        self.0.insert(id)
    }

    /// Number of identifiers recorded.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Returns whether nothing has been announced yet.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl FromIterator<MessageId> for SeenSet {
    fn from_iter<I: IntoIterator<Item = MessageId>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

/// What a single poll iteration did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollOutcome {
    /// Number of newly announced (and marked-read) messages.
    pub announced: usize,
}

/// The poll loop controller.
pub struct Watcher<M> {
    mailbox: M,
    notifier: Notifier,
    seen: SeenSet,
    interval: Duration,
    error_backoff: Duration,
}

impl<M: Mailbox> Watcher<M> {
    /// Creates a watcher with an empty seen set.
    pub fn new(mailbox: M, notifier: Notifier, poll: &PollSettings) -> Self {
        Self::with_seen(mailbox, notifier, poll, SeenSet::new())
    }

    /// Creates a watcher with explicit seen-set contents.
    pub fn with_seen(mailbox: M, notifier: Notifier, poll: &PollSettings, seen: SeenSet) -> Self {
        Self {
            mailbox,
            notifier,
            seen,
            interval: poll.interval(),
            error_backoff: poll.error_backoff(),
        }
    }

    /// Returns the seen set.
    pub fn seen(&self) -> &SeenSet {
        &self.seen
    }

    /// Runs the loop forever.
    ///
    /// Returns only when an iteration fails with a non-transient error; the
    /// caller treats that as fatal. External process termination is the only
    /// other way out.
    pub async fn run(&mut self) -> Result<(), WatchError> {
        loop {
            match self.poll_once().await {
                Ok(outcome) => {
                    if outcome.announced == 0 {
                        tracing::debug!("no new mail");
                    }
                    tokio::time::sleep(self.interval).await;
                }
                Err(e) if e.is_transient() => {
                    tracing::error!(error = %e, "poll failed, backing off");
                    tokio::time::sleep(self.error_backoff).await;
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Runs a single poll iteration.
    ///
    /// New identifiers are recorded in the seen set before the announcement
    /// I/O, so a failure mid-notification cannot duplicate an announcement
    /// later in this process. Messages are marked read only after they have
    /// been announced, in the order the provider listed them.
    pub async fn poll_once(&mut self) -> Result<PollOutcome, WatchError> {
        let ids = self.mailbox.list_unread_today().await?;

        let mut arrivals: Vec<(MessageId, String)> = Vec::new();
        for id in ids {
            if self.seen.contains(&id) {
                continue;
            }
            let subject = self.mailbox.fetch_subject(&id).await?;
            self.seen.insert(id.clone());
            arrivals.push((id, sanitize(&subject)));
        }

        if !arrivals.is_empty() {
            let subjects: Vec<String> = arrivals.iter().map(|(_, s)| s.clone()).collect();
            self.notifier.announce(&subjects)?;
            self.notifier.alert();

            for (id, _) in &arrivals {
                self.mailbox.mark_read(id).await?;
            }
            tracing::info!(count = arrivals.len(), "announced and marked read");
        }

        Ok(PollOutcome {
            announced: arrivals.len(),
        })
    }
}
