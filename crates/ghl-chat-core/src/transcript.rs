//! Append-only transcript with broadcast of new entries.

use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use futures::StreamExt;
use tokio::sync::broadcast;
use tokio_stream::wrappers::BroadcastStream;

use crate::entry::{ConversationEntry, EntryId, NewEntry};

/// Capacity of the live-update channel. Slow subscribers lag, they never
/// block appends.
const LIVE_CAPACITY: usize = 1024;

struct Inner {
    entries: Vec<ConversationEntry>,
    next_id: u64,
}

/// Ordered, append-only conversation history.
///
/// Ids are minted and entries broadcast while the write lock is held, so
/// snapshot order, id order and live delivery order always agree.
pub struct Transcript {
    inner: RwLock<Inner>,
    sender: broadcast::Sender<ConversationEntry>,
}

impl Default for Transcript {
    fn default() -> Self {
        Self::new()
    }
}

impl Transcript {
    /// Create an empty transcript.
    #[must_use]
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(LIVE_CAPACITY);
        Self {
            inner: RwLock::new(Inner {
                entries: Vec::with_capacity(32),
                next_id: 1,
            }),
            sender,
        }
    }

    fn read(&self) -> RwLockReadGuard<'_, Inner> {
        self.inner.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, Inner> {
        self.inner.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Append an entry, assigning the next id.
    pub fn push(&self, entry: NewEntry) -> ConversationEntry {
        let mut inner = self.write();
        let id = EntryId::new(inner.next_id);
        inner.next_id += 1;

        let entry = ConversationEntry::from_new(id, entry);
        inner.entries.push(entry.clone());

        let _ = self.sender.send(entry.clone()); // live listeners
        entry
    }

    /// Copy of every entry in insertion order.
    #[must_use]
    pub fn snapshot(&self) -> Vec<ConversationEntry> {
        self.read().entries.clone()
    }

    /// Most recent entry.
    #[must_use]
    pub fn last(&self) -> Option<ConversationEntry> {
        self.read().entries.last().cloned()
    }

    /// Number of entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.read().entries.len()
    }

    /// Whether nothing has been appended yet.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.read().entries.is_empty()
    }

    /// Receiver for entries appended from now on.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<ConversationEntry> {
        self.sender.subscribe()
    }

    /// Stream that yields the current history, then live appends.
    ///
    /// The history snapshot and the live subscription are taken under one
    /// lock, so no entry is missed or repeated. Entries a lagging consumer
    /// falls behind on are skipped.
    #[must_use]
    pub fn history_plus_stream(&self) -> futures::stream::BoxStream<'static, ConversationEntry> {
        let (history, rx) = {
            let inner = self.read();
            (inner.entries.clone(), self.sender.subscribe())
        };

        let hist = futures::stream::iter(history);
        let live = BroadcastStream::new(rx).filter_map(|res| async move {
            if let Err(ref e) = res {
                tracing::warn!("transcript subscriber lagged: {e}");
            }
            res.ok()
        });

        hist.chain(live).boxed()
    }
}
