//! Merge iterator for range scans.
//!
//! Interleaves two ascending sources into one deduplicated stream:
//!
//! - the buffered writes that fall inside the range (snapshot taken at open)
//! - the live store cursor, kept one element ahead of consumption
//!
//! On equal keys the buffered write wins. Tombstones are never emitted.
//! Every value pulled from the store is decoded and warmed into the read
//! cache, so a point get of a scanned key does not go back to the store.
//! Warming only fills slots the cache knows nothing about: a slot set by a
//! get or a commit is never replaced with the cursor's snapshot.

use super::{decode_stored, ReadSlot, SharedReadCache, WriteSlot};
use crate::error::{Error, Result};
use crate::storage::{Namespace, StateCursor};
use crate::value::Datum;
use std::cmp::Ordering;
use std::collections::VecDeque;
use std::ops::ControlFlow;
use tracing::{debug, trace, warn};

/// Which source the next element comes from.
enum Step {
    Pending,
    Store,
    /// Same key on both sides; the store value is discarded.
    Shadowed,
}

/// Ordered view of `[start, end)` with buffered writes applied.
///
/// Must be closed with [`MergeIterator::close`] on every exit path. Async code
/// cannot run in `Drop`, so an iterator dropped while its store cursor is
/// still open only logs a warning. [`MergeIterator::collect_all`] and
/// [`MergeIterator::for_each`] close for you.
pub struct MergeIterator {
    namespace: Namespace,
    pending: VecDeque<(String, WriteSlot)>,
    cursor: Option<Box<dyn StateCursor>>,
    lookahead: Option<(String, Datum)>,
    reads: Option<SharedReadCache>,
    closed: bool,
    warn_unclosed: bool,
}

impl std::fmt::Debug for MergeIterator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MergeIterator")
            .field("namespace", &self.namespace)
            .field("pending", &self.pending.len())
            .field("store_open", &self.cursor.is_some())
            .field("closed", &self.closed)
            .finish()
    }
}

impl MergeIterator {
    /// Iterator over nothing, with no store cursor behind it.
    pub(crate) fn empty(namespace: Namespace) -> Self {
        Self {
            namespace,
            pending: VecDeque::new(),
            cursor: None,
            lookahead: None,
            reads: None,
            closed: false,
            warn_unclosed: false,
        }
    }

    /// Build the iterator and pre-fetch the first store element.
    ///
    /// `pending` must be sorted by key and already restricted to the range
    /// the cursor was opened on. If the pre-fetch fails the cursor is closed
    /// before the error is returned.
    pub(crate) async fn open(
        namespace: Namespace,
        pending: Vec<(String, WriteSlot)>,
        cursor: Box<dyn StateCursor>,
        reads: SharedReadCache,
        warn_unclosed: bool,
    ) -> Result<Self> {
        let mut iter = Self {
            namespace,
            pending: pending.into(),
            cursor: Some(cursor),
            lookahead: None,
            reads: Some(reads),
            closed: false,
            warn_unclosed,
        };
        if let Err(e) = iter.advance_store().await {
            if let Err(close_err) = iter.close().await {
                warn!(namespace = %iter.namespace, error = %close_err, "failed to close cursor after open error");
            }
            return Err(e);
        }
        Ok(iter)
    }

    pub fn namespace(&self) -> &Namespace {
        &self.namespace
    }

    /// Whether the store cursor is still held.
    pub fn is_store_open(&self) -> bool {
        self.cursor.is_some()
    }

    /// Next visible pair, or `None` at the end of the range.
    ///
    /// Once exhausted, further calls keep returning `None`. Calling this after
    /// [`close`](Self::close) is an error.
    pub async fn next(&mut self) -> Result<Option<(String, Datum)>> {
        if self.closed {
            return Err(Error::CursorClosed);
        }

        loop {
            let step = match (self.pending.front(), &self.lookahead) {
                (None, None) => return Ok(None),
                (Some(_), None) => Step::Pending,
                (None, Some(_)) => Step::Store,
                (Some((pending_key, _)), Some((store_key, _))) => {
                    match pending_key.as_str().cmp(store_key.as_str()) {
                        Ordering::Less => Step::Pending,
                        Ordering::Greater => Step::Store,
                        Ordering::Equal => Step::Shadowed,
                    }
                }
            };

            match step {
                Step::Store => return self.pop_store().await,
                Step::Shadowed => {
                    self.advance_store().await?;
                }
                Step::Pending => {}
            }

            if let Some((key, slot)) = self.pending.pop_front() {
                match slot {
                    WriteSlot::Written(value) => return Ok(Some((key, value))),
                    WriteSlot::Deleted | WriteSlot::Untouched => {
                        trace!(namespace = %self.namespace, key = %key, "skipping tombstone");
                    }
                }
            }
        }
    }

    /// Release the store cursor. Safe to call more than once.
    pub async fn close(&mut self) -> Result<()> {
        self.closed = true;
        self.pending.clear();
        self.lookahead = None;
        self.release_cursor().await
    }

    /// Drain the remaining pairs and close, whether or not draining succeeded.
    pub async fn collect_all(mut self) -> Result<Vec<(String, Datum)>> {
        let mut out = Vec::new();
        let drained = loop {
            match self.next().await {
                Ok(Some(entry)) => out.push(entry),
                Ok(None) => break Ok(()),
                Err(e) => break Err(e),
            }
        };
        let closed = self.close().await;
        drained?;
        closed?;
        Ok(out)
    }

    /// Feed pairs to `f` until the range ends or `f` breaks, then close.
    ///
    /// Returns the number of pairs handed to `f`.
    pub async fn for_each<F>(mut self, mut f: F) -> Result<usize>
    where
        F: FnMut(&str, &Datum) -> ControlFlow<()>,
    {
        let mut seen = 0;
        let walked = loop {
            match self.next().await {
                Ok(Some((key, value))) => {
                    seen += 1;
                    if f(&key, &value).is_break() {
                        break Ok(());
                    }
                }
                Ok(None) => break Ok(()),
                Err(e) => break Err(e),
            }
        };
        let closed = self.close().await;
        walked?;
        closed?;
        Ok(seen)
    }

    async fn pop_store(&mut self) -> Result<Option<(String, Datum)>> {
        let entry = self.lookahead.take();
        self.advance_store().await?;
        Ok(entry)
    }

    /// Replace the lookahead with the next store element.
    ///
    /// The cursor is released as soon as it reports the end of the range.
    async fn advance_store(&mut self) -> Result<()> {
        self.lookahead = None;
        let next = match self.cursor.as_mut() {
            Some(cursor) => cursor.next().await?,
            None => return Ok(()),
        };

        match next {
            Some((key, raw)) => {
                let value = decode_stored(&key, &raw)?;
                if let Some(reads) = &self.reads {
                    reads
                        .lock()
                        .entry(key.clone())
                        .or_insert_with(|| ReadSlot::Present(value.clone()));
                }
                trace!(namespace = %self.namespace, key = %key, "store element");
                self.lookahead = Some((key, value));
            }
            None => self.release_cursor().await?,
        }
        Ok(())
    }

    async fn release_cursor(&mut self) -> Result<()> {
        if let Some(mut cursor) = self.cursor.take() {
            cursor.close().await?;
            debug!(namespace = %self.namespace, "store cursor released");
        }
        Ok(())
    }
}

impl Drop for MergeIterator {
    fn drop(&mut self) {
        if self.cursor.is_some() && self.warn_unclosed {
            warn!(
                namespace = %self.namespace,
                "range iterator dropped without close(); store cursor left open"
            );
        }
    }
}
