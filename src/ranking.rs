//! Blind preference ranking over a finished batch.

use crate::dispatch::Batch;
use crate::error::{ArenaError, Result};
use std::collections::{HashMap, HashSet};
use tokio::sync::watch;

/// One slot's place in a ranking.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RankingEntry {
    /// Slot label.
    pub slot_label: String,
    /// 0-based position; 0 is the most preferred.
    pub position: usize,
}

/// Ordered preference list over a batch's successful results.
///
/// Positions always form a permutation of `0..len()`. Once submitted the
/// session is closed and every further mutation fails with
/// [`ArenaError::ClosedSession`].
#[derive(Debug)]
pub struct RankingSession {
    batch_id: u64,
    order: Vec<String>,
    positions: HashMap<String, usize>,
    revision: watch::Receiver<u64>,
    closed: bool,
}

impl RankingSession {
    /// Opens a session over a batch whose tasks are all terminal.
    ///
    /// The initial order is the arrival order of the slots that produced an
    /// image; failed slots are not ranked.
    pub fn open(batch: &Batch) -> Result<Self> {
        let mut revision = batch.subscribe_results();
        revision.borrow_and_update();

        let snapshot = batch.snapshot();
        if !snapshot.status.is_complete() {
            return Err(ArenaError::NotReady(format!(
                "{} of {} tasks still active",
                snapshot.status.active(),
                snapshot.status.total
            )));
        }

        let mut session = Self {
            batch_id: batch.id(),
            order: Vec::with_capacity(snapshot.results.len()),
            positions: HashMap::with_capacity(snapshot.results.len()),
            revision,
            closed: false,
        };
        for result in snapshot.results.iter().filter(|r| r.is_ok()) {
            session.append(&result.slot_label);
        }

        tracing::debug!(batch_id = session.batch_id, slots = session.len(), "opened ranking session");
        Ok(session)
    }

    /// Moves a slot one place towards the front. No-op if it is already first.
    pub fn move_up(&mut self, slot_label: &str) -> Result<()> {
        let pos = self.position_of(slot_label)?;
        if pos > 0 {
            self.swap(pos, pos - 1);
        }
        Ok(())
    }

    /// Moves a slot one place towards the back. No-op if it is already last.
    pub fn move_down(&mut self, slot_label: &str) -> Result<()> {
        let pos = self.position_of(slot_label)?;
        if pos + 1 < self.order.len() {
            self.swap(pos, pos + 1);
        }
        Ok(())
    }

    /// Current order, most preferred first.
    pub fn order(&self) -> &[String] {
        &self.order
    }

    /// Current order as entries.
    pub fn entries(&self) -> Vec<RankingEntry> {
        self.order
            .iter()
            .enumerate()
            .map(|(position, slot_label)| RankingEntry {
                slot_label: slot_label.clone(),
                position,
            })
            .collect()
    }

    /// Position of a slot, if it is ranked.
    pub fn position(&self, slot_label: &str) -> Option<usize> {
        self.positions.get(slot_label).copied()
    }

    /// Number of ranked slots.
    pub fn len(&self) -> usize {
        self.order.len()
    }

    /// Returns true if there is nothing to rank.
    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    /// Returns true once the session was submitted.
    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// Returns true if the batch's results changed since the session last
    /// looked at them (a slot was re-run).
    pub fn needs_refresh(&self) -> bool {
        self.revision.has_changed().unwrap_or(false)
    }

    /// Brings the session in line with the batch's current results.
    ///
    /// Slots whose latest result is a failure (a re-run that failed) are
    /// removed and the rest close ranks in their existing relative order.
    /// Slots that produced an image since the last look are appended at the
    /// end. Returns the number of slots added.
    pub fn refresh(&mut self, batch: &Batch) -> Result<usize> {
        self.ensure_open()?;
        self.revision.borrow_and_update();

        let view = batch.current_view();
        let failed: HashSet<&str> = view
            .iter()
            .filter(|r| !r.is_ok())
            .map(|r| r.slot_label.as_str())
            .collect();
        if self.order.iter().any(|slot| failed.contains(slot.as_str())) {
            let removed = self.order.len();
            self.order.retain(|slot| !failed.contains(slot.as_str()));
            tracing::debug!(
                batch_id = self.batch_id,
                removed = removed - self.order.len(),
                "dropped slots that failed on re-run"
            );
            self.positions = self
                .order
                .iter()
                .enumerate()
                .map(|(position, slot)| (slot.clone(), position))
                .collect();
        }

        let before = self.order.len();
        for result in view.iter().filter(|r| r.is_ok()) {
            if !self.positions.contains_key(&result.slot_label) {
                self.append(&result.slot_label);
            }
        }
        Ok(self.order.len() - before)
    }

    /// Closes the session and returns the final order, most preferred first.
    ///
    /// Rank `n` is the element at index `n - 1`.
    pub fn submit(&mut self) -> Result<Vec<String>> {
        self.ensure_open()?;
        self.closed = true;
        tracing::info!(batch_id = self.batch_id, slots = self.order.len(), "ranking submitted");
        Ok(self.order.clone())
    }

    /// Drops the session without submitting it.
    pub fn discard(self) {
        tracing::debug!(batch_id = self.batch_id, "ranking discarded");
    }

    fn position_of(&self, slot_label: &str) -> Result<usize> {
        self.ensure_open()?;
        self.position(slot_label)
            .ok_or_else(|| ArenaError::UnknownSlot(slot_label.to_string()))
    }

    fn ensure_open(&self) -> Result<()> {
        if self.closed {
            Err(ArenaError::ClosedSession)
        } else {
            Ok(())
        }
    }

    fn append(&mut self, slot_label: &str) {
        self.positions.insert(slot_label.to_string(), self.order.len());
        self.order.push(slot_label.to_string());
    }

    fn swap(&mut self, a: usize, b: usize) {
        self.order.swap(a, b);
        self.positions.insert(self.order[a].clone(), a);
        self.positions.insert(self.order[b].clone(), b);
    }
}
