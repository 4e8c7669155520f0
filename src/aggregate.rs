//! Normalizes raw provider results into one slot-keyed, arrival-ordered view.

use crate::dispatch::TaskId;
use crate::image::{ImageFormat, RawImage, RawResult};
use std::collections::HashMap;
use tokio::sync::watch;

/// Display-neutral result of one slot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GenerationResult {
    /// Slot this result belongs to.
    pub slot_label: String,
    /// Registry name of the provider that produced it.
    pub provider: String,
    /// Task that produced it.
    pub task_id: TaskId,
    /// The image, or the failure message.
    pub outcome: Result<RawImage, String>,
}

impl GenerationResult {
    /// Normalizes a raw provider result.
    pub fn from_raw(
        slot_label: impl Into<String>,
        provider: impl Into<String>,
        task_id: TaskId,
        raw: RawResult,
    ) -> Self {
        let outcome = match raw {
            RawResult::ImageBytes(data) => Ok(RawImage::Bytes(data)),
            RawResult::ImageUrl(url) => Ok(RawImage::Url(url)),
            RawResult::Failure(message) => Err(message),
        };
        Self {
            slot_label: slot_label.into(),
            provider: provider.into(),
            task_id,
            outcome,
        }
    }

    /// Returns true if the slot holds an image.
    pub fn is_ok(&self) -> bool {
        self.outcome.is_ok()
    }

    /// Detected image format, when there is an image and it is recognizable.
    pub fn format(&self) -> Option<ImageFormat> {
        self.outcome.as_ref().ok().and_then(RawImage::format)
    }
}

/// What an insertion did to the view.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Insertion {
    /// A new slot was appended.
    Added,
    /// An existing slot's entry was replaced in place.
    Replaced,
}

/// Slot-keyed result collection in arrival order.
///
/// Insertion is idempotent per slot label: a second result for a slot
/// replaces the first and keeps its position. Every change bumps a revision
/// that dependents observe through [`ResultAggregator::subscribe`].
#[derive(Debug)]
pub struct ResultAggregator {
    entries: Vec<GenerationResult>,
    index: HashMap<String, usize>,
    revision: watch::Sender<u64>,
}

impl Default for ResultAggregator {
    fn default() -> Self {
        Self::new()
    }
}

impl ResultAggregator {
    /// Creates an empty aggregator.
    pub fn new() -> Self {
        let (revision, _) = watch::channel(0);
        Self {
            entries: Vec::new(),
            index: HashMap::new(),
            revision,
        }
    }

    /// Inserts or replaces the result for its slot.
    pub fn insert(&mut self, result: GenerationResult) -> Insertion {
        let insertion = match self.index.get(&result.slot_label) {
            Some(&pos) => {
                self.entries[pos] = result;
                Insertion::Replaced
            }
            None => {
                self.index
                    .insert(result.slot_label.clone(), self.entries.len());
                self.entries.push(result);
                Insertion::Added
            }
        };
        self.revision.send_modify(|rev| *rev += 1);
        insertion
    }

    /// Results in arrival order.
    pub fn current_view(&self) -> Vec<GenerationResult> {
        self.entries.clone()
    }

    /// Result for one slot.
    pub fn get(&self, slot_label: &str) -> Option<&GenerationResult> {
        self.index.get(slot_label).map(|&pos| &self.entries[pos])
    }

    /// Slot labels in arrival order.
    pub fn slot_labels(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|r| r.slot_label.as_str())
    }

    /// Number of slots with a result.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns true if no result has arrived yet.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Number of slots holding an image.
    pub fn succeeded(&self) -> usize {
        self.entries.iter().filter(|r| r.is_ok()).count()
    }

    /// Number of slots holding a failure.
    pub fn failed(&self) -> usize {
        self.entries.len() - self.succeeded()
    }

    /// Current revision; increases on every insertion.
    pub fn revision(&self) -> u64 {
        *self.revision.borrow()
    }

    /// Subscribes to revision changes.
    pub fn subscribe(&self) -> watch::Receiver<u64> {
        self.revision.subscribe()
    }
}
