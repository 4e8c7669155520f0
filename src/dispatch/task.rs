//! Generation task state machine and slot labelling.

use serde::Serialize;
use std::collections::HashSet;
use std::fmt;
use std::time::{Duration, Instant};

/// Lifecycle of one generation task.
///
/// Transitions only move forward:
/// `Queued -> Running -> {Completed, Failed, Canceled}` and `Queued -> Canceled`.
/// `Completed` means the provider call returned; whether it produced an
/// image is carried by the result, not the status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    /// Waiting for a worker slot.
    Queued,
    /// Provider call in flight.
    Running,
    /// Provider call returned (successfully or not).
    Completed,
    /// Canceled before or during the provider call.
    Canceled,
    /// Timed out.
    Failed,
}

impl TaskStatus {
    /// Returns true once the task can no longer change.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Canceled | Self::Failed)
    }

    /// Returns true if moving to `next` respects the forward-only order.
    pub fn can_transition_to(&self, next: TaskStatus) -> bool {
        matches!(
            (self, next),
            (Self::Queued, Self::Running)
                | (Self::Queued, Self::Canceled)
                | (Self::Running, Self::Completed)
                | (Self::Running, Self::Canceled)
                | (Self::Running, Self::Failed)
        )
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Queued => "queued",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Canceled => "canceled",
            Self::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// Identifier of a task, unique within its batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct TaskId(pub u64);

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "task-{}", self.0)
    }
}

/// One (provider, repeat) unit of work within a batch.
#[derive(Debug, Clone)]
pub struct GenerationTask {
    id: TaskId,
    provider: String,
    slot_label: String,
    attempt: u32,
    status: TaskStatus,
    started_at: Option<Instant>,
    finished_at: Option<Instant>,
}

impl GenerationTask {
    pub(crate) fn new(id: TaskId, provider: impl Into<String>, slot_label: impl Into<String>) -> Self {
        Self {
            id,
            provider: provider.into(),
            slot_label: slot_label.into(),
            attempt: 1,
            status: TaskStatus::Queued,
            started_at: None,
            finished_at: None,
        }
    }

    /// A fresh task re-running the same slot.
    pub(crate) fn retry_of(previous: &GenerationTask, id: TaskId) -> Self {
        Self {
            attempt: previous.attempt + 1,
            ..Self::new(id, previous.provider.clone(), previous.slot_label.clone())
        }
    }

    /// Applies a forward transition, stamping start/finish times.
    ///
    /// Returns false, leaving the task untouched, when the move is not allowed.
    pub(crate) fn transition(&mut self, next: TaskStatus) -> bool {
        if !self.status.can_transition_to(next) {
            return false;
        }
        let now = Instant::now();
        if next == TaskStatus::Running {
            self.started_at = Some(now);
        }
        if next.is_terminal() {
            self.finished_at = Some(now);
        }
        self.status = next;
        true
    }

    /// Task identifier.
    pub fn id(&self) -> TaskId {
        self.id
    }

    /// Registry name of the provider this task calls.
    pub fn provider(&self) -> &str {
        &self.provider
    }

    /// Slot label, unique within the batch.
    pub fn slot_label(&self) -> &str {
        &self.slot_label
    }

    /// 1 for the original run, incremented by each re-run of the slot.
    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    /// Current status.
    pub fn status(&self) -> TaskStatus {
        self.status
    }

    /// When the provider call started.
    pub fn started_at(&self) -> Option<Instant> {
        self.started_at
    }

    /// When the task reached a terminal status.
    pub fn finished_at(&self) -> Option<Instant> {
        self.finished_at
    }

    /// Time spent running, so far or in total.
    pub fn elapsed(&self) -> Option<Duration> {
        let start = self.started_at?;
        Some(self.finished_at.unwrap_or_else(Instant::now).duration_since(start))
    }
}

/// Expands (provider, repeat) selections into (provider, slot label) pairs.
///
/// Labels are `"{provider}"` for a single run, `"{provider} (Image {i})"`
/// for repeats, or positional `"Image {n}"` in arena mode. Returns the first
/// duplicate label as an error.
pub(crate) fn expand_selections(
    selections: &[(String, u32)],
    arena: bool,
) -> std::result::Result<Vec<(String, String)>, String> {
    let mut slots = Vec::new();
    let mut seen = HashSet::new();

    for (provider, repeat) in selections {
        for i in 1..=*repeat {
            let label = if arena {
                format!("Image {}", slots.len() + 1)
            } else if *repeat > 1 {
                format!("{provider} (Image {i})")
            } else {
                provider.clone()
            };
            if !seen.insert(label.clone()) {
                return Err(label);
            }
            slots.push((provider.clone(), label));
        }
    }

    Ok(slots)
}
