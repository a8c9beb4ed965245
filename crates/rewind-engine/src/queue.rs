//! The pending-action queue consumed by normal playback.

use std::collections::VecDeque;
use std::time::Duration;

use rewind_model::action::RecordableAction;
use rewind_model::replay::Replay;

/// Actions not yet played, ascending by timestamp.
///
/// Rebuilt from the replay by [`reset`](Self::reset) after every seek, and
/// drained from the front by normal playback.
#[derive(Debug, Clone, Default)]
pub struct PendingActions {
    queue: VecDeque<RecordableAction>,
}

impl PendingActions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Refill with every action of `replay` whose timestamp is `>= from`.
    pub fn reset(&mut self, replay: &Replay, from: Duration) {
        self.queue.clear();
        self.queue.extend(replay.actions_from(from).iter().cloned());
    }

    pub fn clear(&mut self) {
        self.queue.clear();
    }

    pub fn peek(&self) -> Option<&RecordableAction> {
        self.queue.front()
    }

    pub fn pop(&mut self) -> Option<RecordableAction> {
        self.queue.pop_front()
    }

    /// Pop the next action if its timestamp is strictly before `target`.
    pub fn pop_before(&mut self, target: Duration) -> Option<RecordableAction> {
        match self.queue.front() {
            Some(next) if next.timestamp < target => self.queue.pop_front(),
            _ => None,
        }
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &RecordableAction> {
        self.queue.iter()
    }

    /// Timestamps of every pending action, in queue order.
    pub fn timestamps(&self) -> Vec<Duration> {
        self.queue.iter().map(|a| a.timestamp).collect()
    }
}
