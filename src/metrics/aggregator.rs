use crate::domain::experiment::ExperimentKind;
use crate::domain::variant::CounterDelta;
use crate::metrics::event::EventKind;
use std::collections::{HashSet, VecDeque};

/// Maps a raw event onto the counter delta it contributes for an experiment
/// of the given kind. Events outside the kind's metric vocabulary yield
/// `None` and are dropped by the caller (logged, never an error).
pub fn normalize(
    kind: ExperimentKind,
    event: EventKind,
    value_minor: Option<i64>,
) -> Option<CounterDelta> {
    let mut delta = CounterDelta::default();
    match (kind, event) {
        (ExperimentKind::Content, EventKind::Sent) => delta.sent = 1,
        (ExperimentKind::Content, EventKind::Delivered) => delta.delivered = 1,
        (ExperimentKind::Content, EventKind::Opened) => delta.opens = 1,
        (ExperimentKind::Content, EventKind::Clicked) | (ExperimentKind::Ad, EventKind::Clicked) => {
            delta.clicks = 1
        }
        (ExperimentKind::Content, EventKind::Converted) | (ExperimentKind::Ad, EventKind::Converted) => {
            delta.conversions = 1;
            delta.conversion_value_minor = value_minor.unwrap_or(0).max(0);
        }
        (ExperimentKind::Ad, EventKind::Impression) => delta.impressions = 1,
        (ExperimentKind::Ad, EventKind::Spend) => {
            let amount = value_minor?;
            if amount < 0 {
                return None;
            }
            delta.spend_minor = amount;
        }
        _ => return None,
    }
    Some(delta)
}

/// Bounded recent-id set in front of the append-only raw-event log. Keeps
/// the hot replay path off the database; the `ON CONFLICT DO NOTHING`
/// insert stays authoritative for ids that have aged out.
pub struct DedupWindow {
    seen: HashSet<String>,
    order: VecDeque<String>,
    capacity: usize,
}

impl DedupWindow {
    pub fn new(capacity: usize) -> Self {
        Self {
            seen: HashSet::with_capacity(capacity),
            order: VecDeque::with_capacity(capacity),
            capacity: capacity.max(1),
        }
    }

    /// Whether an id is inside the window.
    pub fn contains(&self, id: &str) -> bool {
        self.seen.contains(id)
    }

    /// Remembers an id, evicting the oldest once at capacity. Callers mark
    /// an id only after the event is durably recorded; a failed write must
    /// not make the retry look like a replay.
    pub fn insert(&mut self, id: &str) {
        if self.seen.contains(id) {
            return;
        }
        if self.order.len() == self.capacity {
            if let Some(oldest) = self.order.pop_front() {
                self.seen.remove(&oldest);
            }
        }
        self.seen.insert(id.to_string());
        self.order.push_back(id.to_string());
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }
}

impl Default for DedupWindow {
    fn default() -> Self {
        DedupWindow::new(10_000)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn content_events_normalize() {
        let d = normalize(ExperimentKind::Content, EventKind::Opened, None).unwrap();
        assert_eq!(d.opens, 1);
        assert!(d.applicable_to(ExperimentKind::Content));
    }

    #[test]
    fn out_of_vocabulary_events_drop() {
        assert!(normalize(ExperimentKind::Content, EventKind::Impression, None).is_none());
        assert!(normalize(ExperimentKind::Content, EventKind::Spend, Some(10)).is_none());
        assert!(normalize(ExperimentKind::Ad, EventKind::Opened, None).is_none());
        assert!(normalize(ExperimentKind::Ad, EventKind::Sent, None).is_none());
    }

    #[test]
    fn spend_requires_non_negative_amount() {
        assert!(normalize(ExperimentKind::Ad, EventKind::Spend, None).is_none());
        assert!(normalize(ExperimentKind::Ad, EventKind::Spend, Some(-5)).is_none());
        let d = normalize(ExperimentKind::Ad, EventKind::Spend, Some(1500)).unwrap();
        assert_eq!(d.spend_minor, 1500);
    }

    #[test]
    fn dedup_window_rejects_replays() {
        let mut w = DedupWindow::new(4);
        assert!(!w.contains("evt-1"));
        w.insert("evt-1");
        assert!(w.contains("evt-1"));
        assert!(!w.contains("evt-2"));
    }

    #[test]
    fn ids_are_remembered_only_once_inserted() {
        let mut w = DedupWindow::new(4);
        // A write that fails downstream never inserts, so the retry is not
        // treated as a replay.
        assert!(!w.contains("evt-1"));
        assert!(!w.contains("evt-1"));
        w.insert("evt-1");
        assert!(w.contains("evt-1"));
        w.insert("evt-1");
        assert_eq!(w.len(), 1);
    }

    #[test]
    fn dedup_window_evicts_oldest() {
        let mut w = DedupWindow::new(2);
        w.insert("a");
        w.insert("b");
        w.insert("c");
        assert_eq!(w.len(), 2);
        // "a" aged out of the window; the database log still catches it.
        assert!(!w.contains("a"));
        assert!(w.contains("b"));
        assert!(w.contains("c"));
    }
}
