use chrono::{DateTime, Local};
use std::collections::VecDeque;
use tracing::warn;

use crate::notify::{Notification, NotificationId};

/// Default number of notifications kept
pub const HISTORY_LIMIT: usize = 100;

/// Most-recent-first, bounded list of relayed notifications
///
/// Eviction happens only on insert; deleting never pulls older entries
/// back in.
#[derive(Debug, Clone, PartialEq)]
pub struct History {
    entries: VecDeque<Notification>,
    limit: usize,
}

impl Default for History {
    fn default() -> Self {
        Self::new(HISTORY_LIMIT)
    }
}

impl History {
    /// `limit` is clamped to `1..=HISTORY_LIMIT`
    pub fn new(limit: usize) -> Self {
        let limit = clamp_limit(limit);
        Self {
            entries: VecDeque::with_capacity(limit),
            limit,
        }
    }

    /// Rebuild from persisted records, trimming anything past the limit
    pub fn from_records(records: Vec<Notification>, limit: usize) -> Self {
        let limit = clamp_limit(limit);
        let mut entries: VecDeque<Notification> = records.into();
        entries.truncate(limit);
        Self { entries, limit }
    }

    /// Prepend and return how many old entries were evicted
    pub fn push_front(&mut self, notification: Notification) -> usize {
        self.entries.push_front(notification);
        let evicted = self.entries.len().saturating_sub(self.limit);
        self.entries.truncate(self.limit);
        evicted
    }

    /// Remove the first entry with `id`
    pub fn remove(&mut self, id: &NotificationId) -> Option<Notification> {
        let index = self.entries.iter().position(|n| &n.id == id)?;
        self.entries.remove(index)
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Notification> {
        self.entries.iter()
    }

    pub fn to_vec(&self) -> Vec<Notification> {
        self.entries.iter().cloned().collect()
    }
}

fn clamp_limit(limit: usize) -> usize {
    let clamped = limit.clamp(1, HISTORY_LIMIT);
    if clamped != limit {
        warn!("History limit {} out of range, using {}", limit, clamped);
    }
    clamped
}

/// Count notifications whose local date matches `now`
pub fn count_on_day<'a>(
    entries: impl Iterator<Item = &'a Notification>,
    now: DateTime<Local>,
) -> usize {
    let today = now.date_naive();
    entries
        .filter(|n| n.timestamp.with_timezone(&Local).date_naive() == today)
        .count()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::notify::Priority;
    use chrono::{Duration, Utc};

    fn notification(id: i64) -> Notification {
        Notification {
            id: NotificationId::Number(id),
            title: format!("n{}", id),
            message: String::new(),
            priority: Priority::Info,
            timestamp: Utc::now(),
        }
    }

    fn ids(history: &History) -> Vec<NotificationId> {
        history.iter().map(|n| n.id.clone()).collect()
    }

    #[test]
    fn test_most_recent_first() {
        let mut history = History::default();
        for id in 1..=3 {
            history.push_front(notification(id));
        }
        assert_eq!(
            ids(&history),
            vec![NotificationId::Number(3), NotificationId::Number(2), NotificationId::Number(1)]
        );
    }

    #[test]
    fn test_oldest_evicted_past_limit() {
        let mut history = History::default();
        let mut evicted = 0;
        for id in 1..=101 {
            evicted += history.push_front(notification(id));
        }
        assert_eq!(history.len(), 100);
        assert_eq!(evicted, 1);
        assert_eq!(history.iter().next().unwrap().id, NotificationId::Number(101));
        assert_eq!(history.iter().last().unwrap().id, NotificationId::Number(2));
    }

    #[test]
    fn test_remove_first_match_only() {
        let mut history = History::new(10);
        history.push_front(notification(1));
        history.push_front(notification(2));
        history.push_front(notification(1));

        let removed = history.remove(&NotificationId::Number(1)).unwrap();
        assert_eq!(removed.id, NotificationId::Number(1));
        assert_eq!(ids(&history), vec![NotificationId::Number(2), NotificationId::Number(1)]);
        assert!(history.remove(&NotificationId::Number(999)).is_none());
    }

    #[test]
    fn test_from_records_truncates() {
        let records: Vec<_> = (0..5).rev().map(notification).collect();
        let history = History::from_records(records, 3);
        assert_eq!(
            ids(&history),
            vec![NotificationId::Number(4), NotificationId::Number(3), NotificationId::Number(2)]
        );
    }

    #[test]
    fn test_count_on_day() {
        let mut old = notification(1);
        old.timestamp = Utc::now() - Duration::days(3);
        let entries = vec![notification(2), old];
        assert_eq!(count_on_day(entries.iter(), Local::now()), 1);
    }

    #[test]
    fn test_limit_above_cap_is_clamped() {
        let mut history = History::new(500);
        for id in 1..=150 {
            history.push_front(notification(id));
        }
        assert_eq!(history.len(), HISTORY_LIMIT);

        let records: Vec<_> = (0..150).rev().map(notification).collect();
        assert_eq!(History::from_records(records, 500).len(), HISTORY_LIMIT);
    }

    #[test]
    fn test_zero_limit_keeps_latest() {
        let mut history = History::new(0);
        history.push_front(notification(1));
        history.push_front(notification(2));
        assert_eq!(ids(&history), vec![NotificationId::Number(2)]);
    }
}
