//! Scheduling Primitives
//!
//! Two timer-free building blocks driven by explicit instants:
//!
//! - [`Debouncer`]: per-key quiet-period tracking; every new value for a key
//!   restarts that key's window and replaces the pending value.
//! - [`Batcher`]: collects keys into a window that opens with the first key
//!   and is not extended by later ones.
//!
//! Neither sleeps. The owner asks for the next deadline, waits for it however
//! it likes, and then takes what is due.

use std::collections::HashMap;
use std::hash::Hash;
use std::time::Duration;

use tokio::time::Instant;

// == Debouncer ==
#[derive(Debug)]
pub struct Debouncer<K, V> {
    delay: Duration,
    pending: HashMap<K, (Instant, V)>,
}

impl<K: Eq + Hash + Clone, V> Debouncer<K, V> {
    pub fn new(delay: Duration) -> Self {
        Self {
            delay,
            pending: HashMap::new(),
        }
    }

    /// Records `value` for `key`, due `delay` after `now`.
    pub fn schedule(&mut self, key: K, value: V, now: Instant) {
        self.pending.insert(key, (now + self.delay, value));
    }

    /// Drops the pending value for `key`.
    pub fn cancel(&mut self, key: &K) -> Option<V> {
        self.pending.remove(key).map(|(_, value)| value)
    }

    /// Drops every pending value matching `pred`. Returns how many were dropped.
    pub fn cancel_where(&mut self, mut pred: impl FnMut(&K, &V) -> bool) -> usize {
        let before = self.pending.len();
        self.pending.retain(|key, (_, value)| !pred(key, &*value));
        before - self.pending.len()
    }

    pub fn clear(&mut self) {
        self.pending.clear();
    }

    /// Earliest deadline among pending keys.
    pub fn next_deadline(&self) -> Option<Instant> {
        self.pending.values().map(|(deadline, _)| *deadline).min()
    }

    /// Removes and returns every value whose quiet period has elapsed, in
    /// deadline order.
    pub fn take_due(&mut self, now: Instant) -> Vec<(K, V)> {
        let due: Vec<K> = self
            .pending
            .iter()
            .filter(|(_, (deadline, _))| *deadline <= now)
            .map(|(key, _)| key.clone())
            .collect();

        let mut taken: Vec<(Instant, K, V)> = due
            .into_iter()
            .filter_map(|key| {
                let (deadline, value) = self.pending.remove(&key)?;
                Some((deadline, key, value))
            })
            .collect();
        taken.sort_by_key(|(deadline, _, _)| *deadline);
        taken.into_iter().map(|(_, key, value)| (key, value)).collect()
    }

    /// Removes and returns every pending value, due or not.
    pub fn drain(&mut self) -> Vec<(K, V)> {
        let mut taken: Vec<(Instant, K, V)> = self
            .pending
            .drain()
            .map(|(key, (deadline, value))| (deadline, key, value))
            .collect();
        taken.sort_by_key(|(deadline, _, _)| *deadline);
        taken.into_iter().map(|(_, key, value)| (key, value)).collect()
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }
}

// == Batcher ==
#[derive(Debug)]
pub struct Batcher<K> {
    window: Duration,
    queued: Vec<K>,
    deadline: Option<Instant>,
}

impl<K: PartialEq> Batcher<K> {
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            queued: Vec::new(),
            deadline: None,
        }
    }

    /// Queues `key` and opens the window if none is open.
    pub fn push(&mut self, key: K, now: Instant) {
        if !self.queued.contains(&key) {
            self.queued.push(key);
        }
        self.arm(now);
    }

    /// Opens the window without queueing a key.
    pub fn arm(&mut self, now: Instant) {
        if self.deadline.is_none() {
            self.deadline = Some(now + self.window);
        }
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Closes the window and returns the batch if the window has elapsed.
    pub fn take_if_due(&mut self, now: Instant) -> Option<Vec<K>> {
        match self.deadline {
            Some(deadline) if deadline <= now => Some(self.take()),
            _ => None,
        }
    }

    /// Closes the window and returns the batch regardless of time.
    pub fn take(&mut self) -> Vec<K> {
        self.deadline = None;
        std::mem::take(&mut self.queued)
    }

    /// Closes the window and forgets queued keys.
    pub fn cancel(&mut self) {
        self.deadline = None;
        self.queued.clear();
    }

    pub fn is_armed(&self) -> bool {
        self.deadline.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MS: Duration = Duration::from_millis(1);

    #[test]
    fn test_debounce_restarts_window_and_keeps_last_value() {
        let start = Instant::now();
        let mut debouncer = Debouncer::new(2000 * MS);

        for (i, text) in ["H", "He", "Hel", "Hell", "Hello"].into_iter().enumerate() {
            debouncer.schedule("field", text, start + (i as u32 * 100) * MS);
        }

        assert_eq!(debouncer.len(), 1);
        assert_eq!(debouncer.next_deadline(), Some(start + 2400 * MS));
        assert!(debouncer.take_due(start + 2399 * MS).is_empty());
        assert_eq!(debouncer.take_due(start + 2400 * MS), vec![("field", "Hello")]);
        assert!(debouncer.is_empty());
    }

    #[test]
    fn test_debounce_keys_are_independent() {
        let start = Instant::now();
        let mut debouncer = Debouncer::new(100 * MS);

        debouncer.schedule("a", 1, start);
        debouncer.schedule("b", 2, start + 50 * MS);

        assert_eq!(debouncer.take_due(start + 100 * MS), vec![("a", 1)]);
        assert_eq!(debouncer.next_deadline(), Some(start + 150 * MS));
        assert_eq!(debouncer.take_due(start + 200 * MS), vec![("b", 2)]);
    }

    #[test]
    fn test_debounce_cancel_and_drain() {
        let start = Instant::now();
        let mut debouncer = Debouncer::new(100 * MS);

        debouncer.schedule("a", 1, start + 10 * MS);
        debouncer.schedule("b", 2, start);
        debouncer.schedule("c", 3, start);

        assert_eq!(debouncer.cancel(&"c"), Some(3));
        assert_eq!(debouncer.drain(), vec![("b", 2), ("a", 1)]);
        assert_eq!(debouncer.next_deadline(), None);
    }

    #[test]
    fn test_debounce_cancel_where() {
        let start = Instant::now();
        let mut debouncer = Debouncer::new(100 * MS);

        debouncer.schedule("/a:title", "x", start);
        debouncer.schedule("/b:title", "y", start);
        debouncer.schedule("/b:body", "z", start);

        assert_eq!(debouncer.cancel_where(|key, _| key.ends_with(":title")), 2);
        assert_eq!(debouncer.drain(), vec![("/b:body", "z")]);
    }

    #[test]
    fn test_batch_window_not_restarted() {
        let start = Instant::now();
        let mut batcher = Batcher::new(100 * MS);

        batcher.push("a", start);
        batcher.push("b", start + 60 * MS);
        batcher.push("a", start + 90 * MS);

        assert_eq!(batcher.deadline(), Some(start + 100 * MS));
        assert_eq!(batcher.take_if_due(start + 99 * MS), None);
        assert_eq!(batcher.take_if_due(start + 100 * MS), Some(vec!["a", "b"]));
        assert!(!batcher.is_armed());
    }

    #[test]
    fn test_batch_arm_and_cancel() {
        let start = Instant::now();
        let mut batcher: Batcher<&str> = Batcher::new(100 * MS);

        batcher.arm(start);
        assert_eq!(batcher.take_if_due(start + 100 * MS), Some(vec![]));

        batcher.push("x", start);
        batcher.cancel();
        assert_eq!(batcher.deadline(), None);
        assert!(batcher.take().is_empty());
    }
}
