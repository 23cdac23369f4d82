//! Freshest-of-N count window reducer
//!
//! Buffers update records per key in tumbling count windows. When a window
//! fills, the record with the greatest `x` (the most recent model) is
//! forwarded and the window starts over. Partially filled windows are never
//! flushed.

use crate::models::{ContainerKey, UpdateRecord};
use std::collections::HashMap;

/// Records per window unless configured otherwise
pub const DEFAULT_WINDOW_SIZE: usize = 10;

/// Tumbling count window per key, reduced by maximum `x`
#[derive(Debug)]
pub struct FreshestReducer {
    window_size: usize,
    windows: HashMap<ContainerKey, Vec<UpdateRecord>>,
}

impl FreshestReducer {
    /// Create a reducer; a zero window size is treated as one
    pub fn new(window_size: usize) -> Self {
        Self {
            window_size: window_size.max(1),
            windows: HashMap::new(),
        }
    }

    pub fn window_size(&self) -> usize {
        self.window_size
    }

    /// Add a record to its key's window
    ///
    /// Returns the freshest record of the window once it holds exactly
    /// `window_size` records, and resets that window.
    pub fn push(&mut self, record: UpdateRecord) -> Option<UpdateRecord> {
        let key = record.key();
        let window = self
            .windows
            .entry(key.clone())
            .or_insert_with(|| Vec::with_capacity(self.window_size));
        window.push(record);

        if window.len() < self.window_size {
            return None;
        }

        let full = self.windows.remove(&key)?;
        freshest(full)
    }

    /// Number of records waiting in `key`'s open window
    pub fn pending(&self, key: &ContainerKey) -> usize {
        self.windows.get(key).map(Vec::len).unwrap_or(0)
    }

    /// Number of keys with an open window
    pub fn open_windows(&self) -> usize {
        self.windows.len()
    }

    /// Copy of every open window, sorted by key
    pub fn snapshot(&self) -> Vec<(ContainerKey, Vec<UpdateRecord>)> {
        let mut entries: Vec<_> = self
            .windows
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        entries.sort_by(|a, b| a.0.cmp(&b.0));
        entries
    }

    /// Replace all open windows with a previous snapshot
    pub fn restore(&mut self, entries: Vec<(ContainerKey, Vec<UpdateRecord>)>) {
        self.windows.clear();
        for (key, mut records) in entries {
            // A window can only be restored partially filled
            records.truncate(self.window_size - 1);
            if !records.is_empty() {
                self.windows.insert(key, records);
            }
        }
    }
}

impl Default for FreshestReducer {
    fn default() -> Self {
        Self::new(DEFAULT_WINDOW_SIZE)
    }
}

/// Record with the maximum `x`; the earliest one wins a tie
fn freshest(records: Vec<UpdateRecord>) -> Option<UpdateRecord> {
    records
        .into_iter()
        .reduce(|best, candidate| if candidate.x > best.x { candidate } else { best })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(container: &str, x: i64, y: i64) -> UpdateRecord {
        UpdateRecord {
            machine_id: "node-1".to_string(),
            container_id: container.to_string(),
            intercept: 0.0,
            slope: 1.0,
            slope_std_err: 0.0,
            x,
            y,
        }
    }

    #[test]
    fn test_nothing_before_tenth_record() {
        let mut reducer = FreshestReducer::default();
        for i in 0..9 {
            assert!(reducer.push(record("redis", i, 0)).is_none());
        }
        assert_eq!(reducer.pending(&ContainerKey::new("node-1", "redis")), 9);
    }

    #[test]
    fn test_emits_max_x_for_any_order() {
        let orders: [[i64; 10]; 3] = [
            [0, 1, 2, 3, 4, 5, 6, 7, 8, 9],
            [9, 8, 7, 6, 5, 4, 3, 2, 1, 0],
            [4, 7, 1, 9, 0, 3, 8, 2, 6, 5],
        ];

        for order in orders {
            let mut reducer = FreshestReducer::default();
            let mut emitted = Vec::new();
            for x in order {
                if let Some(out) = reducer.push(record("redis", 100 + x, x)) {
                    emitted.push(out);
                }
            }
            assert_eq!(emitted.len(), 1);
            assert_eq!(emitted[0].x, 109);
        }
    }

    #[test]
    fn test_first_maximum_wins_ties() {
        let mut reducer = FreshestReducer::default();
        let xs = [5, 9, 3, 9, 1, 9, 2, 0, 4, 6];
        let mut out = None;
        for (i, x) in xs.iter().enumerate() {
            out = reducer.push(record("redis", *x, i as i64));
        }

        let out = out.unwrap();
        assert_eq!(out.x, 9);
        assert_eq!(out.y, 1);
    }

    #[test]
    fn test_windows_tumble() {
        let mut reducer = FreshestReducer::default();
        let mut emitted = Vec::new();
        for x in 0..25 {
            if let Some(out) = reducer.push(record("redis", x, 0)) {
                emitted.push(out.x);
            }
        }
        assert_eq!(emitted, vec![9, 19]);
        assert_eq!(reducer.pending(&ContainerKey::new("node-1", "redis")), 5);
    }

    #[test]
    fn test_keys_have_separate_windows() {
        let mut reducer = FreshestReducer::default();
        for x in 0..9 {
            assert!(reducer.push(record("a", x, 0)).is_none());
            assert!(reducer.push(record("b", x + 100, 0)).is_none());
        }

        assert_eq!(reducer.push(record("a", 9, 0)).unwrap().container_id, "a");
        assert_eq!(reducer.open_windows(), 1);
        assert_eq!(reducer.push(record("b", 50, 0)).unwrap().x, 108);
    }

    #[test]
    fn test_custom_window_size() {
        let mut reducer = FreshestReducer::new(3);
        assert!(reducer.push(record("redis", 2, 0)).is_none());
        assert!(reducer.push(record("redis", 7, 0)).is_none());
        assert_eq!(reducer.push(record("redis", 5, 0)).unwrap().x, 7);

        let mut single = FreshestReducer::new(0);
        assert_eq!(single.window_size(), 1);
        assert_eq!(single.push(record("redis", 1, 0)).unwrap().x, 1);
    }

    #[test]
    fn test_snapshot_restore_continues_window() {
        let mut reducer = FreshestReducer::default();
        for x in 0..6 {
            reducer.push(record("redis", x, 0));
        }

        let mut restored = FreshestReducer::default();
        restored.restore(reducer.snapshot());

        let mut out = None;
        for x in [20, 6, 7, 8] {
            out = restored.push(record("redis", x, 0));
        }
        assert_eq!(out.unwrap().x, 20);
    }
}
