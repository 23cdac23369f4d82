//! Event-time watermark tracking
//!
//! Bounded out-of-orderness: the watermark trails the greatest event time
//! seen by a fixed allowed lateness.

use std::time::Duration;

#[derive(Debug, Clone)]
pub struct WatermarkTracker {
    max_event_time: Option<i64>,
    allowed_lateness: i64,
}

impl WatermarkTracker {
    pub fn new(allowed_lateness: Duration) -> Self {
        Self {
            max_event_time: None,
            allowed_lateness: allowed_lateness.as_secs() as i64,
        }
    }

    /// Record an event time
    pub fn observe(&mut self, event_time: i64) {
        self.max_event_time = Some(match self.max_event_time {
            Some(max) => max.max(event_time),
            None => event_time,
        });
    }

    /// Current watermark, or `None` before the first event
    pub fn current(&self) -> Option<i64> {
        self.max_event_time
            .map(|max| max.saturating_sub(self.allowed_lateness))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_watermark_trails_max_event_time() {
        let mut tracker = WatermarkTracker::new(Duration::from_secs(5));
        assert_eq!(tracker.current(), None);

        tracker.observe(100);
        tracker.observe(120);
        tracker.observe(110);
        assert_eq!(tracker.current(), Some(115));
    }

    #[test]
    fn test_watermark_without_lateness() {
        let mut tracker = WatermarkTracker::new(Duration::ZERO);
        tracker.observe(42);
        assert_eq!(tracker.current(), Some(42));
    }
}
