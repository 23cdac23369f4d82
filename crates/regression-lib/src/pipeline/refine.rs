//! Refine-and-emit stage
//!
//! Feeds each sample into its key's accumulator and emits the resulting
//! model coefficients alongside the sample that produced them.

use crate::error::StateError;
use crate::models::{UpdateRecord, UsageSample};
use crate::state::KeyedStateStore;
use tracing::trace;

/// Per-sample model refinement over a keyed state store
pub struct RefineStage<S> {
    store: S,
}

impl<S: KeyedStateStore> RefineStage<S> {
    pub fn new(store: S) -> Self {
        Self { store }
    }

    /// Backing state store
    pub fn store(&self) -> &S {
        &self.store
    }

    /// Refine the sample's model and return the updated coefficients
    ///
    /// State is written back before anything is returned. `Ok(None)` means the
    /// sample was absorbed but the key's fit is still undefined (fewer than
    /// two points, or no spread in event time yet), so nothing is emitted.
    pub fn process(&self, sample: &UsageSample) -> Result<Option<UpdateRecord>, StateError> {
        let key = sample.key();

        let mut accumulator = self.store.get_or_create(&key);
        accumulator.refine(sample.event_time as f64, sample.usage as f64);
        let fit = accumulator.fit();
        let n = accumulator.count();
        self.store.put(&key, accumulator)?;

        let Some(fit) = fit else {
            trace!(key = %key, n = n, "Fit undefined, update suppressed");
            return Ok(None);
        };

        trace!(
            key = %key,
            n = n,
            slope = fit.slope,
            r_squared = fit.r_squared,
            residual = sample.usage as f64 - fit.predict(sample.event_time as f64),
            "Model refined"
        );

        Ok(Some(UpdateRecord {
            machine_id: sample.machine_id.clone(),
            container_id: sample.container_id.clone(),
            intercept: fit.intercept,
            slope: fit.slope,
            slope_std_err: fit.slope_std_err,
            x: sample.event_time,
            y: sample.usage,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ContainerKey;
    use crate::state::InMemoryStateStore;

    fn sample(container: &str, event_time: i64, usage: i64) -> UsageSample {
        UsageSample {
            machine_id: "node-1".to_string(),
            container_id: container.to_string(),
            event_time,
            usage,
        }
    }

    #[test]
    fn test_first_sample_is_suppressed_but_stored() {
        let stage = RefineStage::new(InMemoryStateStore::new());

        let result = stage.process(&sample("redis", 100, 10)).unwrap();
        assert!(result.is_none());

        let key = ContainerKey::new("node-1", "redis");
        assert_eq!(stage.store().get(&key).unwrap().count(), 1);
    }

    #[test]
    fn test_second_sample_emits_exact_line() {
        let stage = RefineStage::new(InMemoryStateStore::new());
        stage.process(&sample("redis", 100, 10)).unwrap();

        let record = stage.process(&sample("redis", 110, 30)).unwrap().unwrap();
        assert_eq!(record.machine_id, "node-1");
        assert_eq!(record.container_id, "redis");
        assert!((record.slope - 2.0).abs() < 1e-12);
        assert!((record.intercept - (-190.0)).abs() < 1e-9);
        assert_eq!(record.slope_std_err, 0.0);
        assert_eq!(record.x, 110);
        assert_eq!(record.y, 30);
    }

    #[test]
    fn test_duplicate_timestamps_stay_suppressed() {
        let stage = RefineStage::new(InMemoryStateStore::new());
        assert!(stage.process(&sample("redis", 100, 10)).unwrap().is_none());
        assert!(stage.process(&sample("redis", 100, 20)).unwrap().is_none());
        assert!(stage.process(&sample("redis", 101, 20)).unwrap().is_some());
    }

    #[test]
    fn test_keys_are_independent() {
        let stage = RefineStage::new(InMemoryStateStore::new());
        stage.process(&sample("b", 0, 5)).unwrap();
        let before = stage.process(&sample("b", 10, 15)).unwrap().unwrap();

        for t in 0..20 {
            stage.process(&sample("a", t, t * t)).unwrap();
        }

        let key_b = ContainerKey::new("node-1", "b");
        let fit_b = stage.store().get(&key_b).unwrap().fit().unwrap();
        assert_eq!(fit_b.slope, before.slope);
        assert_eq!(fit_b.intercept, before.intercept);
        assert_eq!(stage.store().len(), 2);
    }
}
