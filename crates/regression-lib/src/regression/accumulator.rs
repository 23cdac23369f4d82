//! Incremental ordinary-least-squares accumulator
//!
//! Keeps the sufficient statistics of a simple linear regression so the fit
//! can be derived in O(1) after every new point, without retaining history.
//!
//! Epoch-second x values are around 1.7e9, so raw sums of squares overflow the
//! f64 mantissa long before anything useful is learned. The second-order
//! statistics are therefore kept centred on the running means and updated
//! with Welford's method; the raw sums are exposed as derived values.

use serde::{Deserialize, Serialize};

/// Running regression statistics for one key
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Accumulator {
    n: u64,
    sum_x: f64,
    sum_y: f64,
    /// Running means, used as the centring point for the moments below
    mean_x: f64,
    mean_y: f64,
    /// Σ(x - x̄)²
    sxx: f64,
    /// Σ(x - x̄)(y - ȳ)
    sxy: f64,
    /// Σ(y - ȳ)²
    syy: f64,
}

impl Accumulator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Absorb one `(x, y)` observation
    pub fn refine(&mut self, x: f64, y: f64) {
        if self.n == 0 {
            self.mean_x = x;
            self.mean_y = y;
        } else {
            let n = self.n as f64;
            let weight = n / (n + 1.0);
            let dx = x - self.mean_x;
            let dy = y - self.mean_y;

            self.sxx += dx * dx * weight;
            self.syy += dy * dy * weight;
            self.sxy += dx * dy * weight;
            self.mean_x += dx / (n + 1.0);
            self.mean_y += dy / (n + 1.0);
        }

        self.sum_x += x;
        self.sum_y += y;
        self.n += 1;
    }

    /// Number of observations absorbed
    pub fn count(&self) -> u64 {
        self.n
    }

    pub fn sum_x(&self) -> f64 {
        self.sum_x
    }

    pub fn sum_y(&self) -> f64 {
        self.sum_y
    }

    /// Σx², reconstructed from the centred moment
    pub fn sum_xx(&self) -> f64 {
        self.sxx + self.n as f64 * self.mean_x * self.mean_x
    }

    /// Σxy, reconstructed from the centred moment
    pub fn sum_xy(&self) -> f64 {
        self.sxy + self.n as f64 * self.mean_x * self.mean_y
    }

    /// Σy², reconstructed from the centred moment
    pub fn sum_yy(&self) -> f64 {
        self.syy + self.n as f64 * self.mean_y * self.mean_y
    }

    /// Current least-squares fit
    ///
    /// Returns `None` while fewer than two points have been seen or while
    /// every observed x is identical, since the slope is undefined then.
    pub fn fit(&self) -> Option<RegressionFit> {
        if self.n < 2 || self.sxx <= 0.0 {
            return None;
        }

        let n = self.n as f64;
        let slope = self.sxy / self.sxx;
        let intercept = (self.sum_y - slope * self.sum_x) / n;
        let sse = (self.syy - self.sxy * self.sxy / self.sxx).max(0.0);

        // Two points always lie on the fitted line
        let slope_std_err = if self.n > 2 {
            ((sse / (n - 2.0)) / self.sxx).sqrt()
        } else {
            0.0
        };

        let r_squared = if self.syy > 0.0 {
            (1.0 - sse / self.syy).clamp(0.0, 1.0)
        } else {
            1.0
        };

        Some(RegressionFit {
            n: self.n,
            intercept,
            slope,
            slope_std_err,
            r_squared,
        })
    }
}

/// Coefficients of a defined least-squares fit
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RegressionFit {
    /// Number of observations behind the fit
    pub n: u64,
    pub intercept: f64,
    pub slope: f64,
    /// Standard error of the slope estimate
    pub slope_std_err: f64,
    /// Coefficient of determination
    pub r_squared: f64,
}

impl RegressionFit {
    /// Predicted y at `x`
    pub fn predict(&self, x: f64) -> f64 {
        self.intercept + self.slope * x
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn approx_eq(a: f64, b: f64, tolerance: f64) -> bool {
        (a - b).abs() <= tolerance * b.abs().max(1.0)
    }

    #[test]
    fn test_fresh_accumulator_has_no_fit() {
        let acc = Accumulator::new();
        assert_eq!(acc.count(), 0);
        assert!(acc.fit().is_none());
    }

    #[test]
    fn test_single_point_has_no_fit() {
        let mut acc = Accumulator::new();
        acc.refine(10.0, 5.0);
        assert_eq!(acc.count(), 1);
        assert!(acc.fit().is_none());
    }

    #[test]
    fn test_counts_and_sums_track_every_point() {
        let points = [(3.0, 7.0), (1.0, -2.0), (8.0, 4.5), (2.0, 0.0), (5.0, 9.0)];
        let mut acc = Accumulator::new();
        for &(x, y) in &points {
            acc.refine(x, y);
        }

        let sum_x: f64 = points.iter().map(|(x, _)| x).sum();
        let sum_y: f64 = points.iter().map(|(_, y)| y).sum();
        let sum_xx: f64 = points.iter().map(|(x, _)| x * x).sum();
        let sum_xy: f64 = points.iter().map(|(x, y)| x * y).sum();
        let sum_yy: f64 = points.iter().map(|(_, y)| y * y).sum();

        assert_eq!(acc.count(), points.len() as u64);
        assert_eq!(acc.sum_x(), sum_x);
        assert_eq!(acc.sum_y(), sum_y);
        assert!(approx_eq(acc.sum_xx(), sum_xx, 1e-12));
        assert!(approx_eq(acc.sum_xy(), sum_xy, 1e-12));
        assert!(approx_eq(acc.sum_yy(), sum_yy, 1e-12));
    }

    #[test]
    fn test_two_points_define_the_line() {
        let (x1, y1) = (1_500_000_000.0, 2_000_000.0);
        let (x2, y2) = (1_500_000_060.0, 2_600_000.0);

        let mut acc = Accumulator::new();
        acc.refine(x1, y1);
        acc.refine(x2, y2);

        let fit = acc.fit().unwrap();
        assert!(approx_eq(fit.slope, (y2 - y1) / (x2 - x1), 1e-9));
        assert!((fit.predict(x1) - y1).abs() < 1e-2);
        assert!((fit.predict(x2) - y2).abs() < 1e-2);
        assert_eq!(fit.slope_std_err, 0.0);
    }

    #[test]
    fn test_collinear_points_have_zero_error() {
        let (m, b) = (2.5, -40.0);
        let mut acc = Accumulator::new();

        for i in 0..50 {
            let x = i as f64 * 3.0;
            acc.refine(x, m * x + b);

            if let Some(fit) = acc.fit() {
                assert!(approx_eq(fit.slope, m, 1e-9));
                assert!(approx_eq(fit.intercept, b, 1e-9));
                assert!(fit.slope_std_err / m < 1e-6);
                assert!(approx_eq(fit.r_squared, 1.0, 1e-9));
            }
        }
    }

    #[test]
    fn test_collinear_points_at_epoch_scale() {
        let (m, b) = (1024.0, 50_000_000.0);
        let t0 = 1_700_000_000.0;
        let mut acc = Accumulator::new();

        for i in 0..500 {
            let x = t0 + i as f64 * 10.0;
            acc.refine(x, m * (x - t0) + b);
        }

        let fit = acc.fit().unwrap();
        assert!(approx_eq(fit.slope, m, 1e-9));
        assert!(fit.slope_std_err / m < 1e-6);
    }

    #[test]
    fn test_noisy_points_match_batch_regression() {
        let points = [(1.0, 2.1), (2.0, 3.9), (3.0, 6.2), (4.0, 7.8), (5.0, 10.1)];
        let mut acc = Accumulator::new();
        for &(x, y) in &points {
            acc.refine(x, y);
        }

        // Batch OLS reference
        let n = points.len() as f64;
        let mean_x = points.iter().map(|p| p.0).sum::<f64>() / n;
        let mean_y = points.iter().map(|p| p.1).sum::<f64>() / n;
        let sxx: f64 = points.iter().map(|p| (p.0 - mean_x).powi(2)).sum();
        let sxy: f64 = points.iter().map(|p| (p.0 - mean_x) * (p.1 - mean_y)).sum();
        let slope = sxy / sxx;
        let intercept = mean_y - slope * mean_x;
        let sse: f64 = points
            .iter()
            .map(|p| (p.1 - (intercept + slope * p.0)).powi(2))
            .sum();
        let std_err = ((sse / (n - 2.0)) / sxx).sqrt();

        let fit = acc.fit().unwrap();
        assert!(approx_eq(fit.slope, slope, 1e-12));
        assert!(approx_eq(fit.intercept, intercept, 1e-12));
        assert!(approx_eq(fit.slope_std_err, std_err, 1e-9));
        assert!(fit.r_squared > 0.99 && fit.r_squared < 1.0);
    }

    #[test]
    fn test_identical_x_has_no_fit() {
        let mut acc = Accumulator::new();
        for y in [1.0, 5.0, 9.0] {
            acc.refine(42.0, y);
        }
        assert_eq!(acc.count(), 3);
        assert!(acc.fit().is_none());
    }

    #[test]
    fn test_accumulator_serde_round_trip_preserves_fit() {
        let mut acc = Accumulator::new();
        for i in 0..7 {
            acc.refine(i as f64, (i * i) as f64);
        }

        let json = serde_json::to_string(&acc).unwrap();
        let restored: Accumulator = serde_json::from_str(&json).unwrap();
        assert_eq!(restored, acc);
        assert_eq!(restored.fit(), acc.fit());
    }
}
