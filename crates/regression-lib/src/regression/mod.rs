//! Online linear regression
//!
//! One [`Accumulator`] is kept per container key. It absorbs usage samples
//! one at a time and yields the current least-squares fit of usage over
//! event time.

mod accumulator;

pub use accumulator::{Accumulator, RegressionFit};
