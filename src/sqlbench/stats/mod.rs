//! Streaming statistics over per-invocation latencies
//!
//! Both aggregates here run in constant memory per job: `StreamingStats`
//! keeps Welford running moments for the mean/variance/confidence interval,
//! and `StreamingHistogram` buckets latencies by power of two.

mod histogram;
mod streaming;

pub use histogram::StreamingHistogram;
pub use streaming::{norm_inverse_cdf, StreamingStats};
