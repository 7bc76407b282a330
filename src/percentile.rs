//! Percentile computation over integer sample series.
//!
//! Uses the linear-interpolation rank method: rank = p/100 * (n-1), the
//! result interpolates between the two neighbouring sorted samples. The same
//! routine backs both the polling and range-query metrics providers.

/// Supported percentiles for usage statistics.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Percentile {
    P50,
    P90,
    P99,
}

impl Percentile {
    pub fn as_f64(&self) -> f64 {
        match self {
            Self::P50 => 50.0,
            Self::P90 => 90.0,
            Self::P99 => 99.0,
        }
    }
}

/// Compute the p-th percentile of `samples` with linear interpolation.
///
/// An empty series yields 0 (callers decide whether that is an error). A
/// single sample is returned for every percentile. Monotone by construction:
/// `percentile(s, P50) <= percentile(s, P90) <= percentile(s, P99)`.
pub fn percentile(samples: &[u64], p: Percentile) -> u64 {
    if samples.is_empty() {
        return 0;
    }

    let mut sorted = samples.to_vec();
    sorted.sort_unstable();

    let n = sorted.len();
    if n == 1 {
        return sorted[0];
    }

    let rank = p.as_f64() / 100.0 * (n - 1) as f64;
    let i = rank.floor() as usize;
    let fraction = rank - i as f64;

    if i + 1 >= n {
        return sorted[n - 1];
    }

    let lower = sorted[i];
    let upper = sorted[i + 1];
    // Interpolate on the delta to stay inside u64 even for large magnitudes.
    lower + (fraction * (upper - lower) as f64).floor() as u64
}
