//! Robust per-tile statistics.

use crate::consts::{
    BKG_CLIP_EPS, BKG_CLIP_MAX_ITER, BKG_CLIP_SIGMA, BKG_MODE_MEAN_COEFF, BKG_MODE_MEDIAN_COEFF,
    BKG_SKEW_TRIGGER, EPSILON,
};

/// Clipped background level and scatter of one tile.
#[derive(Clone, Copy, Debug)]
pub(crate) struct TileStats {
    pub back: f64,
    pub sigma: f64,
}

/// Iteratively clipped mean and standard deviation of `samples`.
///
/// Sorts the samples, then tightens a [mean - 3s, mean + 3s] window until
/// sigma stabilizes. On a sorted array the survivors of a symmetric value
/// cut form a contiguous range, so clipping is just moving two cursors.
/// Strongly skewed tiles (source contamination) fall back to the mode
/// estimate 2.5 * median - 1.5 * mean.
pub(crate) fn clipped_stats(samples: &mut [f32]) -> TileStats {
    debug_assert!(!samples.is_empty());
    samples.sort_unstable_by(|a, b| a.total_cmp(b));

    let mut lo = 0usize;
    let mut hi = samples.len();
    let (mut mean, mut sigma) = mean_sigma(&samples[lo..hi]);

    for _ in 0..BKG_CLIP_MAX_ITER {
        if sigma <= EPSILON {
            break;
        }
        let lo_cut = (mean - BKG_CLIP_SIGMA * sigma) as f32;
        let hi_cut = (mean + BKG_CLIP_SIGMA * sigma) as f32;
        let prev_lo = lo;
        let prev_hi = hi;
        while lo < hi && samples[lo] < lo_cut {
            lo += 1;
        }
        while hi > lo && samples[hi - 1] > hi_cut {
            hi -= 1;
        }
        if hi == lo {
            // Everything clipped away; keep the last stable estimate.
            lo = prev_lo;
            hi = prev_hi;
            break;
        }
        let prev_sigma = sigma;
        let (m, s) = mean_sigma(&samples[lo..hi]);
        mean = m;
        sigma = s;
        if lo == prev_lo && hi == prev_hi {
            break;
        }
        if (prev_sigma - sigma).abs() <= BKG_CLIP_EPS * prev_sigma {
            break;
        }
    }

    let median = window_median(&samples[lo..hi]);
    let back = if sigma > EPSILON && (mean - median).abs() / sigma > BKG_SKEW_TRIGGER {
        BKG_MODE_MEDIAN_COEFF * median - BKG_MODE_MEAN_COEFF * mean
    } else {
        mean
    };

    TileStats { back, sigma }
}

fn mean_sigma(window: &[f32]) -> (f64, f64) {
    let n = window.len() as f64;
    let mut sum = 0.0f64;
    for &v in window {
        sum += v as f64;
    }
    let mean = sum / n;
    let mut var = 0.0f64;
    for &v in window {
        let d = v as f64 - mean;
        var += d * d;
    }
    (mean, (var / n).sqrt())
}

fn window_median(window: &[f32]) -> f64 {
    let n = window.len();
    if n % 2 == 1 {
        window[n / 2] as f64
    } else {
        (window[n / 2 - 1] as f64 + window[n / 2] as f64) / 2.0
    }
}

/// Median of an unsorted scratch buffer. Used for the tile-grid filter and
/// the global summary values.
pub(crate) fn median(scratch: &mut [f64]) -> f64 {
    if scratch.is_empty() {
        return 0.0;
    }
    scratch.sort_unstable_by(|a, b| a.total_cmp(b));
    let n = scratch.len();
    if n % 2 == 1 {
        scratch[n / 2]
    } else {
        (scratch[n / 2 - 1] + scratch[n / 2]) / 2.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn constant_tile_has_zero_sigma() {
        let mut samples = vec![3.0f32; 100];
        let stats = clipped_stats(&mut samples);
        assert_eq!(stats.back, 3.0);
        assert_eq!(stats.sigma, 0.0);
    }

    #[test]
    fn outliers_are_clipped() {
        // 99 background samples around 10, one bright source pixel.
        let mut samples: Vec<f32> = (0..99).map(|i| 10.0 + 0.01 * (i % 7) as f32).collect();
        samples.push(5000.0);
        let stats = clipped_stats(&mut samples);
        assert!(
            (stats.back - 10.0).abs() < 0.1,
            "clipped level {} should be near 10",
            stats.back
        );
    }

    #[test]
    fn median_odd_even() {
        let mut odd = vec![3.0, 1.0, 2.0];
        assert_eq!(median(&mut odd), 2.0);
        let mut even = vec![4.0, 1.0, 3.0, 2.0];
        assert_eq!(median(&mut even), 2.5);
    }
}
