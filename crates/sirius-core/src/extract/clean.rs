//! Cleaning: suppression of faint detections sitting on the profile of a
//! brighter neighbor.

use tracing::debug;

use crate::consts::{CLEAN_ZONE, EPSILON, MOMENT_DET_MIN, MOMENT_FLOOR};

use super::object::RawObject;

/// Absorb objects that lie inside a brighter object's Mahalanobis ellipse
/// (scaled by `clean_param`) and are fainter than the bright object's
/// modeled profile at their position. Runs to a fixpoint so the result
/// does not depend on detection order.
pub(crate) fn clean(objects: &mut Vec<(RawObject, Vec<u32>)>, clean_param: f64) {
    let zone2 = (CLEAN_ZONE * clean_param) * (CLEAN_ZONE * clean_param);
    let mut removed_total = 0usize;

    loop {
        let mut absorbed: Option<(usize, usize)> = None;

        // Candidate victims from faintest up; absorbers from brightest
        // down. Indices break flux ties so passes are deterministic.
        let mut order: Vec<usize> = (0..objects.len()).collect();
        order.sort_by(|&i, &j| {
            objects[i]
                .0
                .sum_raw
                .total_cmp(&objects[j].0.sum_raw)
                .then(i.cmp(&j))
        });

        'search: for &bi in &order {
            for &ai in order.iter().rev() {
                let a = &objects[ai].0;
                let b = &objects[bi].0;
                if a.sum_raw <= b.sum_raw {
                    break;
                }
                if absorbs(a, b, clean_param, zone2) {
                    absorbed = Some((ai, bi));
                    break 'search;
                }
            }
        }

        match absorbed {
            None => break,
            Some((ai, bi)) => {
                let (victim, mut victim_pixels) = objects.swap_remove(bi);
                // swap_remove may have moved the absorber.
                let ai = if ai == objects.len() { bi } else { ai };
                let (a, a_pixels) = &mut objects[ai];
                a.merge(&victim);
                a_pixels.append(&mut victim_pixels);
                a_pixels.sort_unstable();
                removed_total += 1;
            }
        }
    }

    if removed_total > 0 {
        debug!(removed = removed_total, "cleaning absorbed faint neighbors");
    }
}

/// Does the brighter object `a` swallow `b`?
fn absorbs(a: &RawObject, b: &RawObject, clean_param: f64, zone2: f64) -> bool {
    let (mut x2, mut y2, xy) = a.central_moments();
    let mut det = x2 * y2 - xy * xy;
    if x2 < MOMENT_FLOOR || y2 < MOMENT_FLOOR || det < MOMENT_DET_MIN {
        x2 += MOMENT_FLOOR;
        y2 += MOMENT_FLOOR;
        det = x2 * y2 - xy * xy;
    }

    let (amx, amy) = a.barycenter();
    let (bmx, bmy) = b.barycenter();
    let dx = bmx - amx;
    let dy = bmy - amy;
    let maha2 = (y2 * dx * dx - 2.0 * xy * dx * dy + x2 * dy * dy) / det;
    if maha2 > zone2 {
        return false;
    }

    // Model a as a bivariate Gaussian widened by clean_param; b goes away
    // only when that profile outshines b's own peak at b's position.
    let spread = clean_param * clean_param;
    let amp = a.sum_raw.max(EPSILON) / (2.0 * std::f64::consts::PI * det.sqrt() * spread);
    amp * (-0.5 * maha2 / spread).exp() >= b.peak as f64
}
