//! Provisional object records and moment analysis.

use ndarray::Array2;

use crate::consts::{EPSILON, MOMENT_DET_MIN, MOMENT_FLOOR};
use crate::filter::Threshold;
use crate::flags::OBJ_TRUNC;
use crate::image::Planes;

use super::pixstack::NONE;

/// A detection being accumulated. Moments are kept as running sums in
/// double precision; central moments and the ellipse are derived later in
/// [`analyse`].
#[derive(Clone, Debug)]
pub(crate) struct RawObject {
    pub xmin: usize,
    pub xmax: usize,
    pub ymin: usize,
    pub ymax: usize,
    pub npix: usize,
    /// Member pixels whose unconvolved value exceeds the data-units
    /// threshold.
    pub tnpix: usize,
    pub flag: u16,
    /// Data-units threshold at the detection peak.
    pub thresh: f32,
    /// Detection-units threshold at the detection peak (ladder base for
    /// deblending).
    pub dthresh: f32,
    /// Sums over the detection (convolved) plane.
    pub sum_v: f64,
    pub sum_vx: f64,
    pub sum_vy: f64,
    pub sum_vxx: f64,
    pub sum_vyy: f64,
    pub sum_vxy: f64,
    /// Sum over the measurement (unconvolved) plane.
    pub sum_raw: f64,
    pub peak: f32,
    pub xpeak: usize,
    pub ypeak: usize,
    pub cpeak: f32,
    pub xcpeak: usize,
    pub ycpeak: usize,
    /// Pixel chain in the shared stack (NONE when the list lives
    /// elsewhere).
    pub head: u32,
    pub tail: u32,
    /// Last row that contributed a pixel; drives finalization.
    pub last_row: usize,
}

impl RawObject {
    pub fn seed(x: usize, y: usize) -> Self {
        Self {
            xmin: x,
            xmax: x,
            ymin: y,
            ymax: y,
            npix: 0,
            tnpix: 0,
            flag: 0,
            thresh: 0.0,
            dthresh: 0.0,
            sum_v: 0.0,
            sum_vx: 0.0,
            sum_vy: 0.0,
            sum_vxx: 0.0,
            sum_vyy: 0.0,
            sum_vxy: 0.0,
            sum_raw: 0.0,
            peak: f32::NEG_INFINITY,
            xpeak: x,
            ypeak: y,
            cpeak: f32::NEG_INFINITY,
            xcpeak: x,
            ycpeak: y,
            head: NONE,
            tail: NONE,
            last_row: y,
        }
    }

    /// Fold one pixel into the running sums. The pixel chain is managed by
    /// the caller.
    #[allow(clippy::too_many_arguments)]
    pub fn add_pixel(
        &mut self,
        x: usize,
        y: usize,
        cval: f32,
        rval: f32,
        tpix: f32,
        tdet: f32,
        width: usize,
        height: usize,
    ) {
        self.xmin = self.xmin.min(x);
        self.xmax = self.xmax.max(x);
        self.ymin = self.ymin.min(y);
        self.ymax = self.ymax.max(y);
        self.npix += 1;
        if rval > tpix {
            self.tnpix += 1;
        }
        if x == 0 || x == width - 1 || y == 0 || y == height - 1 {
            self.flag |= OBJ_TRUNC;
        }

        let v = cval as f64;
        let xf = x as f64;
        let yf = y as f64;
        self.sum_v += v;
        self.sum_vx += v * xf;
        self.sum_vy += v * yf;
        self.sum_vxx += v * xf * xf;
        self.sum_vyy += v * yf * yf;
        self.sum_vxy += v * xf * yf;
        self.sum_raw += rval as f64;

        if rval > self.peak {
            self.peak = rval;
            self.xpeak = x;
            self.ypeak = y;
        }
        if cval > self.cpeak {
            self.cpeak = cval;
            self.xcpeak = x;
            self.ycpeak = y;
            self.thresh = tpix;
            self.dthresh = tdet;
        }
        self.last_row = y;
    }

    /// Merge `other` into self (union of two provisional objects).
    pub fn merge(&mut self, other: &RawObject) {
        self.xmin = self.xmin.min(other.xmin);
        self.xmax = self.xmax.max(other.xmax);
        self.ymin = self.ymin.min(other.ymin);
        self.ymax = self.ymax.max(other.ymax);
        self.npix += other.npix;
        self.tnpix += other.tnpix;
        self.flag |= other.flag;
        self.sum_v += other.sum_v;
        self.sum_vx += other.sum_vx;
        self.sum_vy += other.sum_vy;
        self.sum_vxx += other.sum_vxx;
        self.sum_vyy += other.sum_vyy;
        self.sum_vxy += other.sum_vxy;
        self.sum_raw += other.sum_raw;
        if other.peak > self.peak {
            self.peak = other.peak;
            self.xpeak = other.xpeak;
            self.ypeak = other.ypeak;
        }
        if other.cpeak > self.cpeak {
            self.cpeak = other.cpeak;
            self.xcpeak = other.xcpeak;
            self.ycpeak = other.ycpeak;
            self.thresh = other.thresh;
            self.dthresh = other.dthresh;
        }
        self.last_row = self.last_row.max(other.last_row);
    }

    /// Build a record from an explicit pixel set (deblending and cleaning
    /// construct objects this way; the chain fields stay NONE).
    pub fn from_pixels(
        pixels: &[u32],
        conv: &Array2<f32>,
        raw: &Array2<f32>,
        pix_thresh: &Threshold,
        det_thresh: &Threshold,
        width: usize,
        height: usize,
    ) -> Self {
        debug_assert!(!pixels.is_empty());
        let first = pixels[0] as usize;
        let mut obj = Self::seed(first % width, first / width);
        for &p in pixels {
            let x = p as usize % width;
            let y = p as usize / width;
            obj.add_pixel(
                x,
                y,
                conv[[y, x]],
                raw[[y, x]],
                pix_thresh.at(y, x),
                det_thresh.at(y, x),
                width,
                height,
            );
        }
        obj
    }

    /// Barycenter in the detection plane.
    pub fn barycenter(&self) -> (f64, f64) {
        if self.sum_v.abs() <= EPSILON {
            return (self.xcpeak as f64, self.ycpeak as f64);
        }
        (self.sum_vx / self.sum_v, self.sum_vy / self.sum_v)
    }

    /// Second central moments (x2, y2, xy) in the detection plane.
    pub fn central_moments(&self) -> (f64, f64, f64) {
        if self.sum_v.abs() <= EPSILON {
            return (MOMENT_FLOOR, MOMENT_FLOOR, 0.0);
        }
        let (mx, my) = self.barycenter();
        let x2 = self.sum_vxx / self.sum_v - mx * mx;
        let y2 = self.sum_vyy / self.sum_v - my * my;
        let xy = self.sum_vxy / self.sum_v - mx * my;
        (x2, y2, xy)
    }
}

/// Shape and photometry summary for one catalog entry.
pub(crate) struct Analysis {
    pub x: f64,
    pub y: f64,
    pub x2: f64,
    pub y2: f64,
    pub xy: f64,
    pub errx2: f64,
    pub erry2: f64,
    pub errxy: f64,
    pub a: f32,
    pub b: f32,
    pub theta: f32,
    pub cxx: f32,
    pub cyy: f32,
    pub cxy: f32,
    pub flag: u16,
}

/// Derive barycenter, central moments, moment errors, and the ellipse for
/// a finished object. Singular moment matrices get the minimum-radius
/// fallback and the SINGU flag.
pub(crate) fn analyse(
    obj: &RawObject,
    pixels: &[u32],
    planes: &Planes,
    gain: f64,
    width: usize,
) -> Analysis {
    let (mx, my) = obj.barycenter();
    let (mut x2, mut y2, mut xy) = obj.central_moments();
    let mut flag = obj.flag;

    // Nonpositive axial moments arise from negative detection values in
    // sparse objects; floor them together with near-zero determinants.
    let det = x2 * y2 - xy * xy;
    if x2 < MOMENT_FLOOR || y2 < MOMENT_FLOOR || det < MOMENT_DET_MIN {
        x2 += MOMENT_FLOOR;
        y2 += MOMENT_FLOOR;
        flag |= crate::flags::OBJ_SINGU;
    }

    let half_sum = (x2 + y2) / 2.0;
    let half_diff = (x2 - y2) / 2.0;
    let root = (half_diff * half_diff + xy * xy).sqrt();
    let a2 = (half_sum + root).max(0.0);
    let b2 = (half_sum - root).max(0.0);
    let a = a2.sqrt();
    let b = b2.sqrt();
    let theta = if xy.abs() <= EPSILON && half_diff.abs() <= EPSILON {
        0.0
    } else {
        0.5 * (2.0 * xy).atan2(x2 - y2)
    };

    let (cxx, cyy, cxy) = crate::aperture::coeffs_unchecked(a.max(EPSILON), b.max(EPSILON), theta);

    // Moment errors from the variance plane plus the Poisson term.
    let mut errx2 = 0.0f64;
    let mut erry2 = 0.0f64;
    let mut errxy = 0.0f64;
    if obj.sum_v.abs() > EPSILON {
        for &p in pixels {
            let x = p as usize % width;
            let y = p as usize / width;
            let mut var = match (&planes.var, planes.scalar_var) {
                (Some(v), _) => v[[y, x]] as f64,
                (None, Some(sv)) => sv,
                (None, None) => 0.0,
            };
            if gain > 0.0 {
                var += (planes.data[[y, x]] as f64).max(0.0) / gain;
            }
            let dx = x as f64 - mx;
            let dy = y as f64 - my;
            errx2 += var * dx * dx;
            erry2 += var * dy * dy;
            errxy += var * dx * dy;
        }
        let norm = obj.sum_v * obj.sum_v;
        errx2 /= norm;
        erry2 /= norm;
        errxy /= norm;
    }

    Analysis {
        x: mx,
        y: my,
        x2,
        y2,
        xy,
        errx2,
        erry2,
        errxy,
        a: a as f32,
        b: b as f32,
        theta: theta as f32,
        cxx: cxx as f32,
        cyy: cyy as f32,
        cxy: cxy as f32,
        flag,
    }
}
