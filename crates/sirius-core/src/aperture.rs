//! Aperture photometry: circular, annular, and elliptical sums around
//! arbitrary positions, plus ellipse parameter conversions.
//!
//! Positions follow the pixel-center convention: pixel (i, j) spans
//! [i - 0.5, i + 0.5) x [j - 0.5, j + 0.5). Boundary pixels are resolved
//! by subpixel sampling.

use serde::{Deserialize, Serialize};

use crate::consts::{APER_SUBPIX, EPSILON};
use crate::error::{Result, SiriusError};
use crate::flags::{APER_ALLMASKED, APER_HASMASKED, APER_NONPOSITIVE, APER_TRUNC};
use crate::image::ImageView;

/// Options shared by the aperture sums.
#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
pub struct ApertureOptions {
    /// Subpixel sampling grid for boundary pixels.
    #[serde(default = "default_subpix")]
    pub subpix: usize,
    /// Segmentation-map selection, when the image carries a segmap:
    /// `Some(id)` with id > 0 uses pixels labelled `id` or unlabelled;
    /// a negative id restricts to pixels labelled `-id` only.
    #[serde(default)]
    pub seg_id: Option<i32>,
}

fn default_subpix() -> usize {
    APER_SUBPIX
}

impl Default for ApertureOptions {
    fn default() -> Self {
        Self {
            subpix: APER_SUBPIX,
            seg_id: None,
        }
    }
}

/// Result of one aperture sum.
#[derive(Clone, Copy, Debug, Default, Serialize)]
pub struct ApertureSum {
    pub sum: f64,
    /// 1-sigma uncertainty from the noise model and the Poisson term.
    pub sum_err: f64,
    /// Effective area in pixels, masked pixels excluded.
    pub area: f64,
    pub flag: u16,
}

/// Sum pixel values inside a circle of radius `r` centered on (x, y).
pub fn sum_circle(
    image: &ImageView<'_>,
    x: f64,
    y: f64,
    r: f64,
    options: &ApertureOptions,
) -> Result<ApertureSum> {
    if !r.is_finite() || r <= 0.0 {
        return Err(SiriusError::illegal("aperture radius must be positive"));
    }
    validate_options(options)?;
    let shape = RadialShape {
        rin2: 0.0,
        rout2: r * r,
    };
    weighted_sum(image, x, y, r, &shape, options)
}

/// Sum pixel values in the annulus `rin <= d <= rout` centered on (x, y).
pub fn sum_circann(
    image: &ImageView<'_>,
    x: f64,
    y: f64,
    rin: f64,
    rout: f64,
    options: &ApertureOptions,
) -> Result<ApertureSum> {
    if !rin.is_finite() || rin < 0.0 || !rout.is_finite() || rout <= rin {
        return Err(SiriusError::illegal(
            "annulus radii must satisfy 0 <= rin < rout",
        ));
    }
    validate_options(options)?;
    let shape = RadialShape {
        rin2: rin * rin,
        rout2: rout * rout,
    };
    weighted_sum(image, x, y, rout, &shape, options)
}

/// Sum pixel values inside the ellipse with semi-axes `a`, `b`, position
/// angle `theta`, scaled by `r` (so `r = 1` is the unit ellipse of the
/// given axes).
pub fn sum_ellipse(
    image: &ImageView<'_>,
    x: f64,
    y: f64,
    a: f64,
    b: f64,
    theta: f64,
    r: f64,
    options: &ApertureOptions,
) -> Result<ApertureSum> {
    if !r.is_finite() || r <= 0.0 {
        return Err(SiriusError::illegal("aperture scale must be positive"));
    }
    validate_options(options)?;
    let (cxx, cyy, cxy) = ellipse_coeffs(a, b, theta)?;
    let shape = EllipseShape {
        cxx,
        cyy,
        cxy,
        r2: r * r,
    };
    weighted_sum(image, x, y, a.max(b) * r, &shape, options)
}

fn validate_options(options: &ApertureOptions) -> Result<()> {
    if options.subpix == 0 {
        return Err(SiriusError::illegal("subpix sampling must be at least 1"));
    }
    Ok(())
}

/// Membership test for an aperture shape, in offsets from the center.
trait ApertureShape {
    /// Full inclusion test for a point.
    fn contains(&self, dx: f64, dy: f64) -> bool;
    /// Conservative classification of a whole pixel by its center offset:
    /// 1.0 fully inside, 0.0 fully outside, anything else boundary.
    fn classify(&self, dx: f64, dy: f64) -> PixelClass;
}

enum PixelClass {
    Inside,
    Outside,
    Boundary,
}

/// Circle or annulus.
struct RadialShape {
    rin2: f64,
    rout2: f64,
}

impl ApertureShape for RadialShape {
    fn contains(&self, dx: f64, dy: f64) -> bool {
        let d2 = dx * dx + dy * dy;
        d2 >= self.rin2 && d2 <= self.rout2
    }

    fn classify(&self, dx: f64, dy: f64) -> PixelClass {
        // Half the pixel diagonal bounds the distance of any point of the
        // pixel from its center.
        const HALF_DIAG: f64 = std::f64::consts::SQRT_2 / 2.0;
        let d = (dx * dx + dy * dy).sqrt();
        let rin = self.rin2.sqrt();
        let rout = self.rout2.sqrt();
        if d + HALF_DIAG <= rout && (self.rin2 == 0.0 || d - HALF_DIAG >= rin) {
            PixelClass::Inside
        } else if d - HALF_DIAG > rout || d + HALF_DIAG < rin {
            PixelClass::Outside
        } else {
            PixelClass::Boundary
        }
    }
}

/// Ellipse via its quadratic-form coefficients.
struct EllipseShape {
    cxx: f64,
    cyy: f64,
    cxy: f64,
    r2: f64,
}

impl ApertureShape for EllipseShape {
    fn contains(&self, dx: f64, dy: f64) -> bool {
        self.cxx * dx * dx + self.cyy * dy * dy + self.cxy * dx * dy <= self.r2
    }

    fn classify(&self, _dx: f64, _dy: f64) -> PixelClass {
        // No cheap exact bound for a rotated ellipse; sample everything in
        // the bounding box.
        PixelClass::Boundary
    }
}

fn weighted_sum(
    image: &ImageView<'_>,
    x: f64,
    y: f64,
    rmax: f64,
    shape: &dyn ApertureShape,
    options: &ApertureOptions,
) -> Result<ApertureSum> {
    let w = image.width();
    let h = image.height();
    let planes = image.planes();

    let mut out = ApertureSum::default();
    if x - rmax < -0.5 || x + rmax > w as f64 - 0.5 || y - rmax < -0.5 || y + rmax > h as f64 - 0.5
    {
        out.flag |= APER_TRUNC;
    }

    let x0f = (x - rmax).floor().max(0.0);
    let x1f = (x + rmax).ceil().min(w as f64 - 1.0);
    let y0f = (y - rmax).floor().max(0.0);
    let y1f = (y + rmax).ceil().min(h as f64 - 1.0);
    if x1f < x0f || y1f < y0f {
        // The aperture lies entirely outside the image.
        out.flag |= APER_ALLMASKED;
        return Ok(out);
    }
    let (x0, x1) = (x0f as usize, x1f as usize);
    let (y0, y1) = (y0f as usize, y1f as usize);

    let sub = options.subpix;
    let step = 1.0 / sub as f64;
    let mut var_sum = 0.0f64;
    let mut total_area = 0.0f64;
    let mut masked_area = 0.0f64;

    for py in y0..=y1 {
        for px in x0..=x1 {
            let dx = px as f64 - x;
            let dy = py as f64 - y;
            let overlap = match shape.classify(dx, dy) {
                PixelClass::Outside => continue,
                PixelClass::Inside => 1.0,
                PixelClass::Boundary => {
                    let mut hits = 0usize;
                    for sy in 0..sub {
                        let oy = dy - 0.5 + (sy as f64 + 0.5) * step;
                        for sx in 0..sub {
                            let ox = dx - 0.5 + (sx as f64 + 0.5) * step;
                            if shape.contains(ox, oy) {
                                hits += 1;
                            }
                        }
                    }
                    if hits == 0 {
                        continue;
                    }
                    hits as f64 / (sub * sub) as f64
                }
            };

            total_area += overlap;
            if !planes.valid[[py, px]] || !seg_allows(image, options, px, py) {
                masked_area += overlap;
                continue;
            }

            out.sum += overlap * planes.data[[py, px]] as f64;
            out.area += overlap;
            let var = match (&planes.var, planes.scalar_var) {
                (Some(v), _) => v[[py, px]] as f64,
                (None, Some(sv)) => sv,
                (None, None) => 0.0,
            };
            var_sum += overlap * var.max(0.0);
        }
    }

    if masked_area > 0.0 {
        out.flag |= APER_HASMASKED;
        if out.area <= EPSILON {
            out.flag |= APER_ALLMASKED;
        } else {
            // Correct for the lost footprint, assuming the masked part
            // resembles the visible part.
            let scale = total_area / out.area;
            out.sum *= scale;
            var_sum *= scale;
        }
    }

    let mut err2 = var_sum;
    if image.gain() > 0.0 {
        err2 += out.sum.max(0.0) / image.gain();
    }
    if err2 < 0.0 {
        err2 = 0.0;
        out.flag |= APER_NONPOSITIVE;
    }
    out.sum_err = err2.sqrt();
    Ok(out)
}

fn seg_allows(image: &ImageView<'_>, options: &ApertureOptions, px: usize, py: usize) -> bool {
    let (Some(segmap), Some(id)) = (image.segmap, options.seg_id) else {
        return true;
    };
    let label = segmap[py * image.width + px];
    if id >= 0 {
        label == id || label == 0
    } else {
        label == -id
    }
}

/// Ellipse coefficients (cxx, cyy, cxy) of the quadratic form
/// `cxx dx^2 + cyy dy^2 + cxy dx dy = r^2` for semi-axes `a >= b` and
/// position angle `theta`.
pub fn ellipse_coeffs(a: f64, b: f64, theta: f64) -> Result<(f64, f64, f64)> {
    if !a.is_finite() || a <= 0.0 || !b.is_finite() || b <= 0.0 {
        return Err(SiriusError::illegal("ellipse semi-axes must be positive"));
    }
    if !(-std::f64::consts::FRAC_PI_2..=std::f64::consts::FRAC_PI_2).contains(&theta) {
        return Err(SiriusError::illegal(
            "position angle must lie in [-pi/2, pi/2]",
        ));
    }
    Ok(coeffs_unchecked(a, b, theta))
}

pub(crate) fn coeffs_unchecked(a: f64, b: f64, theta: f64) -> (f64, f64, f64) {
    let cos = theta.cos();
    let sin = theta.sin();
    let a2 = (a * a).max(EPSILON);
    let b2 = (b * b).max(EPSILON);
    let cxx = cos * cos / a2 + sin * sin / b2;
    let cyy = sin * sin / a2 + cos * cos / b2;
    let cxy = 2.0 * cos * sin * (1.0 / a2 - 1.0 / b2);
    (cxx, cyy, cxy)
}

/// Invert [`ellipse_coeffs`]: recover (a, b, theta) from the quadratic
/// form. Fails when the coefficients do not describe an ellipse.
pub fn ellipse_axes(cxx: f64, cyy: f64, cxy: f64) -> Result<(f64, f64, f64)> {
    let p = (cxx + cyy) / 2.0;
    let q = (cxx - cyy) / 2.0;
    let root = (q * q + cxy * cxy / 4.0).sqrt();
    // Eigenvalues of the form matrix are 1/a^2 (smaller) and 1/b^2.
    let lam_a = p - root;
    let lam_b = p + root;
    if lam_a <= 0.0 || !lam_a.is_finite() {
        return Err(SiriusError::illegal(
            "coefficients do not describe an ellipse",
        ));
    }
    let a = 1.0 / lam_a.sqrt();
    let b = 1.0 / lam_b.sqrt();

    let theta = if cxy.abs() <= EPSILON && q.abs() <= EPSILON {
        0.0
    } else {
        // atan2 gives the b-axis direction; rotate to the a-axis and wrap
        // into [-pi/2, pi/2].
        let mut t = 0.5 * cxy.atan2(cxx - cyy) - std::f64::consts::FRAC_PI_2;
        if t < -std::f64::consts::FRAC_PI_2 {
            t += std::f64::consts::PI;
        }
        t
    };
    Ok((a, b, theta))
}
