//! Detection-image construction: plain convolution and the noise-weighted
//! matched filter.

use ndarray::Array2;
use serde::{Deserialize, Serialize};

use crate::consts::{DEFAULT_KERNEL, EPSILON};
use crate::error::{Result, SiriusError};
use crate::image::Planes;

/// Small convolution kernel with odd dimensions.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Kernel {
    data: Vec<f32>,
    width: usize,
    height: usize,
}

impl Kernel {
    pub fn new(data: Vec<f32>, width: usize, height: usize) -> Result<Self> {
        if width == 0 || height == 0 {
            return Err(SiriusError::illegal("kernel dimensions must be nonzero"));
        }
        if width % 2 == 0 || height % 2 == 0 {
            return Err(SiriusError::illegal(format!(
                "kernel dimensions must be odd, got {width}x{height}"
            )));
        }
        if data.len() != width * height {
            return Err(SiriusError::illegal(format!(
                "kernel holds {} elements, expected {}",
                data.len(),
                width * height
            )));
        }
        Ok(Self {
            data,
            width,
            height,
        })
    }

    /// The stock 3x3 Gaussian-shaped detection kernel.
    pub fn default_3x3() -> Self {
        Self {
            data: DEFAULT_KERNEL.to_vec(),
            width: 3,
            height: 3,
        }
    }

    pub fn width(&self) -> usize {
        self.width
    }

    pub fn height(&self) -> usize {
        self.height
    }

    pub fn data(&self) -> &[f32] {
        &self.data
    }

    /// Copy of the kernel scaled to unit sum. Zero-sum kernels are returned
    /// unchanged; their output has no meaningful flux scale either way.
    fn normalized(&self) -> Vec<f32> {
        let sum: f32 = self.data.iter().sum();
        if sum.abs() as f64 <= EPSILON {
            return self.data.clone();
        }
        self.data.iter().map(|k| k / sum).collect()
    }
}

/// Filtering semantics used to build the detection image.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum FilterKind {
    /// Plain convolution; detection compares against the data-units
    /// threshold.
    Conv,
    /// Noise-weighted matched filter; output is in standard deviations of
    /// the filtered image and compares against the threshold directly.
    /// Degrades to `Conv` when no per-pixel noise is available.
    #[default]
    Matched,
}

/// Interpretation of the detection threshold.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum ThreshKind {
    /// Threshold is a multiple of the per-pixel noise sigma.
    #[default]
    Relative,
    /// Threshold is in data units.
    Absolute,
}

/// Per-pixel detection threshold, constant or a full plane.
#[derive(Clone, Debug)]
pub(crate) enum Threshold {
    Constant(f32),
    Plane(Array2<f32>),
}

impl Threshold {
    #[inline]
    pub fn at(&self, y: usize, x: usize) -> f32 {
        match self {
            Threshold::Constant(t) => *t,
            Threshold::Plane(p) => p[[y, x]],
        }
    }
}

/// Everything the segmenter needs: the detection plane, the threshold it is
/// compared against, and the data-units threshold used for `tnpix` and the
/// per-object threshold record.
pub(crate) struct DetectionInput {
    pub conv: Array2<f32>,
    pub det_thresh: Threshold,
    pub pix_thresh: Threshold,
}

/// Build the detection image and thresholds from the working planes.
///
/// `planes.data` must already be background-subtracted when background
/// subtraction is wanted; this stage only filters and scales.
pub(crate) fn detection_input(
    planes: &Planes,
    thresh: f64,
    thresh_kind: ThreshKind,
    kernel: Option<&Kernel>,
    filter_kind: FilterKind,
) -> Result<DetectionInput> {
    let pix_thresh = match thresh_kind {
        ThreshKind::Absolute => Threshold::Constant(thresh as f32),
        ThreshKind::Relative => {
            if let Some(var) = &planes.var {
                Threshold::Plane(var.mapv(|v| (thresh * (v.max(0.0) as f64).sqrt()) as f32))
            } else if let Some(scalar_var) = planes.scalar_var {
                Threshold::Constant((thresh * scalar_var.max(0.0).sqrt()) as f32)
            } else {
                return Err(SiriusError::RelthreshNoNoise);
            }
        }
    };

    let Some(kernel) = kernel else {
        // No kernel: detect on the data plane itself.
        return Ok(DetectionInput {
            conv: planes.data.clone(),
            det_thresh: pix_thresh.clone(),
            pix_thresh,
        });
    };

    if filter_kind == FilterKind::Matched {
        if let Some(var) = &planes.var {
            let conv = matched_filter(planes, var, kernel);
            return Ok(DetectionInput {
                conv,
                det_thresh: Threshold::Constant(thresh as f32),
                pix_thresh,
            });
        }
    }

    let conv = convolve(planes, kernel);
    Ok(DetectionInput {
        conv,
        det_thresh: pix_thresh.clone(),
        pix_thresh,
    })
}

/// Plain convolution with a unit-sum kernel. Out-of-image and invalid
/// pixels contribute zero.
fn convolve(planes: &Planes, kernel: &Kernel) -> Array2<f32> {
    let (h, w) = planes.data.dim();
    let norm = kernel.normalized();
    let kw = kernel.width() as isize;
    let kh = kernel.height() as isize;
    let rx = kw / 2;
    let ry = kh / 2;

    let mut out = Array2::<f32>::zeros((h, w));
    for y in 0..h as isize {
        for x in 0..w as isize {
            let mut sum = 0.0f64;
            for ky in 0..kh {
                let sy = y + ky - ry;
                if sy < 0 || sy >= h as isize {
                    continue;
                }
                for kx in 0..kw {
                    let sx = x + kx - rx;
                    if sx < 0 || sx >= w as isize {
                        continue;
                    }
                    let (sy, sx) = (sy as usize, sx as usize);
                    if !planes.valid[[sy, sx]] {
                        continue;
                    }
                    sum += norm[(ky * kw + kx) as usize] as f64 * planes.data[[sy, sx]] as f64;
                }
            }
            out[[y as usize, x as usize]] = sum as f32;
        }
    }
    out
}

/// Noise-weighted matched filter: sum(K d / var) / sqrt(sum(K^2 / var)).
/// Positions off the image, masked, or with nonpositive variance drop out
/// of both sums, which renormalizes the footprint at edges.
fn matched_filter(planes: &Planes, var: &Array2<f32>, kernel: &Kernel) -> Array2<f32> {
    let (h, w) = planes.data.dim();
    let kw = kernel.width() as isize;
    let kh = kernel.height() as isize;
    let rx = kw / 2;
    let ry = kh / 2;
    let k = kernel.data();

    let mut out = Array2::<f32>::zeros((h, w));
    for y in 0..h as isize {
        for x in 0..w as isize {
            let mut num = 0.0f64;
            let mut den = 0.0f64;
            for ky in 0..kh {
                let sy = y + ky - ry;
                if sy < 0 || sy >= h as isize {
                    continue;
                }
                for kx in 0..kw {
                    let sx = x + kx - rx;
                    if sx < 0 || sx >= w as isize {
                        continue;
                    }
                    let (sy, sx) = (sy as usize, sx as usize);
                    if !planes.valid[[sy, sx]] {
                        continue;
                    }
                    let v = var[[sy, sx]] as f64;
                    if v <= 0.0 || !v.is_finite() {
                        continue;
                    }
                    let kv = k[(ky * kw + kx) as usize] as f64;
                    num += kv * planes.data[[sy, sx]] as f64 / v;
                    den += kv * kv / v;
                }
            }
            out[[y as usize, x as usize]] = if den > 0.0 {
                (num / den.sqrt()) as f32
            } else {
                0.0
            };
        }
    }
    out
}
