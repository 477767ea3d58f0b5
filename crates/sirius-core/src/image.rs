//! Read-only image views over caller-owned pixel buffers.
//!
//! The extraction core works on dense `f32` planes. Callers hand in buffers
//! in any supported element type; the dispatch happens once here, at the
//! read boundary, so the inner loops never branch on dtype.

use ndarray::Array2;
use num_traits::AsPrimitive;

use crate::consts::SENTINEL_FLOOR;
use crate::error::{Result, SiriusError};

/// Borrowed pixel buffer in one of the supported element types.
#[derive(Clone, Copy, Debug)]
pub enum PixelData<'a> {
    U8(&'a [u8]),
    I32(&'a [i32]),
    F32(&'a [f32]),
    F64(&'a [f64]),
}

impl<'a> PixelData<'a> {
    pub fn len(&self) -> usize {
        match self {
            PixelData::U8(s) => s.len(),
            PixelData::I32(s) => s.len(),
            PixelData::F32(s) => s.len(),
            PixelData::F64(s) => s.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Materialize this buffer as a dense f32 plane of shape (h, w).
    pub(crate) fn widen(&self, h: usize, w: usize) -> Array2<f32> {
        match self {
            PixelData::U8(s) => widen_slice(s, h, w),
            PixelData::I32(s) => widen_slice(s, h, w),
            PixelData::F32(s) => widen_slice(s, h, w),
            PixelData::F64(s) => widen_slice(s, h, w),
        }
    }
}

fn widen_slice<T>(src: &[T], h: usize, w: usize) -> Array2<f32>
where
    T: Copy + 'static + AsPrimitive<f32>,
{
    Array2::from_shape_fn((h, w), |(r, c)| src[r * w + c].as_())
}

/// Mutable pixel buffer for in-place operations (background subtraction).
#[derive(Debug)]
pub enum PixelDataMut<'a> {
    U8(&'a mut [u8]),
    I32(&'a mut [i32]),
    F32(&'a mut [f32]),
    F64(&'a mut [f64]),
}

impl<'a> PixelDataMut<'a> {
    pub fn len(&self) -> usize {
        match self {
            PixelDataMut::U8(s) => s.len(),
            PixelDataMut::I32(s) => s.len(),
            PixelDataMut::F32(s) => s.len(),
            PixelDataMut::F64(s) => s.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Interpretation of noise values.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum NoiseKind {
    /// Noise values are 1-sigma standard deviations.
    #[default]
    Stddev,
    /// Noise values are variances.
    Variance,
}

/// An immutable view of an image and its optional companion planes.
///
/// Input buffers are row-major with pixel (x, y) at index `y * width + x`.
/// Buffers are only borrowed; nothing is retained beyond a call into the
/// core.
#[derive(Clone, Debug)]
pub struct ImageView<'a> {
    pub(crate) data: PixelData<'a>,
    pub(crate) width: usize,
    pub(crate) height: usize,
    pub(crate) noise: Option<PixelData<'a>>,
    pub(crate) noise_kind: NoiseKind,
    pub(crate) noise_value: Option<f64>,
    pub(crate) mask: Option<PixelData<'a>>,
    pub(crate) mask_thresh: f64,
    pub(crate) segmap: Option<&'a [i32]>,
    pub(crate) seg_ids: Option<&'a [(i32, usize)]>,
    pub(crate) gain: f64,
}

impl<'a> ImageView<'a> {
    pub fn new(data: PixelData<'a>, width: usize, height: usize) -> Result<Self> {
        if width == 0 || height == 0 {
            return Err(SiriusError::illegal(format!(
                "image dimensions must be nonzero, got {width}x{height}"
            )));
        }
        if data.len() != width * height {
            return Err(SiriusError::illegal(format!(
                "data buffer holds {} elements, expected {}",
                data.len(),
                width * height
            )));
        }
        Ok(Self {
            data,
            width,
            height,
            noise: None,
            noise_kind: NoiseKind::default(),
            noise_value: None,
            mask: None,
            mask_thresh: 0.0,
            segmap: None,
            seg_ids: None,
            gain: 0.0,
        })
    }

    /// Attach a per-pixel noise plane.
    pub fn with_noise(mut self, noise: PixelData<'a>, kind: NoiseKind) -> Result<Self> {
        if noise.len() != self.width * self.height {
            return Err(SiriusError::illegal(format!(
                "noise buffer holds {} elements, expected {}",
                noise.len(),
                self.width * self.height
            )));
        }
        self.noise = Some(noise);
        self.noise_kind = kind;
        Ok(self)
    }

    /// Attach a scalar noise fallback used when no noise plane is present.
    pub fn with_noise_value(mut self, value: f64, kind: NoiseKind) -> Self {
        self.noise_value = Some(value);
        self.noise_kind = kind;
        self
    }

    /// Attach a mask plane; a pixel is masked when its mask value exceeds
    /// `thresh`.
    pub fn with_mask(mut self, mask: PixelData<'a>, thresh: f64) -> Result<Self> {
        if mask.len() != self.width * self.height {
            return Err(SiriusError::illegal(format!(
                "mask buffer holds {} elements, expected {}",
                mask.len(),
                self.width * self.height
            )));
        }
        self.mask = Some(mask);
        self.mask_thresh = thresh;
        Ok(self)
    }

    /// Attach a segmentation map labelling pixels by external object id,
    /// with the list of (id, pixel count) pairs present in the map.
    pub fn with_segmap(mut self, segmap: &'a [i32], ids: &'a [(i32, usize)]) -> Result<Self> {
        if segmap.len() != self.width * self.height {
            return Err(SiriusError::illegal(format!(
                "segmap holds {} elements, expected {}",
                segmap.len(),
                self.width * self.height
            )));
        }
        self.segmap = Some(segmap);
        self.seg_ids = Some(ids);
        Ok(self)
    }

    /// Set the gain (e-/ADU) used for the Poisson term of error estimates.
    /// Zero disables the term.
    pub fn with_gain(mut self, gain: f64) -> Self {
        self.gain = gain;
        self
    }

    pub fn width(&self) -> usize {
        self.width
    }

    pub fn height(&self) -> usize {
        self.height
    }

    pub fn gain(&self) -> f64 {
        self.gain
    }

    /// Materialize the dense working planes used by the pipeline.
    pub(crate) fn planes(&self) -> Planes {
        let h = self.height;
        let w = self.width;
        let data = self.data.widen(h, w);

        let mut valid = Array2::from_elem((h, w), true);
        for (v, d) in valid.iter_mut().zip(data.iter()) {
            if !d.is_finite() || *d <= SENTINEL_FLOOR {
                *v = false;
            }
        }
        if let Some(mask) = self.mask {
            let mask = mask.widen(h, w);
            let thresh = self.mask_thresh as f32;
            for (v, m) in valid.iter_mut().zip(mask.iter()) {
                if *m > thresh {
                    *v = false;
                }
            }
        }

        let var = self.noise.map(|noise| {
            let mut plane = noise.widen(h, w);
            if self.noise_kind == NoiseKind::Stddev {
                plane.mapv_inplace(|s| s * s);
            }
            plane
        });
        let scalar_var = self.noise_value.map(|v| match self.noise_kind {
            NoiseKind::Stddev => v * v,
            NoiseKind::Variance => v,
        });

        Planes {
            data,
            var,
            scalar_var,
            valid,
        }
    }
}

/// Dense f32 working planes for one call into the core.
pub(crate) struct Planes {
    pub data: Array2<f32>,
    /// Per-pixel variance, when a noise plane was supplied.
    pub var: Option<Array2<f32>>,
    /// Scalar variance fallback.
    pub scalar_var: Option<f64>,
    /// False where the pixel is masked or carries a sentinel value.
    pub valid: Array2<bool>,
}
