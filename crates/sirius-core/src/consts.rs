/// Pixel values at or below this are treated as invalid sentinels.
pub const SENTINEL_FLOOR: f32 = -1e30;

/// Default background tile size in pixels (both axes).
pub const DEFAULT_TILE_SIZE: usize = 64;

/// Default background median-filter window in tiles (both axes).
pub const DEFAULT_FILTER_SIZE: usize = 3;

/// Default background median-filter threshold.
pub const DEFAULT_FILTER_THRESH: f32 = 0.0;

/// Clipping width, in standard deviations, for tile statistics.
pub const BKG_CLIP_SIGMA: f64 = 3.0;

/// Iteration cap for the tile clipping loop.
pub const BKG_CLIP_MAX_ITER: usize = 10;

/// Relative sigma change below which the clipping loop has converged.
pub const BKG_CLIP_EPS: f64 = 1e-4;

/// Skewness trigger |mean - median| / sigma above which a tile switches
/// from the clipped mean to the mode estimate.
pub const BKG_SKEW_TRIGGER: f64 = 0.3;

/// Mode estimate coefficients: mode = 2.5 * median - 1.5 * mean.
pub const BKG_MODE_MEDIAN_COEFF: f64 = 2.5;
pub const BKG_MODE_MEAN_COEFF: f64 = 1.5;

/// Minimum usable samples for a tile to stand on its own statistics.
pub const BKG_MIN_TILE_SAMPLES: usize = 10;

/// Default capacity of the shared pixel stack.
pub const DEFAULT_PIXSTACK: usize = 300_000;

/// Default capacity of the provisional object table.
pub const DEFAULT_OBJECT_LIMIT: usize = 65_536;

/// Default cap on sub-objects considered while deblending one detection.
pub const DEFAULT_SUB_OBJECT_LIMIT: usize = 1024;

/// Default minimum object area in pixels.
pub const DEFAULT_MIN_AREA: usize = 5;

/// Default number of deblending thresholds.
pub const DEFAULT_DEBLEND_NTHRESH: usize = 32;

/// Default deblending contrast: a branch below this fraction of the parent
/// flux stays merged.
pub const DEFAULT_DEBLEND_CONT: f64 = 0.005;

/// Default cleaning ellipse scale.
pub const DEFAULT_CLEAN_PARAM: f64 = 1.0;

/// Cleaning membership radius in units of the ellipse axes; the squared
/// Mahalanobis distance is compared against clean_param * CLEAN_ZONE^2.
pub const CLEAN_ZONE: f64 = 2.0;

/// Second-moment determinant below which an object counts as singular.
pub const MOMENT_DET_MIN: f64 = 0.00694;

/// Moment floor added to both axial moments of a singular object,
/// the variance of a uniform distribution over one pixel.
pub const MOMENT_FLOOR: f64 = 1.0 / 12.0;

/// Subpixel sampling grid for aperture boundary pixels.
pub const APER_SUBPIX: usize = 5;

/// Small epsilon guarding floating-point divisions.
pub const EPSILON: f64 = 1e-10;

/// Default 3x3 Gaussian-shaped detection kernel (scaled to unit sum where
/// the filtering mode requires it).
pub const DEFAULT_KERNEL: [f32; 9] = [1.0, 2.0, 1.0, 2.0, 4.0, 2.0, 1.0, 2.0, 1.0];
