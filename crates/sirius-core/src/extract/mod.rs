//! Source extraction: segmentation, deblending, cleaning, and the catalog.

mod catalog;
mod clean;
mod deblend;
mod object;
mod pixstack;
mod segment;

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::consts::{
    DEFAULT_CLEAN_PARAM, DEFAULT_DEBLEND_CONT, DEFAULT_DEBLEND_NTHRESH, DEFAULT_MIN_AREA,
};
use crate::error::{Result, SiriusError};
use crate::filter::{self, FilterKind, Kernel, ThreshKind};
use crate::image::ImageView;
use crate::knobs;

pub use catalog::{Catalog, CatalogRow};

use object::RawObject;

/// Detection and deblending parameters.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ExtractConfig {
    /// Detection threshold; a sigma multiple when `thresh_kind` is
    /// relative, data units when absolute.
    #[serde(default = "default_thresh")]
    pub thresh: f64,
    #[serde(default)]
    pub thresh_kind: ThreshKind,
    /// Minimum object area in pixels.
    #[serde(default = "default_min_area")]
    pub min_area: usize,
    /// Detection kernel; `None` detects on the unfiltered image.
    #[serde(default = "default_kernel")]
    pub kernel: Option<Kernel>,
    #[serde(default)]
    pub filter_kind: FilterKind,
    /// Number of deblending thresholds.
    #[serde(default = "default_deblend_nthresh")]
    pub deblend_nthresh: usize,
    /// Minimum branch flux as a fraction of the parent flux.
    #[serde(default = "default_deblend_cont")]
    pub deblend_cont: f64,
    /// Absorb faint detections inside brighter neighbors.
    #[serde(default = "default_clean")]
    pub clean: bool,
    /// Scale of the cleaning ellipse.
    #[serde(default = "default_clean_param")]
    pub clean_param: f64,
}

fn default_thresh() -> f64 {
    1.5
}
fn default_min_area() -> usize {
    DEFAULT_MIN_AREA
}
fn default_kernel() -> Option<Kernel> {
    Some(Kernel::default_3x3())
}
fn default_deblend_nthresh() -> usize {
    DEFAULT_DEBLEND_NTHRESH
}
fn default_deblend_cont() -> f64 {
    DEFAULT_DEBLEND_CONT
}
fn default_clean() -> bool {
    true
}
fn default_clean_param() -> f64 {
    DEFAULT_CLEAN_PARAM
}

impl Default for ExtractConfig {
    fn default() -> Self {
        Self {
            thresh: default_thresh(),
            thresh_kind: ThreshKind::default(),
            min_area: DEFAULT_MIN_AREA,
            kernel: default_kernel(),
            filter_kind: FilterKind::default(),
            deblend_nthresh: DEFAULT_DEBLEND_NTHRESH,
            deblend_cont: DEFAULT_DEBLEND_CONT,
            clean: true,
            clean_param: DEFAULT_CLEAN_PARAM,
        }
    }
}

impl ExtractConfig {
    fn validate(&self) -> Result<()> {
        if !self.thresh.is_finite() {
            return Err(SiriusError::illegal("detection threshold must be finite"));
        }
        if self.min_area == 0 {
            return Err(SiriusError::illegal("min_area must be at least 1"));
        }
        if self.deblend_nthresh == 0 {
            return Err(SiriusError::illegal("deblend_nthresh must be at least 1"));
        }
        if !(0.0..=1.0).contains(&self.deblend_cont) {
            return Err(SiriusError::illegal("deblend_cont must lie in [0, 1]"));
        }
        if self.clean_param.is_nan() || self.clean_param <= 0.0 {
            return Err(SiriusError::illegal("clean_param must be positive"));
        }
        Ok(())
    }
}

/// Extract sources from `image`.
///
/// The image is expected to be background-subtracted already (see
/// [`Background::subtract_from`]); this entry point filters, segments,
/// deblends, optionally cleans, and measures.
///
/// [`Background::subtract_from`]: crate::background::Background::subtract_from
pub fn extract(image: &ImageView<'_>, config: &ExtractConfig) -> Result<Catalog> {
    config.validate()?;

    let w = image.width();
    let h = image.height();
    let planes = image.planes();
    let det = filter::detection_input(
        &planes,
        config.thresh,
        config.thresh_kind,
        config.kernel.as_ref(),
        config.filter_kind,
    )?;

    let pixstack_capacity = knobs::extract_pixstack();
    let object_limit = knobs::extract_object_limit();
    let sub_limit = knobs::sub_object_limit();

    let mut objects: Vec<(RawObject, Vec<u32>)> = Vec::new();
    segment::scan(
        &planes,
        &det,
        config.min_area,
        pixstack_capacity,
        object_limit,
        |obj, mut pixels| {
            pixels.sort_unstable();
            let children = deblend::deblend(
                obj,
                pixels,
                &planes,
                &det,
                config.deblend_nthresh,
                config.deblend_cont,
                sub_limit,
            )?;
            objects.extend(children);
            Ok(())
        },
    )?;
    info!(candidates = objects.len(), "segmentation complete");

    if config.clean {
        clean::clean(&mut objects, config.clean_param);
    }

    let mut catalog = Catalog::new(w, h);
    for (obj, pixels) in &objects {
        let analysis = object::analyse(obj, pixels, &planes, image.gain(), w);
        catalog.push(obj, &analysis, pixels);
    }
    info!(objects = catalog.len(), "extraction complete");
    Ok(catalog)
}
