//! The output catalog: one entry per detection, stored as parallel
//! columns, plus the concatenated member-pixel buffer.

use ndarray::Array2;
use serde::Serialize;

use super::object::{Analysis, RawObject};

/// Extraction results. Columns are parallel vectors indexed by detection;
/// member pixel indices (y * width + x) live in one shared buffer sliced
/// per object through [`pixels`].
///
/// [`pixels`]: Catalog::pixels
#[derive(Clone, Debug, PartialEq)]
pub struct Catalog {
    width: usize,
    height: usize,
    /// Data-units detection threshold at the object peak.
    pub thresh: Vec<f32>,
    pub npix: Vec<usize>,
    pub tnpix: Vec<usize>,
    pub xmin: Vec<usize>,
    pub xmax: Vec<usize>,
    pub ymin: Vec<usize>,
    pub ymax: Vec<usize>,
    /// Barycenter.
    pub x: Vec<f64>,
    pub y: Vec<f64>,
    /// Second central moments.
    pub x2: Vec<f64>,
    pub y2: Vec<f64>,
    pub xy: Vec<f64>,
    pub errx2: Vec<f64>,
    pub erry2: Vec<f64>,
    pub errxy: Vec<f64>,
    /// Ellipse semi-axes and position angle.
    pub a: Vec<f32>,
    pub b: Vec<f32>,
    pub theta: Vec<f32>,
    /// Ellipse coefficients.
    pub cxx: Vec<f32>,
    pub cyy: Vec<f32>,
    pub cxy: Vec<f32>,
    /// Summed value over member pixels in the filtered image.
    pub cflux: Vec<f64>,
    /// Summed value over member pixels in the unfiltered image.
    pub flux: Vec<f64>,
    pub cpeak: Vec<f32>,
    pub peak: Vec<f32>,
    pub xpeak: Vec<usize>,
    pub ypeak: Vec<usize>,
    pub xcpeak: Vec<usize>,
    pub ycpeak: Vec<usize>,
    pub flag: Vec<u16>,
    pix: Vec<u32>,
    pix_offsets: Vec<usize>,
}

impl Catalog {
    pub(crate) fn new(width: usize, height: usize) -> Self {
        Self {
            width,
            height,
            thresh: Vec::new(),
            npix: Vec::new(),
            tnpix: Vec::new(),
            xmin: Vec::new(),
            xmax: Vec::new(),
            ymin: Vec::new(),
            ymax: Vec::new(),
            x: Vec::new(),
            y: Vec::new(),
            x2: Vec::new(),
            y2: Vec::new(),
            xy: Vec::new(),
            errx2: Vec::new(),
            erry2: Vec::new(),
            errxy: Vec::new(),
            a: Vec::new(),
            b: Vec::new(),
            theta: Vec::new(),
            cxx: Vec::new(),
            cyy: Vec::new(),
            cxy: Vec::new(),
            cflux: Vec::new(),
            flux: Vec::new(),
            cpeak: Vec::new(),
            peak: Vec::new(),
            xpeak: Vec::new(),
            ypeak: Vec::new(),
            xcpeak: Vec::new(),
            ycpeak: Vec::new(),
            flag: Vec::new(),
            pix: Vec::new(),
            pix_offsets: vec![0],
        }
    }

    pub(crate) fn push(&mut self, obj: &RawObject, analysis: &Analysis, pixels: &[u32]) {
        self.thresh.push(obj.thresh);
        self.npix.push(obj.npix);
        self.tnpix.push(obj.tnpix);
        self.xmin.push(obj.xmin);
        self.xmax.push(obj.xmax);
        self.ymin.push(obj.ymin);
        self.ymax.push(obj.ymax);
        self.x.push(analysis.x);
        self.y.push(analysis.y);
        self.x2.push(analysis.x2);
        self.y2.push(analysis.y2);
        self.xy.push(analysis.xy);
        self.errx2.push(analysis.errx2);
        self.erry2.push(analysis.erry2);
        self.errxy.push(analysis.errxy);
        self.a.push(analysis.a);
        self.b.push(analysis.b);
        self.theta.push(analysis.theta);
        self.cxx.push(analysis.cxx);
        self.cyy.push(analysis.cyy);
        self.cxy.push(analysis.cxy);
        self.cflux.push(obj.sum_v);
        self.flux.push(obj.sum_raw);
        self.cpeak.push(obj.cpeak);
        self.peak.push(obj.peak);
        self.xpeak.push(obj.xpeak);
        self.ypeak.push(obj.ypeak);
        self.xcpeak.push(obj.xcpeak);
        self.ycpeak.push(obj.ycpeak);
        self.flag.push(analysis.flag);
        self.pix.extend_from_slice(pixels);
        self.pix_offsets.push(self.pix.len());
    }

    pub fn len(&self) -> usize {
        self.npix.len()
    }

    pub fn is_empty(&self) -> bool {
        self.npix.is_empty()
    }

    pub fn width(&self) -> usize {
        self.width
    }

    pub fn height(&self) -> usize {
        self.height
    }

    /// Member pixel indices of detection `i`, in ascending raster order.
    pub fn pixels(&self, i: usize) -> &[u32] {
        &self.pix[self.pix_offsets[i]..self.pix_offsets[i + 1]]
    }

    /// Render the catalog as a segmentation map: pixels of detection `i`
    /// are labelled `i + 1`, everything else 0.
    pub fn segmap(&self) -> Array2<i32> {
        let mut map = Array2::<i32>::zeros((self.height, self.width));
        for i in 0..self.len() {
            let id = i as i32 + 1;
            for &p in self.pixels(i) {
                let y = p as usize / self.width;
                let x = p as usize % self.width;
                map[[y, x]] = id;
            }
        }
        map
    }

    /// Row view of entry `i`, for serialization and table printing.
    pub fn row(&self, i: usize) -> CatalogRow {
        CatalogRow {
            thresh: self.thresh[i],
            npix: self.npix[i],
            tnpix: self.tnpix[i],
            xmin: self.xmin[i],
            xmax: self.xmax[i],
            ymin: self.ymin[i],
            ymax: self.ymax[i],
            x: self.x[i],
            y: self.y[i],
            x2: self.x2[i],
            y2: self.y2[i],
            xy: self.xy[i],
            errx2: self.errx2[i],
            erry2: self.erry2[i],
            errxy: self.errxy[i],
            a: self.a[i],
            b: self.b[i],
            theta: self.theta[i],
            cxx: self.cxx[i],
            cyy: self.cyy[i],
            cxy: self.cxy[i],
            cflux: self.cflux[i],
            flux: self.flux[i],
            cpeak: self.cpeak[i],
            peak: self.peak[i],
            xpeak: self.xpeak[i],
            ypeak: self.ypeak[i],
            xcpeak: self.xcpeak[i],
            ycpeak: self.ycpeak[i],
            flag: self.flag[i],
        }
    }

    pub fn rows(&self) -> impl Iterator<Item = CatalogRow> + '_ {
        (0..self.len()).map(|i| self.row(i))
    }
}

/// One catalog entry in row form.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct CatalogRow {
    pub thresh: f32,
    pub npix: usize,
    pub tnpix: usize,
    pub xmin: usize,
    pub xmax: usize,
    pub ymin: usize,
    pub ymax: usize,
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
    pub cflux: f64,
    pub flux: f64,
    pub cpeak: f32,
    pub peak: f32,
    pub xpeak: usize,
    pub ypeak: usize,
    pub xcpeak: usize,
    pub ycpeak: usize,
    pub flag: u16,
}
