//! Tiled background and noise-level estimation.
//!
//! The image is cut into a coarse grid of tiles; each tile contributes a
//! robust (clipped) background level and scatter. The tile grids are
//! median-filtered to suppress tiles contaminated by bright sources, then
//! turned into column splines so any pixel row can be evaluated with
//! bicubic interpolation.

mod spline;
mod stats;

use ndarray::Array2;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::consts::{
    BKG_MIN_TILE_SAMPLES, DEFAULT_FILTER_SIZE, DEFAULT_FILTER_THRESH, DEFAULT_TILE_SIZE, EPSILON,
};
use crate::error::{Result, SiriusError};
use crate::image::{ImageView, PixelDataMut};

/// Tiling and filtering parameters for background estimation.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct BackgroundConfig {
    /// Tile width in pixels.
    #[serde(default = "default_tile")]
    pub bw: usize,
    /// Tile height in pixels.
    #[serde(default = "default_tile")]
    pub bh: usize,
    /// Median-filter window width in tiles.
    #[serde(default = "default_filter")]
    pub fw: usize,
    /// Median-filter window height in tiles.
    #[serde(default = "default_filter")]
    pub fh: usize,
    /// Filter threshold: a tile level is replaced by the window median only
    /// when it deviates by more than `fthresh` times the local sigma.
    /// Zero replaces unconditionally.
    #[serde(default = "default_fthresh")]
    pub fthresh: f32,
}

fn default_tile() -> usize {
    DEFAULT_TILE_SIZE
}
fn default_filter() -> usize {
    DEFAULT_FILTER_SIZE
}
fn default_fthresh() -> f32 {
    DEFAULT_FILTER_THRESH
}

impl Default for BackgroundConfig {
    fn default() -> Self {
        Self {
            bw: DEFAULT_TILE_SIZE,
            bh: DEFAULT_TILE_SIZE,
            fw: DEFAULT_FILTER_SIZE,
            fh: DEFAULT_FILTER_SIZE,
            fthresh: DEFAULT_FILTER_THRESH,
        }
    }
}

/// A fitted background model.
///
/// Owns the tile grids and their spline coefficients; built once from an
/// image and read-only afterwards.
#[derive(Debug)]
pub struct Background {
    width: usize,
    height: usize,
    bw: usize,
    bh: usize,
    nx: usize,
    ny: usize,
    /// Tile background levels, row-major (ny x nx).
    back: Vec<f64>,
    /// Column-spline second derivatives of `back`.
    dback: Vec<f64>,
    /// Tile noise levels, row-major (ny x nx).
    sigma: Vec<f64>,
    /// Column-spline second derivatives of `sigma`.
    dsigma: Vec<f64>,
    global: f64,
    global_rms: f64,
}

impl Background {
    /// Fit a background model to `image`.
    pub fn new(image: &ImageView<'_>, config: &BackgroundConfig) -> Result<Self> {
        let w = image.width();
        let h = image.height();
        if config.bw == 0 || config.bh == 0 {
            return Err(SiriusError::illegal("background tile size must be nonzero"));
        }
        if w < config.bw || h < config.bh {
            return Err(SiriusError::illegal(format!(
                "image {w}x{h} is smaller than one background tile {}x{}",
                config.bw, config.bh
            )));
        }
        if config.fw == 0 || config.fh == 0 {
            return Err(SiriusError::illegal(
                "background filter window must be nonzero",
            ));
        }

        let planes = image.planes();
        let bw = config.bw;
        let bh = config.bh;
        let nx = w.div_ceil(bw);
        let ny = h.div_ceil(bh);

        let mut back = vec![f64::NAN; nx * ny];
        let mut sigma = vec![f64::NAN; nx * ny];
        let mut scratch: Vec<f32> = Vec::with_capacity(bw * bh);
        let mut unpopulated = 0usize;

        for ty in 0..ny {
            for tx in 0..nx {
                scratch.clear();
                let y1 = (ty * bh + bh).min(h);
                let x1 = (tx * bw + bw).min(w);
                for y in ty * bh..y1 {
                    for x in tx * bw..x1 {
                        if planes.valid[[y, x]] {
                            scratch.push(planes.data[[y, x]]);
                        }
                    }
                }
                if scratch.len() < BKG_MIN_TILE_SAMPLES {
                    unpopulated += 1;
                    continue;
                }
                let stats = stats::clipped_stats(&mut scratch);
                back[ty * nx + tx] = stats.back;
                sigma[ty * nx + tx] = stats.sigma;
            }
        }

        if unpopulated > 0 {
            debug!(unpopulated, total = nx * ny, "filling under-populated background tiles");
            fill_unpopulated(&mut back, &mut sigma, nx, ny);
        }

        let back = median_filter_grid(&back, &sigma, nx, ny, config.fw, config.fh, config.fthresh);
        let sigma = median_filter_grid(&sigma, &sigma, nx, ny, config.fw, config.fh, 0.0);

        let mut scratch64: Vec<f64> = back.clone();
        let global = stats::median(&mut scratch64);
        scratch64.clear();
        scratch64.extend_from_slice(&sigma);
        let global_rms = stats::median(&mut scratch64);

        let dback = column_splines(&back, nx, ny);
        let dsigma = column_splines(&sigma, nx, ny);

        info!(nx, ny, global, global_rms, "background mesh fitted");

        Ok(Self {
            width: w,
            height: h,
            bw,
            bh,
            nx,
            ny,
            back,
            dback,
            sigma,
            dsigma,
            global,
            global_rms,
        })
    }

    /// Median of the tile background levels.
    pub fn global(&self) -> f32 {
        self.global as f32
    }

    /// Median of the tile noise levels.
    pub fn global_rms(&self) -> f32 {
        self.global_rms as f32
    }

    /// Background level at one pixel, bilinear in the tile grid.
    pub fn pixel(&self, x: usize, y: usize) -> f32 {
        bilinear(&self.back, self.nx, self.ny, self.mesh_x(x), self.mesh_y(y)) as f32
    }

    /// Noise level at one pixel, bilinear in the tile grid.
    pub fn rms_pixel(&self, x: usize, y: usize) -> f32 {
        bilinear(&self.sigma, self.nx, self.ny, self.mesh_x(x), self.mesh_y(y)) as f32
    }

    /// Fill `out` with the background level of pixel row `y` via bicubic
    /// spline interpolation.
    pub fn line(&self, y: usize, out: &mut [f32]) -> Result<()> {
        self.check_row(y, out.len())?;
        let mut row = vec![0.0f64; self.width];
        self.spline_row(&self.back, &self.dback, y, &mut row);
        for (o, v) in out.iter_mut().zip(row.iter()) {
            *o = *v as f32;
        }
        Ok(())
    }

    /// Fill `out` with the noise level of pixel row `y`.
    pub fn rms_line(&self, y: usize, out: &mut [f32]) -> Result<()> {
        self.check_row(y, out.len())?;
        let mut row = vec![0.0f64; self.width];
        self.spline_row(&self.sigma, &self.dsigma, y, &mut row);
        for (o, v) in out.iter_mut().zip(row.iter()) {
            *o = *v as f32;
        }
        Ok(())
    }

    /// Evaluate the full background image.
    pub fn array(&self) -> Array2<f32> {
        self.full_plane(&self.back, &self.dback)
    }

    /// Evaluate the full noise image.
    pub fn rms_array(&self) -> Array2<f32> {
        self.full_plane(&self.sigma, &self.dsigma)
    }

    /// Subtract the background in place from a caller buffer laid out like
    /// the source image. Only floating-point buffers are supported;
    /// subtracting into integer samples would round away the photometry.
    pub fn subtract_from(&self, buf: &mut PixelDataMut<'_>) -> Result<()> {
        if buf.len() != self.width * self.height {
            return Err(SiriusError::illegal(format!(
                "buffer holds {} elements, expected {}",
                buf.len(),
                self.width * self.height
            )));
        }
        let mut row = vec![0.0f64; self.width];
        match buf {
            PixelDataMut::F32(data) => {
                for y in 0..self.height {
                    self.spline_row(&self.back, &self.dback, y, &mut row);
                    let line = &mut data[y * self.width..(y + 1) * self.width];
                    for (d, b) in line.iter_mut().zip(row.iter()) {
                        *d -= *b as f32;
                    }
                }
                Ok(())
            }
            PixelDataMut::F64(data) => {
                for y in 0..self.height {
                    self.spline_row(&self.back, &self.dback, y, &mut row);
                    let line = &mut data[y * self.width..(y + 1) * self.width];
                    for (d, b) in line.iter_mut().zip(row.iter()) {
                        *d -= *b;
                    }
                }
                Ok(())
            }
            _ => Err(SiriusError::UnsupportedDtype {
                operation: "in-place background subtraction",
            }),
        }
    }

    fn check_row(&self, y: usize, len: usize) -> Result<()> {
        if y >= self.height {
            return Err(SiriusError::illegal(format!(
                "row {y} out of range for height {}",
                self.height
            )));
        }
        if len != self.width {
            return Err(SiriusError::illegal(format!(
                "row buffer holds {len} elements, expected {}",
                self.width
            )));
        }
        Ok(())
    }

    fn mesh_x(&self, x: usize) -> f64 {
        (x as f64 + 0.5) / self.bw as f64 - 0.5
    }

    fn mesh_y(&self, y: usize) -> f64 {
        (y as f64 + 0.5) / self.bh as f64 - 0.5
    }

    /// Bicubic row evaluation: spline each mesh column at the row's mesh
    /// ordinate, then spline the resulting node row along x.
    fn spline_row(&self, grid: &[f64], dgrid: &[f64], y: usize, out: &mut [f64]) {
        let nx = self.nx;
        let ny = self.ny;
        let mut nodes = vec![0.0f64; nx];

        if ny == 1 {
            nodes.copy_from_slice(&grid[..nx]);
        } else {
            let yc = self.mesh_y(y).clamp(0.0, (ny - 1) as f64);
            let j = (yc.floor() as usize).min(ny - 2);
            let t = yc - j as f64;
            for x in 0..nx {
                nodes[x] = spline::eval(
                    grid[j * nx + x],
                    grid[(j + 1) * nx + x],
                    dgrid[j * nx + x],
                    dgrid[(j + 1) * nx + x],
                    t,
                );
            }
        }

        let dnodes = spline::second_derivatives(&nodes);
        for (x, o) in out.iter_mut().enumerate() {
            *o = spline::interp(&nodes, &dnodes, self.mesh_x(x));
        }
    }

    fn full_plane(&self, grid: &[f64], dgrid: &[f64]) -> Array2<f32> {
        let mut plane = Array2::<f32>::zeros((self.height, self.width));
        let mut row = vec![0.0f64; self.width];
        for y in 0..self.height {
            self.spline_row(grid, dgrid, y, &mut row);
            for x in 0..self.width {
                plane[[y, x]] = row[x] as f32;
            }
        }
        plane
    }
}

/// Copy the nearest populated tile into each unpopulated one. Distance is
/// squared Euclidean in tile units; the first tile in raster order wins a
/// tie. A grid with no populated tile at all becomes flat zero.
fn fill_unpopulated(back: &mut [f64], sigma: &mut [f64], nx: usize, ny: usize) {
    let populated: Vec<usize> = (0..nx * ny).filter(|&i| !back[i].is_nan()).collect();

    if populated.is_empty() {
        back.fill(0.0);
        sigma.fill(0.0);
        return;
    }

    for ty in 0..ny {
        for tx in 0..nx {
            let i = ty * nx + tx;
            if !back[i].is_nan() {
                continue;
            }
            let mut best = usize::MAX;
            let mut best_d = u64::MAX;
            for &p in &populated {
                let px = (p % nx) as i64;
                let py = (p / nx) as i64;
                let dx = px - tx as i64;
                let dy = py - ty as i64;
                let d = (dx * dx + dy * dy) as u64;
                if d < best_d {
                    best_d = d;
                    best = p;
                }
            }
            back[i] = back[best];
            sigma[i] = sigma[best];
        }
    }
}

/// Median-filter a tile grid with a window clamped at the grid border.
/// A value is replaced only when it deviates from the window median by more
/// than `fthresh` times the local sigma.
fn median_filter_grid(
    grid: &[f64],
    local_sigma: &[f64],
    nx: usize,
    ny: usize,
    fw: usize,
    fh: usize,
    fthresh: f32,
) -> Vec<f64> {
    if fw <= 1 && fh <= 1 {
        return grid.to_vec();
    }
    let hw = fw / 2;
    let hh = fh / 2;
    let mut out = vec![0.0f64; grid.len()];
    let mut window: Vec<f64> = Vec::with_capacity(fw * fh);

    for ty in 0..ny {
        for tx in 0..nx {
            window.clear();
            let y0 = ty.saturating_sub(hh);
            let y1 = (ty + hh + 1).min(ny);
            let x0 = tx.saturating_sub(hw);
            let x1 = (tx + hw + 1).min(nx);
            for wy in y0..y1 {
                for wx in x0..x1 {
                    window.push(grid[wy * nx + wx]);
                }
            }
            let i = ty * nx + tx;
            let med = stats::median(&mut window);
            let cut = fthresh as f64 * local_sigma[i].max(EPSILON);
            out[i] = if (grid[i] - med).abs() > cut {
                med
            } else {
                grid[i]
            };
        }
    }
    out
}

/// Second derivatives along y for every mesh column, stored in the same
/// row-major layout as the grid itself.
fn column_splines(grid: &[f64], nx: usize, ny: usize) -> Vec<f64> {
    let mut d = vec![0.0f64; nx * ny];
    let mut column = vec![0.0f64; ny];
    for x in 0..nx {
        for y in 0..ny {
            column[y] = grid[y * nx + x];
        }
        let d2 = spline::second_derivatives(&column);
        for y in 0..ny {
            d[y * nx + x] = d2[y];
        }
    }
    d
}

fn bilinear(grid: &[f64], nx: usize, ny: usize, xc: f64, yc: f64) -> f64 {
    let xc = xc.clamp(0.0, (nx - 1) as f64);
    let yc = yc.clamp(0.0, (ny - 1) as f64);
    let x0 = (xc.floor() as usize).min(nx - 1);
    let y0 = (yc.floor() as usize).min(ny - 1);
    let x1 = (x0 + 1).min(nx - 1);
    let y1 = (y0 + 1).min(ny - 1);
    let tx = xc - x0 as f64;
    let ty = yc - y0 as f64;
    let top = grid[y0 * nx + x0] * (1.0 - tx) + grid[y0 * nx + x1] * tx;
    let bot = grid[y1 * nx + x0] * (1.0 - tx) + grid[y1 * nx + x1] * tx;
    top * (1.0 - ty) + bot * ty
}
