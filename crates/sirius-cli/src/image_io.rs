//! Loading and saving grayscale images for the command-line tool.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};

/// A grayscale image as a flat row-major f32 buffer.
pub struct LoadedImage {
    pub data: Vec<f32>,
    pub width: usize,
    pub height: usize,
}

pub fn load_image(path: &Path) -> Result<LoadedImage> {
    let img = image::open(path).with_context(|| format!("opening {}", path.display()))?;
    let luma = img.to_luma32f();
    let (width, height) = luma.dimensions();
    Ok(LoadedImage {
        data: luma.into_raw(),
        width: width as usize,
        height: height as usize,
    })
}

/// Save a float image, rescaled to the full 16-bit range so any container
/// format can hold it.
pub fn save_image(path: &Path, data: &[f32], width: usize, height: usize) -> Result<()> {
    let (lo, hi) = data
        .iter()
        .fold((f32::INFINITY, f32::NEG_INFINITY), |(lo, hi), &v| {
            (lo.min(v), hi.max(v))
        });
    let range = if hi > lo { hi - lo } else { 1.0 };
    let buf: Vec<u16> = data
        .iter()
        .map(|&v| (((v - lo) / range) * u16::MAX as f32) as u16)
        .collect();
    let img = image::ImageBuffer::<image::Luma<u16>, Vec<u16>>::from_raw(
        width as u32,
        height as u32,
        buf,
    )
    .context("building output image buffer")?;
    img.save(path)
        .with_context(|| format!("writing {}", path.display()))?;
    Ok(())
}

/// Derive an output path next to `input` with a suffix appended to the
/// file stem.
pub fn sibling_path(input: &Path, suffix: &str) -> PathBuf {
    let stem = input
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "output".to_string());
    let ext = input
        .extension()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "png".to_string());
    input.with_file_name(format!("{stem}{suffix}.{ext}"))
}
