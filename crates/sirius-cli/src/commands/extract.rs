use std::fs::File;
use std::io::BufWriter;
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Args, ValueEnum};
use console::Style;
use indicatif::{ProgressBar, ProgressStyle};
use rayon::prelude::*;
use sirius_core::background::{Background, BackgroundConfig};
use tracing::info;
use sirius_core::extract::{extract, Catalog, ExtractConfig};
use sirius_core::filter::{FilterKind, Kernel, ThreshKind};
use sirius_core::image::{ImageView, NoiseKind, PixelData, PixelDataMut};

use crate::image_io::{load_image, sibling_path};

#[derive(Clone, ValueEnum)]
pub enum FilterArg {
    /// Plain convolution
    Conv,
    /// Noise-weighted matched filter (default)
    Matched,
}

#[derive(Args)]
pub struct ExtractArgs {
    /// Input image files (PNG or TIFF)
    #[arg(required = true)]
    pub files: Vec<PathBuf>,

    /// Detection threshold (sigma multiples unless --abs)
    #[arg(long, default_value = "1.5")]
    pub thresh: f64,

    /// Interpret the threshold in data units
    #[arg(long)]
    pub abs: bool,

    /// Minimum object area in pixels
    #[arg(long, default_value = "5")]
    pub minarea: usize,

    /// Disable the detection kernel
    #[arg(long)]
    pub no_filter: bool,

    /// Filtering semantics
    #[arg(long, value_enum, default_value = "matched")]
    pub filter: FilterArg,

    /// Number of deblending thresholds
    #[arg(long, default_value = "32")]
    pub deblend_nthresh: usize,

    /// Deblending contrast
    #[arg(long, default_value = "0.005")]
    pub deblend_cont: f64,

    /// Disable cleaning
    #[arg(long)]
    pub no_clean: bool,

    /// Cleaning ellipse scale
    #[arg(long, default_value = "1.0")]
    pub clean_param: f64,

    /// Background tile size in pixels
    #[arg(long, default_value = "64")]
    pub box_size: usize,

    /// Write each catalog as JSON next to its input
    #[arg(long)]
    pub json: bool,

    /// Rows to print per image (brightest first)
    #[arg(long, default_value = "20")]
    pub top: usize,
}

struct Extraction {
    file: PathBuf,
    background: f32,
    rms: f32,
    catalog: Catalog,
}

pub fn run(args: &ExtractArgs) -> Result<()> {
    let extract_config = ExtractConfig {
        thresh: args.thresh,
        thresh_kind: if args.abs {
            ThreshKind::Absolute
        } else {
            ThreshKind::Relative
        },
        min_area: args.minarea,
        kernel: if args.no_filter {
            None
        } else {
            Some(Kernel::default_3x3())
        },
        filter_kind: match args.filter {
            FilterArg::Conv => FilterKind::Conv,
            FilterArg::Matched => FilterKind::Matched,
        },
        deblend_nthresh: args.deblend_nthresh,
        deblend_cont: args.deblend_cont,
        clean: !args.no_clean,
        clean_param: args.clean_param,
    };
    let bkg_config = BackgroundConfig {
        bw: args.box_size,
        bh: args.box_size,
        ..BackgroundConfig::default()
    };

    let pb = ProgressBar::new(args.files.len() as u64);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("{msg} [{bar:40}] {pos}/{len}")?
            .progress_chars("=> "),
    );
    pb.set_message("Extracting");

    let mut results: Vec<Result<Extraction>> = args
        .files
        .par_iter()
        .map(|file| {
            let result = extract_one(file.clone(), &bkg_config, &extract_config);
            pb.inc(1);
            result
        })
        .collect();
    pb.finish_and_clear();

    for result in results.drain(..) {
        let extraction = result?;
        print_catalog(&extraction, args.top);
        if args.json {
            let out = sibling_path(&extraction.file, "_catalog").with_extension("json");
            let writer = BufWriter::new(
                File::create(&out).with_context(|| format!("creating {}", out.display()))?,
            );
            let rows: Vec<_> = extraction.catalog.rows().collect();
            serde_json::to_writer_pretty(writer, &rows)?;
            println!("  catalog written to {}", out.display());
        }
    }
    Ok(())
}

fn extract_one(
    file: PathBuf,
    bkg_config: &BackgroundConfig,
    extract_config: &ExtractConfig,
) -> Result<Extraction> {
    let mut img = load_image(&file)?;
    let view = ImageView::new(PixelData::F32(&img.data), img.width, img.height)?;
    let bkg = Background::new(&view, bkg_config)?;

    // Per-pixel noise from the background model, then detect on the
    // subtracted image.
    let mut noise = vec![0.0f32; img.width * img.height];
    for y in 0..img.height {
        bkg.rms_line(y, &mut noise[y * img.width..(y + 1) * img.width])?;
    }
    bkg.subtract_from(&mut PixelDataMut::F32(&mut img.data))?;

    let view = ImageView::new(PixelData::F32(&img.data), img.width, img.height)?
        .with_noise(PixelData::F32(&noise), NoiseKind::Stddev)?;
    let catalog = extract(&view, extract_config)?;
    info!(
        file = %file.display(),
        objects = catalog.len(),
        "extraction finished"
    );

    Ok(Extraction {
        file,
        background: bkg.global(),
        rms: bkg.global_rms(),
        catalog,
    })
}

fn print_catalog(extraction: &Extraction, top: usize) {
    let title = Style::new().cyan().bold();
    let label = Style::new().dim();

    println!("\n  {}", title.apply_to(extraction.file.display()));
    println!(
        "  {} {:.4}   {} {:.4}   {} {}",
        label.apply_to("background"),
        extraction.background,
        label.apply_to("rms"),
        extraction.rms,
        label.apply_to("objects"),
        extraction.catalog.len()
    );

    if extraction.catalog.is_empty() {
        return;
    }

    let mut order: Vec<usize> = (0..extraction.catalog.len()).collect();
    order.sort_by(|&i, &j| {
        extraction.catalog.flux[j]
            .partial_cmp(&extraction.catalog.flux[i])
            .unwrap_or(std::cmp::Ordering::Equal)
    });

    println!(
        "  {:>4}  {:>8}  {:>8}  {:>6}  {:>6}  {:>7}  {:>10}  {:>8}  {:>5}  {:>4}",
        "#", "x", "y", "a", "b", "theta", "flux", "peak", "npix", "flag"
    );
    for (rank, &i) in order.iter().take(top).enumerate() {
        let c = &extraction.catalog;
        println!(
            "  {:>4}  {:>8.2}  {:>8.2}  {:>6.2}  {:>6.2}  {:>7.3}  {:>10.2}  {:>8.2}  {:>5}  {:>4}",
            rank + 1,
            c.x[i],
            c.y[i],
            c.a[i],
            c.b[i],
            c.theta[i],
            c.flux[i],
            c.peak[i],
            c.npix[i],
            c.flag[i]
        );
    }
    if extraction.catalog.len() > top {
        println!("  ... {} more", extraction.catalog.len() - top);
    }
}
