use std::path::PathBuf;

use anyhow::Result;
use clap::Args;
use console::Style;
use sirius_core::background::{Background, BackgroundConfig};
use sirius_core::image::{ImageView, PixelData, PixelDataMut};

use crate::image_io::{load_image, save_image, sibling_path};

#[derive(Args)]
pub struct BackgroundArgs {
    /// Input image files (PNG or TIFF)
    #[arg(required = true)]
    pub files: Vec<PathBuf>,

    /// Background tile size in pixels
    #[arg(long, default_value = "64")]
    pub box_size: usize,

    /// Median-filter window in tiles
    #[arg(long, default_value = "3")]
    pub filter_size: usize,

    /// Median-filter threshold in local-sigma units (0 = always filter)
    #[arg(long, default_value = "0")]
    pub fthresh: f32,

    /// Write the background-subtracted image next to the input
    #[arg(long)]
    pub subtract: bool,
}

pub fn run(args: &BackgroundArgs) -> Result<()> {
    let label = Style::new().dim();
    let value = Style::new().bold().white();
    let path_style = Style::new().underlined();

    let config = BackgroundConfig {
        bw: args.box_size,
        bh: args.box_size,
        fw: args.filter_size,
        fh: args.filter_size,
        fthresh: args.fthresh,
    };

    for file in &args.files {
        let mut img = load_image(file)?;
        let view = ImageView::new(PixelData::F32(&img.data), img.width, img.height)?;
        let bkg = Background::new(&view, &config)?;

        println!("\n  {}", path_style.apply_to(file.display()));
        println!(
            "  {:<14}{}",
            label.apply_to("Size"),
            value.apply_to(format!("{}x{}", img.width, img.height))
        );
        println!(
            "  {:<14}{}",
            label.apply_to("Background"),
            value.apply_to(format!("{:.4}", bkg.global()))
        );
        println!(
            "  {:<14}{}",
            label.apply_to("RMS"),
            value.apply_to(format!("{:.4}", bkg.global_rms()))
        );

        if args.subtract {
            bkg.subtract_from(&mut PixelDataMut::F32(&mut img.data))?;
            let out = sibling_path(file, "_sub");
            save_image(&out, &img.data, img.width, img.height)?;
            println!(
                "  {:<14}{}",
                label.apply_to("Subtracted"),
                path_style.apply_to(out.display())
            );
        }
    }
    Ok(())
}
