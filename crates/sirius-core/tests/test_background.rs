mod common;

use approx::assert_abs_diff_eq;
use sirius_core::background::{Background, BackgroundConfig};
use sirius_core::image::{ImageView, PixelData, PixelDataMut};

use common::{add_gaussian, flat};

fn config(bw: usize) -> BackgroundConfig {
    BackgroundConfig {
        bw,
        bh: bw,
        ..BackgroundConfig::default()
    }
}

// ---------------------------------------------------------------------------
// Global statistics
// ---------------------------------------------------------------------------

#[test]
fn constant_image_has_exact_globals() {
    let data = flat(64, 64, 7.25);
    let view = ImageView::new(PixelData::F32(&data), 64, 64).unwrap();
    let bkg = Background::new(&view, &config(64)).unwrap();
    assert_eq!(bkg.global(), 7.25);
    assert_eq!(bkg.global_rms(), 0.0);
}

#[test]
fn constant_image_subtracts_to_zero() {
    let source = flat(64, 64, 3.5);
    let mut data = source.clone();
    let view = ImageView::new(PixelData::F32(&source), 64, 64).unwrap();
    let bkg = Background::new(&view, &config(16)).unwrap();
    bkg.subtract_from(&mut PixelDataMut::F32(&mut data)).unwrap();
    for v in &data {
        assert_abs_diff_eq!(*v, 0.0, epsilon = 1e-4);
    }
}

#[test]
fn bright_sources_do_not_drag_the_level() {
    let mut data = flat(128, 128, 10.0);
    for i in 0..8 {
        add_gaussian(&mut data, 128, 16.0 * i as f64 + 8.0, 64.0, 500.0, 1.5);
    }
    let view = ImageView::new(PixelData::F32(&data), 128, 128).unwrap();
    let bkg = Background::new(&view, &config(32)).unwrap();
    assert_abs_diff_eq!(bkg.global(), 10.0, epsilon = 0.5);
}

// ---------------------------------------------------------------------------
// Interpolation
// ---------------------------------------------------------------------------

#[test]
fn line_tracks_a_vertical_gradient() {
    // Background varies smoothly with y; the spline should follow it in
    // the interior.
    let w = 64;
    let h = 64;
    let mut data = vec![0.0f32; w * h];
    for y in 0..h {
        for x in 0..w {
            data[y * w + x] = 100.0 + y as f32;
        }
    }
    let view = ImageView::new(PixelData::F32(&data), w, h).unwrap();
    let bkg = Background::new(&view, &config(8)).unwrap();

    let mut row = vec![0.0f32; w];
    for &y in &[16usize, 32, 48] {
        bkg.line(y, &mut row).unwrap();
        for &v in &row {
            assert_abs_diff_eq!(v, 100.0 + y as f32, epsilon = 1.0);
        }
    }
}

#[test]
fn pixel_eval_matches_line_eval_roughly() {
    let w = 64;
    let h = 64;
    let mut data = vec![0.0f32; w * h];
    for y in 0..h {
        for x in 0..w {
            data[y * w + x] = (x as f32) * 0.5 + (y as f32) * 0.25;
        }
    }
    let view = ImageView::new(PixelData::F32(&data), w, h).unwrap();
    let bkg = Background::new(&view, &config(8)).unwrap();

    let mut row = vec![0.0f32; w];
    bkg.line(30, &mut row).unwrap();
    // Bilinear point eval and spline row eval agree on a smooth field.
    assert_abs_diff_eq!(bkg.pixel(20, 30), row[20], epsilon = 0.5);
}

#[test]
fn rms_line_is_flat_for_uniform_noise_free_image() {
    let data = flat(64, 64, 5.0);
    let view = ImageView::new(PixelData::F32(&data), 64, 64).unwrap();
    let bkg = Background::new(&view, &config(16)).unwrap();
    let mut row = vec![0.0f32; 64];
    bkg.rms_line(10, &mut row).unwrap();
    for &v in &row {
        assert_abs_diff_eq!(v, 0.0, epsilon = 1e-6);
    }
}

#[test]
fn array_matches_line_by_line_eval() {
    let w = 48;
    let h = 32;
    let mut data = vec![0.0f32; w * h];
    for y in 0..h {
        for x in 0..w {
            data[y * w + x] = (x + y) as f32;
        }
    }
    let view = ImageView::new(PixelData::F32(&data), w, h).unwrap();
    let bkg = Background::new(&view, &config(8)).unwrap();

    let plane = bkg.array();
    let mut row = vec![0.0f32; w];
    for y in 0..h {
        bkg.line(y, &mut row).unwrap();
        for x in 0..w {
            assert_eq!(plane[[y, x]], row[x]);
        }
    }
}

// ---------------------------------------------------------------------------
// Masking and tile filling
// ---------------------------------------------------------------------------

#[test]
fn masked_tiles_copy_their_neighbors() {
    let w = 64;
    let h = 64;
    let data = flat(w, h, 20.0);
    // Mask out the entire left half.
    let mut mask = vec![0u8; w * h];
    for y in 0..h {
        for x in 0..w / 2 {
            mask[y * w + x] = 1;
        }
    }
    let view = ImageView::new(PixelData::F32(&data), w, h)
        .unwrap()
        .with_mask(PixelData::U8(&mask), 0.5)
        .unwrap();
    let bkg = Background::new(&view, &config(16)).unwrap();
    // Unpopulated tiles inherit the populated level.
    assert_abs_diff_eq!(bkg.pixel(5, 32), 20.0, epsilon = 1e-3);
    assert_abs_diff_eq!(bkg.global(), 20.0, epsilon = 1e-3);
}

#[test]
fn sentinel_pixels_are_ignored() {
    let mut data = flat(64, 64, 12.0);
    data[100] = f32::NAN;
    data[200] = -1e31;
    let view = ImageView::new(PixelData::F32(&data), 64, 64).unwrap();
    let bkg = Background::new(&view, &config(64)).unwrap();
    assert_abs_diff_eq!(bkg.global(), 12.0, epsilon = 1e-4);
}

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

#[test]
fn tile_larger_than_image_is_rejected() {
    let data = flat(32, 32, 1.0);
    let view = ImageView::new(PixelData::F32(&data), 32, 32).unwrap();
    let err = Background::new(&view, &config(64)).unwrap_err();
    assert_eq!(err.status(), 4);
}

#[test]
fn integer_subtraction_buffer_is_rejected() {
    let data = flat(32, 32, 1.0);
    let view = ImageView::new(PixelData::F32(&data), 32, 32).unwrap();
    let bkg = Background::new(&view, &config(32)).unwrap();
    let mut buf = vec![0i32; 32 * 32];
    let err = bkg
        .subtract_from(&mut PixelDataMut::I32(&mut buf))
        .unwrap_err();
    assert_eq!(err.status(), 3);
}

#[test]
fn wrong_row_buffer_length_is_rejected() {
    let data = flat(32, 32, 1.0);
    let view = ImageView::new(PixelData::F32(&data), 32, 32).unwrap();
    let bkg = Background::new(&view, &config(32)).unwrap();
    let mut short = vec![0.0f32; 16];
    assert!(bkg.line(0, &mut short).is_err());
    assert!(bkg.line(99, &mut vec![0.0f32; 32]).is_err());
}
