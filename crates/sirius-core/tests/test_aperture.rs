mod common;

use approx::assert_abs_diff_eq;
use sirius_core::aperture::{
    ellipse_axes, ellipse_coeffs, sum_circann, sum_circle, sum_ellipse, ApertureOptions,
};
use sirius_core::flags;
use sirius_core::image::{ImageView, NoiseKind, PixelData};

use common::flat;

const PI: f64 = std::f64::consts::PI;

fn opts() -> ApertureOptions {
    ApertureOptions::default()
}

// ---------------------------------------------------------------------------
// Sums on flat fields
// ---------------------------------------------------------------------------

#[test]
fn circle_sum_on_flat_field() {
    let data = flat(64, 64, 2.0);
    let view = ImageView::new(PixelData::F32(&data), 64, 64).unwrap();
    let res = sum_circle(&view, 32.0, 32.0, 5.0, &opts()).unwrap();
    let expect = 2.0 * PI * 25.0;
    assert_abs_diff_eq!(res.sum, expect, epsilon = expect * 0.02);
    assert_abs_diff_eq!(res.area, PI * 25.0, epsilon = PI * 25.0 * 0.02);
    assert_eq!(res.flag, 0);
}

#[test]
fn annulus_sum_is_outer_minus_inner() {
    let data = flat(64, 64, 1.0);
    let view = ImageView::new(PixelData::F32(&data), 64, 64).unwrap();
    let outer = sum_circle(&view, 32.0, 32.0, 8.0, &opts()).unwrap();
    let inner = sum_circle(&view, 32.0, 32.0, 4.0, &opts()).unwrap();
    let ann = sum_circann(&view, 32.0, 32.0, 4.0, 8.0, &opts()).unwrap();
    assert_abs_diff_eq!(ann.sum, outer.sum - inner.sum, epsilon = 2.0);
}

#[test]
fn ellipse_sum_on_flat_field() {
    let data = flat(64, 64, 1.5);
    let view = ImageView::new(PixelData::F32(&data), 64, 64).unwrap();
    let res = sum_ellipse(&view, 32.0, 32.0, 6.0, 3.0, 0.4, 1.0, &opts()).unwrap();
    let expect = 1.5 * PI * 6.0 * 3.0;
    assert_abs_diff_eq!(res.sum, expect, epsilon = expect * 0.02);
}

#[test]
fn subpixel_sampling_refines_the_boundary() {
    let data = flat(64, 64, 1.0);
    let view = ImageView::new(PixelData::F32(&data), 64, 64).unwrap();
    let coarse = sum_circle(
        &view,
        32.3,
        32.7,
        3.0,
        &ApertureOptions {
            subpix: 1,
            ..opts()
        },
    )
    .unwrap();
    let fine = sum_circle(
        &view,
        32.3,
        32.7,
        3.0,
        &ApertureOptions {
            subpix: 11,
            ..opts()
        },
    )
    .unwrap();
    let exact = PI * 9.0;
    assert!((fine.sum - exact).abs() <= (coarse.sum - exact).abs() + 0.1);
    assert_abs_diff_eq!(fine.sum, exact, epsilon = exact * 0.01);
}

// ---------------------------------------------------------------------------
// Flags and masking
// ---------------------------------------------------------------------------

#[test]
fn aperture_off_the_edge_is_flagged_truncated() {
    let data = flat(32, 32, 1.0);
    let view = ImageView::new(PixelData::F32(&data), 32, 32).unwrap();
    let res = sum_circle(&view, 2.0, 16.0, 5.0, &opts()).unwrap();
    assert_ne!(res.flag & flags::APER_TRUNC, 0);
}

#[test]
fn masked_pixels_flag_and_rescale() {
    let data = flat(64, 64, 3.0);
    let mut mask = vec![0u8; 64 * 64];
    // Mask the right half of the aperture region.
    for y in 0..64 {
        for x in 32..64 {
            mask[y * 64 + x] = 1;
        }
    }
    let view = ImageView::new(PixelData::F32(&data), 64, 64)
        .unwrap()
        .with_mask(PixelData::U8(&mask), 0.5)
        .unwrap();
    let res = sum_circle(&view, 31.5, 32.0, 4.0, &opts()).unwrap();
    assert_ne!(res.flag & flags::APER_HASMASKED, 0);
    // The correction extrapolates the visible half over the full area.
    let expect = 3.0 * PI * 16.0;
    assert_abs_diff_eq!(res.sum, expect, epsilon = expect * 0.1);
}

#[test]
fn fully_masked_aperture_is_flagged_all_masked() {
    let data = flat(32, 32, 3.0);
    let mask = vec![1u8; 32 * 32];
    let view = ImageView::new(PixelData::F32(&data), 32, 32)
        .unwrap()
        .with_mask(PixelData::U8(&mask), 0.5)
        .unwrap();
    let res = sum_circle(&view, 16.0, 16.0, 4.0, &opts()).unwrap();
    assert_ne!(res.flag & flags::APER_ALLMASKED, 0);
    assert_eq!(res.sum, 0.0);
}

#[test]
fn segmap_excludes_other_objects() {
    let data = flat(32, 32, 1.0);
    let mut segmap = vec![0i32; 32 * 32];
    // Object 2 occupies a quadrant near the aperture center.
    for y in 16..32 {
        for x in 16..32 {
            segmap[y * 32 + x] = 2;
        }
    }
    let ids = [(2, 256usize)];
    let view = ImageView::new(PixelData::F32(&data), 32, 32)
        .unwrap()
        .with_segmap(&segmap, &ids)
        .unwrap();

    // Restricted to object 2 only: a quarter of the aperture remains
    // visible, and the mask correction scales it back up.
    let own = sum_circle(
        &view,
        16.0,
        16.0,
        4.0,
        &ApertureOptions {
            seg_id: Some(-2),
            ..opts()
        },
    )
    .unwrap();
    assert_ne!(own.flag & flags::APER_HASMASKED, 0);
    assert!(own.area < PI * 16.0 / 2.0);

    // Positive id: object 2 pixels and unlabelled background both count.
    let with_bg = sum_circle(
        &view,
        16.0,
        16.0,
        4.0,
        &ApertureOptions {
            seg_id: Some(2),
            ..opts()
        },
    )
    .unwrap();
    assert_eq!(with_bg.flag & flags::APER_HASMASKED, 0);
}

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

#[test]
fn error_estimate_includes_noise_and_gain() {
    let data = flat(64, 64, 4.0);
    let noise = flat(64, 64, 2.0);
    let view = ImageView::new(PixelData::F32(&data), 64, 64)
        .unwrap()
        .with_noise(PixelData::F32(&noise), NoiseKind::Stddev)
        .unwrap()
        .with_gain(1.0);
    let res = sum_circle(&view, 32.0, 32.0, 5.0, &opts()).unwrap();
    // err^2 = area * sigma^2 + sum / gain.
    let area = PI * 25.0;
    let expect = (area * 4.0 + res.sum).sqrt();
    assert_abs_diff_eq!(res.sum_err, expect, epsilon = expect * 0.05);
}

#[test]
fn invalid_aperture_parameters_are_rejected() {
    let data = flat(16, 16, 1.0);
    let view = ImageView::new(PixelData::F32(&data), 16, 16).unwrap();
    assert!(sum_circle(&view, 8.0, 8.0, 0.0, &opts()).is_err());
    assert!(sum_circle(&view, 8.0, 8.0, f64::NAN, &opts()).is_err());
    assert!(sum_circann(&view, 8.0, 8.0, 5.0, 3.0, &opts()).is_err());
    assert!(sum_ellipse(&view, 8.0, 8.0, -1.0, 1.0, 0.0, 1.0, &opts()).is_err());
    let bad_subpix = ApertureOptions {
        subpix: 0,
        ..opts()
    };
    assert!(sum_circle(&view, 8.0, 8.0, 2.0, &bad_subpix).is_err());
}

// ---------------------------------------------------------------------------
// Ellipse conversions
// ---------------------------------------------------------------------------

#[test]
fn ellipse_round_trip_preserves_parameters() {
    for &(a, b, theta) in &[(4.0, 2.0, 0.0), (4.0, 2.0, 1.1), (2.5, 2.5, 0.0)] {
        let (cxx, cyy, cxy) = ellipse_coeffs(a, b, theta).unwrap();
        let (ra, rb, rt) = ellipse_axes(cxx, cyy, cxy).unwrap();
        assert_abs_diff_eq!(ra, a, epsilon = 1e-9);
        assert_abs_diff_eq!(rb, b, epsilon = 1e-9);
        assert_abs_diff_eq!(rt, theta, epsilon = 1e-9);
    }
}

#[test]
fn unit_circle_coefficients_are_identity() {
    let (cxx, cyy, cxy) = ellipse_coeffs(1.0, 1.0, 0.0).unwrap();
    assert_abs_diff_eq!(cxx, 1.0, epsilon = 1e-12);
    assert_abs_diff_eq!(cyy, 1.0, epsilon = 1e-12);
    assert_abs_diff_eq!(cxy, 0.0, epsilon = 1e-12);
}
