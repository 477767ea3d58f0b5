mod common;

use std::collections::HashSet;

use approx::assert_abs_diff_eq;
use sirius_core::extract::{extract, ExtractConfig};
use sirius_core::filter::{FilterKind, ThreshKind};
use sirius_core::flags;
use sirius_core::image::{ImageView, PixelData};

use common::{add_gaussian, add_lcg_noise, flat};

fn abs_config(thresh: f64, min_area: usize) -> ExtractConfig {
    ExtractConfig {
        thresh,
        thresh_kind: ThreshKind::Absolute,
        min_area,
        kernel: None,
        ..ExtractConfig::default()
    }
}

// ---------------------------------------------------------------------------
// Empty and single-source scenarios
// ---------------------------------------------------------------------------

#[test]
fn constant_zero_image_yields_no_objects() {
    let data = flat(64, 64, 0.0);
    let view = ImageView::new(PixelData::F32(&data), 64, 64).unwrap();
    let catalog = extract(&view, &abs_config(1.0, 5)).unwrap();
    assert!(catalog.is_empty());
}

#[test]
fn centered_gaussian_is_one_round_object() {
    let mut data = flat(32, 32, 0.0);
    add_gaussian(&mut data, 32, 16.0, 16.0, 10.0, 2.0);
    let view = ImageView::new(PixelData::F32(&data), 32, 32).unwrap();
    let catalog = extract(&view, &abs_config(3.0, 5)).unwrap();

    assert_eq!(catalog.len(), 1);
    assert_abs_diff_eq!(catalog.x[0], 16.0, epsilon = 0.05);
    assert_abs_diff_eq!(catalog.y[0], 16.0, epsilon = 0.05);
    assert!(catalog.tnpix[0] >= 5);
    assert!(catalog.npix[0] >= catalog.tnpix[0]);
    // A symmetric source measures round: a and b agree and sit in the
    // truncated-profile range for sigma = 2.
    let a = catalog.a[0];
    let b = catalog.b[0];
    assert!(a >= b && b > 0.0);
    assert!((a - b) / a < 0.05, "a={a} b={b} should be nearly equal");
    assert!((1.0..=2.5).contains(&a), "a={a} out of range");
    assert_eq!(catalog.flag[0] & flags::OBJ_TRUNC, 0);
    // Peak lands on the center pixel.
    assert_eq!((catalog.xpeak[0], catalog.ypeak[0]), (16, 16));
}

#[test]
fn bounding_box_contains_barycenter() {
    let mut data = flat(64, 64, 0.0);
    add_gaussian(&mut data, 64, 20.0, 40.0, 8.0, 1.5);
    add_gaussian(&mut data, 64, 45.0, 12.0, 6.0, 2.5);
    let view = ImageView::new(PixelData::F32(&data), 64, 64).unwrap();
    let catalog = extract(&view, &abs_config(1.0, 5)).unwrap();

    assert_eq!(catalog.len(), 2);
    for i in 0..catalog.len() {
        assert!(catalog.xmin[i] as f64 <= catalog.x[i]);
        assert!(catalog.x[i] <= catalog.xmax[i] as f64);
        assert!(catalog.ymin[i] as f64 <= catalog.y[i]);
        assert!(catalog.y[i] <= catalog.ymax[i] as f64);
        assert!(catalog.a[i] >= catalog.b[i]);
        assert!(catalog.b[i] >= 0.0);
        let half_pi = std::f32::consts::FRAC_PI_2;
        assert!((-half_pi..=half_pi).contains(&catalog.theta[i]));
    }
}

// ---------------------------------------------------------------------------
// Deblending
// ---------------------------------------------------------------------------

#[test]
fn overlapping_pair_deblends_at_low_contrast() {
    let mut data = flat(32, 32, 0.0);
    add_gaussian(&mut data, 32, 13.0, 16.0, 10.0, 1.0);
    add_gaussian(&mut data, 32, 16.0, 16.0, 7.0, 1.0);
    let view = ImageView::new(PixelData::F32(&data), 32, 32).unwrap();

    let catalog = extract(&view, &abs_config(1.0, 5)).unwrap();
    assert_eq!(catalog.len(), 2);
    for i in 0..2 {
        assert_ne!(catalog.flag[i] & flags::OBJ_MERGED, 0);
    }
    // The components sit near the injected centers.
    let mut xs: Vec<f64> = catalog.x.clone();
    xs.sort_by(|p, q| p.total_cmp(q));
    assert_abs_diff_eq!(xs[0], 13.0, epsilon = 0.5);
    assert_abs_diff_eq!(xs[1], 16.0, epsilon = 0.5);
}

#[test]
fn overlapping_pair_stays_merged_at_high_contrast() {
    let mut data = flat(32, 32, 0.0);
    add_gaussian(&mut data, 32, 13.0, 16.0, 10.0, 1.0);
    add_gaussian(&mut data, 32, 16.0, 16.0, 7.0, 1.0);
    let view = ImageView::new(PixelData::F32(&data), 32, 32).unwrap();

    let config = ExtractConfig {
        deblend_cont: 0.5,
        ..abs_config(1.0, 5)
    };
    let catalog = extract(&view, &config).unwrap();
    assert_eq!(catalog.len(), 1);
    assert_eq!(catalog.flag[0] & flags::OBJ_MERGED, 0);
}

#[test]
fn deblending_disabled_by_unit_contrast() {
    // deblend_cont = 1.0 can never promote two branches.
    let mut data = flat(32, 32, 0.0);
    add_gaussian(&mut data, 32, 13.0, 16.0, 10.0, 1.0);
    add_gaussian(&mut data, 32, 16.0, 16.0, 7.0, 1.0);
    let view = ImageView::new(PixelData::F32(&data), 32, 32).unwrap();
    let config = ExtractConfig {
        deblend_cont: 1.0,
        ..abs_config(1.0, 5)
    };
    let catalog = extract(&view, &config).unwrap();
    assert_eq!(catalog.len(), 1);
}

// ---------------------------------------------------------------------------
// Flags
// ---------------------------------------------------------------------------

#[test]
fn border_source_is_flagged_truncated() {
    let mut data = flat(32, 32, 0.0);
    add_gaussian(&mut data, 32, 2.0, 16.0, 10.0, 1.5);
    let view = ImageView::new(PixelData::F32(&data), 32, 32).unwrap();
    let catalog = extract(&view, &abs_config(1.0, 5)).unwrap();

    assert_eq!(catalog.len(), 1);
    assert!(flags::has(catalog.flag[0], flags::OBJ_TRUNC));
    assert_eq!(catalog.xmin[0], 0);
}

#[test]
fn single_bright_pixel_is_flagged_singular() {
    let mut data = flat(16, 16, 0.0);
    data[8 * 16 + 8] = 50.0;
    let view = ImageView::new(PixelData::F32(&data), 16, 16).unwrap();
    let catalog = extract(&view, &abs_config(1.0, 1)).unwrap();

    assert_eq!(catalog.len(), 1);
    assert_ne!(catalog.flag[0] & flags::OBJ_SINGU, 0);
    assert!(catalog.a[0] > 0.0);
}

// ---------------------------------------------------------------------------
// Accounting invariants
// ---------------------------------------------------------------------------

#[test]
fn pixel_sets_are_disjoint_and_account_for_npix() {
    let mut data = flat(64, 64, 0.0);
    add_lcg_noise(&mut data, 42, 0.4);
    for &(x, y, amp) in &[
        (10.0, 10.0, 9.0),
        (12.5, 11.0, 6.0),
        (40.0, 45.0, 8.0),
        (55.0, 20.0, 7.0),
        (41.5, 47.0, 5.0),
    ] {
        add_gaussian(&mut data, 64, x, y, amp, 1.2);
    }
    let view = ImageView::new(PixelData::F32(&data), 64, 64).unwrap();
    let catalog = extract(&view, &abs_config(1.5, 3)).unwrap();
    assert!(!catalog.is_empty());

    let mut seen = HashSet::new();
    let mut total = 0usize;
    for i in 0..catalog.len() {
        let pixels = catalog.pixels(i);
        assert_eq!(pixels.len(), catalog.npix[i]);
        total += pixels.len();
        for &p in pixels {
            assert!((p as usize) < 64 * 64, "pixel index out of range");
            assert!(seen.insert(p), "pixel {p} assigned to two objects");
        }
        // Lists are sorted ascending.
        assert!(pixels.windows(2).all(|w| w[0] < w[1]));
    }
    assert_eq!(seen.len(), total);
}

#[test]
fn nonconvex_object_keeps_every_pixel() {
    // A U-shaped plateau forces a mid-scan union of two provisional
    // objects; the catalog entry must still carry the full pixel list.
    let mut data = flat(16, 16, 0.0);
    for y in 3..10 {
        data[y * 16 + 4] = 5.0;
        data[y * 16 + 11] = 5.0;
    }
    for x in 4..12 {
        data[10 * 16 + x] = 5.0;
    }
    let view = ImageView::new(PixelData::F32(&data), 16, 16).unwrap();
    let catalog = extract(&view, &abs_config(1.0, 1)).unwrap();

    assert_eq!(catalog.len(), 1);
    let expect_npix = 7 * 2 + 8;
    assert_eq!(catalog.npix[0], expect_npix);
    assert_eq!(catalog.pixels(0).len(), catalog.npix[0]);
    let unique: HashSet<u32> = catalog.pixels(0).iter().copied().collect();
    assert_eq!(unique.len(), expect_npix);
    assert_abs_diff_eq!(catalog.flux[0], 5.0 * expect_npix as f64, epsilon = 1e-6);
}

#[test]
fn segmap_labels_match_pixel_lists() {
    let mut data = flat(32, 32, 0.0);
    add_gaussian(&mut data, 32, 8.0, 8.0, 10.0, 1.5);
    add_gaussian(&mut data, 32, 24.0, 24.0, 10.0, 1.5);
    let view = ImageView::new(PixelData::F32(&data), 32, 32).unwrap();
    let catalog = extract(&view, &abs_config(1.0, 5)).unwrap();
    assert_eq!(catalog.len(), 2);

    let map = catalog.segmap();
    let mut labelled = 0usize;
    for y in 0..32 {
        for x in 0..32 {
            if map[[y, x]] != 0 {
                labelled += 1;
            }
        }
    }
    assert_eq!(labelled, catalog.npix.iter().sum::<usize>());
    for i in 0..catalog.len() {
        for &p in catalog.pixels(i) {
            let y = p as usize / 32;
            let x = p as usize % 32;
            assert_eq!(map[[y, x]], i as i32 + 1);
        }
    }
}

#[test]
fn extraction_is_deterministic() {
    let mut data = flat(64, 64, 0.0);
    add_lcg_noise(&mut data, 7, 1.0);
    add_gaussian(&mut data, 64, 20.0, 20.0, 12.0, 1.8);
    add_gaussian(&mut data, 64, 22.0, 23.0, 9.0, 1.4);
    add_gaussian(&mut data, 64, 50.0, 40.0, 10.0, 2.0);
    let view = ImageView::new(PixelData::F32(&data), 64, 64).unwrap();

    let config = ExtractConfig {
        thresh: 2.0,
        thresh_kind: ThreshKind::Absolute,
        min_area: 4,
        ..ExtractConfig::default()
    };
    let first = extract(&view, &config).unwrap();
    let second = extract(&view, &config).unwrap();
    assert_eq!(first, second);
}

// ---------------------------------------------------------------------------
// Thresholding and noise
// ---------------------------------------------------------------------------

#[test]
fn relative_threshold_uses_scalar_noise() {
    let mut data = flat(32, 32, 0.0);
    add_gaussian(&mut data, 32, 16.0, 16.0, 10.0, 2.0);
    // Relative threshold 3 with scalar sigma 1 behaves like absolute 3.
    let view = ImageView::new(PixelData::F32(&data), 32, 32)
        .unwrap()
        .with_noise_value(1.0, sirius_core::image::NoiseKind::Stddev);
    let config = ExtractConfig {
        thresh: 3.0,
        thresh_kind: ThreshKind::Relative,
        min_area: 5,
        kernel: None,
        ..ExtractConfig::default()
    };
    let catalog = extract(&view, &config).unwrap();
    assert_eq!(catalog.len(), 1);
    assert_abs_diff_eq!(catalog.thresh[0], 3.0, epsilon = 1e-6);
}

#[test]
fn relative_threshold_without_noise_is_an_error() {
    let data = flat(16, 16, 0.0);
    let view = ImageView::new(PixelData::F32(&data), 16, 16).unwrap();
    let config = ExtractConfig {
        thresh_kind: ThreshKind::Relative,
        ..ExtractConfig::default()
    };
    let err = extract(&view, &config).unwrap_err();
    assert_eq!(err.status(), 7);
}

#[test]
fn masked_sources_are_not_detected() {
    let mut data = flat(32, 32, 0.0);
    add_gaussian(&mut data, 32, 8.0, 8.0, 10.0, 1.5);
    add_gaussian(&mut data, 32, 24.0, 24.0, 10.0, 1.5);
    let mut mask = vec![0u8; 32 * 32];
    // Mask a generous box around the first source.
    for y in 0..16 {
        for x in 0..16 {
            mask[y * 32 + x] = 1;
        }
    }
    let view = ImageView::new(PixelData::F32(&data), 32, 32)
        .unwrap()
        .with_mask(PixelData::U8(&mask), 0.5)
        .unwrap();
    let catalog = extract(&view, &abs_config(1.0, 5)).unwrap();
    assert_eq!(catalog.len(), 1);
    assert!(catalog.x[0] > 16.0 && catalog.y[0] > 16.0);
}

#[test]
fn filtering_detects_faint_source_in_noise() {
    // A faint extended source below the per-pixel threshold becomes
    // detectable after kernel filtering.
    let mut data = flat(64, 64, 0.0);
    add_gaussian(&mut data, 64, 32.0, 32.0, 2.4, 2.5);
    let noise = flat(64, 64, 1.0);
    let view = ImageView::new(PixelData::F32(&data), 64, 64)
        .unwrap()
        .with_noise(PixelData::F32(&noise), sirius_core::image::NoiseKind::Stddev)
        .unwrap();

    let unfiltered = ExtractConfig {
        thresh: 3.0,
        thresh_kind: ThreshKind::Relative,
        min_area: 3,
        kernel: None,
        ..ExtractConfig::default()
    };
    assert_eq!(extract(&view, &unfiltered).unwrap().len(), 0);

    let matched = ExtractConfig {
        filter_kind: FilterKind::Matched,
        kernel: Some(sirius_core::filter::Kernel::default_3x3()),
        ..unfiltered
    };
    assert_eq!(extract(&view, &matched).unwrap().len(), 1);
}

// ---------------------------------------------------------------------------
// Validation
// ---------------------------------------------------------------------------

#[test]
fn bad_parameters_are_rejected_before_work() {
    let data = flat(16, 16, 0.0);
    let view = ImageView::new(PixelData::F32(&data), 16, 16).unwrap();

    for config in [
        ExtractConfig {
            thresh: f64::NAN,
            ..ExtractConfig::default()
        },
        ExtractConfig {
            min_area: 0,
            ..ExtractConfig::default()
        },
        ExtractConfig {
            deblend_cont: 1.5,
            ..ExtractConfig::default()
        },
        ExtractConfig {
            clean_param: 0.0,
            ..ExtractConfig::default()
        },
    ] {
        let err = extract(&view, &config).unwrap_err();
        assert_eq!(err.status(), 4, "config should be rejected: {config:?}");
    }
}
