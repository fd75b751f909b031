//! Integration tests for camera crop geometry.

use bev_perception::config::GridConf;
use bev_perception::geometry::{center_crop, CropGeometry};
use bev_perception::{ConfigError, ModelError, PreconditionError};
use ndarray::Array4;

const RANGE: [f64; 6] = [-51.2, -51.2, -3.0, 51.2, 51.2, 1.0];

fn grid(x1: f64, y1: f64) -> GridConf {
    GridConf {
        xbound: [-x1, x1],
        ybound: [-y1, y1],
    }
}

#[test]
fn test_crop_ratio_is_range_over_grid_bound() {
    let geom = CropGeometry::new("cam", &RANGE, &grid(102.4, 51.2)).expect("geometry builds");
    assert!((geom.ratio_w - 0.5).abs() < 1e-12);
    assert!((geom.ratio_h - 1.0).abs() < 1e-12);
    assert!((geom.xdist - 204.8).abs() < 1e-9);
}

#[test]
fn test_target_size_floors_fractional_cells() {
    let geom = CropGeometry::new("cam", &RANGE, &grid(76.8, 76.8)).expect("geometry builds");
    // ratio = 51.2 / 76.8 = 2/3: 10 cells -> 6 (floor of 6.67)
    assert_eq!(geom.target_size(10, 10), (6, 6));
}

#[test]
fn test_zero_grid_bound_fails_fast() {
    let err = CropGeometry::new("cam", &RANGE, &grid(0.0, 51.2)).unwrap_err();
    assert!(matches!(err, ConfigError::ZeroGridBound { axis: "x", .. }));
}

#[test]
fn test_center_crop_keeps_the_middle() {
    // A gradient along height: cropping 10 -> 6 keeps rows 2..8.
    let mut x = Array4::<f32>::zeros((1, 1, 10, 10));
    for r in 0..10 {
        for c in 0..10 {
            x[[0, 0, r, c]] = r as f32;
        }
    }
    let y = center_crop(&x, 6, 10).expect("crop succeeds");
    assert_eq!(y.dim(), (1, 1, 6, 10));
    assert_eq!(y[[0, 0, 0, 0]], 2.0);
    assert_eq!(y[[0, 0, 5, 0]], 7.0);
}

#[test]
fn test_crop_larger_than_source_is_rejected() {
    let x = Array4::<f32>::zeros((1, 1, 4, 4));
    let err = center_crop(&x, 4, 8).unwrap_err();
    assert!(matches!(
        err,
        ModelError::Precondition(PreconditionError::CropExceedsSource { .. })
    ));
}

#[test]
fn test_crop_error_reports_both_extents() {
    let x = Array4::<f32>::zeros((1, 1, 4, 4));
    let err = center_crop(&x, 6, 4).unwrap_err();
    let message = err.to_string();
    assert!(message.contains("(6, 4)"), "got: {message}");
    assert!(message.contains("(4, 4)"), "got: {message}");
}

#[test]
fn test_apply_crops_to_target_size() {
    let geom = CropGeometry::new("cam", &RANGE, &grid(102.4, 102.4)).expect("geometry builds");
    let x = Array4::<f32>::ones((2, 3, 16, 12));
    let y = geom.apply(&x).expect("apply succeeds");
    assert_eq!(y.dim(), (2, 3, 8, 6));
}
