//! Camera crop geometry.
//!
//! A camera modality's native BEV grid usually covers a wider extent than
//! the spatial range shared by all collaborating agents. The reconciliation
//! is purely geometric and computed once at build time: the ratio between
//! the shared range and the native grid's upper edge tells which fraction
//! of the backbone output corresponds to the shared range, and the feature
//! map is symmetrically trimmed (not masked) to that fraction at inference
//! time.

use ndarray::{s, Array4};

use crate::config::GridConf;
use crate::error::{ConfigError, ModelError, ModelResult, PreconditionError};

// ---------------------------------------------------------------------------
// CropGeometry
// ---------------------------------------------------------------------------

/// Static crop ratios reconciling a camera grid with the shared range.
#[derive(Debug, Clone, PartialEq)]
pub struct CropGeometry {
    /// Width fraction: shared `xmax` over the grid's `xbound[1]`.
    pub ratio_w: f64,
    /// Height fraction: shared `ymax` over the grid's `ybound[1]`.
    pub ratio_h: f64,
    /// Native grid x extent in metres.
    pub xdist: f64,
    /// Native grid y extent in metres.
    pub ydist: f64,
}

impl CropGeometry {
    /// Compute crop ratios from the shared spatial range and a camera grid.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::ZeroGridBound`] when the grid's upper x or y
    /// edge is zero, since no ratio exists for a zero-extent grid.
    pub fn new(
        modality: &str,
        lidar_range: &[f64; 6],
        grid: &GridConf,
    ) -> Result<Self, ConfigError> {
        if grid.xbound[1] == 0.0 {
            return Err(ConfigError::ZeroGridBound {
                modality: modality.to_string(),
                axis: "x",
            });
        }
        if grid.ybound[1] == 0.0 {
            return Err(ConfigError::ZeroGridBound {
                modality: modality.to_string(),
                axis: "y",
            });
        }
        Ok(CropGeometry {
            ratio_w: lidar_range[3] / grid.xbound[1],
            ratio_h: lidar_range[4] / grid.ybound[1],
            xdist: grid.xbound[1] - grid.xbound[0],
            ydist: grid.ybound[1] - grid.ybound[0],
        })
    }

    /// Target crop size for a feature map of the given spatial dimensions:
    /// `(floor(h · ratio_h), floor(w · ratio_w))`.
    pub fn target_size(&self, h: usize, w: usize) -> (usize, usize) {
        (
            (h as f64 * self.ratio_h) as usize,
            (w as f64 * self.ratio_w) as usize,
        )
    }

    /// Centre-crop `input` to this geometry's target size.
    pub fn apply(&self, input: &Array4<f32>) -> ModelResult<Array4<f32>> {
        let (_, _, h, w) = input.dim();
        let (th, tw) = self.target_size(h, w);
        center_crop(input, th, tw)
    }
}

// ---------------------------------------------------------------------------
// center_crop
// ---------------------------------------------------------------------------

/// Symmetrically trim a feature map to `(th, tw)` around its spatial centre.
///
/// When the trim is odd, the extra row/column is removed from the trailing
/// side. Cropping to a larger extent than the source is a precondition
/// violation, not a padding request.
pub fn center_crop(input: &Array4<f32>, th: usize, tw: usize) -> ModelResult<Array4<f32>> {
    let (_, _, h, w) = input.dim();
    if th > h || tw > w {
        return Err(ModelError::Precondition(
            PreconditionError::CropExceedsSource {
                target: (th, tw),
                available: (h, w),
            },
        ));
    }
    let top = (h - th) / 2;
    let left = (w - tw) / 2;
    Ok(input
        .slice(s![.., .., top..top + th, left..left + tw])
        .to_owned())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
