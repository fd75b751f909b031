//! Module and parameter abstractions for the pipeline's components.
//!
//! Every learnable component implements [`NnModule`]: it runs a forward
//! pass, exposes its parameters through a visitor, and carries a
//! train/eval [`Mode`]. The trainable-parameter bookkeeping of the phased
//! training controller is built on top of the visitor: a component
//! *returns* its parameter set, and the controller composes the union for
//! the active phase, rather than flipping flags buried inside nested
//! sub-objects.

use ndarray::{Array4, ArrayD};

use crate::error::ModelResult;

// ---------------------------------------------------------------------------
// Mode
// ---------------------------------------------------------------------------

/// Train/eval switch for a component.
///
/// Running statistics (batch normalization) are mutated only while the
/// owning component is in [`Mode::Train`]; forwards in [`Mode::Eval`] leave
/// them untouched.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    /// Training mode: running statistics update on forward.
    Train,
    /// Evaluation mode: forward is a pure function of inputs and parameters.
    Eval,
}

// ---------------------------------------------------------------------------
// Parameter
// ---------------------------------------------------------------------------

/// One named learnable tensor.
///
/// Names are fully qualified at construction time
/// (e.g. `"m0.aligner.proj.weight"`) so that the freeze controller can
/// enumerate, group, and audit parameters across the whole model by name.
#[derive(Debug, Clone)]
pub struct Parameter {
    name: String,
    value: ArrayD<f32>,
}

impl Parameter {
    /// Creates a new parameter with the provided tensor value.
    pub fn new(name: impl Into<String>, value: ArrayD<f32>) -> Self {
        Parameter {
            name: name.into(),
            value,
        }
    }

    /// Returns the fully qualified identifier assigned to the parameter.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Provides an immutable view into the underlying tensor value.
    pub fn value(&self) -> &ArrayD<f32> {
        &self.value
    }

    /// Provides a mutable view into the underlying tensor value.
    pub fn value_mut(&mut self) -> &mut ArrayD<f32> {
        &mut self.value
    }

    /// Number of scalar elements in the parameter.
    pub fn numel(&self) -> usize {
        self.value.len()
    }
}

// ---------------------------------------------------------------------------
// NnModule
// ---------------------------------------------------------------------------

/// A learnable transform over 4-D `(batch, channel, height, width)` feature
/// maps.
pub trait NnModule {
    /// Runs a forward pass.
    fn forward(&self, input: &Array4<f32>) -> ModelResult<Array4<f32>>;

    /// Visits every parameter owned by the module (and its children).
    fn visit_parameters(&self, visitor: &mut dyn FnMut(&Parameter));

    /// Switches the module (and its children) between train and eval mode.
    fn set_mode(&mut self, mode: Mode);

    /// Returns the module's current mode.
    fn mode(&self) -> Mode;

    /// Collects the fully qualified names of every owned parameter.
    fn parameter_names(&self) -> Vec<String> {
        let mut names = Vec::new();
        self.visit_parameters(&mut |p| names.push(p.name().to_string()));
        names
    }

    /// Counts the scalar elements across every owned parameter.
    fn num_parameters(&self) -> usize {
        let mut total = 0;
        self.visit_parameters(&mut |p| total += p.numel());
        total
    }
}

// ---------------------------------------------------------------------------
// Deterministic initialisation
// ---------------------------------------------------------------------------

/// Deterministic xorshift64 uniform in `[lo, hi)`.
///
/// Uses 24-bit precision (matching the f32 mantissa) for a uniform
/// distribution. Seeded initialisation keeps parameter values reproducible
/// across runs without pulling OS entropy into model construction.
pub fn det_uniform(n: usize, lo: f32, hi: f32, seed: u64) -> Vec<f32> {
    let r = hi - lo;
    let mut s = seed.wrapping_add(0x9E37_79B9_7F4A_7C15);
    (0..n)
        .map(|_| {
            s ^= s << 13;
            s ^= s >> 7;
            s ^= s << 17;
            lo + (s >> 40) as f32 / (1u64 << 24) as f32 * r
        })
        .collect()
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
