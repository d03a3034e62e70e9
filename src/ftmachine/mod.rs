// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! The FT machine protocol: the sky/visibility Fourier transform
//! (gridding/degridding) for one image plane.
//!
//! For a machine bound to one model or Taylor term, one accumulation episode
//! is `initialize_to_sky` → `put`* → `finalize_to_sky` → `get_image`, in that
//! order and exactly once each; the degrid direction is `initialize_to_vis` →
//! `get`*. Breaking the bracket order is a protocol violation, reported as an
//! error rather than undefined behaviour.

mod components;
mod gridft;

pub use components::{ComponentFt, ComponentList, PointComponent};
pub use gridft::GridFt;

use ndarray::Array2;
use thiserror::Error;

use crate::{
    image::{CImage, ImageError, ImageShape},
    vis::VisBuffer,
};

#[derive(Error, Debug)]
pub enum FtError {
    #[error("FT machine protocol violation: {0}")]
    ProtocolViolation(&'static str),

    #[error("FT machine '{0}' cannot be cloned")]
    NotCloneable(&'static str),

    #[error("Operation not supported by FT machine '{0}': {1}")]
    Unsupported(&'static str, &'static str),

    #[error("{0}")]
    Image(#[from] ImageError),
}

/// Which visibility column a `put` grids from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VisGridCol {
    /// The observed (calibrated) visibility cube.
    Observed,
    /// The model-visibility cube.
    Model,
}

/// One sky/visibility transform machine.
///
/// `row: None` means "all rows of the buffer"; `row: Some(r)` restricts to a
/// single row, which is what the mosaic orchestrators use when the
/// direction-dependent correction changes inside a buffer.
pub trait FtMachine {
    fn name(&self) -> &'static str;

    /// Start an accumulation episode towards the sky domain. The machine's
    /// internal grid is zeroed here.
    fn initialize_to_sky(&mut self, shape: ImageShape, vb: &VisBuffer) -> Result<(), FtError>;

    /// Grid one buffer (or one row of it). `do_psf` grids weights only,
    /// producing the point-spread-function response.
    fn put(
        &mut self,
        vb: &mut VisBuffer,
        row: Option<usize>,
        do_psf: bool,
        col: VisGridCol,
    ) -> Result<(), FtError>;

    /// End the episode: transform the accumulated grid to the image domain.
    fn finalize_to_sky(&mut self) -> Result<(), FtError>;

    /// Retrieve the transformed image (correlation basis) and the per-(pol,
    /// channel) sum of gridded weights. With `normalize`, each plane is
    /// divided by its sum of weights where that is positive.
    fn get_image(&mut self, normalize: bool) -> Result<(CImage, Array2<f32>), FtError>;

    /// Prepare the predict (degrid) direction from a correlation-basis model
    /// image.
    fn initialize_to_vis(&mut self, cimage: &CImage, vb: &VisBuffer) -> Result<(), FtError>;

    /// Predict model visibilities for one buffer (or one row), overwriting the
    /// sampled entries of the buffer's model-visibility cube.
    fn get(&mut self, vb: &mut VisBuffer, row: Option<usize>) -> Result<(), FtError>;

    /// Whether this machine's own internal state invalidates cached transforms
    /// for the given buffer.
    fn changed(&self, _vb: &VisBuffer) -> bool {
        false
    }

    /// A fresh machine with the same configuration and no transform state, if
    /// this machine supports cloning.
    fn clone_ftm(&self) -> Option<Box<dyn FtMachine>> {
        None
    }

    /// Whether the machine applies direction-dependent corrections itself,
    /// making the orchestrator's explicit per-row bracket cycle unnecessary.
    fn handles_direction_dependence_internally(&self) -> bool {
        false
    }

    /// Whether image normalisation needs a separately gridded weight image
    /// rather than the scalar sum of weights.
    fn uses_weight_image(&self) -> bool {
        true
    }

    /// Tag the machine with the Taylor-term index it serves.
    fn set_misc_info(&mut self, _taylor_index: usize) {}

    fn can_compute_residuals(&self) -> bool {
        false
    }

    /// Compute residual visibilities in place, for machines that support it.
    fn compute_residuals(&mut self, _vb: &mut VisBuffer) -> Result<(), FtError> {
        Err(FtError::Unsupported(
            self.name(),
            "self-computed residuals",
        ))
    }
}
