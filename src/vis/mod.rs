// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! The visibility-stream data model.
//!
//! A [`VisBuffer`] is one batch of calibrated visibility rows; a
//! [`VisibilitySource`] hands out buffers through an explicit chunk/row cursor
//! (origin/more/next at both granularities), which is how measurement-set
//! iterators behave. [`MemoryVisSource`] is an in-memory implementation used
//! by the orchestrators' tests and by callers without a table backend.

#[cfg(test)]
mod tests;

use ndarray::prelude::*;

use crate::c32;

/// The polarisation frame the visibilities were recorded in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PolFrame {
    Linear,
    Circular,
}

/// A baseline coordinate in metres.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct UVW {
    pub u: f64,
    pub v: f64,
    pub w: f64,
}

/// One batch of visibility rows. The cubes are laid out \[pol × channel ×
/// row\]; the imaging-weight matrix is \[channel × row\].
///
/// `model_vis_cube` and `imaging_weight` are mutated by the degridding and
/// multi-term paths; everything else is read-only to this crate.
#[derive(Debug, Clone)]
pub struct VisBuffer {
    pub antenna1: Vec<usize>,
    pub antenna2: Vec<usize>,
    pub uvw: Vec<UVW>,
    /// Per-row pointing id, driving direction-dependent change detection.
    pub pointing: Vec<usize>,
    /// Per-channel sky frequencies \[Hz\].
    pub freqs: Vec<f64>,
    pub vis_cube: Array3<c32>,
    pub model_vis_cube: Array3<c32>,
    pub imaging_weight: Array2<f32>,
    pub pol_frame: PolFrame,
}

impl VisBuffer {
    /// An empty buffer with unit imaging weights and zeroed cubes.
    pub fn new(
        antenna1: Vec<usize>,
        antenna2: Vec<usize>,
        uvw: Vec<UVW>,
        pointing: Vec<usize>,
        freqs: Vec<f64>,
        num_pols: usize,
        pol_frame: PolFrame,
    ) -> VisBuffer {
        let num_rows = uvw.len();
        let num_chans = freqs.len();
        assert_eq!(antenna1.len(), num_rows);
        assert_eq!(antenna2.len(), num_rows);
        assert_eq!(pointing.len(), num_rows);
        VisBuffer {
            antenna1,
            antenna2,
            uvw,
            pointing,
            freqs,
            vis_cube: Array3::zeros((num_pols, num_chans, num_rows)),
            model_vis_cube: Array3::zeros((num_pols, num_chans, num_rows)),
            imaging_weight: Array2::ones((num_chans, num_rows)),
            pol_frame,
        }
    }

    pub fn num_rows(&self) -> usize {
        self.uvw.len()
    }

    pub fn num_chans(&self) -> usize {
        self.freqs.len()
    }

    pub fn num_pols(&self) -> usize {
        self.vis_cube.dim().0
    }

    /// Set every element of the model-visibility cube to one value.
    pub fn set_model_vis(&mut self, value: c32) {
        self.model_vis_cube.fill(value);
    }
}

/// Cursor-style access to a stream of visibility buffers, chunked the way a
/// measurement-set iterator chunks them (typically by spectral window or
/// integration block).
///
/// The cursor protocol at both levels is origin/more/next: after `origin()`,
/// `buffer()` is valid while `more()` is true; `next()` advances. Calling
/// `buffer()` when `more()` is false is a caller bug.
pub trait VisibilitySource {
    fn origin_chunks(&mut self);
    fn more_chunks(&self) -> bool;
    fn next_chunk(&mut self);

    fn origin(&mut self);
    fn more(&self) -> bool;
    fn next(&mut self);

    fn buffer(&self) -> &VisBuffer;
    fn buffer_mut(&mut self) -> &mut VisBuffer;
}

/// A [`VisibilitySource`] over buffers already in memory.
pub struct MemoryVisSource {
    chunks: Vec<Vec<VisBuffer>>,
    chunk: usize,
    buf: usize,
}

impl MemoryVisSource {
    /// Empty chunks are allowed; the cursor simply reports no rows for them.
    pub fn new(chunks: Vec<Vec<VisBuffer>>) -> MemoryVisSource {
        MemoryVisSource {
            chunks,
            chunk: 0,
            buf: 0,
        }
    }

    /// One chunk containing all the supplied buffers.
    pub fn from_buffers(buffers: Vec<VisBuffer>) -> MemoryVisSource {
        MemoryVisSource::new(vec![buffers])
    }
}

impl VisibilitySource for MemoryVisSource {
    fn origin_chunks(&mut self) {
        self.chunk = 0;
        self.buf = 0;
    }

    fn more_chunks(&self) -> bool {
        self.chunk < self.chunks.len()
    }

    fn next_chunk(&mut self) {
        self.chunk += 1;
        self.buf = 0;
    }

    fn origin(&mut self) {
        self.buf = 0;
    }

    fn more(&self) -> bool {
        self.chunk < self.chunks.len() && self.buf < self.chunks[self.chunk].len()
    }

    fn next(&mut self) {
        self.buf += 1;
    }

    fn buffer(&self) -> &VisBuffer {
        &self.chunks[self.chunk][self.buf]
    }

    fn buffer_mut(&mut self) -> &mut VisBuffer {
        &mut self.chunks[self.chunk][self.buf]
    }
}
