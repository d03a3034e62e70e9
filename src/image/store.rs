// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Sky-model image stores: the per-model (or per-Taylor-term) sets of image
//! planes that gridding accumulates into.
//!
//! `weight`, `gS` and `ggS` only ever accumulate between explicit
//! [`SkyModelStore::initialize_gradients`] resets; the complex working grid is
//! zeroed before each fresh accumulation episode.

use ndarray::prelude::*;

use super::{CImage, Image, ImageShape};
use crate::stats::StatisticsAccumulator;

/// The full set of planes for one model (or one Taylor term).
#[derive(Debug, Clone)]
pub struct ModelPlanes {
    /// The real sky-model image.
    pub image: Image,
    /// The complex working grid.
    pub c_image: CImage,
    /// Accumulated sum-of-weights image.
    pub weight: Image,
    /// Scratch image for convolutions and residual assembly.
    pub work: Image,
    /// Gradient chi-squared accumulator.
    pub g_s: Image,
    /// Gradient-squared chi-squared accumulator.
    pub gg_s: Image,
}

impl ModelPlanes {
    pub fn new(shape: ImageShape) -> ModelPlanes {
        ModelPlanes {
            image: Image::zeros(shape),
            c_image: CImage::zeros(shape),
            weight: Image::zeros(shape),
            work: Image::zeros(shape),
            g_s: Image::zeros(shape),
            gg_s: Image::zeros(shape),
        }
    }
}

/// Access to the per-model image planes the sky equation reads and
/// accumulates into.
pub trait SkyModelStore {
    fn num_models(&self) -> usize;
    fn is_solveable(&self, model: usize) -> bool;
    fn shape(&self, model: usize) -> ImageShape;
    fn reference_frequency(&self) -> f64;

    fn image(&self, model: usize) -> &Image;
    fn image_mut(&mut self, model: usize) -> &mut Image;
    fn c_image(&self, model: usize) -> &CImage;
    fn c_image_mut(&mut self, model: usize) -> &mut CImage;
    fn weight(&self, model: usize) -> &Image;
    fn weight_mut(&mut self, model: usize) -> &mut Image;
    fn work(&self, model: usize) -> &Image;
    fn work_mut(&mut self, model: usize) -> &mut Image;
    fn g_s(&self, model: usize) -> &Image;
    fn g_s_mut(&mut self, model: usize) -> &mut Image;
    fn gg_s(&self, model: usize) -> &Image;
    fn gg_s_mut(&mut self, model: usize) -> &mut Image;

    /// Zero the gradient accumulators and reset the running statistics,
    /// starting a fresh gradient-computation pass.
    fn initialize_gradients(&mut self);

    /// Mark the end of a gradient-computation pass.
    fn finalize_gradients(&mut self);

    fn add_statistics(&mut self, sumwt: f64, chisq: f64);
    fn statistics(&self) -> StatisticsAccumulator;
}

/// A store with one Taylor term per model: ordinary (non-MFS) imaging.
pub struct SingleTermStore {
    models: Vec<ModelPlanes>,
    solveable: Vec<bool>,
    stats: StatisticsAccumulator,
    reffreq: f64,
}

impl SingleTermStore {
    pub fn new(num_models: usize, shape: ImageShape, reffreq: f64) -> SingleTermStore {
        SingleTermStore {
            models: (0..num_models).map(|_| ModelPlanes::new(shape)).collect(),
            solveable: vec![true; num_models],
            stats: StatisticsAccumulator::default(),
            reffreq,
        }
    }

    pub fn set_solveable(&mut self, model: usize, solveable: bool) {
        self.solveable[model] = solveable;
    }
}

impl SkyModelStore for SingleTermStore {
    fn num_models(&self) -> usize {
        self.models.len()
    }

    fn is_solveable(&self, model: usize) -> bool {
        self.solveable[model]
    }

    fn shape(&self, model: usize) -> ImageShape {
        self.models[model].image.shape()
    }

    fn reference_frequency(&self) -> f64 {
        self.reffreq
    }

    fn image(&self, model: usize) -> &Image {
        &self.models[model].image
    }

    fn image_mut(&mut self, model: usize) -> &mut Image {
        &mut self.models[model].image
    }

    fn c_image(&self, model: usize) -> &CImage {
        &self.models[model].c_image
    }

    fn c_image_mut(&mut self, model: usize) -> &mut CImage {
        &mut self.models[model].c_image
    }

    fn weight(&self, model: usize) -> &Image {
        &self.models[model].weight
    }

    fn weight_mut(&mut self, model: usize) -> &mut Image {
        &mut self.models[model].weight
    }

    fn work(&self, model: usize) -> &Image {
        &self.models[model].work
    }

    fn work_mut(&mut self, model: usize) -> &mut Image {
        &mut self.models[model].work
    }

    fn g_s(&self, model: usize) -> &Image {
        &self.models[model].g_s
    }

    fn g_s_mut(&mut self, model: usize) -> &mut Image {
        &mut self.models[model].g_s
    }

    fn gg_s(&self, model: usize) -> &Image {
        &self.models[model].gg_s
    }

    fn gg_s_mut(&mut self, model: usize) -> &mut Image {
        &mut self.models[model].gg_s
    }

    fn initialize_gradients(&mut self) {
        for planes in &mut self.models {
            planes.g_s.data.fill(0.0);
            planes.gg_s.data.fill(0.0);
        }
        self.stats.reset();
    }

    fn finalize_gradients(&mut self) {
        log::debug!(
            "gradient pass complete: sumwt {}, chisq {}",
            self.stats.sumwt,
            self.stats.chisq
        );
    }

    fn add_statistics(&mut self, sumwt: f64, chisq: f64) {
        self.stats.add(sumwt, chisq);
    }

    fn statistics(&self) -> StatisticsAccumulator {
        self.stats
    }
}

/// The multi-term image store: one set of planes per Taylor order, plus a
/// per-term sum-of-weights matrix collected after each transform. The
/// multi-term FT decorator addresses this store directly.
pub struct MultiTermStore {
    terms: Vec<ModelPlanes>,
    sumwt: Vec<Array2<f32>>,
    stats: StatisticsAccumulator,
    reffreq: f64,
}

impl MultiTermStore {
    /// `num_terms` is the number of planes to allocate; PSF gridding with `n`
    /// Taylor terms needs `2n - 1` of them.
    pub fn new(num_terms: usize, shape: ImageShape, reffreq: f64) -> MultiTermStore {
        MultiTermStore {
            terms: (0..num_terms).map(|_| ModelPlanes::new(shape)).collect(),
            sumwt: vec![Array2::zeros((shape.num_pols, shape.num_chans)); num_terms],
            stats: StatisticsAccumulator::default(),
            reffreq,
        }
    }

    pub fn num_terms(&self) -> usize {
        self.terms.len()
    }

    pub fn reference_frequency(&self) -> f64 {
        self.reffreq
    }

    pub fn shape(&self) -> ImageShape {
        self.terms[0].image.shape()
    }

    pub fn term(&self, term: usize) -> &ModelPlanes {
        &self.terms[term]
    }

    pub fn term_mut(&mut self, term: usize) -> &mut ModelPlanes {
        &mut self.terms[term]
    }

    pub fn sumwt(&self, term: usize) -> &Array2<f32> {
        &self.sumwt[term]
    }

    pub fn set_sumwt(&mut self, term: usize, sumwt: Array2<f32>) {
        self.sumwt[term] = sumwt;
    }

    pub fn add_statistics(&mut self, sumwt: f64, chisq: f64) {
        self.stats.add(sumwt, chisq);
    }

    pub fn statistics(&self) -> StatisticsAccumulator {
        self.stats
    }
}
