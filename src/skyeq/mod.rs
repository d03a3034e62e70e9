// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! The mosaic-imaging orchestrator.
//!
//! [`MosaicSkyEquation`] drives a visibility-chunk iteration against a sky
//! model store. At every buffer (or row) boundary it decides whether the
//! cached direction-dependent correction changed; if so, the in-progress
//! image accumulation is finalized and a fresh one opened over the newly
//! illuminated sub-image region. One accumulation episode is always
//! bracketed: every initialize gets exactly one finalize, including at the
//! end of the chunk iteration.
//!
//! Sub-image regions and the Fourier-domain transfer functions used by the
//! gradient pass are keyed by `(model, pointing)` in plain maps, so growing
//! the pointing count never invalidates previously registered entries.


use std::collections::HashMap;

use itertools::Itertools;
use log::{debug, error, warn};
use ndarray::{prelude::*, Zip};
use thiserror::Error;

use crate::{
    c32,
    ftmachine::{FtError, FtMachine, VisGridCol},
    image::{to_correlation, to_stokes, CImage, Image, ImageError, ImageRegion, SkyModelStore},
    math::{peak, Fft2},
    skyjones::{changed_sky_jones_logic, SkyJones, SkyJonesChange},
    vis::{VisBuffer, VisibilitySource},
};

/// Default padding multiplier on the primary-beam width for sub-image
/// extents.
const EXTENT_PADDING: f64 = 1.2;

#[derive(Error, Debug)]
pub enum SkyEqError {
    #[error("{0}")]
    Ft(#[from] FtError),

    #[error("{0}")]
    Image(#[from] ImageError),

    #[error("No image region registered for model {model}, pointing {pointing}")]
    RegionMissing { model: usize, pointing: usize },

    #[error(
        "Transfer function for model {model}, pointing {pointing} has shape {found:?} but its region is {expected:?}"
    )]
    XfrShapeMismatch {
        model: usize,
        pointing: usize,
        found: (usize, usize),
        expected: (usize, usize),
    },

    #[error("Sky-equation protocol violation: {0}")]
    Protocol(&'static str),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum AccumState {
    Idle,
    Accumulating,
}

/// Orchestrates mosaic gridding over a visibility stream for one sky model
/// store.
pub struct MosaicSkyEquation {
    ft: Box<dyn FtMachine>,
    jones: Option<Box<dyn SkyJones>>,

    /// Sub-image regions keyed by (model, pointing).
    regions: HashMap<(usize, usize), ImageRegion>,
    /// Fourier-domain transfer functions keyed by (model, pointing), each
    /// sized to its region.
    xfrs: HashMap<(usize, usize), Array2<c32>>,
    /// Cap on the number of pointings processed per model in a gradient pass.
    max_num_xfr: usize,

    state: AccumState,
    current_region: Option<ImageRegion>,
    /// The buffer and row the open episode was keyed on.
    episode_ref: Option<(VisBuffer, usize)>,
    warned_no_jones: bool,
    extent_padding: f64,
    fft: Fft2,
}

impl MosaicSkyEquation {
    pub fn new(ft: Box<dyn FtMachine>, jones: Option<Box<dyn SkyJones>>) -> MosaicSkyEquation {
        MosaicSkyEquation {
            ft,
            jones,
            regions: HashMap::new(),
            xfrs: HashMap::new(),
            max_num_xfr: 0,
            state: AccumState::Idle,
            current_region: None,
            episode_ref: None,
            warned_no_jones: false,
            extent_padding: EXTENT_PADDING,
            fft: Fft2::new(),
        }
    }

    pub fn set_extent_padding(&mut self, padding: f64) {
        self.extent_padding = padding;
    }

    /// Cap the number of pointings per model processed by
    /// [`MosaicSkyEquation::increment_gradients_chi_squared`].
    pub fn set_max_num_xfr(&mut self, max_num_xfr: usize) {
        self.max_num_xfr = max_num_xfr;
    }

    // ------------------------------------------------------------------
    // Region / transfer-function bookkeeping.

    /// Register the sub-image region for one (model, pointing) pair. Growing
    /// the pointing count never disturbs previously registered entries.
    pub fn set_image_region(&mut self, model: usize, pointing: usize, region: ImageRegion) {
        self.regions.insert((model, pointing), region);
        self.max_num_xfr = self.max_num_xfr.max(pointing + 1);
    }

    /// Look up a registered region; a missing entry is an orchestration bug.
    pub fn image_region(&self, model: usize, pointing: usize) -> Result<ImageRegion, SkyEqError> {
        self.regions
            .get(&(model, pointing))
            .copied()
            .ok_or(SkyEqError::RegionMissing { model, pointing })
    }

    /// Register a pointing's transfer function along with its region. The
    /// function must be sized to the region's spatial window.
    pub fn set_transfer_function(
        &mut self,
        model: usize,
        pointing: usize,
        region: ImageRegion,
        xfr: Array2<c32>,
    ) -> Result<(), SkyEqError> {
        if xfr.dim() != (region.nx, region.ny) {
            return Err(SkyEqError::XfrShapeMismatch {
                model,
                pointing,
                found: xfr.dim(),
                expected: (region.nx, region.ny),
            });
        }
        self.set_image_region(model, pointing, region);
        self.xfrs.insert((model, pointing), xfr);
        Ok(())
    }

    fn num_pointings(&self, model: usize) -> usize {
        self.regions.keys().filter(|(m, _)| *m == model).count()
    }

    // ------------------------------------------------------------------
    // PSF generation.

    /// Compute the approximate PSF for one model: forward-transform a unit
    /// point source to prime the predict path, grid the whole stream with
    /// weights only, and normalise the result by its peak.
    ///
    /// A non-positive peak is reported as a severe log message and the
    /// unnormalised image returned; callers must check downstream.
    pub fn make_approx_psf(
        &mut self,
        store: &mut dyn SkyModelStore,
        vis: &mut dyn VisibilitySource,
        model: usize,
    ) -> Result<Image, SkyEqError> {
        let shape = store.shape(model);
        let mut psf = Image::zeros(shape);
        if !rewind_to_first(vis) {
            error!("makeApproxPSF: empty visibility stream for model {model}");
            return Ok(psf);
        }

        // Prime the predict path with a unit point source at the image
        // centre, then restore the caller's model.
        let saved_model = store.image(model).clone();
        {
            let image = store.image_mut(model);
            image.data.fill(0.0);
            for p in 0..shape.num_pols {
                for c in 0..shape.num_chans {
                    image.data[(shape.nx / 2, shape.ny / 2, p, c)] = 1.0;
                }
            }
        }
        let frame = vis.buffer().pol_frame;
        let mut cimage = CImage::zeros(shape);
        to_correlation(&mut cimage, store.image(model), frame)?;
        self.ft.initialize_to_vis(&cimage, vis.buffer())?;
        vis.origin_chunks();
        while vis.more_chunks() {
            vis.origin();
            while vis.more() {
                let vb = vis.buffer_mut();
                vb.set_model_vis(c32::default());
                self.ft.get(vb, None)?;
                vis.next();
            }
            vis.next_chunk();
        }
        *store.image_mut(model) = saved_model;

        // The gradient pass: grid weights only, splitting episodes wherever
        // the correction changes.
        store.initialize_gradients();
        if let Some(jones) = self.jones.as_deref_mut() {
            jones.reset();
        }
        rewind_to_first(vis);
        self.initialize_put_psf(store, vis.buffer(), 0, model)?;
        vis.origin_chunks();
        while vis.more_chunks() {
            vis.origin();
            while vis.more() {
                let vb = vis.buffer_mut();
                self.put_psf(store, vb, model, true)?;
                vis.next();
            }
            vis.next_chunk();
        }
        // Exactly one finalize per initialize, even at end of stream.
        self.finalize_put_psf(store, model)?;
        store.finalize_gradients();

        // PSF = gS / ggS where ggS > 0.
        Zip::from(&mut psf.data)
            .and(&store.g_s(model).data)
            .and(&store.gg_s(model).data)
            .for_each(|p, &g, &gg| *p = if gg > 0.0 { g / gg } else { 0.0 });

        let pk = peak(&psf.data);
        if pk > 0.0 {
            if (pk - 1.0).abs() > 1e-3 {
                debug!("makeApproxPSF: peak {pk} for model {model}, renormalizing to unity");
            }
            psf.data.mapv_inplace(|v| v / pk);
        } else {
            error!("makeApproxPSF: PSF peak {pk} <= 0 for model {model}; leaving unnormalized");
        }
        Ok(psf)
    }

    /// Grid one buffer towards the PSF (or residual, with `do_psf` false),
    /// splitting the accumulation exactly where the correction changes.
    pub fn put_psf(
        &mut self,
        store: &mut dyn SkyModelStore,
        vb: &mut VisBuffer,
        model: usize,
        do_psf: bool,
    ) -> Result<(), SkyEqError> {
        let col = VisGridCol::Observed;
        let change = match self.jones.as_deref() {
            Some(jones) => changed_sky_jones_logic(jones, vb),
            None => {
                self.warn_no_jones();
                self.ft.put(vb, None, do_psf, col)?;
                return Ok(());
            }
        };

        match change {
            SkyJonesChange::Unchanged => {
                self.ft.put(vb, None, do_psf, col)?;
            }
            SkyJonesChange::FirstOne => {
                self.finalize_put_psf(store, model)?;
                self.initialize_put_psf(store, vb, 0, model)?;
                self.ft.put(vb, None, do_psf, col)?;
            }
            SkyJonesChange::Internal(_) => {
                for row in 0..vb.num_rows() {
                    let changed = match self.jones.as_deref() {
                        Some(jones) => jones.changed(vb, row),
                        None => false,
                    };
                    if changed {
                        self.finalize_put_psf(store, model)?;
                        self.initialize_put_psf(store, vb, row, model)?;
                    }
                    self.ft.put(vb, Some(row), do_psf, col)?;
                }
            }
        }
        Ok(())
    }

    /// Open one accumulation episode keyed on `(vb, row)`.
    pub fn initialize_put_psf(
        &mut self,
        store: &mut dyn SkyModelStore,
        vb: &VisBuffer,
        row: usize,
        model: usize,
    ) -> Result<(), SkyEqError> {
        if self.state == AccumState::Accumulating {
            return Err(SkyEqError::Protocol(
                "initializePutPSF while an episode is already open",
            ));
        }
        let shape = store.shape(model);
        match self.jones.as_deref_mut() {
            Some(jones) => {
                jones.refresh(vb, row);
                self.current_region = Some(jones.extent(shape, vb, row, self.extent_padding));
            }
            None => {
                self.warn_no_jones();
                self.current_region = Some(ImageRegion::full(shape));
            }
        }
        self.episode_ref = Some((vb.clone(), row));
        store.c_image_mut(model).zero();
        self.ft.initialize_to_sky(shape, vb)?;
        self.state = AccumState::Accumulating;
        Ok(())
    }

    /// Close the open episode: transform, fold the corrected contribution
    /// into the gradient accumulators within the pointing's region, and add
    /// the per-plane statistics to the store.
    pub fn finalize_put_psf(
        &mut self,
        store: &mut dyn SkyModelStore,
        model: usize,
    ) -> Result<(), SkyEqError> {
        if self.state != AccumState::Accumulating {
            return Err(SkyEqError::Protocol(
                "finalizePutPSF without a matching initializePutPSF",
            ));
        }
        let shape = store.shape(model);
        let region = self
            .current_region
            .ok_or(SkyEqError::Protocol("no region for the open episode"))?;
        let (evb, erow) = self
            .episode_ref
            .as_ref()
            .ok_or(SkyEqError::Protocol("no episode reference"))?;

        self.ft.finalize_to_sky()?;
        let (cimage, sumwt) = self.ft.get_image(false)?;
        let mut delta = Image::zeros(shape);
        to_stokes(&mut delta, &cimage, evb.pol_frame)?;

        // Per-plane weight image for the gradient-squared accumulator.
        let mut flat = Image::zeros(shape);
        for p in 0..shape.num_pols {
            for c in 0..shape.num_chans {
                flat.data
                    .slice_mut(s![.., .., p, c])
                    .fill(sumwt[(p, c)]);
            }
        }

        match self.jones.as_deref() {
            Some(jones) => {
                let mut corrected = Image::zeros(shape);
                jones.apply(&delta, &mut corrected, evb, *erow, false);
                store.g_s_mut(model).add_region(&corrected, region);

                let mut weighted = Image::zeros(shape);
                jones.apply_square(&flat, &mut weighted, evb, *erow);
                store.gg_s_mut(model).add_region(&weighted, region);
                store.weight_mut(model).add_region(&weighted, region);
            }
            None => {
                store.g_s_mut(model).add_region(&delta, region);
                store.gg_s_mut(model).add_region(&flat, region);
                store.weight_mut(model).add_region(&flat, region);
            }
        }

        let sumwt_total = f64::from(sumwt.sum());
        let chisq: f64 = delta
            .view_region(region)
            .iter()
            .map(|&v| f64::from(v) * f64::from(v))
            .sum();
        store.add_statistics(sumwt_total, chisq);

        self.state = AccumState::Idle;
        self.current_region = None;
        self.episode_ref = None;
        Ok(())
    }

    // ------------------------------------------------------------------
    // Gradient pass by transfer-function convolution.

    /// The per-model gradient pass for iterative deconvolution: for every
    /// solvable model, convolve the accumulated delta image with each
    /// registered pointing's transfer function, windowed to the pointing's
    /// region. Models with no solvable pointings perform no transforms and
    /// leave all accumulators untouched.
    pub fn increment_gradients_chi_squared(
        &mut self,
        store: &mut dyn SkyModelStore,
    ) -> Result<(), SkyEqError> {
        for model in 0..store.num_models() {
            if !store.is_solveable(model) {
                continue;
            }
            let num_pointings = self.num_pointings(model).min(self.max_num_xfr);
            for pointing in 0..num_pointings {
                self.initialize_put_xfr(store, model, pointing)?;
                self.finalize_put_convolve(store, model, pointing)?;
            }
        }
        Ok(())
    }

    /// Open one pointing's convolution: validate its registration and zero
    /// the complex working grid as the fresh accumulation target.
    pub fn initialize_put_xfr(
        &mut self,
        store: &mut dyn SkyModelStore,
        model: usize,
        pointing: usize,
    ) -> Result<(), SkyEqError> {
        let region = self.image_region(model, pointing)?;
        let xfr = self
            .xfrs
            .get(&(model, pointing))
            .ok_or(SkyEqError::RegionMissing { model, pointing })?;
        if xfr.dim() != (region.nx, region.ny) {
            return Err(SkyEqError::XfrShapeMismatch {
                model,
                pointing,
                found: xfr.dim(),
                expected: (region.nx, region.ny),
            });
        }
        store.c_image_mut(model).zero();
        Ok(())
    }

    /// The minimum-size-FFT convolution: window the work image to the
    /// pointing's region, multiply in Fourier space by the conjugate transfer
    /// function, inverse-transform and accumulate into the gradient image.
    pub fn finalize_put_convolve(
        &mut self,
        store: &mut dyn SkyModelStore,
        model: usize,
        pointing: usize,
    ) -> Result<(), SkyEqError> {
        let region = self.image_region(model, pointing)?;
        let xfr = self
            .xfrs
            .get(&(model, pointing))
            .ok_or(SkyEqError::RegionMissing { model, pointing })?;
        let shape = store.shape(model);

        for p in 0..shape.num_pols {
            for c in 0..shape.num_chans {
                // Work sub-image into a complex scratch plane of region size.
                let window = store.work(model).view_region(region);
                let mut scratch = Array2::from_shape_fn((region.nx, region.ny), |(x, y)| {
                    c32::new(window[(x, y, p, c)], 0.0)
                });

                self.fft.forward(scratch.view_mut());
                Zip::from(&mut scratch).and(xfr).for_each(|s, &x| *s *= x.conj());
                self.fft.inverse(scratch.view_mut());

                let mut target = store.g_s_mut(model).view_region_mut(region);
                for (x, y) in (0..region.nx).cartesian_product(0..region.ny) {
                    target[(x, y, p, c)] += scratch[(x, y)].re;
                }
            }
        }
        Ok(())
    }

    fn warn_no_jones(&mut self) {
        if !self.warned_no_jones {
            warn!(
                "No direction-dependent corrector configured for the mosaic algorithm; \
                 using full-image transforms"
            );
            self.warned_no_jones = true;
        }
    }
}

/// Rewind to the first non-empty buffer, returning false for an empty stream.
fn rewind_to_first(vis: &mut dyn VisibilitySource) -> bool {
    vis.origin_chunks();
    while vis.more_chunks() {
        vis.origin();
        if vis.more() {
            return true;
        }
        vis.next_chunk();
    }
    false
}
