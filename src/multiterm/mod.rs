// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Multi-frequency-synthesis Taylor-term gridding.
//!
//! [`MultiTermFt`] presents one FT machine that internally fans out to N sub
//! machines (2N−1 when also gridding the PSF), one per Taylor polynomial
//! order. Before each sub-machine grids, the buffer's imaging weights are
//! multiplied in place by `((freq − reffreq) / reffreq)^order`; the weights
//! are a live matrix shared with the caller, so they are restored on every
//! exit path, including errors.

#[cfg(test)]
mod tests;

use ndarray::Array2;
use scopeguard::guard;
use thiserror::Error;

use crate::{
    c32,
    ftmachine::{FtError, FtMachine, VisGridCol},
    image::{to_stokes, CImage, ImageShape, MultiTermStore},
    math::taylor_weight,
    vis::{PolFrame, VisBuffer},
};

#[derive(Error, Debug)]
pub enum MultiTermError {
    #[error("A multi-term FT machine needs at least one Taylor term")]
    ZeroTerms,

    #[error("The prototype FT machine '{0}' does not support cloning")]
    NotCloneable(&'static str),

    #[error(
        "The multi-term image store has {found} planes but {needed} are needed"
    )]
    StoreTooSmall { needed: usize, found: usize },
}

/// An FT machine decorator fanning out over Taylor terms.
///
/// Term 0 always grids with unmodified weights. Prediction (`get`) only ever
/// sums the forward term count, no matter how many terms were built for PSF
/// gridding, and it *overwrites* the buffer's model-visibility cube with the
/// summed prediction.
pub struct MultiTermFt {
    machines: Vec<Box<dyn FtMachine>>,
    nterms: usize,
    psf_nterms: usize,
    reffreq: f64,
    saved_weights: Option<Array2<f32>>,
}

impl MultiTermFt {
    /// Clone `prototype` into one sub-machine per Taylor order. An `inverse`
    /// (gridding) machine gets `2 * nterms - 1` sub-machines so the PSF terms
    /// can be gridded too; a forward (prediction-only) machine gets exactly
    /// `nterms`.
    pub fn new(
        prototype: Box<dyn FtMachine>,
        nterms: usize,
        reffreq: f64,
        inverse: bool,
    ) -> Result<MultiTermFt, MultiTermError> {
        if nterms == 0 {
            return Err(MultiTermError::ZeroTerms);
        }
        let psf_nterms = if inverse { 2 * nterms - 1 } else { nterms };

        let mut proto = prototype;
        if proto.clone_ftm().is_none() {
            return Err(MultiTermError::NotCloneable(proto.name()));
        }
        proto.set_misc_info(0);
        let mut machines = Vec::with_capacity(psf_nterms);
        machines.push(proto);
        for term in 1..psf_nterms {
            // Checked cloneable above.
            let mut machine = machines[0].clone_ftm().unwrap();
            machine.set_misc_info(term);
            machines.push(machine);
        }

        Ok(MultiTermFt {
            machines,
            nterms,
            psf_nterms,
            reffreq,
            saved_weights: None,
        })
    }

    pub fn num_terms(&self) -> usize {
        self.nterms
    }

    pub fn psf_num_terms(&self) -> usize {
        self.psf_nterms
    }

    fn term_count(&self, do_psf: bool) -> usize {
        if do_psf {
            self.psf_nterms
        } else {
            self.nterms
        }
    }

    /// Multiply the buffer's imaging weights in place by the Taylor factor for
    /// `term`, remembering the original matrix. Must be paired with
    /// [`MultiTermFt::restore_imaging_weights`]; `put` does this through a
    /// scope guard.
    fn modify_vis_weights(&mut self, vb: &mut VisBuffer, term: usize) {
        self.saved_weights = Some(vb.imaging_weight.clone());
        for ch in 0..vb.num_chans() {
            let wt = taylor_weight(vb.freqs[ch], self.reffreq, term);
            for r in 0..vb.num_rows() {
                vb.imaging_weight[(ch, r)] *= wt;
            }
        }
    }

    fn restore_imaging_weights(saved: &Array2<f32>, vb: &mut VisBuffer) {
        vb.imaging_weight.assign(saved);
    }

    /// Multiply the buffer's model visibilities in place by the Taylor factor
    /// for `term`, limited to `row` when one is requested.
    fn modify_model_vis(&self, vb: &mut VisBuffer, term: usize, row: Option<usize>) {
        for ch in 0..vb.num_chans() {
            let wt = taylor_weight(vb.freqs[ch], self.reffreq, term);
            let mut chan = match row {
                Some(r) => vb.model_vis_cube.slice_mut(ndarray::s![.., ch, r..r + 1]),
                None => vb.model_vis_cube.slice_mut(ndarray::s![.., ch, ..]),
            };
            chan.mapv_inplace(|v| v * wt);
        }
    }

    /// Bridge the sky-bound episode to a multi-term image store: zero each
    /// active term's working grid and open its sub-machine's episode.
    pub fn initialize_to_sky_mt(
        &mut self,
        store: &mut MultiTermStore,
        vb: &VisBuffer,
        do_psf: bool,
    ) -> Result<(), FtError> {
        let n = self.term_count(do_psf);
        if store.num_terms() < n {
            return Err(FtError::ProtocolViolation(
                "multi-term image store has fewer planes than active Taylor terms",
            ));
        }
        for term in 0..n {
            store.term_mut(term).c_image.zero();
            self.machines[term].initialize_to_sky(store.shape(), vb)?;
        }
        Ok(())
    }

    /// Close the sky-bound episode against the store: transform each active
    /// term, collapse onto Stokes planes and collect the per-term sum of
    /// weights.
    pub fn finalize_to_sky_mt(
        &mut self,
        store: &mut MultiTermStore,
        frame: PolFrame,
        do_psf: bool,
    ) -> Result<(), FtError> {
        let n = self.term_count(do_psf);
        for term in 0..n {
            self.machines[term].finalize_to_sky()?;
            let (cimage, sumwt) = self.machines[term].get_image(false)?;
            let planes = store.term_mut(term);
            to_stokes(&mut planes.image, &cimage, frame)?;
            planes.c_image = cimage;
            store.set_sumwt(term, sumwt);
        }
        Ok(())
    }

    /// Open the predict direction for every forward term from the store's
    /// complex model images.
    pub fn initialize_to_vis_mt(
        &mut self,
        store: &MultiTermStore,
        vb: &VisBuffer,
    ) -> Result<(), FtError> {
        if store.num_terms() < self.nterms {
            return Err(FtError::ProtocolViolation(
                "multi-term image store has fewer planes than forward Taylor terms",
            ));
        }
        for term in 0..self.nterms {
            self.machines[term].initialize_to_vis(&store.term(term).c_image, vb)?;
        }
        Ok(())
    }
}

impl FtMachine for MultiTermFt {
    fn name(&self) -> &'static str {
        "MultiTermFT"
    }

    fn initialize_to_sky(&mut self, shape: ImageShape, vb: &VisBuffer) -> Result<(), FtError> {
        for machine in &mut self.machines {
            machine.initialize_to_sky(shape, vb)?;
        }
        Ok(())
    }

    fn put(
        &mut self,
        vb: &mut VisBuffer,
        row: Option<usize>,
        do_psf: bool,
        col: VisGridCol,
    ) -> Result<(), FtError> {
        if do_psf && self.psf_nterms != 2 * self.nterms - 1 {
            return Err(FtError::ProtocolViolation(
                "PSF gridding on a multi-term machine constructed with the forward term count",
            ));
        }
        let n = self.term_count(do_psf);

        // Term 0 grids with untouched weights.
        self.machines[0].put(vb, row, do_psf, col)?;

        for term in 1..n {
            self.modify_vis_weights(vb, term);
            let saved = self.saved_weights.take().unwrap();
            // The weight matrix is the caller's; restore it no matter how the
            // sub-machine exits.
            let mut vb_restore = guard(&mut *vb, |vb| {
                MultiTermFt::restore_imaging_weights(&saved, vb)
            });
            let vb_inner: &mut VisBuffer = &mut vb_restore;
            self.machines[term].put(vb_inner, row, do_psf, col)?;
        }
        Ok(())
    }

    fn finalize_to_sky(&mut self) -> Result<(), FtError> {
        for machine in &mut self.machines {
            machine.finalize_to_sky()?;
        }
        Ok(())
    }

    /// The term-0 image; multi-term callers use
    /// [`MultiTermFt::finalize_to_sky_mt`] instead.
    fn get_image(&mut self, normalize: bool) -> Result<(CImage, Array2<f32>), FtError> {
        self.machines[0].get_image(normalize)
    }

    /// Term 0 only; multi-term callers use
    /// [`MultiTermFt::initialize_to_vis_mt`].
    fn initialize_to_vis(&mut self, cimage: &CImage, vb: &VisBuffer) -> Result<(), FtError> {
        self.machines[0].initialize_to_vis(cimage, vb)
    }

    fn get(&mut self, vb: &mut VisBuffer, row: Option<usize>) -> Result<(), FtError> {
        // Term 0's prediction seeds the sum.
        self.machines[0].get(vb, row)?;
        let rows = match row {
            Some(r) => r..r + 1,
            None => 0..vb.num_rows(),
        };
        let mut accumulated = vb
            .model_vis_cube
            .slice(ndarray::s![.., .., rows.clone()])
            .to_owned();

        // Prediction always uses the forward term count, never the PSF count.
        for term in 1..self.nterms {
            vb.model_vis_cube
                .slice_mut(ndarray::s![.., .., rows.clone()])
                .fill(c32::default());
            self.machines[term].get(vb, row)?;
            self.modify_model_vis(vb, term, row);
            accumulated += &vb.model_vis_cube.slice(ndarray::s![.., .., rows.clone()]);
        }

        // Overwrite semantics: the sampled rows end up as the summed
        // prediction regardless of what the cube held on entry, while rows
        // outside a single-row request are left alone.
        vb.model_vis_cube
            .slice_mut(ndarray::s![.., .., rows])
            .assign(&accumulated);
        Ok(())
    }

    fn clone_ftm(&self) -> Option<Box<dyn FtMachine>> {
        let prototype = self.machines[0].clone_ftm()?;
        MultiTermFt::new(
            prototype,
            self.nterms,
            self.reffreq,
            self.psf_nterms == 2 * self.nterms - 1,
        )
        .ok()
        .map(|ft| Box::new(ft) as Box<dyn FtMachine>)
    }

    fn uses_weight_image(&self) -> bool {
        self.machines[0].uses_weight_image()
    }

    fn handles_direction_dependence_internally(&self) -> bool {
        self.machines[0].handles_direction_dependence_internally()
    }

    fn can_compute_residuals(&self) -> bool {
        self.machines[0].can_compute_residuals()
    }

    fn compute_residuals(&mut self, vb: &mut VisBuffer) -> Result<(), FtError> {
        if self.machines[0].can_compute_residuals() {
            self.machines[0].compute_residuals(vb)
        } else {
            // Combining residuals across sub-machines is not implemented.
            Err(FtError::Unsupported(
                "MultiTermFT",
                "residual computation by combination of sub-machines",
            ))
        }
    }
}
