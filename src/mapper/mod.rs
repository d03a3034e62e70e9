// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! One FT machine binding for imaging by major cycle.
//!
//! [`SiMapper`] brackets a grid or degrid pass over a visibility stream,
//! in both the plain and image-domain-mosaic flavours. The mosaic flavour
//! carries the row-vs-buffer change-detection state machine: whenever the
//! direction-dependent correction changes, the in-progress accumulation is
//! finalized into the mosaic target (windowed to the pointing's primary-beam
//! extent) and a fresh episode is opened. FT machines that handle
//! direction dependence internally skip that explicit cycle entirely.


use ndarray::Array2;
use thiserror::Error;

use crate::{
    c32,
    ftmachine::{ComponentFt, ComponentList, FtError, FtMachine, VisGridCol},
    image::{to_correlation, to_stokes, CImage, Image, ImageError, ImageRegion, ImageShape},
    skyjones::{changed_sky_jones_logic, SkyJones, SkyJonesChange},
    vis::{PolFrame, VisBuffer},
};

/// Default padding multiplier on the primary-beam width when computing a
/// pointing's sub-image extent.
const EXTENT_PADDING: f64 = 1.2;

#[derive(Error, Debug)]
pub enum MapperError {
    #[error("{0}")]
    Ft(#[from] FtError),

    #[error("{0}")]
    Image(#[from] ImageError),

    #[error("Internal error in mosaic mapping: {0}")]
    Internal(&'static str),
}

/// A grid/degrid mapper around one FT machine, with optional
/// direction-dependent correctors and an optional point-source component
/// list.
pub struct SiMapper {
    ft_grid: Box<dyn FtMachine>,
    ft_degrid: Option<Box<dyn FtMachine>>,
    ej_grid: Option<Box<dyn SkyJones>>,
    ej_degrid: Option<Box<dyn SkyJones>>,
    components: Option<ComponentList>,
    component_ft: Option<ComponentFt>,
    /// Beam-corrupted deep copy of `components` for the current degrid
    /// episode.
    cl_corrupted: Option<ComponentList>,
    extent_padding: f64,

    // Mosaic gridding episode state.
    mos_shape: Option<ImageShape>,
    mos_region: Option<ImageRegion>,
    mos_target: Option<Image>,
    mos_weight: Option<Image>,
    mos_sumwt: Option<Array2<f32>>,
    /// The buffer and row the open episode was keyed on, for applying the
    /// correction at finalize time.
    episode_ref: Option<(VisBuffer, usize)>,

    // Mosaic degridding episode state.
    degrid_model: Option<Image>,
}

impl SiMapper {
    pub fn new(ft_grid: Box<dyn FtMachine>) -> SiMapper {
        SiMapper {
            ft_grid,
            ft_degrid: None,
            ej_grid: None,
            ej_degrid: None,
            components: None,
            component_ft: None,
            cl_corrupted: None,
            extent_padding: EXTENT_PADDING,
            mos_shape: None,
            mos_region: None,
            mos_target: None,
            mos_weight: None,
            mos_sumwt: None,
            episode_ref: None,
            degrid_model: None,
        }
    }

    pub fn with_degrid_machine(mut self, ft: Box<dyn FtMachine>) -> SiMapper {
        self.ft_degrid = Some(ft);
        self
    }

    pub fn with_grid_jones(mut self, jones: Box<dyn SkyJones>) -> SiMapper {
        self.ej_grid = Some(jones);
        self
    }

    pub fn with_degrid_jones(mut self, jones: Box<dyn SkyJones>) -> SiMapper {
        self.ej_degrid = Some(jones);
        self
    }

    pub fn with_components(mut self, list: ComponentList, ft: ComponentFt) -> SiMapper {
        self.components = Some(list);
        self.component_ft = Some(ft);
        self
    }

    pub fn set_extent_padding(&mut self, padding: f64) {
        self.extent_padding = padding;
    }

    // ------------------------------------------------------------------
    // Plain gridding.

    pub fn initialize_grid_core(
        &mut self,
        shape: ImageShape,
        vb: &VisBuffer,
    ) -> Result<(), MapperError> {
        self.ft_grid.initialize_to_sky(shape, vb)?;
        Ok(())
    }

    pub fn grid_core(
        &mut self,
        vb: &mut VisBuffer,
        do_psf: bool,
        col: VisGridCol,
    ) -> Result<(), MapperError> {
        self.ft_grid.put(vb, None, do_psf, col)?;
        Ok(())
    }

    /// Close the gridding pass: transform to the sky, convert the
    /// correlation-basis grid to Stokes into `target`, and record `sumwt` and
    /// the weight-image flag in the target's misc-info. A supplied weight
    /// image is filled from the per-plane sum of weights.
    pub fn finalize_grid_core(
        &mut self,
        frame: PolFrame,
        target: &mut Image,
        weight: Option<&mut Image>,
    ) -> Result<(), MapperError> {
        self.ft_grid.finalize_to_sky()?;
        let (cimage, sumwt) = self.ft_grid.get_image(false)?;
        to_stokes(target, &cimage, frame)?;
        target.misc.sum_weight = Some(sumwt.clone());
        target.misc.use_weight_image = self.ft_grid.uses_weight_image();
        if let Some(weight_image) = weight {
            fill_flat_weight(weight_image, &sumwt);
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // Plain degridding.

    /// Prepare prediction from a Stokes model image: convert to the buffer's
    /// correlation frame and open the FT machine's predict direction.
    pub fn initialize_degrid_core(
        &mut self,
        model: &Image,
        vb: &VisBuffer,
    ) -> Result<(), MapperError> {
        let shape = model.shape();
        let mut cimage = CImage::zeros(shape);
        to_correlation(&mut cimage, model, vb.pol_frame)?;
        if let Some(ft) = self.ft_degrid.as_deref_mut() {
            ft.initialize_to_vis(&cimage, vb)?;
        }
        Ok(())
    }

    /// Predict model visibilities for the whole buffer and *add* them to the
    /// model-visibility cube, preserving any contribution already there.
    pub fn degrid_core(&mut self, vb: &mut VisBuffer) -> Result<(), MapperError> {
        self.predict_additive(vb, None, false)
    }

    // ------------------------------------------------------------------
    // Image-domain-mosaic gridding.

    /// Open a mosaic gridding pass. With a generic FT machine this starts the
    /// first accumulation episode keyed on the buffer's first row; a machine
    /// that handles direction dependence internally just opens its own
    /// episode over the full image.
    pub fn initialize_grid_core_mos(
        &mut self,
        shape: ImageShape,
        vb: &VisBuffer,
    ) -> Result<(), MapperError> {
        self.mos_shape = Some(shape);
        self.mos_target = Some(Image::zeros(shape));
        self.mos_weight = Some(Image::zeros(shape));
        self.mos_sumwt = Some(Array2::zeros((shape.num_pols, shape.num_chans)));

        if self.ft_grid.handles_direction_dependence_internally() {
            self.episode_ref = Some((vb.clone(), 0));
            self.ft_grid.initialize_to_sky(shape, vb)?;
            return Ok(());
        }
        self.initialize_grid_episode(vb, 0)
    }

    /// Grid one buffer, splitting the accumulation exactly where the
    /// correction changes.
    pub fn grid_core_mos(
        &mut self,
        vb: &mut VisBuffer,
        do_psf: bool,
        col: VisGridCol,
    ) -> Result<(), MapperError> {
        if self.ft_grid.handles_direction_dependence_internally() {
            self.ft_grid.put(vb, None, do_psf, col)?;
            return Ok(());
        }

        let jones = self
            .ej_grid
            .as_deref()
            .ok_or(MapperError::Internal("mosaic gridding with no corrector"))?;
        match changed_sky_jones_logic(jones, vb) {
            SkyJonesChange::Unchanged => {
                self.ft_grid.put(vb, None, do_psf, col)?;
            }
            SkyJonesChange::FirstOne => {
                // The whole buffer sits under a new pointing: one bracket.
                self.finalize_grid_episode()?;
                self.initialize_grid_episode(vb, 0)?;
                self.ft_grid.put(vb, None, do_psf, col)?;
            }
            SkyJonesChange::Internal(_) => {
                // Row-level granularity: bracket exactly at the rows where the
                // correction changes.
                for row in 0..vb.num_rows() {
                    let changed = self
                        .ej_grid
                        .as_deref()
                        .is_some_and(|j| j.changed(vb, row));
                    if changed {
                        self.finalize_grid_episode()?;
                        self.initialize_grid_episode(vb, row)?;
                    }
                    self.ft_grid.put(vb, Some(row), do_psf, col)?;
                }
            }
        }
        Ok(())
    }

    /// Close the mosaic pass: fold the last episode into the target and hand
    /// back the accumulated (target, weight) images.
    pub fn finalize_grid_core_mos(&mut self) -> Result<(Image, Image), MapperError> {
        if self.ft_grid.handles_direction_dependence_internally() {
            let frame = self
                .episode_ref
                .as_ref()
                .map(|(vb, _)| vb.pol_frame)
                .ok_or(MapperError::Internal("mosaic finalize before initialize"))?;
            self.ft_grid.finalize_to_sky()?;
            let (cimage, sumwt) = self.ft_grid.get_image(false)?;
            let mut target = self
                .mos_target
                .take()
                .ok_or(MapperError::Internal("mosaic finalize before initialize"))?;
            let mut weight = self.mos_weight.take().unwrap();
            to_stokes(&mut target, &cimage, frame)?;
            fill_flat_weight(&mut weight, &sumwt);
            target.misc.sum_weight = Some(sumwt);
            target.misc.use_weight_image = self.ft_grid.uses_weight_image();
            self.episode_ref = None;
            return Ok((target, weight));
        }

        self.finalize_grid_episode()?;
        let mut target = self
            .mos_target
            .take()
            .ok_or(MapperError::Internal("mosaic finalize before initialize"))?;
        let weight = self.mos_weight.take().unwrap();
        target.misc.sum_weight = self.mos_sumwt.take();
        // The image-domain mosaic always normalises with its accumulated
        // weight image, whatever the underlying gridder reports.
        target.misc.use_weight_image = true;
        self.mos_region = None;
        self.episode_ref = None;
        Ok((target, weight))
    }

    /// Open one accumulation episode keyed on `(vb, row)`: cache the
    /// correction state, compute the pointing's sub-image extent and zero the
    /// FT machine's grid.
    fn initialize_grid_episode(&mut self, vb: &VisBuffer, row: usize) -> Result<(), MapperError> {
        let shape = self
            .mos_shape
            .ok_or(MapperError::Internal("mosaic grid episode before initialize"))?;
        let jones = self
            .ej_grid
            .as_deref_mut()
            .ok_or(MapperError::Internal("mosaic gridding with no corrector"))?;
        jones.refresh(vb, row);
        self.mos_region = Some(jones.extent(shape, vb, row, self.extent_padding));
        self.episode_ref = Some((vb.clone(), row));
        self.ft_grid.initialize_to_sky(shape, vb)?;
        Ok(())
    }

    /// Close the open episode: transform, apply the correction, and add the
    /// contribution into the mosaic target within the pointing's extent only.
    fn finalize_grid_episode(&mut self) -> Result<(), MapperError> {
        let shape = self
            .mos_shape
            .ok_or(MapperError::Internal("mosaic grid episode before initialize"))?;
        // A null corrector here is an orchestrator bug: initialize must have
        // run first.
        let jones = self
            .ej_grid
            .as_deref()
            .ok_or(MapperError::Internal("mosaic finalize with no corrector"))?;
        let (evb, erow) = self
            .episode_ref
            .as_ref()
            .ok_or(MapperError::Internal("mosaic finalize with no open episode"))?;
        let region = self
            .mos_region
            .ok_or(MapperError::Internal("mosaic finalize with no region"))?;

        self.ft_grid.finalize_to_sky()?;
        let (cimage, sumwt) = self.ft_grid.get_image(false)?;

        let mut delta = Image::zeros(shape);
        to_stokes(&mut delta, &cimage, evb.pol_frame)?;
        let mut corrected = Image::zeros(shape);
        jones.apply(&delta, &mut corrected, evb, *erow, false);
        self.mos_target
            .as_mut()
            .unwrap()
            .add_region(&corrected, region);

        let mut flat = Image::zeros(shape);
        fill_flat_weight(&mut flat, &sumwt);
        let mut weighted = Image::zeros(shape);
        jones.apply_square(&flat, &mut weighted, evb, *erow);
        self.mos_weight
            .as_mut()
            .unwrap()
            .add_region(&weighted, region);

        if let Some(acc) = self.mos_sumwt.as_mut() {
            *acc += &sumwt;
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // Image-domain-mosaic degridding.

    /// Open a mosaic prediction pass from a Stokes model image. The model is
    /// kept so that episodes can rebuild the beam-corrupted model whenever
    /// the correction changes.
    pub fn initialize_degrid_core_mos(
        &mut self,
        model: &Image,
        vb: &VisBuffer,
    ) -> Result<(), MapperError> {
        self.degrid_model = Some(model.clone());
        if self.ft_grid.handles_direction_dependence_internally() {
            return self.initialize_degrid_core(model, vb);
        }
        self.initialize_degrid_episode(vb, 0)
    }

    /// Predict one buffer, rebuilding the corrupted model at every correction
    /// change, and adding predictions into the model-visibility cube.
    pub fn degrid_core_mos(&mut self, vb: &mut VisBuffer) -> Result<(), MapperError> {
        if self.ft_grid.handles_direction_dependence_internally() {
            return self.predict_additive(vb, None, false);
        }

        let jones = self
            .ej_degrid
            .as_deref()
            .ok_or(MapperError::Internal("mosaic degridding with no corrector"))?;
        match changed_sky_jones_logic(jones, vb) {
            SkyJonesChange::Unchanged => self.predict_additive(vb, None, true),
            SkyJonesChange::FirstOne => {
                self.initialize_degrid_episode(vb, 0)?;
                self.predict_additive(vb, None, true)
            }
            SkyJonesChange::Internal(_) => {
                for row in 0..vb.num_rows() {
                    let changed = self
                        .ej_degrid
                        .as_deref()
                        .is_some_and(|j| j.changed(vb, row));
                    if changed {
                        self.initialize_degrid_episode(vb, row)?;
                    }
                    self.predict_additive(vb, Some(row), true)?;
                }
                Ok(())
            }
        }
    }

    /// Close the mosaic prediction pass, dropping per-episode state.
    pub fn finalize_degrid_core_mos(&mut self) {
        self.cl_corrupted = None;
        self.degrid_model = None;
    }

    /// Open one prediction episode keyed on `(vb, row)`: corrupt the model
    /// image and the component list by the correction at that pointing and
    /// re-open the FT machine's predict direction.
    fn initialize_degrid_episode(&mut self, vb: &VisBuffer, row: usize) -> Result<(), MapperError> {
        let model = self
            .degrid_model
            .clone()
            .ok_or(MapperError::Internal("mosaic degrid episode before initialize"))?;
        {
            let jones = self
                .ej_degrid
                .as_deref_mut()
                .ok_or(MapperError::Internal("mosaic degridding with no corrector"))?;
            jones.refresh(vb, row);
        }
        let jones = self.ej_degrid.as_deref().unwrap();
        let shape = model.shape();
        let mut corrupted = Image::zeros(shape);
        jones.apply(&model, &mut corrupted, vb, row, true);
        let mut cimage = CImage::zeros(shape);
        to_correlation(&mut cimage, &corrupted, vb.pol_frame)?;
        self.cl_corrupted = self
            .components
            .as_ref()
            .map(|list| list.corrupted(jones, vb, row));
        if let Some(ft) = self.ft_degrid.as_deref_mut() {
            ft.initialize_to_vis(&cimage, vb)?;
        }
        Ok(())
    }

    /// Shared additive prediction: the FT machine overwrites the sampled
    /// entries, the component machine adds, and the buffer's prior model
    /// contribution is added back at the end, so callers always observe
    /// `model += prediction`.
    fn predict_additive(
        &mut self,
        vb: &mut VisBuffer,
        row: Option<usize>,
        use_corrupted: bool,
    ) -> Result<(), MapperError> {
        let original = vb.model_vis_cube.clone();
        match row {
            Some(r) => vb
                .model_vis_cube
                .slice_mut(ndarray::s![.., .., r])
                .fill(c32::default()),
            None => vb.model_vis_cube.fill(c32::default()),
        }

        if let Some(ft) = self.ft_degrid.as_deref_mut() {
            ft.get(vb, row)?;
        }
        if let Some(component_ft) = &self.component_ft {
            let list = if use_corrupted {
                self.cl_corrupted.as_ref().or(self.components.as_ref())
            } else {
                self.components.as_ref()
            };
            if let Some(list) = list {
                component_ft.get(vb, row, list);
            }
        }

        vb.model_vis_cube += &original;
        Ok(())
    }
}

/// Fill every spatial pixel of `image` with the per-(pol, chan) sum of
/// weights.
fn fill_flat_weight(image: &mut Image, sumwt: &Array2<f32>) {
    let shape = image.shape();
    for p in 0..shape.num_pols {
        for c in 0..shape.num_chans {
            image
                .data
                .slice_mut(ndarray::s![.., .., p, c])
                .fill(sumwt[(p, c)]);
        }
    }
}
