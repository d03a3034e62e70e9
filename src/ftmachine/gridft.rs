// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! A nearest-cell uv gridder/degridder with FFT-based transforms.
//!
//! Visibility channels map onto image channel planes one-to-one, except that a
//! single-plane image collapses all channels onto it (continuum imaging).

use ndarray::prelude::*;

use super::{FtError, FtMachine, VisGridCol};
use crate::{
    c32,
    image::{CImage, ImageShape},
    math::{fftshift2, Fft2},
    vis::VisBuffer,
    VEL_C,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum GridFtState {
    Idle,
    ToSky,
    SkyDone,
    ToVis,
}

/// The default FT machine: nearest-cell gridding onto a regular uv grid, with
/// no direction-dependent handling of its own.
pub struct GridFt {
    /// uv cell size in wavelengths.
    uv_cell: f64,
    mosaic: bool,
    taylor_index: usize,

    state: GridFtState,
    shape: Option<ImageShape>,
    /// Accumulation grid / transformed image, \[x × y × pol × chan\].
    grid: Option<Array4<c32>>,
    /// Degrid (predict) grid.
    vis_grid: Option<Array4<c32>>,
    /// Per-(pol, chan-plane) sum of gridded weights.
    sumwt: Option<Array2<f32>>,
    fft: Fft2,
}

impl GridFt {
    pub fn new(uv_cell: f64) -> GridFt {
        GridFt {
            uv_cell,
            mosaic: false,
            taylor_index: 0,
            state: GridFtState::Idle,
            shape: None,
            grid: None,
            vis_grid: None,
            sumwt: None,
            fft: Fft2::new(),
        }
    }

    /// A gridder that convolves its own primary-beam handling into the uv
    /// plane, so orchestrators skip their explicit per-row bracket cycle for
    /// it.
    pub fn new_mosaic(uv_cell: f64) -> GridFt {
        GridFt {
            mosaic: true,
            ..GridFt::new(uv_cell)
        }
    }

    pub fn taylor_index(&self) -> usize {
        self.taylor_index
    }

    /// The uv cell of one visibility in grid units, or None when it falls off
    /// the grid.
    fn cell(uv_cell: f64, metres: f64, freq: f64, n: usize) -> Option<usize> {
        let cells = metres * freq / VEL_C / uv_cell;
        let k = cells.round() as i64;
        let half = (n / 2) as i64;
        if k < -half || k >= half {
            return None;
        }
        Some(((k % n as i64 + n as i64) % n as i64) as usize)
    }

    fn row_range(vb: &VisBuffer, row: Option<usize>) -> std::ops::Range<usize> {
        match row {
            Some(r) => r..r + 1,
            None => 0..vb.num_rows(),
        }
    }
}

impl FtMachine for GridFt {
    fn name(&self) -> &'static str {
        if self.mosaic {
            "MosaicFT"
        } else {
            "GridFT"
        }
    }

    fn initialize_to_sky(&mut self, shape: ImageShape, _vb: &VisBuffer) -> Result<(), FtError> {
        if self.state == GridFtState::ToSky {
            return Err(FtError::ProtocolViolation(
                "initializeToSky called while an episode is already open",
            ));
        }
        self.shape = Some(shape);
        self.grid = Some(Array4::zeros(shape.as_tuple()));
        self.sumwt = Some(Array2::zeros((shape.num_pols, shape.num_chans)));
        self.state = GridFtState::ToSky;
        Ok(())
    }

    fn put(
        &mut self,
        vb: &mut VisBuffer,
        row: Option<usize>,
        do_psf: bool,
        col: VisGridCol,
    ) -> Result<(), FtError> {
        if self.state != GridFtState::ToSky {
            return Err(FtError::ProtocolViolation("put before initializeToSky"));
        }
        let shape = self.shape.unwrap();
        let uv_cell = self.uv_cell;
        let grid = self.grid.as_mut().unwrap();
        let sumwt = self.sumwt.as_mut().unwrap();

        let cube = match col {
            VisGridCol::Observed => vb.vis_cube.view(),
            VisGridCol::Model => vb.model_vis_cube.view(),
        };

        for r in Self::row_range(vb, row) {
            for ch in 0..vb.num_chans() {
                let plane = ch.min(shape.num_chans - 1);
                let w = vb.imaging_weight[(ch, r)];
                if w == 0.0 {
                    continue;
                }
                let (iu, jv) = match (
                    Self::cell(uv_cell, vb.uvw[r].u, vb.freqs[ch], shape.nx),
                    Self::cell(uv_cell, vb.uvw[r].v, vb.freqs[ch], shape.ny),
                ) {
                    (Some(iu), Some(jv)) => (iu, jv),
                    _ => continue,
                };
                for p in 0..shape.num_pols.min(vb.num_pols()) {
                    let value = if do_psf {
                        c32::new(w, 0.0)
                    } else {
                        cube[(p, ch, r)] * w
                    };
                    grid[(iu, jv, p, plane)] += value;
                    sumwt[(p, plane)] += w;
                }
            }
        }
        Ok(())
    }

    fn finalize_to_sky(&mut self) -> Result<(), FtError> {
        if self.state != GridFtState::ToSky {
            return Err(FtError::ProtocolViolation(
                "finalizeToSky without a matching initializeToSky",
            ));
        }
        let shape = self.shape.unwrap();
        let grid = self.grid.as_mut().unwrap();
        // uv -> image per plane: unnormalised inverse transform, DC shifted to
        // the image centre.
        let scale = (shape.nx * shape.ny) as f32;
        for p in 0..shape.num_pols {
            for c in 0..shape.num_chans {
                let mut plane = grid.slice_mut(s![.., .., p, c]);
                self.fft.inverse(plane.view_mut());
                plane.mapv_inplace(|v| v * scale);
                fftshift2(plane);
            }
        }
        self.state = GridFtState::SkyDone;
        Ok(())
    }

    fn get_image(&mut self, normalize: bool) -> Result<(CImage, Array2<f32>), FtError> {
        if self.state != GridFtState::SkyDone {
            return Err(FtError::ProtocolViolation("getImage before finalizeToSky"));
        }
        let shape = self.shape.unwrap();
        let mut data = self.grid.take().unwrap();
        let sumwt = self.sumwt.take().unwrap();
        if normalize {
            for p in 0..shape.num_pols {
                for c in 0..shape.num_chans {
                    let w = sumwt[(p, c)];
                    if w > 0.0 {
                        data.slice_mut(s![.., .., p, c]).mapv_inplace(|v| v / w);
                    }
                }
            }
        }
        self.state = GridFtState::Idle;
        Ok((CImage { data }, sumwt))
    }

    fn initialize_to_vis(&mut self, cimage: &CImage, _vb: &VisBuffer) -> Result<(), FtError> {
        if self.state == GridFtState::ToSky {
            return Err(FtError::ProtocolViolation(
                "initializeToVis called while a gridding episode is open",
            ));
        }
        let shape = cimage.shape();
        self.shape = Some(shape);
        let mut grid = cimage.data.clone();
        // image -> uv per plane: shift the centre back to the origin, forward
        // transform.
        for p in 0..shape.num_pols {
            for c in 0..shape.num_chans {
                let mut plane = grid.slice_mut(s![.., .., p, c]);
                fftshift2(plane.view_mut());
                self.fft.forward(plane);
            }
        }
        self.vis_grid = Some(grid);
        self.state = GridFtState::ToVis;
        Ok(())
    }

    fn get(&mut self, vb: &mut VisBuffer, row: Option<usize>) -> Result<(), FtError> {
        if self.state != GridFtState::ToVis {
            return Err(FtError::ProtocolViolation("get before initializeToVis"));
        }
        let shape = self.shape.unwrap();
        let grid = self.vis_grid.as_ref().unwrap();

        for r in Self::row_range(vb, row) {
            for ch in 0..vb.num_chans() {
                let plane = ch.min(shape.num_chans - 1);
                let sample = match (
                    Self::cell(self.uv_cell, vb.uvw[r].u, vb.freqs[ch], shape.nx),
                    Self::cell(self.uv_cell, vb.uvw[r].v, vb.freqs[ch], shape.ny),
                ) {
                    (Some(iu), Some(jv)) => Some((iu, jv)),
                    _ => None,
                };
                for p in 0..shape.num_pols.min(vb.num_pols()) {
                    vb.model_vis_cube[(p, ch, r)] = match sample {
                        Some((iu, jv)) => grid[(iu, jv, p, plane)],
                        None => c32::default(),
                    };
                }
            }
        }
        Ok(())
    }

    fn clone_ftm(&self) -> Option<Box<dyn FtMachine>> {
        let mut clone = if self.mosaic {
            GridFt::new_mosaic(self.uv_cell)
        } else {
            GridFt::new(self.uv_cell)
        };
        clone.taylor_index = self.taylor_index;
        Some(Box::new(clone))
    }

    fn handles_direction_dependence_internally(&self) -> bool {
        self.mosaic
    }

    fn uses_weight_image(&self) -> bool {
        // Plain uv gridding normalises with the scalar sum of weights; the
        // mosaic gridder's image-plane response needs a gridded weight image.
        self.mosaic
    }

    fn set_misc_info(&mut self, taylor_index: usize) {
        self.taylor_index = taylor_index;
    }
}
