// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Shared helpers for unit tests: visibility-buffer builders and an FT
//! machine double that records the call sequence it receives.

use std::cell::RefCell;
use std::rc::Rc;

use ndarray::Array2;

use crate::{
    c32,
    ftmachine::{FtError, FtMachine, VisGridCol},
    image::{CImage, ImageShape},
    vis::{PolFrame, VisBuffer, UVW},
};

/// A single-pol, single-channel buffer with one row per pointing id and
/// mildly varied uvw coordinates.
pub(crate) fn buffer_with_pointings(pointings: &[usize]) -> VisBuffer {
    let num_rows = pointings.len();
    let uvw = (0..num_rows)
        .map(|r| UVW {
            u: 10.0 + r as f64,
            v: -5.0 + r as f64,
            w: 0.0,
        })
        .collect();
    VisBuffer::new(
        vec![0; num_rows],
        vec![1; num_rows],
        uvw,
        pointings.to_vec(),
        vec![150e6],
        1,
        PolFrame::Linear,
    )
}

/// The calls a [`RecordingFt`] has seen. Clones made through `clone_ftm` share
/// one log; `taylor` tells the entries apart.
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum FtEvent {
    InitToSky { taylor: usize },
    Put {
        taylor: usize,
        row: Option<usize>,
        do_psf: bool,
        /// Sum of the buffer's imaging weights at the time of the call, to
        /// observe in-place weight modification.
        wsum: f32,
    },
    FinalizeToSky { taylor: usize },
    GetImage { taylor: usize },
    InitToVis { taylor: usize },
    Get { taylor: usize, row: Option<usize> },
}

pub(crate) type FtLog = Rc<RefCell<Vec<FtEvent>>>;

/// An FT machine double that records every protocol call. `get` fills the
/// model cube with `taylor + 1` so prediction paths are distinguishable.
pub(crate) struct RecordingFt {
    pub(crate) events: FtLog,
    pub(crate) dd_internal: bool,
    pub(crate) cloneable: bool,
    taylor: usize,
    shape: Option<ImageShape>,
}

impl RecordingFt {
    pub(crate) fn new() -> (RecordingFt, FtLog) {
        let events: FtLog = Rc::default();
        (
            RecordingFt {
                events: Rc::clone(&events),
                dd_internal: false,
                cloneable: true,
                taylor: 0,
                shape: None,
            },
            events,
        )
    }

    pub(crate) fn with_dd_internal() -> (RecordingFt, FtLog) {
        let (mut ft, log) = RecordingFt::new();
        ft.dd_internal = true;
        (ft, log)
    }
}

impl FtMachine for RecordingFt {
    fn name(&self) -> &'static str {
        "RecordingFt"
    }

    fn initialize_to_sky(&mut self, shape: ImageShape, _vb: &VisBuffer) -> Result<(), FtError> {
        self.shape = Some(shape);
        self.events
            .borrow_mut()
            .push(FtEvent::InitToSky { taylor: self.taylor });
        Ok(())
    }

    fn put(
        &mut self,
        vb: &mut VisBuffer,
        row: Option<usize>,
        do_psf: bool,
        _col: VisGridCol,
    ) -> Result<(), FtError> {
        self.events.borrow_mut().push(FtEvent::Put {
            taylor: self.taylor,
            row,
            do_psf,
            wsum: vb.imaging_weight.sum(),
        });
        Ok(())
    }

    fn finalize_to_sky(&mut self) -> Result<(), FtError> {
        self.events
            .borrow_mut()
            .push(FtEvent::FinalizeToSky { taylor: self.taylor });
        Ok(())
    }

    fn get_image(&mut self, _normalize: bool) -> Result<(CImage, Array2<f32>), FtError> {
        self.events
            .borrow_mut()
            .push(FtEvent::GetImage { taylor: self.taylor });
        let shape = self.shape.unwrap_or(ImageShape {
            nx: 2,
            ny: 2,
            num_pols: 1,
            num_chans: 1,
        });
        Ok((
            CImage::zeros(shape),
            Array2::ones((shape.num_pols, shape.num_chans)),
        ))
    }

    fn initialize_to_vis(&mut self, cimage: &CImage, _vb: &VisBuffer) -> Result<(), FtError> {
        self.shape = Some(cimage.shape());
        self.events
            .borrow_mut()
            .push(FtEvent::InitToVis { taylor: self.taylor });
        Ok(())
    }

    fn get(&mut self, vb: &mut VisBuffer, row: Option<usize>) -> Result<(), FtError> {
        self.events.borrow_mut().push(FtEvent::Get {
            taylor: self.taylor,
            row,
        });
        let value = c32::new((self.taylor + 1) as f32, 0.0);
        match row {
            Some(r) => vb.model_vis_cube.slice_mut(ndarray::s![.., .., r]).fill(value),
            None => vb.model_vis_cube.fill(value),
        }
        Ok(())
    }

    fn clone_ftm(&self) -> Option<Box<dyn FtMachine>> {
        if !self.cloneable {
            return None;
        }
        Some(Box::new(RecordingFt {
            events: Rc::clone(&self.events),
            dd_internal: self.dd_internal,
            cloneable: self.cloneable,
            taylor: self.taylor,
            shape: None,
        }))
    }

    fn handles_direction_dependence_internally(&self) -> bool {
        self.dd_internal
    }

    fn set_misc_info(&mut self, taylor_index: usize) {
        self.taylor = taylor_index;
    }
}

/// Count bracket pairs in a log: (initializeToSky count, finalizeToSky count).
pub(crate) fn bracket_counts(log: &FtLog) -> (usize, usize) {
    let events = log.borrow();
    let inits = events
        .iter()
        .filter(|e| matches!(e, FtEvent::InitToSky { .. }))
        .count();
    let finals = events
        .iter()
        .filter(|e| matches!(e, FtEvent::FinalizeToSky { .. }))
        .count();
    (inits, finals)
}
