// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Some helper mathematics: 2D FFTs over image planes and the Taylor-term
//! frequency weighting used in multi-frequency synthesis.


use ndarray::prelude::*;
use num_traits::Zero;
use rustfft::{FftDirection, FftPlanner};

use crate::c32;

/// The frequency-dependent polynomial factor applied to visibility weights and
/// model visibilities for one Taylor term: `((freq - reffreq) / reffreq)^order`.
#[inline]
pub(crate) fn taylor_weight(freq: f64, reffreq: f64, order: usize) -> f32 {
    ((freq - reffreq) / reffreq).powi(order as i32) as f32
}

/// The peak value of a real image over all planes.
pub(crate) fn peak(image: &Array4<f32>) -> f32 {
    image.iter().copied().fold(f32::MIN, f32::max)
}

/// Swap quadrants of a 2D plane so that the zero-frequency cell moves between
/// the corner and the centre. Exact for even dimensions, which is all the
/// gridder produces.
pub(crate) fn fftshift2(mut plane: ArrayViewMut2<c32>) {
    let (nx, ny) = plane.dim();
    let (hx, hy) = (nx / 2, ny / 2);
    for i in 0..hx {
        for j in 0..ny {
            let jj = (j + hy) % ny;
            let tmp = plane[(i, j)];
            plane[(i, j)] = plane[(i + hx, jj)];
            plane[(i + hx, jj)] = tmp;
        }
    }
}

/// Planner-caching wrapper around rustfft for in-place 2D transforms of image
/// planes.
pub(crate) struct Fft2 {
    planner: FftPlanner<f32>,
}

impl Fft2 {
    pub(crate) fn new() -> Fft2 {
        Fft2 {
            planner: FftPlanner::new(),
        }
    }

    fn transform(&mut self, mut plane: ArrayViewMut2<c32>, direction: FftDirection) {
        let (nx, ny) = plane.dim();

        let row_fft = self.planner.plan_fft(ny, direction);
        let mut scratch = vec![c32::zero(); row_fft.get_inplace_scratch_len()];
        let mut tmp = vec![c32::zero(); ny.max(nx)];
        for mut row in plane.rows_mut() {
            match row.as_slice_mut() {
                Some(s) => row_fft.process_with_scratch(s, &mut scratch),
                None => {
                    tmp[..ny].iter_mut().zip(row.iter()).for_each(|(t, &v)| *t = v);
                    row_fft.process_with_scratch(&mut tmp[..ny], &mut scratch);
                    row.iter_mut().zip(tmp[..ny].iter()).for_each(|(v, &t)| *v = t);
                }
            }
        }

        let col_fft = self.planner.plan_fft(nx, direction);
        scratch.resize(col_fft.get_inplace_scratch_len(), c32::zero());
        for j in 0..ny {
            for i in 0..nx {
                tmp[i] = plane[(i, j)];
            }
            col_fft.process_with_scratch(&mut tmp[..nx], &mut scratch);
            for i in 0..nx {
                plane[(i, j)] = tmp[i];
            }
        }
    }

    pub(crate) fn forward(&mut self, plane: ArrayViewMut2<c32>) {
        self.transform(plane, FftDirection::Forward);
    }

    /// Inverse transform, normalised by `1 / (nx * ny)`.
    pub(crate) fn inverse(&mut self, mut plane: ArrayViewMut2<c32>) {
        let (nx, ny) = plane.dim();
        self.transform(plane.view_mut(), FftDirection::Inverse);
        let norm = 1.0 / (nx * ny) as f32;
        plane.mapv_inplace(|v| v * norm);
    }
}
