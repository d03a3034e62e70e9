// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Direction-dependent corrections ("sky Jones" terms).
//!
//! A [`SkyJones`] is a spatially varying multiplicative correction (primary
//! beam, pointing offset) applied per row when moving between the sky and
//! visibility domains. The correction can change as fast as once per row, and
//! the gridding orchestrators must split their image accumulation exactly at
//! those boundaries; [`changed_sky_jones_logic`] is the shared predicate that
//! classifies a buffer for that purpose.


use crate::{
    image::{Image, ImageRegion, ImageShape},
    vis::VisBuffer,
};

/// How the correction state relates to one visibility buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkyJonesChange {
    /// Nothing changed; the whole buffer can be gridded in one go.
    Unchanged,
    /// The correction changed relative to the previous buffer, but is uniform
    /// within this one: one finalize/initialize bracket suffices.
    FirstOne,
    /// The correction changes within the buffer, first at this row: row-level
    /// granularity is required.
    Internal(usize),
}

/// A direction-dependent correction.
///
/// Implementations cache the state they last saw (via [`SkyJones::refresh`]);
/// [`SkyJones::changed`] compares a row against that cache, while
/// [`SkyJones::changed_between`] compares two rows of the same buffer without
/// touching the cache.
pub trait SkyJones {
    /// The rectangular image region illuminated by this correction for the
    /// given row, padded by `padding` (a multiplier on the beam width) and
    /// clamped to the image.
    fn extent(
        &self,
        shape: ImageShape,
        vb: &VisBuffer,
        row: usize,
        padding: f64,
    ) -> ImageRegion;

    /// `output = input * correction` for the row's pointing. `forward` selects
    /// the sky-to-visibility direction; for real-valued corrections the two
    /// directions coincide.
    fn apply(&self, input: &Image, output: &mut Image, vb: &VisBuffer, row: usize, forward: bool);

    /// `output = input * correction^2` for the row's pointing.
    fn apply_square(&self, input: &Image, output: &mut Image, vb: &VisBuffer, row: usize);

    /// The correction factor at one spatial pixel, used to corrupt
    /// point-source components.
    fn attenuation(&self, x: f64, y: f64, vb: &VisBuffer, row: usize) -> f32;

    /// Whether the correction at `row` differs from the cached state.
    fn changed(&self, vb: &VisBuffer, row: usize) -> bool;

    /// Whether the correction differs between two rows of the same buffer.
    fn changed_between(&self, vb: &VisBuffer, row_a: usize, row_b: usize) -> bool;

    /// Cache the correction state at `row`.
    fn refresh(&mut self, vb: &VisBuffer, row: usize);

    /// Forget any cached state, so the next buffer reports a change.
    fn reset(&mut self);
}

/// Classify a buffer against the correction's cached state: unchanged, changed
/// as a whole, or changing somewhere inside.
///
/// An internal change takes precedence: handling it row by row also covers any
/// change relative to the previous buffer.
pub fn changed_sky_jones_logic(jones: &dyn SkyJones, vb: &VisBuffer) -> SkyJonesChange {
    for row in 1..vb.num_rows() {
        if jones.changed_between(vb, 0, row) {
            return SkyJonesChange::Internal(row);
        }
    }
    if jones.changed(vb, 0) {
        SkyJonesChange::FirstOne
    } else {
        SkyJonesChange::Unchanged
    }
}

/// A circular Gaussian primary beam, one centre per pointing id. The
/// correction changes exactly when the row's pointing id changes.
pub struct GaussianPrimaryBeam {
    /// Pixel-space beam centres, indexed by pointing id.
    centres: Vec<(f64, f64)>,
    /// Full width at half maximum, in pixels.
    fwhm: f64,
    current: Option<usize>,
}

impl GaussianPrimaryBeam {
    pub fn new(centres: Vec<(f64, f64)>, fwhm: f64) -> GaussianPrimaryBeam {
        GaussianPrimaryBeam {
            centres,
            fwhm,
            current: None,
        }
    }

    fn beam_value(&self, x: f64, y: f64, pointing: usize) -> f32 {
        let (cx, cy) = self.centres[pointing];
        let r2 = (x - cx).powi(2) + (y - cy).powi(2);
        (-4.0 * std::f64::consts::LN_2 * r2 / (self.fwhm * self.fwhm)).exp() as f32
    }

    fn apply_power(&self, input: &Image, output: &mut Image, pointing: usize, power: i32) {
        let shape = input.shape();
        for x in 0..shape.nx {
            for y in 0..shape.ny {
                let b = self.beam_value(x as f64, y as f64, pointing).powi(power);
                for p in 0..shape.num_pols {
                    for c in 0..shape.num_chans {
                        output.data[(x, y, p, c)] = input.data[(x, y, p, c)] * b;
                    }
                }
            }
        }
    }
}

impl SkyJones for GaussianPrimaryBeam {
    fn extent(
        &self,
        shape: ImageShape,
        vb: &VisBuffer,
        row: usize,
        padding: f64,
    ) -> ImageRegion {
        let (cx, cy) = self.centres[vb.pointing[row]];
        ImageRegion::centred(cx, cy, padding * self.fwhm, shape)
    }

    fn apply(&self, input: &Image, output: &mut Image, vb: &VisBuffer, row: usize, _forward: bool) {
        self.apply_power(input, output, vb.pointing[row], 1);
    }

    fn apply_square(&self, input: &Image, output: &mut Image, vb: &VisBuffer, row: usize) {
        self.apply_power(input, output, vb.pointing[row], 2);
    }

    fn attenuation(&self, x: f64, y: f64, vb: &VisBuffer, row: usize) -> f32 {
        self.beam_value(x, y, vb.pointing[row])
    }

    fn changed(&self, vb: &VisBuffer, row: usize) -> bool {
        self.current != Some(vb.pointing[row])
    }

    fn changed_between(&self, vb: &VisBuffer, row_a: usize, row_b: usize) -> bool {
        vb.pointing[row_a] != vb.pointing[row_b]
    }

    fn refresh(&mut self, vb: &VisBuffer, row: usize) {
        self.current = Some(vb.pointing[row]);
    }

    fn reset(&mut self) {
        self.current = None;
    }
}
