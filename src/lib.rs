// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

/*!
Mosaic and multi-term gridding for radio-interferometric synthesis imaging.

This crate drives the iterate-transform-accumulate cycle that turns calibrated
visibilities into sky images (and back). The heavy lifting is split over three
cooperating layers:

- [`skyeq::MosaicSkyEquation`] orchestrates a visibility-chunk iteration,
  splitting image accumulation exactly where the direction-dependent
  (primary-beam) correction changes;
- [`mapper::SiMapper`] wraps one FT machine binding for a major cycle,
  supporting plain and image-domain-mosaic grid/degrid paths;
- [`multiterm::MultiTermFt`] decorates any FT machine with multi-frequency
  synthesis Taylor-term bookkeeping.

Visibility access, direction-dependent corrections and FT machines are
abstracted behind traits so that other backends can be slotted in.
 */

pub mod error;
pub mod ftmachine;
pub mod image;
pub mod mapper;
pub(crate) mod math;
pub mod multiterm;
pub mod skyeq;
pub mod skyjones;
pub mod stats;
pub mod vis;

#[cfg(test)]
pub(crate) mod testing;

// Re-exports.
pub use error::MosgridError;
pub use ftmachine::{FtMachine, GridFt, VisGridCol};
pub use image::{CImage, Image, ImageRegion, ImageShape};
pub use mapper::SiMapper;
pub use multiterm::MultiTermFt;
pub use skyeq::MosaicSkyEquation;
pub use skyjones::{GaussianPrimaryBeam, SkyJones};
pub use vis::{MemoryVisSource, PolFrame, VisBuffer, VisibilitySource};

/// Speed of light \[m/s\].
pub(crate) const VEL_C: f64 = 299_792_458.0;

/// A shorthand for a single-precision complex number.
#[allow(non_camel_case_types)]
pub type c32 = num_complex::Complex<f32>;
