// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Image planes, rectangular sub-image regions and the Stokes/correlation
//! basis conversions used around gridding.
//!
//! All image planes are 4D \[ra × dec × stokes × channel\]. Sub-image
//! windowing ([`ImageRegion`]) restricts transforms and mosaic accumulation to
//! the illuminated part of a pointing, which is what keeps mosaic FFT costs
//! proportional to the primary-beam footprint rather than the full image.

mod store;

pub use store::{MultiTermStore, SingleTermStore, SkyModelStore};

use ndarray::prelude::*;
use thiserror::Error;

use crate::{c32, vis::PolFrame};

#[derive(Error, Debug)]
pub enum ImageError {
    #[error("Unsupported number of Stokes planes for basis conversion: {0}")]
    UnsupportedStokes(usize),

    #[error("Image shape mismatch: {0:?} vs {1:?}")]
    ShapeMismatch(ImageShape, ImageShape),
}

/// The shape of one image: spatial axes, Stokes planes and channels.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ImageShape {
    pub nx: usize,
    pub ny: usize,
    pub num_pols: usize,
    pub num_chans: usize,
}

impl ImageShape {
    pub fn as_tuple(self) -> (usize, usize, usize, usize) {
        (self.nx, self.ny, self.num_pols, self.num_chans)
    }
}

/// A rectangular sub-window of an image's spatial axes. `x0`/`y0` is the
/// bottom-left corner; the region always lies fully inside the image it was
/// clamped to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ImageRegion {
    pub x0: usize,
    pub y0: usize,
    pub nx: usize,
    pub ny: usize,
}

impl ImageRegion {
    /// The whole spatial extent of an image.
    pub fn full(shape: ImageShape) -> ImageRegion {
        ImageRegion {
            x0: 0,
            y0: 0,
            nx: shape.nx,
            ny: shape.ny,
        }
    }

    /// A region centred on `(cx, cy)` with the given half-width, clamped to
    /// the image. An extent larger than the image degenerates to the full
    /// image.
    pub fn centred(cx: f64, cy: f64, half_width: f64, shape: ImageShape) -> ImageRegion {
        let x0 = (cx - half_width).floor().max(0.0) as usize;
        let y0 = (cy - half_width).floor().max(0.0) as usize;
        let x1 = ((cx + half_width).ceil() as usize + 1).min(shape.nx);
        let y1 = ((cy + half_width).ceil() as usize + 1).min(shape.ny);
        ImageRegion {
            x0: x0.min(shape.nx.saturating_sub(1)),
            y0: y0.min(shape.ny.saturating_sub(1)),
            nx: x1.saturating_sub(x0).max(1),
            ny: y1.saturating_sub(y0).max(1),
        }
    }

    pub fn contains(&self, x: usize, y: usize) -> bool {
        x >= self.x0 && x < self.x0 + self.nx && y >= self.y0 && y < self.y0 + self.ny
    }

    pub fn intersect(&self, other: &ImageRegion) -> Option<ImageRegion> {
        let x0 = self.x0.max(other.x0);
        let y0 = self.y0.max(other.y0);
        let x1 = (self.x0 + self.nx).min(other.x0 + other.nx);
        let y1 = (self.y0 + self.ny).min(other.y0 + other.ny);
        if x0 < x1 && y0 < y1 {
            Some(ImageRegion {
                x0,
                y0,
                nx: x1 - x0,
                ny: y1 - y0,
            })
        } else {
            None
        }
    }

    pub fn num_pixels(&self) -> usize {
        self.nx * self.ny
    }
}

/// Miscellaneous information carried with a gridded image, mirroring what the
/// gridder knows and downstream normalisation needs.
#[derive(Debug, Clone, Default)]
pub struct MiscInfo {
    /// Per-(pol, chan) sum of gridded weights.
    pub sum_weight: Option<Array2<f32>>,
    /// Whether normalisation must use a separately gridded weight image
    /// rather than `sum_weight` alone.
    pub use_weight_image: bool,
}

/// A real-valued image with its misc-info record.
#[derive(Debug, Clone)]
pub struct Image {
    pub data: Array4<f32>,
    pub misc: MiscInfo,
}

impl Image {
    pub fn zeros(shape: ImageShape) -> Image {
        Image {
            data: Array4::zeros(shape.as_tuple()),
            misc: MiscInfo::default(),
        }
    }

    pub fn shape(&self) -> ImageShape {
        let (nx, ny, num_pols, num_chans) = self.data.dim();
        ImageShape {
            nx,
            ny,
            num_pols,
            num_chans,
        }
    }

    pub fn view_region(&self, region: ImageRegion) -> ArrayView4<f32> {
        self.data.slice(s![
            region.x0..region.x0 + region.nx,
            region.y0..region.y0 + region.ny,
            ..,
            ..
        ])
    }

    pub fn view_region_mut(&mut self, region: ImageRegion) -> ArrayViewMut4<f32> {
        self.data.slice_mut(s![
            region.x0..region.x0 + region.nx,
            region.y0..region.y0 + region.ny,
            ..,
            ..
        ])
    }

    /// `self[region] += other[region]` - the mosaic accumulation primitive.
    pub fn add_region(&mut self, other: &Image, region: ImageRegion) {
        let mut target = self.view_region_mut(region);
        target += &other.view_region(region);
    }
}

/// A complex-valued working grid with the same axis layout as [`Image`].
#[derive(Debug, Clone)]
pub struct CImage {
    pub data: Array4<c32>,
}

impl CImage {
    pub fn zeros(shape: ImageShape) -> CImage {
        CImage {
            data: Array4::zeros(shape.as_tuple()),
        }
    }

    pub fn shape(&self) -> ImageShape {
        let (nx, ny, num_pols, num_chans) = self.data.dim();
        ImageShape {
            nx,
            ny,
            num_pols,
            num_chans,
        }
    }

    pub fn zero(&mut self) {
        self.data.fill(c32::default());
    }
}

/// Convert a Stokes image to the correlation basis of the given polarisation
/// frame, writing into `out`. One plane is plain I; two planes are (I, Q) in a
/// linear frame giving (XX, YY), or (I, V) in a circular frame giving
/// (RR, LL).
pub fn to_correlation(out: &mut CImage, input: &Image, frame: PolFrame) -> Result<(), ImageError> {
    let shape = input.shape();
    if out.shape() != shape {
        return Err(ImageError::ShapeMismatch(out.shape(), shape));
    }
    match shape.num_pols {
        1 => {
            for (o, &i) in out.data.iter_mut().zip(input.data.iter()) {
                *o = c32::new(i, 0.0);
            }
            Ok(())
        }
        2 => {
            // (I, Q) -> (XX, YY) and (I, V) -> (RR, LL) share the same
            // sum/difference form.
            let _ = frame;
            for x in 0..shape.nx {
                for y in 0..shape.ny {
                    for c in 0..shape.num_chans {
                        let i = input.data[(x, y, 0, c)];
                        let s = input.data[(x, y, 1, c)];
                        out.data[(x, y, 0, c)] = c32::new(i + s, 0.0);
                        out.data[(x, y, 1, c)] = c32::new(i - s, 0.0);
                    }
                }
            }
            Ok(())
        }
        n => Err(ImageError::UnsupportedStokes(n)),
    }
}

/// The inverse of [`to_correlation`]: collapse a correlation-basis complex
/// image onto Stokes planes, discarding the (ideally zero) imaginary parts.
pub fn to_stokes(out: &mut Image, input: &CImage, frame: PolFrame) -> Result<(), ImageError> {
    let shape = input.shape();
    if out.shape() != shape {
        return Err(ImageError::ShapeMismatch(out.shape(), shape));
    }
    match shape.num_pols {
        1 => {
            for (o, i) in out.data.iter_mut().zip(input.data.iter()) {
                *o = i.re;
            }
            Ok(())
        }
        2 => {
            let _ = frame;
            for x in 0..shape.nx {
                for y in 0..shape.ny {
                    for c in 0..shape.num_chans {
                        let p = input.data[(x, y, 0, c)].re;
                        let q = input.data[(x, y, 1, c)].re;
                        out.data[(x, y, 0, c)] = 0.5 * (p + q);
                        out.data[(x, y, 1, c)] = 0.5 * (p - q);
                    }
                }
            }
            Ok(())
        }
        n => Err(ImageError::UnsupportedStokes(n)),
    }
}
