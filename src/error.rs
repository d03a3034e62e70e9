// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Error type for all mosgrid-related errors.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum MosgridError {
    #[error("{0}")]
    Ft(#[from] crate::ftmachine::FtError),

    #[error("{0}")]
    Image(#[from] crate::image::ImageError),

    #[error("{0}")]
    Mapper(#[from] crate::mapper::MapperError),

    #[error("{0}")]
    MultiTerm(#[from] crate::multiterm::MultiTermError),

    #[error("{0}")]
    SkyEquation(#[from] crate::skyeq::SkyEqError),
}
