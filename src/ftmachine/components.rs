// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Direct-Fourier prediction of point-source components.
//!
//! Component lists bypass the gridded degrid path entirely: each component is
//! evaluated analytically per visibility. The mosaic degrid path hands a
//! beam-corrupted deep copy of the list to this machine whenever the
//! correction changes.

use crate::{
    c32,
    image::ImageShape,
    skyjones::SkyJones,
    vis::VisBuffer,
    VEL_C,
};

/// A point source at pixel coordinates `(x, y)` with one flux per
/// polarisation.
#[derive(Debug, Clone)]
pub struct PointComponent {
    pub x: f64,
    pub y: f64,
    pub flux: Vec<f32>,
}

/// An ordered list of point-source components.
#[derive(Debug, Clone, Default)]
pub struct ComponentList {
    pub components: Vec<PointComponent>,
}

impl ComponentList {
    pub fn new(components: Vec<PointComponent>) -> ComponentList {
        ComponentList { components }
    }

    pub fn is_empty(&self) -> bool {
        self.components.is_empty()
    }

    /// A deep copy with every component's flux attenuated by the
    /// direction-dependent correction at the component's position, for the
    /// given row's pointing.
    pub fn corrupted(&self, jones: &dyn SkyJones, vb: &VisBuffer, row: usize) -> ComponentList {
        let components = self
            .components
            .iter()
            .map(|comp| {
                let a = jones.attenuation(comp.x, comp.y, vb, row);
                PointComponent {
                    x: comp.x,
                    y: comp.y,
                    flux: comp.flux.iter().map(|&f| f * a).collect(),
                }
            })
            .collect();
        ComponentList { components }
    }
}

/// The component FT machine: analytic visibility prediction for a
/// [`ComponentList`], sharing the image geometry of the gridded machines.
pub struct ComponentFt {
    shape: ImageShape,
    /// uv cell size in wavelengths, fixing the image pixel scale.
    uv_cell: f64,
}

impl ComponentFt {
    pub fn new(shape: ImageShape, uv_cell: f64) -> ComponentFt {
        ComponentFt { shape, uv_cell }
    }

    /// Predict the list's visibilities and add them into the buffer's
    /// model-visibility cube. Addition (not overwrite) lets gridded and
    /// component predictions share the cube.
    pub fn get(&self, vb: &mut VisBuffer, row: Option<usize>, list: &ComponentList) {
        if list.is_empty() {
            return;
        }
        // Image pixel scale in direction cosines.
        let cell_l = 1.0 / (self.shape.nx as f64 * self.uv_cell);
        let cell_m = 1.0 / (self.shape.ny as f64 * self.uv_cell);
        let (cx, cy) = (self.shape.nx as f64 / 2.0, self.shape.ny as f64 / 2.0);

        let rows = match row {
            Some(r) => r..r + 1,
            None => 0..vb.num_rows(),
        };
        for r in rows {
            for ch in 0..vb.num_chans() {
                let lambda_inv = vb.freqs[ch] / VEL_C;
                let u = vb.uvw[r].u * lambda_inv;
                let v = vb.uvw[r].v * lambda_inv;
                for comp in &list.components {
                    let l = (comp.x - cx) * cell_l;
                    let m = (comp.y - cy) * cell_m;
                    let phase = 2.0 * std::f64::consts::PI * (u * l + v * m);
                    let phasor = c32::new(phase.cos() as f32, phase.sin() as f32);
                    for (p, &flux) in comp.flux.iter().enumerate().take(vb.num_pols()) {
                        vb.model_vis_cube[(p, ch, r)] += phasor * flux;
                    }
                }
            }
        }
    }
}
