// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! End-to-end checks of the public imaging API: mosaic gridding over multiple
//! pointings, PSF generation and multi-term prediction.

use approx::assert_abs_diff_eq;

use mosgrid::{
    c32,
    image::{MultiTermStore, SingleTermStore, SkyModelStore},
    vis::UVW,
    FtMachine, GaussianPrimaryBeam, GridFt, ImageShape, MemoryVisSource, MosaicSkyEquation,
    MultiTermFt, PolFrame, SiMapper, VisBuffer, VisGridCol,
};

const SHAPE: ImageShape = ImageShape {
    nx: 16,
    ny: 16,
    num_pols: 1,
    num_chans: 1,
};

fn init_logger() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// One single-pol, single-channel buffer at 150 MHz whose uv coordinates land
/// on integer grid cells.
fn buffer(pointing: usize, uvws: &[(f64, f64)]) -> VisBuffer {
    let num_rows = uvws.len();
    let uvw = uvws.iter().map(|&(u, v)| UVW { u, v, w: 0.0 }).collect();
    let mut vb = VisBuffer::new(
        vec![0; num_rows],
        vec![1; num_rows],
        uvw,
        vec![pointing; num_rows],
        vec![150e6],
        1,
        PolFrame::Linear,
    );
    // A unit point source at the phase centre.
    vb.vis_cube.fill(c32::new(1.0, 0.0));
    vb
}

#[test]
fn mosaic_gridding_accumulates_both_pointings() {
    init_logger();
    let beam = GaussianPrimaryBeam::new(vec![(5.0, 5.0), (10.0, 10.0)], 4.0);
    let mut mapper = SiMapper::new(Box::new(GridFt::new(1.0))).with_grid_jones(Box::new(beam));

    let mut b0 = buffer(0, &[(2.0, 2.0), (4.0, 4.0)]);
    let mut b1 = buffer(1, &[(2.0, 4.0), (6.0, 2.0)]);

    mapper.initialize_grid_core_mos(SHAPE, &b0).unwrap();
    mapper.grid_core_mos(&mut b0, false, VisGridCol::Observed).unwrap();
    mapper.grid_core_mos(&mut b1, false, VisGridCol::Observed).unwrap();
    let (target, weight) = mapper.finalize_grid_core_mos().unwrap();

    // Both episodes contributed their two rows of unit weight.
    let sumwt = target.misc.sum_weight.as_ref().unwrap();
    assert_abs_diff_eq!(sumwt[(0, 0)], 4.0);
    assert!(target.misc.use_weight_image);

    // The source response survives the beam correction at the image centre,
    // and the weight image covers both pointing footprints but not the far
    // corners outside them.
    assert!(target.data[(8, 8, 0, 0)] > 0.0);
    assert!(weight.data[(5, 5, 0, 0)] > 0.0);
    assert!(weight.data[(10, 10, 0, 0)] > 0.0);
    assert_abs_diff_eq!(weight.data[(0, 15, 0, 0)], 0.0);
    assert_abs_diff_eq!(weight.data[(15, 0, 0, 0)], 0.0);
}

#[test]
fn approx_psf_peaks_at_unity() {
    init_logger();
    let mut eq = MosaicSkyEquation::new(Box::new(GridFt::new(1.0)), None);
    let mut store = SingleTermStore::new(1, SHAPE, 150e6);
    let mut vis = MemoryVisSource::from_buffers(vec![
        buffer(0, &[(2.0, 2.0), (4.0, 4.0)]),
        buffer(0, &[(2.0, 4.0), (6.0, 2.0)]),
    ]);

    let psf = eq.make_approx_psf(&mut store, &mut vis, 0).unwrap();

    assert_abs_diff_eq!(psf.data[(8, 8, 0, 0)], 1.0, epsilon = 1e-5);
    assert!(psf.data.iter().all(|&v| v <= 1.0 + 1e-5));
    assert_abs_diff_eq!(store.statistics().sumwt, 4.0);
}

#[test]
fn multi_term_prediction_sums_taylor_terms() {
    init_logger();
    // Two Taylor terms; at 180 MHz against a 150 MHz reference the first-order
    // factor is exactly 0.2.
    let mut mt = MultiTermFt::new(Box::new(GridFt::new(1.0)), 2, 150e6, false).unwrap();
    let mut store = MultiTermStore::new(2, SHAPE, 150e6);
    for term in 0..2 {
        store.term_mut(term).c_image.data[(8, 8, 0, 0)] = c32::new(1.0, 0.0);
    }

    let mut vb = buffer(0, &[(2.0, 2.0), (4.0, 4.0)]);
    vb.freqs = vec![180e6];
    vb.set_model_vis(c32::new(42.0, 0.0));

    mt.initialize_to_vis_mt(&store, &vb).unwrap();
    mt.get(&mut vb, None).unwrap();

    // A centred unit point source predicts unit visibilities per term, and
    // the summed prediction overwrites whatever the cube held.
    for v in vb.model_vis_cube.iter() {
        assert_abs_diff_eq!(v.re, 1.2, epsilon = 1e-4);
        assert_abs_diff_eq!(v.im, 0.0, epsilon = 1e-4);
    }
}

#[test]
fn multi_term_gridding_leaves_weights_untouched() {
    init_logger();
    let mut mt = MultiTermFt::new(Box::new(GridFt::new(1.0)), 2, 150e6, true).unwrap();
    let mut vb = buffer(0, &[(2.0, 2.0), (4.0, 4.0)]);
    vb.imaging_weight[(0, 0)] = 1.25;
    vb.imaging_weight[(0, 1)] = 0.75;
    let before = vb.imaging_weight.clone();

    mt.initialize_to_sky(SHAPE, &vb).unwrap();
    mt.put(&mut vb, None, true, VisGridCol::Observed).unwrap();

    assert_eq!(vb.imaging_weight, before);
}
