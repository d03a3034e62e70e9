// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

use approx::assert_abs_diff_eq;

use super::*;
use crate::{
    image::ImageShape,
    testing::{FtEvent, RecordingFt},
    vis::{PolFrame, VisBuffer, UVW},
};

const REFFREQ: f64 = 150e6;

/// Two rows, one channel at 180 MHz: the first-order Taylor factor is exactly
/// 0.2.
fn test_buffer() -> VisBuffer {
    VisBuffer::new(
        vec![0, 0],
        vec![1, 2],
        vec![UVW::default(); 2],
        vec![0, 0],
        vec![180e6],
        1,
        PolFrame::Linear,
    )
}

const SHAPE: ImageShape = ImageShape {
    nx: 4,
    ny: 4,
    num_pols: 1,
    num_chans: 1,
};

#[test]
fn test_term_counts_forward_and_inverse() {
    let (proto, _) = RecordingFt::new();
    let forward = MultiTermFt::new(Box::new(proto), 3, REFFREQ, false).unwrap();
    assert_eq!(forward.num_terms(), 3);
    assert_eq!(forward.psf_num_terms(), 3);

    let (proto, _) = RecordingFt::new();
    let inverse = MultiTermFt::new(Box::new(proto), 3, REFFREQ, true).unwrap();
    assert_eq!(inverse.num_terms(), 3);
    assert_eq!(inverse.psf_num_terms(), 5);
}

#[test]
fn test_construction_failures() {
    let (mut proto, _) = RecordingFt::new();
    proto.cloneable = false;
    assert!(matches!(
        MultiTermFt::new(Box::new(proto), 2, REFFREQ, true),
        Err(MultiTermError::NotCloneable(_))
    ));

    let (proto, _) = RecordingFt::new();
    assert!(matches!(
        MultiTermFt::new(Box::new(proto), 0, REFFREQ, true),
        Err(MultiTermError::ZeroTerms)
    ));
}

#[test]
fn test_put_restores_weights_bit_identically() {
    let (proto, _) = RecordingFt::new();
    let mut mt = MultiTermFt::new(Box::new(proto), 3, REFFREQ, true).unwrap();
    let mut vb = test_buffer();
    vb.imaging_weight[(0, 0)] = 1.25;
    vb.imaging_weight[(0, 1)] = 0.75;
    let before = vb.imaging_weight.clone();

    mt.initialize_to_sky(SHAPE, &vb).unwrap();
    mt.put(&mut vb, None, false, crate::VisGridCol::Observed)
        .unwrap();

    assert_eq!(vb.imaging_weight, before);
}

#[test]
fn test_put_applies_taylor_weights_per_term() {
    let (proto, log) = RecordingFt::new();
    let mut mt = MultiTermFt::new(Box::new(proto), 3, REFFREQ, true).unwrap();
    let mut vb = test_buffer();

    mt.initialize_to_sky(SHAPE, &vb).unwrap();
    mt.put(&mut vb, None, false, crate::VisGridCol::Observed)
        .unwrap();

    let puts: Vec<_> = log
        .borrow()
        .iter()
        .filter_map(|e| match e {
            FtEvent::Put { taylor, wsum, .. } => Some((*taylor, *wsum)),
            _ => None,
        })
        .collect();
    // Forward gridding uses exactly nterms, in order, with the weights the
    // sub-machine saw scaled by 0.2^term (two unit-weight rows).
    assert_eq!(puts.len(), 3);
    assert_eq!(puts[0].0, 0);
    assert_abs_diff_eq!(puts[0].1, 2.0);
    assert_eq!(puts[1].0, 1);
    assert_abs_diff_eq!(puts[1].1, 0.4, epsilon = 1e-6);
    assert_eq!(puts[2].0, 2);
    assert_abs_diff_eq!(puts[2].1, 0.08, epsilon = 1e-6);
}

#[test]
fn test_psf_put_uses_all_psf_terms() {
    let (proto, log) = RecordingFt::new();
    let mut mt = MultiTermFt::new(Box::new(proto), 3, REFFREQ, true).unwrap();
    let mut vb = test_buffer();

    mt.initialize_to_sky(SHAPE, &vb).unwrap();
    mt.put(&mut vb, None, true, crate::VisGridCol::Observed)
        .unwrap();

    let put_terms: Vec<_> = log
        .borrow()
        .iter()
        .filter_map(|e| match e {
            FtEvent::Put { taylor, do_psf: true, .. } => Some(*taylor),
            _ => None,
        })
        .collect();
    assert_eq!(put_terms, [0, 1, 2, 3, 4]);
}

#[test]
fn test_psf_put_on_forward_machine_fails() {
    let (proto, _) = RecordingFt::new();
    let mut mt = MultiTermFt::new(Box::new(proto), 2, REFFREQ, false).unwrap();
    let mut vb = test_buffer();
    mt.initialize_to_sky(SHAPE, &vb).unwrap();
    assert!(matches!(
        mt.put(&mut vb, None, true, crate::VisGridCol::Observed),
        Err(FtError::ProtocolViolation(_))
    ));
}

#[test]
fn test_get_overwrites_with_taylor_sum() {
    let (proto, log) = RecordingFt::new();
    // An inverse machine with 5 sub-machines: prediction must still only use
    // the forward 3.
    let mut mt = MultiTermFt::new(Box::new(proto), 3, REFFREQ, true).unwrap();
    let mut vb = test_buffer();
    vb.set_model_vis(crate::c32::new(999.0, -999.0));

    mt.get(&mut vb, None).unwrap();

    // The recording double predicts `taylor + 1` per term, so the summed
    // prediction is 1*1 + 2*0.2 + 3*0.04 = 1.52, replacing the entry values.
    for v in vb.model_vis_cube.iter() {
        assert_abs_diff_eq!(v.re, 1.52, epsilon = 1e-6);
        assert_abs_diff_eq!(v.im, 0.0, epsilon = 1e-6);
    }

    let get_terms: Vec<_> = log
        .borrow()
        .iter()
        .filter_map(|e| match e {
            FtEvent::Get { taylor, .. } => Some(*taylor),
            _ => None,
        })
        .collect();
    assert_eq!(get_terms, [0, 1, 2]);
}

#[test]
fn test_get_single_row_leaves_other_rows_untouched() {
    let (proto, _) = RecordingFt::new();
    let mut mt = MultiTermFt::new(Box::new(proto), 3, REFFREQ, true).unwrap();
    let mut vb = test_buffer();
    vb.set_model_vis(crate::c32::new(10.0, 0.0));

    mt.get(&mut vb, Some(0)).unwrap();

    // Row 0 carries the Taylor sum; row 1 keeps its prior model values bit for
    // bit, with no Taylor scaling leaking across rows.
    for p in 0..vb.num_pols() {
        for ch in 0..vb.num_chans() {
            assert_abs_diff_eq!(vb.model_vis_cube[(p, ch, 0)].re, 1.52, epsilon = 1e-6);
            assert_eq!(vb.model_vis_cube[(p, ch, 1)], crate::c32::new(10.0, 0.0));
        }
    }
}

#[test]
fn test_store_bridging_counts_and_sumwt() {
    let (proto, log) = RecordingFt::new();
    let mut mt = MultiTermFt::new(Box::new(proto), 2, REFFREQ, true).unwrap();
    let mut store = MultiTermStore::new(3, SHAPE, REFFREQ);
    let vb = test_buffer();

    mt.initialize_to_sky_mt(&mut store, &vb, true).unwrap();
    mt.finalize_to_sky_mt(&mut store, PolFrame::Linear, true)
        .unwrap();

    let events = log.borrow();
    let inits = events
        .iter()
        .filter(|e| matches!(e, FtEvent::InitToSky { .. }))
        .count();
    let finals = events
        .iter()
        .filter(|e| matches!(e, FtEvent::FinalizeToSky { .. }))
        .count();
    assert_eq!(inits, 3);
    assert_eq!(finals, 3);
    // The double reports unit sum-of-weights per plane.
    for term in 0..3 {
        assert_abs_diff_eq!(store.sumwt(term)[(0, 0)], 1.0);
    }
}

#[test]
fn test_store_too_small_is_rejected() {
    let (proto, _) = RecordingFt::new();
    let mut mt = MultiTermFt::new(Box::new(proto), 3, REFFREQ, true).unwrap();
    // 5 planes needed for a PSF pass, only 3 allocated.
    let mut store = MultiTermStore::new(3, SHAPE, REFFREQ);
    let vb = test_buffer();
    assert!(matches!(
        mt.initialize_to_sky_mt(&mut store, &vb, true),
        Err(FtError::ProtocolViolation(_))
    ));
}

#[test]
fn test_compute_residuals_requires_capable_term0() {
    let (proto, _) = RecordingFt::new();
    let mut mt = MultiTermFt::new(Box::new(proto), 2, REFFREQ, true).unwrap();
    let mut vb = test_buffer();
    assert!(matches!(
        mt.compute_residuals(&mut vb),
        Err(FtError::Unsupported(..))
    ));
}
