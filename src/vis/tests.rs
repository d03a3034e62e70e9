// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

use super::*;

fn simple_buffer(num_rows: usize, tag: usize) -> VisBuffer {
    VisBuffer::new(
        vec![0; num_rows],
        vec![1; num_rows],
        vec![UVW::default(); num_rows],
        vec![tag; num_rows],
        vec![150e6, 160e6],
        1,
        PolFrame::Linear,
    )
}

#[test]
fn test_buffer_shapes() {
    let vb = simple_buffer(3, 0);
    assert_eq!(vb.num_rows(), 3);
    assert_eq!(vb.num_chans(), 2);
    assert_eq!(vb.num_pols(), 1);
    assert_eq!(vb.vis_cube.dim(), (1, 2, 3));
    assert_eq!(vb.imaging_weight.dim(), (2, 3));
    // Weights start at unity.
    assert!(vb.imaging_weight.iter().all(|&w| w == 1.0));
}

#[test]
fn test_memory_source_cursor() {
    let mut vs = MemoryVisSource::new(vec![
        vec![simple_buffer(2, 0), simple_buffer(2, 1)],
        vec![simple_buffer(3, 2)],
    ]);

    let mut seen = vec![];
    vs.origin_chunks();
    while vs.more_chunks() {
        vs.origin();
        while vs.more() {
            seen.push(vs.buffer().pointing[0]);
            vs.next();
        }
        vs.next_chunk();
    }
    assert_eq!(seen, [0, 1, 2]);

    // The cursor rewinds cleanly.
    vs.origin_chunks();
    assert!(vs.more_chunks());
    assert!(vs.more());
    assert_eq!(vs.buffer().pointing[0], 0);
}

#[test]
fn test_memory_source_empty_chunk() {
    let mut vs = MemoryVisSource::new(vec![vec![], vec![simple_buffer(1, 7)]]);
    vs.origin_chunks();
    assert!(vs.more_chunks());
    assert!(!vs.more());
    vs.next_chunk();
    assert!(vs.more());
    assert_eq!(vs.buffer().pointing[0], 7);
}

#[test]
fn test_set_model_vis() {
    let mut vb = simple_buffer(2, 0);
    vb.set_model_vis(crate::c32::new(1.0, -2.0));
    assert!(vb
        .model_vis_cube
        .iter()
        .all(|&v| v == crate::c32::new(1.0, -2.0)));
}
