//! File-level decoder tests against hand-encoded frames.

mod common;

use std::io::Cursor;

use sdfmap::reader::{XtcReader, FIRSTIDX, MAGICINTS};
use sdfmap::Error;

use common::{
    push_compressed_frame, push_f32, push_header, push_i32, push_opaque, push_per_axis_frame,
    push_raw_frame, BitWriter,
};

const DIMS: [f32; 3] = [4.0, 4.0, 4.0];

fn ten_positions() -> Vec<[f32; 3]> {
    vec![
        [0.5, 0.5, 0.5],
        [0.6, 0.5, 0.55],
        [0.5, 0.6, 0.5],
        [0.55, 0.55, 0.5],
        [0.55, 0.45, 0.5],
        [0.6, 0.4, 0.45],
        [0.5, 0.4, 0.55],
        [2.5, 2.5, 2.5],
        [3.0, 0.1, 1.0],
        [1.5, 3.9, 0.2],
    ]
}

#[test]
fn compressed_frame_roundtrips() {
    let precision = 1000.0;
    let mut bytes = Vec::new();
    push_compressed_frame(&mut bytes, 7, 0.2, DIMS, &ten_positions(), precision);

    let mut reader = XtcReader::new(Cursor::new(bytes));
    let meta = reader.read_meta().unwrap().expect("one frame present");
    assert_eq!(meta.natoms, 10);
    assert_eq!(meta.step, 7);
    assert_eq!(meta.boxvec.x_axis.x, 4.0);

    let mut positions = Vec::new();
    let mut scratch = Vec::new();
    let decoded_precision = reader
        .read_positions(meta.natoms, &mut positions, &mut scratch)
        .unwrap();
    assert_eq!(decoded_precision, precision);
    assert_eq!(positions.len(), 30);

    // Values come back quantized to the precision grid.
    for (i, expected) in ten_positions().iter().enumerate() {
        for d in 0..3 {
            let quantized = (expected[d] * precision).round() * precision.recip();
            assert_eq!(positions[i * 3 + d], quantized, "atom {i} axis {d}");
        }
    }

    // First-frame regression anchor: atom 0 decodes to its literal position.
    for d in 0..3 {
        assert!((positions[d] - 0.5).abs() < 1e-6);
    }

    // Nothing else in the stream.
    assert!(reader.read_meta().unwrap().is_none());
}

#[test]
fn raw_frame_roundtrips() {
    let positions = vec![[0.1, 0.2, 0.3], [1.0, 2.0, 3.0], [3.9, 0.0, 1.5]];
    let mut bytes = Vec::new();
    push_raw_frame(&mut bytes, 0, 0.0, DIMS, &positions);

    let mut reader = XtcReader::new(Cursor::new(bytes));
    let meta = reader.read_meta().unwrap().unwrap();
    assert_eq!(meta.natoms, 3);

    let mut decoded = Vec::new();
    let mut scratch = Vec::new();
    let precision = reader
        .read_positions(meta.natoms, &mut decoded, &mut scratch)
        .unwrap();
    // The raw path carries no precision field.
    assert_eq!(precision, 0.0);
    assert_eq!(decoded, vec![0.1, 0.2, 0.3, 1.0, 2.0, 3.0, 3.9, 0.0, 1.5]);
}

#[test]
fn peek_does_not_consume_and_rewind_restarts() {
    let positions = vec![[0.1, 0.2, 0.3]];
    let mut bytes = Vec::new();
    push_raw_frame(&mut bytes, 3, 0.1, DIMS, &positions);

    let mut reader = XtcReader::new(Cursor::new(bytes));
    let peeked = reader.peek_meta().unwrap().unwrap();
    let read = reader.read_meta().unwrap().unwrap();
    assert_eq!(peeked.step, read.step);
    assert_eq!(peeked.natoms, read.natoms);

    let mut decoded = Vec::new();
    let mut scratch = Vec::new();
    reader
        .read_positions(read.natoms, &mut decoded, &mut scratch)
        .unwrap();
    assert!(reader.read_meta().unwrap().is_none());

    reader.rewind().unwrap();
    let again = reader.read_meta().unwrap().unwrap();
    assert_eq!(again.step, 3);
}

#[test]
fn bad_magic_is_rejected() {
    let mut bytes = Vec::new();
    push_i32(&mut bytes, 1994);
    push_i32(&mut bytes, 10);

    let mut reader = XtcReader::new(Cursor::new(bytes));
    assert!(matches!(
        reader.read_meta(),
        Err(Error::BadMagic { found: 1994 })
    ));
}

#[test]
fn eof_inside_header_is_truncation() {
    let mut bytes = Vec::new();
    push_header(&mut bytes, 10, 0, 0.0, DIMS);
    bytes.truncate(10);

    let mut reader = XtcReader::new(Cursor::new(bytes));
    assert!(matches!(reader.read_meta(), Err(Error::Truncated)));
}

#[test]
fn truncated_coordinate_block_fails() {
    let mut bytes = Vec::new();
    push_compressed_frame(&mut bytes, 0, 0.0, DIMS, &ten_positions(), 1000.0);
    bytes.truncate(bytes.len() - 8);

    let mut reader = XtcReader::new(Cursor::new(bytes));
    let meta = reader.read_meta().unwrap().unwrap();
    let mut positions = Vec::new();
    let mut scratch = Vec::new();
    assert!(matches!(
        reader.read_positions(meta.natoms, &mut positions, &mut scratch),
        Err(Error::Truncated)
    ));
}

#[test]
fn declared_count_beyond_capacity_fails() {
    let mut bytes = Vec::new();
    push_header(&mut bytes, 10, 0, 0.0, DIMS);
    push_i32(&mut bytes, 11); // Coordinate block claims an extra atom.

    let mut reader = XtcReader::new(Cursor::new(bytes));
    let meta = reader.read_meta().unwrap().unwrap();
    let mut positions = Vec::new();
    let mut scratch = Vec::new();
    assert!(matches!(
        reader.read_positions(meta.natoms, &mut positions, &mut scratch),
        Err(Error::AtomCountExceedsCapacity {
            declared: 11,
            capacity: 10
        })
    ));
}

#[test]
fn inverted_coordinate_bounds_fail() {
    let mut bytes = Vec::new();
    push_header(&mut bytes, 10, 0, 0.0, DIMS);
    push_i32(&mut bytes, 10);
    push_f32(&mut bytes, 1000.0);
    for v in [100, 0, 0] {
        push_i32(&mut bytes, v); // minint, with x above maxint.
    }
    for _ in 0..3 {
        push_i32(&mut bytes, 0);
    }
    push_i32(&mut bytes, FIRSTIDX as i32);
    push_opaque(&mut bytes, &[0u8; 16]);

    let mut reader = XtcReader::new(Cursor::new(bytes));
    let meta = reader.read_meta().unwrap().unwrap();
    let mut positions = Vec::new();
    let mut scratch = Vec::new();
    assert!(matches!(
        reader.read_positions(meta.natoms, &mut positions, &mut scratch),
        Err(Error::BadCoordinateBounds { min: 100, max: 0 })
    ));
}

#[test]
fn invalid_small_index_fails() {
    let mut bytes = Vec::new();
    push_header(&mut bytes, 10, 0, 0.0, DIMS);
    push_i32(&mut bytes, 10);
    push_f32(&mut bytes, 1000.0);
    for _ in 0..3 {
        push_i32(&mut bytes, 0);
    }
    for _ in 0..3 {
        push_i32(&mut bytes, 100);
    }
    push_i32(&mut bytes, 3); // Below the first valid magnitude index.
    push_opaque(&mut bytes, &[0u8; 16]);

    let mut reader = XtcReader::new(Cursor::new(bytes));
    let meta = reader.read_meta().unwrap().unwrap();
    let mut positions = Vec::new();
    let mut scratch = Vec::new();
    assert!(matches!(
        reader.read_positions(meta.natoms, &mut positions, &mut scratch),
        Err(Error::BadSmallIndex(3))
    ));
}

// A delta run hand-encoded at the bit level. The base triplet carries the
// *second* atom; the first run triplet is emitted before it (the stored
// order of a water is swapped back on decode), and later run triplets chain
// off the first one.
#[test]
fn delta_run_swaps_first_pair() {
    let precision = 10.0;
    let smallidx = FIRSTIDX; // Magnitude 8, so deltas live in [0, 8).
    let small = MAGICINTS[smallidx] as u32;
    let smallnum = (small / 2) as i32;

    // Integerized target positions for the first three atoms; the rest pad
    // the frame over the raw-path threshold.
    let p0 = [50i32, 50, 50];
    let p1 = [52i32, 50, 49];
    let p2 = [49i32, 51, 50];
    let filler = [40i32, 40, 40];
    let mut ints = vec![p0, p1, p2];
    ints.extend(std::iter::repeat(filler).take(7));

    let mut minint = [i32::MAX; 3];
    let mut maxint = [i32::MIN; 3];
    for coord in &ints {
        for d in 0..3 {
            minint[d] = minint[d].min(coord[d]);
            maxint[d] = maxint[d].max(coord[d]);
        }
    }
    let sizes = [
        (maxint[0] - minint[0]) as u32 + 1,
        (maxint[1] - minint[1]) as u32 + 1,
        (maxint[2] - minint[2]) as u32 + 1,
    ];
    let product = sizes[0] as u64 * sizes[1] as u64 * sizes[2] as u64;
    let mut nbits = 0u32;
    while product >= 1u64 << nbits {
        nbits += 1;
    }

    let offset = |p: [i32; 3]| {
        [
            (p[0] - minint[0]) as u32,
            (p[1] - minint[1]) as u32,
            (p[2] - minint[2]) as u32,
        ]
    };

    let mut bits = BitWriter::default();
    // Base triplet is p1; its run holds p0 then p2.
    bits.push_packed(offset(p1), sizes, nbits);
    bits.push(1, 1); // A run follows.

    // Run field: two triplets (6) with no magnitude adjustment (+1).
    bits.push(7, 5);
    let delta = |to: [i32; 3], from: [i32; 3]| {
        [
            (to[0] - from[0] + smallnum) as u32,
            (to[1] - from[1] + smallnum) as u32,
            (to[2] - from[2] + smallnum) as u32,
        ]
    };
    // First run triplet is relative to the base (p1), the second to the
    // previously decoded run triplet (p0).
    bits.push_packed(delta(p0, p1), [small; 3], smallidx as u32);
    bits.push_packed(delta(p2, p0), [small; 3], smallidx as u32);

    for coord in ints.iter().skip(3) {
        bits.push_packed(offset(*coord), sizes, nbits);
        bits.push(0, 1);
    }

    let mut bytes = Vec::new();
    push_header(&mut bytes, ints.len() as i32, 0, 0.0, DIMS);
    push_i32(&mut bytes, ints.len() as i32);
    push_f32(&mut bytes, precision);
    for v in minint {
        push_i32(&mut bytes, v);
    }
    for v in maxint {
        push_i32(&mut bytes, v);
    }
    push_i32(&mut bytes, smallidx as i32);
    push_opaque(&mut bytes, &bits.finish());

    let mut reader = XtcReader::new(Cursor::new(bytes));
    let meta = reader.read_meta().unwrap().unwrap();
    let mut positions = Vec::new();
    let mut scratch = Vec::new();
    reader
        .read_positions(meta.natoms, &mut positions, &mut scratch)
        .unwrap();

    let expect = |p: [i32; 3]| p.map(|v| v as f32 * precision.recip());
    assert_eq!(&positions[0..3], &expect(p0));
    assert_eq!(&positions[3..6], &expect(p1));
    assert_eq!(&positions[6..9], &expect(p2));
    assert_eq!(&positions[9..12], &expect(filler));
}

// Coordinate ranges past 24 bits cannot be packed into one mixed-radix
// value; each axis then carries its own independent bit width.
#[test]
fn wide_ranges_use_per_axis_bit_widths() {
    let precision = 10.0;
    let ints: Vec<[i32; 3]> = vec![
        [0, 0, 0],
        [0x100_0000, 5, 9],
        [123_456, 3, 7],
        [9_999_999, 2, 4],
        [42, 1, 0],
        [16_000_000, 0, 3],
        [1, 4, 8],
        [7_777_777, 5, 2],
        [31_337, 2, 6],
        [2_000_000, 3, 1],
    ];
    let mut bytes = Vec::new();
    push_per_axis_frame(&mut bytes, 1, 0.0, DIMS, &ints, precision);

    let mut reader = XtcReader::new(Cursor::new(bytes));
    let meta = reader.read_meta().unwrap().unwrap();
    let mut positions = Vec::new();
    let mut scratch = Vec::new();
    let decoded_precision = reader
        .read_positions(meta.natoms, &mut positions, &mut scratch)
        .unwrap();
    assert_eq!(decoded_precision, precision);

    for (i, coord) in ints.iter().enumerate() {
        for d in 0..3 {
            assert_eq!(
                positions[i * 3 + d],
                coord[d] as f32 * precision.recip(),
                "atom {i} axis {d}"
            );
        }
    }
}

// Three delta runs stepping the adaptive magnitude index up, back down, and
// holding it; each run after an adjustment must be decoded with the new
// triplet width and offset.
#[test]
fn delta_runs_adjust_the_magnitude_index() {
    let precision = 10.0;
    let small = MAGICINTS[FIRSTIDX] as u32; // 8, deltas offset by 4.
    let small_up = MAGICINTS[FIRSTIDX + 1] as u32; // 10, deltas offset by 5.

    let a0 = [50i32, 50, 50];
    let a1 = [52i32, 49, 51];
    let b0 = [60i32, 60, 60];
    let b1 = [64i32, 56, 61];
    let c0 = [40i32, 45, 42];
    let c1 = [43i32, 42, 44];
    let filler = [30i32, 30, 30];
    let expected = [a0, a1, b0, b1, c0, c1, filler, filler, filler, filler];

    let mut minint = [i32::MAX; 3];
    let mut maxint = [i32::MIN; 3];
    for coord in &expected {
        for d in 0..3 {
            minint[d] = minint[d].min(coord[d]);
            maxint[d] = maxint[d].max(coord[d]);
        }
    }
    let sizes = [
        (maxint[0] - minint[0]) as u32 + 1,
        (maxint[1] - minint[1]) as u32 + 1,
        (maxint[2] - minint[2]) as u32 + 1,
    ];
    let product = sizes[0] as u64 * sizes[1] as u64 * sizes[2] as u64;
    let mut nbits = 0u32;
    while product >= 1u64 << nbits {
        nbits += 1;
    }

    let offset = |p: [i32; 3]| {
        [
            (p[0] - minint[0]) as u32,
            (p[1] - minint[1]) as u32,
            (p[2] - minint[2]) as u32,
        ]
    };
    let delta = |to: [i32; 3], from: [i32; 3], smallnum: i32| {
        [
            (to[0] - from[0] + smallnum) as u32,
            (to[1] - from[1] + smallnum) as u32,
            (to[2] - from[2] + smallnum) as u32,
        ]
    };

    let mut bits = BitWriter::default();
    // Run 1 at the starting index; field 5 is one triplet plus a step up.
    bits.push_packed(offset(a1), sizes, nbits);
    bits.push(1, 1);
    bits.push(5, 5);
    bits.push_packed(delta(a0, a1, 4), [small; 3], FIRSTIDX as u32);
    // Run 2 decodes at the raised index; field 3 is one triplet plus a step
    // back down.
    bits.push_packed(offset(b1), sizes, nbits);
    bits.push(1, 1);
    bits.push(3, 5);
    bits.push_packed(delta(b0, b1, 5), [small_up; 3], FIRSTIDX as u32 + 1);
    // Run 3 is back at the starting width; field 4 leaves the index alone.
    bits.push_packed(offset(c1), sizes, nbits);
    bits.push(1, 1);
    bits.push(4, 5);
    bits.push_packed(delta(c0, c1, 4), [small; 3], FIRSTIDX as u32);
    for coord in &expected[6..] {
        bits.push_packed(offset(*coord), sizes, nbits);
        bits.push(0, 1);
    }

    let mut bytes = Vec::new();
    push_header(&mut bytes, expected.len() as i32, 0, 0.0, DIMS);
    push_i32(&mut bytes, expected.len() as i32);
    push_f32(&mut bytes, precision);
    for v in minint {
        push_i32(&mut bytes, v);
    }
    for v in maxint {
        push_i32(&mut bytes, v);
    }
    push_i32(&mut bytes, FIRSTIDX as i32);
    push_opaque(&mut bytes, &bits.finish());

    let mut reader = XtcReader::new(Cursor::new(bytes));
    let meta = reader.read_meta().unwrap().unwrap();
    let mut positions = Vec::new();
    let mut scratch = Vec::new();
    reader
        .read_positions(meta.natoms, &mut positions, &mut scratch)
        .unwrap();

    for (i, coord) in expected.iter().enumerate() {
        for d in 0..3 {
            assert_eq!(
                positions[i * 3 + d],
                coord[d] as f32 * precision.recip(),
                "atom {i} axis {d}"
            );
        }
    }
}
