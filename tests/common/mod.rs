#![allow(dead_code)]
//! Shared fixture builders: an xtc frame encoder, a structure-listing
//! writer, and temp-file helpers.

use std::path::PathBuf;

use sdfmap::reader::FIRSTIDX;

/// MSB-first bit accumulator matching the decoder's expectations.
#[derive(Default)]
pub struct BitWriter {
    bits: Vec<bool>,
}

impl BitWriter {
    pub fn push(&mut self, value: u64, nbits: u32) {
        for i in (0..nbits).rev() {
            self.bits.push((value >> i) & 1 == 1);
        }
    }

    /// Packs a triplet with the mixed-radix layout: the combined value is
    /// written as whole bytes starting from the least significant, then the
    /// remaining high bits.
    pub fn push_packed(&mut self, nums: [u32; 3], sizes: [u32; 3], nbits: u32) {
        let v: u128 = nums[0] as u128 * (sizes[1] as u128 * sizes[2] as u128)
            + nums[1] as u128 * sizes[2] as u128
            + nums[2] as u128;
        let mut left = nbits;
        let mut shift = 0;
        while left >= 8 {
            self.push(((v >> shift) & 0xff) as u64, 8);
            shift += 8;
            left -= 8;
        }
        if left > 0 {
            self.push(((v >> shift) as u64) & ((1 << left) - 1), left);
        }
    }

    pub fn finish(&self) -> Vec<u8> {
        let mut out = vec![0u8; (self.bits.len() + 7) / 8];
        for (i, &bit) in self.bits.iter().enumerate() {
            if bit {
                out[i / 8] |= 1 << (7 - (i % 8));
            }
        }
        out
    }
}

fn sizeofint(size: u32) -> u32 {
    let mut nbits = 0;
    let mut n = 1u64;
    while size as u64 >= n {
        nbits += 1;
        n <<= 1;
    }
    nbits
}

fn sizeofints(sizes: [u32; 3]) -> u32 {
    let product = sizes[0] as u128 * sizes[1] as u128 * sizes[2] as u128;
    let mut nbits = 0;
    let mut n: u128 = 1;
    while product >= n {
        nbits += 1;
        n <<= 1;
    }
    nbits
}

pub fn push_i32(out: &mut Vec<u8>, value: i32) {
    out.extend_from_slice(&value.to_be_bytes());
}

pub fn push_f32(out: &mut Vec<u8>, value: f32) {
    out.extend_from_slice(&value.to_be_bytes());
}

/// Appends a frame header for an orthorhombic box.
pub fn push_header(out: &mut Vec<u8>, natoms: i32, step: i32, time: f32, dims: [f32; 3]) {
    push_i32(out, 1995);
    push_i32(out, natoms);
    push_i32(out, step);
    push_f32(out, time);
    for row in 0..3 {
        for col in 0..3 {
            push_f32(out, if row == col { dims[row] } else { 0.0 });
        }
    }
}

/// Appends the opaque compressed block: byte count, payload, xdr padding.
pub fn push_opaque(out: &mut Vec<u8>, payload: &[u8]) {
    push_i32(out, payload.len() as i32);
    out.extend_from_slice(payload);
    out.extend(std::iter::repeat(0u8).take((4 - payload.len() % 4) % 4));
}

/// Appends a whole frame holding at most nine atoms, stored as raw floats.
pub fn push_raw_frame(out: &mut Vec<u8>, step: i32, time: f32, dims: [f32; 3], positions: &[[f32; 3]]) {
    assert!(positions.len() <= 9);
    push_header(out, positions.len() as i32, step, time, dims);
    push_i32(out, positions.len() as i32);
    for pos in positions {
        for &c in pos {
            push_f32(out, c);
        }
    }
}

/// Appends a compressed frame with no delta runs: every atom is encoded as
/// a base triplet followed by a cleared run flag.
pub fn push_compressed_frame(
    out: &mut Vec<u8>,
    step: i32,
    time: f32,
    dims: [f32; 3],
    positions: &[[f32; 3]],
    precision: f32,
) {
    assert!(positions.len() > 9, "small frames take the raw path");
    push_header(out, positions.len() as i32, step, time, dims);
    push_i32(out, positions.len() as i32);
    push_f32(out, precision);

    let ints: Vec<[i32; 3]> = positions
        .iter()
        .map(|p| p.map(|c| (c * precision).round() as i32))
        .collect();
    let mut minint = [i32::MAX; 3];
    let mut maxint = [i32::MIN; 3];
    for coord in &ints {
        for d in 0..3 {
            minint[d] = minint[d].min(coord[d]);
            maxint[d] = maxint[d].max(coord[d]);
        }
    }
    for v in minint {
        push_i32(out, v);
    }
    for v in maxint {
        push_i32(out, v);
    }
    push_i32(out, FIRSTIDX as i32);

    let sizes = [
        (maxint[0] - minint[0]) as u32 + 1,
        (maxint[1] - minint[1]) as u32 + 1,
        (maxint[2] - minint[2]) as u32 + 1,
    ];
    assert!(
        sizes.iter().all(|&s| s <= 0xffffff),
        "encoder only covers the joint-width mode"
    );
    let nbits = sizeofints(sizes);

    let mut bits = BitWriter::default();
    for coord in &ints {
        let offset = [
            (coord[0] - minint[0]) as u32,
            (coord[1] - minint[1]) as u32,
            (coord[2] - minint[2]) as u32,
        ];
        bits.push_packed(offset, sizes, nbits);
        bits.push(0, 1); // No run follows.
    }
    push_opaque(out, &bits.finish());
}

/// Appends a compressed frame holding the given integerized coordinates,
/// whose ranges must force the independent per-axis bit widths (at least one
/// axis spanning past 24 bits). No delta runs.
pub fn push_per_axis_frame(
    out: &mut Vec<u8>,
    step: i32,
    time: f32,
    dims: [f32; 3],
    ints: &[[i32; 3]],
    precision: f32,
) {
    assert!(ints.len() > 9, "small frames take the raw path");
    push_header(out, ints.len() as i32, step, time, dims);
    push_i32(out, ints.len() as i32);
    push_f32(out, precision);

    let mut minint = [i32::MAX; 3];
    let mut maxint = [i32::MIN; 3];
    for coord in ints {
        for d in 0..3 {
            minint[d] = minint[d].min(coord[d]);
            maxint[d] = maxint[d].max(coord[d]);
        }
    }
    for v in minint {
        push_i32(out, v);
    }
    for v in maxint {
        push_i32(out, v);
    }
    push_i32(out, FIRSTIDX as i32);

    let sizes = [
        (maxint[0] - minint[0]) as u32 + 1,
        (maxint[1] - minint[1]) as u32 + 1,
        (maxint[2] - minint[2]) as u32 + 1,
    ];
    assert!(
        sizes.iter().any(|&s| s > 0xffffff),
        "ranges too narrow for the per-axis mode"
    );
    let widths = sizes.map(sizeofint);

    let mut bits = BitWriter::default();
    for coord in ints {
        for d in 0..3 {
            bits.push((coord[d] - minint[d]) as u64, widths[d]);
        }
        bits.push(0, 1); // No run follows.
    }
    push_opaque(out, &bits.finish());
}

/// Renders a fixed-column structure listing for the given (residue, name)
/// pairs.
pub fn structure_listing(atoms: &[(i32, &str)], dims: [f32; 3]) -> String {
    let mut out = String::from("generated test system\n");
    out.push_str(&format!("{:5}\n", atoms.len()));
    for (i, (res, name)) in atoms.iter().enumerate() {
        out.push_str(&format!(
            "{:>5}{:<5}{:>5}{:>5}{:8.3}{:8.3}{:8.3}\n",
            res,
            "SOL",
            name,
            i + 1,
            0.0,
            0.0,
            0.0
        ));
    }
    out.push_str(&format!(
        "{:10.5}{:10.5}{:10.5}\n",
        dims[0], dims[1], dims[2]
    ));
    out
}

/// A unique scratch path; the file is removed first if a previous run left
/// one behind.
pub fn temp_path(name: &str) -> PathBuf {
    let path = std::env::temp_dir().join(format!("sdfmap-test-{}-{name}", std::process::id()));
    let _ = std::fs::remove_file(&path);
    path
}
