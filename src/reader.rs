//! Low-level xtc input: big-endian primitive reads, the frame header, and the
//! compressed coordinate codec.
//!
//! The coordinate block stores integerized positions with a mixed-radix
//! packing for the base triplets and an adaptive small-magnitude delta code
//! for runs of closely clustered atoms. The decoder here is byte-exact with
//! the xdrfile scheme.

use std::io::{Read, Seek, SeekFrom};

use glam::Mat3;

use crate::error::{Error, Result};
use crate::BoxVec;

pub const MAGIC: i32 = 1995;

/// Table of magnitudes used by the adaptive run-length code. Entries grow
/// roughly geometrically; everything below [`FIRSTIDX`] is zero.
#[rustfmt::skip]
pub const MAGICINTS: [i32; 73] = [
    0,        0,        0,       0,       0,       0,       0,       0,       0,       8,
    10,       12,       16,      20,      25,      32,      40,      50,      64,      80,
    101,      128,      161,     203,     256,     322,     406,     512,     645,     812,
    1024,     1290,     1625,    2048,    2580,    3250,    4096,    5060,    6501,    8192,
    10321,    13003,    16384,   20642,   26007,   32768,   41285,   52015,   65536,   82570,
    104031,   131072,   165140,  208063,  262144,  330280,  416127,  524287,  660561,  832255,
    1048576,  1321122,  1664510, 2097152, 2642245, 3329021, 4194304, 5284491, 6658042, 8388607,
    10568983, 13316085, 16777216
];
pub const FIRSTIDX: usize = 9; // Note that MAGICINTS[FIRSTIDX - 1] == 0.

/// Per-frame header, re-read for every frame.
#[derive(Debug, Default, Clone, Copy)]
pub struct FrameMeta {
    pub natoms: usize,
    pub step: i32,
    /// Time in picoseconds.
    pub time: f32,
    pub boxvec: BoxVec,
}

/// Reads xtc frames from any byte stream.
#[derive(Debug)]
pub struct XtcReader<R> {
    pub file: R,
}

impl<R: Read> XtcReader<R> {
    pub fn new(file: R) -> Self {
        Self { file }
    }

    /// Reads the frame header, consuming it. Returns `None` on a clean end of
    /// stream (EOF exactly at the magic number); EOF anywhere later in the
    /// header is a truncation error.
    pub fn read_meta(&mut self) -> Result<Option<FrameMeta>> {
        let magic = match read_i32_or_eof(&mut self.file)? {
            Some(magic) => magic,
            None => return Ok(None),
        };
        if magic != MAGIC {
            return Err(Error::BadMagic { found: magic });
        }
        let natoms = to_count(read_i32(&mut self.file)?)?;
        let step = read_i32(&mut self.file)?;
        let time = read_f32(&mut self.file)?;
        let boxvec = read_boxvec(&mut self.file)?;
        Ok(Some(FrameMeta {
            natoms,
            step,
            time,
            boxvec,
        }))
    }

    /// Decompresses one frame's coordinate block into `positions` (3N floats),
    /// reading the compressed bytes into `scratch`. `capacity` is the atom
    /// count from the frame header; a block declaring more atoms than that is
    /// a format error. Returns the precision scale read from the stream.
    pub fn read_positions(
        &mut self,
        capacity: usize,
        positions: &mut Vec<f32>,
        scratch: &mut Vec<u8>,
    ) -> Result<f32> {
        let file = &mut self.file;

        let declared = to_count(read_i32(file)?)?;
        if declared > capacity {
            return Err(Error::AtomCountExceedsCapacity { declared, capacity });
        }
        positions.resize(declared * 3, 0.0);

        // Tiny systems skip compression entirely: just 3N raw floats.
        if declared <= 9 {
            read_f32s(file, positions)?;
            return Ok(0.0);
        }

        let precision = read_f32(file)?;
        let invprecision = precision.recip();

        let mut minint = [0i32; 3];
        let mut maxint = [0i32; 3];
        for v in &mut minint {
            *v = read_i32(file)?;
        }
        for v in &mut maxint {
            *v = read_i32(file)?;
        }

        let mut sizeint = [0u32; 3];
        let mut bitsizeint = [0u32; 3];
        let bitsize = calc_sizeint(minint, maxint, &mut sizeint, &mut bitsizeint)?;

        let mut smallidx = read_u32(file)? as usize;
        if smallidx < FIRSTIDX || smallidx >= MAGICINTS.len() {
            return Err(Error::BadSmallIndex(smallidx));
        }

        let tmpidx = usize::max(FIRSTIDX, smallidx - 1);
        let mut smaller = MAGICINTS[tmpidx] / 2;
        let mut smallnum = MAGICINTS[smallidx] / 2;
        let mut sizesmall = [MAGICINTS[smallidx] as u32; 3];

        read_opaque(file, scratch)?;
        let data: &[u8] = scratch;

        let mut state = DecodeState::default();
        let mut emitted = 0usize;
        while emitted < declared {
            let mut coord = [0i32; 3];
            if bitsize == 0 {
                for d in 0..3 {
                    coord[d] = state.decode_bits(data, bitsizeint[d] as usize)? as i32;
                }
            } else {
                state.decode_ints(data, bitsize, sizeint, &mut coord)?;
            }
            for d in 0..3 {
                coord[d] += minint[d];
            }
            let mut prevcoord = coord;

            let flag = state.decode_bits(data, 1)? == 1;
            let mut run = 0i32;
            let mut is_smaller = 0i32;
            if flag {
                run = state.decode_bits(data, 5)? as i32;
                is_smaller = run % 3;
                run -= is_smaller;
                is_smaller -= 1;
            }
            if run > 0 {
                coord = [0; 3];
                for k in (0..run).step_by(3) {
                    state.decode_ints(data, smallidx as u32, sizesmall, &mut coord)?;
                    for d in 0..3 {
                        coord[d] += prevcoord[d] - smallnum;
                    }
                    if k == 0 {
                        // Swap the first run triplet with the base triplet.
                        // Waters are stored as OHH; the swap restores HOH,
                        // which compresses better. Only the first pair of a
                        // run is interchanged.
                        std::mem::swap(&mut coord, &mut prevcoord);
                        emit(positions, &mut emitted, declared, prevcoord, invprecision)?;
                    } else {
                        prevcoord = coord;
                    }
                    emit(positions, &mut emitted, declared, coord, invprecision)?;
                }
            } else {
                emit(positions, &mut emitted, declared, coord, invprecision)?;
            }

            match is_smaller.cmp(&0) {
                std::cmp::Ordering::Less => {
                    smallidx -= 1;
                    smallnum = smaller;
                    if smallidx > FIRSTIDX {
                        smaller = MAGICINTS[smallidx - 1] / 2;
                    } else {
                        smaller = 0;
                    }
                }
                std::cmp::Ordering::Greater => {
                    smallidx += 1;
                    smaller = smallnum;
                    smallnum = MAGICINTS[smallidx] / 2;
                }
                std::cmp::Ordering::Equal => {}
            }
            if smallidx >= MAGICINTS.len() || MAGICINTS[smallidx] == 0 {
                return Err(Error::BadSmallIndex(smallidx));
            }
            sizesmall.fill(MAGICINTS[smallidx] as u32);
        }

        Ok(precision)
    }
}

impl<R: Read + Seek> XtcReader<R> {
    /// Reads the next frame header without consuming it.
    pub fn peek_meta(&mut self) -> Result<Option<FrameMeta>> {
        let start = self.file.stream_position()?;
        let meta = self.read_meta()?;
        self.file.seek(SeekFrom::Start(start))?;
        Ok(meta)
    }

    pub fn rewind(&mut self) -> Result<()> {
        self.file.seek(SeekFrom::Start(0))?;
        Ok(())
    }
}

fn emit(
    positions: &mut [f32],
    emitted: &mut usize,
    declared: usize,
    coord: [i32; 3],
    invprecision: f32,
) -> Result<()> {
    if *emitted >= declared {
        // A run would overshoot the declared atom count.
        return Err(Error::Truncated);
    }
    let base = *emitted * 3;
    for d in 0..3 {
        positions[base + d] = coord[d] as f32 * invprecision;
    }
    *emitted += 1;
    Ok(())
}

/// Tracks the cursor into the opaque bit stream across decode calls.
#[derive(Debug, Default, Clone, Copy)]
struct DecodeState {
    count: usize,
    lastbits: usize,
    lastbyte: u64,
}

impl DecodeState {
    /// Extracts `nbits` bits from `buf`, MSB-first.
    fn decode_bits(&mut self, buf: &[u8], mut nbits: usize) -> Result<u32> {
        let mask: u64 = (1u64 << nbits) - 1;

        let mut num: u64 = 0;
        while nbits >= 8 {
            self.lastbyte = (self.lastbyte << 8) | self.next_byte(buf)?;
            num |= (self.lastbyte >> self.lastbits) << (nbits - 8);
            nbits -= 8;
        }
        if nbits > 0 {
            if self.lastbits < nbits {
                self.lastbits += 8;
                self.lastbyte = (self.lastbyte << 8) | self.next_byte(buf)?;
            }
            self.lastbits -= nbits;
            num |= (self.lastbyte >> self.lastbits) & ((1 << nbits) - 1);
        }

        num &= mask;
        self.lastbyte &= 0xff; // Only the last byte carries over.
        Ok(num as u32)
    }

    /// Decodes one mixed-radix packed triplet spanning `nbits` bits, where
    /// component `d` has radix `sizes[d]`.
    fn decode_ints(
        &mut self,
        buf: &[u8],
        nbits: u32,
        sizes: [u32; 3],
        nums: &mut [i32; 3],
    ) -> Result<()> {
        if nbits <= 64 {
            return self.unpack_small(buf, nbits, sizes, nums);
        }

        let mut bytes = [0u8; 32];
        let mut nbytes = 0usize;
        let mut nbits = nbits as usize;
        while nbits >= 8 {
            bytes[nbytes] = self.decode_bits(buf, 8)? as u8;
            nbytes += 1;
            nbits -= 8;
        }
        if nbits > 0 {
            bytes[nbytes] = self.decode_bits(buf, nbits)? as u8;
            nbytes += 1;
        }

        for i in (1..3).rev() {
            let mut num: u32 = 0;
            for j in (0..nbytes).rev() {
                num = (num << 8) | bytes[j] as u32;
                let p = num / sizes[i];
                bytes[j] = p as u8;
                num -= p * sizes[i];
            }
            nums[i] = num as i32;
        }
        nums[0] = i32::from_le_bytes(bytes[..4].try_into().unwrap());
        Ok(())
    }

    /// Fast path for packed triplets that fit in a u64.
    fn unpack_small(
        &mut self,
        buf: &[u8],
        mut nbits: u32,
        sizes: [u32; 3],
        nums: &mut [i32; 3],
    ) -> Result<()> {
        let mut v: u64 = 0;
        let mut nbytes = 0u32;
        while nbits >= 8 {
            v |= (self.decode_bits(buf, 8)? as u64) << (8 * nbytes);
            nbytes += 1;
            nbits -= 8;
        }
        if nbits > 0 {
            v |= (self.decode_bits(buf, nbits as usize)? as u64) << (8 * nbytes);
        }

        let sz = sizes[2] as u64;
        let szy = sz * sizes[1] as u64;
        let x = v / szy;
        let q = v - x * szy;
        let y = q / sz;
        let z = q - y * sz;
        *nums = [x as i32, y as i32, z as i32];
        Ok(())
    }

    fn next_byte(&mut self, buf: &[u8]) -> Result<u64> {
        let byte = *buf.get(self.count).ok_or(Error::Truncated)?;
        self.count += 1;
        Ok(byte as u64)
    }
}

fn calc_sizeint(
    minint: [i32; 3],
    maxint: [i32; 3],
    sizeint: &mut [u32; 3],
    bitsizeint: &mut [u32; 3],
) -> Result<u32> {
    for d in 0..3 {
        // A corrupt header can carry inverted or absurdly wide bounds.
        let span = i64::from(maxint[d]) - i64::from(minint[d]);
        if !(0..i64::from(u32::MAX)).contains(&span) {
            return Err(Error::BadCoordinateBounds {
                min: minint[d],
                max: maxint[d],
            });
        }
        sizeint[d] = span as u32 + 1;
    }
    bitsizeint.fill(0);

    // If a range cannot be multiplied into 24 bits, fall back to three
    // independent per-axis widths; a zero return flags that mode.
    if (sizeint[0] | sizeint[1] | sizeint[2]) > 0xffffff {
        for d in 0..3 {
            bitsizeint[d] = sizeofint(sizeint[d]);
        }
        return Ok(0);
    }

    Ok(sizeofints(*sizeint))
}

/// Smallest number of bits that can hold any value up to `size`.
const fn sizeofint(size: u32) -> u32 {
    let mut n = 1u64;
    let mut nbits = 0;
    while size as u64 >= n && nbits < 32 {
        nbits += 1;
        n <<= 1;
    }
    nbits
}

/// Number of bits needed for one triplet packed with radices `sizes`, i.e.
/// the bit length of `sizes[0] * sizes[1] * sizes[2]` computed in byte-wise
/// arbitrary precision.
fn sizeofints(sizes: [u32; 3]) -> u32 {
    let mut bytes = [0u8; 32];
    bytes[0] = 1;
    let mut nbytes = 1usize;

    for size in sizes {
        let mut tmp: u32 = 0;
        let mut bytecount = 0;
        while bytecount < nbytes {
            tmp += bytes[bytecount] as u32 * size;
            bytes[bytecount] = (tmp & 0xff) as u8;
            tmp >>= 8;
            bytecount += 1;
        }
        while tmp != 0 {
            bytes[bytecount] = (tmp & 0xff) as u8;
            bytecount += 1;
            tmp >>= 8;
        }
        nbytes = bytecount;
    }

    let mut nbits = 0;
    let mut num = 1u32;
    while bytes[nbytes - 1] as u32 >= num {
        nbits += 1;
        num *= 2;
    }
    (nbytes as u32 - 1) * 8 + nbits
}

fn read_opaque<R: Read>(file: &mut R, data: &mut Vec<u8>) -> Result<()> {
    let count = read_u32(file)? as usize;
    // The opaque block is xdr-padded to 32-bit boundaries.
    let padding = (4 - (count % 4)) % 4;
    data.resize(count + padding, 0);
    read_all(file, data)
}

pub(crate) fn read_boxvec<R: Read>(file: &mut R) -> Result<BoxVec> {
    let mut boxvec = [0.0; 9];
    read_f32s(file, &mut boxvec)?;
    let cols = [
        [boxvec[0], boxvec[1], boxvec[2]],
        [boxvec[3], boxvec[4], boxvec[5]],
        [boxvec[6], boxvec[7], boxvec[8]],
    ];
    Ok(Mat3::from_cols_array_2d(&cols))
}

pub(crate) fn read_f32s<R: Read>(file: &mut R, buf: &mut [f32]) -> Result<()> {
    for value in buf {
        *value = read_f32(file)?;
    }
    Ok(())
}

pub(crate) fn read_f32<R: Read>(file: &mut R) -> Result<f32> {
    let mut buf = [0u8; 4];
    read_all(file, &mut buf)?;
    Ok(f32::from_be_bytes(buf))
}

pub(crate) fn read_i32<R: Read>(file: &mut R) -> Result<i32> {
    let mut buf = [0u8; 4];
    read_all(file, &mut buf)?;
    Ok(i32::from_be_bytes(buf))
}

pub(crate) fn read_u32<R: Read>(file: &mut R) -> Result<u32> {
    let mut buf = [0u8; 4];
    read_all(file, &mut buf)?;
    Ok(u32::from_be_bytes(buf))
}

/// Like `read_exact`, but a short read is reported as [`Error::Truncated`]
/// instead of a bare io error.
fn read_all<R: Read>(file: &mut R, buf: &mut [u8]) -> Result<()> {
    match file.read_exact(buf) {
        Ok(()) => Ok(()),
        Err(err) if err.kind() == std::io::ErrorKind::UnexpectedEof => Err(Error::Truncated),
        Err(err) => Err(err.into()),
    }
}

/// Reads one big-endian i32, distinguishing a clean EOF at the first byte
/// (`None`) from a mid-value EOF (truncation).
fn read_i32_or_eof<R: Read>(file: &mut R) -> Result<Option<i32>> {
    let mut buf = [0u8; 4];
    let mut filled = 0;
    while filled < 4 {
        match file.read(&mut buf[filled..]) {
            Ok(0) if filled == 0 => return Ok(None),
            Ok(0) => return Err(Error::Truncated),
            Ok(n) => filled += n,
            Err(err) if err.kind() == std::io::ErrorKind::Interrupted => continue,
            Err(err) => return Err(err.into()),
        }
    }
    Ok(Some(i32::from_be_bytes(buf)))
}

fn to_count(value: i32) -> Result<usize> {
    usize::try_from(value).map_err(|_| Error::NegativeCount(value))
}
