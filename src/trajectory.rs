//! The trajectory abstraction: a decoded xtc stream paired with the atom
//! identities from a structure listing.
//!
//! A [`Trajectory`] is a live cursor whose buffers are rewritten in place by
//! [`Trajectory::next_frame`]; a [`Snapshot`] is an immutable, independently
//! owned copy produced by [`filter_frame`]. Both expose the same read contract
//! through [`FrameView`], so the geometric transforms in [`crate::sdf`] work
//! on either.

use std::collections::HashMap;
use std::fmt;
use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use glam::Vec3;

use crate::error::{Error, Result};
use crate::reader::{FrameMeta, XtcReader};
use crate::structure;

/// Identifies one atom: the residue it belongs to plus its species name.
///
/// The text form is `"<res>+<name>"`, e.g. `"2+OW"`; this is the syntax used
/// by config files and histogram marker keys.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct AtomIdentifier {
    pub res: i32,
    pub name: String,
}

impl AtomIdentifier {
    pub fn new(res: i32, name: impl Into<String>) -> Self {
        Self {
            res,
            name: name.into(),
        }
    }
}

impl fmt::Display for AtomIdentifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}+{}", self.res, self.name)
    }
}

impl FromStr for AtomIdentifier {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let (res, name) = s
            .split_once('+')
            .ok_or_else(|| Error::Config(format!("invalid atom identifier '{s}'")))?;
        let res = res
            .trim()
            .parse()
            .map_err(|_| Error::Config(format!("invalid residue index in '{s}'")))?;
        Ok(Self::new(res, name.trim()))
    }
}

/// Read access to one frame's worth of positions and identities.
pub trait FrameView {
    fn size(&self) -> usize;
    fn meta(&self) -> &FrameMeta;
    fn vec(&self, i: usize) -> Vec3;
    fn atom_id(&self, i: usize) -> &AtomIdentifier;
    fn index_of(&self, id: &AtomIdentifier) -> Option<usize>;

    fn has_atom(&self, id: &AtomIdentifier) -> bool {
        self.index_of(id).is_some()
    }

    /// Position of the atom with this identifier, if present.
    fn vec_of(&self, id: &AtomIdentifier) -> Option<Vec3> {
        self.index_of(id).map(|i| self.vec(i))
    }
}

/// A frame view whose positions may be rewritten in place.
pub trait FrameViewMut: FrameView {
    fn set_vec(&mut self, i: usize, v: Vec3);
}

/// An immutable copy of (a subset of) a frame. Only constructable through
/// [`filter_frame`], [`Trajectory::snapshot`], or [`Snapshot::new`].
#[derive(Debug, Clone)]
pub struct Snapshot {
    atoms: Vec<AtomIdentifier>,
    index: HashMap<AtomIdentifier, usize>,
    meta: FrameMeta,
    positions: Vec<f32>,
}

impl Snapshot {
    /// Builds a snapshot from parallel identity and position tables.
    ///
    /// Duplicate identifiers are not rejected; a duplicate aliases to the
    /// last-registered index.
    pub fn new(atoms: Vec<AtomIdentifier>, positions: Vec<f32>, mut meta: FrameMeta) -> Self {
        assert_eq!(
            atoms.len() * 3,
            positions.len(),
            "three floats per atom required"
        );
        meta.natoms = atoms.len();
        let index = atoms
            .iter()
            .enumerate()
            .map(|(i, id)| (id.clone(), i))
            .collect();
        Self {
            atoms,
            index,
            meta,
            positions,
        }
    }
}

impl FrameView for Snapshot {
    fn size(&self) -> usize {
        self.atoms.len()
    }

    fn meta(&self) -> &FrameMeta {
        &self.meta
    }

    fn vec(&self, i: usize) -> Vec3 {
        let p = &self.positions[i * 3..i * 3 + 3];
        Vec3::new(p[0], p[1], p[2])
    }

    fn atom_id(&self, i: usize) -> &AtomIdentifier {
        &self.atoms[i]
    }

    fn index_of(&self, id: &AtomIdentifier) -> Option<usize> {
        self.index.get(id).copied()
    }
}

impl FrameViewMut for Snapshot {
    fn set_vec(&mut self, i: usize, v: Vec3) {
        self.positions[i * 3..i * 3 + 3].copy_from_slice(&v.to_array());
    }
}

/// Keeps the atoms for which `pred` returns true, producing an independently
/// owned [`Snapshot`]. `pred` is called once per atom with its identity,
/// index, and position. The snapshot's meta atom count reflects the kept set.
pub fn filter_frame<F, P>(frame: &F, mut pred: P) -> Snapshot
where
    F: FrameView + ?Sized,
    P: FnMut(&AtomIdentifier, usize, Vec3) -> bool,
{
    let mut atoms = Vec::new();
    let mut positions = Vec::new();
    for i in 0..frame.size() {
        let v = frame.vec(i);
        if pred(frame.atom_id(i), i, v) {
            atoms.push(frame.atom_id(i).clone());
            positions.extend_from_slice(&v.to_array());
        }
    }
    Snapshot::new(atoms, positions, *frame.meta())
}

/// A live cursor over an xtc file plus the identity table from its structure
/// listing. Boxes and boundary conditions are not this type's concern.
#[derive(Debug)]
pub struct Trajectory {
    xtc_path: PathBuf,
    reader: Option<XtcReader<BufReader<File>>>,
    atoms: Vec<AtomIdentifier>,
    index: HashMap<AtomIdentifier, usize>,
    meta: FrameMeta,
    positions: Vec<f32>,
    precision: f32,
    scratch: Vec<u8>,
    frame_count: usize,
}

impl Trajectory {
    /// Opens a trajectory and its structure listing together, verifying that
    /// their atom counts agree.
    pub fn open(xtc_path: impl AsRef<Path>, structure_path: impl AsRef<Path>) -> Result<Self> {
        let atoms = structure::read_atom_ids_from_file(structure_path)?;

        let xtc_path = xtc_path.as_ref().to_path_buf();
        let mut reader = XtcReader::new(BufReader::new(File::open(&xtc_path)?));
        let meta = reader.peek_meta()?.ok_or(Error::Truncated)?;
        if meta.natoms != atoms.len() {
            return Err(Error::AtomCountMismatch {
                xtc: meta.natoms,
                structure: atoms.len(),
            });
        }

        let index = atoms
            .iter()
            .enumerate()
            .map(|(i, id): (usize, &AtomIdentifier)| (id.clone(), i))
            .collect();
        let positions = vec![0.0; atoms.len() * 3];
        Ok(Self {
            xtc_path,
            reader: Some(reader),
            atoms,
            index,
            meta,
            positions,
            precision: 0.0,
            scratch: Vec::new(),
            frame_count: 0,
        })
    }

    /// Advances to the next frame, decoding it into the internal buffers.
    /// Returns `Ok(false)` at a clean end of stream.
    pub fn next_frame(&mut self) -> Result<bool> {
        let reader = self.reader.as_mut().ok_or(Error::Closed)?;
        let meta = match reader.read_meta()? {
            Some(meta) => meta,
            None => return Ok(false),
        };
        if meta.natoms != self.atoms.len() {
            return Err(Error::AtomCountMismatch {
                xtc: meta.natoms,
                structure: self.atoms.len(),
            });
        }
        self.precision = reader.read_positions(meta.natoms, &mut self.positions, &mut self.scratch)?;
        if self.positions.len() != self.atoms.len() * 3 {
            // The coordinate block declared fewer atoms than the header.
            return Err(Error::AtomCountMismatch {
                xtc: self.positions.len() / 3,
                structure: self.atoms.len(),
            });
        }
        self.meta = meta;
        self.frame_count += 1;
        Ok(true)
    }

    /// The number of frames delivered so far. This is the authoritative tally
    /// used for frame-averaged rendering.
    pub fn count_frames(&self) -> usize {
        self.frame_count
    }

    /// Precision scale of the most recently decoded frame (zero for the
    /// uncompressed tiny-system path).
    pub fn precision(&self) -> f32 {
        self.precision
    }

    pub fn close(&mut self) {
        self.reader = None;
    }

    /// Closes and reopens the underlying file, resetting the stream position,
    /// the frame tally, and all per-frame buffers. This is how a second full
    /// pass over the trajectory starts.
    pub fn reopen(&mut self) -> Result<()> {
        self.reader = Some(XtcReader::new(BufReader::new(File::open(&self.xtc_path)?)));
        self.positions.fill(0.0);
        self.scratch.clear();
        self.precision = 0.0;
        self.frame_count = 0;
        Ok(())
    }

    /// An owned copy of the current frame.
    pub fn snapshot(&self) -> Snapshot {
        filter_frame(self, |_, _, _| true)
    }
}

impl FrameView for Trajectory {
    fn size(&self) -> usize {
        self.atoms.len()
    }

    fn meta(&self) -> &FrameMeta {
        &self.meta
    }

    fn vec(&self, i: usize) -> Vec3 {
        let p = &self.positions[i * 3..i * 3 + 3];
        Vec3::new(p[0], p[1], p[2])
    }

    fn atom_id(&self, i: usize) -> &AtomIdentifier {
        &self.atoms[i]
    }

    fn index_of(&self, id: &AtomIdentifier) -> Option<usize> {
        self.index.get(id).copied()
    }
}

impl FrameViewMut for Trajectory {
    fn set_vec(&mut self, i: usize, v: Vec3) {
        self.positions[i * 3..i * 3 + 3].copy_from_slice(&v.to_array());
    }
}
