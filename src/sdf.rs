//! Frame preparation: moving each frame into a basis atom's local reference
//! frame and slicing out the plotted plane.
//!
//! The pipeline in [`prepare_frame`] runs in a fixed order: filter by cutoff,
//! re-wrap around the X atom, translate the anchor to the origin, rotate the
//! X atom onto +x with the XY atom in the upper xy half-plane, then slice.
//! Every stage is pure with respect to shared state, so workers can run it
//! concurrently on their own frame copies.

use glam::{Mat3, Vec3};

use crate::config::{Basis, Center};
use crate::error::{Error, Result};
use crate::pbc::PeriodicBox;
use crate::trajectory::{filter_frame, AtomIdentifier, FrameView, FrameViewMut, Snapshot};

const DEGENERACY_EPS: f32 = 1e-6;

/// A sliced, aligned frame plus the three basis atoms' positions as they
/// stood after rotation but before the slice dropped them. The marker table
/// is ordered anchor, X, XY.
#[derive(Debug, Clone)]
pub struct PreparedFrame {
    pub snapshot: Snapshot,
    pub markers: Vec<(AtomIdentifier, Vec3)>,
}

/// Builds the rotation taking `v` onto the positive x axis and `w` into the
/// xy plane with non-negative y. The rotated `w` always satisfies
/// `R * w = (wx, wy, 0)` with `wy >= 0`, and `R * v = (|v|, 0, 0)`.
///
/// Composed from two elementary rotations: the first is about an axis in the
/// yz plane perpendicular to `v` (Rodrigues form) and carries `v` to +x; the
/// second is about x itself, with the sine sign chosen to land `w` in the
/// upper half-plane.
pub fn rotate_to_align_x(v: Vec3, w: Vec3) -> Result<Mat3> {
    if v.length_squared() < DEGENERACY_EPS {
        return Err(Error::DegenerateBasis("x-axis vector has near-zero length"));
    }
    if w.length_squared() < DEGENERACY_EPS {
        return Err(Error::DegenerateBasis(
            "xy-plane vector has near-zero length",
        ));
    }
    if v.cross(w).length_squared() < DEGENERACY_EPS * v.length_squared() * w.length_squared() {
        return Err(Error::DegenerateBasis("basis vectors are collinear"));
    }

    // Relative test, so short basis vectors close to +x still rotate.
    let axis = Vec3::new(0.0, v.z, -v.y);
    if axis.length_squared() < DEGENERACY_EPS * v.length_squared() {
        return Err(Error::DegenerateBasis(
            "x-axis vector already lies on the x axis",
        ));
    }
    let axis = axis.normalize();

    let cos = v.x / v.length();
    let sin = (1.0 - cos * cos).max(0.0).sqrt();
    let omc = 1.0 - cos;
    let rot1 = Mat3::from_cols_array_2d(&[
        [cos, axis.z * sin, -axis.y * sin],
        [-axis.z * sin, cos + axis.y * axis.y * omc, axis.z * axis.y * omc],
        [axis.y * sin, axis.y * axis.z * omc, cos + axis.z * axis.z * omc],
    ]);

    let rotated = rot1 * w;
    let planar = (rotated.y * rotated.y + rotated.z * rotated.z).sqrt();
    let cos2 = rotated.y / planar;
    let mut sin2 = (1.0 - cos2 * cos2).max(0.0).sqrt();
    if rotated.z > 0.0 {
        sin2 = -sin2;
    }
    let rot2 = Mat3::from_cols_array_2d(&[
        [1.0, 0.0, 0.0],
        [0.0, cos2, sin2],
        [0.0, -sin2, cos2],
    ]);

    Ok(rot2 * rot1)
}

/// Keeps the atoms within `cutoff` (minimum-image) of the named atom.
pub fn find_nearest<F>(id: &AtomIdentifier, cutoff: f32, frame: &F) -> Result<Snapshot>
where
    F: FrameView + ?Sized,
{
    let center = frame
        .vec_of(id)
        .ok_or_else(|| Error::MissingAtom(id.clone()))?;
    let pbc = PeriodicBox::from_box_matrix(&frame.meta().boxvec);
    Ok(filter_frame(frame, |_, _, vec| {
        pbc.distance(vec, center) < cutoff
    }))
}

/// Re-wraps every position to the periodic image nearest the named atom.
pub fn wrap_frame<F>(anchor: &AtomIdentifier, frame: &mut F) -> Result<()>
where
    F: FrameViewMut + ?Sized,
{
    let reference = frame
        .vec_of(anchor)
        .ok_or_else(|| Error::MissingAtom(anchor.clone()))?;
    let pbc = PeriodicBox::from_box_matrix(&frame.meta().boxvec);
    for i in 0..frame.size() {
        let wrapped = pbc.wrap(reference, frame.vec(i));
        frame.set_vec(i, wrapped);
    }
    Ok(())
}

pub fn shift_frame<F>(by: Vec3, frame: &mut F)
where
    F: FrameViewMut + ?Sized,
{
    for i in 0..frame.size() {
        let v = frame.vec(i) + by;
        frame.set_vec(i, v);
    }
}

pub fn rotate_frame<F>(rot: &Mat3, frame: &mut F)
where
    F: FrameViewMut + ?Sized,
{
    for i in 0..frame.size() {
        let v = *rot * frame.vec(i);
        frame.set_vec(i, v);
    }
}

/// Runs the full preparation pipeline for one basis against one frame.
///
/// The three basis atoms always survive the cutoff filter; atoms sharing the
/// anchor's residue are always dropped from it. The final slice removes the
/// basis atoms themselves and keeps only atoms with |z| within half the
/// slice thickness.
pub fn prepare_frame<F>(basis: &Basis, frame: &F) -> Result<PreparedFrame>
where
    F: FrameView + ?Sized,
{
    let center_id = match basis.center {
        Center::Anchor => &basis.anchor,
        Center::X => &basis.atom_x,
        Center::Xy => &basis.atom_xy,
    };
    let center = frame
        .vec_of(center_id)
        .ok_or_else(|| Error::MissingAtom(center_id.clone()))?;
    let pbc = PeriodicBox::from_box_matrix(&frame.meta().boxvec);

    let mut working = filter_frame(frame, |id, _, vec| {
        if *id == basis.anchor || *id == basis.atom_x || *id == basis.atom_xy {
            return true;
        }
        if id.res == basis.anchor.res {
            return false;
        }
        pbc.distance(center, vec) < basis.cutoff
    });

    wrap_frame(&basis.atom_x, &mut working)?;

    let shift_by = -working
        .vec_of(&basis.anchor)
        .ok_or_else(|| Error::MissingAtom(basis.anchor.clone()))?;
    shift_frame(shift_by, &mut working);

    let atom_x = working
        .vec_of(&basis.atom_x)
        .ok_or_else(|| Error::MissingAtom(basis.atom_x.clone()))?;
    let atom_xy = working
        .vec_of(&basis.atom_xy)
        .ok_or_else(|| Error::MissingAtom(basis.atom_xy.clone()))?;
    let rot = rotate_to_align_x(atom_x, atom_xy)?;
    rotate_frame(&rot, &mut working);

    let markers = [&basis.anchor, &basis.atom_x, &basis.atom_xy]
        .into_iter()
        .map(|id| {
            let pos = working
                .vec_of(id)
                .ok_or_else(|| Error::MissingAtom(id.clone()))?;
            Ok((id.clone(), pos))
        })
        .collect::<Result<Vec<_>>>()?;

    let half_thickness = basis.slice_thickness * 0.5;
    let snapshot = filter_frame(&working, |id, _, pos| {
        *id != basis.anchor
            && *id != basis.atom_x
            && *id != basis.atom_xy
            && pos.z.abs() <= half_thickness
    });

    Ok(PreparedFrame { snapshot, markers })
}
