//! Spatial distribution functions over xtc trajectories.
//!
//! Reads a compressed xtc coordinate stream together with a fixed-column
//! structure listing, moves every frame into the local reference frame of a
//! configured atom basis, and accumulates a 2D histogram of what surrounds
//! the basis. The scan fans frames out over a thread pool; see [`scan::run`].

use glam::Mat3;

pub mod config;
pub mod error;
pub mod histogram;
pub mod pbc;
pub mod reader;
pub mod render;
pub mod scan;
pub mod sdf;
pub mod structure;
pub mod trajectory;

pub use crate::error::{Error, Result};

/// The box-edge matrix of a frame, one column per box axis.
pub type BoxVec = Mat3;
