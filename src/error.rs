use crate::trajectory::AtomIdentifier;

use thiserror::Error;

/// Fatal errors. Anything here aborts a scan; per-atom out-of-window drops
/// are not errors and are handled at the histogram merge site instead.
#[derive(Debug, Error)]
pub enum Error {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// The stream did not start a frame with the xtc magic number.
    #[error("found invalid magic number '{found}' ({found:#x})")]
    BadMagic { found: i32 },

    /// The stream ended in the middle of a frame.
    #[error("trajectory stream is truncated")]
    Truncated,

    #[error("requested to decompress {capacity} coords, file contains {declared}")]
    AtomCountExceedsCapacity { declared: usize, capacity: usize },

    #[error("a field that must be a positive integer was negative: {0}")]
    NegativeCount(i32),

    #[error("invalid small index {0} in compressed coordinate block")]
    BadSmallIndex(usize),

    /// The coordinate block's integer bounds are inconsistent.
    #[error("invalid coordinate bounds [{min}, {max}]")]
    BadCoordinateBounds { min: i32, max: i32 },

    #[error("number of atoms does not align between trajectory ({xtc}) and structure listing ({structure})")]
    AtomCountMismatch { xtc: usize, structure: usize },

    #[error("structure listing is malformed at line {line}: {details}")]
    StructureParse { line: usize, details: String },

    #[error("trajectory is closed")]
    Closed,

    #[error("configured atom {0} is not present in the trajectory")]
    MissingAtom(AtomIdentifier),

    /// Basis vectors too short or collinear to define a local frame.
    #[error("degenerate basis: {0}")]
    DegenerateBasis(&'static str),

    #[error("invalid config: {0}")]
    Config(String),

    #[error("xml config error: {0}")]
    Xml(#[from] quick_xml::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
