//! Run configuration: basis definitions, histogram sizing, and the two
//! on-disk config formats.
//!
//! The line-based format is the historical one: trajectory path, structure
//! path, a `+++` separator, then per-basis blocks of five lines (anchor, X
//! atom, XY atom, cutoff, slice thickness) each followed by an optional atom
//! list terminated by `+++`. That trailing list is consumed but ignored; it
//! was superseded by the residue-exclusion rule. The XML format carries the
//! same payload plus histogram sizing, thread count, and the species charge
//! table.

use std::collections::HashMap;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};
use std::str::FromStr;

use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;

use crate::error::{Error, Result};
use crate::trajectory::AtomIdentifier;

/// Which basis atom the cutoff distance is measured from.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Center {
    Anchor,
    #[default]
    X,
    Xy,
}

impl FromStr for Center {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "anchor" => Ok(Center::Anchor),
            "x" => Ok(Center::X),
            "xy" => Ok(Center::Xy),
            other => Err(Error::Config(format!("invalid center type '{other}'"))),
        }
    }
}

/// One local reference frame: three basis atoms plus its sampling window.
#[derive(Debug, Clone, PartialEq)]
pub struct Basis {
    pub anchor: AtomIdentifier,
    pub atom_x: AtomIdentifier,
    pub atom_xy: AtomIdentifier,
    pub cutoff: f32,
    pub slice_thickness: f32,
    pub center: Center,
}

/// Half-extent of the plotted window, either as a ratio of the box edge
/// lengths or in absolute coordinate units.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum HistRange {
    BoxRatio(f32),
    Absolute(f32),
}

impl Default for HistRange {
    fn default() -> Self {
        HistRange::BoxRatio(0.1)
    }
}

pub const DEFAULT_RESOLUTION: usize = 40;

#[derive(Debug, Clone)]
pub struct RuntimeConfig {
    pub xtc_path: PathBuf,
    pub structure_path: PathBuf,
    pub bases: Vec<Basis>,
    pub resolution: usize,
    pub hist_range: HistRange,
    pub threads: usize,
    /// Divide scalar cell values by the frame count when rendering.
    pub average: bool,
    /// Species name to integer charge, for the charge measure only.
    pub charges: HashMap<String, i64>,
}

fn default_threads() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1)
}

impl RuntimeConfig {
    fn with_paths(xtc: impl Into<PathBuf>, structure: impl Into<PathBuf>) -> Self {
        Self {
            xtc_path: xtc.into(),
            structure_path: structure.into(),
            bases: Vec::new(),
            resolution: DEFAULT_RESOLUTION,
            hist_range: HistRange::default(),
            threads: default_threads(),
            average: false,
            charges: HashMap::new(),
        }
    }

    /// Loads a config file, dispatching on the `.xml` extension; anything
    /// else is treated as the line-based format.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let file = BufReader::new(File::open(path)?);
        if path.extension().is_some_and(|ext| ext == "xml") {
            Self::read_xml(file)
        } else {
            Self::read_legacy(file)
        }
    }

    /// Parses the line-based format.
    pub fn read_legacy(reader: impl BufRead) -> Result<Self> {
        fn take(it: &mut std::vec::IntoIter<String>, what: &str) -> Result<String> {
            it.next()
                .ok_or_else(|| Error::Config(format!("missing {what}")))
        }

        let lines: Vec<String> = reader.lines().collect::<std::io::Result<_>>()?;
        let mut it = lines.into_iter();

        let xtc = take(&mut it, "trajectory path")?;
        let structure = take(&mut it, "structure path")?;
        let sep = take(&mut it, "'+++' separator")?;
        if sep.trim() != "+++" {
            return Err(Error::Config(format!(
                "expected '+++' separator, found '{sep}'"
            )));
        }

        let mut config = Self::with_paths(xtc.trim(), structure.trim());
        loop {
            let anchor = match it.next() {
                Some(line) if !line.trim().is_empty() => line,
                _ => break,
            };
            let basis = Basis {
                anchor: anchor.trim().parse()?,
                atom_x: take(&mut it, "x atom")?.trim().parse()?,
                atom_xy: take(&mut it, "xy atom")?.trim().parse()?,
                cutoff: parse_float(&take(&mut it, "cutoff distance")?)?,
                slice_thickness: parse_float(&take(&mut it, "slice thickness")?)?,
                center: Center::default(),
            };
            config.bases.push(basis);

            // The explicit atom list, if any. Read through it up to the
            // block terminator; the identifiers themselves are unused.
            for line in it.by_ref() {
                if line.trim() == "+++" {
                    break;
                }
            }
        }

        if config.bases.is_empty() {
            return Err(Error::Config("no basis defined".into()));
        }
        Ok(config)
    }

    /// Parses the XML format.
    pub fn read_xml(reader: impl BufRead) -> Result<Self> {
        let mut xml = Reader::from_reader(reader);
        xml.trim_text(true);

        let mut xtc = None;
        let mut structure = None;
        let mut bases = Vec::new();
        let mut resolution = DEFAULT_RESOLUTION;
        let mut hist_range = HistRange::default();
        let mut threads = default_threads();
        let mut charges = HashMap::new();

        let mut buf = Vec::new();
        let mut text_target: Option<&'static str> = None;
        loop {
            match xml.read_event_into(&mut buf)? {
                Event::Start(ref e) => match e.name().as_ref() {
                    b"trajectory" => text_target = Some("trajectory"),
                    b"structure" => text_target = Some("structure"),
                    b"threads" => text_target = Some("threads"),
                    b"charges" => {}
                    b"sdf" => {}
                    other => {
                        return Err(Error::Config(format!(
                            "unexpected element <{}>",
                            String::from_utf8_lossy(other)
                        )))
                    }
                },
                Event::Empty(ref e) => match e.name().as_ref() {
                    b"histogram" => {
                        if let Some(value) = get_attr_opt(e, b"resolution") {
                            resolution = value.parse().map_err(|_| {
                                Error::Config(format!("invalid resolution '{value}'"))
                            })?;
                        }
                        if let Some(value) = get_attr_opt(e, b"range") {
                            let range = parse_float(&value)?;
                            let absolute = get_attr_opt(e, b"absolute")
                                .is_some_and(|v| v == "true" || v == "1");
                            hist_range = if absolute {
                                HistRange::Absolute(range)
                            } else {
                                HistRange::BoxRatio(range)
                            };
                        }
                    }
                    b"basis" => bases.push(parse_basis_element(e)?),
                    b"charge" => {
                        let species = get_attr(e, b"species")?;
                        let value = get_attr(e, b"value")?;
                        let charge = value.parse().map_err(|_| {
                            Error::Config(format!("invalid charge '{value}' for '{species}'"))
                        })?;
                        charges.insert(species, charge);
                    }
                    other => {
                        return Err(Error::Config(format!(
                            "unexpected element <{}/>",
                            String::from_utf8_lossy(other)
                        )))
                    }
                },
                Event::Text(ref t) => {
                    let text = t.unescape()?.trim().to_string();
                    match text_target.take() {
                        Some("trajectory") => xtc = Some(text),
                        Some("structure") => structure = Some(text),
                        Some("threads") => {
                            threads = text.parse().map_err(|_| {
                                Error::Config(format!("invalid thread count '{text}'"))
                            })?;
                        }
                        _ => {}
                    }
                }
                Event::End(_) => text_target = None,
                Event::Eof => break,
                _ => {}
            }
            buf.clear();
        }

        let xtc = xtc.ok_or_else(|| Error::Config("missing <trajectory>".into()))?;
        let structure = structure.ok_or_else(|| Error::Config("missing <structure>".into()))?;
        if bases.is_empty() {
            return Err(Error::Config("no basis defined".into()));
        }

        let mut config = Self::with_paths(xtc, structure);
        config.bases = bases;
        config.resolution = resolution;
        config.hist_range = hist_range;
        config.threads = threads;
        config.charges = charges;
        Ok(config)
    }
}

fn parse_basis_element(e: &BytesStart) -> Result<Basis> {
    let center = match get_attr_opt(e, b"center") {
        Some(value) => value.parse()?,
        None => Center::default(),
    };
    Ok(Basis {
        anchor: get_attr(e, b"anchor")?.parse()?,
        atom_x: get_attr(e, b"x")?.parse()?,
        atom_xy: get_attr(e, b"xy")?.parse()?,
        cutoff: parse_float(&get_attr(e, b"cutoff")?)?,
        slice_thickness: parse_float(&get_attr(e, b"slice")?)?,
        center,
    })
}

fn parse_float(s: &str) -> Result<f32> {
    s.trim()
        .parse()
        .map_err(|_| Error::Config(format!("invalid number '{}'", s.trim())))
}

fn get_attr(e: &BytesStart, name: &[u8]) -> Result<String> {
    get_attr_opt(e, name).ok_or_else(|| {
        Error::Config(format!(
            "<{}> is missing attribute '{}'",
            String::from_utf8_lossy(e.name().as_ref()),
            String::from_utf8_lossy(name)
        ))
    })
}

fn get_attr_opt(e: &BytesStart, name: &[u8]) -> Option<String> {
    for attr in e.attributes().flatten() {
        if attr.key.as_ref() == name {
            return Some(String::from_utf8_lossy(&attr.value).to_string());
        }
    }
    None
}
