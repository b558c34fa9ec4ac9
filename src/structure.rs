//! Fixed-column structure listing (gro) parser.
//!
//! Only the identity columns are consumed: line 1 is a free-form title, line
//! 2 holds the atom count, and each following entry line carries the residue
//! index in columns 1-5 and the atom species name in columns 11-15
//! (1-indexed, inclusive), both whitespace-trimmed.

use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

use crate::error::{Error, Result};
use crate::trajectory::AtomIdentifier;

pub fn read_atom_ids_from_file(path: impl AsRef<Path>) -> Result<Vec<AtomIdentifier>> {
    let file = BufReader::new(File::open(path)?);
    read_atom_ids(file)
}

pub fn read_atom_ids(reader: impl BufRead) -> Result<Vec<AtomIdentifier>> {
    let mut lines = reader.lines();

    let mut next_line = |lineno: usize| -> Result<String> {
        match lines.next() {
            Some(line) => Ok(line?),
            None => Err(Error::StructureParse {
                line: lineno,
                details: "unexpected end of file".into(),
            }),
        }
    };

    // Title line, then the atom count.
    next_line(1)?;
    let count_line = next_line(2)?;
    let count: usize = count_line
        .split_whitespace()
        .next()
        .and_then(|tok| tok.parse().ok())
        .ok_or_else(|| Error::StructureParse {
            line: 2,
            details: format!("invalid atom count '{}'", count_line.trim()),
        })?;

    let mut atoms = Vec::with_capacity(count);
    for i in 0..count {
        let lineno = i + 3;
        let line = next_line(lineno)?;
        atoms.push(parse_entry(&line, lineno)?);
    }
    Ok(atoms)
}

fn parse_entry(line: &str, lineno: usize) -> Result<AtomIdentifier> {
    // `get` also rejects a multi-byte character straddling a column edge.
    let (res_field, name_field) = match (line.get(0..5), line.get(10..15)) {
        (Some(res), Some(name)) => (res, name),
        _ => {
            return Err(Error::StructureParse {
                line: lineno,
                details: format!("entry does not span 15 single-byte columns: '{line}'"),
            })
        }
    };
    let res = res_field
        .trim()
        .parse()
        .map_err(|_| Error::StructureParse {
            line: lineno,
            details: format!("invalid residue index '{res_field}'"),
        })?;
    Ok(AtomIdentifier::new(res, name_field.trim()))
}
