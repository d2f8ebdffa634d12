//! Reading and writing relations as comma separated text.
//!
//! Input files start with a header line whose only use is to fix the arity.
//! The first field of every record is the join key. Output is written
//! without a header and nulls become empty fields.
use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::Path;

use tracing::debug;

use crate::error::{JoinError, Result};
use crate::tuple::{Field, Key, Relation, Tuple};

pub fn read_relation(path: impl AsRef<Path>) -> Result<Relation> {
    let path = path.as_ref();
    let relation = read_relation_from(BufReader::new(File::open(path)?))?;
    debug!(
        path = %path.display(),
        tuples = relation.len(),
        arity = relation.arity(),
        "read relation"
    );
    Ok(relation)
}

pub fn read_relation_from<R: Read>(reader: R) -> Result<Relation> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .from_reader(reader);

    let arity = reader.headers()?.len();
    if arity == 0 {
        return Err(JoinError::InvalidArity(arity));
    }

    let mut tuples = Vec::new();
    let mut record = csv::StringRecord::new();
    while reader.read_record(&mut record)? {
        // Header is line 1.
        let line = record.position().map_or(tuples.len() as u64 + 2, |p| p.line());
        if record.len() != arity {
            return Err(JoinError::ArityMismatch {
                expected: arity,
                found: record.len(),
                row: tuples.len(),
            });
        }
        let raw_key = &record[0];
        let key: Key = raw_key.trim().parse().map_err(|_| JoinError::MalformedKey {
            line,
            value: raw_key.to_string(),
        })?;
        let payload: Vec<Field> = record.iter().skip(1).map(Field::text).collect();
        tuples.push(Tuple::new(key, payload));
    }

    Relation::new(arity, tuples)
}

pub fn write_relation(path: impl AsRef<Path>, relation: &Relation) -> Result<()> {
    let file = File::create(path.as_ref())?;
    write_relation_to(BufWriter::new(file), relation)
}

pub fn write_relation_to<W: Write>(writer: W, relation: &Relation) -> Result<()> {
    let mut writer = csv::WriterBuilder::new()
        .has_headers(false)
        .from_writer(writer);
    for tuple in relation {
        writer.write_record(tuple.to_strings())?;
    }
    writer.flush()?;
    Ok(())
}
