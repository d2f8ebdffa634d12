//! Tuples and relations.
//!
//! A [`Tuple`] is a join key followed by opaque payload fields. The key is a
//! normalized integer so that equality never depends on how the key was
//! spelled in the input. A [`Relation`] is an ordered list of tuples that all
//! share one declared arity.
use std::fmt;
use std::sync::Arc;

use crate::error::{JoinError, Result};

pub type Key = i64;

/// A non-key value.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Field {
    /// Padding produced by outer joins.
    Null,
    Text(Arc<str>),
}

impl Field {
    pub fn text(s: impl Into<Arc<str>>) -> Self {
        Field::Text(s.into())
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Field::Null)
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Field::Null => None,
            Field::Text(s) => Some(s),
        }
    }
}

impl fmt::Display for Field {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Field::Null => Ok(()),
            Field::Text(s) => f.write_str(s),
        }
    }
}

impl From<&str> for Field {
    fn from(s: &str) -> Self {
        Field::text(s)
    }
}

/// Key plus payload. Cloning shares the payload.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Tuple {
    key: Key,
    payload: Arc<[Field]>,
}

impl Tuple {
    pub fn new(key: Key, payload: impl Into<Arc<[Field]>>) -> Self {
        Self {
            key,
            payload: payload.into(),
        }
    }

    #[inline]
    pub fn key(&self) -> Key {
        self.key
    }

    /// Fields after the key.
    #[inline]
    pub fn payload(&self) -> &[Field] {
        &self.payload
    }

    /// Number of fields including the key.
    #[inline]
    pub fn arity(&self) -> usize {
        1 + self.payload.len()
    }

    /// `self ++ other[1..]`: the key is not repeated.
    pub fn concat(&self, other: &Tuple) -> Tuple {
        let mut payload = Vec::with_capacity(self.payload.len() + other.payload.len());
        payload.extend_from_slice(&self.payload);
        payload.extend_from_slice(&other.payload);
        Tuple::new(self.key, payload)
    }

    /// `self ++ NULL * nulls`.
    pub fn pad_nulls(&self, nulls: usize) -> Tuple {
        let mut payload = Vec::with_capacity(self.payload.len() + nulls);
        payload.extend_from_slice(&self.payload);
        payload.resize(self.payload.len() + nulls, Field::Null);
        Tuple::new(self.key, payload)
    }

    /// Renders every field, key first, as text. Nulls become empty strings.
    pub fn to_strings(&self) -> Vec<String> {
        let mut out = Vec::with_capacity(self.arity());
        out.push(self.key.to_string());
        out.extend(self.payload.iter().map(|f| f.to_string()));
        out
    }
}

impl fmt::Display for Tuple {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}", self.key)?;
        for field in self.payload.iter() {
            match field {
                Field::Null => write!(f, ", null")?,
                Field::Text(s) => write!(f, ", {s:?}")?,
            }
        }
        write!(f, ")")
    }
}

/// An ordered, read-only sequence of tuples of one arity.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Relation {
    arity: usize,
    tuples: Vec<Tuple>,
}

impl Relation {
    /// Creates a relation, checking that every tuple has `arity` fields.
    pub fn new(arity: usize, tuples: Vec<Tuple>) -> Result<Self> {
        if arity == 0 {
            return Err(JoinError::InvalidArity(arity));
        }
        if let Some((row, t)) = tuples.iter().enumerate().find(|(_, t)| t.arity() != arity) {
            return Err(JoinError::ArityMismatch {
                expected: arity,
                found: t.arity(),
                row,
            });
        }
        Ok(Self { arity, tuples })
    }

    pub fn empty(arity: usize) -> Result<Self> {
        Self::new(arity, Vec::new())
    }

    /// Builds a relation from `(key, payload...)` rows, mostly for tests and
    /// generated workloads.
    pub fn from_rows<I, R, S>(arity: usize, rows: I) -> Result<Self>
    where
        I: IntoIterator<Item = (Key, R)>,
        R: IntoIterator<Item = S>,
        S: Into<Arc<str>>,
    {
        let tuples = rows
            .into_iter()
            .map(|(key, payload)| {
                let payload: Vec<Field> = payload.into_iter().map(Field::text).collect();
                Tuple::new(key, payload)
            })
            .collect();
        Self::new(arity, tuples)
    }

    /// Used internally where arity is already guaranteed.
    pub(crate) fn from_parts(arity: usize, tuples: Vec<Tuple>) -> Self {
        debug_assert!(tuples.iter().all(|t| t.arity() == arity));
        Self { arity, tuples }
    }

    #[inline]
    pub fn arity(&self) -> usize {
        self.arity
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.tuples.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.tuples.is_empty()
    }

    #[inline]
    pub fn get(&self, idx: usize) -> Option<&Tuple> {
        self.tuples.get(idx)
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Tuple> {
        self.tuples.iter()
    }

    pub fn tuples(&self) -> &[Tuple] {
        &self.tuples
    }

    pub fn into_tuples(self) -> Vec<Tuple> {
        self.tuples
    }
}

impl<'a> IntoIterator for &'a Relation {
    type Item = &'a Tuple;
    type IntoIter = std::slice::Iter<'a, Tuple>;

    fn into_iter(self) -> Self::IntoIter {
        self.tuples.iter()
    }
}
