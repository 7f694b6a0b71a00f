//! Prefix-tagged identifiers.
//!
//! Every persisted entity gets an id rendered as `<prefix>_<ulid>`, e.g.
//! `boo_01j9zq3x4k8m2n5p7r9t1v3w5y`. The prefix is fixed per entity type at
//! compile time, so an id minted for one kind of entity cannot be passed where
//! another is expected: parsing checks the tag and the type system keeps
//! `TypedId<A>` and `TypedId<B>` apart.

use std::fmt;
use std::hash::Hash;
use std::marker::PhantomData;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use ulid::Ulid;

/// Compile-time tag naming the entity an id belongs to.
pub trait IdTag: Copy + Eq + Hash + fmt::Debug + Send + Sync + 'static {
    const PREFIX: &'static str;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BookingTag;

impl IdTag for BookingTag {
    const PREFIX: &'static str = "boo";
}

pub type BookingId = TypedId<BookingTag>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IdError {
    Malformed(String),
    PrefixMismatch {
        expected: &'static str,
        found: String,
    },
}

impl fmt::Display for IdError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IdError::Malformed(reason) => write!(f, "invalid id: {reason}"),
            IdError::PrefixMismatch { expected, found } => {
                write!(f, "invalid id: prefix {found} != {expected}")
            }
        }
    }
}

impl std::error::Error for IdError {}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TypedId<T: IdTag> {
    value: Ulid,
    tag: PhantomData<T>,
}

impl<T: IdTag> TypedId<T> {
    /// Mint a fresh, time-ordered id.
    pub fn generate() -> Self {
        Self::from_ulid(Ulid::new())
    }

    pub fn from_ulid(value: Ulid) -> Self {
        Self {
            value,
            tag: PhantomData,
        }
    }

    /// Build an id from a literal the program itself controls.
    ///
    /// Never call this with user input; use [`FromStr`] instead.
    ///
    /// # Panics
    ///
    /// Panics if `literal` is not a valid id for this entity type.
    pub fn from_static(literal: &'static str) -> Self {
        match literal.parse() {
            Ok(id) => id,
            Err(e) => panic!("invariant violation: {literal} is not a valid {} id: {e}", T::PREFIX),
        }
    }

    pub fn ulid(&self) -> Ulid {
        self.value
    }

    pub fn prefix(&self) -> &'static str {
        T::PREFIX
    }
}

impl<T: IdTag> fmt::Display for TypedId<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}_{}", T::PREFIX, self.value.to_string().to_ascii_lowercase())
    }
}

impl<T: IdTag> FromStr for TypedId<T> {
    type Err = IdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (prefix, suffix) = s
            .rsplit_once('_')
            .ok_or_else(|| IdError::Malformed("missing type prefix".into()))?;
        if prefix != T::PREFIX {
            return Err(IdError::PrefixMismatch {
                expected: T::PREFIX,
                found: prefix.to_string(),
            });
        }
        let value = Ulid::from_string(&suffix.to_ascii_uppercase())
            .map_err(|e| IdError::Malformed(e.to_string()))?;
        Ok(Self::from_ulid(value))
    }
}

impl<T: IdTag> Serialize for TypedId<T> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de, T: IdTag> Deserialize<'de> for TypedId<T> {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}
