//! Binary snapshots of validated metadata using postcard.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::error::MetadataError;
use crate::members::{FieldDef, MethodDef, Token};
use crate::metadata::Metadata;
use crate::types::TypeDef;

#[derive(Serialize)]
struct SnapshotRef<'a> {
    types: &'a [TypeDef],
    fields: &'a [FieldDef],
    methods: &'a [MethodDef],
    tokens: &'a IndexMap<u32, Token>,
}

#[derive(Deserialize)]
struct Snapshot {
    types: Vec<TypeDef>,
    fields: Vec<FieldDef>,
    methods: Vec<MethodDef>,
    tokens: IndexMap<u32, Token>,
}

impl Metadata {
    /// Deserialize metadata from binary format. Lookup tables are rebuilt
    /// and references revalidated.
    pub fn from_binary(bytes: &[u8]) -> Result<Self, MetadataError> {
        let snapshot: Snapshot = postcard::from_bytes(bytes)?;
        Metadata::new(
            snapshot.types,
            snapshot.fields,
            snapshot.methods,
            snapshot.tokens,
        )
    }

    /// Serialize metadata, including interned derived types, to binary format.
    pub fn to_binary(&self) -> Result<Vec<u8>, MetadataError> {
        let snapshot = SnapshotRef {
            types: &self.types,
            fields: &self.fields,
            methods: &self.methods,
            tokens: &self.tokens,
        };
        Ok(postcard::to_allocvec(&snapshot)?)
    }
}
