//! JSON deserialization of metadata documents.
//!
//! Cross references are indices into the `types`, `fields` and `methods`
//! arrays. Member lists of a type are implied by the `declaring` index of
//! each field and method, in document order.

use indexmap::IndexMap;
use serde::Deserialize;

use crate::error::MetadataError;
use crate::ids::{FieldId, MethodId, TypeId};
use crate::members::{ExceptionClause, FieldDef, MethodBody, MethodDef, PInvoke, Parameter, Token};
use crate::metadata::Metadata;
use crate::types::{StructLayout, TypeDef, TypeKind};

impl Metadata {
    /// Parse and validate a JSON metadata document.
    pub fn from_json(json: &str) -> Result<Self, MetadataError> {
        let raw: RawMetadata = serde_json::from_str(json)?;
        raw.into_metadata()
    }
}

#[derive(Debug, Deserialize)]
struct RawMetadata {
    types: Vec<RawType>,
    #[serde(default)]
    fields: Vec<RawField>,
    #[serde(default)]
    methods: Vec<RawMethod>,
    #[serde(default)]
    tokens: Vec<RawToken>,
}

#[derive(Debug, Deserialize)]
struct RawType {
    #[serde(default)]
    namespace: String,
    name: String,
    kind: TypeKind,
    #[serde(default)]
    base: Option<TypeId>,
    #[serde(default)]
    interfaces: Vec<TypeId>,
    #[serde(default)]
    layout: StructLayout,
    #[serde(default)]
    fixed_buffer: bool,
    #[serde(default)]
    generic_arguments: Vec<TypeId>,
    #[serde(default)]
    explicit_impls: Vec<(MethodId, MethodId)>,
}

#[derive(Debug, Deserialize)]
struct RawField {
    name: String,
    declaring: TypeId,
    #[serde(rename = "type")]
    ty: TypeId,
    #[serde(default, rename = "static")]
    is_static: bool,
    #[serde(default)]
    thread_static: bool,
    #[serde(default)]
    literal: bool,
    #[serde(default)]
    offset: Option<u32>,
    #[serde(default)]
    initial_data: Option<Vec<u8>>,
}

#[derive(Debug, Deserialize)]
struct RawParameter {
    #[serde(default)]
    name: String,
    #[serde(rename = "type")]
    ty: TypeId,
    #[serde(default)]
    out: bool,
}

#[derive(Debug, Deserialize)]
struct RawBody {
    il: Vec<u8>,
    #[serde(default)]
    locals: Vec<TypeId>,
    #[serde(default = "enabled")]
    init_locals: bool,
    #[serde(default)]
    clauses: Vec<ExceptionClause>,
    #[serde(default)]
    tokens: Vec<RawToken>,
}

fn enabled() -> bool {
    true
}

#[derive(Debug, Deserialize)]
struct RawMethod {
    name: String,
    declaring: TypeId,
    #[serde(default)]
    reflected: Option<TypeId>,
    #[serde(default)]
    parameters: Vec<RawParameter>,
    #[serde(rename = "return")]
    return_type: TypeId,
    #[serde(default, rename = "static")]
    is_static: bool,
    #[serde(default, rename = "virtual")]
    is_virtual: bool,
    #[serde(default, rename = "abstract")]
    is_abstract: bool,
    #[serde(default, rename = "final")]
    is_final: bool,
    #[serde(default)]
    new_slot: bool,
    #[serde(default)]
    overrides: Option<MethodId>,
    #[serde(default)]
    generic_arity: u32,
    #[serde(default)]
    generic_definition: Option<MethodId>,
    #[serde(default)]
    generic_arguments: Vec<TypeId>,
    #[serde(default)]
    body: Option<RawBody>,
    #[serde(default)]
    pinvoke: Option<PInvoke>,
}

/// `{ "token": 100663297, "method": 4 }`
#[derive(Debug, Deserialize)]
struct RawToken {
    token: u32,
    #[serde(flatten)]
    target: Token,
}

fn token_table(raw: Vec<RawToken>) -> IndexMap<u32, Token> {
    raw.into_iter().map(|t| (t.token, t.target)).collect()
}

impl RawMetadata {
    fn into_metadata(self) -> Result<Metadata, MetadataError> {
        let mut types: Vec<TypeDef> = self.types.into_iter().map(RawType::into_def).collect();

        let mut fields = Vec::with_capacity(self.fields.len());
        for (i, raw) in self.fields.into_iter().enumerate() {
            let declaring = types
                .get_mut(raw.declaring.as_u32() as usize)
                .ok_or(MetadataError::Dangling {
                    what: "type",
                    index: raw.declaring.as_u32(),
                })?;
            declaring.fields.push(FieldId::from_raw(i as u32));
            fields.push(raw.into_def());
        }

        let mut methods = Vec::with_capacity(self.methods.len());
        for (i, raw) in self.methods.into_iter().enumerate() {
            // Reflected views and closed instantiations do not join the
            // declaring type's member list.
            if raw.reflected.is_none() && raw.generic_definition.is_none() {
                let declaring = types
                    .get_mut(raw.declaring.as_u32() as usize)
                    .ok_or(MetadataError::Dangling {
                        what: "type",
                        index: raw.declaring.as_u32(),
                    })?;
                declaring.methods.push(MethodId::from_raw(i as u32));
            }
            methods.push(raw.into_def());
        }

        Metadata::new(types, fields, methods, token_table(self.tokens))
    }
}

impl RawType {
    fn into_def(self) -> TypeDef {
        TypeDef {
            namespace: self.namespace,
            name: self.name,
            kind: self.kind,
            base: self.base,
            interfaces: self.interfaces,
            fields: Vec::new(),
            methods: Vec::new(),
            layout: self.layout,
            fixed_buffer: self.fixed_buffer,
            generic_arguments: self.generic_arguments,
            explicit_impls: self.explicit_impls,
        }
    }
}

impl RawField {
    fn into_def(self) -> FieldDef {
        FieldDef {
            name: self.name,
            declaring: self.declaring,
            ty: self.ty,
            is_static: self.is_static || self.thread_static,
            is_thread_static: self.thread_static,
            is_literal: self.literal,
            offset: self.offset,
            initial_data: self.initial_data,
        }
    }
}

impl RawMethod {
    fn into_def(self) -> MethodDef {
        MethodDef {
            name: self.name,
            declaring: self.declaring,
            reflected: self.reflected,
            parameters: self
                .parameters
                .into_iter()
                .map(|p| Parameter {
                    name: p.name,
                    ty: p.ty,
                    is_out: p.out,
                })
                .collect(),
            return_type: self.return_type,
            is_static: self.is_static,
            is_virtual: self.is_virtual || self.is_abstract,
            is_abstract: self.is_abstract,
            is_final: self.is_final,
            is_new_slot: self.new_slot,
            overrides: self.overrides,
            generic_arity: self.generic_arity,
            generic_definition: self.generic_definition,
            generic_arguments: self.generic_arguments,
            body: self.body.map(|b| MethodBody {
                il: b.il,
                locals: b.locals,
                init_locals: b.init_locals,
                clauses: b.clauses,
                tokens: token_table(b.tokens),
            }),
            pinvoke: self.pinvoke,
        }
    }
}
