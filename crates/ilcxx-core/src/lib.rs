#![cfg_attr(coverage_nightly, feature(coverage_attribute))]

//! Core data structures for ilcxx: the closed-world program metadata and
//! the CIL opcode table.
//!
//! Two layers:
//! - **Deserialization layer** (`raw`): 1:1 mapping to the JSON metadata
//!   document, cross references are plain indices.
//! - **Analysis layer** (`Metadata`): validated, ID-indexed arenas with
//!   name lookups, token resolution and on-demand derived types.

mod binary;
mod builder;
mod error;
mod ids;
mod members;
mod metadata;
pub mod opcode;
mod raw;
mod types;

#[cfg(test)]
mod binary_tests;
#[cfg(test)]
mod builder_tests;
#[cfg(test)]
mod opcode_tests;
#[cfg(test)]
mod raw_tests;

pub use builder::{Corlib, MetadataBuilder};
pub use error::{DecodeError, MetadataError};
pub use ids::{FieldId, MethodId, TypeId};
pub use members::{
    CharSet, ClauseKind, ExceptionClause, FieldDef, MethodBody, MethodDef, Parameter, PInvoke,
    Token,
};
pub use metadata::{Metadata, WellKnown};
pub use opcode::{Instruction, Opcode, Operand, OperandKind};
pub use types::{LayoutKind, Primitive, StructLayout, TypeDef, TypeKind};
