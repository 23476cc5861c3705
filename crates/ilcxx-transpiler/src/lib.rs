//! ilcxx transpiler: closed-world CIL to C++.
//!
//! The pipeline for one run:
//! - `driver` - work lists of pending types and methods, drained to a fixpoint
//! - `layout` / `definition` - per-type slot tables, field layout and declarations
//! - `estimate` - operand-stack types and storage variables per IL offset
//! - `codegen` - per-opcode C++ statements from the cached stacks
//! - `runtime_type` - runtime type descriptors (v-tables, interface tables)
//! - `unit` - assembly of the translation unit and its split form
//!
//! Intrinsic types and runtime-provided methods are supplied through the
//! [`Builtin`] trait.

#![cfg_attr(coverage_nightly, feature(coverage_attribute))]

mod builtin;
mod codegen;
mod config;
mod definition;
mod driver;
mod estimate;
mod layout;
mod method_key;
mod naming;
mod pinvoke;
mod runtime_type;
mod stack;
mod unit;

#[cfg(test)]
mod codegen_tests;
#[cfg(test)]
mod layout_tests;
#[cfg(test)]
mod stack_tests;
#[cfg(test)]
pub mod test_utils;

pub use builtin::{Builtin, BuiltinTable, Members, NoBuiltin};
pub use config::{Config, ReflectPredicate, Target};
pub use driver::Transpiler;
pub use layout::{DefinitionKind, FieldSlot, Layout};
pub use method_key::{ArrayOp, MethodKey};
pub use naming::escape;
pub use stack::{Slot, Stack};
pub use unit::{Partition, TranslationUnit};

use ilcxx_core::{DecodeError, MetadataError};

/// Errors that abort a translation. There is no partial output.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error(transparent)]
    Metadata(#[from] MetadataError),

    #[error(transparent)]
    Decode(#[from] DecodeError),

    /// Two paths reach one offset with different storage-variable types.
    #[error("{method}: IL_{offset:04x}: stack shape mismatch, recorded [{expected}] but reached with [{found}]")]
    StackMismatch {
        method: String,
        offset: usize,
        expected: String,
        found: String,
    },

    #[error("{method}: IL_{offset:04x}: unsupported opcode `{opcode}`")]
    UnsupportedOpcode {
        method: String,
        offset: usize,
        opcode: &'static str,
    },

    #[error("cannot lay out open generic parameter `{0}`")]
    OpenGenericLayout(String),

    /// A layout was needed while it was still being built.
    #[error("layout of `{0}` depends on itself")]
    CyclicLayout(String),

    #[error("{method}: IL_{offset:04x}: {detail}")]
    InvalidOperands {
        method: String,
        offset: usize,
        detail: String,
    },

    #[error("{method}: IL_{offset:04x}: evaluation stack underflow")]
    StackUnderflow { method: String, offset: usize },

    #[error("`{0}` has no body and no builtin provides one")]
    MissingBuiltin(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
