//! Fields, methods and method bodies.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::ids::{FieldId, MethodId, TypeId};

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct FieldDef {
    pub name: String,
    pub declaring: TypeId,
    pub ty: TypeId,
    pub is_static: bool,
    pub is_thread_static: bool,
    /// Compile-time constant; has no storage.
    pub is_literal: bool,
    /// Byte offset under explicit layout.
    pub offset: Option<u32>,
    /// Initial bytes of an RVA static (array initializer blobs).
    pub initial_data: Option<Vec<u8>>,
}

impl FieldDef {
    pub fn new(declaring: TypeId, name: impl Into<String>, ty: TypeId) -> Self {
        Self {
            name: name.into(),
            declaring,
            ty,
            is_static: false,
            is_thread_static: false,
            is_literal: false,
            offset: None,
            initial_data: None,
        }
    }

    pub fn at(mut self, offset: u32) -> Self {
        self.offset = Some(offset);
        self
    }

    pub fn static_(mut self) -> Self {
        self.is_static = true;
        self
    }

    pub fn thread_static(mut self) -> Self {
        self.is_static = true;
        self.is_thread_static = true;
        self
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Parameter {
    pub name: String,
    pub ty: TypeId,
    pub is_out: bool,
}

#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CharSet {
    #[default]
    Ansi,
    Unicode,
    Auto,
}

/// Foreign function import.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PInvoke {
    pub library: String,
    pub entry_point: String,
    #[serde(default)]
    pub char_set: CharSet,
    #[serde(default)]
    pub set_last_error: bool,
}

#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClauseKind {
    Catch(TypeId),
    /// Filter block starting at the given offset.
    Filter(u32),
    Finally,
    Fault,
}

#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug, Serialize, Deserialize)]
pub struct ExceptionClause {
    pub kind: ClauseKind,
    pub try_offset: u32,
    pub try_length: u32,
    pub handler_offset: u32,
    pub handler_length: u32,
}

impl ExceptionClause {
    pub fn try_end(&self) -> u32 {
        self.try_offset + self.try_length
    }

    pub fn handler_end(&self) -> u32 {
        self.handler_offset + self.handler_length
    }

    /// First offset of the handling code, including a filter block.
    pub fn handler_start(&self) -> u32 {
        match self.kind {
            ClauseKind::Filter(offset) => offset,
            _ => self.handler_offset,
        }
    }
}

/// Target of a metadata token.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Token {
    Type(TypeId),
    Field(FieldId),
    Method(MethodId),
    String(String),
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct MethodBody {
    pub il: Vec<u8>,
    pub locals: Vec<TypeId>,
    pub init_locals: bool,
    pub clauses: Vec<ExceptionClause>,
    /// Tokens resolved in this body's generic context. Consulted before
    /// the module-level table.
    pub tokens: IndexMap<u32, Token>,
}

impl MethodBody {
    pub fn new(il: Vec<u8>) -> Self {
        Self {
            il,
            init_locals: true,
            ..Self::default()
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct MethodDef {
    pub name: String,
    pub declaring: TypeId,
    /// The derived type this handle was obtained through, when it differs
    /// from the declaring type.
    pub reflected: Option<TypeId>,
    pub parameters: Vec<Parameter>,
    pub return_type: TypeId,
    pub is_static: bool,
    pub is_virtual: bool,
    pub is_abstract: bool,
    pub is_final: bool,
    pub is_new_slot: bool,
    /// Method this one overrides directly.
    pub overrides: Option<MethodId>,
    pub generic_arity: u32,
    /// Open definition of a closed generic instantiation.
    pub generic_definition: Option<MethodId>,
    pub generic_arguments: Vec<TypeId>,
    pub body: Option<MethodBody>,
    pub pinvoke: Option<PInvoke>,
}

impl MethodDef {
    pub fn new(declaring: TypeId, name: impl Into<String>, return_type: TypeId) -> Self {
        Self {
            name: name.into(),
            declaring,
            reflected: None,
            parameters: Vec::new(),
            return_type,
            is_static: false,
            is_virtual: false,
            is_abstract: false,
            is_final: false,
            is_new_slot: false,
            overrides: None,
            generic_arity: 0,
            generic_definition: None,
            generic_arguments: Vec::new(),
            body: None,
            pinvoke: None,
        }
    }

    pub fn static_(mut self) -> Self {
        self.is_static = true;
        self
    }

    pub fn virtual_(mut self) -> Self {
        self.is_virtual = true;
        self
    }

    pub fn abstract_(mut self) -> Self {
        self.is_virtual = true;
        self.is_abstract = true;
        self
    }

    pub fn overriding(mut self, base: MethodId) -> Self {
        self.is_virtual = true;
        self.overrides = Some(base);
        self
    }

    pub fn param(mut self, name: impl Into<String>, ty: TypeId) -> Self {
        self.parameters.push(Parameter {
            name: name.into(),
            ty,
            is_out: false,
        });
        self
    }

    pub fn out_param(mut self, name: impl Into<String>, ty: TypeId) -> Self {
        self.parameters.push(Parameter {
            name: name.into(),
            ty,
            is_out: true,
        });
        self
    }

    pub fn with_body(mut self, body: MethodBody) -> Self {
        self.body = Some(body);
        self
    }

    pub fn is_constructor(&self) -> bool {
        self.name == ".ctor"
    }

    pub fn is_type_initializer(&self) -> bool {
        self.is_static && self.name == ".cctor"
    }

    /// Open generic method definition (has arity, no arguments).
    pub fn is_generic_definition(&self) -> bool {
        self.generic_arity > 0 && self.generic_arguments.is_empty()
    }

    pub fn is_generic(&self) -> bool {
        self.generic_arity > 0
    }
}
