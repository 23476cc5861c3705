//! C++ identifiers for types, methods and fields.
//!
//! Identifiers are derived from metadata names by escaping every character
//! outside `[0-9A-Za-z]`: `_{xx}` below U+0100, `_u{xxxx}` in the rest of the
//! BMP and `_U{xxxxxxxx}` above it. Every escape has a fixed width after its
//! marker, so distinct names never collide after escaping. Handles that still collide (distinct types sharing a full
//! name, overloads) get a `__{n}` suffix in first-use order.

use std::collections::{HashMap, HashSet};
use std::fmt::Write;
use std::sync::LazyLock;

use ilcxx_core::{FieldId, MethodId, Primitive, TypeId, TypeKind};
use regex_automata::meta::Regex;

use crate::Result;
use crate::driver::Transpiler;
use crate::method_key::MethodKey;

static UNSAFE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[^0-9A-Za-z]+").expect("identifier escape pattern is valid"));

/// Escape a metadata name into the identifier alphabet `[A-Za-z0-9_]`.
pub fn escape(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    let mut last = 0;
    for m in UNSAFE.find_iter(name) {
        out.push_str(&name[last..m.start()]);
        for c in name[m.range()].chars() {
            let _ = match c as u32 {
                code @ ..0x100 => write!(out, "_{code:02x}"),
                code @ ..0x10000 => write!(out, "_u{code:04x}"),
                code => write!(out, "_U{code:08x}"),
            };
        }
        last = m.end();
    }
    out.push_str(&name[last..]);
    out
}

/// Function returning the address of a static field.
pub(crate) fn field_thunk(type_ident: &str, field_name: &str) -> String {
    format!("f__field_{type_ident}__{}", escape(field_name))
}

/// Types provided by the runtime headers instead of being generated.
pub(crate) fn builtin_alias(full_name: &str) -> Option<&'static str> {
    match full_name {
        "System.Object" => Some("t_object"),
        "System.Reflection.MemberInfo" => Some("t__member_info"),
        "System.Type" => Some("t__type"),
        _ => None,
    }
}

pub(crate) fn cxx_primitive(primitive: Primitive) -> &'static str {
    match primitive {
        Primitive::Void => "void",
        Primitive::Boolean => "bool",
        Primitive::Char => "char16_t",
        Primitive::I1 => "int8_t",
        Primitive::U1 => "uint8_t",
        Primitive::I2 => "int16_t",
        Primitive::U2 => "uint16_t",
        Primitive::I4 => "int32_t",
        Primitive::U4 => "uint32_t",
        Primitive::I8 => "int64_t",
        Primitive::U8 => "uint64_t",
        Primitive::I => "intptr_t",
        Primitive::U => "uintptr_t",
        Primitive::R4 => "float",
        Primitive::R8 => "double",
    }
}

/// Assigned identifiers. The method table doubles as the set of methods
/// that generated code refers to.
#[derive(Default)]
pub(crate) struct Naming {
    types: HashMap<TypeId, String>,
    type_idents: HashSet<String>,
    methods: HashMap<MethodKey, String>,
    method_idents: HashSet<(TypeId, String)>,
}

impl Naming {
    pub(crate) fn is_named(&self, key: &MethodKey) -> bool {
        self.methods.contains_key(key)
    }
}

impl Transpiler {
    /// Identifier of a type without defining or queueing it.
    pub(crate) fn type_ident(&mut self, ty: TypeId) -> String {
        if let Some(name) = self.naming.types.get(&ty) {
            return name.clone();
        }
        let escaped = format!("t_{}", escape(&self.metadata.ty(ty).full_name()));
        let mut name = escaped.clone();
        let mut i = 0;
        while !self.naming.type_idents.insert(name.clone()) {
            name = format!("{escaped}__{i}");
            i += 1;
        }
        self.naming.types.insert(ty, name.clone());
        name
    }

    /// Identifier of a type as used in generated code.
    ///
    /// Value types are defined immediately since their size is needed
    /// wherever they appear; every other type is queued.
    pub fn escape_type(&mut self, ty: TypeId) -> Result<String> {
        let def = self.metadata.ty(ty);
        let kind = def.kind;
        if def.is_value_type() {
            self.define(ty)?;
        } else {
            self.queued_types.push_back(ty);
            match kind {
                TypeKind::Array { element, .. } => {
                    self.escape_type(element)?;
                }
                TypeKind::ByRef(element) => return Ok(format!("{}&", self.escape_type(element)?)),
                TypeKind::Pointer(element) => return Ok(format!("{}*", self.escape_type(element)?)),
                _ => {}
            }
        }
        Ok(self.type_ident(ty))
    }

    /// Storage type of a field or array element.
    pub fn variable_type(&mut self, ty: TypeId) -> Result<String> {
        let object = self.metadata.well_known().object;
        Ok(match self.metadata.ty(ty).kind {
            TypeKind::Pointer(element) | TypeKind::ByRef(element) => {
                format!("{}*", self.variable_type(element)?)
            }
            TypeKind::Interface => self.variable_type(object)?,
            TypeKind::Primitive(p) | TypeKind::Enum(p) => cxx_primitive(p).to_owned(),
            TypeKind::Struct => format!("{}::t_value", self.escape_type(ty)?),
            _ => format!("t_slot_of<{}>", self.escape_type(ty)?),
        })
    }

    /// Type of a local, parameter or static: references are scoped roots.
    pub fn scoped_type(&mut self, ty: TypeId) -> Result<String> {
        let object = self.metadata.well_known().object;
        Ok(match self.metadata.ty(ty).kind {
            TypeKind::Pointer(element) | TypeKind::ByRef(element) => {
                format!("{}*", self.variable_type(element)?)
            }
            TypeKind::Interface => self.scoped_type(object)?,
            TypeKind::Primitive(p) | TypeKind::Enum(p) => cxx_primitive(p).to_owned(),
            TypeKind::Struct => format!("t_scoped<{}::t_value>", self.escape_type(ty)?),
            _ => format!("t_scoped<t_slot_of<{}>>", self.escape_type(ty)?),
        })
    }

    pub fn field_ident(&self, field: FieldId) -> String {
        format!("v_{}", escape(&self.metadata.field(field).name))
    }

    /// Identifier of a method, marking it as referenced.
    pub fn method_ident(&mut self, method: MethodId) -> Result<String> {
        let key = MethodKey::of(&self.metadata, method)?;
        if let Some(name) = self.naming.methods.get(&key) {
            return Ok(name.clone());
        }
        let def = self.metadata.method(method);
        let declaring = def.declaring;
        let method_name = escape(&def.name);
        let escaped = format!("f_{}__{method_name}", self.type_ident(declaring));
        let mut name = escaped.clone();
        let mut i = 0;
        while !self.naming.method_idents.insert((declaring, name.clone())) {
            name = format!("{escaped}__{i}");
            i += 1;
        }
        self.naming.methods.insert(key, name.clone());
        Ok(name)
    }
}
