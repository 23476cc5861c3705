//! Programmatic construction of metadata snapshots.

use std::collections::HashMap;

use indexmap::IndexMap;

use crate::error::MetadataError;
use crate::ids::{FieldId, MethodId, TypeId};
use crate::members::{FieldDef, MethodBody, MethodDef, Token};
use crate::metadata::Metadata;
use crate::types::{Primitive, TypeDef, TypeKind};

/// Token table prefixes, by entity kind.
const TYPE_TOKENS: u32 = 0x0200_0000;
const FIELD_TOKENS: u32 = 0x0400_0000;
const METHOD_TOKENS: u32 = 0x0600_0000;
const STRING_TOKENS: u32 = 0x7000_0000;

/// Handles of the seeded corlib.
#[derive(Debug, Clone, Copy)]
pub struct Corlib {
    pub object: TypeId,
    pub value_type: TypeId,
    pub enum_: TypeId,
    pub string: TypeId,
    pub array: TypeId,
    pub exception: TypeId,
    pub type_: TypeId,
    pub object_ctor: MethodId,
    pub object_finalize: MethodId,
    pub object_to_string: MethodId,
    pub exception_ctor: MethodId,
    primitives: [TypeId; Primitive::ALL.len()],
}

impl Corlib {
    pub fn primitive(&self, primitive: Primitive) -> TypeId {
        self.primitives[primitive as usize]
    }
}

/// Assembles a [`Metadata`] snapshot entity by entity.
///
/// `new()` seeds a minimal corlib: `System.Object` with its constructor and
/// `Finalize`/`ToString` slots, `System.ValueType`, `System.Enum`, every
/// primitive, `System.String`, `System.Array`, `System.Exception` and
/// `System.Type`.
pub struct MetadataBuilder {
    types: Vec<TypeDef>,
    fields: Vec<FieldDef>,
    methods: Vec<MethodDef>,
    tokens: IndexMap<u32, Token>,
    token_of: HashMap<Token, u32>,
    derived: HashMap<TypeKind, TypeId>,
    corlib: Corlib,
}

impl Default for MetadataBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl MetadataBuilder {
    pub fn new() -> Self {
        let placeholder = TypeId::from_raw(0);
        let mut b = Self {
            types: Vec::new(),
            fields: Vec::new(),
            methods: Vec::new(),
            tokens: IndexMap::new(),
            token_of: HashMap::new(),
            derived: HashMap::new(),
            corlib: Corlib {
                object: placeholder,
                value_type: placeholder,
                enum_: placeholder,
                string: placeholder,
                array: placeholder,
                exception: placeholder,
                type_: placeholder,
                object_ctor: MethodId::from_raw(0),
                object_finalize: MethodId::from_raw(0),
                object_to_string: MethodId::from_raw(0),
                exception_ctor: MethodId::from_raw(0),
                primitives: [placeholder; Primitive::ALL.len()],
            },
        };
        b.seed_corlib();
        b
    }

    fn seed_corlib(&mut self) {
        let object = self.add_type(TypeDef::new("System", "Object", TypeKind::Class));
        let value_type =
            self.add_type(TypeDef::new("System", "ValueType", TypeKind::Class).with_base(object));
        let enum_ =
            self.add_type(TypeDef::new("System", "Enum", TypeKind::Class).with_base(value_type));

        let mut primitives = [object; Primitive::ALL.len()];
        for p in Primitive::ALL {
            let name = p.full_name().trim_start_matches("System.");
            primitives[p as usize] =
                self.add_type(TypeDef::new("System", name, TypeKind::Primitive(p)).with_base(value_type));
        }
        let void = primitives[Primitive::Void as usize];
        let int32 = primitives[Primitive::I4 as usize];
        let char_ty = primitives[Primitive::Char as usize];

        let string = self.add_type(TypeDef::new("System", "String", TypeKind::Class).with_base(object));
        self.add_field(FieldDef::new(string, "_stringLength", int32));
        self.add_field(FieldDef::new(string, "_firstChar", char_ty));
        let array = self.add_type(TypeDef::new("System", "Array", TypeKind::Class).with_base(object));
        let exception =
            self.add_type(TypeDef::new("System", "Exception", TypeKind::Class).with_base(object));
        let type_ = self.add_type(TypeDef::new("System", "Type", TypeKind::Class).with_base(object));

        let ret = || MethodBody::new(vec![0x2a]);
        let object_ctor = self.add_method(MethodDef::new(object, ".ctor", void).with_body(ret()));
        let object_finalize =
            self.add_method(MethodDef::new(object, "Finalize", void).virtual_().with_body(ret()));
        let object_to_string =
            self.add_method(MethodDef::new(object, "ToString", string).virtual_());
        // ldarg.0; call Object::.ctor; ret
        let exception_ctor = self.add_method(MethodDef::new(exception, ".ctor", void));
        let token = self.method_token(object_ctor).to_le_bytes();
        let il = vec![0x02, 0x28, token[0], token[1], token[2], token[3], 0x2a];
        self.method_mut(exception_ctor).body = Some(MethodBody::new(il));

        self.corlib = Corlib {
            object,
            value_type,
            enum_,
            string,
            array,
            exception,
            type_,
            object_ctor,
            object_finalize,
            object_to_string,
            exception_ctor,
            primitives,
        };
    }

    pub fn corlib(&self) -> Corlib {
        self.corlib
    }

    pub fn primitive(&self, primitive: Primitive) -> TypeId {
        self.corlib.primitive(primitive)
    }

    pub fn add_type(&mut self, def: TypeDef) -> TypeId {
        let id = TypeId::from_raw(self.types.len() as u32);
        self.types.push(def);
        id
    }

    /// Reference type deriving from `System.Object`.
    pub fn class(&mut self, namespace: &str, name: &str) -> TypeId {
        let object = self.corlib.object;
        self.add_type(TypeDef::new(namespace, name, TypeKind::Class).with_base(object))
    }

    /// Value type deriving from `System.ValueType`.
    pub fn value_type(&mut self, namespace: &str, name: &str) -> TypeId {
        let value_type = self.corlib.value_type;
        self.add_type(TypeDef::new(namespace, name, TypeKind::Struct).with_base(value_type))
    }

    pub fn interface(&mut self, namespace: &str, name: &str) -> TypeId {
        self.add_type(TypeDef::new(namespace, name, TypeKind::Interface))
    }

    pub fn array_of(&mut self, element: TypeId, rank: u32) -> TypeId {
        let kind = TypeKind::Array { element, rank };
        if let Some(&id) = self.derived.get(&kind) {
            return id;
        }
        let source = &self.types[element.index()];
        let suffix = if rank == 1 {
            "[]".to_owned()
        } else {
            format!("[{}]", ",".repeat(rank as usize - 1))
        };
        let def = TypeDef::new(source.namespace.clone(), format!("{}{suffix}", source.name), kind)
            .with_base(self.corlib.array);
        let id = self.add_type(def);
        self.derived.insert(kind, id);
        id
    }

    pub fn pointer_to(&mut self, target: TypeId) -> TypeId {
        self.derive(target, "*", TypeKind::Pointer(target))
    }

    pub fn by_ref_to(&mut self, target: TypeId) -> TypeId {
        self.derive(target, "&", TypeKind::ByRef(target))
    }

    fn derive(&mut self, target: TypeId, suffix: &str, kind: TypeKind) -> TypeId {
        if let Some(&id) = self.derived.get(&kind) {
            return id;
        }
        let source = &self.types[target.index()];
        let def = TypeDef::new(source.namespace.clone(), format!("{}{suffix}", source.name), kind);
        let id = self.add_type(def);
        self.derived.insert(kind, id);
        id
    }

    pub fn add_field(&mut self, def: FieldDef) -> FieldId {
        let id = FieldId::from_raw(self.fields.len() as u32);
        self.types[def.declaring.index()].fields.push(id);
        self.fields.push(def);
        id
    }

    /// Reflected views and closed generic instantiations are stored but not
    /// listed as members of their declaring type.
    pub fn add_method(&mut self, def: MethodDef) -> MethodId {
        let id = MethodId::from_raw(self.methods.len() as u32);
        if def.reflected.is_none() && def.generic_definition.is_none() {
            self.types[def.declaring.index()].methods.push(id);
        }
        self.methods.push(def);
        id
    }

    pub fn type_mut(&mut self, id: TypeId) -> &mut TypeDef {
        &mut self.types[id.index()]
    }

    pub fn method_mut(&mut self, id: MethodId) -> &mut MethodDef {
        &mut self.methods[id.index()]
    }

    pub fn type_token(&mut self, id: TypeId) -> u32 {
        self.token(Token::Type(id), TYPE_TOKENS)
    }

    pub fn field_token(&mut self, id: FieldId) -> u32 {
        self.token(Token::Field(id), FIELD_TOKENS)
    }

    pub fn method_token(&mut self, id: MethodId) -> u32 {
        self.token(Token::Method(id), METHOD_TOKENS)
    }

    pub fn string_token(&mut self, value: &str) -> u32 {
        self.token(Token::String(value.to_owned()), STRING_TOKENS)
    }

    fn token(&mut self, target: Token, table: u32) -> u32 {
        if let Some(&token) = self.token_of.get(&target) {
            return token;
        }
        let row = self.tokens.keys().filter(|&&t| t & 0xff00_0000 == table).count() as u32;
        let token = table | (row + 1);
        self.tokens.insert(token, target.clone());
        self.token_of.insert(target, token);
        token
    }

    pub fn build(self) -> Result<Metadata, MetadataError> {
        Metadata::new(self.types, self.fields, self.methods, self.tokens)
    }
}
