//! Analysis layer: validated, ID-indexed metadata.

use std::collections::HashMap;

use indexmap::IndexMap;

use crate::error::MetadataError;
use crate::ids::{FieldId, MethodId, TypeId};
use crate::members::{ClauseKind, FieldDef, MethodDef, Token};
use crate::types::{Primitive, TypeDef, TypeKind};

type Result<T> = std::result::Result<T, MetadataError>;

/// Corlib types every translation depends on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WellKnown {
    pub object: TypeId,
    pub value_type: TypeId,
    pub enum_: TypeId,
    pub string: TypeId,
    pub array: TypeId,
    pub exception: TypeId,
    primitives: [TypeId; Primitive::ALL.len()],
}

impl WellKnown {
    pub fn primitive(&self, primitive: Primitive) -> TypeId {
        self.primitives[primitive as usize]
    }
}

/// A closed-world program snapshot.
///
/// Derived types (`T*`, `T&`, `T[]`) can be added after construction; every
/// other entity is fixed.
#[derive(Debug, Clone)]
pub struct Metadata {
    pub(crate) types: Vec<TypeDef>,
    pub(crate) fields: Vec<FieldDef>,
    pub(crate) methods: Vec<MethodDef>,
    pub(crate) tokens: IndexMap<u32, Token>,
    well_known: WellKnown,
    by_name: HashMap<String, TypeId>,
    pointers: HashMap<TypeId, TypeId>,
    by_refs: HashMap<TypeId, TypeId>,
    arrays: HashMap<(TypeId, u32), TypeId>,
    instantiations: HashMap<(MethodId, Vec<TypeId>), MethodId>,
}

impl Metadata {
    /// Validate every cross reference and build the lookup tables.
    pub fn new(
        types: Vec<TypeDef>,
        fields: Vec<FieldDef>,
        methods: Vec<MethodDef>,
        tokens: IndexMap<u32, Token>,
    ) -> Result<Self> {
        validate(&types, &fields, &methods, &tokens)?;

        let mut by_name = HashMap::new();
        let mut pointers = HashMap::new();
        let mut by_refs = HashMap::new();
        let mut arrays = HashMap::new();
        for (i, ty) in types.iter().enumerate() {
            let id = TypeId::from_raw(i as u32);
            by_name.entry(ty.full_name()).or_insert(id);
            match ty.kind {
                TypeKind::Pointer(target) => {
                    pointers.entry(target).or_insert(id);
                }
                TypeKind::ByRef(target) => {
                    by_refs.entry(target).or_insert(id);
                }
                TypeKind::Array { element, rank } => {
                    arrays.entry((element, rank)).or_insert(id);
                }
                _ => {}
            }
        }

        let mut instantiations = HashMap::new();
        for (i, method) in methods.iter().enumerate() {
            if let Some(definition) = method.generic_definition {
                instantiations
                    .entry((definition, method.generic_arguments.clone()))
                    .or_insert(MethodId::from_raw(i as u32));
            }
        }

        let well_known = resolve_well_known(&by_name)?;
        Ok(Self {
            types,
            fields,
            methods,
            tokens,
            well_known,
            by_name,
            pointers,
            by_refs,
            arrays,
            instantiations,
        })
    }

    pub fn well_known(&self) -> &WellKnown {
        &self.well_known
    }

    pub fn primitive(&self, primitive: Primitive) -> TypeId {
        self.well_known.primitive(primitive)
    }

    pub fn ty(&self, id: TypeId) -> &TypeDef {
        &self.types[id.index()]
    }

    pub fn field(&self, id: FieldId) -> &FieldDef {
        &self.fields[id.index()]
    }

    pub fn method(&self, id: MethodId) -> &MethodDef {
        &self.methods[id.index()]
    }

    pub fn type_count(&self) -> usize {
        self.types.len()
    }

    pub fn method_count(&self) -> usize {
        self.methods.len()
    }

    pub fn type_ids(&self) -> impl Iterator<Item = TypeId> + use<> {
        (0..self.types.len() as u32).map(TypeId::from_raw)
    }

    pub fn method_ids(&self) -> impl Iterator<Item = MethodId> + use<> {
        (0..self.methods.len() as u32).map(MethodId::from_raw)
    }

    pub fn find_type(&self, full_name: &str) -> Option<TypeId> {
        self.by_name.get(full_name).copied()
    }

    pub fn find_method(&self, ty: TypeId, name: &str) -> Option<MethodId> {
        self.ty(ty)
            .methods
            .iter()
            .copied()
            .find(|&m| self.method(m).name == name)
    }

    pub fn find_field(&self, ty: TypeId, name: &str) -> Option<FieldId> {
        self.ty(ty)
            .fields
            .iter()
            .copied()
            .find(|&f| self.field(f).name == name)
    }

    pub fn require_method(&self, ty: TypeId, name: &str) -> Result<MethodId> {
        self.find_method(ty, name)
            .ok_or_else(|| self.member_not_found(ty, name))
    }

    pub fn require_field(&self, ty: TypeId, name: &str) -> Result<FieldId> {
        self.find_field(ty, name)
            .ok_or_else(|| self.member_not_found(ty, name))
    }

    fn member_not_found(&self, ty: TypeId, member: &str) -> MetadataError {
        MetadataError::MemberNotFound {
            ty: self.ty(ty).full_name(),
            member: member.to_owned(),
        }
    }

    /// Static constructor of a type.
    pub fn type_initializer(&self, ty: TypeId) -> Option<MethodId> {
        self.ty(ty)
            .methods
            .iter()
            .copied()
            .find(|&m| self.method(m).is_type_initializer())
    }

    /// Strict subclass test along the base chain.
    pub fn is_subclass_of(&self, ty: TypeId, ancestor: TypeId) -> bool {
        let mut current = self.ty(ty).base;
        while let Some(base) = current {
            if base == ancestor {
                return true;
            }
            current = self.ty(base).base;
        }
        false
    }

    /// Root of the override chain: the method that introduced the slot.
    pub fn base_definition(&self, method: MethodId) -> MethodId {
        let mut current = method;
        while let Some(base) = self.method(current).overrides {
            current = base;
        }
        current
    }

    /// Same parameter types, return type and generic arity.
    pub fn signature_eq(&self, a: MethodId, b: MethodId) -> bool {
        let (a, b) = (self.method(a), self.method(b));
        a.return_type == b.return_type
            && a.generic_arity == b.generic_arity
            && a.parameters.len() == b.parameters.len()
            && a.parameters.iter().zip(&b.parameters).all(|(x, y)| x.ty == y.ty)
    }

    /// Closed instantiation of a generic method definition.
    pub fn instantiate(&self, definition: MethodId, arguments: &[TypeId]) -> Result<MethodId> {
        if let Some(&id) = self.instantiations.get(&(definition, arguments.to_vec())) {
            return Ok(id);
        }
        Err(MetadataError::MissingInstantiation {
            method: self.method_name(definition),
            arguments: arguments
                .iter()
                .map(|&t| self.ty(t).full_name())
                .collect::<Vec<_>>()
                .join(", "),
        })
    }

    pub fn resolve_token(&self, method: MethodId, token: u32) -> Result<&Token> {
        self.method(method)
            .body
            .as_ref()
            .and_then(|body| body.tokens.get(&token))
            .or_else(|| self.tokens.get(&token))
            .ok_or(MetadataError::UnknownToken(token))
    }

    pub fn resolve_type(&self, method: MethodId, token: u32) -> Result<TypeId> {
        match self.resolve_token(method, token)? {
            Token::Type(t) => Ok(*t),
            _ => Err(MetadataError::TokenKind {
                token,
                expected: "type",
            }),
        }
    }

    pub fn resolve_field(&self, method: MethodId, token: u32) -> Result<FieldId> {
        match self.resolve_token(method, token)? {
            Token::Field(f) => Ok(*f),
            _ => Err(MetadataError::TokenKind {
                token,
                expected: "field",
            }),
        }
    }

    pub fn resolve_method(&self, method: MethodId, token: u32) -> Result<MethodId> {
        match self.resolve_token(method, token)? {
            Token::Method(m) => Ok(*m),
            _ => Err(MetadataError::TokenKind {
                token,
                expected: "method",
            }),
        }
    }

    pub fn resolve_string(&self, method: MethodId, token: u32) -> Result<&str> {
        match self.resolve_token(method, token)? {
            Token::String(s) => Ok(s),
            _ => Err(MetadataError::TokenKind {
                token,
                expected: "string",
            }),
        }
    }

    pub fn pointer_to(&mut self, target: TypeId) -> TypeId {
        if let Some(&id) = self.pointers.get(&target) {
            return id;
        }
        let id = self.push_derived(target, "*", TypeKind::Pointer(target));
        self.pointers.insert(target, id);
        id
    }

    pub fn by_ref_to(&mut self, target: TypeId) -> TypeId {
        if let Some(&id) = self.by_refs.get(&target) {
            return id;
        }
        let id = self.push_derived(target, "&", TypeKind::ByRef(target));
        self.by_refs.insert(target, id);
        id
    }

    pub fn array_of(&mut self, element: TypeId, rank: u32) -> TypeId {
        if let Some(&id) = self.arrays.get(&(element, rank)) {
            return id;
        }
        let suffix = if rank == 1 {
            "[]".to_owned()
        } else {
            format!("[{}]", ",".repeat(rank as usize - 1))
        };
        let id = self.push_derived(element, &suffix, TypeKind::Array { element, rank });
        self.types[id.index()].base = Some(self.well_known.array);
        self.arrays.insert((element, rank), id);
        id
    }

    fn push_derived(&mut self, target: TypeId, suffix: &str, kind: TypeKind) -> TypeId {
        let source = self.ty(target);
        let def = TypeDef::new(source.namespace.clone(), format!("{}{suffix}", source.name), kind);
        let id = TypeId::from_raw(self.types.len() as u32);
        self.by_name.entry(def.full_name()).or_insert(id);
        self.types.push(def);
        id
    }

    /// `Namespace.Type::Name(Param, ...)` for diagnostics and comments.
    pub fn method_name(&self, method: MethodId) -> String {
        let def = self.method(method);
        let mut name = format!("{}::{}", self.ty(def.declaring).full_name(), def.name);
        if !def.generic_arguments.is_empty() {
            let arguments: Vec<_> = def
                .generic_arguments
                .iter()
                .map(|&t| self.ty(t).full_name())
                .collect();
            name.push_str(&format!("<{}>", arguments.join(", ")));
        }
        let parameters: Vec<_> = def
            .parameters
            .iter()
            .map(|p| self.ty(p.ty).full_name())
            .collect();
        name.push_str(&format!("({})", parameters.join(", ")));
        name
    }
}

fn resolve_well_known(by_name: &HashMap<String, TypeId>) -> Result<WellKnown> {
    let find = |name: &str| {
        by_name
            .get(name)
            .copied()
            .ok_or_else(|| MetadataError::MissingWellKnown(name.to_owned()))
    };
    let object = find("System.Object")?;
    let value_type = find("System.ValueType")?;
    let enum_ = find("System.Enum")?;
    let string = find("System.String")?;
    let array = find("System.Array")?;
    let exception = find("System.Exception")?;
    let mut primitives = [object; Primitive::ALL.len()];
    for p in Primitive::ALL {
        primitives[p as usize] = find(p.full_name())?;
    }
    Ok(WellKnown {
        object,
        value_type,
        enum_,
        string,
        array,
        exception,
        primitives,
    })
}

fn validate(
    types: &[TypeDef],
    fields: &[FieldDef],
    methods: &[MethodDef],
    tokens: &IndexMap<u32, Token>,
) -> Result<()> {
    let ty = |id: TypeId| check("type", id.as_u32(), types.len());
    let field = |id: FieldId| check("field", id.as_u32(), fields.len());
    let method = |id: MethodId| check("method", id.as_u32(), methods.len());
    let token = |t: &Token| match t {
        Token::Type(id) => ty(*id),
        Token::Field(id) => field(*id),
        Token::Method(id) => method(*id),
        Token::String(_) => Ok(()),
    };

    for def in types {
        match def.kind {
            TypeKind::Array { element: t, .. } | TypeKind::Pointer(t) | TypeKind::ByRef(t) => ty(t)?,
            _ => {}
        }
        def.base.map(ty).transpose()?;
        def.interfaces.iter().copied().try_for_each(ty)?;
        def.generic_arguments.iter().copied().try_for_each(ty)?;
        def.fields.iter().copied().try_for_each(field)?;
        def.methods.iter().copied().try_for_each(method)?;
        for &(declaration, body) in &def.explicit_impls {
            method(declaration)?;
            method(body)?;
        }
    }
    for def in fields {
        ty(def.declaring)?;
        ty(def.ty)?;
    }
    for def in methods {
        ty(def.declaring)?;
        ty(def.return_type)?;
        def.reflected.map(ty).transpose()?;
        def.overrides.map(method).transpose()?;
        def.generic_definition.map(method).transpose()?;
        def.generic_arguments.iter().copied().try_for_each(ty)?;
        def.parameters.iter().try_for_each(|p| ty(p.ty))?;
        if let Some(body) = &def.body {
            body.locals.iter().copied().try_for_each(ty)?;
            body.tokens.values().try_for_each(token)?;
            for clause in &body.clauses {
                if let ClauseKind::Catch(t) = clause.kind {
                    ty(t)?;
                }
            }
        }
    }
    tokens.values().try_for_each(token)
}

fn check(what: &'static str, index: u32, len: usize) -> Result<()> {
    if (index as usize) < len {
        Ok(())
    } else {
        Err(MetadataError::Dangling { what, index })
    }
}
