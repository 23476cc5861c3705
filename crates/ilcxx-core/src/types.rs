//! Type definitions of the analysis layer.

use serde::{Deserialize, Serialize};

use crate::ids::{FieldId, MethodId, TypeId};

/// Built-in scalar kinds of the virtual machine.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Debug, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Primitive {
    Void,
    Boolean,
    Char,
    I1,
    U1,
    I2,
    U2,
    I4,
    U4,
    I8,
    U8,
    /// Native-width signed integer.
    I,
    /// Native-width unsigned integer.
    U,
    R4,
    R8,
}

impl Primitive {
    pub const ALL: [Primitive; 15] = [
        Self::Void,
        Self::Boolean,
        Self::Char,
        Self::I1,
        Self::U1,
        Self::I2,
        Self::U2,
        Self::I4,
        Self::U4,
        Self::I8,
        Self::U8,
        Self::I,
        Self::U,
        Self::R4,
        Self::R8,
    ];

    /// Size in bytes for a target with the given pointer width.
    pub fn size(self, pointer_size: u32) -> u32 {
        match self {
            Self::Void => 0,
            Self::Boolean | Self::I1 | Self::U1 => 1,
            Self::Char | Self::I2 | Self::U2 => 2,
            Self::I4 | Self::U4 | Self::R4 => 4,
            Self::I8 | Self::U8 | Self::R8 => 8,
            Self::I | Self::U => pointer_size,
        }
    }

    pub fn is_unsigned(self) -> bool {
        matches!(
            self,
            Self::Boolean | Self::Char | Self::U1 | Self::U2 | Self::U4 | Self::U8 | Self::U
        )
    }

    pub fn is_float(self) -> bool {
        matches!(self, Self::R4 | Self::R8)
    }

    /// Corlib full name of the primitive.
    pub fn full_name(self) -> &'static str {
        match self {
            Self::Void => "System.Void",
            Self::Boolean => "System.Boolean",
            Self::Char => "System.Char",
            Self::I1 => "System.SByte",
            Self::U1 => "System.Byte",
            Self::I2 => "System.Int16",
            Self::U2 => "System.UInt16",
            Self::I4 => "System.Int32",
            Self::U4 => "System.UInt32",
            Self::I8 => "System.Int64",
            Self::U8 => "System.UInt64",
            Self::I => "System.IntPtr",
            Self::U => "System.UIntPtr",
            Self::R4 => "System.Single",
            Self::R8 => "System.Double",
        }
    }
}

/// Shape of a type.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TypeKind {
    Primitive(Primitive),
    Class,
    Struct,
    Interface,
    /// Enumeration with its underlying integer primitive.
    Enum(Primitive),
    Array {
        element: TypeId,
        rank: u32,
    },
    Pointer(TypeId),
    ByRef(TypeId),
    /// Unsubstituted generic parameter. Never laid out.
    GenericParameter(u32),
}

#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LayoutKind {
    #[default]
    Auto,
    Sequential,
    Explicit,
}

/// Declared layout of a struct or class.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct StructLayout {
    pub kind: LayoutKind,
    /// Packing in bytes, 0 for the platform default.
    pub pack: u32,
    /// Declared total size in bytes, 0 when computed from the fields.
    pub size: u32,
}

/// A closed-world type.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TypeDef {
    pub namespace: String,
    pub name: String,
    pub kind: TypeKind,
    pub base: Option<TypeId>,
    /// All implemented interfaces, including inherited ones.
    pub interfaces: Vec<TypeId>,
    pub fields: Vec<FieldId>,
    pub methods: Vec<MethodId>,
    pub layout: StructLayout,
    /// Inline fixed-size buffer (`fixed` fields and static array init blobs).
    pub fixed_buffer: bool,
    /// Type arguments of a closed generic instantiation.
    pub generic_arguments: Vec<TypeId>,
    /// Explicit interface implementations as (interface method, body).
    pub explicit_impls: Vec<(MethodId, MethodId)>,
}

impl TypeDef {
    pub fn new(namespace: impl Into<String>, name: impl Into<String>, kind: TypeKind) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
            kind,
            base: None,
            interfaces: Vec::new(),
            fields: Vec::new(),
            methods: Vec::new(),
            layout: StructLayout::default(),
            fixed_buffer: false,
            generic_arguments: Vec::new(),
            explicit_impls: Vec::new(),
        }
    }

    pub fn with_base(mut self, base: TypeId) -> Self {
        self.base = Some(base);
        self
    }

    pub fn with_interfaces(mut self, interfaces: impl IntoIterator<Item = TypeId>) -> Self {
        self.interfaces.extend(interfaces);
        self
    }

    pub fn with_layout(mut self, layout: StructLayout) -> Self {
        self.layout = layout;
        self
    }

    pub fn full_name(&self) -> String {
        if self.namespace.is_empty() {
            self.name.clone()
        } else {
            format!("{}.{}", self.namespace, self.name)
        }
    }

    pub fn is_value_type(&self) -> bool {
        matches!(
            self.kind,
            TypeKind::Primitive(_) | TypeKind::Struct | TypeKind::Enum(_)
        )
    }

    pub fn is_interface(&self) -> bool {
        self.kind == TypeKind::Interface
    }

    pub fn is_enum(&self) -> bool {
        matches!(self.kind, TypeKind::Enum(_))
    }

    pub fn is_array(&self) -> bool {
        matches!(self.kind, TypeKind::Array { .. })
    }

    /// Pointer or managed reference (`T*`, `T&`).
    pub fn is_pointer_like(&self) -> bool {
        matches!(self.kind, TypeKind::Pointer(_) | TypeKind::ByRef(_))
    }

    pub fn is_generic_instance(&self) -> bool {
        !self.generic_arguments.is_empty()
    }

    /// Primitive kind, looking through enums to their underlying type.
    pub fn primitive(&self) -> Option<Primitive> {
        match self.kind {
            TypeKind::Primitive(p) | TypeKind::Enum(p) => Some(p),
            _ => None,
        }
    }

    /// Element type of arrays, pointers and references.
    pub fn element(&self) -> Option<TypeId> {
        match self.kind {
            TypeKind::Array { element, .. } | TypeKind::Pointer(element) | TypeKind::ByRef(element) => {
                Some(element)
            }
            _ => None,
        }
    }
}
