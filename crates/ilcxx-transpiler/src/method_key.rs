//! Canonical method identity.
//!
//! A method can be reached through several handles: the declaring type's
//! own definition, or a view reflected through a derived type. Every table
//! keyed by "this method" (visited set, identifiers, generic instantiation
//! indices, slot indices) uses [`MethodKey`] instead of the raw handle.

use ilcxx_core::{Metadata, MetadataError, MethodId, TypeId, TypeKind};

/// Pseudo-method synthesized for multi-dimensional arrays.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ArrayOp {
    Get,
    Set,
    Address,
}

impl ArrayOp {
    fn from_name(name: &str) -> Option<Self> {
        match name {
            "Get" => Some(Self::Get),
            "Set" => Some(Self::Set),
            "Address" => Some(Self::Address),
            _ => None,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum MethodKey {
    Method(MethodId),
    /// Array accessors compare by (array type, operation) only.
    ArrayAccessor { array: TypeId, op: ArrayOp },
}

impl MethodKey {
    /// Normalize a method handle to its slot identity.
    pub fn of(metadata: &Metadata, method: MethodId) -> Result<Self, MetadataError> {
        let def = metadata.method(method);
        let declaring = metadata.ty(def.declaring);
        if matches!(declaring.kind, TypeKind::Array { .. })
            && let Some(op) = ArrayOp::from_name(&def.name)
        {
            return Ok(Self::ArrayAccessor {
                array: def.declaring,
                op,
            });
        }
        match def.reflected {
            Some(reflected) if reflected != def.declaring => {
                Ok(Self::Method(declared_counterpart(metadata, method)?))
            }
            _ => Ok(Self::Method(method)),
        }
    }

    /// The canonical handle, `None` for array accessors.
    pub fn method(self) -> Option<MethodId> {
        match self {
            Self::Method(m) => Some(m),
            Self::ArrayAccessor { .. } => None,
        }
    }
}

/// The instance method on the declaring type that a reflected view denotes.
fn declared_counterpart(metadata: &Metadata, view: MethodId) -> Result<MethodId, MetadataError> {
    let def = metadata.method(view);
    metadata
        .ty(def.declaring)
        .methods
        .iter()
        .copied()
        .find(|&m| {
            let candidate = metadata.method(m);
            candidate.name == def.name
                && !candidate.is_static
                && candidate.generic_arity == def.generic_arity
                && candidate.parameters.len() == def.parameters.len()
                && candidate
                    .parameters
                    .iter()
                    .zip(&def.parameters)
                    .all(|(a, b)| a.ty == b.ty)
        })
        .ok_or_else(|| MetadataError::MemberNotFound {
            ty: metadata.ty(def.declaring).full_name(),
            member: def.name.clone(),
        })
}
