//! Hand-written overrides for intrinsic types and methods.
//!
//! The driver and code generator ask the provider first and fall back to
//! generic synthesis when it answers `None`.

use std::collections::HashMap;

use ilcxx_core::{MethodId, TypeId};

use crate::Result;
use crate::driver::Transpiler;

/// Member declarations supplied for a type.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Members {
    /// Text placed inside the struct body (inside `t_value` for value types).
    pub text: String,
    /// Instances hold references the collector must trace.
    pub managed: bool,
}

pub trait Builtin {
    /// Member layout of an intrinsic type.
    fn members(&self, transpiler: &mut Transpiler, ty: TypeId) -> Result<Option<Members>> {
        let _ = (transpiler, ty);
        Ok(None)
    }

    /// Statements run by the type's static holder before its type initializer.
    fn initialize(&self, transpiler: &mut Transpiler, ty: TypeId) -> Result<Option<String>> {
        let _ = (transpiler, ty);
        Ok(None)
    }

    /// Function body used instead of translating bytecode.
    ///
    /// A constructor with a builtin body returns the constructed value
    /// instead of receiving `this`.
    fn body(&self, transpiler: &mut Transpiler, method: MethodId) -> Result<Option<String>> {
        let _ = (transpiler, method);
        Ok(None)
    }
}

/// Provides nothing; everything is synthesized.
#[derive(Clone, Copy, Debug, Default)]
pub struct NoBuiltin;

impl Builtin for NoBuiltin {}

type MembersFn = Box<dyn Fn(&mut Transpiler, TypeId) -> Result<String>>;
type InitializeFn = Box<dyn Fn(&mut Transpiler, TypeId) -> Result<String>>;
type BodyFn = Box<dyn Fn(&mut Transpiler, MethodId) -> Result<String>>;

/// A [`Builtin`] keyed by type full name and method name.
#[derive(Default)]
pub struct BuiltinTable {
    members: HashMap<String, (bool, MembersFn)>,
    initializers: HashMap<String, InitializeFn>,
    bodies: HashMap<(String, String), BodyFn>,
}

impl BuiltinTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Supply the members of `ty` (a full name).
    pub fn members(
        mut self,
        ty: &str,
        managed: bool,
        f: impl Fn(&mut Transpiler, TypeId) -> Result<String> + 'static,
    ) -> Self {
        self.members.insert(ty.to_owned(), (managed, Box::new(f)));
        self
    }

    /// Supply static initialization statements for `ty`.
    pub fn initialize(
        mut self,
        ty: &str,
        f: impl Fn(&mut Transpiler, TypeId) -> Result<String> + 'static,
    ) -> Self {
        self.initializers.insert(ty.to_owned(), Box::new(f));
        self
    }

    /// Supply the body of every overload named `method` on `ty`.
    pub fn body(
        mut self,
        ty: &str,
        method: &str,
        f: impl Fn(&mut Transpiler, MethodId) -> Result<String> + 'static,
    ) -> Self {
        self.bodies
            .insert((ty.to_owned(), method.to_owned()), Box::new(f));
        self
    }
}

impl Builtin for BuiltinTable {
    fn members(&self, transpiler: &mut Transpiler, ty: TypeId) -> Result<Option<Members>> {
        let name = transpiler.metadata().ty(ty).full_name();
        let Some((managed, f)) = self.members.get(&name) else {
            return Ok(None);
        };
        Ok(Some(Members {
            text: f(transpiler, ty)?,
            managed: *managed,
        }))
    }

    fn initialize(&self, transpiler: &mut Transpiler, ty: TypeId) -> Result<Option<String>> {
        let name = transpiler.metadata().ty(ty).full_name();
        self.initializers
            .get(&name)
            .map(|f| f(transpiler, ty))
            .transpose()
    }

    fn body(&self, transpiler: &mut Transpiler, method: MethodId) -> Result<Option<String>> {
        let def = transpiler.metadata().method(method);
        let key = (
            transpiler.metadata().ty(def.declaring).full_name(),
            def.name.clone(),
        );
        self.bodies
            .get(&key)
            .map(|f| f(transpiler, method))
            .transpose()
    }
}
