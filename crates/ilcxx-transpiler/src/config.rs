//! Translation settings.

use std::fmt;
use std::sync::Arc;

use ilcxx_core::{MethodId, TypeDef, TypeId};

/// Platform the generated program is built for.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum Target {
    /// Shared objects are `lib*.so`, auto char set is UTF-8.
    #[default]
    Unix,
    /// Libraries are `*.dll`, auto char set is UTF-16.
    Windows,
}

/// Selects types whose runtime descriptor carries name tables.
pub type ReflectPredicate = Arc<dyn Fn(&TypeDef) -> bool + Send + Sync>;

/// Configuration for one translation run.
#[derive(Clone)]
pub struct Config {
    pub(crate) target: Target,
    /// Pointer width in bytes, used for field offsets.
    pub(crate) pointer_size: u32,
    /// Types defined even when unreachable from the entry method.
    pub(crate) bundle_types: Vec<TypeId>,
    /// Methods translated even when unreachable from the entry method.
    pub(crate) bundle_methods: Vec<MethodId>,
    pub(crate) reflect: Option<ReflectPredicate>,
    /// Number of `definitions{N}.cc` files in the split output.
    pub(crate) definition_files: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            target: Target::default(),
            pointer_size: 8,
            bundle_types: Vec::new(),
            bundle_methods: Vec::new(),
            reflect: None,
            definition_files: 3,
        }
    }
}

impl fmt::Debug for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Config")
            .field("target", &self.target)
            .field("pointer_size", &self.pointer_size)
            .field("bundle_types", &self.bundle_types)
            .field("bundle_methods", &self.bundle_methods)
            .field("reflect", &self.reflect.is_some())
            .field("definition_files", &self.definition_files)
            .finish()
    }
}

impl Config {
    /// Create a new Config with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the platform of the generated program.
    pub fn target(mut self, value: Target) -> Self {
        self.target = value;
        self
    }

    /// Set the pointer width in bytes (4 or 8).
    pub fn pointer_size(mut self, value: u32) -> Self {
        self.pointer_size = value;
        self
    }

    /// Force-include types.
    pub fn bundle_types(mut self, types: impl IntoIterator<Item = TypeId>) -> Self {
        self.bundle_types.extend(types);
        self
    }

    /// Force-include methods.
    pub fn bundle_methods(mut self, methods: impl IntoIterator<Item = MethodId>) -> Self {
        self.bundle_methods.extend(methods);
        self
    }

    /// Set the predicate selecting types with full reflection descriptors.
    pub fn reflect(mut self, predicate: impl Fn(&TypeDef) -> bool + Send + Sync + 'static) -> Self {
        self.reflect = Some(Arc::new(predicate));
        self
    }

    /// Set the number of definition files in the split output (at least 1).
    pub fn definition_files(mut self, value: usize) -> Self {
        self.definition_files = value.max(1);
        self
    }

    pub(crate) fn reflects(&self, ty: &TypeDef) -> bool {
        self.reflect.as_ref().is_some_and(|predicate| predicate(ty))
    }
}
