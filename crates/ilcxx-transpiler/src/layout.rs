//! Per-type layouts: slot tables, interface maps and field offsets.
//!
//! Layouts are built lazily and memoized in [`Layouts`]. A type under
//! construction is registered before its base and interfaces are resolved,
//! so a request that re-enters it sees the placeholder instead of
//! recursing.

use std::collections::HashMap;

use indexmap::IndexMap;
use ilcxx_core::{FieldId, LayoutKind, MetadataError, MethodId, TypeId, TypeKind};
use tracing::debug;

use crate::driver::Transpiler;
use crate::method_key::MethodKey;
use crate::{Error, Result};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DefinitionKind {
    /// Pointers and references: no slots, no descriptor.
    Plain,
    Interface,
    /// Classes, value types and arrays.
    Type,
}

/// An instance field placed at a byte offset relative to the start of the
/// type's own fields.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FieldSlot {
    pub field: FieldId,
    pub offset: u32,
    pub size: u32,
}

#[derive(Clone, Debug)]
pub struct Layout {
    pub ty: TypeId,
    pub kind: DefinitionKind,
    /// Instances hold references the collector must trace.
    pub managed: bool,
    pub base: Option<TypeId>,
    /// Slot table. Inherited slots come first and keep their indices.
    pub methods: Vec<MethodId>,
    /// Slots introduced by this type.
    pub(crate) method_to_index: HashMap<MethodKey, usize>,
    /// Interface slot index to the implementing method.
    pub interface_methods: IndexMap<TypeId, Vec<MethodId>>,
    pub fields: Vec<FieldSlot>,
    pub size: u32,
    pub align: u32,
}

impl Layout {
    fn new(ty: TypeId, kind: DefinitionKind) -> Self {
        Self {
            ty,
            kind,
            managed: false,
            base: None,
            methods: Vec::new(),
            method_to_index: HashMap::new(),
            interface_methods: IndexMap::new(),
            fields: Vec::new(),
            size: 0,
            align: 1,
        }
    }

    /// Explicit-layout fields that share bytes with another field.
    pub fn has_overlap(&self) -> bool {
        self.fields.iter().enumerate().any(|(i, a)| {
            self.fields[i + 1..]
                .iter()
                .any(|b| a.offset < b.offset + b.size.max(1) && b.offset < a.offset + a.size.max(1))
        })
    }
}

enum Entry {
    Building,
    Ready(Layout),
}

/// Registry of layouts, keyed by type.
#[derive(Default)]
pub(crate) struct Layouts {
    entries: HashMap<TypeId, Entry>,
    /// Completed types, in completion order.
    order: Vec<TypeId>,
}

impl Layouts {
    pub(crate) fn get(&self, ty: TypeId) -> Option<&Layout> {
        match self.entries.get(&ty) {
            Some(Entry::Ready(layout)) => Some(layout),
            _ => None,
        }
    }

    fn get_mut(&mut self, ty: TypeId) -> Option<&mut Layout> {
        match self.entries.get_mut(&ty) {
            Some(Entry::Ready(layout)) => Some(layout),
            _ => None,
        }
    }

    pub(crate) fn contains(&self, ty: TypeId) -> bool {
        self.entries.contains_key(&ty)
    }

    /// Completed layouts in completion order.
    pub(crate) fn iter(&self) -> impl Iterator<Item = &Layout> {
        self.order.iter().filter_map(|&ty| self.get(ty))
    }

    /// Slot index of a method along the base chain of `ty`.
    pub(crate) fn index_of(&self, ty: TypeId, key: &MethodKey) -> Option<usize> {
        let mut current = Some(ty);
        while let Some(t) = current {
            let layout = self.get(t)?;
            if let Some(&i) = layout.method_to_index.get(key) {
                return Some(i);
            }
            current = layout.base;
        }
        None
    }
}

impl Transpiler {
    /// Completed layout of an already defined type.
    pub fn layout(&self, ty: TypeId) -> Option<&Layout> {
        self.layouts.get(ty)
    }

    /// Define `ty` and return its layout.
    pub(crate) fn defined(&mut self, ty: TypeId) -> Result<&Layout> {
        self.define(ty)?;
        let name = self.metadata.ty(ty).full_name();
        self.layouts.get(ty).ok_or(Error::CyclicLayout(name))
    }

    /// Build the layout of `ty` and emit its declarations. Idempotent.
    pub fn define(&mut self, ty: TypeId) -> Result<()> {
        if self.layouts.contains(ty) {
            return Ok(());
        }
        let def = self.metadata.ty(ty);
        let kind = def.kind;
        match kind {
            TypeKind::GenericParameter(_) => return Err(Error::OpenGenericLayout(def.full_name())),
            TypeKind::Pointer(_) | TypeKind::ByRef(_) => {
                self.finish(Layout::new(ty, DefinitionKind::Plain));
                self.layouts.order.push(ty);
                return Ok(());
            }
            TypeKind::Interface => {
                self.layouts.entries.insert(ty, Entry::Building);
                let mut layout = Layout::new(ty, DefinitionKind::Interface);
                layout.managed = true;
                for m in self.metadata.ty(ty).methods.clone() {
                    let def = self.metadata.method(m);
                    if def.is_static || def.generic_definition.is_some() {
                        continue;
                    }
                    self.add_slot(&mut layout, m)?;
                }
                self.finish(layout);
                self.emit_interface(ty)?;
                self.layouts.order.push(ty);
                debug!(ty = %self.metadata.ty(ty).full_name(), "defined interface");
                return Ok(());
            }
            _ => {}
        }

        self.layouts.entries.insert(ty, Entry::Building);
        let base = self.metadata.ty(ty).base;
        let interfaces = self.metadata.ty(ty).interfaces.clone();
        if let Some(base) = base {
            self.define(base)?;
        }
        for &interface in &interfaces {
            self.define(interface)?;
        }

        let mut layout = Layout::new(ty, DefinitionKind::Type);
        layout.base = base;
        let object = self.metadata.well_known().object;
        let value_type = self.metadata.well_known().value_type;
        if let Some(base) = base.and_then(|b| self.layouts.get(b)) {
            layout.methods = base.methods.clone();
            layout.managed = ty != value_type && base.managed;
        }
        if ty == object {
            layout.managed = true;
        }

        for m in self.metadata.ty(ty).methods.clone() {
            let def = self.metadata.method(m);
            if !def.is_virtual || def.is_static {
                continue;
            }
            let root = MethodKey::of(&self.metadata, self.metadata.base_definition(m))?;
            let index = layout
                .method_to_index
                .get(&root)
                .copied()
                .or_else(|| base.and_then(|b| self.layouts.index_of(b, &root)));
            match index {
                Some(i) => layout.methods[i] = m,
                None => self.add_slot(&mut layout, m)?,
            }
        }

        for interface in interfaces {
            let methods = self.map_interface(ty, &layout, interface)?;
            layout.interface_methods.insert(interface, methods);
        }

        self.place_fields(ty, &mut layout)?;
        self.enqueue_overrides(&layout)?;
        self.finish(layout);

        let managed = self.emit_definition(ty)?;
        if let Some(layout) = self.layouts.get_mut(ty) {
            layout.managed |= managed;
        }
        self.layouts.order.push(ty);
        debug!(ty = %self.metadata.ty(ty).full_name(), "defined type");
        Ok(())
    }

    fn finish(&mut self, layout: Layout) {
        self.layouts.entries.insert(layout.ty, Entry::Ready(layout));
    }

    fn add_slot(&mut self, layout: &mut Layout, method: MethodId) -> Result<()> {
        let key = MethodKey::of(&self.metadata, method)?;
        layout.method_to_index.insert(key, layout.methods.len());
        layout.methods.push(method);
        if self.metadata.method(method).is_generic() {
            self.generic_indices.entry(key).or_default();
        }
        Ok(())
    }

    /// Most-derived implementation of every slot of `interface` in `ty`.
    fn map_interface(&self, ty: TypeId, layout: &Layout, interface: TypeId) -> Result<Vec<MethodId>> {
        let Some(table) = self.layouts.get(interface) else {
            return Ok(Vec::new());
        };
        let mut methods = Vec::with_capacity(table.methods.len());
        for &declaration in &table.methods {
            let found = self
                .explicit_implementation(ty, declaration)
                .or_else(|| self.implicit_implementation(ty, declaration))
                .ok_or_else(|| MetadataError::MemberNotFound {
                    ty: self.metadata.ty(ty).full_name(),
                    member: self.metadata.method_name(declaration),
                })?;
            let def = self.metadata.method(found);
            let resolved = if def.is_virtual && !def.is_static {
                let root = MethodKey::of(&self.metadata, self.metadata.base_definition(found))?;
                layout
                    .method_to_index
                    .get(&root)
                    .copied()
                    .or_else(|| layout.base.and_then(|b| self.layouts.index_of(b, &root)))
                    .map_or(found, |i| layout.methods[i])
            } else {
                found
            };
            methods.push(resolved);
        }
        Ok(methods)
    }

    fn explicit_implementation(&self, ty: TypeId, declaration: MethodId) -> Option<MethodId> {
        let mut current = Some(ty);
        while let Some(t) = current {
            let def = self.metadata.ty(t);
            if let Some(&(_, body)) = def.explicit_impls.iter().find(|(d, _)| *d == declaration) {
                return Some(body);
            }
            current = def.base;
        }
        None
    }

    fn implicit_implementation(&self, ty: TypeId, declaration: MethodId) -> Option<MethodId> {
        let name = &self.metadata.method(declaration).name;
        let mut current = Some(ty);
        while let Some(t) = current {
            let def = self.metadata.ty(t);
            let found = def.methods.iter().copied().find(|&m| {
                let candidate = self.metadata.method(m);
                &candidate.name == name
                    && !candidate.is_static
                    && self.metadata.signature_eq(m, declaration)
            });
            if found.is_some() {
                return found;
            }
            current = def.base;
        }
        None
    }

    /// Queue overrides of slots that generated code already refers to.
    fn enqueue_overrides(&mut self, layout: &Layout) -> Result<()> {
        for &m in &layout.methods {
            if self.metadata.method(m).is_abstract {
                continue;
            }
            let origin = self.metadata.base_definition(m);
            self.enqueue_slot(origin, m)?;
        }
        for (&interface, methods) in &layout.interface_methods {
            let Some(table) = self.layouts.get(interface) else {
                continue;
            };
            for (declaration, concrete) in table.methods.clone().into_iter().zip(methods.clone()) {
                self.enqueue_slot(declaration, concrete)?;
            }
        }
        Ok(())
    }

    fn enqueue_slot(&mut self, origin: MethodId, concrete: MethodId) -> Result<()> {
        let key = MethodKey::of(&self.metadata, origin)?;
        if self.metadata.method(origin).is_generic() {
            let arguments: Vec<Vec<TypeId>> = self
                .generic_indices
                .get(&key)
                .map(|table| table.keys().cloned().collect())
                .unwrap_or_default();
            for arguments in arguments {
                let instance = self.metadata.instantiate(concrete, &arguments)?;
                self.enqueue(instance);
            }
        } else if self.naming.is_named(&key) {
            self.enqueue(concrete);
        }
        Ok(())
    }

    /// Size and alignment of a value of `ty` when stored in a field.
    pub(crate) fn storage_size(&mut self, ty: TypeId) -> Result<(u32, u32)> {
        let pointer = self.config.pointer_size;
        let def = self.metadata.ty(ty);
        Ok(match def.kind {
            TypeKind::Primitive(p) | TypeKind::Enum(p) => {
                let size = p.size(pointer);
                (size, size.max(1))
            }
            TypeKind::Struct => {
                let layout = self.defined(ty)?;
                (layout.size, layout.align)
            }
            _ => (pointer, pointer),
        })
    }

    fn place_fields(&mut self, ty: TypeId, layout: &mut Layout) -> Result<()> {
        let def = self.metadata.ty(ty);
        let declared = def.layout;
        let fixed_buffer = def.fixed_buffer;
        let fields: Vec<FieldId> = def
            .fields
            .iter()
            .copied()
            .filter(|&f| {
                let field = self.metadata.field(f);
                !field.is_static && !field.is_literal
            })
            .collect();
        if fixed_buffer {
            layout.size = declared.size;
            return Ok(());
        }
        if matches!(def.kind, TypeKind::Primitive(_) | TypeKind::Enum(_)) {
            let (size, align) = self.storage_size(ty)?;
            layout.size = size;
            layout.align = align;
            return Ok(());
        }

        let mut end: u32 = 0;
        let mut align = 1;
        for f in fields {
            let (size, natural) = self.storage_size(self.metadata.field(f).ty)?;
            let field_align = if declared.pack > 0 {
                natural.min(declared.pack)
            } else {
                natural
            };
            align = align.max(field_align);
            let offset = match declared.kind {
                LayoutKind::Explicit => self.metadata.field(f).offset.unwrap_or(0),
                _ => end.div_ceil(field_align) * field_align,
            };
            layout.fields.push(FieldSlot {
                field: f,
                offset,
                size,
            });
            end = end.max(offset + size);
        }
        if declared.kind != LayoutKind::Explicit {
            end = end.div_ceil(align) * align;
        }
        layout.size = end.max(declared.size);
        layout.align = align;
        Ok(())
    }
}
