//! Runtime type descriptors.
//!
//! Every laid-out type gets a `t__type_of<T>` specialization deriving from
//! the runtime's `t__type`. Its slot table follows the `t__type` base
//! directly, so generated code reaches slot `i` as
//! `reinterpret_cast<void**>(type + 1)[i]`. A generic slot holds a pointer
//! to a table of instantiations instead of a function. Interface tables
//! follow the slots and are registered with the base constructor.

use std::fmt::Write;

use ilcxx_core::{MethodId, Primitive, TypeDef, TypeKind};
use tracing::debug;

use crate::Result;
use crate::codegen::string_literal;
use crate::driver::Transpiler;
use crate::layout::{DefinitionKind, Layout};
use crate::method_key::MethodKey;
use crate::naming::{builtin_alias, cxx_primitive};

impl Transpiler {
    /// Emit descriptors for every type defined during the run.
    pub(crate) fn emit_descriptors(&mut self) -> Result<()> {
        let layouts: Vec<Layout> = self
            .layouts
            .iter()
            .filter(|l| l.kind != DefinitionKind::Plain)
            .cloned()
            .collect();
        for layout in &layouts {
            self.emit_descriptor(layout)?;
        }
        debug!(count = layouts.len(), "emitted runtime type descriptors");
        Ok(())
    }

    /// Dispatch table entry for `method`, null when it was never
    /// translated.
    fn entry(&mut self, method: MethodId) -> Result<String> {
        let def = self.metadata.method(method);
        if def.is_abstract || !self.is_translated(method) {
            return Ok("nullptr".to_owned());
        }
        let thunk = if self.metadata.ty(def.declaring).is_value_type() && !def.is_static {
            "__v"
        } else {
            ""
        };
        Ok(format!("reinterpret_cast<void*>({}{thunk})", self.method_ident(method)?))
    }

    /// Entries of a generic slot rooted at `origin`, in instantiation-index
    /// order. `None` for a non-generic slot.
    fn generic_entries(&mut self, origin: MethodId, concrete: MethodId) -> Result<Option<Vec<String>>> {
        if !self.metadata.method(origin).is_generic() {
            return Ok(None);
        }
        let key = MethodKey::of(&self.metadata, origin)?;
        let arguments: Vec<Vec<_>> = self
            .generic_indices
            .get(&key)
            .map(|table| table.keys().cloned().collect())
            .unwrap_or_default();
        let mut entries = Vec::with_capacity(arguments.len());
        for arguments in arguments {
            if self.metadata.method(concrete).is_abstract {
                entries.push("nullptr".to_owned());
                continue;
            }
            let instance = self.metadata.instantiate(concrete, &arguments)?;
            entries.push(self.entry(instance)?);
        }
        Ok(Some(entries))
    }

    /// Slot or interface table entry plus its trailing instantiation table.
    fn table_entry(
        &mut self,
        origin: MethodId,
        concrete: MethodId,
        table: &str,
        tables: &mut String,
    ) -> Result<String> {
        match self.generic_entries(origin, concrete)? {
            None => self.entry(concrete),
            Some(entries) if entries.is_empty() => Ok("nullptr".to_owned()),
            Some(entries) => {
                let _ = writeln!(
                    tables,
                    "\tvoid* {table}[{}] = {{{}}};",
                    entries.len(),
                    entries.join(", ")
                );
                Ok(format!("reinterpret_cast<void*>({table})"))
            }
        }
    }

    fn emit_descriptor(&mut self, layout: &Layout) -> Result<()> {
        let ty = layout.ty;
        let ident = self.type_ident(ty);
        let def = self.metadata.ty(ty).clone();
        let descriptor = format!("t__type_of<{ident}>");

        let mut members = String::new();
        let mut tables = String::new();
        if layout.kind == DefinitionKind::Type {
            for (i, &method) in layout.methods.iter().enumerate() {
                let origin = self.metadata.base_definition(method);
                let entry = self.table_entry(origin, method, &format!("v_generic{i}"), &mut tables)?;
                let _ = writeln!(
                    members,
                    "\t// {}\n\tvoid* v_method{i} = {entry};",
                    self.metadata.method_name(method)
                );
            }
        }
        let mut interfaces = Vec::with_capacity(layout.interface_methods.len());
        for (k, (&interface, methods)) in layout.interface_methods.iter().enumerate() {
            let declarations = self
                .layouts
                .get(interface)
                .map(|l| l.methods.clone())
                .unwrap_or_default();
            let mut entries = Vec::with_capacity(methods.len());
            for (i, (&declaration, &concrete)) in declarations.iter().zip(methods).enumerate() {
                entries.push(self.table_entry(
                    declaration,
                    concrete,
                    &format!("v_interface{k}_{i}"),
                    &mut tables,
                )?);
            }
            let interface_ident = self.type_ident(interface);
            if entries.is_empty() {
                interfaces.push(format!("{{&t__type_of<{interface_ident}>::v__instance, nullptr}}"));
                continue;
            }
            let _ = writeln!(
                tables,
                "\t// {}\n\tvoid* v_interface{k}[{}] = {{\n\t\t{}\n\t}};",
                self.metadata.ty(interface).full_name(),
                entries.len(),
                entries.join(",\n\t\t")
            );
            interfaces.push(format!(
                "{{&t__type_of<{interface_ident}>::v__instance, v_interface{k}}}"
            ));
        }
        let _ = write!(
            self.unit.descriptor_declarations,
            "\n// {}\ntemplate<>\nstruct {descriptor} : t__type\n{{\n{members}{tables}\t{descriptor}();\n\tstatic {descriptor} v__instance;\n}};\n",
            def.full_name()
        );

        let base = match layout.base {
            Some(b) => format!("&t__type_of<{}>::v__instance", self.type_ident(b)),
            None => "nullptr".to_owned(),
        };
        let size = if layout.kind == DefinitionKind::Interface {
            "0".to_owned()
        } else {
            format!("sizeof({ident})")
        };
        let mut body = String::new();
        if layout.managed {
            body.push_str("\tv__managed = true;\n");
        }
        match def.kind {
            TypeKind::Interface => body.push_str("\tv__interface = true;\n"),
            TypeKind::Struct => {
                let _ = writeln!(body, "\tv__value_size = sizeof({ident}::t_value);");
            }
            TypeKind::Primitive(p) | TypeKind::Enum(p) if p != Primitive::Void => {
                let _ = writeln!(body, "\tv__value_size = sizeof({});", cxx_primitive(p));
            }
            TypeKind::Array { element, rank } => {
                let element_def = self.layouts.get(element).map(|l| l.kind);
                let element_descriptor = match element_def {
                    Some(DefinitionKind::Type | DefinitionKind::Interface) => {
                        format!("&t__type_of<{}>::v__instance", self.type_ident(element))
                    }
                    _ => "nullptr".to_owned(),
                };
                let _ = writeln!(
                    body,
                    "\tv__element = {element_descriptor};\n\tv__element_size = sizeof({});\n\tv__rank = {rank};",
                    self.variable_type(element)?
                );
            }
            _ => {}
        }
        if builtin_alias(&def.full_name()).is_none() {
            match def.kind {
                TypeKind::Class | TypeKind::Array { .. } => {
                    let _ = writeln!(
                        body,
                        "\tv__scan = f__scan_of<{ident}>;\n\tv__clone = f__clone_of<{ident}>;"
                    );
                }
                TypeKind::Struct => {
                    let _ = writeln!(body, "\tv__scan = f__scan_of<{ident}>;");
                }
                _ => {}
            }
        }
        if self.is_finalizee(layout)? {
            body.push_str("\tv__finalizee = true;\n");
        }
        if self.config.reflects(&def) {
            body.push_str(&self.name_tables(&def));
        }
        let _ = write!(
            self.unit.member_definitions,
            "\n{descriptor}::t__type_of() : t__type({base}, {{{}}}, {size})\n{{\n{body}}}\n{descriptor} {descriptor}::v__instance;\n",
            interfaces.join(", ")
        );
        Ok(())
    }

    /// The type overrides `Object.Finalize`.
    fn is_finalizee(&self, layout: &Layout) -> Result<bool> {
        let object = self.metadata.well_known().object;
        let Some(finalize) = self.metadata.find_method(object, "Finalize") else {
            return Ok(false);
        };
        let key = MethodKey::of(&self.metadata, finalize)?;
        Ok(self
            .layouts
            .index_of(object, &key)
            .and_then(|i| layout.methods.get(i))
            .is_some_and(|&m| self.metadata.method(m).declaring != object))
    }

    fn name_tables(&self, def: &TypeDef) -> String {
        let quote = |name: &str| format!("u{}sv", string_literal(name));
        let fields: Vec<String> = def
            .fields
            .iter()
            .map(|&f| quote(&self.metadata.field(f).name))
            .collect();
        let methods: Vec<String> = def
            .methods
            .iter()
            .map(|&m| quote(&self.metadata.method(m).name))
            .collect();
        format!(
            "\tv__name = {};\n\tv__field_names = {{{}}};\n\tv__method_names = {{{}}};\n",
            quote(&def.full_name()),
            fields.join(", "),
            methods.join(", ")
        )
    }
}
