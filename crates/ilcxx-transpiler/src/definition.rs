//! C++ declarations of laid-out types: struct bodies, static holders and
//! field-address thunks.

use std::fmt::Write;
use std::rc::Rc;

use ilcxx_core::{FieldId, LayoutKind, Primitive, TypeId, TypeKind};

use crate::Result;
use crate::driver::Transpiler;
use crate::layout::FieldSlot;
use crate::naming::{builtin_alias, cxx_primitive, field_thunk};

impl Transpiler {
    pub(crate) fn emit_interface(&mut self, ty: TypeId) -> Result<()> {
        let identifier = self.type_ident(ty);
        let full = self.metadata.ty(ty).full_name();
        let _ = write!(
            self.unit.type_declarations,
            "// {full}\nstruct {identifier}\n{{\n}};\n"
        );
        Ok(())
    }

    /// Emit the struct, static holder and thunks of `ty`.
    ///
    /// Returns whether the emitted members hold references, which the
    /// caller merges into the layout's managed flag.
    pub(crate) fn emit_definition(&mut self, ty: TypeId) -> Result<bool> {
        let identifier = self.type_ident(ty);
        let def = self.metadata.ty(ty).clone();
        let full = def.full_name();
        let mut managed = false;

        let (statics, thread_statics): (Vec<FieldId>, Vec<FieldId>) = if def.is_enum() {
            (Vec::new(), Vec::new())
        } else {
            def.fields
                .iter()
                .copied()
                .filter(|&f| {
                    let field = self.metadata.field(f);
                    field.is_static && !field.is_literal
                })
                .partition(|&f| !self.metadata.field(f).is_thread_static)
        };

        let builtin = Rc::clone(&self.builtin);
        let initialize = builtin.initialize(self, ty)?;
        let initializer = self.metadata.type_initializer(ty);
        if !statics.is_empty() || initialize.is_some() || initializer.is_some() {
            let mut holder = format!("\nstruct t__static_{identifier}\n{{\n");
            for &f in &statics {
                let line = self.static_variable(f)?;
                holder.push_str(&line);
            }
            holder.push_str("\tvoid f_initialize()\n\t{\n");
            if let Some(text) = initialize {
                holder.push_str(&text);
                if !text.ends_with('\n') {
                    holder.push('\n');
                }
            }
            if let Some(cctor) = initializer {
                let _ = writeln!(holder, "\t\t{}();", self.method_ident(cctor)?);
                self.enqueue(cctor);
            }
            holder.push_str("\t}\n};\n");
            self.unit.static_definitions.push_str(&holder);

            for &f in &statics {
                let thunk = field_thunk(&identifier, &self.metadata.field(f).name);
                let field = self.field_ident(f);
                let _ = writeln!(self.unit.field_declarations, "void* {thunk}();");
                let _ = write!(
                    self.unit.field_definitions,
                    "void* {thunk}()\n{{\n\treturn &t_static::v_instance->v_{identifier}->{field};\n}}\n"
                );
            }
            let _ = writeln!(
                self.unit.static_declarations,
                "\tt__lazy<t__static_{identifier}> v_{identifier};"
            );
        }

        if !thread_statics.is_empty() {
            let mut members = String::from("\tstruct\n\t{\n");
            for &f in &thread_statics {
                let scoped = self.scoped_type(self.metadata.field(f).ty)?;
                let _ = writeln!(members, "\t\t{scoped} {}{{}};", self.field_ident(f));
            }
            let _ = writeln!(members, "\t}} v_{identifier};");
            self.unit.thread_static_declarations.push_str(&members);
        }

        let declaration = format!("// {full}");
        if let Some(alias) = builtin_alias(&full) {
            let _ = writeln!(
                self.unit.type_declarations,
                "{declaration}\nusing {identifier} = {alias};"
            );
            return Ok(managed);
        }
        let declaration = format!("{declaration}\nstruct {identifier}");
        let base = match def.base {
            Some(b) => format!(" : {}", self.escape_type(b)?),
            None => String::new(),
        };

        let members = match def.kind {
            TypeKind::Primitive(Primitive::Void) => String::new(),
            TypeKind::Primitive(p) | TypeKind::Enum(p) => {
                let name = cxx_primitive(p);
                format!(
                    "\t{name} v__value;\n\tvoid f__construct({name} a_value)\n\t{{\n\t\tv__value = a_value;\n\t}}\n"
                )
            }
            _ => {
                let members = match builtin.members(self, ty)? {
                    Some(m) => {
                        managed |= m.managed;
                        m.text
                    }
                    None => match def.kind {
                        TypeKind::Array { element, rank } => {
                            self.array_members(&identifier, def.base, element, rank)?
                        }
                        _ if def.fixed_buffer => self.fixed_buffer_members(ty),
                        _ => {
                            let (text, holds) = self.field_members(ty, &identifier)?;
                            managed |= holds;
                            text
                        }
                    },
                };
                if def.kind == TypeKind::Struct {
                    format!(
                        "\tstruct t_value\n\t{{\n{members}\t}} v__value;\n\tvoid f__construct(t_value&& a_value)\n\t{{\n\t\tnew(&v__value) t_value(std::move(a_value));\n\t}}\n\tvoid f__scan(t_scan a_scan)\n\t{{\n\t\tv__value.f__scan(a_scan);\n\t}}\n"
                    )
                } else {
                    members
                }
            }
        };

        let _ = writeln!(self.unit.type_declarations, "{declaration};");
        let pack = def.layout.pack;
        let packed = pack > 0 && def.layout.kind != LayoutKind::Explicit;
        if packed {
            let _ = write!(self.unit.type_definitions, "\n#pragma pack(push, {pack})");
        }
        let _ = writeln!(
            self.unit.type_definitions,
            "\n{declaration}{base}\n{{\n{members}}};"
        );
        if packed {
            self.unit.type_definitions.push_str("#pragma pack(pop)\n");
        }
        Ok(managed)
    }

    /// One member of a static holder, initialized from RVA data if present.
    fn static_variable(&mut self, field: FieldId) -> Result<String> {
        let def = self.metadata.field(field);
        let (ty, data) = (def.ty, def.initial_data.clone());
        let scoped = self.scoped_type(ty)?;
        let name = self.field_ident(field);
        let Some(bytes) = data else {
            return Ok(format!("\t{scoped} {name}{{}};\n"));
        };
        if self.metadata.ty(ty).fixed_buffer {
            let ident = self.escape_type(ty)?;
            let content: Vec<String> = bytes.iter().map(|b| format!("0x{b:02x}")).collect();
            Ok(format!(
                "\t{scoped} {name}{{{ident}::t_value{{{}}}}};\n",
                content.join(", ")
            ))
        } else {
            let value: String = bytes.iter().rev().map(|b| format!("{b:02x}")).collect();
            Ok(format!(
                "\t{scoped} {name}{{static_cast<{scoped}>(0x{value})}};\n"
            ))
        }
    }

    fn array_members(
        &mut self,
        identifier: &str,
        base: Option<TypeId>,
        element: TypeId,
        rank: u32,
    ) -> Result<String> {
        let element_ident = self.variable_type(element)?;
        let mut members = format!(
            "\tt__bound v__bounds[{rank}];\n\t{element_ident}* f__data()\n\t{{\n\t\treturn reinterpret_cast<{element_ident}*>(this + 1);\n\t}}\n"
        );
        if self.holds_references(element) {
            let base_scan = match base {
                Some(b) => format!("\t\t{}::f__scan(a_scan);\n", self.escape_type(b)?),
                None => String::new(),
            };
            let visit = self.scan_call(element, "p[i]");
            let _ = write!(
                members,
                "\tvoid f__scan(t_scan a_scan)\n\t{{\n{base_scan}\t\tauto p = f__data();\n\t\tfor (size_t i = 0; i < v__length; ++i) {visit};\n\t}}\n"
            );
        }
        let _ = write!(
            members,
            "\tt_scoped<t_slot> f__clone() const\n\t{{\n\t\tauto p = t_object::f_allocate<{identifier}>(sizeof({element_ident}) * v__length);\n\t\tp->v__length = v__length;\n\t\tstd::copy_n(v__bounds, {rank}, p->v__bounds);\n\t\tauto p0 = reinterpret_cast<const {element_ident}*>(this + 1);\n\t\tauto p1 = p->f__data();\n\t\tfor (size_t i = 0; i < v__length; ++i) new(p1 + i) {element_ident}(p0[i]);\n\t\treturn p;\n\t}}\n"
        );
        Ok(members)
    }

    fn fixed_buffer_members(&self, ty: TypeId) -> String {
        let size = self.layouts.get(ty).map_or(0, |l| l.size);
        format!(
            "\t\tuint8_t v__content[{size}];\n\t\tvoid f__destruct()\n\t\t{{\n\t\t}}\n\t\tvoid f__scan(t_scan a_scan)\n\t\t{{\n\t\t}}\n"
        )
    }

    /// Instance fields with scan, destruct and clone routines.
    fn field_members(&mut self, ty: TypeId, identifier: &str) -> Result<(String, bool)> {
        let def = self.metadata.ty(ty).clone();
        let (slots, size) = match self.layouts.get(ty) {
            Some(layout) => (layout.fields.clone(), layout.size),
            None => (Vec::new(), 0),
        };
        let value = def.kind == TypeKind::Struct;
        let indent = if value { "\t\t" } else { "\t" };
        let declared_size = def.layout.size.max(if def.layout.kind == LayoutKind::Explicit {
            size
        } else {
            0
        });
        let variables = self.variables(&slots, def.layout.kind, declared_size, indent)?;

        let mut holds = false;
        let mut scans = String::new();
        for slot in &slots {
            let field_ty = self.metadata.field(slot.field).ty;
            if !self.holds_references(field_ty) {
                continue;
            }
            holds |= self.is_managed(field_ty)?;
            let name = self.field_ident(slot.field);
            let _ = writeln!(scans, "{indent}\t{};", self.scan_call(field_ty, &name));
        }

        if value {
            let mut destructs = String::new();
            for slot in &slots {
                if self.holds_references(self.metadata.field(slot.field).ty) {
                    let _ = writeln!(destructs, "\t\t\t{}.f__destruct();", self.field_ident(slot.field));
                }
            }
            let text = format!(
                "{variables}\t\tvoid f__destruct()\n\t\t{{\n{destructs}\t\t}}\n\t\tvoid f__scan(t_scan a_scan)\n\t\t{{\n{scans}\t\t}}\n"
            );
            return Ok((text, holds));
        }

        let (base_scan, base_construct) = match def.base {
            Some(b) => {
                let base = self.escape_type(b)?;
                (
                    format!("\t\t{base}::f__scan(a_scan);\n"),
                    format!("\t\t{base}::f__construct(a_p);\n"),
                )
            }
            None => (String::new(), String::new()),
        };
        let mut constructs = String::new();
        for slot in &slots {
            let name = self.field_ident(slot.field);
            let _ = writeln!(constructs, "\t\tnew(&a_p->{name}) decltype({name})({name});");
        }
        let text = format!(
            "{variables}\tvoid f__scan(t_scan a_scan)\n\t{{\n{base_scan}{scans}\t}}\n\tvoid f__construct({identifier}* a_p) const\n\t{{\n{base_construct}{constructs}\t}}\n\tt_scoped<t_slot> f__clone() const\n\t{{\n\t\tauto p = t_object::f_allocate<{identifier}>();\n\t\tf__construct(p);\n\t\treturn p;\n\t}}\n"
        );
        Ok((text, holds))
    }

    /// Field variables with padding; overlapping explicit fields share a union.
    fn variables(
        &mut self,
        slots: &[FieldSlot],
        kind: LayoutKind,
        size: u32,
        indent: &str,
    ) -> Result<String> {
        let mut text = String::new();
        let explicit = kind == LayoutKind::Explicit;
        let overlapping = explicit
            && slots.iter().enumerate().any(|(i, a)| {
                slots[i + 1..].iter().any(|b| {
                    a.offset < b.offset + b.size.max(1) && b.offset < a.offset + a.size.max(1)
                })
            });
        let mut end = 0;
        if overlapping {
            let _ = writeln!(text, "{indent}union\n{indent}{{");
            for (k, slot) in slots.iter().enumerate() {
                let variable = self.variable_type(self.metadata.field(slot.field).ty)?;
                let _ = writeln!(text, "{indent}\tstruct\n{indent}\t{{");
                if slot.offset > 0 {
                    let _ = writeln!(text, "{indent}\t\tchar v__padding_{k}[{}];", slot.offset);
                }
                let _ = writeln!(
                    text,
                    "{indent}\t\t{variable} {};\n{indent}\t}};",
                    self.field_ident(slot.field)
                );
                end = end.max(slot.offset + slot.size);
            }
            let _ = writeln!(text, "{indent}}};");
        } else {
            for slot in slots {
                if explicit && slot.offset > end {
                    let _ = writeln!(text, "{indent}char v__padding{end}[{}];", slot.offset - end);
                    end = slot.offset;
                }
                let variable = self.variable_type(self.metadata.field(slot.field).ty)?;
                let _ = writeln!(text, "{indent}{variable} {};", self.field_ident(slot.field));
                end = if explicit {
                    end.max(slot.offset + slot.size)
                } else {
                    end + slot.size
                };
            }
        }
        if size > end {
            let _ = writeln!(text, "{indent}char v__padding{end}[{}];", size - end);
        }
        Ok(text)
    }

    fn scan_call(&self, ty: TypeId, variable: &str) -> String {
        if self.metadata.ty(ty).kind == TypeKind::Struct {
            format!("{variable}.f__scan(a_scan)")
        } else {
            format!("a_scan({variable})")
        }
    }

    /// Values of `ty` are references or structs that may contain them.
    pub(crate) fn holds_references(&self, ty: TypeId) -> bool {
        let def = self.metadata.ty(ty);
        !(def.is_pointer_like() || matches!(def.kind, TypeKind::Primitive(_) | TypeKind::Enum(_)))
    }

    /// Values of `ty` contain references the collector must trace.
    pub(crate) fn is_managed(&mut self, ty: TypeId) -> Result<bool> {
        if !self.holds_references(ty) {
            return Ok(false);
        }
        if self.metadata.ty(ty).kind == TypeKind::Struct {
            return Ok(self.defined(ty)?.managed);
        }
        Ok(true)
    }
}
