//! Foreign function imports.
//!
//! An import becomes a function that binds the library symbol on first
//! call and marshals its arguments. Strings pass their character buffer
//! (UTF-16) or a transcoded copy (UTF-8); safe handles pass their raw
//! handle; arrays pass their element buffer.

use std::fmt::Write;

use ilcxx_core::{CharSet, MetadataError, MethodId, Primitive, TypeId, TypeKind};

use crate::Result;
use crate::config::Target;
use crate::driver::Transpiler;
use crate::naming::escape;

/// Shared object file name of an import library on `target`.
pub(crate) fn library_file(target: Target, name: &str) -> String {
    match target {
        Target::Unix if name.contains('.') || name.contains('/') => name.to_owned(),
        Target::Unix if name.starts_with("lib") => format!("{name}.so"),
        Target::Unix => format!("lib{name}.so"),
        Target::Windows if name.to_ascii_lowercase().ends_with(".dll") => name.to_owned(),
        Target::Windows => format!("{name}.dll"),
    }
}

/// Strings are passed as UTF-16 for this char set.
pub(crate) fn is_wide(target: Target, char_set: CharSet) -> bool {
    match char_set {
        CharSet::Unicode => true,
        CharSet::Ansi => false,
        CharSet::Auto => target == Target::Windows,
    }
}

/// How one parameter crosses the boundary.
enum Marshal {
    String,
    /// Output buffer of a string builder.
    Builder,
    /// `ref`/`out` native integer.
    PointerOut,
    /// `ref`/`out` safe handle staged through a raw pointer.
    HandleOut(TypeId),
    Handle,
    Array(TypeId),
    Plain,
}

impl Transpiler {
    fn is_safe_handle(&self, ty: TypeId) -> bool {
        self.metadata
            .find_type("System.Runtime.InteropServices.SafeHandle")
            .is_some_and(|handle| ty == handle || self.metadata.is_subclass_of(ty, handle))
    }

    fn marshal(&self, ty: TypeId, is_out: bool) -> Marshal {
        let def = self.metadata.ty(ty);
        if ty == self.metadata.well_known().string {
            return Marshal::String;
        }
        if is_out && def.full_name() == "System.Text.StringBuilder" {
            return Marshal::Builder;
        }
        match def.kind {
            TypeKind::ByRef(element) | TypeKind::Pointer(element) => {
                let target = self.metadata.ty(element);
                if matches!(target.kind, TypeKind::Primitive(Primitive::I | Primitive::U)) {
                    Marshal::PointerOut
                } else if self.is_safe_handle(element) {
                    Marshal::HandleOut(element)
                } else {
                    Marshal::Plain
                }
            }
            TypeKind::Array { element, .. } => Marshal::Array(element),
            _ if self.is_safe_handle(ty) => Marshal::Handle,
            _ => Marshal::Plain,
        }
    }

    /// Definition of an imported function: lazy symbol binding plus
    /// argument marshaling.
    pub(crate) fn emit_pinvoke(&mut self, method: MethodId, prototype: &str, returns: &str) -> Result<String> {
        let def = self.metadata.method(method).clone();
        let Some(import) = def.pinvoke.clone() else {
            return Ok(format!("{prototype}\n{{\n}}\n"));
        };
        let library = library_file(self.config.target, &import.library);
        let entry = if import.entry_point.is_empty() {
            def.name.clone()
        } else {
            import.entry_point.clone()
        };
        let _ = writeln!(
            self.unit.function_declarations,
            "// DLL import:\n//\tValue: {library}\n//\tEntryPoint: {entry}\n//\tSetLastError: {}",
            import.set_last_error
        );
        let wide = is_wide(self.config.target, import.char_set);
        let (chars, buffer) = if wide {
            ("const char16_t*", "char16_t*")
        } else {
            ("const char*", "char*")
        };
        let first_char = format!("v_{}", escape("_firstChar"));
        let length = format!("v_{}", escape("_stringLength"));
        let chunk = format!("v_{}", escape("m_ChunkChars"));

        let mut text = format!("{prototype}\n{{\n");
        let mut types = Vec::with_capacity(def.parameters.len());
        let mut arguments = Vec::with_capacity(def.parameters.len());
        let mut after = String::new();
        for (i, parameter) in def.parameters.iter().enumerate() {
            let marshal = self.marshal(parameter.ty, parameter.is_out);
            if parameter.is_out && !matches!(marshal, Marshal::Builder) {
                let _ = writeln!(text, "\t*a_{i} = {{}};");
            }
            let (ty, argument) = match marshal {
                Marshal::String => {
                    let argument = if wide {
                        format!("&a_{i}->{first_char}")
                    } else {
                        format!(
                            "f__string({{&a_{i}->{first_char}, static_cast<size_t>(a_{i}->{length})}}).c_str()"
                        )
                    };
                    (chars.to_owned(), argument)
                }
                Marshal::Builder => (buffer.to_owned(), format!("a_{i}->{chunk}->f__data()")),
                Marshal::PointerOut => ("void**".to_owned(), format!("reinterpret_cast<void**>(a_{i})")),
                Marshal::HandleOut(handle) => {
                    let _ = writeln!(text, "\tvoid* p{i} = nullptr;");
                    let ident = self.escape_type(handle)?;
                    let _ = writeln!(
                        after,
                        "\t{{auto p = f__new_zerod<{ident}>();\n\tp->v_handle = p{i};\n\t*a_{i} = std::move(p);}}"
                    );
                    ("void**".to_owned(), format!("&p{i}"))
                }
                Marshal::Handle => ("void*".to_owned(), format!("a_{i}->v_handle")),
                Marshal::Array(element) => (
                    format!("{}*", self.variable_type(element)?),
                    format!("a_{i} ? a_{i}->f__data() : nullptr"),
                ),
                Marshal::Plain => (self.scoped_type(parameter.ty)?, format!("a_{i}")),
            };
            types.push(format!("\n\t\t{ty}"));
            arguments.push(format!("\n\t\t{argument}"));
        }

        let handle_return = self.is_safe_handle(def.return_type);
        let native_return = if handle_return { "void*" } else { returns };
        let _ = write!(
            text,
            "\tstatic t_library library(\"{library}\"s, \"{entry}\");\n\t{}library.f_as<{native_return}(*)({}\n\t)>()({}\n\t);\n",
            if returns == "void" { "" } else { "auto result = " },
            types.join(","),
            arguments.join(",")
        );
        text.push_str(&after);
        if handle_return {
            let constructor = self.handle_constructor(def.return_type)?;
            let ident = self.escape_type(def.return_type)?;
            let constructor_ident = self.method_ident(constructor)?;
            self.enqueue(constructor);
            let _ = writeln!(
                text,
                "\tauto p = f__new_zerod<{ident}>();\n\t{constructor_ident}(p, result, true);\n\treturn p;"
            );
        } else if returns != "void" {
            text.push_str("\treturn result;\n");
        }
        text.push_str("}\n");
        Ok(text)
    }

    /// `(IntPtr, bool)` constructor of a safe handle type or its base.
    fn handle_constructor(&self, ty: TypeId) -> Result<MethodId> {
        let native = self.metadata.primitive(Primitive::I);
        let boolean = self.metadata.primitive(Primitive::Boolean);
        let mut current = Some(ty);
        while let Some(t) = current {
            let def = self.metadata.ty(t);
            let found = def.methods.iter().copied().find(|&m| {
                let method = self.metadata.method(m);
                method.is_constructor()
                    && !method.is_static
                    && method.parameters.len() == 2
                    && method.parameters[0].ty == native
                    && method.parameters[1].ty == boolean
            });
            if let Some(m) = found {
                return Ok(m);
            }
            current = def.base;
        }
        Err(MetadataError::MemberNotFound {
            ty: self.metadata.ty(ty).full_name(),
            member: ".ctor(System.IntPtr, System.Boolean)".to_owned(),
        }
        .into())
    }
}
