//! Calls, object construction, function pointers and returns.
//!
//! Virtual calls index the v-table that follows the runtime type
//! descriptor. Interface calls go through a per-site resolver that caches
//! the concrete function for the receiver's type.

use std::fmt::Write;
use std::rc::Rc;

use ilcxx_core::{Instruction, MethodId, Opcode, TypeId};

use super::top;
use crate::Result;
use crate::driver::Transpiler;
use crate::estimate::Frame;
use crate::method_key::MethodKey;
use crate::stack::{Slot, Stack};

/// Callee of a call expression.
struct Callee {
    /// Statement declaring the cached resolver of an interface call site.
    site: Option<String>,
    function: String,
}

impl Callee {
    fn direct(function: String) -> Self {
        Self {
            site: None,
            function,
        }
    }
}

/// `function(arguments...)` spread one argument per line.
fn call_expression(function: &str, arguments: &[String]) -> String {
    if arguments.is_empty() {
        return format!("{function}()");
    }
    let arguments: Vec<String> = arguments.iter().map(|a| format!("\n\t\t{a}")).collect();
    format!("{function}({}\n\t)", arguments.join(","))
}

impl Transpiler {
    pub(super) fn emit_call(
        &mut self,
        frame: &mut Frame,
        ins: &Instruction,
        stack: &Stack,
        after: &Stack,
    ) -> Result<()> {
        match ins.opcode {
            Opcode::Call | Opcode::Callvirt => self.emit_invoke(frame, ins, stack, after),
            Opcode::Newobj => self.emit_newobj(frame, ins, stack, after),
            Opcode::Ldftn => {
                let method = self.token_method(frame, ins)?;
                let ident = self.method_ident(method)?;
                self.enqueue(method);
                let result = top(frame, ins, after)?;
                let _ = writeln!(frame.out, "\t{} = reinterpret_cast<void*>(&{ident});", result.variable);
                Ok(())
            }
            Opcode::Ldvirtftn => {
                let method = self.token_method(frame, ins)?;
                let target = frame.slot(ins, stack, 0)?.clone();
                let result = top(frame, ins, after)?.clone();
                let callee = self.virtual_function(method, &target.variable)?;
                let statement = format!(
                    "{} = reinterpret_cast<void*>({});",
                    result.variable, callee.function
                );
                self.write_call(frame, callee.site.as_deref(), &statement);
                self.release_unless(frame, &target, &result)
            }
            Opcode::Ret => {
                frame.out.push_str("\tf_epoch_point();\n");
                if self.is_void(frame.return_type) {
                    frame.out.push_str("\treturn;\n");
                } else {
                    let value = frame.slot(ins, stack, 0)?.variable.clone();
                    let value = self.moved(frame.return_type, &value)?;
                    let _ = writeln!(frame.out, "\treturn {value};");
                }
                Ok(())
            }
            _ => Err(frame.unsupported(ins)),
        }
    }

    fn write_call(&self, frame: &mut Frame, site: Option<&str>, statement: &str) {
        match site {
            Some(site) => {
                let _ = writeln!(frame.out, "\t{{{site}\n\t{statement}\n\t}}");
            }
            None => {
                let _ = writeln!(frame.out, "\t{statement}");
            }
        }
    }

    /// Argument expressions of a call, bottom of the stack first.
    fn arguments(&mut self, method: MethodId, slots: &[Slot]) -> Result<Vec<String>> {
        let def = self.metadata.method(method).clone();
        let mut types = Vec::with_capacity(slots.len());
        if !def.is_static {
            types.push(self.this_type(def.declaring));
        }
        types.extend(def.parameters.iter().map(|p| p.ty));
        let mut arguments = Vec::with_capacity(slots.len());
        for (slot, ty) in slots.iter().rev().zip(types) {
            arguments.push(self.moved(ty, &slot.variable)?);
        }
        Ok(arguments)
    }

    fn emit_invoke(&mut self, frame: &mut Frame, ins: &Instruction, stack: &Stack, after: &Stack) -> Result<()> {
        let method = self.token_method(frame, ins)?;
        let def = self.metadata.method(method).clone();
        let count = def.parameters.len() + usize::from(!def.is_static);
        let slots: Vec<Slot> = stack.iter().take(count).cloned().collect();
        if slots.len() < count {
            return Err(frame.underflow(ins));
        }
        let mut arguments = self.arguments(method, &slots)?;
        let assign = if self.is_void(def.return_type) {
            String::new()
        } else {
            format!("{} = ", top(frame, ins, after)?.variable)
        };
        let constrained = frame.constrained.take();

        if ins.opcode != Opcode::Callvirt {
            let ident = self.method_ident(method)?;
            self.enqueue(method);
            let _ = writeln!(frame.out, "\t{assign}{};", call_expression(&ident, &arguments));
            return Ok(());
        }

        let this = slots.last().map(|s| s.variable.clone()).unwrap_or_default();
        if let Some(constrained) = constrained {
            if self.metadata.ty(constrained).is_value_type() {
                let concrete = if def.is_virtual {
                    self.constrained_override(constrained, method)?
                } else {
                    Some(method)
                };
                let pointer = self.metadata.pointer_to(constrained);
                let value = self.moved(pointer, &this)?;
                if let Some(concrete) = concrete
                    && self.metadata.method(concrete).declaring == constrained
                {
                    let ident = self.method_ident(concrete)?;
                    self.enqueue(concrete);
                    if let Some(first) = arguments.first_mut() {
                        *first = value;
                    }
                    let _ = writeln!(frame.out, "\t{assign}{};", call_expression(&ident, &arguments));
                    return Ok(());
                }
                let ident = self.escape_type(constrained)?;
                if let Some(first) = arguments.first_mut() {
                    *first = "std::move(p)".to_owned();
                }
                let callee = self.virtual_function(method, "p")?;
                let _ = writeln!(frame.out, "\t{{auto p = f__new_constructed<{ident}>(std::move(*{value}));");
                let statement = format!("{assign}{};", call_expression(&callee.function, &arguments));
                self.write_call(frame, callee.site.as_deref(), &statement);
                frame.out.push_str("\t}\n");
                return Ok(());
            }
            let variable = self.variable_type(constrained)?;
            let target = format!("(*static_cast<{variable}*>({this}))");
            if let Some(first) = arguments.first_mut() {
                *first = target.clone();
            }
            let callee = self.virtual_function(method, &target)?;
            let statement = format!("{assign}{};", call_expression(&callee.function, &arguments));
            self.write_call(frame, callee.site.as_deref(), &statement);
            return Ok(());
        }

        let callee = self.virtual_function(method, &this)?;
        let statement = format!("{assign}{};", call_expression(&callee.function, &arguments));
        self.write_call(frame, callee.site.as_deref(), &statement);
        Ok(())
    }

    /// Implementation of `method` used by the value type `constrained`.
    fn constrained_override(&mut self, constrained: TypeId, method: MethodId) -> Result<Option<MethodId>> {
        let declaring = self.metadata.method(method).declaring;
        let layout = self.defined(constrained)?.clone();
        if self.metadata.ty(declaring).is_interface() {
            let key = MethodKey::of(&self.metadata, method)?;
            let index = self.layouts.index_of(declaring, &key);
            return Ok(index.and_then(|i| {
                layout
                    .interface_methods
                    .get(&declaring)
                    .and_then(|methods| methods.get(i).copied())
            }));
        }
        let root = MethodKey::of(&self.metadata, self.metadata.base_definition(method))?;
        Ok(self
            .layouts
            .index_of(constrained, &root)
            .and_then(|i| layout.methods.get(i).copied()))
    }

    /// Function pointer type of `method` as stored in dispatch tables.
    fn function_pointer(&mut self, method: MethodId) -> Result<String> {
        let def = self.metadata.method(method).clone();
        let mut parameters = Vec::with_capacity(def.parameters.len() + 1);
        if !def.is_static {
            let object = self.metadata.well_known().object;
            let this = if self.metadata.ty(def.declaring).is_value_type() {
                object
            } else {
                def.declaring
            };
            parameters.push(self.scoped_type(this)?);
        }
        for parameter in &def.parameters {
            parameters.push(self.scoped_type(parameter.ty)?);
        }
        let returns = self.scoped_type(def.return_type)?;
        Ok(format!("{returns}(*)({})", parameters.join(", ")))
    }

    /// Index of the type arguments of a generic method instance in its slot.
    fn generic_index(&mut self, key: MethodKey, arguments: &[TypeId]) -> usize {
        let table = self.generic_indices.entry(key).or_default();
        let next = table.len();
        *table.entry(arguments.to_vec()).or_insert(next)
    }

    fn enqueue_concrete(&mut self, concrete: MethodId, arguments: &[TypeId]) -> Result<()> {
        if self.metadata.method(concrete).is_abstract {
            return Ok(());
        }
        let method = if arguments.is_empty() {
            concrete
        } else {
            self.metadata.instantiate(concrete, arguments)?
        };
        self.enqueue(method);
        Ok(())
    }

    /// Callee for a virtual or interface call on `target`.
    fn virtual_function(&mut self, method: MethodId, target: &str) -> Result<Callee> {
        let def = self.metadata.method(method).clone();
        let definition = def.generic_definition.unwrap_or(method);
        let arguments = def.generic_arguments.clone();
        let declaring = def.declaring;
        let pointer = self.function_pointer(method)?;

        if self.metadata.ty(declaring).is_interface() {
            self.define(declaring)?;
            self.method_ident(definition)?;
            let key = MethodKey::of(&self.metadata, definition)?;
            let Some(index) = self.layouts.index_of(declaring, &key) else {
                return Err(crate::Error::MissingBuiltin(self.metadata.method_name(method)));
            };
            let concretes: Vec<MethodId> = self
                .layouts
                .iter()
                .filter_map(|l| l.interface_methods.get(&declaring)?.get(index).copied())
                .collect();
            for concrete in concretes {
                self.enqueue_concrete(concrete, &arguments)?;
            }
            let interface = self.escape_type(declaring)?;
            let resolve = if arguments.is_empty() {
                format!("f__resolve<{interface}, {index}>")
            } else {
                let j = self.generic_index(key, &arguments);
                format!("f__generic_resolve<{interface}, {index}, {j}>")
            };
            return Ok(Callee {
                site: Some(format!("static auto site = reinterpret_cast<void*>({resolve});")),
                function: format!(
                    "reinterpret_cast<{pointer}>(reinterpret_cast<void*(*)(void*&, t__type*)>(site)(site, {target}->f_type()))"
                ),
            });
        }

        if !def.is_virtual || def.is_final {
            let ident = self.method_ident(method)?;
            self.enqueue(method);
            return Ok(Callee::direct(ident));
        }

        self.define(declaring)?;
        let root = self.metadata.base_definition(definition);
        self.method_ident(root)?;
        let key = MethodKey::of(&self.metadata, root)?;
        let Some(index) = self.layouts.index_of(declaring, &key) else {
            let ident = self.method_ident(method)?;
            self.enqueue(method);
            return Ok(Callee::direct(ident));
        };
        let concretes: Vec<MethodId> = self
            .layouts
            .iter()
            .filter(|l| l.ty == declaring || self.metadata.is_subclass_of(l.ty, declaring))
            .filter_map(|l| l.methods.get(index).copied())
            .collect();
        for concrete in concretes {
            self.enqueue_concrete(concrete, &arguments)?;
        }
        let entry = format!("reinterpret_cast<void**>({target}->f_type() + 1)[{index}]");
        let function = if arguments.is_empty() {
            format!("reinterpret_cast<{pointer}>({entry})")
        } else {
            let j = self.generic_index(key, &arguments);
            format!("reinterpret_cast<{pointer}>(reinterpret_cast<void**>({entry})[{j}])")
        };
        Ok(Callee::direct(function))
    }

    fn has_builtin_body(&mut self, method: MethodId) -> Result<bool> {
        let builtin = Rc::clone(&self.builtin);
        Ok(builtin.body(self, method)?.is_some())
    }

    fn emit_newobj(&mut self, frame: &mut Frame, ins: &Instruction, stack: &Stack, after: &Stack) -> Result<()> {
        let method = self.token_method(frame, ins)?;
        let def = self.metadata.method(method).clone();
        let count = def.parameters.len();
        let slots: Vec<Slot> = stack.iter().take(count).cloned().collect();
        if slots.len() < count {
            return Err(frame.underflow(ins));
        }
        let result = top(frame, ins, after)?.clone();
        let ident = self.method_ident(method)?;
        self.enqueue(method);

        let mut arguments = Vec::with_capacity(count + 1);
        for (slot, parameter) in slots.iter().rev().zip(&def.parameters) {
            arguments.push(self.moved(parameter.ty, &slot.variable)?);
        }
        if self.has_builtin_body(method)? {
            let _ = writeln!(frame.out, "\t{} = {};", result.variable, call_expression(&ident, &arguments));
            return Ok(());
        }
        let declaring = def.declaring;
        if self.metadata.ty(declaring).is_value_type() {
            let scoped = self.scoped_type(declaring)?;
            arguments.insert(0, "&p".to_owned());
            let _ = writeln!(
                frame.out,
                "\t{{\n\t{scoped} p{{}};\n\t{};\n\t{} = std::move(p);\n\t}}",
                call_expression(&ident, &arguments),
                result.variable
            );
        } else {
            let type_ident = self.escape_type(declaring)?;
            arguments.insert(0, "p".to_owned());
            let _ = writeln!(
                frame.out,
                "\t{{auto p = f__new_zerod<{type_ident}>();\n\t{};\n\t{} = std::move(p);}}",
                call_expression(&ident, &arguments),
                result.variable
            );
        }
        Ok(())
    }
}
