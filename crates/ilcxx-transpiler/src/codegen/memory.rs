//! Indirect access, fields, statics and raw memory blocks.

use ilcxx_core::{FieldId, Instruction, Opcode};

use super::top;
use crate::Result;
use crate::driver::Transpiler;
use crate::estimate::{Frame, indirect};
use crate::naming::cxx_primitive;
use crate::stack::{FLOAT, INT32, INT64, NATIVE_INT, OBJECT, POINTER, Slot, Stack};

/// `slot` viewed as a pointer to `target`.
fn address(slot: &Slot, target: &str) -> String {
    if slot.native == OBJECT {
        format!("static_cast<{target}*>({})", slot.variable)
    } else {
        format!("reinterpret_cast<{target}*>({})", slot.variable)
    }
}

fn as_void(slot: &Slot) -> String {
    if slot.native == POINTER {
        slot.variable.clone()
    } else {
        format!("reinterpret_cast<void*>({})", slot.variable)
    }
}

/// Inline value struct held directly in a stack variable.
fn is_value(slot: &Slot) -> bool {
    ![POINTER, INT32, INT64, NATIVE_INT, FLOAT, OBJECT].contains(&slot.native.as_str())
}

impl Transpiler {
    pub(super) fn emit_memory(
        &mut self,
        frame: &mut Frame,
        ins: &Instruction,
        stack: &Stack,
        after: &Stack,
    ) -> Result<()> {
        use Opcode::*;
        let line = match ins.opcode {
            LdindI1 | LdindU1 | LdindI2 | LdindU2 | LdindI4 | LdindU4 | LdindI8 | LdindI
            | LdindR4 | LdindR8 => {
                let p = indirect(ins.opcode).map_or("int32_t", cxx_primitive);
                let source = frame.slot(ins, stack, 0)?;
                format!("{} = *{};", top(frame, ins, after)?.variable, address(source, p))
            }
            LdindRef => {
                let source = frame.slot(ins, stack, 0)?.clone();
                let result = top(frame, ins, after)?.clone();
                let variable = self.variable_type(result.ty)?;
                format!("{} = *{};", result.variable, address(&source, &variable))
            }
            StindI1 | StindI2 | StindI4 | StindI8 | StindR4 | StindR8 | StindI => {
                let p = indirect(ins.opcode).map_or("int32_t", cxx_primitive);
                let value = frame.slot(ins, stack, 0)?;
                let target = frame.slot(ins, stack, 1)?;
                let cast = if value.native == POINTER { "reinterpret_cast" } else { "static_cast" };
                format!("*{} = {cast}<{p}>({});", address(target, p), value.variable)
            }
            StindRef => {
                let value = frame.slot(ins, stack, 0)?;
                let target = frame.slot(ins, stack, 1)?;
                format!(
                    "*{} = std::move({});",
                    address(target, "t_slot_of<t_object>"),
                    value.variable
                )
            }
            Ldobj => {
                let ty = self.token_type(frame, ins)?;
                let variable = self.variable_type(ty)?;
                let source = frame.slot(ins, stack, 0)?;
                format!("{} = *{};", top(frame, ins, after)?.variable, address(source, &variable))
            }
            Stobj => {
                let ty = self.token_type(frame, ins)?;
                let variable = self.variable_type(ty)?;
                let value = frame.slot(ins, stack, 0)?.variable.clone();
                let target = address(frame.slot(ins, stack, 1)?, &variable);
                format!("*{target} = {};", self.moved(ty, &value)?)
            }
            Cpobj => {
                let ty = self.token_type(frame, ins)?;
                let variable = self.variable_type(ty)?;
                let source = frame.slot(ins, stack, 0)?;
                let target = frame.slot(ins, stack, 1)?;
                format!("*{} = *{};", address(target, &variable), address(source, &variable))
            }
            Initobj => {
                let ty = self.token_type(frame, ins)?;
                let variable = self.variable_type(ty)?;
                format!("*{} = {{}};", address(frame.slot(ins, stack, 0)?, &variable))
            }
            Cpblk => {
                let size = frame.slot(ins, stack, 0)?;
                let source = frame.slot(ins, stack, 1)?;
                let target = frame.slot(ins, stack, 2)?;
                format!("std::memcpy({}, {}, {});", as_void(target), as_void(source), size.variable)
            }
            Initblk => {
                let size = frame.slot(ins, stack, 0)?;
                let value = frame.slot(ins, stack, 1)?;
                let target = frame.slot(ins, stack, 2)?;
                format!("std::memset({}, {}, {});", as_void(target), value.variable, size.variable)
            }
            Localloc => {
                let size = frame.slot(ins, stack, 0)?.variable.clone();
                let result = top(frame, ins, after)?.variable.clone();
                let mut line = format!("{result} = alloca({size});");
                if frame.init_locals {
                    line.push_str(&format!("\n\tstd::memset({result}, 0, {size});"));
                }
                line
            }
            Sizeof => {
                let ty = self.token_type(frame, ins)?;
                let variable = self.variable_type(ty)?;
                format!("{} = sizeof({variable});", top(frame, ins, after)?.variable)
            }
            Ldfld | Ldflda | Stfld => return self.emit_field(frame, ins, stack, after),
            Ldsfld | Ldsflda | Stsfld => return self.emit_static(frame, ins, stack, after),
            _ => return Err(frame.unsupported(ins)),
        };
        self.with_volatile(frame, &format!("\t{line}\n"));
        Ok(())
    }

    /// Member access expression for an instance field of the object or
    /// value addressed by `target`.
    fn field_access(&mut self, field: FieldId, target: &Slot) -> Result<String> {
        let name = self.field_ident(field);
        if is_value(target) {
            return Ok(format!("{}.{name}", target.variable));
        }
        let declaring = self.metadata.field(field).declaring;
        let mut ident = self.escape_type(declaring)?;
        if self.metadata.ty(declaring).is_value_type() {
            ident.push_str("::t_value");
        }
        Ok(format!("{}->{name}", address(target, &ident)))
    }

    fn emit_field(&mut self, frame: &mut Frame, ins: &Instruction, stack: &Stack, after: &Stack) -> Result<()> {
        let field = self.token_field(frame, ins)?;
        match ins.opcode {
            Opcode::Stfld => {
                let value = frame.slot(ins, stack, 0)?.clone();
                let target = frame.slot(ins, stack, 1)?.clone();
                let access = self.field_access(field, &target)?;
                let ty = self.metadata.field(field).ty;
                let value = self.moved(ty, &value.variable)?;
                self.with_volatile(frame, &format!("\t{access} = {value};\n"));
                self.release(frame, &target)
            }
            opcode => {
                let target = frame.slot(ins, stack, 0)?.clone();
                let result = top(frame, ins, after)?.clone();
                let access = self.field_access(field, &target)?;
                let reference = if opcode == Opcode::Ldflda { "&" } else { "" };
                self.with_volatile(frame, &format!("\t{} = {reference}{access};\n", result.variable));
                self.release_unless(frame, &target, &result)
            }
        }
    }

    /// Storage of a static field in the per-process or per-thread holder.
    pub(crate) fn static_access(&mut self, field: FieldId) -> Result<String> {
        let def = self.metadata.field(field).clone();
        let ident = self.escape_type(def.declaring)?;
        let name = self.field_ident(field);
        Ok(if def.is_thread_static {
            format!("t_thread_static::v_instance->v_{ident}.{name}")
        } else {
            format!("t_static::v_instance->v_{ident}->{name}")
        })
    }

    fn emit_static(&mut self, frame: &mut Frame, ins: &Instruction, stack: &Stack, after: &Stack) -> Result<()> {
        let field = self.token_field(frame, ins)?;
        let access = self.static_access(field)?;
        let line = match ins.opcode {
            Opcode::Stsfld => {
                let value = frame.slot(ins, stack, 0)?.variable.clone();
                let ty = self.metadata.field(field).ty;
                format!("{access} = {};", self.moved(ty, &value)?)
            }
            Opcode::Ldsflda => format!("{} = &{access};", top(frame, ins, after)?.variable),
            _ => format!("{} = {access};", top(frame, ins, after)?.variable),
        };
        self.with_volatile(frame, &format!("\t{line}\n"));
        Ok(())
    }
}
