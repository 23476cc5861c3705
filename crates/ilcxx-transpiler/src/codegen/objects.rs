//! Strings, casts, boxing, arrays and runtime handles.

use std::fmt::Write;

use ilcxx_core::{Instruction, Opcode, Token, TypeId, TypeKind};

use super::{string_literal, top};
use crate::Result;
use crate::driver::Transpiler;
use crate::estimate::{Frame, indirect};
use crate::naming::field_thunk;
use crate::stack::{Slot, Stack};

impl Transpiler {
    pub(super) fn emit_object(
        &mut self,
        frame: &mut Frame,
        ins: &Instruction,
        stack: &Stack,
        after: &Stack,
    ) -> Result<()> {
        use Opcode::*;
        match ins.opcode {
            Ldstr => {
                let token = ins.token().ok_or_else(|| frame.invalid(ins, "missing token"))?;
                let value = string_literal(self.metadata.resolve_string(frame.method, token)?);
                let result = top(frame, ins, after)?;
                let _ = writeln!(frame.out, "\t{} = f__new_string(u{value}sv);", result.variable);
            }
            Castclass | Isinst => {
                let ty = self.token_type(frame, ins)?;
                let value = frame.slot(ins, stack, 0)?.clone();
                let result = top(frame, ins, after)?.clone();
                self.emit_cast(frame, ty, &value, &result, ins.opcode == Isinst)?;
            }
            Box => {
                let ty = self.token_type(frame, ins)?;
                let value = frame.slot(ins, stack, 0)?.clone();
                let result = top(frame, ins, after)?.clone();
                if self.metadata.ty(ty).is_value_type() {
                    let ident = self.escape_type(ty)?;
                    let moved = self.moved(ty, &value.variable)?;
                    let _ = writeln!(
                        frame.out,
                        "\t{} = f__new_constructed<{ident}>({moved});",
                        result.variable
                    );
                } else if value.variable != result.variable {
                    let _ = writeln!(frame.out, "\t{} = std::move({});", result.variable, value.variable);
                }
            }
            Unbox | UnboxAny => {
                let ty = self.token_type(frame, ins)?;
                let value = frame.slot(ins, stack, 0)?.clone();
                let result = top(frame, ins, after)?.clone();
                if !self.metadata.ty(ty).is_value_type() {
                    return self.emit_cast(frame, ty, &value, &result, false);
                }
                let ident = self.escape_type(ty)?;
                let reference = if ins.opcode == Unbox { "&" } else { "" };
                let _ = writeln!(
                    frame.out,
                    "\tif (!({v} && {v}->f_type() == &t__type_of<{ident}>::v__instance)) f__throw_invalid_cast();\n\t{a} = {reference}static_cast<{ident}*>({v})->v__value;",
                    v = value.variable,
                    a = result.variable
                );
                self.release_unless(frame, &value, &result)?;
            }
            Newarr => {
                let element = self.token_type(frame, ins)?;
                let count = frame.slot(ins, stack, 0)?.clone();
                let result = top(frame, ins, after)?.clone();
                let array = self.escape_type(result.ty)?;
                let variable = self.variable_type(element)?;
                let _ = writeln!(
                    frame.out,
                    "\t{} = f__new_array<{array}, {variable}>({});",
                    result.variable, count.variable
                );
            }
            Ldlen => {
                let array = frame.slot(ins, stack, 0)?.clone();
                let result = top(frame, ins, after)?.clone();
                let ident = self.array_ident(&array, None)?;
                let _ = writeln!(
                    frame.out,
                    "\t{} = static_cast<{ident}*>({})->v__length;",
                    result.variable, array.variable
                );
                self.release_unless(frame, &array, &result)?;
            }
            Ldelema | LdelemI1 | LdelemU1 | LdelemI2 | LdelemU2 | LdelemI4 | LdelemU4 | LdelemI8
            | LdelemI | LdelemR4 | LdelemR8 | LdelemRef | Ldelem => {
                let element = match ins.opcode {
                    Ldelema | Ldelem => Some(self.token_type(frame, ins)?),
                    LdelemRef => None,
                    opcode => indirect(opcode).map(|p| self.metadata.primitive(p)),
                };
                let index = frame.slot(ins, stack, 0)?.clone();
                let array = frame.slot(ins, stack, 1)?.clone();
                let result = top(frame, ins, after)?.clone();
                let access = self.element_access(&array, &index, element)?;
                let reference = if ins.opcode == Ldelema { "&" } else { "" };
                let _ = writeln!(frame.out, "\t{} = {reference}{access};", result.variable);
                self.release_unless(frame, &array, &result)?;
            }
            StelemI | StelemI1 | StelemI2 | StelemI4 | StelemI8 | StelemR4 | StelemR8
            | StelemRef | Stelem => {
                let value = frame.slot(ins, stack, 0)?.clone();
                let index = frame.slot(ins, stack, 1)?.clone();
                let array = frame.slot(ins, stack, 2)?.clone();
                let element = match ins.opcode {
                    Stelem => Some(self.token_type(frame, ins)?),
                    StelemRef => None,
                    opcode => indirect(opcode).map(|p| self.metadata.primitive(p)),
                };
                let access = self.element_access(&array, &index, element)?;
                let ty = match element {
                    Some(ty) => ty,
                    None => self.array_element(&array).unwrap_or(value.ty),
                };
                let moved = self.moved(ty, &value.variable)?;
                let _ = writeln!(frame.out, "\t{access} = {moved};");
                self.release(frame, &array)?;
            }
            Ldtoken => self.emit_ldtoken(frame, ins, after)?,
            _ => return Err(frame.unsupported(ins)),
        }
        Ok(())
    }

    /// `castclass` raises on mismatch; `isinst` yields null instead.
    fn emit_cast(
        &mut self,
        frame: &mut Frame,
        ty: TypeId,
        value: &Slot,
        result: &Slot,
        test: bool,
    ) -> Result<()> {
        let ident = self.escape_type(ty)?;
        let check = if self.metadata.ty(ty).is_interface() {
            "f__implementation"
        } else {
            "f__is"
        };
        let v = &value.variable;
        let mismatch = if test {
            format!("{v} = {{}};")
        } else {
            "f__throw_invalid_cast();".to_owned()
        };
        let _ = writeln!(
            frame.out,
            "\tif ({v} && !{v}->f_type()->{check}(&t__type_of<{ident}>::v__instance)) {mismatch}"
        );
        if result.variable != value.variable {
            let _ = writeln!(frame.out, "\t{} = std::move({v});", result.variable);
        }
        Ok(())
    }

    fn array_element(&self, array: &Slot) -> Option<TypeId> {
        match self.metadata.ty(array.ty).kind {
            TypeKind::Array { element, .. } => Some(element),
            _ => None,
        }
    }

    /// Array type of an operand, falling back to a vector of `element`.
    fn array_ident(&mut self, array: &Slot, element: Option<TypeId>) -> Result<String> {
        if self.metadata.ty(array.ty).is_array() {
            return self.escape_type(array.ty);
        }
        let element = element.unwrap_or(self.metadata.well_known().object);
        let vector = self.metadata.array_of(element, 1);
        self.escape_type(vector)
    }

    fn element_access(&mut self, array: &Slot, index: &Slot, element: Option<TypeId>) -> Result<String> {
        let ident = self.array_ident(array, element)?;
        Ok(format!(
            "static_cast<{ident}*>({})->f__data()[{}]",
            array.variable, index.variable
        ))
    }

    fn emit_ldtoken(&mut self, frame: &mut Frame, ins: &Instruction, after: &Stack) -> Result<()> {
        let token = ins.token().ok_or_else(|| frame.invalid(ins, "missing token"))?;
        let result = top(frame, ins, after)?.clone();
        let handle = self.escape_type(result.ty)?;
        let value = match self.metadata.resolve_token(frame.method, token)?.clone() {
            Token::Type(ty) => format!("&t__type_of<{}>::v__instance", self.escape_type(ty)?),
            Token::Field(field) => {
                let def = self.metadata.field(field).clone();
                if !def.is_static {
                    return Err(frame.invalid(ins, format!("ldtoken of instance field `{}`", def.name)));
                }
                let declaring = self.escape_type(def.declaring)?;
                format!("{}()", field_thunk(&declaring, &def.name))
            }
            Token::Method(method) => {
                let ident = self.method_ident(method)?;
                self.enqueue(method);
                format!("reinterpret_cast<void*>(&{ident})")
            }
            Token::String(_) => return Err(frame.invalid(ins, "ldtoken of a string")),
        };
        let _ = writeln!(frame.out, "\t{} = {handle}::t_value{{{value}}};", result.variable);
        Ok(())
    }
}
