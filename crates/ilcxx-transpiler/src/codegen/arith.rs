//! Arithmetic, comparison and conversion instructions.

use std::fmt::Write;

use ilcxx_core::{Instruction, Opcode, Primitive};

use super::{top, unsigned_native};
use crate::Result;
use crate::driver::Transpiler;
use crate::estimate::{Frame, Overflow, conversion};
use crate::naming::cxx_primitive;
use crate::stack::{FLOAT, INT32, NATIVE_INT, OBJECT, POINTER, Slot, Stack};

/// Operand as a signed integer of its own width.
fn signed(slot: &Slot) -> String {
    match slot.native.as_str() {
        POINTER => format!("reinterpret_cast<intptr_t>({})", slot.variable),
        _ => slot.variable.clone(),
    }
}

/// Operand converted to the unsigned type `unsigned`, keeping its value
/// modulo the width.
fn wrapped(slot: &Slot, unsigned: &str) -> String {
    match slot.native.as_str() {
        POINTER => format!("reinterpret_cast<uintptr_t>({})", slot.variable),
        _ => format!("static_cast<{unsigned}>({})", slot.variable),
    }
}

/// Store `value` of an integer expression into `result`.
fn narrowed(result: &Slot, value: &str) -> String {
    if result.native == POINTER {
        format!("reinterpret_cast<void*>({value})")
    } else {
        format!("static_cast<{}>({value})", result.native)
    }
}

fn operator(opcode: Opcode) -> &'static str {
    use Opcode::*;
    match opcode {
        Add | AddOvf | AddOvfUn => "+",
        Sub | SubOvf | SubOvfUn => "-",
        Mul | MulOvf | MulOvfUn => "*",
        Div | DivUn => "/",
        Rem | RemUn => "%",
        And => "&",
        Or => "|",
        Xor => "^",
        Shl => "<<",
        Shr | ShrUn => ">>",
        Ceq => "==",
        Cgt | CgtUn => ">",
        Clt | CltUn => "<",
        _ => "",
    }
}

fn builtin_overflow(opcode: Opcode) -> &'static str {
    match opcode {
        Opcode::AddOvf | Opcode::AddOvfUn => "__builtin_add_overflow",
        Opcode::SubOvf | Opcode::SubOvfUn => "__builtin_sub_overflow",
        _ => "__builtin_mul_overflow",
    }
}

impl Transpiler {
    pub(super) fn emit_arithmetic(
        &mut self,
        frame: &mut Frame,
        ins: &Instruction,
        stack: &Stack,
        after: &Stack,
    ) -> Result<()> {
        use Opcode::*;
        if let Some((p, overflow)) = conversion(ins.opcode) {
            return self.emit_conversion(frame, ins, stack, after, p, overflow);
        }
        match ins.opcode {
            Add | Sub | Mul => {
                let (left, right, result) = binary(frame, ins, stack, after)?;
                let op = operator(ins.opcode);
                let line = if result.native == FLOAT {
                    format!("{} = {} {op} {};", result.variable, left.variable, right.variable)
                } else {
                    let u = unsigned_native(&result.native);
                    let value = format!("{} {op} {}", wrapped(&left, u), wrapped(&right, u));
                    format!("{} = {};", result.variable, narrowed(&result, &value))
                };
                let _ = writeln!(frame.out, "\t{line}");
            }
            Div | Rem => {
                let (left, right, result) = binary(frame, ins, stack, after)?;
                if result.native == FLOAT {
                    let value = if ins.opcode == Div {
                        format!("{} / {}", left.variable, right.variable)
                    } else {
                        format!("std::fmod({}, {})", left.variable, right.variable)
                    };
                    let _ = writeln!(frame.out, "\t{} = {value};", result.variable);
                } else {
                    let _ = writeln!(
                        frame.out,
                        "\tif ({r} == 0) f__throw_divide_by_zero();\n\tif ({r} == -1 && {l} == std::numeric_limits<{t}>::min()) f__throw_overflow();\n\t{a} = {l} {op} {r};",
                        r = right.variable,
                        l = left.variable,
                        t = result.native,
                        a = result.variable,
                        op = operator(ins.opcode)
                    );
                }
            }
            DivUn | RemUn => {
                let (left, right, result) = binary(frame, ins, stack, after)?;
                let u = unsigned_native(&result.native);
                let value = format!(
                    "{} {} {}",
                    wrapped(&left, u),
                    operator(ins.opcode),
                    self.unsigned(&right)
                );
                let _ = writeln!(
                    frame.out,
                    "\tif ({} == 0) f__throw_divide_by_zero();\n\t{} = {};",
                    right.variable,
                    result.variable,
                    narrowed(&result, &value)
                );
            }
            And | Or | Xor => {
                let (left, right, result) = binary(frame, ins, stack, after)?;
                let _ = writeln!(
                    frame.out,
                    "\t{} = {} {} {};",
                    result.variable,
                    signed(&left),
                    operator(ins.opcode),
                    signed(&right)
                );
            }
            Shl | ShrUn => {
                let (left, right, result) = binary(frame, ins, stack, after)?;
                let u = unsigned_native(&result.native);
                let value = format!("{} {} {}", wrapped(&left, u), operator(ins.opcode), right.variable);
                let _ = writeln!(frame.out, "\t{} = {};", result.variable, narrowed(&result, &value));
            }
            Shr => {
                let (left, right, result) = binary(frame, ins, stack, after)?;
                let _ = writeln!(
                    frame.out,
                    "\t{} = {} >> {};",
                    result.variable, left.variable, right.variable
                );
            }
            AddOvf | SubOvf | MulOvf | AddOvfUn | SubOvfUn | MulOvfUn => {
                let (left, right, result) = binary(frame, ins, stack, after)?;
                let builtin = builtin_overflow(ins.opcode);
                let unsigned = matches!(ins.opcode, AddOvfUn | SubOvfUn | MulOvfUn);
                let (wide, x, y) = if unsigned {
                    (
                        unsigned_native(&result.native).to_owned(),
                        self.unsigned(&left),
                        self.unsigned(&right),
                    )
                } else if result.native == POINTER {
                    (NATIVE_INT.to_owned(), signed(&left), signed(&right))
                } else {
                    (result.native.clone(), signed(&left), signed(&right))
                };
                let _ = writeln!(
                    frame.out,
                    "\t{{\n\t\t{wide} r;\n\t\tif ({builtin}({x}, {y}, &r)) f__throw_overflow();\n\t\t{} = {};\n\t}}",
                    result.variable,
                    narrowed(&result, "r")
                );
            }
            Neg => {
                let value = frame.slot(ins, stack, 0)?.clone();
                let line = if value.native == FLOAT {
                    format!("{0} = -{0};", value.variable)
                } else {
                    let u = unsigned_native(&value.native);
                    format!(
                        "{} = {};",
                        value.variable,
                        narrowed(&value, &format!("-{}", wrapped(&value, u)))
                    )
                };
                let _ = writeln!(frame.out, "\t{line}");
            }
            Not => {
                let value = frame.slot(ins, stack, 0)?.clone();
                let _ = writeln!(frame.out, "\t{0} = ~{0};", value.variable);
            }
            Ckfinite => {
                let value = frame.slot(ins, stack, 0)?.clone();
                let _ = writeln!(
                    frame.out,
                    "\tif (!std::isfinite({})) f__throw_not_finite();",
                    value.variable
                );
            }
            Ceq | Cgt | Clt | CgtUn | CltUn => {
                let (left, right, result) = binary(frame, ins, stack, after)?;
                let condition = self.condition(ins.opcode, &left, &right);
                let _ = writeln!(frame.out, "\t{} = {condition} ? 1 : 0;", result.variable);
                self.release(frame, &left)?;
                self.release(frame, &right)?;
            }
            _ => return Err(frame.unsupported(ins)),
        }
        Ok(())
    }

    /// Boolean C++ expression comparing two operands.
    ///
    /// Accepts the comparison and the compare-and-branch opcodes.
    pub(crate) fn condition(&self, opcode: Opcode, left: &Slot, right: &Slot) -> String {
        use Opcode::*;
        let op = match opcode {
            Ceq | Beq | BeqS => "==",
            BneUn | BneUnS => "!=",
            Cgt | CgtUn | Bgt | BgtS | BgtUn | BgtUnS => ">",
            Clt | CltUn | Blt | BltS | BltUn | BltUnS => "<",
            Bge | BgeS | BgeUn | BgeUnS => ">=",
            _ => "<=",
        };
        let unordered = matches!(
            opcode,
            CgtUn | CltUn | BneUn | BneUnS | BgeUn | BgeUnS | BgtUn | BgtUnS | BleUn | BleUnS
                | BltUn | BltUnS
        );
        if left.native == FLOAT || right.native == FLOAT {
            let comparison = format!("{} {op} {}", left.variable, right.variable);
            return if unordered && op != "!=" {
                format!("std::isunordered({}, {}) || {comparison}", left.variable, right.variable)
            } else {
                comparison
            };
        }
        if unordered && op != "!=" {
            return format!("{} {op} {}", self.unsigned(left), self.unsigned(right));
        }
        let (l, r) = comparable(left, right);
        format!("{l} {op} {r}")
    }

    fn emit_conversion(
        &mut self,
        frame: &mut Frame,
        ins: &Instruction,
        stack: &Stack,
        after: &Stack,
        p: Primitive,
        overflow: Overflow,
    ) -> Result<()> {
        let source = frame.slot(ins, stack, 0)?.clone();
        let result = top(frame, ins, after)?.clone();
        let target = cxx_primitive(p);
        let value = match source.native.as_str() {
            POINTER | OBJECT => self.unsigned(&source),
            INT32 if p.is_unsigned() && overflow == Overflow::Unchecked => self.unsigned(&source),
            _ if overflow == Overflow::CheckedUnsigned || ins.opcode == Opcode::ConvRUn => {
                self.unsigned(&source)
            }
            _ => source.variable.clone(),
        };
        if overflow != Overflow::Unchecked {
            if source.native == FLOAT {
                let _ = writeln!(
                    frame.out,
                    "\tif (!(std::trunc({value}) >= static_cast<double>(std::numeric_limits<{target}>::min()) && {value} < static_cast<double>(std::numeric_limits<{target}>::max()) + 1.0)) f__throw_overflow();"
                );
            } else {
                let _ = writeln!(
                    frame.out,
                    "\tif (!std::in_range<{target}>({value})) f__throw_overflow();"
                );
            }
        }
        let _ = writeln!(frame.out, "\t{} = static_cast<{target}>({value});", result.variable);
        self.release_unless(frame, &source, &result)
    }
}

fn binary(frame: &Frame, ins: &Instruction, stack: &Stack, after: &Stack) -> Result<(Slot, Slot, Slot)> {
    let right = frame.slot(ins, stack, 0)?.clone();
    let left = frame.slot(ins, stack, 1)?.clone();
    let result = top(frame, ins, after)?.clone();
    Ok((left, right, result))
}

/// Operands of an ordered comparison, cast to a common kind.
fn comparable(left: &Slot, right: &Slot) -> (String, String) {
    let cast = |slot: &Slot, other: &Slot| match (slot.native.as_str(), other.native.as_str()) {
        (OBJECT, _) => format!("static_cast<t_object*>({})", slot.variable),
        (POINTER, POINTER) => format!("reinterpret_cast<char*>({})", slot.variable),
        (POINTER, _) => format!("reinterpret_cast<intptr_t>({})", slot.variable),
        _ => slot.variable.clone(),
    };
    (cast(left, right), cast(right, left))
}
