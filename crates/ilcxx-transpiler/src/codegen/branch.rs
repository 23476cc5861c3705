//! Branches, switches and exception control flow.

use std::fmt::Write;

use ilcxx_core::{ClauseKind, Instruction, Opcode, Operand};

use super::{rejection, top};
use crate::Result;
use crate::driver::Transpiler;
use crate::estimate::Frame;
use crate::stack::Stack;

impl Transpiler {
    pub(super) fn emit_branch(
        &mut self,
        frame: &mut Frame,
        ins: &Instruction,
        stack: &Stack,
        after: &Stack,
    ) -> Result<()> {
        use Opcode::*;
        match ins.opcode {
            Br | BrS => {
                let target = target(frame, ins)?;
                if target <= ins.offset {
                    frame.out.push_str("\tf_epoch_point();\n");
                }
                let _ = writeln!(frame.out, "\tgoto L_{target:04x};");
            }
            Brtrue | BrtrueS | Brfalse | BrfalseS => {
                let value = frame.slot(ins, stack, 0)?.clone();
                let goto = self.goto(ins, target(frame, ins)?);
                let negate = if matches!(ins.opcode, Brfalse | BrfalseS) { "!" } else { "" };
                if self.is_managed(value.ty)? {
                    let _ = writeln!(
                        frame.out,
                        "\t{{bool b = {negate}static_cast<bool>({});",
                        value.variable
                    );
                    self.release(frame, &value)?;
                    let _ = writeln!(frame.out, "\tif (b) {goto}}}");
                } else {
                    let _ = writeln!(frame.out, "\tif ({negate}{}) {goto}", value.variable);
                }
            }
            Beq | BeqS | Bge | BgeS | Bgt | BgtS | Ble | BleS | Blt | BltS | BneUn | BneUnS
            | BgeUn | BgeUnS | BgtUn | BgtUnS | BleUn | BleUnS | BltUn | BltUnS => {
                let right = frame.slot(ins, stack, 0)?.clone();
                let left = frame.slot(ins, stack, 1)?.clone();
                let goto = self.goto(ins, target(frame, ins)?);
                let condition = self.condition(ins.opcode, &left, &right);
                if self.is_managed(left.ty)? || self.is_managed(right.ty)? {
                    let _ = writeln!(frame.out, "\t{{bool b = {condition};");
                    self.release(frame, &left)?;
                    self.release(frame, &right)?;
                    let _ = writeln!(frame.out, "\tif (b) {goto}}}");
                } else {
                    let _ = writeln!(frame.out, "\tif ({condition}) {goto}");
                }
            }
            Switch => {
                let value = frame.slot(ins, stack, 0)?.clone();
                let Operand::Switch(targets) = &ins.operand else {
                    return Err(frame.invalid(ins, "missing switch table"));
                };
                let _ = writeln!(frame.out, "\tswitch ({}) {{", value.variable);
                for (i, &t) in targets.iter().enumerate() {
                    let _ = writeln!(frame.out, "\tcase {i}:\n\t\t{}", self.goto(ins, t));
                }
                frame.out.push_str("\t}\n");
            }
            Leave | LeaveS => {
                for slot in stack.iter() {
                    self.release(frame, slot)?;
                }
                let target = target(frame, ins)?;
                if target <= ins.offset {
                    frame.out.push_str("\tf_epoch_point();\n");
                }
                let _ = writeln!(frame.out, "\tgoto L_{target:04x};");
            }
            Endfinally => {
                let fault = frame
                    .tries
                    .iter()
                    .rev()
                    .find(|c| {
                        (c.handler_offset as usize..c.handler_end() as usize).contains(&ins.offset)
                    })
                    .is_some_and(|c| c.kind == ClauseKind::Fault);
                frame.out.push_str(if fault { "\tthrow;\n" } else { "\treturn;\n" });
            }
            Endfilter => {
                let value = frame.slot(ins, stack, 0)?.clone();
                let exception = top(frame, ins, after)?.clone();
                let rejected = frame
                    .tries
                    .iter()
                    .rev()
                    .find(|c| {
                        matches!(c.kind, ClauseKind::Filter(start)
                            if (start as usize..c.handler_offset as usize).contains(&ins.offset))
                    })
                    .map_or_else(|| "throw;".to_owned(), |&c| rejection(&frame.clauses, c));
                let _ = writeln!(
                    frame.out,
                    "\tif (!{}) {rejected}\n\t{} = std::move(e);",
                    value.variable, exception.variable
                );
            }
            Throw => {
                let value = frame.slot(ins, stack, 0)?.clone();
                let _ = writeln!(frame.out, "\tthrow t_scoped<t_slot>(std::move({}));", value.variable);
            }
            Rethrow => frame.out.push_str("\tthrow;\n"),
            _ => return Err(frame.unsupported(ins)),
        }
        Ok(())
    }
}

fn target(frame: &Frame, ins: &Instruction) -> Result<usize> {
    ins.target().ok_or_else(|| frame.invalid(ins, "missing target"))
}
