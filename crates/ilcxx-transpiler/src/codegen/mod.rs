//! Per-opcode C++ emission.
//!
//! A method is estimated once, then emitted in a single linear pass over
//! its bytecode. Every instruction gets a label `L_xxxx` so branches are
//! plain `goto`s. Operands are named by the stacks cached in [`Frame`].
//!
//! Protected regions map onto native constructs:
//! - catch, filter and fault become `try { } catch (...) { }`; handlers
//!   sharing one protected region share one native `catch` that tests them
//!   in order, so a throw from one handler never reaches its siblings
//! - finally becomes a scope guard whose body is spliced in front of the
//!   protected code once the handler has been collected

mod arith;
mod branch;
mod calls;
mod memory;
mod objects;

use std::collections::VecDeque;
use std::fmt::Write;

use ilcxx_core::opcode::decode;
use ilcxx_core::{ClauseKind, ExceptionClause, Instruction, MethodId, Opcode, Operand, Token, TypeId};

use crate::Result;
use crate::driver::Transpiler;
use crate::estimate::Frame;
use crate::stack::{INT32, INT64, OBJECT, POINTER, Slot, Stack};

/// Escape text for a UTF-16 C++ string literal.
pub(crate) fn string_literal(value: &str) -> String {
    let mut out = String::with_capacity(value.len() + 2);
    out.push('"');
    for c in value.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            '"' => out.push_str("\\\""),
            ' '..='~' => out.push(c),
            c if (c as u32) < 0x10000 => {
                let _ = write!(out, "\\u{:04x}", c as u32);
            }
            c => {
                let _ = write!(out, "\\U{:08x}", c as u32);
            }
        }
    }
    out.push('"');
    out
}

/// Handlers protecting the same region as `clause`, in handler order.
fn siblings(clauses: &[ExceptionClause], clause: ExceptionClause) -> Vec<ExceptionClause> {
    let mut group: Vec<ExceptionClause> = clauses
        .iter()
        .filter(|c| c.try_offset == clause.try_offset && c.try_length == clause.try_length)
        .copied()
        .collect();
    group.sort_by_key(|c| c.handler_start());
    group
}

/// Statement run when `clause` does not take the exception: try the next
/// sibling handler, or rethrow after the last one.
pub(crate) fn rejection(clauses: &[ExceptionClause], clause: ExceptionClause) -> String {
    let group = siblings(clauses, clause);
    group
        .iter()
        .position(|c| *c == clause)
        .and_then(|i| group.get(i + 1))
        .map_or_else(|| "throw;".to_owned(), |next| format!("goto H_{:04x};", next.handler_start()))
}

/// Unsigned counterpart of a storage type.
pub(crate) fn unsigned_native(native: &str) -> &'static str {
    match native {
        INT32 => "uint32_t",
        INT64 => "uint64_t",
        _ => "uintptr_t",
    }
}

impl Transpiler {
    /// Translate the bytecode body of `method` into a function definition.
    pub(crate) fn translate(&mut self, method: MethodId, prototype: &str) -> Result<String> {
        let mut frame = Frame::new(self, method)?;
        self.estimate(&mut frame)?;

        let mut head = format!("{prototype}\n{{");
        for clause in &frame.clauses {
            let _ = write!(head, "\n\t// {}", self.describe_clause(clause));
        }
        head.push('\n');
        let init = if frame.init_locals { "{}" } else { "" };
        for (i, &ty) in frame.locals.clone().iter().enumerate() {
            let _ = writeln!(head, "\t{} l{i}{init};", self.scoped_type(ty)?);
        }
        for (native, (prefix, count)) in &frame.declarations {
            for i in 0..*count {
                let _ = writeln!(head, "\t{native} {prefix}{i};");
            }
        }
        head.push_str("\tf_epoch_point();\n");
        frame.out = head;

        let mut begins: Vec<ExceptionClause> = frame.clauses.clone();
        begins.sort_by_key(|c| (c.try_offset, std::cmp::Reverse(c.handler_end())));
        let mut begins = VecDeque::from(begins);

        let mut offset = 0;
        while offset < frame.il.len() {
            while let Some(clause) = begins.front().copied()
                && offset >= clause.try_offset as usize
            {
                begins.pop_front();
                self.open_region(&mut frame, clause);
            }
            if let Some(clause) = frame.tries.last().copied()
                && offset == clause.handler_start() as usize
            {
                self.enter_handler(&mut frame, clause)?;
            }

            let ins = decode(&frame.il, offset)?;
            let detail = self.detail(&frame, &ins)?;
            let _ = writeln!(frame.out, "L_{offset:04x}: // {}{detail}", ins.opcode.mnemonic());
            let mark = frame.out.len();
            if let (Some(stack), Some(after)) =
                (frame.stacks.get(&offset).cloned(), frame.after.get(&offset).cloned())
            {
                self.emit(&mut frame, &ins, &stack, &after)?;
            }
            if frame.out.len() == mark {
                frame.out.push_str("\t;\n");
            }
            offset = ins.next;

            while let Some(clause) = frame.tries.last().copied()
                && offset >= clause.handler_end() as usize
            {
                frame.tries.pop();
                self.close_region(&mut frame, clause);
            }
        }
        frame.out.push_str("}\n");
        Ok(frame.out)
    }

    fn describe_clause(&self, clause: &ExceptionClause) -> String {
        let kind = match clause.kind {
            ClauseKind::Catch(ty) => format!("catch {}", self.metadata.ty(ty).full_name()),
            ClauseKind::Filter(offset) => format!("filter {offset:04x}"),
            ClauseKind::Finally => "finally".to_owned(),
            ClauseKind::Fault => "fault".to_owned(),
        };
        format!(
            "{kind}: try {:04x} to {:04x}, handler {:04x} to {:04x}",
            clause.try_offset,
            clause.try_end(),
            clause.handler_offset,
            clause.handler_end()
        )
    }

    fn open_region(&mut self, frame: &mut Frame, clause: ExceptionClause) {
        frame.tries.push(clause);
        if clause.kind == ClauseKind::Finally {
            frame.out.push_str("{auto finally = f__finally([&]\n{\n");
            let outer = std::mem::replace(&mut frame.out, "});\n".to_owned());
            frame.writers.push(outer);
        } else if siblings(&frame.clauses, clause).last() == Some(&clause) {
            frame.out.push_str("try {\n");
        }
    }

    fn enter_handler(&mut self, frame: &mut Frame, clause: ExceptionClause) -> Result<()> {
        let start = clause.handler_start() as usize;
        let caught = frame
            .stacks
            .get(&start)
            .and_then(|s| s.top())
            .map(|s| s.variable.clone());
        let first = siblings(&frame.clauses, clause).first() == Some(&clause);
        let entry = if first {
            "} catch (t_scoped<t_slot> e) {".to_owned()
        } else {
            format!("H_{start:04x}:")
        };
        match clause.kind {
            ClauseKind::Catch(ty) => {
                let ident = self.escape_type(ty)?;
                let test = if self.metadata.ty(ty).is_interface() {
                    "f__implementation"
                } else {
                    "f__is"
                };
                let _ = writeln!(
                    frame.out,
                    "// catch {}\n{entry}\n\tif (!(e && e->f_type()->{test}(&t__type_of<{ident}>::v__instance))) {}",
                    self.metadata.ty(ty).full_name(),
                    rejection(&frame.clauses, clause)
                );
                if let Some(variable) = caught {
                    let _ = writeln!(frame.out, "\t{variable} = std::move(e);");
                }
            }
            ClauseKind::Filter(_) => {
                let _ = writeln!(frame.out, "// filter\n{entry}");
                if let Some(variable) = caught {
                    let _ = writeln!(frame.out, "\t{variable} = e;");
                }
            }
            ClauseKind::Finally => {
                let protected = std::mem::take(&mut frame.out);
                frame.writers.push(protected);
            }
            ClauseKind::Fault => frame.out.push_str("// fault\n} catch (...) {\n"),
        }
        Ok(())
    }

    fn close_region(&mut self, frame: &mut Frame, clause: ExceptionClause) {
        if siblings(&frame.clauses, clause).last() != Some(&clause) {
            return;
        }
        if clause.kind == ClauseKind::Finally {
            let handler = std::mem::take(&mut frame.out);
            let protected = frame.writers.pop().unwrap_or_default();
            frame.out = frame.writers.pop().unwrap_or_default();
            frame.out.push_str(&handler);
            frame.out.push_str(&protected);
        }
        frame.out.push_str("}\n");
    }

    /// Operand shown after the mnemonic in the label comment.
    fn detail(&self, frame: &Frame, ins: &Instruction) -> Result<String> {
        Ok(match &ins.operand {
            Operand::None => String::new(),
            Operand::Var(i) => format!(" {i}"),
            Operand::Int(i) => format!(" {i}"),
            Operand::Long(i) => format!(" {i}"),
            Operand::Single(f) => format!(" {f}"),
            Operand::Double(f) => format!(" {f}"),
            Operand::Target(t) => format!(" {t:04x}"),
            Operand::Switch(targets) => {
                let targets: Vec<String> = targets.iter().map(|t| format!("{t:04x}")).collect();
                format!(" {}", targets.join(", "))
            }
            Operand::Token(token) => match self.metadata.resolve_token(frame.method, *token)? {
                Token::Type(ty) => format!(" {}", self.metadata.ty(*ty).full_name()),
                Token::Field(field) => {
                    let def = self.metadata.field(*field);
                    format!(" {}::{}", self.metadata.ty(def.declaring).full_name(), def.name)
                }
                Token::Method(method) => format!(" {}", self.metadata.method_name(*method)),
                Token::String(s) => format!(" {}", string_literal(s)),
            },
        })
    }

    fn emit(&mut self, frame: &mut Frame, ins: &Instruction, stack: &Stack, after: &Stack) -> Result<()> {
        use Opcode::*;
        match ins.opcode {
            Nop | Break | Tail | Readonly | No | Unaligned => Ok(()),
            Volatile => {
                frame.volatile = true;
                Ok(())
            }
            Constrained => {
                let ty = self.token_type(frame, ins)?;
                frame.constrained = Some(ty);
                Ok(())
            }
            Ldarg0 | Ldarg1 | Ldarg2 | Ldarg3 | LdargS | Ldarg | LdargaS | Ldarga | StargS
            | Starg | Ldloc0 | Ldloc1 | Ldloc2 | Ldloc3 | LdlocS | Ldloc | LdlocaS | Ldloca
            | Stloc0 | Stloc1 | Stloc2 | Stloc3 | StlocS | Stloc | Ldnull | LdcI4M1 | LdcI4_0
            | LdcI4_1 | LdcI4_2 | LdcI4_3 | LdcI4_4 | LdcI4_5 | LdcI4_6 | LdcI4_7 | LdcI4_8
            | LdcI4S | LdcI4 | LdcI8 | LdcR4 | LdcR8 | Dup | Pop => {
                self.emit_load_store(frame, ins, stack, after)
            }
            Call | Callvirt | Newobj | Ldftn | Ldvirtftn | Ret => {
                self.emit_call(frame, ins, stack, after)
            }
            Br | BrS | Brfalse | BrfalseS | Brtrue | BrtrueS | Beq | BeqS | Bge | BgeS | Bgt
            | BgtS | Ble | BleS | Blt | BltS | BneUn | BneUnS | BgeUn | BgeUnS | BgtUn | BgtUnS
            | BleUn | BleUnS | BltUn | BltUnS | Switch | Leave | LeaveS | Endfinally | Endfilter
            | Throw | Rethrow => self.emit_branch(frame, ins, stack, after),
            LdindI1 | LdindU1 | LdindI2 | LdindU2 | LdindI4 | LdindU4 | LdindI8 | LdindI
            | LdindR4 | LdindR8 | LdindRef | StindRef | StindI1 | StindI2 | StindI4 | StindI8
            | StindR4 | StindR8 | StindI | Ldobj | Stobj | Cpobj | Ldfld | Ldflda | Stfld
            | Ldsfld | Ldsflda | Stsfld | Initobj | Cpblk | Initblk | Localloc | Sizeof => {
                self.emit_memory(frame, ins, stack, after)
            }
            Ldstr | Castclass | Isinst | Unbox | UnboxAny | Box | Newarr | Ldlen | Ldelema
            | LdelemI1 | LdelemU1 | LdelemI2 | LdelemU2 | LdelemI4 | LdelemU4 | LdelemI8
            | LdelemI | LdelemR4 | LdelemR8 | LdelemRef | StelemI | StelemI1 | StelemI2
            | StelemI4 | StelemI8 | StelemR4 | StelemR8 | StelemRef | Ldelem | Stelem
            | Ldtoken => self.emit_object(frame, ins, stack, after),
            Jmp | Calli | Arglist | Refanyval | Mkrefany | Refanytype => {
                Err(frame.unsupported(ins))
            }
            _ => self.emit_arithmetic(frame, ins, stack, after),
        }
    }

    fn emit_load_store(
        &mut self,
        frame: &mut Frame,
        ins: &Instruction,
        stack: &Stack,
        after: &Stack,
    ) -> Result<()> {
        use Opcode::*;
        let index = crate::estimate::variable(ins);
        let line = match ins.opcode {
            Ldarg0 | Ldarg1 | Ldarg2 | Ldarg3 | LdargS | Ldarg => {
                format!("{} = a_{index};", top(frame, ins, after)?.variable)
            }
            LdargaS | Ldarga => format!("{} = &a_{index};", top(frame, ins, after)?.variable),
            StargS | Starg => {
                let ty = frame.argument(ins, index)?;
                let value = self.moved(ty, &frame.slot(ins, stack, 0)?.variable)?;
                format!("a_{index} = {value};")
            }
            Ldloc0 | Ldloc1 | Ldloc2 | Ldloc3 | LdlocS | Ldloc => {
                format!("{} = l{index};", top(frame, ins, after)?.variable)
            }
            LdlocaS | Ldloca => format!("{} = &l{index};", top(frame, ins, after)?.variable),
            Stloc0 | Stloc1 | Stloc2 | Stloc3 | StlocS | Stloc => {
                let ty = frame.local(ins, index)?;
                let value = self.moved(ty, &frame.slot(ins, stack, 0)?.variable)?;
                format!("l{index} = {value};")
            }
            Ldnull => format!("{} = nullptr;", top(frame, ins, after)?.variable),
            Dup => format!(
                "{} = {};",
                top(frame, ins, after)?.variable,
                frame.slot(ins, stack, 0)?.variable
            ),
            Pop => {
                let slot = frame.slot(ins, stack, 0)?.clone();
                return self.release(frame, &slot);
            }
            _ => format!("{} = {};", top(frame, ins, after)?.variable, constant(ins)),
        };
        let _ = writeln!(frame.out, "\t{line}");
        Ok(())
    }

    /// Argument expression handing `variable` over to a parameter of `ty`.
    pub(crate) fn moved(&mut self, ty: TypeId, variable: &str) -> Result<String> {
        let def = self.metadata.ty(ty);
        Ok(if def.primitive() == Some(ilcxx_core::Primitive::Boolean) {
            format!("{variable} != 0")
        } else if def.is_pointer_like() {
            format!("reinterpret_cast<{}>({variable})", self.variable_type(ty)?)
        } else if def.primitive().is_some() {
            variable.to_owned()
        } else {
            format!("std::move({variable})")
        })
    }

    /// Drop the reference held by a consumed operand.
    pub(crate) fn release(&mut self, frame: &mut Frame, slot: &Slot) -> Result<()> {
        if self.is_managed(slot.ty)? {
            let _ = writeln!(frame.out, "\t{}.f__destruct();", slot.variable);
        }
        Ok(())
    }

    /// Release `slot` unless the result was written to the same variable.
    pub(crate) fn release_unless(&mut self, frame: &mut Frame, slot: &Slot, result: &Slot) -> Result<()> {
        if slot.variable == result.variable {
            return Ok(());
        }
        self.release(frame, slot)
    }

    /// Operand reinterpreted as unsigned for `.un` instructions.
    pub(crate) fn unsigned(&self, slot: &Slot) -> String {
        match slot.native.as_str() {
            POINTER => format!("reinterpret_cast<uintptr_t>({})", slot.variable),
            OBJECT => format!(
                "reinterpret_cast<uintptr_t>(static_cast<t_object*>({}))",
                slot.variable
            ),
            native => format!("static_cast<{}>({})", unsigned_native(native), slot.variable),
        }
    }

    pub(crate) fn token_type(&self, frame: &Frame, ins: &Instruction) -> Result<TypeId> {
        let token = ins.token().ok_or_else(|| frame.invalid(ins, "missing token"))?;
        Ok(self.metadata.resolve_type(frame.method, token)?)
    }

    pub(crate) fn token_method(&self, frame: &Frame, ins: &Instruction) -> Result<MethodId> {
        let token = ins.token().ok_or_else(|| frame.invalid(ins, "missing token"))?;
        Ok(self.metadata.resolve_method(frame.method, token)?)
    }

    pub(crate) fn token_field(&self, frame: &Frame, ins: &Instruction) -> Result<ilcxx_core::FieldId> {
        let token = ins.token().ok_or_else(|| frame.invalid(ins, "missing token"))?;
        Ok(self.metadata.resolve_field(frame.method, token)?)
    }

    /// Emit `line` between acquire and release fences after `volatile.`.
    pub(crate) fn with_volatile(&self, frame: &mut Frame, lines: &str) {
        let volatile = std::mem::take(&mut frame.volatile);
        if volatile {
            frame.out.push_str("\tstd::atomic_thread_fence(std::memory_order_release);\n");
        }
        frame.out.push_str(lines);
        if volatile {
            frame.out.push_str("\tstd::atomic_thread_fence(std::memory_order_acquire);\n");
        }
    }

    /// Jump to `target`; backward jumps pass an epoch point first.
    pub(crate) fn goto(&self, ins: &Instruction, target: usize) -> String {
        if target <= ins.offset {
            format!("{{\n\t\tf_epoch_point();\n\t\tgoto L_{target:04x};\n\t}}")
        } else {
            format!("goto L_{target:04x};")
        }
    }
}

/// Result operand of an instruction that pushes.
pub(crate) fn top<'a>(frame: &Frame, ins: &Instruction, after: &'a Stack) -> Result<&'a Slot> {
    after.top().ok_or_else(|| frame.underflow(ins))
}

/// C++ literal of an `ldc.*` operand.
fn constant(ins: &Instruction) -> String {
    use Opcode::*;
    match (ins.opcode, &ins.operand) {
        (LdcI4M1, _) => "-1".to_owned(),
        (LdcI4_0, _) => "0".to_owned(),
        (LdcI4_1, _) => "1".to_owned(),
        (LdcI4_2, _) => "2".to_owned(),
        (LdcI4_3, _) => "3".to_owned(),
        (LdcI4_4, _) => "4".to_owned(),
        (LdcI4_5, _) => "5".to_owned(),
        (LdcI4_6, _) => "6".to_owned(),
        (LdcI4_7, _) => "7".to_owned(),
        (LdcI4_8, _) => "8".to_owned(),
        (_, Operand::Int(i32::MIN)) => format!("{} - 1", i32::MIN + 1),
        (_, Operand::Int(i)) => i.to_string(),
        (_, Operand::Long(i64::MIN)) => format!("{}LL - 1", i64::MIN + 1),
        (_, Operand::Long(i)) => format!("{i}LL"),
        (_, Operand::Single(f)) => float_literal(f64::from(*f), "float", "f"),
        (_, Operand::Double(f)) => float_literal(*f, "double", ""),
        _ => "0".to_owned(),
    }
}

fn float_literal(value: f64, ty: &str, suffix: &str) -> String {
    if value.is_nan() {
        format!("std::numeric_limits<{ty}>::quiet_NaN()")
    } else if value.is_infinite() {
        let sign = if value < 0.0 { "-" } else { "" };
        format!("{sign}std::numeric_limits<{ty}>::infinity()")
    } else if suffix.is_empty() {
        format!("{value:e}")
    } else {
        format!("{:e}{suffix}", value as f32)
    }
}
