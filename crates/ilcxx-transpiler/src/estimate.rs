//! Operand-stack type estimation.
//!
//! A forward abstract interpretation over one method body. Every reachable
//! offset gets the stack in effect on entry and the stack after the
//! instruction; the code generator only reads these cached stacks. An offset
//! reached twice must see the same sequence of storage types.

use std::collections::{BTreeMap, HashMap, VecDeque};

use ilcxx_core::opcode::decode;
use ilcxx_core::{
    ClauseKind, ExceptionClause, Instruction, MethodId, Opcode, Operand, Primitive, Token, TypeId,
    TypeKind,
};
use tracing::trace;

use crate::driver::Transpiler;
use crate::stack::{FLOAT, INT32, INT64, NATIVE_INT, POINTER, Slot, Stack};
use crate::{Error, Result};

/// Per-method translation state shared by the estimator and the generator.
pub(crate) struct Frame {
    pub(crate) method: MethodId,
    pub(crate) name: String,
    pub(crate) il: Vec<u8>,
    /// Argument types, `this` first for instance methods.
    pub(crate) arguments: Vec<TypeId>,
    pub(crate) return_type: TypeId,
    pub(crate) locals: Vec<TypeId>,
    pub(crate) init_locals: bool,
    pub(crate) clauses: Vec<ExceptionClause>,
    /// Stack on entry to each reachable offset.
    pub(crate) stacks: HashMap<usize, Stack>,
    /// Stack after the instruction at each reachable offset.
    pub(crate) after: HashMap<usize, Stack>,
    /// Storage variables per native type: (name prefix, count).
    pub(crate) declarations: BTreeMap<String, (String, usize)>,
    pub(crate) constrained: Option<TypeId>,
    pub(crate) volatile: bool,
    /// Open protected regions, innermost last.
    pub(crate) tries: Vec<ExceptionClause>,
    /// Suspended outputs while a finally block is being collected.
    pub(crate) writers: Vec<String>,
    pub(crate) out: String,
}

impl Frame {
    pub(crate) fn new(transpiler: &mut Transpiler, method: MethodId) -> Result<Self> {
        let name = transpiler.metadata.method_name(method);
        let def = transpiler.metadata.method(method).clone();
        let body = def
            .body
            .ok_or_else(|| Error::MissingBuiltin(name.clone()))?;
        let mut arguments = Vec::with_capacity(def.parameters.len() + 1);
        if !def.is_static {
            arguments.push(transpiler.this_type(def.declaring));
        }
        arguments.extend(def.parameters.iter().map(|p| p.ty));
        Ok(Self {
            method,
            name,
            il: body.il,
            arguments,
            return_type: def.return_type,
            locals: body.locals,
            init_locals: body.init_locals,
            clauses: body.clauses,
            stacks: HashMap::new(),
            after: HashMap::new(),
            declarations: BTreeMap::new(),
            constrained: None,
            volatile: false,
            tries: Vec::new(),
            writers: Vec::new(),
            out: String::new(),
        })
    }

    pub(crate) fn pop(&self, ins: &Instruction, stack: &Stack, n: usize) -> Result<Stack> {
        stack.skip(n).ok_or_else(|| self.underflow(ins))
    }

    /// The `n`-th live operand from the top.
    pub(crate) fn slot<'a>(&self, ins: &Instruction, stack: &'a Stack, n: usize) -> Result<&'a Slot> {
        stack.peek(n).ok_or_else(|| self.underflow(ins))
    }

    pub(crate) fn underflow(&self, ins: &Instruction) -> Error {
        Error::StackUnderflow {
            method: self.name.clone(),
            offset: ins.offset,
        }
    }

    pub(crate) fn invalid(&self, ins: &Instruction, detail: impl Into<String>) -> Error {
        Error::InvalidOperands {
            method: self.name.clone(),
            offset: ins.offset,
            detail: detail.into(),
        }
    }

    pub(crate) fn unsupported(&self, ins: &Instruction) -> Error {
        Error::UnsupportedOpcode {
            method: self.name.clone(),
            offset: ins.offset,
            opcode: ins.opcode.mnemonic(),
        }
    }

    pub(crate) fn argument(&self, ins: &Instruction, index: usize) -> Result<TypeId> {
        self.arguments
            .get(index)
            .copied()
            .ok_or_else(|| self.invalid(ins, format!("argument {index} out of range")))
    }

    pub(crate) fn local(&self, ins: &Instruction, index: usize) -> Result<TypeId> {
        self.locals
            .get(index)
            .copied()
            .ok_or_else(|| self.invalid(ins, format!("local {index} out of range")))
    }
}

/// Where control goes after an instruction.
#[derive(Clone, Debug, PartialEq, Eq)]
pub(crate) enum Flow {
    Next,
    Jump(usize),
    /// Falls through and may also continue at each target.
    Branch(Vec<usize>),
    Stop,
}

/// Argument or local index of a load/store instruction.
pub(crate) fn variable(ins: &Instruction) -> usize {
    use Opcode::*;
    match ins.opcode {
        Ldarg0 | Ldloc0 | Stloc0 => 0,
        Ldarg1 | Ldloc1 | Stloc1 => 1,
        Ldarg2 | Ldloc2 | Stloc2 => 2,
        Ldarg3 | Ldloc3 | Stloc3 => 3,
        _ => match ins.operand {
            Operand::Var(i) => usize::from(i),
            _ => 0,
        },
    }
}

/// Overflow checking of a conversion.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum Overflow {
    Unchecked,
    Checked,
    /// The source is interpreted as unsigned.
    CheckedUnsigned,
}

pub(crate) fn conversion(opcode: Opcode) -> Option<(Primitive, Overflow)> {
    use Opcode::*;
    use Overflow::*;
    Some(match opcode {
        ConvI1 => (Primitive::I1, Unchecked),
        ConvI2 => (Primitive::I2, Unchecked),
        ConvI4 => (Primitive::I4, Unchecked),
        ConvI8 => (Primitive::I8, Unchecked),
        ConvU1 => (Primitive::U1, Unchecked),
        ConvU2 => (Primitive::U2, Unchecked),
        ConvU4 => (Primitive::U4, Unchecked),
        ConvU8 => (Primitive::U8, Unchecked),
        ConvI => (Primitive::I, Unchecked),
        ConvU => (Primitive::U, Unchecked),
        ConvR4 => (Primitive::R4, Unchecked),
        ConvR8 | ConvRUn => (Primitive::R8, Unchecked),
        ConvOvfI1 => (Primitive::I1, Checked),
        ConvOvfI2 => (Primitive::I2, Checked),
        ConvOvfI4 => (Primitive::I4, Checked),
        ConvOvfI8 => (Primitive::I8, Checked),
        ConvOvfU1 => (Primitive::U1, Checked),
        ConvOvfU2 => (Primitive::U2, Checked),
        ConvOvfU4 => (Primitive::U4, Checked),
        ConvOvfU8 => (Primitive::U8, Checked),
        ConvOvfI => (Primitive::I, Checked),
        ConvOvfU => (Primitive::U, Checked),
        ConvOvfI1Un => (Primitive::I1, CheckedUnsigned),
        ConvOvfI2Un => (Primitive::I2, CheckedUnsigned),
        ConvOvfI4Un => (Primitive::I4, CheckedUnsigned),
        ConvOvfI8Un => (Primitive::I8, CheckedUnsigned),
        ConvOvfU1Un => (Primitive::U1, CheckedUnsigned),
        ConvOvfU2Un => (Primitive::U2, CheckedUnsigned),
        ConvOvfU4Un => (Primitive::U4, CheckedUnsigned),
        ConvOvfU8Un => (Primitive::U8, CheckedUnsigned),
        ConvOvfIUn => (Primitive::I, CheckedUnsigned),
        ConvOvfUUn => (Primitive::U, CheckedUnsigned),
        _ => return None,
    })
}

/// Element primitive of `ldind.*` / `stind.*` / `ldelem.*` / `stelem.*`.
pub(crate) fn indirect(opcode: Opcode) -> Option<Primitive> {
    use Opcode::*;
    Some(match opcode {
        LdindI1 | StindI1 | LdelemI1 | StelemI1 => Primitive::I1,
        LdindU1 | LdelemU1 => Primitive::U1,
        LdindI2 | StindI2 | LdelemI2 | StelemI2 => Primitive::I2,
        LdindU2 | LdelemU2 => Primitive::U2,
        LdindI4 | StindI4 | LdelemI4 | StelemI4 => Primitive::I4,
        LdindU4 | LdelemU4 => Primitive::U4,
        LdindI8 | StindI8 | LdelemI8 | StelemI8 => Primitive::I8,
        LdindI | StindI | LdelemI | StelemI => Primitive::I,
        LdindR4 | StindR4 | LdelemR4 | StelemR4 => Primitive::R4,
        LdindR8 | StindR8 | LdelemR8 | StelemR8 => Primitive::R8,
        _ => return None,
    })
}

/// Result of a binary numeric operation.
enum Promoted {
    Exact(Primitive),
    Left,
    Right,
}

/// Binary operation families sharing one promotion table.
#[derive(Clone, Copy, PartialEq, Eq)]
enum Table {
    /// `add`, `sub`, `mul`, `div`, `rem` and the checked forms.
    Add,
    /// Integer-only operations: bitwise and unsigned division.
    Integer,
    Shift,
}

fn table(opcode: Opcode) -> Option<Table> {
    use Opcode::*;
    Some(match opcode {
        Add | Sub | Mul | Div | Rem | AddOvf | AddOvfUn | SubOvf | SubOvfUn | MulOvf
        | MulOvfUn => Table::Add,
        And | Or | Xor | DivUn | RemUn => Table::Integer,
        Shl | Shr | ShrUn => Table::Shift,
        _ => return None,
    })
}

fn promote(table: Table, left: &str, right: &str) -> Option<Promoted> {
    use Promoted::{Exact, Left, Right};
    match (table, left, right) {
        (_, INT32, INT32) => Some(Exact(Primitive::I4)),
        (Table::Add | Table::Integer, INT32 | NATIVE_INT, NATIVE_INT)
        | (Table::Add | Table::Integer, NATIVE_INT, INT32) => Some(Exact(Primitive::I)),
        (Table::Add | Table::Integer, INT64, INT64) => Some(Exact(Primitive::I8)),
        (Table::Add, FLOAT, FLOAT) => Some(Exact(Primitive::R8)),
        (Table::Add, INT32 | NATIVE_INT, POINTER) => Some(Right),
        (Table::Add, POINTER, INT32 | NATIVE_INT) => Some(Left),
        (Table::Add, POINTER, POINTER) => Some(Exact(Primitive::I)),
        (Table::Shift, INT32, NATIVE_INT) => Some(Exact(Primitive::I4)),
        (Table::Shift, INT64, INT32 | NATIVE_INT) => Some(Exact(Primitive::I8)),
        (Table::Shift, NATIVE_INT, INT32 | NATIVE_INT) => Some(Exact(Primitive::I)),
        _ => None,
    }
}

fn describe(stack: &Stack) -> String {
    stack.natives().join(", ")
}

impl Transpiler {
    /// Record the entry and exit stacks of every reachable offset.
    ///
    /// The body entry starts empty; catch handlers start with the caught
    /// type, filters with `System.Exception`, finally and fault blocks empty.
    pub(crate) fn estimate(&mut self, frame: &mut Frame) -> Result<()> {
        let mut pending = VecDeque::from([(0, Stack::new())]);
        for clause in frame.clauses.clone() {
            let seed = match clause.kind {
                ClauseKind::Catch(ty) => self.push(frame, &Stack::new(), ty)?,
                ClauseKind::Filter(_) => {
                    let exception = self.metadata.well_known().exception;
                    self.push(frame, &Stack::new(), exception)?
                }
                ClauseKind::Finally | ClauseKind::Fault => Stack::new(),
            };
            pending.push_back((clause.handler_start() as usize, seed));
        }

        while let Some((mut offset, mut stack)) = pending.pop_front() {
            loop {
                if let Some(recorded) = frame.stacks.get(&offset) {
                    if recorded.natives() != stack.natives() {
                        return Err(Error::StackMismatch {
                            method: frame.name.clone(),
                            offset,
                            expected: describe(recorded),
                            found: describe(&stack),
                        });
                    }
                    break;
                }
                if offset >= frame.il.len() {
                    break;
                }
                let ins = decode(&frame.il, offset)?;
                trace!(offset, stack = %describe(&stack), "estimate");
                frame.stacks.insert(offset, stack.clone());
                let (flow, next) = self.effect(frame, &ins, &stack)?;
                frame.after.insert(offset, next.clone());
                match flow {
                    Flow::Next => offset = ins.next,
                    Flow::Jump(target) => offset = target,
                    Flow::Branch(targets) => {
                        for target in targets {
                            pending.push_back((target, next.clone()));
                        }
                        offset = ins.next;
                    }
                    Flow::Stop => break,
                }
                stack = next;
            }
        }
        Ok(())
    }

    fn resolve_type(&self, frame: &Frame, ins: &Instruction) -> Result<TypeId> {
        let token = ins.token().ok_or_else(|| frame.invalid(ins, "missing token"))?;
        Ok(self.metadata.resolve_type(frame.method, token)?)
    }

    fn resolve_method(&self, frame: &Frame, ins: &Instruction) -> Result<MethodId> {
        let token = ins.token().ok_or_else(|| frame.invalid(ins, "missing token"))?;
        Ok(self.metadata.resolve_method(frame.method, token)?)
    }

    fn resolve_field_type(&self, frame: &Frame, ins: &Instruction) -> Result<TypeId> {
        let token = ins.token().ok_or_else(|| frame.invalid(ins, "missing token"))?;
        let field = self.metadata.resolve_field(frame.method, token)?;
        Ok(self.metadata.field(field).ty)
    }

    pub(crate) fn is_void(&self, ty: TypeId) -> bool {
        self.metadata.ty(ty).kind == TypeKind::Primitive(Primitive::Void)
    }

    fn push_primitive(&mut self, frame: &mut Frame, stack: &Stack, p: Primitive) -> Result<Stack> {
        let ty = self.metadata.primitive(p);
        self.push(frame, stack, ty)
    }

    fn handle_type(&self, name: &str) -> Result<TypeId> {
        self.metadata
            .find_type(name)
            .ok_or_else(|| ilcxx_core::MetadataError::MissingWellKnown(name.to_owned()).into())
    }

    /// Stack effect of one instruction.
    fn effect(&mut self, frame: &mut Frame, ins: &Instruction, stack: &Stack) -> Result<(Flow, Stack)> {
        use Opcode::*;
        if let Some((p, _)) = conversion(ins.opcode) {
            let rest = frame.pop(ins, stack, 1)?;
            return Ok((Flow::Next, self.push_primitive(frame, &rest, p)?));
        }
        let next = match ins.opcode {
            Nop | Break | Unaligned | Volatile | Tail | Readonly | No | Ckfinite | Neg | Not => {
                stack.clone()
            }
            Constrained => {
                let ty = self.resolve_type(frame, ins)?;
                self.escape_type(ty)?;
                stack.clone()
            }
            Ldarg0 | Ldarg1 | Ldarg2 | Ldarg3 | LdargS | Ldarg => {
                let ty = frame.argument(ins, variable(ins))?;
                self.push(frame, stack, ty)?
            }
            LdargaS | Ldarga => {
                let ty = frame.argument(ins, variable(ins))?;
                let pointer = self.metadata.pointer_to(ty);
                self.push(frame, stack, pointer)?
            }
            Ldloc0 | Ldloc1 | Ldloc2 | Ldloc3 | LdlocS | Ldloc => {
                let ty = frame.local(ins, variable(ins))?;
                self.push(frame, stack, ty)?
            }
            LdlocaS | Ldloca => {
                let ty = frame.local(ins, variable(ins))?;
                let pointer = self.metadata.pointer_to(ty);
                self.push(frame, stack, pointer)?
            }
            StargS | Starg | Stloc0 | Stloc1 | Stloc2 | Stloc3 | StlocS | Stloc | Pop | Initobj => {
                frame.pop(ins, stack, 1)?
            }
            Ldnull => {
                let object = self.metadata.well_known().object;
                self.push(frame, stack, object)?
            }
            LdcI4M1 | LdcI4_0 | LdcI4_1 | LdcI4_2 | LdcI4_3 | LdcI4_4 | LdcI4_5 | LdcI4_6
            | LdcI4_7 | LdcI4_8 | LdcI4S | LdcI4 => self.push_primitive(frame, stack, Primitive::I4)?,
            LdcI8 => self.push_primitive(frame, stack, Primitive::I8)?,
            LdcR4 => self.push_primitive(frame, stack, Primitive::R4)?,
            LdcR8 => self.push_primitive(frame, stack, Primitive::R8)?,
            Dup => {
                let ty = frame.slot(ins, stack, 0)?.ty;
                self.push(frame, stack, ty)?
            }
            Jmp | Calli | Arglist | Refanyval | Mkrefany | Refanytype => {
                return Err(frame.unsupported(ins));
            }
            Call | Callvirt => {
                let method = self.resolve_method(frame, ins)?;
                let def = self.metadata.method(method);
                let (count, declaring, return_type) =
                    (def.parameters.len() + usize::from(!def.is_static), def.declaring, def.return_type);
                if ins.opcode == Callvirt {
                    self.escape_type(declaring)?;
                }
                let rest = frame.pop(ins, stack, count)?;
                if self.is_void(return_type) {
                    rest
                } else {
                    self.push(frame, &rest, return_type)?
                }
            }
            Newobj => {
                let method = self.resolve_method(frame, ins)?;
                let def = self.metadata.method(method);
                let (count, declaring) = (def.parameters.len(), def.declaring);
                let rest = frame.pop(ins, stack, count)?;
                self.push(frame, &rest, declaring)?
            }
            Ret => {
                let rest = if self.is_void(frame.return_type) {
                    stack.clone()
                } else {
                    frame.pop(ins, stack, 1)?
                };
                return Ok((Flow::Stop, rest));
            }
            Throw => return Ok((Flow::Stop, frame.pop(ins, stack, 1)?)),
            Rethrow | Endfinally => return Ok((Flow::Stop, stack.clone())),
            Br | BrS => {
                let target = ins.target().ok_or_else(|| frame.invalid(ins, "missing target"))?;
                return Ok((Flow::Jump(target), stack.clone()));
            }
            Leave | LeaveS => {
                let target = ins.target().ok_or_else(|| frame.invalid(ins, "missing target"))?;
                return Ok((Flow::Jump(target), Stack::new()));
            }
            Brfalse | BrfalseS | Brtrue | BrtrueS => {
                let target = ins.target().ok_or_else(|| frame.invalid(ins, "missing target"))?;
                return Ok((Flow::Branch(vec![target]), frame.pop(ins, stack, 1)?));
            }
            Beq | BeqS | Bge | BgeS | Bgt | BgtS | Ble | BleS | Blt | BltS | BneUn | BneUnS
            | BgeUn | BgeUnS | BgtUn | BgtUnS | BleUn | BleUnS | BltUn | BltUnS => {
                let target = ins.target().ok_or_else(|| frame.invalid(ins, "missing target"))?;
                return Ok((Flow::Branch(vec![target]), frame.pop(ins, stack, 2)?));
            }
            Switch => {
                let Operand::Switch(targets) = &ins.operand else {
                    return Err(frame.invalid(ins, "missing switch table"));
                };
                return Ok((Flow::Branch(targets.clone()), frame.pop(ins, stack, 1)?));
            }
            LdindI1 | LdindU1 | LdindI2 | LdindU2 | LdindI4 | LdindU4 | LdindI8 | LdindI
            | LdindR4 | LdindR8 => {
                let p = indirect(ins.opcode).unwrap_or(Primitive::I4);
                let rest = frame.pop(ins, stack, 1)?;
                self.push_primitive(frame, &rest, p)?
            }
            LdindRef => {
                let address = frame.slot(ins, stack, 0)?.ty;
                let object = self.metadata.well_known().object;
                let ty = self.metadata.ty(address).element().unwrap_or(object);
                let rest = frame.pop(ins, stack, 1)?;
                self.push(frame, &rest, ty)?
            }
            StindRef | StindI1 | StindI2 | StindI4 | StindI8 | StindR4 | StindR8 | StindI
            | Stfld | Stobj | Cpobj => frame.pop(ins, stack, 2)?,
            Add | Sub | Mul | Div | Rem | And | Or | Xor | DivUn | RemUn | Shl | Shr | ShrUn
            | AddOvf | AddOvfUn | SubOvf | SubOvfUn | MulOvf | MulOvfUn => {
                let right = frame.slot(ins, stack, 0)?.clone();
                let left = frame.slot(ins, stack, 1)?.clone();
                let table = table(ins.opcode).unwrap_or(Table::Add);
                let ty = match promote(table, &left.native, &right.native) {
                    Some(Promoted::Exact(p)) => self.metadata.primitive(p),
                    Some(Promoted::Left) => left.ty,
                    Some(Promoted::Right) => right.ty,
                    None => {
                        return Err(frame.invalid(
                            ins,
                            format!(
                                "`{}` on {} and {}",
                                ins.opcode.mnemonic(),
                                left.native,
                                right.native
                            ),
                        ));
                    }
                };
                let rest = frame.pop(ins, stack, 2)?;
                self.push(frame, &rest, ty)?
            }
            Ldobj | Castclass | UnboxAny => {
                let ty = self.resolve_type(frame, ins)?;
                let rest = frame.pop(ins, stack, 1)?;
                self.push(frame, &rest, ty)?
            }
            Ldstr => {
                let string = self.metadata.well_known().string;
                self.push(frame, stack, string)?
            }
            Isinst | Box => {
                self.resolve_type(frame, ins)?;
                let object = self.metadata.well_known().object;
                let rest = frame.pop(ins, stack, 1)?;
                self.push(frame, &rest, object)?
            }
            Unbox => {
                let ty = self.resolve_type(frame, ins)?;
                let by_ref = self.metadata.by_ref_to(ty);
                let rest = frame.pop(ins, stack, 1)?;
                self.push(frame, &rest, by_ref)?
            }
            Ldfld => {
                let ty = self.resolve_field_type(frame, ins)?;
                let rest = frame.pop(ins, stack, 1)?;
                self.push(frame, &rest, ty)?
            }
            Ldflda => {
                let ty = self.resolve_field_type(frame, ins)?;
                let pointer = self.metadata.pointer_to(ty);
                let rest = frame.pop(ins, stack, 1)?;
                self.push(frame, &rest, pointer)?
            }
            Ldsfld => {
                let ty = self.resolve_field_type(frame, ins)?;
                self.push(frame, stack, ty)?
            }
            Ldsflda => {
                let ty = self.resolve_field_type(frame, ins)?;
                let pointer = self.metadata.pointer_to(ty);
                self.push(frame, stack, pointer)?
            }
            Stsfld => frame.pop(ins, stack, 1)?,
            Newarr => {
                let element = self.resolve_type(frame, ins)?;
                let array = self.metadata.array_of(element, 1);
                let rest = frame.pop(ins, stack, 1)?;
                self.push(frame, &rest, array)?
            }
            Ldlen => {
                let rest = frame.pop(ins, stack, 1)?;
                self.push_primitive(frame, &rest, Primitive::I)?
            }
            Ldelema => {
                let ty = self.resolve_type(frame, ins)?;
                let pointer = self.metadata.pointer_to(ty);
                let rest = frame.pop(ins, stack, 2)?;
                self.push(frame, &rest, pointer)?
            }
            LdelemI1 | LdelemU1 | LdelemI2 | LdelemU2 | LdelemI4 | LdelemU4 | LdelemI8
            | LdelemI | LdelemR4 | LdelemR8 => {
                let p = indirect(ins.opcode).unwrap_or(Primitive::I4);
                let rest = frame.pop(ins, stack, 2)?;
                self.push_primitive(frame, &rest, p)?
            }
            LdelemRef => {
                let array = frame.slot(ins, stack, 1)?.ty;
                let object = self.metadata.well_known().object;
                let ty = match self.metadata.ty(array).kind {
                    TypeKind::Array { element, .. } => element,
                    _ => object,
                };
                let rest = frame.pop(ins, stack, 2)?;
                self.push(frame, &rest, ty)?
            }
            Ldelem => {
                let ty = self.resolve_type(frame, ins)?;
                let rest = frame.pop(ins, stack, 2)?;
                self.push(frame, &rest, ty)?
            }
            StelemI | StelemI1 | StelemI2 | StelemI4 | StelemI8 | StelemR4 | StelemR8
            | StelemRef | Stelem | Cpblk | Initblk => frame.pop(ins, stack, 3)?,
            Ldtoken => {
                let token = ins.token().ok_or_else(|| frame.invalid(ins, "missing token"))?;
                let name = match self.metadata.resolve_token(frame.method, token)? {
                    Token::Type(_) => "System.RuntimeTypeHandle",
                    Token::Field(_) => "System.RuntimeFieldHandle",
                    Token::Method(_) => "System.RuntimeMethodHandle",
                    Token::String(_) => return Err(frame.invalid(ins, "ldtoken of a string")),
                };
                let ty = self.handle_type(name)?;
                self.push(frame, stack, ty)?
            }
            Endfilter => {
                let exception = self.metadata.well_known().exception;
                let rest = frame.pop(ins, stack, 1)?;
                self.push(frame, &rest, exception)?
            }
            Ceq | Cgt | CgtUn | Clt | CltUn => {
                let rest = frame.pop(ins, stack, 2)?;
                self.push_primitive(frame, &rest, Primitive::I4)?
            }
            Ldftn => {
                self.resolve_method(frame, ins)?;
                let void = self.metadata.primitive(Primitive::Void);
                let pointer = self.metadata.pointer_to(void);
                self.push(frame, stack, pointer)?
            }
            Ldvirtftn => {
                self.resolve_method(frame, ins)?;
                let void = self.metadata.primitive(Primitive::Void);
                let pointer = self.metadata.pointer_to(void);
                let rest = frame.pop(ins, stack, 1)?;
                self.push(frame, &rest, pointer)?
            }
            Localloc => {
                let byte = self.metadata.primitive(Primitive::U1);
                let pointer = self.metadata.pointer_to(byte);
                let rest = frame.pop(ins, stack, 1)?;
                self.push(frame, &rest, pointer)?
            }
            Sizeof => {
                self.resolve_type(frame, ins)?;
                self.push_primitive(frame, stack, Primitive::U4)?
            }
            _ => return Err(frame.unsupported(ins)),
        };
        Ok((Flow::Next, next))
    }
}
