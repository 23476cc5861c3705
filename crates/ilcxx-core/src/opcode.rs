//! CIL opcode table and instruction decoding.
//!
//! One-byte opcodes use their byte value as code; two-byte opcodes are
//! `0xFE` followed by a second byte and use `0xFExx` as code.

use crate::error::DecodeError;

/// Inline operand encoding that follows an opcode.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum OperandKind {
    None,
    ShortVar,
    Var,
    ShortInt,
    Int,
    Long,
    Single,
    Double,
    ShortBranch,
    Branch,
    Token,
    Switch,
}

macro_rules! opcodes {
    ($($variant:ident = $code:literal, $mnemonic:literal, $operand:ident;)*) => {
        #[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
        pub enum Opcode {
            $($variant,)*
        }

        impl Opcode {
            pub fn code(self) -> u16 {
                match self {
                    $(Self::$variant => $code,)*
                }
            }

            pub fn mnemonic(self) -> &'static str {
                match self {
                    $(Self::$variant => $mnemonic,)*
                }
            }

            pub fn operand_kind(self) -> OperandKind {
                match self {
                    $(Self::$variant => OperandKind::$operand,)*
                }
            }

            pub fn from_code(code: u16) -> Option<Self> {
                match code {
                    $($code => Some(Self::$variant),)*
                    _ => None,
                }
            }
        }
    };
}

opcodes! {
    Nop = 0x00, "nop", None;
    Break = 0x01, "break", None;
    Ldarg0 = 0x02, "ldarg.0", None;
    Ldarg1 = 0x03, "ldarg.1", None;
    Ldarg2 = 0x04, "ldarg.2", None;
    Ldarg3 = 0x05, "ldarg.3", None;
    Ldloc0 = 0x06, "ldloc.0", None;
    Ldloc1 = 0x07, "ldloc.1", None;
    Ldloc2 = 0x08, "ldloc.2", None;
    Ldloc3 = 0x09, "ldloc.3", None;
    Stloc0 = 0x0a, "stloc.0", None;
    Stloc1 = 0x0b, "stloc.1", None;
    Stloc2 = 0x0c, "stloc.2", None;
    Stloc3 = 0x0d, "stloc.3", None;
    LdargS = 0x0e, "ldarg.s", ShortVar;
    LdargaS = 0x0f, "ldarga.s", ShortVar;
    StargS = 0x10, "starg.s", ShortVar;
    LdlocS = 0x11, "ldloc.s", ShortVar;
    LdlocaS = 0x12, "ldloca.s", ShortVar;
    StlocS = 0x13, "stloc.s", ShortVar;
    Ldnull = 0x14, "ldnull", None;
    LdcI4M1 = 0x15, "ldc.i4.m1", None;
    LdcI4_0 = 0x16, "ldc.i4.0", None;
    LdcI4_1 = 0x17, "ldc.i4.1", None;
    LdcI4_2 = 0x18, "ldc.i4.2", None;
    LdcI4_3 = 0x19, "ldc.i4.3", None;
    LdcI4_4 = 0x1a, "ldc.i4.4", None;
    LdcI4_5 = 0x1b, "ldc.i4.5", None;
    LdcI4_6 = 0x1c, "ldc.i4.6", None;
    LdcI4_7 = 0x1d, "ldc.i4.7", None;
    LdcI4_8 = 0x1e, "ldc.i4.8", None;
    LdcI4S = 0x1f, "ldc.i4.s", ShortInt;
    LdcI4 = 0x20, "ldc.i4", Int;
    LdcI8 = 0x21, "ldc.i8", Long;
    LdcR4 = 0x22, "ldc.r4", Single;
    LdcR8 = 0x23, "ldc.r8", Double;
    Dup = 0x25, "dup", None;
    Pop = 0x26, "pop", None;
    Jmp = 0x27, "jmp", Token;
    Call = 0x28, "call", Token;
    Calli = 0x29, "calli", Token;
    Ret = 0x2a, "ret", None;
    BrS = 0x2b, "br.s", ShortBranch;
    BrfalseS = 0x2c, "brfalse.s", ShortBranch;
    BrtrueS = 0x2d, "brtrue.s", ShortBranch;
    BeqS = 0x2e, "beq.s", ShortBranch;
    BgeS = 0x2f, "bge.s", ShortBranch;
    BgtS = 0x30, "bgt.s", ShortBranch;
    BleS = 0x31, "ble.s", ShortBranch;
    BltS = 0x32, "blt.s", ShortBranch;
    BneUnS = 0x33, "bne.un.s", ShortBranch;
    BgeUnS = 0x34, "bge.un.s", ShortBranch;
    BgtUnS = 0x35, "bgt.un.s", ShortBranch;
    BleUnS = 0x36, "ble.un.s", ShortBranch;
    BltUnS = 0x37, "blt.un.s", ShortBranch;
    Br = 0x38, "br", Branch;
    Brfalse = 0x39, "brfalse", Branch;
    Brtrue = 0x3a, "brtrue", Branch;
    Beq = 0x3b, "beq", Branch;
    Bge = 0x3c, "bge", Branch;
    Bgt = 0x3d, "bgt", Branch;
    Ble = 0x3e, "ble", Branch;
    Blt = 0x3f, "blt", Branch;
    BneUn = 0x40, "bne.un", Branch;
    BgeUn = 0x41, "bge.un", Branch;
    BgtUn = 0x42, "bgt.un", Branch;
    BleUn = 0x43, "ble.un", Branch;
    BltUn = 0x44, "blt.un", Branch;
    Switch = 0x45, "switch", Switch;
    LdindI1 = 0x46, "ldind.i1", None;
    LdindU1 = 0x47, "ldind.u1", None;
    LdindI2 = 0x48, "ldind.i2", None;
    LdindU2 = 0x49, "ldind.u2", None;
    LdindI4 = 0x4a, "ldind.i4", None;
    LdindU4 = 0x4b, "ldind.u4", None;
    LdindI8 = 0x4c, "ldind.i8", None;
    LdindI = 0x4d, "ldind.i", None;
    LdindR4 = 0x4e, "ldind.r4", None;
    LdindR8 = 0x4f, "ldind.r8", None;
    LdindRef = 0x50, "ldind.ref", None;
    StindRef = 0x51, "stind.ref", None;
    StindI1 = 0x52, "stind.i1", None;
    StindI2 = 0x53, "stind.i2", None;
    StindI4 = 0x54, "stind.i4", None;
    StindI8 = 0x55, "stind.i8", None;
    StindR4 = 0x56, "stind.r4", None;
    StindR8 = 0x57, "stind.r8", None;
    Add = 0x58, "add", None;
    Sub = 0x59, "sub", None;
    Mul = 0x5a, "mul", None;
    Div = 0x5b, "div", None;
    DivUn = 0x5c, "div.un", None;
    Rem = 0x5d, "rem", None;
    RemUn = 0x5e, "rem.un", None;
    And = 0x5f, "and", None;
    Or = 0x60, "or", None;
    Xor = 0x61, "xor", None;
    Shl = 0x62, "shl", None;
    Shr = 0x63, "shr", None;
    ShrUn = 0x64, "shr.un", None;
    Neg = 0x65, "neg", None;
    Not = 0x66, "not", None;
    ConvI1 = 0x67, "conv.i1", None;
    ConvI2 = 0x68, "conv.i2", None;
    ConvI4 = 0x69, "conv.i4", None;
    ConvI8 = 0x6a, "conv.i8", None;
    ConvR4 = 0x6b, "conv.r4", None;
    ConvR8 = 0x6c, "conv.r8", None;
    ConvU4 = 0x6d, "conv.u4", None;
    ConvU8 = 0x6e, "conv.u8", None;
    Callvirt = 0x6f, "callvirt", Token;
    Cpobj = 0x70, "cpobj", Token;
    Ldobj = 0x71, "ldobj", Token;
    Ldstr = 0x72, "ldstr", Token;
    Newobj = 0x73, "newobj", Token;
    Castclass = 0x74, "castclass", Token;
    Isinst = 0x75, "isinst", Token;
    ConvRUn = 0x76, "conv.r.un", None;
    Unbox = 0x79, "unbox", Token;
    Throw = 0x7a, "throw", None;
    Ldfld = 0x7b, "ldfld", Token;
    Ldflda = 0x7c, "ldflda", Token;
    Stfld = 0x7d, "stfld", Token;
    Ldsfld = 0x7e, "ldsfld", Token;
    Ldsflda = 0x7f, "ldsflda", Token;
    Stsfld = 0x80, "stsfld", Token;
    Stobj = 0x81, "stobj", Token;
    ConvOvfI1Un = 0x82, "conv.ovf.i1.un", None;
    ConvOvfI2Un = 0x83, "conv.ovf.i2.un", None;
    ConvOvfI4Un = 0x84, "conv.ovf.i4.un", None;
    ConvOvfI8Un = 0x85, "conv.ovf.i8.un", None;
    ConvOvfU1Un = 0x86, "conv.ovf.u1.un", None;
    ConvOvfU2Un = 0x87, "conv.ovf.u2.un", None;
    ConvOvfU4Un = 0x88, "conv.ovf.u4.un", None;
    ConvOvfU8Un = 0x89, "conv.ovf.u8.un", None;
    ConvOvfIUn = 0x8a, "conv.ovf.i.un", None;
    ConvOvfUUn = 0x8b, "conv.ovf.u.un", None;
    Box = 0x8c, "box", Token;
    Newarr = 0x8d, "newarr", Token;
    Ldlen = 0x8e, "ldlen", None;
    Ldelema = 0x8f, "ldelema", Token;
    LdelemI1 = 0x90, "ldelem.i1", None;
    LdelemU1 = 0x91, "ldelem.u1", None;
    LdelemI2 = 0x92, "ldelem.i2", None;
    LdelemU2 = 0x93, "ldelem.u2", None;
    LdelemI4 = 0x94, "ldelem.i4", None;
    LdelemU4 = 0x95, "ldelem.u4", None;
    LdelemI8 = 0x96, "ldelem.i8", None;
    LdelemI = 0x97, "ldelem.i", None;
    LdelemR4 = 0x98, "ldelem.r4", None;
    LdelemR8 = 0x99, "ldelem.r8", None;
    LdelemRef = 0x9a, "ldelem.ref", None;
    StelemI = 0x9b, "stelem.i", None;
    StelemI1 = 0x9c, "stelem.i1", None;
    StelemI2 = 0x9d, "stelem.i2", None;
    StelemI4 = 0x9e, "stelem.i4", None;
    StelemI8 = 0x9f, "stelem.i8", None;
    StelemR4 = 0xa0, "stelem.r4", None;
    StelemR8 = 0xa1, "stelem.r8", None;
    StelemRef = 0xa2, "stelem.ref", None;
    Ldelem = 0xa3, "ldelem", Token;
    Stelem = 0xa4, "stelem", Token;
    UnboxAny = 0xa5, "unbox.any", Token;
    ConvOvfI1 = 0xb3, "conv.ovf.i1", None;
    ConvOvfU1 = 0xb4, "conv.ovf.u1", None;
    ConvOvfI2 = 0xb5, "conv.ovf.i2", None;
    ConvOvfU2 = 0xb6, "conv.ovf.u2", None;
    ConvOvfI4 = 0xb7, "conv.ovf.i4", None;
    ConvOvfU4 = 0xb8, "conv.ovf.u4", None;
    ConvOvfI8 = 0xb9, "conv.ovf.i8", None;
    ConvOvfU8 = 0xba, "conv.ovf.u8", None;
    Refanyval = 0xc2, "refanyval", Token;
    Ckfinite = 0xc3, "ckfinite", None;
    Mkrefany = 0xc6, "mkrefany", Token;
    Ldtoken = 0xd0, "ldtoken", Token;
    ConvU2 = 0xd1, "conv.u2", None;
    ConvU1 = 0xd2, "conv.u1", None;
    ConvI = 0xd3, "conv.i", None;
    ConvOvfI = 0xd4, "conv.ovf.i", None;
    ConvOvfU = 0xd5, "conv.ovf.u", None;
    AddOvf = 0xd6, "add.ovf", None;
    AddOvfUn = 0xd7, "add.ovf.un", None;
    MulOvf = 0xd8, "mul.ovf", None;
    MulOvfUn = 0xd9, "mul.ovf.un", None;
    SubOvf = 0xda, "sub.ovf", None;
    SubOvfUn = 0xdb, "sub.ovf.un", None;
    Endfinally = 0xdc, "endfinally", None;
    Leave = 0xdd, "leave", Branch;
    LeaveS = 0xde, "leave.s", ShortBranch;
    StindI = 0xdf, "stind.i", None;
    ConvU = 0xe0, "conv.u", None;
    Arglist = 0xfe00, "arglist", None;
    Ceq = 0xfe01, "ceq", None;
    Cgt = 0xfe02, "cgt", None;
    CgtUn = 0xfe03, "cgt.un", None;
    Clt = 0xfe04, "clt", None;
    CltUn = 0xfe05, "clt.un", None;
    Ldftn = 0xfe06, "ldftn", Token;
    Ldvirtftn = 0xfe07, "ldvirtftn", Token;
    Ldarg = 0xfe09, "ldarg", Var;
    Ldarga = 0xfe0a, "ldarga", Var;
    Starg = 0xfe0b, "starg", Var;
    Ldloc = 0xfe0c, "ldloc", Var;
    Ldloca = 0xfe0d, "ldloca", Var;
    Stloc = 0xfe0e, "stloc", Var;
    Localloc = 0xfe0f, "localloc", None;
    Endfilter = 0xfe11, "endfilter", None;
    Unaligned = 0xfe12, "unaligned.", ShortInt;
    Volatile = 0xfe13, "volatile.", None;
    Tail = 0xfe14, "tail.", None;
    Initobj = 0xfe15, "initobj", Token;
    Constrained = 0xfe16, "constrained.", Token;
    Cpblk = 0xfe17, "cpblk", None;
    Initblk = 0xfe18, "initblk", None;
    No = 0xfe19, "no.", ShortInt;
    Rethrow = 0xfe1a, "rethrow", None;
    Sizeof = 0xfe1c, "sizeof", Token;
    Refanytype = 0xfe1d, "refanytype", None;
    Readonly = 0xfe1e, "readonly.", None;
}

/// Decoded inline operand.
#[derive(Clone, Debug, PartialEq)]
pub enum Operand {
    None,
    /// Argument or local index.
    Var(u16),
    Int(i32),
    Long(i64),
    Single(f32),
    Double(f64),
    Token(u32),
    /// Absolute branch target offset.
    Target(usize),
    Switch(Vec<usize>),
}

/// One decoded instruction.
#[derive(Clone, Debug, PartialEq)]
pub struct Instruction {
    pub opcode: Opcode,
    pub operand: Operand,
    pub offset: usize,
    /// Offset of the following instruction.
    pub next: usize,
}

impl Instruction {
    pub fn token(&self) -> Option<u32> {
        match self.operand {
            Operand::Token(t) => Some(t),
            _ => None,
        }
    }

    pub fn target(&self) -> Option<usize> {
        match self.operand {
            Operand::Target(t) => Some(t),
            _ => None,
        }
    }
}

struct Reader<'a> {
    il: &'a [u8],
    start: usize,
    position: usize,
}

impl Reader<'_> {
    fn take<const N: usize>(&mut self) -> Result<[u8; N], DecodeError> {
        let bytes = self
            .il
            .get(self.position..self.position + N)
            .ok_or(DecodeError::Truncated { offset: self.start })?;
        self.position += N;
        let mut out = [0; N];
        out.copy_from_slice(bytes);
        Ok(out)
    }

    fn u8(&mut self) -> Result<u8, DecodeError> {
        Ok(self.take::<1>()?[0])
    }

    fn i32(&mut self) -> Result<i32, DecodeError> {
        Ok(i32::from_le_bytes(self.take()?))
    }

    fn relative(&self, base: usize, delta: i64) -> Result<usize, DecodeError> {
        usize::try_from(base as i64 + delta).map_err(|_| DecodeError::BadTarget { offset: self.start })
    }
}

/// Decode the instruction starting at `offset`.
pub fn decode(il: &[u8], offset: usize) -> Result<Instruction, DecodeError> {
    let mut reader = Reader {
        il,
        start: offset,
        position: offset,
    };
    let first = reader.u8()?;
    let code = if first == 0xfe {
        0xfe00 | u16::from(reader.u8()?)
    } else {
        u16::from(first)
    };
    let opcode = Opcode::from_code(code).ok_or(DecodeError::UnknownOpcode { offset, code })?;

    let operand = match opcode.operand_kind() {
        OperandKind::None => Operand::None,
        OperandKind::ShortVar => Operand::Var(u16::from(reader.u8()?)),
        OperandKind::Var => Operand::Var(u16::from_le_bytes(reader.take()?)),
        OperandKind::ShortInt => Operand::Int(i32::from(reader.u8()? as i8)),
        OperandKind::Int => Operand::Int(reader.i32()?),
        OperandKind::Long => Operand::Long(i64::from_le_bytes(reader.take()?)),
        OperandKind::Single => Operand::Single(f32::from_le_bytes(reader.take()?)),
        OperandKind::Double => Operand::Double(f64::from_le_bytes(reader.take()?)),
        OperandKind::Token => Operand::Token(u32::from_le_bytes(reader.take()?)),
        OperandKind::ShortBranch => {
            let delta = i64::from(reader.u8()? as i8);
            Operand::Target(reader.relative(reader.position, delta)?)
        }
        OperandKind::Branch => {
            let delta = i64::from(reader.i32()?);
            Operand::Target(reader.relative(reader.position, delta)?)
        }
        OperandKind::Switch => {
            let count = reader.i32()?;
            let count = usize::try_from(count).map_err(|_| DecodeError::Truncated { offset })?;
            let table = reader.position;
            if count > (il.len() - table) / 4 {
                return Err(DecodeError::Truncated { offset });
            }
            let end = table + count * 4;
            let mut targets = Vec::with_capacity(count);
            for _ in 0..count {
                let delta = i64::from(reader.i32()?);
                targets.push(reader.relative(end, delta)?);
            }
            Operand::Switch(targets)
        }
    };

    Ok(Instruction {
        opcode,
        operand,
        offset,
        next: reader.position,
    })
}
