//! Test utilities: an IL assembler with labels and a one-class program
//! fixture.

use std::collections::HashMap;
use std::rc::Rc;

use ilcxx_core::{
    ExceptionClause, MetadataBuilder, MethodBody, MethodDef, MethodId, Opcode, OperandKind,
    Primitive, TypeId,
};

use crate::{Builtin, Config, NoBuiltin, Result, TranslationUnit, Transpiler};

struct Fixup {
    /// Position of the operand bytes.
    at: usize,
    /// Offset the operand is relative to.
    base: usize,
    label: &'static str,
    short: bool,
}

/// Assembles a method body. Branch operands name labels resolved by
/// [`Il::finish`].
#[derive(Default)]
pub struct Il {
    bytes: Vec<u8>,
    labels: HashMap<&'static str, usize>,
    fixups: Vec<Fixup>,
}

impl Il {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn offset(&self) -> usize {
        self.bytes.len()
    }

    fn opcode(&mut self, opcode: Opcode) {
        let code = opcode.code();
        if code > 0xff {
            self.bytes.push(0xfe);
        }
        self.bytes.push(code as u8);
    }

    pub fn op(&mut self, opcode: Opcode) -> &mut Self {
        self.opcode(opcode);
        self
    }

    /// Opcode with an integer or variable-index operand.
    pub fn int(&mut self, opcode: Opcode, value: i32) -> &mut Self {
        self.opcode(opcode);
        match opcode.operand_kind() {
            OperandKind::ShortInt => self.bytes.push(value as i8 as u8),
            OperandKind::ShortVar => self.bytes.push(value as u8),
            OperandKind::Var => self.bytes.extend((value as u16).to_le_bytes()),
            _ => self.bytes.extend(value.to_le_bytes()),
        }
        self
    }

    pub fn long(&mut self, opcode: Opcode, value: i64) -> &mut Self {
        self.opcode(opcode);
        self.bytes.extend(value.to_le_bytes());
        self
    }

    /// `ldc.r4` or `ldc.r8`.
    pub fn float(&mut self, opcode: Opcode, value: f64) -> &mut Self {
        self.opcode(opcode);
        if opcode.operand_kind() == OperandKind::Single {
            self.bytes.extend((value as f32).to_le_bytes());
        } else {
            self.bytes.extend(value.to_le_bytes());
        }
        self
    }

    pub fn token(&mut self, opcode: Opcode, token: u32) -> &mut Self {
        self.opcode(opcode);
        self.bytes.extend(token.to_le_bytes());
        self
    }

    pub fn branch(&mut self, opcode: Opcode, label: &'static str) -> &mut Self {
        self.opcode(opcode);
        let short = opcode.operand_kind() == OperandKind::ShortBranch;
        let at = self.bytes.len();
        let width = if short { 1 } else { 4 };
        self.bytes.extend(std::iter::repeat_n(0, width));
        self.fixups.push(Fixup {
            at,
            base: at + width,
            label,
            short,
        });
        self
    }

    pub fn switch(&mut self, labels: &[&'static str]) -> &mut Self {
        self.opcode(Opcode::Switch);
        self.bytes.extend((labels.len() as u32).to_le_bytes());
        let table = self.bytes.len();
        let end = table + labels.len() * 4;
        for (i, &label) in labels.iter().enumerate() {
            self.bytes.extend([0; 4]);
            self.fixups.push(Fixup {
                at: table + i * 4,
                base: end,
                label,
                short: false,
            });
        }
        self
    }

    pub fn label(&mut self, name: &'static str) -> &mut Self {
        self.labels.insert(name, self.bytes.len());
        self
    }

    pub fn finish(&self) -> Vec<u8> {
        let mut bytes = self.bytes.clone();
        for fixup in &self.fixups {
            let target = *self
                .labels
                .get(fixup.label)
                .unwrap_or_else(|| panic!("undefined label `{}`", fixup.label));
            let delta = target as i64 - fixup.base as i64;
            if fixup.short {
                bytes[fixup.at] = delta as i8 as u8;
            } else {
                bytes[fixup.at..fixup.at + 4].copy_from_slice(&(delta as i32).to_le_bytes());
            }
        }
        bytes
    }
}

/// A `Demo.Program` class on top of the seeded corlib.
pub struct Program {
    pub b: MetadataBuilder,
    pub class: TypeId,
}

impl Program {
    pub fn new() -> Self {
        let mut b = MetadataBuilder::new();
        let class = b.class("Demo", "Program");
        Self { b, class }
    }

    pub fn primitive(&self, primitive: Primitive) -> TypeId {
        self.b.primitive(primitive)
    }

    /// Declare a static method of `Demo.Program` without a body.
    pub fn declare(&mut self, name: &str, returns: TypeId, parameters: &[TypeId]) -> MethodId {
        let mut def = MethodDef::new(self.class, name, returns).static_();
        for (i, &ty) in parameters.iter().enumerate() {
            def = def.param(format!("p{i}"), ty);
        }
        self.b.add_method(def)
    }

    pub fn set_body(&mut self, method: MethodId, il: &Il, locals: &[TypeId]) {
        let mut body = MethodBody::new(il.finish());
        body.locals = locals.to_vec();
        self.b.method_mut(method).body = Some(body);
    }

    pub fn add_clause(&mut self, method: MethodId, clause: ExceptionClause) {
        if let Some(body) = self.b.method_mut(method).body.as_mut() {
            body.clauses.push(clause);
        }
    }

    /// Static method of `Demo.Program` with a bytecode body.
    pub fn method(
        &mut self,
        name: &str,
        returns: TypeId,
        parameters: &[TypeId],
        locals: &[TypeId],
        il: &Il,
    ) -> MethodId {
        let method = self.declare(name, returns, parameters);
        self.set_body(method, il, locals);
        method
    }

    pub fn transpiler(self, builtin: Rc<dyn Builtin>, config: Config) -> Transpiler {
        let metadata = self.b.build().expect("fixture metadata is valid");
        Transpiler::new(metadata, builtin, config)
    }

    pub fn translate(self, entry: MethodId) -> Result<TranslationUnit> {
        self.transpiler(Rc::new(NoBuiltin), Config::new()).run(entry)
    }
}

/// Definition of the function named `ident`.
pub fn function<'a>(unit: &'a TranslationUnit, ident: &str) -> &'a str {
    let signature = format!("\n{ident}(");
    unit.function_definitions
        .iter()
        .map(|(_, text)| text.as_str())
        .find(|text| text.contains(&signature))
        .unwrap_or_else(|| panic!("no definition of `{ident}`"))
}

/// The function body after the variable declarations.
pub fn statements(text: &str) -> &str {
    let start = text.find("\tf_epoch_point();\n").map_or(0, |i| i + "\tf_epoch_point();\n".len());
    &text[start..]
}
