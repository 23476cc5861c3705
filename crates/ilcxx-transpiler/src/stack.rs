//! Abstract operand stack.
//!
//! A stack is an immutable cons list: pushing shares the tail, so the
//! stacks recorded at every offset of a method cost one node per push.

use std::rc::Rc;

use ilcxx_core::{Primitive, TypeId, TypeKind};

use crate::Result;
use crate::driver::Transpiler;
use crate::estimate::Frame;

/// Native storage category of pointers and managed references.
pub(crate) const POINTER: &str = "void*";
pub(crate) const INT32: &str = "int32_t";
pub(crate) const INT64: &str = "int64_t";
pub(crate) const NATIVE_INT: &str = "intptr_t";
pub(crate) const FLOAT: &str = "double";
pub(crate) const OBJECT: &str = "t_scoped<t_slot>";

/// One live operand.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Slot {
    /// Inferred semantic type.
    pub ty: TypeId,
    /// C++ type of the storage variable.
    pub native: String,
    /// Storage variable name: prefix followed by `index`.
    pub variable: String,
    /// Number of slots of the same native type below this one.
    pub index: usize,
}

impl Slot {
    pub fn is_pointer(&self) -> bool {
        self.native == POINTER
    }
}

#[derive(Debug)]
struct Node {
    slot: Slot,
    rest: Stack,
}

#[derive(Clone, Debug, Default)]
pub struct Stack(Option<Rc<Node>>);

impl Stack {
    pub fn new() -> Self {
        Self(None)
    }

    /// Push an operand stored in a variable of `native` type.
    pub fn push(&self, ty: TypeId, native: impl Into<String>, prefix: &str) -> Stack {
        let native = native.into();
        let index = self.iter().filter(|s| s.native == native).count();
        let slot = Slot {
            ty,
            variable: format!("{prefix}{index}"),
            native,
            index,
        };
        Stack(Some(Rc::new(Node {
            slot,
            rest: self.clone(),
        })))
    }

    pub fn top(&self) -> Option<&Slot> {
        self.0.as_ref().map(|node| &node.slot)
    }

    /// The stack below the top, `None` when empty.
    pub fn pop(&self) -> Option<Stack> {
        self.0.as_ref().map(|node| node.rest.clone())
    }

    /// The `n`-th slot from the top (0 is the top).
    pub fn peek(&self, n: usize) -> Option<&Slot> {
        self.iter().nth(n)
    }

    /// Drop `n` slots, `None` when fewer are live.
    pub fn skip(&self, n: usize) -> Option<Stack> {
        let mut stack = self.clone();
        for _ in 0..n {
            stack = stack.pop()?;
        }
        Some(stack)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_none()
    }

    pub fn depth(&self) -> usize {
        self.iter().count()
    }

    /// Slots from the top down.
    pub fn iter(&self) -> impl Iterator<Item = &Slot> {
        let mut node = self.0.as_deref();
        std::iter::from_fn(move || {
            let current = node?;
            node = current.rest.0.as_deref();
            Some(&current.slot)
        })
    }

    /// Native types from the bottom up, the shape compared at merges.
    pub fn natives(&self) -> Vec<&str> {
        let mut natives: Vec<_> = self.iter().map(|s| s.native.as_str()).collect();
        natives.reverse();
        natives
    }
}

impl Transpiler {
    /// Storage variable type and name prefix for an operand of type `ty`.
    pub(crate) fn storage(&mut self, ty: TypeId) -> Result<(String, String)> {
        let def = self.metadata.ty(ty);
        if def.is_pointer_like() {
            return Ok((POINTER.to_owned(), "p".to_owned()));
        }
        let (native, prefix) = match def.kind {
            TypeKind::Primitive(p) | TypeKind::Enum(p) => match p {
                Primitive::I8 | Primitive::U8 => (INT64, "j"),
                Primitive::R4 | Primitive::R8 => (FLOAT, "f"),
                Primitive::I | Primitive::U => (NATIVE_INT, "q"),
                _ => (INT32, "i"),
            },
            TypeKind::Struct => {
                let ident = self.escape_type(ty)?;
                return Ok((format!("t_scoped<{ident}::t_value>"), format!("v{ident}__")));
            }
            _ => (OBJECT, "o"),
        };
        Ok((native.to_owned(), prefix.to_owned()))
    }

    /// Push `ty` and record the variable in the method's declarations.
    pub(crate) fn push(&mut self, frame: &mut Frame, stack: &Stack, ty: TypeId) -> Result<Stack> {
        let (native, prefix) = self.storage(ty)?;
        let stack = stack.push(ty, native.clone(), &prefix);
        let count = stack.top().map_or(0, |s| s.index + 1);
        let entry = frame.declarations.entry(native).or_insert((prefix, 0));
        entry.1 = entry.1.max(count);
        Ok(stack)
    }
}
