use std::rc::Rc;

use ilcxx_core::{Primitive, TypeId};

use crate::stack::{FLOAT, INT32, INT64, NATIVE_INT, OBJECT, POINTER};
use crate::test_utils::Program;
use crate::{Config, NoBuiltin, Stack, Transpiler};

fn ty(i: u32) -> TypeId {
    TypeId::from_raw(i)
}

fn storage(t: &mut Transpiler, ty: TypeId) -> (String, String) {
    t.storage(ty).unwrap()
}

#[test]
fn variables_are_numbered_per_native_type() {
    let stack = Stack::new()
        .push(ty(1), INT32, "i")
        .push(ty(2), OBJECT, "o")
        .push(ty(1), INT32, "i");

    let variables: Vec<&str> = stack.iter().map(|s| s.variable.as_str()).collect();
    assert_eq!(variables, ["i1", "o0", "i0"]);
    assert_eq!(stack.natives(), [INT32, OBJECT, INT32]);
    assert_eq!(stack.depth(), 3);
}

#[test]
fn popping_shares_the_tail() {
    let base = Stack::new().push(ty(1), INT32, "i");
    let left = base.push(ty(3), INT64, "j");
    let right = base.push(ty(1), INT32, "i");

    assert_eq!(left.pop().unwrap().natives(), base.natives());
    assert_eq!(right.top().unwrap().variable, "i1");
    assert_eq!(left.top().unwrap().variable, "j0");
    assert_eq!(base.depth(), 1);
}

#[test]
fn peek_and_skip() {
    let stack = Stack::new()
        .push(ty(1), INT32, "i")
        .push(ty(4), FLOAT, "f")
        .push(ty(5), POINTER, "p");

    assert_eq!(stack.peek(0).unwrap().variable, "p0");
    assert_eq!(stack.peek(2).unwrap().variable, "i0");
    assert!(stack.peek(3).is_none());
    assert_eq!(stack.skip(2).unwrap().natives(), [INT32]);
    assert!(stack.skip(3).unwrap().is_empty());
    assert!(stack.skip(4).is_none());
    assert!(Stack::new().pop().is_none());
}

#[test]
fn storage_categories() {
    let mut program = Program::new();
    let point = program.b.value_type("Demo", "Point");
    let int = program.primitive(Primitive::I4);
    let byte = program.primitive(Primitive::U1);
    let long = program.primitive(Primitive::U8);
    let single = program.primitive(Primitive::R4);
    let native = program.primitive(Primitive::I);
    let pointer = program.b.pointer_to(int);
    let by_ref = program.b.by_ref_to(point);
    let class = program.class;
    let mut t = program.transpiler(Rc::new(NoBuiltin), Config::new());

    assert_eq!(storage(&mut t, int), (INT32.to_owned(), "i".to_owned()));
    assert_eq!(storage(&mut t, byte), (INT32.to_owned(), "i".to_owned()));
    assert_eq!(storage(&mut t, long), (INT64.to_owned(), "j".to_owned()));
    assert_eq!(storage(&mut t, single), (FLOAT.to_owned(), "f".to_owned()));
    assert_eq!(storage(&mut t, native), (NATIVE_INT.to_owned(), "q".to_owned()));
    assert_eq!(storage(&mut t, pointer), (POINTER.to_owned(), "p".to_owned()));
    assert_eq!(storage(&mut t, by_ref), (POINTER.to_owned(), "p".to_owned()));
    assert_eq!(storage(&mut t, class), (OBJECT.to_owned(), "o".to_owned()));
    assert_eq!(
        storage(&mut t, point),
        (
            "t_scoped<t_Demo_2ePoint::t_value>".to_owned(),
            "vt_Demo_2ePoint__".to_owned()
        )
    );
}
