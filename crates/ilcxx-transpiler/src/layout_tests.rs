use std::rc::Rc;

use ilcxx_core::{
    FieldDef, LayoutKind, MethodBody, MethodDef, Opcode, Primitive, StructLayout, TypeDef,
    TypeId, TypeKind,
};

use crate::method_key::MethodKey;
use crate::test_utils::{Il, Program};
use crate::{Config, DefinitionKind, Error, FieldSlot, NoBuiltin, Transpiler};

fn returning(value: Opcode) -> MethodBody {
    let mut il = Il::new();
    il.op(value).op(Opcode::Ret);
    MethodBody::new(il.finish())
}

fn transpiler(program: Program) -> Transpiler {
    program.transpiler(Rc::new(NoBuiltin), Config::new())
}

fn offsets(t: &Transpiler, ty: TypeId) -> Vec<u32> {
    t.layout(ty).unwrap().fields.iter().map(|f| f.offset).collect()
}

#[test]
fn object_slots_come_first() {
    let program = Program::new();
    let corlib = program.b.corlib();
    let mut t = transpiler(program);

    t.define(corlib.object).unwrap();

    let layout = t.layout(corlib.object).unwrap();
    assert_eq!(layout.kind, DefinitionKind::Type);
    assert_eq!(layout.methods, vec![corlib.object_finalize, corlib.object_to_string]);
    assert!(layout.managed);
    assert_eq!(layout.base, None);
}

#[test]
fn overrides_reuse_the_inherited_slot() {
    let mut program = Program::new();
    let int = program.primitive(Primitive::I4);
    let corlib = program.b.corlib();
    let base = program.b.class("Demo", "Animal");
    let derived = program.b.class("Demo", "Dog");
    program.b.type_mut(derived).base = Some(base);
    let speak = program
        .b
        .add_method(MethodDef::new(base, "Speak", int).virtual_().with_body(returning(Opcode::LdcI4_0)));
    let bark = program
        .b
        .add_method(MethodDef::new(derived, "Speak", int).overriding(speak).with_body(returning(Opcode::LdcI4_1)));
    let fetch = program
        .b
        .add_method(MethodDef::new(derived, "Fetch", int).virtual_().with_body(returning(Opcode::LdcI4_2)));
    let mut t = transpiler(program);

    t.define(derived).unwrap();

    let layout = t.layout(derived).unwrap();
    assert_eq!(
        layout.methods,
        vec![corlib.object_finalize, corlib.object_to_string, bark, fetch]
    );
    assert_eq!(t.layout(base).unwrap().methods[2], speak);
    let key = MethodKey::of(t.metadata(), speak).unwrap();
    assert_eq!(t.layouts.index_of(derived, &key), Some(2));
    let key = MethodKey::of(t.metadata(), fetch).unwrap();
    assert_eq!(t.layouts.index_of(derived, &key), Some(3));
    assert_eq!(t.layouts.index_of(base, &key), None);
}

#[test]
fn interface_methods_map_to_implementations() {
    let mut program = Program::new();
    let int = program.primitive(Primitive::I4);
    let runner = program.b.interface("Demo", "IRun");
    let run = program
        .b
        .add_method(MethodDef::new(runner, "Run", int).abstract_());
    let stop = program
        .b
        .add_method(MethodDef::new(runner, "Stop", int).abstract_());

    let implicit = program.b.class("Demo", "Implicit");
    program.b.type_mut(implicit).interfaces.push(runner);
    let implicit_run = program
        .b
        .add_method(MethodDef::new(implicit, "Run", int).virtual_().with_body(returning(Opcode::LdcI4_1)));
    let implicit_stop = program
        .b
        .add_method(MethodDef::new(implicit, "Stop", int).virtual_().with_body(returning(Opcode::LdcI4_2)));

    let explicit = program.b.class("Demo", "Explicit");
    program.b.type_mut(explicit).interfaces.push(runner);
    let explicit_run = program.b.add_method(
        MethodDef::new(explicit, "Demo.IRun.Run", int)
            .virtual_()
            .with_body(returning(Opcode::LdcI4_3)),
    );
    let public_stop = program
        .b
        .add_method(MethodDef::new(explicit, "Stop", int).virtual_().with_body(returning(Opcode::LdcI4_4)));
    program.b.type_mut(explicit).explicit_impls.push((run, explicit_run));
    let mut t = transpiler(program);

    t.define(implicit).unwrap();
    t.define(explicit).unwrap();

    let table = t.layout(runner).unwrap();
    assert_eq!(table.kind, DefinitionKind::Interface);
    assert_eq!(table.methods, vec![run, stop]);
    assert_eq!(
        t.layout(implicit).unwrap().interface_methods[&runner],
        vec![implicit_run, implicit_stop]
    );
    assert_eq!(
        t.layout(explicit).unwrap().interface_methods[&runner],
        vec![explicit_run, public_stop]
    );
}

#[test]
fn missing_interface_implementation() {
    let mut program = Program::new();
    let int = program.primitive(Primitive::I4);
    let runner = program.b.interface("Demo", "IRun");
    program
        .b
        .add_method(MethodDef::new(runner, "Run", int).abstract_());
    let lazy = program.b.class("Demo", "Lazy");
    program.b.type_mut(lazy).interfaces.push(runner);
    let mut t = transpiler(program);

    let err = t.define(lazy).unwrap_err();

    assert!(matches!(err, Error::Metadata(_)));
}

#[test]
fn managed_flags() {
    let mut program = Program::new();
    let int = program.primitive(Primitive::I4);
    let string = program.b.corlib().string;
    let value_type = program.b.corlib().value_type;

    let plain = program.b.value_type("Demo", "Point");
    program.b.add_field(FieldDef::new(plain, "x", int));
    let holder = program.b.value_type("Demo", "Named");
    program.b.add_field(FieldDef::new(holder, "name", string));
    let nested = program.b.value_type("Demo", "Outer");
    program.b.add_field(FieldDef::new(nested, "inner", holder));
    let counter = program.b.class("Demo", "Counter");
    program.b.add_field(FieldDef::new(counter, "count", int));
    let mut t = transpiler(program);

    for ty in [plain, holder, nested, counter] {
        t.define(ty).unwrap();
    }

    assert!(!t.layout(value_type).unwrap().managed);
    assert!(!t.layout(plain).unwrap().managed);
    assert!(t.layout(holder).unwrap().managed);
    assert!(t.layout(nested).unwrap().managed);
    assert!(t.layout(counter).unwrap().managed);
}

#[test]
fn sequential_fields_are_aligned() {
    let mut program = Program::new();
    let byte = program.primitive(Primitive::U1);
    let int = program.primitive(Primitive::I4);
    let record = program.b.value_type("Demo", "Record");
    program.b.add_field(FieldDef::new(record, "flag", byte));
    program.b.add_field(FieldDef::new(record, "value", int));
    let mut t = transpiler(program);

    t.define(record).unwrap();

    assert_eq!(offsets(&t, record), vec![0, 4]);
    let layout = t.layout(record).unwrap();
    assert_eq!(layout.size, 8);
    assert_eq!(layout.align, 4);
}

#[test]
fn packing_caps_alignment() {
    let mut program = Program::new();
    let byte = program.primitive(Primitive::U1);
    let int = program.primitive(Primitive::I4);
    let record = program.b.value_type("Demo", "Packed");
    program.b.type_mut(record).layout = StructLayout {
        kind: LayoutKind::Sequential,
        pack: 1,
        size: 0,
    };
    program.b.add_field(FieldDef::new(record, "flag", byte));
    program.b.add_field(FieldDef::new(record, "value", int));
    let mut t = transpiler(program);

    t.define(record).unwrap();

    assert_eq!(offsets(&t, record), vec![0, 1]);
    assert_eq!(t.layout(record).unwrap().size, 5);
}

#[test]
fn explicit_offsets_overlap() {
    let mut program = Program::new();
    let int = program.primitive(Primitive::I4);
    let float = program.primitive(Primitive::R4);
    let record = program.b.value_type("Demo", "Bits");
    program.b.type_mut(record).layout = StructLayout {
        kind: LayoutKind::Explicit,
        pack: 0,
        size: 0,
    };
    let a = program.b.add_field(FieldDef::new(record, "asInt", int).at(4));
    let b = program.b.add_field(FieldDef::new(record, "asFloat", float).at(4));
    let mut t = transpiler(program);

    t.define(record).unwrap();

    let layout = t.layout(record).unwrap();
    assert_eq!(
        layout.fields,
        vec![
            FieldSlot { field: a, offset: 4, size: 4 },
            FieldSlot { field: b, offset: 4, size: 4 },
        ]
    );
    assert_eq!(layout.size, 8);
    assert!(layout.has_overlap());
}

#[test]
fn declared_size_wins_when_larger() {
    let mut program = Program::new();
    let int = program.primitive(Primitive::I4);
    let record = program.b.value_type("Demo", "Padded");
    program.b.type_mut(record).layout = StructLayout {
        kind: LayoutKind::Sequential,
        pack: 0,
        size: 16,
    };
    program.b.add_field(FieldDef::new(record, "value", int));
    let mut t = transpiler(program);

    t.define(record).unwrap();

    assert_eq!(t.layout(record).unwrap().size, 16);
}

#[test]
fn reference_fields_take_a_pointer() {
    let mut program = Program::new();
    let string = program.b.corlib().string;
    let int = program.primitive(Primitive::I4);
    let record = program.b.value_type("Demo", "Entry");
    program.b.add_field(FieldDef::new(record, "key", int));
    program.b.add_field(FieldDef::new(record, "name", string));
    let mut t = program.transpiler(Rc::new(NoBuiltin), Config::new().pointer_size(4));

    t.define(record).unwrap();

    assert_eq!(offsets(&t, record), vec![0, 4]);
    assert_eq!(t.layout(record).unwrap().size, 8);
}

#[test]
fn define_is_idempotent() {
    let mut program = Program::new();
    let int = program.primitive(Primitive::I4);
    let record = program.b.value_type("Demo", "Once");
    program.b.add_field(FieldDef::new(record, "value", int));
    let mut t = transpiler(program);

    t.define(record).unwrap();
    let declarations = t.unit.type_definitions.clone();
    t.define(record).unwrap();

    assert_eq!(t.unit.type_definitions, declarations);
    assert_eq!(t.layouts.iter().filter(|l| l.ty == record).count(), 1);
}

#[test]
fn pointers_are_plain() {
    let mut program = Program::new();
    let int = program.primitive(Primitive::I4);
    let pointer = program.b.pointer_to(int);
    let mut t = transpiler(program);

    t.define(pointer).unwrap();

    let layout = t.layout(pointer).unwrap();
    assert_eq!(layout.kind, DefinitionKind::Plain);
    assert!(layout.methods.is_empty());
}

#[test]
fn open_generic_parameters_have_no_layout() {
    let mut program = Program::new();
    let parameter = program
        .b
        .add_type(TypeDef::new("", "T", TypeKind::GenericParameter(0)));
    let mut t = transpiler(program);

    let err = t.define(parameter).unwrap_err();

    assert!(matches!(err, Error::OpenGenericLayout(name) if name == "T"));
}

#[test]
fn self_containing_value_type_is_cyclic() {
    let mut program = Program::new();
    let node = program.b.value_type("Demo", "Node");
    program.b.add_field(FieldDef::new(node, "next", node));
    let mut t = transpiler(program);

    let err = t.define(node).unwrap_err();

    assert!(matches!(err, Error::CyclicLayout(name) if name == "Demo.Node"));
}
