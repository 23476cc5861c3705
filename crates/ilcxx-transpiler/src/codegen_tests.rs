use std::rc::Rc;

use ilcxx_core::{ClauseKind, ExceptionClause, FieldDef, MethodBody, MethodDef, Opcode, Primitive};
use indoc::indoc;

use crate::test_utils::{Il, Program, function, statements};
use crate::{Config, Error, NoBuiltin, TranslationUnit};

fn body(il: &Il) -> MethodBody {
    MethodBody::new(il.finish())
}

fn translate(program: Program, entry: ilcxx_core::MethodId) -> TranslationUnit {
    program.translate(entry).unwrap()
}

fn binary(opcode: Opcode, operand: Primitive, returns: Primitive) -> (TranslationUnit, &'static str) {
    let mut program = Program::new();
    let operand = program.primitive(operand);
    let returns = program.primitive(returns);
    let mut il = Il::new();
    il.op(Opcode::Ldarg0)
        .op(Opcode::Ldarg1)
        .op(opcode)
        .op(Opcode::Ret);
    let method = program.method("Apply", returns, &[operand, operand], &[], &il);
    (translate(program, method), "f_t_Demo_2eProgram__Apply")
}

#[test]
fn integer_addition_wraps() {
    let (unit, ident) = binary(Opcode::Add, Primitive::I4, Primitive::I4);
    let text = function(&unit, ident);

    assert!(text.contains(
        "\nint32_t\nf_t_Demo_2eProgram__Apply(\n\t// System.Int32 p0\n\tint32_t a_0,\n\t// System.Int32 p1\n\tint32_t a_1\n)\n{\n\tint32_t i0;\n\tint32_t i1;\n\tf_epoch_point();\n"
    ));
    insta::assert_snapshot!(statements(text).to_owned(), @"
    L_0000: // ldarg.0
    \ti0 = a_0;
    L_0001: // ldarg.1
    \ti1 = a_1;
    L_0002: // add
    \ti0 = static_cast<int32_t>(static_cast<uint32_t>(i0) + static_cast<uint32_t>(i1));
    L_0003: // ret
    \tf_epoch_point();
    \treturn i0;
    }
    ");
}

#[test]
fn checked_addition_traps() {
    let (unit, ident) = binary(Opcode::AddOvf, Primitive::I4, Primitive::I4);
    let text = function(&unit, ident);

    assert!(text.contains(
        "\t{\n\t\tint32_t r;\n\t\tif (__builtin_add_overflow(i0, i1, &r)) f__throw_overflow();\n\t\ti0 = static_cast<int32_t>(r);\n\t}\n"
    ));
}

#[test]
fn unsigned_checked_multiplication() {
    let (unit, ident) = binary(Opcode::MulOvfUn, Primitive::I8, Primitive::I8);
    let text = function(&unit, ident);

    assert!(text.contains(
        "\t\tuint64_t r;\n\t\tif (__builtin_mul_overflow(static_cast<uint64_t>(j0), static_cast<uint64_t>(j1), &r)) f__throw_overflow();\n\t\tj0 = static_cast<int64_t>(r);\n"
    ));
}

#[test]
fn division_checks_zero_and_overflow() {
    let (unit, ident) = binary(Opcode::Div, Primitive::I4, Primitive::I4);
    let text = function(&unit, ident);

    assert!(text.contains(
        "\tif (i1 == 0) f__throw_divide_by_zero();\n\tif (i1 == -1 && i0 == std::numeric_limits<int32_t>::min()) f__throw_overflow();\n\ti0 = i0 / i1;\n"
    ));
}

#[test]
fn floating_remainder_uses_fmod() {
    let (unit, ident) = binary(Opcode::Rem, Primitive::R8, Primitive::R8);
    let text = function(&unit, ident);

    assert!(text.contains("\tf0 = std::fmod(f0, f1);\n"));
}

#[test]
fn unordered_float_comparison() {
    let (unit, ident) = binary(Opcode::CltUn, Primitive::R8, Primitive::I4);
    let text = function(&unit, ident);

    assert!(text.contains("\ti0 = std::isunordered(f0, f1) || f0 < f1 ? 1 : 0;\n"));
}

#[test]
fn unsigned_integer_comparison() {
    let (unit, ident) = binary(Opcode::CgtUn, Primitive::I4, Primitive::I4);
    let text = function(&unit, ident);

    assert!(text.contains("\ti0 = static_cast<uint32_t>(i0) > static_cast<uint32_t>(i1) ? 1 : 0;\n"));
}

fn conversion(opcode: Opcode, from: Primitive, to: Primitive) -> String {
    let mut program = Program::new();
    let from = program.primitive(from);
    let to = program.primitive(to);
    let mut il = Il::new();
    il.op(Opcode::Ldarg0).op(opcode).op(Opcode::Ret);
    let method = program.method("Convert", to, &[from], &[], &il);
    let unit = translate(program, method);
    function(&unit, "f_t_Demo_2eProgram__Convert").to_owned()
}

#[test]
fn checked_conversion_tests_the_signed_value() {
    let text = conversion(Opcode::ConvOvfU4, Primitive::I4, Primitive::U4);

    assert!(text.contains(
        "\tif (!std::in_range<uint32_t>(i0)) f__throw_overflow();\n\ti0 = static_cast<uint32_t>(i0);\n"
    ));
}

#[test]
fn checked_unsigned_conversion_reinterprets_the_source() {
    let text = conversion(Opcode::ConvOvfI4Un, Primitive::I4, Primitive::I4);

    assert!(text.contains("\tif (!std::in_range<int32_t>(static_cast<uint32_t>(i0))) f__throw_overflow();\n"));
}

#[test]
fn checked_float_conversion_accepts_the_lowest_value() {
    let text = conversion(Opcode::ConvOvfI8, Primitive::R8, Primitive::I8);

    assert!(text.contains(
        "\tif (!(std::trunc(f0) >= static_cast<double>(std::numeric_limits<int64_t>::min()) && f0 < static_cast<double>(std::numeric_limits<int64_t>::max()) + 1.0)) f__throw_overflow();\n\tj0 = static_cast<int64_t>(f0);\n"
    ));
}

#[test]
fn unsigned_widening_zero_extends() {
    let text = conversion(Opcode::ConvU8, Primitive::I4, Primitive::U8);

    assert!(text.contains("\tj0 = static_cast<uint64_t>(static_cast<uint32_t>(i0));\n"));
}

#[test]
fn constants() {
    let mut program = Program::new();
    let void = program.primitive(Primitive::Void);
    let mut il = Il::new();
    il.int(Opcode::LdcI4, i32::MIN)
        .op(Opcode::Pop)
        .long(Opcode::LdcI8, i64::MIN)
        .op(Opcode::Pop)
        .float(Opcode::LdcR8, f64::NAN)
        .op(Opcode::Pop)
        .float(Opcode::LdcR8, 0.25)
        .op(Opcode::Pop)
        .int(Opcode::LdcI4S, -3)
        .op(Opcode::Pop)
        .op(Opcode::Ret);
    let method = program.method("Constants", void, &[], &[], &il);
    let unit = translate(program, method);
    let text = function(&unit, "f_t_Demo_2eProgram__Constants");

    assert!(text.contains("\ti0 = -2147483647 - 1;\n"));
    assert!(text.contains("\tj0 = -9223372036854775807LL - 1;\n"));
    assert!(text.contains("\tf0 = std::numeric_limits<double>::quiet_NaN();\n"));
    assert!(text.contains("\tf0 = 2.5e-1;\n"));
    assert!(text.contains("L_0024: // ldc.i4.s -3\n\ti0 = -3;\n"));
}

#[test]
fn backward_branches_pass_an_epoch_point() {
    let mut program = Program::new();
    let void = program.primitive(Primitive::Void);
    let int = program.primitive(Primitive::I4);
    let mut il = Il::new();
    il.label("top")
        .op(Opcode::Ldarg0)
        .branch(Opcode::BrtrueS, "top")
        .op(Opcode::Ldarg0)
        .branch(Opcode::BrfalseS, "end")
        .label("end")
        .op(Opcode::Ret);
    let method = program.method("Spin", void, &[int], &[], &il);
    let unit = translate(program, method);
    let text = function(&unit, "f_t_Demo_2eProgram__Spin");

    assert!(text.contains(
        "L_0001: // brtrue.s 0000\n\tif (i0) {\n\t\tf_epoch_point();\n\t\tgoto L_0000;\n\t}\n"
    ));
    assert!(text.contains("L_0004: // brfalse.s 0006\n\tif (!i0) goto L_0006;\n"));
}

#[test]
fn switch_becomes_a_jump_table() {
    let mut program = Program::new();
    let void = program.primitive(Primitive::Void);
    let int = program.primitive(Primitive::I4);
    let mut il = Il::new();
    il.op(Opcode::Ldarg0)
        .switch(&["a", "b"])
        .op(Opcode::Ret)
        .label("a")
        .op(Opcode::Ret)
        .label("b")
        .op(Opcode::Ret);
    let method = program.method("Dispatch", void, &[int], &[], &il);
    let unit = translate(program, method);
    let text = function(&unit, "f_t_Demo_2eProgram__Dispatch");

    assert!(text.contains(
        "\tswitch (i0) {\n\tcase 0:\n\t\tgoto L_000f;\n\tcase 1:\n\t\tgoto L_0010;\n\t}\n"
    ));
}

#[test]
fn finally_is_spliced_in_front_of_the_protected_code() {
    let mut program = Program::new();
    let void = program.primitive(Primitive::Void);
    let mut il = Il::new();
    il.op(Opcode::Nop)
        .branch(Opcode::LeaveS, "end")
        .op(Opcode::Nop)
        .op(Opcode::Endfinally)
        .label("end")
        .op(Opcode::Ret);
    let method = program.method("Guarded", void, &[], &[], &il);
    program.add_clause(
        method,
        ExceptionClause {
            kind: ClauseKind::Finally,
            try_offset: 0,
            try_length: 3,
            handler_offset: 3,
            handler_length: 2,
        },
    );
    let unit = translate(program, method);
    let text = function(&unit, "f_t_Demo_2eProgram__Guarded");

    assert!(text.contains("{\n\t// finally: try 0000 to 0003, handler 0003 to 0005\n\tf_epoch_point();\n"));
    assert_eq!(
        statements(text),
        indoc! {"
            {auto finally = f__finally([&]
            {
            L_0003: // nop
            \t;
            L_0004: // endfinally
            \treturn;
            });
            L_0000: // nop
            \t;
            L_0001: // leave.s 0005
            \tgoto L_0005;
            }
            L_0005: // ret
            \tf_epoch_point();
            \treturn;
            }
        "}
    );
}

#[test]
fn catch_filters_by_runtime_type() {
    let mut program = Program::new();
    let void = program.primitive(Primitive::Void);
    let exception = program.b.corlib().exception;
    let mut il = Il::new();
    il.op(Opcode::Nop)
        .branch(Opcode::LeaveS, "end")
        .op(Opcode::Pop)
        .branch(Opcode::LeaveS, "end")
        .label("end")
        .op(Opcode::Ret);
    let method = program.method("Guarded", void, &[], &[], &il);
    program.add_clause(
        method,
        ExceptionClause {
            kind: ClauseKind::Catch(exception),
            try_offset: 0,
            try_length: 3,
            handler_offset: 3,
            handler_length: 3,
        },
    );
    let unit = translate(program, method);
    let text = function(&unit, "f_t_Demo_2eProgram__Guarded");

    assert!(text.contains("\tt_scoped<t_slot> o0;\n"));
    assert_eq!(
        statements(text),
        indoc! {"
            try {
            L_0000: // nop
            \t;
            L_0001: // leave.s 0006
            \tgoto L_0006;
            // catch System.Exception
            } catch (t_scoped<t_slot> e) {
            \tif (!(e && e->f_type()->f__is(&t__type_of<t_System_2eException>::v__instance))) throw;
            \to0 = std::move(e);
            L_0003: // pop
            \to0.f__destruct();
            L_0004: // leave.s 0006
            \tgoto L_0006;
            }
            L_0006: // ret
            \tf_epoch_point();
            \treturn;
            }
        "}
    );
}

fn guarded(il: &Il, clauses: &[ExceptionClause]) -> String {
    let mut program = Program::new();
    let void = program.primitive(Primitive::Void);
    let method = program.method("Guarded", void, &[], &[], il);
    for &clause in clauses {
        program.add_clause(method, clause);
    }
    let unit = translate(program, method);
    statements(function(&unit, "f_t_Demo_2eProgram__Guarded")).to_owned()
}

#[test]
fn fault_runs_only_on_unwind() {
    let mut il = Il::new();
    il.op(Opcode::Nop)
        .branch(Opcode::LeaveS, "end")
        .op(Opcode::Nop)
        .op(Opcode::Endfinally)
        .label("end")
        .op(Opcode::Ret);
    let text = guarded(
        &il,
        &[ExceptionClause {
            kind: ClauseKind::Fault,
            try_offset: 0,
            try_length: 3,
            handler_offset: 3,
            handler_length: 2,
        }],
    );

    assert_eq!(
        text,
        indoc! {"
            try {
            L_0000: // nop
            \t;
            L_0001: // leave.s 0005
            \tgoto L_0005;
            // fault
            } catch (...) {
            L_0003: // nop
            \t;
            L_0004: // endfinally
            \tthrow;
            }
            L_0005: // ret
            \tf_epoch_point();
            \treturn;
            }
        "}
    );
}

#[test]
fn sibling_catches_share_one_native_handler() {
    let mut program = Program::new();
    let void = program.primitive(Primitive::Void);
    let exception = program.b.corlib().exception;
    let failure = program.b.class("Demo", "Failure");
    program.b.type_mut(failure).base = Some(exception);
    let mut il = Il::new();
    il.op(Opcode::Nop)
        .branch(Opcode::LeaveS, "end")
        .op(Opcode::Pop)
        .branch(Opcode::LeaveS, "end")
        .op(Opcode::Pop)
        .branch(Opcode::LeaveS, "end")
        .label("end")
        .op(Opcode::Ret);
    let method = program.method("Guarded", void, &[], &[], &il);
    for (ty, handler_offset) in [(failure, 3), (exception, 6)] {
        program.add_clause(
            method,
            ExceptionClause {
                kind: ClauseKind::Catch(ty),
                try_offset: 0,
                try_length: 3,
                handler_offset,
                handler_length: 3,
            },
        );
    }
    let unit = translate(program, method);
    let text = function(&unit, "f_t_Demo_2eProgram__Guarded");

    assert_eq!(
        statements(text),
        indoc! {"
            try {
            L_0000: // nop
            \t;
            L_0001: // leave.s 0009
            \tgoto L_0009;
            // catch Demo.Failure
            } catch (t_scoped<t_slot> e) {
            \tif (!(e && e->f_type()->f__is(&t__type_of<t_Demo_2eFailure>::v__instance))) goto H_0006;
            \to0 = std::move(e);
            L_0003: // pop
            \to0.f__destruct();
            L_0004: // leave.s 0009
            \tgoto L_0009;
            // catch System.Exception
            H_0006:
            \tif (!(e && e->f_type()->f__is(&t__type_of<t_System_2eException>::v__instance))) throw;
            \to0 = std::move(e);
            L_0006: // pop
            \to0.f__destruct();
            L_0007: // leave.s 0009
            \tgoto L_0009;
            }
            L_0009: // ret
            \tf_epoch_point();
            \treturn;
            }
        "}
    );
}

/// `try { } filter { pop; ldc.i4.<verdict>; endfilter } { pop; leave }`.
fn filtered(il: &mut Il, verdict: Opcode) {
    il.op(Opcode::Nop)
        .branch(Opcode::LeaveS, "end")
        .op(Opcode::Pop)
        .op(verdict)
        .op(Opcode::Endfilter)
        .op(Opcode::Pop)
        .branch(Opcode::LeaveS, "end");
}

const FILTER: ExceptionClause = ExceptionClause {
    kind: ClauseKind::Filter(3),
    try_offset: 0,
    try_length: 3,
    handler_offset: 7,
    handler_length: 3,
};

#[test]
fn rejected_filter_rethrows() {
    let mut il = Il::new();
    filtered(&mut il, Opcode::LdcI4_1);
    il.label("end").op(Opcode::Ret);
    let text = guarded(&il, &[FILTER]);

    assert!(text.starts_with("try {\n"));
    assert!(text.contains("// filter\n} catch (t_scoped<t_slot> e) {\n\to0 = e;\nL_0003: // pop\n"));
    assert!(text.contains(
        "L_0005: // endfilter\n\tif (!i0) throw;\n\to0 = std::move(e);\nL_0007: // pop\n"
    ));
}

#[test]
fn rejected_filter_falls_through_to_the_next_handler() {
    let mut program = Program::new();
    let exception = program.b.corlib().exception;
    let mut il = Il::new();
    filtered(&mut il, Opcode::LdcI4_0);
    il.op(Opcode::Pop)
        .branch(Opcode::LeaveS, "end")
        .label("end")
        .op(Opcode::Ret);
    let catch = ExceptionClause {
        kind: ClauseKind::Catch(exception),
        try_offset: 0,
        try_length: 3,
        handler_offset: 10,
        handler_length: 3,
    };
    let void = program.primitive(Primitive::Void);
    let method = program.method("Guarded", void, &[], &[], &il);
    program.add_clause(method, FILTER);
    program.add_clause(method, catch);
    let unit = translate(program, method);
    let text = statements(function(&unit, "f_t_Demo_2eProgram__Guarded"));

    assert_eq!(text.matches("try {").count(), 1);
    assert_eq!(text.matches("} catch (").count(), 1);
    assert!(text.contains("L_0005: // endfilter\n\tif (!i0) goto H_000a;\n"));
    assert!(text.contains(
        "// catch System.Exception\nH_000a:\n\tif (!(e && e->f_type()->f__is(&t__type_of<t_System_2eException>::v__instance))) throw;\n"
    ));
}

#[test]
fn backward_leave_passes_an_epoch_point() {
    let mut il = Il::new();
    il.label("top")
        .op(Opcode::Nop)
        .branch(Opcode::LeaveS, "top")
        .op(Opcode::Ret);
    let text = guarded(&il, &[]);

    assert!(text.contains("L_0001: // leave.s 0000\n\tf_epoch_point();\n\tgoto L_0000;\n"));
}

#[test]
fn string_literals_are_utf16() {
    let mut program = Program::new();
    let string = program.b.corlib().string;
    let token = program.b.string_token("h\u{e9}\"");
    let mut il = Il::new();
    il.token(Opcode::Ldstr, token).op(Opcode::Ret);
    let method = program.method("Greeting", string, &[], &[], &il);
    let unit = translate(program, method);
    let text = function(&unit, "f_t_Demo_2eProgram__Greeting");

    assert!(text.contains("\to0 = f__new_string(u\"h\\u00e9\\\"\"sv);\n"));
    assert!(text.contains("\treturn std::move(o0);\n"));
}

#[test]
fn static_fields_go_through_the_holder() {
    let mut program = Program::new();
    let void = program.primitive(Primitive::Void);
    let int = program.primitive(Primitive::I4);
    let counter = program
        .b
        .add_field(FieldDef::new(program.class, "counter", int).static_());
    let token = program.b.field_token(counter);
    let mut il = Il::new();
    il.token(Opcode::Ldsfld, token)
        .op(Opcode::LdcI4_1)
        .op(Opcode::Add)
        .token(Opcode::Stsfld, token)
        .op(Opcode::Ret);
    let method = program.method("Bump", void, &[], &[], &il);
    let unit = translate(program, method);
    let text = function(&unit, "f_t_Demo_2eProgram__Bump");

    assert!(text.contains("\ti0 = t_static::v_instance->v_t_Demo_2eProgram->v_counter;\n"));
    assert!(text.contains("\tt_static::v_instance->v_t_Demo_2eProgram->v_counter = i0;\n"));
    assert!(unit.static_declarations.contains("\tt__lazy<t__static_t_Demo_2eProgram> v_t_Demo_2eProgram;\n"));
}

#[test]
fn volatile_access_is_fenced() {
    let mut program = Program::new();
    let int = program.primitive(Primitive::I4);
    let flag = program
        .b
        .add_field(FieldDef::new(program.class, "flag", int).static_());
    let token = program.b.field_token(flag);
    let mut il = Il::new();
    il.op(Opcode::Volatile)
        .token(Opcode::Ldsfld, token)
        .op(Opcode::Ret);
    let method = program.method("Read", int, &[], &[], &il);
    let unit = translate(program, method);
    let text = function(&unit, "f_t_Demo_2eProgram__Read");

    assert!(text.contains(
        "\tstd::atomic_thread_fence(std::memory_order_release);\n\ti0 = t_static::v_instance->v_t_Demo_2eProgram->v_flag;\n\tstd::atomic_thread_fence(std::memory_order_acquire);\n"
    ));
}

#[test]
fn object_construction() {
    let mut program = Program::new();
    let void = program.primitive(Primitive::Void);
    let int = program.primitive(Primitive::I4);
    let object_ctor = program.b.corlib().object_ctor;
    let boxed = program.b.class("Demo", "Holder");
    let base_token = program.b.method_token(object_ctor);
    let mut ctor_il = Il::new();
    ctor_il
        .op(Opcode::Ldarg0)
        .token(Opcode::Call, base_token)
        .op(Opcode::Ret);
    let ctor = program.b.add_method(
        MethodDef::new(boxed, ".ctor", void)
            .param("value", int)
            .with_body(body(&ctor_il)),
    );
    let token = program.b.method_token(ctor);
    let mut il = Il::new();
    il.op(Opcode::LdcI4_5)
        .token(Opcode::Newobj, token)
        .op(Opcode::Pop)
        .op(Opcode::Ret);
    let method = program.method("Make", void, &[], &[], &il);
    let unit = translate(program, method);
    let text = function(&unit, "f_t_Demo_2eProgram__Make");

    assert!(text.contains(
        "\t{auto p = f__new_zerod<t_Demo_2eHolder>();\n\tf_t_Demo_2eHolder___2ector(\n\t\tp,\n\t\ti0\n\t);\n\to0 = std::move(p);}\n"
    ));
    assert!(text.contains("\to0.f__destruct();\n"));
    let ctor = function(&unit, "f_t_Demo_2eHolder___2ector");
    assert!(ctor.contains("\tf_t_System_2eObject___2ector(\n\t\tstd::move(o0)\n\t);\n"));
}

#[test]
fn virtual_calls_index_the_slot_table() {
    let mut program = Program::new();
    let int = program.primitive(Primitive::I4);
    let base = program.b.class("Demo", "Base");
    let derived = program.b.class("Demo", "Derived");
    program.b.type_mut(derived).base = Some(base);
    let mut one = Il::new();
    one.op(Opcode::LdcI4_1).op(Opcode::Ret);
    let run = program
        .b
        .add_method(MethodDef::new(base, "Run", int).virtual_().with_body(body(&one)));
    let mut two = Il::new();
    two.op(Opcode::LdcI4_2).op(Opcode::Ret);
    program
        .b
        .add_method(MethodDef::new(derived, "Run", int).overriding(run).with_body(body(&two)));
    let token = program.b.method_token(run);
    let mut il = Il::new();
    il.op(Opcode::Ldarg0)
        .token(Opcode::Callvirt, token)
        .op(Opcode::Ret);
    let method = program.method("Call", int, &[base], &[], &il);
    let unit = program
        .transpiler(Rc::new(NoBuiltin), Config::new().bundle_types([derived]))
        .run(method)
        .unwrap();
    let text = function(&unit, "f_t_Demo_2eProgram__Call");

    assert!(text.contains(
        "\ti0 = reinterpret_cast<int32_t(*)(t_scoped<t_slot_of<t_Demo_2eBase>>)>(reinterpret_cast<void**>(o0->f_type() + 1)[2])(\n\t\tstd::move(o0)\n\t);\n"
    ));
    function(&unit, "f_t_Demo_2eDerived__Run");
    assert!(unit
        .descriptor_declarations
        .contains("\tvoid* v_method2 = reinterpret_cast<void*>(f_t_Demo_2eBase__Run);\n"));
    assert!(unit
        .descriptor_declarations
        .contains("\tvoid* v_method2 = reinterpret_cast<void*>(f_t_Demo_2eDerived__Run);\n"));
}

#[test]
fn interface_calls_use_a_cached_resolver() {
    let mut program = Program::new();
    let int = program.primitive(Primitive::I4);
    let runner = program.b.interface("Demo", "IRun");
    let declaration = program
        .b
        .add_method(MethodDef::new(runner, "Run", int).abstract_());
    let implementation = program.b.class("Demo", "Impl");
    program.b.type_mut(implementation).interfaces.push(runner);
    let mut three = Il::new();
    three.op(Opcode::LdcI4_3).op(Opcode::Ret);
    program.b.add_method(
        MethodDef::new(implementation, "Run", int)
            .virtual_()
            .with_body(body(&three)),
    );
    let token = program.b.method_token(declaration);
    let mut il = Il::new();
    il.op(Opcode::Ldarg0)
        .token(Opcode::Callvirt, token)
        .op(Opcode::Ret);
    let method = program.method("Call", int, &[runner], &[], &il);
    let unit = program
        .transpiler(Rc::new(NoBuiltin), Config::new().bundle_types([implementation]))
        .run(method)
        .unwrap();
    let text = function(&unit, "f_t_Demo_2eProgram__Call");

    assert!(text.contains("\t{static auto site = reinterpret_cast<void*>(f__resolve<t_Demo_2eIRun, 0>);\n"));
    assert!(text.contains(
        "\ti0 = reinterpret_cast<int32_t(*)(t_scoped<t_slot_of<t_System_2eObject>>)>(reinterpret_cast<void*(*)(void*&, t__type*)>(site)(site, o0->f_type()))(\n\t\tstd::move(o0)\n\t);\n\t}\n"
    ));
    assert!(unit.descriptor_declarations.contains(
        "\t// Demo.IRun\n\tvoid* v_interface0[1] = {\n\t\treinterpret_cast<void*>(f_t_Demo_2eImpl__Run)\n\t};\n"
    ));
    assert!(unit
        .member_definitions
        .contains("{&t__type_of<t_Demo_2eIRun>::v__instance, v_interface0}"));
}

#[test]
fn constrained_call_on_a_value_type_calls_its_override() {
    let mut program = Program::new();
    let string = program.b.corlib().string;
    let to_string = program.b.corlib().object_to_string;
    let counter = program.b.value_type("Demo", "Counter");
    let text_token = program.b.string_token("counter");
    let mut describe = Il::new();
    describe.token(Opcode::Ldstr, text_token).op(Opcode::Ret);
    program.b.add_method(
        MethodDef::new(counter, "ToString", string)
            .overriding(to_string)
            .with_body(body(&describe)),
    );
    let type_token = program.b.type_token(counter);
    let method_token = program.b.method_token(to_string);
    let mut il = Il::new();
    il.int(Opcode::LdargaS, 0)
        .token(Opcode::Constrained, type_token)
        .token(Opcode::Callvirt, method_token)
        .op(Opcode::Ret);
    let method = program.method("Describe", string, &[counter], &[], &il);
    let unit = translate(program, method);
    let text = function(&unit, "f_t_Demo_2eProgram__Describe");

    assert!(text.contains(
        "\to0 = f_t_Demo_2eCounter__ToString(\n\t\treinterpret_cast<t_Demo_2eCounter::t_value*>(p0)\n\t);\n"
    ));
    let own = function(&unit, "f_t_Demo_2eCounter__ToString");
    assert!(own.contains("\tt_Demo_2eCounter::t_value* a_0\n)"));
    assert!(unit.function_declarations.contains("\ninline t_scoped<t_slot_of<t_System_2eString>>\nf_t_Demo_2eCounter__ToString__v("));
}

#[test]
fn unsupported_opcodes_abort_the_run() {
    let mut program = Program::new();
    let void = program.primitive(Primitive::Void);
    let mut il = Il::new();
    il.token(Opcode::Calli, 0x1100_0001).op(Opcode::Ret);
    let method = program.method("Indirect", void, &[], &[], &il);

    let err = program.translate(method).unwrap_err();

    assert!(matches!(err, Error::UnsupportedOpcode { opcode: "calli", .. }));
}
