use crate::opcode::decode;
use crate::{DecodeError, Opcode, Operand};

#[test]
fn decode_short_forms() {
    // ldc.i4.s -2; ldarg.s 5; ret
    let il = [0x1f, 0xfe, 0x0e, 0x05, 0x2a];

    let first = decode(&il, 0).unwrap();
    assert_eq!(first.opcode, Opcode::LdcI4S);
    assert_eq!(first.operand, Operand::Int(-2));
    assert_eq!(first.next, 2);

    let second = decode(&il, 2).unwrap();
    assert_eq!(second.opcode, Opcode::LdargS);
    assert_eq!(second.operand, Operand::Var(5));

    assert_eq!(decode(&il, 4).unwrap().opcode, Opcode::Ret);
}

#[test]
fn branch_targets_are_absolute() {
    // 0: nop; 1: br.s -3 (back to 0); 3: brtrue 0x10
    let il = [0x00, 0x2b, 0xfd, 0x3a, 0x0a, 0x00, 0x00, 0x00];

    assert_eq!(decode(&il, 1).unwrap().target(), Some(0));
    assert_eq!(decode(&il, 3).unwrap().target(), Some(18));
}

#[test]
fn backward_branch_before_start_is_rejected() {
    let il = [0x2b, 0xf0];

    assert_eq!(decode(&il, 0), Err(DecodeError::BadTarget { offset: 0 }));
}

#[test]
fn switch_targets_are_relative_to_table_end() {
    // switch (2) [+0, +1]; nop; nop
    let il = [0x45, 0x02, 0, 0, 0, 0x00, 0, 0, 0, 0x01, 0, 0, 0, 0x00, 0x00];

    let switch = decode(&il, 0).unwrap();
    assert_eq!(switch.operand, Operand::Switch(vec![13, 14]));
    assert_eq!(switch.next, 13);
}

#[test]
fn two_byte_opcodes() {
    let il = [0xfe, 0x01, 0xfe, 0x16, 0x01, 0x00, 0x00, 0x02];

    assert_eq!(decode(&il, 0).unwrap().opcode, Opcode::Ceq);
    let constrained = decode(&il, 2).unwrap();
    assert_eq!(constrained.opcode, Opcode::Constrained);
    assert_eq!(constrained.token(), Some(0x0200_0001));
    assert_eq!(constrained.opcode.mnemonic(), "constrained.");
}

#[test]
fn malformed_encodings() {
    assert_eq!(
        decode(&[0x24], 0),
        Err(DecodeError::UnknownOpcode { offset: 0, code: 0x24 })
    );
    assert_eq!(decode(&[0x20, 0x01], 0), Err(DecodeError::Truncated { offset: 0 }));
    assert_eq!(decode(&[0xfe], 0), Err(DecodeError::Truncated { offset: 0 }));
    assert_eq!(
        decode(&[0x45, 0xff, 0xff, 0x00, 0x00], 0),
        Err(DecodeError::Truncated { offset: 0 })
    );
}

#[test]
fn code_table_is_consistent() {
    let codes = (0x00..=0xffu16).chain(0xfe00..=0xfeff);
    let mut known = 0;
    for code in codes {
        if let Some(opcode) = Opcode::from_code(code) {
            assert_eq!(opcode.code(), code, "{}", opcode.mnemonic());
            known += 1;
        }
    }
    assert_eq!(known, 219);
}
