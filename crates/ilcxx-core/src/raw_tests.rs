use indoc::indoc;

use crate::{ClauseKind, FieldId, Metadata, MetadataError, MethodId, Primitive, TypeId, TypeKind};

/// Index of the first type after the corlib prefix.
const USER: u32 = 21;

/// Corlib prefix: Object, ValueType, Enum, the 15 primitives, String,
/// Array, Exception.
fn corlib_types() -> Vec<String> {
    let mut types = vec![
        r#"{ "namespace": "System", "name": "Object", "kind": "class" }"#.to_owned(),
        r#"{ "namespace": "System", "name": "ValueType", "kind": "class", "base": 0 }"#.to_owned(),
        r#"{ "namespace": "System", "name": "Enum", "kind": "class", "base": 1 }"#.to_owned(),
    ];
    for p in Primitive::ALL {
        let name = p.full_name().trim_start_matches("System.");
        let kind = serde_json::to_string(&p).unwrap();
        types.push(format!(
            r#"{{ "namespace": "System", "name": "{name}", "kind": {{ "primitive": {kind} }}, "base": 1 }}"#
        ));
    }
    for name in ["String", "Array", "Exception"] {
        types.push(format!(
            r#"{{ "namespace": "System", "name": "{name}", "kind": "class", "base": 0 }}"#
        ));
    }
    types
}

fn document(types: &[&str], rest: &str) -> String {
    let mut all = corlib_types();
    all.extend(types.iter().map(|t| t.to_string()));
    let separator = if rest.is_empty() { "" } else { "," };
    format!("{{ \"types\": [{}]{separator}{rest} }}", all.join(",\n"))
}

#[test]
fn parse_corlib_only() {
    let metadata = Metadata::from_json(&document(&[], "")).unwrap();

    assert_eq!(metadata.type_count(), USER as usize);
    assert_eq!(metadata.well_known().object, TypeId::from_raw(0));
    assert_eq!(metadata.primitive(Primitive::I4), TypeId::from_raw(10));
    assert_eq!(metadata.ty(TypeId::from_raw(10)).full_name(), "System.Int32");
    assert_eq!(metadata.well_known().exception, TypeId::from_raw(20));
}

#[test]
fn members_follow_document_order() {
    let point = r#"{ "namespace": "Demo", "name": "Point", "kind": "struct", "base": 1,
                     "layout": { "kind": "explicit", "size": 12 } }"#;
    let rest = indoc! {r#"
        "fields": [
            { "name": "X", "declaring": 21, "type": 10, "offset": 4 },
            { "name": "Y", "declaring": 21, "type": 10, "offset": 4 },
            { "name": "Count", "declaring": 21, "type": 10, "static": true }
        ],
        "methods": [
            { "name": "Sum", "declaring": 21, "return": 10,
              "body": { "il": [42], "locals": [10, 10] } }
        ]
    "#};
    let metadata = Metadata::from_json(&document(&[point], rest)).unwrap();

    let def = metadata.ty(TypeId::from_raw(USER));
    assert_eq!(def.kind, TypeKind::Struct);
    assert_eq!(def.layout.size, 12);
    assert_eq!(def.fields, vec![FieldId::from_raw(0), FieldId::from_raw(1), FieldId::from_raw(2)]);
    assert_eq!(metadata.field(FieldId::from_raw(1)).offset, Some(4));
    assert!(metadata.field(FieldId::from_raw(2)).is_static);

    let sum = metadata.method(MethodId::from_raw(0));
    let body = sum.body.as_ref().unwrap();
    assert_eq!(body.il, vec![0x2a]);
    assert_eq!(body.locals.len(), 2);
    assert!(body.init_locals);
}

#[test]
fn missing_well_known_type() {
    let json = r#"{ "types": [{ "namespace": "System", "name": "Object", "kind": "class" }] }"#;

    let err = Metadata::from_json(json).unwrap_err();

    assert!(matches!(err, MetadataError::MissingWellKnown(name) if name == "System.ValueType"));
}

#[test]
fn dangling_reference() {
    let rest = r#""fields": [{ "name": "X", "declaring": 0, "type": 99 }]"#;

    let err = Metadata::from_json(&document(&[], rest)).unwrap_err();

    assert!(matches!(err, MetadataError::Dangling { what: "type", index: 99 }));
    assert_eq!(err.to_string(), "type #99 does not exist");
}

#[test]
fn tokens_resolve_through_body_overlay() {
    let rest = indoc! {r#"
        "methods": [
            { "name": "Main", "declaring": 0, "return": 10, "static": true,
              "body": { "il": [42], "tokens": [{ "token": 16777217, "type": 18 }] } }
        ],
        "tokens": [
            { "token": 16777217, "type": 0 },
            { "token": 100663297, "method": 0 },
            { "token": 1879048193, "string": "hello" }
        ]
    "#};
    let metadata = Metadata::from_json(&document(&[], rest)).unwrap();
    let main = MethodId::from_raw(0);

    assert_eq!(metadata.resolve_type(main, 0x0100_0001).unwrap(), TypeId::from_raw(18));
    assert_eq!(metadata.resolve_method(main, 0x0600_0001).unwrap(), main);
    assert_eq!(metadata.resolve_string(main, 0x7000_0001).unwrap(), "hello");
    assert!(matches!(
        metadata.resolve_field(main, 0x0600_0001),
        Err(MetadataError::TokenKind { expected: "field", .. })
    ));
    assert!(matches!(
        metadata.resolve_token(main, 0x0a00_0001),
        Err(MetadataError::UnknownToken(0x0a00_0001))
    ));
}

#[test]
fn exception_clauses() {
    let rest = indoc! {r#"
        "methods": [
            { "name": "Run", "declaring": 0, "return": 3, "static": true,
              "body": { "il": [0, 221, 0, 0, 0, 0, 42], "clauses": [
                  { "kind": "finally", "try_offset": 0, "try_length": 6,
                    "handler_offset": 6, "handler_length": 1 },
                  { "kind": { "catch": 20 }, "try_offset": 0, "try_length": 6,
                    "handler_offset": 6, "handler_length": 1 }
              ] } }
        ]
    "#};
    let metadata = Metadata::from_json(&document(&[], rest)).unwrap();

    let clauses = &metadata.method(MethodId::from_raw(0)).body.as_ref().unwrap().clauses;
    assert_eq!(clauses[0].kind, ClauseKind::Finally);
    assert_eq!(clauses[1].kind, ClauseKind::Catch(TypeId::from_raw(20)));
    assert_eq!(clauses[0].handler_end(), 7);
}
