use crate::{MetadataBuilder, MethodDef, Primitive, Token, TypeKind};

#[test]
fn corlib_is_seeded() {
    let b = MetadataBuilder::new();
    let corlib = b.corlib();
    let metadata = b.build().unwrap();

    assert_eq!(metadata.well_known().object, corlib.object);
    assert_eq!(metadata.well_known().string, corlib.string);
    assert_eq!(
        metadata.ty(corlib.primitive(Primitive::R8)).kind,
        TypeKind::Primitive(Primitive::R8)
    );
    assert_eq!(metadata.find_method(corlib.object, "Finalize"), Some(corlib.object_finalize));
    assert!(metadata.method(corlib.object_finalize).is_virtual);
    assert!(metadata.find_field(corlib.string, "_firstChar").is_some());
    assert!(metadata.method(corlib.exception_ctor).body.is_some());
}

#[test]
fn tokens_are_memoized_per_table() {
    let mut b = MetadataBuilder::new();
    let corlib = b.corlib();

    let first = b.type_token(corlib.object);
    let again = b.type_token(corlib.object);
    let second = b.type_token(corlib.string);
    let text = b.string_token("hi");

    assert_eq!(first, again);
    assert_eq!(first & 0xff00_0000, 0x0200_0000);
    assert_eq!(second, first + 1);
    assert_eq!(text, 0x7000_0001);

    let metadata = b.build().unwrap();
    let main = corlib.object_ctor;
    assert_eq!(metadata.resolve_token(main, text).unwrap(), &Token::String("hi".into()));
}

#[test]
fn reflected_views_are_not_members() {
    let mut b = MetadataBuilder::new();
    let void = b.primitive(Primitive::Void);
    let base = b.class("Demo", "Base");
    let derived = b.class("Demo", "Derived");
    b.type_mut(derived).base = Some(base);
    let run = b.add_method(MethodDef::new(base, "Run", void));
    let mut view = MethodDef::new(base, "Run", void);
    view.reflected = Some(derived);
    b.add_method(view);
    let metadata = b.build().unwrap();

    assert_eq!(metadata.ty(base).methods, vec![run]);
    assert!(metadata.ty(derived).methods.is_empty());
}
