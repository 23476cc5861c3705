use crate::{FieldDef, Metadata, MetadataBuilder, Primitive};

#[test]
fn roundtrip() {
    let mut b = MetadataBuilder::new();
    let int32 = b.primitive(Primitive::I4);
    let point = b.value_type("Demo", "Point");
    b.add_field(FieldDef::new(point, "X", int32).at(4));
    let token = b.string_token("text");
    let mut metadata = b.build().unwrap();
    let array = metadata.array_of(point, 1);

    let binary = metadata.to_binary().unwrap();
    let decoded = Metadata::from_binary(&binary).unwrap();

    assert_eq!(decoded.type_count(), metadata.type_count());
    assert_eq!(decoded.ty(point).full_name(), "Demo.Point");
    assert_eq!(decoded.field(decoded.ty(point).fields[0]).offset, Some(4));
    assert_eq!(decoded.find_type("Demo.Point[]"), Some(array));
    let ctor = decoded.find_method(decoded.well_known().object, ".ctor").unwrap();
    assert_eq!(decoded.resolve_string(ctor, token).unwrap(), "text");
}
