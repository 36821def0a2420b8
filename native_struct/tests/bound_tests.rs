/* Bound struct tests against owned buffers and real #[repr(C)] memory */

use native_layout::{Address, FieldError, FieldType, LayoutError, StructPrototype, Value};
use native_struct::{BoundStruct, StructError};
use std::collections::BTreeMap;
use std::mem::size_of;
use std::sync::Arc;

#[repr(C)]
#[derive(Default)]
struct Mixed {
    a: i8,
    b: i32,
    c: i16,
}

#[repr(C)]
#[derive(Default)]
struct Inner {
    value: u32,
    level: u16,
}

#[repr(C)]
struct Outer {
    id: u8,
    inner: Inner,
    remote: *mut Inner,
    cookie: u64,
}

fn mixed_proto() -> Arc<StructPrototype> {
    StructPrototype::builder()
        .named("Mixed")
        .add_primitive("a", FieldType::Int8)
        .add_primitive("b", FieldType::Int32)
        .add_primitive("c", FieldType::Int16)
        .build()
        .unwrap()
}

fn inner_proto() -> Arc<StructPrototype> {
    StructPrototype::builder()
        .named("Inner")
        .add_primitive("value", FieldType::UInt32)
        .add_primitive("level", FieldType::UInt16)
        .build()
        .unwrap()
}

fn outer_proto() -> Arc<StructPrototype> {
    let inner = inner_proto();
    StructPrototype::builder()
        .named("Outer")
        .add_primitive("id", FieldType::UInt8)
        .add_struct("inner", &inner)
        .add_pointer("remote", Some(&inner))
        .add_primitive("cookie", FieldType::UInt64)
        .build()
        .unwrap()
}

#[test]
fn layout_matches_the_c_compiler() {
    assert_eq!(mixed_proto().size(), size_of::<Mixed>());
    assert_eq!(inner_proto().size(), size_of::<Inner>());
    assert_eq!(outer_proto().size(), size_of::<Outer>());
}

#[test]
fn foreign_binding_writes_through_to_native_struct() {
    let mut native = Mixed::default();
    let bound = unsafe {
        BoundStruct::bind_foreign(
            mixed_proto(),
            Address::from_ptr(&mut native as *mut Mixed),
            size_of::<Mixed>(),
        )
    }
    .unwrap();

    bound.put(&["a"], Value::Int(0xFF)).unwrap();
    bound.put(&["b"], Value::Int(-7)).unwrap();
    bound.put(&["c"], Value::Int(1234)).unwrap();
    assert!(!bound.owns_memory());
    drop(bound);

    assert_eq!(native.a, -1);
    assert_eq!(native.b, -7);
    assert_eq!(native.c, 1234);
}

#[test]
fn foreign_binding_rejects_short_or_null_memory() {
    let mut buf = [0u8; 8];
    let err = unsafe {
        BoundStruct::bind_foreign(mixed_proto(), Address::from_ptr(buf.as_mut_ptr()), buf.len())
    }
    .unwrap_err();
    assert_eq!(
        err,
        StructError::Layout(LayoutError::BufferTooSmall {
            required: 12,
            available: 8
        })
    );

    let err = unsafe { BoundStruct::bind_foreign(mixed_proto(), Address::NULL, 64) }.unwrap_err();
    assert_eq!(err, StructError::Layout(LayoutError::NullAddress));
}

#[test]
fn path_access_and_errors() {
    let bound = BoundStruct::bind_owned(outer_proto()).unwrap();
    bound.put(&["inner", "level"], Value::Int(9)).unwrap();
    assert_eq!(bound.get(&["inner", "level"]).unwrap(), Value::Int(9));

    assert_eq!(
        bound.get(&["missing_field"]).unwrap_err(),
        StructError::Field(FieldError::NotFound {
            path: "missing_field".into()
        })
    );
    assert_eq!(
        bound.get(&["inner"]).unwrap_err(),
        StructError::Field(FieldError::NotPrimitive {
            path: "inner".into()
        })
    );
    assert_eq!(
        bound.get(&["remote"]).unwrap_err(),
        StructError::Field(FieldError::NotPrimitive {
            path: "remote".into()
        })
    );
    assert_eq!(bound.get_address(&["remote"]).unwrap(), Address::NULL);
}

#[test]
fn overflow_is_reported_and_memory_kept() {
    let bound = BoundStruct::bind_owned(outer_proto()).unwrap();
    bound.put(&["inner", "level"], Value::Int(0xFFFF)).unwrap();
    let before = bound.bytes().unwrap();

    let err = bound
        .put(&["inner", "level"], Value::Int(65536))
        .unwrap_err();
    match err {
        StructError::Overflow(overflow) => {
            assert_eq!(overflow.field_type, FieldType::UInt16);
            assert_eq!(overflow.value, 65536);
        }
        other => panic!("expected overflow, got {:?}", other),
    }
    assert_eq!(bound.bytes().unwrap(), before);
    assert_eq!(bound.get(&["inner", "level"]).unwrap(), Value::Int(0xFFFF));
}

#[test]
fn embedded_child_shares_parent_memory() {
    let mut parent = BoundStruct::bind_owned(outer_proto()).unwrap();
    let child = parent.wrap_child_embedded("inner").unwrap();
    assert!(!child.owns_memory());
    assert_eq!(child.len(), size_of::<Inner>());

    child.put(&["value"], Value::Int(77)).unwrap();
    assert_eq!(parent.get(&["inner", "value"]).unwrap(), Value::Int(77));
    assert_eq!(
        child.address().unwrap().get(),
        parent.address().unwrap().get() + std::mem::offset_of!(Outer, inner)
    );

    assert!(matches!(
        parent.wrap_child_embedded("cookie"),
        Err(StructError::Field(FieldError::NotAggregate { .. }))
    ));

    /* The owner's close invalidates every embedded view */
    parent.close();
    assert!(matches!(
        child.get(&["value"]),
        Err(StructError::UseAfterClose(_))
    ));
}

#[test]
fn remote_child_is_independent_of_parent() {
    let mut target = Box::new(Inner {
        value: 5,
        level: 2,
    });
    let mut native = Outer {
        id: 1,
        inner: Inner::default(),
        remote: &mut *target as *mut Inner,
        cookie: 0,
    };
    let parent = unsafe {
        BoundStruct::bind_foreign(
            outer_proto(),
            Address::from_ptr(&mut native as *mut Outer),
            size_of::<Outer>(),
        )
    }
    .unwrap();

    let mut remote = unsafe { parent.wrap_child_remote("remote") }.unwrap();
    assert_eq!(remote.get(&["value"]).unwrap(), Value::Int(5));
    remote.put(&["level"], Value::Int(40)).unwrap();
    remote.close();

    parent.put(&["cookie"], Value::Int(0xDEAD_BEEF)).unwrap();
    assert_eq!(parent.get(&["cookie"]).unwrap(), Value::Int(0xDEAD_BEEF));
    assert_eq!(parent.get(&["id"]).unwrap(), Value::Int(1));
    drop(parent);

    assert_eq!(target.level, 40);
    assert_eq!(native.cookie, 0xDEAD_BEEF);
}

#[test]
fn remote_wrap_rejects_null_and_opaque_pointers() {
    let opaque = StructPrototype::builder()
        .add_pointer("handle", None)
        .add_pointer("next", Some(&inner_proto()))
        .add_primitive("raw", FieldType::Pointer)
        .build()
        .unwrap();
    let bound = BoundStruct::bind_owned(opaque).unwrap();

    let err = unsafe { bound.wrap_child_remote("next") }.unwrap_err();
    assert_eq!(
        err,
        StructError::Field(FieldError::NullPointer {
            path: "next".into()
        })
    );
    let err = unsafe { bound.wrap_child_remote("handle") }.unwrap_err();
    assert_eq!(
        err,
        StructError::Field(FieldError::OpaquePointer {
            path: "handle".into()
        })
    );

    bound.put_address(&["raw"], Address::new(0x40)).unwrap();
    assert_eq!(bound.get(&["raw"]).unwrap(), Value::Address(Address::new(0x40)));
}

#[test]
fn allocated_remote_lives_as_long_as_the_owner() {
    let mut parent = BoundStruct::bind_owned(outer_proto()).unwrap();
    let allocated = parent.allocate_remote("remote").unwrap();
    allocated.put(&["value"], Value::Int(12)).unwrap();

    assert_eq!(
        parent.get_address(&["remote"]).unwrap(),
        allocated.address().unwrap()
    );
    let followed = unsafe { parent.wrap_child_remote("remote") }.unwrap();
    assert_eq!(followed.get(&["value"]).unwrap(), Value::Int(12));
    drop(followed);

    parent.close();
    assert!(matches!(
        allocated.get(&["value"]),
        Err(StructError::UseAfterClose(_))
    ));
}

#[test]
fn snapshot_and_put_all() {
    let levels = StructPrototype::builder()
        .named("Levels")
        .add_primitive("count", FieldType::UInt8)
        .add_array("steps", FieldType::Int16, 3)
        .add_union(
            "data",
            vec![
                native_layout::FieldDescriptor::primitive("word", FieldType::UInt32),
                native_layout::FieldDescriptor::primitive("half", FieldType::UInt16),
            ],
        )
        .build()
        .unwrap();
    let bound = BoundStruct::bind_owned(levels).unwrap();

    let mut data = BTreeMap::new();
    data.insert("half".to_string(), Value::Int(0x0102));
    let mut values = BTreeMap::new();
    values.insert("count".to_string(), Value::Int(3));
    values.insert(
        "steps".to_string(),
        Value::Array(vec![Value::Int(-1), Value::Int(2)]),
    );
    values.insert("data".to_string(), Value::Struct(data));
    bound.put_all(&values).unwrap();

    assert_eq!(bound.get(&["steps", "1"]).unwrap(), Value::Int(2));
    assert_eq!(
        bound.get(&["steps"]).unwrap(),
        Value::Array(vec![Value::Int(-1), Value::Int(2), Value::Int(0)])
    );

    let snapshot = bound.snapshot().unwrap();
    assert_eq!(snapshot.member("count"), Some(&Value::Int(3)));
    let data = snapshot.member("data").unwrap();
    assert_eq!(data.member("half"), Some(&Value::Int(0x0102)));
    let word = data.member("word").and_then(Value::as_int).unwrap();
    assert_eq!((word as u32).to_ne_bytes()[..2], 0x0102u16.to_ne_bytes());

    let json = serde_json::to_value(snapshot.member("count").unwrap()).unwrap();
    assert_eq!(json, serde_json::json!({"kind": "int", "value": 3}));

    let too_long = Value::Array(vec![Value::Int(0); 4]);
    assert!(matches!(
        bound.put(&["steps"], too_long),
        Err(StructError::Field(FieldError::IndexOutOfRange { .. }))
    ));
    let bad_element = Value::Array(vec![Value::Int(1), Value::Int(70000)]);
    assert!(matches!(
        bound.put(&["steps"], bad_element),
        Err(StructError::Overflow(_))
    ));
    assert_eq!(bound.get(&["steps", "0"]).unwrap(), Value::Int(-1));
}

fn tagged_proto() -> Arc<StructPrototype> {
    StructPrototype::builder()
        .named("Tagged")
        .add_primitive("tag", FieldType::UInt8)
        .add_union(
            "data",
            vec![
                native_layout::FieldDescriptor::primitive("a", FieldType::UInt32),
                native_layout::FieldDescriptor::primitive("b", FieldType::UInt16),
            ],
        )
        .build()
        .unwrap()
}

#[test]
fn edited_union_member_survives_snapshot_commit() {
    let bound = BoundStruct::bind_owned(tagged_proto()).unwrap();

    let mut snapshot = bound.snapshot().unwrap();
    let Value::Struct(members) = &mut snapshot else {
        panic!("expected a struct snapshot");
    };
    let Some(Value::Struct(data)) = members.get_mut("data") else {
        panic!("expected union members");
    };
    data.insert("a".to_string(), Value::Int(0x1234_5678));
    members.insert("tag".to_string(), Value::Int(1));
    bound.put_all(members).unwrap();

    assert_eq!(bound.get(&["data", "a"]).unwrap(), Value::Int(0x1234_5678));
    assert_eq!(bound.get(&["tag"]).unwrap(), Value::Int(1));

    /* Re-committing an unedited snapshot leaves memory alone */
    let snapshot = bound.snapshot().unwrap();
    let before = bound.bytes().unwrap();
    bound.put_all(snapshot.as_struct().unwrap()).unwrap();
    assert_eq!(bound.bytes().unwrap(), before);
}

#[test]
fn union_rejects_new_values_for_two_members() {
    let bound = BoundStruct::bind_owned(tagged_proto()).unwrap();
    bound.put(&["data", "a"], Value::Int(7)).unwrap();
    let before = bound.bytes().unwrap();

    let mut data = BTreeMap::new();
    data.insert("a".to_string(), Value::Int(1));
    data.insert("b".to_string(), Value::Int(2));
    let mut values = BTreeMap::new();
    values.insert("data".to_string(), Value::Struct(data));

    let err = bound.put_all(&values).unwrap_err();
    assert_eq!(
        err,
        StructError::Field(FieldError::UnionConflict {
            path: "data".into(),
            first: "a".into(),
            second: "b".into(),
        })
    );
    assert_eq!(bound.bytes().unwrap(), before);
}

#[test]
fn short_array_zeroes_the_tail() {
    let proto = StructPrototype::builder()
        .add_array("steps", FieldType::Int16, 3)
        .build()
        .unwrap();
    let bound = BoundStruct::bind_owned(proto).unwrap();
    bound
        .put(&["steps"], Value::Array(vec![Value::Int(5); 3]))
        .unwrap();
    bound
        .put(&["steps"], Value::Array(vec![Value::Int(1), Value::Int(2)]))
        .unwrap();
    assert_eq!(
        bound.get(&["steps"]).unwrap(),
        Value::Array(vec![Value::Int(1), Value::Int(2), Value::Int(0)])
    );
}

#[test]
fn reallocating_a_remote_releases_the_previous_target() {
    let mut parent = BoundStruct::bind_owned(outer_proto()).unwrap();
    let first = parent.allocate_remote("remote").unwrap();
    first.put(&["value"], Value::Int(1)).unwrap();

    let second = parent.allocate_remote("remote").unwrap();
    assert!(matches!(
        first.get(&["value"]),
        Err(StructError::UseAfterClose(_))
    ));
    assert_eq!(second.get(&["value"]).unwrap(), Value::Int(0));
    assert_eq!(
        parent.get_address(&["remote"]).unwrap(),
        second.address().unwrap()
    );

    parent.close();
    assert!(second.is_closed());
}

#[test]
fn text_and_fixed_point_fields() {
    let proto = StructPrototype::builder()
        .add_primitive("name", FieldType::OpaqueBytes(8))
        .add_primitive("rate", FieldType::Int32)
        .build()
        .unwrap();
    let bound = BoundStruct::bind_owned(proto).unwrap();

    bound.put(&["name"], Value::text("stereo")).unwrap();
    bound.put(&["name"], Value::text("mono")).unwrap();
    let name = bound.get(&["name"]).unwrap();
    assert_eq!(name, Value::Bytes(b"mono\0\0\0\0".to_vec()));
    assert_eq!(name.as_text().as_deref(), Some("mono"));

    let err = bound.put(&["name"], Value::text("too long!")).unwrap_err();
    assert!(matches!(err, StructError::Overflow(_)));

    bound.put(&["rate"], Value::from_fixed(44.1, 16)).unwrap();
    let rate = bound.get(&["rate"]).unwrap().as_fixed(16).unwrap();
    assert!((rate - 44.1).abs() < 1e-4);
}
