// File: crates/wlwire/src/tests.rs
use std::collections::HashMap;
use std::ffi::CString;
use std::sync::Arc;

use crate::*;

// ============================================================================
//  TABLE CONSTRUCTION HELPER
// ============================================================================

/// A small protocol with a self-referential interface (`toplevel.set_parent`)
/// and a pair of interfaces that refer to each other.
fn shell_protocol() -> Arc<Protocol> {
    let mut b = ProtocolBuilder::new("test_shell");
    let surface = b.declare("test_surface", 4);
    let toplevel = b.declare("test_toplevel", 2);
    let seat = b.declare("test_seat", 7);
    let pointer = b.declare("test_pointer", 7);

    b.define(
        surface,
        [
            MessageSpec::new("destroy", ""),
            MessageSpec::new("attach", "?oii"),
            MessageSpec::new("set_title", "s"),
            MessageSpec::new("offset", "5ii"),
        ],
        [MessageSpec::new("enter", "o").interfaces([Some(seat)])],
    )
    .unwrap();
    b.define(
        toplevel,
        [
            MessageSpec::new("set_parent", "?o").interfaces([Some(toplevel)]),
            MessageSpec::new("set_app_id", "s"),
            MessageSpec::new("move", "ou").interfaces([Some(seat), None]),
        ],
        [MessageSpec::new("configure", "iia")],
    )
    .unwrap();
    b.define(
        seat,
        [MessageSpec::new("get_pointer", "n").interfaces([Some(pointer)])],
        [MessageSpec::new("name", "2s")],
    )
    .unwrap();
    b.define(
        pointer,
        [MessageSpec::new("release", "3")],
        [
            MessageSpec::new("enter", "uoff").interfaces([None, Some(surface), None, None]),
            MessageSpec::new("seat", "o").interfaces([Some(seat)]),
        ],
    )
    .unwrap();
    b.build().expect("protocol should build")
}

/// Resolves object references from a fixed map of handle to label.
struct MapResolver(HashMap<NativeHandle, &'static str>);

impl ObjectResolver for MapResolver {
    type Object = &'static str;
    type Error = String;

    fn resolve(&self, reference: ObjectRef, _interface: Option<InterfaceId>, _index: usize) -> std::result::Result<&'static str, String> {
        self.0.get(&reference.handle).copied().ok_or_else(|| format!("no object at {}", reference.handle))
    }
}

fn resolver() -> MapResolver {
    MapResolver(HashMap::from([(NativeHandle(0x10), "buffer"), (NativeHandle(0x20), "seat")]))
}

fn message(sig: &str) -> MessageDescriptor {
    let mut b = ProtocolBuilder::new("adhoc");
    let id = b.declare("adhoc", 1);
    b.define(id, [MessageSpec::new("sample", sig)], []).unwrap();
    let p = b.build().unwrap();
    p.get(id).unwrap().methods[0].clone()
}

fn str_slot(s: &str) -> WireArg {
    WireArg::Str(Some(CString::new(s).unwrap()))
}

// ============================================================================
//  TABLES
// ============================================================================

#[test]
fn test_self_referential_interface_resolves() {
    let p = shell_protocol();
    let toplevel = p.interface("test_toplevel").unwrap();
    let set_parent = toplevel.message(Direction::Request, 0).unwrap();

    assert_eq!(set_parent.name, "set_parent");
    assert_eq!(toplevel.arg_interface(set_parent, 0), Some(toplevel.clone()));
}

#[test]
fn test_mutual_references_resolve() {
    let p = shell_protocol();
    let seat = p.interface("test_seat").unwrap();
    let pointer = p.interface("test_pointer").unwrap();

    let get_pointer = seat.message(Direction::Request, 0).unwrap();
    assert_eq!(seat.arg_interface(get_pointer, 0), Some(pointer.clone()));

    let back = pointer.message(Direction::Event, 1).unwrap();
    assert_eq!(pointer.arg_interface(back, 0), Some(seat));
}

#[test]
fn test_opcode_is_position() {
    let p = shell_protocol();
    let surface = p.interface("test_surface").unwrap();
    for (i, m) in surface.methods.iter().enumerate() {
        assert_eq!(usize::from(m.opcode), i);
    }
    assert!(surface.message(Direction::Request, 4).is_none());
    assert_eq!(surface.message(Direction::Event, 0).unwrap().name, "enter");
}

#[test]
fn test_declare_twice_returns_same_id() {
    let mut b = ProtocolBuilder::new("dup");
    let a = b.declare("thing", 1);
    let again = b.declare("thing", 9);
    assert_eq!(a, again);
}

#[test]
fn test_build_rejects_undefined_interface() {
    let mut b = ProtocolBuilder::new("broken");
    let a = b.declare("defined", 1);
    b.declare("forgotten", 1);
    b.define(a, [], []).unwrap();

    assert_eq!(b.build().unwrap_err(), Error::UndefinedInterface("forgotten".into()));
}

#[test]
fn test_build_rejects_wrong_interface_count() {
    let mut b = ProtocolBuilder::new("broken");
    let a = b.declare("thing", 1);
    b.define(a, [MessageSpec::new("m", "oo").interfaces([Some(a)])], []).unwrap();

    assert_eq!(
        b.build().unwrap_err(),
        Error::ArgInterfaceCountMismatch { message: "m".into(), arguments: 2, interfaces: 1 }
    );
}

#[test]
fn test_build_rejects_bad_signature() {
    let mut b = ProtocolBuilder::new("broken");
    let a = b.declare("thing", 1);
    b.define(a, [MessageSpec::new("m", "iq")], []).unwrap();

    assert!(matches!(b.build().unwrap_err(), Error::InvalidSignature { position: 1, .. }));
}

#[test]
fn test_unknown_interface_lookup() {
    let p = shell_protocol();
    assert_eq!(p.interface("nope").unwrap_err(), Error::UnknownInterface("nope".into()));
    assert_eq!(p.interfaces().count(), 4);
    assert_eq!(p.name(), "test_shell");
}

// ============================================================================
//  DECODING
// ============================================================================

#[test]
fn test_nullable_leading_string_decodes() {
    let msg = message("?ssi");
    let args = ArgumentBuffer::from_slots(vec![WireArg::Str(None), str_slot("x"), WireArg::Int(5)]);

    let decoded = decode(&args, &msg, &resolver()).unwrap();
    assert_eq!(decoded, vec![Argument::Str(None), Argument::Str(Some("x".into())), Argument::Int(5)]);
}

#[test]
fn test_nullable_string_then_int_against_string_slot() {
    // "?si" over [null, "x", 5]: the leading null is accepted, but slot 1
    // holds a string where the signature wants an int.
    let msg = message("?si");
    let args = ArgumentBuffer::from_slots(vec![WireArg::Str(None), str_slot("x"), WireArg::Int(5)]);

    let mut partial = Vec::new();
    let err = decode_into(&args, &msg, &resolver(), &mut partial).unwrap_err();
    assert_eq!(
        err,
        Error::TypeMismatch { message: "sample".into(), index: 1, expected: ArgKind::Int, found: ArgKind::Str }
    );
    assert_eq!(partial, vec![Argument::Str(None)]);
}

#[test]
fn test_required_null_names_message_and_index() {
    let args = ArgumentBuffer::from_slots(vec![WireArg::Str(None), str_slot("x"), WireArg::Int(5)]);

    for sig in ["ssi", "si"] {
        let err = decode(&args, &message(sig), &resolver()).unwrap_err();
        assert_eq!(err, Error::MissingRequiredArgument { message: "sample".into(), index: 0 }, "{}", sig);
    }
}

#[test]
fn test_required_null_object_fails() {
    let p = shell_protocol();
    let toplevel = p.interface("test_toplevel").unwrap();
    let mv = toplevel.message(Direction::Request, 2).unwrap();
    let args = ArgumentBuffer::from_slots(vec![WireArg::Object(None), WireArg::Uint(1)]);

    let err = decode(&args, mv, &resolver()).unwrap_err();
    assert_eq!(err, Error::MissingRequiredArgument { message: "move".into(), index: 0 });
}

#[test]
fn test_objects_resolve_through_resolver() {
    let p = shell_protocol();
    let surface = p.interface("test_surface").unwrap();
    let attach = surface.message(Direction::Request, 1).unwrap();
    let args = ArgumentBuffer::from_slots(vec![
        WireArg::Object(Some(ObjectRef { handle: NativeHandle(0x10), id: 9 })),
        WireArg::Int(-3),
        WireArg::Int(4),
    ]);

    let decoded = decode(&args, attach, &resolver()).unwrap();
    assert_eq!(decoded[0].as_object(), Some(&"buffer"));
    assert_eq!(decoded[1].as_int(), Some(-3));
}

#[test]
fn test_unresolvable_object_reports_reason() {
    let msg = message("o");
    let args = ArgumentBuffer::from_slots(vec![WireArg::Object(Some(ObjectRef { handle: NativeHandle(0x99), id: 3 }))]);

    match decode(&args, &msg, &resolver()).unwrap_err() {
        Error::UnresolvedObject { index, reason, .. } => {
            assert_eq!(index, 0);
            assert!(reason.contains("0x99"));
        }
        other => panic!("unexpected error {:?}", other),
    }
}

#[test]
fn test_version_digit_is_skipped() {
    let msg = message("2uf");
    assert_eq!(msg.signature.since(), Some(2));
    let args = ArgumentBuffer::from_slots(vec![WireArg::Uint(7), WireArg::Fixed(896)]);

    let decoded = decode(&args, &msg, &resolver()).unwrap();
    assert_eq!(decoded, vec![Argument::Uint(7), Argument::Fixed(Fixed::from_f64(3.5))]);
}

#[test]
fn test_slot_kind_must_match_signature() {
    let msg = message("ui");
    let args = ArgumentBuffer::from_slots(vec![WireArg::Uint(1), str_slot("nope")]);

    let err = decode(&args, &msg, &resolver()).unwrap_err();
    assert_eq!(
        err,
        Error::TypeMismatch { message: "sample".into(), index: 1, expected: ArgKind::Int, found: ArgKind::Str }
    );
}

#[test]
fn test_missing_slot_is_count_mismatch() {
    let msg = message("uu");
    let args = ArgumentBuffer::from_slots(vec![WireArg::Uint(1)]);

    let mut partial = Vec::new();
    let err = decode_into(&args, &msg, &resolver(), &mut partial).unwrap_err();
    assert_eq!(err, Error::ArgumentCountMismatch { message: "sample".into(), expected: 2, found: 1 });
    assert_eq!(partial, vec![Argument::Uint(1)]);
}

#[test]
fn test_surplus_slots_are_ignored() {
    let msg = message("u");
    let args = ArgumentBuffer::from_slots(vec![WireArg::Uint(1), WireArg::Uint(2)]);

    let decoded = decode(&args, &msg, &resolver()).unwrap();
    assert_eq!(decoded, vec![Argument::Uint(1)]);
}

#[test]
fn test_arrays_fds_and_new_ids() {
    let msg = message("?anh");
    let args = ArgumentBuffer::from_slots(vec![WireArg::Array(Some(vec![9, 8])), WireArg::NewId(12), WireArg::Fd(5)]);

    let decoded = decode(&args, &msg, &resolver()).unwrap();
    assert_eq!(decoded[0].as_array(), Some(&[9u8, 8][..]));
    assert_eq!(decoded[1].as_new_id(), Some(12));
    assert_eq!(decoded[2].as_fd(), Some(5));
}

#[test]
fn test_invalid_utf8_string() {
    let msg = message("s");
    let args = ArgumentBuffer::from_slots(vec![WireArg::Str(Some(CString::new(vec![0xffu8, 0xfe]).unwrap()))]);

    assert_eq!(
        decode(&args, &msg, &resolver()).unwrap_err(),
        Error::InvalidUtf8 { message: "sample".into(), index: 0 }
    );
}

// ============================================================================
//  ENCODING
// ============================================================================

#[test]
fn test_encode_checks_signature() {
    let msg = message("?osu");
    let seat = ObjectRef { handle: NativeHandle(0x20), id: 4 };

    let buf = encode(&msg, &[Argument::Object(Some(seat)), Argument::Str(Some("hi".into())), Argument::Uint(3)]).unwrap();
    assert_eq!(buf.get(0), Some(&WireArg::Object(Some(seat))));
    assert_eq!(buf.len(), 3);

    let null_ok = encode::<ObjectRef>(&msg, &[Argument::Object(None), Argument::Str(Some("".into())), Argument::Uint(0)]);
    assert!(null_ok.is_ok());

    let missing = encode::<ObjectRef>(&msg, &[Argument::Object(None), Argument::Str(None), Argument::Uint(0)]);
    assert_eq!(missing.unwrap_err(), Error::MissingRequiredArgument { message: "sample".into(), index: 1 });

    let wrong = encode::<ObjectRef>(&msg, &[Argument::Object(None), Argument::Int(1), Argument::Uint(0)]);
    assert!(matches!(wrong.unwrap_err(), Error::TypeMismatch { index: 1, .. }));

    let short = encode::<ObjectRef>(&msg, &[Argument::Object(None)]);
    assert!(matches!(short.unwrap_err(), Error::ArgumentCountMismatch { expected: 3, found: 1, .. }));
}

#[test]
fn test_encoded_buffer_decodes_back() {
    let msg = message("ifsa");
    let args: Vec<Argument<ObjectRef>> = vec![
        Argument::Int(-1),
        Argument::Fixed(Fixed::from_f64(-0.5)),
        Argument::Str(Some("title".into())),
        Argument::Array(Some(vec![1, 2, 3, 4])),
    ];
    let buf = encode(&msg, &args).unwrap();
    assert_eq!(codec::describe_slots(&buf), "ifsa");
    assert_eq!(decode(&buf, &msg, &codec::Unresolved).unwrap(), args);
}
