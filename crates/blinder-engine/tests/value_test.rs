//! Integration tests for EngineValue operations

use std::thread;

use blinder_engine::{BridgeError, BridgeResult, EngineSession, EngineValue};
use serde_json::json;

fn session() -> EngineSession {
    EngineSession::new().unwrap()
}

#[test]
fn test_evaluate_and_call() {
    let session = session();
    let add = session.evaluate("() => 40 + 2", "add.js").unwrap();
    assert!(add.is_function());
    assert_eq!(add.call(&[]).unwrap().as_int().unwrap(), 42);
}

#[test]
fn test_missing_property_is_undefined() {
    let session = session();
    let object = session.new_object().unwrap();
    assert!(object.get_property("missing").unwrap().is_undefined());
}

#[test]
fn test_as_list_preserves_order() {
    let session = session();
    let array = session.evaluate("[10, 'b', true, null]", "list.js").unwrap();

    let first = array.as_list().unwrap();
    let second = array.as_list().unwrap();
    assert_eq!(first.len(), 4);
    assert_eq!(second.len(), 4);

    assert_eq!(first[0].as_int().unwrap(), 10);
    assert_eq!(first[1].as_string().unwrap(), "b");
    assert!(first[2].as_bool().unwrap());
    assert!(first[3].is_null());

    let render = |items: &[EngineValue]| -> Vec<String> {
        items.iter().map(|item| item.as_string().unwrap()).collect()
    };
    assert_eq!(render(&first), render(&second));
}

#[test]
fn test_as_list_on_non_array() {
    let session = session();
    let object = session.evaluate("({ length: 2, 0: 'a', 1: 'b' })", "obj.js").unwrap();
    let err = object.as_list().unwrap_err();
    assert!(matches!(err, BridgeError::TypeError { .. }));
    assert!(err.to_string().contains("an array"));
}

#[test]
fn test_own_property_names() {
    let session = session();
    let empty = session.new_object().unwrap();
    assert!(empty.get_own_property_names().unwrap().is_empty());

    let object = session
        .evaluate(
            "(() => { const o = Object.create({ inherited: 1 }); o.b = 1; o.a = 2; \
             Object.defineProperty(o, 'hidden', { value: 3, enumerable: false }); return o; })()",
            "names.js",
        )
        .unwrap();
    assert_eq!(object.get_own_property_names().unwrap(), ["b", "a"]);

    let number = session.new_int(5).unwrap();
    assert!(matches!(
        number.get_own_property_names(),
        Err(BridgeError::TypeError { .. })
    ));
}

#[test]
fn test_set_then_get_property() {
    let session = session();
    let object = session.new_object().unwrap();
    let nested = session.from_json(&json!({ "depth": 2 })).unwrap();

    object.set_property("text", "hello").unwrap();
    object.set_property("owned", String::from("owned text")).unwrap();
    object.set_property("count", 42i64).unwrap();
    object.set_property("flag", true).unwrap();
    object.set_property("bytes", b"raw bytes".as_slice()).unwrap();
    object.set_property("nested", &nested).unwrap();

    assert_eq!(object.get_property("text").unwrap().as_string().unwrap(), "hello");
    assert_eq!(object.get_property("owned").unwrap().as_string().unwrap(), "owned text");
    assert_eq!(object.get_property("count").unwrap().as_int().unwrap(), 42);
    assert!(object.get_property("flag").unwrap().as_bool().unwrap());
    assert_eq!(
        object.get_property("bytes").unwrap().as_string_buffer().unwrap(),
        b"raw bytes"
    );
    let read_back = object.get_property("nested").unwrap();
    assert_eq!(read_back.get_property("depth").unwrap().as_int().unwrap(), 2);
    assert_eq!(read_back.to_json().unwrap(), json!({ "depth": 2 }));
}

#[test]
fn test_property_access_requires_object() {
    let session = session();
    let text = session.new_string("not an object").unwrap();
    assert!(matches!(
        text.get_property("length"),
        Err(BridgeError::TypeError { .. })
    ));
    assert!(matches!(
        text.set_property("x", 1i64),
        Err(BridgeError::TypeError { .. })
    ));
}

#[test]
fn test_value_from_another_session_is_rejected() {
    let first = session();
    let second = session();
    let object = first.new_object().unwrap();
    let foreign = second.new_int(1).unwrap();
    assert!(matches!(
        object.set_property("foreign", &foreign),
        Err(BridgeError::Internal(_))
    ));
}

#[test]
fn test_boxed_primitives() {
    let session = session();
    let boxed_string = session.evaluate("new String('x')", "boxed.js").unwrap();
    assert!(boxed_string.is_string());
    assert!(boxed_string.is_object());
    assert_eq!(boxed_string.as_string().unwrap(), "x");

    let boxed_number = session.evaluate("new Number(3.5)", "boxed.js").unwrap();
    assert!(boxed_number.is_number());
    assert!(!boxed_number.is_string());
    assert_eq!(boxed_number.as_double().unwrap(), 3.5);

    let boxed_bool = session.evaluate("new Boolean(false)", "boxed.js").unwrap();
    assert!(boxed_bool.is_bool());
    // Boxed false is an object, so it is truthy.
    assert!(boxed_bool.as_bool().unwrap());

    let plain = session.new_object().unwrap();
    assert!(!plain.is_string());
    assert!(!plain.is_number());
    assert!(!plain.is_bool());
}

#[test]
fn test_predicates() {
    let session = session();
    let array = session.evaluate("[1]", "p.js").unwrap();
    assert!(array.is_array());
    assert!(array.is_object());
    assert!(!array.is_function());

    let function = session.evaluate("(function named() {})", "p.js").unwrap();
    assert!(function.is_function());
    assert!(function.is_object());

    assert!(session.new_undefined().unwrap().is_undefined());
    assert!(session.new_null().unwrap().is_null());
    assert!(session.new_double(0.5).unwrap().is_number());
    assert!(session.new_bool(false).unwrap().is_bool());
}

#[test]
fn test_numeric_coercion() {
    let session = session();
    assert_eq!(session.new_string("17").unwrap().as_int().unwrap(), 17);
    assert_eq!(session.new_double(3.9).unwrap().as_int().unwrap(), 3);
    assert_eq!(session.new_string("2.25").unwrap().as_double().unwrap(), 2.25);
    assert!(session.new_string("nope").unwrap().as_double().unwrap().is_nan());
    assert!(!session.new_string("").unwrap().as_bool().unwrap());
}

#[test]
fn test_integer_conversion_saturates() {
    let session = session();
    let int_of = |source: &str| session.evaluate(source, "int.js").unwrap().as_int().unwrap();
    assert_eq!(int_of("1e20"), i64::MAX);
    assert_eq!(int_of("-1e20"), i64::MIN);
    assert_eq!(int_of("NaN"), 0);
    assert_eq!(int_of("-7.8"), -7);
}

#[test]
fn test_conversion_error_on_symbol() {
    let session = session();
    let symbol = session.evaluate("Symbol('s')", "sym.js").unwrap();
    let err = symbol.as_int().unwrap_err();
    assert!(matches!(err, BridgeError::Conversion { target: "integer", .. }));
    assert!(matches!(symbol.as_double(), Err(BridgeError::Conversion { .. })));
}

#[test]
fn test_string_conversion_uses_to_string() {
    let session = session();
    let object = session
        .evaluate("({ toString() { return 'custom'; } })", "str.js")
        .unwrap();
    assert_eq!(object.as_string().unwrap(), "custom");
}

#[test]
fn test_lone_surrogate_becomes_replacement_character() {
    let session = session();
    let text = session.evaluate("'a\\uD800b'", "str.js").unwrap();
    assert!(text.is_string());
    assert_eq!(text.as_string().unwrap(), "a\u{FFFD}b");
    assert_eq!(text.as_string_buffer().unwrap(), "a\u{FFFD}b".as_bytes());

    let paired = session.evaluate("'\\uD83D\\uDE00'", "str.js").unwrap();
    assert_eq!(paired.as_string().unwrap(), "\u{1F600}");
}

#[test]
fn test_get_class() {
    let session = session();
    let widget = session
        .evaluate("new (class Widget {})()", "class.js")
        .unwrap();
    assert_eq!(widget.get_class().unwrap(), "Widget");
    assert_eq!(session.new_object().unwrap().get_class().unwrap(), "Object");
    let bare = session.evaluate("Object.create(null)", "class.js").unwrap();
    assert_eq!(bare.get_class().unwrap(), "Object");
    assert!(matches!(
        session.new_int(1).unwrap().get_class(),
        Err(BridgeError::TypeError { .. })
    ));
}

#[test]
fn test_call_non_function_never_invokes() {
    let session = session();
    let target = session
        .evaluate(
            "globalThis.touched = 0; ({ valueOf() { touched++; return 1; }, toString() { touched++; return ''; } })",
            "target.js",
        )
        .unwrap();
    let arg = session.new_int(1).unwrap();
    let err = target.call(&[arg]).unwrap_err();
    assert!(matches!(err, BridgeError::TypeError { .. }));

    let touched = session.evaluate("touched", "touched.js").unwrap();
    assert_eq!(touched.as_int().unwrap(), 0);
}

#[test]
fn test_call_with_arguments_and_receiver() {
    let session = session();
    let join = session
        .evaluate("(function (a, b) { return this.prefix + a + b; })", "join.js")
        .unwrap();
    let receiver = session.from_json(&json!({ "prefix": ">" })).unwrap();
    let a = session.new_string("a").unwrap();
    let b = session.new_int(1).unwrap();
    let joined = join.call_with_this(&[a, b], &receiver).unwrap();
    assert_eq!(joined.as_string().unwrap(), ">a1");

    let primitive = session.new_int(3).unwrap();
    assert!(matches!(
        join.call_with_this(&[], &primitive),
        Err(BridgeError::TypeError { .. })
    ));
}

#[test]
fn test_default_receiver_is_global() {
    let session = session();
    let check = session
        .evaluate("(function () { return this === globalThis; })", "this.js")
        .unwrap();
    assert!(check.call(&[]).unwrap().as_bool().unwrap());
}

#[test]
fn test_script_error_is_captured() {
    let session = session();
    let thrower = session
        .evaluate("() => { throw new TypeError('boom'); }", "throw.js")
        .unwrap();
    let err = thrower.call(&[]).unwrap_err();
    assert!(err.is_script_error());
    assert_eq!(err.error_type(), Some("TypeError"));
    match err {
        BridgeError::ScriptExecution { message, stack, .. } => {
            assert_eq!(message, "boom");
            assert!(stack.is_some());
        }
        other => panic!("unexpected error: {other}"),
    }
}

#[test]
fn test_syntax_error_names_file() {
    let session = session();
    let err = session.evaluate("let = ;", "broken.js").unwrap_err();
    match err {
        BridgeError::SyntaxError { file, .. } => assert_eq!(file.as_deref(), Some("broken.js")),
        other => panic!("unexpected error: {other}"),
    }
}

#[test]
fn test_json_round_trip() {
    let session = session();
    let data = json!({ "list": [1, "two", true], "none": null });
    let value = session.from_json(&data).unwrap();
    assert_eq!(value.to_json().unwrap(), data);

    let function = session.evaluate("(() => 1)", "fn.js").unwrap();
    assert_eq!(function.to_json().unwrap(), serde_json::Value::Null);
}

#[test]
fn test_new_array() {
    let session = session();
    let items = vec![
        session.new_int(1).unwrap(),
        session.new_string("x").unwrap(),
    ];
    let array = session.new_array(&items).unwrap();
    assert!(array.is_array());
    assert_eq!(array.to_json().unwrap(), json!([1, "x"]));
}

#[test]
fn test_pending_jobs_drained_after_evaluate() {
    let session = session();
    session
        .evaluate(
            "globalThis.settled = false; Promise.resolve().then(() => { globalThis.settled = true; });",
            "promise.js",
        )
        .unwrap();
    let settled = session.global().unwrap().get_property("settled").unwrap();
    assert!(settled.as_bool().unwrap());
}

#[test]
fn test_native_callback() {
    let session = session();
    let weak = session.downgrade();
    let sum = session
        .new_callback(move |args| {
            let session = weak.upgrade().ok_or(BridgeError::EngineGone)?;
            let total = args
                .iter()
                .map(EngineValue::as_int)
                .sum::<BridgeResult<i64>>()?;
            Ok(Some(session.new_int(total)?))
        })
        .unwrap();

    let apply = session.evaluate("(f) => f(1, 2, 3) * 2", "apply.js").unwrap();
    assert_eq!(apply.call(&[sum]).unwrap().as_int().unwrap(), 12);
}

#[test]
fn test_native_callback_error_is_thrown() {
    let session = session();
    let failing = session
        .new_callback(|_| Err(BridgeError::internal("refused")))
        .unwrap();
    let check = session
        .evaluate(
            "(f) => { try { f(); return 'no error'; } catch (e) { return e.message; } }",
            "catch.js",
        )
        .unwrap();
    let message = check.call(&[failing]).unwrap().as_string().unwrap();
    assert_eq!(message, "Internal error: refused");
}

#[test]
fn test_concurrent_calls_are_serialized() {
    let session = session();
    let counter = session
        .evaluate("(() => { let n = 0; return () => ++n; })()", "counter.js")
        .unwrap();

    let workers: Vec<_> = (0..8)
        .map(|_| {
            let counter = counter.clone();
            thread::spawn(move || {
                for _ in 0..50 {
                    counter.call(&[]).unwrap();
                }
            })
        })
        .collect();
    for worker in workers {
        worker.join().unwrap();
    }

    assert_eq!(counter.call(&[]).unwrap().as_int().unwrap(), 401);
}
