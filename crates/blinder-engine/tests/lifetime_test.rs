//! Integration tests for value and session lifetimes

use std::thread;

use blinder_engine::{BridgeError, EngineSession, Ownership, entered_depth};

#[test]
fn test_values_outlive_session_handle() {
    let value = {
        let session = EngineSession::new().unwrap();
        session.new_string("kept alive").unwrap()
    };
    assert_eq!(value.ownership(), Ownership::Live);
    assert_eq!(value.as_string().unwrap(), "kept alive");
}

#[test]
fn test_dispose_orphans_values() {
    let session = EngineSession::new().unwrap();
    let object = session.from_json(&serde_json::json!({ "a": 1 })).unwrap();
    let copy = object.clone();
    assert_eq!(object.ownership(), Ownership::Live);

    session.dispose().unwrap();
    assert_eq!(session.handle_count(), 0);
    assert_eq!(object.ownership(), Ownership::ParentDead);
    assert_eq!(copy.ownership(), Ownership::ParentDead);

    assert!(matches!(object.get_property("a"), Err(BridgeError::EngineGone)));
    assert!(matches!(copy.as_string(), Err(BridgeError::EngineGone)));
    assert!(object.session().is_none());

    let late_copy = object.clone();
    assert_eq!(late_copy.ownership(), Ownership::ParentDead);

    drop(object);
    drop(copy);
    drop(late_copy);
}

#[test]
fn test_values_dropped_on_other_threads_after_dispose() {
    let session = EngineSession::new().unwrap();
    let values: Vec<_> = (0..16).map(|i| session.new_int(i).unwrap()).collect();
    session.dispose().unwrap();

    let worker = thread::spawn(move || {
        for value in &values {
            assert!(matches!(value.as_int(), Err(BridgeError::EngineGone)));
        }
        drop(values);
    });
    worker.join().unwrap();
}

#[test]
fn test_callbacks_held_by_script_do_not_keep_session_alive() {
    let session = EngineSession::new().unwrap();
    let weak = session.downgrade();
    let callback = session.new_callback(|_| Ok(None)).unwrap();
    let global = session.global().unwrap();
    global.set_property("hook", &callback).unwrap();

    drop(callback);
    drop(global);
    drop(session);
    assert!(weak.upgrade().is_none());
}

#[test]
fn test_scope_stack_empty_after_operations() {
    let session = EngineSession::new().unwrap();
    let function = session.evaluate("(x) => x", "identity.js").unwrap();
    let arg = session.new_int(5).unwrap();
    assert_eq!(function.call(&[arg]).unwrap().as_int().unwrap(), 5);
    assert_eq!(entered_depth(), 0);

    assert!(function.as_list().is_err());
    assert_eq!(entered_depth(), 0);
}
