use capsule::prelude::*;
use serde_json::json;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use thiserror::Error;

#[derive(Debug, Error)]
#[error("{0}")]
struct TypeError(String);

#[derive(Debug, Error)]
#[error("{0}")]
struct NetworkError(String);

fn counted(calls: &Arc<AtomicU32>, value: Value) -> Step {
    let calls = Arc::clone(calls);
    Step::new(move |_| {
        calls.fetch_add(1, Ordering::SeqCst);
        Ok(value.clone())
    })
}

#[test]
fn test_then_return_reads_key_written_by_step() {
    let mut capsule = Capsule::new();
    capsule.through([
        Step::new(|inv| {
            inv.set("a", json!(1));
            Ok(Value::Null)
        }),
        Step::new(|inv| {
            let a = inv.arg_as::<i64>("a")?;
            Ok(json!(a + 1))
        })
        .param("a"),
    ]);

    assert_eq!(capsule.then_return("a").expect("run succeeds"), Some(json!(1)));
}

#[test]
fn test_setter_step_then_return() {
    let mut capsule = Capsule::new();
    capsule.through([Step::constant(json!(5)).setter("total")]);

    assert_eq!(
        capsule.then_return("total").expect("run succeeds"),
        Some(json!(5))
    );
    assert_eq!(capsule.get("total"), Some(Item::Value(json!(5))));
}

#[test]
fn test_then_return_step_target() {
    let mut capsule = Capsule::new();
    capsule.through([Step::constant(json!(2)).setter("n")]);

    let doubled = Step::new(|inv| Ok(json!(inv.arg_as::<i64>("n")? * 2))).param("n");
    assert_eq!(capsule.then_return(doubled).expect("run"), Some(json!(4)));
    assert_eq!(capsule.then_return("absent").expect("run"), None);
}

#[test]
fn test_memoized_across_runs() {
    let calls = Arc::new(AtomicU32::new(0));
    let mut capsule = Capsule::new();
    capsule.through([counted(&calls, json!("once")).setter("result")]);

    capsule.run().expect("first run");
    capsule.run().expect("second run");

    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert_eq!(capsule.get("result"), Some(Item::Value(json!("once"))));
}

#[test]
fn test_set_invalidates_memoized_key() {
    let calls = Arc::new(AtomicU32::new(0));
    let mut capsule = Capsule::new();
    capsule.set("config", counted(&calls, json!({"mode": "lazy"})));

    assert_eq!(
        capsule.evaluate_key("config").expect("key"),
        Some(json!({"mode": "lazy"}))
    );
    capsule.evaluate_key("config").expect("key");
    assert_eq!(calls.load(Ordering::SeqCst), 1);

    capsule.set("config", json!({"mode": "eager"}));
    assert_eq!(
        capsule.evaluate_key("config").expect("key"),
        Some(json!({"mode": "eager"}))
    );
}

#[test]
fn test_run_if_blank_skips_when_present() {
    let calls = Arc::new(AtomicU32::new(0));
    let mut capsule = Capsule::new();
    capsule
        .set("x", "present")
        .through([counted(&calls, json!(1)).run_if_blank("x")]);

    capsule.run().expect("run");
    assert_eq!(calls.load(Ordering::SeqCst), 0);
}

#[test]
fn test_run_if_blank_runs_when_absent_or_empty() {
    for initial in [None, Some(json!("")), Some(json!([])), Some(Value::Null)] {
        let calls = Arc::new(AtomicU32::new(0));
        let mut capsule = Capsule::new();
        if let Some(value) = initial {
            capsule.set("x", value);
        }
        capsule.through([counted(&calls, json!(1)).run_if_blank("x")]);

        capsule.run().expect("run");
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}

#[test]
fn test_run_if_blank_sees_earlier_steps() {
    let calls = Arc::new(AtomicU32::new(0));
    let mut capsule = Capsule::new();
    capsule.through([
        Step::constant(json!("from cache")).setter("user"),
        counted(&calls, json!("from db")).setter("user").run_if_blank("user"),
    ]);

    assert_eq!(
        capsule.then_return("user").expect("run"),
        Some(json!("from cache"))
    );
    assert_eq!(calls.load(Ordering::SeqCst), 0);
}

#[test]
fn test_catch_step_does_not_run_in_normal_pass() {
    let calls = Arc::new(AtomicU32::new(0));
    let mut capsule = Capsule::new();
    capsule.through([
        Step::constant(json!(1)),
        counted(&calls, json!(2)).catch(Catch::any()),
    ]);

    capsule.run().expect("run");
    assert_eq!(calls.load(Ordering::SeqCst), 0);
}

#[test]
fn test_halt_short_circuits() {
    let a = Arc::new(AtomicU32::new(0));
    let b = Arc::new(AtomicU32::new(0));
    let mut capsule = Capsule::new();
    capsule.through([
        counted(&a, json!("a")),
        Step::new(|inv| Err(inv.halt(json!("stopped")))),
        counted(&b, json!("b")),
    ]);

    capsule.run().expect("halt is not a failure");

    assert_eq!(a.load(Ordering::SeqCst), 1);
    assert_eq!(b.load(Ordering::SeqCst), 0);
    assert!(capsule.has_halt());
    assert_eq!(capsule.halt_value(), Some(&json!("stopped")));
}

#[test]
fn test_then_return_prefers_halt_value() {
    let mut capsule = Capsule::new();
    capsule.set("result", "normal").through([Step::new(|inv| {
        Err(inv.halt(json!({"status": 403})))
    })]);

    assert_eq!(
        capsule.then_return("result").expect("run"),
        Some(json!({"status": 403}))
    );
}

#[test]
fn test_bare_halted_error_halts_with_null() {
    let after = Arc::new(AtomicU32::new(0));
    let mut capsule = Capsule::new();
    capsule.set("result", "normal").through([
        Step::new(|_| Err(CapsuleError::Halted)),
        counted(&after, json!(1)),
    ]);

    assert_eq!(capsule.then_return("result").expect("run"), Some(Value::Null));
    assert!(capsule.has_halt());
    assert_eq!(after.load(Ordering::SeqCst), 0);
}

#[test]
fn test_run_if_blank_on_dotted_key() {
    let calls = Arc::new(AtomicU32::new(0));
    let mut capsule = Capsule::new();
    capsule
        .set("order", json!({"email": "a@b.c"}))
        .through([counted(&calls, json!("x")).run_if_blank("order.email")]);

    capsule.run().expect("run");
    assert_eq!(calls.load(Ordering::SeqCst), 0);
}

#[test]
fn test_mock_overrides_stored_value() {
    let mut capsule = Capsule::new();
    capsule
        .set("clock", json!("real"))
        .mock("clock", json!("frozen"))
        .through([Step::new(|inv| Ok(inv.arg("clock").cloned().unwrap_or_default()))
            .param("clock")
            .setter("stamp")]);

    assert_eq!(capsule.then_return("stamp").expect("run"), Some(json!("frozen")));
}

#[test]
fn test_unhandled_failure_is_returned() {
    let after = Arc::new(AtomicU32::new(0));
    let mut capsule = Capsule::new();
    capsule.through([
        Step::new(|_| Err(CapsuleError::msg("boom"))),
        counted(&after, json!(1)),
    ]);

    let error = capsule.run().expect_err("failure propagates");
    assert_eq!(error.message(), "boom");
    assert_eq!(after.load(Ordering::SeqCst), 0);
}

#[test]
fn test_handled_failure_is_suppressed() {
    let seen = Arc::new(Mutex::new(Vec::<String>::new()));
    let sink = Arc::clone(&seen);
    let mut capsule = Capsule::new();
    capsule.through([
        Step::new(|_| Err(CapsuleError::step(TypeError("bad".to_string())))),
        Step::new(move |inv| {
            let message = inv.arg_as::<String>("message")?;
            if let Ok(mut seen) = sink.lock() {
                seen.push(message);
            }
            Ok(Value::Null)
        })
        .param("message")
        .catch(Catch::of::<TypeError>()),
    ]);

    capsule.run().expect("failure is handled");
    let seen = seen.lock().map(|s| s.clone()).unwrap_or_default();
    assert_eq!(seen, vec!["bad".to_string()]);
}

#[test]
fn test_failure_routed_to_every_matching_handler() {
    let first = Arc::new(AtomicU32::new(0));
    let second = Arc::new(AtomicU32::new(0));
    let other = Arc::new(AtomicU32::new(0));
    let mut capsule = Capsule::new();
    capsule.through([
        counted(&first, json!(1)).catch(Catch::of::<NetworkError>()),
        Step::new(|_| Err(CapsuleError::step(NetworkError("reset".to_string())))),
        counted(&second, json!(2)).catch(Catch::of::<TypeError>().or::<NetworkError>()),
        counted(&other, json!(3)).catch(Catch::of::<TypeError>()),
    ]);

    capsule.run().expect("handled");
    assert_eq!(first.load(Ordering::SeqCst), 1);
    assert_eq!(second.load(Ordering::SeqCst), 1);
    assert_eq!(other.load(Ordering::SeqCst), 0);
}

#[test]
fn test_mismatched_handler_leaves_failure_unhandled() {
    let mut capsule = Capsule::new();
    capsule.through([
        Step::new(|_| Err(CapsuleError::step(NetworkError("reset".to_string())))),
        Step::constant(json!(1)).catch(Catch::of::<TypeError>()),
    ]);

    let error = capsule.run().expect_err("not claimed");
    assert!(error.downcast_ref::<NetworkError>().is_some());
}

#[test]
fn test_unresolved_parameter_can_be_caught() {
    let mut capsule = Capsule::new();
    capsule.through([
        Step::constant(json!(1)).param("missing"),
        Step::new(|inv| {
            let message = inv.arg_as::<String>("message")?;
            inv.set("error", message);
            Ok(Value::Null)
        })
        .param("message")
        .catch(Catch::when(|e| {
            matches!(e, CapsuleError::UnresolvedParameter { .. })
        })),
    ]);

    capsule.run().expect("handled");
    assert_eq!(
        capsule.get("error"),
        Some(Item::Value(json!("Unable to resolve parameter 'missing'")))
    );
}

#[test]
fn test_steps_added_after_run_execute_on_next_run() {
    let later = Arc::new(AtomicU32::new(0));
    let mut capsule = Capsule::new();
    capsule.through([Step::constant(json!(1)).setter("a")]);
    capsule.run().expect("first run");

    capsule.then(counted(&later, json!(2)).setter("b"));
    assert_eq!(capsule.then_return("b").expect("second run"), Some(json!(2)));
    assert_eq!(later.load(Ordering::SeqCst), 1);
}

#[test]
fn test_nested_capsule_runs_inside_step() {
    let mut outer = Capsule::new();
    outer.set("base", json!(10)).through([Step::new(|inv| {
        let base = inv.arg_as::<i64>("base")?;
        let mut inner = Capsule::new();
        inner
            .set("base", json!(base))
            .through([Step::new(|inv| Ok(json!(inv.arg_as::<i64>("base")? + 1)))
                .param("base")
                .setter("next")]);
        let next = inner.then_return("next")?.unwrap_or_default();
        inv.set("nested", next);
        Ok(Value::Null)
    })
    .param("base")]);

    assert_eq!(outer.then_return("nested").expect("run"), Some(json!(11)));
}

#[test]
fn test_child_capsule_resolves_from_parent() {
    let mut parent = Capsule::new();
    parent.set("currency", "EUR");
    let parent = parent.into_shared();

    let mut child = Capsule::child_of(&parent);
    child.through([Step::new(|inv| {
        let currency = inv.arg_as::<String>("currency")?;
        Ok(json!(format!("{} 10", currency)))
    })
    .param("currency")
    .setter("price")]);

    assert_eq!(child.then_return("price").expect("run"), Some(json!("EUR 10")));
}

#[test]
fn test_mocks_fill_missing_inputs() {
    let mut capsule = Capsule::new();
    capsule
        .mock("clock", json!("2024-01-01T00:00:00Z"))
        .through([Step::new(|inv| Ok(inv.arg("clock").cloned().unwrap_or_default()))
            .param("clock")
            .setter("stamp")]);

    assert_eq!(
        capsule.then_return("stamp").expect("run"),
        Some(json!("2024-01-01T00:00:00Z"))
    );
}

#[test]
fn test_capsule_and_step_are_send() {
    fn assert_send<T: Send>() {}
    assert_send::<Capsule>();
    assert_send::<Step>();
}
