//! Error propagation under keep-going and fail-fast.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, OnceLock};

use updraft::{
    node_downcast, BuildEnv, BuildError, BuildResult, InterruptHandle, Node, NodeKey,
    NullReporter, UpdateError, UpdatingGraph,
};

fn val(s: &str) -> BuildResult {
    Ok(Some(Arc::new(s.to_string()) as Arc<dyn Node>))
}

/// Combine b and c, substituting `placeholder` for an absent b when given.
fn combine(
    env: &mut BuildEnv,
    b: &NodeKey,
    c: &NodeKey,
    placeholder: Option<&str>,
) -> BuildResult {
    let values = env.get_values(&[b.clone(), c.clone()]);
    let b_value = values[0]
        .as_ref()
        .map(|v| node_downcast::<String>(v).unwrap().clone());
    let c_value = values[1]
        .as_ref()
        .map(|v| node_downcast::<String>(v).unwrap().clone());
    let Some(c_value) = c_value else {
        return Ok(None);
    };
    match (b_value, placeholder) {
        (Some(b_value), _) => val(&format!("{b_value}{c_value}")),
        (None, Some(placeholder)) => val(&format!("{placeholder}{c_value}")),
        (None, None) => Ok(None),
    }
}

struct ErrorGraph {
    graph: UpdatingGraph,
    tolerant: NodeKey,
    brittle: NodeKey,
    b: NodeKey,
    b_fails: Arc<AtomicBool>,
    b_runs: Arc<AtomicUsize>,
}

/// Both roots depend on b (which fails on demand) and c (which succeeds).
/// The tolerant root substitutes a placeholder for an absent b; the brittle
/// one gives up.
fn error_graph() -> ErrorGraph {
    let tolerant = NodeKey::new("tolerant", ());
    let brittle = NodeKey::new("brittle", ());
    let b = NodeKey::new("b", ());
    let c = NodeKey::new("c", ());
    let b_fails = Arc::new(AtomicBool::new(true));
    let b_runs = Arc::new(AtomicUsize::new(0));

    let graph = UpdatingGraph::builder()
        .register("tolerant", {
            let b = b.clone();
            let c = c.clone();
            move |_: &NodeKey, env: &mut BuildEnv| -> BuildResult {
                combine(env, &b, &c, Some("?"))
            }
        })
        .register("brittle", {
            let b = b.clone();
            let c = c.clone();
            move |_: &NodeKey, env: &mut BuildEnv| -> BuildResult { combine(env, &b, &c, None) }
        })
        .register("b", {
            let fails = b_fails.clone();
            let runs = b_runs.clone();
            move |_: &NodeKey, _: &mut BuildEnv| -> BuildResult {
                runs.fetch_add(1, Ordering::SeqCst);
                if fails.load(Ordering::SeqCst) {
                    Err(BuildError::msg("boom"))
                } else {
                    val("b")
                }
            }
        })
        .register("c", |_: &NodeKey, _: &mut BuildEnv| -> BuildResult { val("c") })
        .build();

    ErrorGraph {
        graph,
        tolerant,
        brittle,
        b,
        b_fails,
        b_runs,
    }
}

#[test]
fn test_keep_going_tolerant_parent_succeeds() {
    let fixture = error_graph();
    let result = fixture
        .graph
        .update(&[fixture.tolerant.clone()], true, 4, &NullReporter)
        .unwrap();

    assert_eq!(result.value_of::<String>(&fixture.tolerant).unwrap(), "?c");
    // The failure is still recorded against b itself.
    let b_error = fixture.graph.existing_error(&fixture.b).unwrap();
    assert_eq!(b_error.exception().unwrap().to_string(), "boom");
}

#[test]
fn test_keep_going_brittle_parent_errors_transitively() {
    let fixture = error_graph();
    let result = fixture
        .graph
        .update(&[fixture.brittle.clone()], true, 4, &NullReporter)
        .unwrap();

    assert!(result.has_error());
    let info = result.error(&fixture.brittle).expect("brittle errored");
    assert_eq!(info.root_causes(), &[fixture.b.clone()]);
    assert_eq!(info.exception().unwrap().to_string(), "boom");
}

#[test]
fn test_keep_going_resolves_every_root() {
    let fixture = error_graph();
    let roots = [fixture.tolerant.clone(), fixture.brittle.clone()];
    let result = fixture
        .graph
        .update(&roots, true, 4, &NullReporter)
        .unwrap();

    for root in &roots {
        assert!(result.get(root).is_some(), "{root} left unresolved");
    }
}

#[test]
fn test_fail_fast_aborts_pass() {
    let fixture = error_graph();
    let result = fixture
        .graph
        .update(&[fixture.brittle.clone()], false, 4, &NullReporter)
        .unwrap();

    assert!(result.has_error());
    assert!(
        result.errors().iter().any(|(key, _)| key == &fixture.b),
        "the failed node is surfaced"
    );
    // The root never completed.
    assert!(result.get(&fixture.brittle).is_none());
}

#[test]
fn test_invalidate_errors_recovers() {
    let fixture = error_graph();
    fixture
        .graph
        .update(&[fixture.brittle.clone()], true, 4, &NullReporter)
        .unwrap();
    let runs_before = fixture.b_runs.load(Ordering::SeqCst);

    fixture.b_fails.store(false, Ordering::SeqCst);
    fixture.graph.invalidate_errors();
    let result = fixture
        .graph
        .update(&[fixture.brittle.clone()], true, 4, &NullReporter)
        .unwrap();

    assert_eq!(result.value_of::<String>(&fixture.brittle).unwrap(), "bc");
    assert_eq!(fixture.b_runs.load(Ordering::SeqCst), runs_before + 1);
    assert!(fixture.graph.existing_error(&fixture.b).is_none());
}

#[test]
fn test_error_transparent_lookup_recovery() {
    let failing = NodeKey::new("failing", ());
    let rescuer = NodeKey::new("rescuer", ());
    let graph = UpdatingGraph::builder()
        .register("failing", |_: &NodeKey, _: &mut BuildEnv| -> BuildResult {
            Err(BuildError::msg("missing input"))
        })
        .register("rescuer", {
            let failing = failing.clone();
            move |_: &NodeKey, env: &mut BuildEnv| -> BuildResult {
                match env.get_value_or_err(&failing) {
                    Ok(Some(value)) => {
                        let s = node_downcast::<String>(&value).unwrap();
                        val(s)
                    }
                    Ok(None) => Ok(None),
                    Err(err) => val(&format!("recovered from: {err}")),
                }
            }
        })
        .build();

    let result = graph
        .update(&[rescuer.clone()], true, 4, &NullReporter)
        .unwrap();

    // Catching the dep's error keeps this node healthy.
    assert_eq!(
        result.value_of::<String>(&rescuer).unwrap(),
        "recovered from: missing input"
    );
    assert!(graph.existing_error(&rescuer).is_none());
}

#[test]
fn test_unregistered_node_type_is_an_error() {
    let ghost = NodeKey::new("ghost", ());
    let graph = UpdatingGraph::builder().build();
    let result = graph.update(&[ghost.clone()], true, 2, &NullReporter).unwrap();

    let info = result.error(&ghost).expect("unknown type errors");
    assert!(info.exception().unwrap().to_string().contains("ghost"));
}

#[test]
fn test_interrupt_surfaces_and_commits_in_flight() {
    let trigger = NodeKey::new("trigger", ());
    let handle_slot: Arc<OnceLock<InterruptHandle>> = Arc::new(OnceLock::new());
    let graph = UpdatingGraph::builder()
        .register("trigger", {
            let handle_slot = handle_slot.clone();
            move |_: &NodeKey, _: &mut BuildEnv| -> BuildResult {
                handle_slot.get().unwrap().interrupt();
                val("done")
            }
        })
        .build();
    let _ = handle_slot.set(graph.interrupt_handle());

    let err = graph
        .update(&[trigger.clone()], true, 2, &NullReporter)
        .unwrap_err();
    assert!(matches!(err, UpdateError::Interrupted));
    // The build completed before the interrupt was noticed, so it stays
    // committed.
    assert!(graph.existing_value(&trigger).is_some());

    // With the interrupt consumed, the next pass serves the cached value.
    let result = graph
        .update(&[trigger.clone()], true, 2, &NullReporter)
        .unwrap();
    assert_eq!(result.value_of::<String>(&trigger).unwrap(), "done");
}
