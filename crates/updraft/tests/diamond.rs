//! Diamond revalidation: top depends on left and right, both depend on one
//! leaf. An unchanged leaf rebuild leaves the rest revalidated, not rebuilt.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use updraft::{
    node_downcast, BuildEnv, BuildResult, Node, NodeKey, NullReporter, UpdatingGraph,
};
use updraft_inspector::{EvaluationKind, EventCollector};

fn val(s: String) -> BuildResult {
    Ok(Some(Arc::new(s) as Arc<dyn Node>))
}

struct Diamond {
    graph: UpdatingGraph,
    collector: Arc<EventCollector>,
    top: NodeKey,
    leaf: NodeKey,
    top_runs: Arc<AtomicUsize>,
    side_runs: Arc<AtomicUsize>,
    leaf_runs: Arc<AtomicUsize>,
    leaf_output: Arc<Mutex<String>>,
}

fn diamond() -> Diamond {
    let top = NodeKey::new("top", ());
    let left = NodeKey::new("side", "left".to_string());
    let right = NodeKey::new("side", "right".to_string());
    let leaf = NodeKey::new("leaf", ());
    let top_runs = Arc::new(AtomicUsize::new(0));
    let side_runs = Arc::new(AtomicUsize::new(0));
    let leaf_runs = Arc::new(AtomicUsize::new(0));
    let leaf_output = Arc::new(Mutex::new("d".to_string()));
    let collector = Arc::new(EventCollector::new());

    let graph = UpdatingGraph::builder()
        .observer_arc(collector.clone())
        .register("top", {
            let sides = [left.clone(), right.clone()];
            let runs = top_runs.clone();
            move |_: &NodeKey, env: &mut BuildEnv| -> BuildResult {
                runs.fetch_add(1, Ordering::SeqCst);
                // One dep-group covering both sides.
                let values = env.get_values(&sides);
                if env.values_missing() {
                    return Ok(None);
                }
                let combined: String = values
                    .into_iter()
                    .map(|v| node_downcast::<String>(&v.unwrap()).unwrap().clone())
                    .collect();
                val(combined)
            }
        })
        .register("side", {
            let leaf = leaf.clone();
            let runs = side_runs.clone();
            move |key: &NodeKey, env: &mut BuildEnv| -> BuildResult {
                runs.fetch_add(1, Ordering::SeqCst);
                match env.get_value(&leaf) {
                    Some(value) => {
                        let side = key.arg::<String>().unwrap();
                        let leaf_value = node_downcast::<String>(&value).unwrap();
                        val(format!("{side}:{leaf_value} "))
                    }
                    None => Ok(None),
                }
            }
        })
        .register("leaf", {
            let runs = leaf_runs.clone();
            let output = leaf_output.clone();
            move |_: &NodeKey, _: &mut BuildEnv| -> BuildResult {
                runs.fetch_add(1, Ordering::SeqCst);
                let output = output.lock().unwrap().clone();
                val(output)
            }
        })
        .build();

    Diamond {
        graph,
        collector,
        top,
        leaf,
        top_runs,
        side_runs,
        leaf_runs,
        leaf_output,
    }
}

#[test]
fn test_diamond_builds() {
    let diamond = diamond();
    let result = diamond
        .graph
        .update(&[diamond.top.clone()], true, 4, &NullReporter)
        .unwrap();

    assert_eq!(
        result.value_of::<String>(&diamond.top).unwrap(),
        "left:d right:d "
    );
    // The leaf is shared, not rebuilt once per side.
    assert_eq!(diamond.leaf_runs.load(Ordering::SeqCst), 1);
}

#[test]
fn test_unchanged_leaf_revalidates_rest() {
    let diamond = diamond();
    diamond
        .graph
        .update(&[diamond.top.clone()], true, 4, &NullReporter)
        .unwrap();
    let top_before = diamond.top_runs.load(Ordering::SeqCst);
    let side_before = diamond.side_runs.load(Ordering::SeqCst);
    let leaf_before = diamond.leaf_runs.load(Ordering::SeqCst);

    diamond.graph.invalidate([diamond.leaf.clone()]);
    let result = diamond
        .graph
        .update(&[diamond.top.clone()], true, 4, &NullReporter)
        .unwrap();

    assert_eq!(
        result.value_of::<String>(&diamond.top).unwrap(),
        "left:d right:d "
    );
    assert_eq!(diamond.leaf_runs.load(Ordering::SeqCst), leaf_before + 1);
    assert_eq!(diamond.side_runs.load(Ordering::SeqCst), side_before);
    assert_eq!(diamond.top_runs.load(Ordering::SeqCst), top_before);
    assert_eq!(
        diamond.collector.evaluations_of("top(())").last(),
        Some(&EvaluationKind::Clean)
    );
    assert_eq!(
        diamond.collector.evaluations_of("leaf(())").last(),
        Some(&EvaluationKind::Built)
    );
}

#[test]
fn test_changed_leaf_rebuilds_all() {
    let diamond = diamond();
    diamond
        .graph
        .update(&[diamond.top.clone()], true, 4, &NullReporter)
        .unwrap();
    let top_before = diamond.top_runs.load(Ordering::SeqCst);
    let side_before = diamond.side_runs.load(Ordering::SeqCst);

    *diamond.leaf_output.lock().unwrap() = "e".to_string();
    diamond.graph.invalidate([diamond.leaf.clone()]);
    let result = diamond
        .graph
        .update(&[diamond.top.clone()], true, 4, &NullReporter)
        .unwrap();

    assert_eq!(
        result.value_of::<String>(&diamond.top).unwrap(),
        "left:e right:e "
    );
    assert_eq!(diamond.top_runs.load(Ordering::SeqCst), top_before + 1);
    assert_eq!(diamond.side_runs.load(Ordering::SeqCst), side_before + 2);
}
