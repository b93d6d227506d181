//! End-to-end traces through a real graph.

use std::sync::Arc;

use updraft::{
    node_downcast, BuildEnv, BuildResult, Node, NodeKey, NullReporter, UpdatingGraph,
};
use updraft_inspector::{EvaluationKind, EventCollector, GraphEvent, InvalidationKind};

fn val(s: &str) -> BuildResult {
    Ok(Some(Arc::new(s.to_string()) as Arc<dyn Node>))
}

fn chain(collector: Arc<EventCollector>) -> (UpdatingGraph, NodeKey, NodeKey) {
    let a = NodeKey::new("a", ());
    let b = NodeKey::new("b", ());
    let graph = UpdatingGraph::builder()
        .observer_arc(collector)
        .register("a", {
            let b = b.clone();
            move |_: &NodeKey, env: &mut BuildEnv| -> BuildResult {
                match env.get_value(&b) {
                    Some(value) => {
                        let upstream = node_downcast::<String>(&value).unwrap();
                        val(&format!("{upstream}a"))
                    }
                    None => Ok(None),
                }
            }
        })
        .register("b", |_: &NodeKey, _: &mut BuildEnv| -> BuildResult { val("b") })
        .build();
    (graph, a, b)
}

#[test]
fn test_first_build_trace() {
    let collector = Arc::new(EventCollector::new());
    let (graph, a, _b) = chain(collector.clone());

    // Single worker keeps the interleaving deterministic.
    graph.update(&[a], true, 1, &NullReporter).unwrap();

    assert_eq!(
        collector.events(),
        vec![
            GraphEvent::Enqueueing {
                node: "a(())".to_string()
            },
            GraphEvent::Enqueueing {
                node: "b(())".to_string()
            },
            GraphEvent::Evaluated {
                node: "b(())".to_string(),
                state: EvaluationKind::Built
            },
            GraphEvent::Enqueueing {
                node: "a(())".to_string()
            },
            GraphEvent::Evaluated {
                node: "a(())".to_string(),
                state: EvaluationKind::Built
            },
        ]
    );
}

#[test]
fn test_invalidation_trace() {
    let collector = Arc::new(EventCollector::new());
    let (graph, a, b) = chain(collector.clone());
    graph.update(&[a.clone()], true, 1, &NullReporter).unwrap();
    collector.clear();

    graph.invalidate([b]);
    graph.update(&[a], true, 1, &NullReporter).unwrap();

    // Both nodes are dirtied; b rebuilds to an equal value and a is merely
    // revalidated.
    assert_eq!(
        collector.invalidations_of("b(())"),
        vec![InvalidationKind::Dirty]
    );
    assert_eq!(
        collector.invalidations_of("a(())"),
        vec![InvalidationKind::Dirty]
    );
    assert_eq!(
        collector.evaluations_of("b(())"),
        vec![EvaluationKind::Built]
    );
    assert_eq!(
        collector.evaluations_of("a(())"),
        vec![EvaluationKind::Clean]
    );
}

#[test]
fn test_events_serialize() {
    let event = GraphEvent::Evaluated {
        node: "a(())".to_string(),
        state: EvaluationKind::Built,
    };
    let json = serde_json::to_string(&event).unwrap();
    let back: GraphEvent = serde_json::from_str(&json).unwrap();
    assert_eq!(back, event);
}
