// tests/dag_properties.rs

use std::collections::{HashMap, HashSet};

use cloudbench::config::ConfigFile;
use cloudbench::dag::{Dag, DagError, DagNode, Edge, Graph};
use cloudbench::workflow::lifecycle::instantiate;
use cloudbench::workflow::{TaskStatus, TaskType};
use cloudbench_test_utils::builders::{ConfigFileBuilder, TaskConfigBuilder};
use proptest::prelude::*;

#[derive(Debug, Clone, PartialEq)]
struct Node(u32);

impl DagNode for Node {
    type Id = u32;

    fn node_id(&self) -> u32 {
        self.0
    }
}

// Acyclic by construction: an edge only ever points from a lower to a
// higher node index.
fn acyclic_graph_strategy(max_nodes: u32) -> impl Strategy<Value = Graph<Node, Edge<u32>>> {
    (1..=max_nodes).prop_flat_map(|n| {
        proptest::collection::vec((0..n, 0..n), 0..(n as usize * 2)).prop_map(move |pairs| {
            let edges: HashSet<(u32, u32)> = pairs
                .into_iter()
                .filter(|(a, b)| a != b)
                .map(|(a, b)| (a.min(b), a.max(b)))
                .collect();
            Graph::new(
                (0..n).map(Node).collect(),
                edges.into_iter().map(|(a, b)| Edge::new(a, b)).collect(),
            )
        })
    })
}

// Same idea for workflow configs: task N may only depend on tasks 0..N-1.
fn workflow_config_strategy(max_tasks: usize) -> impl Strategy<Value = ConfigFile> {
    (1..=max_tasks).prop_flat_map(|num_tasks| {
        proptest::collection::vec(
            proptest::collection::vec(any::<usize>(), 0..num_tasks),
            num_tasks,
        )
        .prop_map(move |raw_deps| {
            let mut builder = ConfigFileBuilder::new();
            for (i, potential_deps) in raw_deps.into_iter().enumerate() {
                let mut task = TaskConfigBuilder::new(TaskType::ALL[i % TaskType::ALL.len()]);
                let deps: HashSet<usize> = potential_deps
                    .into_iter()
                    .filter(|_| i > 0)
                    .map(|d| d % i)
                    .collect();
                for dep in deps {
                    task = task.after(&format!("task_{dep:02}"));
                }
                builder = builder.with_task(&format!("task_{i:02}"), task.build());
            }
            builder.build()
        })
    })
}

proptest! {
    #[test]
    fn layers_cover_every_node_once_and_respect_edges(graph in acyclic_graph_strategy(12)) {
        prop_assert!(!graph.has_cycle());

        let layers = graph.layers().unwrap();
        prop_assert!(layers.last().unwrap().is_empty());

        let mut depth = HashMap::new();
        for (i, layer) in layers.iter().enumerate() {
            for node in layer {
                prop_assert!(depth.insert(node.0, i).is_none(), "node {} layered twice", node.0);
            }
        }
        prop_assert_eq!(depth.len(), graph.nodes.len());

        for edge in &graph.edges {
            prop_assert!(depth[&edge.from] < depth[&edge.to]);
        }

        let roots: HashSet<u32> = graph.root_layer().unwrap().iter().map(|n| n.0).collect();
        let targets: HashSet<u32> = graph.edges.iter().map(|e| e.to).collect();
        for node in &graph.nodes {
            prop_assert_eq!(roots.contains(&node.0), !targets.contains(&node.0));
        }
    }

    #[test]
    fn reversing_any_edge_creates_a_cycle(graph in acyclic_graph_strategy(12), pick in any::<prop::sample::Index>()) {
        prop_assume!(!graph.edges.is_empty());

        let edge = pick.get(&graph.edges).clone();
        let mut edges = graph.edges.clone();
        edges.push(Edge::new(edge.to, edge.from));
        let cyclic = Graph::new(graph.nodes.clone(), edges);

        prop_assert!(cyclic.has_cycle());
        prop_assert_eq!(cyclic.layers().unwrap_err(), DagError::CycleDetected);
    }

    #[test]
    fn instantiated_workflows_start_exactly_their_roots(cfg in workflow_config_strategy(8)) {
        let spec = cfg.workflow_spec().unwrap();
        let workflow = instantiate(&spec).unwrap();

        let without_deps = cfg.workflow.task.values().filter(|t| t.after.is_empty()).count();
        let pending = workflow.tasks.iter().filter(|t| t.status == TaskStatus::Pending).count();
        let waiting = workflow.tasks.iter().filter(|t| t.status == TaskStatus::Waiting).count();

        prop_assert_eq!(pending, without_deps);
        prop_assert_eq!(pending + waiting, workflow.tasks.len());
        prop_assert!(workflow.layers().is_ok());
    }
}
