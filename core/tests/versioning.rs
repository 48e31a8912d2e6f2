use std::collections::HashSet;
use std::sync::{Arc, Barrier};
use std::thread;

use serde_json::json;
use tv_core::storage::GraphStorage;
use tv_core::{
    Conflict, EngineConfig, Error, GraphStore, MemoryStorage, Node, NotFound, Tree, VersionManager,
};

/// Обертка над тестовым окружением
struct TestEnv {
    storage: Arc<dyn GraphStorage>,
    graph: GraphStore,
    versions: VersionManager,
}

impl TestEnv {
    fn new() -> Self {
        let storage: Arc<dyn GraphStorage> = Arc::new(MemoryStorage::new());
        Self {
            graph: GraphStore::new(storage.clone()),
            versions: VersionManager::new(storage.clone(), EngineConfig::default()),
            storage,
        }
    }

    fn tree(&self, name: &str) -> Tree {
        self.graph.create_tree(name).unwrap()
    }

    /// Пять нод и рёбра 1->2, 2->3, 2->4, 4->5 в живом графе.
    fn release_graph(&self, tree: &Tree) -> Vec<Node> {
        let nodes: Vec<Node> = (1..=5)
            .map(|i| self.graph.create_node(tree.id, json!({ "value": i })).unwrap())
            .collect();
        for (from, to) in [(0, 1), (1, 2), (1, 3), (3, 4)] {
            self.graph
                .create_edge(tree.id, nodes[from].id, nodes[to].id, json!({"relation": "child"}))
                .unwrap();
        }
        nodes
    }
}

#[test]
fn snapshot_is_isolated_from_later_live_mutation() {
    let env = TestEnv::new();
    let tree = env.tree("Configuration Tree");
    let node = env.graph.create_node(tree.id, json!({"flag": false})).unwrap();
    let other = env.graph.create_node(tree.id, json!({"name": "other"})).unwrap();
    let edge = env.graph.create_edge(tree.id, node.id, other.id, json!({"weight": 0.5})).unwrap();

    let tag = env.versions.create_tag_for_live_state(tree.id, "initial", None).unwrap();

    env.graph.set_node_data(node.id, json!({"flag": true})).unwrap();
    env.graph.set_edge_data(edge.id, json!({"weight": 1.0})).unwrap();
    env.graph.create_node(tree.id, json!({"late": true})).unwrap();

    let frozen = env.versions.open(tag.version_id).unwrap();
    assert_eq!(frozen.node(node.id).unwrap().data, json!({"flag": false}));
    assert_eq!(frozen.edge(edge.id).unwrap().entry.data, json!({"weight": 0.5}));
    assert_eq!(frozen.nodes().len(), 2);

    assert_eq!(env.graph.node(node.id).unwrap().data, json!({"flag": true}));
}

#[test]
fn branch_copies_identities_and_values() {
    let env = TestEnv::new();
    let tree = env.tree("Main Tree");
    env.release_graph(&tree);
    let tag = env.versions.create_tag_for_live_state(tree.id, "main-v2.0", None).unwrap();

    let branch = env.versions.branch_from_tag(tree.id, "main-v2.0").unwrap();
    assert_eq!(branch.parent_version_id, Some(tag.version_id));

    let base = env.versions.open(tag.version_id).unwrap();
    let copy = env.versions.open(branch.id).unwrap();

    let key = |nodes: &[tv_core::NodeVersion]| {
        nodes.iter().map(|nv| (nv.node_id, nv.data.clone())).collect::<Vec<_>>()
    };
    assert_eq!(key(base.nodes()), key(copy.nodes()));

    let edge_key = |edges: &[tv_core::FrozenEdge]| {
        edges.iter().map(|e| (e.edge_id(), e.entry.data.clone())).collect::<Vec<_>>()
    };
    assert_eq!(edge_key(base.edges()), edge_key(copy.edges()));

    // записи ветки новые, идентичность нод та же
    let base_ids: HashSet<_> = base.nodes().iter().map(|nv| nv.id).collect();
    assert!(copy.nodes().iter().all(|nv| !base_ids.contains(&nv.id)));
}

#[test]
fn branch_extension_does_not_touch_base() {
    let env = TestEnv::new();
    let tree = env.tree("Main Tree");
    let main = env.graph.create_node(tree.id, json!({"main": true})).unwrap();
    let version = env.versions.create_version(tree.id, None).unwrap();
    env.versions.add_existing_node(version.id, main.id, main.data.clone()).unwrap();
    env.versions
        .create_tag_for_version(tree.id, "main-v2.0", Some("Main version 2.0".into()), version.id)
        .unwrap();

    let feature = env.versions.branch_from_tag(tree.id, "main-v2.0").unwrap();
    let flag = env.versions.add_node(feature.id, json!({"feature_flag": true})).unwrap();
    let config = env.versions.add_node(feature.id, json!({"config": "new_setting"})).unwrap();
    let edge = env.versions
        .add_edge(feature.id, flag.node_id, config.node_id, json!({"relation": "depends_on"}))
        .unwrap();
    assert_eq!(edge.data, json!({"relation": "depends_on"}));

    let tag = env
        .versions
        .create_tag_for_version(tree.id, "feature-x-v1", None, feature.id)
        .unwrap();
    assert_eq!(tag.name, "feature-x-v1");

    let base = env.versions.open(version.id).unwrap();
    assert_eq!(base.nodes().len(), 1);
    assert!(base.edges().is_empty());

    let branch = env.versions.open(feature.id).unwrap();
    assert_eq!(branch.nodes().len(), 3);
    assert_eq!(branch.child_nodes(flag.node_id)[0].node_id, config.node_id);
}

#[test]
fn duplicate_tag_name_fails_and_persists_nothing() {
    let env = TestEnv::new();
    let tree = env.tree("t");
    env.graph.create_node(tree.id, json!({})).unwrap();
    env.versions.create_tag_for_live_state(tree.id, "stable-v1", None).unwrap();

    let before = env.versions.versions(tree.id).unwrap().len();
    let err = env.versions.create_tag_for_live_state(tree.id, "stable-v1", None).unwrap_err();
    assert!(matches!(err, Error::Conflict(Conflict::TagAlreadyExists(ref n)) if n == "stable-v1"));
    assert_eq!(env.versions.versions(tree.id).unwrap().len(), before);

    // другое дерево, то же имя: пространство имён глобальное
    let other = env.tree("o");
    let err = env.versions.create_tag_for_live_state(other.id, "stable-v1", None).unwrap_err();
    assert!(err.is_conflict());
    assert!(env.versions.versions(other.id).unwrap().is_empty());
}

#[test]
fn fetched_release_supports_all_queries() {
    let env = TestEnv::new();
    let tree = env.tree("Historical Tree");
    let nodes = env.release_graph(&tree);
    let id = |i: usize| nodes[i - 1].id;

    env.versions
        .create_tag_for_live_state(tree.id, "release-v1.0", Some("Release version 1.0".into()))
        .unwrap();

    let version = env.versions.fetch_by_tag("release-v1.0").unwrap();
    assert_eq!(env.versions.tag_of(version.id).unwrap().unwrap().name, "release-v1.0");

    let engine = env.versions.open(version.id).unwrap();
    fn node_ids(list: Vec<&tv_core::NodeVersion>) -> Vec<tv_core::NodeId> {
        list.iter().map(|nv| nv.node_id).collect()
    }

    assert_eq!(node_ids(engine.root_nodes()), vec![id(1)]);
    assert_eq!(node_ids(engine.child_nodes(id(1))), vec![id(2)]);
    assert_eq!(node_ids(engine.parent_nodes(id(3))), vec![id(2)]);
    assert_eq!(engine.node_edges(id(2)).len(), 3);

    let level_2: HashSet<_> = node_ids(engine.nodes_at_depth(2)).into_iter().collect();
    assert_eq!(level_2, HashSet::from([id(3), id(4)]));

    let path = engine.find_path(id(1), id(5)).unwrap().unwrap();
    let actual: Vec<_> = path.iter().map(|s| s.node_id).collect();
    assert_eq!(actual, vec![id(1), id(2), id(4), id(5)]);

    let mut visited = HashSet::new();
    let mut order = Vec::new();
    for root in engine.root_nodes() {
        engine.traverse(root.node_id, &mut visited, |nv, _| order.push(nv.node_id)).unwrap();
    }
    assert_eq!(order.len(), 5);
}

#[test]
fn restore_is_read_only_and_hides_later_nodes() {
    let env = TestEnv::new();
    let tree = env.tree("Stable Tree");
    let stable = env.graph.create_node(tree.id, json!({"stable": true})).unwrap();
    let version = env.versions.create_version(tree.id, None).unwrap();
    env.versions.add_existing_node(version.id, stable.id, stable.data.clone()).unwrap();
    env.versions.create_tag_for_version(tree.id, "stable-v1", None, version.id).unwrap();

    let modified = env.versions.branch_from_tag(tree.id, "stable-v1").unwrap();
    let experimental = env.versions.add_node(modified.id, json!({"experimental": true})).unwrap();
    env.versions
        .add_edge(modified.id, stable.id, experimental.node_id, json!({"type": "experimental"}))
        .unwrap();

    let live_before = env.graph.live_graph(tree.id).unwrap();
    let rollback = env.versions.restore_from_tag(tree.id, "stable-v1").unwrap();
    assert_eq!(rollback.id, version.id);
    assert_eq!(env.graph.live_graph(tree.id).unwrap(), live_before);

    let engine = env.versions.open(rollback.id).unwrap();
    let err = engine.node(experimental.node_id).unwrap_err();
    assert!(matches!(err, Error::NotFound(NotFound::Node(n)) if n == experimental.node_id));
    assert!(engine.node(stable.id).is_ok());
}

#[test]
fn branch_and_tag_is_atomic() {
    let env = TestEnv::new();
    let tree = env.tree("t");
    env.graph.create_node(tree.id, json!(1)).unwrap();
    env.versions.create_tag_for_live_state(tree.id, "base", None).unwrap();
    env.versions.create_tag_for_live_state(tree.id, "taken", None).unwrap();

    let err = env.versions.branch_and_tag(tree.id, "base", "taken", None).unwrap_err();
    assert!(err.is_conflict());
    assert_eq!(env.versions.versions(tree.id).unwrap().len(), 2);

    let (branch, tag) = env.versions.branch_and_tag(tree.id, "base", "next", None).unwrap();
    assert_eq!(tag.version_id, branch.id);
    assert_eq!(env.versions.open(branch.id).unwrap().nodes().len(), 1);
}

#[test]
fn concurrent_tag_creation_has_exactly_one_winner() {
    let env = Arc::new(TestEnv::new());
    let tree = env.tree("race");
    for i in 0..20 {
        env.graph.create_node(tree.id, json!({ "i": i })).unwrap();
    }

    let workers = 8;
    let barrier = Arc::new(Barrier::new(workers));
    let handles: Vec<_> = (0..workers)
        .map(|_| {
            let env = env.clone();
            let barrier = barrier.clone();
            thread::spawn(move || {
                barrier.wait();
                env.versions.create_tag_for_live_state(tree.id, "release", None)
            })
        })
        .collect();

    let results: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();
    let winners = results.iter().filter(|r| r.is_ok()).count();
    assert_eq!(winners, 1);
    for result in results.iter().filter(|r| r.is_err()) {
        assert!(matches!(
            result,
            Err(Error::Conflict(Conflict::TagAlreadyExists(name))) if name == "release"
        ));
    }

    let versions = env.versions.versions(tree.id).unwrap();
    assert_eq!(versions.len(), 1);
    assert_eq!(env.storage.frozen_version(versions[0].id).unwrap().nodes.len(), 20);
}
