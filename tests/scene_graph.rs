//! Scene graph properties over randomly built hierarchies

use glam::{Mat4, Vec3};
use render_engine::scene::{NodeId, SceneGraph, Transform};
use render_engine::RenderError;

/// Small deterministic generator so failures reproduce
struct XorShift(u64);

impl XorShift {
    fn next_u64(&mut self) -> u64 {
        let mut x = self.0;
        x ^= x << 13;
        x ^= x >> 7;
        x ^= x << 17;
        self.0 = x;
        x
    }

    fn below(&mut self, n: usize) -> usize {
        (self.next_u64() % n as u64) as usize
    }

    fn unit(&mut self) -> f32 {
        (self.next_u64() >> 40) as f32 / (1u64 << 24) as f32
    }

    fn vec3(&mut self, scale: f32) -> Vec3 {
        Vec3::new(
            (self.unit() * 2.0 - 1.0) * scale,
            (self.unit() * 2.0 - 1.0) * scale,
            (self.unit() * 2.0 - 1.0) * scale,
        )
    }
}

fn random_transform(rng: &mut XorShift) -> Transform {
    let scale = Vec3::splat(0.5 + rng.unit());
    Transform::from_components(rng.vec3(5.0), rng.vec3(std::f32::consts::PI), scale)
}

/// A chain of `depth` nodes plus `extra` nodes hung under random parents
fn random_tree(rng: &mut XorShift, depth: usize, extra: usize) -> (SceneGraph, Vec<NodeId>) {
    let mut graph = SceneGraph::new();
    let mut ids = Vec::new();
    for i in 0..depth {
        let id = graph.add_node(&format!("chain{}", i), random_transform(rng));
        if let Some(&parent) = ids.last() {
            graph.set_parent(id, Some(parent)).unwrap();
        }
        ids.push(id);
    }
    for i in 0..extra {
        let id = graph.add_node(&format!("extra{}", i), random_transform(rng));
        let parent = ids[rng.below(ids.len())];
        graph.set_parent(id, Some(parent)).unwrap();
        ids.push(id);
    }
    (graph, ids)
}

/// Product of the transform matrices from the root down to `id`
fn path_product(graph: &SceneGraph, id: NodeId) -> Mat4 {
    let mut product = graph.node(id).unwrap().transform.matrix();
    let mut current = id;
    while let Some(parent) = graph.parent(current).unwrap() {
        product = graph.node(parent).unwrap().transform.matrix() * product;
        current = parent;
    }
    product
}

fn depth_of(graph: &SceneGraph, mut id: NodeId) -> usize {
    let mut depth = 0;
    while let Some(parent) = graph.parent(id).unwrap() {
        depth += 1;
        id = parent;
    }
    depth
}

#[test]
fn test_world_matrix_is_parent_world_times_local() {
    for seed in 1..=8u64 {
        let mut rng = XorShift(0x9E37_79B9_7F4A_7C15 ^ seed);
        let (mut graph, ids) = random_tree(&mut rng, 6, 40);
        assert!(ids.iter().map(|&id| depth_of(&graph, id)).max().unwrap() >= 5);

        graph.update_world_matrices();
        for &id in &ids {
            let node = graph.node(id).unwrap();
            let expected = match node.parent() {
                Some(parent) => graph.world_matrix(parent).unwrap() * node.local_matrix(),
                None => node.local_matrix(),
            };
            assert!(
                node.world_matrix().abs_diff_eq(expected, 1e-3),
                "seed {} node {:?}",
                seed,
                id
            );
            assert!(
                node.world_matrix().abs_diff_eq(path_product(&graph, id), 1e-3),
                "seed {} node {:?} differs from its root path product",
                seed,
                id
            );
        }
    }
}

#[test]
fn test_pre_order_visits_parents_first() {
    let mut rng = XorShift(42);
    let (graph, ids) = random_tree(&mut rng, 5, 30);

    let mut order = Vec::new();
    for &root in graph.roots() {
        graph.traverse_pre_order(root, |id, _| order.push(id)).unwrap();
    }
    assert_eq!(order.len(), ids.len());
    for (position, &id) in order.iter().enumerate() {
        if let Some(parent) = graph.parent(id).unwrap() {
            let parent_position = order.iter().position(|&p| p == parent).unwrap();
            assert!(parent_position < position);
        }
    }
}

#[test]
fn test_root_child_world_position() {
    let mut graph = SceneGraph::new();
    let root = graph.add_node("root", Transform::from_position(Vec3::new(1.0, 0.0, 0.0)));
    let child = graph.add_node("child", Transform::from_position(Vec3::new(0.0, 2.0, 0.0)));
    graph.set_parent(child, Some(root)).unwrap();
    graph.update_world_matrices();

    assert_eq!(graph.world_position(child).unwrap(), Vec3::new(1.0, 2.0, 0.0));
    assert_eq!(
        graph.world_matrix(child).unwrap(),
        Mat4::from_translation(Vec3::new(1.0, 2.0, 0.0))
    );
}

#[test]
fn test_cycle_rejection_leaves_graph_unchanged() {
    let mut rng = XorShift(7);
    let (mut graph, ids) = random_tree(&mut rng, 5, 20);
    let snapshot: Vec<(Option<NodeId>, Vec<NodeId>)> = ids
        .iter()
        .map(|&id| (graph.parent(id).unwrap(), graph.children(id).unwrap().to_vec()))
        .collect();
    let roots = graph.roots().to_vec();

    // Every node tries to adopt its own ancestor
    for &id in &ids {
        let mut ancestor = graph.parent(id).unwrap();
        while let Some(a) = ancestor {
            assert!(matches!(
                graph.set_parent(a, Some(id)),
                Err(RenderError::SceneGraphCycle { .. })
            ));
            ancestor = graph.parent(a).unwrap();
        }
    }

    for (&id, (parent, children)) in ids.iter().zip(&snapshot) {
        assert_eq!(graph.parent(id).unwrap(), *parent);
        assert_eq!(graph.children(id).unwrap(), children.as_slice());
    }
    assert_eq!(graph.roots(), roots.as_slice());
}

#[test]
fn test_remove_subtree_releases_every_descendant() {
    let mut rng = XorShift(1234);
    let (mut graph, ids) = random_tree(&mut rng, 5, 25);
    let target = ids[1];

    let mut subtree = Vec::new();
    graph.traverse_pre_order(target, |id, _| subtree.push(id)).unwrap();
    graph.remove(target).unwrap();

    assert_eq!(graph.len(), ids.len() - subtree.len());
    for id in subtree {
        assert!(!graph.contains(id));
    }
    assert!(graph.children(ids[0]).unwrap().iter().all(|&c| c != target));
}
