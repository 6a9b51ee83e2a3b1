//! Transform hierarchy
//!
//! Nodes live in an arena and refer to each other by [`NodeId`]. A removed
//! node's slot is reused with a bumped generation, so ids held across a
//! removal stop resolving instead of aliasing the new occupant.

use std::cell::RefCell;
use std::rc::Rc;

use glam::{Mat4, Vec3};

use super::{normal_matrix, Camera, Transform};
use crate::backend::PrimitiveTopology;
use crate::context::RenderContext;
use crate::error::{RenderError, RenderResult};
use crate::program::Program;
use crate::resources::Geometry;

/// Generational index of a node in a [`SceneGraph`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId {
    index: u32,
    generation: u32,
}

impl NodeId {
    pub fn index(&self) -> u32 {
        self.index
    }

    pub fn generation(&self) -> u32 {
        self.generation
    }
}

/// Geometry paired with the program that draws it
///
/// Geometry and program are shared: many nodes may draw the same mesh with
/// the same program at different transforms.
#[derive(Debug, Clone)]
pub struct DrawSet {
    pub geometry: Rc<Geometry>,
    pub program: Rc<RefCell<Program>>,
    pub draw_type: PrimitiveTopology,
    pub instance_count: u32,
}

impl DrawSet {
    pub fn new(geometry: Rc<Geometry>, program: Rc<RefCell<Program>>) -> Self {
        Self {
            geometry,
            program,
            draw_type: PrimitiveTopology::TriangleList,
            instance_count: 1,
        }
    }

    pub fn with_draw_type(mut self, draw_type: PrimitiveTopology) -> Self {
        self.draw_type = draw_type;
        self
    }

    pub fn with_instances(mut self, instance_count: u32) -> Self {
        self.instance_count = instance_count;
        self
    }
}

/// A node in the hierarchy
#[derive(Debug)]
pub struct Node {
    pub name: String,
    pub transform: Transform,
    parent: Option<NodeId>,
    children: Vec<NodeId>,
    local: Mat4,
    world: Mat4,
    visible: bool,
    draw_set: Option<DrawSet>,
}

impl Node {
    fn new(name: &str, transform: Transform, draw_set: Option<DrawSet>) -> Self {
        Self {
            name: name.to_string(),
            transform,
            parent: None,
            children: Vec::new(),
            local: Mat4::IDENTITY,
            world: Mat4::IDENTITY,
            visible: true,
            draw_set,
        }
    }

    pub fn parent(&self) -> Option<NodeId> {
        self.parent
    }

    pub fn children(&self) -> &[NodeId] {
        &self.children
    }

    /// Local matrix as of the last world-matrix update
    pub fn local_matrix(&self) -> Mat4 {
        self.local
    }

    /// World matrix as of the last world-matrix update
    pub fn world_matrix(&self) -> Mat4 {
        self.world
    }

    pub fn is_visible(&self) -> bool {
        self.visible
    }

    pub fn draw_set(&self) -> Option<&DrawSet> {
        self.draw_set.as_ref()
    }

    pub fn draw_set_mut(&mut self) -> Option<&mut DrawSet> {
        self.draw_set.as_mut()
    }
}

#[derive(Debug)]
struct Slot {
    generation: u32,
    node: Option<Node>,
}

/// Arena of nodes forming a forest of transform hierarchies
#[derive(Debug, Default)]
pub struct SceneGraph {
    slots: Vec<Slot>,
    free: Vec<u32>,
    roots: Vec<NodeId>,
    len: usize,
}

impl SceneGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of live nodes
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn contains(&self, id: NodeId) -> bool {
        self.node(id).is_some()
    }

    /// Add a root node without geometry
    pub fn add_node(&mut self, name: &str, transform: Transform) -> NodeId {
        self.insert(Node::new(name, transform, None))
    }

    /// Add a root node that draws `draw_set`
    pub fn add_draw_set(&mut self, name: &str, transform: Transform, draw_set: DrawSet) -> NodeId {
        self.insert(Node::new(name, transform, Some(draw_set)))
    }

    fn insert(&mut self, node: Node) -> NodeId {
        let id = match self.free.pop() {
            Some(index) => {
                let slot = &mut self.slots[index as usize];
                slot.node = Some(node);
                NodeId {
                    index,
                    generation: slot.generation,
                }
            }
            None => {
                let index = self.slots.len() as u32;
                self.slots.push(Slot {
                    generation: 0,
                    node: Some(node),
                });
                NodeId {
                    index,
                    generation: 0,
                }
            }
        };
        self.roots.push(id);
        self.len += 1;
        log::trace!("Added scene node {:?}", id);
        id
    }

    pub fn node(&self, id: NodeId) -> Option<&Node> {
        self.slots
            .get(id.index as usize)
            .filter(|slot| slot.generation == id.generation)
            .and_then(|slot| slot.node.as_ref())
    }

    pub fn node_mut(&mut self, id: NodeId) -> Option<&mut Node> {
        self.slots
            .get_mut(id.index as usize)
            .filter(|slot| slot.generation == id.generation)
            .and_then(|slot| slot.node.as_mut())
    }

    fn get(&self, id: NodeId) -> RenderResult<&Node> {
        self.node(id).ok_or(RenderError::UnknownNode(id))
    }

    fn get_mut(&mut self, id: NodeId) -> RenderResult<&mut Node> {
        self.node_mut(id).ok_or(RenderError::UnknownNode(id))
    }

    pub fn transform_mut(&mut self, id: NodeId) -> RenderResult<&mut Transform> {
        Ok(&mut self.get_mut(id)?.transform)
    }

    pub fn set_visible(&mut self, id: NodeId, visible: bool) -> RenderResult<()> {
        self.get_mut(id)?.visible = visible;
        Ok(())
    }

    pub fn parent(&self, id: NodeId) -> RenderResult<Option<NodeId>> {
        Ok(self.get(id)?.parent)
    }

    pub fn children(&self, id: NodeId) -> RenderResult<&[NodeId]> {
        Ok(&self.get(id)?.children)
    }

    /// Parentless nodes in insertion order
    pub fn roots(&self) -> &[NodeId] {
        &self.roots
    }

    /// True if `ancestor` is `id` or lies on the path from `id` to its root
    pub fn is_ancestor(&self, ancestor: NodeId, id: NodeId) -> bool {
        let mut current = Some(id);
        while let Some(node_id) = current {
            if node_id == ancestor {
                return true;
            }
            current = self.node(node_id).and_then(|node| node.parent);
        }
        false
    }

    /// Move `id` under `parent`, or make it a root when `parent` is `None`
    ///
    /// The graph is left untouched when either node is unknown or when
    /// `parent` is `id` itself or one of its descendants.
    pub fn set_parent(&mut self, id: NodeId, parent: Option<NodeId>) -> RenderResult<()> {
        self.get(id)?;
        if let Some(parent) = parent {
            self.get(parent)?;
            if self.is_ancestor(id, parent) {
                return Err(RenderError::SceneGraphCycle { node: id, parent });
            }
        }

        self.unlink(id);
        match parent {
            Some(parent) => {
                self.get_mut(parent)?.children.push(id);
                self.get_mut(id)?.parent = Some(parent);
            }
            None => {
                self.roots.push(id);
                self.get_mut(id)?.parent = None;
            }
        }
        Ok(())
    }

    /// Make `id` a root, keeping its subtree
    pub fn detach(&mut self, id: NodeId) -> RenderResult<()> {
        self.set_parent(id, None)
    }

    /// Remove `id` from its parent's child list or from the roots
    fn unlink(&mut self, id: NodeId) {
        match self.node(id).and_then(|node| node.parent) {
            Some(parent) => {
                if let Some(parent) = self.node_mut(parent) {
                    parent.children.retain(|child| *child != id);
                }
            }
            None => self.roots.retain(|root| *root != id),
        }
    }

    /// Remove `id` and its whole subtree, children before parents
    ///
    /// Returns the draw sets of the removed nodes in removal order so the
    /// caller can release shared geometry and programs.
    pub fn remove(&mut self, id: NodeId) -> RenderResult<Vec<DrawSet>> {
        let mut order = Vec::new();
        self.traverse_post_order(id, |node_id, _| order.push(node_id))?;
        self.unlink(id);

        let mut draw_sets = Vec::new();
        for node_id in order {
            let slot = &mut self.slots[node_id.index as usize];
            if let Some(node) = slot.node.take() {
                draw_sets.extend(node.draw_set);
            }
            slot.generation = slot.generation.wrapping_add(1);
            self.free.push(node_id.index);
            self.len -= 1;
        }
        log::debug!("Removed scene subtree rooted at {:?}", id);
        Ok(draw_sets)
    }

    /// Recompute world matrices of `id` and its subtree
    ///
    /// Parents are always computed before their children. `parent_world`
    /// is the matrix `id` is placed under; `None` treats it as a root.
    pub fn update_world_matrix(&mut self, id: NodeId, parent_world: Option<Mat4>) -> RenderResult<()> {
        self.get(id)?;
        let mut stack = vec![(id, parent_world)];
        while let Some((node_id, parent_world)) = stack.pop() {
            let Some(node) = self.node_mut(node_id) else {
                continue;
            };
            node.local = node.transform.matrix();
            node.world = match parent_world {
                Some(parent) => parent * node.local,
                None => node.local,
            };
            let world = node.world;
            stack.extend(node.children.iter().rev().map(|child| (*child, Some(world))));
        }
        Ok(())
    }

    /// Recompute every world matrix from the roots down
    pub fn update_world_matrices(&mut self) {
        let roots = self.roots.clone();
        for root in roots {
            if let Err(err) = self.update_world_matrix(root, None) {
                log::warn!("Skipping stale root: {}", err);
            }
        }
    }

    /// Visit `id` and its descendants, each parent before its children
    pub fn traverse_pre_order<F>(&self, id: NodeId, mut visit: F) -> RenderResult<()>
    where
        F: FnMut(NodeId, &Node),
    {
        self.get(id)?;
        let mut stack = vec![id];
        while let Some(node_id) = stack.pop() {
            if let Some(node) = self.node(node_id) {
                visit(node_id, node);
                stack.extend(node.children.iter().rev().copied());
            }
        }
        Ok(())
    }

    /// Visit `id` and its descendants, each child before its parent
    pub fn traverse_post_order<F>(&self, id: NodeId, mut visit: F) -> RenderResult<()>
    where
        F: FnMut(NodeId, &Node),
    {
        self.get(id)?;
        let mut stack = vec![(id, false)];
        while let Some((node_id, expanded)) = stack.pop() {
            let Some(node) = self.node(node_id) else {
                continue;
            };
            if expanded {
                visit(node_id, node);
            } else {
                stack.push((node_id, true));
                stack.extend(node.children.iter().rev().map(|child| (*child, false)));
            }
        }
        Ok(())
    }

    pub fn world_matrix(&self, id: NodeId) -> RenderResult<Mat4> {
        Ok(self.get(id)?.world)
    }

    pub fn world_position(&self, id: NodeId) -> RenderResult<Vec3> {
        Ok(self.get(id)?.world.w_axis.truncate())
    }

    /// Draw a single node's draw set with its current world matrix
    pub fn draw(&self, ctx: &mut RenderContext, id: NodeId, camera: &Camera) -> RenderResult<()> {
        let node = self.get(id)?;
        let draw_set = node.draw_set.as_ref().ok_or_else(|| {
            RenderError::InvalidOperation(format!("scene node `{}` has no draw set", node.name))
        })?;

        let mut program = draw_set.program.borrow_mut();
        program.set_uniform(ctx, "u_model", node.world)?;
        program.set_uniform(ctx, "u_view", camera.view_matrix())?;
        program.set_uniform(ctx, "u_projection", camera.projection_matrix())?;
        if program.has_uniform("u_normal_matrix") {
            program.set_uniform(ctx, "u_normal_matrix", normal_matrix(&node.world))?;
        }
        program.bind(ctx)?;

        log::trace!(
            "Drawing node `{}` with `{}` ({:?} x{})",
            node.name,
            program.label(),
            draw_set.draw_type,
            draw_set.instance_count
        );
        draw_set
            .geometry
            .draw(ctx, draw_set.draw_type, draw_set.instance_count)
    }

    /// Draw every visible draw set in pre-order; a hidden node hides its subtree.
    /// Returns the number of nodes drawn.
    pub fn draw_all(&self, ctx: &mut RenderContext, camera: &Camera) -> RenderResult<usize> {
        let mut drawn = 0;
        let mut stack: Vec<NodeId> = self.roots.iter().rev().copied().collect();
        while let Some(id) = stack.pop() {
            let Some(node) = self.node(id) else {
                continue;
            };
            if !node.visible {
                continue;
            }
            if node.draw_set.is_some() {
                self.draw(ctx, id, camera)?;
                drawn += 1;
            }
            stack.extend(node.children.iter().rev().copied());
        }
        Ok(drawn)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_child_world_position_composes_parent() {
        let mut graph = SceneGraph::new();
        let root = graph.add_node("root", Transform::from_position(Vec3::new(1.0, 0.0, 0.0)));
        let child = graph.add_node("child", Transform::from_position(Vec3::new(0.0, 2.0, 0.0)));
        graph.set_parent(child, Some(root)).unwrap();

        graph.update_world_matrices();
        assert_eq!(graph.world_position(child).unwrap(), Vec3::new(1.0, 2.0, 0.0));
        assert_eq!(graph.roots(), &[root]);
        assert_eq!(graph.parent(child).unwrap(), Some(root));
    }

    #[test]
    fn test_cycle_rejected_without_mutation() {
        let mut graph = SceneGraph::new();
        let a = graph.add_node("a", Transform::default());
        let b = graph.add_node("b", Transform::default());
        let c = graph.add_node("c", Transform::default());
        graph.set_parent(b, Some(a)).unwrap();
        graph.set_parent(c, Some(b)).unwrap();

        let err = graph.set_parent(a, Some(c)).unwrap_err();
        assert!(matches!(err, RenderError::SceneGraphCycle { node, parent } if node == a && parent == c));
        assert!(matches!(
            graph.set_parent(a, Some(a)),
            Err(RenderError::SceneGraphCycle { .. })
        ));
        assert_eq!(graph.roots(), &[a]);
        assert_eq!(graph.children(a).unwrap(), &[b]);
        assert_eq!(graph.children(b).unwrap(), &[c]);
    }

    #[test]
    fn test_remove_is_post_order_and_invalidates_ids() {
        let mut graph = SceneGraph::new();
        let a = graph.add_node("a", Transform::default());
        let b = graph.add_node("b", Transform::default());
        let c = graph.add_node("c", Transform::default());
        graph.set_parent(b, Some(a)).unwrap();
        graph.set_parent(c, Some(b)).unwrap();

        let mut order = Vec::new();
        graph.traverse_post_order(a, |id, _| order.push(id)).unwrap();
        assert_eq!(order, vec![c, b, a]);

        graph.remove(b).unwrap();
        assert_eq!(graph.len(), 1);
        assert!(graph.children(a).unwrap().is_empty());
        assert!(matches!(graph.parent(c), Err(RenderError::UnknownNode(_))));

        let reused = graph.add_node("d", Transform::default());
        assert!(graph.contains(reused));
        assert!(!graph.contains(b));
        assert!(!graph.contains(c));
    }

    #[test]
    fn test_detach_keeps_subtree() {
        let mut graph = SceneGraph::new();
        let a = graph.add_node("a", Transform::from_position(Vec3::X));
        let b = graph.add_node("b", Transform::from_position(Vec3::Y));
        let c = graph.add_node("c", Transform::from_position(Vec3::Z));
        graph.set_parent(b, Some(a)).unwrap();
        graph.set_parent(c, Some(b)).unwrap();

        graph.detach(b).unwrap();
        graph.update_world_matrices();
        assert_eq!(graph.roots(), &[a, b]);
        assert_eq!(graph.world_position(c).unwrap(), Vec3::new(0.0, 1.0, 1.0));
    }
}
