//! Алгоритмы обхода одной замороженной версии.
//!
//! `TraversalEngine` работает только с записями версии (`FrozenVersion`)
//! и никогда не обращается к живому графу. Записи версии не меняются,
//! поэтому движок можно свободно разделять между потоками читателей.

use std::collections::{HashMap, HashSet, VecDeque};

use crate::error::{NotFound, Result};
use crate::types::{EdgeId, FrozenEdge, FrozenVersion, NodeId, NodeVersion, Version};

/// Шаг найденного пути: нода и ребро, по которому путь уходит из неё дальше.
/// У последнего шага ребра нет.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PathStep<'a> {
    pub node_id: NodeId,
    pub edge: Option<&'a FrozenEdge>,
}

pub struct TraversalEngine {
    frozen: FrozenVersion,
    node_index: HashMap<NodeId, usize>,
    // node -> индексы рёбер, выходящих из неё (node == incoming_node_id)
    outgoing: HashMap<NodeId, Vec<usize>>,
    // node -> индексы рёбер, входящих в неё (node == outgoing_node_id)
    incoming: HashMap<NodeId, Vec<usize>>,
    max_path_depth: Option<usize>,
}

impl TraversalEngine {
    pub fn new(frozen: FrozenVersion) -> Self {
        let node_index = frozen
            .nodes
            .iter()
            .enumerate()
            .map(|(i, nv)| (nv.node_id, i))
            .collect();

        let mut outgoing: HashMap<NodeId, Vec<usize>> = HashMap::new();
        let mut incoming: HashMap<NodeId, Vec<usize>> = HashMap::new();
        for (i, edge) in frozen.edges.iter().enumerate() {
            outgoing.entry(edge.incoming_node_id).or_default().push(i);
            incoming.entry(edge.outgoing_node_id).or_default().push(i);
        }

        Self { frozen, node_index, outgoing, incoming, max_path_depth: None }
    }

    pub fn with_max_path_depth(mut self, limit: Option<usize>) -> Self {
        self.max_path_depth = limit;
        self
    }

    pub fn version(&self) -> &Version {
        &self.frozen.version
    }

    pub fn nodes(&self) -> &[NodeVersion] {
        &self.frozen.nodes
    }

    pub fn edges(&self) -> &[FrozenEdge] {
        &self.frozen.edges
    }

    /// Ноды, которые не являются концом (`outgoing_node_id`) ни одного ребра версии.
    pub fn root_nodes(&self) -> Vec<&NodeVersion> {
        self.frozen
            .nodes
            .iter()
            .filter(|nv| !self.incoming.contains_key(&nv.node_id))
            .collect()
    }

    pub fn node(&self, node_id: NodeId) -> Result<&NodeVersion> {
        self.node_index
            .get(&node_id)
            .map(|&i| &self.frozen.nodes[i])
            .ok_or_else(|| NotFound::Node(node_id).into())
    }

    pub fn edge(&self, edge_id: EdgeId) -> Result<&FrozenEdge> {
        self.frozen
            .edges
            .iter()
            .find(|e| e.edge_id() == edge_id)
            .ok_or_else(|| NotFound::Edge(edge_id).into())
    }

    pub fn child_nodes(&self, node_id: NodeId) -> Vec<&NodeVersion> {
        let ids = self.child_ids(node_id).collect::<HashSet<_>>();
        self.project(&ids)
    }

    pub fn parent_nodes(&self, node_id: NodeId) -> Vec<&NodeVersion> {
        let ids = self
            .incoming
            .get(&node_id)
            .into_iter()
            .flatten()
            .map(|&i| self.frozen.edges[i].incoming_node_id)
            .collect::<HashSet<_>>();
        self.project(&ids)
    }

    /// Все рёбра, у которых `node_id` является одним из концов.
    pub fn node_edges(&self, node_id: NodeId) -> Vec<&FrozenEdge> {
        self.frozen
            .edges
            .iter()
            .filter(|e| e.touches(node_id))
            .collect()
    }

    /// Ноды ровно на `depth` шагов от какого-либо корня.
    ///
    /// Обход в ширину от всех корней по исходящим рёбрам, слой за слоем.
    /// В памяти только текущий и следующий слой, каждый без повторов, поэтому
    /// на циклах расход памяти ограничен размером версии, а не `depth`.
    pub fn nodes_at_depth(&self, depth: usize) -> Vec<&NodeVersion> {
        let mut layer: Vec<NodeId> = self.root_nodes().into_iter().map(|nv| nv.node_id).collect();
        let mut next: Vec<NodeId> = Vec::new();
        let mut in_next: HashSet<NodeId> = HashSet::new();

        for _ in 0..depth {
            if layer.is_empty() {
                break;
            }
            next.clear();
            in_next.clear();
            for &node_id in &layer {
                for child in self.child_ids(node_id) {
                    if self.node_index.contains_key(&child) && in_next.insert(child) {
                        next.push(child);
                    }
                }
            }
            std::mem::swap(&mut layer, &mut next);
        }

        layer
            .iter()
            .filter_map(|id| self.node_index.get(id).map(|&i| &self.frozen.nodes[i]))
            .collect()
    }

    /// Кратчайший (по числу рёбер) путь по исходящим рёбрам, поиск в ширину.
    ///
    /// Возвращает `Ok(None)`, если `end` недостижима. Нода посещается один раз,
    /// так что на циклическом графе выигрывает первое найденное BFS-ом.
    pub fn find_path(&self, start: NodeId, end: NodeId) -> Result<Option<Vec<PathStep<'_>>>> {
        self.node(start)?;

        let mut queue = VecDeque::from([(start, 0usize)]);
        let mut visited = HashSet::from([start]);
        let mut came_from: HashMap<NodeId, (NodeId, usize)> = HashMap::new();

        while let Some((current, depth)) = queue.pop_front() {
            if current == end {
                return Ok(Some(self.rebuild_path(start, end, &came_from)));
            }
            if self.max_path_depth.is_some_and(|limit| depth >= limit) {
                continue;
            }

            for &i in self.outgoing.get(&current).into_iter().flatten() {
                let next = self.frozen.edges[i].outgoing_node_id;
                if visited.insert(next) {
                    came_from.insert(next, (current, i));
                    queue.push_back((next, depth + 1));
                }
            }
        }

        Ok(None)
    }

    fn rebuild_path(
        &self,
        start: NodeId,
        end: NodeId,
        came_from: &HashMap<NodeId, (NodeId, usize)>,
    ) -> Vec<PathStep<'_>> {
        let mut steps = vec![PathStep { node_id: end, edge: None }];
        let mut current = end;

        while current != start {
            let Some(&(prev, edge)) = came_from.get(&current) else {
                break;
            };
            steps.push(PathStep { node_id: prev, edge: Some(&self.frozen.edges[edge]) });
            current = prev;
        }

        steps.reverse();
        steps
    }

    /// Обход в глубину по исходящим рёбрам начиная с `start`.
    ///
    /// `visit` получает запись ноды и ребро, по которому в неё пришли (`None` для `start`).
    /// Каждая нода посещается не более одного раза; `visited` можно переиспользовать
    /// между вызовами, чтобы обойти несколько корней без повторов.
    /// Концы рёбер без записи в версии пропускаются.
    pub fn traverse<F>(
        &self,
        start: NodeId,
        visited: &mut HashSet<NodeId>,
        mut visit: F,
    ) -> Result<()>
    where
        F: FnMut(&NodeVersion, Option<&FrozenEdge>),
    {
        if visited.contains(&start) {
            return Ok(());
        }
        self.node(start)?;

        let mut stack: Vec<(NodeId, Option<usize>)> = vec![(start, None)];
        while let Some((node_id, via)) = stack.pop() {
            let Some(&i) = self.node_index.get(&node_id) else {
                continue;
            };
            if !visited.insert(node_id) {
                continue;
            }

            visit(&self.frozen.nodes[i], via.map(|e| &self.frozen.edges[e]));

            // в обратном порядке, чтобы дети снимались со стека в порядке рёбер
            for &e in self.outgoing.get(&node_id).into_iter().flatten().rev() {
                let next = self.frozen.edges[e].outgoing_node_id;
                if !visited.contains(&next) {
                    stack.push((next, Some(e)));
                }
            }
        }

        Ok(())
    }

    /// Порядок обхода `traverse` от всех корней.
    pub fn walk(&self) -> Result<Vec<&NodeVersion>> {
        let mut visited = HashSet::new();
        let mut order = Vec::new();
        for root in self.root_nodes() {
            self.traverse(root.node_id, &mut visited, |nv, _| order.push(nv.node_id))?;
        }
        Ok(order
            .into_iter()
            .filter_map(|id| self.node_index.get(&id).map(|&i| &self.frozen.nodes[i]))
            .collect())
    }

    fn child_ids(&self, node_id: NodeId) -> impl Iterator<Item = NodeId> + '_ {
        self.outgoing
            .get(&node_id)
            .into_iter()
            .flatten()
            .map(|&i| self.frozen.edges[i].outgoing_node_id)
    }

    fn project(&self, ids: &HashSet<NodeId>) -> Vec<&NodeVersion> {
        self.frozen
            .nodes
            .iter()
            .filter(|nv| ids.contains(&nv.node_id))
            .collect()
    }
}
