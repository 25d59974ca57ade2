use std::collections::HashMap;
use std::sync::Arc;

use petgraph::Direction;
use petgraph::graph::NodeIndex;
use petgraph::stable_graph::StableDiGraph;
use petgraph::visit::EdgeRef;
use petgraph::visit::IntoEdgeReferences;

use crate::types::Asset;
use crate::types::Dependency;

pub type NodeId = usize;

#[derive(Clone, Debug, PartialEq)]
#[allow(clippy::large_enum_variant)]
pub enum AssetGraphNode {
  Root,
  Asset(Arc<Asset>),
  Dependency(Arc<Dependency>),
}

/// The resolved graph of assets and the dependencies connecting them
///
/// This is the input to bundling. Nodes are addressed by stable ids and by
/// content key (the asset or dependency id), so that the bundle graph can
/// be seeded from the same nodes.
#[derive(Clone, Debug)]
pub struct AssetGraph {
  pub graph: StableDiGraph<NodeId, ()>,
  nodes: Vec<AssetGraphNode>,
  content_key_to_node_id: HashMap<String, NodeId>,
  node_id_to_node_index: HashMap<NodeId, NodeIndex>,
  root_node_id: NodeId,
}

impl Default for AssetGraph {
  fn default() -> Self {
    Self::new()
  }
}

impl AssetGraph {
  pub fn new() -> Self {
    let mut graph = StableDiGraph::new();

    let mut node_id_to_node_index = HashMap::new();
    let nodes = vec![AssetGraphNode::Root];
    let root_node_id = 0;

    node_id_to_node_index.insert(root_node_id, graph.add_node(root_node_id));

    AssetGraph {
      graph,
      nodes,
      content_key_to_node_id: HashMap::new(),
      node_id_to_node_index,
      root_node_id,
    }
  }

  pub fn root_node(&self) -> NodeId {
    self.root_node_id
  }

  pub fn nodes(&self) -> impl Iterator<Item = &AssetGraphNode> {
    self.nodes.iter()
  }

  pub fn get_node(&self, idx: &NodeId) -> Option<&AssetGraphNode> {
    self.nodes.get(*idx)
  }

  pub fn get_node_id_by_content_key(&self, content_key: &str) -> Option<&NodeId> {
    self.content_key_to_node_id.get(content_key)
  }

  fn add_node(&mut self, content_key: String, node: AssetGraphNode) -> NodeId {
    let node_id = if let Some(existing_node_id) = self.content_key_to_node_id.get(&content_key) {
      self.nodes[*existing_node_id] = node;

      *existing_node_id
    } else {
      let node_id = self.nodes.len();
      self.nodes.push(node);
      self.content_key_to_node_id.insert(content_key, node_id);

      let node_index = self.graph.add_node(node_id);
      self.node_id_to_node_index.insert(node_id, node_index);
      node_id
    };

    node_id
  }

  pub fn add_asset(&mut self, asset: Arc<Asset>) -> NodeId {
    self.add_node(asset.id.clone(), AssetGraphNode::Asset(asset))
  }

  pub fn get_asset(&self, idx: &NodeId) -> Option<&Arc<Asset>> {
    let AssetGraphNode::Asset(asset) = self.get_node(idx)? else {
      return None;
    };
    Some(asset)
  }

  pub fn get_assets(&self) -> impl Iterator<Item = &Arc<Asset>> {
    self.nodes.iter().filter_map(|node| match node {
      AssetGraphNode::Asset(asset) => Some(asset),
      _ => None,
    })
  }

  pub fn add_dependency(&mut self, dependency: Dependency) -> NodeId {
    self.add_node(
      dependency.id(),
      AssetGraphNode::Dependency(Arc::new(dependency)),
    )
  }

  /// Adds an entry dependency and connects it to the root, making it a
  /// starting point for bundling traversals.
  pub fn add_entry_dependency(&mut self, dependency: Dependency) -> NodeId {
    let root_node_id = self.root_node_id;
    let dependency_idx = self.add_dependency(dependency);
    self.add_edge(&root_node_id, &dependency_idx);
    dependency_idx
  }

  pub fn get_dependency(&self, idx: &NodeId) -> Option<&Arc<Dependency>> {
    let AssetGraphNode::Dependency(dependency) = self.get_node(idx)? else {
      return None;
    };
    Some(dependency)
  }

  pub fn get_dependencies(&self) -> impl Iterator<Item = &Arc<Dependency>> {
    self.nodes.iter().filter_map(|node| match node {
      AssetGraphNode::Dependency(dependency) => Some(dependency),
      _ => None,
    })
  }

  pub fn add_edge(&mut self, from_idx: &NodeId, to_idx: &NodeId) {
    if self.has_edge(from_idx, to_idx) {
      return;
    }
    self.graph.add_edge(
      self.node_id_to_node_index[from_idx],
      self.node_id_to_node_index[to_idx],
      (),
    );
  }

  pub fn has_edge(&self, from_idx: &NodeId, to_idx: &NodeId) -> bool {
    self.graph.contains_edge(
      self.node_id_to_node_index[from_idx],
      self.node_id_to_node_index[to_idx],
    )
  }

  /// Outgoing neighbors in the order the edges were declared.
  pub fn get_outgoing_neighbors(&self, node_id: &NodeId) -> Vec<NodeId> {
    let mut neighbors: Vec<NodeId> = self
      .graph
      .neighbors_directed(self.node_id_to_node_index[node_id], Direction::Outgoing)
      .filter_map(|node_index| self.graph.node_weight(node_index).copied())
      .collect();
    // Petgraph yields edges newest-first; declaration order matters here.
    neighbors.reverse();
    neighbors
  }

  /// All edges as `(from, to)` node id pairs, in insertion order.
  pub fn edges(&self) -> Vec<(NodeId, NodeId)> {
    self
      .graph
      .edge_references()
      .filter_map(|edge| {
        let from = *self.graph.node_weight(edge.source())?;
        let to = *self.graph.node_weight(edge.target())?;
        Some((from, to))
      })
      .collect()
  }
}
