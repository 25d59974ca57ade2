use std::collections::HashMap;
use std::collections::HashSet;
use std::sync::Arc;

use anyhow::anyhow;
use petgraph::Direction;
use petgraph::graph::NodeIndex;
use petgraph::stable_graph::StableDiGraph;
use petgraph::visit::EdgeRef;
use petgraph::visit::IntoEdgeReferences;
use tracing::debug;

use crate::asset_graph::{AssetGraph, AssetGraphNode};
use crate::types::{
  Asset, Bundle, BundleGroup, Dependency, Environment, FileType, Target, create_bundle_id,
};

pub type NodeId = usize;

#[derive(Clone, Debug, PartialEq)]
#[allow(clippy::large_enum_variant)]
pub enum BundleGraphNode {
  Root,
  Asset(Arc<Asset>),
  Dependency(Arc<Dependency>),
  Bundle(Bundle),
  BundleGroup(BundleGroup),
}

/// Relations held by the bundle graph. The asset graph is carried as `Null`
/// edges and is never modified after construction; all bundling state lives
/// in the typed edges.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum BundleGraphEdgeType {
  /// Edges copied from the asset graph: root -> dependency,
  /// asset -> dependency and dependency -> asset.
  Null,
  /// Bundle group structure: root -> group for entry groups,
  /// group -> bundle for membership, and bundle -> group when a bundle
  /// contains a dependency that loads the group.
  Bundle,
  /// Containment: bundle -> asset and bundle -> dependency.
  Contains,
  /// A dependency resolving outside its own bundle: dependency -> asset for
  /// a reference into a sibling bundle, dependency -> group for a split
  /// point.
  References,
  /// An async dependency that resolves within the bundle itself.
  InternalAsync,
}

/// What a dependency resolves to outside of its own bundle, if anything.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ExternalResolution {
  BundleGroup(NodeId),
  Asset(NodeId),
}

/// Mutable control handed to traversal visitors.
#[derive(Debug, Default)]
pub struct TraversalActions {
  skip_children: bool,
  stop: bool,
}

impl TraversalActions {
  pub fn skip_children(&mut self) {
    self.skip_children = true;
  }

  pub fn stop(&mut self) {
    self.stop = true;
  }
}

/// A visitor over the asset contents of the bundle graph, carrying a
/// context down the traversal.
///
/// `enter` may mutate the graph; the underlying `Null` edges it walks are
/// fixed at construction, so mutation never changes the visit order.
/// Returning `Some` replaces the context passed to the node's children,
/// returning `None` forwards the current one.
pub trait GraphVisitor {
  type Context;

  fn enter(
    &mut self,
    graph: &mut BundleGraph,
    node: NodeId,
    context: Option<&Self::Context>,
    actions: &mut TraversalActions,
  ) -> anyhow::Result<Option<Self::Context>>;

  fn exit(&mut self, _graph: &mut BundleGraph, _node: NodeId) -> anyhow::Result<()> {
    Ok(())
  }
}

/// The mutable output structure of bundling
///
/// Modelled as an arena of nodes addressed by stable ids, with a petgraph
/// holding the typed relations between them. Assets and dependencies are
/// shared with the asset graph; bundles and bundle groups are created by
/// the bundling passes.
#[derive(Clone, Debug)]
pub struct BundleGraph {
  graph: StableDiGraph<NodeId, BundleGraphEdgeType>,
  nodes: Vec<BundleGraphNode>,
  node_id_to_node_index: HashMap<NodeId, NodeIndex>,
  content_key_to_node_id: HashMap<String, NodeId>,
  root_node_id: NodeId,

  /// Assets attached to each bundle as roots, in attach order. These are
  /// the starting points for traversals within a bundle.
  bundle_roots: HashMap<NodeId, Vec<NodeId>>,

  bundle_public_ids: HashSet<String>,
}

impl Default for BundleGraph {
  fn default() -> Self {
    Self::new()
  }
}

impl PartialEq for BundleGraph {
  fn eq(&self, other: &Self) -> bool {
    if self.nodes != other.nodes {
      return false;
    }
    if self.content_key_to_node_id != other.content_key_to_node_id {
      return false;
    }
    if self.bundle_roots != other.bundle_roots {
      return false;
    }

    let mut self_edges = self.edge_list();
    let mut other_edges = other.edge_list();
    self_edges.sort_by_key(|(f, t, w)| (*f, *t, *w as u8));
    other_edges.sort_by_key(|(f, t, w)| (*f, *t, *w as u8));

    self_edges == other_edges
  }
}

impl Eq for BundleGraph {}

impl BundleGraph {
  pub fn new() -> Self {
    let mut graph = StableDiGraph::new();
    let mut node_id_to_node_index = HashMap::new();
    let nodes = vec![BundleGraphNode::Root];
    let root_node_id = 0;
    node_id_to_node_index.insert(root_node_id, graph.add_node(root_node_id));

    Self {
      graph,
      nodes,
      node_id_to_node_index,
      content_key_to_node_id: HashMap::new(),
      root_node_id,
      bundle_roots: HashMap::new(),
      bundle_public_ids: HashSet::new(),
    }
  }

  /// Seeds a bundle graph from a resolved asset graph, carrying its nodes
  /// and edges over untouched.
  pub fn from_asset_graph(asset_graph: &AssetGraph) -> Self {
    let mut bundle_graph = BundleGraph::new();

    let mut node_id_map: HashMap<usize, NodeId> = HashMap::new();
    node_id_map.insert(asset_graph.root_node(), bundle_graph.root_node_id);

    for (asset_graph_id, node) in asset_graph.nodes().enumerate() {
      match node {
        AssetGraphNode::Root => {}
        AssetGraphNode::Asset(asset) => {
          let node_id =
            bundle_graph.add_node(asset.id.clone(), BundleGraphNode::Asset(asset.clone()));
          node_id_map.insert(asset_graph_id, node_id);
        }
        AssetGraphNode::Dependency(dependency) => {
          let node_id = bundle_graph.add_node(
            dependency.id(),
            BundleGraphNode::Dependency(dependency.clone()),
          );
          node_id_map.insert(asset_graph_id, node_id);
        }
      }
    }

    for (from, to) in asset_graph.edges() {
      let (Some(&from_id), Some(&to_id)) = (node_id_map.get(&from), node_id_map.get(&to)) else {
        continue;
      };
      bundle_graph.add_edge(from_id, to_id, BundleGraphEdgeType::Null);
    }

    debug!(
      nodes = bundle_graph.nodes.len(),
      "seeded bundle graph from asset graph"
    );
    bundle_graph
  }

  pub fn root_node(&self) -> NodeId {
    self.root_node_id
  }

  pub fn get_node(&self, idx: NodeId) -> Option<&BundleGraphNode> {
    self.nodes.get(idx)
  }

  pub fn get_node_id_by_content_key(&self, content_key: &str) -> Option<&NodeId> {
    self.content_key_to_node_id.get(content_key)
  }

  pub fn get_asset(&self, idx: NodeId) -> Option<&Arc<Asset>> {
    match self.nodes.get(idx)? {
      BundleGraphNode::Asset(asset) => Some(asset),
      _ => None,
    }
  }

  pub fn get_dependency(&self, idx: NodeId) -> Option<&Arc<Dependency>> {
    match self.nodes.get(idx)? {
      BundleGraphNode::Dependency(dependency) => Some(dependency),
      _ => None,
    }
  }

  pub fn get_bundle(&self, idx: NodeId) -> Option<&Bundle> {
    match self.nodes.get(idx)? {
      BundleGraphNode::Bundle(bundle) => Some(bundle),
      _ => None,
    }
  }

  pub fn get_bundle_group(&self, idx: NodeId) -> Option<&BundleGroup> {
    match self.nodes.get(idx)? {
      BundleGraphNode::BundleGroup(group) => Some(group),
      _ => None,
    }
  }

  fn add_node(&mut self, content_key: String, node: BundleGraphNode) -> NodeId {
    if let Some(existing_node_id) = self.content_key_to_node_id.get(&content_key) {
      return *existing_node_id;
    }

    let node_id = self.nodes.len();
    self.nodes.push(node);
    self.content_key_to_node_id.insert(content_key, node_id);

    let node_index = self.graph.add_node(node_id);
    self.node_id_to_node_index.insert(node_id, node_index);
    node_id
  }

  fn add_edge(&mut self, from: NodeId, to: NodeId, edge_type: BundleGraphEdgeType) {
    if self.has_edge(from, to, edge_type) {
      return;
    }
    self.graph.add_edge(
      self.node_id_to_node_index[&from],
      self.node_id_to_node_index[&to],
      edge_type,
    );
  }

  fn remove_edge(&mut self, from: NodeId, to: NodeId, edge_type: BundleGraphEdgeType) {
    let (Some(&from_index), Some(&to_index)) = (
      self.node_id_to_node_index.get(&from),
      self.node_id_to_node_index.get(&to),
    ) else {
      return;
    };

    let edges: Vec<_> = self
      .graph
      .edges_connecting(from_index, to_index)
      .filter(|edge| *edge.weight() == edge_type)
      .map(|edge| edge.id())
      .collect();
    for edge in edges {
      self.graph.remove_edge(edge);
    }
  }

  fn has_edge(&self, from: NodeId, to: NodeId, edge_type: BundleGraphEdgeType) -> bool {
    let (Some(&from_index), Some(&to_index)) = (
      self.node_id_to_node_index.get(&from),
      self.node_id_to_node_index.get(&to),
    ) else {
      return false;
    };

    self
      .graph
      .edges_connecting(from_index, to_index)
      .any(|edge| *edge.weight() == edge_type)
  }

  /// Outgoing neighbors over one edge type, in edge-insertion order.
  fn outgoing(&self, node: NodeId, edge_type: BundleGraphEdgeType) -> Vec<NodeId> {
    let Some(&node_index) = self.node_id_to_node_index.get(&node) else {
      return Vec::new();
    };

    let mut neighbors: Vec<NodeId> = self
      .graph
      .edges_directed(node_index, Direction::Outgoing)
      .filter(|edge| *edge.weight() == edge_type)
      .filter_map(|edge| self.graph.node_weight(edge.target()).copied())
      .collect();
    // Petgraph yields edges newest-first; declaration order matters here.
    neighbors.reverse();
    neighbors
  }

  fn incoming(&self, node: NodeId, edge_type: BundleGraphEdgeType) -> Vec<NodeId> {
    let Some(&node_index) = self.node_id_to_node_index.get(&node) else {
      return Vec::new();
    };

    let mut neighbors: Vec<NodeId> = self
      .graph
      .edges_directed(node_index, Direction::Incoming)
      .filter(|edge| *edge.weight() == edge_type)
      .filter_map(|edge| self.graph.node_weight(edge.source()).copied())
      .collect();
    neighbors.reverse();
    neighbors
  }

  fn edge_list(&self) -> Vec<(NodeId, NodeId, BundleGraphEdgeType)> {
    self
      .graph
      .edge_references()
      .filter_map(|edge| {
        let from = *self.graph.node_weight(edge.source())?;
        let to = *self.graph.node_weight(edge.target())?;
        Some((from, to, *edge.weight()))
      })
      .collect()
  }

  /// Children over the asset-graph edges, regardless of bundle boundaries.
  fn asset_graph_children(&self, node: NodeId) -> Vec<NodeId> {
    self.outgoing(node, BundleGraphEdgeType::Null)
  }

  /// The resolved assets of a dependency that belong to the same bundle as
  /// the dependency itself. Empty when the dependency loads a bundle group;
  /// assets referenced into sibling bundles are filtered out.
  fn dependency_local_children(&self, dependency: NodeId) -> Vec<NodeId> {
    let references = self.outgoing(dependency, BundleGraphEdgeType::References);
    if references
      .iter()
      .any(|&node| matches!(self.nodes[node], BundleGraphNode::BundleGroup(_)))
    {
      return Vec::new();
    }

    self
      .asset_graph_children(dependency)
      .into_iter()
      .filter(|child| !references.contains(child))
      .collect()
  }

  // ----------------------------
  // Traversal
  // ----------------------------

  /// Depth-first traversal over the asset contents (assets and
  /// dependencies), with enter/exit hooks and a caller-supplied context
  /// threaded down the stack. Each node is visited once.
  pub fn traverse<V: GraphVisitor>(&mut self, visitor: &mut V) -> anyhow::Result<()> {
    let root = self.root_node_id;
    let mut visited = HashSet::new();
    let mut stopped = false;
    self.traverse_from(root, None, visitor, &mut visited, &mut stopped)
  }

  fn traverse_from<V: GraphVisitor>(
    &mut self,
    node: NodeId,
    context: Option<&V::Context>,
    visitor: &mut V,
    visited: &mut HashSet<NodeId>,
    stopped: &mut bool,
  ) -> anyhow::Result<()> {
    if *stopped || !visited.insert(node) {
      return Ok(());
    }

    let mut actions = TraversalActions::default();
    let next_context = visitor.enter(self, node, context, &mut actions)?;
    if actions.stop {
      *stopped = true;
    }

    if !*stopped && !actions.skip_children {
      let child_context = next_context.as_ref().or(context);
      for child in self.asset_graph_children(node) {
        self.traverse_from(child, child_context, visitor, visited, stopped)?;
        if *stopped {
          break;
        }
      }
    }

    visitor.exit(self, node)
  }

  /// Read-only depth-first traversal over the asset contents, with a
  /// `skip_children` control. Used to materialize work lists before a pass
  /// starts mutating.
  pub fn traverse_contents<F>(&self, visit: &mut F)
  where
    F: FnMut(NodeId, &BundleGraphNode, &mut TraversalActions),
  {
    let mut visited = HashSet::new();
    let mut stopped = false;
    self.traverse_contents_from(self.root_node_id, visit, &mut visited, &mut stopped);
  }

  fn traverse_contents_from<F>(
    &self,
    node: NodeId,
    visit: &mut F,
    visited: &mut HashSet<NodeId>,
    stopped: &mut bool,
  ) where
    F: FnMut(NodeId, &BundleGraphNode, &mut TraversalActions),
  {
    if *stopped || !visited.insert(node) {
      return;
    }

    if node != self.root_node_id {
      let mut actions = TraversalActions::default();
      visit(node, &self.nodes[node], &mut actions);
      if actions.stop {
        *stopped = true;
        return;
      }
      if actions.skip_children {
        return;
      }
    }

    for child in self.asset_graph_children(node) {
      self.traverse_contents_from(child, visit, visited, stopped);
      if *stopped {
        return;
      }
    }
  }

  /// Visits every bundle reachable from the root with enter/exit hooks,
  /// following group membership edges. Exit order is postorder.
  pub fn traverse_bundles<E, X>(&self, enter: &mut E, exit: &mut X)
  where
    E: FnMut(NodeId, &Bundle),
    X: FnMut(NodeId, &Bundle),
  {
    let mut visited = HashSet::new();
    self.traverse_bundles_from(self.root_node_id, enter, exit, &mut visited);
  }

  fn traverse_bundles_from<E, X>(
    &self,
    node: NodeId,
    enter: &mut E,
    exit: &mut X,
    visited: &mut HashSet<NodeId>,
  ) where
    E: FnMut(NodeId, &Bundle),
    X: FnMut(NodeId, &Bundle),
  {
    if !visited.insert(node) {
      return;
    }

    if let BundleGraphNode::Bundle(bundle) = &self.nodes[node] {
      enter(node, bundle);
    }

    for child in self.outgoing(node, BundleGraphEdgeType::Bundle) {
      self.traverse_bundles_from(child, enter, exit, visited);
    }

    if let BundleGraphNode::Bundle(bundle) = &self.nodes[node] {
      exit(node, bundle);
    }
  }

  /// All reachable bundles in traversal preorder.
  pub fn bundles(&self) -> Vec<NodeId> {
    let mut bundles = Vec::new();
    self.traverse_bundles(&mut |node, _| bundles.push(node), &mut |_, _| {});
    bundles
  }

  /// All reachable bundles in traversal postorder, deepest first.
  pub fn bundles_postorder(&self) -> Vec<NodeId> {
    let mut bundles = Vec::new();
    self.traverse_bundles(&mut |_, _| {}, &mut |node, _| bundles.push(node));
    bundles
  }

  /// All reachable bundle groups in traversal preorder.
  pub fn bundle_groups(&self) -> Vec<NodeId> {
    let mut groups = Vec::new();
    let mut visited = HashSet::new();
    let mut stack = vec![self.root_node_id];
    while let Some(node) = stack.pop() {
      if !visited.insert(node) {
        continue;
      }
      if matches!(self.nodes[node], BundleGraphNode::BundleGroup(_)) {
        groups.push(node);
      }
      let mut children = self.outgoing(node, BundleGraphEdgeType::Bundle);
      children.reverse();
      stack.extend(children);
    }
    groups
  }

  // ----------------------------
  // Queries
  // ----------------------------

  /// The assets a dependency resolves to, in resolution order.
  pub fn get_dependency_assets(&self, dependency: NodeId) -> Vec<NodeId> {
    self
      .asset_graph_children(dependency)
      .into_iter()
      .filter(|&node| matches!(self.nodes[node], BundleGraphNode::Asset(_)))
      .collect()
  }

  /// The primary asset a dependency resolves to.
  pub fn get_dependency_resolution(&self, dependency: NodeId) -> Option<NodeId> {
    self.get_dependency_assets(dependency).into_iter().next()
  }

  /// The dependencies declared by an asset, in declaration order.
  pub fn get_asset_dependencies(&self, asset: NodeId) -> Vec<NodeId> {
    self
      .asset_graph_children(asset)
      .into_iter()
      .filter(|&node| matches!(self.nodes[node], BundleGraphNode::Dependency(_)))
      .collect()
  }

  /// What the dependency resolves to outside its own bundle: the bundle
  /// group it loads, or an asset referenced in a sibling bundle.
  pub fn resolve_external_dependency(&self, dependency: NodeId) -> Option<ExternalResolution> {
    let references = self.outgoing(dependency, BundleGraphEdgeType::References);

    for node in &references {
      if matches!(self.nodes[*node], BundleGraphNode::BundleGroup(_)) {
        return Some(ExternalResolution::BundleGroup(*node));
      }
    }
    for node in references {
      if matches!(self.nodes[node], BundleGraphNode::Asset(_)) {
        return Some(ExternalResolution::Asset(node));
      }
    }
    None
  }

  pub fn find_bundles_with_asset(&self, asset: NodeId) -> Vec<NodeId> {
    self
      .incoming(asset, BundleGraphEdgeType::Contains)
      .into_iter()
      .filter(|&node| matches!(self.nodes[node], BundleGraphNode::Bundle(_)))
      .collect()
  }

  pub fn find_bundles_with_dependency(&self, dependency: NodeId) -> Vec<NodeId> {
    self
      .incoming(dependency, BundleGraphEdgeType::Contains)
      .into_iter()
      .filter(|&node| matches!(self.nodes[node], BundleGraphNode::Bundle(_)))
      .collect()
  }

  pub fn get_bundle_groups_containing_bundle(&self, bundle: NodeId) -> Vec<NodeId> {
    self
      .incoming(bundle, BundleGraphEdgeType::Bundle)
      .into_iter()
      .filter(|&node| matches!(self.nodes[node], BundleGraphNode::BundleGroup(_)))
      .collect()
  }

  pub fn get_bundles_in_bundle_group(&self, group: NodeId) -> Vec<NodeId> {
    self
      .outgoing(group, BundleGraphEdgeType::Bundle)
      .into_iter()
      .filter(|&node| matches!(self.nodes[node], BundleGraphNode::Bundle(_)))
      .collect()
  }

  /// Bundles whose contents load this group. Entry groups hang off the
  /// root instead and have no parent bundles.
  pub fn get_parent_bundles_of_bundle_group(&self, group: NodeId) -> Vec<NodeId> {
    self
      .incoming(group, BundleGraphEdgeType::Bundle)
      .into_iter()
      .filter(|&node| matches!(self.nodes[node], BundleGraphNode::Bundle(_)))
      .collect()
  }

  /// Bundles sharing a bundle group with the given bundle.
  pub fn get_sibling_bundles(&self, bundle: NodeId) -> Vec<NodeId> {
    let mut siblings = Vec::new();
    for group in self.get_bundle_groups_containing_bundle(bundle) {
      for member in self.get_bundles_in_bundle_group(group) {
        if member != bundle && !siblings.contains(&member) {
          siblings.push(member);
        }
      }
    }
    siblings
  }

  pub fn bundle_has_asset(&self, bundle: NodeId, asset: NodeId) -> bool {
    self.has_edge(bundle, asset, BundleGraphEdgeType::Contains)
  }

  pub fn bundle_has_dependency(&self, bundle: NodeId, dependency: NodeId) -> bool {
    self.has_edge(bundle, dependency, BundleGraphEdgeType::Contains)
  }

  pub fn get_main_entry(&self, bundle: NodeId) -> Option<NodeId> {
    let main_entry_id = self.get_bundle(bundle)?.main_entry_id.clone()?;
    self.get_node_id_by_content_key(&main_entry_id).copied()
  }

  /// The assets attached to the bundle as roots, in attach order.
  pub fn get_bundle_roots(&self, bundle: NodeId) -> Vec<NodeId> {
    self.bundle_roots.get(&bundle).cloned().unwrap_or_default()
  }

  pub fn get_bundle_assets(&self, bundle: NodeId) -> Vec<NodeId> {
    self
      .outgoing(bundle, BundleGraphEdgeType::Contains)
      .into_iter()
      .filter(|&node| matches!(self.nodes[node], BundleGraphNode::Asset(_)))
      .collect()
  }

  pub fn get_dependencies_in_bundle(&self, bundle: NodeId) -> Vec<NodeId> {
    self
      .outgoing(bundle, BundleGraphEdgeType::Contains)
      .into_iter()
      .filter(|&node| matches!(self.nodes[node], BundleGraphNode::Dependency(_)))
      .collect()
  }

  /// Whether every load path to the bundle already provides the asset
  /// somewhere above it. Only then is it safe to drop the asset from the
  /// bundle itself.
  pub fn is_asset_in_ancestor_bundles(&self, bundle: NodeId, asset: NodeId) -> bool {
    let mut parents: Vec<NodeId> = Vec::new();
    for group in self.get_bundle_groups_containing_bundle(bundle) {
      for source in self.incoming(group, BundleGraphEdgeType::Bundle) {
        if !parents.contains(&source) {
          parents.push(source);
        }
      }
    }

    if parents.is_empty() {
      return false;
    }

    parents.iter().all(|&parent| {
      if parent == self.root_node_id {
        return false;
      }
      self.ancestor_chain_provides(parent, asset, bundle)
    })
  }

  /// Whether any bundle on the ancestor chain starting at `start`
  /// (inclusive) contains the asset, ignoring `exclude`.
  fn ancestor_chain_provides(&self, start: NodeId, asset: NodeId, exclude: NodeId) -> bool {
    let mut visited = HashSet::new();
    let mut stack = vec![start];

    while let Some(node) = stack.pop() {
      if !visited.insert(node) {
        continue;
      }
      if node != exclude && self.bundle_has_asset(node, asset) {
        return true;
      }
      for group in self.get_bundle_groups_containing_bundle(node) {
        for source in self.incoming(group, BundleGraphEdgeType::Bundle) {
          if source != self.root_node_id {
            stack.push(source);
          }
        }
      }
    }

    false
  }

  /// The summed size of the asset and everything reachable from it within
  /// the same bundle boundary.
  pub fn get_total_size(&self, asset: NodeId) -> u64 {
    let mut total: u64 = 0;
    let mut visited = HashSet::new();
    let mut stack = vec![asset];

    while let Some(node) = stack.pop() {
      if !visited.insert(node) {
        continue;
      }
      match &self.nodes[node] {
        BundleGraphNode::Asset(asset) => {
          total += u64::from(asset.stats.size);
          stack.extend(self.asset_graph_children(node));
        }
        BundleGraphNode::Dependency(_) => {
          stack.extend(self.dependency_local_children(node));
        }
        _ => {}
      }
    }

    total
  }

  // ----------------------------
  // Mutations
  // ----------------------------

  /// Opens a bundle group for the given dependency under the target. The
  /// dependency must already be resolved.
  pub fn create_bundle_group(
    &mut self,
    dependency: NodeId,
    target: Target,
  ) -> anyhow::Result<NodeId> {
    let resolved = self
      .get_dependency_resolution(dependency)
      .ok_or_else(|| anyhow!("cannot create a bundle group for an unresolved dependency"))?;
    let entry_asset_id = self
      .get_asset(resolved)
      .ok_or_else(|| anyhow!("dependency resolution is not an asset"))?
      .id
      .clone();

    let is_entry = self
      .get_dependency(dependency)
      .is_some_and(|dependency| dependency.is_entry);

    let group = BundleGroup {
      target,
      entry_asset_id,
    };
    let group_node = self.add_node(group.id(), BundleGraphNode::BundleGroup(group));

    self.add_edge(dependency, group_node, BundleGraphEdgeType::References);
    if is_entry {
      let root = self.root_node_id;
      self.add_edge(root, group_node, BundleGraphEdgeType::Bundle);
    }

    Ok(group_node)
  }

  /// Creates a bundle rooted at an asset. Type, environment and
  /// splittability come from the asset itself. Creating the same bundle
  /// twice yields the existing node.
  pub fn create_bundle(
    &mut self,
    entry_asset: NodeId,
    target: Target,
    is_entry: bool,
    is_inline: bool,
  ) -> anyhow::Result<NodeId> {
    let asset = self
      .get_asset(entry_asset)
      .ok_or_else(|| anyhow!("bundle entry must be an asset node"))?;

    let bundle = Bundle {
      id: create_bundle_id(&asset.id, &target),
      public_id: None,
      file_type: asset.file_type.clone(),
      env: asset.env.clone(),
      main_entry_id: Some(asset.id.clone()),
      target,
      is_entry,
      is_inline,
      is_splittable: asset.is_bundle_splittable,
      unique_key: None,
    };

    Ok(self.insert_bundle(bundle))
  }

  /// Creates a generated bundle identified by a stable unique key rather
  /// than an entry asset, e.g. for shared code extracted by the optimizer.
  pub fn create_shared_bundle(
    &mut self,
    unique_key: String,
    file_type: FileType,
    env: Arc<Environment>,
    target: Target,
  ) -> NodeId {
    let bundle = Bundle {
      id: create_bundle_id(&unique_key, &target),
      public_id: None,
      file_type,
      env,
      main_entry_id: None,
      target,
      is_entry: false,
      is_inline: false,
      is_splittable: true,
      unique_key: Some(unique_key),
    };

    self.insert_bundle(bundle)
  }

  fn insert_bundle(&mut self, mut bundle: Bundle) -> NodeId {
    if let Some(existing) = self.content_key_to_node_id.get(&bundle.id) {
      return *existing;
    }

    let public_id = generate_public_id(&bundle.id, |candidate| {
      self.bundle_public_ids.contains(candidate)
    });
    self.bundle_public_ids.insert(public_id.clone());
    bundle.public_id = Some(public_id);

    let content_key = bundle.id.clone();
    let node_id = self.add_node(content_key, BundleGraphNode::Bundle(bundle));
    self.bundle_roots.insert(node_id, Vec::new());
    node_id
  }

  pub fn add_bundle_to_bundle_group(&mut self, bundle: NodeId, group: NodeId) {
    self.add_edge(group, bundle, BundleGraphEdgeType::Bundle);
  }

  /// Attaches an asset and its reachable subgraph to a bundle. Traversal
  /// stops at split points; groups loaded from inside the subgraph are
  /// linked to the bundle instead.
  pub fn add_asset_graph_to_bundle(&mut self, asset: NodeId, bundle: NodeId) {
    let roots = self.bundle_roots.entry(bundle).or_default();
    if !roots.contains(&asset) {
      roots.push(asset);
    }

    let mut visited = HashSet::new();
    let mut stack = vec![asset];

    while let Some(node) = stack.pop() {
      if !visited.insert(node) {
        continue;
      }
      if matches!(self.nodes[node], BundleGraphNode::Asset(_)) {
        self.add_edge(bundle, node, BundleGraphEdgeType::Contains);
        let mut children = self.asset_graph_children(node);
        children.reverse();
        stack.extend(children);
      } else if matches!(self.nodes[node], BundleGraphNode::Dependency(_)) {
        self.add_edge(bundle, node, BundleGraphEdgeType::Contains);
        for referenced in self.outgoing(node, BundleGraphEdgeType::References) {
          if matches!(self.nodes[referenced], BundleGraphNode::BundleGroup(_)) {
            self.add_edge(bundle, referenced, BundleGraphEdgeType::Bundle);
          }
        }
        let mut children = self.dependency_local_children(node);
        children.reverse();
        stack.extend(children);
      }
    }
  }

  /// Removes an asset and its reachable subgraph from a bundle, stopping
  /// wherever containment already ends.
  pub fn remove_asset_graph_from_bundle(&mut self, asset: NodeId, bundle: NodeId) {
    if let Some(roots) = self.bundle_roots.get_mut(&bundle) {
      roots.retain(|root| *root != asset);
    }

    let mut visited = HashSet::new();
    let mut stack = vec![asset];

    while let Some(node) = stack.pop() {
      if !visited.insert(node) {
        continue;
      }
      if !self.has_edge(bundle, node, BundleGraphEdgeType::Contains) {
        continue;
      }
      self.remove_edge(bundle, node, BundleGraphEdgeType::Contains);

      if matches!(self.nodes[node], BundleGraphNode::Asset(_)) {
        let mut children = self.asset_graph_children(node);
        children.reverse();
        stack.extend(children);
      } else if matches!(self.nodes[node], BundleGraphNode::Dependency(_)) {
        self.remove_external_dependency(bundle, node);
        let mut children = self.dependency_local_children(node);
        children.reverse();
        stack.extend(children);
      }
    }
  }

  /// Records that a dependency resolves to an asset placed in a different
  /// bundle of the same group.
  pub fn create_asset_reference(&mut self, dependency: NodeId, asset: NodeId) {
    self.add_edge(dependency, asset, BundleGraphEdgeType::References);
  }

  /// Marks an async dependency as resolving within the bundle itself, so
  /// no bundle group has to be loaded for it there.
  pub fn internalize_async_dependency(&mut self, bundle: NodeId, dependency: NodeId) {
    self.add_edge(bundle, dependency, BundleGraphEdgeType::InternalAsync);
    self.remove_external_dependency(bundle, dependency);
  }

  pub fn is_dependency_internalized(&self, bundle: NodeId, dependency: NodeId) -> bool {
    self.has_edge(bundle, dependency, BundleGraphEdgeType::InternalAsync)
  }

  /// Drops the bundle's link to the groups a dependency loads, unless
  /// another contained dependency still loads them.
  fn remove_external_dependency(&mut self, bundle: NodeId, dependency: NodeId) {
    for group in self.outgoing(dependency, BundleGraphEdgeType::References) {
      if !matches!(self.nodes[group], BundleGraphNode::BundleGroup(_)) {
        continue;
      }

      let still_referenced = self
        .incoming(group, BundleGraphEdgeType::References)
        .into_iter()
        .any(|other| other != dependency && self.bundle_has_dependency(bundle, other));

      if !still_referenced {
        self.remove_edge(bundle, group, BundleGraphEdgeType::Bundle);
      }
    }
  }

  /// Removes a bundle group node and all of its edges. Member bundles are
  /// left in place; ones without any remaining group become unreachable.
  pub fn remove_bundle_group(&mut self, group: NodeId) {
    let Some(bundle_group) = self.get_bundle_group(group) else {
      return;
    };
    let content_key = bundle_group.id();

    if let Some(node_index) = self.node_id_to_node_index.remove(&group) {
      self.graph.remove_node(node_index);
    }
    self.content_key_to_node_id.remove(&content_key);
    debug!(group = %content_key, "removed orphaned bundle group");
  }

  /// Flags an asset as needing a module closure at packaging time.
  pub fn set_asset_should_wrap(&mut self, node: NodeId) {
    if let Some(BundleGraphNode::Asset(asset)) = self.nodes.get_mut(node) {
      Arc::make_mut(asset).set_should_wrap();
    }
  }
}

const BASE62_ALPHABET: &[u8] = b"0123456789abcdefghijklmnopqrstuvwxyzABCDEFGHIJKLMNOPQRSTUVWXYZ";

fn base62_encode(bytes: &[u8]) -> String {
  if bytes.is_empty() {
    return String::new();
  }

  let mut num = bytes.iter().fold(0u128, |acc, &b| acc * 256 + b as u128);
  if num == 0 {
    return "0".to_string();
  }

  let mut result = Vec::new();
  while num > 0 {
    let remainder = (num % 62) as usize;
    result.push(BASE62_ALPHABET[remainder]);
    num /= 62;
  }

  result.reverse();
  String::from_utf8(result).unwrap_or_default()
}

/// Derives a short client-facing id from a bundle's hash id, extending it
/// until it no longer collides with an already-assigned public id.
pub fn generate_public_id<F>(id: &str, already_exists: F) -> String
where
  F: Fn(&str) -> bool,
{
  let mut bytes = Vec::with_capacity(id.len() / 2);
  let mut i = 0;
  while i + 1 < id.len() {
    if let Ok(b) = u8::from_str_radix(&id[i..i + 2], 16) {
      bytes.push(b);
    }
    i += 2;
  }

  let encoded = base62_encode(&bytes);

  for end in 5..=encoded.len() {
    let candidate = &encoded[..end];
    if !already_exists(candidate) {
      return candidate.to_string();
    }
  }

  panic!("Original id was not unique: {}", id);
}
