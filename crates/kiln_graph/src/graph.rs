//! The module dependency graph.

use std::collections::{BTreeSet, HashMap, HashSet, VecDeque};
use std::path::PathBuf;

use kiln_common::{ArtifactKey, ContentHash, ModuleId};
use serde::{Deserialize, Serialize};

use crate::node::{dedup_ordered, ModuleNode, ModuleStatus};

/// Edges added and removed by a dependency-list update.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DependencyChange {
    /// Dependencies not referenced before the update.
    pub added: Vec<ModuleId>,
    /// Dependencies no longer referenced after the update.
    pub removed: Vec<ModuleId>,
    /// Placeholders created for dependencies that were not in the graph.
    pub created: Vec<ModuleId>,
    /// Whether the ordered dependency list differs from before.
    pub reordered: bool,
}

impl DependencyChange {
    /// Returns `true` if the ordered dependency list changed at all.
    pub fn is_changed(&self) -> bool {
        self.reordered || !self.added.is_empty() || !self.removed.is_empty()
    }
}

/// Serializable form of the graph, used to persist it between runs.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GraphSnapshot {
    /// All nodes, sorted by id.
    pub nodes: Vec<ModuleNode>,
    /// Registered entry points, sorted.
    pub entry_points: Vec<ModuleId>,
}

/// Directed graph of modules and their "depends on" edges.
///
/// Forward edges live on each node as an ordered dependency list; reverse
/// edges are kept in a separate index that is updated on every mutation so it
/// is always the exact transpose of the forward edges. Every edge endpoint is
/// either a read node or a [`ModuleStatus::Pending`] placeholder.
///
/// Cycles are allowed. Traversals guard against them with a visited set.
#[derive(Debug, Default)]
pub struct DependencyGraph {
    nodes: HashMap<ModuleId, ModuleNode>,
    reverse: HashMap<ModuleId, HashSet<ModuleId>>,
    entry_points: BTreeSet<ModuleId>,
}

impl DependencyGraph {
    /// Creates an empty graph.
    pub fn new() -> Self {
        Self::default()
    }

    /// Replaces a node's data and dependency list.
    ///
    /// Stale reverse edges are removed before new ones are added. Unknown
    /// dependencies get placeholder nodes. Returns `true` if the content or
    /// config hash differs from the previous values (always `true` for nodes
    /// that were absent or placeholders).
    pub fn upsert_node(
        &mut self,
        id: &ModuleId,
        path: PathBuf,
        content_hash: ContentHash,
        config_hash: ContentHash,
        dependency_ids: Vec<ModuleId>,
    ) -> bool {
        let changed = self.set_content(id, path, content_hash, config_hash);
        self.set_dependencies(id, dependency_ids);
        changed
    }

    /// Updates a node's content and config hashes, creating the node if needed.
    ///
    /// The dependency list is left untouched. Returns `true` if either hash
    /// differs from before.
    pub fn set_content(
        &mut self,
        id: &ModuleId,
        path: PathBuf,
        content_hash: ContentHash,
        config_hash: ContentHash,
    ) -> bool {
        let node = self
            .nodes
            .entry(id.clone())
            .or_insert_with(|| ModuleNode::placeholder(id.clone()));
        let changed =
            node.content_hash != Some(content_hash) || node.config_hash != Some(config_hash);
        node.path = path;
        node.content_hash = Some(content_hash);
        node.config_hash = Some(config_hash);
        changed
    }

    /// Replaces a node's ordered dependency list, keeping reverse edges in sync.
    ///
    /// Duplicates are dropped (first occurrence wins). The node is created as
    /// a placeholder if it does not exist.
    pub fn set_dependencies(&mut self, id: &ModuleId, dependency_ids: Vec<ModuleId>) -> DependencyChange {
        let new_deps = dedup_ordered(dependency_ids);
        let old_deps = self
            .nodes
            .entry(id.clone())
            .or_insert_with(|| ModuleNode::placeholder(id.clone()))
            .dependency_ids
            .clone();

        let mut change = DependencyChange {
            reordered: old_deps != new_deps,
            ..DependencyChange::default()
        };

        // Removal first: readers never observe a reverse edge for a
        // dependency the node no longer has.
        for old in &old_deps {
            if !new_deps.contains(old) {
                if let Some(dependents) = self.reverse.get_mut(old) {
                    dependents.remove(id);
                    if dependents.is_empty() {
                        self.reverse.remove(old);
                    }
                }
                change.removed.push(old.clone());
            }
        }

        for dep in &new_deps {
            if !self.nodes.contains_key(dep) {
                self.nodes
                    .insert(dep.clone(), ModuleNode::placeholder(dep.clone()));
                change.created.push(dep.clone());
            }
            self.reverse
                .entry(dep.clone())
                .or_default()
                .insert(id.clone());
            if !old_deps.contains(dep) {
                change.added.push(dep.clone());
            }
        }

        if let Some(node) = self.nodes.get_mut(id) {
            node.dependency_ids = new_deps;
        }
        change
    }

    /// Removes a node and every edge touching it. Absent ids are ignored.
    ///
    /// Dependents lose the removed module from their dependency lists; they
    /// rediscover it (as a placeholder) the next time they are transformed.
    pub fn remove_node(&mut self, id: &ModuleId) {
        let Some(node) = self.nodes.remove(id) else {
            return;
        };
        for dep in &node.dependency_ids {
            if let Some(dependents) = self.reverse.get_mut(dep) {
                dependents.remove(id);
                if dependents.is_empty() {
                    self.reverse.remove(dep);
                }
            }
        }
        if let Some(dependents) = self.reverse.remove(id) {
            for dependent in dependents {
                if let Some(n) = self.nodes.get_mut(&dependent) {
                    n.dependency_ids.retain(|d| d != id);
                }
            }
        }
        self.entry_points.remove(id);
    }

    /// Returns the modules that directly depend on `id`.
    pub fn dependents_of(&self, id: &ModuleId) -> BTreeSet<ModuleId> {
        self.reverse
            .get(id)
            .map(|set| set.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Returns the ordered dependency list of `id`.
    pub fn dependencies_of(&self, id: &ModuleId) -> &[ModuleId] {
        self.nodes
            .get(id)
            .map(|n| n.dependency_ids.as_slice())
            .unwrap_or(&[])
    }

    /// Breadth-first traversal over reverse edges starting from `ids`.
    ///
    /// Returns every module reachable through "depended on by" edges,
    /// including the seeds themselves (seeds not in the graph are skipped).
    pub fn transitive_dependents<'a>(
        &self,
        ids: impl IntoIterator<Item = &'a ModuleId>,
    ) -> BTreeSet<ModuleId> {
        let mut visited = BTreeSet::new();
        let mut queue: VecDeque<ModuleId> = VecDeque::new();

        for id in ids {
            if self.nodes.contains_key(id) && visited.insert(id.clone()) {
                queue.push_back(id.clone());
            }
        }

        while let Some(id) = queue.pop_front() {
            if let Some(dependents) = self.reverse.get(&id) {
                for dependent in dependents {
                    if visited.insert(dependent.clone()) {
                        queue.push_back(dependent.clone());
                    }
                }
            }
        }

        visited
    }

    /// Returns the node for `id`.
    pub fn get(&self, id: &ModuleId) -> Option<&ModuleNode> {
        self.nodes.get(id)
    }

    /// Returns `true` if the graph contains `id`.
    pub fn contains(&self, id: &ModuleId) -> bool {
        self.nodes.contains_key(id)
    }

    /// Iterates over all nodes in arbitrary order.
    pub fn nodes(&self) -> impl Iterator<Item = &ModuleNode> {
        self.nodes.values()
    }

    /// Returns all module ids, sorted.
    pub fn ids(&self) -> BTreeSet<ModuleId> {
        self.nodes.keys().cloned().collect()
    }

    /// Number of nodes, placeholders included.
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// Returns `true` if the graph has no nodes.
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Records a good artifact for `id` and marks it with `status`.
    pub fn record_artifact(
        &mut self,
        id: &ModuleId,
        key: ArtifactKey,
        output_hash: ContentHash,
        status: ModuleStatus,
    ) {
        if let Some(node) = self.nodes.get_mut(id) {
            node.artifact_key = Some(key);
            node.output_hash = Some(output_hash);
            node.status = status;
        }
    }

    /// Sets the build status of `id`, keeping its last good artifact.
    pub fn set_status(&mut self, id: &ModuleId, status: ModuleStatus) {
        if let Some(node) = self.nodes.get_mut(id) {
            node.status = status;
        }
    }

    /// Registers `id` as a build entry point.
    pub fn add_entry_point(&mut self, id: ModuleId) {
        self.entry_points.insert(id);
    }

    /// Returns `true` if `id` is a registered entry point.
    pub fn is_entry_point(&self, id: &ModuleId) -> bool {
        self.entry_points.contains(id)
    }

    /// Registered entry points, sorted.
    pub fn entry_points(&self) -> &BTreeSet<ModuleId> {
        &self.entry_points
    }

    /// Returns nodes that cannot be reached from any entry point.
    ///
    /// With no entry points registered nothing is considered unreachable.
    pub fn unreachable_from_entries(&self) -> BTreeSet<ModuleId> {
        if self.entry_points.is_empty() {
            return BTreeSet::new();
        }

        let mut reachable: HashSet<&ModuleId> = HashSet::new();
        let mut queue: VecDeque<&ModuleId> = VecDeque::new();
        for entry in &self.entry_points {
            if self.nodes.contains_key(entry) && reachable.insert(entry) {
                queue.push_back(entry);
            }
        }
        while let Some(id) = queue.pop_front() {
            for dep in self.dependencies_of(id) {
                if reachable.insert(dep) {
                    queue.push_back(dep);
                }
            }
        }

        self.nodes
            .keys()
            .filter(|id| !reachable.contains(id))
            .cloned()
            .collect()
    }

    /// Verifies that reverse edges are the exact transpose of forward edges
    /// and that no edge dangles.
    pub fn check_consistency(&self) -> Result<(), String> {
        for node in self.nodes.values() {
            let deduped = dedup_ordered(node.dependency_ids.iter().cloned());
            if deduped.len() != node.dependency_ids.len() {
                return Err(format!("{} has duplicate dependencies", node.id));
            }
            for dep in &node.dependency_ids {
                if !self.nodes.contains_key(dep) {
                    return Err(format!("{} depends on missing node {dep}", node.id));
                }
                let has_reverse = self
                    .reverse
                    .get(dep)
                    .is_some_and(|set| set.contains(&node.id));
                if !has_reverse {
                    return Err(format!("missing reverse edge {dep} <- {}", node.id));
                }
            }
        }
        for (dep, dependents) in &self.reverse {
            if !self.nodes.contains_key(dep) {
                return Err(format!("reverse edges recorded for missing node {dep}"));
            }
            for dependent in dependents {
                let has_forward = self
                    .nodes
                    .get(dependent)
                    .is_some_and(|n| n.dependency_ids.contains(dep));
                if !has_forward {
                    return Err(format!("phantom reverse edge {dep} <- {dependent}"));
                }
            }
        }
        Ok(())
    }

    /// Captures the graph in serializable form.
    pub fn snapshot(&self) -> GraphSnapshot {
        let mut nodes: Vec<ModuleNode> = self.nodes.values().cloned().collect();
        nodes.sort_by(|a, b| a.id.cmp(&b.id));
        GraphSnapshot {
            nodes,
            entry_points: self.entry_points.iter().cloned().collect(),
        }
    }

    /// Rebuilds a graph from a snapshot, recomputing reverse edges.
    pub fn from_snapshot(snapshot: GraphSnapshot) -> Self {
        let mut graph = Self::new();
        let mut dependency_lists = Vec::with_capacity(snapshot.nodes.len());
        for mut node in snapshot.nodes {
            let deps = std::mem::take(&mut node.dependency_ids);
            dependency_lists.push((node.id.clone(), deps));
            graph.nodes.insert(node.id.clone(), node);
        }
        for (id, deps) in dependency_lists {
            graph.set_dependencies(&id, deps);
        }
        for entry in snapshot.entry_points {
            if graph.nodes.contains_key(&entry) {
                graph.entry_points.insert(entry);
            }
        }
        graph
    }
}
