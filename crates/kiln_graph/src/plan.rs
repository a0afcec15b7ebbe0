//! Ordering a work set into parallel waves of strongly connected components.
//!
//! The planner looks only at edges between members of the work set. Each
//! strongly connected component becomes one unit of work: a lone module is a
//! [`Component::Single`], a group of mutually dependent modules (or a module
//! importing itself) is a [`Component::Cycle`]. Components are then assigned
//! to waves so that every component's dependencies inside the work set sit in
//! an earlier wave; components within one wave are independent of each other.

use std::collections::{BTreeSet, HashMap};

use kiln_common::ModuleId;
use petgraph::algo::tarjan_scc;
use petgraph::graph::{DiGraph, NodeIndex};

use crate::graph::DependencyGraph;

/// One unit of scheduled work.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Component {
    /// A module that is not part of any cycle within the work set.
    Single(ModuleId),
    /// Mutually dependent modules, sorted by id.
    Cycle(Vec<ModuleId>),
}

impl Component {
    /// Member modules of the component.
    pub fn members(&self) -> &[ModuleId] {
        match self {
            Component::Single(id) => std::slice::from_ref(id),
            Component::Cycle(ids) => ids,
        }
    }

    fn first(&self) -> &ModuleId {
        &self.members()[0]
    }
}

/// Plans `work` into waves, dependencies first.
///
/// Ids not present in the graph are ignored.
pub fn plan(graph: &DependencyGraph, work: &BTreeSet<ModuleId>) -> Vec<Vec<Component>> {
    let mut dag: DiGraph<ModuleId, ()> = DiGraph::new();
    let mut index: HashMap<&ModuleId, NodeIndex> = HashMap::new();
    for id in work.iter().filter(|id| graph.contains(id)) {
        index.insert(id, dag.add_node(id.clone()));
    }

    // Edges point from a dependent to its dependency, so Tarjan's postorder
    // yields dependencies before their dependents.
    for (id, &from) in &index {
        for dep in graph.dependencies_of(id) {
            if let Some(&to) = index.get(dep) {
                dag.update_edge(from, to, ());
            }
        }
    }

    let sccs = tarjan_scc(&dag);
    let mut component_of: HashMap<NodeIndex, usize> = HashMap::new();
    for (c, scc) in sccs.iter().enumerate() {
        for &n in scc {
            component_of.insert(n, c);
        }
    }

    let mut levels: Vec<usize> = vec![0; sccs.len()];
    let mut components = Vec::with_capacity(sccs.len());
    for (c, scc) in sccs.iter().enumerate() {
        let mut level = 0;
        for &n in scc {
            for dep in dag.neighbors(n) {
                let dc = component_of[&dep];
                if dc != c {
                    level = level.max(levels[dc] + 1);
                }
            }
        }
        levels[c] = level;

        let is_cycle = scc.len() > 1 || dag.contains_edge(scc[0], scc[0]);
        let component = if is_cycle {
            let mut members: Vec<ModuleId> = scc.iter().map(|&n| dag[n].clone()).collect();
            members.sort();
            Component::Cycle(members)
        } else {
            Component::Single(dag[scc[0]].clone())
        };
        components.push((level, component));
    }

    let depth = levels.iter().copied().max().map_or(0, |m| m + 1);
    let mut waves: Vec<Vec<Component>> = vec![Vec::new(); depth];
    for (level, component) in components {
        waves[level].push(component);
    }
    for wave in &mut waves {
        wave.sort_by(|a, b| a.first().cmp(b.first()));
    }
    waves
}
