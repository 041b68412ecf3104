//! Lineage Tree
//!
//! A closed-world tree of lineage identifiers loaded once from a YAML
//! definition file. Nodes may carry aliases (alternative names resolving to
//! the same node) and multiple parents (recombinants). Construction fails
//! on duplicate names, edges to undefined parents, and directed cycles;
//! the cycle error carries one witness printed as `a -> b -> ... -> a`.
//!
//! Query evaluation uses the tree to expand a lineage into its sublineage
//! clade under a recombinant-edge following mode.

use std::collections::{HashMap, HashSet};
use std::path::Path;

use serde::Deserialize;
use thiserror::Error;

use crate::common::BidirectionalMap;

/// Policy for whether clade expansion crosses recombinant edges.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum SublineageMode {
    /// Never include recombinant descendants.
    #[default]
    DoNotFollow,
    /// Include a recombinant only once all of its parents are in the clade.
    FollowIfFullyContainedInClade,
    /// Include recombinant descendants unconditionally.
    AlwaysFollow,
}

/// One entry of the lineage definition file.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LineageDefinitionEntry {
    pub lineage_name: String,
    #[serde(default)]
    pub aliases: Vec<String>,
    #[serde(default)]
    pub parents: Vec<String>,
}

/// Errors raised while loading a lineage definition file.
#[derive(Error, Debug)]
pub enum LineageError {
    #[error("the lineage definitions contain the duplicate lineage '{0}'")]
    DuplicateLineage(String),

    #[error("the alias '{alias}' for lineage '{lineage}' is already defined as a lineage or another alias")]
    DuplicateAlias { alias: String, lineage: String },

    #[error("the lineage '{parent}' specified as a parent of '{child}' does not have a definition itself")]
    UnknownParent { parent: String, child: String },

    #[error("the lineage definitions contain the cycle: {0}")]
    Cycle(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

/// The loaded lineage tree with alias resolution.
#[derive(Debug, Clone, Default)]
pub struct LineageTree {
    /// Lineage names followed by alias names, densely numbered.
    lookup: BidirectionalMap<String>,
    /// Alias id -> canonical lineage id.
    alias_of: HashMap<u32, u32>,
    /// Canonical id -> parent canonical ids. Multiple parents = recombinant.
    parents: Vec<Vec<u32>>,
    /// Canonical id -> child canonical ids.
    children: Vec<Vec<u32>>,
}

impl LineageTree {
    pub fn from_file(path: &Path) -> Result<Self, LineageError> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_yaml_str(&contents)
    }

    pub fn from_yaml_str(yaml: &str) -> Result<Self, LineageError> {
        let entries: Vec<LineageDefinitionEntry> = serde_yaml::from_str(yaml)?;
        Self::from_entries(&entries)
    }

    pub fn from_entries(entries: &[LineageDefinitionEntry]) -> Result<Self, LineageError> {
        let mut lookup = BidirectionalMap::new();

        // pass 1: lineage names get the canonical ids 0..entries.len()
        for entry in entries {
            if lookup.id_of(&entry.lineage_name).is_some() {
                return Err(LineageError::DuplicateLineage(entry.lineage_name.clone()));
            }
            lookup.get_or_insert(&entry.lineage_name);
        }

        // pass 2: aliases get ids past the canonical range
        let mut alias_of = HashMap::new();
        for entry in entries {
            let lineage_id = lookup
                .id_of(&entry.lineage_name)
                .expect("lineage interned in pass 1");
            for alias in &entry.aliases {
                if lookup.id_of(alias).is_some() {
                    return Err(LineageError::DuplicateAlias {
                        alias: alias.clone(),
                        lineage: entry.lineage_name.clone(),
                    });
                }
                let alias_id = lookup.get_or_insert(alias);
                alias_of.insert(alias_id, lineage_id);
            }
        }

        // pass 3: parent edges, resolving parents given by alias
        let vertex_count = entries.len();
        let mut edges: Vec<(u32, u32)> = Vec::new();
        for entry in entries {
            let child_id = lookup
                .id_of(&entry.lineage_name)
                .expect("lineage interned in pass 1");
            for parent in &entry.parents {
                let parent_id = lookup.id_of(parent).ok_or_else(|| {
                    LineageError::UnknownParent {
                        parent: parent.clone(),
                        child: entry.lineage_name.clone(),
                    }
                })?;
                let parent_id = *alias_of.get(&parent_id).unwrap_or(&parent_id);
                edges.push((parent_id, child_id));
            }
        }

        if let Some(cycle) = find_cycle(vertex_count, &edges) {
            let witness = cycle
                .iter()
                .map(|id| lookup.value(*id).as_str())
                .collect::<Vec<_>>()
                .join(" -> ");
            return Err(LineageError::Cycle(witness));
        }

        let mut parents = vec![Vec::new(); vertex_count];
        let mut children = vec![Vec::new(); vertex_count];
        for &(parent_id, child_id) in &edges {
            parents[child_id as usize].push(parent_id);
            children[parent_id as usize].push(child_id);
        }

        Ok(LineageTree {
            lookup,
            alias_of,
            parents,
            children,
        })
    }

    /// Resolve a name (lineage or alias) to its canonical lineage id.
    pub fn resolve(&self, name: &str) -> Option<u32> {
        let id = self.lookup.id_of(&name.to_string())?;
        Some(*self.alias_of.get(&id).unwrap_or(&id))
    }

    /// Canonical name of a lineage id.
    pub fn name_of(&self, id: u32) -> &str {
        self.lookup.value(id)
    }

    pub fn is_recombinant(&self, id: u32) -> bool {
        self.parents[id as usize].len() > 1
    }

    /// The clade rooted at `root`: the root plus every descendant reachable
    /// under `mode`. Recombinant nodes are admitted per the mode; expansion
    /// iterates to a fixpoint so a recombinant whose parents all eventually
    /// join the clade is still admitted under
    /// [`SublineageMode::FollowIfFullyContainedInClade`].
    pub fn clade_of(&self, root: u32, mode: SublineageMode) -> Vec<u32> {
        let mut clade: HashSet<u32> = HashSet::new();
        clade.insert(root);
        loop {
            let mut admitted = Vec::new();
            for &node in &clade {
                for &child in &self.children[node as usize] {
                    if clade.contains(&child) || admitted.contains(&child) {
                        continue;
                    }
                    let include = if !self.is_recombinant(child) {
                        true
                    } else {
                        match mode {
                            SublineageMode::DoNotFollow => false,
                            SublineageMode::AlwaysFollow => true,
                            SublineageMode::FollowIfFullyContainedInClade => self.parents
                                [child as usize]
                                .iter()
                                .all(|parent| clade.contains(parent)),
                        }
                    };
                    if include {
                        admitted.push(child);
                    }
                }
            }
            if admitted.is_empty() {
                break;
            }
            clade.extend(admitted);
        }
        let mut result: Vec<u32> = clade.into_iter().collect();
        result.sort_unstable();
        result
    }
}

/// Detect a directed cycle, returning one witness of the form
/// `[a, b, ..., a]`. Iterative DFS carrying an on-stack flag per vertex;
/// on finding a back-edge the recursion stack is truncated to the cycle.
fn find_cycle(vertex_count: usize, edges: &[(u32, u32)]) -> Option<Vec<u32>> {
    let mut adjacency = vec![Vec::new(); vertex_count];
    for &(from, to) in edges {
        adjacency[from as usize].push(to);
    }

    let mut visited = vec![false; vertex_count];
    for start in 0..vertex_count as u32 {
        if visited[start as usize] {
            continue;
        }
        if let Some(lasso) = find_lasso(start, &adjacency, &mut visited) {
            // the lasso 1 -> 2 -> 3 -> 4 -> 3 is trimmed to 3 -> 4 -> 3
            let cycle_entry = *lasso.last().expect("lasso ends in its cycle vertex");
            let entry_index = lasso
                .iter()
                .position(|&vertex| vertex == cycle_entry)
                .expect("cycle vertex occurs earlier in the lasso");
            return Some(lasso[entry_index..].to_vec());
        }
    }
    None
}

fn find_lasso(
    start: u32,
    adjacency: &[Vec<u32>],
    visited: &mut [bool],
) -> Option<Vec<u32>> {
    let mut stack = vec![start];
    let mut on_stack = vec![false; adjacency.len()];
    on_stack[start as usize] = true;
    visited[start as usize] = true;

    while let Some(&current) = stack.last() {
        let mut backtrack = true;
        for &neighbor in &adjacency[current as usize] {
            if on_stack[neighbor as usize] {
                stack.push(neighbor);
                return Some(stack);
            }
            if !visited[neighbor as usize] {
                visited[neighbor as usize] = true;
                on_stack[neighbor as usize] = true;
                stack.push(neighbor);
                backtrack = false;
                break;
            }
        }
        if backtrack {
            let popped = stack.pop().expect("stack is non-empty");
            on_stack[popped as usize] = false;
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tree(yaml: &str) -> LineageTree {
        LineageTree::from_yaml_str(yaml).expect("valid lineage definitions")
    }

    const PANGO_SAMPLE: &str = "\
- lineage_name: A
- lineage_name: A.1
  parents: [A]
- lineage_name: A.2
  parents: [A]
- lineage_name: B
  aliases: [A.1.1]
  parents: [A.1]
- lineage_name: XA
  parents: [A.1, A.2]
";

    #[test]
    fn resolves_aliases_to_canonical_ids() {
        let tree = tree(PANGO_SAMPLE);
        assert_eq!(tree.resolve("B"), tree.resolve("A.1.1"));
        assert_ne!(tree.resolve("B"), tree.resolve("A.1"));
        assert_eq!(tree.resolve("C"), None);
    }

    #[test]
    fn clade_excludes_recombinants_by_default() {
        let tree = tree(PANGO_SAMPLE);
        let root = tree.resolve("A.1").expect("A.1 defined");
        let clade = tree.clade_of(root, SublineageMode::DoNotFollow);
        let names: Vec<&str> = clade.iter().map(|id| tree.name_of(*id)).collect();
        assert_eq!(names, vec!["A.1", "B"]);
    }

    #[test]
    fn clade_follows_recombinants_when_asked() {
        let tree = tree(PANGO_SAMPLE);
        let root = tree.resolve("A.1").expect("A.1 defined");
        let clade = tree.clade_of(root, SublineageMode::AlwaysFollow);
        let names: Vec<&str> = clade.iter().map(|id| tree.name_of(*id)).collect();
        assert_eq!(names, vec!["A.1", "B", "XA"]);
    }

    #[test]
    fn recombinant_joins_once_all_parents_are_contained() {
        let tree = tree(PANGO_SAMPLE);
        let mode = SublineageMode::FollowIfFullyContainedInClade;

        // from A.1 only one XA parent is in the clade
        let partial = tree.resolve("A.1").expect("A.1 defined");
        let names: Vec<&str> = tree
            .clade_of(partial, mode)
            .iter()
            .map(|id| tree.name_of(*id))
            .collect();
        assert!(!names.contains(&"XA"));

        // from A both parents are, so XA joins
        let full = tree.resolve("A").expect("A defined");
        let names: Vec<&str> = tree
            .clade_of(full, mode)
            .iter()
            .map(|id| tree.name_of(*id))
            .collect();
        assert!(names.contains(&"XA"));
    }

    #[test]
    fn duplicate_lineage_is_rejected() {
        let result = LineageTree::from_yaml_str("- lineage_name: A\n- lineage_name: A\n");
        assert!(matches!(result, Err(LineageError::DuplicateLineage(name)) if name == "A"));
    }

    #[test]
    fn alias_colliding_with_lineage_is_rejected() {
        let yaml = "- lineage_name: A\n- lineage_name: B\n  aliases: [A]\n";
        assert!(matches!(
            LineageTree::from_yaml_str(yaml),
            Err(LineageError::DuplicateAlias { .. })
        ));
    }

    #[test]
    fn unknown_parent_is_rejected() {
        let yaml = "- lineage_name: A\n  parents: [Z]\n";
        assert!(matches!(
            LineageTree::from_yaml_str(yaml),
            Err(LineageError::UnknownParent { .. })
        ));
    }

    #[test]
    fn cycle_error_prints_a_witness() {
        let yaml = "\
- lineage_name: A
  parents: [C]
- lineage_name: B
  parents: [A]
- lineage_name: C
  parents: [B]
";
        match LineageTree::from_yaml_str(yaml) {
            Err(LineageError::Cycle(witness)) => {
                let names: Vec<&str> = witness.split(" -> ").collect();
                assert!(names.len() == 4, "witness should close the loop: {witness}");
                assert_eq!(names.first(), names.last());
            }
            other => panic!("expected cycle error, got {other:?}"),
        }
    }

    #[test]
    fn parent_specified_by_alias_resolves() {
        let yaml = "\
- lineage_name: A
  aliases: [root]
- lineage_name: B
  parents: [root]
";
        let tree = tree(yaml);
        let root = tree.resolve("A").expect("A defined");
        let clade = tree.clade_of(root, SublineageMode::DoNotFollow);
        assert_eq!(clade.len(), 2);
    }
}
