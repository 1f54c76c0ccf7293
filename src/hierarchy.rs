use crate::error::{EngineError, Result};
use crate::schema::{CategoryNode, CategoryRecord, GroupRecord};
use log::{debug, warn};
use std::collections::hash_map::DefaultHasher;
use std::collections::{HashMap, HashSet};
use std::hash::{Hash, Hasher};

/// One flat input row, whether it came from a category or a group record.
struct Entry<'a> {
    id: &'a str,
    parent_id: Option<&'a str>,
    name: &'a str,
    type_tags: &'a [String],
    selectable: bool,
}

impl<'a> Entry<'a> {
    fn from_record(record: &'a CategoryRecord) -> Self {
        Self {
            id: &record.id,
            parent_id: record.parent_id.as_deref(),
            name: &record.name,
            type_tags: &record.type_tags,
            selectable: true,
        }
    }

    fn from_group(group: &'a GroupRecord) -> Self {
        Self {
            id: &group.id,
            parent_id: None,
            name: &group.label,
            type_tags: &[],
            selectable: false,
        }
    }
}

/// Reconstructs a forest from flat parent-referenced rows.
///
/// Pass one indexes ids, pass two groups child positions under their parent in
/// input order. Nodes are then assembled bottom-up from a pre-order of the rows
/// reachable from the roots. A root is a row without a parent or whose parent
/// is not part of the input.
struct HierarchyBuilder<'a> {
    entries: Vec<Entry<'a>>,
    index: HashMap<&'a str, usize>,
    children: HashMap<&'a str, Vec<usize>>,
    roots: Vec<usize>,
}

impl<'a> HierarchyBuilder<'a> {
    fn new(entries: Vec<Entry<'a>>) -> Result<Self> {
        let mut index = HashMap::with_capacity(entries.len());
        for (position, entry) in entries.iter().enumerate() {
            if index.insert(entry.id, position).is_some() {
                return Err(EngineError::DuplicateRecordId(entry.id.to_string()));
            }
        }

        let mut children: HashMap<&'a str, Vec<usize>> = HashMap::new();
        let mut roots = Vec::new();
        for (position, entry) in entries.iter().enumerate() {
            match entry.parent_id {
                Some(parent) if index.contains_key(parent) => {
                    children.entry(parent).or_default().push(position);
                }
                _ => roots.push(position),
            }
        }

        Ok(Self {
            entries,
            index,
            children,
            roots,
        })
    }

    fn build(&self) -> Result<Vec<CategoryNode>> {
        let mut visited = vec![false; self.entries.len()];
        let order = self.preorder(&mut visited);

        // A row on a cycle always has an in-set parent, so it is never a root
        // and never reached from one. Every cycle shows up here.
        if let Some(stranded) = visited.iter().position(|seen| !seen) {
            let cycle_id = self.find_cycle_from(stranded);
            warn!(
                "Rejecting hierarchy: {} of {} records are unreachable, cycle through '{}'",
                visited.iter().filter(|seen| !**seen).count(),
                self.entries.len(),
                cycle_id
            );
            return Err(EngineError::CycleDetected(cycle_id.to_string()));
        }

        // Reverse pre-order yields every child before its parent.
        let mut built: Vec<Option<CategoryNode>> = (0..self.entries.len()).map(|_| None).collect();
        for &position in order.iter().rev() {
            let entry = &self.entries[position];
            let children = match self.children.get(entry.id) {
                Some(child_positions) => child_positions
                    .iter()
                    .filter_map(|&child| built[child].take())
                    .collect(),
                None => Vec::new(),
            };
            built[position] = Some(CategoryNode {
                id: entry.id.to_string(),
                name: entry.name.to_string(),
                type_tags: entry.type_tags.to_vec(),
                children,
                selectable: entry.selectable,
            });
        }

        let forest: Vec<CategoryNode> = self
            .roots
            .iter()
            .filter_map(|&root| built[root].take())
            .collect();

        debug!(
            "Built hierarchy with {} records and {} roots",
            self.entries.len(),
            forest.len()
        );

        Ok(forest)
    }

    /// Positions reachable from the roots, parents before children.
    fn preorder(&self, visited: &mut [bool]) -> Vec<usize> {
        let mut order = Vec::with_capacity(self.entries.len());
        let mut stack: Vec<usize> = self.roots.iter().rev().copied().collect();
        while let Some(position) = stack.pop() {
            visited[position] = true;
            order.push(position);
            if let Some(child_positions) = self.children.get(self.entries[position].id) {
                stack.extend(child_positions.iter().rev().copied());
            }
        }
        order
    }

    /// Follows parent links from `start` until an id repeats.
    fn find_cycle_from(&self, start: usize) -> &'a str {
        let mut seen = HashSet::new();
        let mut current = start;
        loop {
            let entry = &self.entries[current];
            if !seen.insert(current) {
                return entry.id;
            }
            match entry.parent_id.and_then(|parent| self.index.get(parent)) {
                Some(&parent) => current = parent,
                None => return self.entries[start].id,
            }
        }
    }
}

/// Builds the category forest from flat records.
///
/// Fails with [`EngineError::CycleDetected`] when parent links loop, and with
/// [`EngineError::DuplicateRecordId`] when two records share an id. A failed
/// build never yields a partial tree.
pub fn build_tree(records: &[CategoryRecord]) -> Result<Vec<CategoryNode>> {
    let entries = records.iter().map(Entry::from_record).collect();
    HierarchyBuilder::new(entries)?.build()
}

/// Builds a forest where each group is a non-selectable root and categories
/// whose `parentId` names a group hang beneath it. Group and category ids share
/// one namespace.
pub fn build_grouped_tree(
    groups: &[GroupRecord],
    records: &[CategoryRecord],
) -> Result<Vec<CategoryNode>> {
    let entries = groups
        .iter()
        .map(Entry::from_group)
        .chain(records.iter().map(Entry::from_record))
        .collect();
    HierarchyBuilder::new(entries)?.build()
}

/// Content fingerprint of a record set. Order-sensitive, since children order
/// follows input order.
pub fn records_fingerprint(records: &[CategoryRecord]) -> u64 {
    let mut hasher = DefaultHasher::new();
    records.hash(&mut hasher);
    hasher.finish()
}

/// Memoizes the last built forest keyed by the fingerprint of its input.
#[derive(Debug, Default)]
pub struct HierarchyCache {
    fingerprint: Option<u64>,
    roots: Vec<CategoryNode>,
    hits: u64,
    misses: u64,
}

impl HierarchyCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get_or_build(&mut self, records: &[CategoryRecord]) -> Result<Vec<CategoryNode>> {
        let fingerprint = records_fingerprint(records);
        if self.fingerprint == Some(fingerprint) {
            self.hits += 1;
            return Ok(self.roots.clone());
        }

        self.misses += 1;
        self.invalidate();
        let roots = build_tree(records)?;
        self.fingerprint = Some(fingerprint);
        self.roots = roots.clone();
        Ok(roots)
    }

    pub fn invalidate(&mut self) {
        self.fingerprint = None;
        self.roots.clear();
    }

    pub fn hits(&self) -> u64 {
        self.hits
    }

    pub fn misses(&self) -> u64 {
        self.misses
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::forest_node_count;

    fn record(id: &str, parent: Option<&str>) -> CategoryRecord {
        CategoryRecord::new(id, parent, id.to_uppercase())
    }

    #[test]
    fn test_builds_forest_in_input_order() {
        let records = vec![
            record("expenses", None),
            record("rent", Some("expenses")),
            record("income", None),
            record("salary", Some("expenses")),
            record("office", Some("rent")),
        ];

        let roots = build_tree(&records).unwrap();

        assert_eq!(roots.len(), 2);
        assert_eq!(roots[0].id, "expenses");
        assert_eq!(roots[1].id, "income");
        let child_ids: Vec<&str> = roots[0].children.iter().map(|c| c.id.as_str()).collect();
        assert_eq!(child_ids, vec!["rent", "salary"]);
        assert_eq!(roots[0].children[0].children[0].id, "office");
        assert_eq!(forest_node_count(&roots), records.len());
        assert!(roots.iter().all(|r| r.selectable));
    }

    #[test]
    fn test_missing_parent_becomes_root() {
        let records = vec![record("orphan", Some("deleted")), record("leaf", Some("orphan"))];

        let roots = build_tree(&records).unwrap();

        assert_eq!(roots.len(), 1);
        assert_eq!(roots[0].id, "orphan");
        assert_eq!(roots[0].children[0].id, "leaf");
    }

    #[test]
    fn test_three_node_cycle_is_rejected() {
        let records = vec![
            record("a", Some("c")),
            record("b", Some("a")),
            record("c", Some("b")),
            record("free", None),
        ];

        match build_tree(&records) {
            Err(EngineError::CycleDetected(id)) => {
                assert!(["a", "b", "c"].contains(&id.as_str()));
            }
            other => panic!("expected cycle error, got {:?}", other),
        }
    }

    #[test]
    fn test_self_parent_is_a_cycle() {
        let records = vec![record("loop", Some("loop"))];
        assert!(matches!(
            build_tree(&records),
            Err(EngineError::CycleDetected(id)) if id == "loop"
        ));
    }

    #[test]
    fn test_subtree_hanging_off_cycle_is_rejected() {
        let records = vec![
            record("root", None),
            record("x", Some("y")),
            record("y", Some("x")),
            record("tail", Some("x")),
        ];

        assert!(matches!(
            build_tree(&records),
            Err(EngineError::CycleDetected(_))
        ));
    }

    fn chain_records(depth: usize) -> Vec<CategoryRecord> {
        let mut records = vec![record("n0", None)];
        for level in 1..=depth {
            let parent = format!("n{}", level - 1);
            records.push(record(&format!("n{}", level), Some(parent.as_str())));
        }
        records
    }

    #[test]
    fn test_deep_chain_builds_without_recursion() {
        let depth = 100_000;
        let records = chain_records(depth);

        let roots = build_tree(&records).unwrap();

        assert_eq!(roots.len(), 1);
        assert_eq!(forest_node_count(&roots), depth + 1);
        let mut deepest = (String::new(), 0);
        roots[0].walk(&mut |node, d| {
            if d >= deepest.1 {
                deepest = (node.id.clone(), d);
            }
        });
        assert_eq!(deepest, (format!("n{}", depth), depth));
    }

    #[test]
    fn test_deep_chain_closed_into_cycle_is_rejected() {
        let mut records = chain_records(50_000);
        records[0].parent_id = Some("n50000".to_string());

        assert!(matches!(
            build_tree(&records),
            Err(EngineError::CycleDetected(_))
        ));
    }

    #[test]
    fn test_duplicate_ids_rejected() {
        let records = vec![record("a", None), record("a", None)];
        assert!(matches!(
            build_tree(&records),
            Err(EngineError::DuplicateRecordId(id)) if id == "a"
        ));
    }

    #[test]
    fn test_grouped_tree_places_groups_as_roots() {
        let groups = vec![
            GroupRecord {
                id: "g-ops".to_string(),
                label: "Operating".to_string(),
            },
            GroupRecord {
                id: "g-empty".to_string(),
                label: "Empty".to_string(),
            },
        ];
        let records = vec![record("rent", Some("g-ops")), record("misc", None)];

        let roots = build_grouped_tree(&groups, &records).unwrap();

        assert_eq!(roots.len(), 3);
        assert_eq!(roots[0].name, "Operating");
        assert!(!roots[0].selectable);
        assert!(roots[0].children[0].selectable);
        assert!(roots[1].is_leaf());
        assert_eq!(roots[2].id, "misc");
    }

    #[test]
    fn test_cache_reuses_forest_until_input_changes() {
        let mut cache = HierarchyCache::new();
        let mut records = vec![record("a", None), record("b", Some("a"))];

        let first = cache.get_or_build(&records).unwrap();
        let second = cache.get_or_build(&records).unwrap();
        assert_eq!(first, second);
        assert_eq!(cache.hits(), 1);
        assert_eq!(cache.misses(), 1);

        records.push(record("c", Some("a")));
        let third = cache.get_or_build(&records).unwrap();
        assert_eq!(third[0].children.len(), 2);
        assert_eq!(cache.misses(), 2);
    }

    #[test]
    fn test_cache_does_not_keep_failed_builds() {
        let mut cache = HierarchyCache::new();
        let good = vec![record("a", None)];
        cache.get_or_build(&good).unwrap();

        let bad = vec![record("x", Some("x"))];
        assert!(cache.get_or_build(&bad).is_err());
        assert!(cache.get_or_build(&bad).is_err());
        assert_eq!(cache.hits(), 0);
    }
}
