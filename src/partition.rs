use crate::config::validate_partition_rules;
use crate::error::Result;
use crate::schema::{fold_subtree, CategoryNode};
use log::debug;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};

/// Classifies a node into the partition `name` when one of its type tags
/// contains `keyword` (case-insensitive).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct PartitionRule {
    pub name: String,
    pub keyword: String,
}

impl PartitionRule {
    pub fn new(name: impl Into<String>, keyword: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            keyword: keyword.into(),
        }
    }
}

/// One partition: a synthetic non-selectable root named after the partition,
/// whose children are the partition-local roots.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TypePartition {
    pub name: String,
    pub root: CategoryNode,
    /// Nodes classified into this partition by their own tags, in pre-order.
    pub classified_root_ids: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PartitionSet {
    partitions: Vec<TypePartition>,
}

impl PartitionSet {
    pub fn get(&self, name: &str) -> Option<&TypePartition> {
        self.partitions.iter().find(|p| p.name == name)
    }

    pub fn classified_root_ids(&self, name: &str) -> &[String] {
        self.get(name)
            .map(|p| p.classified_root_ids.as_slice())
            .unwrap_or(&[])
    }

    /// Partition names in rule order.
    pub fn names(&self) -> Vec<&str> {
        self.partitions.iter().map(|p| p.name.as_str()).collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = &TypePartition> {
        self.partitions.iter()
    }

    pub fn len(&self) -> usize {
        self.partitions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.partitions.is_empty()
    }

    pub fn into_map(self) -> BTreeMap<String, CategoryNode> {
        self.partitions
            .into_iter()
            .map(|p| (p.name, p.root))
            .collect()
    }
}

pub fn synthetic_root_id(partition_name: &str) -> String {
    format!("partition:{}", partition_name)
}

/// Splits a forest into one subtree per rule.
///
/// A node is classified by the first rule whose keyword appears in one of its
/// tags. Each node then belongs to the partition of its nearest classified
/// ancestor-or-self, so a classified node takes all of its descendants along
/// unless a descendant is classified itself. Partitions are pairwise disjoint.
/// Within a partition, a node whose tree parent lies outside the partition
/// becomes a partition-local root.
pub fn partition_by_type(roots: &[CategoryNode], rules: &[PartitionRule]) -> Result<PartitionSet> {
    validate_partition_rules(rules)?;

    let keywords: Vec<String> = rules.iter().map(|r| r.keyword.to_lowercase()).collect();

    let own = classify(roots, &keywords);
    let membership = assign(roots, &own);

    let mut partitions = Vec::with_capacity(rules.len());
    for (index, rule) in rules.iter().enumerate() {
        let local_roots = collect_local_roots(roots, index, &membership);

        let mut classified_root_ids = Vec::new();
        for root in roots {
            root.walk(&mut |node, _| {
                if own.get(node.id.as_str()) == Some(&index) {
                    classified_root_ids.push(node.id.clone());
                }
            });
        }

        debug!(
            "Partition '{}': {} classified nodes, {} local roots",
            rule.name,
            classified_root_ids.len(),
            local_roots.len()
        );

        partitions.push(TypePartition {
            name: rule.name.clone(),
            root: CategoryNode {
                id: synthetic_root_id(&rule.name),
                name: rule.name.clone(),
                type_tags: Vec::new(),
                children: local_roots,
                selectable: false,
            },
            classified_root_ids,
        });
    }

    Ok(PartitionSet { partitions })
}

/// Rule index per node whose own tags match a rule.
fn classify<'a>(roots: &'a [CategoryNode], keywords: &[String]) -> HashMap<&'a str, usize> {
    let mut own = HashMap::new();
    let mut stack: Vec<&CategoryNode> = roots.iter().rev().collect();
    while let Some(node) = stack.pop() {
        let lowered: Vec<String> = node.type_tags.iter().map(|t| t.to_lowercase()).collect();
        if let Some(index) = keywords
            .iter()
            .position(|keyword| lowered.iter().any(|tag| tag.contains(keyword.as_str())))
        {
            own.insert(node.id.as_str(), index);
        }
        stack.extend(node.children.iter().rev());
    }
    own
}

/// Partition of every node, inherited from the nearest classified ancestor-or-self.
fn assign<'a>(
    roots: &'a [CategoryNode],
    own: &HashMap<&'a str, usize>,
) -> HashMap<&'a str, usize> {
    let mut membership = HashMap::new();
    let mut stack: Vec<(&CategoryNode, Option<usize>)> =
        roots.iter().rev().map(|root| (root, None)).collect();
    while let Some((node, inherited)) = stack.pop() {
        let partition = own.get(node.id.as_str()).copied().or(inherited);
        if let Some(index) = partition {
            membership.insert(node.id.as_str(), index);
        }
        stack.extend(node.children.iter().rev().map(|child| (child, partition)));
    }
    membership
}

/// Pre-order list of partition members whose tree parent is outside the
/// partition, each restricted to its in-partition descendants.
fn collect_local_roots(
    roots: &[CategoryNode],
    index: usize,
    membership: &HashMap<&str, usize>,
) -> Vec<CategoryNode> {
    let in_partition = |node: &CategoryNode| membership.get(node.id.as_str()) == Some(&index);

    let mut local_roots = Vec::new();
    let mut stack: Vec<(&CategoryNode, bool)> =
        roots.iter().rev().map(|root| (root, false)).collect();
    while let Some((node, parent_in_partition)) = stack.pop() {
        let inside = in_partition(node);
        if inside && !parent_in_partition {
            local_roots.push(fold_subtree(node, in_partition, |kept, children| {
                kept.with_children(children)
            }));
        }
        stack.extend(node.children.iter().rev().map(|child| (child, inside)));
    }
    local_roots
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::EngineError;
    use crate::hierarchy::build_tree;
    use crate::schema::CategoryRecord;
    use std::collections::HashSet;

    fn rules() -> Vec<PartitionRule> {
        vec![
            PartitionRule::new("Asset", "актив"),
            PartitionRule::new("Capital", "капитал"),
            PartitionRule::new("Liability", "обязательств"),
        ]
    }

    fn balance_chart() -> Vec<CategoryNode> {
        let records = vec![
            CategoryRecord::new("bs", None, "Баланс"),
            CategoryRecord::new("cash", Some("bs"), "Денежные средства").with_tags(["Активы"]),
            CategoryRecord::new("bank", Some("cash"), "Расчётный счёт"),
            CategoryRecord::new("till", Some("cash"), "Касса").with_tags(["Прочее"]),
            CategoryRecord::new("loans", Some("bs"), "Кредиты").with_tags(["Обязательства"]),
            CategoryRecord::new("short", Some("loans"), "Краткосрочные"),
            CategoryRecord::new("equity", None, "Собственный капитал").with_tags(["Капитал"]),
            CategoryRecord::new("mixed", Some("equity"), "Вклад активом").with_tags(["Активы"]),
            CategoryRecord::new("mixed-leaf", Some("mixed"), "Оборудование"),
            CategoryRecord::new("untagged", None, "Без типа"),
        ];
        build_tree(&records).unwrap()
    }

    #[test]
    fn test_partitions_wrap_subtrees_in_synthetic_roots() {
        let roots = balance_chart();
        let set = partition_by_type(&roots, &rules()).unwrap();

        assert_eq!(set.names(), vec!["Asset", "Capital", "Liability"]);

        let asset = set.get("Asset").unwrap();
        assert_eq!(asset.root.id, "partition:Asset");
        assert!(!asset.root.selectable);
        let local: Vec<&str> = asset.root.children.iter().map(|n| n.id.as_str()).collect();
        assert_eq!(local, vec!["cash", "mixed"]);

        let cash = &asset.root.children[0];
        let cash_children: Vec<&str> = cash.children.iter().map(|n| n.id.as_str()).collect();
        assert_eq!(cash_children, vec!["bank", "till"]);

        let liability = set.get("Liability").unwrap();
        assert_eq!(liability.root.children[0].id, "loans");
        assert_eq!(liability.root.children[0].children[0].id, "short");
    }

    #[test]
    fn test_nested_classification_moves_subtree_to_nearest_partition() {
        let roots = balance_chart();
        let set = partition_by_type(&roots, &rules()).unwrap();

        let capital = set.get("Capital").unwrap();
        assert_eq!(capital.root.children.len(), 1);
        assert!(capital.root.children[0].is_leaf());
        assert!(capital.root.find("mixed").is_none());

        let asset = set.get("Asset").unwrap();
        assert!(asset.root.find("mixed-leaf").is_some());
    }

    #[test]
    fn test_partitions_are_disjoint_and_rooted_in_classified_nodes() {
        let roots = balance_chart();
        let set = partition_by_type(&roots, &rules()).unwrap();

        let mut seen_classified = HashSet::new();
        let mut seen_nodes = HashSet::new();
        for partition in set.iter() {
            for id in &partition.classified_root_ids {
                assert!(seen_classified.insert(id.clone()), "{} classified twice", id);
            }

            for local_root in &partition.root.children {
                assert!(partition.classified_root_ids.contains(&local_root.id));
                local_root.walk(&mut |node, _| {
                    assert!(seen_nodes.insert(node.id.clone()), "{} in two partitions", node.id);
                });
            }
        }

        assert!(!seen_nodes.contains("untagged"));
        assert!(!seen_nodes.contains("bs"));
    }

    #[test]
    fn test_first_matching_rule_wins() {
        let records = vec![CategoryRecord::new("x", None, "X").with_tags(["Капитал", "Активы"])];
        let roots = build_tree(&records).unwrap();

        let set = partition_by_type(&roots, &rules()).unwrap();

        assert_eq!(set.classified_root_ids("Asset"), ["x".to_string()]);
        assert!(set.classified_root_ids("Unknown").is_empty());
        assert!(set.get("Capital").unwrap().root.children.is_empty());
    }

    #[test]
    fn test_every_rule_yields_a_partition_even_when_empty() {
        let set = partition_by_type(&[], &rules()).unwrap();
        assert_eq!(set.len(), 3);
        assert!(set.iter().all(|p| p.root.is_leaf()));

        let map = set.into_map();
        assert!(map.contains_key("Liability"));
    }

    #[test]
    fn test_invalid_rules_rejected() {
        let bad = vec![PartitionRule::new("Asset", " ")];
        assert!(matches!(
            partition_by_type(&[], &bad),
            Err(EngineError::InvalidConfig(_))
        ));
    }

    #[test]
    fn test_deep_chain_partitions_without_recursion() {
        let depth = 100_000;
        let mut records = vec![CategoryRecord::new("n0", None, "n0").with_tags(["Активы"])];
        for level in 1..=depth {
            let parent = format!("n{}", level - 1);
            let mut record = CategoryRecord::new(format!("n{}", level), Some(parent.as_str()), "x");
            if level == depth / 2 {
                record = record.with_tags(["Обязательства"]);
            }
            records.push(record);
        }
        let roots = build_tree(&records).unwrap();

        let set = partition_by_type(&roots, &rules()).unwrap();

        let asset = set.get("Asset").unwrap();
        let liability = set.get("Liability").unwrap();
        assert_eq!(asset.root.node_count() - 1, depth / 2);
        assert_eq!(liability.root.node_count() - 1, depth - depth / 2 + 1);
        assert_eq!(liability.root.children[0].id, format!("n{}", depth / 2));
    }
}
