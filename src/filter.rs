use crate::config::EngineConfig;
use crate::schema::{fold_subtree, CategoryNode, OperationKind};
use log::debug;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// The classification tab a category picker is currently serving.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, JsonSchema,
)]
#[serde(rename_all = "camelCase")]
pub enum ClassificationContext {
    Income,
    Payment,
    Transfer,
    Accrual,
}

impl OperationKind {
    pub fn context(self) -> ClassificationContext {
        match self {
            OperationKind::Income => ClassificationContext::Income,
            OperationKind::Payment => ClassificationContext::Payment,
            OperationKind::Transfer => ClassificationContext::Transfer,
            OperationKind::Accrual => ClassificationContext::Accrual,
        }
    }
}

/// Matches a node when any of its type tags contains any keyword,
/// ignoring case.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TagPredicate {
    keywords: Vec<String>,
}

impl TagPredicate {
    pub fn new<I, S>(keywords: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self {
            keywords: keywords
                .into_iter()
                .map(|k| k.as_ref().to_lowercase())
                .collect(),
        }
    }

    pub fn for_context(config: &EngineConfig, context: ClassificationContext) -> Self {
        Self::new(config.keywords_for(context))
    }

    pub fn matches(&self, node: &CategoryNode) -> bool {
        node.type_tags.iter().any(|tag| {
            let tag = tag.to_lowercase();
            self.keywords.iter().any(|keyword| tag.contains(keyword.as_str()))
        })
    }
}

/// Prunes a forest down to the nodes that match `matches` plus every ancestor
/// on the path to a match.
///
/// Ancestors kept only for connectivity are marked non-selectable; matching
/// nodes keep their own `selectable` flag. Applying the same predicate to the
/// result returns it unchanged.
pub fn filter_tree<F>(roots: &[CategoryNode], matches: F) -> Vec<CategoryNode>
where
    F: Fn(&CategoryNode) -> bool,
{
    roots
        .iter()
        .filter_map(|root| {
            fold_subtree(
                root,
                |_| true,
                |node, survivors: Vec<Option<CategoryNode>>| {
                    let children: Vec<CategoryNode> = survivors.into_iter().flatten().collect();
                    let self_match = matches(node);
                    if !self_match && children.is_empty() {
                        return None;
                    }

                    let mut kept = node.with_children(children);
                    kept.selectable = self_match && node.selectable;
                    Some(kept)
                },
            )
        })
        .collect()
}

/// Runs the filter once per requested context, each with its own predicate.
pub fn filter_for_contexts(
    roots: &[CategoryNode],
    contexts: &[ClassificationContext],
    config: &EngineConfig,
) -> BTreeMap<ClassificationContext, Vec<CategoryNode>> {
    let mut filtered = BTreeMap::new();
    for &context in contexts {
        let predicate = TagPredicate::for_context(config, context);
        let tree = filter_tree(roots, |node| predicate.matches(node));
        debug!(
            "Context {:?}: {} selectable categories after filtering",
            context,
            count_selectable(&tree)
        );
        filtered.insert(context, tree);
    }
    filtered
}

pub fn count_selectable(roots: &[CategoryNode]) -> usize {
    let mut count = 0;
    for root in roots {
        root.walk(&mut |node, _| {
            if node.selectable {
                count += 1;
            }
        });
    }
    count
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hierarchy::build_tree;
    use crate::schema::{find_in_forest, CategoryRecord};

    fn chart() -> Vec<CategoryNode> {
        let records = vec![
            CategoryRecord::new("ops", None, "Операционная деятельность"),
            CategoryRecord::new("rent", Some("ops"), "Аренда").with_tags(["Расход"]),
            CategoryRecord::new("sales", Some("ops"), "Продажи").with_tags(["Доход"]),
            CategoryRecord::new("misc", Some("ops"), "Прочее"),
            CategoryRecord::new("office", Some("misc"), "Офис").with_tags(["Расход"]),
            CategoryRecord::new("fin", None, "Финансы"),
            CategoryRecord::new("interest", Some("fin"), "Проценты").with_tags(["Доход"]),
            CategoryRecord::new("bonus", None, "Премии").with_tags(["Расход"]),
        ];
        build_tree(&records).unwrap()
    }

    #[test]
    fn test_filter_keeps_ancestor_chain_as_connective_nodes() {
        let roots = chart();
        let predicate = TagPredicate::new(["Расход"]);

        let filtered = filter_tree(&roots, |n| predicate.matches(n));

        let ids: Vec<&str> = filtered.iter().map(|n| n.id.as_str()).collect();
        assert_eq!(ids, vec!["ops", "bonus"]);

        let ops = &filtered[0];
        assert!(!ops.selectable);
        let child_ids: Vec<&str> = ops.children.iter().map(|n| n.id.as_str()).collect();
        assert_eq!(child_ids, vec!["rent", "misc"]);

        let misc = find_in_forest(&filtered, "misc").unwrap();
        assert!(!misc.selectable);
        assert!(find_in_forest(&filtered, "office").unwrap().selectable);
        assert!(find_in_forest(&filtered, "sales").is_none());
    }

    #[test]
    fn test_matching_leaf_root_survives() {
        let roots = chart();
        let filtered = filter_tree(&roots, |n| n.id == "bonus");

        assert_eq!(filtered.len(), 1);
        assert!(filtered[0].is_leaf());
        assert!(filtered[0].selectable);
    }

    #[test]
    fn test_filter_is_idempotent() {
        let roots = chart();
        let predicate = TagPredicate::new(["доход"]);

        let once = filter_tree(&roots, |n| predicate.matches(n));
        let twice = filter_tree(&once, |n| predicate.matches(n));

        assert_eq!(once, twice);
        assert_eq!(count_selectable(&once), 2);
    }

    #[test]
    fn test_no_match_yields_empty_forest() {
        let roots = chart();
        assert!(filter_tree(&roots, |_| false).is_empty());
    }

    #[test]
    fn test_contexts_are_filtered_independently() {
        let roots = chart();
        let config = EngineConfig::default();

        let by_context = filter_for_contexts(
            &roots,
            &[ClassificationContext::Income, ClassificationContext::Payment],
            &config,
        );

        let income = &by_context[&ClassificationContext::Income];
        let payment = &by_context[&ClassificationContext::Payment];
        assert!(find_in_forest(income, "interest").is_some());
        assert!(find_in_forest(income, "rent").is_none());
        assert!(find_in_forest(payment, "rent").is_some());
        assert!(find_in_forest(payment, "interest").is_none());
        assert!(!by_context.contains_key(&ClassificationContext::Transfer));
    }

    #[test]
    fn test_operation_kind_maps_to_context() {
        assert_eq!(
            OperationKind::Accrual.context(),
            ClassificationContext::Accrual
        );
        assert_eq!(
            OperationKind::Payment.context(),
            ClassificationContext::Payment
        );
    }

    #[test]
    fn test_filter_handles_deep_chain() {
        let depth = 100_000;
        let mut records = vec![CategoryRecord::new("n0", None, "n0")];
        for level in 1..=depth {
            let parent = format!("n{}", level - 1);
            let mut record = CategoryRecord::new(format!("n{}", level), Some(parent.as_str()), "x");
            if level == depth {
                record = record.with_tags(["Расход"]);
            }
            records.push(record);
        }
        let roots = build_tree(&records).unwrap();

        let filtered = filter_tree(&roots, |n| n.type_tags.iter().any(|t| t == "Расход"));

        assert_eq!(filtered.len(), 1);
        assert_eq!(filtered[0].node_count(), depth + 1);
        assert_eq!(count_selectable(&filtered), 1);
        assert!(filter_tree(&filtered, |n| n.id == "missing").is_empty());
    }
}
