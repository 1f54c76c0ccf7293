use chrono::{NaiveDate, NaiveDateTime};
use rust_decimal::Decimal;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::error::{EngineError, Result};

/// A flat chart-of-accounts or counterparty entry as delivered by the data API.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct CategoryRecord {
    #[schemars(description = "Unique identifier of the category")]
    pub id: String,

    #[serde(default)]
    #[schemars(
        description = "Identifier of the parent category or group. Absent for top-level categories."
    )]
    pub parent_id: Option<String>,

    pub name: String,

    #[serde(default)]
    #[schemars(
        description = "Ordered type tags attached to the category (e.g. 'Доход', 'Расход'). May be empty."
    )]
    pub type_tags: Vec<String>,
}

impl CategoryRecord {
    pub fn new(id: impl Into<String>, parent_id: Option<&str>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            parent_id: parent_id.map(str::to_string),
            name: name.into(),
            type_tags: Vec::new(),
        }
    }

    pub fn with_tags<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.type_tags = tags.into_iter().map(Into::into).collect();
        self
    }
}

/// A node of a built category tree. Owned by the forest that produced it.
///
/// Charts can be arbitrarily deep, so traversal, cloning, comparison and drop
/// all run on explicit work stacks rather than the call stack.
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CategoryNode {
    pub id: String,
    pub name: String,
    pub type_tags: Vec<String>,
    pub children: Vec<CategoryNode>,
    pub selectable: bool,
}

impl CategoryNode {
    pub fn is_leaf(&self) -> bool {
        self.children.is_empty()
    }

    /// Number of nodes in this subtree, including `self`.
    pub fn node_count(&self) -> usize {
        let mut count = 0;
        self.walk(&mut |_, _| count += 1);
        count
    }

    /// Ids of every node below `self`, in pre-order.
    pub fn descendant_ids(&self) -> Vec<String> {
        let mut ids = Vec::new();
        self.walk(&mut |node, depth| {
            if depth > 0 {
                ids.push(node.id.clone());
            }
        });
        ids
    }

    pub fn find(&self, id: &str) -> Option<&CategoryNode> {
        let mut stack = vec![self];
        while let Some(node) = stack.pop() {
            if node.id == id {
                return Some(node);
            }
            stack.extend(node.children.iter().rev());
        }
        None
    }

    /// Pre-order traversal; the callback receives each node with its depth
    /// relative to `self` (which is depth 0).
    pub fn walk<F>(&self, visit: &mut F)
    where
        F: FnMut(&CategoryNode, usize),
    {
        let mut stack = vec![(self, 0)];
        while let Some((node, depth)) = stack.pop() {
            visit(node, depth);
            stack.extend(node.children.iter().rev().map(|child| (child, depth + 1)));
        }
    }

    /// Copy of the node's own fields with the given children.
    pub(crate) fn with_children(&self, children: Vec<CategoryNode>) -> CategoryNode {
        CategoryNode {
            id: self.id.clone(),
            name: self.name.clone(),
            type_tags: self.type_tags.clone(),
            children,
            selectable: self.selectable,
        }
    }
}

impl Clone for CategoryNode {
    fn clone(&self) -> Self {
        fold_subtree(self, |_| true, |node, children| node.with_children(children))
    }
}

impl PartialEq for CategoryNode {
    fn eq(&self, other: &Self) -> bool {
        let mut pending = vec![(self, other)];
        while let Some((left, right)) = pending.pop() {
            if left.id != right.id
                || left.name != right.name
                || left.type_tags != right.type_tags
                || left.selectable != right.selectable
                || left.children.len() != right.children.len()
            {
                return false;
            }
            pending.extend(left.children.iter().zip(right.children.iter()));
        }
        true
    }
}

impl Eq for CategoryNode {}

impl Drop for CategoryNode {
    fn drop(&mut self) {
        let mut pending = std::mem::take(&mut self.children);
        while let Some(mut node) = pending.pop() {
            pending.append(&mut node.children);
        }
    }
}

struct FoldFrame<'a, T> {
    node: &'a CategoryNode,
    next: usize,
    folded: Vec<T>,
}

impl<'a, T> FoldFrame<'a, T> {
    fn new(node: &'a CategoryNode) -> Self {
        Self {
            node,
            next: 0,
            folded: Vec::new(),
        }
    }
}

/// Post-order fold over a subtree. Only children accepted by `descend` are
/// visited; `build` sees each node together with the folded values of its
/// visited children, in child order.
pub(crate) fn fold_subtree<'a, T, D, B>(root: &'a CategoryNode, mut descend: D, mut build: B) -> T
where
    D: FnMut(&CategoryNode) -> bool,
    B: FnMut(&'a CategoryNode, Vec<T>) -> T,
{
    let mut stack: Vec<FoldFrame<'a, T>> = Vec::new();
    let mut current = FoldFrame::new(root);
    loop {
        let node = current.node;
        if let Some(child) = node.children.get(current.next) {
            current.next += 1;
            if descend(child) {
                stack.push(std::mem::replace(&mut current, FoldFrame::new(child)));
            }
            continue;
        }

        let value = build(node, current.folded);
        match stack.pop() {
            Some(parent) => {
                current = parent;
                current.folded.push(value);
            }
            None => return value,
        }
    }
}

/// Total node count across a forest.
pub fn forest_node_count(roots: &[CategoryNode]) -> usize {
    roots.iter().map(CategoryNode::node_count).sum()
}

/// Looks up a node anywhere in a forest.
pub fn find_in_forest<'a>(roots: &'a [CategoryNode], id: &str) -> Option<&'a CategoryNode> {
    roots.iter().find_map(|root| root.find(id))
}

/// A named bucket that categories reference through their `parentId`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct GroupRecord {
    pub id: String,
    pub label: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum OperationKind {
    Income,
    Payment,
    Transfer,
    Accrual,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct Operation {
    pub id: String,
    pub kind: OperationKind,

    #[schemars(description = "Operation amount in minor currency units. Must be positive.")]
    pub amount: i64,

    pub date: NaiveDate,
    pub account_id: String,

    #[serde(default)]
    pub counterparty_id: Option<String>,

    #[serde(default)]
    pub category_id: Option<String>,

    #[serde(default)]
    pub purpose: String,

    #[serde(default)]
    #[schemars(description = "True when the operation is split across allocation lines")]
    pub has_children: bool,
}

impl Operation {
    pub fn validate(&self) -> Result<()> {
        if self.amount <= 0 {
            return Err(EngineError::InvalidApportionment(format!(
                "operation {} has non-positive amount {}",
                self.id, self.amount
            )));
        }
        Ok(())
    }
}

/// How one allocation line claims its share of the parent amount.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub enum ShareLine {
    #[serde(rename = "sharePercent")]
    #[schemars(description = "Percentage of the parent amount, 0 to 100")]
    Percent(Decimal),

    #[serde(rename = "amount")]
    #[schemars(description = "Fixed amount in minor currency units")]
    Amount(i64),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct AllocationLine {
    pub parent_operation_id: String,
    pub category_id: String,

    #[serde(flatten)]
    pub share: ShareLine,

    #[serde(default)]
    pub date: Option<NaiveDate>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct Account {
    pub id: String,
    pub name: String,
    pub legal_entity_id: String,

    #[schemars(description = "Ledger balance in minor currency units. May be negative.")]
    pub current_balance: i64,

    pub currency_id: String,
}

impl Account {
    pub fn new(
        id: impl Into<String>,
        legal_entity_id: impl Into<String>,
        current_balance: i64,
    ) -> Self {
        let id = id.into();
        Self {
            name: id.clone(),
            id,
            legal_entity_id: legal_entity_id.into(),
            current_balance,
            currency_id: "RUB".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct BalanceGroup {
    pub id: String,
    pub label: String,

    #[serde(default)]
    pub member_account_ids: Vec<String>,
}

/// An externally flagged interval during which an account balance is unreliable.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct GapInterval {
    pub account_id: String,
    pub start: NaiveDateTime,

    #[serde(default)]
    #[schemars(description = "Exclusive end of the gap. Absent while the gap is still open.")]
    pub end: Option<NaiveDateTime>,
}

impl GapInterval {
    pub fn contains(&self, instant: NaiveDateTime) -> bool {
        self.start <= instant && self.end.map_or(true, |end| instant < end)
    }
}
