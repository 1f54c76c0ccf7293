//! # Category Apportionment
//!
//! Domain core for a financial operations module: turns flat, parent-referenced
//! chart-of-accounts records into trees, filters and partitions those trees by
//! type tags, splits operation amounts across allocation lines with exact sums,
//! and rolls account balances up into groups and legal entities.
//!
//! ## Core Concepts
//!
//! - **Hierarchy**: flat `{id, parentId}` records rebuilt into an owned forest; cycles are rejected
//! - **Classification context**: the income / payment / transfer / accrual tab a category picker serves
//! - **Partition**: disjoint Asset / Capital / Liability style subtrees chosen by injected keyword rules
//! - **Apportionment**: splitting a minor-unit amount by percentages or fixed amounts, summing exactly
//! - **Rollup**: account balances summed per balance group, per legal entity and overall
//!
//! Every operation is pure and synchronous: identical inputs give identical outputs.
//!
//! ## Example
//!
//! ```rust
//! use category_apportionment::*;
//! use rust_decimal::Decimal;
//!
//! let records = vec![
//!     CategoryRecord::new("ops", None, "Operations"),
//!     CategoryRecord::new("rent", Some("ops"), "Аренда").with_tags(["Расход"]),
//! ];
//! let roots = build_tree(&records).unwrap();
//! let payments = filter_tree(&roots, |node| node.type_tags.iter().any(|t| t == "Расход"));
//! assert!(!payments[0].selectable);
//!
//! let lines = vec![
//!     ShareLine::Percent(Decimal::new(7194, 2)),
//!     ShareLine::Percent(Decimal::new(2806, 2)),
//! ];
//! let split = apportion(10425, &lines, ApportionmentMode::Percent).unwrap();
//! assert_eq!(split[0].amount + split[1].amount, 10425);
//! ```

pub mod apportion;
pub mod balances;
pub mod config;
pub mod error;
pub mod filter;
pub mod hierarchy;
pub mod partition;
pub mod report;
pub mod schema;
pub mod utils;

pub use apportion::{
    apportion, apportion_operation, AllocationSet, ApportionedLine, ApportionmentMode,
    Apportioner, ResolvedAllocation,
};
pub use balances::{
    aggregate_balances, AggregationScope, AnomalyKind, BalanceAggregator, BalanceAnomaly,
    BalanceReport, LegalEntityResolver,
};
pub use config::EngineConfig;
pub use error::{EngineError, Result};
pub use filter::{
    count_selectable, filter_for_contexts, filter_tree, ClassificationContext, TagPredicate,
};
pub use hierarchy::{build_grouped_tree, build_tree, records_fingerprint, HierarchyCache};
pub use partition::{partition_by_type, PartitionRule, PartitionSet, TypePartition};
pub use report::{partitions_to_markdown, tree_to_markdown};
pub use schema::*;
pub use utils::{format_minor_units, parse_minor_units};

use chrono::NaiveDateTime;
use log::{debug, info};
use std::collections::BTreeMap;

/// Configured entry point bundling the five transformations.
///
/// Holds no data between calls apart from the configuration; every method
/// works on the snapshot it is given.
#[derive(Debug, Clone, Default)]
pub struct CategoryEngine {
    config: EngineConfig,
}

impl CategoryEngine {
    pub fn new(config: EngineConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self { config })
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn build_chart(
        &self,
        groups: &[GroupRecord],
        records: &[CategoryRecord],
    ) -> Result<Vec<CategoryNode>> {
        info!(
            "Building chart from {} groups and {} category records",
            groups.len(),
            records.len()
        );
        build_grouped_tree(groups, records)
    }

    /// One filtered forest per selected context.
    pub fn categories_for(
        &self,
        roots: &[CategoryNode],
        contexts: &[ClassificationContext],
    ) -> BTreeMap<ClassificationContext, Vec<CategoryNode>> {
        filter_for_contexts(roots, contexts, &self.config)
    }

    /// Categories eligible for a single operation, by its kind.
    pub fn categories_for_operation(
        &self,
        roots: &[CategoryNode],
        operation: &Operation,
    ) -> Vec<CategoryNode> {
        let predicate = TagPredicate::for_context(&self.config, operation.kind.context());
        filter_tree(roots, |node| predicate.matches(node))
    }

    pub fn partition(&self, roots: &[CategoryNode]) -> Result<PartitionSet> {
        partition_by_type(roots, &self.config.partition_rules)
    }

    pub fn apportion(
        &self,
        operation: &Operation,
        lines: &[AllocationLine],
    ) -> Result<AllocationSet> {
        debug!(
            "Apportioning operation {} ({} lines)",
            operation.id,
            lines.len()
        );
        apportion_operation(operation, lines, &self.config)
    }

    pub fn balances(
        &self,
        accounts: &[Account],
        groups: &[BalanceGroup],
        gaps: &[GapInterval],
        now: NaiveDateTime,
    ) -> Result<BalanceReport> {
        BalanceAggregator::new(accounts, groups)
            .with_gaps(gaps, now)
            .aggregate()
    }
}
