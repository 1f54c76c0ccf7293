use crate::error::{EngineError, Result};
use crate::schema::{Account, BalanceGroup, GapInterval};
use chrono::NaiveDateTime;
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, HashSet};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AnomalyKind {
    NegativeBalance,
    Gap,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BalanceAnomaly {
    pub account_id: String,
    pub kind: AnomalyKind,
}

/// Which rollups a caller wants filled in. Both come out of the same pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum AggregationScope {
    Groups,
    Entities,
    #[default]
    Both,
}

impl AggregationScope {
    fn groups(self) -> bool {
        matches!(self, AggregationScope::Groups | AggregationScope::Both)
    }

    fn entities(self) -> bool {
        matches!(self, AggregationScope::Entities | AggregationScope::Both)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BalanceReport {
    pub total: i64,
    pub per_group: BTreeMap<String, i64>,
    pub per_entity: BTreeMap<String, i64>,
    pub unallocated: i64,
    pub per_currency: BTreeMap<String, i64>,
    pub anomalies: Vec<BalanceAnomaly>,
}

impl BalanceReport {
    pub fn has_anomalies(&self) -> bool {
        !self.anomalies.is_empty()
    }

    pub fn anomalies_for(&self, account_id: &str) -> Vec<AnomalyKind> {
        self.anomalies
            .iter()
            .filter(|a| a.account_id == account_id)
            .map(|a| a.kind)
            .collect()
    }
}

pub type LegalEntityResolver<'a> = &'a dyn Fn(&str) -> Option<String>;

/// Rolls account balances up into balance groups and legal entities.
pub struct BalanceAggregator<'a> {
    accounts: &'a [Account],
    groups: &'a [BalanceGroup],
    legal_entity_of: Option<LegalEntityResolver<'a>>,
    gaps: &'a [GapInterval],
    now: Option<NaiveDateTime>,
    scope: AggregationScope,
}

impl<'a> BalanceAggregator<'a> {
    pub fn new(accounts: &'a [Account], groups: &'a [BalanceGroup]) -> Self {
        Self {
            accounts,
            groups,
            legal_entity_of: None,
            gaps: &[],
            now: None,
            scope: AggregationScope::Both,
        }
    }

    /// Overrides `Account::legal_entity_id`. Accounts the resolver returns
    /// `None` for keep their own entity.
    pub fn with_legal_entity_resolver(mut self, resolver: LegalEntityResolver<'a>) -> Self {
        self.legal_entity_of = Some(resolver);
        self
    }

    pub fn with_gaps(mut self, gaps: &'a [GapInterval], now: NaiveDateTime) -> Self {
        self.gaps = gaps;
        self.now = Some(now);
        self
    }

    pub fn with_scope(mut self, scope: AggregationScope) -> Self {
        self.scope = scope;
        self
    }

    pub fn aggregate(&self) -> Result<BalanceReport> {
        let membership = self.group_membership()?;
        let gapped = self.accounts_in_gap();

        info!(
            "Aggregating {} accounts across {} balance groups",
            self.accounts.len(),
            self.groups.len()
        );

        let mut report = BalanceReport::default();
        if self.scope.groups() {
            for group in self.groups {
                report.per_group.entry(group.id.clone()).or_insert(0);
            }
        }

        for account in self.accounts {
            let balance = account.current_balance;
            add_balance(&mut report.total, balance, "total")?;
            add_balance(
                report
                    .per_currency
                    .entry(account.currency_id.clone())
                    .or_insert(0),
                balance,
                &account.currency_id,
            )?;

            if self.scope.groups() {
                match membership.get(account.id.as_str()) {
                    Some(group_id) => add_balance(
                        report.per_group.entry(group_id.to_string()).or_insert(0),
                        balance,
                        group_id,
                    )?,
                    None => add_balance(&mut report.unallocated, balance, "unallocated")?,
                }
            }

            if self.scope.entities() {
                let entity = self
                    .legal_entity_of
                    .and_then(|resolve| resolve(&account.id))
                    .unwrap_or_else(|| account.legal_entity_id.clone());
                let bucket = report.per_entity.entry(entity.clone()).or_insert(0);
                add_balance(bucket, balance, &entity)?;
            }

            if balance < 0 {
                report.anomalies.push(BalanceAnomaly {
                    account_id: account.id.clone(),
                    kind: AnomalyKind::NegativeBalance,
                });
            }
            if gapped.contains(account.id.as_str()) {
                report.anomalies.push(BalanceAnomaly {
                    account_id: account.id.clone(),
                    kind: AnomalyKind::Gap,
                });
            }
        }

        debug!(
            "Balance rollup: total {}, unallocated {}, {} anomalies",
            report.total,
            report.unallocated,
            report.anomalies.len()
        );

        Ok(report)
    }

    /// account id -> group id. An account listed twice in one group is
    /// tolerated; listed in two different groups is an error.
    fn group_membership(&self) -> Result<HashMap<&'a str, &'a str>> {
        let known: HashSet<&str> = self.accounts.iter().map(|a| a.id.as_str()).collect();
        let mut membership: HashMap<&'a str, &'a str> = HashMap::new();

        for group in self.groups {
            for member in &group.member_account_ids {
                match membership.get(member.as_str()) {
                    Some(first) if *first != group.id.as_str() => {
                        warn!(
                            "Account '{}' assigned to both '{}' and '{}'",
                            member, first, group.id
                        );
                        return Err(EngineError::DuplicateAccountAssignment {
                            account_id: member.clone(),
                            first_group: first.to_string(),
                            second_group: group.id.clone(),
                        });
                    }
                    Some(_) => {}
                    None => {
                        if !known.contains(member.as_str()) {
                            warn!(
                                "Balance group '{}' lists unknown account '{}'; ignoring",
                                group.id, member
                            );
                        }
                        membership.insert(member.as_str(), group.id.as_str());
                    }
                }
            }
        }

        Ok(membership)
    }

    fn accounts_in_gap(&self) -> HashSet<&'a str> {
        match self.now {
            Some(now) => self
                .gaps
                .iter()
                .filter(|gap| gap.contains(now))
                .map(|gap| gap.account_id.as_str())
                .collect(),
            None => HashSet::new(),
        }
    }
}

fn add_balance(bucket: &mut i64, balance: i64, label: &str) -> Result<()> {
    *bucket = bucket
        .checked_add(balance)
        .ok_or_else(|| EngineError::BalanceOverflow(format!("'{}' exceeds i64", label)))?;
    Ok(())
}

pub fn aggregate_balances(
    accounts: &[Account],
    groups: &[BalanceGroup],
    legal_entity_of: Option<LegalEntityResolver<'_>>,
) -> Result<BalanceReport> {
    let mut aggregator = BalanceAggregator::new(accounts, groups);
    if let Some(resolver) = legal_entity_of {
        aggregator = aggregator.with_legal_entity_resolver(resolver);
    }
    aggregator.aggregate()
}
