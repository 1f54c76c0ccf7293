use crate::config::EngineConfig;
use crate::error::{EngineError, Result};
use crate::schema::{AllocationLine, Operation, ShareLine};
use crate::utils::{percent_of, round_half_even};
use chrono::NaiveDate;
use log::debug;
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub enum ApportionmentMode {
    Percent,
    Amount,
}

impl ApportionmentMode {
    pub fn of(line: &ShareLine) -> Self {
        match line {
            ShareLine::Percent(_) => ApportionmentMode::Percent,
            ShareLine::Amount(_) => ApportionmentMode::Amount,
        }
    }

    /// Mode shared by every line. Empty or mixed input is rejected.
    pub fn detect(lines: &[ShareLine]) -> Result<Self> {
        let first = lines.first().ok_or_else(|| {
            EngineError::InvalidApportionment("no allocation lines supplied".to_string())
        })?;
        let mode = Self::of(first);
        if lines.iter().any(|line| Self::of(line) != mode) {
            return Err(EngineError::InvalidApportionment(
                "lines mix percent and amount shares".to_string(),
            ));
        }
        Ok(mode)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApportionedLine {
    pub amount: i64,
    /// `amount / total * 100`, rounded for display. Not guaranteed to re-sum to 100.
    pub display_percent: Decimal,
}

impl ApportionedLine {
    pub fn as_amount_share(&self) -> ShareLine {
        ShareLine::Amount(self.amount)
    }
}

/// Splits a minor-unit total across weighted lines so that the resulting
/// amounts always add up to the total exactly.
#[derive(Debug, Clone)]
pub struct Apportioner {
    percent_tolerance: Decimal,
    display_scale: u32,
}

impl Default for Apportioner {
    fn default() -> Self {
        Self::new(&EngineConfig::default())
    }
}

impl Apportioner {
    pub fn new(config: &EngineConfig) -> Self {
        Self {
            percent_tolerance: config.percent_tolerance,
            display_scale: config.display_scale,
        }
    }

    pub fn apportion(
        &self,
        total: i64,
        lines: &[ShareLine],
        mode: ApportionmentMode,
    ) -> Result<Vec<ApportionedLine>> {
        if total <= 0 {
            return Err(EngineError::InvalidApportionment(format!(
                "total must be positive, got {}",
                total
            )));
        }
        if lines.is_empty() {
            return Err(EngineError::InvalidApportionment(
                "split operation has no allocation lines".to_string(),
            ));
        }
        if let Some(position) = lines.iter().position(|l| ApportionmentMode::of(l) != mode) {
            return Err(EngineError::InvalidApportionment(format!(
                "line {} does not match {:?} mode",
                position, mode
            )));
        }

        let amounts = match mode {
            ApportionmentMode::Percent => self.amounts_from_percents(total, lines)?,
            ApportionmentMode::Amount => amounts_checked(total, lines)?,
        };

        let mut apportioned = Vec::with_capacity(amounts.len());
        for amount in amounts {
            let display_percent = percent_of(amount, total, self.display_scale)
                .ok_or_else(|| overflow("display percent"))?;
            apportioned.push(ApportionedLine {
                amount,
                display_percent,
            });
        }
        Ok(apportioned)
    }

    fn amounts_from_percents(&self, total: i64, lines: &[ShareLine]) -> Result<Vec<i64>> {
        let percents: Vec<Decimal> = lines
            .iter()
            .filter_map(|line| match line {
                ShareLine::Percent(p) => Some(*p),
                ShareLine::Amount(_) => None,
            })
            .collect();

        for (position, percent) in percents.iter().enumerate() {
            if percent.is_sign_negative() && !percent.is_zero() {
                return Err(EngineError::InvalidApportionment(format!(
                    "line {} has negative share {}",
                    position, percent
                )));
            }
            if *percent > Decimal::ONE_HUNDRED {
                return Err(EngineError::InvalidApportionment(format!(
                    "line {} share {} exceeds 100",
                    position, percent
                )));
            }
        }

        let share_sum = percents
            .iter()
            .try_fold(Decimal::ZERO, |acc, p| acc.checked_add(*p))
            .ok_or_else(|| overflow("share sum"))?;
        if (share_sum - Decimal::ONE_HUNDRED).abs() > self.percent_tolerance {
            return Err(EngineError::InvalidApportionment(format!(
                "shares sum to {}, expected 100",
                share_sum
            )));
        }

        let total_decimal = Decimal::from(total);
        let mut amounts = Vec::with_capacity(percents.len());
        for percent in &percents {
            let raw = total_decimal
                .checked_mul(*percent)
                .and_then(|v| v.checked_div(Decimal::ONE_HUNDRED))
                .ok_or_else(|| overflow("line amount"))?;
            let amount = round_half_even(raw, 0)
                .to_i64()
                .ok_or_else(|| overflow("line amount"))?;
            amounts.push(amount);
        }

        let allocated = amounts
            .iter()
            .try_fold(0i64, |acc, a| acc.checked_add(*a))
            .ok_or_else(|| overflow("allocated sum"))?;
        let residual = total - allocated;

        if let Some(last) = amounts.last_mut() {
            *last += residual;
            if *last < 0 {
                return Err(EngineError::InvalidApportionment(format!(
                    "rounding residual {} leaves the last line negative",
                    residual
                )));
            }
        }

        if residual != 0 {
            debug!(
                "Assigned rounding residual {} to last of {} lines (total {})",
                residual,
                amounts.len(),
                total
            );
        }

        Ok(amounts)
    }
}

fn amounts_checked(total: i64, lines: &[ShareLine]) -> Result<Vec<i64>> {
    let amounts: Vec<i64> = lines
        .iter()
        .filter_map(|line| match line {
            ShareLine::Amount(a) => Some(*a),
            ShareLine::Percent(_) => None,
        })
        .collect();

    if let Some(position) = amounts.iter().position(|a| *a < 0) {
        return Err(EngineError::InvalidApportionment(format!(
            "line {} has negative amount {}",
            position, amounts[position]
        )));
    }

    let actual = amounts
        .iter()
        .try_fold(0i64, |acc, a| acc.checked_add(*a))
        .ok_or_else(|| overflow("amount sum"))?;
    if actual != total {
        return Err(EngineError::ApportionmentMismatch {
            expected: total,
            actual,
        });
    }

    Ok(amounts)
}

fn overflow(what: &str) -> EngineError {
    EngineError::InvalidApportionment(format!("{} overflows", what))
}

pub fn apportion(
    total: i64,
    lines: &[ShareLine],
    mode: ApportionmentMode,
) -> Result<Vec<ApportionedLine>> {
    Apportioner::default().apportion(total, lines, mode)
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResolvedAllocation {
    pub category_id: String,
    pub date: NaiveDate,
    pub amount: i64,
    pub display_percent: Decimal,
}

/// The validated split of one operation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AllocationSet {
    pub operation_id: String,
    pub total: i64,
    pub lines: Vec<ResolvedAllocation>,
}

impl AllocationSet {
    pub fn is_split(&self) -> bool {
        !self.lines.is_empty()
    }

    pub fn allocated(&self) -> i64 {
        self.lines.iter().map(|l| l.amount).sum()
    }

    /// Lines in amount form, ready to be stored alongside the operation.
    pub fn to_allocation_lines(&self) -> Vec<AllocationLine> {
        self.lines
            .iter()
            .map(|line| AllocationLine {
                parent_operation_id: self.operation_id.clone(),
                category_id: line.category_id.clone(),
                share: ShareLine::Amount(line.amount),
                date: Some(line.date),
            })
            .collect()
    }
}

/// Validates and resolves the allocation lines of one operation.
///
/// An unsplit operation must carry no lines; a split one must carry at least
/// one, and every line must point back at the operation. Lines without a date
/// inherit the operation date.
pub fn apportion_operation(
    operation: &Operation,
    lines: &[AllocationLine],
    config: &EngineConfig,
) -> Result<AllocationSet> {
    operation.validate()?;

    if let Some(stray) = lines
        .iter()
        .find(|line| line.parent_operation_id != operation.id)
    {
        return Err(EngineError::InvalidApportionment(format!(
            "line for category {} belongs to operation {}, not {}",
            stray.category_id, stray.parent_operation_id, operation.id
        )));
    }

    if !operation.has_children {
        if !lines.is_empty() {
            return Err(EngineError::InvalidApportionment(format!(
                "operation {} is not split but has {} allocation lines",
                operation.id,
                lines.len()
            )));
        }
        return Ok(AllocationSet {
            operation_id: operation.id.clone(),
            total: operation.amount,
            lines: Vec::new(),
        });
    }

    let shares: Vec<ShareLine> = lines.iter().map(|line| line.share).collect();
    let mode = ApportionmentMode::detect(&shares)?;
    let apportioned = Apportioner::new(config).apportion(operation.amount, &shares, mode)?;

    let resolved = lines
        .iter()
        .zip(apportioned)
        .map(|(line, result)| ResolvedAllocation {
            category_id: line.category_id.clone(),
            date: line.date.unwrap_or(operation.date),
            amount: result.amount,
            display_percent: result.display_percent,
        })
        .collect();

    Ok(AllocationSet {
        operation_id: operation.id.clone(),
        total: operation.amount,
        lines: resolved,
    })
}
