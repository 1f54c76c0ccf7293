use crate::error::{EngineError, Result};
use crate::filter::ClassificationContext;
use crate::partition::PartitionRule;
use rust_decimal::Decimal;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};

/// Business data the engine is parameterised with. Nothing here is a
/// structural invariant; callers are expected to load it alongside the feed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct EngineConfig {
    #[schemars(
        description = "Ordered partition rules. The first rule whose keyword occurs in a node's type tag classifies it."
    )]
    #[serde(default = "default_partition_rules")]
    pub partition_rules: Vec<PartitionRule>,

    #[schemars(
        description = "Type-tag keywords that make a category eligible in each classification context."
    )]
    #[serde(default = "default_context_keywords")]
    pub context_keywords: BTreeMap<ClassificationContext, Vec<String>>,

    #[schemars(
        description = "Allowed deviation of the summed share percentages from 100 in percent-mode apportionment."
    )]
    #[serde(default = "default_percent_tolerance")]
    pub percent_tolerance: Decimal,

    #[schemars(description = "Decimal places of the displayed percentage of each allocation line.")]
    #[serde(default = "default_display_scale")]
    pub display_scale: u32,
}

fn default_partition_rules() -> Vec<PartitionRule> {
    vec![
        PartitionRule::new("Asset", "Актив"),
        PartitionRule::new("Capital", "Капитал"),
        PartitionRule::new("Liability", "Обязательств"),
    ]
}

fn default_context_keywords() -> BTreeMap<ClassificationContext, Vec<String>> {
    let mut keywords = BTreeMap::new();
    keywords.insert(ClassificationContext::Income, vec!["Доход".to_string()]);
    keywords.insert(ClassificationContext::Payment, vec!["Расход".to_string()]);
    keywords.insert(ClassificationContext::Transfer, vec!["Перевод".to_string()]);
    keywords.insert(
        ClassificationContext::Accrual,
        vec!["Доход".to_string(), "Расход".to_string()],
    );
    keywords
}

fn default_percent_tolerance() -> Decimal {
    Decimal::new(1, 2)
}

fn default_display_scale() -> u32 {
    2
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            partition_rules: default_partition_rules(),
            context_keywords: default_context_keywords(),
            percent_tolerance: default_percent_tolerance(),
            display_scale: default_display_scale(),
        }
    }
}

impl EngineConfig {
    pub fn from_json(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn validate(&self) -> Result<()> {
        validate_partition_rules(&self.partition_rules)?;

        if self.percent_tolerance.is_sign_negative() {
            return Err(EngineError::InvalidConfig(format!(
                "percent tolerance must be non-negative, got {}",
                self.percent_tolerance
            )));
        }

        if self.display_scale > 10 {
            return Err(EngineError::InvalidConfig(format!(
                "display scale {} exceeds 10 decimal places",
                self.display_scale
            )));
        }

        for (context, keywords) in &self.context_keywords {
            if keywords.iter().any(|k| k.trim().is_empty()) {
                return Err(EngineError::InvalidConfig(format!(
                    "context {:?} has an empty keyword",
                    context
                )));
            }
        }

        Ok(())
    }

    /// Keywords for a context; an unconfigured context matches nothing.
    pub fn keywords_for(&self, context: ClassificationContext) -> &[String] {
        self.context_keywords
            .get(&context)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    pub fn generate_json_schema() -> schemars::schema::RootSchema {
        schemars::schema_for!(EngineConfig)
    }

    pub fn schema_as_json() -> Result<String> {
        let schema = Self::generate_json_schema();
        Ok(serde_json::to_string_pretty(&schema)?)
    }
}

pub(crate) fn validate_partition_rules(rules: &[PartitionRule]) -> Result<()> {
    let mut seen = HashSet::new();
    for rule in rules {
        if rule.name.trim().is_empty() {
            return Err(EngineError::InvalidConfig(
                "partition rule has an empty name".to_string(),
            ));
        }
        if rule.keyword.trim().is_empty() {
            return Err(EngineError::InvalidConfig(format!(
                "partition rule '{}' has an empty keyword",
                rule.name
            )));
        }
        if !seen.insert(rule.name.as_str()) {
            return Err(EngineError::InvalidConfig(format!(
                "partition rule '{}' is declared more than once",
                rule.name
            )));
        }
    }
    Ok(())
}
