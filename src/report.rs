use crate::balances::{AnomalyKind, BalanceReport};
use crate::error::Result;
use crate::partition::PartitionSet;
use crate::schema::CategoryNode;
use crate::utils::format_minor_units;

/// Nested markdown list of a forest. Non-selectable nodes are italicised.
pub fn tree_to_markdown(roots: &[CategoryNode]) -> String {
    let mut output = String::new();
    for root in roots {
        root.walk(&mut |node, depth| {
            let indent = "  ".repeat(depth);
            if node.selectable {
                output.push_str(&format!("{}- {}\n", indent, node.name));
            } else {
                output.push_str(&format!("{}- _{}_\n", indent, node.name));
            }
        });
    }
    output
}

pub fn partitions_to_markdown(partitions: &PartitionSet) -> String {
    let mut output = String::new();
    for partition in partitions.iter() {
        output.push_str(&format!("## {}\n\n", partition.name));
        if partition.root.children.is_empty() {
            output.push_str("_No categories_\n");
        } else {
            output.push_str(&tree_to_markdown(&partition.root.children));
        }
        output.push('\n');
    }
    output
}

fn anomaly_label(kind: AnomalyKind) -> &'static str {
    match kind {
        AnomalyKind::NegativeBalance => "negative balance",
        AnomalyKind::Gap => "gap",
    }
}

impl BalanceReport {
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn to_csv(&self) -> String {
        let mut output = String::new();
        output.push_str("Section,Key,Amount\n");

        for (group, amount) in &self.per_group {
            output.push_str(&format!("Group,{},{}\n", group, format_minor_units(*amount)));
        }
        output.push_str(&format!(
            "Group,unallocated,{}\n",
            format_minor_units(self.unallocated)
        ));

        for (entity, amount) in &self.per_entity {
            output.push_str(&format!("Entity,{},{}\n", entity, format_minor_units(*amount)));
        }

        for (currency, amount) in &self.per_currency {
            output.push_str(&format!(
                "Currency,{},{}\n",
                currency,
                format_minor_units(*amount)
            ));
        }

        output.push_str(&format!("Total,,{}\n", format_minor_units(self.total)));
        output
    }

    pub fn to_markdown(&self) -> String {
        let mut output = String::new();

        output.push_str("# Balance Summary\n\n");
        output.push_str(&format!("**Total:** {}\n\n", format_minor_units(self.total)));

        if !self.per_group.is_empty() || self.unallocated != 0 {
            output.push_str("## Groups\n\n");
            for (group, amount) in &self.per_group {
                output.push_str(&format!("- {}: {}\n", group, format_minor_units(*amount)));
            }
            output.push_str(&format!(
                "- Unallocated: {}\n\n",
                format_minor_units(self.unallocated)
            ));
        }

        if !self.per_entity.is_empty() {
            output.push_str("## Legal Entities\n\n");
            for (entity, amount) in &self.per_entity {
                output.push_str(&format!("- {}: {}\n", entity, format_minor_units(*amount)));
            }
            output.push('\n');
        }

        if !self.anomalies.is_empty() {
            output.push_str("## Anomalies\n\n");
            for anomaly in &self.anomalies {
                output.push_str(&format!(
                    "- ⚠️ {}: {}\n",
                    anomaly.account_id,
                    anomaly_label(anomaly.kind)
                ));
            }
            output.push('\n');
        }

        output
    }
}
