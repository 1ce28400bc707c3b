//! Output formatting for CLI commands.
//!
//! This module provides formatting utilities for displaying plans, state,
//! and drift reports to the user in text or JSON.

use colored::Colorize;
use std::fmt::Write;
use tabled::{Table, Tabled};

use crate::config::ValidationResult;
use crate::planner::{ActionType, DeploymentPlan};
use crate::reconciler::{DriftReport, ReconciliationResult};
use crate::state::TierState;

use super::commands::OutputFormat;

/// Output formatter for CLI.
#[derive(Debug)]
pub struct OutputFormatter {
    /// Output format.
    format: OutputFormat,
}

/// Resource row for table display.
#[derive(Tabled)]
struct ResourceRow {
    #[tabled(rename = "Name")]
    name: String,
    #[tabled(rename = "Kind")]
    kind: String,
    #[tabled(rename = "Provider ID")]
    provider_id: String,
    #[tabled(rename = "Updated")]
    updated: String,
}

/// Scaling-group row for table display.
#[derive(Tabled)]
struct GroupRow {
    #[tabled(rename = "Group")]
    name: String,
    #[tabled(rename = "Desired")]
    desired: u32,
    #[tabled(rename = "Members")]
    members: usize,
}

/// Plan item row for table display.
#[derive(Tabled)]
struct PlanItemRow {
    #[tabled(rename = "#")]
    index: usize,
    #[tabled(rename = "Action")]
    action: String,
    #[tabled(rename = "Resource")]
    resource: String,
    #[tabled(rename = "Reason")]
    reason: String,
}

impl OutputFormatter {
    /// Creates a new output formatter.
    #[must_use]
    pub const fn new(format: OutputFormat) -> Self {
        Self { format }
    }

    /// Formats a deployment plan for display.
    #[must_use]
    pub fn format_plan(&self, plan: &DeploymentPlan, detailed: bool) -> String {
        match self.format {
            OutputFormat::Json => Self::format_plan_json(plan),
            OutputFormat::Text => Self::format_plan_text(plan, detailed),
        }
    }

    /// Formats a plan as JSON.
    fn format_plan_json(plan: &DeploymentPlan) -> String {
        let items: Vec<serde_json::Value> = plan
            .items
            .iter()
            .map(|item| {
                serde_json::json!({
                    "action": item.action.to_string(),
                    "resource": item.resource_name,
                    "kind": item.kind.to_string(),
                    "reason": item.reason,
                    "dependencies": item.dependencies,
                })
            })
            .collect();

        serde_json::to_string_pretty(&serde_json::json!({
            "config_hash": plan.config_hash,
            "items": items,
        }))
        .unwrap_or_default()
    }

    /// Formats a plan as text.
    fn format_plan_text(plan: &DeploymentPlan, detailed: bool) -> String {
        if plan.is_empty() {
            return format!(
                "{} No changes required - infrastructure is up to date.\n",
                "✓".green()
            );
        }

        let mut output = String::new();

        let _ = write!(output, "\nPlan\n");
        let hash_prefix = plan.config_hash.get(..8).unwrap_or(&plan.config_hash);
        let _ = write!(output, "   Config hash: {hash_prefix}\n\n");

        let rows: Vec<PlanItemRow> = plan
            .items
            .iter()
            .enumerate()
            .map(|(i, item)| PlanItemRow {
                index: i + 1,
                action: Self::format_action(item.action),
                resource: item.resource_name.clone(),
                reason: Self::truncate(&item.reason, 48),
            })
            .collect();

        let table = Table::new(rows).to_string();
        output.push_str(&table);
        output.push('\n');

        if detailed {
            for item in &plan.items {
                if item.diff.is_empty() {
                    continue;
                }
                let _ = write!(output, "\n  {}:\n", item.resource_name);
                for detail in &item.diff {
                    let _ = writeln!(
                        output,
                        "    {}: {} -> {}",
                        detail.field,
                        detail.old_value.as_deref().unwrap_or("(none)"),
                        detail.new_value.as_deref().unwrap_or("(none)")
                    );
                }
            }
        }

        let _ = write!(
            output,
            "\nPlan: {} to create, {} to update, {} to replace, {} to destroy\n",
            plan.count_of(ActionType::Create).to_string().green(),
            plan.count_of(ActionType::Update).to_string().yellow(),
            plan.count_of(ActionType::Replace).to_string().yellow(),
            (plan.count_of(ActionType::Destroy) + plan.count_of(ActionType::RetireOld))
                .to_string()
                .red()
        );

        output
    }

    /// Formats recorded state for display.
    #[must_use]
    pub fn format_state(&self, state: &TierState, detailed: bool) -> String {
        match self.format {
            OutputFormat::Json => serde_json::to_string_pretty(state).unwrap_or_default(),
            OutputFormat::Text => Self::format_state_text(state, detailed),
        }
    }

    /// Formats state as text.
    fn format_state_text(state: &TierState, detailed: bool) -> String {
        let mut output = String::new();

        let _ = write!(
            output,
            "\nProject: {}/{}\n\n",
            state.project, state.environment
        );

        if state.resources.is_empty() {
            output.push_str("   No resources recorded.\n");
            return output;
        }

        let mut rows: Vec<ResourceRow> = state
            .resources
            .values()
            .map(|r| ResourceRow {
                name: r.name.clone(),
                kind: r.kind.to_string(),
                provider_id: Self::truncate(&r.provider_id, 24),
                updated: r.updated_at.format("%Y-%m-%d %H:%M:%S").to_string(),
            })
            .collect();
        rows.sort_by(|a, b| a.name.cmp(&b.name));

        output.push_str(&Table::new(rows).to_string());
        output.push('\n');

        if !state.groups.is_empty() {
            let mut group_rows: Vec<GroupRow> = state
                .groups
                .values()
                .map(|g| GroupRow {
                    name: g.name.clone(),
                    desired: g.desired_capacity,
                    members: g.member_count(),
                })
                .collect();
            group_rows.sort_by(|a, b| a.name.cmp(&b.name));

            output.push('\n');
            output.push_str(&Table::new(group_rows).to_string());
            output.push('\n');
        }

        if detailed {
            for record in state.resources.values() {
                let _ = write!(output, "\n  {}:\n", record.name);
                for (key, value) in &record.attributes {
                    let _ = writeln!(output, "    {key} = {value}");
                }
            }
        }

        output
    }

    /// Formats a reconciliation result.
    #[must_use]
    pub fn format_result(&self, result: &ReconciliationResult) -> String {
        match self.format {
            OutputFormat::Json => serde_json::to_string_pretty(result).unwrap_or_default(),
            OutputFormat::Text => {
                let mut output = String::new();
                let marker = if result.success {
                    "✓".green()
                } else {
                    "✗".red()
                };
                let _ = write!(output, "\n{marker} {result}");
                output
            }
        }
    }

    /// Formats a drift report.
    #[must_use]
    pub fn format_drift(&self, report: &DriftReport) -> String {
        match self.format {
            OutputFormat::Json => serde_json::to_string_pretty(report).unwrap_or_default(),
            OutputFormat::Text => {
                if report.has_drift {
                    format!("{} {report}\n", "⚠".yellow())
                } else {
                    format!("{} {report}\n", "✓".green())
                }
            }
        }
    }

    /// Formats validation output.
    #[must_use]
    pub fn format_validation(&self, result: &ValidationResult, show_warnings: bool) -> String {
        let mut output = String::new();

        if result.is_valid() {
            let _ = writeln!(output, "{} Configuration is valid.", "✓".green());
        } else {
            let _ = writeln!(
                output,
                "{} Configuration has {} error(s):",
                "✗".red(),
                result.error_count()
            );
            for error in &result.errors {
                let _ = writeln!(output, "   - {error}");
            }
        }

        if show_warnings && result.warning_count() > 0 {
            let _ = writeln!(output, "\n{} Warnings:", "⚠".yellow());
            for warning in &result.warnings {
                let _ = writeln!(output, "   - {warning}");
            }
        }

        output
    }

    /// Formats an action type with color.
    fn format_action(action: ActionType) -> String {
        match action {
            ActionType::Create => "create".green().to_string(),
            ActionType::Update => "update".yellow().to_string(),
            ActionType::Replace => "replace".yellow().to_string(),
            ActionType::RetireOld => "retire".red().to_string(),
            ActionType::Destroy => "destroy".red().to_string(),
            ActionType::Noop => "noop".normal().to_string(),
        }
    }

    /// Truncates a string to a maximum length with an ellipsis.
    fn truncate(s: &str, max: usize) -> String {
        if s.len() <= max {
            s.to_string()
        } else {
            format!("{}…", &s[..max.saturating_sub(1)])
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn truncate_keeps_short_strings() {
        assert_eq!(OutputFormatter::truncate("short", 10), "short");
    }

    #[test]
    fn truncate_shortens_long_strings() {
        let result = OutputFormatter::truncate("a-very-long-reason-string", 10);
        assert!(result.chars().count() <= 10);
        assert!(result.ends_with('…'));
    }

    #[test]
    fn empty_plan_formats_as_no_changes() {
        let formatter = OutputFormatter::new(OutputFormat::Text);
        let plan = DeploymentPlan::empty("abc123");
        let output = formatter.format_plan(&plan, false);
        assert!(output.contains("No changes required"));
    }
}
