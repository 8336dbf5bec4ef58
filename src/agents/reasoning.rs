//! Reasoning agent: comparisons and calculations.
//!
//! Numeric derivations (CAGR from NAV histories) are computed here, not by
//! the model. The model receives them as facts and must state the
//! comparison basis; the basis also travels with the draft so assembly can
//! guarantee it appears in the explanation.

use super::prompts::{generation_prompt, REASONING_SYSTEM_PROMPT};
use super::{Agent, AgentContext, AgentKind, AgentOutput, ComparisonBasis, Draft};
use crate::analytics::{annual_returns, cagr_over_years, format_pct, sharpe_ratio, trailing_return, WindowReturn, RISK_FREE_RATE};
use crate::classifier::{comparison_entities, time_window, QueryAnalyzer, TimeWindow};
use crate::error::AgentError;
use crate::llm::{CompletionRequest, LanguageModel};
use crate::models::DataPoint;
use crate::tools::providers::NavPoint;
use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::debug;

/// Window used when the question names none.
const DEFAULT_WINDOW: TimeWindow = TimeWindow::Years(3);

pub struct ReasoningAgent {
    model: Arc<dyn LanguageModel>,
}

/// Derived figures for one turn.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Derivation {
    pub data_points: Vec<DataPoint>,
    pub basis: Option<ComparisonBasis>,
    /// Prompt lines explaining each figure.
    notes: Vec<String>,
}

fn window_return(history: &[NavPoint], window: TimeWindow) -> Option<WindowReturn> {
    match window {
        TimeWindow::Years(years) => cagr_over_years(history, years),
        TimeWindow::Months(months) => trailing_return(history, i64::from(months) * 30),
    }
}

fn metric_label(window: TimeWindow) -> String {
    match window {
        TimeWindow::Years(years) => format!("{}Y CAGR", years),
        TimeWindow::Months(months) => format!("{}M return", months),
    }
}

/// Compute per-fund returns over the question's window and the basis of
/// the comparison.
pub fn derive(ctx: &AgentContext) -> Derivation {
    let window = time_window(&ctx.query).unwrap_or(DEFAULT_WINDOW);
    let mut derivation = Derivation::default();
    let mut fund_names = Vec::new();
    let mut has_quotes = false;

    for result in ctx.snapshot.results() {
        match result.tool.as_str() {
            "fund_lookup" => {
                let Some(name) = result.data.get("scheme_name").and_then(|v| v.as_str()) else {
                    continue;
                };
                fund_names.push(name.to_string());

                let history: Vec<NavPoint> = result
                    .data
                    .get("nav_history")
                    .cloned()
                    .and_then(|v| serde_json::from_value(v).ok())
                    .unwrap_or_default();

                match window_return(&history, window) {
                    Some(r) => {
                        let metric = format!("{} {}", name, metric_label(window));
                        derivation.notes.push(format!(
                            "- {}: {} (NAV {:.4} on {} to {:.4} on {})",
                            metric,
                            format_pct(r.value),
                            r.start.nav,
                            r.start.date,
                            r.end.nav,
                            r.end.date
                        ));
                        derivation.data_points.push(DataPoint::new(
                            metric,
                            format_pct(r.value),
                            r.end.date.format("%Y-%m-%d").to_string(),
                        ));
                        if let TimeWindow::Years(years) = window {
                            if let Some(sharpe) = sharpe_ratio(&annual_returns(&history, years)) {
                                derivation.notes.push(format!(
                                    "- {} Sharpe ratio over {}: {:.2} (risk-free rate {}%)",
                                    name, window, sharpe, RISK_FREE_RATE
                                ));
                            }
                        }
                    }
                    None => derivation.notes.push(format!(
                        "- {}: NAV history does not cover {}, the {} is unavailable",
                        name,
                        window,
                        metric_label(window)
                    )),
                }
            }
            "stock_quote" => has_quotes = true,
            _ => {}
        }
    }

    let mut entities = comparison_entities(&ctx.query);
    if entities.is_empty() {
        entities = if fund_names.len() >= 2 {
            fund_names.clone()
        } else {
            QueryAnalyzer::analyze(&ctx.query).fund_names
        };
    }
    if entities.is_empty() && fund_names.len() == 1 {
        entities = fund_names;
    }

    if !entities.is_empty() {
        let metric = if has_quotes && derivation.data_points.is_empty() {
            "latest price and day change".to_string()
        } else {
            match window {
                TimeWindow::Years(_) => "CAGR (annualized NAV growth)".to_string(),
                TimeWindow::Months(_) => "absolute NAV return".to_string(),
            }
        };
        derivation.basis = Some(ComparisonBasis {
            entities,
            metric,
            window: window.to_string(),
        });
    }

    derivation
}

impl ReasoningAgent {
    pub fn new(model: Arc<dyn LanguageModel>) -> Self {
        Self { model }
    }

    fn request(&self, ctx: &AgentContext, derivation: &Derivation) -> CompletionRequest {
        let mut extra = String::from("## Computed Metrics\n");
        if derivation.notes.is_empty() {
            extra.push_str("No metrics could be computed from the available data.\n");
        } else {
            extra.push_str("Use these exact figures:\n");
            extra.push_str(&derivation.notes.join("\n"));
            extra.push('\n');
        }
        if let Some(basis) = &derivation.basis {
            extra.push_str(&format!("\nState this first: {}", basis.describe()));
        }

        CompletionRequest::new(REASONING_SYSTEM_PROMPT, generation_prompt(ctx, Some(&extra)))
            .with_temperature(if ctx.strict { 0.0 } else { 0.2 })
            .with_max_output_tokens(4096)
    }

    fn draft(text: String, derivation: Derivation) -> Result<AgentOutput, AgentError> {
        if text.trim().is_empty() {
            return Err(AgentError::MalformedOutput("empty answer".to_string()));
        }
        Ok(AgentOutput::Draft(Draft {
            text,
            derived: derivation.data_points,
            basis: derivation.basis,
        }))
    }
}

#[async_trait]
impl Agent for ReasoningAgent {
    fn kind(&self) -> AgentKind {
        AgentKind::Reasoning
    }

    async fn handle(&self, ctx: &AgentContext) -> Result<AgentOutput, AgentError> {
        let derivation = derive(ctx);
        debug!(
            model = self.model.model_name(),
            derived = derivation.data_points.len(),
            strict = ctx.strict,
            "Reasoning agent generating"
        );
        let text = self.model.complete(&self.request(ctx, &derivation)).await?;
        Self::draft(text, derivation)
    }

    async fn handle_stream(&self, ctx: &AgentContext, tokens: mpsc::Sender<String>) -> Result<AgentOutput, AgentError> {
        let derivation = derive(ctx);
        let text = self.model.stream(&self.request(ctx, &derivation), tokens).await?;
        Self::draft(text, derivation)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::execution::{ToolOutcome, ToolSnapshot};
    use crate::testing::{fund_result, ScriptedModel};

    fn snapshot() -> ToolSnapshot {
        ToolSnapshot::new(vec![
            ToolOutcome::Fetched {
                result: fund_result("SBI Bluechip Fund - Direct Growth", 100.0, 133.1),
                cached: false,
            },
            ToolOutcome::Fetched {
                result: fund_result("HDFC Top 100 Fund - Direct Growth", 50.0, 59.55),
                cached: false,
            },
        ])
    }

    #[test]
    fn test_derive_computes_cagr_for_each_fund() {
        let ctx = AgentContext::new("Compare SBI Bluechip vs HDFC Top 100").with_snapshot(snapshot());
        let derivation = derive(&ctx);

        assert_eq!(derivation.data_points.len(), 2);
        assert_eq!(derivation.data_points[0].metric, "SBI Bluechip Fund - Direct Growth 3Y CAGR");
        assert_eq!(derivation.data_points[0].value, "10.00%");
        assert_eq!(derivation.data_points[1].value, "6.00%");

        let basis = derivation.basis.unwrap();
        assert_eq!(basis.entities, vec!["SBI Bluechip", "HDFC Top 100"]);
        assert_eq!(basis.window, "3 years");
    }

    #[test]
    fn test_uncovered_window_is_reported_not_invented() {
        let ctx = AgentContext::new("SBI Bluechip vs HDFC Top 100 over 10 years").with_snapshot(snapshot());
        let derivation = derive(&ctx);
        assert!(derivation.data_points.is_empty());
        assert!(derivation.notes.iter().all(|n| n.contains("unavailable")));
    }

    #[tokio::test]
    async fn test_prompt_carries_metrics_and_basis() {
        let model = Arc::new(ScriptedModel::always("Comparison basis: both funds on CAGR over 3 years."));
        let agent = ReasoningAgent::new(model.clone());
        let ctx = AgentContext::new("Compare SBI Bluechip vs HDFC Top 100").with_snapshot(snapshot());

        let AgentOutput::Draft(draft) = agent.handle(&ctx).await.unwrap() else {
            panic!("expected a draft");
        };
        assert_eq!(draft.derived.len(), 2);
        assert!(draft.basis.is_some());

        let prompt = &model.prompts()[0];
        assert!(prompt.contains("10.00%"));
        assert!(prompt.contains("Comparison basis: SBI Bluechip vs HDFC Top 100"));
        assert!(!prompt.contains("nav_history"));
    }
}
