//! Router agents: turn a question into a tool plan.

use super::prompts::{router_prompt, ROUTER_SYSTEM_PROMPT};
use super::{Agent, AgentClass, AgentContext, AgentKind, AgentOutput, ToolPlan};
use crate::classifier::{needs_reasoning, QueryAnalyzer, QueryIntent};
use crate::error::AgentError;
use crate::execution::MAX_TOOLS_PER_PLAN;
use crate::llm::{CompletionRequest, LanguageModel};
use crate::tools::{ToolDescriptor, ToolInvocation};
use async_trait::async_trait;
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::debug;

/// Low-latency LLM router. Output is a JSON plan only.
pub struct LlmRouter {
    model: Arc<dyn LanguageModel>,
}

impl LlmRouter {
    pub fn new(model: Arc<dyn LanguageModel>) -> Self {
        Self { model }
    }
}

#[async_trait]
impl Agent for LlmRouter {
    fn kind(&self) -> AgentKind {
        AgentKind::Router
    }

    async fn handle(&self, ctx: &AgentContext) -> Result<AgentOutput, AgentError> {
        let request = CompletionRequest::new(ROUTER_SYSTEM_PROMPT, router_prompt(ctx))
            .with_temperature(0.0)
            .with_max_output_tokens(512)
            .json();

        let raw = self.model.complete(&request).await?;
        let plan = parse_plan(&raw, &ctx.available_tools)?;

        debug!(
            model = self.model.model_name(),
            agent_class = ?plan.agent_class,
            tools = plan.tools.len(),
            "Router plan parsed"
        );
        Ok(AgentOutput::Plan(plan))
    }
}

/// Parse and structurally validate a router answer. Anything that does not
/// match the plan schema exactly is a malformed output.
pub fn parse_plan(raw: &str, available: &[ToolDescriptor]) -> Result<ToolPlan, AgentError> {
    let cleaned = raw
        .trim()
        .trim_start_matches("```json")
        .trim_start_matches("```")
        .trim_end_matches("```")
        .trim();

    let mut plan: ToolPlan = serde_json::from_str(cleaned)
        .map_err(|e| AgentError::MalformedOutput(format!("router plan does not match schema: {} | raw={}", e, raw)))?;

    if plan.tools.len() > MAX_TOOLS_PER_PLAN {
        return Err(AgentError::MalformedOutput(format!(
            "router requested {} tools, limit is {}",
            plan.tools.len(),
            MAX_TOOLS_PER_PLAN
        )));
    }

    for invocation in &mut plan.tools {
        if !available.iter().any(|t| t.name == invocation.tool) {
            return Err(AgentError::MalformedOutput(format!("unknown tool '{}'", invocation.tool)));
        }
        match invocation.args {
            Value::Null => invocation.args = json!({}),
            Value::Object(_) => {}
            _ => {
                return Err(AgentError::MalformedOutput(format!(
                    "arguments for '{}' must be an object",
                    invocation.tool
                )))
            }
        }
    }

    Ok(plan)
}

/// Deterministic router built on the keyword analyzer. Used when no model
/// is configured; produces the same plan shape as [`LlmRouter`].
pub struct KeywordRouter;

impl KeywordRouter {
    pub fn plan_for(query: &str) -> ToolPlan {
        let analysis = QueryAnalyzer::analyze(query);
        let mut tools = Vec::new();

        for name in analysis.fund_names.iter().take(3) {
            tools.push(ToolInvocation::new("fund_lookup", json!({ "name": name })));
        }
        if analysis.fund_names.is_empty() {
            for category in analysis.categories.iter().take(2) {
                tools.push(ToolInvocation::new("fund_category", json!({ "category": category })));
            }
        }
        for symbol in &analysis.stocks {
            tools.push(ToolInvocation::new("stock_quote", json!({ "symbol": symbol })));
        }
        if analysis.needs_market_data {
            tools.push(ToolInvocation::new("market_overview", json!({})));
        }
        tools.truncate(MAX_TOOLS_PER_PLAN);

        let agent_class = if needs_reasoning(query) || matches!(analysis.intent, QueryIntent::Compare | QueryIntent::Analyze) {
            AgentClass::Reason
        } else {
            AgentClass::Explain
        };

        ToolPlan { agent_class, tools }
    }
}

#[async_trait]
impl Agent for KeywordRouter {
    fn kind(&self) -> AgentKind {
        AgentKind::Router
    }

    async fn handle(&self, ctx: &AgentContext) -> Result<AgentOutput, AgentError> {
        let mut plan = Self::plan_for(&ctx.query);
        plan.tools.retain(|t| ctx.available_tools.iter().any(|d| d.name == t.tool));
        Ok(AgentOutput::Plan(plan))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::ScriptedModel;

    fn descriptors() -> Vec<ToolDescriptor> {
        ["fund_lookup", "fund_category", "stock_quote", "market_overview"]
            .into_iter()
            .map(|name| ToolDescriptor {
                name,
                description: "test",
                parameters: "{}",
            })
            .collect()
    }

    #[test]
    fn test_parse_plan_accepts_fenced_json() {
        let raw = "```json\n{\"agent_class\": \"reason\", \"tools\": [{\"tool\": \"market_overview\"}]}\n```";
        let plan = parse_plan(raw, &descriptors()).unwrap();
        assert_eq!(plan.agent_class, AgentClass::Reason);
        assert_eq!(plan.tools[0].args, json!({}));
    }

    #[test]
    fn test_parse_plan_rejects_malformed_output() {
        let cases = vec![
            "Sure! I'd call fund_lookup.",
            r#"{"agent_class": "explain", "tools": [{"tool": "web_search", "args": {}}]}"#,
            r#"{"agent_class": "explain", "tools": [{"tool": "fund_lookup", "args": "SBI"}]}"#,
            r#"{"agent_class": "explain", "tools": [], "answer": "NAV is..."}"#,
        ];
        for raw in cases {
            let err = parse_plan(raw, &descriptors()).unwrap_err();
            assert!(matches!(err, AgentError::MalformedOutput(_)), "{}", raw);
        }

        let many: Vec<Value> = (0..7).map(|_| json!({"tool": "market_overview", "args": {}})).collect();
        let raw = json!({"agent_class": "explain", "tools": many}).to_string();
        assert!(parse_plan(&raw, &descriptors()).is_err());
    }

    #[tokio::test]
    async fn test_llm_router_returns_plan() {
        let model = Arc::new(ScriptedModel::always(
            r#"{"agent_class": "explain", "tools": [{"tool": "stock_quote", "args": {"symbol": "TCS"}}]}"#,
        ));
        let router = LlmRouter::new(model.clone());
        let ctx = AgentContext::new("TCS price?").with_tools(descriptors());

        let output = router.handle(&ctx).await.unwrap();
        let AgentOutput::Plan(plan) = output else {
            panic!("expected a plan");
        };
        assert_eq!(plan.tools, vec![ToolInvocation::new("stock_quote", json!({"symbol": "TCS"}))]);
        assert_eq!(model.calls(), 1);
    }

    #[test]
    fn test_keyword_router_plans() {
        let plan = KeywordRouter::plan_for("Compare SBI Bluechip vs HDFC Top 100");
        assert_eq!(plan.agent_class, AgentClass::Reason);
        assert_eq!(
            plan.tools,
            vec![
                ToolInvocation::new("fund_lookup", json!({"name": "SBI Bluechip"})),
                ToolInvocation::new("fund_lookup", json!({"name": "HDFC Top 100"})),
            ]
        );

        let plan = KeywordRouter::plan_for("What is NAV?");
        assert_eq!(plan, ToolPlan::default());

        let plan = KeywordRouter::plan_for("How are Reliance shares and the Nifty doing?");
        assert_eq!(plan.agent_class, AgentClass::Explain);
        assert_eq!(
            plan.tools,
            vec![
                ToolInvocation::new("stock_quote", json!({"symbol": "RELIANCE"})),
                ToolInvocation::new("market_overview", json!({})),
            ]
        );

        let plan = KeywordRouter::plan_for("Tell me about mid cap funds");
        assert_eq!(plan.tools, vec![ToolInvocation::new("fund_category", json!({"category": "mid cap"}))]);
    }
}
