//! Agent pool
//!
//! Three agents behind one contract: the router plans tool calls, the
//! analyst explains, the reasoning agent compares and calculates. The pool
//! is an explicit dispatch table indexed by [`AgentKind`].

pub mod analyst;
pub mod prompts;
pub mod reasoning;
pub mod router;

pub use analyst::AnalystAgent;
pub use reasoning::ReasoningAgent;
pub use router::{KeywordRouter, LlmRouter};

use crate::error::AgentError;
use crate::execution::ToolSnapshot;
use crate::models::{DataPoint, ProfileHints};
use crate::tools::{ToolDescriptor, ToolInvocation};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use tokio::sync::mpsc;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum AgentKind {
    Router,
    Analyst,
    Reasoning,
}

impl AgentKind {
    fn slot(self) -> usize {
        match self {
            AgentKind::Router => 0,
            AgentKind::Analyst => 1,
            AgentKind::Reasoning => 2,
        }
    }
}

impl fmt::Display for AgentKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AgentKind::Router => write!(f, "router"),
            AgentKind::Analyst => write!(f, "analyst"),
            AgentKind::Reasoning => write!(f, "reasoning"),
        }
    }
}

/// Router's advice on which generating agent should answer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum AgentClass {
    #[default]
    Explain,
    Reason,
}

impl AgentClass {
    pub fn agent(self) -> AgentKind {
        match self {
            AgentClass::Explain => AgentKind::Analyst,
            AgentClass::Reason => AgentKind::Reasoning,
        }
    }
}

/// Router output. The default plan is "explain with no tools".
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(deny_unknown_fields)]
pub struct ToolPlan {
    pub agent_class: AgentClass,
    #[serde(default)]
    pub tools: Vec<ToolInvocation>,
}

/// Which entities were compared, on what metric, over which window.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ComparisonBasis {
    pub entities: Vec<String>,
    pub metric: String,
    pub window: String,
}

impl ComparisonBasis {
    pub fn describe(&self) -> String {
        format!(
            "Comparison basis: {} compared on {} over {}.",
            self.entities.join(" vs "),
            self.metric,
            self.window
        )
    }
}

/// Raw output of a generating agent, before assembly.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Draft {
    pub text: String,
    /// Figures computed by the agent itself rather than by the model.
    pub derived: Vec<DataPoint>,
    pub basis: Option<ComparisonBasis>,
}

impl Draft {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            ..Self::default()
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum AgentOutput {
    Plan(ToolPlan),
    Draft(Draft),
}

/// Everything an agent sees for one turn.
#[derive(Debug, Clone)]
pub struct AgentContext {
    pub query: String,
    /// Recent messages, oldest first, already truncated.
    pub history: Vec<String>,
    pub profile: Option<ProfileHints>,
    pub snapshot: Arc<ToolSnapshot>,
    pub available_tools: Vec<ToolDescriptor>,
    /// Set on the regeneration attempt after a malformed answer.
    pub strict: bool,
}

impl AgentContext {
    pub fn new(query: impl Into<String>) -> Self {
        Self {
            query: query.into(),
            history: Vec::new(),
            profile: None,
            snapshot: Arc::new(ToolSnapshot::empty()),
            available_tools: Vec::new(),
            strict: false,
        }
    }

    pub fn with_history(mut self, history: Vec<String>) -> Self {
        self.history = history;
        self
    }

    pub fn with_profile(mut self, profile: Option<ProfileHints>) -> Self {
        self.profile = profile;
        self
    }

    pub fn with_snapshot(mut self, snapshot: ToolSnapshot) -> Self {
        self.snapshot = Arc::new(snapshot);
        self
    }

    pub fn with_tools(mut self, tools: Vec<ToolDescriptor>) -> Self {
        self.available_tools = tools;
        self
    }
}

#[async_trait]
pub trait Agent: Send + Sync {
    fn kind(&self) -> AgentKind;

    async fn handle(&self, ctx: &AgentContext) -> Result<AgentOutput, AgentError>;

    /// Streaming variant. Chunks sent on `tokens` concatenate to the draft
    /// text. The default emits the whole draft as one chunk.
    async fn handle_stream(&self, ctx: &AgentContext, tokens: mpsc::Sender<String>) -> Result<AgentOutput, AgentError> {
        let output = self.handle(ctx).await?;
        if let AgentOutput::Draft(draft) = &output {
            tokens
                .send(draft.text.clone())
                .await
                .map_err(|_| AgentError::ProviderError("token consumer went away".to_string()))?;
        }
        Ok(output)
    }
}

/// Dispatch table: one agent per [`AgentKind`].
#[derive(Clone)]
pub struct AgentPool {
    agents: [Arc<dyn Agent>; 3],
}

impl AgentPool {
    pub fn new(router: Arc<dyn Agent>, analyst: Arc<dyn Agent>, reasoning: Arc<dyn Agent>) -> Self {
        debug_assert_eq!(router.kind(), AgentKind::Router);
        debug_assert_eq!(analyst.kind(), AgentKind::Analyst);
        debug_assert_eq!(reasoning.kind(), AgentKind::Reasoning);
        Self {
            agents: [router, analyst, reasoning],
        }
    }

    pub fn get(&self, kind: AgentKind) -> &Arc<dyn Agent> {
        &self.agents[kind.slot()]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_plan_schema() {
        let plan: ToolPlan = serde_json::from_value(json!({
            "agent_class": "reason",
            "tools": [{"tool": "fund_lookup", "args": {"name": "SBI Bluechip"}}]
        }))
        .unwrap();
        assert_eq!(plan.agent_class, AgentClass::Reason);
        assert_eq!(plan.tools[0].tool, "fund_lookup");

        assert!(serde_json::from_value::<ToolPlan>(json!({"agent_class": "explain", "prose": "hi"})).is_err());
        assert!(serde_json::from_value::<ToolPlan>(json!({"agent_class": "summarize"})).is_err());
        assert_eq!(ToolPlan::default().agent_class.agent(), AgentKind::Analyst);
    }

    #[test]
    fn test_comparison_basis_description() {
        let basis = ComparisonBasis {
            entities: vec!["SBI Bluechip".into(), "HDFC Top 100".into()],
            metric: "CAGR".into(),
            window: "3 years".into(),
        };
        assert_eq!(
            basis.describe(),
            "Comparison basis: SBI Bluechip vs HDFC Top 100 compared on CAGR over 3 years."
        );
    }
}
