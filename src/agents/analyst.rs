//! Analyst agent: explanatory answers grounded in the tool snapshot.

use super::prompts::{generation_prompt, ANALYST_SYSTEM_PROMPT};
use super::{Agent, AgentContext, AgentKind, AgentOutput, Draft};
use crate::error::AgentError;
use crate::llm::{CompletionRequest, LanguageModel};
use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::debug;

pub struct AnalystAgent {
    model: Arc<dyn LanguageModel>,
}

impl AnalystAgent {
    pub fn new(model: Arc<dyn LanguageModel>) -> Self {
        Self { model }
    }

    fn request(&self, ctx: &AgentContext) -> CompletionRequest {
        CompletionRequest::new(ANALYST_SYSTEM_PROMPT, generation_prompt(ctx, None))
            .with_temperature(if ctx.strict { 0.1 } else { 0.3 })
    }
}

fn non_empty(text: String) -> Result<AgentOutput, AgentError> {
    if text.trim().is_empty() {
        return Err(AgentError::MalformedOutput("empty answer".to_string()));
    }
    Ok(AgentOutput::Draft(Draft::text(text)))
}

#[async_trait]
impl Agent for AnalystAgent {
    fn kind(&self) -> AgentKind {
        AgentKind::Analyst
    }

    async fn handle(&self, ctx: &AgentContext) -> Result<AgentOutput, AgentError> {
        debug!(model = self.model.model_name(), strict = ctx.strict, "Analyst generating");
        let text = self.model.complete(&self.request(ctx)).await?;
        non_empty(text)
    }

    async fn handle_stream(&self, ctx: &AgentContext, tokens: mpsc::Sender<String>) -> Result<AgentOutput, AgentError> {
        debug!(model = self.model.model_name(), strict = ctx.strict, "Analyst streaming");
        let text = self.model.stream(&self.request(ctx), tokens).await?;
        non_empty(text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::ScriptedModel;

    #[tokio::test]
    async fn test_strict_attempt_carries_format_instruction() {
        let model = Arc::new(ScriptedModel::always("NAV is the per-unit price of a fund."));
        let agent = AnalystAgent::new(model.clone());

        let mut ctx = AgentContext::new("What is NAV?");
        agent.handle(&ctx).await.unwrap();
        ctx.strict = true;
        agent.handle(&ctx).await.unwrap();

        let prompts = model.prompts();
        assert!(!prompts[0].contains("could not be parsed"));
        assert!(prompts[1].contains("could not be parsed"));
    }

    #[tokio::test]
    async fn test_empty_answer_is_malformed() {
        let agent = AnalystAgent::new(Arc::new(ScriptedModel::always("  ")));
        let err = agent.handle(&AgentContext::new("What is NAV?")).await.unwrap_err();
        assert!(matches!(err, AgentError::MalformedOutput(_)));
    }
}
