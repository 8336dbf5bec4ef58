//! Conversation orchestrator
//!
//! One request is one task:
//! LOCK SESSION → ROUTE → EXECUTE TOOLS → GENERATE (≤ 2 attempts) → ASSEMBLE
//! → COMPLIANCE → APPEND → RETURN
//!
//! The session lock is held from load to append, so requests for one
//! session are applied in arrival order while other sessions run freely.

pub mod assembly;

use crate::agents::{
    Agent, AgentClass, AgentContext, AgentKind, AgentOutput, AgentPool, AnalystAgent, KeywordRouter, LlmRouter,
    ReasoningAgent, ToolPlan,
};
use crate::cache::{self, CacheStore};
use crate::classifier::is_comparison_query;
use crate::compliance::{create_default_compliance_engine, ComplianceEngine};
use crate::config::EngineConfig;
use crate::error::{AgentError, Result, ValidationError};
use crate::execution::ToolExecutor;
use crate::llm::{GeminiClient, LanguageModel, UnconfiguredModel};
use crate::models::{ChatRequest, ChatResponse, InvestmentResponse, ProfileHints};
use crate::session::{InMemorySessionStore, Message, PostgresSessionStore, Role, Session, SessionLocks, SessionStore};
use crate::tools::{create_default_registry, ToolRegistry, ToolResult};
use serde_json::json;
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::sync::OwnedMutexGuard;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Generation attempts per request: the first plus one regeneration.
pub const MAX_ATTEMPTS: usize = 2;

/// Explanations that must never be served from the response cache.
const UNCACHEABLE_MARKERS: &[&str] = &[
    "apologize",
    "error processing",
    "encountered an error",
    "try rephrasing",
    "could not complete a full analysis",
];

#[derive(Debug, Clone)]
pub struct OrchestratorSettings {
    pub router_timeout: Duration,
    pub agent_timeout: Duration,
    pub context_messages: usize,
    pub context_message_chars: usize,
    pub response_cache_enabled: bool,
}

impl From<&EngineConfig> for OrchestratorSettings {
    fn from(config: &EngineConfig) -> Self {
        Self {
            router_timeout: config.router_timeout,
            agent_timeout: config.agent_timeout,
            context_messages: config.context_messages,
            context_message_chars: config.context_message_chars,
            response_cache_enabled: config.response_cache_enabled,
        }
    }
}

/// Why one generation attempt produced no usable response.
#[derive(Debug, Error)]
pub(crate) enum AttemptError {
    #[error(transparent)]
    Agent(#[from] AgentError),
    #[error(transparent)]
    Validation(#[from] ValidationError),
}

/// A request holding its session lock.
pub(crate) struct Turn {
    pub session_id: String,
    pub query: String,
    history: Vec<String>,
    profile: Option<ProfileHints>,
    cache_key: String,
    _guard: OwnedMutexGuard<()>,
}

/// Generating agent and its context after routing and tool execution.
pub(crate) struct Prepared {
    pub kind: AgentKind,
    pub class: AgentClass,
    pub ctx: AgentContext,
}

pub struct Orchestrator {
    settings: OrchestratorSettings,
    agents: AgentPool,
    executor: ToolExecutor,
    tool_cache: Arc<CacheStore<ToolResult>>,
    response_cache: CacheStore<InvestmentResponse>,
    sessions: Arc<dyn SessionStore>,
    locks: SessionLocks,
    compliance: ComplianceEngine,
}

impl Orchestrator {
    pub fn new(config: &EngineConfig, agents: AgentPool, registry: ToolRegistry, sessions: Arc<dyn SessionStore>) -> Self {
        let tool_cache = Arc::new(CacheStore::new(config.tool_cache_ttl));
        Self {
            settings: OrchestratorSettings::from(config),
            agents,
            executor: ToolExecutor::new(Arc::new(registry), tool_cache.clone(), config.tool_timeout),
            tool_cache,
            response_cache: CacheStore::new(config.response_cache_ttl),
            sessions,
            locks: SessionLocks::new(),
            compliance: create_default_compliance_engine().with_regulator_notice(config.include_regulator_notice),
        }
    }

    /// Production wiring: Gemini agents when a key is configured, HTTP data
    /// providers, and the Postgres session store when a database is set.
    pub fn from_config(config: &EngineConfig) -> Result<Self> {
        let agents = if config.llm_enabled() {
            let router: Arc<dyn LanguageModel> = Arc::new(GeminiClient::new(&config.gemini_api_key, &config.router_model)?);
            let analyst: Arc<dyn LanguageModel> = Arc::new(GeminiClient::new(&config.gemini_api_key, &config.analyst_model)?);
            let reasoning: Arc<dyn LanguageModel> =
                Arc::new(GeminiClient::new(&config.gemini_api_key, &config.reasoning_model)?);
            info!(
                router = %config.router_model,
                analyst = %config.analyst_model,
                reasoning = %config.reasoning_model,
                "Agent pool: gemini"
            );
            AgentPool::new(
                Arc::new(LlmRouter::new(router)),
                Arc::new(AnalystAgent::new(analyst)),
                Arc::new(ReasoningAgent::new(reasoning)),
            )
        } else {
            warn!("GEMINI_API_KEY not set: keyword routing only, answers will use the fallback path");
            let model: Arc<dyn LanguageModel> = Arc::new(UnconfiguredModel);
            AgentPool::new(
                Arc::new(KeywordRouter),
                Arc::new(AnalystAgent::new(model.clone())),
                Arc::new(ReasoningAgent::new(model)),
            )
        };

        let sessions: Arc<dyn SessionStore> = match &config.database_url {
            Some(url) => Arc::new(PostgresSessionStore::connect_lazy(url, config.session_history_limit)?),
            None => {
                info!("Session store backend: in-memory");
                Arc::new(InMemorySessionStore::new(config.session_history_limit))
            }
        };

        Ok(Self::new(config, agents, create_default_registry(config)?, sessions))
    }

    /// Blocking chat call.
    ///
    /// Only a blank message or a session store failure is an `Err`; tool
    /// and agent failures come back as a degraded response.
    pub async fn process(&self, request: ChatRequest) -> Result<ChatResponse> {
        let start = Instant::now();
        let session_id = resolve_session_id(&request);

        let turn = self.begin(session_id.clone(), &request).await?;
        let outcome = self.run_blocking(turn).await;
        self.release(&session_id).await;
        let (response, cached, degraded) = outcome?;

        let processing_time_ms = start.elapsed().as_millis() as u64;
        info!(
            session_id = %session_id,
            cached,
            degraded,
            processing_time_ms,
            "Chat request completed"
        );

        Ok(ChatResponse {
            session_id,
            response,
            processing_time_ms,
            cached,
            degraded,
        })
    }

    async fn run_blocking(&self, turn: Turn) -> Result<(InvestmentResponse, bool, bool)> {
        if let Some(response) = self.cached(&turn).await {
            self.commit(turn, &response, false, true).await?;
            return Ok((response, true, false));
        }

        let (ctx, plan) = self.route(&turn).await;
        let mut prepared = self.execute_plan(ctx, plan).await;
        let agent = self.agent(prepared.kind).clone();

        let mut assembled = None;
        for attempt in 1..=MAX_ATTEMPTS {
            let result = match tokio::time::timeout(self.settings.agent_timeout, agent.handle(&prepared.ctx)).await {
                Ok(output) => output
                    .map_err(AttemptError::from)
                    .and_then(|output| self.assemble_output(output, None, &prepared)),
                Err(_) => Err(self.agent_timeout_error().into()),
            };

            match result {
                Ok(response) => {
                    assembled = Some(response);
                    break;
                }
                Err(error) => {
                    warn!(
                        session_id = %turn.session_id,
                        agent = %prepared.kind,
                        attempt,
                        error = %error,
                        "Generation attempt failed"
                    );
                    prepared.ctx.strict = matches!(error, AttemptError::Validation(_));
                }
            }
        }

        let (response, degraded) = self.finish(assembled, &prepared);
        self.commit(turn, &response, degraded, false).await?;
        Ok((response, false, degraded))
    }

    /// Clear both caches and, when given, the caller's session. Idempotent
    /// and infallible: a store failure is logged, not returned.
    pub async fn reset(&self, session_id: Option<&str>) {
        self.tool_cache.clear().await;
        self.response_cache.clear().await;

        if let Some(id) = session_id {
            let guard = self.locks.acquire(id).await;
            if let Err(e) = self.sessions.clear(id).await {
                warn!(session_id = %id, error = %e, "Session clear failed during reset");
            }
            drop(guard);
            self.release(id).await;
        }
        info!(session_id = session_id.unwrap_or("-"), "Reset completed");
    }

    /// Remove one session's history and profile.
    pub async fn clear_session(&self, session_id: &str) -> Result<()> {
        let guard = self.locks.acquire(session_id).await;
        let result = self.sessions.clear(session_id).await;
        drop(guard);
        self.release(session_id).await;
        result?;
        info!(session_id = %session_id, "Session cleared");
        Ok(())
    }

    /// Ordered messages of a session; empty for an unknown id.
    pub async fn history(&self, session_id: &str) -> Result<Vec<Message>> {
        Ok(self
            .sessions
            .load(session_id)
            .await?
            .map(|session| session.messages().cloned().collect())
            .unwrap_or_default())
    }

    //
    // ================= Phases shared with the stream coordinator =================
    //

    /// Validate the request, take the session lock, then load or create the
    /// session.
    pub(crate) async fn begin(&self, session_id: String, request: &ChatRequest) -> Result<Turn> {
        request.validate()?;
        let guard = self.locks.acquire(&session_id).await;

        match self.load_session(&session_id, request.profile_hints.as_ref()).await {
            Ok((session, profile)) => {
                let history = session
                    .recent(self.settings.context_messages)
                    .into_iter()
                    .map(|m| context_line(m, self.settings.context_message_chars))
                    .collect();

                debug!(session_id = %session_id, messages = session.len(), "Session loaded");
                Ok(Turn {
                    cache_key: response_cache_key(&request.message, profile.as_ref()),
                    session_id,
                    query: request.message.clone(),
                    history,
                    profile,
                    _guard: guard,
                })
            }
            Err(e) => {
                drop(guard);
                self.release(&session_id).await;
                warn!(session_id = %session_id, error = %e, "Session could not be resolved");
                Err(e.into())
            }
        }
    }

    async fn load_session(
        &self,
        session_id: &str,
        hints: Option<&ProfileHints>,
    ) -> std::result::Result<(Session, Option<ProfileHints>), crate::error::SessionError> {
        let session = match self.sessions.load(session_id).await? {
            Some(session) => session,
            None => {
                self.sessions.create(session_id).await?;
                info!(session_id = %session_id, "Session created");
                Session::new(session_id)
            }
        };

        let profile = match hints {
            Some(hints) => {
                self.sessions.save_profile(session_id, hints).await?;
                Some(hints.clone())
            }
            None => session.profile.clone(),
        };
        Ok((session, profile))
    }

    pub(crate) async fn release(&self, session_id: &str) {
        self.locks.release_idle(session_id).await;
    }

    pub(crate) async fn cached(&self, turn: &Turn) -> Option<InvestmentResponse> {
        if !self.settings.response_cache_enabled {
            return None;
        }
        let hit = self.response_cache.get(&turn.cache_key).await;
        if hit.is_some() {
            info!(session_id = %turn.session_id, "Response cache hit");
        }
        hit
    }

    /// Ask the router for a plan. Any router failure, including a timeout,
    /// downgrades to the default "explain with no tools" plan.
    pub(crate) async fn route(&self, turn: &Turn) -> (AgentContext, ToolPlan) {
        let ctx = AgentContext::new(turn.query.clone())
            .with_history(turn.history.clone())
            .with_profile(turn.profile.clone())
            .with_tools(self.executor.registry().describe());

        let router = self.agent(AgentKind::Router);
        let plan = match tokio::time::timeout(self.settings.router_timeout, router.handle(&ctx)).await {
            Ok(Ok(AgentOutput::Plan(plan))) => plan,
            Ok(Ok(AgentOutput::Draft(_))) => {
                warn!(session_id = %turn.session_id, "Router returned prose, using default plan");
                ToolPlan::default()
            }
            Ok(Err(e)) => {
                warn!(session_id = %turn.session_id, kind = ?e.kind(), error = %e, "Router failed, using default plan");
                ToolPlan::default()
            }
            Err(_) => {
                warn!(
                    session_id = %turn.session_id,
                    timeout_secs = self.settings.router_timeout.as_secs(),
                    "Router timed out, using default plan"
                );
                ToolPlan::default()
            }
        };

        (ctx, plan)
    }

    /// Run the plan's tools and pick the generating agent. The comparison
    /// heuristic overrides the router's advice.
    pub(crate) async fn execute_plan(&self, ctx: AgentContext, plan: ToolPlan) -> Prepared {
        let class = select_class(plan.agent_class, &ctx.query);
        if class != plan.agent_class {
            debug!(advised = ?plan.agent_class, "Comparison query, overriding router to reason");
        }

        let snapshot = self.executor.execute(&plan.tools).await;
        info!(
            agent = %class.agent(),
            tools = plan.tools.len(),
            degraded = snapshot.is_degraded(),
            "Tools resolved, dispatching"
        );

        Prepared {
            kind: class.agent(),
            class,
            ctx: ctx.with_snapshot(snapshot),
        }
    }

    pub(crate) fn agent(&self, kind: AgentKind) -> &Arc<dyn Agent> {
        self.agents.get(kind)
    }

    pub(crate) fn agent_timeout(&self) -> Duration {
        self.settings.agent_timeout
    }

    pub(crate) fn agent_timeout_error(&self) -> AgentError {
        AgentError::Timeout(format!("no answer within {}s", self.settings.agent_timeout.as_secs()))
    }

    /// Assemble a generating agent's output. `streamed` replaces the draft
    /// text with the concatenated tokens actually delivered.
    pub(crate) fn assemble_output(
        &self,
        output: AgentOutput,
        streamed: Option<String>,
        prepared: &Prepared,
    ) -> std::result::Result<InvestmentResponse, AttemptError> {
        let AgentOutput::Draft(mut draft) = output else {
            return Err(AgentError::MalformedOutput("generating agent returned a plan".to_string()).into());
        };
        if let Some(text) = streamed {
            draft.text = text;
        }
        Ok(assembly::assemble(&draft, prepared.class, &prepared.ctx.snapshot)?)
    }

    /// Compliance annotation, or the plain-text fallback when no attempt
    /// succeeded. Returns the response and whether it is degraded.
    pub(crate) fn finish(&self, assembled: Option<InvestmentResponse>, prepared: &Prepared) -> (InvestmentResponse, bool) {
        let snapshot = &prepared.ctx.snapshot;
        match assembled {
            Some(response) => {
                let (response, checks) = self.compliance.annotate(response, !snapshot.is_degraded());
                let failed: Vec<&str> = checks
                    .iter()
                    .filter(|check| !check.passed)
                    .map(|check| check.rule_name.as_str())
                    .collect();
                info!(
                    agent = %prepared.kind,
                    checks = checks.len(),
                    failed = ?failed,
                    confidence = response.confidence_score.unwrap_or_default(),
                    "Compliance annotation completed"
                );
                (response, snapshot.is_degraded())
            }
            None => {
                warn!(agent = %prepared.kind, "All generation attempts failed, returning fallback");
                let mut response = assembly::fallback(snapshot, self.compliance.default_disclaimer());
                self.compliance.ensure_disclaimer(&mut response);
                (response, true)
            }
        }
    }

    /// Append the user message and the response as one turn, then populate
    /// the response cache. Consumes the turn, releasing the session lock.
    pub(crate) async fn commit(&self, turn: Turn, response: &InvestmentResponse, degraded: bool, from_cache: bool) -> Result<()> {
        self.sessions
            .append_turn(
                &turn.session_id,
                Message::user(turn.query.clone()),
                Message::agent(response.clone()),
            )
            .await?;

        if !from_cache && self.cacheable(response, degraded) {
            self.response_cache.set(turn.cache_key.clone(), response.clone(), None).await;
            debug!(session_id = %turn.session_id, "Response cached");
        }
        Ok(())
    }

    fn cacheable(&self, response: &InvestmentResponse, degraded: bool) -> bool {
        if !self.settings.response_cache_enabled || degraded {
            return false;
        }
        if response.confidence_score.is_some_and(|score| score < 0.5) {
            return false;
        }
        let lower = response.explanation.to_lowercase();
        !UNCACHEABLE_MARKERS.iter().any(|marker| lower.contains(marker))
    }
}

pub(crate) fn resolve_session_id(request: &ChatRequest) -> String {
    request
        .session_id
        .as_deref()
        .map(str::trim)
        .filter(|id| !id.is_empty())
        .map(str::to_string)
        .unwrap_or_else(|| Uuid::new_v4().to_string())
}

fn select_class(advised: AgentClass, query: &str) -> AgentClass {
    if is_comparison_query(query) {
        AgentClass::Reason
    } else {
        advised
    }
}

fn context_line(message: &Message, max_chars: usize) -> String {
    let speaker = match message.role {
        Role::User => "User",
        Role::Agent => "Assistant",
    };
    let text = message.text();
    if text.chars().count() > max_chars {
        let truncated: String = text.chars().take(max_chars).collect();
        format!("{}: {}...", speaker, truncated)
    } else {
        format!("{}: {}", speaker, text)
    }
}

fn response_cache_key(message: &str, profile: Option<&ProfileHints>) -> String {
    cache::fingerprint(
        "chat_response",
        &json!({
            "message": message,
            "risk_tolerance": profile.map(|p| p.risk_tolerance),
            "investment_horizon": profile.map(|p| p.investment_horizon),
        }),
    )
}
