//! Test doubles shared by the unit tests: scripted models, counting tools
//! and an orchestrator builder wired entirely in memory.

use crate::agents::{Agent, AgentContext, AgentKind, AgentOutput, AgentPool, AnalystAgent, ReasoningAgent, ToolPlan};
use crate::config::EngineConfig;
use crate::error::{AgentError, SessionError, ToolError};
use crate::llm::{CompletionRequest, LanguageModel};
use crate::models::ProfileHints;
use crate::orchestrator::Orchestrator;
use crate::session::{InMemorySessionStore, Message, Session, SessionStore};
use crate::tools::{DataTool, SourceRef, ToolRegistry, ToolResult, FUND_SOURCE_NAME, FUND_SOURCE_URL};
use async_trait::async_trait;
use chrono::{Duration as ChronoDuration, Utc};
use serde_json::{json, Value};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{mpsc, Notify};

/// A well-formed answer with a metadata block.
pub const VALID_ANSWER: &str = "NAV (net asset value) is the per-unit price of a mutual fund, computed every business day from the market value of its holdings.\n\n```json\n{\"data_points\": [], \"risk_disclaimer\": \"Mutual fund investments are subject to market risks.\", \"confidence_score\": 0.8}\n```";

const CHUNK_CHARS: usize = 7;

//
// ================= Tools =================
//

type Responder = Box<dyn Fn(&Value) -> Result<Value, ToolError> + Send + Sync>;

pub struct CountingTool {
    name: &'static str,
    responder: Responder,
    delay: Option<Duration>,
    calls: AtomicUsize,
}

impl CountingTool {
    pub fn responding(
        name: &'static str,
        responder: impl Fn(&Value) -> Result<Value, ToolError> + Send + Sync + 'static,
    ) -> Self {
        Self {
            name,
            responder: Box::new(responder),
            delay: None,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn ok(name: &'static str, data: Value) -> Self {
        Self::responding(name, move |_| Ok(data.clone()))
    }

    pub fn failing(name: &'static str, error: ToolError) -> Self {
        Self::responding(name, move |_| Err(error.clone()))
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl DataTool for CountingTool {
    fn name(&self) -> &'static str {
        self.name
    }

    fn description(&self) -> &'static str {
        "test tool"
    }

    fn parameters(&self) -> &'static str {
        "{}"
    }

    async fn invoke(&self, args: &Value) -> Result<ToolResult, ToolError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        let data = (self.responder)(args)?;
        Ok(ToolResult {
            tool: self.name.to_string(),
            data,
            source: SourceRef {
                name: FUND_SOURCE_NAME.to_string(),
                url: FUND_SOURCE_URL.to_string(),
            },
            fetched_at: Utc::now(),
            as_of: Some(Utc::now().date_naive().format("%Y-%m-%d").to_string()),
        })
    }
}

/// A `fund_lookup` result whose NAV history spans exactly three years,
/// newest first, ending today at `end_nav`.
pub fn fund_result(name: &str, start_nav: f64, end_nav: f64) -> ToolResult {
    let today = Utc::now().date_naive();
    let mid_nav = (start_nav + end_nav) / 2.0;
    let date = |days: i64| (today - ChronoDuration::days(days)).format("%Y-%m-%d").to_string();

    ToolResult {
        tool: "fund_lookup".to_string(),
        data: json!({
            "scheme_code": "000000",
            "scheme_name": name,
            "nav": end_nav,
            "nav_date": date(0),
            "trailing_returns": {},
            "nav_history": [
                { "date": date(0), "nav": end_nav },
                { "date": date(500), "nav": mid_nav },
                { "date": date(1095), "nav": start_nav },
            ],
        }),
        source: SourceRef {
            name: FUND_SOURCE_NAME.to_string(),
            url: FUND_SOURCE_URL.to_string(),
        },
        fetched_at: Utc::now(),
        as_of: Some(date(0)),
    }
}

//
// ================= Models =================
//

enum Script {
    /// Replies in order; the last one repeats.
    Replies(Mutex<VecDeque<Result<String, AgentError>>>),
    /// Answers with the question found in the prompt.
    Echo,
}

pub struct ScriptedModel {
    script: Script,
    delay: Option<Duration>,
    disconnect_after: Option<usize>,
    calls: AtomicUsize,
    prompts: Mutex<Vec<String>>,
}

impl ScriptedModel {
    fn with_script(script: Script) -> Self {
        Self {
            script,
            delay: None,
            disconnect_after: None,
            calls: AtomicUsize::new(0),
            prompts: Mutex::new(Vec::new()),
        }
    }

    pub fn always(reply: &str) -> Self {
        Self::sequence(vec![Ok(reply.to_string())])
    }

    pub fn failing(error: AgentError) -> Self {
        Self::sequence(vec![Err(error)])
    }

    pub fn sequence(replies: Vec<Result<String, AgentError>>) -> Self {
        Self::with_script(Script::Replies(Mutex::new(replies.into())))
    }

    pub fn echo() -> Self {
        Self::with_script(Script::Echo)
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Streams `chunks` chunks, then fails as a dropped provider connection.
    pub fn disconnecting_after(mut self, chunks: usize) -> Self {
        self.disconnect_after = Some(chunks);
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn prompts(&self) -> Vec<String> {
        self.prompts.lock().unwrap().clone()
    }

    async fn reply(&self, request: &CompletionRequest) -> Result<String, AgentError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.prompts.lock().unwrap().push(request.prompt.clone());
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }

        match &self.script {
            Script::Replies(replies) => {
                let mut replies = replies.lock().unwrap();
                if replies.len() > 1 {
                    replies.pop_front().unwrap()
                } else {
                    replies.front().cloned().unwrap()
                }
            }
            Script::Echo => {
                let question = request
                    .prompt
                    .split("## Question\n")
                    .nth(1)
                    .and_then(|rest| rest.lines().next())
                    .unwrap_or_default();
                Ok(format!("Answer to: {}", question))
            }
        }
    }
}

#[async_trait]
impl LanguageModel for ScriptedModel {
    fn model_name(&self) -> &str {
        "scripted"
    }

    async fn complete(&self, request: &CompletionRequest) -> Result<String, AgentError> {
        self.reply(request).await
    }

    async fn stream(&self, request: &CompletionRequest, tokens: mpsc::Sender<String>) -> Result<String, AgentError> {
        let text = self.reply(request).await?;
        let chars: Vec<char> = text.chars().collect();
        for (sent, chunk) in chars.chunks(CHUNK_CHARS).enumerate() {
            if self.disconnect_after == Some(sent) {
                return Err(AgentError::ProviderError("stream interrupted".to_string()));
            }
            tokens
                .send(chunk.iter().collect())
                .await
                .map_err(|_| AgentError::ProviderError("token consumer went away".to_string()))?;
        }
        Ok(text)
    }
}

//
// ================= Agents =================
//

pub struct StaticRouter {
    plan: Result<ToolPlan, AgentError>,
    delay: Option<Duration>,
}

impl StaticRouter {
    pub fn plan(plan: ToolPlan) -> Self {
        Self { plan: Ok(plan), delay: None }
    }

    pub fn failing(error: AgentError) -> Self {
        Self {
            plan: Err(error),
            delay: None,
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }
}

#[async_trait]
impl Agent for StaticRouter {
    fn kind(&self) -> AgentKind {
        AgentKind::Router
    }

    async fn handle(&self, _ctx: &AgentContext) -> Result<AgentOutput, AgentError> {
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        self.plan.clone().map(AgentOutput::Plan)
    }
}

//
// ================= Sessions =================
//

/// Store whose backend is always down.
pub struct FailingStore;

fn down() -> SessionError {
    SessionError::StoreUnavailable("connection refused".to_string())
}

#[async_trait]
impl SessionStore for FailingStore {
    async fn load(&self, _session_id: &str) -> Result<Option<Session>, SessionError> {
        Err(down())
    }

    async fn create(&self, _session_id: &str) -> Result<(), SessionError> {
        Err(down())
    }

    async fn append_turn(&self, _session_id: &str, _user: Message, _agent: Message) -> Result<(), SessionError> {
        Err(down())
    }

    async fn save_profile(&self, _session_id: &str, _profile: &ProfileHints) -> Result<(), SessionError> {
        Err(down())
    }

    async fn clear(&self, _session_id: &str) -> Result<(), SessionError> {
        Err(down())
    }
}

/// In-memory store whose turn commit is slow or always rejected. Every
/// other operation goes straight through.
pub struct CommitStore {
    inner: InMemorySessionStore,
    delay: Duration,
    reject: bool,
    entered: Notify,
}

impl CommitStore {
    pub fn slow(delay: Duration) -> Self {
        Self {
            inner: InMemorySessionStore::new(50),
            delay,
            reject: false,
            entered: Notify::new(),
        }
    }

    pub fn rejecting() -> Self {
        Self {
            reject: true,
            ..Self::slow(Duration::ZERO)
        }
    }

    /// Resolves once a commit has started.
    pub async fn commit_started(&self) {
        self.entered.notified().await;
    }
}

#[async_trait]
impl SessionStore for CommitStore {
    async fn load(&self, session_id: &str) -> Result<Option<Session>, SessionError> {
        self.inner.load(session_id).await
    }

    async fn create(&self, session_id: &str) -> Result<(), SessionError> {
        self.inner.create(session_id).await
    }

    async fn append_turn(&self, session_id: &str, user: Message, agent: Message) -> Result<(), SessionError> {
        self.entered.notify_one();
        tokio::time::sleep(self.delay).await;
        if self.reject {
            return Err(SessionError::StoreUnavailable("write rejected".to_string()));
        }
        self.inner.append_turn(session_id, user, agent).await
    }

    async fn save_profile(&self, session_id: &str, profile: &ProfileHints) -> Result<(), SessionError> {
        self.inner.save_profile(session_id, profile).await
    }

    async fn clear(&self, session_id: &str) -> Result<(), SessionError> {
        self.inner.clear(session_id).await
    }
}

//
// ================= Orchestrator =================
//

/// In-memory orchestrator. Defaults: a router returning the default plan,
/// both generating agents answering [`VALID_ANSWER`], no tools, response
/// cache off.
pub struct OrchestratorBuilder {
    config: EngineConfig,
    router: Arc<dyn Agent>,
    analyst: Arc<dyn LanguageModel>,
    reasoning: Arc<dyn LanguageModel>,
    registry: ToolRegistry,
    sessions: Option<Arc<dyn SessionStore>>,
}

impl OrchestratorBuilder {
    pub fn new() -> Self {
        let config = EngineConfig {
            response_cache_enabled: false,
            ..EngineConfig::default()
        };
        Self {
            config,
            router: Arc::new(StaticRouter::plan(ToolPlan::default())),
            analyst: Arc::new(ScriptedModel::always(VALID_ANSWER)),
            reasoning: Arc::new(ScriptedModel::always(VALID_ANSWER)),
            registry: ToolRegistry::new(),
            sessions: None,
        }
    }

    pub fn router(mut self, router: StaticRouter) -> Self {
        self.router = Arc::new(router);
        self
    }

    pub fn analyst(mut self, model: Arc<ScriptedModel>) -> Self {
        self.analyst = model;
        self
    }

    pub fn reasoning(mut self, model: Arc<ScriptedModel>) -> Self {
        self.reasoning = model;
        self
    }

    pub fn tool(mut self, tool: Arc<CountingTool>) -> Self {
        self.registry.register(tool);
        self
    }

    pub fn config(mut self, edit: impl FnOnce(&mut EngineConfig)) -> Self {
        edit(&mut self.config);
        self
    }

    pub fn sessions(mut self, sessions: Arc<dyn SessionStore>) -> Self {
        self.sessions = Some(sessions);
        self
    }

    pub fn build(self) -> Arc<Orchestrator> {
        let agents = AgentPool::new(
            self.router,
            Arc::new(AnalystAgent::new(self.analyst)),
            Arc::new(ReasoningAgent::new(self.reasoning)),
        );
        let sessions = self
            .sessions
            .unwrap_or_else(|| Arc::new(InMemorySessionStore::new(self.config.session_history_limit)));
        Arc::new(Orchestrator::new(&self.config, agents, self.registry, sessions))
    }
}
