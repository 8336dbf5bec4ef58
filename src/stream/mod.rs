//! Streaming chat: the same pipeline as [`Orchestrator::process`], with the
//! generating agent's text forwarded as it is produced.
//!
//! ```text
//! CollectingPlan → ExecutingTools → Generating → Terminal
//!                                       │  ↺ (reset, strict retry)
//!                                       └──────→ Failed
//! ```
//!
//! Event order: zero or more `Token`/`Reset`, then exactly one `Complete` or
//! `Error`. The concatenation of tokens since the last `Reset` equals the
//! explanation in `Complete` when no structural additions were needed.

use crate::agents::{AgentContext, ToolPlan};
use crate::models::{ChatRequest, InvestmentResponse};
use crate::orchestrator::{resolve_session_id, AttemptError, Orchestrator, Prepared, Turn, MAX_ATTEMPTS};
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

/// Buffered events between the coordinator and the client.
const EVENT_BUFFER: usize = 64;

#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(untagged)]
pub enum StreamEvent {
    Token { token: String },
    /// Tokens sent so far are void; a new attempt follows.
    Reset { reason: String },
    Complete { response: InvestmentResponse, session_id: String },
    Error { error: String },
}

impl StreamEvent {
    /// SSE event name.
    pub fn event_name(&self) -> &'static str {
        match self {
            StreamEvent::Token { .. } => "token",
            StreamEvent::Reset { .. } => "reset",
            StreamEvent::Complete { .. } => "complete",
            StreamEvent::Error { .. } => "error",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, StreamEvent::Complete { .. } | StreamEvent::Error { .. })
    }
}

enum StreamState {
    CollectingPlan,
    ExecutingTools { ctx: AgentContext, plan: ToolPlan },
    Generating { prepared: Prepared, attempt: usize },
    Terminal { prepared: Prepared, assembled: Option<InvestmentResponse> },
    Failed { reason: String },
}

/// A final answer that only remains to be committed.
struct Settled {
    turn: Turn,
    response: InvestmentResponse,
    degraded: bool,
    from_cache: bool,
}

/// How one streamed generation attempt ended.
enum Attempt {
    Assembled(InvestmentResponse),
    /// Failed before any token reached the client.
    Retryable(AttemptError),
    /// Failed after tokens were delivered, or validation failed (needs a reset).
    Emitted(AttemptError),
    /// The client went away.
    Disconnected,
}

impl Orchestrator {
    /// Start a streaming chat turn. The receiver yields events until one
    /// terminal event. Dropping it before the answer is settled cancels the
    /// turn without appending anything; a settled answer is always committed
    /// as a whole turn, whether or not the client is still listening.
    pub fn stream(self: &Arc<Self>, request: ChatRequest) -> mpsc::Receiver<StreamEvent> {
        let (tx, rx) = mpsc::channel(EVENT_BUFFER);
        let orchestrator = Arc::clone(self);
        let session_id = resolve_session_id(&request);

        tokio::spawn(async move {
            let settled = tokio::select! {
                _ = tx.closed() => {
                    debug!(session_id = %session_id, "Stream client disconnected, cancelling turn");
                    None
                }
                settled = orchestrator.run_stream(session_id.clone(), request, &tx) => settled,
            };
            if let Some(settled) = settled {
                orchestrator.complete(settled, &tx).await;
            }
            orchestrator.release(&session_id).await;
        });

        rx
    }

    /// Everything up to a settled answer. `None` when the turn ended
    /// without one: an error event was sent or the client went away.
    async fn run_stream(
        &self,
        session_id: String,
        request: ChatRequest,
        tx: &mpsc::Sender<StreamEvent>,
    ) -> Option<Settled> {
        let turn = match self.begin(session_id.clone(), &request).await {
            Ok(turn) => turn,
            Err(e) => {
                let _ = tx.send(StreamEvent::Error { error: e.to_string() }).await;
                return None;
            }
        };

        if let Some(response) = self.cached(&turn).await {
            if !send(tx, StreamEvent::Token { token: response.explanation.clone() }).await {
                return None;
            }
            return Some(Settled {
                turn,
                response,
                degraded: false,
                from_cache: true,
            });
        }

        let mut state = StreamState::CollectingPlan;
        loop {
            state = match state {
                StreamState::CollectingPlan => {
                    let (ctx, plan) = self.route(&turn).await;
                    StreamState::ExecutingTools { ctx, plan }
                }
                StreamState::ExecutingTools { ctx, plan } => StreamState::Generating {
                    prepared: self.execute_plan(ctx, plan).await,
                    attempt: 1,
                },
                StreamState::Generating { mut prepared, attempt } => match self.generate(&prepared, tx).await {
                    Attempt::Assembled(response) => StreamState::Terminal {
                        prepared,
                        assembled: Some(response),
                    },
                    Attempt::Disconnected => return None,
                    Attempt::Retryable(error) => {
                        warn!(session_id = %turn.session_id, attempt, error = %error, "Streaming attempt failed");
                        if attempt < MAX_ATTEMPTS {
                            prepared.ctx.strict = false;
                            StreamState::Generating {
                                prepared,
                                attempt: attempt + 1,
                            }
                        } else {
                            StreamState::Terminal { prepared, assembled: None }
                        }
                    }
                    Attempt::Emitted(AttemptError::Validation(error)) => {
                        warn!(session_id = %turn.session_id, attempt, error = %error, "Streamed answer invalid, resetting");
                        if !send(tx, StreamEvent::Reset { reason: error.to_string() }).await {
                            return None;
                        }
                        if attempt < MAX_ATTEMPTS {
                            prepared.ctx.strict = true;
                            StreamState::Generating {
                                prepared,
                                attempt: attempt + 1,
                            }
                        } else {
                            StreamState::Terminal { prepared, assembled: None }
                        }
                    }
                    Attempt::Emitted(AttemptError::Agent(error)) => StreamState::Failed {
                        reason: error.to_string(),
                    },
                },
                StreamState::Terminal { prepared, assembled } => {
                    let fell_back = assembled.is_none();
                    let (response, degraded) = self.finish(assembled, &prepared);
                    if fell_back && !send(tx, StreamEvent::Token { token: response.explanation.clone() }).await {
                        return None;
                    }
                    return Some(Settled {
                        turn,
                        response,
                        degraded,
                        from_cache: false,
                    });
                }
                StreamState::Failed { reason } => {
                    warn!(session_id = %turn.session_id, reason = %reason, "Stream failed after tokens were sent");
                    let _ = tx.send(StreamEvent::Error { error: reason }).await;
                    return None;
                }
            };
        }
    }

    /// One streamed attempt: forward tokens while the agent runs, then
    /// assemble the concatenated text.
    async fn generate(&self, prepared: &Prepared, tx: &mpsc::Sender<StreamEvent>) -> Attempt {
        let agent = self.agent(prepared.kind).clone();
        let (tok_tx, mut tok_rx) = mpsc::channel::<String>(EVENT_BUFFER);
        let generation = tokio::time::timeout(self.agent_timeout(), agent.handle_stream(&prepared.ctx, tok_tx));
        tokio::pin!(generation);

        let mut streamed = String::new();
        let result = loop {
            tokio::select! {
                biased;
                Some(token) = tok_rx.recv() => {
                    streamed.push_str(&token);
                    if !send(tx, StreamEvent::Token { token }).await {
                        return Attempt::Disconnected;
                    }
                }
                result = &mut generation => break result,
            }
        };
        while let Ok(token) = tok_rx.try_recv() {
            streamed.push_str(&token);
            if !send(tx, StreamEvent::Token { token }).await {
                return Attempt::Disconnected;
            }
        }

        let output = match result {
            Ok(Ok(output)) => output,
            Ok(Err(error)) => return failed(error.into(), &streamed),
            Err(_) => return failed(self.agent_timeout_error().into(), &streamed),
        };

        match self.assemble_output(output, Some(streamed), prepared) {
            Ok(response) => Attempt::Assembled(response),
            Err(AttemptError::Validation(error)) => Attempt::Emitted(error.into()),
            Err(error) => Attempt::Retryable(error),
        }
    }

    async fn complete(&self, settled: Settled, tx: &mpsc::Sender<StreamEvent>) {
        let Settled {
            turn,
            response,
            degraded,
            from_cache,
        } = settled;
        let session_id = turn.session_id.clone();
        match self.commit(turn, &response, degraded, from_cache).await {
            Ok(()) => {
                info!(session_id = %session_id, cached = from_cache, degraded, "Stream completed");
                let _ = tx.send(StreamEvent::Complete { response, session_id }).await;
            }
            Err(e) => {
                let _ = tx.send(StreamEvent::Error { error: e.to_string() }).await;
            }
        }
    }
}

fn failed(error: AttemptError, streamed: &str) -> Attempt {
    if streamed.is_empty() {
        Attempt::Retryable(error)
    } else {
        Attempt::Emitted(error)
    }
}

/// False when the client has gone away.
async fn send(tx: &mpsc::Sender<StreamEvent>, event: StreamEvent) -> bool {
    tx.send(event).await.is_ok()
}
