//! Tool plan execution with cache look-through
//!
//! Every invocation in a plan is resolved concurrently: cache first by
//! fingerprint, then the adapter under its own timeout. Failures never
//! abort the plan; they come back as degraded markers in the snapshot.

use crate::cache::CacheStore;
use crate::error::{ToolError, ToolErrorKind};
use crate::tools::{ToolInvocation, ToolRegistry, ToolResult};
use futures::future::join_all;
use serde::Serialize;
use serde_json::Value;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// Upper bound on invocations honoured from one plan.
pub const MAX_TOOLS_PER_PLAN: usize = 6;

/// Record of a tool that could not contribute data.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct DegradedMarker {
    pub tool: String,
    pub args: Value,
    pub kind: ToolErrorKind,
    pub detail: String,
}

impl DegradedMarker {
    fn new(invocation: &ToolInvocation, error: &ToolError) -> Self {
        Self {
            tool: invocation.tool.clone(),
            args: invocation.args.clone(),
            kind: error.kind(),
            detail: error.detail().to_string(),
        }
    }

    /// Human-readable line for prompts and acknowledgements.
    pub fn describe(&self) -> String {
        let subject = match &self.args {
            Value::Object(map) => map
                .values()
                .filter_map(|v| v.as_str())
                .collect::<Vec<_>>()
                .join(", "),
            _ => String::new(),
        };
        let reason = match self.kind {
            ToolErrorKind::NotFound => "no matching data was found",
            ToolErrorKind::ProviderUnavailable => "the data provider was unavailable",
            ToolErrorKind::InvalidArgs => "the request could not be understood",
        };
        if subject.is_empty() {
            format!("{}: {}", self.tool, reason)
        } else {
            format!("{} ({}): {}", self.tool, subject, reason)
        }
    }
}

#[derive(Debug, Clone)]
pub enum ToolOutcome {
    Fetched { result: ToolResult, cached: bool },
    Failed(DegradedMarker),
}

/// Outcomes of one plan, in plan order.
#[derive(Debug, Clone, Default)]
pub struct ToolSnapshot {
    outcomes: Vec<ToolOutcome>,
}

impl ToolSnapshot {
    pub fn new(outcomes: Vec<ToolOutcome>) -> Self {
        Self { outcomes }
    }

    pub fn empty() -> Self {
        Self::default()
    }

    pub fn outcomes(&self) -> &[ToolOutcome] {
        &self.outcomes
    }

    pub fn results(&self) -> impl Iterator<Item = &ToolResult> {
        self.outcomes.iter().filter_map(|o| match o {
            ToolOutcome::Fetched { result, .. } => Some(result),
            ToolOutcome::Failed(_) => None,
        })
    }

    pub fn degraded(&self) -> impl Iterator<Item = &DegradedMarker> {
        self.outcomes.iter().filter_map(|o| match o {
            ToolOutcome::Failed(marker) => Some(marker),
            ToolOutcome::Fetched { .. } => None,
        })
    }

    pub fn is_degraded(&self) -> bool {
        self.degraded().next().is_some()
    }
}

pub struct ToolExecutor {
    registry: Arc<ToolRegistry>,
    cache: Arc<CacheStore<ToolResult>>,
    timeout: Duration,
}

impl ToolExecutor {
    pub fn new(registry: Arc<ToolRegistry>, cache: Arc<CacheStore<ToolResult>>, timeout: Duration) -> Self {
        Self {
            registry,
            cache,
            timeout,
        }
    }

    pub fn registry(&self) -> &ToolRegistry {
        &self.registry
    }

    /// Resolve every invocation of a plan. Duplicate fingerprints run once.
    pub async fn execute(&self, plan: &[ToolInvocation]) -> ToolSnapshot {
        let mut seen = HashSet::new();
        let unique: Vec<&ToolInvocation> = plan
            .iter()
            .filter(|invocation| seen.insert(invocation.fingerprint()))
            .take(MAX_TOOLS_PER_PLAN)
            .collect();

        debug!(requested = plan.len(), executing = unique.len(), "Executing tool plan");

        let outcomes = join_all(unique.into_iter().map(|invocation| self.resolve(invocation))).await;
        ToolSnapshot::new(outcomes)
    }

    pub async fn resolve(&self, invocation: &ToolInvocation) -> ToolOutcome {
        let key = invocation.fingerprint();

        if let Some(result) = self.cache.get(&key).await {
            debug!(tool_name = %invocation.tool, "Tool cache hit");
            return ToolOutcome::Fetched { result, cached: true };
        }

        let start = Instant::now();
        let outcome = match tokio::time::timeout(
            self.timeout,
            self.registry.invoke(&invocation.tool, &invocation.args),
        )
        .await
        {
            Ok(outcome) => outcome,
            Err(_) => Err(ToolError::ProviderUnavailable(format!(
                "timed out after {}s",
                self.timeout.as_secs()
            ))),
        };

        match outcome {
            Ok(result) => {
                debug!(
                    tool_name = %invocation.tool,
                    elapsed_ms = start.elapsed().as_millis() as u64,
                    "Tool call succeeded"
                );
                self.cache.set(key, result.clone(), None).await;
                ToolOutcome::Fetched { result, cached: false }
            }
            Err(error) => {
                warn!(
                    tool_name = %invocation.tool,
                    kind = ?error.kind(),
                    error = %error,
                    "Tool call failed, continuing with degraded context"
                );
                ToolOutcome::Failed(DegradedMarker::new(invocation, &error))
            }
        }
    }
}
