//! Investment Insight Orchestrator
//!
//! Conversational engine answering investment questions about Indian mutual
//! funds and equities:
//! - Routes each question to a tool plan and a generating agent
//! - Resolves market data through cached, failure-tolerant tool adapters
//! - Derives comparison figures deterministically, outside the model
//! - Assembles structured responses with sources and a risk disclaimer
//! - Serializes turns per session, blocking or streamed
//!
//! REQUEST LOOP:
//! LOCK SESSION → ROUTE → EXECUTE TOOLS → GENERATE → ASSEMBLE → COMPLY → APPEND

pub mod agents;
pub mod analytics;
pub mod api;
pub mod cache;
pub mod classifier;
pub mod compliance;
pub mod config;
pub mod error;
pub mod execution;
pub mod llm;
pub mod models;
pub mod orchestrator;
pub mod session;
pub mod stream;
pub mod tools;

#[cfg(test)]
mod testing;

pub use error::{OrchestrationError, Result};

// Re-export common types
pub use models::*;
pub use orchestrator::Orchestrator;
pub use stream::StreamEvent;
