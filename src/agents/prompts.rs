//! Prompt text and prompt builders for the agent pool.

use super::AgentContext;
use crate::execution::ToolSnapshot;
use serde_json::Value;

pub const ROUTER_SYSTEM_PROMPT: &str = r#"You are the routing engine of an investment research assistant for Indian mutual funds and stocks.

Decide which data tools must be called before the question can be answered, and whether the
answer needs an explanation ("explain") or a numeric comparison / calculation ("reason").

Rules:
- Only use tools from the list you are given
- At most 6 tool calls
- Use no tools for purely conceptual questions (what is NAV, what is an ELSS...)
- "reason" for comparisons, CAGR or return calculations, recommendations between options
- "explain" for everything else
- Return ONLY valid JSON, no prose, no markdown

JSON format:
{"agent_class": "explain", "tools": [{"tool": "fund_lookup", "args": {"name": "SBI Bluechip"}}]}"#;

pub const ANALYST_SYSTEM_PROMPT: &str = r#"You are an expert investment analyst specializing in Indian mutual funds and stock markets.

Answer the user's actual question first, then support it with data.
- Use ONLY the figures in the "Real-Time Data" section. Never use remembered prices, NAVs or returns.
- If data is listed as unavailable, say so plainly. Do not estimate or invent it.
- Explain financial terms the first time they appear.
- Use markdown: short paragraphs, headers, bullet points and tables where they help.
- Cite the data sources (AMFI India, Yahoo Finance) when you use their figures.
- Take the investor profile into account when one is given."#;

pub const REASONING_SYSTEM_PROMPT: &str = r#"You are a quantitative investment analyst for Indian mutual funds and stocks.

You compare entities and perform calculations.
- Start with one line "Comparison basis: <entities> compared on <metric> over <time window>."
- Use ONLY the figures in the "Real-Time Data" and "Computed Metrics" sections.
- Put every compared entity in one markdown table with the same metric and window for each.
- If an entity has no data, say the data is unavailable for it. Do not estimate it.
- End with a clear, reasoned conclusion for the investor's question and profile."#;

pub const OUTPUT_FORMAT_INSTRUCTION: &str = r#"Output format:
Write the answer in markdown. After the answer, append exactly one fenced block:
```json
{"data_points": [{"metric": "SBI Bluechip NAV", "value": "₹85.20", "as_of_date": "2025-01-15"}], "risk_disclaimer": "...", "confidence_score": 0.8}
```
Every "value" is a string including its unit. confidence_score is between 0 and 1."#;

pub const STRICT_FORMAT_INSTRUCTION: &str = r#"IMPORTANT: your previous answer could not be parsed.
Return the markdown answer followed by exactly ONE ```json block, and nothing after it.
The block must be valid JSON with only the keys data_points, risk_disclaimer and confidence_score.
Each data point has string fields metric, value and as_of_date. confidence_score is a number from 0 to 1.
The answer itself must be at least one full sentence."#;

/// Tool outputs rendered for a prompt. NAV histories are left out; derived
/// metrics are passed separately.
pub fn data_section(snapshot: &ToolSnapshot) -> String {
    let mut out = String::new();

    for result in snapshot.results() {
        let mut data = result.data.clone();
        if let Value::Object(map) = &mut data {
            map.remove("nav_history");
        }
        out.push_str(&format!(
            "### {} (source: {}, as of {})\n{}\n\n",
            result.tool,
            result.source.name,
            result.as_of.as_deref().unwrap_or("latest"),
            data
        ));
    }

    if out.is_empty() {
        out.push_str("No live data was fetched for this question.\n");
    }
    out
}

pub fn unavailable_section(snapshot: &ToolSnapshot) -> Option<String> {
    let lines: Vec<String> = snapshot.degraded().map(|m| format!("- {}", m.describe())).collect();
    if lines.is_empty() {
        return None;
    }
    Some(format!(
        "## Unavailable Data\nThe following data could not be retrieved. State that it is unavailable and do not invent values for it:\n{}",
        lines.join("\n")
    ))
}

pub fn router_prompt(ctx: &AgentContext) -> String {
    let tools: Vec<String> = ctx
        .available_tools
        .iter()
        .map(|t| format!("- {}: {} | args: {}", t.name, t.description, t.parameters))
        .collect();

    let mut prompt = format!("Available tools:\n{}\n\n", tools.join("\n"));
    if !ctx.history.is_empty() {
        prompt.push_str(&format!("Recent conversation:\n{}\n\n", ctx.history.join("\n")));
    }
    prompt.push_str(&format!("Question:\n{}", ctx.query));
    prompt
}

/// Prompt for the generating agents. `extra` carries agent-specific
/// sections such as computed metrics.
pub fn generation_prompt(ctx: &AgentContext, extra: Option<&str>) -> String {
    let mut sections = Vec::new();

    if let Some(profile) = &ctx.profile {
        sections.push(format!("## Investor Profile\n{}", profile.summary()));
    }
    if !ctx.history.is_empty() {
        sections.push(format!("## Recent Conversation\n{}", ctx.history.join("\n")));
    }
    sections.push(format!("## Real-Time Data\n{}", data_section(&ctx.snapshot).trim_end()));
    if let Some(extra) = extra {
        sections.push(extra.to_string());
    }
    if let Some(unavailable) = unavailable_section(&ctx.snapshot) {
        sections.push(unavailable);
    }
    sections.push(format!("## Question\n{}", ctx.query));
    sections.push(OUTPUT_FORMAT_INSTRUCTION.to_string());
    if ctx.strict {
        sections.push(STRICT_FORMAT_INSTRUCTION.to_string());
    }

    sections.join("\n\n")
}
