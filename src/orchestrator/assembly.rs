//! Structural assembly of an agent draft into an [`InvestmentResponse`].
//!
//! Pure function of (draft text, derived figures, tool snapshot), shared by
//! the blocking and streaming paths.

use crate::agents::{AgentClass, Draft};
use crate::error::ValidationError;
use crate::execution::ToolSnapshot;
use crate::models::{DataPoint, InvestmentResponse, Source};
use serde::Deserialize;
use serde_json::Value;

/// Data points taken from the snapshot when the agent supplies none.
const MAX_SNAPSHOT_POINTS: usize = 6;

const MIN_EXPLANATION_CHARS: usize = 10;

/// Wording that counts as acknowledging missing data.
const ACKNOWLEDGEMENTS: &[&str] = &[
    "unavailable",
    "not available",
    "could not",
    "couldn't",
    "missing",
    "no data",
    "don't have data",
];

/// Trailing metadata block of an agent answer.
#[derive(Debug, Default, Deserialize)]
struct Metadata {
    #[serde(default)]
    explanation: Option<String>,
    #[serde(default)]
    data_points: Vec<DataPoint>,
    #[serde(default)]
    risk_disclaimer: String,
    #[serde(default)]
    confidence_score: Option<f32>,
}

fn mismatch(detail: impl Into<String>) -> ValidationError {
    ValidationError::SchemaMismatch(detail.into())
}

/// Split answer text into the prose explanation and the optional metadata
/// block (the last ```json fence, or the whole body when it is JSON).
fn split_metadata(text: &str) -> Result<(String, Metadata), ValidationError> {
    let trimmed = text.trim();

    if trimmed.starts_with('{') {
        let metadata: Metadata =
            serde_json::from_str(trimmed).map_err(|e| mismatch(format!("response body is not a valid response object: {}", e)))?;
        let explanation = metadata.explanation.clone().unwrap_or_default();
        return Ok((explanation, metadata));
    }

    let Some(start) = trimmed.rfind("```json") else {
        return Ok((trimmed.to_string(), Metadata::default()));
    };

    let body_start = start + "```json".len();
    let end = trimmed[body_start..]
        .find("```")
        .map(|offset| body_start + offset)
        .ok_or_else(|| mismatch("unterminated metadata block"))?;

    let metadata: Metadata = serde_json::from_str(trimmed[body_start..end].trim())
        .map_err(|e| mismatch(format!("metadata block does not match schema: {}", e)))?;

    let mut explanation = trimmed[..start].trim_end().to_string();
    let tail = trimmed[end + 3..].trim();
    if !tail.is_empty() {
        explanation.push_str("\n\n");
        explanation.push_str(tail);
    }
    if explanation.trim().is_empty() {
        explanation = metadata.explanation.clone().unwrap_or_default();
    }

    Ok((explanation, metadata))
}

fn validate(explanation: &str, metadata: &Metadata) -> Result<(), ValidationError> {
    if explanation.trim().chars().count() < MIN_EXPLANATION_CHARS {
        return Err(mismatch("explanation is missing or too short"));
    }
    if let Some(score) = metadata.confidence_score {
        if !score.is_finite() || !(0.0..=1.0).contains(&score) {
            return Err(mismatch(format!("confidence_score {} outside [0, 1]", score)));
        }
    }
    if metadata.data_points.iter().any(|dp| dp.metric.trim().is_empty() || dp.value.trim().is_empty()) {
        return Err(mismatch("data point without metric or value"));
    }
    Ok(())
}

/// One source per provider, stamped with the time of its first tool call.
pub fn snapshot_sources(snapshot: &ToolSnapshot) -> Vec<Source> {
    let mut sources: Vec<Source> = Vec::new();
    for result in snapshot.results() {
        match sources
            .iter_mut()
            .find(|s| s.name == result.source.name && s.url == result.source.url)
        {
            Some(existing) => existing.accessed_at = existing.accessed_at.min(result.fetched_at),
            None => sources.push(Source {
                name: result.source.name.clone(),
                url: result.source.url.clone(),
                accessed_at: result.fetched_at,
            }),
        }
    }
    sources
}

/// Headline figures straight from the tool results.
pub fn snapshot_data_points(snapshot: &ToolSnapshot) -> Vec<DataPoint> {
    let mut points = Vec::new();

    for result in snapshot.results() {
        let data = &result.data;
        let as_of = result.as_of.clone().unwrap_or_else(|| result.fetched_at.format("%Y-%m-%d").to_string());

        match result.tool.as_str() {
            "fund_lookup" => {
                let name = data.get("scheme_name").and_then(Value::as_str).unwrap_or("Fund");
                if let Some(nav) = data.get("nav").and_then(Value::as_f64) {
                    points.push(DataPoint::new(format!("{} NAV", name), format!("₹{:.2}", nav), as_of.clone()));
                }
                for label in ["1Y", "3Y"] {
                    if let Some(value) = data.pointer(&format!("/trailing_returns/{}", label)).and_then(Value::as_f64) {
                        points.push(DataPoint::new(
                            format!("{} {} return", name, label),
                            format!("{:.2}%", value),
                            as_of.clone(),
                        ));
                    }
                }
            }
            "fund_category" => {
                for fund in data.get("funds").and_then(Value::as_array).into_iter().flatten() {
                    let (Some(name), Some(nav)) = (
                        fund.get("scheme_name").and_then(Value::as_str),
                        fund.get("nav").and_then(Value::as_f64),
                    ) else {
                        continue;
                    };
                    let date = fund.get("nav_date").and_then(Value::as_str).unwrap_or(as_of.as_str()).to_string();
                    points.push(DataPoint::new(format!("{} NAV", name), format!("₹{:.2}", nav), date));
                }
            }
            "stock_quote" => {
                let label = data
                    .get("name")
                    .and_then(Value::as_str)
                    .or_else(|| data.get("symbol").and_then(Value::as_str))
                    .unwrap_or("Stock");
                if let Some(price) = data.get("price").and_then(Value::as_f64) {
                    let currency = match data.get("currency").and_then(Value::as_str) {
                        Some("INR") | None => "₹".to_string(),
                        Some(other) => format!("{} ", other),
                    };
                    points.push(DataPoint::new(format!("{} price", label), format!("{}{:.2}", currency, price), as_of.clone()));
                }
                if let Some(change) = data.get("change_percent").and_then(Value::as_f64) {
                    points.push(DataPoint::new(format!("{} day change", label), format!("{:+.2}%", change), as_of.clone()));
                }
            }
            "market_overview" => {
                for index in data.get("indices").and_then(Value::as_array).into_iter().flatten() {
                    let (Some(name), Some(value)) = (
                        index.get("index").and_then(Value::as_str),
                        index.get("value").and_then(Value::as_f64),
                    ) else {
                        continue;
                    };
                    points.push(DataPoint::new(name, format!("{:.2}", value), as_of.clone()));
                }
            }
            _ => {}
        }
    }

    points.truncate(MAX_SNAPSHOT_POINTS);
    points
}

/// Appended when tools failed and the agent did not say so itself.
pub fn acknowledgement(snapshot: &ToolSnapshot) -> Option<String> {
    let lines: Vec<String> = snapshot.degraded().map(|m| format!("- {}", m.describe())).collect();
    if lines.is_empty() {
        return None;
    }
    Some(format!(
        "**Data availability:** some requested data is unavailable, so no figures are given for it:\n{}",
        lines.join("\n")
    ))
}

fn acknowledges_missing_data(explanation: &str) -> bool {
    let lower = explanation.to_lowercase();
    ACKNOWLEDGEMENTS.iter().any(|phrase| lower.contains(phrase))
}

/// Turn a draft into a structurally valid response. The disclaimer may
/// still be empty here; compliance annotation fills it.
pub fn assemble(draft: &Draft, class: AgentClass, snapshot: &ToolSnapshot) -> Result<InvestmentResponse, ValidationError> {
    let (mut explanation, metadata) = split_metadata(&draft.text)?;
    validate(&explanation, &metadata)?;

    if class == AgentClass::Reason {
        if let Some(basis) = &draft.basis {
            if !explanation.contains("Comparison basis") {
                explanation = format!("{}\n\n{}", basis.describe(), explanation);
            }
        }
    }

    if snapshot.is_degraded() && !acknowledges_missing_data(&explanation) {
        if let Some(ack) = acknowledgement(snapshot) {
            explanation = format!("{}\n\n{}", explanation, ack);
        }
    }

    let mut data_points = metadata.data_points;
    for derived in &draft.derived {
        if !data_points.iter().any(|dp| dp.metric == derived.metric) {
            data_points.push(derived.clone());
        }
    }
    if data_points.is_empty() {
        data_points = snapshot_data_points(snapshot);
    }

    Ok(InvestmentResponse {
        explanation,
        data_points,
        sources: snapshot_sources(snapshot),
        risk_disclaimer: metadata.risk_disclaimer.trim().to_string(),
        confidence_score: metadata.confidence_score,
    })
}

/// Plain-text answer used when both generation attempts failed.
pub fn fallback(snapshot: &ToolSnapshot, disclaimer: String) -> InvestmentResponse {
    let mut explanation = String::from(
        "I could not complete a full analysis for this question right now. Please try again in a moment, or ask about a specific mutual fund or stock.",
    );
    if let Some(ack) = acknowledgement(snapshot) {
        explanation.push_str("\n\n");
        explanation.push_str(&ack);
    }

    InvestmentResponse {
        explanation,
        data_points: Vec::new(),
        sources: Vec::new(),
        risk_disclaimer: disclaimer,
        confidence_score: None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agents::ComparisonBasis;
    use crate::error::{ToolError, ToolErrorKind};
    use crate::execution::{DegradedMarker, ToolOutcome};
    use crate::testing::fund_result;
    use serde_json::json;

    fn not_found(name: &str) -> ToolOutcome {
        let error = ToolError::NotFound(format!("no scheme matches '{}'", name));
        ToolOutcome::Failed(DegradedMarker {
            tool: "fund_lookup".into(),
            args: json!({ "name": name }),
            kind: error.kind(),
            detail: error.detail().to_string(),
        })
    }

    #[test]
    fn test_metadata_block_is_split_off() {
        let text = "SBI Bluechip has delivered steady returns.\n\n```json\n{\"data_points\": [{\"metric\": \"NAV\", \"value\": \"₹85.20\", \"as_of_date\": \"2025-01-15\"}], \"risk_disclaimer\": \"Markets carry risk.\", \"confidence_score\": 0.8}\n```\n";
        let response = assemble(&Draft::text(text), AgentClass::Explain, &ToolSnapshot::empty()).unwrap();

        assert_eq!(response.explanation, "SBI Bluechip has delivered steady returns.");
        assert_eq!(response.data_points[0].value, "₹85.20");
        assert_eq!(response.risk_disclaimer, "Markets carry risk.");
        assert_eq!(response.confidence_score, Some(0.8));
    }

    #[test]
    fn test_whole_json_body_is_accepted() {
        let text = r#"{"explanation": "NAV is the per-unit value of a fund.", "risk_disclaimer": "x"}"#;
        let response = assemble(&Draft::text(text), AgentClass::Explain, &ToolSnapshot::empty()).unwrap();
        assert_eq!(response.explanation, "NAV is the per-unit value of a fund.");
    }

    #[test]
    fn test_schema_mismatches() {
        let cases = vec![
            "ok",
            "A perfectly fine explanation.\n```json\n{\"confidence_score\": \"high\"}\n```",
            "A perfectly fine explanation.\n```json\n{\"confidence_score\": 1.5}\n```",
            "A perfectly fine explanation.\n```json\n{\"data_points\": [",
            "{\"explanation\": ",
        ];
        for text in cases {
            let err = assemble(&Draft::text(text), AgentClass::Explain, &ToolSnapshot::empty()).unwrap_err();
            assert!(matches!(err, ValidationError::SchemaMismatch(_)), "{}", text);
        }
    }

    #[test]
    fn test_sources_and_points_come_from_snapshot() {
        let snapshot = ToolSnapshot::new(vec![ToolOutcome::Fetched {
            result: fund_result("SBI Bluechip Fund", 100.0, 133.1),
            cached: true,
        }]);
        let response = assemble(&Draft::text("SBI Bluechip looks steady."), AgentClass::Explain, &snapshot).unwrap();

        assert_eq!(response.sources.len(), 1);
        assert_eq!(response.sources[0].name, "AMFI India");
        let fetched_at = snapshot.results().next().unwrap().fetched_at;
        assert_eq!(response.sources[0].accessed_at, fetched_at);
        assert_eq!(response.data_points[0].metric, "SBI Bluechip Fund NAV");
        assert_eq!(response.data_points[0].value, "₹133.10");
    }

    #[test]
    fn test_missing_data_is_acknowledged() {
        let snapshot = ToolSnapshot::new(vec![not_found("Imaginary Fund")]);
        let response = assemble(&Draft::text("Here is what I can tell you."), AgentClass::Explain, &snapshot).unwrap();
        assert!(response.explanation.contains("unavailable"));
        assert!(response.explanation.contains("Imaginary Fund"));
        assert_eq!(snapshot.degraded().next().unwrap().kind, ToolErrorKind::NotFound);

        let already = "Data for Imaginary Fund is not available right now.";
        let response = assemble(&Draft::text(already), AgentClass::Explain, &snapshot).unwrap();
        assert_eq!(response.explanation, already);
    }

    #[test]
    fn test_reason_class_states_comparison_basis() {
        let draft = Draft {
            text: "SBI Bluechip grew faster than HDFC Top 100.".into(),
            derived: vec![DataPoint::new("SBI Bluechip 3Y CAGR", "10.00%", "2025-06-30")],
            basis: Some(ComparisonBasis {
                entities: vec!["SBI Bluechip".into(), "HDFC Top 100".into()],
                metric: "CAGR".into(),
                window: "3 years".into(),
            }),
        };
        let response = assemble(&draft, AgentClass::Reason, &ToolSnapshot::empty()).unwrap();
        assert!(response
            .explanation
            .starts_with("Comparison basis: SBI Bluechip vs HDFC Top 100 compared on CAGR over 3 years."));
        assert_eq!(response.data_points, draft.derived);
    }

    #[test]
    fn test_fallback_keeps_only_explanation_and_disclaimer() {
        let snapshot = ToolSnapshot::new(vec![not_found("Imaginary Fund")]);
        let response = fallback(&snapshot, "Markets carry risk.".into());
        assert!(response.data_points.is_empty());
        assert!(response.sources.is_empty());
        assert!(response.confidence_score.is_none());
        assert!(response.explanation.contains("Imaginary Fund"));
        assert_eq!(response.risk_disclaimer, "Markets carry risk.");
    }
}
