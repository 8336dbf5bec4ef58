//! Compliance annotation for investment responses
//!
//! Rules-based checks over the assembled response. Deterministic: the only
//! mutation is guaranteeing a disclaimer and filling a missing confidence.

use crate::models::{ComplianceCheck, DataPoint, InvestmentResponse};
use chrono::{NaiveDate, Utc};
use tracing::debug;

pub const STANDARD_RISK_DISCLAIMER: &str = "Mutual fund investments are subject to market risks. Please read all scheme-related documents carefully before investing. Past performance is not indicative of future returns. The information provided is for educational purposes only and should not be considered as personalized financial advice. Please consult a qualified financial advisor before making investment decisions.";

pub const REGULATOR_NOTICE: &str = "This information is provided for educational purposes only. Investment in securities market are subject to market risks. Read all the related documents carefully before investing. Registration granted by SEBI and certification from NISM in no way guarantee performance of the intermediary or provide any assurance of returns to investors.";

/// Data older than this many days is reported stale.
pub const MAX_DATA_AGE_DAYS: i64 = 7;

const DATE_FORMATS: &[&str] = &["%Y-%m-%d", "%d-%m-%Y", "%d %b %Y"];

/// Trait for compliance rules
pub trait ComplianceRule: Send + Sync {
    fn name(&self) -> &'static str;

    fn check(&self, response: &InvestmentResponse) -> RuleOutcome;
}

pub struct RuleOutcome {
    pub passed: bool,
    pub details: String,
}

/// Rule: explanation carries actual content
pub struct MeaningfulExplanationRule;

impl ComplianceRule for MeaningfulExplanationRule {
    fn name(&self) -> &'static str {
        "meaningful_explanation"
    }

    fn check(&self, response: &InvestmentResponse) -> RuleOutcome {
        let chars = response.explanation.trim().chars().count();
        RuleOutcome {
            passed: chars >= 10,
            details: format!("Explanation length: {} chars", chars),
        }
    }
}

pub struct DataPointsPresentRule;

impl ComplianceRule for DataPointsPresentRule {
    fn name(&self) -> &'static str {
        "data_points_present"
    }

    fn check(&self, response: &InvestmentResponse) -> RuleOutcome {
        RuleOutcome {
            passed: !response.data_points.is_empty(),
            details: format!("Data points: {}", response.data_points.len()),
        }
    }
}

pub struct SourcesPresentRule;

impl ComplianceRule for SourcesPresentRule {
    fn name(&self) -> &'static str {
        "sources_present"
    }

    fn check(&self, response: &InvestmentResponse) -> RuleOutcome {
        RuleOutcome {
            passed: !response.sources.is_empty(),
            details: format!("Sources cited: {}", response.sources.len()),
        }
    }
}

/// Rule: every dated data point is at most [`MAX_DATA_AGE_DAYS`] old
pub struct DataFreshnessRule;

impl ComplianceRule for DataFreshnessRule {
    fn name(&self) -> &'static str {
        "data_freshness"
    }

    fn check(&self, response: &InvestmentResponse) -> RuleOutcome {
        let stale = stale_metrics(&response.data_points, Utc::now().date_naive());
        RuleOutcome {
            passed: stale.is_empty(),
            details: if stale.is_empty() {
                "All dated data points are recent".to_string()
            } else {
                format!("Stale data points: {}", stale.join(", "))
            },
        }
    }
}

pub fn parse_as_of(raw: &str) -> Option<NaiveDate> {
    DATE_FORMATS
        .iter()
        .find_map(|fmt| NaiveDate::parse_from_str(raw.trim(), fmt).ok())
}

/// Metrics whose `as_of_date` is older than the freshness window.
/// Undated or unparseable points are not counted as stale.
pub fn stale_metrics(data_points: &[DataPoint], today: NaiveDate) -> Vec<String> {
    data_points
        .iter()
        .filter(|dp| parse_as_of(&dp.as_of_date).is_some_and(|date| (today - date).num_days() > MAX_DATA_AGE_DAYS))
        .map(|dp| dp.metric.clone())
        .collect()
}

/// Compliance engine that annotates responses
pub struct ComplianceEngine {
    rules: Vec<Box<dyn ComplianceRule>>,
    include_regulator_notice: bool,
}

impl ComplianceEngine {
    pub fn new() -> Self {
        Self {
            rules: Vec::new(),
            include_regulator_notice: false,
        }
    }

    pub fn add_rule(&mut self, rule: Box<dyn ComplianceRule>) {
        self.rules.push(rule);
    }

    pub fn with_regulator_notice(mut self, include: bool) -> Self {
        self.include_regulator_notice = include;
        self
    }

    /// Disclaimer text appended when an agent omits one.
    pub fn default_disclaimer(&self) -> String {
        if self.include_regulator_notice {
            format!("{}\n\n{}", STANDARD_RISK_DISCLAIMER, REGULATOR_NOTICE)
        } else {
            STANDARD_RISK_DISCLAIMER.to_string()
        }
    }

    pub fn check(&self, response: &InvestmentResponse) -> Vec<ComplianceCheck> {
        self.rules
            .iter()
            .map(|rule| {
                let outcome = rule.check(response);
                ComplianceCheck {
                    rule_name: rule.name().to_string(),
                    passed: outcome.passed,
                    details: outcome.details,
                }
            })
            .collect()
    }

    /// Guarantee a non-empty disclaimer, and the regulator notice when enabled.
    pub fn ensure_disclaimer(&self, response: &mut InvestmentResponse) {
        if response.risk_disclaimer.trim().is_empty() {
            response.risk_disclaimer = self.default_disclaimer();
        } else if self.include_regulator_notice && !response.risk_disclaimer.contains(REGULATOR_NOTICE) {
            response.risk_disclaimer = format!("{}\n\n{}", response.risk_disclaimer.trim_end(), REGULATOR_NOTICE);
        }
    }

    /// Disclaimer guarantee plus a computed confidence when the agent gave none.
    pub fn annotate(&self, mut response: InvestmentResponse, query_matched: bool) -> (InvestmentResponse, Vec<ComplianceCheck>) {
        self.ensure_disclaimer(&mut response);
        let checks = self.check(&response);

        if response.confidence_score.is_none() {
            response.confidence_score = Some(confidence_score(&response, query_matched));
        }

        for check in checks.iter().filter(|c| !c.passed) {
            debug!(rule = %check.rule_name, details = %check.details, "Compliance check not met");
        }

        (response, checks)
    }
}

impl Default for ComplianceEngine {
    fn default() -> Self {
        Self::new()
    }
}

/// `0.4 + 0.2·data points + 0.2·sources + 0.1·fresh + 0.1·query matched`, capped at 1.
pub fn confidence_score(response: &InvestmentResponse, query_matched: bool) -> f32 {
    let fresh = stale_metrics(&response.data_points, Utc::now().date_naive()).is_empty();

    let mut score: f32 = 0.4;
    if !response.data_points.is_empty() {
        score += 0.2;
    }
    if !response.sources.is_empty() {
        score += 0.2;
    }
    if fresh {
        score += 0.1;
    }
    if query_matched {
        score += 0.1;
    }
    score.min(1.0)
}

/// Create a compliance engine with the standard rules
pub fn create_default_compliance_engine() -> ComplianceEngine {
    let mut engine = ComplianceEngine::new();
    engine.add_rule(Box::new(MeaningfulExplanationRule));
    engine.add_rule(Box::new(DataPointsPresentRule));
    engine.add_rule(Box::new(SourcesPresentRule));
    engine.add_rule(Box::new(DataFreshnessRule));
    engine
}
