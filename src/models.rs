//! Core data models for the investment insight engine

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

//
// ================= Profile Enums =================
//

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Default)]
#[serde(rename_all = "lowercase")]
pub enum RiskTolerance {
    Conservative,
    #[default]
    Moderate,
    Aggressive,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Default)]
#[serde(rename_all = "snake_case")]
pub enum InvestmentHorizon {
    /// Under 3 years
    ShortTerm,
    /// 3 to 5 years
    #[default]
    MediumTerm,
    /// Over 5 years
    LongTerm,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum InvestmentGoal {
    WealthCreation,
    Retirement,
    TaxSaving,
    EmergencyFund,
    ChildEducation,
    HomePurchase,
    RegularIncome,
}

//
// ================= Profile Hints =================
//

/// Lightweight investor profile carried by a session.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ProfileHints {
    #[serde(default)]
    pub risk_tolerance: RiskTolerance,
    #[serde(default)]
    pub investment_horizon: InvestmentHorizon,
    #[serde(default)]
    pub investment_goals: Vec<InvestmentGoal>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub age: Option<u8>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub monthly_investment_capacity: Option<f64>,
}

impl ProfileHints {
    /// Fund categories suited to this profile, most relevant first.
    pub fn recommended_categories(&self) -> Vec<&'static str> {
        let mut categories: Vec<&'static str> = match self.risk_tolerance {
            RiskTolerance::Conservative => vec!["debt", "liquid", "short term", "conservative hybrid"],
            RiskTolerance::Moderate => vec!["large cap", "flexi cap", "balanced hybrid", "index"],
            RiskTolerance::Aggressive => vec!["mid cap", "small cap", "flexi cap", "sectoral"],
        };

        for goal in &self.investment_goals {
            let extra = match goal {
                InvestmentGoal::TaxSaving => Some("elss"),
                InvestmentGoal::RegularIncome => Some("dividend yield"),
                InvestmentGoal::Retirement => Some("balanced advantage"),
                _ => None,
            };
            if let Some(category) = extra {
                if !categories.contains(&category) {
                    categories.push(category);
                }
            }
        }

        categories
    }

    /// One-paragraph description embedded in agent prompts.
    pub fn summary(&self) -> String {
        let mut lines = vec![
            format!("Risk tolerance: {}", self.risk_tolerance),
            format!("Investment horizon: {}", self.investment_horizon),
        ];

        if !self.investment_goals.is_empty() {
            let goals: Vec<String> = self.investment_goals.iter().map(|g| g.to_string()).collect();
            lines.push(format!("Goals: {}", goals.join(", ")));
        }
        if let Some(age) = self.age {
            lines.push(format!("Age: {}", age));
        }
        if let Some(capacity) = self.monthly_investment_capacity {
            lines.push(format!(
                "Monthly investment capacity: {}",
                crate::analytics::format_inr(capacity)
            ));
        }
        lines.push(format!(
            "Suitable categories: {}",
            self.recommended_categories().join(", ")
        ));

        lines.join("\n")
    }
}

//
// ================= Investment Response =================
//

/// One quantitative fact backing an explanation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DataPoint {
    pub metric: String,
    pub value: String,
    pub as_of_date: String,
}

impl DataPoint {
    pub fn new(metric: impl Into<String>, value: impl Into<String>, as_of_date: impl Into<String>) -> Self {
        Self {
            metric: metric.into(),
            value: value.into(),
            as_of_date: as_of_date.into(),
        }
    }
}

/// Where a data point came from. `accessed_at` is the time of the tool call.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Source {
    pub name: String,
    pub url: String,
    pub accessed_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct InvestmentResponse {
    pub explanation: String,
    #[serde(default)]
    pub data_points: Vec<DataPoint>,
    #[serde(default)]
    pub sources: Vec<Source>,
    pub risk_disclaimer: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub confidence_score: Option<f32>,
}

//
// ================= Chat I/O =================
//

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatRequest {
    pub message: String,
    #[serde(default)]
    pub session_id: Option<String>,
    #[serde(default)]
    pub profile_hints: Option<ProfileHints>,
}

impl ChatRequest {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            session_id: None,
            profile_hints: None,
        }
    }

    pub fn with_session(mut self, session_id: impl Into<String>) -> Self {
        self.session_id = Some(session_id.into());
        self
    }

    pub fn with_profile(mut self, hints: ProfileHints) -> Self {
        self.profile_hints = Some(hints);
        self
    }

    /// Rejects a blank message. Both delivery modes apply this before
    /// touching the session.
    pub fn validate(&self) -> crate::Result<()> {
        if self.message.trim().is_empty() {
            return Err(crate::OrchestrationError::InvalidRequest(
                "message must not be empty".to_string(),
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatResponse {
    pub session_id: String,
    pub response: InvestmentResponse,
    pub processing_time_ms: u64,
    pub cached: bool,
    /// True when the answer was produced despite tool or agent failures.
    #[serde(default)]
    pub degraded: bool,
}

//
// ================= Compliance =================
//

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComplianceCheck {
    pub rule_name: String,
    pub passed: bool,
    pub details: String,
}

impl fmt::Display for RiskTolerance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            RiskTolerance::Conservative => "Conservative",
            RiskTolerance::Moderate => "Moderate",
            RiskTolerance::Aggressive => "Aggressive",
        };
        write!(f, "{}", s)
    }
}

impl fmt::Display for InvestmentHorizon {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            InvestmentHorizon::ShortTerm => "Short-Term (< 3 years)",
            InvestmentHorizon::MediumTerm => "Medium-Term (3-5 years)",
            InvestmentHorizon::LongTerm => "Long-Term (> 5 years)",
        };
        write!(f, "{}", s)
    }
}

impl fmt::Display for InvestmentGoal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            InvestmentGoal::WealthCreation => "Wealth creation",
            InvestmentGoal::Retirement => "Retirement",
            InvestmentGoal::TaxSaving => "Tax saving",
            InvestmentGoal::EmergencyFund => "Emergency fund",
            InvestmentGoal::ChildEducation => "Child education",
            InvestmentGoal::HomePurchase => "Home purchase",
            InvestmentGoal::RegularIncome => "Regular income",
        };
        write!(f, "{}", s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_profile_hints_deserialize_with_defaults() {
        let hints: ProfileHints =
            serde_json::from_str(r#"{"risk_tolerance":"aggressive","investment_goals":["tax_saving"]}"#).unwrap();
        assert_eq!(hints.risk_tolerance, RiskTolerance::Aggressive);
        assert_eq!(hints.investment_horizon, InvestmentHorizon::MediumTerm);
        assert_eq!(hints.investment_goals, vec![InvestmentGoal::TaxSaving]);
    }

    #[test]
    fn test_recommended_categories_follow_risk_and_goals() {
        let hints = ProfileHints {
            risk_tolerance: RiskTolerance::Conservative,
            investment_goals: vec![InvestmentGoal::Retirement, InvestmentGoal::TaxSaving],
            ..Default::default()
        };
        let categories = hints.recommended_categories();
        assert_eq!(categories[0], "debt");
        assert!(categories.contains(&"balanced advantage"));
        assert!(categories.contains(&"elss"));
    }

    #[test]
    fn test_summary_mentions_profile() {
        let hints = ProfileHints {
            risk_tolerance: RiskTolerance::Aggressive,
            age: Some(31),
            ..Default::default()
        };
        let summary = hints.summary();
        assert!(summary.contains("Aggressive"));
        assert!(summary.contains("Age: 31"));
        assert!(summary.contains("small cap"));
    }

    #[test]
    fn test_confidence_score_omitted_when_absent() {
        let response = InvestmentResponse {
            explanation: "Plain answer text".into(),
            data_points: vec![],
            sources: vec![],
            risk_disclaimer: "Investments carry risk.".into(),
            confidence_score: None,
        };
        let json = serde_json::to_value(&response).unwrap();
        assert!(json.get("confidence_score").is_none());
    }
}
