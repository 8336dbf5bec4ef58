//! Market data providers consumed by the tool adapters.
//!
//! The traits are the collaborator contracts (`lookup`, `search_by_text`);
//! the HTTP implementations talk to the mfapi.in AMFI mirror and to the
//! Yahoo Finance chart endpoint.

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, TimeZone, Utc};
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, warn};

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProviderError {
    #[error("provider request failed: {0}")]
    Transport(String),

    #[error("provider returned status {status}: {body}")]
    Status { status: u16, body: String },

    #[error("provider returned an unexpected payload: {0}")]
    Payload(String),
}

//
// ================= Records =================
//

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct NavPoint {
    pub date: NaiveDate,
    pub nav: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FundSummary {
    pub scheme_code: String,
    pub scheme_name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FundRecord {
    pub scheme_code: String,
    pub scheme_name: String,
    pub fund_house: Option<String>,
    pub category: Option<String>,
    pub nav: Option<f64>,
    pub nav_date: Option<NaiveDate>,
    /// Newest first.
    #[serde(default)]
    pub nav_history: Vec<NavPoint>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Quote {
    pub symbol: String,
    pub name: Option<String>,
    pub currency: Option<String>,
    pub price: f64,
    pub previous_close: Option<f64>,
    pub change_percent: Option<f64>,
    pub fifty_two_week_high: Option<f64>,
    pub fifty_two_week_low: Option<f64>,
    pub as_of: DateTime<Utc>,
}

//
// ================= Contracts =================
//

#[async_trait]
pub trait FundDataProvider: Send + Sync {
    /// Scheme details and NAV history by AMFI scheme code, `None` when unknown.
    async fn lookup(&self, scheme_code: &str) -> Result<Option<FundRecord>, ProviderError>;

    /// Schemes whose name matches `query`, best matches first.
    async fn search_by_text(&self, query: &str, limit: usize) -> Result<Vec<FundSummary>, ProviderError>;
}

#[async_trait]
pub trait QuoteProvider: Send + Sync {
    async fn quote(&self, symbol: &str) -> Result<Option<Quote>, ProviderError>;
}

fn build_client(timeout: Duration) -> Result<Client, reqwest::Error> {
    Client::builder()
        .pool_idle_timeout(Duration::from_secs(60))
        .pool_max_idle_per_host(8)
        .timeout(timeout)
        .user_agent("Mozilla/5.0 (compatible; investment-insight/0.1)")
        .build()
}

//
// ================= mfapi.in =================
//

#[derive(Clone)]
pub struct MfApiFundProvider {
    client: Client,
    base_url: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct MfSearchHit {
    scheme_code: serde_json::Value,
    scheme_name: String,
}

#[derive(Debug, Default, Deserialize)]
struct MfSchemeMeta {
    fund_house: Option<String>,
    scheme_category: Option<String>,
    scheme_code: Option<serde_json::Value>,
    scheme_name: Option<String>,
}

#[derive(Debug, Deserialize)]
struct MfNavRow {
    date: String,
    nav: String,
}

#[derive(Debug, Deserialize)]
struct MfSchemeResponse {
    #[serde(default)]
    meta: MfSchemeMeta,
    #[serde(default)]
    data: Vec<MfNavRow>,
}

impl MfApiFundProvider {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> crate::Result<Self> {
        Ok(Self {
            client: build_client(timeout)?,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }

    async fn scheme(&self, scheme_code: &str) -> Result<Option<MfSchemeResponse>, ProviderError> {
        let url = format!("{}/mf/{}", self.base_url, scheme_code.trim());
        debug!(url = %url, "Fetching scheme");

        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| ProviderError::Transport(e.to_string()))?;

        let status = response.status();
        if status == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ProviderError::Status {
                status: status.as_u16(),
                body,
            });
        }

        let scheme: MfSchemeResponse = response
            .json()
            .await
            .map_err(|e| ProviderError::Payload(e.to_string()))?;

        if scheme.meta.scheme_name.is_none() && scheme.data.is_empty() {
            return Ok(None);
        }
        Ok(Some(scheme))
    }
}

fn code_to_string(value: &serde_json::Value) -> String {
    match value {
        serde_json::Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn parse_nav_rows(rows: &[MfNavRow]) -> Vec<NavPoint> {
    rows.iter()
        .filter_map(|row| {
            let date = NaiveDate::parse_from_str(&row.date, "%d-%m-%Y").ok()?;
            let nav = row.nav.trim().parse::<f64>().ok()?;
            (nav > 0.0).then_some(NavPoint { date, nav })
        })
        .collect()
}

#[async_trait]
impl FundDataProvider for MfApiFundProvider {
    async fn lookup(&self, scheme_code: &str) -> Result<Option<FundRecord>, ProviderError> {
        let Some(scheme) = self.scheme(scheme_code).await? else {
            return Ok(None);
        };
        let history = parse_nav_rows(&scheme.data);
        let latest = history.first().cloned();

        Ok(Some(FundRecord {
            scheme_code: scheme
                .meta
                .scheme_code
                .as_ref()
                .map(code_to_string)
                .unwrap_or_else(|| scheme_code.to_string()),
            scheme_name: scheme.meta.scheme_name.unwrap_or_default(),
            fund_house: scheme.meta.fund_house,
            category: scheme.meta.scheme_category,
            nav: latest.as_ref().map(|p| p.nav),
            nav_date: latest.map(|p| p.date),
            nav_history: history,
        }))
    }

    async fn search_by_text(&self, query: &str, limit: usize) -> Result<Vec<FundSummary>, ProviderError> {
        let url = format!("{}/mf/search", self.base_url);
        let response = self
            .client
            .get(&url)
            .query(&[("q", query)])
            .send()
            .await
            .map_err(|e| ProviderError::Transport(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ProviderError::Status {
                status: status.as_u16(),
                body,
            });
        }

        let hits: Vec<MfSearchHit> = response
            .json()
            .await
            .map_err(|e| ProviderError::Payload(e.to_string()))?;

        Ok(rank_search_hits(query, hits, limit))
    }
}

/// Prefer direct-growth plans, then shorter names, keeping provider order otherwise.
fn rank_search_hits(query: &str, hits: Vec<MfSearchHit>, limit: usize) -> Vec<FundSummary> {
    let query = query.to_lowercase();
    let mut ranked: Vec<(usize, FundSummary)> = hits
        .into_iter()
        .map(|hit| {
            let name = hit.scheme_name.to_lowercase();
            let mut penalty = 0;
            if !name.contains(&query) {
                penalty += 4;
            }
            if !name.contains("direct") {
                penalty += 2;
            }
            if !name.contains("growth") {
                penalty += 1;
            }
            (
                penalty,
                FundSummary {
                    scheme_code: code_to_string(&hit.scheme_code),
                    scheme_name: hit.scheme_name,
                },
            )
        })
        .collect();

    ranked.sort_by_key(|(penalty, fund)| (*penalty, fund.scheme_name.len()));
    ranked.into_iter().take(limit).map(|(_, fund)| fund).collect()
}

//
// ================= Yahoo Finance =================
//

#[derive(Clone)]
pub struct YahooQuoteProvider {
    client: Client,
    base_url: String,
}

#[derive(Debug, Deserialize)]
struct ChartEnvelope {
    chart: Chart,
}

#[derive(Debug, Deserialize)]
struct Chart {
    result: Option<Vec<ChartResult>>,
}

#[derive(Debug, Deserialize)]
struct ChartResult {
    meta: ChartMeta,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ChartMeta {
    symbol: String,
    currency: Option<String>,
    long_name: Option<String>,
    short_name: Option<String>,
    regular_market_price: Option<f64>,
    chart_previous_close: Option<f64>,
    regular_market_time: Option<i64>,
    fifty_two_week_high: Option<f64>,
    fifty_two_week_low: Option<f64>,
}

impl YahooQuoteProvider {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> crate::Result<Self> {
        Ok(Self {
            client: build_client(timeout)?,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }
}

/// Indian listings default to NSE unless an exchange suffix or index caret is given.
pub fn normalize_symbol(symbol: &str) -> String {
    let symbol = symbol.trim().to_uppercase();
    if symbol.starts_with('^') || symbol.ends_with(".NS") || symbol.ends_with(".BO") {
        symbol
    } else {
        format!("{}.NS", symbol)
    }
}

#[async_trait]
impl QuoteProvider for YahooQuoteProvider {
    async fn quote(&self, symbol: &str) -> Result<Option<Quote>, ProviderError> {
        let symbol = normalize_symbol(symbol);
        let url = format!("{}/v8/finance/chart/{}", self.base_url, symbol);

        let response = self
            .client
            .get(&url)
            .query(&[("range", "5d"), ("interval", "1d")])
            .send()
            .await
            .map_err(|e| ProviderError::Transport(e.to_string()))?;

        let status = response.status();
        if status == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            warn!(symbol = %symbol, status = status.as_u16(), "Quote provider error");
            return Err(ProviderError::Status {
                status: status.as_u16(),
                body,
            });
        }

        let envelope: ChartEnvelope = response
            .json()
            .await
            .map_err(|e| ProviderError::Payload(e.to_string()))?;

        let Some(meta) = envelope
            .chart
            .result
            .and_then(|results| results.into_iter().next())
            .map(|r| r.meta)
        else {
            return Ok(None);
        };

        let Some(price) = meta.regular_market_price else {
            return Ok(None);
        };

        let change_percent = meta
            .chart_previous_close
            .filter(|prev| *prev > 0.0)
            .map(|prev| ((price - prev) / prev * 10_000.0).round() / 100.0);

        Ok(Some(Quote {
            symbol: meta.symbol,
            name: meta.long_name.or(meta.short_name),
            currency: meta.currency,
            price,
            previous_close: meta.chart_previous_close,
            change_percent,
            fifty_two_week_high: meta.fifty_two_week_high,
            fifty_two_week_low: meta.fifty_two_week_low,
            as_of: meta
                .regular_market_time
                .and_then(|ts| Utc.timestamp_opt(ts, 0).single())
                .unwrap_or_else(Utc::now),
        }))
    }
}
