//! Data tool contract, registry and the default adapters
//!
//! A tool wraps one external data source behind `invoke(args)`. Adapters
//! map provider failures into the [`ToolError`] taxonomy and stamp every
//! result with the source it came from and the time of the call.

pub mod providers;

use crate::cache;
use crate::config::EngineConfig;
use crate::error::ToolError;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use futures::future::join_all;
use providers::{FundDataProvider, MfApiFundProvider, ProviderError, QuoteProvider, YahooQuoteProvider};
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::collections::HashMap;
use std::sync::Arc;

pub const FUND_SOURCE_NAME: &str = "AMFI India";
pub const FUND_SOURCE_URL: &str = "https://www.amfiindia.com";
pub const QUOTE_SOURCE_NAME: &str = "Yahoo Finance";
pub const QUOTE_SOURCE_URL: &str = "https://finance.yahoo.com";

/// NAV history kept in a fund result, enough for a five-year CAGR.
const NAV_HISTORY_DAYS: i64 = 1900;

//
// ================= Invocation / Result =================
//

/// One requested tool call.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ToolInvocation {
    pub tool: String,
    #[serde(default)]
    pub args: Value,
}

impl ToolInvocation {
    pub fn new(tool: impl Into<String>, args: Value) -> Self {
        Self {
            tool: tool.into(),
            args,
        }
    }

    /// Cache key for this call.
    pub fn fingerprint(&self) -> String {
        cache::fingerprint(&self.tool, &self.args)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SourceRef {
    pub name: String,
    pub url: String,
}

/// Successful tool outcome. Cached as-is, so a hit replays `fetched_at`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ToolResult {
    pub tool: String,
    pub data: Value,
    pub source: SourceRef,
    pub fetched_at: DateTime<Utc>,
    /// Provider-side date of the data, when known.
    #[serde(default)]
    pub as_of: Option<String>,
}

impl ToolResult {
    fn new(tool: &str, data: Value, source_name: &str, source_url: &str, as_of: Option<String>) -> Self {
        Self {
            tool: tool.to_string(),
            data,
            source: SourceRef {
                name: source_name.to_string(),
                url: source_url.to_string(),
            },
            fetched_at: Utc::now(),
            as_of,
        }
    }
}

//
// ================= Tool Trait / Registry =================
//

#[async_trait::async_trait]
pub trait DataTool: Send + Sync {
    fn name(&self) -> &'static str;
    fn description(&self) -> &'static str;
    /// Argument shape shown to the router, as a JSON example.
    fn parameters(&self) -> &'static str;
    async fn invoke(&self, args: &Value) -> Result<ToolResult, ToolError>;
}

#[derive(Debug, Clone, Serialize)]
pub struct ToolDescriptor {
    pub name: &'static str,
    pub description: &'static str,
    pub parameters: &'static str,
}

/// Tool registry for looking up and invoking tools
pub struct ToolRegistry {
    tools: HashMap<String, Arc<dyn DataTool>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self {
            tools: HashMap::new(),
        }
    }

    pub fn register(&mut self, tool: Arc<dyn DataTool>) {
        self.tools.insert(tool.name().to_string(), tool);
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn DataTool>> {
        self.tools.get(name).cloned()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.tools.contains_key(name)
    }

    /// Descriptors sorted by name.
    pub fn describe(&self) -> Vec<ToolDescriptor> {
        let mut descriptors: Vec<ToolDescriptor> = self
            .tools
            .values()
            .map(|tool| ToolDescriptor {
                name: tool.name(),
                description: tool.description(),
                parameters: tool.parameters(),
            })
            .collect();
        descriptors.sort_by_key(|d| d.name);
        descriptors
    }

    pub async fn invoke(&self, name: &str, args: &Value) -> Result<ToolResult, ToolError> {
        let tool = self
            .get(name)
            .ok_or_else(|| ToolError::InvalidArgs(format!("unknown tool '{}'", name)))?;
        tool.invoke(args).await
    }
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::new()
    }
}

//
// ================= Argument helpers =================
//

fn object_args<'a>(args: &'a Value) -> Result<Option<&'a Map<String, Value>>, ToolError> {
    match args {
        Value::Null => Ok(None),
        Value::Object(map) => Ok(Some(map)),
        _ => Err(ToolError::InvalidArgs("arguments must be a JSON object".to_string())),
    }
}

/// Arguments are read the way cache fingerprints collapse them: whitespace
/// runs are one space and an integral float is the integer it names.
fn optional_str(args: &Value, key: &str) -> Result<Option<String>, ToolError> {
    let Some(map) = object_args(args)? else {
        return Ok(None);
    };
    match map.get(key) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(s)) if !s.trim().is_empty() => {
            Ok(Some(s.split_whitespace().collect::<Vec<_>>().join(" ")))
        }
        Some(Value::Number(n)) => Ok(Some(match n.as_f64() {
            Some(f) if n.is_f64() && f.fract() == 0.0 && f.abs() < i64::MAX as f64 => (f as i64).to_string(),
            _ => n.to_string(),
        })),
        Some(_) => Err(ToolError::InvalidArgs(format!("'{}' must be a non-empty string", key))),
    }
}

fn whole_number(value: &Value) -> Option<u64> {
    value.as_u64().or_else(|| {
        value
            .as_f64()
            .filter(|f| *f >= 0.0 && f.fract() == 0.0 && *f < u64::MAX as f64)
            .map(|f| f as u64)
    })
}

fn required_str(args: &Value, key: &str) -> Result<String, ToolError> {
    optional_str(args, key)?.ok_or_else(|| ToolError::InvalidArgs(format!("missing '{}'", key)))
}

fn limit_arg(args: &Value, default: usize, max: usize) -> Result<usize, ToolError> {
    let Some(map) = object_args(args)? else {
        return Ok(default);
    };
    match map.get("limit") {
        None | Some(Value::Null) => Ok(default),
        Some(v) => whole_number(v)
            .filter(|n| *n > 0)
            .map(|n| (n as usize).min(max))
            .ok_or_else(|| ToolError::InvalidArgs("'limit' must be a positive integer".to_string())),
    }
}

fn provider_error(err: ProviderError) -> ToolError {
    match err {
        ProviderError::Status { status: 400 | 422, body } => ToolError::InvalidArgs(body),
        ProviderError::Status { status: 404, body } => ToolError::NotFound(body),
        other => ToolError::ProviderUnavailable(other.to_string()),
    }
}

//
// ================= Fund tools =================
//

/// Scheme details, trailing returns and NAV history for one fund.
pub struct FundLookupTool {
    funds: Arc<dyn FundDataProvider>,
}

impl FundLookupTool {
    pub fn new(funds: Arc<dyn FundDataProvider>) -> Self {
        Self { funds }
    }

    async fn resolve_code(&self, args: &Value) -> Result<String, ToolError> {
        if let Some(code) = optional_str(args, "scheme_code")? {
            return Ok(code);
        }
        let name = required_str(args, "name")?;
        self.funds
            .search_by_text(&name, 1)
            .await
            .map_err(provider_error)?
            .into_iter()
            .next()
            .map(|hit| hit.scheme_code)
            .ok_or_else(|| ToolError::NotFound(format!("no scheme matches '{}'", name)))
    }
}

#[async_trait::async_trait]
impl DataTool for FundLookupTool {
    fn name(&self) -> &'static str {
        "fund_lookup"
    }

    fn description(&self) -> &'static str {
        "Look up one mutual fund by name or AMFI scheme code: NAV, category, trailing returns and NAV history"
    }

    fn parameters(&self) -> &'static str {
        r#"{"name": "SBI Bluechip"} or {"scheme_code": "119598"}"#
    }

    async fn invoke(&self, args: &Value) -> Result<ToolResult, ToolError> {
        let code = self.resolve_code(args).await?;

        let mut record = self
            .funds
            .lookup(&code)
            .await
            .map_err(provider_error)?
            .ok_or_else(|| ToolError::NotFound(format!("scheme {} not found", code)))?;

        let mut history = std::mem::take(&mut record.nav_history);
        if let Some(latest) = history.first().map(|p| p.date) {
            let cutoff = latest - ChronoDuration::days(NAV_HISTORY_DAYS);
            history.retain(|p| p.date >= cutoff);
        }

        let returns: Map<String, Value> = crate::analytics::trailing_returns(&history)
            .into_iter()
            .map(|(label, value)| (label.to_string(), json!(value)))
            .collect();

        let as_of = record.nav_date.map(|d| d.format("%Y-%m-%d").to_string());
        let data = json!({
            "scheme_code": record.scheme_code,
            "scheme_name": record.scheme_name,
            "fund_house": record.fund_house,
            "category": record.category,
            "nav": record.nav,
            "nav_date": as_of.clone(),
            "trailing_returns": returns,
            "nav_history": history,
        });

        Ok(ToolResult::new(self.name(), data, FUND_SOURCE_NAME, FUND_SOURCE_URL, as_of))
    }
}

/// Free-text fund discovery.
pub struct FundSearchTool {
    funds: Arc<dyn FundDataProvider>,
}

impl FundSearchTool {
    pub fn new(funds: Arc<dyn FundDataProvider>) -> Self {
        Self { funds }
    }
}

#[async_trait::async_trait]
impl DataTool for FundSearchTool {
    fn name(&self) -> &'static str {
        "fund_search"
    }

    fn description(&self) -> &'static str {
        "Search mutual fund schemes by free text; returns scheme codes and names"
    }

    fn parameters(&self) -> &'static str {
        r#"{"query": "axis midcap", "limit": 5}"#
    }

    async fn invoke(&self, args: &Value) -> Result<ToolResult, ToolError> {
        let query = required_str(args, "query")?;
        let limit = limit_arg(args, 5, 20)?;

        let funds = self
            .funds
            .search_by_text(&query, limit)
            .await
            .map_err(provider_error)?;
        if funds.is_empty() {
            return Err(ToolError::NotFound(format!("no schemes match '{}'", query)));
        }

        let data = json!({ "query": query, "funds": funds });
        Ok(ToolResult::new(self.name(), data, FUND_SOURCE_NAME, FUND_SOURCE_URL, None))
    }
}

/// Search phrases for the fund categories the analyzer recognises.
const CATEGORY_QUERIES: &[(&str, &str)] = &[
    ("large cap", "large cap"),
    ("mid cap", "mid cap"),
    ("small cap", "small cap"),
    ("flexi cap", "flexi cap"),
    ("multi cap", "multi cap"),
    ("elss", "elss tax saver"),
    ("index", "index fund"),
    ("debt", "corporate bond"),
    ("liquid", "liquid fund"),
    ("short term", "short duration"),
    ("hybrid", "hybrid"),
    ("balanced hybrid", "balanced advantage"),
    ("conservative hybrid", "conservative hybrid"),
    ("balanced advantage", "balanced advantage"),
    ("sectoral", "technology"),
    ("dividend yield", "dividend yield"),
];

/// Funds of one category with their latest NAV.
pub struct FundCategoryTool {
    funds: Arc<dyn FundDataProvider>,
}

impl FundCategoryTool {
    pub fn new(funds: Arc<dyn FundDataProvider>) -> Self {
        Self { funds }
    }
}

#[async_trait::async_trait]
impl DataTool for FundCategoryTool {
    fn name(&self) -> &'static str {
        "fund_category"
    }

    fn description(&self) -> &'static str {
        "List representative funds of a category (large cap, mid cap, small cap, elss, index, debt, liquid, hybrid...) with latest NAV"
    }

    fn parameters(&self) -> &'static str {
        r#"{"category": "large cap", "limit": 5}"#
    }

    async fn invoke(&self, args: &Value) -> Result<ToolResult, ToolError> {
        let category = required_str(args, "category")?.to_lowercase();
        let limit = limit_arg(args, 5, 10)?;
        let query = CATEGORY_QUERIES
            .iter()
            .find(|(name, _)| *name == category)
            .map(|(_, query)| *query)
            .unwrap_or(category.as_str());

        let hits = self
            .funds
            .search_by_text(query, limit)
            .await
            .map_err(provider_error)?;
        if hits.is_empty() {
            return Err(ToolError::NotFound(format!("no funds found for category '{}'", category)));
        }

        let records = join_all(hits.iter().map(|hit| self.funds.lookup(&hit.scheme_code))).await;
        let funds: Vec<Value> = hits
            .iter()
            .zip(records)
            .map(|(hit, record)| match record {
                Ok(Some(record)) => json!({
                    "scheme_code": record.scheme_code,
                    "scheme_name": record.scheme_name,
                    "category": record.category,
                    "nav": record.nav,
                    "nav_date": record.nav_date,
                }),
                _ => json!({ "scheme_code": hit.scheme_code, "scheme_name": hit.scheme_name }),
            })
            .collect();

        let data = json!({ "category": category, "funds": funds });
        Ok(ToolResult::new(self.name(), data, FUND_SOURCE_NAME, FUND_SOURCE_URL, None))
    }
}

//
// ================= Market tools =================
//

pub struct StockQuoteTool {
    quotes: Arc<dyn QuoteProvider>,
}

impl StockQuoteTool {
    pub fn new(quotes: Arc<dyn QuoteProvider>) -> Self {
        Self { quotes }
    }
}

#[async_trait::async_trait]
impl DataTool for StockQuoteTool {
    fn name(&self) -> &'static str {
        "stock_quote"
    }

    fn description(&self) -> &'static str {
        "Latest price, day change and 52-week range for an NSE/BSE listed stock"
    }

    fn parameters(&self) -> &'static str {
        r#"{"symbol": "RELIANCE"}"#
    }

    async fn invoke(&self, args: &Value) -> Result<ToolResult, ToolError> {
        let symbol = required_str(args, "symbol")?;
        let quote = self
            .quotes
            .quote(&symbol)
            .await
            .map_err(provider_error)?
            .ok_or_else(|| ToolError::NotFound(format!("no quote for '{}'", symbol)))?;

        let as_of = Some(quote.as_of.format("%Y-%m-%d").to_string());
        let url = format!("{}/quote/{}/", QUOTE_SOURCE_URL, quote.symbol);
        let data = serde_json::to_value(&quote)
            .map_err(|e| ToolError::ProviderUnavailable(format!("unencodable quote: {}", e)))?;
        Ok(ToolResult::new(self.name(), data, QUOTE_SOURCE_NAME, &url, as_of))
    }
}

const MARKET_INDICES: &[(&str, &str)] = &[("NIFTY 50", "^NSEI"), ("SENSEX", "^BSESN")];

/// Headline Indian indices.
pub struct MarketOverviewTool {
    quotes: Arc<dyn QuoteProvider>,
}

impl MarketOverviewTool {
    pub fn new(quotes: Arc<dyn QuoteProvider>) -> Self {
        Self { quotes }
    }
}

#[async_trait::async_trait]
impl DataTool for MarketOverviewTool {
    fn name(&self) -> &'static str {
        "market_overview"
    }

    fn description(&self) -> &'static str {
        "Current level and day change of NIFTY 50 and SENSEX"
    }

    fn parameters(&self) -> &'static str {
        "{}"
    }

    async fn invoke(&self, args: &Value) -> Result<ToolResult, ToolError> {
        object_args(args)?;

        let outcomes = join_all(MARKET_INDICES.iter().map(|(_, symbol)| self.quotes.quote(symbol))).await;

        let mut indices = Vec::new();
        let mut first_error = None;
        let mut as_of = None;
        for ((label, _), outcome) in MARKET_INDICES.iter().zip(outcomes) {
            match outcome {
                Ok(Some(quote)) => {
                    as_of.get_or_insert_with(|| quote.as_of.format("%Y-%m-%d").to_string());
                    indices.push(json!({
                        "index": label,
                        "value": quote.price,
                        "change_percent": quote.change_percent,
                    }));
                }
                Ok(None) => {}
                Err(e) => {
                    first_error.get_or_insert(e);
                }
            }
        }

        if indices.is_empty() {
            return Err(match first_error {
                Some(e) => provider_error(e),
                None => ToolError::NotFound("no index data available".to_string()),
            });
        }

        let data = json!({ "indices": indices });
        Ok(ToolResult::new(self.name(), data, QUOTE_SOURCE_NAME, QUOTE_SOURCE_URL, as_of))
    }
}

/// Registry with every adapter wired to the given providers.
pub fn registry_with_providers(funds: Arc<dyn FundDataProvider>, quotes: Arc<dyn QuoteProvider>) -> ToolRegistry {
    let mut registry = ToolRegistry::new();
    registry.register(Arc::new(FundLookupTool::new(funds.clone())));
    registry.register(Arc::new(FundSearchTool::new(funds.clone())));
    registry.register(Arc::new(FundCategoryTool::new(funds)));
    registry.register(Arc::new(StockQuoteTool::new(quotes.clone())));
    registry.register(Arc::new(MarketOverviewTool::new(quotes)));
    registry
}

/// Create a default registry backed by the HTTP providers.
pub fn create_default_registry(config: &EngineConfig) -> crate::Result<ToolRegistry> {
    let funds = Arc::new(MfApiFundProvider::new(&config.fund_api_base_url, config.tool_timeout)?);
    let quotes = Arc::new(YahooQuoteProvider::new(&config.quote_api_base_url, config.tool_timeout)?);
    Ok(registry_with_providers(funds, quotes))
}
