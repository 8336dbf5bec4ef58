//! Numeric derivations over NAV histories.
//!
//! Histories are ordered newest first, the way the fund provider returns
//! them. Returns are expressed in percent and rounded to two decimals.

use chrono::{Duration, NaiveDate};

use crate::tools::providers::NavPoint;

/// Annual risk-free rate used for Sharpe ratios, in percent.
pub const RISK_FREE_RATE: f64 = 6.0;

/// Trailing windows reported for a fund, as (label, days).
pub const TRAILING_WINDOWS: &[(&str, i64)] = &[
    ("1M", 30),
    ("3M", 90),
    ("6M", 180),
    ("1Y", 365),
    ("3Y", 1095),
    ("5Y", 1825),
];

/// Return computed between two NAV observations.
#[derive(Debug, Clone, PartialEq)]
pub struct WindowReturn {
    pub start: NavPoint,
    pub end: NavPoint,
    /// Percent. Annualized for windows longer than a year.
    pub value: f64,
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

/// Compound annual growth rate in percent, `None` on non-positive inputs.
pub fn cagr(begin: f64, end: f64, years: f64) -> Option<f64> {
    if begin <= 0.0 || end <= 0.0 || years <= 0.0 {
        return None;
    }
    Some(round2(((end / begin).powf(1.0 / years) - 1.0) * 100.0))
}

pub fn absolute_return(begin: f64, end: f64) -> Option<f64> {
    if begin <= 0.0 {
        return None;
    }
    Some(round2((end - begin) / begin * 100.0))
}

/// Latest observation on or before `date`.
pub fn nav_on_or_before(history: &[NavPoint], date: NaiveDate) -> Option<&NavPoint> {
    history.iter().find(|p| p.date <= date)
}

/// Return over the trailing `days`, annualized when the window exceeds a year.
pub fn trailing_return(history: &[NavPoint], days: i64) -> Option<WindowReturn> {
    let end = history.first()?;
    let start = nav_on_or_before(history, end.date - Duration::days(days))?;
    if start.date == end.date {
        return None;
    }

    let value = if days > 365 {
        let years = (end.date - start.date).num_days() as f64 / 365.0;
        cagr(start.nav, end.nav, years)?
    } else {
        absolute_return(start.nav, end.nav)?
    };

    Some(WindowReturn {
        start: start.clone(),
        end: end.clone(),
        value,
    })
}

/// CAGR over a window of whole years.
pub fn cagr_over_years(history: &[NavPoint], years: u32) -> Option<WindowReturn> {
    let end = history.first()?;
    let start = nav_on_or_before(history, end.date - Duration::days(365 * years as i64))?;
    let elapsed = (end.date - start.date).num_days() as f64 / 365.0;
    let value = cagr(start.nav, end.nav, elapsed)?;
    Some(WindowReturn {
        start: start.clone(),
        end: end.clone(),
        value,
    })
}

/// Year-on-year returns for each of the last `years` years the history
/// covers, most recent first.
pub fn annual_returns(history: &[NavPoint], years: u32) -> Vec<f64> {
    let Some(latest) = history.first() else {
        return Vec::new();
    };

    (0..i64::from(years))
        .map_while(|k| {
            let end = nav_on_or_before(history, latest.date - Duration::days(365 * k))?;
            let start = nav_on_or_before(history, latest.date - Duration::days(365 * (k + 1)))?;
            if start.date == end.date {
                return None;
            }
            absolute_return(start.nav, end.nav)
        })
        .collect()
}

/// All trailing windows the history is long enough to cover.
pub fn trailing_returns(history: &[NavPoint]) -> Vec<(&'static str, f64)> {
    TRAILING_WINDOWS
        .iter()
        .filter_map(|(label, days)| trailing_return(history, *days).map(|r| (*label, r.value)))
        .collect()
}

/// Sample standard deviation.
pub fn std_dev(values: &[f64]) -> Option<f64> {
    if values.len() < 2 {
        return None;
    }
    let mean = values.iter().sum::<f64>() / values.len() as f64;
    let variance = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / (values.len() - 1) as f64;
    Some(round2(variance.sqrt()))
}

/// Sharpe ratio of a series of annual returns in percent.
pub fn sharpe_ratio(returns: &[f64]) -> Option<f64> {
    let deviation = std_dev(returns)?;
    if deviation == 0.0 {
        return None;
    }
    let mean = returns.iter().sum::<f64>() / returns.len() as f64;
    Some(round2((mean - RISK_FREE_RATE) / deviation))
}

/// Rupee amount in Indian notation: K, L (lakh) and Cr (crore).
pub fn format_inr(amount: f64) -> String {
    let abs = amount.abs();
    if abs >= 1e7 {
        format!("₹{:.2} Cr", amount / 1e7)
    } else if abs >= 1e5 {
        format!("₹{:.2} L", amount / 1e5)
    } else if abs >= 1e3 {
        format!("₹{:.2} K", amount / 1e3)
    } else {
        format!("₹{:.2}", amount)
    }
}

pub fn format_pct(value: f64) -> String {
    format!("{:.2}%", value)
}
