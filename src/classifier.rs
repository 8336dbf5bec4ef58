//! Keyword query analyzer
//!
//! Deterministic extraction of the entities and intent of an investment
//! question. Used by the keyword router, by the comparison override in the
//! orchestrator and by the reasoning agent to state its comparison basis.

use serde::Serialize;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum QueryIntent {
    Info,
    Compare,
    Recommend,
    Analyze,
    General,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum TimeWindow {
    Months(u32),
    Years(u32),
}

impl TimeWindow {
    /// Whole years covered, rounded up.
    pub fn years(&self) -> u32 {
        match self {
            TimeWindow::Months(m) => m.div_ceil(12).max(1),
            TimeWindow::Years(y) => *y,
        }
    }
}

impl fmt::Display for TimeWindow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TimeWindow::Months(1) => write!(f, "1 month"),
            TimeWindow::Months(m) => write!(f, "{} months", m),
            TimeWindow::Years(1) => write!(f, "1 year"),
            TimeWindow::Years(y) => write!(f, "{} years", y),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QueryAnalysis {
    pub fund_names: Vec<String>,
    pub categories: Vec<&'static str>,
    /// NSE symbols
    pub stocks: Vec<&'static str>,
    pub intent: QueryIntent,
    pub needs_market_data: bool,
    pub window: Option<TimeWindow>,
}

/// Static keyword tables
const CATEGORY_KEYWORDS: &[(&str, &[&str])] = &[
    ("large cap", &["large cap", "largecap", "large-cap", "bluechip", "blue chip"]),
    ("mid cap", &["mid cap", "midcap", "mid-cap"]),
    ("small cap", &["small cap", "smallcap", "small-cap"]),
    ("index", &["index fund", "nifty 50 fund", "sensex fund"]),
    ("elss", &["elss", "tax saving", "tax saver"]),
    ("debt", &["debt", "bond", "money market"]),
    ("liquid", &["liquid"]),
    ("hybrid", &["hybrid", "balanced"]),
    ("flexi cap", &["flexi cap", "flexicap", "multi cap", "multicap"]),
];

const FUND_HOUSES: &[&[&str]] = &[
    &["sbi"],
    &["hdfc"],
    &["icici"],
    &["axis"],
    &["kotak"],
    &["nippon"],
    &["aditya", "birla"],
    &["dsp"],
    &["uti"],
    &["tata"],
    &["franklin"],
    &["mirae"],
    &["parag", "parikh"],
    &["quant"],
    &["canara", "robeco"],
    &["bandhan"],
    &["edelweiss"],
    &["pgim"],
    &["motilal", "oswal"],
    &["invesco"],
];

/// Words that end a fund name span.
const NAME_STOP_WORDS: &[&str] = &[
    "vs", "versus", "and", "or", "with", "for", "in", "over", "than", "compared", "is", "are", "fund",
    "funds", "scheme", "worth", "performance", "returns", "return", "nav", "cagr", "to", "of", "the",
    "since", "last", "past", "doing", "perform", "performing",
];

const STOCKS: &[(&str, &str)] = &[
    ("reliance", "RELIANCE"),
    ("tcs", "TCS"),
    ("infosys", "INFY"),
    ("hdfc bank", "HDFCBANK"),
    ("icici bank", "ICICIBANK"),
    ("wipro", "WIPRO"),
    ("hcl", "HCLTECH"),
    ("bharti airtel", "BHARTIARTL"),
];

const REASONING_KEYWORDS: &[&str] = &[
    "compare", "vs", "versus", "better", "best", "cagr", "calculate", "return", "risk", "should i invest",
    "good time", "recommend", "analysis", "analyze", "evaluate", "which", "top performing", "highest return",
];

const COMPARISON_TOKENS: &[&str] = &["compare", "compared", "comparing", "comparison", "vs", "versus"];

const COMPARISON_PHRASES: &[&str] = &[
    "better than",
    "which is better",
    "which one is better",
    "difference between",
    "better option",
];

const MARKET_KEYWORDS: &[&str] = &["market", "nifty", "sensex", "index"];

fn clean(token: &str) -> String {
    token
        .trim_matches(|c: char| !c.is_alphanumeric() && c != '-')
        .to_lowercase()
}

fn tokens(text: &str) -> Vec<String> {
    text.split_whitespace().map(clean).filter(|t| !t.is_empty()).collect()
}

/// Hard-override heuristic: does the text ask to compare entities?
pub fn is_comparison_query(text: &str) -> bool {
    let lower = text.to_lowercase();
    tokens(&lower).iter().any(|t| COMPARISON_TOKENS.contains(&t.as_str()))
        || COMPARISON_PHRASES.iter().any(|p| lower.contains(p))
}

/// Whether the question calls for numeric reasoning rather than explanation.
pub fn needs_reasoning(text: &str) -> bool {
    let lower = text.to_lowercase();
    let words = tokens(&lower);
    REASONING_KEYWORDS.iter().any(|kw| {
        if kw.contains(' ') {
            lower.contains(kw)
        } else {
            words.iter().any(|w| w == kw)
        }
    })
}

/// Split a "Compare A vs B" style question into its compared entities.
/// Returns an empty list unless at least two entities are found.
pub fn comparison_entities(text: &str) -> Vec<String> {
    const PREFIXES: &[&str] = &[
        "compare ",
        "comparison of ",
        "comparison between ",
        "difference between ",
        "which is better ",
        "which is better: ",
        "which one is better ",
        "between ",
        "the ",
    ];
    const SEPARATORS: &[&str] = &[" vs. ", " vs ", " versus ", " compared to ", " and ", " or ", " with ", ", "];
    const TRAILERS: &[&str] = &[" over ", " for ", " in terms of ", " on ", " in the ", " since ", " based on "];

    let mut rest = text.trim().trim_end_matches(['?', '.', '!']).to_string();
    loop {
        let lower = rest.to_ascii_lowercase();
        match PREFIXES.iter().find(|p| lower.starts_with(**p)) {
            Some(prefix) => rest = rest[prefix.len()..].trim_start().to_string(),
            None => break,
        }
    }

    let mut parts = Vec::new();
    loop {
        let lower = rest.to_ascii_lowercase();
        let next = SEPARATORS
            .iter()
            .filter_map(|sep| lower.find(sep).map(|pos| (pos, sep.len())))
            .min_by_key(|(pos, _)| *pos);
        match next {
            Some((pos, len)) => {
                parts.push(rest[..pos].to_string());
                rest = rest[pos + len..].to_string();
            }
            None => {
                parts.push(rest);
                break;
            }
        }
    }

    // Drop trailing qualifiers such as "over 5 years" from the last entity.
    if let Some(last) = parts.last_mut() {
        let lower = last.to_ascii_lowercase();
        if let Some(pos) = TRAILERS.iter().filter_map(|t| lower.find(t)).min() {
            last.truncate(pos);
        }
    }

    let entities: Vec<String> = parts
        .into_iter()
        .map(|p| p.trim_matches(|c: char| c.is_whitespace() || ",:;".contains(c)).to_string())
        .filter(|p| !p.is_empty())
        .collect();

    if entities.len() >= 2 {
        entities
    } else {
        Vec::new()
    }
}

/// Time window mentioned in the text ("3 years", "5y", "last year", "6 months").
pub fn time_window(text: &str) -> Option<TimeWindow> {
    const NUMBER_WORDS: &[(&str, u32)] = &[
        ("one", 1),
        ("two", 2),
        ("three", 3),
        ("five", 5),
        ("seven", 7),
        ("ten", 10),
    ];

    let words = tokens(text);
    for (i, word) in words.iter().enumerate() {
        let number = word
            .parse::<u32>()
            .ok()
            .or_else(|| NUMBER_WORDS.iter().find(|(w, _)| w == word).map(|(_, n)| *n));

        if let Some(n) = number.filter(|n| *n > 0) {
            match words.get(i + 1).map(String::as_str) {
                Some("year" | "years" | "yr" | "yrs" | "y" | "-year") => return Some(TimeWindow::Years(n)),
                Some("month" | "months" | "m") => return Some(TimeWindow::Months(n)),
                _ => {}
            }
        }

        if let Some(digits) = word.strip_suffix('y').or_else(|| word.strip_suffix("yr")) {
            if let Ok(n) = digits.parse::<u32>() {
                if n > 0 {
                    return Some(TimeWindow::Years(n));
                }
            }
        }
        if let Some(digits) = word.strip_suffix("-year") {
            if let Ok(n) = digits.parse::<u32>() {
                if n > 0 {
                    return Some(TimeWindow::Years(n));
                }
            }
        }

        if matches!(word.as_str(), "last" | "past" | "this")
            && matches!(words.get(i + 1).map(String::as_str), Some("year"))
        {
            return Some(TimeWindow::Years(1));
        }
    }
    None
}

fn extract_fund_names(text: &str) -> Vec<String> {
    let raw: Vec<&str> = text.split_whitespace().collect();
    let cleaned: Vec<String> = raw.iter().map(|t| clean(t)).collect();
    let mut names = Vec::new();
    let mut i = 0;

    while i < raw.len() {
        let house = FUND_HOUSES.iter().find(|house| {
            house.len() <= cleaned.len() - i && house.iter().zip(&cleaned[i..]).all(|(h, t)| h == t)
        });

        let Some(house) = house else {
            i += 1;
            continue;
        };

        let start = i;
        let mut end = i + house.len();
        // "HDFC Bank" and "ICICI Bank" are stocks, not fund houses.
        if cleaned.get(end).is_some_and(|t| t == "bank") {
            i = end + 1;
            continue;
        }

        while end < raw.len() && end - start < house.len() + 5 {
            let word = &cleaned[end];
            if word.is_empty() || NAME_STOP_WORDS.contains(&word.as_str()) {
                break;
            }
            end += 1;
            if raw[end - 1].ends_with([',', '?', '.', '!', ';', ':']) {
                break;
            }
        }

        if end > start + house.len() {
            let name = raw[start..end]
                .iter()
                .map(|t| t.trim_matches(|c: char| !c.is_alphanumeric() && c != '&'))
                .collect::<Vec<_>>()
                .join(" ");
            names.push(name);
        }
        i = end.max(start + 1);
    }

    names
}

/// Keyword query analyzer
pub struct QueryAnalyzer;

impl QueryAnalyzer {
    pub fn analyze(text: &str) -> QueryAnalysis {
        let lower = text.to_lowercase();
        let words = tokens(&lower);

        let categories = CATEGORY_KEYWORDS
            .iter()
            .filter(|(_, keywords)| keywords.iter().any(|kw| lower.contains(kw)))
            .map(|(category, _)| *category)
            .collect();

        let stocks = STOCKS
            .iter()
            .filter(|(keyword, _)| {
                if keyword.contains(' ') {
                    lower.contains(keyword)
                } else {
                    words.iter().any(|w| w == keyword)
                }
            })
            .map(|(_, symbol)| *symbol)
            .collect();

        let intent = if is_comparison_query(text) {
            QueryIntent::Compare
        } else if ["best", "top", "recommend", "suggest"].iter().any(|kw| words.iter().any(|w| w == kw)) {
            QueryIntent::Recommend
        } else if ["worth", "should i", "good time", "analyze", "analyse"].iter().any(|kw| lower.contains(kw)) {
            QueryIntent::Analyze
        } else if ["what is", "tell me about", "info", "explain"].iter().any(|kw| lower.contains(kw)) {
            QueryIntent::Info
        } else {
            QueryIntent::General
        };

        let needs_market_data = MARKET_KEYWORDS
            .iter()
            .any(|kw| words.iter().any(|w| w == kw));

        QueryAnalysis {
            fund_names: extract_fund_names(text),
            categories,
            stocks,
            intent,
            needs_market_data,
            window: time_window(text),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_comparison_queries() {
        let cases = vec![
            "Compare SBI Bluechip vs HDFC Top 100",
            "axis midcap versus kotak emerging equity",
            "Which is better for me, ELSS or PPF?",
            "What's the difference between index funds and ETFs?",
        ];
        for c in cases {
            assert!(is_comparison_query(c), "{}", c);
        }

        let non_cases = vec!["What is NAV?", "How is the canvas market doing?", "Tell me about SBI Bluechip"];
        for c in non_cases {
            assert!(!is_comparison_query(c), "{}", c);
        }
    }

    #[test]
    fn test_comparison_entities() {
        assert_eq!(
            comparison_entities("Compare SBI Bluechip vs HDFC Top 100"),
            vec!["SBI Bluechip", "HDFC Top 100"]
        );
        assert_eq!(
            comparison_entities("compare axis midcap and kotak emerging equity over 5 years?"),
            vec!["axis midcap", "kotak emerging equity"]
        );
        assert!(comparison_entities("What is NAV?").is_empty());
    }

    #[test]
    fn test_fund_name_extraction() {
        let analysis = QueryAnalyzer::analyze("Compare SBI Bluechip vs HDFC Top 100");
        assert_eq!(analysis.fund_names, vec!["SBI Bluechip", "HDFC Top 100"]);
        assert_eq!(analysis.intent, QueryIntent::Compare);
        assert!(analysis.categories.contains(&"large cap"));

        let analysis = QueryAnalyzer::analyze("Is Nippon India Mid Cap Fund worth investing?");
        assert_eq!(analysis.fund_names, vec!["Nippon India Mid Cap"]);
        assert_eq!(analysis.intent, QueryIntent::Analyze);
    }

    #[test]
    fn test_stocks_are_not_fund_names() {
        let analysis = QueryAnalyzer::analyze("How is HDFC Bank stock doing?");
        assert!(analysis.fund_names.is_empty());
        assert_eq!(analysis.stocks, vec!["HDFCBANK"]);

        let analysis = QueryAnalyzer::analyze("tcs share price today");
        assert_eq!(analysis.stocks, vec!["TCS"]);
    }

    #[test]
    fn test_intent_and_market_need() {
        let analysis = QueryAnalyzer::analyze("Best small cap funds for aggressive investors");
        assert_eq!(analysis.intent, QueryIntent::Recommend);
        assert_eq!(analysis.categories, vec!["small cap"]);

        let analysis = QueryAnalyzer::analyze("How is the market today? Nifty looks weak");
        assert!(analysis.needs_market_data);
        assert_eq!(analysis.intent, QueryIntent::General);
    }

    #[test]
    fn test_time_window() {
        assert_eq!(time_window("CAGR over 5 years"), Some(TimeWindow::Years(5)));
        assert_eq!(time_window("3y returns"), Some(TimeWindow::Years(3)));
        assert_eq!(time_window("performance last year"), Some(TimeWindow::Years(1)));
        assert_eq!(time_window("returns in the past 6 months"), Some(TimeWindow::Months(6)));
        assert_eq!(time_window("What is NAV?"), None);
        assert_eq!(TimeWindow::Months(6).years(), 1);
        assert_eq!(TimeWindow::Years(3).to_string(), "3 years");
    }

    #[test]
    fn test_needs_reasoning() {
        assert!(needs_reasoning("Calculate the CAGR of Axis Bluechip"));
        assert!(needs_reasoning("Should I invest in small caps now?"));
        assert!(!needs_reasoning("What is an expense ratio?"));
    }
}
