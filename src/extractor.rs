//! Finds ticker references in post text.
//!
//! Pure: the same text and registry always produce the same mentions.

use std::collections::BTreeMap;
use std::sync::OnceLock;

use regex::Regex;

use crate::config::confidence;
use crate::registry::TickerRegistry;
use crate::types::{ExtractedMention, MatchType};

/// Words that, directly after an ambiguous symbol, mark it as a ticker ("ON stock").
const TICKER_KEYWORDS: &[&str] = &[
    "call", "calls", "earnings", "option", "options", "put", "puts", "share", "shares", "stock",
    "stocks", "ticker",
];

static SYMBOL_RE: OnceLock<Regex> = OnceLock::new();

fn symbol_regex() -> &'static Regex {
    SYMBOL_RE.get_or_init(|| {
        Regex::new(r"(\$)?\b([A-Za-z]{1,5}(?:\.[A-Za-z])?)\b")
            .unwrap_or_else(|error| panic!("symbol regex failed to compile: {error}"))
    })
}

/// One hit before per-ticker collapsing.
#[derive(Debug, Clone)]
struct Occurrence {
    ticker: String,
    match_type: MatchType,
    confidence: f64,
    span: (usize, usize),
}

/// Extract the distinct tickers referenced by `text`, one entry per ticker,
/// sorted by symbol.
pub fn extract_mentions(text: &str, registry: &TickerRegistry) -> Vec<ExtractedMention> {
    let mut occurrences = symbol_occurrences(text, registry);
    occurrences.extend(name_occurrences(text, registry));
    occurrences.sort_by_key(|o| o.span.0);
    collapse(occurrences)
}

fn symbol_occurrences(text: &str, registry: &TickerRegistry) -> Vec<Occurrence> {
    let mut found = Vec::new();
    for caps in symbol_regex().captures_iter(text) {
        let Some(token) = caps.get(2) else { continue };
        let cashtag = caps.get(1);
        let start = cashtag.map_or(token.start(), |c| c.start());
        let span = (start, token.end());

        if cashtag.is_some() {
            let upper = token.as_str().to_ascii_uppercase();
            if let Some(ticker) = resolve_symbol(&upper, registry) {
                found.push(Occurrence {
                    ticker,
                    match_type: MatchType::Symbol,
                    confidence: confidence::CASHTAG,
                    span,
                });
            }
            continue;
        }

        // Without a cashtag only the uppercase form counts; "on" is just a word.
        if !token.as_str().bytes().all(|b| b.is_ascii_uppercase() || b == b'.') {
            continue;
        }
        let Some(ticker) = resolve_symbol(token.as_str(), registry) else { continue };
        let ambiguous = registry.lookup(&ticker).is_some_and(|info| info.ambiguous);
        let confidence = if !ambiguous {
            confidence::SYMBOL
        } else if followed_by_keyword(&text[token.end()..]) {
            confidence::SYMBOL_WITH_KEYWORD
        } else {
            confidence::AMBIGUOUS_SYMBOL
        };
        found.push(Occurrence { ticker, match_type: MatchType::Symbol, confidence, span });
    }
    found
}

/// `BRK.B` is tried as written, then as its base symbol.
fn resolve_symbol(token: &str, registry: &TickerRegistry) -> Option<String> {
    if registry.contains(token) {
        return Some(token.to_string());
    }
    let (base, _) = token.split_once('.')?;
    registry.contains(base).then(|| base.to_string())
}

fn followed_by_keyword(rest: &str) -> bool {
    let next: String = rest
        .trim_start()
        .chars()
        .take_while(|c| c.is_alphabetic())
        .collect::<String>()
        .to_lowercase();
    TICKER_KEYWORDS.contains(&next.as_str())
}

fn name_occurrences(text: &str, registry: &TickerRegistry) -> Vec<Occurrence> {
    registry
        .find_names(text)
        .into_iter()
        .map(|hit| {
            let capitalized = hit.matched.chars().next().is_some_and(|c| c.is_uppercase());
            let confidence = if capitalized {
                confidence::NAME_CAPITALIZED
            } else if hit.ambiguous {
                confidence::NAME_AMBIGUOUS
            } else {
                confidence::NAME_OTHER
            };
            Occurrence {
                ticker: hit.symbol.to_string(),
                match_type: MatchType::CompanyName,
                confidence,
                span: (hit.start, hit.end),
            }
        })
        .collect()
}

/// Collapse occurrences (already in text order) to one mention per ticker:
/// max confidence, symbol over company name, span of the first occurrence of
/// the winning match type.
fn collapse(occurrences: Vec<Occurrence>) -> Vec<ExtractedMention> {
    let mut by_ticker: BTreeMap<String, ExtractedMention> = BTreeMap::new();
    for occ in occurrences {
        match by_ticker.get_mut(&occ.ticker) {
            None => {
                by_ticker.insert(
                    occ.ticker.clone(),
                    ExtractedMention {
                        ticker: occ.ticker,
                        match_type: occ.match_type,
                        confidence: occ.confidence,
                        span: occ.span,
                    },
                );
            }
            Some(existing) => {
                existing.confidence = existing.confidence.max(occ.confidence);
                if existing.match_type == MatchType::CompanyName
                    && occ.match_type == MatchType::Symbol
                {
                    existing.match_type = MatchType::Symbol;
                    existing.span = occ.span;
                }
            }
        }
    }
    by_ticker.into_values().collect()
}
