//! Ticker lexicon: the set of known symbols and the company-name matcher.
//!
//! Built once per process and passed by reference to the extractor. Reloading
//! the lexicon means restarting the pipeline.

pub mod common_words;
pub mod lexicon;

use std::collections::{HashMap, HashSet};
use std::path::Path;

use regex::{Regex, RegexBuilder};
use thiserror::Error;
use tracing::{info, warn};

use self::lexicon::{normalize_company_name, parse_lexicon, LexiconEntry};

#[derive(Debug, Error)]
pub enum RegistryLoadError {
    #[error("cannot read lexicon {path}: {source}")]
    Unreadable {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("lexicon has no header row")]
    MissingHeader,

    #[error("lexicon header has no {0} column")]
    MissingColumn(&'static str),

    #[error("line {line}: {reason}")]
    MalformedRow { line: usize, reason: String },

    #[error("lexicon contains no usable rows")]
    Empty,

    #[error("company name matcher failed to build: {0}")]
    Matcher(#[from] regex::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SymbolInfo {
    /// Collides with an everyday word or a single letter.
    pub ambiguous: bool,
}

/// A company-name hit in some text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NameMatch<'a> {
    pub symbol: &'a str,
    pub start: usize,
    pub end: usize,
    /// The text as written in the post.
    pub matched: &'a str,
    /// The name is also an everyday word ("Block", "Target").
    pub ambiguous: bool,
}

#[derive(Debug)]
struct NameInfo {
    symbol: String,
    ambiguous: bool,
}

#[derive(Debug)]
pub struct TickerRegistry {
    symbols: HashMap<String, SymbolInfo>,
    /// normalized lowercase name → owning symbol
    names: HashMap<String, NameInfo>,
    name_matcher: Option<Regex>,
}

impl TickerRegistry {
    /// Load the lexicon file. Malformed rows are logged and skipped; the file
    /// being unreadable or yielding no usable rows is an error.
    pub fn load(
        path: impl AsRef<Path>,
        extra_ambiguous: &[String],
    ) -> Result<Self, RegistryLoadError> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path).map_err(|source| {
            RegistryLoadError::Unreadable { path: path.display().to_string(), source }
        })?;
        let registry = Self::from_csv(&contents, extra_ambiguous)?;
        info!(
            path = %path.display(),
            symbols = registry.symbol_count(),
            names = registry.name_count(),
            "Loaded ticker lexicon"
        );
        Ok(registry)
    }

    pub fn from_csv(contents: &str, extra_ambiguous: &[String]) -> Result<Self, RegistryLoadError> {
        let (entries, skipped) = parse_lexicon(contents)?;
        for err in &skipped {
            warn!("Skipping lexicon row: {err}");
        }
        Self::from_entries(entries, extra_ambiguous)
    }

    pub fn from_entries(
        entries: impl IntoIterator<Item = LexiconEntry>,
        extra_ambiguous: &[String],
    ) -> Result<Self, RegistryLoadError> {
        let extra: HashSet<String> =
            extra_ambiguous.iter().map(|s| s.trim().to_ascii_uppercase()).collect();

        let mut symbols = HashMap::new();
        let mut names = HashMap::new();
        for entry in entries {
            if symbols.contains_key(&entry.symbol) {
                continue;
            }
            let ambiguous =
                common_words::is_common_word(&entry.symbol) || extra.contains(&entry.symbol);
            if let Some(name) = normalize_company_name(&entry.company_name) {
                let key = name_key(&name);
                let ambiguous = common_words::is_common_name(&key)
                    || (!key.contains(' ') && extra.contains(&key.to_ascii_uppercase()));
                // First listing wins when two share classes normalize to one name.
                names
                    .entry(key)
                    .or_insert_with(|| NameInfo { symbol: entry.symbol.clone(), ambiguous });
            }
            symbols.insert(entry.symbol, SymbolInfo { ambiguous });
        }

        if symbols.is_empty() {
            return Err(RegistryLoadError::Empty);
        }

        let name_matcher = build_name_matcher(names.keys())?;
        Ok(Self { symbols, names, name_matcher })
    }

    pub fn lookup(&self, symbol: &str) -> Option<SymbolInfo> {
        self.symbols.get(symbol).copied()
    }

    pub fn contains(&self, symbol: &str) -> bool {
        self.symbols.contains_key(symbol)
    }

    pub fn symbol_count(&self) -> usize {
        self.symbols.len()
    }

    pub fn name_count(&self) -> usize {
        self.names.len()
    }

    /// Non-overlapping company-name hits, leftmost first, longest name winning
    /// at each position. Matching is case-insensitive and word-bounded.
    pub fn find_names<'a>(&'a self, text: &'a str) -> Vec<NameMatch<'a>> {
        let Some(matcher) = &self.name_matcher else {
            return Vec::new();
        };
        matcher
            .find_iter(text)
            .filter_map(|m| {
                let info = self.names.get(&name_key(m.as_str()))?;
                Some(NameMatch {
                    symbol: info.symbol.as_str(),
                    start: m.start(),
                    end: m.end(),
                    matched: m.as_str(),
                    ambiguous: info.ambiguous,
                })
            })
            .collect()
    }
}

/// Lowercase with whitespace runs collapsed, so "Bank  of\nAmerica" finds "bank of america".
fn name_key(name: &str) -> String {
    name.split_whitespace()
        .map(|w| w.to_lowercase())
        .collect::<Vec<_>>()
        .join(" ")
}

fn build_name_matcher<'a>(
    keys: impl Iterator<Item = &'a String>,
) -> Result<Option<Regex>, RegistryLoadError> {
    let mut keys: Vec<&String> = keys.collect();
    if keys.is_empty() {
        return Ok(None);
    }
    // Alternation is leftmost-first, so longer names must come first.
    keys.sort_by(|a, b| b.len().cmp(&a.len()).then_with(|| a.cmp(b)));
    let alternatives: Vec<String> = keys
        .iter()
        .map(|k| {
            k.split(' ')
                .map(|w| regex::escape(w))
                .collect::<Vec<_>>()
                .join(r"\s+")
        })
        .collect();
    let pattern = format!(r"\b(?:{})\b", alternatives.join("|"));
    let regex = RegexBuilder::new(&pattern)
        .case_insensitive(true)
        .size_limit(64 * (1 << 20))
        .build()?;
    Ok(Some(regex))
}
