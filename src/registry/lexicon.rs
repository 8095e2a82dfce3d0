//! Lexicon CSV parsing and company-name normalization.

use super::RegistryLoadError;

const SYMBOL_COLUMNS: &[&str] = &["symbol", "act symbol"];
const NAME_COLUMNS: &[&str] = &["company_name", "company name", "security name", "name"];

/// Trailing words removed from listed security names before matching.
const NAME_SUFFIXES: &[&str] = &[
    "inc", "incorporated", "corp", "corporation", "co", "company", "ltd", "limited", "plc",
    "holdings", "n.v", "nv", "s.a", "sa", "ag", "se", "llc", "lp",
];

/// One usable lexicon row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LexiconEntry {
    pub symbol: String,
    /// Raw security name as listed.
    pub company_name: String,
}

/// Parse a whole lexicon. Malformed rows come back in the second list and are
/// not fatal; a missing header or column is.
pub fn parse_lexicon(
    contents: &str,
) -> Result<(Vec<LexiconEntry>, Vec<RegistryLoadError>), RegistryLoadError> {
    let mut lines = contents
        .lines()
        .enumerate()
        .map(|(i, l)| (i + 1, l.trim_end_matches('\r')))
        .filter(|(_, l)| !l.trim().is_empty());

    let (header_line, header) = lines.next().ok_or(RegistryLoadError::MissingHeader)?;
    let header = split_csv_line(header).map_err(|reason| RegistryLoadError::MalformedRow {
        line: header_line,
        reason,
    })?;
    let symbol_idx = find_column(&header, SYMBOL_COLUMNS)
        .ok_or(RegistryLoadError::MissingColumn("symbol"))?;
    let name_idx = find_column(&header, NAME_COLUMNS)
        .ok_or(RegistryLoadError::MissingColumn("company_name"))?;

    let mut entries = Vec::new();
    let mut skipped = Vec::new();
    for (line, raw) in lines {
        match parse_row(raw, symbol_idx, name_idx) {
            Ok(entry) => entries.push(entry),
            Err(reason) => skipped.push(RegistryLoadError::MalformedRow { line, reason }),
        }
    }
    Ok((entries, skipped))
}

fn find_column(header: &[String], candidates: &[&str]) -> Option<usize> {
    header
        .iter()
        .position(|h| candidates.iter().any(|c| h.trim().eq_ignore_ascii_case(c)))
}

fn parse_row(raw: &str, symbol_idx: usize, name_idx: usize) -> Result<LexiconEntry, String> {
    let fields = split_csv_line(raw)?;
    let symbol = fields
        .get(symbol_idx)
        .map(|s| s.trim().to_ascii_uppercase())
        .ok_or_else(|| format!("expected at least {} columns, got {}", symbol_idx + 1, fields.len()))?;
    let company_name = fields
        .get(name_idx)
        .map(|s| s.trim().to_string())
        .ok_or_else(|| format!("expected at least {} columns, got {}", name_idx + 1, fields.len()))?;

    if !is_valid_symbol(&symbol) {
        return Err(format!("invalid symbol {symbol:?}"));
    }
    Ok(LexiconEntry { symbol, company_name })
}

/// 1-5 letters, optionally followed by a one-letter share class (`BRK.B`).
pub fn is_valid_symbol(symbol: &str) -> bool {
    let (base, class) = match symbol.split_once('.') {
        Some((base, class)) => (base, Some(class)),
        None => (symbol, None),
    };
    let base_ok = (1..=5).contains(&base.len()) && base.bytes().all(|b| b.is_ascii_uppercase());
    let class_ok = class.map_or(true, |c| c.len() == 1 && c.bytes().all(|b| b.is_ascii_uppercase()));
    base_ok && class_ok
}

/// Minimal RFC 4180 field splitter: quoted fields, `""` escapes, no embedded newlines.
pub fn split_csv_line(line: &str) -> Result<Vec<String>, String> {
    let mut fields = Vec::new();
    let mut field = String::new();
    let mut in_quotes = false;
    let mut chars = line.chars().peekable();

    while let Some(c) = chars.next() {
        match (c, in_quotes) {
            ('"', true) if chars.peek() == Some(&'"') => {
                field.push('"');
                chars.next();
            }
            ('"', true) => in_quotes = false,
            ('"', false) if field.trim().is_empty() => {
                field.clear();
                in_quotes = true;
            }
            (',', false) => fields.push(std::mem::take(&mut field)),
            _ => field.push(c),
        }
    }
    if in_quotes {
        return Err("unterminated quoted field".to_string());
    }
    fields.push(field);
    Ok(fields)
}

/// Reduce a listed security name to the form people write in posts.
///
/// `"Apple Inc. - Common Stock"` → `"Apple"`, `"Procter & Gamble Company (The)"`
/// → `"Procter & Gamble"`. Returns None when nothing matchable is left.
pub fn normalize_company_name(raw: &str) -> Option<String> {
    let base = raw.split(" - ").next().unwrap_or(raw);
    let base = base.replace("(The)", "");
    let mut words: Vec<&str> = base.split_whitespace().collect();

    loop {
        let Some(last) = words.last() else { break };
        let bare = last.trim_end_matches(['.', ',']).to_ascii_lowercase();
        if NAME_SUFFIXES.contains(&bare.as_str()) {
            words.pop();
            continue;
        }
        if words.len() >= 2 && bare.len() == 1 {
            let prev = words[words.len() - 2].to_ascii_lowercase();
            if prev == "class" {
                words.truncate(words.len() - 2);
                continue;
            }
        }
        break;
    }
    if words.first().is_some_and(|w| w.eq_ignore_ascii_case("the")) {
        words.remove(0);
    }

    let name = words.join(" ");
    let name = name.trim_end_matches([',', '.', '&', ' ']).to_string();
    let starts_ok = name.chars().next().is_some_and(|c| c.is_alphanumeric());
    let ends_ok = name.chars().last().is_some_and(|c| c.is_alphanumeric());
    if name.chars().count() < 3 || !starts_ok || !ends_ok {
        return None;
    }
    Some(name)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn splits_quoted_fields_with_commas() {
        let fields = split_csv_line(r#"TSLA,"Tesla, Inc. - Common Stock",N"#).unwrap();
        assert_eq!(fields, vec!["TSLA", "Tesla, Inc. - Common Stock", "N"]);

        let escaped = split_csv_line(r#"X,"The ""Best"" Co""#).unwrap();
        assert_eq!(escaped[1], r#"The "Best" Co"#);

        assert!(split_csv_line(r#"X,"unterminated"#).is_err());
    }

    #[test]
    fn normalizes_listed_security_names() {
        assert_eq!(normalize_company_name("Apple Inc. - Common Stock").as_deref(), Some("Apple"));
        assert_eq!(normalize_company_name("Tesla, Inc.").as_deref(), Some("Tesla"));
        assert_eq!(
            normalize_company_name("Alphabet Inc. - Class A Common Stock").as_deref(),
            Some("Alphabet")
        );
        assert_eq!(normalize_company_name("Meta Platforms, Inc. Class A").as_deref(), Some("Meta Platforms"));
        assert_eq!(
            normalize_company_name("Procter & Gamble Company (The)").as_deref(),
            Some("Procter & Gamble")
        );
        assert_eq!(normalize_company_name("AB"), None);
        assert_eq!(normalize_company_name(""), None);
    }

    #[test]
    fn validates_symbols() {
        assert!(is_valid_symbol("TSLA"));
        assert!(is_valid_symbol("A"));
        assert!(is_valid_symbol("BRK.B"));
        assert!(!is_valid_symbol("TOOLONG"));
        assert!(!is_valid_symbol("AB1"));
        assert!(!is_valid_symbol(""));
        assert!(!is_valid_symbol("BRK.BB"));
    }

    #[test]
    fn nasdaq_headers_are_recognized() {
        let csv = "Symbol,Security Name,Market Category\nAAPL,Apple Inc. - Common Stock,Q\n";
        let (entries, skipped) = parse_lexicon(csv).unwrap();
        assert!(skipped.is_empty());
        assert_eq!(entries, vec![LexiconEntry {
            symbol: "AAPL".to_string(),
            company_name: "Apple Inc. - Common Stock".to_string(),
        }]);
    }

    #[test]
    fn malformed_rows_are_reported_with_line_numbers() {
        let csv = "symbol,company_name\nTSLA,Tesla Inc\nBAD1,Broken Corp\n\nZZZZZZ,Too Long\nMSFT\nON,ON Semiconductor Corp\n";
        let (entries, skipped) = parse_lexicon(csv).unwrap();
        let symbols: Vec<_> = entries.iter().map(|e| e.symbol.as_str()).collect();
        assert_eq!(symbols, vec!["TSLA", "ON"]);

        let lines: Vec<usize> = skipped
            .iter()
            .map(|e| match e {
                RegistryLoadError::MalformedRow { line, .. } => *line,
                other => panic!("unexpected {other:?}"),
            })
            .collect();
        assert_eq!(lines, vec![3, 5, 6]);
    }

    #[test]
    fn missing_columns_are_fatal() {
        assert!(matches!(parse_lexicon(""), Err(RegistryLoadError::MissingHeader)));
        assert!(matches!(
            parse_lexicon("ticker,company_name\nX,Y\n"),
            Err(RegistryLoadError::MissingColumn("symbol"))
        ));
    }
}
