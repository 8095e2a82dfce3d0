//! Listed symbols that are also everyday English words or forum slang.
//!
//! A bare uppercase occurrence of one of these is not enough to call it a
//! ticker reference; the extractor requires a context marker before it
//! reports one with high confidence.

pub const COMMON_WORD_SYMBOLS: &[&str] = &[
    "ALL", "AM", "AN", "AND", "ANY", "ARE", "AS", "AT", "BE", "BIG", "BOX", "BUY", "BY", "CAN",
    "CAR", "CASH", "CEO", "COST", "CUT", "DD", "DO", "EAT", "EOD", "EPS", "EVER", "FAST", "FOR",
    "FUN", "GAIN", "GDP", "GO", "GOLD", "GOOD", "HAS", "HE", "HEAR", "HOLD", "HOPE", "HUGE", "IF",
    "IMO", "IN", "IPO", "IS", "IT", "ITM", "JOB", "KEY", "LIFE", "LOVE", "LOW", "MAN", "MAX", "ME",
    "MORE", "MOVE", "MY", "NEW", "NEXT", "NICE", "NO", "NOW", "OF", "OLD", "ON", "ONE", "OPEN",
    "OR", "OTM", "OUT", "OWN", "PLAY", "POST", "PUMP", "REAL", "RIDE", "RUN", "SAFE", "SAVE", "SEE",
    "SELL", "SO", "TECH", "THE", "TO", "TRUE", "TV", "TWO", "UP", "USA", "WELL", "WIN", "WORK",
    "YOLO", "YOU",
];

/// Company names (after suffix stripping, lowercased) that double as ordinary
/// words. Only checked for one-word names.
pub const COMMON_WORD_NAMES: &[&str] = &[
    "alphabet", "amazon", "apple", "arm", "block", "booking", "carnival", "chase", "coherent",
    "corning", "discover", "dollar", "domino", "express", "gap", "general", "global", "match",
    "meta", "national", "oracle", "progressive", "public", "robinhood", "shell", "snap", "square",
    "target", "united", "unity", "universal", "visa", "wayfair",
];

/// Single letters are always ambiguous; the list covers the rest.
pub fn is_common_word(symbol: &str) -> bool {
    symbol.len() == 1 || COMMON_WORD_SYMBOLS.contains(&symbol)
}

/// `key` is a normalized lowercase name. Multi-word names are never common words.
pub fn is_common_name(key: &str) -> bool {
    if key.contains(' ') {
        return false;
    }
    COMMON_WORD_NAMES.contains(&key) || is_common_word(&key.to_ascii_uppercase())
}
