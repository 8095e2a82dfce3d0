pub mod latency;
pub mod sentiment;

use async_trait::async_trait;
use thiserror::Error;

use crate::config::ScoringWindow;
use crate::types::Sentiment;

pub use latency::{LatencySummary, ScoringLatency};
pub use sentiment::HttpSentimentModel;

/// The model could not produce a usable score. The mention stays unscored and
/// is retried on the next pass.
#[derive(Debug, Error)]
#[error("{reason}")]
pub struct ScoringUnavailable {
    pub reason: String,
}

impl ScoringUnavailable {
    pub fn new(reason: impl Into<String>) -> Self {
        Self { reason: reason.into() }
    }
}

/// Opaque sentiment model.
#[async_trait]
pub trait SentimentModel: Send + Sync {
    async fn score(&self, text: &str) -> Result<Sentiment, ScoringUnavailable>;
}

/// Reject scores outside the model contract instead of letting them reach an
/// aggregate.
pub fn validate(sentiment: Sentiment) -> Result<Sentiment, ScoringUnavailable> {
    if !sentiment.polarity.is_finite() || !(-1.0..=1.0).contains(&sentiment.polarity) {
        return Err(ScoringUnavailable::new(format!(
            "polarity {} outside [-1, 1]",
            sentiment.polarity
        )));
    }
    if !sentiment.confidence.is_finite() || !(0.0..=1.0).contains(&sentiment.confidence) {
        return Err(ScoringUnavailable::new(format!(
            "confidence {} outside [0, 1]",
            sentiment.confidence
        )));
    }
    Ok(sentiment)
}

/// Text the model sees for a mention at byte span `span` of `text`.
/// `Chars(n)` keeps `n` characters on each side of the span.
pub fn scoring_text(text: &str, span: (usize, usize), window: ScoringWindow) -> &str {
    let ScoringWindow::Chars(n) = window else {
        return text;
    };
    let start = span.0.min(text.len());
    let end = span.1.clamp(start, text.len());
    if !text.is_char_boundary(start) || !text.is_char_boundary(end) {
        return text;
    }

    let from = text[..start]
        .char_indices()
        .rev()
        .nth(n.saturating_sub(1))
        .map_or(0, |(i, _)| i);
    let to = text[end..]
        .char_indices()
        .nth(n)
        .map_or(text.len(), |(i, _)| end + i);
    text[from..to].trim()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::SentimentLabel;

    #[test]
    fn full_window_is_the_whole_post() {
        let text = "Bought TSLA calls, feeling good";
        assert_eq!(scoring_text(text, (7, 11), ScoringWindow::Full), text);
    }

    #[test]
    fn char_window_surrounds_the_span() {
        let text = "Bought TSLA calls, feeling good";
        assert_eq!(scoring_text(text, (7, 11), ScoringWindow::Chars(3)), "ht TSLA ca");
        assert_eq!(scoring_text(text, (0, 6), ScoringWindow::Chars(100)), text);
    }

    #[test]
    fn char_window_respects_multibyte_text() {
        let text = "🚀🚀 GME 🚀🚀";
        let start = text.find("GME").unwrap();
        let window = scoring_text(text, (start, start + 3), ScoringWindow::Chars(2));
        assert_eq!(window, "🚀 GME 🚀");
    }

    #[test]
    fn out_of_range_scores_are_unavailable() {
        let ok = Sentiment { polarity: -0.4, label: SentimentLabel::Negative, confidence: 0.4 };
        assert!(validate(ok).is_ok());
        assert!(validate(Sentiment { polarity: 1.5, ..ok }).is_err());
        assert!(validate(Sentiment { polarity: f64::NAN, ..ok }).is_err());
        assert!(validate(Sentiment { confidence: 2.0, ..ok }).is_err());
    }
}
