use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::config::Config;
use crate::scorer::{validate, ScoringUnavailable, SentimentModel};
use crate::types::{Sentiment, SentimentLabel};

#[derive(Debug, Serialize)]
struct ScoreRequest<'a> {
    text: &'a str,
}

/// `{"label": "positive", "score": 0.93}`. Pipeline-style servers wrap it in a
/// one-element list.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum ScoreResponse {
    Single(LabelScore),
    List(Vec<LabelScore>),
}

#[derive(Debug, Clone, Deserialize)]
struct LabelScore {
    label: String,
    score: f64,
}

/// FinBERT-style classifier behind an HTTP endpoint.
pub struct HttpSentimentModel {
    client: reqwest::Client,
    url: String,
}

impl HttpSentimentModel {
    pub fn new(cfg: &Config) -> Result<Self, ScoringUnavailable> {
        let client = reqwest::Client::builder()
            .timeout(cfg.http_timeout)
            .build()
            .map_err(|e| ScoringUnavailable::new(format!("cannot build HTTP client: {e}")))?;
        Ok(Self { client, url: cfg.sentiment_url.clone() })
    }
}

#[async_trait]
impl SentimentModel for HttpSentimentModel {
    async fn score(&self, text: &str) -> Result<Sentiment, ScoringUnavailable> {
        let resp = self
            .client
            .post(&self.url)
            .json(&ScoreRequest { text })
            .send()
            .await
            .map_err(|e| ScoringUnavailable::new(format!("request failed: {e}")))?;
        if !resp.status().is_success() {
            return Err(ScoringUnavailable::new(format!("model answered HTTP {}", resp.status())));
        }
        let body: ScoreResponse = resp
            .json()
            .await
            .map_err(|e| ScoringUnavailable::new(format!("unreadable model response: {e}")))?;
        let top = match body {
            ScoreResponse::Single(s) => s,
            ScoreResponse::List(list) => list
                .into_iter()
                .max_by(|a, b| a.score.total_cmp(&b.score))
                .ok_or_else(|| ScoringUnavailable::new("model returned no labels"))?,
        };
        debug!(label = %top.label, score = top.score, "Model response");
        validate(polarity_from_label(&top.label, top.score)?)
    }
}

/// Signed polarity from a classifier label and its probability.
pub fn polarity_from_label(label: &str, score: f64) -> Result<Sentiment, ScoringUnavailable> {
    let label = match label.trim().to_ascii_lowercase().as_str() {
        "positive" | "bullish" => SentimentLabel::Positive,
        "negative" | "bearish" => SentimentLabel::Negative,
        "neutral" => SentimentLabel::Neutral,
        other => return Err(ScoringUnavailable::new(format!("unknown label {other:?}"))),
    };
    let polarity = match label {
        SentimentLabel::Positive => score,
        SentimentLabel::Negative => -score,
        SentimentLabel::Neutral => 0.0,
    };
    Ok(Sentiment { polarity, label, confidence: score })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn labels_map_to_signed_polarity() {
        let pos = polarity_from_label("Positive", 0.9).unwrap();
        assert_eq!(pos.polarity, 0.9);
        assert_eq!(pos.label, SentimentLabel::Positive);

        let neg = polarity_from_label("negative", 0.7).unwrap();
        assert_eq!(neg.polarity, -0.7);
        assert_eq!(neg.confidence, 0.7);

        let neutral = polarity_from_label("neutral", 0.99).unwrap();
        assert_eq!(neutral.polarity, 0.0);
    }

    #[test]
    fn unknown_label_is_unavailable() {
        assert!(polarity_from_label("LABEL_2", 0.5).is_err());
    }

    #[test]
    fn response_shapes_deserialize() {
        let single: ScoreResponse =
            serde_json::from_str(r#"{"label":"positive","score":0.8}"#).unwrap();
        assert!(matches!(single, ScoreResponse::Single(ref s) if s.label == "positive"));

        let list: ScoreResponse =
            serde_json::from_str(r#"[{"label":"negative","score":0.6}]"#).unwrap();
        assert!(matches!(list, ScoreResponse::List(ref l) if l.len() == 1));
    }
}
