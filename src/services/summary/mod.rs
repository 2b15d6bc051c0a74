use std::sync::Arc;

use tracing::{error, info, warn};

use crate::error::ApiError;
use crate::models::{ReviewSummary, SentimentLabel};
use crate::services::inference::{SentimentClassifier, Summarizer};
use crate::services::store::ReviewStore;
use crate::utils::{round_to, truncate_chars};

pub const EMPTY_BUCKET_SUMMARY: &str = "No reviews available.";
pub const FAILED_SUMMARY: &str = "Summary unavailable due to processing error.";

pub struct ReviewSummaryService {
    reviews: Arc<dyn ReviewStore>,
    classifier: Arc<dyn SentimentClassifier>,
    summarizer: Arc<dyn Summarizer>,
    max_input_chars: usize,
}

impl ReviewSummaryService {
    pub fn new(
        reviews: Arc<dyn ReviewStore>,
        classifier: Arc<dyn SentimentClassifier>,
        summarizer: Arc<dyn Summarizer>,
        max_input_chars: usize,
    ) -> Self {
        Self {
            reviews,
            classifier,
            summarizer,
            max_input_chars,
        }
    }

    pub async fn summarize(&self, accommodation_id: i64) -> Result<ReviewSummary, ApiError> {
        let reviews = match self.reviews.fetch_reviews(accommodation_id).await {
            Ok(reviews) => reviews,
            Err(e) => {
                error!("Error fetching reviews for accommodation {}: {}", accommodation_id, e);
                Vec::new()
            }
        };
        if reviews.is_empty() {
            return Err(ApiError::not_found(format!(
                "No valid reviews found for accommodation ID {}",
                accommodation_id
            )));
        }
        info!("Summarizing {} reviews for accommodation {}", reviews.len(), accommodation_id);

        let sentiments = self.classify_all(&reviews).await;
        let positive = bucket(&reviews, &sentiments, SentimentLabel::Positive);
        let negative = bucket(&reviews, &sentiments, SentimentLabel::Negative);

        let total = reviews.len();
        let percentage = |count: usize| round_to(count as f64 / total as f64 * 100.0, 2);

        Ok(ReviewSummary {
            accommodation_id,
            total_reviews: total,
            positive_percentage: percentage(positive.len()),
            negative_percentage: percentage(negative.len()),
            positive_summary: self.summarize_bucket(&positive).await,
            negative_summary: self.summarize_bucket(&negative).await,
        })
    }

    async fn classify_all(&self, reviews: &[String]) -> Vec<SentimentLabel> {
        let mut sentiments = Vec::with_capacity(reviews.len());
        for review in reviews {
            let label = match self.classifier.classify(review).await {
                Ok(label) => label,
                Err(e) => {
                    warn!(
                        "Error analyzing sentiment for review {:?}: {}",
                        truncate_chars(review, 50),
                        e
                    );
                    SentimentLabel::Neutral
                }
            };
            sentiments.push(label);
        }
        sentiments
    }

    async fn summarize_bucket(&self, reviews: &[&str]) -> String {
        if reviews.is_empty() {
            return EMPTY_BUCKET_SUMMARY.to_string();
        }

        let joined = reviews.join(" ");
        let text = truncate_chars(&joined, self.max_input_chars);
        match self.summarizer.summarize(text).await {
            Ok(summary) => summary,
            Err(e) => {
                error!("Error summarizing reviews: {}", e);
                FAILED_SUMMARY.to_string()
            }
        }
    }
}

fn bucket<'a>(reviews: &'a [String], sentiments: &[SentimentLabel], wanted: SentimentLabel) -> Vec<&'a str> {
    reviews
        .iter()
        .zip(sentiments)
        .filter(|(_, s)| **s == wanted)
        .map(|(r, _)| r.as_str())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::store::InMemoryStore;
    use anyhow::{anyhow, Result};
    use async_trait::async_trait;
    use std::sync::Mutex;

    struct KeywordClassifier;

    #[async_trait]
    impl SentimentClassifier for KeywordClassifier {
        async fn classify(&self, text: &str) -> Result<SentimentLabel> {
            if text.contains("boom") {
                Err(anyhow!("classifier unavailable"))
            } else if text.contains("bad") {
                Ok(SentimentLabel::Negative)
            } else {
                Ok(SentimentLabel::Positive)
            }
        }
    }

    #[derive(Default)]
    struct RecordingSummarizer {
        inputs: Mutex<Vec<String>>,
        fail: bool,
    }

    #[async_trait]
    impl Summarizer for RecordingSummarizer {
        async fn summarize(&self, text: &str) -> Result<String> {
            self.inputs.lock().unwrap().push(text.to_string());
            if self.fail {
                Err(anyhow!("summarizer down"))
            } else {
                Ok(format!("summary of {} chars", text.chars().count()))
            }
        }
    }

    fn service(store: InMemoryStore, summarizer: Arc<RecordingSummarizer>, max_chars: usize) -> ReviewSummaryService {
        ReviewSummaryService::new(Arc::new(store), Arc::new(KeywordClassifier), summarizer, max_chars)
    }

    #[tokio::test]
    async fn test_summary_percentages_and_buckets() {
        let store = InMemoryStore::new().with_reviews(5, &["great view", "bad bed", "boom", "lovely"]);
        let summarizer = Arc::new(RecordingSummarizer::default());
        let summary = service(store, summarizer.clone(), 1024).summarize(5).await.unwrap();

        assert_eq!(summary.total_reviews, 4);
        assert_eq!(summary.positive_percentage, 50.0);
        assert_eq!(summary.negative_percentage, 25.0);
        assert!(summary.positive_percentage + summary.negative_percentage <= 100.0);

        let inputs = summarizer.inputs.lock().unwrap();
        assert_eq!(inputs.as_slice(), &["great view lovely".to_string(), "bad bed".to_string()]);
    }

    #[tokio::test]
    async fn test_empty_bucket_and_truncation() {
        let store = InMemoryStore::new().with_reviews(6, &["amazing staff", "amazing pool"]);
        let summarizer = Arc::new(RecordingSummarizer::default());
        let summary = service(store, summarizer.clone(), 10).summarize(6).await.unwrap();

        assert_eq!(summary.negative_summary, EMPTY_BUCKET_SUMMARY);
        assert_eq!(summary.negative_percentage, 0.0);
        assert_eq!(summary.positive_summary, "summary of 10 chars");
        assert_eq!(summarizer.inputs.lock().unwrap()[0], "amazing st");
    }

    #[tokio::test]
    async fn test_summarizer_failure_is_reported_in_text() {
        let store = InMemoryStore::new().with_reviews(7, &["nice"]);
        let summarizer = Arc::new(RecordingSummarizer {
            fail: true,
            ..Default::default()
        });
        let summary = service(store, summarizer, 1024).summarize(7).await.unwrap();
        assert_eq!(summary.positive_summary, FAILED_SUMMARY);
        assert_eq!(summary.positive_percentage, 100.0);
    }

    #[tokio::test]
    async fn test_no_reviews_is_not_found() {
        let summarizer = Arc::new(RecordingSummarizer::default());
        let err = service(InMemoryStore::new(), summarizer, 1024)
            .summarize(8)
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "No valid reviews found for accommodation ID 8");
    }

    #[test]
    fn test_thirds_round_to_two_decimals() {
        assert_eq!(round_to(1.0 / 3.0 * 100.0, 2), 33.33);
    }
}
