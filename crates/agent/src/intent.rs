//! Single-word intent classification with a small, cheap model.

use std::sync::Arc;
use switchyard_core::message::Message;
use switchyard_core::provider::{Provider, ProviderRequest};
use tracing::{debug, warn};

pub const DEFAULT_INTENT_MODEL: &str = "anthropic/claude-3-haiku-20240307";

/// Label returned for anything outside the label set.
pub const OTHER: &str = "other";

pub const DEFAULT_LABELS: &[&str] = &["place_order", "browse_menu", "track_delivery", "talk_to_agent", OTHER];

pub struct IntentClassifier {
    provider: Arc<dyn Provider>,
    model: String,
    labels: Vec<String>,
}

impl IntentClassifier {
    pub fn new(provider: Arc<dyn Provider>) -> Self {
        Self {
            provider,
            model: DEFAULT_INTENT_MODEL.into(),
            labels: DEFAULT_LABELS.iter().map(|l| l.to_string()).collect(),
        }
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    /// Replace the label set. `other` is always kept.
    pub fn with_labels<I, S>(mut self, labels: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.labels = labels.into_iter().map(Into::into).collect();
        if !self.labels.iter().any(|l| l == OTHER) {
            self.labels.push(OTHER.into());
        }
        self
    }

    pub fn labels(&self) -> &[String] {
        &self.labels
    }

    fn instructions(&self) -> String {
        format!(
            "You classify the intent of a user's message. Classify it into exactly one of: {}. \
             Reply with the category name only, in lowercase. \
             If no category clearly fits, reply '{OTHER}'.",
            self.labels.join(", ")
        )
    }

    /// Classify `message`. Model failures and unknown replies yield `other`.
    pub async fn classify(&self, message: &str) -> String {
        let mut request = ProviderRequest::new(
            self.model.clone(),
            vec![Message::system(self.instructions()), Message::user(message)],
        );
        request.temperature = 0.0;
        request.max_tokens = Some(20);
        request.top_p = Some(1.0);

        let reply = match self.provider.complete(request).await {
            Ok(response) => response.message.content,
            Err(e) => {
                warn!(error = %e, "Intent classification failed");
                return OTHER.into();
            }
        };
        let label = self.parse(&reply);
        debug!(reply = %reply.trim(), label = %label, "Intent classified");
        label
    }

    fn parse(&self, reply: &str) -> String {
        let word = reply
            .trim()
            .trim_matches(|c: char| !(c.is_alphanumeric() || c == '_'))
            .to_lowercase();
        if self.labels.contains(&word) {
            word
        } else {
            OTHER.into()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::Mutex;
    use switchyard_core::error::ProviderError;
    use switchyard_core::provider::{ProviderResponse, Usage};

    struct Reply {
        text: Option<String>,
        seen: Mutex<Option<ProviderRequest>>,
    }

    impl Reply {
        fn with(text: Option<&str>) -> Arc<Self> {
            Arc::new(Self {
                text: text.map(str::to_string),
                seen: Mutex::new(None),
            })
        }
    }

    #[async_trait]
    impl Provider for Reply {
        fn name(&self) -> &str {
            "reply"
        }

        async fn complete(&self, request: ProviderRequest) -> Result<ProviderResponse, ProviderError> {
            *self.seen.lock().unwrap() = Some(request);
            let text = self
                .text
                .clone()
                .ok_or_else(|| ProviderError::Network("connection refused".into()))?;
            Ok(ProviderResponse {
                message: Message::assistant(text),
                usage: Usage::default(),
                model: "m".into(),
                finish_reason: None,
                provider_used: "aggregator".into(),
                fallback_error: None,
            })
        }
    }

    #[tokio::test]
    async fn known_label_is_returned() {
        let provider = Reply::with(Some("  Track_Delivery.\n"));
        let classifier = IntentClassifier::new(provider.clone());
        assert_eq!(classifier.classify("where is my pizza?").await, "track_delivery");

        let request = provider.seen.lock().unwrap().clone().unwrap();
        assert_eq!(request.temperature, 0.0);
        assert_eq!(request.max_tokens, Some(20));
        assert!(request.messages[0].content.contains("place_order, browse_menu"));
    }

    #[tokio::test]
    async fn unknown_reply_and_failure_map_to_other() {
        let classifier = IntentClassifier::new(Reply::with(Some("I think they want a refund")));
        assert_eq!(classifier.classify("refund please").await, OTHER);

        let classifier = IntentClassifier::new(Reply::with(None));
        assert_eq!(classifier.classify("hello").await, OTHER);
    }

    #[test]
    fn custom_labels_keep_other() {
        let classifier = IntentClassifier::new(Reply::with(None)).with_labels(["billing", "support"]);
        assert_eq!(classifier.labels(), ["billing", "support", "other"]);
    }
}
