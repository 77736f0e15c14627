//! Output routing: decide who sees a tool result and push it to the end
//! user when the descriptor asks for it.

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use switchyard_config::DeliveryConfig;
use switchyard_core::delivery::{Messenger, OutboundPayload};
use switchyard_core::error::DeliveryError;
use switchyard_core::tool::{DeliveryChannel, OutputPolicy, Routing, ToolDescriptor, ToolOutcome};
use tracing::{debug, info, warn};

use crate::substitution::substitute;

/// Whether a result object reports a failure through a truthy `error` field.
pub fn is_error_result(result: &Value) -> bool {
    match result.get("error") {
        None | Some(Value::Null) | Some(Value::Bool(false)) => false,
        Some(Value::String(s)) => !s.is_empty(),
        Some(_) => true,
    }
}

/// Routes results per descriptor policy and delivers to the end user.
#[derive(Clone)]
pub struct OutputRouter {
    messenger: Option<Arc<dyn Messenger>>,
    client: reqwest::Client,
    media_timeout: Duration,
    large_media_timeout: Duration,
}

impl OutputRouter {
    pub fn new(client: reqwest::Client, config: &DeliveryConfig) -> Self {
        Self {
            messenger: None,
            client,
            media_timeout: Duration::from_secs(config.media_timeout_secs),
            large_media_timeout: Duration::from_secs(config.large_media_timeout_secs),
        }
    }

    pub fn with_messenger(mut self, messenger: Arc<dyn Messenger>) -> Self {
        self.messenger = Some(messenger);
        self
    }

    pub fn has_messenger(&self) -> bool {
        self.messenger.is_some()
    }

    /// Route a finished result. Error results always go to the model.
    /// Delivery failures are recorded, never raised.
    pub async fn route(
        &self,
        descriptor: &ToolDescriptor,
        mut result: Value,
        reply_target: Option<&str>,
    ) -> ToolOutcome {
        if is_error_result(&result) {
            return ToolOutcome {
                result,
                routing: Routing {
                    policy: OutputPolicy::Model,
                    failed: true,
                    ..Routing::default()
                },
            };
        }

        let mut routing = Routing {
            policy: descriptor.output,
            channel: descriptor.output.includes_user().then_some(descriptor.channel),
            post_instruction: descriptor.post_instruction.clone(),
            ..Routing::default()
        };

        if descriptor.output.includes_user() {
            match (&self.messenger, reply_target) {
                (Some(messenger), Some(target)) => {
                    match self.deliver(messenger.as_ref(), target, descriptor, &result).await {
                        Ok(()) => {
                            info!(
                                tool = %descriptor.name,
                                channel = %descriptor.channel,
                                messenger = messenger.name(),
                                "Delivered tool result to user"
                            );
                            routing.delivered = true;
                        }
                        Err(e) => {
                            warn!(tool = %descriptor.name, error = %e, "Delivery to user failed");
                            if let Value::Object(map) = &mut result {
                                map.insert("delivery_error".into(), Value::String(e.to_string()));
                            }
                            routing.delivery_error = Some(e.to_string());
                        }
                    }
                }
                _ => debug!(tool = %descriptor.name, "No messenger or reply target; skipping delivery"),
            }
        }

        ToolOutcome { result, routing }
    }

    async fn deliver(
        &self,
        messenger: &dyn Messenger,
        target: &str,
        descriptor: &ToolDescriptor,
        result: &Value,
    ) -> Result<(), DeliveryError> {
        let payload = self.build_payload(descriptor, result).await?;
        messenger.send(target, payload).await
    }

    /// Render a result for the descriptor's channel.
    pub async fn build_payload(
        &self,
        descriptor: &ToolDescriptor,
        result: &Value,
    ) -> Result<OutboundPayload, DeliveryError> {
        let caption = field(result, "caption");
        let mime = |default: &str| field(result, "mime_type").unwrap_or_else(|| default.to_string());

        Ok(match descriptor.channel {
            DeliveryChannel::Text => OutboundPayload::Text {
                body: format_text(result, descriptor.post_instruction.as_deref()),
            },
            DeliveryChannel::Image => OutboundPayload::Image {
                data: self.media_bytes(result, self.media_timeout).await?,
                mime_type: mime("image/jpeg"),
                caption,
            },
            DeliveryChannel::Audio => OutboundPayload::Audio {
                data: self.media_bytes(result, self.media_timeout).await?,
                mime_type: mime("audio/ogg"),
                voice_note: ["voice_note", "ptt"]
                    .iter()
                    .any(|k| result.get(*k).and_then(Value::as_bool).unwrap_or(false)),
            },
            DeliveryChannel::Video => OutboundPayload::Video {
                data: self.media_bytes(result, self.large_media_timeout).await?,
                mime_type: mime("video/mp4"),
                caption,
            },
            DeliveryChannel::Document => OutboundPayload::Document {
                data: self.media_bytes(result, self.large_media_timeout).await?,
                mime_type: mime("application/pdf"),
                filename: field(result, "filename").unwrap_or_else(|| "document.pdf".into()),
                caption,
            },
        })
    }

    /// Media comes from `url`, then `base64`, then `path`.
    async fn media_bytes(&self, result: &Value, timeout: Duration) -> Result<Vec<u8>, DeliveryError> {
        if let Some(url) = result.get("url").and_then(Value::as_str) {
            return self.fetch(url, timeout).await;
        }
        if let Some(encoded) = result.get("base64").and_then(Value::as_str) {
            let encoded = encoded.split_once(";base64,").map_or(encoded, |(_, data)| data);
            return STANDARD
                .decode(encoded.trim())
                .map_err(|e| DeliveryError::InvalidMedia(format!("base64: {e}")));
        }
        if let Some(path) = result.get("path").and_then(Value::as_str) {
            return tokio::fs::read(path)
                .await
                .map_err(|e| DeliveryError::InvalidMedia(format!("{path}: {e}")));
        }
        Err(DeliveryError::NoSource)
    }

    async fn fetch(&self, url: &str, timeout: Duration) -> Result<Vec<u8>, DeliveryError> {
        let fetch_error = |reason: String| DeliveryError::Fetch {
            url: url.to_string(),
            reason,
        };
        let response = self
            .client
            .get(url)
            .timeout(timeout)
            .send()
            .await
            .map_err(|e| fetch_error(e.to_string()))?;
        if !response.status().is_success() {
            return Err(fetch_error(format!("status {}", response.status().as_u16())));
        }
        let bytes = response.bytes().await.map_err(|e| fetch_error(e.to_string()))?;
        Ok(bytes.to_vec())
    }
}

fn field(result: &Value, key: &str) -> Option<String> {
    result.get(key).and_then(Value::as_str).map(str::to_string)
}

/// Text rendering of a result for the user.
///
/// A string result is sent as-is; otherwise a `message` or `text` field;
/// otherwise the post-instruction with the result's fields substituted;
/// otherwise pretty-printed JSON.
pub fn format_text(result: &Value, post_instruction: Option<&str>) -> String {
    if let Value::String(s) = result {
        return s.clone();
    }
    for key in ["message", "text"] {
        match result.get(key) {
            Some(Value::String(s)) => return s.clone(),
            Some(other) if !other.is_null() => return other.to_string(),
            _ => {}
        }
    }
    if let Some(post) = post_instruction.filter(|p| !p.is_empty()) {
        return substitute(post, &Default::default(), result);
    }
    serde_json::to_string_pretty(result).unwrap_or_else(|_| result.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use serde_json::json;
    use std::sync::Mutex;
    use switchyard_core::tool::ToolKind;

    #[derive(Default)]
    struct RecordingMessenger {
        sent: Mutex<Vec<(String, OutboundPayload)>>,
        fail: bool,
    }

    #[async_trait]
    impl Messenger for RecordingMessenger {
        fn name(&self) -> &str {
            "recording"
        }

        async fn send(&self, target: &str, payload: OutboundPayload) -> Result<(), DeliveryError> {
            if self.fail {
                return Err(DeliveryError::Send("transport down".into()));
            }
            self.sent.lock().unwrap().push((target.to_string(), payload));
            Ok(())
        }
    }

    fn router(messenger: Arc<RecordingMessenger>) -> OutputRouter {
        OutputRouter::new(reqwest::Client::new(), &DeliveryConfig::default()).with_messenger(messenger)
    }

    fn user_tool(channel: DeliveryChannel) -> ToolDescriptor {
        ToolDescriptor::new("notify", ToolKind::Code, "").with_output(OutputPolicy::User, channel)
    }

    #[test]
    fn text_formatting_precedence() {
        assert_eq!(format_text(&json!("plain"), None), "plain");
        assert_eq!(format_text(&json!({"message": "hi", "text": "no"}), None), "hi");
        assert_eq!(format_text(&json!({"text": "from text"}), None), "from text");
        assert_eq!(
            format_text(&json!({"temp": 21}), Some("It is {temp} degrees")),
            "It is 21 degrees"
        );
        assert_eq!(format_text(&json!({"a": 1}), None), "{\n  \"a\": 1\n}");
    }

    #[test]
    fn error_field_truthiness() {
        assert!(is_error_result(&json!({"error": "boom"})));
        assert!(!is_error_result(&json!({"error": null})));
        assert!(!is_error_result(&json!({"error": ""})));
        assert!(!is_error_result(&json!({"ok": true})));
    }

    #[tokio::test]
    async fn user_text_delivery() {
        let messenger = Arc::new(RecordingMessenger::default());
        let outcome = router(messenger.clone())
            .route(&user_tool(DeliveryChannel::Text), json!({"message": "done"}), Some("chat-1"))
            .await;
        assert!(outcome.routing.delivered);
        assert_eq!(outcome.routing.channel, Some(DeliveryChannel::Text));
        let sent = messenger.sent.lock().unwrap();
        assert_eq!(sent[0].0, "chat-1");
        assert_eq!(sent[0].1, OutboundPayload::Text { body: "done".into() });
    }

    #[tokio::test]
    async fn image_from_base64_with_defaults() {
        let messenger = Arc::new(RecordingMessenger::default());
        let result = json!({"base64": STANDARD.encode([1u8, 2, 3]), "caption": "look"});
        let outcome = router(messenger.clone())
            .route(&user_tool(DeliveryChannel::Image), result, Some("chat-1"))
            .await;
        assert!(outcome.routing.delivered);
        let sent = messenger.sent.lock().unwrap();
        assert_eq!(
            sent[0].1,
            OutboundPayload::Image {
                data: vec![1, 2, 3],
                mime_type: "image/jpeg".into(),
                caption: Some("look".into()),
            }
        );
    }

    #[tokio::test]
    async fn document_from_path() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("report.pdf");
        std::fs::write(&path, b"%PDF").unwrap();
        let payload = router(Arc::new(RecordingMessenger::default()))
            .build_payload(&user_tool(DeliveryChannel::Document), &json!({"path": path}))
            .await
            .unwrap();
        match payload {
            OutboundPayload::Document { data, mime_type, filename, .. } => {
                assert_eq!(data, b"%PDF");
                assert_eq!(mime_type, "application/pdf");
                assert_eq!(filename, "document.pdf");
            }
            other => panic!("expected document, got {}", other.kind()),
        }
    }

    #[tokio::test]
    async fn missing_media_source_is_annotated_not_raised() {
        let messenger = Arc::new(RecordingMessenger::default());
        let outcome = router(messenger.clone())
            .route(&user_tool(DeliveryChannel::Audio), json!({"title": "song"}), Some("chat-1"))
            .await;
        assert!(!outcome.routing.delivered);
        assert!(!outcome.is_error());
        assert!(outcome.routing.delivery_error.is_some());
        assert!(outcome.result["delivery_error"].as_str().unwrap().contains("No media source"));
    }

    #[tokio::test]
    async fn transport_failure_is_annotated() {
        let messenger = Arc::new(RecordingMessenger {
            fail: true,
            ..Default::default()
        });
        let outcome = router(messenger)
            .route(&user_tool(DeliveryChannel::Text), json!({"text": "x"}), Some("chat-1"))
            .await;
        assert_eq!(
            outcome.routing.delivery_error.as_deref(),
            Some("Messenger rejected payload: transport down")
        );
    }

    #[tokio::test]
    async fn errors_always_route_to_model() {
        let messenger = Arc::new(RecordingMessenger::default());
        let outcome = router(messenger.clone())
            .route(&user_tool(DeliveryChannel::Text), json!({"error": "bad"}), Some("chat-1"))
            .await;
        assert!(outcome.is_error());
        assert_eq!(outcome.routing.policy, OutputPolicy::Model);
        assert!(messenger.sent.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn no_reply_target_skips_delivery() {
        let messenger = Arc::new(RecordingMessenger::default());
        let outcome = router(messenger.clone())
            .route(&user_tool(DeliveryChannel::Text), json!({"text": "x"}), None)
            .await;
        assert!(!outcome.routing.delivered);
        assert!(outcome.routing.delivery_error.is_none());
        assert!(messenger.sent.lock().unwrap().is_empty());
    }
}
