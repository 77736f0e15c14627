//! Messenger trait: the abstraction over the end-user messaging transport.
//!
//! Tool results whose output policy includes the user are rendered into an
//! [`OutboundPayload`] and handed to a [`Messenger`], which knows how to reach
//! a chat target on some platform. The engine never implements a transport
//! itself.

use async_trait::async_trait;
use crate::error::DeliveryError;

/// A message to push to the end user.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutboundPayload {
    Text {
        body: String,
    },
    Image {
        data: Vec<u8>,
        mime_type: String,
        caption: Option<String>,
    },
    Audio {
        data: Vec<u8>,
        mime_type: String,
        /// Send as a push-to-talk voice note
        voice_note: bool,
    },
    Video {
        data: Vec<u8>,
        mime_type: String,
        caption: Option<String>,
    },
    Document {
        data: Vec<u8>,
        mime_type: String,
        filename: String,
        caption: Option<String>,
    },
}

impl OutboundPayload {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Text { .. } => "text",
            Self::Image { .. } => "image",
            Self::Audio { .. } => "audio",
            Self::Video { .. } => "video",
            Self::Document { .. } => "document",
        }
    }

    /// Size of the body in bytes.
    pub fn len(&self) -> usize {
        match self {
            Self::Text { body } => body.len(),
            Self::Image { data, .. }
            | Self::Audio { data, .. }
            | Self::Video { data, .. }
            | Self::Document { data, .. } => data.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// The send side of a messaging platform.
#[async_trait]
pub trait Messenger: Send + Sync {
    /// Human-readable transport name (e.g., "console", "whatsapp").
    fn name(&self) -> &str;

    /// Send a payload to a chat target.
    async fn send(&self, target: &str, payload: OutboundPayload) -> std::result::Result<(), DeliveryError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn payload_kinds() {
        let text = OutboundPayload::Text { body: "hi".into() };
        assert_eq!(text.kind(), "text");
        assert_eq!(text.len(), 2);

        let doc = OutboundPayload::Document {
            data: vec![1, 2, 3],
            mime_type: "application/pdf".into(),
            filename: "document.pdf".into(),
            caption: None,
        };
        assert_eq!(doc.kind(), "document");
        assert_eq!(doc.len(), 3);
    }
}
