//! Text messages received through the signaling stack
//!
//! Messages are forwarded to observers as they arrive; nothing is stored.

use crate::domain::shared::value_objects::CallId;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Message content type
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum MessageContentType {
    /// Plain text message
    TextPlain,
    /// HTML message
    TextHtml,
    /// JSON message
    ApplicationJson,
    /// IM composition indication (RFC 3994)
    IsComposing,
    /// Any other MIME type, kept verbatim
    Custom(String),
}

impl MessageContentType {
    /// Parse a MIME type, ignoring parameters such as `;charset=utf-8`
    pub fn parse(mime: &str) -> Self {
        let essence = mime.split(';').next().unwrap_or_default().trim();
        match essence.to_ascii_lowercase().as_str() {
            "" | "text/plain" => MessageContentType::TextPlain,
            "text/html" => MessageContentType::TextHtml,
            "application/json" => MessageContentType::ApplicationJson,
            "application/im-iscomposing+xml" => MessageContentType::IsComposing,
            _ => MessageContentType::Custom(mime.trim().to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            MessageContentType::TextPlain => "text/plain",
            MessageContentType::TextHtml => "text/html",
            MessageContentType::ApplicationJson => "application/json",
            MessageContentType::IsComposing => "application/im-iscomposing+xml",
            MessageContentType::Custom(s) => s,
        }
    }

    /// Whether the body is meant to be shown to the user
    pub fn is_displayable(&self) -> bool {
        matches!(
            self,
            MessageContentType::TextPlain | MessageContentType::TextHtml
        )
    }
}

impl fmt::Display for MessageContentType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Text message as delivered by the stack
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TextMessage {
    /// Dialog the message arrived in, if any
    pub call_id: Option<CallId>,
    pub from: String,
    pub to: String,
    pub contact: String,
    pub content_type: MessageContentType,
    pub body: String,
}
