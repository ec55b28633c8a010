//! Message classification and media URL resolution.

use super::{BotTransport, InboundPayload};
use crate::model::{MessageKind, TenantId};

/// Raw content extracted from an inbound payload: either literal text or
/// a platform file reference that still needs URL resolution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RawContent {
    Text(String),
    FileRef(String),
}

/// Classify an inbound payload. Unrecognized shapes default to text.
pub fn classify(payload: &InboundPayload) -> (MessageKind, RawContent) {
    match payload {
        InboundPayload::Text(text) => (MessageKind::Text, RawContent::Text(text.clone())),
        InboundPayload::Photo { file_id } => {
            (MessageKind::Image, RawContent::FileRef(file_id.clone()))
        }
        InboundPayload::Document { file_id } => {
            (MessageKind::File, RawContent::FileRef(file_id.clone()))
        }
        InboundPayload::Voice { file_id } => {
            (MessageKind::Audio, RawContent::FileRef(file_id.clone()))
        }
        InboundPayload::Unsupported => (MessageKind::Text, RawContent::Text(String::new())),
    }
}

/// Turn raw content into storable message content.
///
/// File references go through the transport's file API with one retry; if
/// both attempts fail the content degrades to a kind-labeled placeholder.
/// The message is always recorded, never dropped.
pub async fn resolve_content(
    transport: &dyn BotTransport,
    tenant_id: TenantId,
    kind: MessageKind,
    raw: RawContent,
) -> String {
    match raw {
        RawContent::Text(text) => text,
        RawContent::FileRef(file_id) => {
            match transport.resolve_file_url(tenant_id, &file_id).await {
                Ok(url) => url,
                Err(first_err) => {
                    eprintln!(
                        "[classifier] File resolution failed for {}: {}; retrying",
                        file_id, first_err
                    );
                    match transport.resolve_file_url(tenant_id, &file_id).await {
                        Ok(url) => url,
                        Err(e) => {
                            eprintln!(
                                "[classifier] File resolution retry failed for {}: {}",
                                file_id, e
                            );
                            kind.placeholder().to_string()
                        }
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify_text() {
        let (kind, raw) = classify(&InboundPayload::Text("Hola".to_string()));
        assert_eq!(kind, MessageKind::Text);
        assert_eq!(raw, RawContent::Text("Hola".to_string()));
    }

    #[test]
    fn test_classify_media_kinds() {
        let (kind, raw) = classify(&InboundPayload::Photo {
            file_id: "f1".to_string(),
        });
        assert_eq!(kind, MessageKind::Image);
        assert_eq!(raw, RawContent::FileRef("f1".to_string()));

        let (kind, _) = classify(&InboundPayload::Document {
            file_id: "f2".to_string(),
        });
        assert_eq!(kind, MessageKind::File);

        let (kind, _) = classify(&InboundPayload::Voice {
            file_id: "f3".to_string(),
        });
        assert_eq!(kind, MessageKind::Audio);
    }

    #[test]
    fn test_unrecognized_defaults_to_text() {
        let (kind, raw) = classify(&InboundPayload::Unsupported);
        assert_eq!(kind, MessageKind::Text);
        assert_eq!(raw, RawContent::Text(String::new()));
    }
}
