// crates/grapevine-publish/src/events.rs
//
// Outbound events. Signing happens upstream; this crate only ever sees
// finalized event objects and needs nothing from them but the id.

use std::path::Path;

use serde_json::Value;
use tokio::io::{AsyncBufReadExt, BufReader};

use grapevine_core::error::GrapevineError;

/// A finalized, signed event ready for publication.
#[derive(Debug, Clone, PartialEq)]
pub struct OutboundEvent {
    id: String,
    body: Value,
}

impl OutboundEvent {
    /// Wrap an event object. Returns `None` unless it carries a string `id`.
    pub fn from_value(body: Value) -> Option<Self> {
        let id = body.get("id")?.as_str()?.to_string();
        Some(Self { id, body })
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    /// The full event object as it goes on the wire.
    pub fn body(&self) -> &Value {
        &self.body
    }
}

/// Read outbound events from a JSON Lines file.
///
/// Blank lines are ignored. Lines that are not JSON, or objects without a
/// string `id`, are skipped with a warning.
pub async fn read_events(path: &Path) -> Result<Vec<OutboundEvent>, GrapevineError> {
    let file = tokio::fs::File::open(path).await.map_err(|e| {
        GrapevineError::Storage(format!("cannot open events file {}: {}", path.display(), e))
    })?;
    let mut lines = BufReader::new(file).lines();
    let mut events = Vec::new();
    let mut line_no = 0usize;

    while let Some(line) = lines.next_line().await? {
        line_no += 1;
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }
        let value: Value = match serde_json::from_str(trimmed) {
            Ok(v) => v,
            Err(e) => {
                tracing::warn!("{}:{}: skipping unparsable event: {}", path.display(), line_no, e);
                continue;
            }
        };
        match OutboundEvent::from_value(value) {
            Some(event) => events.push(event),
            None => {
                tracing::warn!("{}:{}: skipping event without an id", path.display(), line_no);
            }
        }
    }

    tracing::debug!("Read {} outbound events from {}", events.len(), path.display());
    Ok(events)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn id_is_required() {
        assert!(OutboundEvent::from_value(json!({"kind": 30382})).is_none());
        assert!(OutboundEvent::from_value(json!({"id": 7})).is_none());
        let event = OutboundEvent::from_value(json!({"id": "ab", "kind": 30382})).unwrap();
        assert_eq!(event.id(), "ab");
        assert_eq!(event.body()["kind"], 30382);
    }

    #[tokio::test]
    async fn reads_jsonl_skipping_bad_lines() {
        let path = std::env::temp_dir().join(format!(
            "grapevine_test_events_{}.jsonl",
            uuid::Uuid::now_v7()
        ));
        let contents = concat!(
            "{\"id\":\"e1\",\"kind\":30382}\n",
            "\n",
            "not json\n",
            "{\"kind\":1}\n",
            "{\"id\":\"e2\",\"kind\":30382}\n",
        );
        tokio::fs::write(&path, contents).await.unwrap();

        let events = read_events(&path).await.unwrap();
        let ids: Vec<&str> = events.iter().map(|e| e.id()).collect();
        assert_eq!(ids, vec!["e1", "e2"]);

        let _ = tokio::fs::remove_file(&path).await;
    }

    #[tokio::test]
    async fn missing_file_is_a_storage_error() {
        let path = std::env::temp_dir().join(format!(
            "grapevine_test_missing_{}.jsonl",
            uuid::Uuid::now_v7()
        ));
        assert!(matches!(
            read_events(&path).await,
            Err(GrapevineError::Storage(_))
        ));
    }
}
