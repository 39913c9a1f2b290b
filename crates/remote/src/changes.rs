//! Change-feed wire format and parser.
//!
//! The platform's realtime service pushes JSON frames of the shape
//! `{"event": "<KIND>", "table": "...", "record": {...}}` over the
//! WebSocket subscription.  This module deserializes them into a
//! strongly-typed [`FeedFrame`] enum and maps row frames to the
//! [`ChangeEvent`]s the engine consumes.

use serde::Deserialize;
use stagex_core::job::Job;
use stagex_core::types::JobId;

/// Table carrying job rows.
pub const TABLE_GENERATIONS: &str = "generations";

/// All known change-feed frame kinds.
///
/// Deserialized via the internally-tagged `"event"` field.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "event")]
pub enum FeedFrame {
    /// A new row was inserted.
    #[serde(rename = "INSERT")]
    Insert { table: String, record: Job },

    /// An existing row changed.
    #[serde(rename = "UPDATE")]
    Update { table: String, record: Job },

    /// A row was deleted.  Only the key survives.
    #[serde(rename = "DELETE")]
    Delete { table: String, old_record: DeletedRow },

    /// Keep-alive frame from the realtime service.
    #[serde(rename = "HEARTBEAT")]
    Heartbeat,
}

/// Remnant of a deleted row.
#[derive(Debug, Clone, Deserialize)]
pub struct DeletedRow {
    pub id: JobId,
}

/// A row-level change on the `generations` table, ready for the
/// reconciler.  The engine consumes `Inserted` and `Updated`; `Deleted`
/// is parsed for completeness and ignored downstream.
#[derive(Debug, Clone)]
pub enum ChangeEvent {
    Inserted(Job),
    Updated(Job),
    Deleted(JobId),
}

/// Parse a change-feed text frame into a typed enum.
///
/// Returns `Err` for malformed JSON or unknown `event` values.
/// Callers should log unknown kinds and continue.
pub fn parse_frame(text: &str) -> Result<FeedFrame, serde_json::Error> {
    serde_json::from_str(text)
}

impl FeedFrame {
    /// Map a frame to the engine-facing event, if it is a job-row
    /// change.  Heartbeats and frames for other tables map to `None`.
    pub fn into_change(self) -> Option<ChangeEvent> {
        match self {
            FeedFrame::Insert { table, record } if table == TABLE_GENERATIONS => {
                Some(ChangeEvent::Inserted(record))
            }
            FeedFrame::Update { table, record } if table == TABLE_GENERATIONS => {
                Some(ChangeEvent::Updated(record))
            }
            FeedFrame::Delete { table, old_record } if table == TABLE_GENERATIONS => {
                Some(ChangeEvent::Deleted(old_record.id))
            }
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use stagex_core::status::JobStatus;

    fn record_json(status: &str) -> String {
        format!(
            r#"{{
                "id": "71b6cbb4-8a3c-4d7a-9c29-9f2f8f0a1c11",
                "user_id": "6f2b9a9e-5a94-4f30-8f6a-2f2b8f0a1c11",
                "original_url": "https://cdn.example/originals/a.png",
                "generated_url": null,
                "status": "{status}",
                "prompt": null,
                "style": "modern",
                "metadata": {{"mode": "staging", "style": "modern"}},
                "created_at": "2026-01-05T09:30:00Z"
            }}"#
        )
    }

    #[test]
    fn parse_insert_frame() {
        let json = format!(
            r#"{{"event":"INSERT","table":"generations","record":{}}}"#,
            record_json("queued")
        );
        let frame = parse_frame(&json).unwrap();
        match frame {
            FeedFrame::Insert { ref table, ref record } => {
                assert_eq!(table, "generations");
                assert_eq!(record.status, JobStatus::Queued);
            }
            other => panic!("Expected Insert, got {other:?}"),
        }
        assert!(matches!(
            frame.into_change(),
            Some(ChangeEvent::Inserted(_))
        ));
    }

    #[test]
    fn parse_update_frame() {
        let json = format!(
            r#"{{"event":"UPDATE","table":"generations","record":{}}}"#,
            record_json("processing")
        );
        let frame = parse_frame(&json).unwrap();
        match frame {
            FeedFrame::Update { ref record, .. } => {
                assert_eq!(record.status, JobStatus::Processing);
            }
            other => panic!("Expected Update, got {other:?}"),
        }
    }

    #[test]
    fn parse_delete_frame() {
        let json = r#"{"event":"DELETE","table":"generations","old_record":{"id":"71b6cbb4-8a3c-4d7a-9c29-9f2f8f0a1c11"}}"#;
        let frame = parse_frame(json).unwrap();
        match frame.into_change() {
            Some(ChangeEvent::Deleted(id)) => {
                assert_eq!(
                    id.to_string(),
                    "71b6cbb4-8a3c-4d7a-9c29-9f2f8f0a1c11"
                );
            }
            other => panic!("Expected Deleted, got {other:?}"),
        }
    }

    #[test]
    fn parse_heartbeat_frame() {
        let frame = parse_frame(r#"{"event":"HEARTBEAT"}"#).unwrap();
        assert!(matches!(frame, FeedFrame::Heartbeat));
        assert!(frame.into_change().is_none());
    }

    #[test]
    fn other_tables_are_ignored() {
        let json = format!(
            r#"{{"event":"UPDATE","table":"profiles","record":{}}}"#,
            record_json("queued")
        );
        let frame = parse_frame(&json).unwrap();
        assert!(frame.into_change().is_none());
    }

    #[test]
    fn parse_unknown_kind_returns_error() {
        assert!(parse_frame(r#"{"event":"TRUNCATE","table":"generations"}"#).is_err());
    }

    #[test]
    fn parse_invalid_json_returns_error() {
        assert!(parse_frame("not json at all").is_err());
    }
}
