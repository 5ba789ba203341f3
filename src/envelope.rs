//! Wire envelope for stream entries and stable naming (spec §3, §6).

use std::collections::HashMap;

/// The mutation an intent describes (spec §3 "Intent record").
///
/// `Read` is accepted on decode but never produced by the facade; the spec
/// reserves it for diagnostics (§9, open question c) and this crate doesn't
/// act on it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    Create,
    Read,
    Update,
    Delete,
}

impl Operation {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Create => "CREATE",
            Self::Read => "READ",
            Self::Update => "UPDATE",
            Self::Delete => "DELETE",
        }
    }

    /// Absence of the `operation` field is treated as `CREATE`/`UPDATE`
    /// (spec §3); both collapse to `Create` here since the facade only
    /// needs to distinguish "upsert" from "delete" on decode.
    #[must_use]
    pub fn parse(raw: Option<&str>) -> Self {
        match raw {
            Some("READ") => Self::Read,
            Some("UPDATE") => Self::Update,
            Some("DELETE") => Self::Delete,
            _ => Self::Create,
        }
    }
}

/// A decoded stream entry: the field map plus its entry id.
///
/// The "init" bootstrap record (spec §3 Lifecycle, §9 open question b) has
/// no `content` field; [`Intent::is_init_marker`] is how the processor
/// recognizes and skips it.
#[derive(Debug, Clone)]
pub struct Intent {
    pub stream_id: String,
    pub fields: HashMap<String, String>,
}

impl Intent {
    #[must_use]
    pub fn new(stream_id: impl Into<String>, fields: HashMap<String, String>) -> Self {
        Self {
            stream_id: stream_id.into(),
            fields,
        }
    }

    #[must_use]
    pub fn content(&self) -> Option<&str> {
        self.fields.get("content").map(String::as_str)
    }

    #[must_use]
    pub fn operation(&self) -> Operation {
        Operation::parse(self.fields.get("operation").map(String::as_str))
    }

    /// True for the one-off record a consumer appends to bootstrap a
    /// missing stream before creating its group (spec §4.3 step 3).
    #[must_use]
    pub fn is_init_marker(&self) -> bool {
        self.fields.get("content").is_none()
    }

    /// Field map for a `save`, keyed as the wire envelope requires.
    #[must_use]
    pub fn upsert_fields(content: String) -> HashMap<String, String> {
        let mut fields = HashMap::with_capacity(1);
        fields.insert("content".to_string(), content);
        fields
    }

    /// Field map for a `delete`: `content` carries the textual id.
    #[must_use]
    pub fn delete_fields(id: impl std::fmt::Display) -> HashMap<String, String> {
        let mut fields = HashMap::with_capacity(2);
        fields.insert("content".to_string(), id.to_string());
        fields.insert("operation".to_string(), Operation::Delete.as_str().to_string());
        fields
    }

    /// Field map for the stream-bootstrap marker (spec §4.3 step 3).
    #[must_use]
    pub fn init_marker_fields() -> HashMap<String, String> {
        let mut fields = HashMap::with_capacity(1);
        fields.insert("init".to_string(), "true".to_string());
        fields
    }
}

/// A record moved to a dead-letter stream (spec §3 "Dead-letter record").
#[derive(Debug, Clone)]
pub struct DlqRecord {
    pub fields: HashMap<String, String>,
    pub reason: String,
    pub error: String,
    pub stream_key: String,
    pub stream_id: String,
    pub consumer: String,
    pub group: String,
}

impl DlqRecord {
    #[must_use]
    pub fn new(
        original: &Intent,
        reason: impl Into<String>,
        error: impl Into<String>,
        stream_key: impl Into<String>,
        consumer: impl Into<String>,
        group: impl Into<String>,
    ) -> Self {
        Self {
            fields: original.fields.clone(),
            reason: reason.into(),
            error: error.into(),
            stream_key: stream_key.into(),
            stream_id: original.stream_id.clone(),
            consumer: consumer.into(),
            group: group.into(),
        }
    }

    /// Flatten into the field map `XADD` expects, original fields first.
    #[must_use]
    pub fn to_fields(&self) -> Vec<(String, String)> {
        let mut out: Vec<(String, String)> = self.fields.clone().into_iter().collect();
        out.push(("reason".to_string(), self.reason.clone()));
        out.push(("error".to_string(), self.error.clone()));
        out.push(("streamKey".to_string(), self.stream_key.clone()));
        out.push(("streamID".to_string(), self.stream_id.clone()));
        out.push(("consumer".to_string(), self.consumer.clone()));
        out.push(("group".to_string(), self.group.clone()));
        out
    }
}

/// Stable naming derived from an entity/repository type name (spec §3, §6).
pub mod names {
    /// `wb:stream:entity:<lower-type>`.
    #[must_use]
    pub fn entity_stream(entity_type: &str) -> String {
        format!("wb:stream:entity:{}", entity_type.to_lowercase())
    }

    /// Entity stream name with a `:dlq` suffix.
    #[must_use]
    pub fn dlq_stream(entity_type: &str) -> String {
        format!("{}:dlq", entity_stream(entity_type))
    }

    /// `<lower-repo>_group`.
    #[must_use]
    pub fn group(repo_type: &str) -> String {
        format!("{}_group", repo_type.to_lowercase())
    }

    /// `<lower-entity>_<lower-repo>_consumer`.
    #[must_use]
    pub fn consumer(entity_type: &str, repo_type: &str) -> String {
        format!(
            "{}_{}_consumer",
            entity_type.to_lowercase(),
            repo_type.to_lowercase()
        )
    }

    /// `<stream>:<entry-id>` retry counter key.
    #[must_use]
    pub fn retry_counter(stream_key: &str, entry_id: &str) -> String {
        format!("{stream_key}:{entry_id}")
    }

    /// `prefix(E) + ":" + id` cache key (spec §3 "Cache key").
    #[must_use]
    pub fn cache_key(prefix: &str, id: impl std::fmt::Display) -> String {
        format!("{prefix}:{id}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn init_marker_has_no_content() {
        let intent = Intent::new("1-0", Intent::init_marker_fields());
        assert!(intent.is_init_marker());
    }

    #[test]
    fn upsert_has_content_and_defaults_to_create() {
        let intent = Intent::new("1-0", Intent::upsert_fields("{}".to_string()));
        assert!(!intent.is_init_marker());
        assert_eq!(intent.operation(), Operation::Create);
    }

    #[test]
    fn delete_fields_set_operation_and_textual_id() {
        let intent = Intent::new("1-0", Intent::delete_fields(42u64));
        assert_eq!(intent.operation(), Operation::Delete);
        assert_eq!(intent.content(), Some("42"));
    }

    #[test]
    fn naming_matches_stable_scheme() {
        assert_eq!(names::entity_stream("Employer"), "wb:stream:entity:employer");
        assert_eq!(names::dlq_stream("Employer"), "wb:stream:entity:employer:dlq");
        assert_eq!(names::group("EmployerRepository"), "employerrepository_group");
        assert_eq!(
            names::consumer("Employer", "EmployerRepository"),
            "employer_employerrepository_consumer"
        );
        assert_eq!(names::cache_key("employer", 7), "employer:7");
    }
}
