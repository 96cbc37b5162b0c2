//! crates/study_sync_core/src/schema.rs
//!
//! Typed decoders and encoders between store documents and the canonical domain
//! types. Profile documents have been written in several historical shapes; each
//! shape gets its own record type and they are merged by a fixed precedence into
//! one `UserProfile`. Writes always use the current flat shape.

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

use crate::domain::{
    parse_calendar_date, parse_clock_time, EntryType, Expiry, ProfilePatch, ScheduleDraft,
    ScheduleEntry, Session, StudyGoal, Timestamp, UserProfile, DEFAULT_REGION,
};
use crate::ports::Document;

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum SchemaError {
    #[error("document {id} is missing or has an invalid '{field}'")]
    InvalidField { id: String, field: &'static str },
}

/// Deserializes a field, treating a value of the wrong type as absent.
fn lenient<'de, D, T>(deserializer: D) -> Result<Option<T>, D::Error>
where
    D: Deserializer<'de>,
    T: DeserializeOwned,
{
    let value = Value::deserialize(deserializer)?;
    Ok(serde_json::from_value(value).ok())
}

fn non_blank(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.is_empty())
}

//=========================================================================================
// Persisted Profile Shapes
//=========================================================================================

/// The boolean-flag goal object written by current clients.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GoalFlags {
    #[serde(default, deserialize_with = "truthy_flag")]
    pub improve_understanding: bool,
    #[serde(default, deserialize_with = "truthy_flag")]
    pub stay_consistent: bool,
    #[serde(default, deserialize_with = "truthy_flag")]
    pub learn_in_short_sessions: bool,
}

/// A flag is set by any truthy value: `true`, a non-zero number, a non-empty
/// string, or any array or object.
fn truthy_flag<'de, D: Deserializer<'de>>(deserializer: D) -> Result<bool, D::Error> {
    Ok(match Value::deserialize(deserializer)? {
        Value::Null => false,
        Value::Bool(flag) => flag,
        Value::Number(n) => n.as_f64().is_some_and(|n| n != 0.0),
        Value::String(s) => !s.is_empty(),
        Value::Array(_) | Value::Object(_) => true,
    })
}

impl GoalFlags {
    fn is_set(&self, goal: StudyGoal) -> bool {
        match goal {
            StudyGoal::ImproveUnderstanding => self.improve_understanding,
            StudyGoal::StayConsistent => self.stay_consistent,
            StudyGoal::LearnInShortSessions => self.learn_in_short_sessions,
        }
    }

    /// Labels of the set flags, in the fixed goal order.
    pub fn to_labels(self) -> Vec<String> {
        StudyGoal::ALL
            .into_iter()
            .filter(|goal| self.is_set(*goal))
            .map(|goal| goal.label().to_string())
            .collect()
    }

    /// Flags for a full replacement goal list. Unknown labels have no flag and are dropped.
    pub fn from_labels(labels: &[String]) -> Self {
        let has = |goal: StudyGoal| labels.iter().any(|l| l == goal.label());
        Self {
            improve_understanding: has(StudyGoal::ImproveUnderstanding),
            stay_consistent: has(StudyGoal::StayConsistent),
            learn_in_short_sessions: has(StudyGoal::LearnInShortSessions),
        }
    }
}

/// Root `studyGoals`, dispatched on whether it is an object or a sequence. A
/// sequence is taken as the goal list; its non-string items are dropped.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(untagged)]
enum RootGoals {
    List(Vec<Value>),
    Flags(GoalFlags),
}

/// The flat root-level shape.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RootRecord {
    #[serde(default, deserialize_with = "lenient")]
    display_name: Option<String>,
    #[serde(default, deserialize_with = "lenient")]
    email: Option<String>,
    #[serde(default, deserialize_with = "lenient")]
    region: Option<String>,
    #[serde(default, deserialize_with = "lenient")]
    education_level: Option<String>,
    #[serde(default, deserialize_with = "lenient")]
    primary_subjects: Option<Vec<String>>,
    #[serde(default, deserialize_with = "lenient")]
    study_goals: Option<RootGoals>,
    #[serde(default, deserialize_with = "lenient")]
    profile: Option<NestedRecord>,
}

/// The legacy `profile` object nested under the root.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct NestedRecord {
    #[serde(default, deserialize_with = "lenient")]
    display_name: Option<String>,
    #[serde(default, deserialize_with = "lenient")]
    learning_context: Option<LearningContextRecord>,
    #[serde(default, deserialize_with = "lenient")]
    study_goals: Option<LegacyGoalsRecord>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct LearningContextRecord {
    #[serde(default, deserialize_with = "lenient")]
    education_level: Option<String>,
    #[serde(default, deserialize_with = "lenient")]
    primary_subjects: Option<Vec<String>>,
}

#[derive(Debug, Default, Deserialize)]
struct LegacyGoalsRecord {
    #[serde(default, deserialize_with = "lenient")]
    goals: Option<Vec<String>>,
}

/// Normalizes a stored profile document (or its absence) into the canonical shape.
pub fn decode_profile(document: Option<&Document>, session: &Session) -> UserProfile {
    let root: RootRecord = document
        .and_then(|doc| serde_json::from_value(Value::Object(doc.clone())).ok())
        .unwrap_or_default();
    let nested = root.profile.unwrap_or_default();
    let context = nested.learning_context.unwrap_or_default();

    let goals = match root.study_goals {
        Some(RootGoals::Flags(flags)) => flags.to_labels(),
        Some(RootGoals::List(list)) => list
            .into_iter()
            .filter_map(|item| match item {
                Value::String(label) => Some(label),
                _ => None,
            })
            .collect(),
        None => nested.study_goals.and_then(|g| g.goals).unwrap_or_default(),
    };

    UserProfile {
        display_name: non_blank(root.display_name)
            .or_else(|| non_blank(nested.display_name))
            .or_else(|| non_blank(session.display_name.clone()))
            .unwrap_or_default(),
        email: non_empty(root.email)
            .or_else(|| non_empty(session.email.clone()))
            .unwrap_or_default(),
        region: non_empty(root.region).unwrap_or_else(|| DEFAULT_REGION.to_string()),
        education_level: non_empty(root.education_level)
            .or_else(|| non_empty(context.education_level))
            .unwrap_or_default(),
        subjects: root
            .primary_subjects
            .or(context.primary_subjects)
            .unwrap_or_default(),
        goals,
    }
}

/// The flat shape every profile write uses.
#[derive(Debug, Default, Serialize)]
#[serde(rename_all = "camelCase")]
struct ProfileWrite<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    display_name: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    education_level: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    primary_subjects: Option<&'a [String]>,
    #[serde(skip_serializing_if = "Option::is_none")]
    region: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    email: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    study_goals: Option<GoalFlags>,
}

/// Translates a partial edit into the merge-write payload.
pub fn encode_profile_patch(patch: &ProfilePatch) -> Document {
    let write = ProfileWrite {
        display_name: patch.display_name.as_deref(),
        education_level: patch.education_level.as_deref(),
        primary_subjects: patch.subjects.as_deref(),
        region: patch.region.as_deref(),
        email: patch.email.as_deref(),
        study_goals: patch.goals.as_deref().map(GoalFlags::from_labels),
    };
    to_document(&write)
}

fn to_document<T: Serialize>(value: &T) -> Document {
    match serde_json::to_value(value) {
        Ok(Value::Object(map)) => map,
        _ => Document::new(),
    }
}

//=========================================================================================
// Schedule Documents
//=========================================================================================

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ScheduleRecord {
    #[serde(default, deserialize_with = "lenient")]
    date: Option<String>,
    #[serde(default, deserialize_with = "lenient")]
    title: Option<String>,
    #[serde(default, deserialize_with = "lenient")]
    start_time: Option<String>,
    #[serde(default, deserialize_with = "lenient")]
    end_time: Option<String>,
    #[serde(rename = "type", default, deserialize_with = "lenient")]
    entry_type: Option<EntryType>,
    #[serde(default)]
    created_at: Option<Value>,
    #[serde(default)]
    expires_at: Option<Value>,
}

/// Reads a timestamp-like value in any of the representations the store may hold.
pub fn decode_expiry(value: &Value) -> Option<Expiry> {
    match value {
        Value::Object(_) => serde_json::from_value::<Timestamp>(value.clone())
            .ok()
            .map(Expiry::Timestamp),
        Value::String(text) => Some(Expiry::Text(text.clone())),
        Value::Number(n) => n.as_i64().map(Expiry::Millis),
        _ => None,
    }
}

/// Maps one stored schedule document to an entry.
pub fn decode_schedule_entry(id: &str, document: &Document) -> Result<ScheduleEntry, SchemaError> {
    let invalid = |field| SchemaError::InvalidField { id: id.to_string(), field };
    let record: ScheduleRecord = serde_json::from_value(Value::Object(document.clone()))
        .map_err(|_| invalid("document"))?;

    Ok(ScheduleEntry {
        id: id.to_string(),
        date: record.date.as_deref().and_then(parse_calendar_date).ok_or_else(|| invalid("date"))?,
        title: non_blank(record.title).ok_or_else(|| invalid("title"))?,
        start_time: record
            .start_time
            .as_deref()
            .and_then(parse_clock_time)
            .ok_or_else(|| invalid("startTime"))?,
        end_time: record
            .end_time
            .as_deref()
            .and_then(parse_clock_time)
            .ok_or_else(|| invalid("endTime"))?,
        entry_type: record.entry_type.ok_or_else(|| invalid("type"))?,
        created_at: record.created_at.as_ref().and_then(decode_expiry).and_then(|e| e.resolve()),
        expires_at: record.expires_at.as_ref().and_then(decode_expiry),
    })
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ScheduleWrite<'a> {
    date: String,
    title: &'a str,
    start_time: String,
    end_time: String,
    #[serde(rename = "type")]
    entry_type: EntryType,
    #[serde(skip_serializing_if = "Option::is_none")]
    created_at: Option<Timestamp>,
    expires_at: Timestamp,
}

/// Builds the write payload for a schedule entry. `created_at` is only set for new entries.
pub fn encode_schedule_entry(
    draft: &ScheduleDraft,
    created_at: Option<DateTime<Utc>>,
    expires_at: DateTime<Utc>,
) -> Document {
    let write = ScheduleWrite {
        date: draft.date.format("%Y-%m-%d").to_string(),
        title: &draft.title,
        start_time: draft.start_time.format("%H:%M").to_string(),
        end_time: draft.end_time.format("%H:%M").to_string(),
        entry_type: draft.entry_type,
        created_at: created_at.map(Timestamp::from_datetime),
        expires_at: Timestamp::from_datetime(expires_at),
    };
    to_document(&write)
}
