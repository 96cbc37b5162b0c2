//! crates/study_sync_core/src/domain.rs
//!
//! Defines the pure, core data structures for the study client.
//! These structs are independent of any store, transport or wire format.

use bytes::Bytes;
use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, Utc};
use serde::{Deserialize, Serialize};

/// Region used when the persisted profile carries none.
pub const DEFAULT_REGION: &str = "English (US)";

//=========================================================================================
// Session
//=========================================================================================

/// The authenticated identity of the current user for this running client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Session {
    pub id: String,
    pub display_name: Option<String>,
    pub email: Option<String>,
}

//=========================================================================================
// User Profile
//=========================================================================================

/// The canonical, normalized profile held in memory.
///
/// `subjects` and `goals` are sets represented as sequences; duplicates are
/// kept out by the callers that build them.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UserProfile {
    pub display_name: String,
    pub email: String,
    pub region: String,
    pub education_level: String,
    pub subjects: Vec<String>,
    pub goals: Vec<String>,
}

/// A partial profile edit. `None` fields are left untouched locally and remotely.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProfilePatch {
    pub display_name: Option<String>,
    pub email: Option<String>,
    pub region: Option<String>,
    pub education_level: Option<String>,
    pub subjects: Option<Vec<String>>,
    /// Full replacement of the goal set.
    pub goals: Option<Vec<String>>,
}

impl ProfilePatch {
    pub fn display_name(value: impl Into<String>) -> Self {
        Self { display_name: Some(value.into()), ..Self::default() }
    }

    pub fn email(value: impl Into<String>) -> Self {
        Self { email: Some(value.into()), ..Self::default() }
    }

    pub fn region(value: impl Into<String>) -> Self {
        Self { region: Some(value.into()), ..Self::default() }
    }

    pub fn education_level(value: impl Into<String>) -> Self {
        Self { education_level: Some(value.into()), ..Self::default() }
    }

    pub fn subjects(value: Vec<String>) -> Self {
        Self { subjects: Some(value), ..Self::default() }
    }

    pub fn goals(value: Vec<String>) -> Self {
        Self { goals: Some(value), ..Self::default() }
    }

    pub fn is_empty(&self) -> bool {
        self == &Self::default()
    }

    /// Applies the present fields onto `profile`.
    pub fn apply_to(&self, profile: &mut UserProfile) {
        if let Some(v) = &self.display_name {
            profile.display_name = v.clone();
        }
        if let Some(v) = &self.email {
            profile.email = v.clone();
        }
        if let Some(v) = &self.region {
            profile.region = v.clone();
        }
        if let Some(v) = &self.education_level {
            profile.education_level = v.clone();
        }
        if let Some(v) = &self.subjects {
            profile.subjects = v.clone();
        }
        if let Some(v) = &self.goals {
            profile.goals = v.clone();
        }
    }
}

/// The three study goals the profile screen offers, in their fixed display order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StudyGoal {
    ImproveUnderstanding,
    StayConsistent,
    LearnInShortSessions,
}

impl StudyGoal {
    pub const ALL: [StudyGoal; 3] = [
        StudyGoal::ImproveUnderstanding,
        StudyGoal::StayConsistent,
        StudyGoal::LearnInShortSessions,
    ];

    pub fn label(self) -> &'static str {
        match self {
            StudyGoal::ImproveUnderstanding => "Improve understanding",
            StudyGoal::StayConsistent => "Stay consistent",
            StudyGoal::LearnInShortSessions => "Learn in short sessions",
        }
    }

    pub fn from_label(label: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|goal| goal.label().eq_ignore_ascii_case(label.trim()))
    }
}

//=========================================================================================
// Schedule
//=========================================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntryType {
    Reading,
    Practice,
    Assignment,
    Lecture,
}

impl std::str::FromStr for EntryType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "reading" => Ok(EntryType::Reading),
            "practice" => Ok(EntryType::Practice),
            "assignment" => Ok(EntryType::Assignment),
            "lecture" => Ok(EntryType::Lecture),
            other => Err(format!("unknown schedule type '{}'", other)),
        }
    }
}

/// A store-native point in time, as the document store writes it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Timestamp {
    pub seconds: i64,
    pub nanoseconds: u32,
}

impl Timestamp {
    pub fn from_datetime(at: DateTime<Utc>) -> Self {
        Self { seconds: at.timestamp(), nanoseconds: at.timestamp_subsec_nanos() }
    }

    pub fn to_datetime(self) -> Option<DateTime<Utc>> {
        DateTime::from_timestamp(self.seconds, self.nanoseconds)
    }
}

/// An expiry value as read from the store, before it is resolved to a point in time.
#[derive(Debug, Clone, PartialEq)]
pub enum Expiry {
    /// Store-native timestamp.
    Timestamp(Timestamp),
    /// Epoch milliseconds.
    Millis(i64),
    /// A date or date-time string that has to be constructed into a point in time.
    Text(String),
}

impl Expiry {
    /// Resolves the expiry to a concrete instant, or `None` when it cannot be interpreted.
    pub fn resolve(&self) -> Option<DateTime<Utc>> {
        match self {
            Expiry::Timestamp(ts) => ts.to_datetime(),
            Expiry::Millis(ms) => DateTime::from_timestamp_millis(*ms),
            Expiry::Text(text) => resolve_text_instant(text),
        }
    }
}

fn resolve_text_instant(text: &str) -> Option<DateTime<Utc>> {
    let text = text.trim();
    if let Ok(at) = DateTime::parse_from_rfc3339(text) {
        return Some(at.with_timezone(&Utc));
    }
    // Date-only strings are read as midnight UTC.
    if let Ok(date) = NaiveDate::parse_from_str(text, "%Y-%m-%d") {
        return Some(date.and_time(NaiveTime::MIN).and_utc());
    }
    // Date-time strings without an offset are local time.
    ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%dT%H:%M"]
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(text, fmt).ok())
        .and_then(|naive| naive.and_local_timezone(chrono::Local).earliest())
        .map(|at| at.with_timezone(&Utc))
}

/// A single entry of the user's study schedule.
#[derive(Debug, Clone, PartialEq)]
pub struct ScheduleEntry {
    pub id: String,
    pub date: NaiveDate,
    pub title: String,
    pub start_time: NaiveTime,
    pub end_time: NaiveTime,
    pub entry_type: EntryType,
    pub created_at: Option<DateTime<Utc>>,
    pub expires_at: Option<Expiry>,
}

impl ScheduleEntry {
    /// An entry is live iff its expiry is absent, unresolvable, or strictly after `now`.
    pub fn is_live(&self, now: DateTime<Utc>) -> bool {
        match self.expires_at.as_ref().and_then(Expiry::resolve) {
            Some(expiry) => expiry > now,
            None => true,
        }
    }

    /// The local wall-clock moment the entry starts.
    pub fn starts_at(&self) -> NaiveDateTime {
        self.date.and_time(self.start_time)
    }
}

/// The editor's view of an entry, before it is written.
#[derive(Debug, Clone, PartialEq)]
pub struct ScheduleDraft {
    /// Present when editing an existing entry.
    pub id: Option<String>,
    pub date: NaiveDate,
    pub title: String,
    pub start_time: NaiveTime,
    pub end_time: NaiveTime,
    pub entry_type: EntryType,
}

/// Parses a `YYYY-MM-DD` calendar date from its discrete year, month and day parts.
pub fn parse_calendar_date(text: &str) -> Option<NaiveDate> {
    let mut parts = text.trim().splitn(3, '-');
    let year = parts.next()?.parse::<i32>().ok()?;
    let month = parts.next()?.parse::<u32>().ok()?;
    let day = parts.next()?.parse::<u32>().ok()?;
    NaiveDate::from_ymd_opt(year, month, day)
}

/// Parses an `HH:MM` (or `HH:MM:SS`) wall-clock time.
pub fn parse_clock_time(text: &str) -> Option<NaiveTime> {
    let text = text.trim();
    NaiveTime::parse_from_str(text, "%H:%M")
        .or_else(|_| NaiveTime::parse_from_str(text, "%H:%M:%S"))
        .ok()
}

//=========================================================================================
// Generative services
//=========================================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatRole {
    User,
    Model,
}

/// A file attached to a chat turn or used as a video source.
#[derive(Debug, Clone, PartialEq)]
pub struct Attachment {
    pub name: String,
    pub mime_type: String,
    pub data: Bytes,
}

/// A single role-tagged turn of a tutor conversation.
#[derive(Debug, Clone, PartialEq)]
pub struct ChatTurn {
    pub role: ChatRole,
    pub text: String,
    pub attachment: Option<Attachment>,
}

impl ChatTurn {
    pub fn model(text: impl Into<String>) -> Self {
        Self { role: ChatRole::Model, text: text.into(), attachment: None }
    }

    /// Builds a user turn. Plain-text attachments are folded into the message text;
    /// anything else travels inline.
    pub fn user(text: impl Into<String>, attachment: Option<Attachment>) -> Self {
        let text = text.into();
        match attachment {
            Some(file) if file.mime_type == "text/plain" => {
                let content = String::from_utf8_lossy(&file.data);
                Self {
                    role: ChatRole::User,
                    text: format!("{}\n\n[File Content of {}]:\n{}", text, file.name, content),
                    attachment: None,
                }
            }
            attachment => Self { role: ChatRole::User, text, attachment },
        }
    }
}

/// Everything the chat service needs to produce the next model turn.
#[derive(Debug, Clone)]
pub struct ChatRequest {
    pub system_instruction: String,
    pub history: Vec<ChatTurn>,
    pub message: ChatTurn,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AspectRatio {
    #[default]
    Landscape,
    Portrait,
}

impl AspectRatio {
    pub fn as_str(self) -> &'static str {
        match self {
            AspectRatio::Landscape => "16:9",
            AspectRatio::Portrait => "9:16",
        }
    }
}

impl std::str::FromStr for AspectRatio {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "16:9" => Ok(AspectRatio::Landscape),
            "9:16" => Ok(AspectRatio::Portrait),
            other => Err(format!("unsupported aspect ratio '{}'", other)),
        }
    }
}

#[derive(Debug, Clone)]
pub struct VideoRequest {
    pub image: Attachment,
    pub prompt: Option<String>,
    pub aspect_ratio: AspectRatio,
}

/// Opaque handle of a long-running generation operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OperationHandle(pub String);

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OperationStatus {
    Running,
    Succeeded(String),
    Failed(String),
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn calendar_dates_parse_by_components() {
        assert_eq!(parse_calendar_date("2024-03-09"), NaiveDate::from_ymd_opt(2024, 3, 9));
        assert_eq!(parse_calendar_date("2024-3-9"), NaiveDate::from_ymd_opt(2024, 3, 9));
        assert_eq!(parse_calendar_date("2024-02-30"), None);
        assert_eq!(parse_calendar_date("tomorrow"), None);
    }

    #[test]
    fn expiry_resolves_every_representation() {
        let at = Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap();
        assert_eq!(Expiry::Timestamp(Timestamp::from_datetime(at)).resolve(), Some(at));
        assert_eq!(Expiry::Millis(at.timestamp_millis()).resolve(), Some(at));
        assert_eq!(Expiry::Text("2024-05-01T12:00:00Z".into()).resolve(), Some(at));
        assert_eq!(
            Expiry::Text("2024-05-01".into()).resolve(),
            Some(Utc.with_ymd_and_hms(2024, 5, 1, 0, 0, 0).unwrap())
        );
        assert_eq!(Expiry::Text("not a date".into()).resolve(), None);
    }

    #[test]
    fn unresolvable_or_absent_expiry_is_live() {
        let now = Utc::now();
        let mut entry = ScheduleEntry {
            id: "a".into(),
            date: now.date_naive(),
            title: "Read".into(),
            start_time: NaiveTime::from_hms_opt(9, 0, 0).unwrap(),
            end_time: NaiveTime::from_hms_opt(10, 0, 0).unwrap(),
            entry_type: EntryType::Reading,
            created_at: None,
            expires_at: None,
        };
        assert!(entry.is_live(now));
        entry.expires_at = Some(Expiry::Text("garbage".into()));
        assert!(entry.is_live(now));
        entry.expires_at = Some(Expiry::Timestamp(Timestamp::from_datetime(now)));
        assert!(!entry.is_live(now));
    }

    #[test]
    fn plain_text_attachments_fold_into_the_message() {
        let file = Attachment {
            name: "notes.txt".into(),
            mime_type: "text/plain".into(),
            data: Bytes::from_static(b"mitochondria"),
        };
        let turn = ChatTurn::user("Summarize", Some(file));
        assert_eq!(turn.text, "Summarize\n\n[File Content of notes.txt]:\nmitochondria");
        assert!(turn.attachment.is_none());
    }

    #[test]
    fn patches_only_touch_present_fields() {
        let mut profile = UserProfile { region: "French".into(), ..UserProfile::default() };
        ProfilePatch::display_name("Ada").apply_to(&mut profile);
        assert_eq!(profile.display_name, "Ada");
        assert_eq!(profile.region, "French");
        assert!(ProfilePatch::default().is_empty());
    }
}
