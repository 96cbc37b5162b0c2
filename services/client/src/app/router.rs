//! services/client/src/app/router.rs
//!
//! Process-lifetime navigation and transient UI state: the active view, the
//! single-use tutor prompt, the focus topic, the selected calendar date, the
//! schedule editor, and the recent-activity log. Nothing here is persisted.

use chrono::{DateTime, Local, NaiveDate};
use std::collections::VecDeque;
use study_sync_core::domain::parse_calendar_date;

/// Maximum entries kept in the recent-activity log.
pub const ACTIVITY_CAPACITY: usize = 5;
/// Topics longer than this many characters are truncated in activity titles.
pub const ACTIVITY_TOPIC_CHARS: usize = 35;
/// Study durations offered for a focus session, in minutes.
pub const FOCUS_MINUTES: [u32; 8] = [15, 30, 45, 60, 90, 120, 150, 180];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum View {
    #[default]
    Dashboard,
    SmartStudy,
    Practice,
    Progress,
    Schedule,
    Profile,
    Tutor,
}

impl View {
    pub const ALL: [View; 7] = [
        View::Dashboard,
        View::SmartStudy,
        View::Practice,
        View::Progress,
        View::Schedule,
        View::Profile,
        View::Tutor,
    ];

    pub fn name(self) -> &'static str {
        match self {
            View::Dashboard => "dashboard",
            View::SmartStudy => "smart-study",
            View::Practice => "practice",
            View::Progress => "progress",
            View::Schedule => "schedule",
            View::Profile => "profile",
            View::Tutor => "tutor",
        }
    }
}

impl std::str::FromStr for View {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        View::ALL
            .into_iter()
            .find(|view| view.name().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| format!("unknown view '{}'", s.trim()))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Activity {
    pub title: String,
    pub time: DateTime<Local>,
}

/// What the schedule editor is doing. It is closed before the write it started settles.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum EditorState {
    #[default]
    Closed,
    Creating,
    Editing { id: String },
}

#[derive(Debug, Default)]
pub struct Router {
    active: View,
    initial_prompt: Option<String>,
    focus_topic: Option<String>,
    selected_date: Option<NaiveDate>,
    editor: EditorState,
    activity: VecDeque<Activity>,
}

impl Router {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn active(&self) -> View {
        self.active
    }

    pub fn navigate(&mut self, view: View) {
        self.active = view;
    }

    /// Queues `prompt` for the tutor and switches to it.
    pub fn launch_session(&mut self, prompt: impl Into<String>) {
        self.initial_prompt = Some(prompt.into());
        self.active = View::Tutor;
    }

    /// Consumes the queued tutor prompt. Returns `None` on every later call.
    pub fn take_initial_prompt(&mut self) -> Option<String> {
        self.initial_prompt.take()
    }

    pub fn set_focus_topic(&mut self, topic: impl Into<String>) {
        let topic = topic.into();
        self.focus_topic = (!topic.trim().is_empty()).then_some(topic);
    }

    pub fn focus_topic(&self) -> Option<&str> {
        self.focus_topic.as_deref()
    }

    /// Logs the focus topic as studied and launches a study plan for it sized to
    /// `minutes`.
    pub fn start_focus_session(&mut self, minutes: u32) -> Result<(), String> {
        let Some(topic) = self.focus_topic.clone() else {
            return Err("Set a focus topic first: focus <topic>".to_string());
        };
        if !FOCUS_MINUTES.contains(&minutes) {
            return Err(format!(
                "Focus time must be one of {} minutes",
                FOCUS_MINUTES.map(|m| m.to_string()).join(", ")
            ));
        }
        let topic = topic.trim();
        self.add_activity(topic);
        self.launch_session(format!(
            "Create a focused study plan for the topic: {} based on a duration of {} minutes. \
             Provide a step-by-step micro-learning schedule that fits within the selected study time.",
            topic, minutes
        ));
        Ok(())
    }

    /// Logs `topic` as studied and launches a plain explanation of it.
    pub fn explain_topic(&mut self, topic: &str) {
        let topic = topic.trim();
        self.add_activity(topic);
        self.launch_session(format!("Explain the topic: \"{}\" in a clear, concise way for a student.", topic));
    }

    pub fn select_date(&mut self, date: NaiveDate) {
        self.selected_date = Some(date);
    }

    pub fn selected_date(&self) -> Option<NaiveDate> {
        self.selected_date
    }

    /// Follows a reminder for `date` (`YYYY-MM-DD`) to the schedule view.
    pub fn open_notification(&mut self, date: &str) -> Result<NaiveDate, String> {
        let date = parse_calendar_date(date).ok_or_else(|| format!("'{}' is not a valid date", date))?;
        self.selected_date = Some(date);
        self.active = View::Schedule;
        Ok(date)
    }

    pub fn editor(&self) -> &EditorState {
        &self.editor
    }

    pub fn set_editor(&mut self, editor: EditorState) {
        self.editor = editor;
    }

    /// Records that `topic` was studied, newest first, dropping the oldest entry
    /// beyond capacity.
    pub fn add_activity(&mut self, topic: &str) {
        self.activity.push_front(Activity { title: activity_title(topic), time: Local::now() });
        self.activity.truncate(ACTIVITY_CAPACITY);
    }

    pub fn activity(&self) -> impl Iterator<Item = &Activity> {
        self.activity.iter()
    }
}

fn activity_title(topic: &str) -> String {
    match topic.char_indices().nth(ACTIVITY_TOPIC_CHARS) {
        Some((cut, _)) => format!("Studied: {}...", &topic[..cut]),
        None => format!("Studied: {}", topic),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn activity_log_keeps_the_five_most_recent() {
        let mut router = Router::new();
        for i in 1..=6 {
            router.add_activity(&format!("topic {}", i));
        }
        let titles: Vec<&str> = router.activity().map(|a| a.title.as_str()).collect();
        assert_eq!(
            titles,
            vec!["Studied: topic 6", "Studied: topic 5", "Studied: topic 4", "Studied: topic 3", "Studied: topic 2"]
        );
    }

    #[test]
    fn long_topics_are_truncated_on_char_boundaries() {
        assert_eq!(activity_title(&"a".repeat(35)), format!("Studied: {}", "a".repeat(35)));
        assert_eq!(activity_title(&"a".repeat(36)), format!("Studied: {}...", "a".repeat(35)));

        let topic = "é".repeat(40);
        assert_eq!(activity_title(&topic), format!("Studied: {}...", "é".repeat(35)));
        let emoji = "📚".repeat(36);
        assert_eq!(activity_title(&emoji), format!("Studied: {}...", "📚".repeat(35)));
    }

    #[test]
    fn launched_prompt_is_consumed_once() {
        let mut router = Router::new();
        router.launch_session("Explain photosynthesis");
        assert_eq!(router.active(), View::Tutor);
        assert_eq!(router.take_initial_prompt().as_deref(), Some("Explain photosynthesis"));
        assert_eq!(router.take_initial_prompt(), None);
    }

    #[test]
    fn focus_session_logs_the_topic_and_queues_a_plan() {
        let mut router = Router::new();
        assert!(router.start_focus_session(15).is_err());
        assert!(router.take_initial_prompt().is_none());

        router.set_focus_topic("Cellular respiration");
        assert!(router.start_focus_session(20).is_err());
        router.start_focus_session(45).unwrap();

        assert_eq!(router.active(), View::Tutor);
        let prompt = router.take_initial_prompt().unwrap();
        assert!(prompt.starts_with("Create a focused study plan for the topic: Cellular respiration"));
        assert!(prompt.contains("duration of 45 minutes"));
        assert_eq!(router.take_initial_prompt(), None);
        let titles: Vec<&str> = router.activity().map(|a| a.title.as_str()).collect();
        assert_eq!(titles, vec!["Studied: Cellular respiration"]);
    }

    #[test]
    fn explaining_a_topic_logs_it() {
        let mut router = Router::new();
        router.explain_topic("Newton's laws");
        assert_eq!(
            router.take_initial_prompt().as_deref(),
            Some("Explain the topic: \"Newton's laws\" in a clear, concise way for a student.")
        );
        assert_eq!(router.activity().next().map(|a| a.title.as_str()), Some("Studied: Newton's laws"));
    }

    #[test]
    fn notifications_select_the_day_and_open_the_schedule() {
        let mut router = Router::new();
        let date = router.open_notification("2024-11-05").unwrap();
        assert_eq!(date, NaiveDate::from_ymd_opt(2024, 11, 5).unwrap());
        assert_eq!(router.selected_date(), Some(date));
        assert_eq!(router.active(), View::Schedule);

        router.navigate(View::Dashboard);
        assert!(router.open_notification("2024-13-01").is_err());
        assert_eq!(router.active(), View::Dashboard);
    }

    #[test]
    fn views_parse_by_name() {
        assert_eq!("Smart-Study".parse::<View>(), Ok(View::SmartStudy));
        assert!("settings".parse::<View>().is_err());
    }
}
