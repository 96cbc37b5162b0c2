//! services/client/src/app/shell.rs
//!
//! A line-oriented front end. Each input line is parsed into a [`Command`] and run
//! against the application; output is written to any `io::Write`. Nothing is shown
//! before the readiness gate opens, and signed-out users only get the auth commands.

use bytes::Bytes;
use chrono::{Local, NaiveDate, Timelike};
use std::io::Write;
use std::path::{Path, PathBuf};
use study_sync_core::domain::{
    parse_calendar_date, parse_clock_time, AspectRatio, Attachment, ScheduleDraft, ScheduleEntry,
    StudyGoal, UserProfile, VideoRequest,
};

use super::account::CredentialPrompt;
use super::router::{EditorState, Router, View, FOCUS_MINUTES};
use super::state::StudyApp;
use super::tutor::{self, TutorSession};
use super::video::VideoJob;

pub const HELP: &str = "\
Account:   signup <email> <password> | signin <email> <password> | signout
           email <new email> | password <new> <confirm>
Profile:   profile | name <name> | region <region> | level <level>
           subjects <a, b, ...> | goal <goal label>
Schedule:  schedule [YYYY-MM-DD] | day <YYYY-MM-DD> | open <YYYY-MM-DD> | upcoming
           add <date> <start> <end> <type> <title>
           edit <id> <date> <start> <end> <type> <title> | delete <id>
Study:     view <name> | focus <topic> | study [minutes] | explain <topic>
           launch <prompt> | activity
           ask [--file <path>] <message>
           video <image path> [16:9|9:16] [prompt]
Other:     help | quit";

#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    SignUp { email: String, password: String },
    SignIn { email: String, password: String },
    SignOut,
    View(View),
    Profile,
    Name(String),
    Region(String),
    Level(String),
    Subjects(Vec<String>),
    Goal(StudyGoal),
    Email(String),
    Password { new_password: String, confirmation: String },
    Schedule(Option<NaiveDate>),
    Add(ScheduleDraft),
    Edit(ScheduleDraft),
    Delete(String),
    Upcoming,
    Day(NaiveDate),
    Open(String),
    Focus(String),
    Study(u32),
    Explain(String),
    Launch(String),
    Ask { text: String, file: Option<PathBuf> },
    Video { image: PathBuf, aspect_ratio: AspectRatio, prompt: Option<String> },
    Activity,
    Help,
    Quit,
}

impl Command {
    fn needs_session(&self) -> bool {
        !matches!(self, Command::SignUp { .. } | Command::SignIn { .. } | Command::Help | Command::Quit)
    }
}

fn usage(form: &str) -> String {
    format!("Usage: {}", form)
}

fn required(rest: &str, form: &str) -> Result<String, String> {
    if rest.is_empty() {
        Err(usage(form))
    } else {
        Ok(rest.to_string())
    }
}

fn date_arg(text: &str) -> Result<NaiveDate, String> {
    parse_calendar_date(text).ok_or_else(|| format!("'{}' is not a valid YYYY-MM-DD date", text))
}

/// Parses `<date> <start> <end> <type> <title...>`.
fn draft_args(id: Option<String>, args: &[&str], form: &str) -> Result<ScheduleDraft, String> {
    let [date, start, end, entry_type, title @ ..] = args else {
        return Err(usage(form));
    };
    if title.is_empty() {
        return Err(usage(form));
    }
    let time = |text: &str| parse_clock_time(text).ok_or_else(|| format!("'{}' is not a valid HH:MM time", text));
    Ok(ScheduleDraft {
        id,
        date: date_arg(date)?,
        title: title.join(" "),
        start_time: time(*start)?,
        end_time: time(*end)?,
        entry_type: entry_type.parse()?,
    })
}

impl std::str::FromStr for Command {
    type Err = String;

    fn from_str(line: &str) -> Result<Self, Self::Err> {
        let line = line.trim();
        let (word, rest) = match line.split_once(char::is_whitespace) {
            Some((word, rest)) => (word, rest.trim()),
            None => (line, ""),
        };
        let args: Vec<&str> = rest.split_whitespace().collect();

        match word.to_ascii_lowercase().as_str() {
            "signup" | "signin" => {
                let [email, password] = args.as_slice() else {
                    return Err(usage(&format!("{} <email> <password>", word)));
                };
                let (email, password) = (email.to_string(), password.to_string());
                Ok(if word.eq_ignore_ascii_case("signup") {
                    Command::SignUp { email, password }
                } else {
                    Command::SignIn { email, password }
                })
            }
            "signout" => Ok(Command::SignOut),
            "view" => Ok(Command::View(required(rest, "view <name>")?.parse()?)),
            "profile" => Ok(Command::Profile),
            "name" => Ok(Command::Name(required(rest, "name <name>")?)),
            "region" => Ok(Command::Region(required(rest, "region <region>")?)),
            "level" => Ok(Command::Level(required(rest, "level <level>")?)),
            "subjects" => Ok(Command::Subjects(
                rest.split(',').map(str::trim).filter(|s| !s.is_empty()).map(str::to_string).collect(),
            )),
            "goal" => {
                let label = required(rest, "goal <goal label>")?;
                StudyGoal::from_label(&label)
                    .map(Command::Goal)
                    .ok_or_else(|| format!("Unknown goal '{}'", label))
            }
            "email" => Ok(Command::Email(required(rest, "email <new email>")?)),
            "password" => {
                let [new_password, confirmation] = args.as_slice() else {
                    return Err(usage("password <new> <confirm>"));
                };
                Ok(Command::Password {
                    new_password: new_password.to_string(),
                    confirmation: confirmation.to_string(),
                })
            }
            "schedule" => match args.as_slice() {
                [] => Ok(Command::Schedule(None)),
                [date] => Ok(Command::Schedule(Some(date_arg(date)?))),
                _ => Err(usage("schedule [YYYY-MM-DD]")),
            },
            "add" => Ok(Command::Add(draft_args(None, &args, "add <date> <start> <end> <type> <title>")?)),
            "edit" => {
                let form = "edit <id> <date> <start> <end> <type> <title>";
                let [id, fields @ ..] = args.as_slice() else {
                    return Err(usage(form));
                };
                Ok(Command::Edit(draft_args(Some(id.to_string()), fields, form)?))
            }
            "delete" => match args.as_slice() {
                [id] => Ok(Command::Delete(id.to_string())),
                _ => Err(usage("delete <id>")),
            },
            "upcoming" => Ok(Command::Upcoming),
            "day" => Ok(Command::Day(date_arg(&required(rest, "day <YYYY-MM-DD>")?)?)),
            "open" => Ok(Command::Open(required(rest, "open <YYYY-MM-DD>")?)),
            "focus" => Ok(Command::Focus(required(rest, "focus <topic>")?)),
            "study" => match args.as_slice() {
                [] => Ok(Command::Study(FOCUS_MINUTES[0])),
                [minutes] => minutes
                    .trim_end_matches('m')
                    .parse()
                    .map(Command::Study)
                    .map_err(|_| format!("'{}' is not a number of minutes", minutes)),
                _ => Err(usage("study [minutes]")),
            },
            "explain" => Ok(Command::Explain(required(rest, "explain <topic>")?)),
            "launch" => Ok(Command::Launch(required(rest, "launch <prompt>")?)),
            "ask" => {
                let form = "ask [--file <path>] <message>";
                match args.as_slice() {
                    ["--file", path, text @ ..] if !text.is_empty() => {
                        Ok(Command::Ask { text: text.join(" "), file: Some(PathBuf::from(*path)) })
                    }
                    ["--file", ..] => Err(usage(form)),
                    _ => Ok(Command::Ask { text: required(rest, form)?, file: None }),
                }
            }
            "video" => {
                let [image, more @ ..] = args.as_slice() else {
                    return Err(usage("video <image path> [16:9|9:16] [prompt]"));
                };
                let (aspect_ratio, prompt) = match more {
                    [ratio, prompt @ ..] if ratio.parse::<AspectRatio>().is_ok() => (ratio.parse()?, prompt),
                    prompt => (AspectRatio::default(), prompt),
                };
                Ok(Command::Video {
                    image: PathBuf::from(*image),
                    aspect_ratio,
                    prompt: (!prompt.is_empty()).then(|| prompt.join(" ")),
                })
            }
            "activity" => Ok(Command::Activity),
            "help" | "?" => Ok(Command::Help),
            "quit" | "exit" => Ok(Command::Quit),
            other => Err(format!("Unknown command '{}'. Type 'help' for a list.", other)),
        }
    }
}

/// Whether the input loop should keep reading.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    Continue,
    Quit,
}

pub struct Shell {
    app: StudyApp,
    router: Router,
    tutor: Option<TutorSession>,
    /// The session the router and tutor state belong to.
    session_id: Option<String>,
}

impl Shell {
    pub fn new(app: StudyApp) -> Self {
        Self { app, router: Router::new(), tutor: None, session_id: None }
    }

    pub fn app(&self) -> &StudyApp {
        &self.app
    }

    pub fn router(&self) -> &Router {
        &self.router
    }

    /// Runs one input line. Command failures are reported on `out`; only write
    /// errors are returned.
    pub async fn handle(
        &mut self,
        line: &str,
        prompt: &dyn CredentialPrompt,
        out: &mut dyn Write,
    ) -> std::io::Result<Flow> {
        if line.trim().is_empty() {
            return Ok(Flow::Continue);
        }
        let command = match line.parse::<Command>() {
            Ok(command) => command,
            Err(message) => {
                writeln!(out, "{}", message)?;
                return Ok(Flow::Continue);
            }
        };
        match command {
            Command::Help => {
                writeln!(out, "{}", HELP)?;
                return Ok(Flow::Continue);
            }
            Command::Quit => return Ok(Flow::Quit),
            _ => {}
        }

        self.app.gate.wait_ready().await;
        self.follow_session().await;
        if command.needs_session() && self.session_id.is_none() {
            writeln!(out, "Please sign in first: signin <email> <password> or signup <email> <password>.")?;
            return Ok(Flow::Continue);
        }
        self.run(command, prompt, out).await?;
        self.follow_session().await;
        Ok(Flow::Continue)
    }

    /// Drops the conversation and navigation state when the signed-in user changes,
    /// including sign-outs the provider makes on its own.
    async fn follow_session(&mut self) {
        let current = self.app.coordinator.current_session().await.map(|session| session.id);
        if current != self.session_id {
            self.router = Router::new();
            self.tutor = None;
            self.session_id = current;
        }
    }

    async fn run(
        &mut self,
        command: Command,
        prompt: &dyn CredentialPrompt,
        out: &mut dyn Write,
    ) -> std::io::Result<()> {
        match command {
            Command::SignUp { email, password } => {
                let result = self.app.account.sign_up(&email, &password).await;
                self.enter_session(result, out).await?;
            }
            Command::SignIn { email, password } => {
                let result = self.app.account.sign_in(&email, &password).await;
                self.enter_session(result, out).await?;
            }
            Command::SignOut => match self.app.account.sign_out().await {
                Ok(()) => {
                    self.app.coordinator.on_session_changed(None).await;
                    writeln!(out, "Signed out.")?;
                }
                Err(e) => writeln!(out, "Error signing out: {}", e)?,
            },
            Command::View(view) => {
                self.router.navigate(view);
                self.render_view(out)?;
            }
            Command::Profile => render_profile(&self.app.profile.current(), out)?,
            Command::Name(name) => match self.app.account.rename(&name).await {
                Ok(true) => writeln!(out, "Name updated.")?,
                Ok(false) => writeln!(out, "Name unchanged.")?,
                Err(e) => writeln!(out, "{}", e)?,
            },
            Command::Region(region) => report(out, self.app.account.set_region(&region).await, "Region updated.")?,
            Command::Level(level) => {
                report(out, self.app.account.set_education_level(&level).await, "Education level updated.")?
            }
            Command::Subjects(subjects) => {
                match self.app.account.set_subjects(subjects.iter().map(String::as_str)).await {
                    Ok(subjects) => writeln!(out, "Subjects: {}", subjects.join(", "))?,
                    Err(e) => writeln!(out, "{}", e)?,
                }
            }
            Command::Goal(goal) => match self.app.account.toggle_goal(goal).await {
                Ok(goals) => writeln!(out, "Goals: {}", goals.join(", "))?,
                Err(e) => writeln!(out, "{}", e)?,
            },
            Command::Email(email) => {
                report(out, self.app.account.change_email(&email, prompt).await, "Email updated.")?
            }
            Command::Password { new_password, confirmation } => report(
                out,
                self.app.account.change_password(&new_password, &confirmation, prompt).await,
                "Password updated. You will be signed out shortly.",
            )?,
            Command::Schedule(date) => {
                let date = date.or(self.router.selected_date()).unwrap_or_else(|| Local::now().date_naive());
                self.router.select_date(date);
                self.router.navigate(View::Schedule);
                self.render_day(date, out)?;
            }
            Command::Add(draft) => {
                self.router.set_editor(EditorState::Creating);
                self.save_entry(draft, out).await?;
            }
            Command::Edit(draft) => {
                let id = draft.id.clone().unwrap_or_default();
                if !self.app.schedule.entries().iter().any(|entry| entry.id == id) {
                    writeln!(out, "No schedule entry with id {}.", id)?;
                    return Ok(());
                }
                self.router.set_editor(EditorState::Editing { id });
                self.save_entry(draft, out).await?;
            }
            Command::Delete(id) => report(out, self.app.schedule.remove(&id).await, "Schedule entry deleted.")?,
            Command::Upcoming => {
                let upcoming = self.app.schedule.upcoming(Local::now());
                writeln!(out, "Upcoming:")?;
                render_entries(&upcoming, out)?;
            }
            Command::Day(date) => {
                self.router.select_date(date);
                self.render_day(date, out)?;
            }
            Command::Open(date) => match self.router.open_notification(&date) {
                Ok(date) => self.render_day(date, out)?,
                Err(message) => writeln!(out, "{}", message)?,
            },
            Command::Focus(topic) => {
                self.router.set_focus_topic(topic.as_str());
                writeln!(out, "Focus topic set to '{}'.", topic.trim())?;
            }
            Command::Study(minutes) => match self.router.start_focus_session(minutes) {
                Ok(()) => self.send_initial_prompt(out).await?,
                Err(message) => writeln!(out, "{}", message)?,
            },
            Command::Explain(topic) => {
                self.router.explain_topic(&topic);
                self.send_initial_prompt(out).await?;
            }
            Command::Launch(prompt_text) => {
                self.router.launch_session(prompt_text);
                self.send_initial_prompt(out).await?;
            }
            Command::Ask { text, file } => {
                let attachment = match file {
                    Some(path) => match load_attachment(&path).await {
                        Ok(attachment) => Some(attachment),
                        Err(message) => {
                            writeln!(out, "{}", message)?;
                            return Ok(());
                        }
                    },
                    None => None,
                };
                self.router.navigate(View::Tutor);
                self.ask(&text, attachment, out).await?;
            }
            Command::Video { image, aspect_ratio, prompt: video_prompt } => {
                self.generate_video(image, aspect_ratio, video_prompt, out).await?;
            }
            Command::Activity => {
                let mut any = false;
                for activity in self.router.activity() {
                    any = true;
                    writeln!(out, "{}  ({})", activity.title, activity.time.format("%H:%M"))?;
                }
                if !any {
                    writeln!(out, "No recent activity.")?;
                }
            }
            Command::Help | Command::Quit => {}
        }
        Ok(())
    }

    async fn enter_session<E: std::fmt::Display>(
        &mut self,
        result: Result<study_sync_core::domain::Session, E>,
        out: &mut dyn Write,
    ) -> std::io::Result<()> {
        match result {
            Ok(session) => {
                self.app.coordinator.on_session_changed(Some(session.clone())).await;
                self.app.gate.wait_ready().await;
                let profile = self.app.profile.current();
                let name = if profile.display_name.is_empty() {
                    session.email.unwrap_or(session.id)
                } else {
                    profile.display_name
                };
                writeln!(out, "Welcome, {}.", name)
            }
            Err(e) => writeln!(out, "{}", e),
        }
    }

    /// Sends the prompt queued by a launch, once.
    async fn send_initial_prompt(&mut self, out: &mut dyn Write) -> std::io::Result<()> {
        match self.router.take_initial_prompt() {
            Some(initial) => self.ask(&initial, None, out).await,
            None => Ok(()),
        }
    }

    /// Closes the editor and selects the entry's day, then writes the entry.
    async fn save_entry(&mut self, draft: ScheduleDraft, out: &mut dyn Write) -> std::io::Result<()> {
        self.router.set_editor(EditorState::Closed);
        self.router.select_date(draft.date);
        match self.app.schedule.upsert(draft).await {
            Ok(id) => writeln!(out, "Saved schedule entry {}.", id),
            Err(e) => writeln!(out, "{}", e),
        }
    }

    async fn ask(
        &mut self,
        text: &str,
        attachment: Option<Attachment>,
        out: &mut dyn Write,
    ) -> std::io::Result<()> {
        let Some(chat) = self.app.state.chat.clone() else {
            writeln!(out, "The tutor is not available: no chat model is configured.")?;
            return Ok(());
        };
        if let Some(topic) = tutor::activity_topic(text) {
            self.router.add_activity(&topic);
        }
        let profile = self.app.profile.current();
        let session = self.tutor.get_or_insert_with(|| TutorSession::new(chat));

        let mut write_error = None;
        let result = session
            .send(text, attachment, &profile, |fragment| {
                if let Err(e) = out.write_all(fragment.as_bytes()).and_then(|()| out.flush()) {
                    write_error.get_or_insert(e);
                }
            })
            .await;
        if let Some(e) = write_error {
            return Err(e);
        }
        match result {
            Ok(_) => writeln!(out),
            Err(_) => writeln!(out, "\n{}", tutor::APOLOGY),
        }
    }

    async fn generate_video(
        &mut self,
        image: PathBuf,
        aspect_ratio: AspectRatio,
        prompt: Option<String>,
        out: &mut dyn Write,
    ) -> std::io::Result<()> {
        let Some(service) = self.app.state.video.clone() else {
            writeln!(out, "Video generation is not available: no video model is configured.")?;
            return Ok(());
        };
        let image = match load_attachment(&image).await {
            Ok(image) if image.mime_type.starts_with("image/") => image,
            Ok(other) => {
                writeln!(out, "{} is not an image.", other.name)?;
                return Ok(());
            }
            Err(message) => {
                writeln!(out, "{}", message)?;
                return Ok(());
            }
        };

        let config = &self.app.state.config;
        let job = VideoJob::new(service, config.video_poll_interval, config.video_max_polls);
        writeln!(out, "Generating video; this can take a few minutes...")?;
        out.flush()?;
        match job.run(VideoRequest { image, prompt, aspect_ratio }).await {
            Ok(uri) => writeln!(out, "Video ready: {}", uri),
            Err(e) => writeln!(out, "{}", e),
        }
    }

    fn render_view(&self, out: &mut dyn Write) -> std::io::Result<()> {
        let view = self.router.active();
        match view {
            View::Dashboard => {
                let profile = self.app.profile.current();
                writeln!(out, "{}, {}!", greeting(Local::now().hour()), profile.display_name)?;
                writeln!(out, "Upcoming:")?;
                render_entries(&self.app.schedule.upcoming(Local::now()), out)?;
                writeln!(out, "Recent activity:")?;
                for activity in self.router.activity() {
                    writeln!(out, "  {}", activity.title)?;
                }
                Ok(())
            }
            View::Schedule => {
                let date = self.router.selected_date().unwrap_or_else(|| Local::now().date_naive());
                self.render_day(date, out)
            }
            View::Profile => render_profile(&self.app.profile.current(), out),
            View::Tutor => {
                let turns = self.tutor.as_ref().map_or(0, |t| t.turns().len());
                writeln!(out, "Tutor: {} messages so far. Use 'ask <message>'.", turns)
            }
            View::SmartStudy | View::Practice | View::Progress => match self.router.focus_topic() {
                Some(topic) => writeln!(out, "{} (focus: {})", view.name(), topic),
                None => writeln!(out, "{}", view.name()),
            },
        }
    }

    fn render_day(&self, date: NaiveDate, out: &mut dyn Write) -> std::io::Result<()> {
        writeln!(out, "Schedule for {}:", date.format("%A, %B %-d, %Y"))?;
        render_entries(&self.app.schedule.daily(date, chrono::Utc::now()), out)
    }
}

fn report<T, E: std::fmt::Display>(out: &mut dyn Write, result: Result<T, E>, success: &str) -> std::io::Result<()> {
    match result {
        Ok(_) => writeln!(out, "{}", success),
        Err(e) => writeln!(out, "{}", e),
    }
}

fn greeting(hour: u32) -> &'static str {
    match hour {
        5..=11 => "Good Morning",
        12..=16 => "Good Afternoon",
        17..=21 => "Good Evening",
        _ => "Good Night",
    }
}

fn render_profile(profile: &UserProfile, out: &mut dyn Write) -> std::io::Result<()> {
    writeln!(out, "Name:      {}", profile.display_name)?;
    writeln!(out, "Email:     {}", profile.email)?;
    writeln!(out, "Region:    {}", profile.region)?;
    writeln!(out, "Level:     {}", profile.education_level)?;
    writeln!(out, "Subjects:  {}", profile.subjects.join(", "))?;
    writeln!(out, "Goals:")?;
    for goal in StudyGoal::ALL {
        let mark = if profile.goals.iter().any(|g| g == goal.label()) { 'x' } else { ' ' };
        writeln!(out, "  [{}] {}", mark, goal.label())?;
    }
    Ok(())
}

fn render_entries(entries: &[ScheduleEntry], out: &mut dyn Write) -> std::io::Result<()> {
    if entries.is_empty() {
        return writeln!(out, "  (nothing scheduled)");
    }
    for entry in entries {
        writeln!(
            out,
            "  {}  {} {}-{}  {:?}  {}",
            entry.id,
            entry.date,
            entry.start_time.format("%H:%M"),
            entry.end_time.format("%H:%M"),
            entry.entry_type,
            entry.title
        )?;
    }
    Ok(())
}

fn mime_type_for(path: &Path) -> &'static str {
    let extension = path.extension().and_then(|e| e.to_str()).unwrap_or_default().to_ascii_lowercase();
    match extension.as_str() {
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        "gif" => "image/gif",
        "webp" => "image/webp",
        "txt" | "md" => "text/plain",
        "pdf" => "application/pdf",
        _ => "application/octet-stream",
    }
}

async fn load_attachment(path: &Path) -> Result<Attachment, String> {
    let data = tokio::fs::read(path)
        .await
        .map_err(|e| format!("Could not read {}: {}", path.display(), e))?;
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string());
    Ok(Attachment { name, mime_type: mime_type_for(path).to_string(), data: Bytes::from(data) })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::memory::{MemoryAuth, MemoryStore};
    use crate::app::state::AppState;
    use crate::app::tutor::tests::ScriptedChat;
    use crate::config::Config;
    use async_trait::async_trait;
    use chrono::Duration as ChronoDuration;
    use std::sync::Arc;
    use std::time::Duration;
    use study_sync_core::domain::EntryType;
    use tokio_util::sync::CancellationToken;

    struct NoPrompt;

    #[async_trait]
    impl CredentialPrompt for NoPrompt {
        async fn current_password(&self) -> Option<String> {
            None
        }
    }

    fn shell(chat: Option<Arc<ScriptedChat>>) -> Shell {
        let store = MemoryStore::new();
        let state = AppState {
            store: Arc::new(store),
            auth: Arc::new(MemoryAuth::new(Duration::from_secs(300))),
            chat: chat.map(|c| c as Arc<dyn study_sync_core::ports::ChatService>),
            video: None,
            config: Arc::new(Config::default()),
        };
        let app = StudyApp::new(state);
        app.start(CancellationToken::new());
        Shell::new(app)
    }

    async fn run(shell: &mut Shell, line: &str) -> String {
        let mut out = Vec::new();
        shell.handle(line, &NoPrompt, &mut out).await.unwrap();
        String::from_utf8(out).unwrap()
    }

    #[test]
    fn schedule_commands_parse_into_drafts() {
        let command: Command = "add 2024-09-01 09:00 10:30 lecture Intro to Biology".parse().unwrap();
        let Command::Add(draft) = command else { panic!("expected add") };
        assert_eq!(draft.id, None);
        assert_eq!(draft.title, "Intro to Biology");
        assert_eq!(draft.entry_type, EntryType::Lecture);

        let command: Command = "edit abc 2024-09-01 09:00 10:30 reading Ch. 3".parse().unwrap();
        assert!(matches!(command, Command::Edit(ScheduleDraft { id: Some(ref id), .. }) if id == "abc"));

        assert!("add 2024-09-01 09:00".parse::<Command>().is_err());
        assert!("add 2024-09-01 9am 10:30 reading x".parse::<Command>().is_err());
        assert!("add 2024-09-01 09:00 10:30 nap x".parse::<Command>().is_err());
    }

    #[test]
    fn ask_and_video_arguments() {
        assert_eq!(
            "ask --file notes.txt summarize this".parse::<Command>(),
            Ok(Command::Ask { text: "summarize this".into(), file: Some(PathBuf::from("notes.txt")) })
        );
        assert!("ask --file notes.txt".parse::<Command>().is_err());
        assert_eq!(
            "video cell.png 9:16 make it spin".parse::<Command>(),
            Ok(Command::Video {
                image: PathBuf::from("cell.png"),
                aspect_ratio: AspectRatio::Portrait,
                prompt: Some("make it spin".into()),
            })
        );
        assert_eq!(
            "video cell.png".parse::<Command>(),
            Ok(Command::Video { image: PathBuf::from("cell.png"), aspect_ratio: AspectRatio::Landscape, prompt: None })
        );
        assert_eq!("goal stay consistent".parse::<Command>(), Ok(Command::Goal(StudyGoal::StayConsistent)));
    }

    #[test]
    fn greetings_follow_the_clock() {
        assert_eq!(greeting(6), "Good Morning");
        assert_eq!(greeting(13), "Good Afternoon");
        assert_eq!(greeting(20), "Good Evening");
        assert_eq!(greeting(2), "Good Night");
    }

    #[tokio::test]
    async fn signed_out_users_only_get_auth_commands() {
        let mut shell = shell(None);
        assert!(run(&mut shell, "profile").await.starts_with("Please sign in first"));
        assert!(run(&mut shell, "help").await.contains("signup <email> <password>"));
        assert_eq!(run(&mut shell, "signup ada@example.com 123").await.trim(), "Password should be at least 6 characters.");
    }

    #[tokio::test]
    async fn profile_edits_show_up_in_the_profile() {
        let mut shell = shell(None);
        assert_eq!(run(&mut shell, "signup ada@example.com secret1").await.trim(), "Welcome, ada@example.com.");
        assert_eq!(run(&mut shell, "name Ada").await.trim(), "Name updated.");
        run(&mut shell, "subjects Math, Physics").await;
        run(&mut shell, "goal Stay consistent").await;

        let profile = run(&mut shell, "profile").await;
        assert!(profile.contains("Name:      Ada"));
        assert!(profile.contains("Subjects:  Math, Physics"));
        assert!(profile.contains("[x] Stay consistent"));
        assert!(profile.contains("[ ] Improve understanding"));

        assert_eq!(run(&mut shell, "signout").await.trim(), "Signed out.");
        assert!(run(&mut shell, "profile").await.starts_with("Please sign in first"));
    }

    #[tokio::test]
    async fn added_entries_appear_in_upcoming_and_the_day_view() {
        let mut shell = shell(None);
        run(&mut shell, "signup ada@example.com secret1").await;
        let date = Local::now().date_naive() + ChronoDuration::days(1);

        let saved = run(&mut shell, &format!("add {} 09:00 10:00 practice Past papers", date)).await;
        assert!(saved.starts_with("Saved schedule entry"));
        assert_eq!(shell.router().editor(), &EditorState::Closed);
        shell.app().schedule.watch().wait_for(|entries| !entries.is_empty()).await.unwrap();

        assert!(run(&mut shell, "upcoming").await.contains("Past papers"));
        let day = run(&mut shell, &format!("open {}", date)).await;
        assert!(day.contains("Past papers"));
        assert_eq!(shell.router().active(), View::Schedule);
        assert!(run(&mut shell, "edit missing 2024-01-01 09:00 10:00 reading x").await.contains("No schedule entry"));
    }

    #[tokio::test]
    async fn launching_a_session_sends_the_prompt_once() {
        let chat = Arc::new(ScriptedChat::replying(&["Light ", "becomes sugar."]));
        let mut shell = shell(Some(chat.clone()));
        run(&mut shell, "signup ada@example.com secret1").await;

        let reply = run(&mut shell, "launch Explain photosynthesis simply").await;
        assert_eq!(reply.trim(), "Light becomes sugar.");
        assert_eq!(shell.router().active(), View::Tutor);
        assert_eq!(chat.requests.lock().unwrap().len(), 1);

        let activity = run(&mut shell, "activity").await;
        assert!(activity.starts_with("Studied: Explain photosynthesis simply"));
    }

    #[tokio::test]
    async fn switching_users_starts_a_fresh_conversation() {
        let chat = Arc::new(ScriptedChat::replying(&["ok"]));
        let mut shell = shell(Some(chat.clone()));
        run(&mut shell, "signup alice@example.com secret1").await;
        run(&mut shell, "ask My private question about alice").await;
        run(&mut shell, "focus alice topic").await;

        run(&mut shell, "signup bob@example.com secret2").await;
        assert_eq!(shell.router().focus_topic(), None);
        assert_eq!(shell.router().activity().count(), 0);

        run(&mut shell, "ask hello from bob").await;
        let requests = chat.requests.lock().unwrap();
        assert_eq!(requests.len(), 2);
        assert!(requests[1].history.is_empty());
        assert_eq!(requests[1].message.text, "hello from bob");
        drop(requests);
        let titles: Vec<String> = shell.router().activity().map(|a| a.title.clone()).collect();
        assert_eq!(titles, vec!["Studied: hello from bob".to_string()]);
    }

    #[tokio::test]
    async fn focus_sessions_launch_a_study_plan() {
        let chat = Arc::new(ScriptedChat::replying(&["Step 1."]));
        let mut shell = shell(Some(chat.clone()));
        run(&mut shell, "signup ada@example.com secret1").await;

        assert!(run(&mut shell, "study").await.starts_with("Set a focus topic first"));
        run(&mut shell, "focus Organic chemistry").await;
        assert!(run(&mut shell, "study 20").await.starts_with("Focus time must be one of"));
        assert_eq!(run(&mut shell, "study 30").await.trim(), "Step 1.");

        let requests = chat.requests.lock().unwrap();
        assert_eq!(requests.len(), 1);
        assert!(requests[0].message.text.contains("topic: Organic chemistry based on a duration of 30 minutes"));
        drop(requests);
        assert_eq!(shell.router().active(), View::Tutor);
        let titles: Vec<&str> = shell.router().activity().map(|a| a.title.as_str()).collect();
        assert_eq!(titles[1], "Studied: Organic chemistry");
        assert!(titles[0].starts_with("Studied: Create a focused study"));

        run(&mut shell, "explain Enzymes").await;
        assert_eq!(chat.requests.lock().unwrap().len(), 2);
        assert_eq!(shell.router().activity().nth(1).map(|a| a.title.as_str()), Some("Studied: Enzymes"));
    }

    #[tokio::test]
    async fn saving_an_entry_selects_its_day() {
        let mut shell = shell(None);
        run(&mut shell, "signup ada@example.com secret1").await;
        let date = Local::now().date_naive() + ChronoDuration::days(3);
        run(&mut shell, &format!("add {} 14:00 15:00 reading Chapter 4", date)).await;
        assert_eq!(shell.router().selected_date(), Some(date));
    }

    #[tokio::test]
    async fn tutor_is_reported_missing_without_a_chat_model() {
        let mut shell = shell(None);
        run(&mut shell, "signup ada@example.com secret1").await;
        assert!(run(&mut shell, "ask What is a cell?").await.contains("not available"));
    }
}
