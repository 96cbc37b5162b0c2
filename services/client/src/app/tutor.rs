//! services/client/src/app/tutor.rs
//!
//! The tutor conversation. Each message is sent with the whole prior history and a
//! system instruction carrying the user's profile; the reply streams into a growing
//! model turn.

use futures::StreamExt;
use std::sync::Arc;
use study_sync_core::domain::{Attachment, ChatRequest, ChatTurn, UserProfile};
use study_sync_core::ports::{ChatService, PortError};
use tracing::error;

/// The model turn shown in place of a reply that failed.
pub const APOLOGY: &str = "I'm sorry, I encountered an error. Please try again.";

/// Messages need more characters than this to be logged as study activity.
const ACTIVITY_MIN_CHARS: usize = 10;
/// How much of a message becomes the activity topic.
const ACTIVITY_TOPIC_CHARS: usize = 30;

pub fn system_instruction(profile: &UserProfile) -> String {
    let profile_json = serde_json::to_string(profile).unwrap_or_else(|_| "{}".to_string());
    format!(
        "You are Lumina, a helpful and encouraging AI study assistant.\n\
         User Profile: {}.\n\
         Tailor your explanations to their education level and subjects.",
        profile_json
    )
}

/// The topic to log for a sent message, if it is long enough to count.
pub fn activity_topic(text: &str) -> Option<String> {
    (text.chars().count() > ACTIVITY_MIN_CHARS)
        .then(|| text.chars().take(ACTIVITY_TOPIC_CHARS).collect())
}

pub struct TutorSession {
    chat: Arc<dyn ChatService>,
    turns: Vec<ChatTurn>,
}

impl TutorSession {
    pub fn new(chat: Arc<dyn ChatService>) -> Self {
        Self { chat, turns: Vec::new() }
    }

    pub fn turns(&self) -> &[ChatTurn] {
        &self.turns
    }

    pub fn clear(&mut self) {
        self.turns.clear();
    }

    /// Sends one user message and streams the reply, handing each fragment to
    /// `on_fragment`. On failure the partial reply is replaced by [`APOLOGY`].
    pub async fn send(
        &mut self,
        text: &str,
        attachment: Option<Attachment>,
        profile: &UserProfile,
        mut on_fragment: impl FnMut(&str),
    ) -> Result<String, PortError> {
        let message = ChatTurn::user(text, attachment);
        let request = ChatRequest {
            system_instruction: system_instruction(profile),
            history: self.turns.clone(),
            message: message.clone(),
        };
        self.turns.push(message);

        let mut stream = match self.chat.stream_reply(request).await {
            Ok(stream) => stream,
            Err(e) => return Err(self.fail(e)),
        };

        self.turns.push(ChatTurn::model(String::new()));
        while let Some(fragment) = stream.next().await {
            match fragment {
                Ok(fragment) => {
                    on_fragment(&fragment);
                    if let Some(reply) = self.turns.last_mut() {
                        reply.text.push_str(&fragment);
                    }
                }
                Err(e) => {
                    self.turns.pop();
                    return Err(self.fail(e));
                }
            }
        }
        Ok(self.turns.last().map(|turn| turn.text.clone()).unwrap_or_default())
    }

    fn fail(&mut self, e: PortError) -> PortError {
        error!("Chat error: {}", e);
        self.turns.push(ChatTurn::model(APOLOGY));
        e
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::Mutex;
    use study_sync_core::domain::ChatRole;
    use study_sync_core::ports::{PortResult, TextStream};

    /// Replies with a fixed script of fragments and records every request.
    pub(crate) struct ScriptedChat {
        pub(crate) script: Vec<PortResult<String>>,
        pub(crate) fail_to_start: bool,
        pub(crate) requests: Mutex<Vec<ChatRequest>>,
    }

    impl ScriptedChat {
        pub(crate) fn replying(fragments: &[&str]) -> Self {
            Self {
                script: fragments.iter().map(|f| Ok(f.to_string())).collect(),
                fail_to_start: false,
                requests: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl ChatService for ScriptedChat {
        async fn stream_reply(&self, request: ChatRequest) -> PortResult<TextStream> {
            self.requests.lock().unwrap().push(request);
            if self.fail_to_start {
                return Err(PortError::Unavailable("chat offline".into()));
            }
            Ok(Box::pin(futures::stream::iter(self.script.clone())))
        }
    }

    #[tokio::test]
    async fn fragments_accumulate_into_one_model_turn() {
        let chat = Arc::new(ScriptedChat::replying(&["Photo", "synthesis ", "converts light."]));
        let mut tutor = TutorSession::new(chat.clone());
        let mut seen = Vec::new();

        let reply = tutor
            .send("What is photosynthesis?", None, &UserProfile::default(), |f| seen.push(f.to_string()))
            .await
            .unwrap();

        assert_eq!(reply, "Photosynthesis converts light.");
        assert_eq!(seen.len(), 3);
        assert_eq!(tutor.turns().len(), 2);
        assert_eq!(tutor.turns()[1].role, ChatRole::Model);
    }

    #[tokio::test]
    async fn requests_carry_history_and_the_profile() {
        let chat = Arc::new(ScriptedChat::replying(&["ok"]));
        let mut tutor = TutorSession::new(chat.clone());
        let profile = UserProfile { education_level: "High School".into(), ..UserProfile::default() };

        tutor.send("first", None, &profile, |_| {}).await.unwrap();
        tutor.send("second", None, &profile, |_| {}).await.unwrap();

        let requests = chat.requests.lock().unwrap();
        assert_eq!(requests[1].history.len(), 2);
        assert_eq!(requests[1].message.text, "second");
        assert!(requests[1].system_instruction.contains("\"educationLevel\":\"High School\""));
    }

    #[tokio::test]
    async fn a_broken_stream_leaves_only_the_apology() {
        let chat = Arc::new(ScriptedChat {
            script: vec![Ok("partial".into()), Err(PortError::Unavailable("reset".into()))],
            fail_to_start: false,
            requests: Mutex::new(Vec::new()),
        });
        let mut tutor = TutorSession::new(chat);

        let result = tutor.send("Explain entropy", None, &UserProfile::default(), |_| {}).await;

        assert!(result.is_err());
        let texts: Vec<&str> = tutor.turns().iter().map(|t| t.text.as_str()).collect();
        assert_eq!(texts, vec!["Explain entropy", APOLOGY]);
    }

    #[tokio::test]
    async fn a_failed_request_appends_the_apology() {
        let chat = Arc::new(ScriptedChat {
            script: Vec::new(),
            fail_to_start: true,
            requests: Mutex::new(Vec::new()),
        });
        let mut tutor = TutorSession::new(chat);
        assert!(tutor.send("hi", None, &UserProfile::default(), |_| {}).await.is_err());
        assert_eq!(tutor.turns().last().map(|t| t.text.as_str()), Some(APOLOGY));
    }

    #[test]
    fn only_longer_messages_count_as_activity() {
        assert_eq!(activity_topic("short one"), None);
        assert_eq!(activity_topic("exactly 10"), None);
        assert_eq!(
            activity_topic("Explain the causes of the French Revolution please").as_deref(),
            Some("Explain the causes of the Fren")
        );
    }
}
