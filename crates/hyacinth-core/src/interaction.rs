//! Multi-question conversations held with one user in one channel.
//!
//! Answers arrive either as message text or as a reaction on the latest
//! prompt. Only the user who started the conversation can answer it.

use std::{
    collections::{BTreeMap, HashMap},
    sync::Arc,
    time::{Duration, Instant},
};

use tokio::sync::Mutex;

use crate::{
    domain::{ChannelId, MessageRef, UserId},
    Error, Result,
};

/// Placeholder replaced with the user's mention in prompts and error responses.
pub const FMT_USER: &str = "{user}";

pub const DEFAULT_ERROR_RESPONSE: &str = "Sorry {user}, I didn't recognize that. Please try again.";

pub type Answers = BTreeMap<String, String>;

/// Turns a raw answer into the stored value, or explains why it was rejected.
pub type Validator = Arc<dyn Fn(&str, &Answers) -> std::result::Result<String, String> + Send + Sync>;

#[derive(Clone)]
pub struct Question {
    pub key: String,
    pub prompt: String,
    validator: Option<Validator>,
    /// When false the answer advances the conversation but is not stored.
    pub include_answer: bool,
    pub error_response: Option<String>,
    pub accepted_reactions: Vec<String>,
}

impl std::fmt::Debug for Question {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Question")
            .field("key", &self.key)
            .field("prompt", &self.prompt)
            .field("accepted_reactions", &self.accepted_reactions)
            .finish_non_exhaustive()
    }
}

impl Question {
    pub fn new(key: impl Into<String>, prompt: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            prompt: prompt.into(),
            validator: None,
            include_answer: true,
            error_response: None,
            accepted_reactions: Vec::new(),
        }
    }

    pub fn with_validator(
        mut self,
        f: impl Fn(&str, &Answers) -> std::result::Result<String, String> + Send + Sync + 'static,
    ) -> Self {
        self.validator = Some(Arc::new(f));
        self
    }

    pub fn with_reactions(mut self, emoji: &[&str]) -> Self {
        self.accepted_reactions = emoji.iter().map(|e| e.to_string()).collect();
        self
    }

    pub fn with_error_response(mut self, text: impl Into<String>) -> Self {
        self.error_response = Some(text.into());
        self
    }

    pub fn excluded_from_answers(mut self) -> Self {
        self.include_answer = false;
        self
    }

    fn validate(&self, raw: &str, answers: &Answers) -> std::result::Result<String, String> {
        match &self.validator {
            Some(v) => v(raw, answers),
            None => Ok(raw.trim().to_string()),
        }
    }
}

/// One in-flight conversation. `T` is what the caller wants back on completion.
#[derive(Debug)]
pub struct Interaction<T> {
    pub channel: ChannelId,
    pub user: UserId,
    pub payload: T,
    questions: Vec<Question>,
    answers: Answers,
    current: usize,
    prompt_message: Option<MessageRef>,
    started_at: Instant,
}

impl<T> Interaction<T> {
    pub fn new(channel: ChannelId, user: UserId, payload: T, questions: Vec<Question>) -> Result<Self> {
        if questions.is_empty() {
            return Err(Error::Config("an interaction needs at least one question".to_string()));
        }
        Ok(Self {
            channel,
            user,
            payload,
            questions,
            answers: Answers::new(),
            current: 0,
            prompt_message: None,
            started_at: Instant::now(),
        })
    }

    pub fn answers(&self) -> &Answers {
        &self.answers
    }

    pub fn current_question(&self) -> Option<&Question> {
        self.questions.get(self.current)
    }

    pub fn is_complete(&self) -> bool {
        self.current >= self.questions.len()
    }

    fn accept(&mut self, raw: &str) -> std::result::Result<(), String> {
        let Some(question) = self.questions.get(self.current) else {
            return Err("conversation already complete".to_string());
        };
        let value = question.validate(raw, &self.answers)?;
        if question.include_answer {
            self.answers.insert(question.key.clone(), value);
        }
        self.current += 1;
        Ok(())
    }
}

#[derive(Clone, Copy, Debug)]
pub enum Answer<'a> {
    Text(&'a str),
    Reaction { message: MessageRef, emoji: &'a str },
}

#[derive(Debug)]
pub enum Progress<T> {
    /// No conversation here, wrong user, or a reaction the question does not accept.
    Ignored,
    /// Answer rejected; the same question stands.
    Rejected { response: String },
    /// Answer stored; ask this next.
    Next(Question),
    Complete(Interaction<T>),
    Cancelled,
}

/// Active conversations, at most one per channel.
pub struct InteractionRegistry<T> {
    timeout: Duration,
    active: Mutex<HashMap<ChannelId, Interaction<T>>>,
}

impl<T: Send> InteractionRegistry<T> {
    pub fn new(timeout: Duration) -> Self {
        Self {
            timeout,
            active: Mutex::new(HashMap::new()),
        }
    }

    /// Begin `interaction`, replacing any conversation already open in its
    /// channel. Returns the first question.
    pub async fn start(&self, interaction: Interaction<T>) -> Question {
        let first = interaction.questions[0].clone();
        let channel = interaction.channel;
        if self.active.lock().await.insert(channel, interaction).is_some() {
            tracing::info!(channel = channel.0, "replaced an unfinished interaction");
        }
        first
    }

    /// Remember which message carries the current prompt so reactions elsewhere are ignored.
    pub async fn set_prompt_message(&self, channel: ChannelId, message: MessageRef) {
        if let Some(i) = self.active.lock().await.get_mut(&channel) {
            i.prompt_message = Some(message);
        }
    }

    pub async fn is_active(&self, channel: ChannelId) -> bool {
        let now = Instant::now();
        self.active
            .lock()
            .await
            .get(&channel)
            .is_some_and(|i| now.saturating_duration_since(i.started_at) < self.timeout)
    }

    pub async fn cancel(&self, channel: ChannelId) -> bool {
        self.active.lock().await.remove(&channel).is_some()
    }

    pub async fn answer(&self, channel: ChannelId, user: UserId, answer: Answer<'_>) -> Progress<T> {
        let mut map = self.active.lock().await;
        let Some(interaction) = map.get_mut(&channel) else {
            return Progress::Ignored;
        };
        if Instant::now().saturating_duration_since(interaction.started_at) >= self.timeout {
            tracing::debug!(channel = channel.0, "interaction timed out");
            map.remove(&channel);
            return Progress::Ignored;
        }
        if interaction.user != user {
            return Progress::Ignored;
        }
        let Some(question) = interaction.current_question() else {
            return Progress::Ignored;
        };

        let raw = match answer {
            Answer::Text(text) => {
                if text.trim().eq_ignore_ascii_case("cancel") {
                    map.remove(&channel);
                    return Progress::Cancelled;
                }
                text
            }
            Answer::Reaction { message, emoji } => {
                if interaction.prompt_message.is_some_and(|m| m != message) {
                    return Progress::Ignored;
                }
                if !question.accepted_reactions.iter().any(|e| e == emoji) {
                    return Progress::Ignored;
                }
                emoji
            }
        };

        let error_response = question
            .error_response
            .clone()
            .unwrap_or_else(|| DEFAULT_ERROR_RESPONSE.to_string());
        if let Err(reason) = interaction.accept(raw) {
            tracing::debug!(channel = channel.0, %reason, "interaction answer rejected");
            return Progress::Rejected {
                response: error_response,
            };
        }

        if interaction.is_complete() {
            return match map.remove(&channel) {
                Some(done) => Progress::Complete(done),
                None => Progress::Ignored,
            };
        }
        interaction.prompt_message = None;
        match interaction.current_question() {
            Some(q) => Progress::Next(q.clone()),
            None => Progress::Ignored,
        }
    }
}

/// Substitute the user's mention for [`FMT_USER`].
pub fn render(template: &str, mention: &str) -> String {
    template.replace(FMT_USER, mention)
}
