//! Hand-written fakes shared by unit tests.

use std::{
    collections::VecDeque,
    sync::{
        atomic::{AtomicBool, AtomicUsize, Ordering},
        Mutex,
    },
};

use async_trait::async_trait;

use crate::{
    domain::{ChannelId, MessageId, MessageRef, UserId},
    listing::RawListing,
    messaging::{
        port::MessagingPort,
        types::{ChatMessage, MessagingCapabilities, ReactionEvent},
    },
    plugins::{Criteria, ScraperPlugin},
    Error, Result,
};

#[derive(Clone, Debug)]
pub struct SentMessage {
    pub message: MessageRef,
    pub text: String,
    pub reactions: Vec<String>,
}

#[derive(Default)]
pub struct FakeChat {
    next_id: Mutex<i32>,
    sends: Mutex<Vec<SentMessage>>,
    deleted: Mutex<Vec<MessageRef>>,
    failing: AtomicBool,
}

impl FakeChat {
    fn alloc(&self, channel_id: ChannelId) -> MessageRef {
        let mut guard = self.next_id.lock().unwrap();
        *guard += 1;
        MessageRef {
            channel_id,
            message_id: MessageId(*guard),
        }
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub fn sent(&self) -> Vec<SentMessage> {
        self.sends.lock().unwrap().clone()
    }

    pub fn texts(&self) -> Vec<String> {
        self.sent().into_iter().map(|s| s.text).collect()
    }

    pub fn last_text(&self) -> String {
        self.texts().pop().unwrap_or_default()
    }

    pub fn deleted(&self) -> Vec<MessageRef> {
        self.deleted.lock().unwrap().clone()
    }

    fn record(&self, channel: ChannelId, text: &str, reactions: &[&str]) -> Result<MessageRef> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(Error::External("send refused by fake chat".to_string()));
        }
        let message = self.alloc(channel);
        self.sends.lock().unwrap().push(SentMessage {
            message,
            text: text.to_string(),
            reactions: reactions.iter().map(|r| r.to_string()).collect(),
        });
        Ok(message)
    }
}

#[async_trait]
impl MessagingPort for FakeChat {
    fn capabilities(&self) -> MessagingCapabilities {
        MessagingCapabilities {
            supports_reactions: true,
            supports_reaction_removal: true,
            supports_delete: true,
            max_message_len: 4096,
        }
    }

    async fn send_text(&self, channel: ChannelId, text: &str) -> Result<MessageRef> {
        self.record(channel, text, &[])
    }

    async fn send_with_reactions(
        &self,
        channel: ChannelId,
        text: &str,
        reactions: &[&str],
    ) -> Result<MessageRef> {
        self.record(channel, text, reactions)
    }

    async fn delete_message(&self, msg: MessageRef) -> Result<()> {
        self.deleted.lock().unwrap().push(msg);
        Ok(())
    }
}

/// Plugin that replays queued results, then returns empty batches.
pub struct ScriptedPlugin {
    name: String,
    script: Mutex<VecDeque<Result<Vec<RawListing>>>>,
    calls: AtomicUsize,
}

impl ScriptedPlugin {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            script: Mutex::new(VecDeque::new()),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn push_ok(&self, batch: Vec<RawListing>) {
        self.script.lock().unwrap().push_back(Ok(batch));
    }

    pub fn push_err(&self, message: &str) {
        self.script
            .lock()
            .unwrap()
            .push_back(Err(Error::scrape(self.name.clone(), message)));
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ScraperPlugin for ScriptedPlugin {
    fn name(&self) -> &str {
        &self.name
    }

    async fn scrape(&self, _criteria: &Criteria) -> Result<Vec<RawListing>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.script
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Ok(Vec::new()))
    }
}

pub fn chat_message(channel: i64, message_id: i32, author: i64, text: &str) -> ChatMessage {
    ChatMessage {
        message: MessageRef {
            channel_id: ChannelId(channel),
            message_id: MessageId(message_id),
        },
        author: UserId(author),
        author_name: Some(format!("user{author}")),
        text: text.to_string(),
    }
}

pub fn reaction(message: MessageRef, user: i64, emoji: &str) -> ReactionEvent {
    ReactionEvent {
        message,
        user: UserId(user),
        user_name: Some(format!("user{user}")),
        emoji: emoji.to_string(),
    }
}
