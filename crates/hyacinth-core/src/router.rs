//! Regex-keyed command dispatch.
//!
//! Patterns are tried in registration order; the first one whose match starts
//! at offset 0 of the command text wins and exactly one handler runs.

use std::{collections::HashMap, future::Future, sync::Arc};

use async_trait::async_trait;
use regex::{Regex, RegexBuilder};

use crate::{
    domain::{ChannelId, UserId},
    formatting::{code_block, truncate_tail},
    messaging::{port::MessagingPort, types::ChatMessage},
    Error, Result,
};

/// A routed command: the source message plus the pattern's named captures.
#[derive(Clone, Debug)]
pub struct CommandInvocation {
    pub message: ChatMessage,
    /// Command text after prefix/mention stripping.
    pub command: String,
    captures: HashMap<String, String>,
}

impl CommandInvocation {
    pub fn new(message: ChatMessage, command: impl Into<String>) -> Self {
        Self {
            message,
            command: command.into(),
            captures: HashMap::new(),
        }
    }

    /// Named capture group, if it participated in the match.
    pub fn get(&self, name: &str) -> Option<&str> {
        self.captures.get(name).map(String::as_str)
    }

    pub fn channel(&self) -> ChannelId {
        self.message.channel_id()
    }

    pub fn author(&self) -> UserId {
        self.message.author
    }

    pub fn mention(&self) -> String {
        self.message.author_mention()
    }
}

#[async_trait]
pub trait CommandHandler<C>: Send + Sync {
    async fn call(&self, ctx: Arc<C>, invocation: CommandInvocation) -> Result<()>;
}

#[async_trait]
impl<C, F, Fut> CommandHandler<C> for F
where
    C: Send + Sync + 'static,
    F: Fn(Arc<C>, CommandInvocation) -> Fut + Send + Sync,
    Fut: Future<Output = Result<()>> + Send,
{
    async fn call(&self, ctx: Arc<C>, invocation: CommandInvocation) -> Result<()> {
        (self)(ctx, invocation).await
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RouteOutcome {
    Handled { pattern: String },
    Unmatched,
}

struct Route<C> {
    pattern: String,
    regex: Regex,
    handler: Box<dyn CommandHandler<C>>,
}

pub struct CommandRouter<C> {
    routes: Vec<Route<C>>,
    diagnostic_limit: usize,
}

impl<C: Send + Sync + 'static> CommandRouter<C> {
    pub fn new(diagnostic_limit: usize) -> Self {
        Self {
            routes: Vec::new(),
            diagnostic_limit,
        }
    }

    /// Append a route. Patterns compile case-insensitively.
    pub fn register(&mut self, pattern: &str, handler: impl CommandHandler<C> + 'static) -> Result<()> {
        let regex = RegexBuilder::new(pattern)
            .case_insensitive(true)
            .build()
            .map_err(|e| Error::Config(format!("invalid command pattern {pattern:?}: {e}")))?;
        self.routes.push(Route {
            pattern: pattern.to_string(),
            regex,
            handler: Box::new(handler),
        });
        Ok(())
    }

    /// Registered patterns, in match order.
    pub fn patterns(&self) -> Vec<&str> {
        self.routes.iter().map(|r| r.pattern.as_str()).collect()
    }

    /// Run the first matching handler for `invocation.command`.
    ///
    /// A failing handler gets a bounded apology in its channel and surfaces as
    /// `Error::CommandHandler`. `Error::Cancelled` is returned untouched.
    pub async fn route(
        &self,
        ctx: Arc<C>,
        mut invocation: CommandInvocation,
        chat: &dyn MessagingPort,
    ) -> Result<RouteOutcome> {
        let Some((route, captures)) = self.find(&invocation.command) else {
            tracing::debug!(command = %invocation.command, "no command matched");
            return Ok(RouteOutcome::Unmatched);
        };
        invocation.captures = captures;

        let channel = invocation.channel();
        let mention = invocation.mention();
        let command = invocation.command.clone();
        tracing::info!(channel = channel.0, pattern = %route.pattern, "running command");

        match route.handler.call(ctx, invocation).await {
            Ok(()) => Ok(RouteOutcome::Handled {
                pattern: route.pattern.clone(),
            }),
            Err(Error::Cancelled) => Err(Error::Cancelled),
            Err(e) => {
                let diagnostic = e.to_string();
                tracing::error!(
                    channel = channel.0,
                    command = %command,
                    error = ?e,
                    "command handler failed"
                );
                let apology = format!(
                    "Sorry {mention}! Something went wrong while running your command.\n{}",
                    code_block(truncate_tail(&diagnostic, self.diagnostic_limit))
                );
                if let Err(send_err) = chat.send_text(channel, &apology).await {
                    tracing::warn!(channel = channel.0, error = %send_err, "failed to send apology");
                }
                Err(Error::CommandHandler {
                    command,
                    message: diagnostic,
                })
            }
        }
    }

    fn find(&self, text: &str) -> Option<(&Route<C>, HashMap<String, String>)> {
        self.routes.iter().find_map(|route| {
            let caps = route.regex.captures(text)?;
            // Leftmost match; if it is not at 0 there is no match at 0.
            if caps.get(0)?.start() != 0 {
                return None;
            }
            let named = route
                .regex
                .capture_names()
                .flatten()
                .filter_map(|name| Some((name.to_string(), caps.name(name)?.as_str().to_string())))
                .collect();
            Some((route, named))
        })
    }
}
