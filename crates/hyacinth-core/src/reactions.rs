//! Per-message reaction handlers.
//!
//! A message sent by the bot can carry its own small state machine: the
//! handler bound to its [`MessageRef`] sees every reaction added to or removed
//! from that message, and nothing else. The registry itself does no I/O.

use std::{
    collections::HashMap,
    future::Future,
    pin::Pin,
    sync::Arc,
    time::{Duration, Instant},
};

use async_trait::async_trait;
use tokio::sync::Mutex;

use crate::{
    domain::MessageRef,
    messaging::types::{ReactionAction, ReactionEvent},
    Error, Result,
};

/// What the registry should do with a binding after its handler ran.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum HandlerOutcome {
    Keep,
    /// Workflow finished; unbind.
    Done,
}

/// Boxed future for handlers built as plain closures.
pub type HandlerFuture = Pin<Box<dyn Future<Output = Result<HandlerOutcome>> + Send>>;

#[async_trait]
pub trait ReactionHandler: Send + Sync {
    async fn on_reaction(&self, action: ReactionAction, event: &ReactionEvent) -> Result<HandlerOutcome>;
}

#[async_trait]
impl<F, Fut> ReactionHandler for F
where
    F: Fn(ReactionAction, ReactionEvent) -> Fut + Send + Sync,
    Fut: Future<Output = Result<HandlerOutcome>> + Send,
{
    async fn on_reaction(&self, action: ReactionAction, event: &ReactionEvent) -> Result<HandlerOutcome> {
        (self)(action, event.clone()).await
    }
}

struct Binding {
    handler: Arc<dyn ReactionHandler>,
    bound_at: Instant,
}

pub struct ReactionRegistry {
    ttl: Duration,
    bindings: Mutex<HashMap<MessageRef, Binding>>,
}

impl ReactionRegistry {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            bindings: Mutex::new(HashMap::new()),
        }
    }

    /// Attach `handler` to `message`. A message holds at most one live binding.
    pub async fn bind(&self, message: MessageRef, handler: impl ReactionHandler + 'static) -> Result<()> {
        let now = Instant::now();
        let mut map = self.bindings.lock().await;
        if let Some(existing) = map.get(&message) {
            if !self.expired(existing, now) {
                return Err(Error::DuplicateBinding(message));
            }
        }
        map.insert(
            message,
            Binding {
                handler: Arc::new(handler),
                bound_at: now,
            },
        );
        Ok(())
    }

    pub async fn unbind(&self, message: MessageRef) -> bool {
        self.bindings.lock().await.remove(&message).is_some()
    }

    pub async fn is_bound(&self, message: MessageRef) -> bool {
        let now = Instant::now();
        self.bindings
            .lock()
            .await
            .get(&message)
            .is_some_and(|b| !self.expired(b, now))
    }

    /// Route a reaction to the handler bound to its message.
    ///
    /// Returns `Ok(None)` when nothing (live) is bound. The handler runs
    /// without the registry lock held.
    pub async fn on_reaction(
        &self,
        action: ReactionAction,
        event: &ReactionEvent,
    ) -> Result<Option<HandlerOutcome>> {
        let handler = {
            let mut map = self.bindings.lock().await;
            match map.get(&event.message) {
                None => return Ok(None),
                Some(b) if self.expired(b, Instant::now()) => {
                    map.remove(&event.message);
                    return Ok(None);
                }
                Some(b) => b.handler.clone(),
            }
        };

        let outcome = handler.on_reaction(action, event).await?;
        if outcome == HandlerOutcome::Done {
            let mut map = self.bindings.lock().await;
            // Only drop the binding that just ran, not a replacement.
            if map
                .get(&event.message)
                .is_some_and(|b| Arc::ptr_eq(&b.handler, &handler))
            {
                map.remove(&event.message);
            }
        }
        Ok(Some(outcome))
    }

    /// Drop expired bindings. Returns how many were removed.
    pub async fn prune_expired(&self) -> usize {
        self.prune_expired_at(Instant::now()).await
    }

    pub async fn prune_expired_at(&self, now: Instant) -> usize {
        let mut map = self.bindings.lock().await;
        let before = map.len();
        map.retain(|_, b| !self.expired(b, now));
        let removed = before - map.len();
        if removed > 0 {
            tracing::debug!(removed, remaining = map.len(), "pruned reaction bindings");
        }
        removed
    }

    pub async fn len(&self) -> usize {
        self.bindings.lock().await.len()
    }

    fn expired(&self, binding: &Binding, now: Instant) -> bool {
        now.saturating_duration_since(binding.bound_at) >= self.ttl
    }
}
