use std::{collections::HashMap, sync::Arc, time::Duration};

use tokio::sync::Mutex;
use tokio::time::{sleep, Instant};

use crate::{
    domain::{ChannelId, MessageRef},
    messaging::{port::MessagingPort, types::MessagingCapabilities},
    Result,
};

#[derive(Clone, Copy, Debug)]
pub struct ThrottleConfig {
    /// Minimum spacing between any two outbound calls.
    pub global_min_interval: Duration,
    /// Minimum spacing between calls into one channel.
    pub per_channel_min_interval: Duration,
}

impl Default for ThrottleConfig {
    fn default() -> Self {
        Self {
            global_min_interval: Duration::from_millis(40),
            per_channel_min_interval: Duration::from_millis(1050),
        }
    }
}

#[derive(Debug)]
struct SlotReserver {
    interval: Duration,
    next: Instant,
}

impl SlotReserver {
    fn new(interval: Duration) -> Self {
        Self {
            interval,
            next: Instant::now(),
        }
    }

    /// Reserve the next free slot at or after `now`; returns how long to wait for it.
    fn reserve_at(&mut self, now: Instant) -> Duration {
        let start = self.next.max(now);
        self.next = start + self.interval;
        start.saturating_duration_since(now)
    }
}

/// MessagingPort decorator that spaces out outbound calls.
///
/// A poll cycle that finds many novel listings would otherwise burst one
/// message per listing into a single channel and trip platform flood limits.
pub struct ThrottledMessenger {
    inner: Arc<dyn MessagingPort>,
    cfg: ThrottleConfig,
    global: Mutex<SlotReserver>,
    per_channel: Mutex<HashMap<ChannelId, Arc<Mutex<SlotReserver>>>>,
}

impl ThrottledMessenger {
    pub fn new(inner: Arc<dyn MessagingPort>, cfg: ThrottleConfig) -> Self {
        Self {
            inner,
            cfg,
            global: Mutex::new(SlotReserver::new(cfg.global_min_interval)),
            per_channel: Mutex::new(HashMap::new()),
        }
    }

    async fn reserver_for(&self, channel: ChannelId) -> Arc<Mutex<SlotReserver>> {
        let mut map = self.per_channel.lock().await;
        map.entry(channel)
            .or_insert_with(|| {
                Arc::new(Mutex::new(SlotReserver::new(
                    self.cfg.per_channel_min_interval,
                )))
            })
            .clone()
    }

    async fn throttle(&self, channel: ChannelId) {
        let now = Instant::now();
        let global_wait = self.global.lock().await.reserve_at(now);
        let channel_wait = {
            let reserver = self.reserver_for(channel).await;
            let mut guard = reserver.lock().await;
            guard.reserve_at(now)
        };

        let wait = global_wait.max(channel_wait);
        if !wait.is_zero() {
            sleep(wait).await;
        }
    }
}

#[async_trait::async_trait]
impl MessagingPort for ThrottledMessenger {
    fn capabilities(&self) -> MessagingCapabilities {
        self.inner.capabilities()
    }

    async fn send_text(&self, channel: ChannelId, text: &str) -> Result<MessageRef> {
        self.throttle(channel).await;
        self.inner.send_text(channel, text).await
    }

    async fn send_with_reactions(
        &self,
        channel: ChannelId,
        text: &str,
        reactions: &[&str],
    ) -> Result<MessageRef> {
        self.throttle(channel).await;
        self.inner.send_with_reactions(channel, text, reactions).await
    }

    async fn delete_message(&self, msg: MessageRef) -> Result<()> {
        self.throttle(msg.channel_id).await;
        self.inner.delete_message(msg).await
    }
}
