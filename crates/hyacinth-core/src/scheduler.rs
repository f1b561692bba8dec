//! Recurring poll tasks, one per notifier.
//!
//! Each task starts after a stagger offset, then runs the dispatcher over the
//! notifier's current searches every poll interval. Tasks read the shared
//! notifier map on every tick, so command edits (new search, pause) take
//! effect on the next cycle without a restart.

use std::{
    collections::{BTreeMap, HashMap},
    sync::Arc,
    time::Duration,
};

use tokio::{sync::Mutex, task::JoinHandle, time::sleep};
use tokio_util::sync::CancellationToken;

use crate::{
    dispatcher::NotificationDispatcher, domain::ChannelId, reactions::ReactionRegistry,
    search::Notifier,
};

pub type SharedNotifiers = Arc<Mutex<BTreeMap<ChannelId, Notifier>>>;

#[derive(Clone, Copy, Debug)]
pub struct PollSettings {
    pub interval: Duration,
    pub stagger: Duration,
}

#[derive(Clone)]
pub struct PollScheduler {
    inner: Arc<SchedulerInner>,
}

struct SchedulerInner {
    settings: PollSettings,
    dispatcher: Arc<NotificationDispatcher>,
    reactions: Arc<ReactionRegistry>,
    notifiers: SharedNotifiers,
    root: CancellationToken,
    jobs: Mutex<HashMap<ChannelId, JobEntry>>,
}

struct JobEntry {
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

impl PollScheduler {
    pub fn new(
        settings: PollSettings,
        dispatcher: Arc<NotificationDispatcher>,
        reactions: Arc<ReactionRegistry>,
        notifiers: SharedNotifiers,
        root: CancellationToken,
    ) -> Self {
        Self {
            inner: Arc::new(SchedulerInner {
                settings,
                dispatcher,
                reactions,
                notifiers,
                root,
                jobs: Mutex::new(HashMap::new()),
            }),
        }
    }

    /// Start a task for every known notifier, staggered by position.
    pub async fn start_all(&self) -> usize {
        let channels: Vec<ChannelId> = self.inner.notifiers.lock().await.keys().copied().collect();
        for (i, channel) in channels.iter().enumerate() {
            let delay = self.inner.settings.stagger.saturating_mul(i as u32);
            self.start(*channel, delay).await;
        }
        tracing::info!(count = channels.len(), "poll tasks started");
        channels.len()
    }

    /// (Re)start the task for `channel`; the first cycle runs after `delay`.
    pub async fn start(&self, channel: ChannelId, delay: Duration) {
        if self.inner.root.is_cancelled() {
            return;
        }
        let cancel = self.inner.root.child_token();
        let scheduler = self.clone();
        let task_cancel = cancel.clone();
        let handle = tokio::spawn(async move {
            scheduler.job_loop(channel, delay, task_cancel).await;
        });

        let previous = self
            .inner
            .jobs
            .lock()
            .await
            .insert(channel, JobEntry { cancel, handle });
        if let Some(prev) = previous {
            prev.cancel.cancel();
        }
    }

    /// Stop polling `channel`. An in-flight cycle finishes its current listing.
    pub async fn stop(&self, channel: ChannelId) -> bool {
        match self.inner.jobs.lock().await.remove(&channel) {
            Some(job) => {
                job.cancel.cancel();
                true
            }
            None => false,
        }
    }

    pub async fn running(&self) -> Vec<ChannelId> {
        let mut out: Vec<_> = self
            .inner
            .jobs
            .lock()
            .await
            .iter()
            .filter(|(_, j)| !j.handle.is_finished())
            .map(|(c, _)| *c)
            .collect();
        out.sort();
        out
    }

    /// Cancel every task and wait for them to exit.
    pub async fn shutdown(&self) {
        self.inner.root.cancel();
        let jobs: Vec<JobEntry> = self.inner.jobs.lock().await.drain().map(|(_, j)| j).collect();
        for job in jobs {
            if let Err(e) = job.handle.await {
                tracing::warn!(error = %e, "poll task ended abnormally");
            }
        }
        tracing::info!("poll scheduler stopped");
    }

    async fn job_loop(&self, channel: ChannelId, delay: Duration, cancel: CancellationToken) {
        tokio::select! {
            _ = cancel.cancelled() => return,
            _ = sleep(delay) => {}
        }

        loop {
            let snapshot = self.inner.notifiers.lock().await.get(&channel).cloned();
            let Some(notifier) = snapshot else {
                tracing::info!(channel = channel.0, "notifier removed; poll task exiting");
                return;
            };

            let reports = self.inner.dispatcher.run_notifier(&notifier, &cancel).await;
            tracing::debug!(channel = channel.0, searches = reports.len(), "poll tick done");
            self.inner.reactions.prune_expired().await;

            tokio::select! {
                _ = cancel.cancelled() => return,
                _ = sleep(self.inner.settings.interval) => {}
            }
        }
    }
}
