//! One notification run: load watermarks, walk every source, notify, save.
//!
//! A source's watermark only moves after every notification for its new
//! items has been delivered.  Any failure inside a source leaves that
//! source's watermark where it was, so its items are offered again next run;
//! other sources are unaffected.  The whole map is saved once at the end.

use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use chrono::{TimeDelta, Utc};
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use notifybot_config::DispatchConfig;
use notifybot_squabbles::{FeedFetcher, Notifier, NotifyError};
use notifybot_store::{
    ChatStatus, ChatWatermark, CommunityWatermark, SourceKey, StoreError, Watcher, WatermarkStore,
};

use crate::detect::{ActivityPolicy, classify_chat_activity, new_posts};
use crate::limiter::{Backoff, Cooldown};
use crate::message;

/// Fatal run errors.  Nothing has been persisted when these are returned.
#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    #[error("cannot load watermarks: {0}")]
    Load(#[source] StoreError),

    #[error("cannot save watermarks: {0}")]
    Save(#[source] StoreError),
}

#[derive(Debug, Clone)]
pub struct DispatchOptions {
    pub cooldown: Duration,
    pub run_deadline: Duration,
    pub notify_retries: u32,
    pub retry_backoff: Duration,
    pub activity: ActivityPolicy,
    pub prime_new_sources: bool,
    /// When false the updated map is not written back (dry runs).
    pub persist: bool,
}

impl Default for DispatchOptions {
    fn default() -> Self {
        Self::from(&DispatchConfig::default())
    }
}

impl From<&DispatchConfig> for DispatchOptions {
    fn from(config: &DispatchConfig) -> Self {
        Self {
            cooldown: Duration::from_secs(config.cooldown_secs),
            run_deadline: Duration::from_secs(config.run_deadline_secs),
            notify_retries: config.notify_retries,
            retry_backoff: Duration::from_millis(config.retry_backoff_ms),
            activity: ActivityPolicy {
                window: i64::try_from(config.chat_window_secs)
                    .ok()
                    .and_then(TimeDelta::try_seconds)
                    .unwrap_or(TimeDelta::MAX),
                busy_threshold: config.busy_threshold,
            },
            prime_new_sources: config.prime_new_sources,
            persist: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SourceOutcome {
    /// Nothing new.
    Unchanged,
    /// New items were notified and the watermark moved.
    Advanced { from: i64, to: i64, notified: usize },
    /// First sighting: watermark set without notifying.
    Primed { to: i64 },
    /// Chat status flipped without a new message to report.
    StatusChanged { from: ChatStatus, to: ChatStatus },
    /// Fetch or delivery failed; watermark held.
    Failed { reason: String },
    /// Not attempted before the run deadline.
    Skipped,
}

#[derive(Debug, Clone)]
pub struct SourceReport {
    pub source: SourceKey,
    pub outcome: SourceOutcome,
}

#[derive(Debug, Clone, Default)]
pub struct RunReport {
    pub sources: Vec<SourceReport>,
    pub saved: bool,
    pub elapsed: Duration,
}

impl RunReport {
    pub fn outcome(&self, source: &SourceKey) -> Option<&SourceOutcome> {
        self.sources
            .iter()
            .find(|r| &r.source == source)
            .map(|r| &r.outcome)
    }

    pub fn failed(&self) -> usize {
        self.sources
            .iter()
            .filter(|r| matches!(r.outcome, SourceOutcome::Failed { .. }))
            .count()
    }

    pub fn skipped(&self) -> usize {
        self.sources
            .iter()
            .filter(|r| r.outcome == SourceOutcome::Skipped)
            .count()
    }

    pub fn notified(&self) -> usize {
        self.sources
            .iter()
            .map(|r| match r.outcome {
                SourceOutcome::Advanced { notified, .. } => notified,
                _ => 0,
            })
            .sum()
    }

    fn push(&mut self, source: SourceKey, outcome: SourceOutcome) {
        self.sources.push(SourceReport { source, outcome });
    }
}

impl fmt::Display for RunReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "{} sources, {} notifications, {} failed, {} skipped, saved: {}",
            self.sources.len(),
            self.notified(),
            self.failed(),
            self.skipped(),
            self.saved
        )?;
        for report in &self.sources {
            let line = match &report.outcome {
                SourceOutcome::Unchanged => "unchanged".to_string(),
                SourceOutcome::Advanced { from, to, notified } => {
                    format!("{from} -> {to} ({notified} sent)")
                }
                SourceOutcome::Primed { to } => format!("primed at {to}"),
                SourceOutcome::StatusChanged { from, to } => format!("{from} -> {to}"),
                SourceOutcome::Failed { reason } => format!("FAILED: {reason}"),
                SourceOutcome::Skipped => "skipped (deadline)".to_string(),
            };
            writeln!(f, "  {:<30} {line}", report.source.to_string())?;
        }
        Ok(())
    }
}

pub struct Dispatcher {
    store: Arc<dyn WatermarkStore>,
    feeds: Arc<dyn FeedFetcher>,
    notifier: Arc<dyn Notifier>,
    options: DispatchOptions,
}

impl Dispatcher {
    pub fn new(
        store: Arc<dyn WatermarkStore>,
        feeds: Arc<dyn FeedFetcher>,
        notifier: Arc<dyn Notifier>,
        options: DispatchOptions,
    ) -> Self {
        Self {
            store,
            feeds,
            notifier,
            options,
        }
    }

    pub async fn run_once(&self) -> Result<RunReport, DispatchError> {
        let started = Instant::now();
        let deadline = started
            .checked_add(self.options.run_deadline)
            .unwrap_or_else(|| started + FAR_FUTURE);

        let mut map = self.store.load().await.map_err(DispatchError::Load)?;
        info!(
            store = %self.store.describe(),
            communities = map.communities.len(),
            chats = map.chats().len(),
            "watermarks loaded"
        );

        let mut cooldown = Cooldown::new(self.options.cooldown);
        let mut report = RunReport::default();

        for entry in map.communities.iter_mut() {
            let source = SourceKey::Posts(entry.community_name.clone());
            let outcome = if self.begin_unit(&mut cooldown, deadline).await {
                let outcome = tokio::time::timeout_at(deadline, self.process_posts(entry))
                    .await
                    .unwrap_or_else(|_| deadline_failure());
                cooldown.mark_done();
                outcome
            } else {
                SourceOutcome::Skipped
            };
            log_outcome(&source, &outcome);
            report.push(source, outcome);
        }

        for entry in map.chats_mut().iter_mut() {
            let source = SourceKey::Chat(entry.community_name.clone());
            let outcome = if self.begin_unit(&mut cooldown, deadline).await {
                let outcome = tokio::time::timeout_at(deadline, self.process_chat(entry))
                    .await
                    .unwrap_or_else(|_| deadline_failure());
                cooldown.mark_done();
                outcome
            } else {
                SourceOutcome::Skipped
            };
            log_outcome(&source, &outcome);
            report.push(source, outcome);
        }

        if self.options.persist {
            self.store.save(&map).await.map_err(DispatchError::Save)?;
            report.saved = true;
        } else {
            info!("dry run: watermarks not saved");
        }

        report.elapsed = started.elapsed();
        info!(
            sources = report.sources.len(),
            notified = report.notified(),
            failed = report.failed(),
            skipped = report.skipped(),
            elapsed_ms = report.elapsed.as_millis() as u64,
            "run complete"
        );
        Ok(report)
    }

    /// Wait out the cooldown; false when the deadline leaves no room for
    /// another unit.
    async fn begin_unit(&self, cooldown: &mut Cooldown, deadline: Instant) -> bool {
        match Instant::now().checked_add(cooldown.remaining()) {
            Some(ready) if ready < deadline => {}
            _ => return false,
        }
        cooldown.wait().await;
        true
    }

    async fn process_posts(&self, entry: &mut CommunityWatermark) -> SourceOutcome {
        let community = entry.community_name.as_str();
        let items = match self.feeds.fetch_posts(community).await {
            Ok(items) => items,
            Err(err) => {
                return SourceOutcome::Failed {
                    reason: err.to_string(),
                };
            }
        };

        let from = entry.last_processed_id;
        let fresh = new_posts(&items, from);
        let Some(to) = fresh.last().map(|item| item.id) else {
            return SourceOutcome::Unchanged;
        };

        if self.options.prime_new_sources && from == 0 {
            entry.last_processed_id = to;
            return SourceOutcome::Primed { to };
        }

        let watchers = unique_watchers(&entry.watchers);
        let mut notified = 0;
        for item in &fresh {
            let text = message::new_post(community, item);
            for watcher in &watchers {
                if let Err(err) = self.deliver(watcher, &text).await {
                    return SourceOutcome::Failed {
                        reason: format!("post {} not delivered: {err}", item.id),
                    };
                }
                notified += 1;
            }
        }

        entry.last_processed_id = to;
        SourceOutcome::Advanced { from, to, notified }
    }

    async fn process_chat(&self, entry: &mut ChatWatermark) -> SourceOutcome {
        let community = entry.community_name.as_str();
        let messages = match self.feeds.fetch_chat_messages(community).await {
            Ok(messages) => messages,
            Err(err) => {
                return SourceOutcome::Failed {
                    reason: err.to_string(),
                };
            }
        };

        let from = entry.last_processed_id;
        let previous_status = entry.chat_status;
        let activity = classify_chat_activity(
            &messages,
            from,
            previous_status,
            Utc::now(),
            &self.options.activity,
        );
        debug!(
            community,
            recent = activity.recent_count,
            status = %activity.status,
            latest_id = activity.latest_id,
            "chat classified"
        );

        let became_busy =
            previous_status == ChatStatus::Quiet && activity.status == ChatStatus::Busy;
        let has_new = activity.latest_id > from;

        if !became_busy && !has_new {
            if activity.status != previous_status {
                entry.chat_status = activity.status;
                return SourceOutcome::StatusChanged {
                    from: previous_status,
                    to: activity.status,
                };
            }
            return SourceOutcome::Unchanged;
        }

        if self.options.prime_new_sources && from == 0 {
            entry.last_processed_id = activity.latest_id;
            entry.chat_status = activity.status;
            return SourceOutcome::Primed {
                to: activity.latest_id,
            };
        }

        let text = if became_busy {
            message::chat_busy(
                community,
                activity.recent_count,
                self.options.activity.window_minutes(),
            )
        } else {
            match messages.iter().max_by_key(|m| m.id) {
                Some(newest) => message::chat_new_message(community, newest),
                None => return SourceOutcome::Unchanged,
            }
        };

        let watchers = unique_watchers(&entry.watchers);
        for watcher in &watchers {
            if let Err(err) = self.deliver(watcher, &text).await {
                return SourceOutcome::Failed {
                    reason: format!("chat alert not delivered: {err}"),
                };
            }
        }

        entry.last_processed_id = activity.latest_id;
        entry.chat_status = activity.status;
        if has_new {
            SourceOutcome::Advanced {
                from,
                to: activity.latest_id,
                notified: watchers.len(),
            }
        } else {
            // Became busy on messages already seen (timestamps moved into the window).
            SourceOutcome::StatusChanged {
                from: previous_status,
                to: activity.status,
            }
        }
    }

    /// One delivery, retried up to `notify_retries` times on retryable errors.
    async fn deliver(&self, watcher: &Watcher, text: &str) -> Result<(), NotifyError> {
        let mut backoff = Backoff::new(self.options.retry_backoff, Backoff::DEFAULT_MAX);
        let mut attempt = 0;
        loop {
            match self.notifier.send(watcher.thread_id, text).await {
                Ok(()) => {
                    info!(
                        user_id = watcher.user_id,
                        thread_id = watcher.thread_id,
                        text,
                        "notification sent"
                    );
                    return Ok(());
                }
                Err(err) if attempt < self.options.notify_retries && err.is_retryable() => {
                    attempt += 1;
                    let delay = backoff.next_delay();
                    warn!(
                        thread_id = watcher.thread_id,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %err,
                        "send failed; retrying"
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(err) => {
                    error!(
                        user_id = watcher.user_id,
                        thread_id = watcher.thread_id,
                        error = %err,
                        "notification not delivered"
                    );
                    return Err(err);
                }
            }
        }
    }
}

/// Stand-in deadline when the configured one does not fit in an `Instant`.
const FAR_FUTURE: Duration = Duration::from_secs(30 * 365 * 24 * 60 * 60);

/// Watchers in document order, one per thread.
fn unique_watchers(watchers: &[Watcher]) -> Vec<Watcher> {
    let mut seen = HashSet::new();
    watchers
        .iter()
        .filter(|w| seen.insert(w.thread_id))
        .copied()
        .collect()
}

fn deadline_failure() -> SourceOutcome {
    SourceOutcome::Failed {
        reason: "run deadline exceeded".to_string(),
    }
}

fn log_outcome(source: &SourceKey, outcome: &SourceOutcome) {
    match outcome {
        SourceOutcome::Unchanged => debug!(%source, "no new items"),
        SourceOutcome::Advanced { from, to, notified } => {
            info!(%source, from, to, notified, "watermark advanced")
        }
        SourceOutcome::Primed { to } => info!(%source, to, "new source primed without notifying"),
        SourceOutcome::StatusChanged { from, to } => {
            info!(%source, %from, %to, "chat status changed")
        }
        SourceOutcome::Failed { reason } => {
            warn!(%source, reason, "source failed; watermark held for next run")
        }
        SourceOutcome::Skipped => warn!(%source, "source skipped: run deadline reached"),
    }
}
