use std::fs::{self, File};
use std::path::{Path, PathBuf};
use std::pin::pin;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Result, anyhow};
use async_trait::async_trait;
use fs2::FileExt;
use tracing::{error, info};

use notifybot_config::{AppConfig, StoreBackend};
use notifybot_runtime::{DispatchOptions, Dispatcher};
use notifybot_squabbles::{Notifier, NotifyError, SquabblesClient, SquabblesClientConfig};
use notifybot_store::{FileStore, GistStore, GistStoreConfig, WatermarkStore};

pub(crate) fn runtime_dir() -> PathBuf {
    Path::new(".notifybot").to_path_buf()
}

/// Exclusive per-host lock held for the lifetime of a run (or watch loop).
///
/// Two runs against the same document would each replace it wholesale and
/// one run's progress would be lost.  Dropping the guard releases the lock.
pub(crate) struct RunLock {
    _file: File,
}

impl RunLock {
    pub(crate) fn acquire(dir: &Path) -> Result<Self> {
        fs::create_dir_all(dir)?;
        let path = dir.join("run.lock");
        let file = File::create(&path)?;
        file.try_lock_exclusive().map_err(|_| {
            anyhow!(
                "another notifybot run is in progress (lock held at {})",
                path.display()
            )
        })?;
        Ok(Self { _file: file })
    }
}

pub(crate) fn build_store(config: &AppConfig) -> Result<Arc<dyn WatermarkStore>> {
    let timeout = Duration::from_secs(config.dispatch.request_timeout_secs);
    let store: Arc<dyn WatermarkStore> = match config.store.backend {
        StoreBackend::Gist => Arc::new(GistStore::new(GistStoreConfig {
            api_url: config.store.gist_api_url.clone(),
            gist_id: config.store.gist_id.clone(),
            token: config.store.gist_token.clone(),
            filename: config.store.gist_filename.clone(),
            timeout,
        })?),
        StoreBackend::File => Arc::new(FileStore::new(&config.store.file_path)),
    };
    Ok(store)
}

pub(crate) fn build_dispatcher(config: &AppConfig, dry_run: bool) -> Result<Dispatcher> {
    let store = build_store(config)?;
    let client = Arc::new(SquabblesClient::new(SquabblesClientConfig {
        base_url: config.squabbles.base_url.clone(),
        token: config.squabbles.token.clone(),
        bot_user_id: config.squabbles.bot_user_id,
        timeout: Duration::from_secs(config.dispatch.request_timeout_secs),
    })?);

    let notifier: Arc<dyn Notifier> = if dry_run {
        Arc::new(DryRunNotifier)
    } else {
        client.clone()
    };

    let mut options = DispatchOptions::from(&config.dispatch);
    options.persist = !dry_run;

    Ok(Dispatcher::new(store, client, notifier, options))
}

pub(crate) async fn run_once(config: &AppConfig, dry_run: bool) -> Result<()> {
    config.validate()?;
    let _lock = RunLock::acquire(&runtime_dir())?;
    let dispatcher = build_dispatcher(config, dry_run)?;
    let report = dispatcher.run_once().await?;
    print!("{report}");
    Ok(())
}

/// Repeat runs every `every` until Ctrl-C.  A failed run is logged and the
/// loop carries on; nothing was persisted by it.
pub(crate) async fn watch(config: &AppConfig, every: Duration, dry_run: bool) -> Result<()> {
    config.validate()?;
    let _lock = RunLock::acquire(&runtime_dir())?;
    let dispatcher = &build_dispatcher(config, dry_run)?;

    info!(every_secs = every.as_secs(), "watching");
    repeat_until(every, tokio::signal::ctrl_c(), || async move {
        match dispatcher.run_once().await {
            Ok(report) => print!("{report}"),
            Err(err) => error!(error = %err, "run failed; will retry next tick"),
        }
    })
    .await;
    Ok(())
}

/// Call `run` on every tick of `every` until `stop` resolves.
///
/// `stop` is polled first and lives across iterations, so a stop request
/// that arrives while `run` is in progress ends the loop once it returns.
async fn repeat_until<S, F, Fut>(every: Duration, stop: S, mut run: F)
where
    S: Future,
    F: FnMut() -> Fut,
    Fut: Future<Output = ()>,
{
    let mut stop = pin!(stop);
    let mut ticker = tokio::time::interval(every);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            biased;
            _ = &mut stop => {
                info!("interrupted; stopping");
                return;
            }
            _ = ticker.tick() => run().await,
        }
    }
}

pub(crate) async fn check(config: &AppConfig) -> Result<()> {
    let store = build_store(config)?;
    let map = store.load().await?;
    println!("notifybot check");
    println!("- store: {}", store.describe());
    println!("- sources: {}", map.sources().len());
    println!("- watchers: {}", map.watcher_count());
    for entry in &map.communities {
        println!(
            "  {:<30} last_processed_id={} watchers={}",
            entry.community_name,
            entry.last_processed_id,
            entry.watchers.len()
        );
    }
    for entry in map.chats() {
        println!(
            "  {:<30} last_processed_id={} status={} watchers={}",
            format!("{}:chat", entry.community_name),
            entry.last_processed_id,
            entry.chat_status,
            entry.watchers.len()
        );
    }
    Ok(())
}

/// Logs what would be sent instead of sending it.
struct DryRunNotifier;

#[async_trait]
impl Notifier for DryRunNotifier {
    async fn send(&self, thread_id: i64, message: &str) -> Result<(), NotifyError> {
        info!(thread_id, message, "dry run: message not sent");
        Ok(())
    }
}
