//! Background polling of a shared tree.
//!
//! The engine owns one tokio task. Each tick it takes the tree's lock for
//! exactly one refresh pass, so the UI (which renders and acts under the same
//! lock) never observes a half-updated node.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{Mutex, mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::error::{Error, Result};
use crate::tree::ServiceTree;

pub const DEFAULT_INTERVAL: Duration = Duration::from_millis(1_000);
pub const DEFAULT_FOLLOWUP: Duration = Duration::from_millis(50);

/// Something that can be brought up to date and say whether it changed.
#[async_trait]
pub trait Refresh: Send {
    async fn refresh(&mut self) -> Result<bool>;
}

#[async_trait]
impl Refresh for ServiceTree {
    async fn refresh(&mut self) -> Result<bool> {
        ServiceTree::refresh(self).await
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RefreshSettings {
    /// Wait between ticks when nothing changed.
    pub interval: Duration,
    /// Shorter wait after a tick that changed something, so quick
    /// transitions (activating -> active) show up promptly.
    pub followup: Duration,
}

impl Default for RefreshSettings {
    fn default() -> Self {
        Self {
            interval: DEFAULT_INTERVAL,
            followup: DEFAULT_FOLLOWUP,
        }
    }
}

/// Notifications for the consumer.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RefreshEvent {
    /// The tree changed; redraw.
    Redraw,
    /// A tick failed. The loop keeps going; the consumer decides whether the
    /// error is fatal.
    Failed(Error),
}

pub struct RefreshEngine {
    stop_tx: watch::Sender<bool>,
    handle: Option<JoinHandle<()>>,
}

impl RefreshEngine {
    /// Start polling `target` on the current tokio runtime.
    pub fn spawn<T>(
        target: Arc<Mutex<T>>,
        settings: RefreshSettings,
        events: mpsc::UnboundedSender<RefreshEvent>,
    ) -> Self
    where
        T: Refresh + 'static,
    {
        let (stop_tx, stop_rx) = watch::channel(false);
        let handle = tokio::spawn(run(target, settings, events, stop_rx));
        Self {
            stop_tx,
            handle: Some(handle),
        }
    }

    /// Ask the loop to stop. Wakes a pending wait immediately; a tick already
    /// in progress completes first. Calling this more than once is harmless.
    pub fn stop(&self) {
        self.stop_tx.send_replace(true);
    }

    pub fn is_stopped(&self) -> bool {
        *self.stop_tx.borrow()
    }

    /// Stop and wait for the loop to exit.
    pub async fn shutdown(mut self) {
        self.stop();
        if let Some(handle) = self.handle.take() {
            if let Err(e) = handle.await {
                warn!(error = %e, "refresh task ended abnormally");
            }
        }
    }
}

impl Drop for RefreshEngine {
    fn drop(&mut self) {
        self.stop();
    }
}

async fn run<T: Refresh>(
    target: Arc<Mutex<T>>,
    settings: RefreshSettings,
    events: mpsc::UnboundedSender<RefreshEvent>,
    mut stop_rx: watch::Receiver<bool>,
) {
    let mut ticks: u64 = 0;
    loop {
        if *stop_rx.borrow() {
            break;
        }
        ticks += 1;

        let outcome = {
            let mut target = target.lock().await;
            target.refresh().await
        };
        let (event, delay) = match outcome {
            Ok(true) => (Some(RefreshEvent::Redraw), settings.followup),
            Ok(false) => (None, settings.interval),
            Err(e) => {
                warn!(error = %e, tick = ticks, "refresh failed");
                (Some(RefreshEvent::Failed(e)), settings.interval)
            }
        };
        if let Some(event) = event {
            if events.send(event).is_err() {
                debug!("refresh consumer went away");
                break;
            }
        }

        tokio::select! {
            changed = stop_rx.changed() => {
                if changed.is_err() {
                    break;
                }
            }
            _ = tokio::time::sleep(delay) => {}
        }
    }
    debug!(ticks, "refresh loop stopped");
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;

    use tokio::time::Instant;

    use super::*;
    use crate::client::UnitClient;
    use crate::fake::FakeManager;
    use crate::model::{ActiveState, RelationKind};

    #[derive(Default)]
    struct Scripted {
        outcomes: VecDeque<Result<bool>>,
        ticks: Vec<Instant>,
    }

    impl Scripted {
        fn new(outcomes: impl IntoIterator<Item = Result<bool>>) -> Arc<Mutex<Self>> {
            Arc::new(Mutex::new(Self {
                outcomes: outcomes.into_iter().collect(),
                ticks: Vec::new(),
            }))
        }
    }

    #[async_trait]
    impl Refresh for Scripted {
        async fn refresh(&mut self) -> Result<bool> {
            self.ticks.push(Instant::now());
            self.outcomes.pop_front().unwrap_or(Ok(false))
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_change_triggers_redraw_and_short_followup() {
        let target = Scripted::new([Ok(true), Ok(false)]);
        let (tx, mut rx) = mpsc::unbounded_channel();
        let engine = RefreshEngine::spawn(target.clone(), RefreshSettings::default(), tx);

        assert_eq!(rx.recv().await, Some(RefreshEvent::Redraw));
        tokio::time::sleep(Duration::from_millis(2_500)).await;
        engine.shutdown().await;

        let ticks = target.lock().await.ticks.clone();
        assert!(ticks.len() >= 3, "only {} ticks", ticks.len());
        assert_eq!(ticks[1] - ticks[0], DEFAULT_FOLLOWUP);
        assert_eq!(ticks[2] - ticks[1], DEFAULT_INTERVAL);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failure_is_reported_and_retried() {
        let target = Scripted::new([Err(Error::Protocol("boom".into())), Ok(true)]);
        let (tx, mut rx) = mpsc::unbounded_channel();
        let engine = RefreshEngine::spawn(target.clone(), RefreshSettings::default(), tx);

        assert_eq!(
            rx.recv().await,
            Some(RefreshEvent::Failed(Error::Protocol("boom".into())))
        );
        assert_eq!(rx.recv().await, Some(RefreshEvent::Redraw));
        engine.shutdown().await;

        let ticks = target.lock().await.ticks.clone();
        assert_eq!(ticks[1] - ticks[0], DEFAULT_INTERVAL);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_wakes_the_wait_and_is_idempotent() {
        let target = Scripted::new([Ok(true)]);
        let (tx, mut rx) = mpsc::unbounded_channel();
        let settings = RefreshSettings {
            interval: Duration::from_secs(3_600),
            followup: Duration::from_secs(3_600),
        };
        let engine = RefreshEngine::spawn(target.clone(), settings, tx);
        assert_eq!(rx.recv().await, Some(RefreshEvent::Redraw));

        engine.stop();
        engine.stop();
        assert!(engine.is_stopped());
        let joined = tokio::time::timeout(Duration::from_millis(10), engine.shutdown()).await;
        assert!(joined.is_ok(), "engine did not stop within the wait");
        assert_eq!(target.lock().await.ticks.len(), 1);
        assert_eq!(rx.recv().await, None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_loop_ends_when_consumer_is_gone() {
        let target = Scripted::new([Ok(true)]);
        let (tx, rx) = mpsc::unbounded_channel();
        drop(rx);
        let engine = RefreshEngine::spawn(target.clone(), RefreshSettings::default(), tx);

        let joined = tokio::time::timeout(Duration::from_secs(10), engine.shutdown()).await;
        assert!(joined.is_ok());
        assert_eq!(target.lock().await.ticks.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_drives_a_real_tree() {
        let manager = Arc::new(FakeManager::new());
        manager.add_unit("app.target", "active", 10);
        manager.add_unit("web.service", "inactive", 20);
        manager.link("app.target", RelationKind::RequiredBy, &["web.service"]);
        let tree = ServiceTree::build(
            UnitClient::new(manager.clone()),
            "app.target",
            RelationKind::RequiredBy,
            1,
        )
        .await
        .unwrap();
        let tree = Arc::new(Mutex::new(tree));

        let (tx, mut rx) = mpsc::unbounded_channel();
        let engine = RefreshEngine::spawn(tree.clone(), RefreshSettings::default(), tx);

        manager.set_state("web.service", "active", 30);
        assert_eq!(rx.recv().await, Some(RefreshEvent::Redraw));
        {
            let tree = tree.lock().await;
            assert_eq!(tree.find("web.service").unwrap().state, ActiveState::Active);
        }

        manager.remove_unit("web.service");
        match rx.recv().await {
            Some(RefreshEvent::Failed(e)) => assert!(e.to_string().contains("web.service")),
            other => panic!("unexpected event {:?}", other),
        }
        engine.shutdown().await;
    }
}
