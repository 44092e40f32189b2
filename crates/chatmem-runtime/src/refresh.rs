//! Periodic maintenance of the active memory file.

use std::time::Duration;

use chatmem_types::MemoryCommand;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{MissedTickBehavior, interval};
use tracing::{debug, info, warn};

use crate::dispatcher::Dispatcher;

/// Session id the background refresh dispatches under.  Kept separate so it
/// never disturbs a conversation's pending confirmation.
pub const REFRESH_SESSION: &str = "background-refresh";

/// Run `refresh_memory` every `period` until `shutdown` flips to `true` (or
/// its sender is dropped).
///
/// The first refresh happens one full period after spawning.  A zero period
/// disables refreshing: the task only waits for shutdown.
pub fn spawn_refresh_task(
    dispatcher: Dispatcher,
    period: Duration,
    mut shutdown: watch::Receiver<bool>,
) -> JoinHandle<()> {
    if period.is_zero() {
        warn!("refresh period is zero; periodic refresh disabled");
        return tokio::spawn(async move { wait_for_shutdown(&mut shutdown).await });
    }
    tokio::spawn(async move {
        let mut ticker = interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // The first tick completes immediately.
        ticker.tick().await;

        info!(period_secs = period.as_secs(), "memory refresh task started");
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let reply = dispatcher
                        .dispatch(REFRESH_SESSION, MemoryCommand::RefreshMemory {})
                        .await;
                    debug!(status = ?reply.status, "{}", reply.message);
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }
        info!("memory refresh task stopped");
    })
}

async fn wait_for_shutdown(shutdown: &mut watch::Receiver<bool>) {
    while !*shutdown.borrow_and_update() {
        if shutdown.changed().await.is_err() {
            break;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use chatmem_middleware::StatusBus;
    use chatmem_store::MemoryStore;
    use chatmem_types::StatusKind;

    use crate::dispatcher::DispatchConfig;

    #[tokio::test]
    async fn refreshes_until_shut_down() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(MemoryStore::open(dir.path(), "chat_memory.db").unwrap());
        let dispatcher = Dispatcher::new(store, StatusBus::default(), DispatchConfig::default());
        let mut events = dispatcher.bus().subscribe_session(REFRESH_SESSION);

        let (stop, stop_rx) = watch::channel(false);
        let handle = spawn_refresh_task(dispatcher, Duration::from_millis(20), stop_rx);

        let finished = loop {
            let event = events.recv().await.unwrap();
            if event.done {
                break event;
            }
        };
        assert_eq!(finished.status, StatusKind::Refresh);

        stop.send(true).unwrap();
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn zero_period_never_refreshes() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(MemoryStore::open(dir.path(), "chat_memory.db").unwrap());
        let dispatcher = Dispatcher::new(store, StatusBus::default(), DispatchConfig::default());
        let mut events = dispatcher.bus().subscribe_session(REFRESH_SESSION);

        let (stop, stop_rx) = watch::channel(false);
        let handle = spawn_refresh_task(dispatcher.clone(), Duration::ZERO, stop_rx);

        let quiet = tokio::time::timeout(Duration::from_millis(200), events.recv()).await;
        assert!(quiet.is_err(), "no refresh may run with a zero period");
        assert!(!handle.is_finished());

        stop.send(true).unwrap();
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn dropping_the_sender_stops_the_task() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(MemoryStore::open(dir.path(), "chat_memory.db").unwrap());
        let dispatcher = Dispatcher::new(store, StatusBus::default(), DispatchConfig::default());

        let (stop, stop_rx) = watch::channel(false);
        let handle = spawn_refresh_task(dispatcher, Duration::from_secs(3600), stop_rx);
        drop(stop);
        handle.await.unwrap();
    }
}
