//! Background control loops: the auto-tuner and the evictor
//!
//! Each registered pool gets at most one tuner and one evictor task. Both
//! share a single stop channel, so one stop signal quiesces the pool's
//! background work; stopping re-arms a fresh channel so a later start finds a
//! live signal. The tasks hold only a weak handle to the registry and exit on
//! their own once the registry is dropped.

use std::sync::Weak;
use std::time::Duration;

use tokio::runtime::Handle;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::manager::{ManagerInner, PoolAble};

/// Stop signal plus task handles for one pool's background loops.
pub(crate) struct LoopHandles {
    stop_tx: watch::Sender<bool>,
    tuner: Option<JoinHandle<()>>,
    evictor: Option<JoinHandle<()>>,
}

impl LoopHandles {
    pub fn new() -> Self {
        let (stop_tx, _) = watch::channel(false);
        Self {
            stop_tx,
            tuner: None,
            evictor: None,
        }
    }

    pub fn subscribe(&self) -> watch::Receiver<bool> {
        self.stop_tx.subscribe()
    }

    pub fn tuner_running(&self) -> bool {
        self.tuner.as_ref().is_some_and(|task| !task.is_finished())
    }

    pub fn evictor_running(&self) -> bool {
        self.evictor
            .as_ref()
            .is_some_and(|task| !task.is_finished())
    }

    pub fn any_running(&self) -> bool {
        self.tuner_running() || self.evictor_running()
    }

    pub fn set_tuner(&mut self, task: Option<JoinHandle<()>>) {
        self.tuner = task;
    }

    pub fn set_evictor(&mut self, task: Option<JoinHandle<()>>) {
        self.evictor = task;
    }

    /// Signals both loops to stop and re-arms a fresh channel for the next
    /// start. Safe to call when nothing is running.
    pub fn stop(&mut self) {
        let _ = self.stop_tx.send(true);
        let (stop_tx, _) = watch::channel(false);
        self.stop_tx = stop_tx;
        self.tuner = None;
        self.evictor = None;
    }
}

pub(crate) fn spawn_tuner<T: PoolAble>(
    inner: Weak<ManagerInner<T>>,
    pool: String,
    interval: Duration,
    stop: watch::Receiver<bool>,
) -> Option<JoinHandle<()>> {
    spawn_loop("auto-tune", pool, interval, stop, move |name| {
        match inner.upgrade() {
            Some(inner) => {
                inner.auto_tune_pool(name);
                true
            }
            None => false,
        }
    })
}

pub(crate) fn spawn_evictor<T: PoolAble>(
    inner: Weak<ManagerInner<T>>,
    pool: String,
    interval: Duration,
    stop: watch::Receiver<bool>,
) -> Option<JoinHandle<()>> {
    spawn_loop("eviction", pool, interval, stop, move |name| {
        match inner.upgrade() {
            Some(inner) => {
                inner.run_eviction_sweep(name);
                true
            }
            None => false,
        }
    })
}

/// Ticks `tick` every `interval` until the stop signal fires or `tick`
/// reports that the registry is gone.
fn spawn_loop(
    label: &'static str,
    pool: String,
    interval: Duration,
    mut stop: watch::Receiver<bool>,
    tick: impl FnMut(&str) -> bool + Send + 'static,
) -> Option<JoinHandle<()>> {
    let Ok(runtime) = Handle::try_current() else {
        warn!(pool = %pool, label, "no tokio runtime available, background loop not started");
        return None;
    };
    let mut tick = tick;
    Some(runtime.spawn(async move {
        let start = tokio::time::Instant::now() + interval;
        let mut ticker = tokio::time::interval_at(start, interval);
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    // A stop signal may race the tick; honor it first.
                    if *stop.borrow() || !tick(&pool) {
                        break;
                    }
                }
                changed = stop.changed() => {
                    if changed.is_err() || *stop.borrow() {
                        break;
                    }
                }
            }
        }
        debug!(pool = %pool, label, "background loop stopped");
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stop_is_idempotent_without_running_loops() {
        let mut handles = LoopHandles::new();
        assert!(!handles.any_running());
        handles.stop();
        handles.stop();
        assert!(!handles.any_running());
    }

    #[test]
    fn stop_rearms_a_fresh_channel() {
        let mut handles = LoopHandles::new();
        let old_receiver = handles.subscribe();
        handles.stop();
        let new_receiver = handles.subscribe();
        assert!(*old_receiver.borrow());
        assert!(!*new_receiver.borrow());
    }

    #[tokio::test]
    async fn loop_exits_on_stop_signal() {
        let mut handles = LoopHandles::new();
        let task = spawn_loop(
            "test",
            "p".to_string(),
            Duration::from_millis(5),
            handles.subscribe(),
            |_| true,
        )
        .unwrap();
        handles.stop();
        tokio::time::timeout(Duration::from_secs(1), task)
            .await
            .expect("loop should stop promptly")
            .unwrap();
    }

    #[tokio::test]
    async fn loop_exits_when_tick_reports_a_dead_registry() {
        let handles = LoopHandles::new();
        let task = spawn_loop(
            "test",
            "p".to_string(),
            Duration::from_millis(5),
            handles.subscribe(),
            |_| false,
        )
        .unwrap();
        tokio::time::timeout(Duration::from_secs(1), task)
            .await
            .expect("loop should stop after first tick")
            .unwrap();
    }
}
