//! Background loop that drives [`Session::tick`] for hosts.
//!
//! The loop ticks at a fixed period, turns each tick report into
//! [`SessionEvent`]s and sends them on a channel. A tick is skipped when the
//! session is locked elsewhere.

use std::sync::{Arc, Mutex, TryLockError};
use std::time::Duration;

use seq_engine::NativeEngine;
use seq_project::AutosaveStore;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use crate::session::Session;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    /// The playing step changed; -1 means stopped.
    Step(i32),
    SelectionChanged,
    Autosaved,
    AutosaveFailed(String),
}

/// Aborts the loop when dropped.
pub struct PollHandle {
    task: JoinHandle<()>,
}

impl PollHandle {
    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }
}

impl Drop for PollHandle {
    fn drop(&mut self) {
        self.task.abort();
    }
}

/// Start the loop on the current tokio runtime. It ends when the receiver is
/// dropped or the handle is.
pub fn spawn_poll_loop<E, S>(
    session: Arc<Mutex<Session<E, S>>>,
    period: Duration,
    events: mpsc::UnboundedSender<SessionEvent>,
) -> PollHandle
where
    E: NativeEngine + Send + 'static,
    S: AutosaveStore + Send + 'static,
{
    let task = tokio::spawn(async move {
        let mut interval = tokio::time::interval(period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            interval.tick().await;

            for event in poll_once(&session) {
                if events.send(event).is_err() {
                    log::debug!("poll loop receiver closed");
                    return;
                }
            }
        }
    });
    PollHandle { task }
}

// The guard must not live across an await, so locking stays in a sync fn.
fn poll_once<E, S>(session: &Mutex<Session<E, S>>) -> Vec<SessionEvent>
where
    E: NativeEngine,
    S: AutosaveStore,
{
    let mut session = match session.try_lock() {
        Ok(session) => session,
        Err(TryLockError::WouldBlock) => return Vec::new(),
        Err(TryLockError::Poisoned(poisoned)) => {
            log::warn!("session lock poisoned, continuing");
            poisoned.into_inner()
        }
    };

    let report = session.tick(tokio::time::Instant::now().into_std());
    let mut events = Vec::new();
    if let Some(step) = report.step {
        events.push(SessionEvent::Step(step));
    }
    if report.selection_changed {
        events.push(SessionEvent::SelectionChanged);
    }
    match report.autosave {
        Some(Ok(())) => events.push(SessionEvent::Autosaved),
        Some(Err(err)) => events.push(SessionEvent::AutosaveFailed(err.to_string())),
        None => {}
    }
    events
}
