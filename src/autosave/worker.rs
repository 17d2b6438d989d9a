//! Background autosave thread.

use super::Debounce;
use crate::error::Result;
use crate::project::{Project, SaveOutcome};
use crate::subscriptions::{ProjectEvent, SubscriptionFilter, SubscriptionHandle};
use crossbeam_channel::{bounded, select, Receiver, Sender};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Instant;
use tracing::{debug, info, warn};

/// Saves the project once it has been quiet for the configured delay.
///
/// Failed saves are logged and not retried; the next change schedules a
/// new attempt. Stopping (or dropping) the worker flushes a pending save.
pub struct Autosave {
    stop: Sender<()>,
    thread: Option<JoinHandle<()>>,
}

impl Autosave {
    pub fn spawn(project: Arc<Project>) -> Result<Self> {
        let (stop, stopped) = bounded(1);
        let subscription = project.subscribe(SubscriptionFilter::changes());

        let thread = thread::Builder::new()
            .name("koma-autosave".to_string())
            .spawn(move || run(project, subscription, stopped))?;

        Ok(Self {
            stop,
            thread: Some(thread),
        })
    }

    /// Flush a pending save and join the worker.
    pub fn stop(mut self) {
        self.shutdown();
    }

    fn shutdown(&mut self) {
        let _ = self.stop.try_send(());
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                warn!("autosave worker panicked");
            }
        }
    }
}

impl Drop for Autosave {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn run(project: Arc<Project>, mut subscription: SubscriptionHandle, stopped: Receiver<()>) {
    let mut pending = Debounce::new(project.config().autosave_delay);
    let idle = project.config().storage_estimate_delay;
    debug!(delay = ?pending.delay(), "autosave started");

    loop {
        let now = Instant::now();
        if pending.take_due(now) {
            save(&project);
        }
        if let Err(e) = project.poll_storage_estimate(now) {
            debug!(error = %e, "could not refresh storage estimate");
        }

        let timeout = pending.remaining(Instant::now()).unwrap_or(idle);

        select! {
            recv(subscription.receiver) -> event => match event {
                Ok(ProjectEvent::Changed { revision, .. }) => {
                    debug!(revision, "change observed, rescheduling autosave");
                    pending.schedule(Instant::now());
                }
                Ok(ProjectEvent::Dropped { reason }) => {
                    warn!(?reason, "autosave subscription dropped, resubscribing");
                    subscription = project.subscribe(SubscriptionFilter::changes());
                    pending.schedule(Instant::now());
                }
                Ok(_) => {}
                Err(_) => {
                    warn!("autosave subscription disconnected, resubscribing");
                    subscription = project.subscribe(SubscriptionFilter::changes());
                    pending.schedule(Instant::now());
                }
            },
            recv(stopped) -> _ => {
                if pending.is_pending() {
                    info!("flushing pending autosave");
                    save(&project);
                }
                break;
            }
            default(timeout) => {}
        }
    }

    project.unsubscribe(subscription.id);
    debug!("autosave stopped");
}

fn save(project: &Project) {
    match project.save() {
        Ok(SaveOutcome::Saved(report)) => {
            debug!(revision = report.revision, passes = report.passes, "autosaved");
        }
        Ok(outcome) => debug!(?outcome, "autosave did not run"),
        Err(e) => warn!(error = %e, "autosave failed"),
    }
}
