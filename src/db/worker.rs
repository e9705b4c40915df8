use std::io;
use std::sync::Weak;
use std::thread::{self, JoinHandle};

use crossbeam_channel::{Receiver, Sender};
use tracing::{debug, error};

use super::DbInner;

/// Message to the maintenance thread.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Job {
    Flush,
    Compact,
    Shutdown,
}

/// Handle to the thread that runs flushes and compactions off the commit
/// path.
///
/// The thread holds only a `Weak` reference to the engine and upgrades it
/// per job, so it never keeps a closed engine alive.
pub(crate) struct Worker {
    sender: Sender<Job>,
    handle: Option<JoinHandle<()>>,
}

impl Worker {
    pub(crate) fn spawn(db: Weak<DbInner>) -> io::Result<Self> {
        let (sender, receiver) = crossbeam_channel::unbounded();
        let handle = thread::Builder::new()
            .name("txkv-maintenance".into())
            .spawn(move || run(receiver, db))?;
        Ok(Worker {
            sender,
            handle: Some(handle),
        })
    }

    /// Queue a job. A stopped worker silently drops it.
    pub(crate) fn schedule(&self, job: Job) {
        let _ = self.sender.send(job);
    }

    /// Ask the thread to exit after its current job and wait for it.
    ///
    /// Called from the maintenance thread itself (it dropped the last engine
    /// reference), the thread is detached instead; it exits on its own once
    /// the channel disconnects.
    pub(crate) fn stop(&mut self) {
        let _ = self.sender.send(Job::Shutdown);
        let Some(handle) = self.handle.take() else {
            return;
        };
        if handle.thread().id() == thread::current().id() {
            return;
        }
        if handle.join().is_err() {
            error!("maintenance thread panicked");
        }
    }
}

fn run(receiver: Receiver<Job>, db: Weak<DbInner>) {
    debug!("maintenance thread started");
    for job in receiver {
        if job == Job::Shutdown {
            break;
        }
        let Some(engine) = db.upgrade() else { break };
        if job == Job::Flush {
            engine.run_flush();
        } else {
            engine.run_compaction();
        }
    }
    debug!("maintenance thread stopped");
}
