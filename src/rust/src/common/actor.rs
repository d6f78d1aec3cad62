//
// Copyright 2024 FieldRTC Contributors
// SPDX-License-Identifier: AGPL-3.0-only
//

//! A minimal actor: state owned by one thread, mutated by queued closures.
//!
//! All session logic runs as `FnOnce(&mut State)` jobs on the actor
//! thread, so the state machine itself is single-threaded and
//! non-blocking.  `send_delayed` provides the timer primitive; a
//! [`Stopper`] shuts down every actor registered with it.

use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crate::common::Result;
use crate::error::FieldRtcError;

type Job<State> = Box<dyn FnOnce(&mut State) + Send>;

enum Message<State> {
    Run(Job<State>),
    RunDelayed(Instant, Job<State>),
    Stop,
}

/// Handle to an actor thread.  Cheap to clone; sends after shutdown are
/// silently dropped.
pub struct Actor<State> {
    sender: Sender<Message<State>>,
    stopper: Stopper,
}

impl<State> Clone for Actor<State> {
    fn clone(&self) -> Self {
        Self {
            sender: self.sender.clone(),
            stopper: self.stopper.clone(),
        }
    }
}

impl<State: 'static> Actor<State> {
    /// Spawns the actor thread and constructs the state on it.  `init`
    /// receives a handle to the actor so the state can schedule jobs for
    /// itself; if it fails, the failure is returned here and no actor is
    /// registered.
    pub fn start(
        name: &'static str,
        stopper: Stopper,
        init: impl FnOnce(Actor<State>) -> Result<State> + Send + 'static,
    ) -> Result<Actor<State>> {
        let (sender, receiver) = mpsc::channel();
        let actor = Actor {
            sender,
            stopper: stopper.clone(),
        };
        let actor_for_thread = actor.clone();
        let (init_sender, init_receiver) = mpsc::channel();
        let handle = thread::Builder::new().name(name.to_string()).spawn(
            move || match init(actor_for_thread) {
                Ok(state) => {
                    let _ = init_sender.send(Ok(()));
                    Self::run(receiver, state);
                }
                Err(e) => {
                    let _ = init_sender.send(Err(e));
                }
            },
        )?;

        match init_receiver.recv() {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                let _ = handle.join();
                return Err(e);
            }
            Err(_) => {
                let _ = handle.join();
                return Err(FieldRtcError::RegisterActor.into());
            }
        }

        let stop_sender = actor.sender.clone();
        stopper.register(
            Box::new(move || {
                let _ = stop_sender.send(Message::Stop);
            }),
            handle,
        );
        Ok(actor)
    }

    fn run(receiver: Receiver<Message<State>>, mut state: State) {
        let mut delayed: Vec<(Instant, Job<State>)> = Vec::new();
        loop {
            // Run everything that has come due.
            let now = Instant::now();
            let mut i = 0;
            while i < delayed.len() {
                if delayed[i].0 <= now {
                    let (_, job) = delayed.swap_remove(i);
                    job(&mut state);
                } else {
                    i += 1;
                }
            }

            let next_due = delayed.iter().map(|(due, _)| *due).min();
            let message = match next_due {
                Some(due) => {
                    let now = Instant::now();
                    if due <= now {
                        continue;
                    }
                    match receiver.recv_timeout(due - now) {
                        Ok(message) => message,
                        Err(RecvTimeoutError::Timeout) => continue,
                        Err(RecvTimeoutError::Disconnected) => return,
                    }
                }
                None => match receiver.recv() {
                    Ok(message) => message,
                    Err(_) => return,
                },
            };

            match message {
                Message::Run(job) => job(&mut state),
                Message::RunDelayed(due, job) => delayed.push((due, job)),
                Message::Stop => return,
            }
        }
    }

    /// Queues a job for the actor thread.
    pub fn send(&self, run: impl FnOnce(&mut State) + Send + 'static) {
        let _ = self.sender.send(Message::Run(Box::new(run)));
    }

    /// Queues a job to run no earlier than `delay` from now.
    pub fn send_delayed(&self, delay: Duration, run: impl FnOnce(&mut State) + Send + 'static) {
        let _ = self
            .sender
            .send(Message::RunDelayed(Instant::now() + delay, Box::new(run)));
    }

    pub fn stopper(&self) -> &Stopper {
        &self.stopper
    }

    /// Requests shutdown of this actor only.  Pending delayed jobs are
    /// discarded.
    pub fn stop(&self) {
        let _ = self.sender.send(Message::Stop);
    }
}

#[derive(Default)]
struct StopperInner {
    stop_fns: Vec<Box<dyn FnOnce() + Send>>,
    handles: Vec<JoinHandle<()>>,
}

/// Shuts down every actor registered with it.
#[derive(Clone, Default)]
pub struct Stopper {
    inner: Arc<Mutex<StopperInner>>,
}

impl Stopper {
    pub fn new() -> Self {
        Default::default()
    }

    fn lock(&self) -> MutexGuard<'_, StopperInner> {
        match self.inner.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn register(&self, stop: Box<dyn FnOnce() + Send>, handle: JoinHandle<()>) {
        let mut inner = self.lock();
        inner.stop_fns.push(stop);
        inner.handles.push(handle);
    }

    /// Stops all registered actors and joins their threads.  Must not be
    /// called from an actor thread; use [`Stopper::stop_all_without_joining`]
    /// there.
    pub fn stop_all_and_join(&self) {
        for handle in self.stop_all_without_joining() {
            if handle.join().is_err() {
                warn!("actor thread panicked during join");
            }
        }
    }

    /// Stops all registered actors and hands back the join handles.
    pub fn stop_all_without_joining(&self) -> Vec<JoinHandle<()>> {
        let (stop_fns, handles) = {
            let mut inner = self.lock();
            (
                std::mem::take(&mut inner.stop_fns),
                std::mem::take(&mut inner.handles),
            )
        };
        for stop in stop_fns {
            stop();
        }
        handles
    }
}
