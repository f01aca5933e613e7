// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Timed event service.
//!
//! One background thread owns a deadline queue and fires re-armable
//! [`TimedEvent`] callbacks. Lease timers and the announcement scheduler
//! share this thread, so the engine never spawns one thread per remote
//! participant.

use crossbeam_channel::{unbounded, Receiver, RecvTimeoutError, Sender};
use parking_lot::{Condvar, Mutex};
use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, Weak};
use std::thread::{self, JoinHandle, ThreadId};
use std::time::{Duration, Instant};

/// Control messages delivered to the service thread.
enum Control {
    Schedule(Scheduled),
    Shutdown,
}

/// One pending firing of an event.
///
/// The epoch invalidates stale queue entries: every restart or cancel bumps
/// the event's epoch, so entries scheduled before the change are skipped
/// when they surface.
struct Scheduled {
    deadline: Instant,
    epoch: u64,
    core: Weak<EventCore>,
}

impl PartialEq for Scheduled {
    fn eq(&self, other: &Self) -> bool {
        self.deadline == other.deadline && self.epoch == other.epoch
    }
}

impl Eq for Scheduled {}

impl PartialOrd for Scheduled {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Scheduled {
    // Reversed: BinaryHeap is a max-heap, we want the earliest deadline on top.
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .deadline
            .cmp(&self.deadline)
            .then_with(|| other.epoch.cmp(&self.epoch))
    }
}

struct EventState {
    interval: Duration,
    active: bool,
    executing: bool,
    epoch: u64,
}

struct EventCore {
    state: Mutex<EventState>,
    idle: Condvar,
    callback: Box<dyn Fn() -> bool + Send + Sync>,
}

struct ServiceShared {
    thread_id: Mutex<Option<ThreadId>>,
}

/// Timer thread driving all [`TimedEvent`]s of one engine.
///
/// Dropping the service shuts the thread down and joins it.
pub struct EventService {
    tx: Sender<Control>,
    shared: Arc<ServiceShared>,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl EventService {
    /// Spawn the service thread.
    pub fn start() -> std::io::Result<Self> {
        let (tx, rx) = unbounded();
        let shared = Arc::new(ServiceShared {
            thread_id: Mutex::new(None),
        });

        let handle = thread::Builder::new()
            .name("hdds-pdp-events".to_string())
            .spawn(move || service_loop(&rx))?;
        *shared.thread_id.lock() = Some(handle.thread().id());

        Ok(Self {
            tx,
            shared,
            handle: Mutex::new(Some(handle)),
        })
    }
}

impl Drop for EventService {
    fn drop(&mut self) {
        let _ = self.tx.send(Control::Shutdown);
        if let Some(handle) = self.handle.lock().take() {
            let _ = handle.join();
        }
    }
}

/// Main loop (runs in the service thread).
fn service_loop(rx: &Receiver<Control>) {
    let mut queue: BinaryHeap<Scheduled> = BinaryHeap::new();

    loop {
        let message = match queue.peek() {
            Some(next) => {
                let timeout = next.deadline.saturating_duration_since(Instant::now());
                match rx.recv_timeout(timeout) {
                    Ok(message) => Some(message),
                    Err(RecvTimeoutError::Timeout) => None,
                    Err(RecvTimeoutError::Disconnected) => break,
                }
            }
            None => match rx.recv() {
                Ok(message) => Some(message),
                Err(_) => break,
            },
        };

        match message {
            Some(Control::Schedule(entry)) => queue.push(entry),
            Some(Control::Shutdown) => break,
            None => {}
        }

        fire_due_events(&mut queue);
    }
}

fn fire_due_events(queue: &mut BinaryHeap<Scheduled>) {
    loop {
        match queue.peek() {
            Some(next) if next.deadline <= Instant::now() => {}
            _ => break,
        }
        let entry = match queue.pop() {
            Some(entry) => entry,
            None => break,
        };
        let core = match entry.core.upgrade() {
            Some(core) => core,
            None => continue, // event handle dropped, stale entry
        };

        {
            let mut state = core.state.lock();
            if !state.active || state.epoch != entry.epoch {
                continue;
            }
            state.executing = true;
        }

        let restart = match catch_unwind(AssertUnwindSafe(|| (core.callback)())) {
            Ok(restart) => restart,
            Err(_) => {
                log::error!("[events] Timer callback panicked; event disarmed");
                false
            }
        };

        let mut state = core.state.lock();
        state.executing = false;
        // The callback may have restarted or cancelled the event itself;
        // both bump the epoch, in which case the auto-re-arm is skipped.
        if restart && state.active && state.epoch == entry.epoch {
            queue.push(Scheduled {
                deadline: Instant::now() + state.interval,
                epoch: state.epoch,
                core: entry.core.clone(),
            });
        }
        core.idle.notify_all();
    }
}

/// Re-armable timer handle.
///
/// The callback returns `true` to auto-re-arm at the current interval,
/// `false` to stay idle until the next explicit `restart_timer`. Dropping
/// the handle cancels the event; a callback in flight completes first
/// (join semantics), except when the drop happens on the service thread
/// itself, where waiting would self-deadlock.
pub struct TimedEvent {
    core: Arc<EventCore>,
    tx: Sender<Control>,
    shared: Arc<ServiceShared>,
}

impl TimedEvent {
    pub fn new<F>(service: &EventService, interval: Duration, callback: F) -> Self
    where
        F: Fn() -> bool + Send + Sync + 'static,
    {
        Self {
            core: Arc::new(EventCore {
                state: Mutex::new(EventState {
                    interval,
                    active: false,
                    executing: false,
                    epoch: 0,
                }),
                idle: Condvar::new(),
                callback: Box::new(callback),
            }),
            tx: service.tx.clone(),
            shared: Arc::clone(&service.shared),
        }
    }

    /// Set the firing interval without (re)scheduling.
    pub fn update_interval(&self, interval: Duration) {
        self.core.state.lock().interval = interval;
    }

    #[must_use]
    pub fn interval(&self) -> Duration {
        self.core.state.lock().interval
    }

    /// Arm the event to fire `interval` from now. Supersedes any pending
    /// firing.
    pub fn restart_timer(&self) {
        let (deadline, epoch) = {
            let mut state = self.core.state.lock();
            state.active = true;
            state.epoch += 1;
            (Instant::now() + state.interval, state.epoch)
        };
        let entry = Scheduled {
            deadline,
            epoch,
            core: Arc::downgrade(&self.core),
        };
        if self.tx.send(Control::Schedule(entry)).is_err() {
            log::debug!("[events] Event service stopped; restart ignored");
        }
    }

    /// Disarm the event. Blocks until an in-flight callback finishes,
    /// unless called from within that callback.
    pub fn cancel_timer(&self) {
        let mut state = self.core.state.lock();
        state.active = false;
        state.epoch += 1;
        if state.executing && !self.on_service_thread() {
            while state.executing {
                self.core.idle.wait(&mut state);
            }
        }
    }

    fn on_service_thread(&self) -> bool {
        let id = self.shared.thread_id.lock();
        matches!(*id, Some(tid) if tid == thread::current().id())
    }
}

impl Drop for TimedEvent {
    fn drop(&mut self) {
        self.cancel_timer();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering as AtomicOrdering};

    #[test]
    fn test_event_fires_once_without_restart() {
        let service = EventService::start().expect("event service should start");
        let fired = Arc::new(AtomicU32::new(0));
        let fired_clone = Arc::clone(&fired);

        let event = TimedEvent::new(&service, Duration::from_millis(10), move || {
            fired_clone.fetch_add(1, AtomicOrdering::Relaxed);
            false
        });
        event.restart_timer();

        thread::sleep(Duration::from_millis(100));
        assert_eq!(fired.load(AtomicOrdering::Relaxed), 1);
    }

    #[test]
    fn test_event_auto_rearm() {
        let service = EventService::start().expect("event service should start");
        let fired = Arc::new(AtomicU32::new(0));
        let fired_clone = Arc::clone(&fired);

        let event = TimedEvent::new(&service, Duration::from_millis(10), move || {
            fired_clone.fetch_add(1, AtomicOrdering::Relaxed);
            true
        });
        event.restart_timer();

        thread::sleep(Duration::from_millis(120));
        event.cancel_timer();
        let count = fired.load(AtomicOrdering::Relaxed);
        assert!(count >= 3, "expected several firings, got {}", count);

        // No further firings after cancel.
        thread::sleep(Duration::from_millis(50));
        assert_eq!(fired.load(AtomicOrdering::Relaxed), count);
    }

    #[test]
    fn test_cancel_before_fire() {
        let service = EventService::start().expect("event service should start");
        let fired = Arc::new(AtomicU32::new(0));
        let fired_clone = Arc::clone(&fired);

        let event = TimedEvent::new(&service, Duration::from_millis(50), move || {
            fired_clone.fetch_add(1, AtomicOrdering::Relaxed);
            true
        });
        event.restart_timer();
        event.cancel_timer();

        thread::sleep(Duration::from_millis(120));
        assert_eq!(fired.load(AtomicOrdering::Relaxed), 0);
    }

    #[test]
    fn test_restart_supersedes_pending() {
        let service = EventService::start().expect("event service should start");
        let fired = Arc::new(AtomicU32::new(0));
        let fired_clone = Arc::clone(&fired);

        let event = TimedEvent::new(&service, Duration::from_millis(30), move || {
            fired_clone.fetch_add(1, AtomicOrdering::Relaxed);
            false
        });
        event.restart_timer();
        thread::sleep(Duration::from_millis(10));
        // Restart pushes the deadline out; the original entry must not fire.
        event.restart_timer();
        thread::sleep(Duration::from_millis(15));
        assert_eq!(fired.load(AtomicOrdering::Relaxed), 0);

        thread::sleep(Duration::from_millis(60));
        assert_eq!(fired.load(AtomicOrdering::Relaxed), 1);
    }

    #[test]
    fn test_event_rearms_itself_from_callback() {
        let service = EventService::start().expect("event service should start");
        let fired = Arc::new(AtomicU32::new(0));
        let fired_clone = Arc::clone(&fired);

        // The lease pattern: one-shot event whose callback re-arms it.
        let event = Arc::new(Mutex::new(None::<TimedEvent>));
        let event_clone = Arc::clone(&event);
        let timed = TimedEvent::new(&service, Duration::from_millis(10), move || {
            let count = fired_clone.fetch_add(1, AtomicOrdering::Relaxed);
            if count < 2 {
                if let Some(inner) = event_clone.lock().as_ref() {
                    inner.restart_timer();
                }
            }
            false
        });
        timed.restart_timer();
        *event.lock() = Some(timed);

        thread::sleep(Duration::from_millis(150));
        assert_eq!(fired.load(AtomicOrdering::Relaxed), 3);
        let inner = event.lock().take();
        drop(inner); // cancel outside the slot lock
    }

    #[test]
    fn test_service_shutdown_joins() {
        let service = EventService::start().expect("event service should start");
        let event = TimedEvent::new(&service, Duration::from_millis(5), || true);
        event.restart_timer();
        thread::sleep(Duration::from_millis(20));
        drop(event);
        drop(service); // must not hang
    }
}
