// Copyright 2025 Dustin McAfee
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Rate-bounded periodic work.
//!
//! Both session roles run a background task off this scheduler: the server
//! produces framebuffer updates with it, the client issues incremental
//! update requests. A tick never runs more often than `max_rate` per
//! second, and in signalled mode it additionally waits to be poked via
//! [`UpdateScheduler::signal`]. Ticks are expected to be idempotent; a tick
//! that finds nothing to do simply returns.
//!
//! [`UpdateScheduler::stop`] wakes the task, waits for it to finish, and
//! only then returns, so no tick can run after teardown completes.

use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio::time::{sleep, Instant};

struct Shared {
    signal: Notify,
    exit_notify: Notify,
    exit: AtomicBool,
}

/// Cloneable signalling handle detached from the scheduler's lifetime.
///
/// Signals sent after the scheduler stopped are simply ignored.
#[derive(Clone)]
pub struct SchedulerSignal {
    shared: Arc<Shared>,
}

impl SchedulerSignal {
    /// Equivalent to [`UpdateScheduler::signal`].
    pub fn signal(&self) {
        self.shared.signal.notify_one();
    }
}

/// Handle to a cancellable repeating task.
pub struct UpdateScheduler {
    shared: Arc<Shared>,
    handle: Option<JoinHandle<()>>,
}

impl UpdateScheduler {
    /// Spawns the scheduler task.
    ///
    /// `tick` runs at most `max_rate` times per second; with `use_signal`
    /// set, a tick additionally waits for [`signal`](Self::signal) first. A
    /// tick returning `false` ends the loop.
    pub fn start<F, Fut>(max_rate: u32, use_signal: bool, mut tick: F) -> Self
    where
        F: FnMut() -> Fut + Send + 'static,
        Fut: Future<Output = bool> + Send,
    {
        let period = Duration::from_secs(1) / max_rate.max(1);
        let shared = Arc::new(Shared {
            signal: Notify::new(),
            exit_notify: Notify::new(),
            exit: AtomicBool::new(false),
        });

        let task_shared = Arc::clone(&shared);
        let handle = tokio::spawn(async move {
            loop {
                if use_signal {
                    tokio::select! {
                        _ = task_shared.signal.notified() => {}
                        _ = task_shared.exit_notify.notified() => break,
                    }
                }
                if task_shared.exit.load(Ordering::Acquire) {
                    break;
                }

                let started = Instant::now();
                if !tick().await {
                    break;
                }

                let elapsed = started.elapsed();
                if elapsed < period {
                    tokio::select! {
                        _ = sleep(period - elapsed) => {}
                        _ = task_shared.exit_notify.notified() => break,
                    }
                }
            }
        });

        Self {
            shared,
            handle: Some(handle),
        }
    }

    /// Wakes a signal-waiting scheduler. The wakeup is retained if the task
    /// is mid-tick, so a signal is never lost.
    pub fn signal(&self) {
        self.shared.signal.notify_one();
    }

    /// Returns a cloneable handle that can signal this scheduler after the
    /// scheduler itself has been moved elsewhere.
    pub fn signal_handle(&self) -> SchedulerSignal {
        SchedulerSignal {
            shared: Arc::clone(&self.shared),
        }
    }

    /// Stops the task and waits for it to finish.
    pub async fn stop(mut self) {
        self.shared.exit.store(true, Ordering::Release);
        self.shared.exit_notify.notify_waiters();
        self.shared.signal.notify_one();
        if let Some(handle) = self.handle.take() {
            let _ = handle.await;
        }
    }
}
