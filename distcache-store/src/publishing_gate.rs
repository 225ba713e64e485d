// Copyright 2024 The Distcache Authors. All rights reserved.
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//    http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

use core::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use core::time::Duration;

use distcache_error::{Code, Error, make_err};
use tokio::sync::{Semaphore, SemaphorePermit};
use tokio::time::Instant;
use tracing::{Level, event};

/// Point in time view of a `PublishingGate`.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct GateStats {
    pub limit: usize,
    pub permits_in_use: usize,
    /// Callers currently suspended in `acquire`.
    pub waiting: usize,
    pub acquisitions: u64,
    pub last_wait: Duration,
    pub total_wait: Duration,
}

/// Bounds how many publishes run at once.
#[derive(Debug)]
pub struct PublishingGate {
    semaphore: Semaphore,
    limit: usize,
    waiting: AtomicUsize,
    acquisitions: AtomicU64,
    last_wait_us: AtomicU64,
    total_wait_us: AtomicU64,
}

/// Decrements the waiting count even when `acquire` is dropped mid wait.
struct WaitingGuard<'a>(&'a AtomicUsize);

impl Drop for WaitingGuard<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::AcqRel);
    }
}

fn duration_to_micros(duration: Duration) -> u64 {
    u64::try_from(duration.as_micros()).unwrap_or(u64::MAX)
}

impl PublishingGate {
    pub fn new(limit: usize) -> Self {
        let limit = limit.max(1);
        Self {
            semaphore: Semaphore::new(limit),
            limit,
            waiting: AtomicUsize::new(0),
            acquisitions: AtomicU64::new(0),
            last_wait_us: AtomicU64::new(0),
            total_wait_us: AtomicU64::new(0),
        }
    }

    /// Waits for a free slot. The slot is released when the permit drops.
    pub async fn acquire(&self) -> Result<SemaphorePermit<'_>, Error> {
        let start = Instant::now();
        let queue_depth = self.waiting.fetch_add(1, Ordering::AcqRel) + 1;
        let waiting_guard = WaitingGuard(&self.waiting);
        let permit = self
            .semaphore
            .acquire()
            .await
            .map_err(|e| make_err!(Code::Internal, "Failed to acquire publishing permit: {e}"))?;
        drop(waiting_guard);

        let waited = start.elapsed();
        let waited_us = duration_to_micros(waited);
        self.acquisitions.fetch_add(1, Ordering::AcqRel);
        self.last_wait_us.store(waited_us, Ordering::Release);
        self.total_wait_us.fetch_add(waited_us, Ordering::AcqRel);
        event!(
            Level::DEBUG,
            ?waited,
            queue_depth,
            "Acquired publishing gate"
        );
        Ok(permit)
    }

    pub fn stats(&self) -> GateStats {
        GateStats {
            limit: self.limit,
            permits_in_use: self
                .limit
                .saturating_sub(self.semaphore.available_permits()),
            waiting: self.waiting.load(Ordering::Acquire),
            acquisitions: self.acquisitions.load(Ordering::Acquire),
            last_wait: Duration::from_micros(self.last_wait_us.load(Ordering::Acquire)),
            total_wait: Duration::from_micros(self.total_wait_us.load(Ordering::Acquire)),
        }
    }
}
