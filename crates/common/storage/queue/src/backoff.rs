// Copyright 2025 Crrow
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//      http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

use std::time::Duration;

/// Ceiling for every wait between polls.
pub(crate) const MAX_BACKOFF: Duration = Duration::from_secs(1);

const BACKOFF_STEP: Duration = Duration::from_millis(200);

/// Poll delay for the reader loops.
///
/// Grows by a fixed step while the queue is empty, jumps to the ceiling on
/// errors or unconsumed records, and drops to zero after a consumed record.
#[derive(Debug, Clone, Copy)]
pub(crate) struct Backoff {
    current: Duration,
}

impl Backoff {
    pub const fn new(initial: Duration) -> Self { Self { current: initial } }

    pub const fn current(&self) -> Duration { self.current }

    /// Nothing to read yet.
    pub fn idle(&mut self) {
        if self.current < MAX_BACKOFF {
            self.current = (self.current + BACKOFF_STEP).min(MAX_BACKOFF);
        }
    }

    /// Error or unconsumed record.
    pub const fn pin(&mut self) { self.current = MAX_BACKOFF; }

    /// Record consumed; retry immediately.
    pub const fn reset(&mut self) { self.current = Duration::ZERO; }
}
