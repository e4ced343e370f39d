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

//! File queue facade.
//!
//! The [`FileQueue`] pairs one [`Pusher`] and one [`Popper`] over the same
//! directories. The two share nothing but the segment files on disk, so a
//! producer-only or consumer-only process can use either half on its own via
//! [`QueueBuilder::build_pusher`](crate::QueueBuilder::build_pusher) and
//! [`QueueBuilder::build_popper`](crate::QueueBuilder::build_popper).
//!
//! ## Usage
//!
//! ```ignore
//! let queue = QueueBuilder::new("/path/to/segments", "logic")
//!     .conf_dir("/path/to/conf")
//!     .max_segment_mb(64)
//!     .build()?;
//!
//! queue.push("hello")?;
//! let record = queue.pop(); // blocks until a record or close
//!
//! queue.close()?;
//! ```

use std::sync::Arc;

use bytes::Bytes;
use tracing::info;

use crate::{
    QueueConfig, Result,
    logger::Logger,
    path::scan_segments,
    popper::{PopOutcome, Popper},
    pusher::Pusher,
    split::SplitFn,
};

/// A disk-backed FIFO queue: one writer, one reader.
pub struct FileQueue {
    config: QueueConfig,
    pusher: Pusher,
    popper: Popper,
}

impl FileQueue {
    /// Opens the pusher first so the initial segment exists before the
    /// popper looks for it.
    pub(crate) fn new(
        config: QueueConfig,
        split: SplitFn,
        logger: Arc<dyn Logger>,
    ) -> Result<Self> {
        let pusher = Pusher::open(&config, Arc::clone(&logger))?;
        let popper = Popper::open(&config, split, logger)?;

        info!(
            conf_dir = ?config.effective_conf_dir(),
            segment_dir = ?config.segment_dir,
            prefix = %config.prefix,
            "File queue initialized"
        );

        Ok(Self {
            config,
            pusher,
            popper,
        })
    }

    /// See [`Pusher::push`].
    ///
    /// # Errors
    ///
    /// Returns an error if the pusher is closed or the record contains the
    /// segment-end marker.
    pub fn push(&self, data: impl Into<Bytes>) -> Result<()> { self.pusher.push(data) }

    /// Blocks until a record is available and consumes it. Returns `None`
    /// once the popper is closed.
    pub fn pop(&self) -> Option<Bytes> { self.popper.pop_front_block() }

    /// See [`Popper::pop_to_handler`]. The handler must not call back into
    /// this queue.
    ///
    /// # Errors
    ///
    /// Returns an error if the consumption thread cannot be spawned.
    pub fn pop_to_handler<F>(&self, handler: F) -> Result<()>
    where
        F: FnMut(&[u8]) -> PopOutcome + Send + 'static,
    {
        self.popper.pop_to_handler(handler)
    }

    /// # Errors
    ///
    /// Returns an error if the writer thread panicked.
    pub fn close_pusher(&self) -> Result<()> { self.pusher.close() }

    /// # Errors
    ///
    /// Returns an error if the reader checkpoint cannot be flushed.
    pub fn close_popper(&self) -> Result<()> { self.popper.close() }

    /// Closes the pusher (draining accepted records) and then the popper.
    /// Both are attempted; the first error is returned.
    ///
    /// # Errors
    ///
    /// See [`close_pusher`](Self::close_pusher) and
    /// [`close_popper`](Self::close_popper).
    pub fn close(&self) -> Result<()> {
        let pushed = self.pusher.close();
        let popped = self.popper.close();
        pushed.and(popped)
    }

    /// Blocks until the writer thread and every consumption thread have
    /// exited.
    pub fn wait(&self) {
        self.pusher.wait();
        self.popper.wait();
    }

    #[must_use]
    pub const fn pusher(&self) -> &Pusher { &self.pusher }

    #[must_use]
    pub const fn popper(&self) -> &Popper { &self.popper }

    #[must_use]
    pub fn config(&self) -> &QueueConfig { &self.config }

    /// Indices of the segment files currently on disk, ascending.
    ///
    /// # Errors
    ///
    /// Returns an error if the segment directory cannot be listed.
    pub fn segment_indices(&self) -> Result<Vec<u64>> {
        scan_segments(&self.config.segment_dir, &self.config.prefix)
    }
}
