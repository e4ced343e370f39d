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

//! Writer handle (pusher) for producing to the queue.
//!
//! The [`Pusher`] accepts records into a bounded channel and returns
//! immediately; a dedicated thread running the segment writer appends them
//! to disk in the order they were accepted. A full channel blocks `push`,
//! which is the queue's backpressure.

use std::{
    sync::{
        Arc, Mutex, PoisonError, RwLock,
        atomic::{AtomicBool, AtomicU64, Ordering},
    },
    thread::{self, JoinHandle},
};

use bytes::Bytes;
use crossbeam::channel::{Receiver, Sender, bounded};
use snafu::{OptionExt, ResultExt, ensure};
use tracing::info;

use crate::{
    QueueConfig, Result,
    config::SEGMENT_END_MARKER,
    error::{ClosedSnafu, MarkerInPayloadSnafu, SpawnWorkerSnafu, WorkerPanickedSnafu},
    logger::Logger,
    segment_writer::SegmentWriter,
};

const WORKER_NAME: &str = "filequeue-pusher";

/// Producer side of a file queue.
///
/// `push` is safe to call from many threads; records from one thread keep
/// their relative order.
pub struct Pusher {
    /// Ingress channel. Taken on close so the writer drains and exits.
    tx:     RwLock<Option<Sender<Bytes>>>,
    closed: AtomicBool,
    /// Segment index currently written, updated by the writer thread.
    index:  Arc<AtomicU64>,
    worker: Mutex<Option<JoinHandle<()>>>,
    /// Disconnects when the writer thread exits.
    done:   Receiver<()>,
}

impl Pusher {
    /// Loads the writer checkpoint, opens the current segment and starts the
    /// writer thread.
    pub(crate) fn open(config: &QueueConfig, logger: Arc<dyn Logger>) -> Result<Self> {
        let (tx, rx) = bounded(config.push_capacity);
        let index = Arc::new(AtomicU64::new(0));
        let mut writer = SegmentWriter::open(config, rx, index.clone(), logger)?;

        let (done_tx, done) = bounded::<()>(0);
        let worker = thread::Builder::new()
            .name(WORKER_NAME.into())
            .spawn(move || {
                let _done = done_tx;
                writer.run();
            })
            .context(SpawnWorkerSnafu { name: WORKER_NAME })?;

        info!(
            segment_dir = ?config.segment_dir,
            prefix = %config.prefix,
            index = index.load(Ordering::Acquire),
            "Pusher opened"
        );

        Ok(Self {
            tx: RwLock::new(Some(tx)),
            closed: AtomicBool::new(false),
            index,
            worker: Mutex::new(Some(worker)),
            done,
        })
    }

    /// Enqueue a record for writing.
    ///
    /// Blocks while the ingress channel is full. Returns once the record is
    /// accepted, before it reaches disk.
    ///
    /// # Errors
    ///
    /// Returns [`QueueError::Closed`](crate::QueueError::Closed) after
    /// [`close`](Self::close), and
    /// [`QueueError::MarkerInPayload`](crate::QueueError::MarkerInPayload) if
    /// the record contains the reserved segment-end byte.
    pub fn push(&self, data: impl Into<Bytes>) -> Result<()> {
        let data = data.into();
        ensure!(!data.contains(&SEGMENT_END_MARKER), MarkerInPayloadSnafu);
        ensure!(!self.closed.load(Ordering::Acquire), ClosedSnafu);

        let guard = self.tx.read().unwrap_or_else(PoisonError::into_inner);
        let tx = guard.as_ref().context(ClosedSnafu)?;
        ensure!(tx.send(data).is_ok(), ClosedSnafu);

        Ok(())
    }

    /// Index of the segment currently being written.
    #[must_use]
    pub fn current_index(&self) -> u64 { self.index.load(Ordering::Acquire) }

    #[must_use]
    pub fn is_closed(&self) -> bool { self.closed.load(Ordering::Acquire) }

    /// Stop accepting records, write everything already accepted, then
    /// release the segment and checkpoint files. Idempotent.
    ///
    /// # Errors
    ///
    /// Returns an error if the writer thread panicked.
    pub fn close(&self) -> Result<()> {
        if !self.closed.swap(true, Ordering::AcqRel) {
            info!(index = self.current_index(), "Closing pusher");
        }

        self.tx
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .take();

        let worker = self
            .worker
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(worker) = worker {
            worker
                .join()
                .map_err(|_| WorkerPanickedSnafu { name: WORKER_NAME }.build())?;
        }

        self.wait();
        Ok(())
    }

    /// Block until the writer thread has exited. Only returns after
    /// [`close`](Self::close) has been called somewhere.
    pub fn wait(&self) { let _ = self.done.recv(); }
}

impl Drop for Pusher {
    fn drop(&mut self) {
        if let Err(e) = self.close() {
            tracing::error!(error = %e, "Failed to close pusher");
        }
    }
}
