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

//! Reader (popper) for consuming from the queue.
//!
//! The [`Popper`] keeps a resident buffer of bytes read from the current
//! segment and scans it with the configured [`SplitFn`]. Consumption is two
//! steps:
//!
//! 1. [`front`](Popper::front) returns the next record without consuming it.
//!    The result is memoized until discarded.
//! 2. [`discard_front`](Popper::discard_front) drops that record from the
//!    buffer and persists the new `(index, offset)` checkpoint.
//!
//! ## Segment boundaries
//!
//! When the scan reaches [`SEGMENT_END_MARKER`](crate::SEGMENT_END_MARKER),
//! the popper waits for `<prefix>.<index + 1>` to exist, then opens it,
//! checkpoints `(index + 1, 0)` and, if configured, deletes the segment it
//! left. The writer creates the next segment as part of rotating, so
//! existence is the only signal needed.
//!
//! ## Background consumption
//!
//! [`pop_to_handler`](Popper::pop_to_handler) runs a callback on a dedicated
//! thread. The callback runs under the state lock, so no other caller can
//! observe the same record concurrently, and the callback itself must not
//! call back into the popper.

use std::{
    any::Any,
    fs::File,
    io::{self, Read, Seek, SeekFrom},
    panic::{self, AssertUnwindSafe},
    path::PathBuf,
    sync::{
        Arc, Mutex, MutexGuard, PoisonError,
        atomic::{AtomicBool, Ordering},
    },
    thread,
    time::Duration,
};

use bytes::Bytes;
use crossbeam::channel::{Receiver, Sender, TryRecvError, bounded};
use snafu::{ResultExt, ensure};
use tracing::{debug, info};

use crate::{
    QueueConfig, QueueError, Result,
    backoff::Backoff,
    checkpoint::CheckpointStore,
    error::{ClosedSnafu, IoSnafu, SpawnWorkerSnafu},
    logger::Logger,
    path::{pop_checkpoint_path, segment_path},
    split::{Split, SplitFn},
};

/// Bytes pulled from the segment file per read.
const READ_CHUNK_SIZE: usize = 4096;

const WORKER_NAME: &str = "filequeue-popper";

/// What a [`Popper::pop_to_handler`] callback did with a record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PopOutcome {
    /// The record was handled and should be discarded.
    pub consumed: bool,
    /// Stop the consumption thread and close the popper after this record.
    pub stop:     bool,
}

impl PopOutcome {
    /// Record handled; keep going.
    #[must_use]
    pub const fn consumed() -> Self {
        Self {
            consumed: true,
            stop:     false,
        }
    }

    /// Record not handled; offer it again after a backoff.
    #[must_use]
    pub const fn retry() -> Self {
        Self {
            consumed: false,
            stop:     false,
        }
    }

    /// Same outcome, but stop consuming afterwards.
    #[must_use]
    pub const fn and_stop(self) -> Self {
        Self {
            consumed: self.consumed,
            stop:     true,
        }
    }
}

/// Mutable read state, guarded by the popper's mutex.
struct ReadState {
    /// Persists `(index, offset)`.
    checkpoint:      CheckpointStore,
    /// Segment being read.
    index:           u64,
    /// Bytes of the current segment consumed and discarded.
    offset:          u64,
    segment_dir:     PathBuf,
    prefix:          String,
    separator:       Vec<u8>,
    delete_consumed: bool,
    split:           SplitFn,
    /// Read handle on `<prefix>.<index>`, positioned after `buffer`.
    file:            Option<File>,
    chunk:           Box<[u8]>,
    /// Bytes from `offset` onwards not yet discarded.
    buffer:          Vec<u8>,
    /// Next position handed to the split function.
    scan:            usize,
    /// Pending record occupies `buffer[..record_end]`.
    record_end:      usize,
    /// Bytes to drop when the pending record is discarded.
    next_start:      usize,
    /// A record was found and not yet discarded.
    pending:         bool,
    /// The marker was seen; the rest of this segment is meaningless.
    end_of_segment:  bool,
    logger:          Arc<dyn Logger>,
}

impl ReadState {
    fn open(config: &QueueConfig, split: SplitFn, logger: Arc<dyn Logger>) -> Result<Self> {
        let mut checkpoint =
            CheckpointStore::new(pop_checkpoint_path(config.effective_conf_dir(), &config.prefix))?;
        let values = checkpoint.load_or_init(&[0, 0])?;

        Ok(Self {
            checkpoint,
            index: values[0],
            offset: values[1],
            segment_dir: config.segment_dir.clone(),
            prefix: config.prefix.clone(),
            separator: config.effective_separator(),
            delete_consumed: config.delete_consumed,
            split,
            file: None,
            chunk: vec![0; READ_CHUNK_SIZE].into_boxed_slice(),
            buffer: Vec::with_capacity(READ_CHUNK_SIZE),
            scan: 0,
            record_end: 0,
            next_start: 0,
            pending: false,
            end_of_segment: false,
            logger,
        })
    }

    fn segment_path(&self, index: u64) -> PathBuf {
        segment_path(&self.segment_dir, &self.prefix, index)
    }

    fn pending_record(&self) -> Bytes { Bytes::copy_from_slice(&self.buffer[..self.record_end]) }

    /// Returns the next record without consuming it. `Ok(None)` means no
    /// complete record is available yet.
    fn front(&mut self) -> Result<Option<Bytes>> {
        if self.pending {
            return Ok(Some(self.pending_record()));
        }
        loop {
            if self.scan_buffer() {
                return Ok(Some(self.pending_record()));
            }
            if self.read()? == 0 {
                return Ok(None);
            }
        }
    }

    /// Runs the split function over unscanned bytes. Returns true once a
    /// record boundary is found.
    fn scan_buffer(&mut self) -> bool {
        while self.scan < self.buffer.len() && !self.end_of_segment {
            match (self.split)(&self.buffer, self.scan, &self.separator) {
                Split::Record { end, next_start }
                    if end <= next_start
                        && self.scan < next_start
                        && next_start <= self.buffer.len() =>
                {
                    self.record_end = end;
                    self.next_start = next_start;
                    self.pending = true;
                    return true;
                }
                Split::EndOfSegment => self.end_of_segment = true,
                Split::Record { .. } | Split::NoMatch => self.scan += 1,
            }
        }
        false
    }

    /// Drops the pending record and checkpoints the new offset.
    fn discard_front(&mut self) -> Result<bool> {
        if !self.pending {
            return Ok(false);
        }
        self.pending = false;
        self.scan = 0;
        self.buffer.drain(..self.next_start);
        self.offset += self.next_start as u64;
        self.checkpoint.save(&[self.index, self.offset])?;
        Ok(true)
    }

    /// Appends the next chunk of the segment to the buffer, crossing into the
    /// next segment first if the marker was seen. Returns the bytes read;
    /// zero means nothing new is available.
    fn read(&mut self) -> Result<usize> {
        if self.end_of_segment {
            if !self.segment_path(self.index + 1).exists() {
                return Ok(0);
            }
            self.open_next()?;
        } else if !self.ensure_open(false)? {
            return Ok(0);
        }

        match self.read_chunk() {
            Ok(n) => Ok(n),
            Err(e) => {
                debug!(index = self.index, error = ?e, "Segment read failed, reopening");
                if !self.ensure_open(true)? {
                    return Ok(0);
                }
                let path = self.segment_path(self.index);
                self.read_chunk().context(IoSnafu { path })
            }
        }
    }

    fn read_chunk(&mut self) -> io::Result<usize> {
        let Some(file) = self.file.as_mut() else {
            return Ok(0);
        };
        let n = loop {
            match file.read(&mut self.chunk) {
                Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
                result => break result?,
            }
        };
        self.buffer.extend_from_slice(&self.chunk[..n]);
        Ok(n)
    }

    /// Opens the current segment at the checkpointed offset. Returns false if
    /// the writer has not created it yet.
    fn ensure_open(&mut self, force: bool) -> Result<bool> {
        if self.file.is_some() && !force {
            return Ok(true);
        }
        self.file = None;

        let path = self.segment_path(self.index);
        match File::open(&path) {
            Ok(file) => {
                self.set_file(file)?;
                Ok(true)
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e).context(IoSnafu { path }),
        }
    }

    fn open_next(&mut self) -> Result<()> {
        let previous = self.index;
        let next = previous + 1;
        let path = self.segment_path(next);

        let file = File::open(&path).context(IoSnafu { path: &path })?;
        self.checkpoint.save(&[next, 0])?;
        self.index = next;
        self.offset = 0;
        self.file = None;

        if self.delete_consumed {
            let consumed = self.segment_path(previous);
            match std::fs::remove_file(&consumed) {
                Ok(()) => debug!(path = ?consumed, "Deleted consumed segment"),
                Err(e) if e.kind() == io::ErrorKind::NotFound => {}
                Err(e) => self.logger.error(format_args!(
                    "popper failed to delete consumed segment {}: {e}",
                    consumed.display()
                )),
            }
        }

        self.set_file(file)?;
        debug!(from = previous, to = next, "Advanced to next segment");
        Ok(())
    }

    /// Installs `file` seeked to the checkpointed offset and resets the
    /// buffer, which always mirrors the file from that offset.
    fn set_file(&mut self, mut file: File) -> Result<()> {
        file.seek(SeekFrom::Start(self.offset)).context(IoSnafu {
            path: self.segment_path(self.index),
        })?;
        self.file = Some(file);
        self.buffer.clear();
        self.scan = 0;
        self.record_end = 0;
        self.next_start = 0;
        self.pending = false;
        self.end_of_segment = false;
        Ok(())
    }

    fn close(&mut self) -> Result<()> {
        self.file = None;
        self.checkpoint.close()
    }
}

/// State shared between the popper handle and its consumption threads.
struct Shared {
    state:       Mutex<ReadState>,
    closed:      AtomicBool,
    /// Dropped on close; its disconnection wakes sleeping poll loops.
    shutdown_tx: Mutex<Option<Sender<()>>>,
    shutdown_rx: Receiver<()>,
    logger:      Arc<dyn Logger>,
}

impl Shared {
    fn lock_state(&self) -> MutexGuard<'_, ReadState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn is_closed(&self) -> bool { self.closed.load(Ordering::Acquire) }

    /// Sleeps for `interval`, returning early once the popper is closed.
    fn sleep(&self, interval: Duration) {
        if !interval.is_zero() {
            let _ = self.shutdown_rx.recv_timeout(interval);
        }
    }

    fn discard(&self, state: &mut ReadState) -> bool {
        match state.discard_front() {
            Ok(discarded) => discarded,
            Err(e) => {
                self.logger.error(format_args!(
                    "popper failed to checkpoint discarded record: {e}"
                ));
                true
            }
        }
    }

    fn consume<F>(&self, mut handler: F)
    where
        F: FnMut(&[u8]) -> PopOutcome,
    {
        let mut backoff = Backoff::new(Duration::ZERO);

        while !self.is_closed() {
            {
                let mut state = self.lock_state();
                match state.front() {
                    Ok(Some(record)) => {
                        let outcome = panic::catch_unwind(AssertUnwindSafe(|| handler(&record)))
                            .unwrap_or_else(|payload| {
                                self.logger.error(format_args!(
                                    "pop handler panicked: {}, data: {}",
                                    panic_message(payload.as_ref()),
                                    String::from_utf8_lossy(&record)
                                ));
                                PopOutcome::retry()
                            });

                        if outcome.stop {
                            self.closed.store(true, Ordering::Release);
                        }
                        if outcome.consumed {
                            self.discard(&mut state);
                            backoff.reset();
                        } else {
                            backoff.pin();
                        }
                    }
                    Ok(None) => backoff.idle(),
                    Err(e) => {
                        backoff.pin();
                        self.logger.error(format_args!("pop handler read failed: {e}"));
                    }
                }
            }

            if !self.is_closed() {
                self.sleep(backoff.current());
            }
        }

        debug!("Pop handler stopped");
    }
}

/// Drops the receivers of consumption threads that have exited.
fn prune_finished(workers: &mut Vec<Receiver<()>>) {
    workers.retain(|done| !matches!(done.try_recv(), Err(TryRecvError::Disconnected)));
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    payload
        .downcast_ref::<&str>()
        .copied()
        .or_else(|| payload.downcast_ref::<String>().map(String::as_str))
        .unwrap_or("non-string panic payload")
}

/// Consumer side of a file queue.
///
/// All methods take `&self`; read state sits behind a mutex so the popper
/// can be shared between threads.
pub struct Popper {
    shared:  Arc<Shared>,
    /// One receiver per consumption thread; each disconnects when its
    /// thread exits.
    workers: Mutex<Vec<Receiver<()>>>,
}

impl Popper {
    /// Loads the reader checkpoint, `(0, 0)` when absent. The segment itself
    /// is opened on the first read.
    pub(crate) fn open(
        config: &QueueConfig,
        split: SplitFn,
        logger: Arc<dyn Logger>,
    ) -> Result<Self> {
        let state = ReadState::open(config, split, Arc::clone(&logger))?;
        let (shutdown_tx, shutdown_rx) = bounded(0);

        info!(
            segment_dir = ?config.segment_dir,
            prefix = %config.prefix,
            index = state.index,
            offset = state.offset,
            "Popper opened"
        );

        Ok(Self {
            shared:  Arc::new(Shared {
                state: Mutex::new(state),
                closed: AtomicBool::new(false),
                shutdown_tx: Mutex::new(Some(shutdown_tx)),
                shutdown_rx,
                logger,
            }),
            workers: Mutex::new(Vec::new()),
        })
    }

    /// Returns the next record without consuming it.
    ///
    /// Repeated calls return the same record until
    /// [`discard_front`](Self::discard_front). `Ok(None)` means the writer
    /// has not produced a complete record yet.
    ///
    /// # Errors
    ///
    /// Returns an error if the popper is closed or a segment cannot be read.
    pub fn front(&self) -> Result<Option<Bytes>> {
        ensure!(!self.shared.is_closed(), ClosedSnafu);
        self.shared.lock_state().front()
    }

    /// Consumes the record last returned by [`front`](Self::front).
    ///
    /// Returns false, without touching the checkpoint, when there is no
    /// such record.
    pub fn discard_front(&self) -> bool {
        if self.shared.is_closed() {
            return false;
        }
        let mut state = self.shared.lock_state();
        self.shared.discard(&mut state)
    }

    /// [`front`](Self::front) and [`discard_front`](Self::discard_front)
    /// under a single lock.
    ///
    /// # Errors
    ///
    /// Returns an error if the popper is closed or a segment cannot be read.
    pub fn pop_front(&self) -> Result<Option<Bytes>> {
        ensure!(!self.shared.is_closed(), ClosedSnafu);
        let mut state = self.shared.lock_state();
        let record = state.front()?;
        if record.is_some() {
            self.shared.discard(&mut state);
        }
        Ok(record)
    }

    /// Polls [`pop_front`](Self::pop_front) until a record arrives or the
    /// popper is closed. Returns `None` only in the latter case.
    pub fn pop_front_block(&self) -> Option<Bytes> {
        let mut backoff = Backoff::new(Duration::from_millis(1));

        while !self.shared.is_closed() {
            match self.pop_front() {
                Ok(Some(record)) => return Some(record),
                Ok(None) => backoff.idle(),
                Err(QueueError::Closed { .. }) => break,
                Err(e) => {
                    backoff.pin();
                    self.shared
                        .logger
                        .error(format_args!("popper blocking pop failed: {e}"));
                }
            }
            self.shared.sleep(backoff.current());
        }

        None
    }

    /// Starts a thread feeding records to `handler` until the popper is
    /// closed or the handler asks to stop.
    ///
    /// A consumed record is discarded and the next one is offered right
    /// away. An unconsumed record is offered again after a second. A
    /// panicking handler is logged and treated as not consumed.
    ///
    /// The handler runs while the read state is locked. It must not call
    /// back into this popper (or the queue owning it): `front`, `pop_*` and
    /// `discard_front` would block on that lock, and `close`/`wait` would
    /// wait for the handler's own thread. Return
    /// [`and_stop`](PopOutcome::and_stop) to end consumption instead.
    ///
    /// # Errors
    ///
    /// Returns an error if the thread cannot be spawned.
    pub fn pop_to_handler<F>(&self, handler: F) -> Result<()>
    where
        F: FnMut(&[u8]) -> PopOutcome + Send + 'static,
    {
        let shared = Arc::clone(&self.shared);
        let (done_tx, done_rx) = bounded::<()>(0);

        thread::Builder::new()
            .name(WORKER_NAME.into())
            .spawn(move || {
                let _done = done_tx;
                shared.consume(handler);
            })
            .context(SpawnWorkerSnafu { name: WORKER_NAME })?;

        let mut workers = self.workers.lock().unwrap_or_else(PoisonError::into_inner);
        prune_finished(&mut workers);
        workers.push(done_rx);
        Ok(())
    }

    /// Segment index currently being read.
    #[must_use]
    pub fn current_index(&self) -> u64 { self.shared.lock_state().index }

    /// Bytes of the current segment consumed so far.
    #[must_use]
    pub fn offset(&self) -> u64 { self.shared.lock_state().offset }

    #[must_use]
    pub fn is_closed(&self) -> bool { self.shared.is_closed() }

    /// Stops consumption threads and blocked pops, waits for the threads to
    /// exit, then releases the segment and checkpoint files. Idempotent.
    ///
    /// # Errors
    ///
    /// Returns an error if the checkpoint cannot be flushed.
    pub fn close(&self) -> Result<()> {
        if !self.shared.closed.swap(true, Ordering::AcqRel) {
            info!("Closing popper");
        }
        self.shared
            .shutdown_tx
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();

        self.wait();
        self.shared.lock_state().close()
    }

    /// Block until every consumption thread has exited.
    pub fn wait(&self) {
        let workers = self
            .workers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        for done in workers {
            let _ = done.recv();
        }
        prune_finished(&mut self.workers.lock().unwrap_or_else(PoisonError::into_inner));
    }
}

impl Drop for Popper {
    fn drop(&mut self) {
        if let Err(e) = self.close() {
            tracing::error!(error = %e, "Failed to close popper");
        }
    }
}

#[cfg(test)]
mod tests {
    use std::{fs::OpenOptions, io::Write, sync::atomic::AtomicUsize};

    use tempfile::TempDir;

    use super::*;
    use crate::{
        config::SEGMENT_END_MARKER,
        logger::{NoopLogger, tests::RecordingLogger},
        split::default_split_fn,
    };

    struct PopperFixture {
        temp_dir: TempDir,
        config:   QueueConfig,
    }

    impl PopperFixture {
        fn new() -> Self {
            let temp_dir = TempDir::new().unwrap();
            let config = QueueConfig {
                conf_dir: temp_dir.path().join("conf"),
                segment_dir: temp_dir.path().join("seg"),
                prefix: "logic".to_string(),
                ..Default::default()
            };
            std::fs::create_dir_all(&config.segment_dir).unwrap();
            Self { temp_dir, config }
        }

        fn write_segment(&self, index: u64, data: &[u8]) {
            std::fs::write(segment_path(&self.config.segment_dir, "logic", index), data).unwrap();
        }

        fn segment_exists(&self, index: u64) -> bool {
            segment_path(&self.config.segment_dir, "logic", index).exists()
        }

        fn pop_checkpoint(&self) -> String {
            std::fs::read_to_string(self.temp_dir.path().join("conf").join("logic_pop.fq"))
                .unwrap()
        }

        fn popper(&self) -> Popper {
            Popper::open(&self.config, default_split_fn(), Arc::new(NoopLogger)).unwrap()
        }
    }

    fn sealed(data: &[u8]) -> Vec<u8> {
        let mut sealed = data.to_vec();
        sealed.push(SEGMENT_END_MARKER);
        sealed
    }

    #[test]
    fn test_missing_segment_is_not_ready() {
        let fixture = PopperFixture::new();
        let popper = fixture.popper();
        assert!(popper.front().unwrap().is_none());
        assert_eq!(fixture.pop_checkpoint(), "0,0");
    }

    #[test]
    fn test_front_is_memoized_until_discard() {
        let fixture = PopperFixture::new();
        fixture.write_segment(0, b"first\nsecond\n");
        let popper = fixture.popper();

        assert_eq!(popper.front().unwrap().unwrap(), "first");
        assert_eq!(popper.front().unwrap().unwrap(), "first");
        assert!(popper.discard_front());
        assert_eq!(fixture.pop_checkpoint(), "0,6");
        assert_eq!(popper.front().unwrap().unwrap(), "second");
    }

    #[test]
    fn test_discard_without_front() {
        let fixture = PopperFixture::new();
        fixture.write_segment(0, b"only\n");
        let popper = fixture.popper();

        assert!(!popper.discard_front());
        assert_eq!(popper.offset(), 0);

        popper.front().unwrap();
        assert!(popper.discard_front());
        assert!(!popper.discard_front());
        assert_eq!(popper.offset(), 5);
        assert_eq!(fixture.pop_checkpoint(), "0,5");
    }

    #[test]
    fn test_incomplete_record_waits() {
        let fixture = PopperFixture::new();
        fixture.write_segment(0, b"partial");
        let popper = fixture.popper();
        assert!(popper.pop_front().unwrap().is_none());

        fixture.write_segment(0, b"partial record\n");
        assert_eq!(popper.pop_front().unwrap().unwrap(), "partial record");
    }

    #[test]
    fn test_crlf_records() {
        let fixture = PopperFixture::new();
        fixture.write_segment(0, b"a\r\nb\n");
        let popper = fixture.popper();
        assert_eq!(popper.pop_front().unwrap().unwrap(), "a");
        assert_eq!(popper.pop_front().unwrap().unwrap(), "b");
        assert_eq!(popper.offset(), 5);
    }

    #[test]
    fn test_record_larger_than_chunk() {
        let fixture = PopperFixture::new();
        let big = vec![b'z'; READ_CHUNK_SIZE * 3 + 17];
        let mut data = big.clone();
        data.push(b'\n');
        fixture.write_segment(0, &data);

        let popper = fixture.popper();
        assert_eq!(popper.pop_front().unwrap().unwrap().as_ref(), big.as_slice());
    }

    #[test]
    fn test_crosses_segment_when_next_exists() {
        let fixture = PopperFixture::new();
        fixture.write_segment(0, &sealed(b"a\n"));
        let popper = fixture.popper();

        assert_eq!(popper.pop_front().unwrap().unwrap(), "a");
        assert!(popper.pop_front().unwrap().is_none());
        assert_eq!(popper.current_index(), 0);

        fixture.write_segment(1, b"b\n");
        assert_eq!(popper.pop_front().unwrap().unwrap(), "b");
        assert_eq!(popper.current_index(), 1);
        assert_eq!(fixture.pop_checkpoint(), "1,2");
        assert!(fixture.segment_exists(0));
    }

    #[test]
    fn test_deletes_consumed_segment() {
        let mut fixture = PopperFixture::new();
        fixture.config.delete_consumed = true;
        fixture.write_segment(0, &sealed(b"a\n"));
        fixture.write_segment(1, b"b\n");
        let popper = fixture.popper();

        assert_eq!(popper.pop_front().unwrap().unwrap(), "a");
        assert!(fixture.segment_exists(0));
        assert_eq!(popper.pop_front().unwrap().unwrap(), "b");
        assert!(!fixture.segment_exists(0));
        assert!(fixture.segment_exists(1));
    }

    #[test]
    fn test_resume_from_checkpoint() {
        let fixture = PopperFixture::new();
        fixture.write_segment(0, b"one\ntwo\nthree\n");
        {
            let popper = fixture.popper();
            assert_eq!(popper.pop_front().unwrap().unwrap(), "one");
            popper.close().unwrap();
        }

        let popper = fixture.popper();
        assert_eq!(popper.offset(), 4);
        assert_eq!(popper.pop_front().unwrap().unwrap(), "two");
    }

    #[test]
    fn test_custom_separator_and_split() {
        let mut fixture = PopperFixture::new();
        fixture.config.separator = b"||".to_vec();
        fixture.write_segment(0, b"x|y||z||");

        let popper = fixture.popper();
        assert_eq!(popper.pop_front().unwrap().unwrap(), "x|y");
        assert_eq!(popper.pop_front().unwrap().unwrap(), "z");

        let fixture = PopperFixture::new();
        fixture.write_segment(0, b"abcdef");
        let fixed_width: SplitFn = Arc::new(|_buf: &[u8], pos: usize, _sep: &[u8]| {
            if pos == 2 {
                Split::Record {
                    end:        3,
                    next_start: 3,
                }
            } else {
                Split::NoMatch
            }
        });
        let popper = Popper::open(&fixture.config, fixed_width, Arc::new(NoopLogger)).unwrap();
        assert_eq!(popper.pop_front().unwrap().unwrap(), "abc");
        assert_eq!(popper.pop_front().unwrap().unwrap(), "def");
    }

    #[test]
    fn test_closed_popper_rejects_reads() {
        let fixture = PopperFixture::new();
        fixture.write_segment(0, b"a\n");
        let popper = fixture.popper();
        popper.close().unwrap();
        popper.close().unwrap();

        assert!(matches!(popper.front(), Err(QueueError::Closed { .. })));
        assert!(!popper.discard_front());
        assert!(popper.pop_front_block().is_none());
    }

    #[test]
    fn test_pop_front_block_wakes_on_close() {
        let fixture = PopperFixture::new();
        let popper = Arc::new(fixture.popper());

        let blocked = {
            let popper = Arc::clone(&popper);
            thread::spawn(move || popper.pop_front_block())
        };
        thread::sleep(Duration::from_millis(50));
        popper.close().unwrap();
        assert!(blocked.join().unwrap().is_none());
    }

    #[test]
    fn test_handler_panic_is_logged_and_retried() {
        let fixture = PopperFixture::new();
        fixture.write_segment(0, b"boom\nok\n");
        let logger = Arc::new(RecordingLogger::default());
        let popper = Popper::open(&fixture.config, default_split_fn(), logger.clone()).unwrap();

        let calls = Arc::new(AtomicUsize::new(0));
        let seen = Arc::new(Mutex::new(Vec::new()));
        {
            let calls = Arc::clone(&calls);
            let seen = Arc::clone(&seen);
            popper
                .pop_to_handler(move |record| {
                    assert!(calls.fetch_add(1, Ordering::SeqCst) != 0, "first delivery fails");
                    seen.lock().unwrap().push(record.to_vec());
                    if record == b"ok" {
                        PopOutcome::consumed().and_stop()
                    } else {
                        PopOutcome::consumed()
                    }
                })
                .unwrap();
        }

        popper.wait();
        assert!(popper.is_closed());
        assert_eq!(seen.lock().unwrap().as_slice(), [b"boom".to_vec(), b"ok".to_vec()]);
        let messages = logger.messages.lock().unwrap();
        assert_eq!(messages.len(), 1);
        assert!(messages[0].contains("first delivery fails"));
    }

    #[test]
    fn test_failed_read_retries_on_reopened_handle() {
        let fixture = PopperFixture::new();
        fixture.write_segment(0, b"first\n");
        let popper = fixture.popper();
        assert_eq!(popper.pop_front().unwrap().unwrap(), "first");

        let path = segment_path(&fixture.config.segment_dir, "logic", 0);
        let mut writer = OpenOptions::new().append(true).open(&path).unwrap();
        writer.write_all(b"second\n").unwrap();
        popper.shared.lock_state().file = Some(writer);

        assert_eq!(popper.pop_front().unwrap().unwrap(), "second");
        assert_eq!(popper.offset(), 13);
        assert_eq!(fixture.pop_checkpoint(), "0,13");
    }

    #[test]
    fn test_finished_handler_threads_are_pruned() {
        let fixture = PopperFixture::new();
        fixture.write_segment(0, b"a\nb\n");
        let popper = fixture.popper();

        for _ in 0..3 {
            popper
                .pop_to_handler(|_record| PopOutcome::consumed().and_stop())
                .unwrap();
            popper.wait();
        }

        assert!(popper.workers.lock().unwrap().is_empty());
        assert_eq!(fixture.pop_checkpoint(), "0,2");
    }
}
