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

//! Background drain task of the writer.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────┐   bounded channel   ┌───────────────┐   append   ┌──────────────┐
//! │    Pusher    │ ──────────────────► │ SegmentWriter │ ─────────► │ <prefix>.<N> │
//! │   (caller)   │    (backpressure)   │  (bg thread)  │            │              │
//! └──────────────┘                     └───────────────┘            └──────────────┘
//! ```
//!
//! For each record the writer checks the size of the current segment. Once it
//! exceeds the threshold, the segment is sealed with
//! [`SEGMENT_END_MARKER`], the checkpoint moves to index `N + 1`, and the new
//! segment file is created. The record is then framed with the separator and
//! appended.

use std::{
    borrow::Cow,
    fs::{File, OpenOptions},
    io::{self, Write},
    path::PathBuf,
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
};

use bytes::Bytes;
use crossbeam::channel::Receiver;
use snafu::ResultExt;
use tracing::{debug, info};

use crate::{
    QueueConfig, Result,
    checkpoint::CheckpointStore,
    config::SEGMENT_END_MARKER,
    error::IoSnafu,
    logger::Logger,
    path::{push_checkpoint_path, segment_path},
};

pub(crate) struct SegmentWriter {
    /// Records accepted by `Pusher::push`, in order.
    rx:                Receiver<Bytes>,
    segment_dir:       PathBuf,
    prefix:            String,
    separator:         Vec<u8>,
    /// Zero disables rotation.
    max_segment_bytes: u64,
    /// Persists the index of the segment being written.
    checkpoint:        CheckpointStore,
    /// Current segment index, shared with the `Pusher` for introspection.
    index:             Arc<AtomicU64>,
    /// Append handle on `<prefix>.<index>`.
    file:              Option<File>,
    logger:            Arc<dyn Logger>,
}

impl SegmentWriter {
    /// Loads the writer checkpoint (index 0 when absent) and opens the
    /// current segment for appending, creating it if needed.
    pub fn open(
        config: &QueueConfig,
        rx: Receiver<Bytes>,
        index: Arc<AtomicU64>,
        logger: Arc<dyn Logger>,
    ) -> Result<Self> {
        let mut checkpoint =
            CheckpointStore::new(push_checkpoint_path(config.effective_conf_dir(), &config.prefix))?;
        let values = checkpoint.load_or_init(&[0])?;
        index.store(values[0], Ordering::Release);

        std::fs::create_dir_all(&config.segment_dir).context(IoSnafu {
            path: &config.segment_dir,
        })?;

        let mut writer = Self {
            rx,
            segment_dir: config.segment_dir.clone(),
            prefix: config.prefix.clone(),
            separator: config.effective_separator(),
            max_segment_bytes: config.max_segment_bytes,
            checkpoint,
            index,
            file: None,
            logger,
        };

        let path = writer.current_path();
        writer.reopen(false).context(IoSnafu { path })?;

        Ok(writer)
    }

    /// Drains the channel until every sender is gone, then flushes and
    /// releases the segment and checkpoint handles.
    pub fn run(&mut self) {
        info!(index = self.current_index(), path = ?self.current_path(), "Segment writer starting");

        while let Ok(record) = self.rx.recv() {
            if let Err(e) = self.write_record(&record) {
                self.logger.error(format_args!(
                    "segment writer failed to write record: {e}, data: {}",
                    String::from_utf8_lossy(&record)
                ));
            }
        }

        self.shutdown();
        info!(index = self.current_index(), "Segment writer stopped");
    }

    fn current_index(&self) -> u64 { self.index.load(Ordering::Acquire) }

    fn current_path(&self) -> PathBuf {
        segment_path(&self.segment_dir, &self.prefix, self.current_index())
    }

    fn reopen(&mut self, force: bool) -> io::Result<&mut File> {
        let file = match self.file.take() {
            Some(file) if !force => file,
            stale => {
                if let Some(file) = stale {
                    let _ = file.sync_all();
                }
                OpenOptions::new()
                    .create(true)
                    .append(true)
                    .open(self.current_path())?
            }
        };
        Ok(self.file.insert(file))
    }

    fn size(&mut self) -> Result<u64> {
        match self.reopen(false).and_then(|file| file.metadata()) {
            Ok(metadata) => Ok(metadata.len()),
            Err(e) => {
                debug!(error = ?e, "Segment stat failed, reopening");
                let path = self.current_path();
                let metadata = self
                    .reopen(true)
                    .and_then(|file| file.metadata())
                    .context(IoSnafu { path })?;
                Ok(metadata.len())
            }
        }
    }

    /// Seals the current segment and switches to the next index.
    fn rotate(&mut self) -> Result<()> {
        let sealed = self.current_index();
        let path = self.current_path();

        let file = self.reopen(false).context(IoSnafu { path: &path })?;
        let (_, sealed_result) = write_fully(file, &[SEGMENT_END_MARKER]);
        sealed_result.context(IoSnafu { path: &path })?;

        let next = sealed + 1;
        self.checkpoint.save(&[next])?;
        self.index.store(next, Ordering::Release);

        let next_path = self.current_path();
        self.reopen(true).context(IoSnafu { path: &next_path })?;

        debug!(sealed, next, path = ?next_path, "Rotated to new segment");
        Ok(())
    }

    /// Writes one record, rotating first when the segment is over the
    /// threshold. A failed or partial write is retried once, for the
    /// unwritten suffix only, on a freshly opened handle.
    pub(crate) fn write_record(&mut self, record: &[u8]) -> Result<()> {
        let size = self.size()?;
        if self.max_segment_bytes > 0 && size > self.max_segment_bytes {
            self.rotate()?;
        }

        let framed = frame_record(record, &self.separator);

        let (written, result) = match self.reopen(false) {
            Ok(file) => write_fully(file, &framed),
            Err(e) => (0, Err(e)),
        };

        if let Err(e) = result {
            debug!(error = ?e, written, "Segment write failed, reopening");
            self.resume_write(&framed, written)?;
        }

        Ok(())
    }

    /// Writes `framed[written..]` on a freshly opened handle.
    fn resume_write(&mut self, framed: &[u8], written: usize) -> Result<()> {
        let path = self.current_path();
        let file = self.reopen(true).context(IoSnafu { path: &path })?;
        let (_, result) = write_fully(file, &framed[written..]);
        result.context(IoSnafu { path })
    }

    fn shutdown(&mut self) {
        if let Some(file) = self.file.take()
            && let Err(e) = file.sync_all()
        {
            self.logger.error(format_args!(
                "segment writer failed to sync {}: {e}",
                self.current_path().display()
            ));
        }
        if let Err(e) = self.checkpoint.close() {
            self.logger
                .error(format_args!("segment writer failed to close checkpoint: {e}"));
        }
    }
}

/// Appends the separator unless the record already ends with it. An empty
/// record becomes a bare separator.
pub(crate) fn frame_record<'a>(record: &'a [u8], separator: &[u8]) -> Cow<'a, [u8]> {
    if !record.is_empty() && record.ends_with(separator) {
        return Cow::Borrowed(record);
    }
    let mut framed = Vec::with_capacity(record.len() + separator.len());
    framed.extend_from_slice(record);
    framed.extend_from_slice(separator);
    Cow::Owned(framed)
}

/// Writes as much of `buf` as possible; returns the byte count written
/// alongside the outcome so a retry can resume from there.
fn write_fully<W: Write>(file: &mut W, buf: &[u8]) -> (usize, io::Result<()>) {
    let mut written = 0;
    while written < buf.len() {
        match file.write(&buf[written..]) {
            Ok(0) => return (written, Err(io::ErrorKind::WriteZero.into())),
            Ok(n) => written += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
            Err(e) => return (written, Err(e)),
        }
    }
    (written, Ok(()))
}

#[cfg(test)]
mod tests {
    use crossbeam::channel::{Sender, bounded};
    use tempfile::TempDir;
    use test_case::test_case;

    use super::*;
    use crate::logger::NoopLogger;

    struct WriterFixture {
        temp_dir: TempDir,
        tx:       Option<Sender<Bytes>>,
        index:    Arc<AtomicU64>,
        writer:   SegmentWriter,
    }

    impl WriterFixture {
        fn new(max_segment_bytes: u64) -> Self {
            let temp_dir = TempDir::new().unwrap();
            let config = test_config(&temp_dir, max_segment_bytes);
            let (tx, rx) = bounded(16);
            let index = Arc::new(AtomicU64::new(0));
            let writer =
                SegmentWriter::open(&config, rx, index.clone(), Arc::new(NoopLogger)).unwrap();
            Self {
                temp_dir,
                tx: Some(tx),
                index,
                writer,
            }
        }

        fn segment(&self, index: u64) -> Vec<u8> {
            std::fs::read(segment_path(self.temp_dir.path().join("seg"), "logic", index))
                .unwrap()
        }

        fn push_checkpoint(&self) -> String {
            std::fs::read_to_string(self.temp_dir.path().join("conf").join("logic_push.fq"))
                .unwrap()
        }
    }

    fn test_config(temp_dir: &TempDir, max_segment_bytes: u64) -> QueueConfig {
        QueueConfig {
            conf_dir: temp_dir.path().join("conf"),
            segment_dir: temp_dir.path().join("seg"),
            prefix: "logic".to_string(),
            max_segment_bytes,
            ..Default::default()
        }
    }

    #[test_case(b"abc", b"abc\n" ; "separator appended")]
    #[test_case(b"abc\n", b"abc\n" ; "already terminated")]
    #[test_case(b"", b"\n" ; "empty record")]
    fn test_frame_record(record: &[u8], expected: &[u8]) {
        assert_eq!(frame_record(record, b"\n").as_ref(), expected);
    }

    #[test]
    fn test_frame_record_multi_byte() {
        assert_eq!(frame_record(b"x", b"<END>").as_ref(), b"x<END>");
        assert_eq!(frame_record(b"x<END>", b"<END>").as_ref(), b"x<END>");
    }

    #[test]
    fn test_open_creates_segment_and_checkpoint() {
        let fixture = WriterFixture::new(0);
        assert!(fixture.segment(0).is_empty());
        assert_eq!(fixture.push_checkpoint(), "0");
    }

    #[test]
    fn test_write_records_in_order() {
        let mut fixture = WriterFixture::new(0);
        for record in [b"a".as_slice(), b"bb", b""] {
            fixture.writer.write_record(record).unwrap();
        }
        assert_eq!(fixture.segment(0), b"a\nbb\n\n");
    }

    #[test]
    fn test_rotation_seals_segment() {
        let mut fixture = WriterFixture::new(1);
        for record in [b"a".as_slice(), b"bb", b"ccc"] {
            fixture.writer.write_record(record).unwrap();
        }

        assert_eq!(fixture.segment(0), b"a\n\x1b");
        assert_eq!(fixture.segment(1), b"bb\n\x1b");
        assert_eq!(fixture.segment(2), b"ccc\n");
        assert_eq!(fixture.index.load(Ordering::Acquire), 2);
        assert_eq!(fixture.push_checkpoint(), "2");
    }

    #[test]
    fn test_no_rotation_at_threshold() {
        let mut fixture = WriterFixture::new(2);
        fixture.writer.write_record(b"a").unwrap();
        fixture.writer.write_record(b"b").unwrap();
        assert_eq!(fixture.segment(0), b"a\nb\n");
        assert_eq!(fixture.index.load(Ordering::Acquire), 0);
    }

    #[test]
    fn test_resume_from_checkpoint() {
        let temp_dir = TempDir::new().unwrap();
        let config = test_config(&temp_dir, 0);
        std::fs::create_dir_all(&config.conf_dir).unwrap();
        std::fs::write(config.conf_dir.join("logic_push.fq"), "5").unwrap();

        let (_tx, rx) = bounded(1);
        let index = Arc::new(AtomicU64::new(0));
        let mut writer =
            SegmentWriter::open(&config, rx, index.clone(), Arc::new(NoopLogger)).unwrap();
        writer.write_record(b"resumed").unwrap();

        assert_eq!(index.load(Ordering::Acquire), 5);
        let data = std::fs::read(segment_path(&config.segment_dir, "logic", 5)).unwrap();
        assert_eq!(data, b"resumed\n");
    }

    #[test]
    fn test_run_drains_until_disconnected() {
        let mut fixture = WriterFixture::new(0);
        let tx = fixture.tx.take().unwrap();
        for i in 0..10 {
            tx.send(Bytes::from(format!("msg-{i}"))).unwrap();
        }
        drop(tx);

        fixture.writer.run();

        let expected: String = (0..10).map(|i| format!("msg-{i}\n")).collect();
        assert_eq!(fixture.segment(0), expected.as_bytes());
    }

    /// Accepts `limit` bytes in total, then fails every write.
    struct ShortWriter {
        accepted: Vec<u8>,
        limit:    usize,
    }

    impl Write for ShortWriter {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            let room = self.limit - self.accepted.len();
            if room == 0 {
                return Err(io::Error::other("device full"));
            }
            let n = room.min(buf.len());
            self.accepted.extend_from_slice(&buf[..n]);
            Ok(n)
        }

        fn flush(&mut self) -> io::Result<()> { Ok(()) }
    }

    #[test]
    fn test_write_fully_reports_partial_progress() {
        let mut short = ShortWriter {
            accepted: Vec::new(),
            limit:    3,
        };
        let (written, result) = write_fully(&mut short, b"record\n");
        assert_eq!(written, 3);
        assert!(result.is_err());
        assert_eq!(short.accepted, b"rec");
    }

    #[test]
    fn test_failed_write_retries_on_reopened_handle() {
        let mut fixture = WriterFixture::new(0);
        fixture.writer.write_record(b"a").unwrap();

        let read_only = File::open(fixture.writer.current_path()).unwrap();
        fixture.writer.file = Some(read_only);
        fixture.writer.write_record(b"b").unwrap();

        assert_eq!(fixture.segment(0), b"a\nb\n");
    }

    #[test]
    fn test_partial_write_resumes_with_suffix() {
        let mut fixture = WriterFixture::new(0);
        fixture.writer.write_record(b"a").unwrap();

        let framed = frame_record(b"record", b"\n");
        let mut short = ShortWriter {
            accepted: Vec::new(),
            limit:    3,
        };
        let (written, result) = write_fully(&mut short, &framed);
        assert!(result.is_err());
        // The prefix that reached the segment before the failure.
        fixture
            .writer
            .reopen(false)
            .unwrap()
            .write_all(&short.accepted)
            .unwrap();

        fixture.writer.file = Some(File::open(fixture.writer.current_path()).unwrap());
        fixture.writer.resume_write(&framed, written).unwrap();

        assert_eq!(fixture.segment(0), b"a\nrecord\n");
    }
}
