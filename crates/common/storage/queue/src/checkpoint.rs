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

//! Checkpoint store for crash recovery.
//!
//! A checkpoint is a handful of non-negative integers written as ASCII
//! decimals joined by `,` with no trailing newline, e.g. `3,1024`. The writer
//! keeps its segment index in `<prefix>_push.fq`; the reader keeps its segment
//! index and consumed offset in `<prefix>_pop.fq`.
//!
//! A save overwrites the file from offset 0. When the new value is shorter,
//! the stale tail is first blanked with spaces and then cut off, so a crash
//! at any point leaves either the old value or a parsable new one, never an
//! empty file or stale trailing digits.

use std::{
    fs::{File, OpenOptions},
    io::{self, Seek, SeekFrom, Write},
    path::{Path, PathBuf},
};

use snafu::{ResultExt, ensure};
use tracing::debug;

use crate::{
    Result,
    error::{CorruptedCheckpointSnafu, IoSnafu},
};

const FIELD_SEPARATOR: char = ',';

/// Fills the tail of a shrinking checkpoint until it is trimmed.
const PADDING: u8 = b' ';

pub(crate) struct CheckpointStore {
    path: PathBuf,
    file: Option<File>,
}

impl CheckpointStore {
    /// Creates a store for `path`, creating its parent directory if needed.
    /// The file itself is opened lazily on the first save.
    pub fn new<P: Into<PathBuf>>(path: P) -> Result<Self> {
        let path = path.into();
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent).context(IoSnafu { path: parent })?;
        }
        Ok(Self { path, file: None })
    }

    pub fn path(&self) -> &Path { &self.path }

    /// Reads the checkpoint. `Ok(None)` means no checkpoint was ever written.
    ///
    /// A file holding fewer than `expected` fields is corrupt.
    pub fn load(&self, expected: usize) -> Result<Option<Vec<u64>>> {
        let data = match std::fs::read_to_string(&self.path) {
            Ok(data) => data,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e).context(IoSnafu { path: &self.path }),
        };

        let values = parse_values(&data).map_err(|reason| {
            CorruptedCheckpointSnafu {
                path: &self.path,
                reason,
            }
            .build()
        })?;

        ensure!(
            values.len() >= expected,
            CorruptedCheckpointSnafu {
                path:   &self.path,
                reason: format!(
                    "expected {expected} fields, found {}: {data:?}",
                    values.len()
                ),
            }
        );

        Ok(Some(values))
    }

    /// Loads the checkpoint, or persists and returns `defaults` when there is
    /// none yet.
    pub fn load_or_init(&mut self, defaults: &[u64]) -> Result<Vec<u64>> {
        if let Some(values) = self.load(defaults.len())? {
            return Ok(values);
        }
        debug!(path = ?self.path(), ?defaults, "Initializing checkpoint");
        self.save(defaults)?;
        Ok(defaults.to_vec())
    }

    /// Overwrites the checkpoint with `values`.
    ///
    /// A failed write forces the handle closed and reopened, then retries
    /// once; the second failure is returned.
    pub fn save(&mut self, values: &[u64]) -> Result<()> {
        let data = encode_values(values);

        if let Err(e) = self.write(data.as_bytes(), false) {
            debug!(path = ?self.path, error = ?e, "Checkpoint write failed, reopening");
            self.write(data.as_bytes(), true)
                .context(IoSnafu { path: &self.path })?;
        }

        Ok(())
    }

    /// Flushes the open handle to disk. No-op when nothing is open.
    pub fn sync(&self) -> Result<()> {
        if let Some(file) = &self.file {
            file.sync_all().context(IoSnafu { path: &self.path })?;
        }
        Ok(())
    }

    /// Flushes and releases the open handle. No-op when nothing is open.
    pub fn close(&mut self) -> Result<()> {
        self.sync()?;
        self.file = None;
        Ok(())
    }

    /// Overwrites from offset 0, padding with spaces over any longer old
    /// content, then trims the padding. The file is never empty or
    /// half-truncated between the two steps.
    fn write(&mut self, data: &[u8], force_reopen: bool) -> io::Result<()> {
        let file = self.handle(force_reopen)?;
        let old_len = file.metadata()?.len();
        let padded_len = usize::try_from(old_len).map_or(data.len(), |len| len.max(data.len()));

        let mut padded = Vec::with_capacity(padded_len);
        padded.extend_from_slice(data);
        padded.resize(padded_len, PADDING);

        file.seek(SeekFrom::Start(0))?;
        file.write_all(&padded)?;
        if padded_len > data.len() {
            file.set_len(data.len() as u64)?;
        }
        Ok(())
    }

    fn handle(&mut self, force_reopen: bool) -> io::Result<&mut File> {
        let file = match self.file.take() {
            Some(file) if !force_reopen => file,
            stale => {
                if let Some(file) = stale {
                    let _ = file.sync_all();
                }
                OpenOptions::new()
                    .write(true)
                    .create(true)
                    .truncate(false)
                    .open(&self.path)?
            }
        };
        Ok(self.file.insert(file))
    }
}

fn encode_values(values: &[u64]) -> String {
    values
        .iter()
        .map(u64::to_string)
        .collect::<Vec<_>>()
        .join(",")
}

fn parse_values(data: &str) -> std::result::Result<Vec<u64>, String> {
    let data = data.trim();
    if data.is_empty() {
        return Ok(Vec::new());
    }
    data.split(FIELD_SEPARATOR)
        .map(|field| {
            let field = field.trim();
            field
                .parse::<u64>()
                .map_err(|e| format!("invalid field {field:?}: {e}"))
        })
        .collect()
}
