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

use std::path::PathBuf;

use snafu::Snafu;

/// Queue operation errors.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum QueueError {
    /// Filesystem I/O failure on a segment or checkpoint file.
    #[snafu(display("IO error on {}", path.display()))]
    Io {
        path:   PathBuf,
        source: std::io::Error,
        #[snafu(implicit)]
        loc:    snafu::Location,
    },

    /// Checkpoint file exists but cannot be parsed into the expected fields.
    #[snafu(display("Corrupted checkpoint {}: {reason}", path.display()))]
    CorruptedCheckpoint {
        path:   PathBuf,
        reason: String,
        #[snafu(implicit)]
        loc:    snafu::Location,
    },

    /// Record contains the reserved segment-end marker byte.
    #[snafu(display("Record contains the reserved segment-end marker byte"))]
    MarkerInPayload {
        #[snafu(implicit)]
        loc: snafu::Location,
    },

    /// Pusher or popper has been closed.
    #[snafu(display("Queue is closed"))]
    Closed {
        #[snafu(implicit)]
        loc: snafu::Location,
    },

    /// Failed to start a background thread.
    #[snafu(display("Failed to spawn background worker {name}"))]
    SpawnWorker {
        name:   String,
        source: std::io::Error,
        #[snafu(implicit)]
        loc:    snafu::Location,
    },

    /// Background thread panicked and could not be joined cleanly.
    #[snafu(display("Background worker {name} panicked"))]
    WorkerPanicked {
        name: String,
        #[snafu(implicit)]
        loc:  snafu::Location,
    },
}

/// Result type for queue operations.
pub type Result<T> = std::result::Result<T, QueueError>;
