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

use serde::{Deserialize, Serialize};
use smart_default::SmartDefault;

/// Reserved byte (ESC) the writer appends to a segment it will never touch
/// again. Readers seeing it move on to the next segment index.
pub const SEGMENT_END_MARKER: u8 = 27;

/// Default record separator.
pub const DEFAULT_SEPARATOR: &[u8] = b"\n";

/// Directory used for checkpoint files when none is configured.
pub const DEFAULT_CONF_DIR: &str = "file_queue";

/// One mebibyte, the unit of the size threshold at the integration surface.
pub const BYTES_PER_MB: u64 = 1024 * 1024;

/// Queue configuration.
///
/// Everything except the split function and the logger, which are set on the
/// [`QueueBuilder`](crate::QueueBuilder) since they are not plain data.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, SmartDefault)]
#[serde(default)]
pub struct QueueConfig {
    /// Directory holding the `<prefix>_push.fq` and `<prefix>_pop.fq`
    /// checkpoint files. An empty path falls back to [`DEFAULT_CONF_DIR`].
    #[default(_code = "PathBuf::from(DEFAULT_CONF_DIR)")]
    pub conf_dir: PathBuf,

    /// Directory holding the `<prefix>.<index>` segment files.
    #[default(_code = "PathBuf::from(DEFAULT_CONF_DIR)")]
    pub segment_dir: PathBuf,

    /// File name prefix shared by segments and checkpoints.
    #[default(_code = "String::from(\"queue\")")]
    pub prefix: String,

    /// Rotation threshold. A segment whose size exceeds this many bytes is
    /// sealed before the next record is written. Zero disables rotation.
    #[default = 0]
    pub max_segment_bytes: u64,

    /// Capacity of the writer's ingress queue. `push` blocks when full.
    #[default = 1024]
    pub push_capacity: usize,

    /// Remove a segment file once the reader has moved past it.
    #[default = false]
    pub delete_consumed: bool,

    /// Record separator appended by the writer and searched by the reader.
    #[default(_code = "DEFAULT_SEPARATOR.to_vec()")]
    pub separator: Vec<u8>,
}

impl QueueConfig {
    /// Checkpoint directory with the empty-path fallback applied.
    #[must_use]
    pub fn effective_conf_dir(&self) -> PathBuf {
        if self.conf_dir.as_os_str().is_empty() {
            PathBuf::from(DEFAULT_CONF_DIR)
        } else {
            self.conf_dir.clone()
        }
    }

    /// Separator with the empty fallback applied; an empty separator would
    /// make every record unframeable.
    #[must_use]
    pub fn effective_separator(&self) -> Vec<u8> {
        if self.separator.is_empty() {
            DEFAULT_SEPARATOR.to_vec()
        } else {
            self.separator.clone()
        }
    }
}
