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

use std::{path::PathBuf, sync::Arc};

use crate::{
    FileQueue, QueueConfig, Result,
    config::BYTES_PER_MB,
    logger::{Logger, TracingLogger},
    popper::Popper,
    pusher::Pusher,
    split::{Split, SplitFn, default_split_fn},
};

pub struct QueueBuilder {
    config: QueueConfig,
    split:  SplitFn,
    logger: Arc<dyn Logger>,
}

impl QueueBuilder {
    pub fn new<P: Into<PathBuf>>(segment_dir: P, prefix: impl Into<String>) -> Self {
        Self::from_config(QueueConfig {
            segment_dir: segment_dir.into(),
            prefix: prefix.into(),
            ..Default::default()
        })
    }

    pub fn from_config(config: QueueConfig) -> Self {
        Self {
            config,
            split: default_split_fn(),
            logger: Arc::new(TracingLogger),
        }
    }

    pub fn conf_dir<P: Into<PathBuf>>(mut self, dir: P) -> Self {
        self.config.conf_dir = dir.into();
        self
    }

    /// Rotation threshold in MiB; zero disables rotation.
    pub fn max_segment_mb(mut self, mb: u64) -> Self {
        self.config.max_segment_bytes = mb.saturating_mul(BYTES_PER_MB);
        self
    }

    pub fn max_segment_bytes(mut self, bytes: u64) -> Self {
        self.config.max_segment_bytes = bytes;
        self
    }

    pub fn push_capacity(mut self, capacity: usize) -> Self {
        self.config.push_capacity = capacity;
        self
    }

    pub fn delete_consumed(mut self, delete: bool) -> Self {
        self.config.delete_consumed = delete;
        self
    }

    pub fn separator(mut self, separator: impl Into<Vec<u8>>) -> Self {
        self.config.separator = separator.into();
        self
    }

    pub fn split_fn<F>(mut self, split: F) -> Self
    where
        F: Fn(&[u8], usize, &[u8]) -> Split + Send + Sync + 'static,
    {
        self.split = Arc::new(split);
        self
    }

    pub fn logger<L: Logger + 'static>(mut self, logger: L) -> Self {
        self.logger = Arc::new(logger);
        self
    }

    pub fn shared_logger(mut self, logger: Arc<dyn Logger>) -> Self {
        self.logger = logger;
        self
    }

    /// Opens both halves.
    ///
    /// # Errors
    ///
    /// Fails on a corrupt checkpoint or if the initial segment cannot be
    /// opened; no queue is produced.
    pub fn build(self) -> Result<FileQueue> { FileQueue::new(self.config, self.split, self.logger) }

    /// Opens only the writer half.
    ///
    /// # Errors
    ///
    /// Fails on a corrupt checkpoint or if the initial segment cannot be
    /// opened.
    pub fn build_pusher(self) -> Result<Pusher> { Pusher::open(&self.config, self.logger) }

    /// Opens only the reader half.
    ///
    /// # Errors
    ///
    /// Fails on a corrupt checkpoint.
    pub fn build_popper(self) -> Result<Popper> {
        Popper::open(&self.config, self.split, self.logger)
    }
}
