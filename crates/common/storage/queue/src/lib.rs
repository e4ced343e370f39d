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

//! Disk-backed, crash-recoverable FIFO queue.
//!
//! Records are appended to rotating segment files `<prefix>.<index>` by a
//! [`Pusher`] and read back in order by a [`Popper`]. Both halves checkpoint
//! their position, so either can restart and resume where it left off.
//! Delivery is at-least-once at record granularity.

mod backoff;
pub mod builder;
mod checkpoint;
pub mod config;
pub mod error;
pub mod logger;
pub mod path;
pub mod popper;
pub mod pusher;
pub mod queue;
mod segment_writer;
pub mod split;

pub use builder::QueueBuilder;
pub use config::{DEFAULT_SEPARATOR, QueueConfig, SEGMENT_END_MARKER};
pub use error::{QueueError, Result};
pub use logger::{Logger, NoopLogger, TracingLogger};
pub use popper::{PopOutcome, Popper};
pub use pusher::Pusher;
pub use queue::FileQueue;
pub use split::{Split, SplitFn, default_split_fn, split_records};
