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

//! Record framing.
//!
//! The reader calls a split function at every scan position of its buffer.
//! The function decides whether a record ends there, whether the segment ends
//! there, or neither. [`split_records`] is the default; integrators may
//! install their own [`SplitFn`] through the builder.

use std::sync::Arc;

use crate::config::SEGMENT_END_MARKER;

/// Outcome of probing one scan position.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Split {
    /// No boundary at this position.
    NoMatch,
    /// A record occupies `buf[..end]`; the next record starts at
    /// `next_start`.
    Record { end: usize, next_start: usize },
    /// The segment-end marker sits at this position. Continue with the next
    /// segment index.
    EndOfSegment,
}

/// Split strategy: `(buffer, scan_position, separator) -> Split`.
///
/// `scan_position` is always a valid index into `buffer`.
pub type SplitFn = Arc<dyn Fn(&[u8], usize, &[u8]) -> Split + Send + Sync>;

/// Returns the default split function as a [`SplitFn`].
#[must_use]
pub fn default_split_fn() -> SplitFn { Arc::new(split_records) }

/// Default framing.
///
/// - `\n` separator: the record ends before an optional `\r`.
/// - any other single byte: exact match at `pos`.
/// - multi-byte separator: the window ending at `pos` must equal the
///   separator.
///
/// The marker byte always reports [`Split::EndOfSegment`].
pub fn split_records(buf: &[u8], pos: usize, sep: &[u8]) -> Split {
    let byte = buf[pos];
    if byte == SEGMENT_END_MARKER {
        return Split::EndOfSegment;
    }

    match sep {
        [b'\n'] => split_line(buf, pos),
        [single] if *single == byte => Split::Record {
            end:        pos,
            next_start: pos + 1,
        },
        [_] | [] => Split::NoMatch,
        _ => {
            if pos + 1 < sep.len() || !buf[..=pos].ends_with(sep) {
                return Split::NoMatch;
            }
            Split::Record {
                end:        pos + 1 - sep.len(),
                next_start: pos + 1,
            }
        }
    }
}

fn split_line(buf: &[u8], pos: usize) -> Split {
    if buf[pos] != b'\n' {
        return Split::NoMatch;
    }
    let end = if pos > 0 && buf[pos - 1] == b'\r' {
        pos - 1
    } else {
        pos
    };
    Split::Record {
        end,
        next_start: pos + 1,
    }
}
