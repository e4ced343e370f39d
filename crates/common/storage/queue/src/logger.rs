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

//! Injected logging collaborator.
//!
//! Failures inside background loops have no caller to return to, so they are
//! reported through a [`Logger`] handed to the queue at construction.

use std::fmt;

/// Minimal logging capability the queue needs from its host.
pub trait Logger: Send + Sync {
    fn error(&self, message: fmt::Arguments<'_>);
}

/// Forwards to `tracing::error!`. Used when no logger is configured.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingLogger;

impl Logger for TracingLogger {
    fn error(&self, message: fmt::Arguments<'_>) {
        tracing::error!("{message}");
    }
}

/// Discards everything.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopLogger;

impl Logger for NoopLogger {
    fn error(&self, _message: fmt::Arguments<'_>) {}
}
