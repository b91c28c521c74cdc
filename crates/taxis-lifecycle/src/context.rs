// Copyright 2025 eraflo
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Execution-context identity.
//!
//! The registry keys its circularity-detection state per logical thread of
//! execution so that two independent contexts lazily building their own
//! service trees never mistake each other's in-progress work for a cycle.
//! The registry treats the identity as a black box: only equality and
//! hashing matter.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

/// Opaque identity of one logical thread of execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ContextId(u64);

impl ContextId {
    /// Builds an id from a raw token. Providers choose their own scheme.
    #[must_use]
    pub const fn from_raw(token: u64) -> Self {
        Self(token)
    }
}

impl fmt::Display for ContextId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "context#{}", self.0)
    }
}

/// Source of the calling execution context's identity.
///
/// The default [`ThreadContextProvider`] hands every OS thread its own id.
/// Cooperative schedulers can substitute task identity instead, so that
/// tasks sharing one OS thread keep separate initializing stacks.
pub trait ContextIdProvider: Send + Sync {
    /// Identity of the calling execution context.
    fn current_context(&self) -> ContextId;
}

/// Default provider: one fresh id per OS thread, assigned on first use.
#[derive(Debug, Default, Clone, Copy)]
pub struct ThreadContextProvider;

impl ContextIdProvider for ThreadContextProvider {
    fn current_context(&self) -> ContextId {
        current_thread_context()
    }
}

static NEXT_CONTEXT: AtomicU64 = AtomicU64::new(0);

thread_local! {
    static THREAD_CONTEXT: ContextId = ContextId(NEXT_CONTEXT.fetch_add(1, Ordering::Relaxed));
}

/// Identity of the calling OS thread, stable for the thread's lifetime.
#[must_use]
pub fn current_thread_context() -> ContextId {
    THREAD_CONTEXT.with(|id| *id)
}
