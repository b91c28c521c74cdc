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

//! # Taxis Lifecycle
//!
//! A registry of lazily-constructed managed services. Services are built on
//! first request, the dependencies discovered while building them are
//! captured as edges, and shutdown replays those edges through
//! `taxis-graph` so that cleanup and deletion always run dependents-first.
//!
//! Construction is re-entrant: a service's builder may request further
//! services, and per-execution-context bookkeeping keeps circular requests
//! detectable even when several logical contexts initialize concurrently.

#![warn(missing_docs)]

pub mod anchor;
pub mod context;
pub mod registry;
pub mod service;

pub use anchor::LifetimeAnchor;
pub use context::{current_thread_context, ContextId, ContextIdProvider, ThreadContextProvider};
pub use registry::{CircularityPolicy, LifecycleRegistry};
pub use service::{CleanupResult, ManagedService, ServiceState};
