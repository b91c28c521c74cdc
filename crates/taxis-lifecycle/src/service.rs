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

//! The managed-service contract.

use std::any::{self, Any};
use std::error::Error;

use crate::registry::LifecycleRegistry;

/// Result of a service's cleanup hook.
pub type CleanupResult = Result<(), Box<dyn Error + Send + Sync>>;

/// A service whose single instance is owned and lifecycle-managed by a
/// [`LifecycleRegistry`].
///
/// Consumers never construct these types directly; they call
/// [`LifecycleRegistry::instance`], which builds the service on first
/// request and records every further service requested along the way as a
/// dependency edge. Those edges later drive the order of the cleanup and
/// delete passes.
pub trait ManagedService: Any + Send + Sync {
    /// Constructs the service. Requests for other services are legal here
    /// and become dependency edges; requesting *this* service again from
    /// inside `build` is a fatal circularity.
    fn build(registry: &LifecycleRegistry) -> Self
    where
        Self: Sized;

    /// Post-construction hook, run with the instance already published.
    ///
    /// May request further services, including this one (the self-request
    /// is tolerated and logged rather than treated as a cycle).
    fn initialize(&self, registry: &LifecycleRegistry) {
        let _ = registry;
    }

    /// Reversible teardown hook, run dependents-first by
    /// [`LifecycleRegistry::cleanup_all`]. Errors are logged and never stop
    /// the rest of the pass.
    fn cleanup(&self) -> CleanupResult {
        Ok(())
    }

    /// Display name used in logs and circularity reports.
    fn service_name() -> &'static str
    where
        Self: Sized,
    {
        any::type_name::<Self>()
    }
}

/// Position of a managed service in its lifecycle.
///
/// `Constructing` and `Initializing` are distinct because a circular
/// request hitting a `Constructing` service is always fatal (there is no
/// usable instance to hand out), while one hitting an `Initializing`
/// service can be tolerated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ServiceState {
    /// `build` is running; no instance is published yet.
    Constructing,
    /// Published, but `initialize` has not returned yet.
    Initializing,
    /// Fully initialized and serviceable.
    Active,
    /// The cleanup hook has run; the instance is still serviceable.
    Cleaned,
    /// The deletion closure has run; the registry has forgotten the
    /// service.
    Deleted,
}
