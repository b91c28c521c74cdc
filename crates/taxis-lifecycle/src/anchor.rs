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

//! Scope-based teardown trigger for a [`LifecycleRegistry`].

use std::sync::Arc;

use crate::registry::LifecycleRegistry;

/// Keeps a registry's services alive for as long as at least one anchor
/// exists.
///
/// Each clone counts; when the last anchor drops, the registry runs
/// [`LifecycleRegistry::delete_all`]. Embedders hand an anchor to every
/// component whose lifetime should gate teardown (the main loop, plugin
/// hosts, test harnesses) instead of wiring each of them to an explicit
/// shutdown call. Deterministic exit paths should still prefer
/// [`LifecycleRegistry::shutdown`]; anchors are the backstop for owners
/// that cannot say when they are done.
pub struct LifetimeAnchor {
    registry: Arc<LifecycleRegistry>,
}

impl LifetimeAnchor {
    /// Registers a new anchor on `registry`.
    #[must_use]
    pub fn new(registry: Arc<LifecycleRegistry>) -> Self {
        registry.anchor_acquired();
        Self { registry }
    }

    /// The registry this anchor keeps alive.
    #[must_use]
    pub fn registry(&self) -> &Arc<LifecycleRegistry> {
        &self.registry
    }
}

impl Clone for LifetimeAnchor {
    fn clone(&self) -> Self {
        Self::new(Arc::clone(&self.registry))
    }
}

impl Drop for LifetimeAnchor {
    fn drop(&mut self) {
        self.registry.anchor_released();
    }
}
