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

use std::sync::{Arc, Mutex};

use taxis_lifecycle::{
    CleanupResult, LifecycleRegistry, LifetimeAnchor, ManagedService, ServiceState,
};

// --- DUMMY SERVICES FOR THIS TEST ---

/// Event sink every other service writes to, so the tests can replay the
/// exact order of cleanup hooks and drops afterwards.
struct Journal {
    events: Mutex<Vec<String>>,
}

impl Journal {
    fn record(&self, event: &str) {
        self.events.lock().unwrap().push(event.to_owned());
    }

    fn events(&self) -> Vec<String> {
        self.events.lock().unwrap().clone()
    }
}

impl ManagedService for Journal {
    fn build(_registry: &LifecycleRegistry) -> Self {
        Journal {
            events: Mutex::new(Vec::new()),
        }
    }

    fn cleanup(&self) -> CleanupResult {
        self.record("cleanup:Journal");
        Ok(())
    }
}

struct Settings {
    journal: Arc<Journal>,
}

impl ManagedService for Settings {
    fn build(registry: &LifecycleRegistry) -> Self {
        Settings {
            journal: registry.instance::<Journal>(),
        }
    }

    fn cleanup(&self) -> CleanupResult {
        self.journal.record("cleanup:Settings");
        Ok(())
    }
}

impl Drop for Settings {
    fn drop(&mut self) {
        self.journal.record("drop:Settings");
    }
}

struct Renderer {
    journal: Arc<Journal>,
    #[allow(dead_code)]
    settings: Arc<Settings>,
}

impl ManagedService for Renderer {
    fn build(registry: &LifecycleRegistry) -> Self {
        Renderer {
            journal: registry.instance::<Journal>(),
            settings: registry.instance::<Settings>(),
        }
    }

    fn cleanup(&self) -> CleanupResult {
        self.journal.record("cleanup:Renderer");
        Ok(())
    }
}

impl Drop for Renderer {
    fn drop(&mut self) {
        self.journal.record("drop:Renderer");
    }
}

#[test]
fn test_shutdown_tears_down_dependents_before_dependencies() {
    // --- 1. ARRANGE ---
    // Requesting Renderer pulls in the whole chain: Renderer depends on
    // Journal and Settings, Settings depends on Journal.
    let registry = Arc::new(LifecycleRegistry::new());
    let renderer = registry.instance::<Renderer>();
    let journal = registry.instance::<Journal>();
    assert_eq!(registry.service_count(), 3);

    // The test keeps its own handle on the journal and gives up the rest,
    // mirroring an embedder that holds one service past shutdown.
    drop(renderer);

    // --- 2. ACT ---
    registry.shutdown();

    // --- 3. ASSERT ---
    // Cleanup hooks ran dependents-first, then the delete pass dropped
    // the instances in the same order. The journal itself is never
    // dropped: this test still owns a handle to it.
    assert_eq!(
        journal.events(),
        vec![
            "cleanup:Renderer",
            "cleanup:Settings",
            "cleanup:Journal",
            "drop:Renderer",
            "drop:Settings",
        ],
        "teardown must run dependents before their dependencies"
    );
    assert_eq!(
        Arc::strong_count(&journal),
        1,
        "after deletion only the external handle keeps the journal alive"
    );
    assert_eq!(registry.service_count(), 0);
    assert_eq!(
        registry.service_state::<Renderer>(),
        Some(ServiceState::Deleted)
    );
    assert!(!registry.instance_exists::<Renderer>());

    // A second delete pass has nothing left to visit.
    registry.delete_all();
    assert_eq!(journal.events().len(), 5, "no events may be appended twice");
}

#[test]
fn test_last_anchor_drop_runs_the_ordered_delete_pass() {
    // --- 1. ARRANGE ---
    // No explicit shutdown call anywhere: the anchor is the only thing
    // standing between the services and teardown.
    let registry = Arc::new(LifecycleRegistry::new());
    let anchor = LifetimeAnchor::new(Arc::clone(&registry));
    let worker_anchor = anchor.clone();

    let _ = registry.instance::<Renderer>();
    let journal = registry.instance::<Journal>();

    // --- 2. ACT ---
    drop(anchor);
    assert_eq!(
        registry.service_count(),
        3,
        "a live anchor must hold teardown back"
    );
    drop(worker_anchor);

    // --- 3. ASSERT ---
    // The delete pass ran without cleanup hooks (delete-only teardown),
    // still dependents-first.
    assert_eq!(
        journal.events(),
        vec!["drop:Renderer", "drop:Settings"],
        "anchored teardown deletes dependents before dependencies"
    );
    assert_eq!(registry.service_count(), 0);
}
