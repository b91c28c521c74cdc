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

// Taxis Sandbox
// Demo binary assembling an engine-shaped service stack on the lifecycle
// registry, running a few frames, then shutting down in dependency order.

use std::collections::HashMap;
use std::env;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use anyhow::{bail, Result};
use taxis_lifecycle::{CleanupResult, LifecycleRegistry, LifetimeAnchor, ManagedService};

/// Key/value settings snapshotted from the process environment.
struct ConfigStore {
    settings: HashMap<String, String>,
}

impl ConfigStore {
    fn get(&self, key: &str) -> Option<&str> {
        self.settings.get(key).map(String::as_str)
    }
}

impl ManagedService for ConfigStore {
    fn build(_registry: &LifecycleRegistry) -> Self {
        let mut settings: HashMap<String, String> = env::vars()
            .filter(|(key, _)| key.starts_with("SANDBOX_"))
            .collect();
        settings
            .entry("SANDBOX_RESOLUTION".to_owned())
            .or_insert_with(|| "1280x720".to_owned());
        settings
            .entry("SANDBOX_VSYNC".to_owned())
            .or_insert_with(|| "on".to_owned());
        log::info!("ConfigStore: {} settings loaded", settings.len());
        ConfigStore { settings }
    }
}

/// Display parameters resolved from the configuration.
struct RenderSettings {
    resolution: (u32, u32),
    vsync: bool,
}

impl ManagedService for RenderSettings {
    fn build(registry: &LifecycleRegistry) -> Self {
        let config = registry.instance::<ConfigStore>();
        let resolution = config
            .get("SANDBOX_RESOLUTION")
            .and_then(|raw| raw.split_once('x'))
            .and_then(|(w, h)| Some((w.parse().ok()?, h.parse().ok()?)))
            .unwrap_or((1280, 720));
        let vsync = config.get("SANDBOX_VSYNC") != Some("off");
        RenderSettings { resolution, vsync }
    }

    fn initialize(&self, _registry: &LifecycleRegistry) {
        log::info!(
            "RenderSettings: {}x{}, vsync {}",
            self.resolution.0,
            self.resolution.1,
            if self.vsync { "on" } else { "off" }
        );
    }
}

/// Pretend asset store; remembers what it loaded so cleanup can report it.
struct AssetCache {
    loaded: Mutex<Vec<String>>,
}

impl AssetCache {
    fn load(&self, name: &str) -> Result<()> {
        if name.is_empty() {
            bail!("asset name must not be empty");
        }
        log::info!("AssetCache: loading '{name}'");
        self.loaded.lock().unwrap().push(name.to_owned());
        Ok(())
    }
}

impl ManagedService for AssetCache {
    fn build(registry: &LifecycleRegistry) -> Self {
        // Pulled in only for the dependency edge: the cache must outlive
        // nothing, but the config must outlive the cache.
        let _config = registry.instance::<ConfigStore>();
        AssetCache {
            loaded: Mutex::new(Vec::new()),
        }
    }

    fn cleanup(&self) -> CleanupResult {
        let loaded = self.loaded.lock().unwrap();
        log::info!("AssetCache: flushing {} assets", loaded.len());
        Ok(())
    }
}

impl Drop for AssetCache {
    fn drop(&mut self) {
        log::info!("AssetCache: dropped");
    }
}

/// Counts simulated frames and reports per-frame timing.
struct FrameProfiler {
    frames: AtomicU64,
}

impl FrameProfiler {
    fn frame<F: FnOnce()>(&self, body: F) {
        let started = Instant::now();
        body();
        let index = self.frames.fetch_add(1, Ordering::Relaxed);
        log::debug!("FrameProfiler: frame {index} took {:?}", started.elapsed());
    }

    fn frame_count(&self) -> u64 {
        self.frames.load(Ordering::Relaxed)
    }
}

impl ManagedService for FrameProfiler {
    fn build(registry: &LifecycleRegistry) -> Self {
        let settings = registry.instance::<RenderSettings>();
        log::info!(
            "FrameProfiler: profiling at {}x{}",
            settings.resolution.0,
            settings.resolution.1
        );
        FrameProfiler {
            frames: AtomicU64::new(0),
        }
    }

    fn cleanup(&self) -> CleanupResult {
        log::info!(
            "FrameProfiler: {} frames recorded this session",
            self.frame_count()
        );
        Ok(())
    }
}

impl Drop for FrameProfiler {
    fn drop(&mut self) {
        log::info!("FrameProfiler: dropped");
    }
}

fn main() -> Result<()> {
    use env_logger::{Builder, Env};

    Builder::from_env(Env::default().default_filter_or("info")).init();

    let registry = Arc::new(LifecycleRegistry::new());
    let _anchor = LifetimeAnchor::new(Arc::clone(&registry));

    // First request builds the whole chain: profiler -> render settings
    // -> config store.
    let profiler = registry.instance::<FrameProfiler>();
    let assets = registry.instance::<AssetCache>();
    log::info!("Sandbox: services up: {:?}", registry.service_names());

    assets.load("meshes/teapot.obj")?;
    assets.load("textures/checker.png")?;

    for _ in 0..3 {
        profiler.frame(|| thread::sleep(Duration::from_millis(2)));
    }
    log::info!("Sandbox: simulated {} frames", profiler.frame_count());

    // Give up the app's handles so the delete pass owns the instances,
    // then shut down deterministically; the anchor would cover us if we
    // forgot.
    drop(profiler);
    drop(assets);
    registry.shutdown();
    Ok(())
}
