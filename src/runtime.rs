use std::path::Path;

use anyhow::Result;
use bevy_ecs::prelude::Entity;

use crate::cache::CacheStore;
use crate::config::RuntimeConfig;
use crate::events::EventBus;
use crate::fixed_step::{FixedStepLoop, RuntimeContext, StepHandler, StepRegistry, StepPlan};
use crate::input::Input;
use crate::prefabs::PrefabRegistry;
use crate::scene::SceneSnapshot;
use crate::scripts::{ReloadCheck, ScriptBehaviour, ScriptSystem};
use crate::time::SimClock;
use crate::tween::TweenEngine;
use crate::world::SceneWorld;

/// Monotonic counters; never reset by play-mode transitions.
#[derive(Clone, Copy, Debug, Default)]
pub struct RuntimeStats {
    pub ticks: u64,
    pub fixed_steps: u64,
    pub dropped_backlog: f32,
    pub script_errors: u64,
    pub handler_errors: u64,
    pub events_delivered: u64,
    pub spawn_failures: u64,
}

/// Owns every subsystem and drives the per-tick phase order.
pub struct Runtime {
    scene: SceneWorld,
    bus: EventBus,
    input: Input,
    tweens: TweenEngine,
    cache: CacheStore,
    prefabs: PrefabRegistry,
    scripts: ScriptSystem,
    handlers: StepRegistry,
    step_loop: FixedStepLoop,
    clock: SimClock,
    stats: RuntimeStats,
    config: RuntimeConfig,
}

impl Runtime {
    pub fn new(config: RuntimeConfig) -> Self {
        Self {
            scene: SceneWorld::new(),
            bus: EventBus::default(),
            input: Input::default(),
            tweens: TweenEngine::new(),
            cache: CacheStore::new(config.cache.capacity),
            prefabs: PrefabRegistry::default(),
            scripts: ScriptSystem::new(config.scripts.clone()),
            handlers: StepRegistry::default(),
            step_loop: FixedStepLoop::new(&config.fixed),
            clock: SimClock::default(),
            stats: RuntimeStats::default(),
            config,
        }
    }

    pub fn with_defaults() -> Self {
        Self::new(RuntimeConfig::default())
    }

    pub fn register_behaviour<F>(&mut self, name: impl Into<String>, factory: F)
    where
        F: Fn() -> Result<Box<dyn ScriptBehaviour>> + 'static,
    {
        self.scripts.registry_mut().register(name, factory);
    }

    pub fn add_handler(&mut self, handler: Box<dyn StepHandler>) {
        self.handlers.register(handler);
    }

    pub fn start_play(&mut self) {
        if self.scripts.playing() {
            return;
        }
        self.scripts.begin_play();
    }

    /// Flushes property stores, runs cleanup hooks, drops pending events.
    pub fn stop_play(&mut self) {
        if !self.scripts.playing() {
            return;
        }
        let mut ctx = RuntimeContext {
            scene: &mut self.scene,
            bus: &mut self.bus,
            input: &self.input,
            tweens: &mut self.tweens,
            cache: &mut self.cache,
            prefabs: &self.prefabs,
            stats: &mut self.stats,
        };
        self.scripts.shutdown(&mut ctx);
        self.bus.drain_deliveries();
        self.tweens = TweenEngine::new();
    }

    pub fn playing(&self) -> bool {
        self.scripts.playing()
    }

    /// One frame of simulation. Negative `dt` clamps to zero.
    pub fn tick(&mut self, dt: f32) -> StepPlan {
        let dt = dt.max(0.0);
        self.clock.advance(dt);
        self.cache.advance(dt);

        let deliveries = self.bus.drain_deliveries();
        self.stats.events_delivered += deliveries.len() as u64;
        let plan = self.step_loop.plan(dt);
        self.stats.fixed_steps += u64::from(plan.substeps);
        self.stats.dropped_backlog += plan.dropped;

        #[cfg(feature = "tick_trace")]
        eprintln!(
            "[tick] {} dt={:.4} substeps={} dropped={:.4}",
            self.clock.ticks(),
            plan.dt,
            plan.substeps,
            plan.dropped
        );

        let mut ctx = RuntimeContext {
            scene: &mut self.scene,
            bus: &mut self.bus,
            input: &self.input,
            tweens: &mut self.tweens,
            cache: &mut self.cache,
            prefabs: &self.prefabs,
            stats: &mut self.stats,
        };
        self.scripts.dispatch_deliveries(&mut ctx, &deliveries);

        if let Err(err) = self.scripts.update(&mut ctx, plan.dt) {
            ctx.stats.handler_errors += 1;
            eprintln!("[step] update failed in 'script_system': {err:#}");
        }
        self.handlers.update_all(&mut ctx, plan.dt);

        for _ in 0..plan.substeps {
            self.handlers.fixed_all(&mut ctx, plan.step);
        }

        if let Err(err) = self.scripts.late_update(&mut ctx, plan.dt) {
            ctx.stats.handler_errors += 1;
            eprintln!("[step] late_update failed in 'script_system': {err:#}");
        }
        self.handlers.late_all(&mut ctx, plan.dt);

        self.stats.ticks += 1;
        self.input.clear_frame();
        plan
    }

    pub fn destroy_object(&mut self, object: Entity) {
        let mut ctx = RuntimeContext {
            scene: &mut self.scene,
            bus: &mut self.bus,
            input: &self.input,
            tweens: &mut self.tweens,
            cache: &mut self.cache,
            prefabs: &self.prefabs,
            stats: &mut self.stats,
        };
        self.scripts.destroy_object(&mut ctx, object);
    }

    pub fn set_enabled(&mut self, object: Entity, enabled: bool) {
        let mut ctx = RuntimeContext {
            scene: &mut self.scene,
            bus: &mut self.bus,
            input: &self.input,
            tweens: &mut self.tweens,
            cache: &mut self.cache,
            prefabs: &self.prefabs,
            stats: &mut self.stats,
        };
        self.scripts.set_enabled(&mut ctx, object, enabled);
    }

    /// Outside play mode this only revalidates the behaviour.
    pub fn hot_reload(&mut self, object: Entity) -> Result<()> {
        let mut ctx = RuntimeContext {
            scene: &mut self.scene,
            bus: &mut self.bus,
            input: &self.input,
            tweens: &mut self.tweens,
            cache: &mut self.cache,
            prefabs: &self.prefabs,
            stats: &mut self.stats,
        };
        self.scripts.hot_reload(&mut ctx, object)
    }

    pub fn validate_reload(&self, behaviour: &str) -> ReloadCheck {
        self.scripts.validate_reload(behaviour)
    }

    pub fn save_scene(&self, path: impl AsRef<Path>) -> Result<()> {
        SceneSnapshot::capture(&self.scene).save(path)
    }

    pub fn load_scene(&mut self, path: impl AsRef<Path>) -> Result<Vec<Entity>> {
        self.stop_play();
        let snapshot = SceneSnapshot::load(path)?;
        Ok(snapshot.apply(&mut self.scene))
    }

    // ---------- accessors ----------

    pub fn scene(&self) -> &SceneWorld {
        &self.scene
    }

    pub fn scene_mut(&mut self) -> &mut SceneWorld {
        &mut self.scene
    }

    pub fn bus(&self) -> &EventBus {
        &self.bus
    }

    pub fn bus_mut(&mut self) -> &mut EventBus {
        &mut self.bus
    }

    pub fn input_mut(&mut self) -> &mut Input {
        &mut self.input
    }

    pub fn tweens(&self) -> &TweenEngine {
        &self.tweens
    }

    pub fn cache(&self) -> &CacheStore {
        &self.cache
    }

    pub fn cache_mut(&mut self) -> &mut CacheStore {
        &mut self.cache
    }

    pub fn prefabs_mut(&mut self) -> &mut PrefabRegistry {
        &mut self.prefabs
    }

    pub fn scripts(&self) -> &ScriptSystem {
        &self.scripts
    }

    pub fn stats(&self) -> RuntimeStats {
        self.stats
    }

    pub fn config(&self) -> &RuntimeConfig {
        &self.config
    }

    pub fn clock(&self) -> &SimClock {
        &self.clock
    }
}
