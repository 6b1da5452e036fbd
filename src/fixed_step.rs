use crate::cache::CacheStore;
use crate::config::FixedStepConfig;
use crate::events::EventBus;
use crate::input::Input;
use crate::prefabs::PrefabRegistry;
use crate::runtime::RuntimeStats;
use crate::tween::TweenEngine;
use crate::world::SceneWorld;
use anyhow::Result;

/// Borrowed bundle of runtime services handed to step handlers.
pub struct RuntimeContext<'a> {
    pub scene: &'a mut SceneWorld,
    pub bus: &'a mut EventBus,
    pub input: &'a Input,
    pub tweens: &'a mut TweenEngine,
    pub cache: &'a mut CacheStore,
    pub prefabs: &'a PrefabRegistry,
    pub stats: &'a mut RuntimeStats,
}

/// Per-tick callback set. `fixed_update` runs in uniform `step`
/// increments (physics-grade work), `update` once per tick with the raw
/// frame delta, `late_update` once after all substeps.
pub trait StepHandler {
    fn name(&self) -> &'static str;

    fn update(&mut self, _ctx: &mut RuntimeContext<'_>, _dt: f32) -> Result<()> {
        Ok(())
    }

    fn fixed_update(&mut self, _ctx: &mut RuntimeContext<'_>, _dt: f32) -> Result<()> {
        Ok(())
    }

    fn late_update(&mut self, _ctx: &mut RuntimeContext<'_>, _dt: f32) -> Result<()> {
        Ok(())
    }
}

/// Ordered handler list. A failing handler never aborts the tick.
#[derive(Default)]
pub struct StepRegistry {
    handlers: Vec<Box<dyn StepHandler>>,
}

impl StepRegistry {
    pub fn register(&mut self, handler: Box<dyn StepHandler>) {
        self.handlers.push(handler);
    }

    pub fn update_all(&mut self, ctx: &mut RuntimeContext<'_>, dt: f32) {
        for handler in &mut self.handlers {
            if let Err(err) = handler.update(ctx, dt) {
                ctx.stats.handler_errors += 1;
                eprintln!("[step] update failed in '{}': {err:#}", handler.name());
            }
        }
    }

    pub fn fixed_all(&mut self, ctx: &mut RuntimeContext<'_>, step: f32) {
        for handler in &mut self.handlers {
            if let Err(err) = handler.fixed_update(ctx, step) {
                ctx.stats.handler_errors += 1;
                eprintln!("[step] fixed_update failed in '{}': {err:#}", handler.name());
            }
        }
    }

    pub fn late_all(&mut self, ctx: &mut RuntimeContext<'_>, dt: f32) {
        for handler in &mut self.handlers {
            if let Err(err) = handler.late_update(ctx, dt) {
                ctx.stats.handler_errors += 1;
                eprintln!("[step] late_update failed in '{}': {err:#}", handler.name());
            }
        }
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}

/// The tick's fixed-step schedule.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct StepPlan {
    pub dt: f32,
    pub step: f32,
    pub substeps: u32,
    pub dropped: f32,
}

/// Decouples the variable frame delta from a fixed simulation step. A
/// tick that hits the substep cap discards whatever time is still
/// accumulated, trading slow-motion under load for bounded work.
pub struct FixedStepLoop {
    step: f32,
    max_substeps: u32,
    accumulator: f32,
}

impl FixedStepLoop {
    pub fn new(config: &FixedStepConfig) -> Self {
        Self { step: config.step.max(f32::EPSILON), max_substeps: config.max_substeps.max(1), accumulator: 0.0 }
    }

    pub fn step(&self) -> f32 {
        self.step
    }

    pub fn accumulator(&self) -> f32 {
        self.accumulator
    }

    pub fn plan(&mut self, dt: f32) -> StepPlan {
        self.accumulator += dt.max(0.0);
        let mut substeps = 0;
        while self.accumulator >= self.step && substeps < self.max_substeps {
            self.accumulator -= self.step;
            substeps += 1;
        }
        let mut dropped = 0.0;
        if substeps == self.max_substeps && self.accumulator > 0.0 {
            dropped = self.accumulator;
            self.accumulator = 0.0;
        }
        StepPlan { dt, step: self.step, substeps, dropped }
    }
}
