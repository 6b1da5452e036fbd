use std::collections::{HashMap, HashSet};

use anyhow::{anyhow, Context, Result};
use bevy_ecs::prelude::Entity;
use glam::Vec2;
use rand::Rng;
use serde_json::Value;
use smallvec::SmallVec;

use crate::config::ScriptConfig;
use crate::coroutine::{
    AwaitState, Coroutine, CoroutineId, CoroutinePoll, CoroutineSlot, ResumeInput, TimerCoroutine,
    Wait,
};
use crate::events::{Delivery, SubscriptionHandle};
use crate::fixed_step::{RuntimeContext, StepHandler};
use crate::tween::{Easing, TweenField, TweenTrack};
use crate::world::{PropertyMap, Transform};

/// Per-instance lifecycle state. `Destroyed` is terminal.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum InstanceState {
    Uninitialized,
    Active,
    Disabled,
    Destroyed,
}

/// The interface a script body implements. A failing callback discards
/// that instance without touching its siblings.
pub trait ScriptBehaviour {
    fn on_init(&mut self, _ctx: &mut ScriptContext<'_, '_>) -> Result<()> {
        Ok(())
    }

    /// Re-run after hot reload while playing.
    fn on_start(&mut self, _ctx: &mut ScriptContext<'_, '_>) -> Result<()> {
        Ok(())
    }

    fn on_update(&mut self, _ctx: &mut ScriptContext<'_, '_>, _dt: f32) -> Result<()> {
        Ok(())
    }

    fn on_late_update(&mut self, _ctx: &mut ScriptContext<'_, '_>, _dt: f32) -> Result<()> {
        Ok(())
    }

    fn on_disable(&mut self, _ctx: &mut ScriptContext<'_, '_>) -> Result<()> {
        Ok(())
    }

    fn on_event(
        &mut self,
        _ctx: &mut ScriptContext<'_, '_>,
        _name: &str,
        _payload: &Value,
    ) -> Result<()> {
        Ok(())
    }
}

type BehaviourFactory = Box<dyn Fn() -> Result<Box<dyn ScriptBehaviour>>>;

/// Behaviour name -> constructor. Re-registering a name replaces the
/// factory; hot reload leans on that.
#[derive(Default)]
pub struct ScriptRegistry {
    factories: HashMap<String, BehaviourFactory>,
}

impl ScriptRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register<F>(&mut self, name: impl Into<String>, factory: F)
    where
        F: Fn() -> Result<Box<dyn ScriptBehaviour>> + 'static,
    {
        self.factories.insert(name.into(), Box::new(factory));
    }

    pub fn contains(&self, name: &str) -> bool {
        self.factories.contains_key(name)
    }

    pub fn construct(&self, name: &str) -> Result<Box<dyn ScriptBehaviour>> {
        let factory = self
            .factories
            .get(name)
            .ok_or_else(|| anyhow!("no behaviour registered under '{name}'"))?;
        factory().with_context(|| format!("constructing behaviour '{name}'"))
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ReloadCheck {
    pub valid: bool,
    pub error: Option<String>,
}

pub struct ScriptInstance {
    behaviour: Box<dyn ScriptBehaviour>,
    behaviour_name: String,
    state: InstanceState,
    properties: PropertyMap,
    coroutines: Vec<CoroutineSlot>,
    subscriptions: SmallVec<[SubscriptionHandle; 4]>,
}

impl ScriptInstance {
    pub fn state(&self) -> InstanceState {
        self.state
    }

    pub fn behaviour_name(&self) -> &str {
        &self.behaviour_name
    }

    pub fn property(&self, key: &str) -> Option<&Value> {
        self.properties.get(key)
    }

    pub fn coroutine_count(&self) -> usize {
        self.coroutines.len()
    }
}

/// Side effects a callback queued through its context, merged into the
/// owning instance after the callback returns.
#[derive(Default)]
struct ContextEffects {
    started: Vec<CoroutineSlot>,
    stopped: Vec<CoroutineId>,
}

/// Everything a script body may touch during a callback.
pub struct ScriptContext<'a, 'c> {
    object: Entity,
    runtime: &'a mut RuntimeContext<'c>,
    properties: &'a mut PropertyMap,
    subscriptions: &'a mut SmallVec<[SubscriptionHandle; 4]>,
    effects: &'a mut ContextEffects,
    destroy_requests: &'a mut Vec<Entity>,
    enable_requests: &'a mut Vec<(Entity, bool)>,
    next_coroutine_id: &'a mut u64,
}

impl ScriptContext<'_, '_> {
    pub fn object(&self) -> Entity {
        self.object
    }

    pub fn name(&self) -> Option<String> {
        self.runtime.scene.name_of(self.object)
    }

    // ---------- transform ----------

    pub fn transform(&self) -> Transform {
        self.runtime.scene.transform(self.object).unwrap_or_default()
    }

    pub fn set_transform(&mut self, transform: Transform) {
        self.runtime.scene.set_transform(self.object, transform);
    }

    pub fn set_position(&mut self, position: Vec2) {
        let mut t = self.transform();
        t.translation = position;
        self.set_transform(t);
    }

    pub fn translate(&mut self, delta: Vec2) {
        let mut t = self.transform();
        t.translation += delta;
        self.set_transform(t);
    }

    pub fn rotate(&mut self, radians: f32) {
        let mut t = self.transform();
        t.rotation = crate::wrap_angle(t.rotation + radians);
        self.set_transform(t);
    }

    pub fn set_rotation(&mut self, radians: f32) {
        let mut t = self.transform();
        t.rotation = crate::wrap_angle(radians);
        self.set_transform(t);
    }

    // ---------- input ----------

    pub fn is_held(&self, key: &str) -> bool {
        self.runtime.input.is_held(key)
    }

    pub fn was_pressed(&self, key: &str) -> bool {
        self.runtime.input.was_pressed(key)
    }

    pub fn was_released(&self, key: &str) -> bool {
        self.runtime.input.was_released(key)
    }

    // ---------- event bus ----------

    /// Auto-released when the instance is destroyed.
    pub fn subscribe(&mut self, event: &str) -> SubscriptionHandle {
        let handle = self.runtime.bus.subscribe(event, self.object);
        self.subscriptions.push(handle);
        handle
    }

    pub fn subscribe_once(&mut self, event: &str) -> SubscriptionHandle {
        let handle = self.runtime.bus.subscribe_once(event, self.object);
        self.subscriptions.push(handle);
        handle
    }

    pub fn unsubscribe(&mut self, handle: SubscriptionHandle) {
        self.runtime.bus.unsubscribe(handle);
        self.subscriptions.retain(|h| *h != handle);
    }

    pub fn emit(&mut self, event: impl Into<String>, payload: Value) {
        self.runtime.bus.emit(event, payload);
    }

    // ---------- properties ----------

    pub fn get_property(&self, key: &str) -> Option<Value> {
        self.properties.get(key).cloned()
    }

    pub fn set_property(&mut self, key: impl Into<String>, value: Value) {
        self.properties.insert(key.into(), value);
    }

    pub fn get_number(&self, key: &str) -> Option<f64> {
        self.properties.get(key).and_then(Value::as_f64)
    }

    pub fn set_number(&mut self, key: impl Into<String>, value: f64) {
        self.properties.insert(key.into(), Value::from(value));
    }

    // ---------- tags & lookups ----------

    pub fn add_tag(&mut self, tag: &str) -> bool {
        self.runtime.scene.add_tag(self.object, tag)
    }

    pub fn remove_tag(&mut self, tag: &str) -> bool {
        self.runtime.scene.remove_tag(self.object, tag)
    }

    pub fn has_tag(&self, tag: &str) -> bool {
        self.runtime.scene.has_tag(self.object, tag)
    }

    pub fn find_by_tag(&self, tag: &str) -> Vec<Entity> {
        self.runtime.scene.index.with_tag(tag)
    }

    pub fn find_by_script(&self, behaviour: &str) -> Vec<Entity> {
        self.runtime.scene.index.with_script(behaviour)
    }

    pub fn parent(&self) -> Option<Entity> {
        self.runtime.scene.parent_of(self.object)
    }

    pub fn children(&self) -> Vec<Entity> {
        self.runtime.scene.children_of(self.object)
    }

    pub fn transform_of(&self, object: Entity) -> Option<Transform> {
        self.runtime.scene.transform(object)
    }

    // ---------- spawning & destruction ----------

    pub fn spawn_prefab(
        &mut self,
        name: &str,
        position: Option<Vec2>,
        rotation: Option<f32>,
    ) -> Option<Entity> {
        let spawned = self.runtime.prefabs.instantiate(self.runtime.scene, name, position, rotation);
        if spawned.is_none() {
            self.runtime.stats.spawn_failures += 1;
            eprintln!("[script] prefab '{name}' not found (requested by object {})", self.object.index());
        }
        spawned
    }

    /// Deferred to the next phase boundary; the instance table is never
    /// mutated mid-iteration.
    pub fn destroy(&mut self, object: Entity) {
        if !self.destroy_requests.contains(&object) {
            self.destroy_requests.push(object);
        }
    }

    pub fn destroy_self(&mut self) {
        let object = self.object;
        self.destroy(object);
    }

    pub fn set_enabled(&mut self, object: Entity, enabled: bool) {
        self.enable_requests.push((object, enabled));
    }

    pub fn disable_self(&mut self) {
        let object = self.object;
        self.set_enabled(object, false);
    }

    // ---------- coroutines & timers ----------

    pub fn start_coroutine(&mut self, body: Box<dyn Coroutine>) -> CoroutineId {
        *self.next_coroutine_id += 1;
        let id = CoroutineId(*self.next_coroutine_id);
        self.effects.started.push(CoroutineSlot { id, body, wait: Wait::NextTick });
        id
    }

    pub fn stop_coroutine(&mut self, id: CoroutineId) {
        self.effects.stopped.push(id);
    }

    /// Waits `seconds` of simulated time, then emits `event` once.
    pub fn start_timer(&mut self, seconds: f32, event: impl Into<String>) -> CoroutineId {
        self.start_coroutine(Box::new(TimerCoroutine::new(seconds, event)))
    }

    // ---------- tweens ----------

    /// Start values are snapshotted now: transform fields from the live
    /// transform, anything else from this instance's numeric properties.
    pub fn create_tween(
        &mut self,
        end_values: &[(&str, f32)],
        duration: f32,
        easing: Easing,
        complete_event: Option<&str>,
    ) {
        let mut tracks = Vec::with_capacity(end_values.len());
        for (name, end) in end_values {
            let field = TweenField::parse(name);
            let start = match &field {
                TweenField::Property(key) => {
                    self.properties.get(key).and_then(Value::as_f64).unwrap_or(0.0) as f32
                }
                transform_field => {
                    crate::tween::TweenEngine::snapshot_transform_start(
                        self.runtime.scene,
                        self.object,
                        transform_field,
                    )
                    .unwrap_or(0.0)
                }
            };
            tracks.push(TweenTrack { field, start, end: *end });
        }
        self.runtime.tweens.create(
            self.object,
            tracks,
            duration,
            easing,
            complete_event.map(str::to_string),
        );
    }

    pub fn stop_tweens(&mut self) {
        let object = self.object;
        self.runtime.tweens.stop_for_target(object);
    }

    // ---------- misc ----------

    pub fn cache(&mut self) -> &mut crate::cache::CacheStore {
        &mut *self.runtime.cache
    }

    pub fn random_range(&mut self, min: f32, max: f32) -> f32 {
        if max <= min {
            return min;
        }
        rand::thread_rng().gen_range(min..max)
    }

    /// Also mirrored onto the bus as a `script_log` event.
    pub fn log(&mut self, message: impl AsRef<str>) {
        let message = message.as_ref();
        println!("[script] {message}");
        let payload = serde_json::json!({ "object": self.object.index(), "message": message });
        self.runtime.bus.emit("script_log", payload);
    }
}

/// Binds behaviours to scene objects and drives their lifecycle in a
/// fixed per-tick phase order.
pub struct ScriptSystem {
    registry: ScriptRegistry,
    config: ScriptConfig,
    instances: HashMap<Entity, ScriptInstance>,
    quarantined: HashSet<Entity>,
    destroy_requests: Vec<Entity>,
    enable_requests: Vec<(Entity, bool)>,
    next_coroutine_id: u64,
    playing: bool,
}

impl ScriptSystem {
    pub fn new(config: ScriptConfig) -> Self {
        Self {
            registry: ScriptRegistry::new(),
            config,
            instances: HashMap::new(),
            quarantined: HashSet::new(),
            destroy_requests: Vec::new(),
            enable_requests: Vec::new(),
            next_coroutine_id: 0,
            playing: false,
        }
    }

    pub fn registry_mut(&mut self) -> &mut ScriptRegistry {
        &mut self.registry
    }

    pub fn playing(&self) -> bool {
        self.playing
    }

    pub fn instance(&self, object: Entity) -> Option<&ScriptInstance> {
        self.instances.get(&object)
    }

    pub fn state_of(&self, object: Entity) -> Option<InstanceState> {
        self.instances.get(&object).map(|i| i.state)
    }

    pub fn live_instances(&self) -> usize {
        self.instances.len()
    }

    pub(crate) fn begin_play(&mut self) {
        self.playing = true;
        self.quarantined.clear();
    }

    /// Dry run; never touches live instances.
    pub fn validate_reload(&self, behaviour: &str) -> ReloadCheck {
        match self.registry.construct(behaviour) {
            Ok(_) => ReloadCheck { valid: true, error: None },
            Err(err) => ReloadCheck { valid: false, error: Some(format!("{err:#}")) },
        }
    }

    /// Constructs an instance for the object's current script if none
    /// exists. A failure in init or start leaves no partial instance and
    /// quarantines the object for the rest of the play session.
    pub fn ensure_instance(&mut self, ctx: &mut RuntimeContext<'_>, object: Entity) -> bool {
        let Some(name) = ctx.scene.script_ref(object) else {
            return false;
        };
        if let Some(existing) = self.instances.get(&object) {
            if existing.behaviour_name == name {
                return true;
            }
            // Script source changed under us: replace, never duplicate.
            self.teardown_instance(ctx, object, true);
        }
        if self.quarantined.contains(&object) {
            return false;
        }
        let behaviour = match self.registry.construct(&name) {
            Ok(behaviour) => behaviour,
            Err(err) => {
                self.quarantined.insert(object);
                report_error(ctx, object, "construct", &err, self.config.log_callback_errors);
                return false;
            }
        };
        let mut instance = ScriptInstance {
            behaviour,
            behaviour_name: name.clone(),
            state: InstanceState::Uninitialized,
            properties: ctx.scene.property_blob(object).unwrap_or_default(),
            coroutines: Vec::new(),
            subscriptions: SmallVec::new(),
        };
        for phase in ["init", "start"] {
            let result = self.call(ctx, object, &mut instance, |behaviour, sctx| match phase {
                "init" => behaviour.on_init(sctx),
                _ => behaviour.on_start(sctx),
            });
            if let Err(err) = result {
                // No partial instance survives a construction failure.
                ctx.bus.release_target(object);
                ctx.tweens.stop_for_target(object);
                self.quarantined.insert(object);
                report_error(ctx, object, phase, &err, self.config.log_callback_errors);
                return false;
            }
        }
        instance.state = InstanceState::Active;
        ctx.scene.index.register_script(&name, object);
        self.instances.insert(object, instance);
        true
    }

    /// Rebuilds the instance from the currently registered factory,
    /// carrying its properties across. Never leaves two live instances.
    pub fn hot_reload(&mut self, ctx: &mut RuntimeContext<'_>, object: Entity) -> Result<()> {
        let name = ctx
            .scene
            .script_ref(object)
            .ok_or_else(|| anyhow!("object {} has no script attached", object.index()))?;
        self.quarantined.remove(&object);
        let captured = match self.instances.get(&object) {
            Some(instance) => instance.properties.clone(),
            None => ctx.scene.property_blob(object).unwrap_or_default(),
        };
        self.teardown_instance(ctx, object, true);
        if !self.playing {
            // Instances only exist in play mode; outside it a reload just
            // revalidates the source and keeps the durable store.
            ctx.scene.write_property_blob(object, captured);
            let check = self.validate_reload(&name);
            return if check.valid {
                Ok(())
            } else {
                Err(anyhow!(check.error.unwrap_or_else(|| "invalid behaviour".to_string())))
            };
        }
        let behaviour = self.registry.construct(&name)?;
        let mut instance = ScriptInstance {
            behaviour,
            behaviour_name: name.clone(),
            state: InstanceState::Uninitialized,
            properties: captured,
            coroutines: Vec::new(),
            subscriptions: SmallVec::new(),
        };
        for phase in ["init", "start"] {
            let result = self.call(ctx, object, &mut instance, |behaviour, sctx| match phase {
                "init" => behaviour.on_init(sctx),
                _ => behaviour.on_start(sctx),
            });
            if let Err(err) = result {
                ctx.bus.release_target(object);
                ctx.tweens.stop_for_target(object);
                self.quarantined.insert(object);
                return Err(err.context(format!("hot reload of '{name}' failed in {phase}")));
            }
        }
        instance.state = InstanceState::Active;
        ctx.scene.write_property_blob(object, instance.properties.clone());
        ctx.scene.index.register_script(&name, object);
        self.instances.insert(object, instance);
        Ok(())
    }

    /// Flushes property stores, runs cleanup hooks and rebuilds the tag
    /// index from the surviving objects.
    pub fn shutdown(&mut self, ctx: &mut RuntimeContext<'_>) {
        let order = ctx.scene.objects_in_order();
        for &object in &order {
            if let Some(instance) = self.instances.get(&object) {
                ctx.scene.write_property_blob(object, instance.properties.clone());
            }
            self.teardown_instance(ctx, object, true);
        }
        self.instances.clear();
        self.quarantined.clear();
        self.destroy_requests.clear();
        self.enable_requests.clear();
        ctx.scene.index.clear();
        for object in order {
            for tag in ctx.scene.tags_of(object) {
                ctx.scene.index.insert_tag(&tag, object);
            }
        }
        self.playing = false;
    }

    pub fn dispatch_deliveries(&mut self, ctx: &mut RuntimeContext<'_>, deliveries: &[Delivery]) {
        if !self.playing {
            return;
        }
        for delivery in deliveries {
            let Some(mut instance) = self.instances.remove(&delivery.target) else {
                continue;
            };
            if instance.state != InstanceState::Active {
                self.instances.insert(delivery.target, instance);
                continue;
            }
            let result = self.call(ctx, delivery.target, &mut instance, |behaviour, sctx| {
                behaviour.on_event(sctx, &delivery.name, &delivery.payload)
            });
            self.instances.insert(delivery.target, instance);
            if let Err(err) = result {
                report_error(ctx, delivery.target, "event", &err, self.config.log_callback_errors);
                self.teardown_instance(ctx, delivery.target, false);
                self.quarantined.insert(delivery.target);
            }
        }
        self.apply_requests(ctx);
    }

    pub fn destroy_object(&mut self, ctx: &mut RuntimeContext<'_>, object: Entity) {
        self.teardown_instance(ctx, object, true);
        ctx.scene.despawn(object);
    }

    pub fn set_enabled(&mut self, ctx: &mut RuntimeContext<'_>, object: Entity, enabled: bool) {
        self.apply_enable(ctx, object, enabled);
    }

    // ---------- internals ----------

    /// Every destruction path ends up here: stop, reload, shutdown and
    /// error discard alike.
    fn teardown_instance(&mut self, ctx: &mut RuntimeContext<'_>, object: Entity, run_disable: bool) {
        let Some(mut instance) = self.instances.remove(&object) else {
            return;
        };
        if run_disable && instance.state == InstanceState::Active {
            let result =
                self.call(ctx, object, &mut instance, |behaviour, sctx| behaviour.on_disable(sctx));
            if let Err(err) = result {
                report_error(ctx, object, "disable", &err, self.config.log_callback_errors);
            }
        }
        ctx.bus.release_target(object);
        ctx.tweens.stop_for_target(object);
        ctx.scene.index.unregister_script(&instance.behaviour_name, object);
        instance.state = InstanceState::Destroyed;
        drop(instance);
    }

    fn call(
        &mut self,
        ctx: &mut RuntimeContext<'_>,
        object: Entity,
        instance: &mut ScriptInstance,
        f: impl FnOnce(&mut dyn ScriptBehaviour, &mut ScriptContext<'_, '_>) -> Result<()>,
    ) -> Result<()> {
        let mut effects = ContextEffects::default();
        let result = {
            let mut sctx = ScriptContext {
                object,
                runtime: &mut *ctx,
                properties: &mut instance.properties,
                subscriptions: &mut instance.subscriptions,
                effects: &mut effects,
                destroy_requests: &mut self.destroy_requests,
                enable_requests: &mut self.enable_requests,
                next_coroutine_id: &mut self.next_coroutine_id,
            };
            f(instance.behaviour.as_mut(), &mut sctx)
        };
        self.merge_effects(ctx, object, instance, effects);
        result
    }

    fn merge_effects(
        &mut self,
        ctx: &mut RuntimeContext<'_>,
        object: Entity,
        instance: &mut ScriptInstance,
        mut effects: ContextEffects,
    ) {
        if !effects.stopped.is_empty() {
            instance.coroutines.retain(|slot| !effects.stopped.contains(&slot.id));
            effects.started.retain(|slot| !effects.stopped.contains(&slot.id));
        }
        for slot in effects.started {
            if instance.coroutines.len() >= self.config.max_coroutines_per_instance {
                ctx.stats.script_errors += 1;
                eprintln!(
                    "[script] coroutine budget ({}) exhausted for object {}",
                    self.config.max_coroutines_per_instance,
                    object.index()
                );
                break;
            }
            instance.coroutines.push(slot);
        }
    }

    fn run_update_phase(&mut self, ctx: &mut RuntimeContext<'_>, order: &[Entity], dt: f32) {
        for &object in order {
            let Some(mut instance) = self.instances.remove(&object) else {
                continue;
            };
            if instance.state != InstanceState::Active {
                self.instances.insert(object, instance);
                continue;
            }
            let result = self.call(ctx, object, &mut instance, |behaviour, sctx| {
                behaviour.on_update(sctx, dt)
            });
            self.instances.insert(object, instance);
            if let Err(err) = result {
                report_error(ctx, object, "update", &err, self.config.log_callback_errors);
                self.teardown_instance(ctx, object, false);
                self.quarantined.insert(object);
            }
        }
    }

    fn run_late_phase(&mut self, ctx: &mut RuntimeContext<'_>, order: &[Entity], dt: f32) {
        for &object in order {
            let Some(mut instance) = self.instances.remove(&object) else {
                continue;
            };
            if instance.state != InstanceState::Active {
                self.instances.insert(object, instance);
                continue;
            }
            let result = self.call(ctx, object, &mut instance, |behaviour, sctx| {
                behaviour.on_late_update(sctx, dt)
            });
            self.instances.insert(object, instance);
            if let Err(err) = result {
                report_error(ctx, object, "late_update", &err, self.config.log_callback_errors);
                self.teardown_instance(ctx, object, false);
                self.quarantined.insert(object);
            }
        }
    }

    /// At most one resume per coroutine per tick, in insertion order.
    /// Disabled instances keep resuming; only destruction stops them.
    fn resume_coroutines(&mut self, ctx: &mut RuntimeContext<'_>, object: Entity, dt: f32) {
        let Some(mut instance) = self.instances.remove(&object) else {
            return;
        };
        let slots = std::mem::take(&mut instance.coroutines);
        let mut kept = Vec::with_capacity(slots.len());
        for mut slot in slots {
            let input = match &slot.wait {
                Wait::NextTick => ResumeInput::Delta(dt),
                Wait::Until(handle) => match handle.state() {
                    AwaitState::Pending => {
                        kept.push(slot);
                        continue;
                    }
                    AwaitState::Resolved(value) => ResumeInput::Resolved(value),
                    AwaitState::Rejected(reason) => ResumeInput::Failed(reason),
                },
            };
            let mut effects = ContextEffects::default();
            let result = {
                let mut sctx = ScriptContext {
                    object,
                    runtime: &mut *ctx,
                    properties: &mut instance.properties,
                    subscriptions: &mut instance.subscriptions,
                    effects: &mut effects,
                    destroy_requests: &mut self.destroy_requests,
                    enable_requests: &mut self.enable_requests,
                    next_coroutine_id: &mut self.next_coroutine_id,
                };
                slot.body.resume(&mut sctx, input)
            };
            match result {
                Ok(CoroutinePoll::Yielded(wait)) => {
                    slot.wait = wait;
                    kept.push(slot);
                }
                Ok(CoroutinePoll::Complete) => {}
                Err(err) => {
                    // Sibling coroutines keep running; only this one dies.
                    report_error(ctx, object, "coroutine", &err, self.config.log_callback_errors);
                }
            }
            // Stops and starts queued during the resume apply to the kept
            // list; new coroutines are not resumed until next tick.
            if !effects.stopped.is_empty() {
                kept.retain(|s| !effects.stopped.contains(&s.id));
                effects.started.retain(|s| !effects.stopped.contains(&s.id));
            }
            kept.extend(effects.started);
        }
        instance.coroutines = kept;
        self.instances.insert(object, instance);
    }

    fn apply_requests(&mut self, ctx: &mut RuntimeContext<'_>) {
        let destroys = std::mem::take(&mut self.destroy_requests);
        for object in destroys {
            self.teardown_instance(ctx, object, true);
            ctx.scene.despawn(object);
        }
        let toggles = std::mem::take(&mut self.enable_requests);
        for (object, enabled) in toggles {
            self.apply_enable(ctx, object, enabled);
        }
    }

    fn apply_enable(&mut self, ctx: &mut RuntimeContext<'_>, object: Entity, enabled: bool) {
        let Some(mut instance) = self.instances.remove(&object) else {
            return;
        };
        match (instance.state, enabled) {
            (InstanceState::Active, false) => {
                let result = self
                    .call(ctx, object, &mut instance, |behaviour, sctx| behaviour.on_disable(sctx));
                if let Err(err) = result {
                    report_error(ctx, object, "disable", &err, self.config.log_callback_errors);
                }
                instance.state = InstanceState::Disabled;
            }
            (InstanceState::Disabled, true) => {
                instance.state = InstanceState::Active;
            }
            _ => {}
        }
        self.instances.insert(object, instance);
    }

    fn persist_properties(&self, ctx: &mut RuntimeContext<'_>) {
        for (&object, instance) in &self.instances {
            if ctx.scene.contains(object) {
                ctx.scene.write_property_blob(object, instance.properties.clone());
            }
        }
    }
}

impl StepHandler for ScriptSystem {
    fn name(&self) -> &'static str {
        "script_system"
    }

    /// Update callbacks for every instance, then coroutine resumption in
    /// the same object order, then tween advance.
    fn update(&mut self, ctx: &mut RuntimeContext<'_>, dt: f32) -> Result<()> {
        if !self.playing {
            return Ok(());
        }
        let order = ctx.scene.objects_in_order();
        for &object in &order {
            self.ensure_instance(ctx, object);
        }
        self.run_update_phase(ctx, &order, dt);
        for &object in &order {
            self.resume_coroutines(ctx, object, dt);
        }
        let instances = &mut self.instances;
        ctx.tweens.advance(dt, ctx.scene, ctx.bus, &mut |target, key, value| {
            if let Some(instance) = instances.get_mut(&target) {
                instance.properties.insert(key.to_string(), Value::from(f64::from(value)));
            }
        });
        self.apply_requests(ctx);
        Ok(())
    }

    /// Runs after all fixed substeps; property stores persist here.
    fn late_update(&mut self, ctx: &mut RuntimeContext<'_>, dt: f32) -> Result<()> {
        if !self.playing {
            return Ok(());
        }
        let order = ctx.scene.objects_in_order();
        self.run_late_phase(ctx, &order, dt);
        self.persist_properties(ctx);
        self.apply_requests(ctx);
        Ok(())
    }
}

fn report_error(
    ctx: &mut RuntimeContext<'_>,
    object: Entity,
    phase: &str,
    err: &anyhow::Error,
    log: bool,
) {
    ctx.stats.script_errors += 1;
    let name = ctx.scene.name_of(object).unwrap_or_else(|| format!("entity{}", object.index()));
    if log {
        eprintln!("[script] {phase} failed for '{name}' (object {}): {err:#}", object.index());
    }
    ctx.bus.emit(
        "script_error",
        serde_json::json!({
            "object": object.index(),
            "name": name,
            "phase": phase,
            "error": format!("{err:#}"),
        }),
    );
}
