use std::cell::RefCell;
use std::rc::Rc;

use anyhow::Result;
use serde_json::{json, Value};
use tern_engine::events::EventBus;
use tern_engine::scripts::{ScriptBehaviour, ScriptContext};
use tern_engine::world::Transform;
use tern_engine::Runtime;

type Log = Rc<RefCell<Vec<String>>>;

struct Recorder {
    label: &'static str,
    log: Log,
    once: bool,
}

impl ScriptBehaviour for Recorder {
    fn on_init(&mut self, ctx: &mut ScriptContext<'_, '_>) -> Result<()> {
        if self.once {
            ctx.subscribe_once("signal");
        } else {
            ctx.subscribe("signal");
        }
        Ok(())
    }

    fn on_event(
        &mut self,
        _ctx: &mut ScriptContext<'_, '_>,
        name: &str,
        payload: &Value,
    ) -> Result<()> {
        self.log.borrow_mut().push(format!("{}:{name}:{}", self.label, payload["n"]));
        Ok(())
    }
}

fn recorder_runtime(labels: &[(&'static str, bool)]) -> (Runtime, Log) {
    let mut runtime = Runtime::with_defaults();
    let log: Log = Rc::new(RefCell::new(Vec::new()));
    for &(label, once) in labels {
        let cell = log.clone();
        runtime.register_behaviour(label, move || {
            Ok(Box::new(Recorder { label, log: cell.clone(), once }) as Box<dyn ScriptBehaviour>)
        });
        let object = runtime.scene_mut().spawn_object(label, Transform::default());
        runtime.scene_mut().attach_script(object, label);
    }
    runtime.start_play();
    (runtime, log)
}

#[test]
fn delivery_order_matches_subscription_order() {
    let (mut runtime, log) = recorder_runtime(&[("first", false), ("second", false)]);
    runtime.tick(0.016);
    runtime.bus_mut().emit("signal", json!({ "n": 1 }));
    runtime.tick(0.016);
    assert_eq!(log.borrow().as_slice(), ["first:signal:1", "second:signal:1"]);
}

#[test]
fn emission_during_a_tick_is_delivered_the_next_tick() {
    struct Shouter;
    impl ScriptBehaviour for Shouter {
        fn on_update(&mut self, ctx: &mut ScriptContext<'_, '_>, _dt: f32) -> Result<()> {
            if ctx.get_number("shouted").is_none() {
                ctx.set_number("shouted", 1.0);
                ctx.emit("signal", json!({ "n": 9 }));
            }
            Ok(())
        }
    }

    let (mut runtime, log) = recorder_runtime(&[("listener", false)]);
    runtime.register_behaviour("shouter", || Ok(Box::new(Shouter) as Box<dyn ScriptBehaviour>));
    let shouter = runtime.scene_mut().spawn_object("shouter", Transform::default());
    runtime.scene_mut().attach_script(shouter, "shouter");

    runtime.tick(0.016);
    assert!(log.borrow().is_empty(), "same-tick emission is queued, not delivered inline");
    runtime.tick(0.016);
    assert_eq!(log.borrow().as_slice(), ["listener:signal:9"]);
}

#[test]
fn once_subscription_fires_a_single_time() {
    let (mut runtime, log) = recorder_runtime(&[("oneshot", true), ("steady", false)]);
    runtime.tick(0.016);
    runtime.bus_mut().emit("signal", json!({ "n": 1 }));
    runtime.tick(0.016);
    runtime.bus_mut().emit("signal", json!({ "n": 2 }));
    runtime.tick(0.016);
    assert_eq!(
        log.borrow().as_slice(),
        ["oneshot:signal:1", "steady:signal:1", "steady:signal:2"]
    );
    assert_eq!(runtime.bus().subscription_count(), 1, "the consumed subscription is gone");
}

#[test]
fn events_without_subscribers_vanish_quietly() {
    let mut bus = EventBus::default();
    bus.emit("nobody_home", json!(null));
    let deliveries = bus.drain_deliveries();
    assert!(deliveries.is_empty());
    assert_eq!(bus.pending_events(), 0, "the queue drains even with no subscribers");
}

#[test]
fn unsubscribe_is_idempotent_through_the_script_api() {
    struct FlipFlop {
        handle: Option<tern_engine::events::SubscriptionHandle>,
    }
    impl ScriptBehaviour for FlipFlop {
        fn on_init(&mut self, ctx: &mut ScriptContext<'_, '_>) -> Result<()> {
            self.handle = Some(ctx.subscribe("signal"));
            Ok(())
        }
        fn on_update(&mut self, ctx: &mut ScriptContext<'_, '_>, _dt: f32) -> Result<()> {
            if let Some(handle) = self.handle.take() {
                ctx.unsubscribe(handle);
                ctx.unsubscribe(handle);
            }
            Ok(())
        }
    }

    let mut runtime = Runtime::with_defaults();
    runtime.register_behaviour("flipflop", || {
        Ok(Box::new(FlipFlop { handle: None }) as Box<dyn ScriptBehaviour>)
    });
    let object = runtime.scene_mut().spawn_object("flipflop", Transform::default());
    runtime.scene_mut().attach_script(object, "flipflop");
    runtime.start_play();
    runtime.tick(0.016);
    assert_eq!(runtime.bus().subscription_count(), 0);
    runtime.bus_mut().emit("signal", json!({ "n": 1 }));
    runtime.tick(0.016);
    // No delivery, no panic: the double-unsubscribe was a no-op.
    assert_eq!(runtime.stats().script_errors, 0);
}
