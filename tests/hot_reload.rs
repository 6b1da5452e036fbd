use std::cell::RefCell;
use std::rc::Rc;

use anyhow::{anyhow, Result};
use serde_json::Value;
use tern_engine::scripts::{InstanceState, ScriptBehaviour, ScriptContext};
use tern_engine::world::Transform;
use tern_engine::Runtime;

struct Versioned {
    version: f64,
    inits: Rc<RefCell<u32>>,
}

impl ScriptBehaviour for Versioned {
    fn on_init(&mut self, ctx: &mut ScriptContext<'_, '_>) -> Result<()> {
        *self.inits.borrow_mut() += 1;
        ctx.set_number("version", self.version);
        Ok(())
    }

    fn on_update(&mut self, ctx: &mut ScriptContext<'_, '_>, _dt: f32) -> Result<()> {
        let count = ctx.get_number("count").unwrap_or(0.0);
        ctx.set_number("count", count + 1.0);
        Ok(())
    }
}

fn register_version(runtime: &mut Runtime, version: f64, inits: &Rc<RefCell<u32>>) {
    let cell = inits.clone();
    runtime.register_behaviour("versioned", move || {
        Ok(Box::new(Versioned { version, inits: cell.clone() }) as Box<dyn ScriptBehaviour>)
    });
}

#[test]
fn reload_swaps_logic_and_keeps_the_property_store() {
    let mut runtime = Runtime::with_defaults();
    let inits = Rc::new(RefCell::new(0));
    register_version(&mut runtime, 1.0, &inits);

    let object = runtime.scene_mut().spawn_object("npc", Transform::default());
    runtime.scene_mut().attach_script(object, "versioned");
    runtime.start_play();
    runtime.tick(0.016);
    runtime.tick(0.016);

    register_version(&mut runtime, 2.0, &inits);
    runtime.hot_reload(object).expect("reload of a registered behaviour succeeds");

    let prop = |rt: &Runtime, key: &str| {
        rt.scripts().instance(object).and_then(|i| i.property(key)).and_then(Value::as_f64)
    };
    assert_eq!(prop(&runtime, "count"), Some(2.0), "accumulated state survives the swap");
    assert_eq!(prop(&runtime, "version"), Some(2.0), "the new logic ran its init");
    assert_eq!(*inits.borrow(), 2, "old instance init once, new instance init once");
    assert_eq!(runtime.scripts().state_of(object), Some(InstanceState::Active));
    assert_eq!(runtime.scripts().live_instances(), 1, "never two instances for one object");

    runtime.tick(0.016);
    assert_eq!(prop(&runtime, "count"), Some(3.0), "the new instance keeps counting");
}

#[test]
fn reload_outside_play_mode_only_touches_the_durable_store() {
    let mut runtime = Runtime::with_defaults();
    let inits = Rc::new(RefCell::new(0));
    register_version(&mut runtime, 1.0, &inits);

    let object = runtime.scene_mut().spawn_object("npc", Transform::default());
    runtime.scene_mut().attach_script(object, "versioned");

    runtime.hot_reload(object).expect("validation passes without play mode");
    assert_eq!(*inits.borrow(), 0, "no lifecycle hook runs outside play mode");
    assert_eq!(runtime.scripts().live_instances(), 0);
}

#[test]
fn failed_reload_leaves_no_partial_instance() {
    let mut runtime = Runtime::with_defaults();
    let inits = Rc::new(RefCell::new(0));
    register_version(&mut runtime, 1.0, &inits);

    let object = runtime.scene_mut().spawn_object("npc", Transform::default());
    runtime.scene_mut().attach_script(object, "versioned");
    runtime.start_play();
    runtime.tick(0.016);

    runtime.register_behaviour("versioned", || Err(anyhow!("syntax error in rewrite")));
    let err = runtime.hot_reload(object).expect_err("broken factory fails the reload");
    assert!(format!("{err:#}").contains("syntax error"));
    assert!(runtime.scripts().state_of(object).is_none(), "the old instance is gone, not half-swapped");
    assert_eq!(runtime.bus().subscription_count(), 0);
}

#[test]
fn validate_reload_reports_without_mutating() {
    let mut runtime = Runtime::with_defaults();
    let inits = Rc::new(RefCell::new(0));
    register_version(&mut runtime, 1.0, &inits);

    let check = runtime.validate_reload("versioned");
    assert!(check.valid);
    assert!(check.error.is_none());

    let check = runtime.validate_reload("missing");
    assert!(!check.valid);
    assert!(check.error.is_some());
}

#[test]
fn reload_of_an_unscripted_object_is_an_error() {
    let mut runtime = Runtime::with_defaults();
    let object = runtime.scene_mut().spawn_object("plain", Transform::default());
    runtime.start_play();
    assert!(runtime.hot_reload(object).is_err());
}
