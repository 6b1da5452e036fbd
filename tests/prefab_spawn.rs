use std::io::Write as _;

use anyhow::Result;
use glam::Vec2;
use serde_json::json;
use tern_engine::prefabs::{PrefabRegistry, PrefabTemplate};
use tern_engine::scripts::{InstanceState, ScriptBehaviour, ScriptContext};
use tern_engine::world::Transform;
use tern_engine::Runtime;

struct Launcher;

impl ScriptBehaviour for Launcher {
    fn on_update(&mut self, ctx: &mut ScriptContext<'_, '_>, _dt: f32) -> Result<()> {
        if ctx.get_number("fired").is_none() {
            ctx.set_number("fired", 1.0);
            ctx.spawn_prefab("bolt", Some(Vec2::new(3.0, 4.0)), None);
            ctx.spawn_prefab("no_such_prefab", None, None);
        }
        Ok(())
    }
}

struct BoltLogic;

impl ScriptBehaviour for BoltLogic {
    fn on_update(&mut self, ctx: &mut ScriptContext<'_, '_>, dt: f32) -> Result<()> {
        let speed = ctx.get_number("speed").unwrap_or(0.0) as f32;
        ctx.translate(Vec2::new(speed * dt, 0.0));
        Ok(())
    }
}

fn bolt_template() -> PrefabTemplate {
    let mut template = PrefabTemplate::new("bolt");
    template.tags.push("projectile".to_string());
    template.behaviour = Some("bolt_logic".to_string());
    template.properties.insert("speed".to_string(), json!(10.0));
    template
}

#[test]
fn scripted_spawn_creates_a_fully_wired_object() {
    let mut runtime = Runtime::with_defaults();
    runtime.register_behaviour("launcher", || Ok(Box::new(Launcher) as Box<dyn ScriptBehaviour>));
    runtime.register_behaviour("bolt_logic", || {
        Ok(Box::new(BoltLogic) as Box<dyn ScriptBehaviour>)
    });
    runtime.prefabs_mut().register(bolt_template());

    let launcher = runtime.scene_mut().spawn_object("launcher", Transform::default());
    runtime.scene_mut().attach_script(launcher, "launcher");
    runtime.start_play();

    runtime.tick(0.1);
    let bolts = runtime.scene().index.with_tag("projectile");
    assert_eq!(bolts.len(), 1, "one bolt spawned, the unknown prefab was skipped");
    let bolt = bolts[0];
    let t = runtime.scene().transform(bolt).expect("bolt has a transform");
    assert_eq!(t.translation, Vec2::new(3.0, 4.0), "position override wins over the template");
    assert_eq!(runtime.stats().spawn_failures, 1);

    // The bolt's own script comes alive on the next tick's sweep.
    runtime.tick(0.1);
    assert_eq!(runtime.scripts().state_of(bolt), Some(InstanceState::Active));
    let t = runtime.scene().transform(bolt).expect("bolt still exists");
    assert!((t.translation.x - 4.0).abs() < 1e-4, "template property drives the behaviour");
}

#[test]
fn template_defaults_apply_when_no_overrides_given() {
    let mut registry = PrefabRegistry::new();
    let mut template = PrefabTemplate::new("marker");
    template.translation = [7.0, -2.0];
    template.rotation = 0.5;
    registry.register(template);

    let mut scene = tern_engine::world::SceneWorld::new();
    let entity = registry.instantiate(&mut scene, "marker", None, None).expect("marker spawns");
    let t = scene.transform(entity).expect("marker transform");
    assert_eq!(t.translation, Vec2::new(7.0, -2.0));
    assert_eq!(t.rotation, 0.5);
}

#[test]
fn library_file_loads_multiple_templates() {
    let dir = tempfile::tempdir().expect("temp dir");
    let path = dir.path().join("prefabs.json");
    let mut file = std::fs::File::create(&path).expect("create library file");
    write!(
        file,
        r#"[
            {{ "name": "bolt", "tags": ["projectile"], "behaviour": "bolt_logic" }},
            {{ "name": "spark", "translation": [1.0, 2.0] }}
        ]"#
    )
    .expect("write library file");

    let mut registry = PrefabRegistry::new();
    let count = registry.load_library(&path).expect("library parses");
    assert_eq!(count, 2);
    assert!(registry.contains("bolt"));
    assert!(registry.contains("spark"));
}

#[test]
fn malformed_library_reports_the_path() {
    let dir = tempfile::tempdir().expect("temp dir");
    let path = dir.path().join("broken.json");
    std::fs::write(&path, b"not json").expect("write broken file");
    let mut registry = PrefabRegistry::new();
    let err = registry.load_library(&path).expect_err("parse must fail");
    assert!(format!("{err:#}").contains("broken.json"));
}
