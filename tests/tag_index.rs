use anyhow::Result;
use tern_engine::scripts::{ScriptBehaviour, ScriptContext};
use tern_engine::world::{SceneWorld, Transform};
use tern_engine::Runtime;

#[test]
fn tag_membership_and_index_stay_in_step() {
    let mut scene = SceneWorld::new();
    let a = scene.spawn_object("a", Transform::default());
    let b = scene.spawn_object("b", Transform::default());

    assert!(scene.add_tag(a, "enemy"));
    assert!(!scene.add_tag(a, "enemy"), "double-add is rejected");
    assert!(scene.add_tag(b, "enemy"));
    assert!(scene.add_tag(b, "boss"));

    assert_eq!(scene.index.with_tag("enemy"), vec![a, b]);
    assert!(scene.has_tag(b, "boss"));
    assert_eq!(scene.tags_of(b), vec!["enemy".to_string(), "boss".to_string()]);

    assert!(scene.remove_tag(a, "enemy"));
    assert!(!scene.remove_tag(a, "enemy"), "removal of an absent tag is a no-op");
    assert_eq!(scene.index.with_tag("enemy"), vec![b]);
    assert!(!scene.has_tag(a, "enemy"));
}

#[test]
fn unknown_tag_lookup_returns_empty() {
    let scene = SceneWorld::new();
    assert!(scene.index.with_tag("nonexistent").is_empty());
    assert!(scene.index.with_script("nonexistent").is_empty());
}

#[test]
fn despawn_purges_every_bucket() {
    let mut scene = SceneWorld::new();
    let a = scene.spawn_object("a", Transform::default());
    let b = scene.spawn_object("b", Transform::default());
    scene.add_tag(a, "enemy");
    scene.add_tag(a, "fast");
    scene.add_tag(b, "enemy");

    scene.despawn(a);
    assert_eq!(scene.index.with_tag("enemy"), vec![b]);
    assert!(scene.index.with_tag("fast").is_empty(), "empty buckets disappear");
    assert_eq!(scene.index.tag_count(), 1);
}

#[test]
fn lookup_results_are_snapshots() {
    let mut scene = SceneWorld::new();
    let a = scene.spawn_object("a", Transform::default());
    scene.add_tag(a, "enemy");

    let snapshot = scene.index.with_tag("enemy");
    scene.remove_tag(a, "enemy");
    assert_eq!(snapshot, vec![a], "earlier snapshots are unaffected by later mutation");
    assert!(scene.index.with_tag("enemy").is_empty());
}

#[test]
fn scripts_query_by_tag_and_by_behaviour() {
    struct Seeker;
    impl ScriptBehaviour for Seeker {
        fn on_update(&mut self, ctx: &mut ScriptContext<'_, '_>, _dt: f32) -> Result<()> {
            ctx.set_number("enemies", ctx.find_by_tag("enemy").len() as f64);
            ctx.set_number("seekers", ctx.find_by_script("seeker").len() as f64);
            Ok(())
        }
    }

    let mut runtime = Runtime::with_defaults();
    runtime.register_behaviour("seeker", || Ok(Box::new(Seeker) as Box<dyn ScriptBehaviour>));
    let seeker = runtime.scene_mut().spawn_object("seeker", Transform::default());
    runtime.scene_mut().attach_script(seeker, "seeker");
    let e1 = runtime.scene_mut().spawn_object("e1", Transform::default());
    runtime.scene_mut().add_tag(e1, "enemy");
    let e2 = runtime.scene_mut().spawn_object("e2", Transform::default());
    runtime.scene_mut().add_tag(e2, "enemy");

    runtime.start_play();
    runtime.tick(0.016);

    fn prop(runtime: &Runtime, object: bevy_ecs::prelude::Entity, key: &str) -> Option<f64> {
        runtime
            .scripts()
            .instance(object)
            .and_then(|i| i.property(key))
            .and_then(serde_json::Value::as_f64)
    }
    assert_eq!(prop(&runtime, seeker, "enemies"), Some(2.0));
    assert_eq!(
        prop(&runtime, seeker, "seekers"),
        Some(1.0),
        "script index registers live instances"
    );

    runtime.destroy_object(e1);
    runtime.tick(0.016);
    assert_eq!(prop(&runtime, seeker, "enemies"), Some(1.0));
}
