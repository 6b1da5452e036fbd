use crate::events::EventBus;
use crate::world::{SceneWorld, Transform};
use bevy_ecs::prelude::Entity;
use serde::{Deserialize, Serialize};
use serde_json::json;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum Easing {
    #[default]
    Linear,
    QuadIn,
    QuadOut,
    QuadInOut,
    CubicIn,
    CubicOut,
    CubicInOut,
    ElasticOut,
    BounceOut,
}

impl Easing {
    /// Exact curve formulas; `t` is normalized progress in [0, 1].
    pub fn apply(self, t: f32) -> f32 {
        match self {
            Easing::Linear => t,
            Easing::QuadIn => t * t,
            Easing::QuadOut => t * (2.0 - t),
            Easing::QuadInOut => {
                if t < 0.5 {
                    2.0 * t * t
                } else {
                    1.0 - (-2.0 * t + 2.0).powi(2) / 2.0
                }
            }
            Easing::CubicIn => t * t * t,
            Easing::CubicOut => 1.0 - (1.0 - t).powi(3),
            Easing::CubicInOut => {
                if t < 0.5 {
                    4.0 * t * t * t
                } else {
                    1.0 - (-2.0 * t + 2.0).powi(3) / 2.0
                }
            }
            Easing::ElasticOut => {
                if t <= 0.0 {
                    0.0
                } else if t >= 1.0 {
                    1.0
                } else {
                    let c4 = (2.0 * std::f32::consts::PI) / 3.0;
                    (2.0f32).powf(-10.0 * t) * ((t * 10.0 - 0.75) * c4).sin() + 1.0
                }
            }
            Easing::BounceOut => {
                let n1 = 7.5625;
                let d1 = 2.75;
                if t < 1.0 / d1 {
                    n1 * t * t
                } else if t < 2.0 / d1 {
                    let t = t - 1.5 / d1;
                    n1 * t * t + 0.75
                } else if t < 2.5 / d1 {
                    let t = t - 2.25 / d1;
                    n1 * t * t + 0.9375
                } else {
                    let t = t - 2.625 / d1;
                    n1 * t * t + 0.984375
                }
            }
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum TweenField {
    X,
    Y,
    Rotation,
    ScaleX,
    ScaleY,
    Property(String),
}

impl TweenField {
    pub fn parse(name: &str) -> Self {
        match name {
            "x" => TweenField::X,
            "y" => TweenField::Y,
            "rotation" => TweenField::Rotation,
            "scale_x" => TweenField::ScaleX,
            "scale_y" => TweenField::ScaleY,
            other => TweenField::Property(other.to_string()),
        }
    }

    fn read_transform(&self, transform: &Transform) -> Option<f32> {
        match self {
            TweenField::X => Some(transform.translation.x),
            TweenField::Y => Some(transform.translation.y),
            TweenField::Rotation => Some(transform.rotation),
            TweenField::ScaleX => Some(transform.scale.x),
            TweenField::ScaleY => Some(transform.scale.y),
            TweenField::Property(_) => None,
        }
    }

    fn write_transform(&self, transform: &mut Transform, value: f32) -> bool {
        match self {
            TweenField::X => transform.translation.x = value,
            TweenField::Y => transform.translation.y = value,
            TweenField::Rotation => transform.rotation = value,
            TweenField::ScaleX => transform.scale.x = value,
            TweenField::ScaleY => transform.scale.y = value,
            TweenField::Property(_) => return false,
        }
        true
    }
}

#[derive(Clone, Debug)]
pub struct TweenTrack {
    pub field: TweenField,
    pub start: f32,
    pub end: f32,
}

pub struct Tween {
    target: Entity,
    tracks: Vec<TweenTrack>,
    duration: f32,
    elapsed: f32,
    easing: Easing,
    complete_event: Option<String>,
    completed: bool,
}

impl Tween {
    pub fn completed(&self) -> bool {
        self.completed
    }

    pub fn target(&self) -> Entity {
        self.target
    }
}

/// Timed interpolation of transform axes and numeric script properties.
#[derive(Default)]
pub struct TweenEngine {
    tweens: Vec<Tween>,
}

impl TweenEngine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Tracks carry their start snapshots, resolved by the caller.
    pub fn create(
        &mut self,
        target: Entity,
        tracks: Vec<TweenTrack>,
        duration: f32,
        easing: Easing,
        complete_event: Option<String>,
    ) {
        self.tweens.push(Tween {
            target,
            tracks,
            duration: duration.max(f32::EPSILON),
            elapsed: 0.0,
            easing,
            complete_event,
            completed: false,
        });
    }

    pub fn stop_for_target(&mut self, target: Entity) -> usize {
        let before = self.tweens.len();
        self.tweens.retain(|tween| tween.target != target);
        before - self.tweens.len()
    }

    pub fn active_count(&self) -> usize {
        self.tweens.len()
    }

    /// A tween reaching full progress writes its exact end values, emits
    /// its completion event once and is removed.
    pub fn advance(
        &mut self,
        dt: f32,
        scene: &mut SceneWorld,
        bus: &mut EventBus,
        set_property: &mut dyn FnMut(Entity, &str, f32),
    ) {
        for tween in &mut self.tweens {
            if !scene.contains(tween.target) {
                tween.completed = true;
                continue;
            }
            tween.elapsed += dt;
            let progress = (tween.elapsed / tween.duration).clamp(0.0, 1.0);
            let eased = tween.easing.apply(progress);
            for track in &tween.tracks {
                let value = track.start + (track.end - track.start) * eased;
                match &track.field {
                    TweenField::Property(key) => set_property(tween.target, key, value),
                    transform_field => {
                        if let Some(mut transform) =
                            scene.world.get_mut::<Transform>(tween.target)
                        {
                            transform_field.write_transform(&mut transform, value);
                        }
                    }
                }
            }
            if progress >= 1.0 {
                tween.completed = true;
                if let Some(event) = tween.complete_event.take() {
                    bus.emit(event, json!({ "target": tween.target.index() }));
                }
            }
        }
        self.tweens.retain(|tween| !tween.completed);
    }

    pub fn snapshot_transform_start(scene: &SceneWorld, target: Entity, field: &TweenField) -> Option<f32> {
        scene.transform(target).and_then(|t| field.read_transform(&t))
    }
}
