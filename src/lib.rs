pub mod cache;
pub mod config;
pub mod coroutine;
pub mod events;
pub mod fixed_step;
pub mod index;
pub mod input;
pub mod prefabs;
pub mod runtime;
pub mod scene;
pub mod scripts;
pub mod time;
pub mod tween;
pub mod world;

pub use runtime::Runtime;

pub fn wrap_angle(mut radians: f32) -> f32 {
    let two_pi = 2.0 * std::f32::consts::PI;
    while radians > std::f32::consts::PI {
        radians -= two_pi;
    }
    while radians < -std::f32::consts::PI {
        radians += two_pi;
    }
    radians
}
