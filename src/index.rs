use bevy_ecs::prelude::Entity;
use std::collections::HashMap;

/// Reverse lookup indices over the live object population.
#[derive(Default)]
pub struct IndexRegistry {
    tags: HashMap<String, Vec<Entity>>,
    scripts: HashMap<String, Vec<Entity>>,
}

impl IndexRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert_tag(&mut self, tag: &str, object: Entity) -> bool {
        let bucket = self.tags.entry(tag.to_string()).or_default();
        if bucket.contains(&object) {
            return false;
        }
        bucket.push(object);
        true
    }

    pub fn remove_tag(&mut self, tag: &str, object: Entity) -> bool {
        let Some(bucket) = self.tags.get_mut(tag) else {
            return false;
        };
        let Some(pos) = bucket.iter().position(|&e| e == object) else {
            return false;
        };
        bucket.remove(pos);
        if bucket.is_empty() {
            self.tags.remove(tag);
        }
        true
    }

    /// Snapshot; callers may mutate the result freely.
    pub fn with_tag(&self, tag: &str) -> Vec<Entity> {
        self.tags.get(tag).cloned().unwrap_or_default()
    }

    pub fn tag_contains(&self, tag: &str, object: Entity) -> bool {
        self.tags.get(tag).is_some_and(|bucket| bucket.contains(&object))
    }

    pub fn register_script(&mut self, behaviour: &str, object: Entity) {
        let bucket = self.scripts.entry(behaviour.to_string()).or_default();
        if !bucket.contains(&object) {
            bucket.push(object);
        }
    }

    pub fn unregister_script(&mut self, behaviour: &str, object: Entity) {
        if let Some(bucket) = self.scripts.get_mut(behaviour) {
            bucket.retain(|&e| e != object);
            if bucket.is_empty() {
                self.scripts.remove(behaviour);
            }
        }
    }

    pub fn with_script(&self, behaviour: &str) -> Vec<Entity> {
        self.scripts.get(behaviour).cloned().unwrap_or_default()
    }

    /// Purges a destroyed object from every bucket in the same step.
    pub fn remove_object(&mut self, object: Entity) {
        self.tags.retain(|_, bucket| {
            bucket.retain(|&e| e != object);
            !bucket.is_empty()
        });
        self.scripts.retain(|_, bucket| {
            bucket.retain(|&e| e != object);
            !bucket.is_empty()
        });
    }

    pub fn clear(&mut self) {
        self.tags.clear();
        self.scripts.clear();
    }

    pub fn tag_count(&self) -> usize {
        self.tags.len()
    }
}
