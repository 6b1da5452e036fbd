use crate::index::IndexRegistry;
use bevy_ecs::prelude::{Component, Entity, World};
use glam::Vec2;
use serde_json::Value;

pub type PropertyMap = serde_json::Map<String, Value>;

#[derive(Component, Clone, Copy)]
pub struct Transform {
    pub translation: Vec2,
    pub rotation: f32,
    pub scale: Vec2,
}

impl Default for Transform {
    fn default() -> Self {
        Self { translation: Vec2::ZERO, rotation: 0.0, scale: Vec2::splat(1.0) }
    }
}

#[derive(Component, Clone)]
pub struct Name(pub String);

/// Which registered behaviour drives this object.
#[derive(Component, Clone)]
pub struct ScriptRef {
    pub behaviour: String,
}

/// Durable per-object property storage; survives stop/reload and is
/// what the scene snapshot serializes.
#[derive(Component, Clone, Default)]
pub struct PropertyBlob(pub PropertyMap);

#[derive(Component, Clone, Default)]
pub struct Tags(pub Vec<String>);

#[derive(Component, Clone, Copy)]
pub struct Parent(pub Entity);

#[derive(Component, Default)]
pub struct Children(pub Vec<Entity>);

/// A `bevy_ecs` world plus the reverse-lookup indices. Tag mutation
/// goes through one method pair so component and index change together.
pub struct SceneWorld {
    pub world: World,
    pub index: IndexRegistry,
    order: Vec<Entity>,
}

impl Default for SceneWorld {
    fn default() -> Self {
        Self::new()
    }
}

impl SceneWorld {
    pub fn new() -> Self {
        Self { world: World::new(), index: IndexRegistry::new(), order: Vec::new() }
    }

    pub fn spawn_object(&mut self, name: impl Into<String>, transform: Transform) -> Entity {
        let entity = self
            .world
            .spawn((Name(name.into()), transform, Tags::default(), PropertyBlob::default()))
            .id();
        self.order.push(entity);
        entity
    }

    pub fn attach_script(&mut self, object: Entity, behaviour: impl Into<String>) {
        if self.world.get_entity(object).is_err() {
            return;
        }
        self.world.entity_mut(object).insert(ScriptRef { behaviour: behaviour.into() });
    }

    pub fn detach_script(&mut self, object: Entity) {
        if self.world.get_entity(object).is_err() {
            return;
        }
        self.world.entity_mut(object).remove::<ScriptRef>();
    }

    pub fn script_ref(&self, object: Entity) -> Option<String> {
        self.world.get::<ScriptRef>(object).map(|s| s.behaviour.clone())
    }

    pub fn contains(&self, object: Entity) -> bool {
        self.world.get_entity(object).is_ok()
    }

    /// Live objects in spawn order.
    pub fn objects_in_order(&self) -> Vec<Entity> {
        self.order.iter().copied().filter(|&e| self.contains(e)).collect()
    }

    // ---------- tags ----------

    /// False when the object is gone or already carries the tag.
    pub fn add_tag(&mut self, object: Entity, tag: &str) -> bool {
        let Some(mut tags) = self.world.get_mut::<Tags>(object) else {
            return false;
        };
        if tags.0.iter().any(|t| t == tag) {
            return false;
        }
        tags.0.push(tag.to_string());
        self.index.insert_tag(tag, object);
        true
    }

    pub fn remove_tag(&mut self, object: Entity, tag: &str) -> bool {
        let Some(mut tags) = self.world.get_mut::<Tags>(object) else {
            return false;
        };
        let Some(pos) = tags.0.iter().position(|t| t == tag) else {
            return false;
        };
        tags.0.remove(pos);
        self.index.remove_tag(tag, object);
        true
    }

    pub fn has_tag(&self, object: Entity, tag: &str) -> bool {
        self.world.get::<Tags>(object).is_some_and(|tags| tags.0.iter().any(|t| t == tag))
    }

    pub fn tags_of(&self, object: Entity) -> Vec<String> {
        self.world.get::<Tags>(object).map(|tags| tags.0.clone()).unwrap_or_default()
    }

    // ---------- hierarchy ----------

    pub fn set_parent(&mut self, child: Entity, parent: Entity) {
        if self.world.get_entity(child).is_err() || self.world.get_entity(parent).is_err() {
            return;
        }
        self.clear_parent(child);
        self.world.entity_mut(child).insert(Parent(parent));
        if let Some(mut children) = self.world.get_mut::<Children>(parent) {
            if !children.0.contains(&child) {
                children.0.push(child);
            }
        } else {
            self.world.entity_mut(parent).insert(Children(vec![child]));
        }
    }

    pub fn clear_parent(&mut self, child: Entity) {
        let Some(Parent(old)) = self.world.get::<Parent>(child).copied() else {
            return;
        };
        if let Some(mut children) = self.world.get_mut::<Children>(old) {
            children.0.retain(|&e| e != child);
        }
        self.world.entity_mut(child).remove::<Parent>();
    }

    pub fn parent_of(&self, object: Entity) -> Option<Entity> {
        self.world.get::<Parent>(object).map(|p| p.0)
    }

    pub fn children_of(&self, object: Entity) -> Vec<Entity> {
        self.world.get::<Children>(object).map(|c| c.0.clone()).unwrap_or_default()
    }

    // ---------- transforms & properties ----------

    pub fn transform(&self, object: Entity) -> Option<Transform> {
        self.world.get::<Transform>(object).copied()
    }

    pub fn set_transform(&mut self, object: Entity, transform: Transform) {
        if let Some(mut current) = self.world.get_mut::<Transform>(object) {
            *current = transform;
        }
    }

    pub fn property_blob(&self, object: Entity) -> Option<PropertyMap> {
        self.world.get::<PropertyBlob>(object).map(|blob| blob.0.clone())
    }

    pub fn write_property_blob(&mut self, object: Entity, properties: PropertyMap) {
        if let Some(mut blob) = self.world.get_mut::<PropertyBlob>(object) {
            blob.0 = properties;
        }
    }

    // ---------- destruction ----------

    /// Removes the object from the hierarchy, both indices and the world.
    /// Children are orphaned, not destroyed.
    pub fn despawn(&mut self, object: Entity) -> bool {
        if !self.contains(object) {
            return false;
        }
        self.clear_parent(object);
        for child in self.children_of(object) {
            if self.world.get_entity(child).is_ok() {
                self.world.entity_mut(child).remove::<Parent>();
            }
        }
        self.index.remove_object(object);
        self.order.retain(|&e| e != object);
        self.world.despawn(object)
    }

    pub fn name_of(&self, object: Entity) -> Option<String> {
        self.world.get::<Name>(object).map(|n| n.0.clone())
    }
}
