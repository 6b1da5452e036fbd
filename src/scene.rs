use crate::world::{PropertyMap, SceneWorld, Transform};
use anyhow::{Context, Result};
use bevy_ecs::prelude::Entity;
use glam::Vec2;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::path::Path;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct TransformData {
    pub translation: [f32; 2],
    pub rotation: f32,
    pub scale: [f32; 2],
}

impl Default for TransformData {
    fn default() -> Self {
        Self { translation: [0.0, 0.0], rotation: 0.0, scale: [1.0, 1.0] }
    }
}

impl From<Transform> for TransformData {
    fn from(t: Transform) -> Self {
        Self {
            translation: [t.translation.x, t.translation.y],
            rotation: t.rotation,
            scale: [t.scale.x, t.scale.y],
        }
    }
}

impl From<TransformData> for Transform {
    fn from(data: TransformData) -> Self {
        Self {
            translation: Vec2::from(data.translation),
            rotation: data.rotation,
            scale: Vec2::from(data.scale),
        }
    }
}

/// One object of a serialized session. `parent` is an index into the
/// snapshot's object list.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SceneObjectData {
    pub name: String,
    #[serde(default)]
    pub transform: TransformData,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub behaviour: Option<String>,
    #[serde(default, skip_serializing_if = "PropertyMap::is_empty")]
    pub properties: PropertyMap,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent: Option<usize>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct SceneSnapshot {
    #[serde(default)]
    pub objects: Vec<SceneObjectData>,
}

impl SceneSnapshot {
    /// Captures every live object in spawn order.
    pub fn capture(scene: &SceneWorld) -> Self {
        let order = scene.objects_in_order();
        let index_of: HashMap<Entity, usize> =
            order.iter().enumerate().map(|(i, &e)| (e, i)).collect();
        let objects = order
            .iter()
            .map(|&entity| SceneObjectData {
                name: scene.name_of(entity).unwrap_or_default(),
                transform: scene.transform(entity).unwrap_or_default().into(),
                behaviour: scene.script_ref(entity),
                properties: scene.property_blob(entity).unwrap_or_default(),
                tags: scene.tags_of(entity),
                parent: scene.parent_of(entity).and_then(|p| index_of.get(&p).copied()),
            })
            .collect();
        Self { objects }
    }

    /// Tags are restored through the transactional path, so the tag
    /// index is consistent immediately.
    pub fn apply(&self, scene: &mut SceneWorld) -> Vec<Entity> {
        let mut spawned = Vec::with_capacity(self.objects.len());
        for data in &self.objects {
            let entity = scene.spawn_object(data.name.clone(), data.transform.into());
            if !data.properties.is_empty() {
                scene.write_property_blob(entity, data.properties.clone());
            }
            for tag in &data.tags {
                scene.add_tag(entity, tag);
            }
            if let Some(behaviour) = &data.behaviour {
                scene.attach_script(entity, behaviour.clone());
            }
            spawned.push(entity);
        }
        for (data, &entity) in self.objects.iter().zip(&spawned) {
            if let Some(parent_index) = data.parent {
                if let Some(&parent) = spawned.get(parent_index) {
                    scene.set_parent(entity, parent);
                }
            }
        }
        spawned
    }

    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        let json = serde_json::to_string_pretty(self).context("Serializing scene snapshot")?;
        fs::write(path, json)
            .with_context(|| format!("Failed to write scene snapshot {}", path.display()))?;
        Ok(())
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let bytes = fs::read(path)
            .with_context(|| format!("Failed to read scene snapshot {}", path.display()))?;
        serde_json::from_slice(&bytes)
            .with_context(|| format!("Failed to parse scene snapshot {}", path.display()))
    }
}
