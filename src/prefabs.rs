use crate::world::{PropertyMap, SceneWorld, Transform};
use anyhow::{Context, Result};
use bevy_ecs::prelude::Entity;
use glam::Vec2;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::path::Path;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PrefabTemplate {
    pub name: String,
    #[serde(default)]
    pub translation: [f32; 2],
    #[serde(default)]
    pub rotation: f32,
    #[serde(default = "PrefabTemplate::default_scale")]
    pub scale: [f32; 2],
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub behaviour: Option<String>,
    #[serde(default)]
    pub properties: PropertyMap,
}

impl PrefabTemplate {
    fn default_scale() -> [f32; 2] {
        [1.0, 1.0]
    }

    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            translation: [0.0, 0.0],
            rotation: 0.0,
            scale: Self::default_scale(),
            tags: Vec::new(),
            behaviour: None,
            properties: PropertyMap::new(),
        }
    }
}

/// Instantiation service. An unknown template is a non-fatal `None`;
/// callers report it and carry on.
#[derive(Default)]
pub struct PrefabRegistry {
    templates: HashMap<String, PrefabTemplate>,
}

impl PrefabRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, template: PrefabTemplate) {
        self.templates.insert(template.name.clone(), template);
    }

    pub fn contains(&self, name: &str) -> bool {
        self.templates.contains_key(name)
    }

    /// Loads a JSON array of templates, replacing same-named entries.
    pub fn load_library(&mut self, path: impl AsRef<Path>) -> Result<usize> {
        let path = path.as_ref();
        let bytes = fs::read(path)
            .with_context(|| format!("Failed to read prefab library {}", path.display()))?;
        let templates: Vec<PrefabTemplate> = serde_json::from_slice(&bytes)
            .with_context(|| format!("Failed to parse prefab library {}", path.display()))?;
        let count = templates.len();
        for template in templates {
            self.register(template);
        }
        Ok(count)
    }

    pub fn instantiate(
        &self,
        scene: &mut SceneWorld,
        name: &str,
        position: Option<Vec2>,
        rotation: Option<f32>,
    ) -> Option<Entity> {
        let template = self.templates.get(name)?;
        let transform = Transform {
            translation: position.unwrap_or(Vec2::from(template.translation)),
            rotation: rotation.unwrap_or(template.rotation),
            scale: Vec2::from(template.scale),
        };
        let entity = scene.spawn_object(template.name.clone(), transform);
        for tag in &template.tags {
            scene.add_tag(entity, tag);
        }
        if !template.properties.is_empty() {
            scene.write_property_blob(entity, template.properties.clone());
        }
        if let Some(behaviour) = &template.behaviour {
            scene.attach_script(entity, behaviour.clone());
        }
        Some(entity)
    }
}
