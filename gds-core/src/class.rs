use crate::{Error, Result};
use std::collections::HashMap;

/// Name of the base entity class every entity class must descend from
pub const BASE_ENTITY_CLASS: &str = "Entity";

/// Registry of named entity classes and their parent classes.
///
/// Stores resolve `set_entity_class` against a registry: the name must be
/// registered and its parent chain must reach [`BASE_ENTITY_CLASS`].
#[derive(Debug, Clone)]
pub struct EntityClassRegistry {
    /// class name -> parent class name (None for roots)
    classes: HashMap<String, Option<String>>,
}

impl EntityClassRegistry {
    pub fn new() -> Self {
        let mut classes = HashMap::new();
        classes.insert(BASE_ENTITY_CLASS.to_string(), None);
        Self { classes }
    }

    /// Register `name` as a subclass of an already registered `parent`
    pub fn register(&mut self, name: impl Into<String>, parent: impl Into<String>) -> Result<()> {
        let name = name.into();
        let parent = parent.into();
        self.check_new_name(&name)?;
        if !self.classes.contains_key(&parent) {
            return Err(Error::Configuration(format!(
                "Cannot register class '{}': parent class '{}' is not registered",
                name, parent
            )));
        }
        self.classes.insert(name, Some(parent));
        Ok(())
    }

    /// Register a class outside the entity hierarchy
    pub fn register_root(&mut self, name: impl Into<String>) -> Result<()> {
        let name = name.into();
        self.check_new_name(&name)?;
        self.classes.insert(name, None);
        Ok(())
    }

    pub fn with_class(mut self, name: impl Into<String>, parent: impl Into<String>) -> Result<Self> {
        self.register(name, parent)?;
        Ok(self)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.classes.contains_key(name)
    }

    /// True if `name` is registered and descends from the base entity class
    pub fn is_entity_class(&self, name: &str) -> bool {
        let mut current = Some(name);
        while let Some(class) = current {
            if class == BASE_ENTITY_CLASS {
                return true;
            }
            current = match self.classes.get(class) {
                Some(parent) => parent.as_deref(),
                None => return false,
            };
        }
        false
    }

    /// Fail with a configuration error unless `name` is a usable entity class
    pub fn check_entity_class(&self, name: &str) -> Result<()> {
        if !self.contains(name) {
            return Err(Error::Configuration(format!(
                "Cannot set missing Entity class: {}",
                name
            )));
        }
        if !self.is_entity_class(name) {
            return Err(Error::Configuration(format!(
                "Cannot set an Entity class that does not extend \"{}\": {}",
                BASE_ENTITY_CLASS, name
            )));
        }
        Ok(())
    }

    fn check_new_name(&self, name: &str) -> Result<()> {
        if name.is_empty() {
            return Err(Error::Configuration("Class name must not be empty".to_string()));
        }
        if self.classes.contains_key(name) {
            return Err(Error::Configuration(format!(
                "Class '{}' is already registered",
                name
            )));
        }
        Ok(())
    }
}

impl Default for EntityClassRegistry {
    fn default() -> Self {
        Self::new()
    }
}
