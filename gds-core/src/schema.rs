/// Kind schemas
///
/// A Schema names a Kind, declares its typed properties in order, and
/// optionally marks the string property that supplies key names.

use crate::{class::BASE_ENTITY_CLASS, Error, Result, Value};
use serde::{Deserialize, Serialize};

/// Declared type of a schema property
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PropertyType {
    String,
    Integer,
    Float,
    Boolean,
    DateTime,
    Key,
    Entity,
    List,
    /// Accepts any value
    Any,
}

impl PropertyType {
    /// Check if a value matches this type. Null matches every type.
    pub fn matches(&self, value: &Value) -> bool {
        matches!(
            (self, value),
            (_, Value::Null)
                | (PropertyType::Any, _)
                | (PropertyType::String, Value::String(_))
                | (PropertyType::Integer, Value::Integer(_))
                | (PropertyType::Float, Value::Float(_))
                | (PropertyType::Boolean, Value::Boolean(_))
                | (PropertyType::DateTime, Value::DateTime(_))
                | (PropertyType::Key, Value::Key(_))
                | (PropertyType::Entity, Value::Entity(_))
                | (PropertyType::List, Value::List(_))
        )
    }
}

/// Declared property
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PropertyDef {
    pub name: String,
    pub property_type: PropertyType,
}

/// Kind schema
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Schema {
    kind: String,
    properties: Vec<PropertyDef>,
    key_property: Option<String>,
    entity_class: String,
}

impl Schema {
    /// Create a schema for a Kind.
    ///
    /// The Kind must be non-empty and must not use the reserved `__name__`
    /// form. A schema with no declared properties accepts any property.
    pub fn new(kind: impl Into<String>) -> Result<Self> {
        let kind = kind.into();
        if kind.trim().is_empty() {
            return Err(Error::Validation("Kind must not be empty".to_string()));
        }
        if kind.len() > 4 && kind.starts_with("__") && kind.ends_with("__") {
            return Err(Error::Validation(format!("Kind '{}' is reserved", kind)));
        }

        Ok(Self {
            kind,
            properties: Vec::new(),
            key_property: None,
            entity_class: BASE_ENTITY_CLASS.to_string(),
        })
    }

    /// Declare a property; redeclaring a name replaces its type
    pub fn add_property(mut self, name: impl Into<String>, property_type: PropertyType) -> Self {
        let name = name.into();
        match self.properties.iter_mut().find(|p| p.name == name) {
            Some(existing) => existing.property_type = property_type,
            None => self.properties.push(PropertyDef {
                name,
                property_type,
            }),
        }
        self
    }

    pub fn add_string(self, name: impl Into<String>) -> Self {
        self.add_property(name, PropertyType::String)
    }

    pub fn add_integer(self, name: impl Into<String>) -> Self {
        self.add_property(name, PropertyType::Integer)
    }

    pub fn add_float(self, name: impl Into<String>) -> Self {
        self.add_property(name, PropertyType::Float)
    }

    pub fn add_boolean(self, name: impl Into<String>) -> Self {
        self.add_property(name, PropertyType::Boolean)
    }

    pub fn add_datetime(self, name: impl Into<String>) -> Self {
        self.add_property(name, PropertyType::DateTime)
    }

    pub fn add_key(self, name: impl Into<String>) -> Self {
        self.add_property(name, PropertyType::Key)
    }

    pub fn add_entity(self, name: impl Into<String>) -> Self {
        self.add_property(name, PropertyType::Entity)
    }

    pub fn add_list(self, name: impl Into<String>) -> Self {
        self.add_property(name, PropertyType::List)
    }

    /// Mark the string property whose value supplies the key name
    pub fn with_key_property(mut self, name: impl Into<String>) -> Self {
        self.key_property = Some(name.into());
        self
    }

    pub fn kind(&self) -> &str {
        &self.kind
    }

    pub fn properties(&self) -> &[PropertyDef] {
        &self.properties
    }

    pub fn key_property(&self) -> Option<&str> {
        self.key_property.as_deref()
    }

    pub fn entity_class(&self) -> &str {
        &self.entity_class
    }

    /// Bind the entity class manufactured for this Kind
    pub fn set_entity_class(&mut self, class: impl Into<String>) {
        self.entity_class = class.into();
    }

    /// True when no properties are declared
    pub fn is_open(&self) -> bool {
        self.properties.is_empty()
    }

    pub fn property_type(&self, name: &str) -> Option<PropertyType> {
        self.properties
            .iter()
            .find(|p| p.name == name)
            .map(|p| p.property_type)
    }

    pub fn has_property(&self, name: &str) -> bool {
        self.is_open() || self.property_type(name).is_some()
    }

    /// Fail unless `name` is declared
    pub fn check_name(&self, name: &str) -> Result<()> {
        if self.has_property(name) {
            Ok(())
        } else {
            Err(Error::SchemaMismatch(format!(
                "Property '{}' is not defined for Kind '{}'",
                name, self.kind
            )))
        }
    }

    /// Fail unless `name` is declared and `value` matches its type
    pub fn check_value(&self, name: &str, value: &Value) -> Result<()> {
        self.check_name(name)?;
        match self.property_type(name) {
            Some(ty) if !ty.matches(value) => Err(Error::SchemaMismatch(format!(
                "Property '{}' of Kind '{}' expects {:?}, got {}",
                name,
                self.kind,
                ty,
                value.type_name()
            ))),
            _ => Ok(()),
        }
    }

    /// Validate internal consistency (key property declared as a string)
    pub fn validate(&self) -> Result<()> {
        let Some(key_property) = &self.key_property else {
            return Ok(());
        };
        if self.is_open() {
            return Ok(());
        }
        match self.property_type(key_property) {
            Some(PropertyType::String) | Some(PropertyType::Any) => Ok(()),
            Some(other) => Err(Error::Validation(format!(
                "Key property '{}' must be a string, declared as {:?}",
                key_property, other
            ))),
            None => Err(Error::Validation(format!(
                "Key property '{}' is not declared for Kind '{}'",
                key_property, self.kind
            ))),
        }
    }
}
