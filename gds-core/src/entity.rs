/// Entity records
///
/// An Entity is a property bag bound to one Schema. Writes go through the
/// schema check; entities rebuilt from storage skip it, since stored data
/// is already conformant.

use crate::{Error, Key, KeyId, PathElement, Result, Schema, Value};
use std::collections::BTreeMap;
use std::sync::Arc;

#[derive(Debug, Clone)]
pub struct Entity {
    schema: Arc<Schema>,
    class: String,
    key_id: Option<i64>,
    key_name: Option<String>,
    ancestry: Option<Key>,
    properties: BTreeMap<String, Value>,
}

impl Entity {
    /// New unkeyed entity of the schema's bound class
    pub fn new(schema: Arc<Schema>) -> Self {
        let class = schema.entity_class().to_string();
        Self {
            schema,
            class,
            key_id: None,
            key_name: None,
            ancestry: None,
            properties: BTreeMap::new(),
        }
    }

    /// Rebuild an entity from a stored key and properties.
    ///
    /// Properties are trusted and not checked against the schema.
    pub fn hydrate(schema: Arc<Schema>, key: &Key, properties: BTreeMap<String, Value>) -> Self {
        let mut entity = Self::new(schema);
        entity.ancestry = key.parent();
        match key.id_or_name() {
            Some(KeyId::Id(id)) => entity.key_id = Some(*id),
            Some(KeyId::Name(name)) => entity.key_name = Some(name.clone()),
            None => {}
        }
        entity.properties = properties;
        entity
    }

    pub fn schema(&self) -> &Arc<Schema> {
        &self.schema
    }

    pub fn kind(&self) -> &str {
        self.schema.kind()
    }

    /// Name of the entity class this instance was manufactured as
    pub fn class_name(&self) -> &str {
        &self.class
    }

    pub fn key_id(&self) -> Option<i64> {
        self.key_id
    }

    pub fn key_name(&self) -> Option<&str> {
        self.key_name.as_deref()
    }

    /// Assign a numeric id. Fails if a key name is already set.
    pub fn set_key_id(&mut self, id: i64) -> Result<()> {
        if let Some(name) = &self.key_name {
            return Err(Error::InvalidKey(format!(
                "Cannot set key id {} on entity already named '{}'",
                id, name
            )));
        }
        self.key_id = Some(id);
        Ok(())
    }

    /// Assign a key name. Fails if a numeric id is already set.
    pub fn set_key_name(&mut self, name: impl Into<String>) -> Result<()> {
        let name = name.into();
        if let Some(id) = self.key_id {
            return Err(Error::InvalidKey(format!(
                "Cannot set key name '{}' on entity already keyed by id {}",
                name, id
            )));
        }
        if name.is_empty() {
            return Err(Error::InvalidKey("Key name must not be empty".to_string()));
        }
        self.key_name = Some(name);
        Ok(())
    }

    /// Key name from the explicit name, else from the schema's key property
    pub fn effective_key_name(&self) -> Option<&str> {
        if let Some(name) = &self.key_name {
            return Some(name);
        }
        let property = self.schema.key_property()?;
        self.properties
            .get(property)
            .and_then(Value::as_str)
            .filter(|name| !name.is_empty())
    }

    /// Place this entity under `parent`'s entity group
    pub fn set_ancestry(&mut self, parent: &Entity) -> Result<()> {
        self.set_ancestry_key(parent.key())
    }

    pub fn set_ancestry_key(&mut self, parent: Key) -> Result<()> {
        if !parent.is_complete() {
            return Err(Error::InvalidKey(format!(
                "Ancestor {} has no id or name",
                parent
            )));
        }
        self.ancestry = Some(parent);
        Ok(())
    }

    pub fn ancestry(&self) -> Option<&Key> {
        self.ancestry.as_ref()
    }

    /// Full key path; the last element is incomplete when no id or name is set
    pub fn key(&self) -> Key {
        let id = match (self.key_id, self.effective_key_name()) {
            (Some(id), _) => Some(KeyId::Id(id)),
            (None, Some(name)) => Some(KeyId::Name(name.to_string())),
            (None, None) => None,
        };
        let mut path = self
            .ancestry
            .as_ref()
            .map(|parent| parent.path().to_vec())
            .unwrap_or_default();
        path.push(PathElement::new(self.kind(), id));
        // ancestry is only ever set from complete keys
        Key::from_path(path).unwrap_or_else(|_| Key::incomplete(self.kind()))
    }

    pub fn has_key(&self) -> bool {
        self.key_id.is_some() || self.effective_key_name().is_some()
    }

    /// Read a declared property; absent values are `None`
    pub fn get(&self, name: &str) -> Result<Option<&Value>> {
        self.schema.check_name(name)?;
        Ok(self.properties.get(name))
    }

    /// Set a declared property
    pub fn set(&mut self, name: impl Into<String>, value: impl Into<Value>) -> Result<()> {
        let name = name.into();
        let value = value.into();
        self.schema.check_value(&name, &value)?;
        self.properties.insert(name, value);
        Ok(())
    }

    /// Builder-style `set`
    pub fn with(mut self, name: impl Into<String>, value: impl Into<Value>) -> Result<Self> {
        self.set(name, value)?;
        Ok(self)
    }

    pub fn remove(&mut self, name: &str) -> Result<Option<Value>> {
        self.schema.check_name(name)?;
        Ok(self.properties.remove(name))
    }

    pub fn properties(&self) -> &BTreeMap<String, Value> {
        &self.properties
    }
}

impl PartialEq for Entity {
    fn eq(&self, other: &Self) -> bool {
        self.kind() == other.kind()
            && self.key_id == other.key_id
            && self.key_name == other.key_name
            && self.ancestry == other.ancestry
            && self.properties == other.properties
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn book_schema() -> Arc<Schema> {
        Arc::new(
            Schema::new("Book")
                .unwrap()
                .add_string("title")
                .add_string("isbn")
                .add_integer("pages")
                .with_key_property("isbn"),
        )
    }

    #[test]
    fn test_set_and_get_declared_property() {
        let mut book = Entity::new(book_schema());
        book.set("title", "Dune").unwrap();
        book.set("pages", 412).unwrap();

        assert_eq!(book.get("title").unwrap(), Some(&Value::string("Dune")));
        assert_eq!(book.get("pages").unwrap(), Some(&Value::Integer(412)));
        assert_eq!(book.get("isbn").unwrap(), None);
    }

    #[test]
    fn test_undeclared_property_rejected() {
        let mut book = Entity::new(book_schema());
        assert!(matches!(book.set("colour", "red"), Err(Error::SchemaMismatch(_))));
        assert!(matches!(book.get("colour"), Err(Error::SchemaMismatch(_))));
        assert!(book.properties().is_empty());
    }

    #[test]
    fn test_id_and_name_are_exclusive() {
        let mut by_id = Entity::new(book_schema());
        by_id.set_key_id(10).unwrap();
        assert!(matches!(by_id.set_key_name("dune"), Err(Error::InvalidKey(_))));

        let mut by_name = Entity::new(book_schema());
        by_name.set_key_name("dune").unwrap();
        assert!(matches!(by_name.set_key_id(10), Err(Error::InvalidKey(_))));
    }

    #[test]
    fn test_key_name_from_key_property() {
        let mut book = Entity::new(book_schema());
        assert!(!book.has_key());
        assert!(!book.key().is_complete());

        book.set("isbn", "978-0441013593").unwrap();
        assert!(book.has_key());
        assert_eq!(book.key(), Key::with_name("Book", "978-0441013593"));
    }

    #[test]
    fn test_ancestry_builds_key_path() {
        let author_schema = Arc::new(Schema::new("Author").unwrap());
        let mut author = Entity::new(author_schema);

        let mut book = Entity::new(book_schema());
        assert!(matches!(book.set_ancestry(&author), Err(Error::InvalidKey(_))));

        author.set_key_name("herbert").unwrap();
        book.set_ancestry(&author).unwrap();
        book.set_key_id(3).unwrap();

        let key = book.key();
        assert_eq!(key.path().len(), 2);
        assert_eq!(key.parent(), Some(Key::with_name("Author", "herbert")));
        assert_eq!(key.id(), Some(3));
    }

    #[test]
    fn test_hydrate_skips_validation() {
        let mut properties = BTreeMap::new();
        properties.insert("legacy".to_string(), Value::Boolean(true));

        let key = Key::with_id("Book", 5);
        let book = Entity::hydrate(book_schema(), &key, properties);

        assert_eq!(book.key_id(), Some(5));
        assert_eq!(book.properties().get("legacy"), Some(&Value::Boolean(true)));
    }
}
