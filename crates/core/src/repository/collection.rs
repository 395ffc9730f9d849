use serde_json::{Map, Value};

use super::validator::Entity;

/// How a collection file is laid out on disk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CollectionLayout {
  /// `{ "<key>": [ ... ], ...other }`
  Keyed,
  /// `[ ... ]`
  BareArray,
}

/// The parsed collection file: its entities plus any sibling top-level keys.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Collection {
  pub items: Vec<Entity>,
  pub extra: Map<String, Value>,
}

impl Collection {
  pub(super) fn parse(doc: Option<Value>, key: &str, layout: CollectionLayout) -> Self {
    let entities = |v: Value| -> Vec<Entity> {
      match v {
        Value::Array(items) => items
          .into_iter()
          .filter_map(|item| match item {
            Value::Object(map) => Some(map),
            _ => None,
          })
          .collect(),
        _ => Vec::new(),
      }
    };
    match (doc, layout) {
      (Some(Value::Object(mut map)), CollectionLayout::Keyed) => {
        let items = map.remove(key).map(entities).unwrap_or_default();
        Self { items, extra: map }
      }
      (Some(arr @ Value::Array(_)), _) => Self {
        items: entities(arr),
        extra: Map::new(),
      },
      _ => Self::default(),
    }
  }

  pub(super) fn to_document(&self, key: &str, layout: CollectionLayout) -> Value {
    let items = Value::Array(self.items.iter().cloned().map(Value::Object).collect());
    match layout {
      CollectionLayout::BareArray => items,
      CollectionLayout::Keyed => {
        let mut map = Map::new();
        map.insert(key.to_string(), items);
        for (k, v) in &self.extra {
          map.insert(k.clone(), v.clone());
        }
        Value::Object(map)
      }
    }
  }

  pub fn position(&self, id_field: &str, id: &str) -> Option<usize> {
    self
      .items
      .iter()
      .position(|e| e.get(id_field).and_then(Value::as_str) == Some(id))
  }

  pub fn get(&self, id_field: &str, id: &str) -> Option<&Entity> {
    self.position(id_field, id).map(|i| &self.items[i])
  }
}
