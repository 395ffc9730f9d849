use serde_json::{Map, Value};

use crate::errors::{AppError, Result};

pub type Entity = Map<String, Value>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValidationMode {
  /// Full entity; required fields must be present.
  Create,
  /// Partial entity; only the present fields are checked.
  Update,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ValidationOutcome {
  pub valid: bool,
  pub errors: Vec<String>,
}

impl ValidationOutcome {
  pub fn ok() -> Self {
    Self {
      valid: true,
      errors: Vec::new(),
    }
  }

  pub fn from_errors(errors: Vec<String>) -> Self {
    Self {
      valid: errors.is_empty(),
      errors,
    }
  }

  /// `ValidationError` listing every problem, or `Ok`.
  pub fn into_result(self, entity_name: &str) -> Result<()> {
    if self.valid {
      return Ok(());
    }
    Err(
      AppError::validation(format!("invalid {entity_name}: {}", self.errors.join("; ")))
        .with_context("errors", self.errors),
    )
  }
}

/// Rules a repository consults before it writes.
pub trait Validator: Send + Sync {
  /// Schema checks for a new entity or a partial update.
  fn validate(&self, entity: &Entity, mode: ValidationMode) -> ValidationOutcome;

  /// Whether `field` may move from `from` to `to`.
  fn validate_transition(&self, _field: &str, _from: &str, _to: &str) -> Result<()> {
    Ok(())
  }

  /// Cross-entity rules against the rest of the collection.
  fn validate_domain(&self, _entity: &Entity, _collection: &[Entity]) -> Result<()> {
    Ok(())
  }
}
