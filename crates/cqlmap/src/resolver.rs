//! Reference resolution seam
//!
//! After `get`/`fetch` decode a row, reference fields still hold bare keys.
//! A [`ReferenceResolver`] may load and attach the referenced entities; how
//! (and whether) it does so is its own business.

use async_trait::async_trait;
use cqlmap_model::Entity;

use crate::error::StoreResult;

/// Loads referenced entities for the named field paths of `entity`.
#[async_trait]
pub trait ReferenceResolver: Send + Sync {
    async fn resolve(&self, entity: &mut dyn Entity, paths: &[String]) -> StoreResult<()>;
}

/// Leaves references as keys
#[derive(Debug, Clone, Copy, Default)]
pub struct SkipReferences;

#[async_trait]
impl ReferenceResolver for SkipReferences {
    async fn resolve(&self, _entity: &mut dyn Entity, _paths: &[String]) -> StoreResult<()> {
        Ok(())
    }
}
