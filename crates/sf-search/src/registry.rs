//! Registry of the search spaces an engine explores.

use sf_types::ConfigError;
use std::sync::Arc;
use tracing::debug;

use crate::space::SearchSpace;

/// Ordered, id-unique collection of validated search spaces.
#[derive(Debug, Clone, Default)]
pub struct SearchSpaceRegistry {
    spaces: Vec<Arc<SearchSpace>>,
}

impl SearchSpaceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a registry from a list, failing on the first invalid or
    /// duplicate space.
    pub fn from_spaces(spaces: impl IntoIterator<Item = SearchSpace>) -> Result<Self, ConfigError> {
        let mut registry = Self::new();
        for space in spaces {
            registry.register(space)?;
        }
        Ok(registry)
    }

    pub fn register(&mut self, space: SearchSpace) -> Result<(), ConfigError> {
        if self.get(space.id()).is_some() {
            return Err(ConfigError::DuplicateId {
                id: space.id().to_string(),
            });
        }
        space.validate()?;
        debug!(
            space = %space.id(),
            family = %space.family().name(),
            parameters = space.grid().len(),
            grid_size = ?space.grid().grid_size(),
            "registered search space"
        );
        self.spaces.push(Arc::new(space));
        Ok(())
    }

    pub fn remove(&mut self, id: &str) -> Option<Arc<SearchSpace>> {
        let idx = self.spaces.iter().position(|s| s.id() == id)?;
        Some(self.spaces.remove(idx))
    }

    pub fn get(&self, id: &str) -> Option<&Arc<SearchSpace>> {
        self.spaces.iter().find(|s| s.id() == id)
    }

    /// Ids in registration order.
    pub fn list_ids(&self) -> Vec<String> {
        self.spaces.iter().map(|s| s.id().to_string()).collect()
    }

    pub fn spaces(&self) -> &[Arc<SearchSpace>] {
        &self.spaces
    }

    pub fn len(&self) -> usize {
        self.spaces.len()
    }

    pub fn is_empty(&self) -> bool {
        self.spaces.is_empty()
    }
}
