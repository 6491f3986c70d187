//! Ordered prefix table.
//!
//! # Design Decisions
//! - Insertion order is match order; the earliest matching prefix wins
//! - Replacing a prefix keeps its original position
//! - O(n) prefix scan (acceptable for typical route counts)

use std::sync::Arc;

use crate::routing::route::RouteDefinition;

#[derive(Debug, Clone, Default)]
pub struct RouteTable {
    routes: Vec<Arc<RouteDefinition>>,
}

impl RouteTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace by prefix, returning the replaced route.
    pub fn insert(&mut self, route: Arc<RouteDefinition>) -> Option<Arc<RouteDefinition>> {
        match self
            .routes
            .iter_mut()
            .find(|existing| existing.path_prefix == route.path_prefix)
        {
            Some(slot) => Some(std::mem::replace(slot, route)),
            None => {
                self.routes.push(route);
                None
            }
        }
    }

    pub fn remove(&mut self, path_prefix: &str) -> Option<Arc<RouteDefinition>> {
        let index = self
            .routes
            .iter()
            .position(|route| route.path_prefix == path_prefix)?;
        Some(self.routes.remove(index))
    }

    /// First route whose prefix is a string prefix of `path`.
    pub fn find(&self, path: &str) -> Option<&Arc<RouteDefinition>> {
        self.routes.iter().find(|route| route.matches(path))
    }

    /// Whether any route for `service_name` wants a circuit breaker.
    pub fn wants_breaker(&self, service_name: &str) -> bool {
        self.routes
            .iter()
            .any(|route| route.circuit_breaker && route.service_name == service_name)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<RouteDefinition>> {
        self.routes.iter()
    }

    pub fn len(&self) -> usize {
        self.routes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }
}
