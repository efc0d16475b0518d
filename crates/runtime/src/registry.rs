//! Tool name to provider resolution.

use std::collections::{HashMap, HashSet};

use tracing::{debug, warn};

use crate::tool::ToolDescriptor;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RegistryError {
    #[error("tool not found: {0}")]
    NotFound(String),
}

/// A descriptor together with the provider that owns it.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Resolved<'a> {
    pub provider: &'a str,
    pub descriptor: &'a ToolDescriptor,
}

/// Maps tool names to the provider that currently owns them.
///
/// When two providers expose the same name, the one registered later wins.
/// Removing it hands the name back to the previous owner.
#[derive(Debug, Default)]
pub struct ToolRegistry {
    /// Providers in registration order with their discovered tools.
    providers: Vec<(String, Vec<ToolDescriptor>)>,
    /// tool name -> (provider index, tool index)
    owners: HashMap<String, (usize, usize)>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register (or re-register) a provider's tools.
    ///
    /// A re-registered provider replaces its old tool set and counts as the
    /// most recent registration. Returns the names taken from other providers.
    pub fn register(&mut self, provider: &str, tools: Vec<ToolDescriptor>) -> Vec<String> {
        let before: HashMap<String, String> = self.owner_names();

        self.providers.retain(|(name, _)| name != provider);
        self.providers.push((provider.to_string(), tools));
        self.rebuild();

        let mut shadowed: Vec<String> = self
            .owners
            .keys()
            .filter(|tool| {
                before
                    .get(*tool)
                    .is_some_and(|owner| owner != provider && self.owner_of(tool) == Some(provider))
            })
            .cloned()
            .collect();
        shadowed.sort();

        for tool in &shadowed {
            warn!(%tool, %provider, previous = %before[tool], "tool name shadowed");
        }
        debug!(%provider, tools = self.tools_of(provider).len(), "registered provider");
        shadowed
    }

    /// Remove a provider. Names it shadowed return to their earlier owners.
    pub fn unregister(&mut self, provider: &str) -> bool {
        let count = self.providers.len();
        self.providers.retain(|(name, _)| name != provider);
        let removed = self.providers.len() != count;
        if removed {
            self.rebuild();
            debug!(%provider, "unregistered provider");
        }
        removed
    }

    pub fn resolve(&self, tool: &str) -> Result<Resolved<'_>, RegistryError> {
        let &(p, t) = self
            .owners
            .get(tool)
            .ok_or_else(|| RegistryError::NotFound(tool.to_string()))?;
        let (provider, tools) = &self.providers[p];
        Ok(Resolved {
            provider,
            descriptor: &tools[t],
        })
    }

    /// Every descriptor from every provider, shadowed ones included.
    pub fn list(&self) -> Vec<Resolved<'_>> {
        self.providers
            .iter()
            .flat_map(|(provider, tools)| {
                tools.iter().map(move |descriptor| Resolved {
                    provider,
                    descriptor,
                })
            })
            .collect()
    }

    /// The effective tool set offered to the model, in registration order.
    pub fn schema(&self) -> Vec<ToolDescriptor> {
        self.providers
            .iter()
            .enumerate()
            .flat_map(|(p, (_, tools))| {
                tools
                    .iter()
                    .enumerate()
                    .filter(move |(t, d)| self.owners.get(&d.name) == Some(&(p, *t)))
                    .map(|(_, d)| d.clone())
            })
            .collect()
    }

    pub fn providers(&self) -> impl Iterator<Item = &str> {
        self.providers.iter().map(|(name, _)| name.as_str())
    }

    pub fn contains_provider(&self, provider: &str) -> bool {
        self.providers.iter().any(|(name, _)| name == provider)
    }

    pub fn tools_of(&self, provider: &str) -> &[ToolDescriptor] {
        self.providers
            .iter()
            .find(|(name, _)| name == provider)
            .map(|(_, tools)| tools.as_slice())
            .unwrap_or(&[])
    }

    fn owner_of(&self, tool: &str) -> Option<&str> {
        self.owners
            .get(tool)
            .map(|&(p, _)| self.providers[p].0.as_str())
    }

    fn owner_names(&self) -> HashMap<String, String> {
        self.owners
            .iter()
            .map(|(tool, &(p, _))| (tool.clone(), self.providers[p].0.clone()))
            .collect()
    }

    /// Recompute ownership; later providers overwrite earlier ones, and a
    /// provider listing the same name twice keeps its first entry.
    fn rebuild(&mut self) {
        self.owners.clear();
        for (p, (_, tools)) in self.providers.iter().enumerate() {
            let mut seen = HashSet::new();
            for (t, tool) in tools.iter().enumerate() {
                if seen.insert(tool.name.as_str()) {
                    self.owners.insert(tool.name.clone(), (p, t));
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn tool(name: &str) -> ToolDescriptor {
        ToolDescriptor::new(name, format!("{name} tool"), json!({"type": "object"}))
    }

    #[test]
    fn later_provider_shadows_and_unregister_restores() {
        let mut registry = ToolRegistry::new();
        assert!(registry.register("p1", vec![tool("n"), tool("a")]).is_empty());
        assert_eq!(registry.register("p2", vec![tool("n")]), vec!["n".to_string()]);

        assert_eq!(registry.resolve("n").unwrap().provider, "p2");
        assert_eq!(registry.resolve("a").unwrap().provider, "p1");

        assert!(registry.unregister("p2"));
        assert_eq!(registry.resolve("n").unwrap().provider, "p1");
        assert!(!registry.unregister("p2"));
    }

    #[test]
    fn unknown_tool() {
        let registry = ToolRegistry::new();
        assert_eq!(
            registry.resolve("missing"),
            Err(RegistryError::NotFound("missing".into()))
        );
    }

    #[test]
    fn reregistering_replaces_tool_set() {
        let mut registry = ToolRegistry::new();
        registry.register("p1", vec![tool("a"), tool("b")]);
        registry.register("p1", vec![tool("a")]);
        assert!(registry.resolve("b").is_err());
        assert_eq!(registry.providers().count(), 1);
    }

    #[test]
    fn reregistering_takes_names_back() {
        let mut registry = ToolRegistry::new();
        registry.register("p1", vec![tool("n")]);
        registry.register("p2", vec![tool("n")]);
        let shadowed = registry.register("p1", vec![tool("n")]);
        assert_eq!(shadowed, vec!["n".to_string()]);
        assert_eq!(registry.resolve("n").unwrap().provider, "p1");
    }

    #[test]
    fn list_is_provider_qualified_and_schema_is_effective() {
        let mut registry = ToolRegistry::new();
        registry.register("p1", vec![tool("a"), tool("n")]);
        registry.register("p2", vec![tool("n"), tool("b")]);

        let listed: Vec<_> = registry
            .list()
            .iter()
            .map(|r| format!("{}/{}", r.provider, r.descriptor.name))
            .collect();
        assert_eq!(listed, ["p1/a", "p1/n", "p2/n", "p2/b"]);

        let schema: Vec<_> = registry.schema().into_iter().map(|d| d.name).collect();
        assert_eq!(schema, ["a", "n", "b"]);
    }

    #[test]
    fn duplicate_names_within_one_provider() {
        let mut registry = ToolRegistry::new();
        let mut second = tool("a");
        second.description = "second".into();
        registry.register("p1", vec![tool("a"), second]);
        assert_eq!(registry.resolve("a").unwrap().descriptor.description, "a tool");
        assert_eq!(registry.schema().len(), 1);
    }
}
