//! The tool-hosting context shared by front ends and the orchestrator.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use mcp::Session;
use serde_json::Value;
use tokio::sync::RwLock;
use tracing::{info, warn};

use crate::provider::{ClientIdentity, DispatchError, Provider, RemoteProvider, RemoteSpec};
use crate::registry::{RegistryError, ToolRegistry};
use crate::tool::{ToolDescriptor, ToolKind};
use crate::tools::{LocalProvider, SHELL_TOOL};
use crate::{Error, Result};

/// A tool as seen through the registry.
#[derive(Debug, Clone, PartialEq)]
pub struct ToolEntry {
    pub provider: String,
    pub descriptor: ToolDescriptor,
    /// False when a later provider owns this name.
    pub active: bool,
}

/// Summary of one connected provider.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProviderInfo {
    pub name: String,
    pub endpoint: String,
    pub tools: usize,
}

/// Outcome of connecting a batch of remote providers.
#[derive(Debug, Default)]
pub struct ConnectReport {
    pub connected: Vec<String>,
    pub failed: Vec<(String, Error)>,
}

/// Owns every provider connection and the registry that routes to them.
pub struct ToolHost {
    identity: ClientIdentity,
    /// remote tool name -> argument holding the command
    command_tools: HashMap<String, String>,
    registry: RwLock<ToolRegistry>,
    providers: RwLock<HashMap<String, Arc<Provider>>>,
}

impl Default for ToolHost {
    fn default() -> Self {
        Self::new()
    }
}

impl ToolHost {
    pub fn new() -> Self {
        Self {
            identity: ClientIdentity::default(),
            command_tools: HashMap::from([(SHELL_TOOL.to_string(), "command".to_string())]),
            registry: RwLock::new(ToolRegistry::new()),
            providers: RwLock::new(HashMap::new()),
        }
    }

    pub fn with_identity(mut self, identity: ClientIdentity) -> Self {
        self.identity = identity;
        self
    }

    /// Mark more remote tool names as command-executing, mapped to the
    /// argument that holds the command. `shell_command` stays marked.
    pub fn with_command_tools(mut self, tools: HashMap<String, String>) -> Self {
        self.command_tools.extend(tools);
        self
    }

    /// Register the in-process tool set.
    pub async fn add_local(&self, handlers: LocalProvider) -> Result<()> {
        self.insert(Provider::local(handlers), false).await
    }

    /// Handshake with an already-open session and register its tools.
    pub async fn add_session(&self, name: &str, session: Session) -> Result<()> {
        let remote =
            RemoteProvider::handshake(name, "session".to_string(), session, &self.identity).await?;
        self.insert(Provider::Remote(remote), true).await
    }

    /// Connect to one remote provider and register its tools.
    pub async fn connect(&self, spec: &RemoteSpec) -> Result<()> {
        let remote = RemoteProvider::connect(spec, &self.identity).await?;
        self.insert(Provider::Remote(remote), true).await
    }

    /// Connect every remote concurrently, then register them in the given
    /// order so the later entry wins any name collision.
    ///
    /// Failed providers are excluded and reported, never fatal.
    pub async fn connect_all(&self, specs: &[RemoteSpec]) -> ConnectReport {
        let attempts = join_all(
            specs
                .iter()
                .map(|spec| RemoteProvider::connect(spec, &self.identity)),
        )
        .await;

        let mut report = ConnectReport::default();
        for (spec, attempt) in specs.iter().zip(attempts) {
            let outcome = match attempt {
                Ok(remote) => self.insert(Provider::Remote(remote), true).await,
                Err(e) => Err(e),
            };
            match outcome {
                Ok(()) => report.connected.push(spec.name.clone()),
                Err(e) => {
                    warn!(provider = %spec.name, endpoint = %spec.endpoint, error = %e, "provider excluded");
                    report.failed.push((spec.name.clone(), e));
                }
            }
        }
        report
    }

    /// Fail unless at least one provider is connected.
    pub async fn ensure_providers(&self) -> Result<()> {
        if self.providers.read().await.is_empty() {
            Err(Error::NoProviders)
        } else {
            Ok(())
        }
    }

    /// Drop a provider. Any names it shadowed return to their earlier owner.
    pub async fn disconnect(&self, name: &str) -> bool {
        let mut providers = self.providers.write().await;
        let mut registry = self.registry.write().await;
        registry.unregister(name);
        let removed = providers.remove(name).is_some();
        if removed {
            info!(provider = %name, "disconnected");
        }
        removed
    }

    /// Resolve a tool name to its owning provider and descriptor.
    pub async fn resolve(
        &self,
        tool: &str,
    ) -> std::result::Result<(Arc<Provider>, ToolDescriptor), RegistryError> {
        let providers = self.providers.read().await;
        let registry = self.registry.read().await;
        let resolved = registry.resolve(tool)?;
        let provider = providers
            .get(resolved.provider)
            .cloned()
            .ok_or_else(|| RegistryError::NotFound(tool.to_string()))?;
        Ok((provider, resolved.descriptor.clone()))
    }

    /// Call a tool by name through whichever provider owns it.
    ///
    /// This is the operator's direct path and applies no policy.
    pub async fn call(
        &self,
        tool: &str,
        arguments: &Value,
        limit: Duration,
    ) -> std::result::Result<String, HostCallError> {
        let (provider, _) = self.resolve(tool).await?;
        Ok(provider.dispatch(tool, arguments, limit).await?)
    }

    /// The effective tool set offered to the model.
    pub async fn schema(&self) -> Vec<ToolDescriptor> {
        self.registry.read().await.schema()
    }

    /// Every discovered tool, provider-qualified.
    pub async fn tools(&self) -> Vec<ToolEntry> {
        let registry = self.registry.read().await;
        registry
            .list()
            .into_iter()
            .map(|r| ToolEntry {
                provider: r.provider.to_string(),
                active: registry
                    .resolve(&r.descriptor.name)
                    .is_ok_and(|owner| owner.provider == r.provider),
                descriptor: r.descriptor.clone(),
            })
            .collect()
    }

    /// Connected providers in registration order.
    pub async fn providers(&self) -> Vec<ProviderInfo> {
        let providers = self.providers.read().await;
        let registry = self.registry.read().await;
        registry
            .providers()
            .filter_map(|name| providers.get(name))
            .map(|p| ProviderInfo {
                name: p.name().to_string(),
                endpoint: p.endpoint().to_string(),
                tools: registry.tools_of(p.name()).len(),
            })
            .collect()
    }

    /// Store the provider and write its tools into the registry.
    ///
    /// Both locks are held for the whole update so registration is a single
    /// critical section.
    async fn insert(&self, provider: Provider, remote: bool) -> Result<()> {
        let name = provider.name().to_string();
        let tools: Vec<ToolDescriptor> = provider
            .descriptors()
            .into_iter()
            .map(|d| if remote { self.classify(d) } else { d })
            .collect();

        let mut providers = self.providers.write().await;
        if providers.contains_key(&name) {
            return Err(Error::DuplicateProvider(name));
        }
        let mut registry = self.registry.write().await;
        registry.register(&name, tools);
        providers.insert(name, Arc::new(provider));
        Ok(())
    }

    /// Mark configured remote tools as command-executing.
    fn classify(&self, mut descriptor: ToolDescriptor) -> ToolDescriptor {
        if let Some(argument) = self.command_tools.get(&descriptor.name) {
            descriptor.kind = ToolKind::Command {
                argument: argument.clone(),
            };
        }
        descriptor
    }
}

/// Failure of a direct operator call.
#[derive(Debug, thiserror::Error)]
pub enum HostCallError {
    #[error(transparent)]
    NotFound(#[from] RegistryError),
    #[error(transparent)]
    Dispatch(#[from] DispatchError),
}
