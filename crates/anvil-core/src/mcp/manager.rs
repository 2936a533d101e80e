//! Provider registry and lifecycle.
//!
//! Providers are connected concurrently at startup. A provider that fails
//! to spawn, fails the handshake, or stalls past the discovery timeout is
//! skipped; the others and the host proceed. `shutdown` terminates every
//! tracked process.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Result};
use serde::Deserialize;
use serde_json::Value;
use tokio::sync::RwLock;

use super::client::{McpClient, RemoteToolOutcome};
use super::protocol::ProviderToolDef;

/// Spawn + handshake + discovery must finish within this window, or the
/// provider is skipped.
const DISCOVERY_TIMEOUT: Duration = Duration::from_secs(10);

/// How to launch one provider.
#[derive(Debug, Clone, Deserialize)]
pub struct ProviderConfig {
    pub name: String,
    pub command: String,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default)]
    pub env: HashMap<String, String>,
}

pub struct McpManager {
    clients: RwLock<HashMap<String, Arc<McpClient>>>,
    working_dir: PathBuf,
}

impl McpManager {
    pub fn new(working_dir: PathBuf) -> Self {
        Self {
            clients: RwLock::new(HashMap::new()),
            working_dir,
        }
    }

    /// Connect to every configured provider concurrently. Failures are
    /// logged and skipped; initialization of the others is unaffected.
    pub async fn connect_all(&self, configs: &[ProviderConfig]) {
        if configs.is_empty() {
            return;
        }

        tracing::info!(count = configs.len(), "Connecting to tool providers");

        let futures: Vec<_> = configs
            .iter()
            .map(|config| async move { (config.name.clone(), self.connect(config).await) })
            .collect();

        for (name, result) in futures::future::join_all(futures).await {
            if let Err(e) = result {
                tracing::warn!(provider = %name, "Skipping provider: {:#}", e);
            }
        }
    }

    /// Connect a single provider: spawn, handshake, discover tools. The
    /// whole sequence runs under the discovery timeout.
    pub async fn connect(&self, config: &ProviderConfig) -> Result<()> {
        // Replace any previous connection for this name.
        self.disconnect(&config.name).await;

        let connected = tokio::time::timeout(DISCOVERY_TIMEOUT, async {
            let client = McpClient::connect(
                &config.name,
                &config.command,
                &config.args,
                &config.env,
                &self.working_dir,
            )
            .await?;
            client.initialize().await?;
            client.list_tools().await?;
            Ok::<McpClient, anyhow::Error>(client)
        })
        .await;

        let client = match connected {
            Ok(Ok(client)) => client,
            Ok(Err(e)) => return Err(e),
            Err(_) => {
                return Err(anyhow!(
                    "provider stalled during discovery ({}s)",
                    DISCOVERY_TIMEOUT.as_secs()
                ))
            }
        };

        self.clients
            .write()
            .await
            .insert(config.name.clone(), Arc::new(client));

        tracing::info!(provider = %config.name, "Provider connected");
        Ok(())
    }

    pub async fn disconnect(&self, name: &str) {
        if let Some(client) = self.clients.write().await.remove(name) {
            client.shutdown().await;
            tracing::info!(provider = %name, "Provider disconnected");
        }
    }

    /// All discovered tools, as (provider, definition) pairs.
    pub async fn all_tools(&self) -> Vec<(String, ProviderToolDef)> {
        let clients = self.clients.read().await;
        let mut tools = Vec::new();
        for (name, client) in clients.iter() {
            for tool in client.cached_tools().await {
                tools.push((name.clone(), tool));
            }
        }
        tools
    }

    /// Call a tool on a connected provider.
    pub async fn call_tool(
        &self,
        provider: &str,
        tool: &str,
        arguments: Value,
    ) -> Result<RemoteToolOutcome> {
        let client = {
            let clients = self.clients.read().await;
            clients
                .get(provider)
                .cloned()
                .ok_or_else(|| anyhow!("provider not connected: {}", provider))?
        };

        client.call_tool(tool, arguments).await
    }

    pub async fn is_connected(&self, name: &str) -> bool {
        match self.clients.read().await.get(name) {
            Some(client) => client.is_alive().await,
            None => false,
        }
    }

    /// Terminate every tracked provider process.
    pub async fn shutdown(&self) {
        let clients: Vec<_> = self.clients.write().await.drain().collect();
        for (name, client) in clients {
            client.shutdown().await;
            tracing::info!(provider = %name, "Provider terminated");
        }
    }
}
