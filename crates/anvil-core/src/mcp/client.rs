//! JSON-RPC client for a single tool provider.
//!
//! A background receive loop parses incoming lines and completes the
//! matching pending request, so out-of-order responses correlate correctly.
//! Request ids are a per-connection monotonic counter; an id is consumed
//! exactly once, and unmatched or already-consumed ids are ignored.

use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Result};
use serde_json::Value;
use tokio::sync::{mpsc, oneshot, RwLock};

use super::protocol::{
    flatten_text, ClientCapabilities, ClientInfo, InitializeParams, InitializeResult, RpcMessage,
    RpcNotification, RpcRequest, ToolCallParams, ToolCallResult, ToolsListResult,
    ProviderToolDef, PROTOCOL_VERSION,
};
use super::transport::StdioTransport;

/// A request unanswered for this long rejects with a timeout. The provider
/// process is left running; it may still answer later or be retried.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

type PendingMap = Arc<RwLock<HashMap<i64, oneshot::Sender<Result<Value>>>>>;

/// Outcome of a remote tool call, flattened to text.
#[derive(Debug, Clone)]
pub struct RemoteToolOutcome {
    pub text: String,
    pub is_error: bool,
}

pub struct McpClient {
    name: String,
    transport: Arc<StdioTransport>,
    next_id: AtomicI64,
    pending: PendingMap,
    tools: RwLock<Vec<ProviderToolDef>>,
    shutdown_tx: Option<mpsc::Sender<()>>,
}

impl McpClient {
    /// Spawn the provider process and start the receive loop. The protocol
    /// handshake is a separate step ([`Self::initialize`]).
    pub async fn connect(
        name: &str,
        command: &str,
        args: &[String],
        env: &HashMap<String, String>,
        working_dir: &Path,
    ) -> Result<Self> {
        let transport = Arc::new(StdioTransport::spawn(name, command, args, env, working_dir).await?);

        let pending: PendingMap = Arc::new(RwLock::new(HashMap::new()));
        let (shutdown_tx, mut shutdown_rx) = mpsc::channel::<()>(1);

        let recv_transport = Arc::clone(&transport);
        let recv_pending = Arc::clone(&pending);
        let recv_name = name.to_string();

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = shutdown_rx.recv() => {
                        tracing::debug!(provider = %recv_name, "Receive loop shutting down");
                        break;
                    }
                    result = recv_transport.receive() => {
                        match result {
                            Ok(message) => {
                                if let Err(e) = handle_message(&message, &recv_pending).await {
                                    tracing::error!(provider = %recv_name, "Message error: {}", e);
                                }
                            }
                            Err(e) => {
                                tracing::error!(provider = %recv_name, "Receive error: {}", e);
                                let mut pending = recv_pending.write().await;
                                for (_, tx) in pending.drain() {
                                    let _ = tx.send(Err(anyhow!("connection lost")));
                                }
                                break;
                            }
                        }
                    }
                }
            }
        });

        Ok(Self {
            name: name.to_string(),
            transport,
            next_id: AtomicI64::new(1),
            pending,
            tools: RwLock::new(Vec::new()),
            shutdown_tx: Some(shutdown_tx),
        })
    }

    /// Protocol handshake: `initialize`, then the `initialized` notification.
    pub async fn initialize(&self) -> Result<InitializeResult> {
        let params = InitializeParams {
            protocol_version: PROTOCOL_VERSION.to_string(),
            capabilities: ClientCapabilities::default(),
            client_info: ClientInfo {
                name: "anvil".to_string(),
                version: env!("CARGO_PKG_VERSION").to_string(),
            },
        };

        let result: InitializeResult = self
            .request("initialize", Some(serde_json::to_value(params)?))
            .await?;

        tracing::info!(
            provider = %self.name,
            protocol = %result.protocol_version,
            "Provider initialized"
        );

        self.notify("notifications/initialized", None).await?;
        Ok(result)
    }

    /// Discover the provider's tool catalog.
    pub async fn list_tools(&self) -> Result<Vec<ProviderToolDef>> {
        let result: ToolsListResult = self.request("tools/list", None).await?;
        tracing::info!(provider = %self.name, count = result.tools.len(), "Discovered tools");

        *self.tools.write().await = result.tools.clone();
        Ok(result.tools)
    }

    /// Invoke a remote tool by its bare name.
    pub async fn call_tool(&self, name: &str, arguments: Value) -> Result<RemoteToolOutcome> {
        let params = ToolCallParams {
            name: name.to_string(),
            arguments: if arguments.is_null() {
                None
            } else {
                Some(arguments)
            },
        };

        let result: ToolCallResult = self
            .request("tools/call", Some(serde_json::to_value(params)?))
            .await?;

        Ok(RemoteToolOutcome {
            text: flatten_text(&result.content),
            is_error: result.is_error,
        })
    }

    pub async fn cached_tools(&self) -> Vec<ProviderToolDef> {
        self.tools.read().await.clone()
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub async fn is_alive(&self) -> bool {
        self.transport.is_alive().await
    }

    /// Terminate the provider process.
    pub async fn shutdown(&self) {
        if let Some(tx) = &self.shutdown_tx {
            let _ = tx.try_send(());
        }
        self.transport.kill().await;
    }

    async fn request<R: for<'de> serde::Deserialize<'de>>(
        &self,
        method: &str,
        params: Option<Value>,
    ) -> Result<R> {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let request = RpcRequest::new(id, method, params);
        let json = serde_json::to_string(&request)?;

        tracing::debug!(provider = %self.name, id, method, "Request");

        let (tx, rx) = oneshot::channel();
        self.pending.write().await.insert(id, tx);

        self.transport.send(&json).await?;

        match tokio::time::timeout(REQUEST_TIMEOUT, rx).await {
            Ok(Ok(Ok(value))) => Ok(serde_json::from_value(value)?),
            Ok(Ok(Err(e))) => Err(e),
            Ok(Err(_)) => Err(anyhow!("request cancelled")),
            Err(_) => {
                // Drop the pending slot; a late answer for this id is ignored.
                self.pending.write().await.remove(&id);
                Err(anyhow!(
                    "request '{}' timed out after {}s",
                    method,
                    REQUEST_TIMEOUT.as_secs()
                ))
            }
        }
    }

    async fn notify(&self, method: &str, params: Option<Value>) -> Result<()> {
        let notification = RpcNotification::new(method, params);
        self.transport.send(&serde_json::to_string(&notification)?).await
    }
}

impl Drop for McpClient {
    fn drop(&mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.try_send(());
        }
    }
}

/// Route one incoming line: complete the matching pending request, or log a
/// notification. Unmatched ids are ignored.
async fn handle_message(message: &str, pending: &RwLock<HashMap<i64, oneshot::Sender<Result<Value>>>>) -> Result<()> {
    let parsed: RpcMessage = serde_json::from_str(message)?;

    if let Some(id) = parsed.id {
        let mut pending = pending.write().await;
        if let Some(tx) = pending.remove(&id) {
            if let Some(error) = parsed.error {
                let _ = tx.send(Err(anyhow!(
                    "provider error {}: {}",
                    error.code,
                    error.message
                )));
            } else {
                let _ = tx.send(Ok(parsed.result.unwrap_or(Value::Null)));
            }
        } else {
            tracing::debug!(id, "Ignoring response for unknown or consumed id");
        }
        return Ok(());
    }

    if let Some(method) = &parsed.method {
        tracing::debug!(method = %method, "Provider notification");
    }

    Ok(())
}
