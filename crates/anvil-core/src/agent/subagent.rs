//! Bounded parallel sub-agent fan-out.
//!
//! Each task drives its own [`AgentLoop`] over an isolated transcript, so
//! concurrent sub-agents never share mutable conversation state with the
//! primary loop or each other. The task list is truncated to the
//! concurrency cap (extras are dropped, not queued), every task races its
//! own timeout, and the aggregate preserves input order regardless of
//! completion order.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;

use crate::ai::client::{CallOptions, ModelClient};
use crate::ai::types::{ModelMessage, Role};
use crate::checkpoint::CheckpointManager;
use crate::permission::PermissionGate;
use crate::process::ProcessRegistry;
use crate::tools::registry::ToolRegistry;

use super::orchestrator::{AgentLoop, LoopConfig, LoopServices, TurnOutcome};

/// Concurrency cap. Tasks beyond it are dropped with a warning.
pub const MAX_PARALLEL_AGENTS: usize = 4;

const SUBAGENT_TIMEOUT: Duration = Duration::from_secs(300);
const SUBAGENT_MAX_ITERATIONS: usize = 8;

const SUBAGENT_SYSTEM_PROMPT: &str = "You are a focused sub-agent. Complete \
the single task you are given using the available read-only tools, then \
answer with a concise summary of what you found.";

/// One independent task description.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubAgentTask {
    pub title: String,
    pub prompt: String,
}

/// Aggregate entry for one task, in input order.
#[derive(Debug, Clone, Serialize)]
pub struct SubAgentOutcome {
    pub title: String,
    pub success: bool,
    pub output: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

pub struct SubAgentPool {
    model: Arc<dyn ModelClient>,
    tools: Arc<ToolRegistry>,
    working_dir: PathBuf,
    max_parallel: usize,
    task_timeout: Duration,
    cancellation: CancellationToken,
}

impl SubAgentPool {
    /// `tools` should be a read-only subset; sub-agents get no checkpoint
    /// manager and their own process registry.
    pub fn new(model: Arc<dyn ModelClient>, tools: Arc<ToolRegistry>, working_dir: PathBuf) -> Self {
        Self {
            model,
            tools,
            working_dir,
            max_parallel: MAX_PARALLEL_AGENTS,
            task_timeout: SUBAGENT_TIMEOUT,
            cancellation: CancellationToken::new(),
        }
    }

    pub fn with_max_parallel(mut self, max: usize) -> Self {
        self.max_parallel = max.max(1);
        self
    }

    pub fn with_task_timeout(mut self, task_timeout: Duration) -> Self {
        self.task_timeout = task_timeout;
        self
    }

    pub fn cancellation(&self) -> CancellationToken {
        self.cancellation.clone()
    }

    /// Run the accepted tasks concurrently and return one aggregate entry
    /// per accepted task, in input order. Never short-circuits: failures
    /// and timeouts appear in the aggregate alongside successes.
    pub async fn execute(&self, mut tasks: Vec<SubAgentTask>) -> Vec<SubAgentOutcome> {
        if tasks.len() > self.max_parallel {
            tracing::warn!(
                requested = tasks.len(),
                cap = self.max_parallel,
                dropped = tasks.len() - self.max_parallel,
                "Truncating parallel tasks to the concurrency cap"
            );
            tasks.truncate(self.max_parallel);
        }

        tracing::info!(count = tasks.len(), "Spawning sub-agents");

        let futures: Vec<_> = tasks.into_iter().map(|task| self.run_one(task)).collect();
        futures::future::join_all(futures).await
    }

    async fn run_one(&self, task: SubAgentTask) -> SubAgentOutcome {
        let title = task.title.clone();

        let work = async {
            let services = LoopServices {
                model: self.model.clone(),
                tools: self.tools.clone(),
                processes: Arc::new(ProcessRegistry::new()),
                checkpoints: Arc::new(CheckpointManager::disabled()),
                gate: Arc::new(PermissionGate::new()),
            };
            let config = LoopConfig {
                working_dir: self.working_dir.clone(),
                max_iterations: SUBAGENT_MAX_ITERATIONS,
                tool_timeout: None,
                options: CallOptions::default(),
            };

            // Events go nowhere: sub-agents report only through their
            // aggregate entry.
            let (agent, _events) = AgentLoop::new(services, config);

            let mut conversation = vec![
                ModelMessage::text(Role::System, SUBAGENT_SYSTEM_PROMPT),
                ModelMessage::text(Role::User, task.prompt),
            ];
            agent.run_turn(&mut conversation).await
        };

        tokio::select! {
            _ = self.cancellation.cancelled() => SubAgentOutcome {
                title,
                success: false,
                output: String::new(),
                error: Some("cancelled".to_string()),
            },
            result = timeout(self.task_timeout, work) => match result {
                Ok(Ok(TurnOutcome::Completed { text, .. })) => SubAgentOutcome {
                    title,
                    success: true,
                    output: text,
                    error: None,
                },
                Ok(Ok(TurnOutcome::IterationLimit { fallback, .. })) => SubAgentOutcome {
                    title,
                    success: false,
                    output: fallback,
                    error: Some("iteration limit reached".to_string()),
                },
                Ok(Err(e)) => SubAgentOutcome {
                    title,
                    success: false,
                    output: String::new(),
                    error: Some(e.to_string()),
                },
                Err(_) => SubAgentOutcome {
                    title,
                    success: false,
                    output: String::new(),
                    error: Some(format!(
                        "timed out after {}s",
                        self.task_timeout.as_secs()
                    )),
                },
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ai::client::{ModelError, ModelResponse};
    use crate::ai::types::AiTool;
    use async_trait::async_trait;

    /// Answers every task with its prompt echoed back, after a fixed delay.
    struct SlowEcho {
        delay: Duration,
    }

    #[async_trait]
    impl ModelClient for SlowEcho {
        async fn complete(
            &self,
            conversation: &[ModelMessage],
            _tools: &[AiTool],
            _options: &CallOptions,
        ) -> Result<ModelResponse, ModelError> {
            tokio::time::sleep(self.delay).await;
            let prompt = conversation
                .iter()
                .find(|m| m.role == Role::User)
                .map(|m| m.plain_text())
                .unwrap_or_default();
            Ok(ModelResponse {
                text: format!("answer: {}", prompt),
                ..Default::default()
            })
        }
    }

    fn tasks(n: usize) -> Vec<SubAgentTask> {
        (0..n)
            .map(|i| SubAgentTask {
                title: format!("task-{}", i),
                prompt: format!("prompt-{}", i),
            })
            .collect()
    }

    fn pool(delay: Duration) -> SubAgentPool {
        SubAgentPool::new(
            Arc::new(SlowEcho { delay }),
            Arc::new(ToolRegistry::new()),
            PathBuf::from("."),
        )
    }

    #[tokio::test]
    async fn excess_tasks_are_dropped_at_the_cap() {
        let pool = pool(Duration::from_millis(5)).with_max_parallel(4);
        let outcomes = pool.execute(tasks(6)).await;

        // Exactly the first four, in input order.
        assert_eq!(outcomes.len(), 4);
        for (i, outcome) in outcomes.iter().enumerate() {
            assert_eq!(outcome.title, format!("task-{}", i));
            assert!(outcome.success);
            assert_eq!(outcome.output, format!("answer: prompt-{}", i));
        }
    }

    #[tokio::test]
    async fn aggregate_preserves_order_under_concurrency() {
        let pool = pool(Duration::from_millis(20)).with_max_parallel(3);
        let outcomes = pool.execute(tasks(3)).await;

        let titles: Vec<_> = outcomes.iter().map(|o| o.title.as_str()).collect();
        assert_eq!(titles, vec!["task-0", "task-1", "task-2"]);
    }

    #[tokio::test]
    async fn timed_out_tasks_fail_without_hiding_the_rest() {
        let pool = pool(Duration::from_secs(30))
            .with_max_parallel(2)
            .with_task_timeout(Duration::from_millis(50));
        let outcomes = pool.execute(tasks(2)).await;

        assert_eq!(outcomes.len(), 2);
        for outcome in &outcomes {
            assert!(!outcome.success);
            assert!(outcome.error.as_ref().unwrap().contains("timed out"));
        }
    }

    #[tokio::test]
    async fn cancellation_fails_pending_tasks() {
        let pool = pool(Duration::from_secs(30)).with_max_parallel(2);
        let token = pool.cancellation();

        let run = pool.execute(tasks(2));
        token.cancel();
        let outcomes = run.await;

        for outcome in &outcomes {
            assert!(!outcome.success);
            assert_eq!(outcome.error.as_deref(), Some("cancelled"));
        }
    }

    #[tokio::test]
    async fn empty_task_list_yields_empty_aggregate() {
        let pool = pool(Duration::from_millis(1));
        assert!(pool.execute(Vec::new()).await.is_empty());
    }
}
