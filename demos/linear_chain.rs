//! Minimal runnable demo: build a three-task chain, start it, and drive it
//! to completion by hand-feeding completion events (standing in for a real
//! worker pool, which is outside this crate's scope).

use std::sync::Arc;
use std::time::Duration;

use tracing_subscriber::EnvFilter;
use waymark_orchestrator::prelude::*;

fn http_task(name: &str, depends_on: Vec<usize>) -> TaskSpec {
    TaskSpec {
        name: name.into(),
        task_type: TaskType::Http,
        timeout_seconds: 30,
        priority: Priority::Normal,
        retry_policy: RetryPolicy::fixed_delay(1, Duration::from_millis(100)),
        idempotency_key: None,
        max_parallel_instances: 1,
        payload: serde_json::json!({}),
        depends_on,
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let store = Arc::new(InMemoryStore::new());
    let (queue, mut ready_rx) = InProcessWorkQueue::new(64);
    let queue = Arc::new(queue);
    let orchestrator = WorkflowOrchestrator::new(store.clone(), store.clone(), queue);

    let spec = WorkflowSpec {
        name: "fetch-transform-load".into(),
        description: Some("demo pipeline".into()),
        execution_mode: None,
        metadata: serde_json::json!({}),
        tasks: vec![
            http_task("fetch", vec![]),
            http_task("transform", vec![0]),
            http_task("load", vec![1]),
        ],
    };

    let workflow = CreateWorkflowUseCase::new(store.clone(), store.clone())
        .execute(spec)
        .await?;
    orchestrator.start(workflow.id).await?;

    // Stand in for a worker pool: complete whatever the orchestrator queues,
    // in the order it arrives, until the workflow reaches a terminal status.
    loop {
        let current = store.find_by_id(workflow.id).await?.unwrap();
        if current.status.is_terminal() {
            println!("workflow finished: {}", current.status);
            break;
        }
        let Some(message) = ready_rx.recv().await else {
            break;
        };
        orchestrator
            .on_task_completed(message.workflow_id, message.task_id, serde_json::json!({"ran": true}))
            .await?;
    }

    Ok(())
}
