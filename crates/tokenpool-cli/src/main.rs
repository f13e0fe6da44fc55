use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;
use tokio::process::Command;
use tracing::{error, info};

use tokenpool_core::app::{ProcessContext, RunActor, StopReason, TaskProcessor};
use tokenpool_core::config::RunConfig;
use tokenpool_core::domain::{Record, Task};
use tokenpool_core::error::ProcessError;
use tokenpool_core::impls::InMemoryStore;
use tokenpool_core::maintenance::push_tasks;
use tokenpool_core::observability::{count_states, init_tracing};

const DEMO_TOKENS_ENV: &str = "TOKENPOOL_DEMO_TOKENS";
const DEMO_DELAY_ENV: &str = "TOKENPOOL_DEMO_DELAY_SECS";
const DEFAULT_DEMO_TOKENS: usize = 5;

#[derive(Debug, Deserialize)]
struct EchoInput {
    message: String,
}

/// `echo` の結果を exit code・output・ログ添付として書き戻す
struct EchoProcessor {
    delay: Duration,
}

#[async_trait]
impl TaskProcessor for EchoProcessor {
    async fn process(&self, task: &mut Task, ctx: &ProcessContext) -> Result<(), ProcessError> {
        let input: EchoInput = serde_json::from_value(task.input.clone())?;
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }

        let out = ctx.execute(Command::new("echo").arg(&input.message)).await?;
        let stdout = String::from_utf8_lossy(&out.stdout).trim_end().to_string();

        task.exit_code = out.exit_code();
        task.output = json!({ "stdout": stdout });

        let id = task.id().to_string();
        task.put_attachment(format!("logs_{id}.out"), &out.stdout, None);
        task.put_attachment(format!("logs_{id}.err"), &out.stderr, None);
        Ok(())
    }
}

fn load_config() -> Result<RunConfig, Box<dyn std::error::Error>> {
    let config = match std::env::args().nth(1) {
        Some(path) => RunConfig::from_json_file(path)?,
        None => RunConfig::default(),
    };
    Ok(config.apply_env()?)
}

fn env_number<T: std::str::FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|v| v.parse().ok())
}

fn demo_tokens() -> Vec<Task> {
    let n = env_number(DEMO_TOKENS_ENV).unwrap_or(DEFAULT_DEMO_TOKENS);
    (0..n)
        .map(|i| Task::new().with_input(json!({ "message": format!("hello from token {i}") })))
        .collect()
}

async fn run() -> Result<StopReason, Box<dyn std::error::Error>> {
    let config = load_config()?;

    // (A) store に demo token を投入
    let store = InMemoryStore::new();
    let mut tokens = demo_tokens();
    push_tasks(&store, &mut tokens).await?;
    let store = Arc::new(store);

    // (B) 設定から pilot を組み立てる
    let iterator = config.build_iterator(store.clone());
    let processor = EchoProcessor {
        delay: Duration::from_secs(env_number(DEMO_DELAY_ENV).unwrap_or(0)),
    };
    let mut actor = RunActor::new(store.clone(), Arc::new(processor))
        .with_iterator(iterator)
        .with_policy(config.stop_policy())
        .with_reset_values(config.reset_values())
        .with_child_grace(config.child_grace());

    // (C) 実行
    let summary = actor.run().await?;
    info!(
        processed = summary.tasks_processed,
        reason = ?summary.stop_reason,
        last_task = summary.last_task_id.as_deref().unwrap_or("-"),
        "pilot stopped"
    );

    let counts = count_states(store.as_ref(), &config.design_doc).await?;
    println!("counts: {}", serde_json::to_string(&counts)?);
    Ok(summary.stop_reason)
}

#[tokio::main]
async fn main() -> ExitCode {
    dotenvy::dotenv().ok();
    init_tracing();

    match run().await {
        // signal も正常終了扱い
        Ok(_) => ExitCode::SUCCESS,
        Err(err) => {
            error!(error = %err, "pilot failed");
            eprintln!("tokenpool: {err}");
            ExitCode::FAILURE
        }
    }
}
