//! taskq CLI - SQLite に永続化されたキューをシェルから操作する

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use taskq_core::domain::{EventId, QueueName, TaskId, TaskRecord};
use taskq_core::ports::ChangeListener;
use taskq_core::typed::RestoredTask;
use taskq_core::{QueueManager, SchedulerConfig, Task};
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;

mod tasks;

use tasks::{EchoTask, FlakyTask, SleepTask};

#[derive(Parser)]
#[command(name = "taskq", version, about = "Persistent multi-queue task scheduler")]
#[command(propagate_version = true)]
struct Cli {
    /// Path to TOML configuration file.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// SQLite database file; overrides `database_path` from the config.
    #[arg(long)]
    db: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Resume pending queues and process tasks until Ctrl+C.
    Run {
        /// Exit once every queue has drained.
        #[arg(long)]
        until_idle: bool,
    },

    /// Add a demo task to a queue.
    Enqueue {
        #[arg(short, long, default_value = QueueName::MAIN)]
        queue: String,

        /// Keep processing until the queues drain instead of exiting right away.
        #[arg(short, long)]
        wait: bool,

        #[command(subcommand)]
        task: DemoTask,
    },

    /// List stored tasks.
    Tasks,

    /// List stored events.
    Events {
        /// Only events recorded against this task.
        #[arg(long, value_parser = parse_id)]
        task: Option<i64>,
    },

    /// Delete a task (a running task is asked to cancel).
    DeleteTask {
        #[arg(value_parser = parse_id)]
        id: i64,
    },

    /// Delete one event.
    DeleteEvent {
        #[arg(value_parser = parse_id)]
        id: i64,
    },

    /// Remove tasks and events older than the given number of days.
    Purge {
        #[arg(short, long, default_value_t = 7)]
        days: u32,
    },

    /// Per-queue task counts.
    Status {
        /// Print as JSON.
        #[arg(long)]
        json: bool,
    },
}

#[derive(Subcommand)]
enum DemoTask {
    /// Print a message.
    Echo { message: String },

    /// Requeue itself a few times before succeeding.
    Flaky {
        #[arg(short, long, default_value_t = 2)]
        failures: u32,

        /// Retry delay in seconds (defaults to the configured backoff).
        #[arg(short, long)]
        delay: Option<u64>,
    },

    /// Sleep for a number of seconds; can be cancelled with delete-task.
    Sleep { secs: u64 },
}

/// Accepts `12` as well as the displayed form `task-12` / `event-12`.
fn parse_id(s: &str) -> Result<i64, String> {
    let digits = s.rsplit('-').next().unwrap_or(s);
    digits
        .parse()
        .map_err(|_| format!("'{s}' is not a task or event id"))
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("taskq=info,taskq_core=info")),
        )
        .init();

    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => SchedulerConfig::from_file(path)?,
        None => SchedulerConfig::default(),
    };
    if let Some(db) = cli.db {
        config.database_path = db;
    }
    info!(database = %config.database_path.display(), "using task store");

    let manager = tasks::builder()?
        .config(config)
        .build()
        .context("could not build queue manager")?;

    match cli.command {
        Commands::Run { until_idle } => run(&manager, until_idle).await,
        Commands::Enqueue { queue, wait, task } => enqueue(&manager, queue, wait, task).await,
        Commands::Tasks => list_tasks(&manager).await,
        Commands::Events { task } => list_events(&manager, task.map(TaskId::from_raw)).await,
        Commands::DeleteTask { id } => {
            manager.delete_task(TaskId::from_raw(id)).await?;
            println!("deleted {}", TaskId::from_raw(id));
            Ok(())
        }
        Commands::DeleteEvent { id } => {
            manager.delete_event(EventId::from_raw(id)).await?;
            println!("deleted {}", EventId::from_raw(id));
            Ok(())
        }
        Commands::Purge { days } => {
            let tasks = manager.delete_tasks_older_than(days).await?;
            let events = manager.delete_events_older_than(days).await?;
            println!("removed {tasks} tasks and {events} events older than {days} days");
            Ok(())
        }
        Commands::Status { json } => show_status(&manager, json).await,
    }
}

async fn run(manager: &Arc<QueueManager>, until_idle: bool) -> Result<()> {
    let listener: Arc<dyn ChangeListener> = Arc::new(|| debug!("tasks changed"));
    manager.register_task_listener(&listener);

    let started = manager.bootstrap().await?;
    println!("resumed {started} queues. Press Ctrl+C to stop.");

    tokio::select! {
        result = tokio::signal::ctrl_c() => {
            result?;
            info!("received Ctrl+C, shutting down...");
        }
        _ = wait_idle(manager), if until_idle => {
            info!("all queues drained");
        }
    }
    manager.shutdown().await;
    Ok(())
}

async fn enqueue(
    manager: &Arc<QueueManager>,
    queue: String,
    wait: bool,
    task: DemoTask,
) -> Result<()> {
    let queue = QueueName::new(queue);
    let id = match task {
        DemoTask::Echo { message } => submit(manager, &queue, wait, EchoTask { message }).await?,
        DemoTask::Flaky { failures, delay } => {
            let task = FlakyTask {
                failures,
                delay_secs: delay,
                attempts: 0,
            };
            submit(manager, &queue, wait, task).await?
        }
        DemoTask::Sleep { secs } => {
            let task = SleepTask {
                total_secs: secs,
                elapsed_secs: 0,
            };
            submit(manager, &queue, wait, task).await?
        }
    };
    println!("enqueued {id} on {queue}");

    if wait {
        tokio::select! {
            result = tokio::signal::ctrl_c() => result?,
            _ = wait_idle(manager) => {}
        }
    }
    // 実行中のタスクは終わるまで待つ。残りは次の `run` で再開される
    manager.shutdown().await;
    Ok(())
}

/// Without `--wait` the task is only stored; `run` picks it up later.
async fn submit(
    manager: &Arc<QueueManager>,
    queue: &QueueName,
    wait: bool,
    task: impl Task,
) -> Result<TaskId> {
    let id = if wait {
        manager.enqueue_task(queue, task).await?
    } else {
        manager.persist_task(queue, task).await?
    };
    Ok(id)
}

async fn wait_idle(manager: &Arc<QueueManager>) {
    while !manager.active_queues().await.is_empty() {
        tokio::time::sleep(Duration::from_millis(200)).await;
    }
}

async fn list_tasks(manager: &Arc<QueueManager>) -> Result<()> {
    let tasks = manager.tasks().await?;
    if tasks.is_empty() {
        println!("no tasks");
        return Ok(());
    }
    for task in tasks {
        println!(
            "{:<10} {:<12} {:<7} retries={:<3} retry_at={} {}",
            task.id.to_string(),
            task.queue.as_str(),
            task.state.as_str(),
            task.retries,
            task.retry_at.format("%Y-%m-%d %H:%M:%S"),
            task.description,
        );
        if let Some(reason) = legacy_reason(manager, &task) {
            println!("{:<10} unreadable payload: {reason}", "");
        }
        if let Some(reason) = task.failure_reason {
            println!("{:<10} reason: {reason}", "");
        }
    }
    Ok(())
}

/// Rows whose payload no longer decodes (unknown kind or corrupt bytes).
fn legacy_reason(manager: &QueueManager, task: &TaskRecord) -> Option<String> {
    match manager.restore_task(task) {
        RestoredTask::Legacy { reason, .. } => Some(reason),
        RestoredTask::Task(_) => None,
    }
}

async fn list_events(manager: &Arc<QueueManager>, task: Option<TaskId>) -> Result<()> {
    let events = match task {
        Some(id) => manager.task_events(id).await?,
        None => manager.events().await?,
    };
    if events.is_empty() {
        println!("no events");
        return Ok(());
    }
    for event in events {
        let owner = event
            .task_id
            .map(|id| id.to_string())
            .unwrap_or_else(|| "-".to_string());
        println!(
            "{:<11} {:<10} {} {}",
            event.id.to_string(),
            owner,
            event.timestamp.format("%Y-%m-%d %H:%M:%S"),
            event.body.description(),
        );
    }
    Ok(())
}

async fn show_status(manager: &Arc<QueueManager>, json: bool) -> Result<()> {
    let status = manager.status().await?;
    if json {
        println!("{}", serde_json::to_string_pretty(&status)?);
        return Ok(());
    }

    println!("{:<12} {:>5} {:>7} {:>6}", "QUEUE", "READY", "WAITING", "FAILED");
    for queue in &status.queues {
        println!(
            "{:<12} {:>5} {:>7} {:>6}{}",
            queue.name.as_str(),
            queue.counts.ready,
            queue.counts.waiting,
            queue.counts.failed,
            queue
                .running
                .map(|id| format!("  running {id}"))
                .unwrap_or_default(),
        );
    }
    let total = status.total();
    println!(
        "total: {} ready, {} waiting, {} failed; {} events",
        total.ready, total.waiting, total.failed, status.events
    );
    Ok(())
}
