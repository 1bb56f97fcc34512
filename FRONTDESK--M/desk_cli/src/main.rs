use std::{path::PathBuf, sync::Arc};

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use clap::{ArgGroup, Args, Parser, Subcommand};
use frontdesk_dispatch::{
    DispatchConfig, Dispatcher, ManualClock, MemoryStore, NewGuestRequest, NewTask,
};
use serde::Serialize;
use shared_event_bus::MemoryEventBus;
use shared_logging::LogLevel;
use tokio::runtime::Runtime;

const DEFAULT_STORE: &str = "frontdesk.json";

#[derive(Parser, Debug)]
#[command(name = "desk", version, about = "Hotel guest-service dispatch")]
struct Cli {
    /// TOML configuration file.
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    /// JSON snapshot holding all collections.
    #[arg(long, global = true)]
    store: Option<PathBuf>,
    /// Act as if the current time were this RFC 3339 instant.
    #[arg(long, global = true)]
    at: Option<DateTime<Utc>>,
    /// Overrides the configured log level.
    #[arg(long, global = true)]
    log_level: Option<LogLevel>,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Creates a task and routes it to its department.
    Submit {
        #[arg(long)]
        title: String,
        #[arg(long)]
        room: String,
        #[arg(long)]
        department: String,
        #[arg(long, default_value = "front-desk")]
        requester: String,
    },
    /// Queues a guest request.
    GuestRequest {
        #[arg(long)]
        title: String,
        #[arg(long)]
        room: String,
        #[arg(long)]
        department: String,
        #[arg(long)]
        guest: Option<String>,
    },
    /// (Re-)offers a task; defaults to the task's own department.
    Offer {
        task: String,
        #[arg(long)]
        department: Option<String>,
    },
    /// Accepts an offer.
    Accept { task: String, employee: String },
    /// Rejects an offer and prints the replacement.
    Reject { task: String, employee: String },
    /// Marks a task completed.
    Complete { task: String, employee: String },
    /// Claims a guest request as a new in-progress task.
    Claim { request: String, employee: String },
    /// Lists tasks by one filter.
    Tasks(TaskFilter),
    /// Pending offers for an employee.
    Offers { employee: String },
    /// Completed-work summary for a department.
    Performance { department: String },
    /// Status history, newest first.
    History {
        #[arg(long, default_value_t = 20)]
        limit: usize,
    },
}

#[derive(Args, Debug)]
#[command(group(ArgGroup::new("filter").required(true).args(["assignee", "department", "requester"])))]
struct TaskFilter {
    #[arg(long)]
    assignee: Option<String>,
    #[arg(long)]
    department: Option<String>,
    #[arg(long)]
    requester: Option<String>,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let runtime = Runtime::new().context("starting tokio runtime")?;
    let output = runtime.block_on(run(cli))?;
    println!("{output}");
    Ok(())
}

fn load_config(cli: &Cli) -> Result<DispatchConfig> {
    let mut config = match &cli.config {
        Some(path) => DispatchConfig::load(path)?,
        None => DispatchConfig::default(),
    };
    if let Some(level) = cli.log_level {
        config.log_level = level;
    }
    Ok(config)
}

fn store_path(cli: &Cli, config: &DispatchConfig) -> PathBuf {
    cli.store
        .clone()
        .or_else(|| config.store_path.clone())
        .unwrap_or_else(|| PathBuf::from(DEFAULT_STORE))
}

fn open_dispatcher(cli: &Cli) -> Result<Dispatcher> {
    let config = load_config(cli)?;
    let path = store_path(cli, &config);
    let store = MemoryStore::open(&path)
        .with_context(|| format!("opening store {}", path.display()))?
        .with_bus(MemoryEventBus::new(config.event_capacity));
    let mut dispatcher = Dispatcher::from_config(Arc::new(store), &config)?;
    if let Some(at) = cli.at {
        dispatcher = dispatcher.with_clock(Arc::new(ManualClock::new(at)));
    }
    Ok(dispatcher)
}

fn render<T: Serialize>(value: &T) -> Result<String> {
    Ok(serde_json::to_string_pretty(value)?)
}

async fn run(cli: Cli) -> Result<String> {
    let dispatcher = open_dispatcher(&cli)?;
    let views = dispatcher.projections();
    match cli.command {
        Commands::Submit {
            title,
            room,
            department,
            requester,
        } => {
            let submission = dispatcher
                .submit_request(NewTask {
                    title,
                    room_number: room,
                    department_id: department,
                    requester_id: requester,
                })
                .await?;
            render(&submission)
        }
        Commands::GuestRequest {
            title,
            room,
            department,
            guest,
        } => {
            let request = dispatcher
                .submit_guest_request(NewGuestRequest {
                    title,
                    room_number: room,
                    department_id: department,
                    guest_name: guest,
                })
                .await?;
            render(&request)
        }
        Commands::Offer { task, department } => {
            let department = match department {
                Some(department) => department,
                None => views.task(&task).await?.department_id,
            };
            render(&dispatcher.create_offer(&task, &department).await?)
        }
        Commands::Accept { task, employee } => render(&dispatcher.accept(&task, &employee).await?),
        Commands::Reject { task, employee } => render(&dispatcher.reject(&task, &employee).await?),
        Commands::Complete { task, employee } => {
            render(&dispatcher.complete(&task, &employee).await?)
        }
        Commands::Claim { request, employee } => {
            render(&dispatcher.accept_guest_request(&request, &employee).await?)
        }
        Commands::Tasks(filter) => {
            let tasks = if let Some(assignee) = filter.assignee {
                views.tasks_by_assignee(&assignee).await?
            } else if let Some(department) = filter.department {
                views.tasks_by_department(&department).await?
            } else {
                let requester = filter.requester.unwrap_or_default();
                views.tasks_by_requester(&requester).await?
            };
            render(&tasks)
        }
        Commands::Offers { employee } => render(&views.pending_offers_for(&employee).await?),
        Commands::Performance { department } => {
            render(&views.employee_performance(&department).await?)
        }
        Commands::History { limit } => {
            let mut history = views.status_history().await?;
            history.truncate(limit);
            render(&history)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{json, Value};
    use std::{fs, path::Path};
    use tempfile::tempdir;

    fn cli(store: &Path, args: &[&str]) -> Cli {
        let mut argv = vec![
            "desk".to_string(),
            "--store".to_string(),
            store.display().to_string(),
            "--at".to_string(),
            "2025-05-01T09:00:00Z".to_string(),
        ];
        argv.extend(args.iter().map(ToString::to_string));
        Cli::parse_from(argv)
    }

    fn seed(path: &Path) {
        let snapshot = json!({
            "departments": {
                "hk": { "name": "Housekeeping", "employeeIds": ["ana"] }
            },
            "users": {
                "ana": { "name": "Ana" }
            }
        });
        fs::write(path, serde_json::to_vec_pretty(&snapshot).unwrap()).unwrap();
    }

    fn exec(store: &Path, args: &[&str]) -> Value {
        let runtime = Runtime::new().unwrap();
        let output = runtime.block_on(run(cli(store, args))).unwrap();
        serde_json::from_str(&output).unwrap()
    }

    #[test]
    fn submit_accept_complete_through_the_snapshot() {
        let dir = tempdir().unwrap();
        let store = dir.path().join("desk.json");
        seed(&store);

        let submitted = exec(
            &store,
            &["submit", "--title", "Fresh towels", "--room", "204", "--department", "hk"],
        );
        let task_id = submitted["task"]["id"].as_str().unwrap().to_string();
        assert_eq!(submitted["offer"]["employeeId"], "ana");
        assert_eq!(submitted["task"]["status"], "assigned");

        let started = exec(&store, &["accept", &task_id, "ana"]);
        assert_eq!(started["status"], "in_progress");

        let done = exec(&store, &["complete", &task_id, "ana"]);
        assert_eq!(done["status"], "completed");

        let history = exec(&store, &["history", "--limit", "1"]);
        assert_eq!(history.as_array().unwrap().len(), 1);

        let mine = exec(&store, &["tasks", "--assignee", "ana"]);
        assert_eq!(mine.as_array().unwrap().len(), 1);
    }

    #[test]
    fn tasks_requires_a_filter() {
        let parsed = Cli::try_parse_from(["desk", "tasks"]);
        assert!(parsed.is_err());
    }

    #[test]
    fn store_flag_beats_config() {
        let config = DispatchConfig {
            store_path: Some(PathBuf::from("/srv/desk.json")),
            ..DispatchConfig::default()
        };
        let with_flag = Cli::parse_from(["desk", "--store", "local.json", "history"]);
        assert_eq!(store_path(&with_flag, &config), PathBuf::from("local.json"));
        let without = Cli::parse_from(["desk", "history"]);
        assert_eq!(store_path(&without, &config), PathBuf::from("/srv/desk.json"));
        assert_eq!(
            store_path(&without, &DispatchConfig::default()),
            PathBuf::from(DEFAULT_STORE)
        );
    }
}
