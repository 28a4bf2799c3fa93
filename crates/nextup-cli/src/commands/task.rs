//! Task management commands.

use chrono::{DateTime, Duration, Utc};
use clap::Subcommand;
use std::error::Error;
use std::sync::Arc;

use nextup_core::events::Event;
use nextup_core::period::AllowedPeriod;
use nextup_core::settings::data_dir;
use nextup_core::storage::{OwnerFilter, Storage};
use nextup_core::sync::{get_or_create_device_id, SyncEngine};
use nextup_core::task::{lifecycle, CutInLine, Owner, RepeatRule, Task};
use nextup_core::{AppSettings, EventBus};

use crate::store::FileStore;

#[derive(Subcommand)]
pub enum TaskAction {
    /// Create a new task
    Add {
        /// Task title
        title: String,
        /// Task description
        #[arg(long)]
        description: Option<String>,
        /// Importance 1-5
        #[arg(long, default_value = "3")]
        importance: i32,
        /// Size estimate in points
        #[arg(long, default_value = "3.0")]
        size: f64,
        /// Deadline (RFC 3339, e.g. 2026-09-01T17:00:00Z)
        #[arg(long)]
        deadline: Option<String>,
        /// Allowed period: any, work, off-work, or a named period id
        #[arg(long, default_value = "any")]
        period: String,
        /// Own this task by user id instead of this device
        #[arg(long)]
        user: Option<String>,
        /// Repeat every N days
        #[arg(long)]
        repeat_days: Option<u32>,
        /// Exclude from automatic shuffles
        #[arg(long)]
        no_auto: bool,
    },
    /// List tasks
    List {
        /// Output JSON instead of a table
        #[arg(long)]
        json: bool,
        /// Include completed tasks
        #[arg(long)]
        all: bool,
    },
    /// Show one task
    Show {
        /// Task id (or unique prefix)
        id: String,
    },
    /// Edit a task
    Edit {
        /// Task id (or unique prefix)
        id: String,
        #[arg(long)]
        title: Option<String>,
        #[arg(long)]
        description: Option<String>,
        #[arg(long)]
        importance: Option<i32>,
        #[arg(long)]
        size: Option<f64>,
        /// New deadline (RFC 3339), or "none" to clear
        #[arg(long)]
        deadline: Option<String>,
        /// Allowed period: any, work, off-work, or a named period id
        #[arg(long)]
        period: Option<String>,
    },
    /// Mark a task completed
    Done {
        /// Task id (or unique prefix)
        id: String,
    },
    /// Snooze a task for a while (e.g. 45m, 2h, 1d)
    Snooze {
        /// Task id (or unique prefix)
        id: String,
        /// Snooze duration: <n>m, <n>h or <n>d
        duration: String,
    },
    /// Resume a snoozed or completed task now
    Resume {
        /// Task id (or unique prefix)
        id: String,
    },
    /// Pause a task (kept but never selected)
    Pause {
        /// Task id (or unique prefix)
        id: String,
    },
    /// Unpause a task
    Unpause {
        /// Task id (or unique prefix)
        id: String,
    },
    /// Force a task to win the next shuffle: once, sticky or off
    CutInLine {
        /// Task id (or unique prefix)
        id: String,
        /// once, sticky or off
        #[arg(default_value = "once")]
        mode: String,
    },
    /// Delete a task
    Delete {
        /// Task id (or unique prefix)
        id: String,
    },
}

pub async fn run(action: TaskAction) -> Result<(), Box<dyn Error>> {
    let store = Arc::new(FileStore::open()?);
    let bus = EventBus::new();
    let device_id = get_or_create_device_id()?;
    let settings = AppSettings::load()?;
    let engine = SyncEngine::new(
        store.clone(),
        bus.clone(),
        device_id.clone(),
        settings.network.user_id.clone(),
        &data_dir()?,
    )?;
    let now = Utc::now();

    match action {
        TaskAction::Add {
            title,
            description,
            importance,
            size,
            deadline,
            period,
            user,
            repeat_days,
            no_auto,
        } => {
            let owner = match user {
                Some(user_id) => Owner::User(user_id),
                None => Owner::Device(device_id),
            };
            let mut task = Task::new(title, owner);
            task.description = description;
            task.importance = importance.clamp(1, 5);
            task.size_points = size;
            task.deadline = deadline.as_deref().map(parse_rfc3339).transpose()?;
            task.allowed_period = parse_period(&period);
            task.auto_shuffle_allowed = !no_auto;
            if let Some(every_days) = repeat_days {
                task.repeat = RepeatRule::Interval { every_days };
            }
            store.upsert_task(task.clone()).await?;
            engine.record_local(&Event::TaskUpserted { task: task.clone() }, now).await?;
            println!("Task created: {}", task.id);
        }
        TaskAction::List { json, all } => {
            let tasks: Vec<Task> = store
                .get_tasks(OwnerFilter::All)
                .await?
                .into_iter()
                .filter(|t| all || t.status != nextup_core::TaskStatus::Completed)
                .collect();
            if json {
                println!("{}", serde_json::to_string_pretty(&tasks)?);
            } else {
                for task in &tasks {
                    println!(
                        "{}  [{:?}] imp={} size={} {}",
                        &task.id[..8],
                        task.status,
                        task.importance,
                        task.size_points,
                        task.title
                    );
                }
                if tasks.is_empty() {
                    println!("no tasks");
                }
            }
        }
        TaskAction::Show { id } => {
            let task = find_task(&store, &id).await?;
            println!("{}", serde_json::to_string_pretty(&task)?);
        }
        TaskAction::Edit { id, title, description, importance, size, deadline, period } => {
            let mut task = find_task(&store, &id).await?;
            if let Some(title) = title {
                task.title = title;
            }
            if let Some(description) = description {
                task.description = Some(description);
            }
            if let Some(importance) = importance {
                task.importance = importance.clamp(1, 5);
            }
            if let Some(size) = size {
                task.size_points = size;
            }
            if let Some(deadline) = deadline {
                task.deadline =
                    if deadline == "none" { None } else { Some(parse_rfc3339(&deadline)?) };
            }
            if let Some(period) = period {
                task.allowed_period = parse_period(&period);
            }
            task.touch(now);
            store.upsert_task(task.clone()).await?;
            engine.record_local(&Event::TaskUpserted { task }, now).await?;
            println!("ok");
        }
        TaskAction::Done { id } => {
            let mut task = find_task(&store, &id).await?;
            lifecycle::complete(&mut task, now)?;
            store.upsert_task(task.clone()).await?;
            engine.record_local(&Event::TaskUpserted { task: task.clone() }, now).await?;
            match task.next_eligible_at {
                Some(at) => println!("Done. Comes back {}", at.format("%Y-%m-%d %H:%M")),
                None => println!("Done."),
            }
        }
        TaskAction::Snooze { id, duration } => {
            let mut task = find_task(&store, &id).await?;
            let until = now + parse_duration(&duration)?;
            lifecycle::snooze(&mut task, until, now)?;
            store.upsert_task(task.clone()).await?;
            engine.record_local(&Event::TaskUpserted { task }, now).await?;
            println!("Snoozed until {}", until.format("%Y-%m-%d %H:%M"));
        }
        TaskAction::Resume { id } => {
            let mut task = find_task(&store, &id).await?;
            lifecycle::resume(&mut task, now)?;
            store.upsert_task(task.clone()).await?;
            engine.record_local(&Event::TaskUpserted { task }, now).await?;
            println!("ok");
        }
        TaskAction::Pause { id } => {
            set_paused(&store, &engine, &id, true, now).await?;
            println!("ok");
        }
        TaskAction::Unpause { id } => {
            set_paused(&store, &engine, &id, false, now).await?;
            println!("ok");
        }
        TaskAction::CutInLine { id, mode } => {
            let mut task = find_task(&store, &id).await?;
            task.cut_in_line = match mode.as_str() {
                "sticky" => CutInLine::Sticky,
                "off" => CutInLine::None,
                _ => CutInLine::Once,
            };
            task.touch(now);
            store.upsert_task(task.clone()).await?;
            engine.record_local(&Event::TaskUpserted { task }, now).await?;
            println!("ok");
        }
        TaskAction::Delete { id } => {
            let task = find_task(&store, &id).await?;
            engine.delete_task(&task.id, now).await?;
            println!("Task deleted: {}", task.id);
        }
    }
    Ok(())
}

async fn set_paused(
    store: &Arc<FileStore>,
    engine: &SyncEngine,
    id: &str,
    paused: bool,
    now: DateTime<Utc>,
) -> Result<(), Box<dyn Error>> {
    let mut task = find_task(store, id).await?;
    task.paused = paused;
    task.touch(now);
    store.upsert_task(task.clone()).await?;
    engine.record_local(&Event::TaskUpserted { task }, now).await?;
    Ok(())
}

/// Look up a task by full id or unique prefix.
async fn find_task(store: &Arc<FileStore>, id: &str) -> Result<Task, Box<dyn Error>> {
    let tasks = store.get_tasks(OwnerFilter::All).await?;
    if let Some(exact) = tasks.iter().find(|t| t.id == id) {
        return Ok(exact.clone());
    }
    let matches: Vec<&Task> = tasks.iter().filter(|t| t.id.starts_with(id)).collect();
    match matches.as_slice() {
        [one] => Ok((*one).clone()),
        [] => Err(format!("no task matches '{id}'").into()),
        _ => Err(format!("'{id}' is ambiguous ({} matches)", matches.len()).into()),
    }
}

fn parse_rfc3339(raw: &str) -> Result<DateTime<Utc>, Box<dyn Error>> {
    Ok(DateTime::parse_from_rfc3339(raw)?.with_timezone(&Utc))
}

fn parse_period(raw: &str) -> AllowedPeriod {
    match raw {
        "any" => AllowedPeriod::Any,
        "work" => AllowedPeriod::Work,
        "off-work" => AllowedPeriod::OffWork,
        id => AllowedPeriod::Named { id: id.to_string() },
    }
}

/// Parse "<n>m", "<n>h" or "<n>d".
fn parse_duration(raw: &str) -> Result<Duration, Box<dyn Error>> {
    let (digits, unit) = raw.split_at(raw.len().saturating_sub(1));
    let n: i64 = digits.parse().map_err(|_| format!("bad duration '{raw}'"))?;
    match unit {
        "m" => Ok(Duration::minutes(n)),
        "h" => Ok(Duration::hours(n)),
        "d" => Ok(Duration::days(n)),
        _ => Err(format!("bad duration '{raw}' (use m, h or d)").into()),
    }
}
