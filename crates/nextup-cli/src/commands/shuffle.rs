//! Shuffle commands: draw a task, watch the countdown, finish it.

use chrono::{Local, Utc};
use clap::Subcommand;
use std::error::Error;
use std::sync::Arc;
use std::time::Duration as StdDuration;

use nextup_core::selector::{SelectionMode, ShuffleOrigin};
use nextup_core::settings::data_dir;
use nextup_core::shuffle::{next_auto_shuffle_gap, ShuffleCoordinator, ShuffleState};
use nextup_core::storage::Storage;
use nextup_core::sync::{get_or_create_device_id, SyncEngine};
use nextup_core::{AppSettings, EventBus};

use crate::notify::TerminalNotifier;
use crate::store::FileStore;

#[derive(Subcommand)]
pub enum ShuffleAction {
    /// Draw the next task and start its countdown
    Now {
        /// Treat this as an automatic shuffle (respects per-task auto
        /// opt-outs)
        #[arg(long)]
        auto: bool,
        /// Pick the highest score instead of a weighted draw
        #[arg(long)]
        deterministic: bool,
    },
    /// Show the current countdown state
    Status,
    /// Advance the timer state machine (pomodoro phase changes happen
    /// here)
    Tick,
    /// Mark the current task done
    Done,
    /// Abandon the current pick and draw again
    Skip,
    /// Stop the countdown without completing anything
    Clear,
    /// Run in the foreground: advance phases as they expire and start
    /// automatic shuffles at random intervals within the configured gap
    Watch,
}

pub async fn run(action: ShuffleAction) -> Result<(), Box<dyn Error>> {
    let store = Arc::new(FileStore::open()?);
    let bus = EventBus::new();
    let settings = AppSettings::load()?;
    let engine = SyncEngine::new(
        store.clone(),
        bus.clone(),
        get_or_create_device_id()?,
        settings.network.user_id.clone(),
        &data_dir()?,
    )?;
    // The coordinator mutates tasks (auto-resume, completion) through
    // the bus; capture those events and queue them for the peer.
    let mut events = bus.subscribe();
    let coordinator = ShuffleCoordinator::new(
        store.clone() as Arc<dyn Storage>,
        Arc::new(TerminalNotifier),
        bus,
    );
    // Local time drives eligibility: allowed periods and quiet hours
    // are wall-clock windows.
    let now = Local::now().fixed_offset();

    match action {
        ShuffleAction::Now { auto, deterministic } => {
            let origin = if auto { ShuffleOrigin::Auto } else { ShuffleOrigin::Manual };
            let mode =
                if deterministic { SelectionMode::Deterministic } else { SelectionMode::WeightedRandom };
            match coordinator.shuffle(origin, mode, now).await? {
                Some(task) => println!("Next up: {} ({})", task.title, &task.id[..8]),
                None => println!("Nothing eligible right now."),
            }
        }
        ShuffleAction::Status => print_state(&coordinator.state(now).await?, &store).await?,
        ShuffleAction::Tick => print_state(&coordinator.tick(now).await?, &store).await?,
        ShuffleAction::Done => {
            match coordinator.mark_done(SelectionMode::WeightedRandom, now).await? {
                Some(task) => {
                    println!("Completed: {}", task.title);
                    print_state(&coordinator.state(now).await?, &store).await?;
                }
                None => println!("No task is running."),
            }
        }
        ShuffleAction::Skip => match coordinator.skip(SelectionMode::WeightedRandom, now).await? {
            Some(task) => println!("Next up: {} ({})", task.title, &task.id[..8]),
            None => println!("Nothing eligible right now."),
        },
        ShuffleAction::Clear => {
            coordinator.clear(now).await?;
            println!("ok");
        }
        ShuffleAction::Watch => {
            println!("Watching the shuffle loop; Ctrl-C to stop.");
            loop {
                let now = Local::now().fixed_offset();
                let state = coordinator.tick(now).await?;
                drain_events(&mut events, &engine).await?;

                let idle = matches!(state, ShuffleState::Idle);
                let sleep_for = match &state {
                    ShuffleState::CountingDown(snap) => snap
                        .remaining(now.with_timezone(&Utc))
                        .to_std()
                        .unwrap_or(StdDuration::from_secs(1)),
                    ShuffleState::Expired(_) => StdDuration::from_secs(1),
                    ShuffleState::Idle => {
                        let settings = AppSettings::load()?;
                        let gap = next_auto_shuffle_gap(&settings);
                        println!("Idle; next automatic draw in {} minutes.", gap.num_minutes());
                        gap.to_std().unwrap_or(StdDuration::from_secs(60))
                    }
                };
                tokio::select! {
                    _ = tokio::time::sleep(sleep_for) => {}
                    _ = tokio::signal::ctrl_c() => break,
                }
                if idle {
                    let now = Local::now().fixed_offset();
                    if let Some(task) = coordinator
                        .shuffle(ShuffleOrigin::Auto, SelectionMode::WeightedRandom, now)
                        .await?
                    {
                        println!("Next up: {} ({})", task.title, &task.id[..8]);
                    }
                    drain_events(&mut events, &engine).await?;
                }
            }
        }
    }

    drain_events(&mut events, &engine).await?;
    Ok(())
}

async fn drain_events(
    events: &mut tokio::sync::broadcast::Receiver<nextup_core::events::Event>,
    engine: &SyncEngine,
) -> Result<(), Box<dyn Error>> {
    while let Ok(event) = events.try_recv() {
        engine.record_local(&event, Utc::now()).await?;
    }
    Ok(())
}

async fn print_state(state: &ShuffleState, store: &Arc<FileStore>) -> Result<(), Box<dyn Error>> {
    match state {
        ShuffleState::Idle => println!("idle"),
        ShuffleState::CountingDown(snap) => {
            let title = store
                .get_task(&snap.task_id)
                .await?
                .map(|t| t.title)
                .unwrap_or_else(|| snap.task_id.clone());
            let remaining = snap.remaining(Utc::now());
            let expires = snap.expires_at.with_timezone(&Local);
            println!(
                "{title}: {:?}, {}m{}s left (until {})",
                snap.phase,
                remaining.num_minutes(),
                remaining.num_seconds() % 60,
                expires.format("%H:%M:%S")
            );
        }
        ShuffleState::Expired(snap) => {
            let title = store
                .get_task(&snap.task_id)
                .await?
                .map(|t| t.title)
                .unwrap_or_else(|| snap.task_id.clone());
            println!("{title}: time is up. `shuffle done`, `shuffle skip`, or `shuffle tick` to redraw.");
        }
    }
    Ok(())
}
