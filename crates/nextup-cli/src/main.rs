use clap::{CommandFactory, Parser, Subcommand};

mod commands;
mod notify;
mod store;

#[derive(Parser)]
#[command(name = "nextup-cli", version, about = "Nextup CLI")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Task management
    Task {
        #[command(subcommand)]
        action: commands::task::TaskAction,
    },
    /// Shuffle: pick a task and run its countdown
    Shuffle {
        #[command(subcommand)]
        action: commands::shuffle::ShuffleAction,
    },
    /// Settings management
    Settings {
        #[command(subcommand)]
        action: commands::settings::SettingsAction,
    },
    /// Named allowed-period management
    Period {
        #[command(subcommand)]
        action: commands::period::PeriodAction,
    },
    /// Peer sync
    Sync {
        #[command(subcommand)]
        action: commands::sync::SyncAction,
    },
    /// Generate shell completions
    Completions {
        /// Shell to generate for
        shell: clap_complete::Shell,
    },
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let result = match cli.command {
        Commands::Task { action } => commands::task::run(action).await,
        Commands::Shuffle { action } => commands::shuffle::run(action).await,
        Commands::Settings { action } => commands::settings::run(action).await,
        Commands::Period { action } => commands::period::run(action).await,
        Commands::Sync { action } => commands::sync::run(action).await,
        Commands::Completions { shell } => {
            let mut cmd = Cli::command();
            let name = cmd.get_name().to_string();
            clap_complete::generate(shell, &mut cmd, name, &mut std::io::stdout());
            Ok(())
        }
    };

    if let Err(e) = result {
        eprintln!("error: {e}");
        std::process::exit(1);
    }
}
