use clap::{Parser, Subcommand};
use sets::{
    app_dirs::AppDirs,
    catalog::ExerciseCatalog,
    config::{Config, ConfigStore, FileConfigStore},
    dispatcher::Dispatcher,
    rfid::UserDirectory,
    runtime::{FixedTicker, Runner},
    session::SessionContext,
    stats::{HistoryRow, TotalStats, WorkoutLog},
    transport::{SerialSettings, SerialTransport, TransportTiming},
};
use std::{
    error::Error,
    path::PathBuf,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

/// host bridge for the instrumented dumbbell
#[derive(Parser, Debug, Clone)]
#[clap(
    version,
    about,
    long_about = "Talks to the dumbbell MCU over serial: logs users in by RFID, tracks reps, sets and calories live, and saves finished workouts to a per-user log."
)]
pub struct Cli {
    /// path to the json config file
    #[clap(short = 'c', long, global = true)]
    config: Option<PathBuf>,

    /// serial port the MCU is attached to
    #[clap(short = 'p', long, global = true)]
    port: Option<String>,

    /// serial baud rate
    #[clap(short = 'b', long, global = true)]
    baud: Option<u32>,

    /// directory holding the per-user workout logs
    #[clap(short = 'd', long, global = true)]
    data_dir: Option<PathBuf>,

    /// csv file of `uid,username` rows replacing the configured users
    #[clap(short = 'u', long, global = true)]
    users: Option<PathBuf>,

    /// log every line sent and received
    #[clap(short = 'v', long, global = true)]
    verbose: bool,

    #[clap(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug, Clone, PartialEq)]
pub enum Command {
    /// connect to the MCU and track workouts until ctrl-c (default)
    Run,
    /// print a user's workout log
    History { user: String },
    /// print a user's totals
    Stats { user: String },
}

impl Cli {
    /// Config file values with command line overrides applied
    fn resolve_config(&self) -> Config {
        let store = match &self.config {
            Some(path) => FileConfigStore::with_path(path),
            None => FileConfigStore::new(),
        };
        let mut cfg = store.load();
        if let Some(port) = &self.port {
            cfg.serial_port = port.clone();
        }
        if let Some(baud) = self.baud {
            cfg.baud_rate = baud;
        }
        if let Some(dir) = &self.data_dir {
            cfg.data_dir = Some(dir.clone());
        }
        cfg
    }

    fn user_directory(&self, cfg: &Config) -> Result<UserDirectory, Box<dyn Error>> {
        match &self.users {
            Some(path) => Ok(UserDirectory::from_csv(path)?),
            None => Ok(UserDirectory::new(cfg.users.iter())),
        }
    }
}

fn init_logging(verbose: bool) {
    let level = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn main() -> Result<(), Box<dyn Error>> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let cfg = cli.resolve_config();
    let log = WorkoutLog::new(cfg.data_dir.clone().unwrap_or_else(AppDirs::data_dir));

    match cli.command.clone().unwrap_or(Command::Run) {
        Command::Run => run(&cli, &cfg, log),
        Command::History { user } => {
            print!("{}", format_history(&user, &log.history(&user)?));
            Ok(())
        }
        Command::Stats { user } => {
            print!("{}", format_stats(&user, &log.total_stats(&user)?));
            Ok(())
        }
    }
}

fn run(cli: &Cli, cfg: &Config, log: WorkoutLog) -> Result<(), Box<dyn Error>> {
    let directory = cli.user_directory(cfg)?;
    info!(users = directory.len(), data_dir = %log.data_dir().display(), "starting");

    let mut transport = SerialTransport::new(TransportTiming::from(cfg));
    let settings = SerialSettings::from(cfg);
    if transport.start(&settings).is_err() {
        warn!(port = %settings.port, "not connected, running without the MCU");
    }

    let running = Arc::new(AtomicBool::new(true));
    let flag = Arc::clone(&running);
    ctrlc::set_handler(move || flag.store(false, Ordering::SeqCst))?;

    let session = SessionContext::new(ExerciseCatalog::builtin(), directory, log);
    let mut dispatcher = Dispatcher::new(session, &transport).with_pong_settle(cfg.pong_settle());
    let runner = Runner::new(&transport, FixedTicker::new(cfg.dispatch_interval()));

    info!(port = %settings.port, baud = settings.baud_rate, "tracking workouts, ctrl-c to quit");
    let handled = runner.run(&mut dispatcher, &running);
    info!(handled, "shutting down");

    drop(dispatcher);
    drop(runner);
    transport.stop();
    Ok(())
}

fn format_history(user: &str, rows: &[HistoryRow]) -> String {
    if rows.is_empty() {
        return format!("no workouts recorded for {user}\n");
    }

    let mut out = String::new();
    for row in rows {
        let when = chrono::DateTime::parse_from_rfc3339(&row.timestamp)
            .map(|t| t.format("%Y-%m-%d %H:%M").to_string())
            .unwrap_or_else(|_| row.timestamp.clone());
        out.push_str(&format!(
            "{when}  {:<24} {:>3} reps x {:>2} sets  {:>5} min  {:>3} valid\n",
            row.exercise,
            row.reps.as_deref().unwrap_or("-"),
            row.sets.as_deref().unwrap_or("-"),
            row.duration_min.as_deref().unwrap_or("-"),
            row.valid_reps.as_deref().unwrap_or("-"),
        ));
    }
    out
}

fn format_stats(user: &str, stats: &TotalStats) -> String {
    format!(
        "{user}\n  workouts:     {}\n  total reps:   {}\n  avg accuracy: {:.1}%\n",
        stats.total_workouts, stats.total_reps, stats.avg_accuracy
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_default_values() {
        let cli = Cli::parse_from(["sets"]);
        assert_eq!(cli.command, None);
        assert_eq!(cli.port, None);
        assert!(!cli.verbose);
    }

    #[test]
    fn test_cli_overrides_config() {
        let dir = tempfile::tempdir().unwrap();
        let config = dir.path().join("config.json");
        let cli = Cli::parse_from([
            "sets",
            "--config",
            config.to_str().unwrap(),
            "--port",
            "COM5",
            "-b",
            "9600",
            "--data-dir",
            "/tmp/logs",
        ]);
        let cfg = cli.resolve_config();
        assert_eq!(cfg.serial_port, "COM5");
        assert_eq!(cfg.baud_rate, 9600);
        assert_eq!(cfg.data_dir, Some(PathBuf::from("/tmp/logs")));
        assert_eq!(cfg.min_send_gap_ms, 200);
    }

    #[test]
    fn test_cli_subcommands() {
        let cli = Cli::parse_from(["sets", "stats", "john", "-d", "/tmp/x"]);
        assert_eq!(
            cli.command,
            Some(Command::Stats {
                user: "john".into()
            })
        );
        assert_eq!(cli.data_dir, Some(PathBuf::from("/tmp/x")));

        let cli = Cli::parse_from(["sets", "history", "sarah"]);
        assert_eq!(
            cli.command,
            Some(Command::History {
                user: "sarah".into()
            })
        );
    }

    #[test]
    fn test_user_directory_defaults_to_config_users() {
        let cli = Cli::parse_from(["sets"]);
        let directory = cli.user_directory(&Config::default()).unwrap();
        assert_eq!(directory.lookup("7D 13 37 21"), Some("John"));
    }

    #[test]
    fn test_format_history() {
        assert_eq!(format_history("ana", &[]), "no workouts recorded for ana\n");

        let rows = vec![HistoryRow {
            timestamp: "2026-10-14T09:30:00+02:00".into(),
            exercise: "Bicep Curl".into(),
            reps: Some("10".into()),
            sets: Some("3".into()),
            duration_min: Some("4.5".into()),
            valid_reps: None,
        }];
        let out = format_history("ana", &rows);
        assert!(out.starts_with("2026-10-14 09:30  Bicep Curl"));
        assert!(out.contains(" 10 reps x  3 sets"));
        assert!(out.trim_end().ends_with("- valid"));
    }

    #[test]
    fn test_format_stats() {
        let stats = TotalStats {
            total_workouts: 2,
            total_reps: 50,
            avg_accuracy: 75.0,
        };
        let out = format_stats("john", &stats);
        assert!(out.contains("workouts:     2"));
        assert!(out.contains("avg accuracy: 75.0%"));
    }
}
