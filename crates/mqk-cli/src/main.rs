use anyhow::Result;
use clap::{Parser, Subcommand};

mod commands;

#[derive(Parser)]
#[command(name = "mqk")]
#[command(about = "MiniQuantDesk V4 CLI", long_about = None)]
struct Cli {
    #[command(subcommand)]
    cmd: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Database commands
    Db {
        #[command(subcommand)]
        cmd: DbCmd,
    },

    /// Compute layered config hash + print canonical JSON
    ConfigHash {
        /// Paths in merge order (base -> env -> engine -> risk -> stress...)
        #[arg(required = true)]
        paths: Vec<String>,
    },

    /// Run lifecycle commands
    Run {
        #[command(subcommand)]
        cmd: RunCmd,
    },

    /// Market-data ingestion commands
    Md {
        #[command(subcommand)]
        cmd: MdCmd,
    },

    /// Backtest commands
    Backtest {
        #[command(subcommand)]
        cmd: BacktestCmd,
    },

    /// Operator trading-control commands (talk to a running mqk-daemon)
    Trading {
        #[command(subcommand)]
        cmd: TradingCmd,
    },
}

#[derive(Subcommand)]
enum DbCmd {
    Status,
    Migrate {
        /// Required when any LIVE run is currently active; refused otherwise.
        #[arg(long)]
        yes: bool,
    },
}

#[derive(Subcommand)]
enum RunCmd {
    /// Create a new run row in DB and print run_id + hashes.
    Start {
        /// Engine ID (e.g. MAIN, EXP)
        #[arg(long)]
        engine: String,

        /// Mode (PAPER | LIVE)
        #[arg(long)]
        mode: String,

        /// Layered config paths in merge order
        #[arg(long = "config", required = true)]
        config_paths: Vec<String>,
    },

    /// Arm a created run. LIVE runs require `--confirm` unless config
    /// disables manual confirmation.
    Arm {
        #[arg(long)]
        run_id: String,

        #[arg(long)]
        confirm: Option<String>,
    },

    /// Transition an armed run to RUNNING.
    Begin {
        #[arg(long)]
        run_id: String,
    },

    /// Stop a run cleanly.
    Stop {
        #[arg(long)]
        run_id: String,
    },

    /// Halt a run (sticky; requires re-arming).
    Halt {
        #[arg(long)]
        run_id: String,

        #[arg(long)]
        reason: String,
    },

    /// Record a heartbeat for a running run.
    Heartbeat {
        #[arg(long)]
        run_id: String,
    },

    /// Print a run's current status.
    Status {
        #[arg(long)]
        run_id: String,
    },

    /// Check (read-only) whether a run's deadman TTL has expired.
    DeadmanCheck {
        #[arg(long)]
        run_id: String,

        #[arg(long)]
        ttl_seconds: i64,
    },

    /// Check and, if expired, halt the run.
    DeadmanEnforce {
        #[arg(long)]
        run_id: String,

        #[arg(long)]
        ttl_seconds: i64,
    },

    /// Drive an in-process deterministic bar loop through the orchestrator
    /// (testkit-only; not part of the production binary).
    #[cfg(feature = "testkit")]
    Loop {
        #[arg(long)]
        run_id: String,

        #[arg(long)]
        symbol: String,

        #[arg(long)]
        bars: usize,

        #[arg(long)]
        timeframe_secs: u64,

        #[arg(long)]
        exports_root: std::path::PathBuf,

        #[arg(long, default_value = "")]
        label: String,
    },
}

#[derive(Subcommand)]
enum MdCmd {
    /// Parse a CSV file and ingest into md_bars.
    IngestCsv {
        #[arg(long)]
        path: String,

        #[arg(long)]
        timeframe: String,

        #[arg(long)]
        source: String,
    },

    /// Fetch bars from a named provider and ingest into md_bars.
    IngestProvider {
        #[arg(long)]
        source: String,

        #[arg(long)]
        symbols: String,

        #[arg(long)]
        timeframe: String,

        #[arg(long)]
        start: String,

        #[arg(long)]
        end: String,
    },
}

#[derive(Subcommand)]
enum BacktestCmd {
    /// Run a backtest over a CSV bar file using the no-op reference strategy.
    #[allow(clippy::too_many_arguments)]
    Csv {
        #[arg(long)]
        bars_path: String,

        #[arg(long)]
        timeframe_secs: i64,

        #[arg(long)]
        initial_cash_micros: i64,

        #[arg(long)]
        shadow: bool,

        #[arg(long)]
        integrity_enabled: bool,

        #[arg(long, default_value_t = 0)]
        integrity_stale_threshold_ticks: u64,

        #[arg(long, default_value_t = 0)]
        integrity_gap_tolerance_bars: u32,

        #[arg(long)]
        out_dir: Option<String>,
    },

    /// Run a backtest over bars loaded from the database.
    #[allow(clippy::too_many_arguments)]
    Db {
        #[arg(long)]
        timeframe: String,

        #[arg(long)]
        start_end_ts: i64,

        #[arg(long)]
        end_end_ts: i64,

        #[arg(long)]
        symbols: Option<String>,

        #[arg(long)]
        timeframe_secs: i64,

        #[arg(long)]
        initial_cash_micros: i64,

        #[arg(long)]
        shadow: bool,

        #[arg(long)]
        integrity_enabled: bool,
    },
}

#[derive(Subcommand)]
enum TradingCmd {
    /// Resume trading on a running mqk-daemon.
    Enable {
        #[arg(long, default_value = "http://127.0.0.1:8899")]
        daemon_url: String,
    },

    /// Pause trading on a running mqk-daemon (resumable via `enable`).
    Disable {
        #[arg(long, default_value = "http://127.0.0.1:8899")]
        daemon_url: String,

        #[arg(long)]
        reason: Option<String>,
    },

    /// Sticky emergency stop; requires `/v1/integrity/arm` to clear.
    EmergencyStop {
        #[arg(long, default_value = "http://127.0.0.1:8899")]
        daemon_url: String,

        #[arg(long)]
        reason: Option<String>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.cmd {
        Commands::Db { cmd } => {
            let pool = mqk_db::connect_from_env().await?;
            match cmd {
                DbCmd::Status => {
                    let s = mqk_db::status(&pool).await?;
                    println!("db_ok={} has_runs_table={}", s.ok, s.has_runs_table);
                }
                DbCmd::Migrate { yes } => {
                    if !yes && mqk_db::has_active_live_runs(&pool).await? {
                        eprintln!(
                            "REFUSING MIGRATE: one or more LIVE runs are currently active. \
                             Re-run with --yes to override."
                        );
                        std::process::exit(1);
                    }
                    mqk_db::migrate(&pool).await?;
                    println!("migrations_applied=true");
                }
            }
        }

        Commands::ConfigHash { paths } => {
            let path_refs: Vec<&str> = paths.iter().map(|s| s.as_str()).collect();
            let loaded = mqk_config::load_layered_yaml(&path_refs)?;
            println!("config_hash={}", loaded.config_hash);
            println!("{}", loaded.canonical_json);
        }

        Commands::Run { cmd } => match cmd {
            RunCmd::Start { engine, mode, config_paths } => {
                commands::run::run_start(engine, mode, config_paths).await?;
            }
            RunCmd::Arm { run_id, confirm } => {
                commands::run::run_arm(run_id, confirm).await?;
            }
            RunCmd::Begin { run_id } => {
                commands::run::run_begin(run_id).await?;
            }
            RunCmd::Stop { run_id } => {
                commands::run::run_stop(run_id).await?;
            }
            RunCmd::Halt { run_id, reason } => {
                commands::run::run_halt(run_id, reason).await?;
            }
            RunCmd::Heartbeat { run_id } => {
                commands::run::run_heartbeat(run_id).await?;
            }
            RunCmd::Status { run_id } => {
                commands::run::run_status(run_id).await?;
            }
            RunCmd::DeadmanCheck { run_id, ttl_seconds } => {
                commands::run::run_deadman_check(run_id, ttl_seconds).await?;
            }
            RunCmd::DeadmanEnforce { run_id, ttl_seconds } => {
                commands::run::run_deadman_enforce(run_id, ttl_seconds).await?;
            }
            #[cfg(feature = "testkit")]
            RunCmd::Loop { run_id, symbol, bars, timeframe_secs, exports_root, label } => {
                commands::run::run_loop(run_id, symbol, bars, timeframe_secs, exports_root, label)?;
            }
        },

        Commands::Md { cmd } => match cmd {
            MdCmd::IngestCsv { path, timeframe, source } => {
                commands::backtest::md_ingest_csv(path, timeframe, source).await?;
            }
            MdCmd::IngestProvider { source, symbols, timeframe, start, end } => {
                commands::backtest::md_ingest_provider(source, symbols, timeframe, start, end)
                    .await?;
            }
        },

        Commands::Backtest { cmd } => match cmd {
            BacktestCmd::Csv {
                bars_path,
                timeframe_secs,
                initial_cash_micros,
                shadow,
                integrity_enabled,
                integrity_stale_threshold_ticks,
                integrity_gap_tolerance_bars,
                out_dir,
            } => {
                commands::bkt::run_backtest_csv(
                    bars_path,
                    timeframe_secs,
                    initial_cash_micros,
                    shadow,
                    integrity_enabled,
                    integrity_stale_threshold_ticks,
                    integrity_gap_tolerance_bars,
                    out_dir,
                )
                .await?;
            }
            BacktestCmd::Db {
                timeframe,
                start_end_ts,
                end_end_ts,
                symbols,
                timeframe_secs,
                initial_cash_micros,
                shadow,
                integrity_enabled,
            } => {
                commands::bkt::run_backtest_db(
                    timeframe,
                    start_end_ts,
                    end_end_ts,
                    symbols,
                    timeframe_secs,
                    initial_cash_micros,
                    shadow,
                    integrity_enabled,
                )
                .await?;
            }
        },

        Commands::Trading { cmd } => {
            commands::trading::dispatch(cmd_to_trading_request(cmd)).await?;
        }
    }

    Ok(())
}

/// Translate the CLI's `TradingCmd` into the plain request the `trading`
/// command module posts to the daemon — keeps `commands::trading` decoupled
/// from clap's derive types.
fn cmd_to_trading_request(cmd: TradingCmd) -> commands::trading::TradingRequest {
    match cmd {
        TradingCmd::Enable { daemon_url } => commands::trading::TradingRequest {
            daemon_url,
            action: commands::trading::TradingAction::Enable,
            reason: None,
        },
        TradingCmd::Disable { daemon_url, reason } => commands::trading::TradingRequest {
            daemon_url,
            action: commands::trading::TradingAction::Disable,
            reason,
        },
        TradingCmd::EmergencyStop { daemon_url, reason } => commands::trading::TradingRequest {
            daemon_url,
            action: commands::trading::TradingAction::EmergencyStop,
            reason,
        },
    }
}
