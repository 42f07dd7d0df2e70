//! Host binary for the reconciliation service.
//!
//! # Responsibility
//! - Load settings, initialize logging and verify the store at startup.
//! - Run the scheduler until Ctrl-C, or execute a single run.
//! - Seed directory rows for local testing in place of the CRUD API.
//!
//! # Invariants
//! - Runtime shutdown is bounded: a blocking read stuck on the feed source
//!   cannot keep the process alive after the scheduler stopped.

use clap::{Parser, Subcommand};
use deptsync_core::db::open_db;
use deptsync_core::{
    default_log_level, execute_logged_run, init_logging, Department, DepartmentId,
    DirectoryRepository, Employee, EmployeeId, LogTarget, RunOutcome, Scheduler,
    SqliteDirectoryRepository, SyncConfig, SyncService, TenantId,
};
use log::{error, info, warn};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

const RUNTIME_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Parser)]
#[command(name = "deptsync")]
#[command(about = "Reconcile employee-department links from a feed file", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Run the scheduler until Ctrl-C
    Serve {
        /// JSON settings file
        settings: PathBuf,
    },
    /// Execute one reconciliation run and print its report
    RunOnce {
        /// JSON settings file
        settings: PathBuf,
    },
    /// Insert an employee into the directory store
    SeedEmployee {
        /// JSON settings file
        settings: PathBuf,
        id: EmployeeId,
        name: String,
        email: String,
        tenant_id: TenantId,
    },
    /// Insert a department into the directory store
    SeedDepartment {
        /// JSON settings file
        settings: PathBuf,
        id: DepartmentId,
        name: String,
        tenant_id: TenantId,
    },
    /// Print the core library version
    Version,
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let runtime = match tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
    {
        Ok(runtime) => runtime,
        Err(err) => {
            eprintln!("deptsync: failed to start async runtime: {err}");
            return ExitCode::FAILURE;
        }
    };

    let result = runtime.block_on(dispatch(cli.command));
    runtime.shutdown_timeout(RUNTIME_SHUTDOWN_TIMEOUT);

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(message) => {
            error!("event=cli_exit module=cli status=error error={message}");
            eprintln!("deptsync: {message}");
            ExitCode::FAILURE
        }
    }
}

async fn dispatch(command: Command) -> Result<(), String> {
    match command {
        Command::Version => {
            println!("deptsync {}", deptsync_core::core_version());
            Ok(())
        }
        Command::Serve { settings } => serve(&load_settings(&settings)?).await,
        Command::RunOnce { settings } => run_once(&load_settings(&settings)?).await,
        Command::SeedEmployee {
            settings,
            id,
            name,
            email,
            tenant_id,
        } => {
            let employee = Employee::new(id, name, email, tenant_id);
            with_directory(&load_settings(&settings)?, |repo| {
                repo.create_employee(&employee).map(|_| ())
            })
        }
        Command::SeedDepartment {
            settings,
            id,
            name,
            tenant_id,
        } => {
            let department = Department::new(id, name, tenant_id);
            with_directory(&load_settings(&settings)?, |repo| {
                repo.create_department(&department).map(|_| ())
            })
        }
    }
}

fn load_settings(path: &Path) -> Result<SyncConfig, String> {
    let config = SyncConfig::load(path).map_err(|err| err.to_string())?;
    let level = config.log_level.as_deref().unwrap_or(default_log_level());
    let target = match &config.log_dir {
        Some(dir) => LogTarget::Directory(dir.clone()),
        None => LogTarget::Stderr,
    };
    init_logging(level, target)?;
    Ok(config)
}

async fn serve(config: &SyncConfig) -> Result<(), String> {
    // Store unreachable at startup is the one fatal condition.
    drop(open_db(&config.database_path).map_err(|err| err.to_string())?);

    let service = SyncService::from_config(config);
    info!(
        "event=service_start module=cli status=ok feed={} database={} tenant_policy={}",
        service.feed_path().display(),
        config.database_path.display(),
        config.tenant_policy.as_str()
    );
    let handle = Scheduler::new(service, config.interval()).start();

    if let Err(err) = tokio::signal::ctrl_c().await {
        error!("event=signal_wait module=cli status=error error={err}");
    }
    info!("event=service_stop module=cli status=start");
    let stats = handle.stop().await;
    if stats.runs_failed > 0 {
        warn!(
            "event=service_stop module=cli status=ok runs_failed={}",
            stats.runs_failed
        );
    }
    println!(
        "runs_started={} runs_succeeded={} runs_failed={} overlaps_skipped={}",
        stats.runs_started, stats.runs_succeeded, stats.runs_failed, stats.overlaps_skipped
    );
    Ok(())
}

async fn run_once(config: &SyncConfig) -> Result<(), String> {
    let service = Arc::new(SyncService::from_config(config));
    let outcome = execute_logged_run(Arc::clone(&service), CancellationToken::new())
        .await
        .map_err(|err| format!("{} ({})", err, err.code()))?;

    let Some(report) = outcome.report() else {
        match &outcome {
            RunOutcome::Bootstrapped => println!(
                "feed created at {}; nothing to reconcile",
                service.feed_path().display()
            ),
            _ => println!("feed has no candidates"),
        }
        return Ok(());
    };

    println!(
        "candidates={} created={} skipped_existing={} skipped_missing_reference={} skipped_tenant_mismatch={} cross_tenant={}",
        report.candidates,
        report.created,
        report.skipped_existing,
        report.skipped_missing_reference,
        report.skipped_tenant_mismatch,
        report.cross_tenant
    );
    if report.is_noop() {
        println!("store already holds every valid candidate");
    }
    for warning in &report.missing_references {
        println!(
            "missing_reference employee_id={} department_id={} employee_missing={} department_missing={}",
            warning.employee_id,
            warning.department_id,
            warning.employee_missing,
            warning.department_missing
        );
    }
    Ok(())
}

fn with_directory(
    config: &SyncConfig,
    action: impl FnOnce(&SqliteDirectoryRepository<'_>) -> deptsync_core::RepoResult<()>,
) -> Result<(), String> {
    let conn = open_db(&config.database_path).map_err(|err| err.to_string())?;
    let repo = SqliteDirectoryRepository::try_new(&conn).map_err(|err| err.to_string())?;
    action(&repo).map_err(|err| err.to_string())
}
