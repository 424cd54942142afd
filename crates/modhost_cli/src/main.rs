//! `modhost` operator CLI.
//!
//! # Responsibility
//! - Boot the built-in module catalog against the configured database.
//! - Expose the administrative surface as subcommands printing JSON.

mod builtin;

use clap::{Parser, Subcommand};
use log::{error, info};
use modhost_core::{
    init_logging, install_panic_hook, normalize_level, open_db, AdminCaller, AdminSurface,
    BootMode, HostConfig, HostRuntime, ModuleManager, RequestKind, SqliteModuleStore,
};
use serde::Serialize;
use std::path::PathBuf;
use std::process::ExitCode;

#[derive(Parser, Debug)]
#[clap(
    name = "modhost",
    version = env!("CARGO_PKG_VERSION"),
    about = "Module lifecycle manager"
)]
struct Cli {
    /// SQLite database path (overrides MODHOST_DB_PATH).
    #[clap(long, global = true)]
    db: Option<PathBuf>,
    /// Log level for the files under --log-dir: trace|debug|info|warn|error
    /// (overrides MODHOST_LOG_LEVEL). Nothing is logged without a log dir.
    #[clap(long, global = true)]
    log_level: Option<String>,
    /// Absolute directory for rolling log files (overrides MODHOST_LOG_DIR).
    #[clap(long, global = true)]
    log_dir: Option<PathBuf>,
    /// Host plugin to treat as active; may be repeated. `boot`, `enable`,
    /// `disable`, `clear-error` and `self-test` auto-disable enabled modules
    /// whose plugin is not passed here; `list`, `errors` and --read-only
    /// calls only skip them.
    #[clap(long = "plugin", global = true)]
    plugins: Vec<String>,
    /// Run without the module management privilege.
    #[clap(long, global = true)]
    read_only: bool,
    #[clap(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Print the boot report for this process.
    Boot,
    /// List registered modules with their state.
    List,
    /// Enable a module and load it.
    Enable { id: String },
    /// Disable a module.
    Disable { id: String },
    /// List recorded module errors.
    Errors,
    /// Clear the recorded error of one module.
    ClearError { id: String },
    /// Run deferred self-tests as a scheduled request.
    SelfTest,
}

impl Command {
    fn boot_mode(&self, read_only: bool) -> BootMode {
        if read_only || matches!(self, Self::List | Self::Errors) {
            BootMode::Inspect
        } else {
            BootMode::Enforce
        }
    }
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    match run(cli) {
        Ok(code) => code,
        Err(err) => {
            error!("event=cli_run module=cli status=error error={}", err);
            eprintln!("modhost: {err}");
            ExitCode::FAILURE
        }
    }
}

fn run(cli: Cli) -> Result<ExitCode, String> {
    let mut config = HostConfig::from_env().map_err(|err| err.to_string())?;
    if let Some(db) = cli.db {
        config.db_path = db;
    }
    if let Some(level) = cli.log_level {
        config.log_level = level;
    }
    if let Some(dir) = cli.log_dir {
        config.log_dir = Some(dir);
    }

    install_panic_hook();
    let level = normalize_level(&config.log_level)?;
    if let Some(dir) = &config.log_dir {
        let dir = dir
            .to_str()
            .ok_or_else(|| format!("log dir is not valid UTF-8: {}", dir.display()))?;
        init_logging(level, dir)?;
    }

    let conn = open_db(&config.db_path).map_err(|err| err.to_string())?;
    let store = SqliteModuleStore::try_new(&conn)
        .map_err(|err| err.to_string())?
        .with_retention(config.error_retention);
    let registry = builtin::registry().map_err(|err| err.to_string())?;
    let mut manager = ModuleManager::new(registry, store, builtin::units(), builtin::self_tests())
        .with_runtime(HostRuntime::with_active_plugins(cli.plugins));

    let boot = manager
        .boot_with(cli.command.boot_mode(cli.read_only))
        .map_err(|err| err.to_string())?;
    info!(
        "event=cli_boot module=cli status=ok loaded={} failed={} skipped={}",
        boot.loaded.len(),
        boot.failed.len(),
        boot.skipped.len()
    );

    let caller = if cli.read_only {
        AdminCaller::unprivileged()
    } else {
        AdminCaller::privileged()
    };

    match cli.command {
        Command::Boot => print_json(&boot, true),
        Command::SelfTest => {
            let report = manager
                .run_deferred_self_tests(RequestKind::Scheduled)
                .map_err(|err| err.to_string())?;
            print_json(&report, report.failed.is_empty())
        }
        Command::List => {
            let response = AdminSurface::new(manager, caller).list_modules();
            print_json(&response, response.ok)
        }
        Command::Enable { id } => {
            let response = AdminSurface::new(manager, caller).toggle(&id, true);
            print_json(&response, response.ok)
        }
        Command::Disable { id } => {
            let response = AdminSurface::new(manager, caller).toggle(&id, false);
            print_json(&response, response.ok)
        }
        Command::Errors => {
            let response = AdminSurface::new(manager, caller).list_errors();
            print_json(&response, response.ok)
        }
        Command::ClearError { id } => {
            let response = AdminSurface::new(manager, caller).clear_error(&id);
            print_json(&response, response.ok)
        }
    }
}

fn print_json<T: Serialize>(value: &T, ok: bool) -> Result<ExitCode, String> {
    let rendered = serde_json::to_string_pretty(value).map_err(|err| err.to_string())?;
    println!("{rendered}");
    Ok(if ok {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}

#[cfg(test)]
mod tests {
    use super::{Cli, Command};
    use clap::Parser;
    use modhost_core::BootMode;

    #[test]
    fn reads_never_enforce_plugin_requirements() {
        let list = Cli::parse_from(["modhost", "list"]);
        assert_eq!(list.command.boot_mode(list.read_only), BootMode::Inspect);

        let errors = Cli::parse_from(["modhost", "errors"]);
        assert_eq!(errors.command.boot_mode(errors.read_only), BootMode::Inspect);

        let read_only = Cli::parse_from(["modhost", "--read-only", "enable", "role_sync"]);
        assert_eq!(
            read_only.command.boot_mode(read_only.read_only),
            BootMode::Inspect
        );
    }

    #[test]
    fn boot_and_mutations_enforce_plugin_requirements() {
        let boot = Cli::parse_from(["modhost", "boot"]);
        assert_eq!(boot.command.boot_mode(boot.read_only), BootMode::Enforce);

        let enable = Cli::parse_from(["modhost", "enable", "hours", "--plugin", "directory"]);
        assert!(matches!(enable.command, Command::Enable { ref id } if id == "hours"));
        assert_eq!(enable.plugins, vec!["directory"]);
        assert_eq!(enable.command.boot_mode(enable.read_only), BootMode::Enforce);
    }
}
