use archup_core::caps::LinuxCaps;
use archup_core::catalogue::{self, BootstrapConfig};
use archup_core::engine::{ExecutionEngine, RunPolicy, Selection};
use archup_core::lock::RunLock;
use archup_error::RunError;
use archup_installer::cli::Cli;
use archup_installer::output::{self, exit_code, exit_code_for};
use clap::Parser;
use colored::Colorize;
use log::warn;
use once_cell::sync::Lazy;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

static INTERRUPT: Lazy<Arc<AtomicBool>> = Lazy::new(|| Arc::new(AtomicBool::new(false)));

extern "C" fn on_signal(_sig: libc::c_int) {
    INTERRUPT.store(true, Ordering::SeqCst);
}

fn install_signal_handlers() {
    // Force the flag into existence before any signal can arrive.
    Lazy::force(&INTERRUPT);
    let handler = on_signal as extern "C" fn(libc::c_int);
    unsafe {
        libc::signal(libc::SIGINT, handler as libc::sighandler_t);
        libc::signal(libc::SIGTERM, handler as libc::sighandler_t);
    }
}

fn main() {
    let cli = Cli::parse();
    archup_core::logging::init();
    install_signal_handlers();
    std::process::exit(run(&cli));
}

fn run(cli: &Cli) -> i32 {
    let mut cfg = BootstrapConfig::default();
    if let Some(user) = &cli.user {
        cfg.user = user.clone();
    }

    let registry = match catalogue::build_registry(&cfg) {
        Ok(registry) => registry,
        Err(err) => {
            eprintln!("{} {err}", "error:".red().bold());
            return exit_code::CONFIG_ERROR;
        }
    };

    if cli.plan {
        match registry.execution_plan() {
            Ok(lines) => {
                for line in lines {
                    println!("{line}");
                }
                return exit_code::SUCCESS;
            }
            Err(err) => {
                eprintln!("{} {err}", "error:".red().bold());
                return exit_code::CONFIG_ERROR;
            }
        }
    }

    // Dry runs mutate nothing, so they may proceed alongside a real run.
    let _lock = if cli.dry_run {
        None
    } else {
        match RunLock::acquire(&cli.lock_file) {
            Ok(lock) => Some(lock),
            Err(err @ RunError::AlreadyRunning(_)) => {
                eprintln!("{} {err}", "error:".red().bold());
                return exit_code::ALREADY_RUNNING;
            }
            Err(err) => {
                eprintln!("{} {err}", "error:".red().bold());
                return exit_code::CONFIG_ERROR;
            }
        }
    };

    let caps = LinuxCaps::new(Duration::from_secs(cli.timeout_secs))
        .with_pacman_conf(cfg.pacman_conf.clone());
    let policy = RunPolicy {
        dry_run: cli.dry_run,
        continue_on_required_failure: cli.continue_on_required_failure,
    };
    let selection = Selection {
        only: cli.only.clone(),
        skip_optional: cli.skip_optional,
    };

    let report = match ExecutionEngine::new(&caps, policy)
        .with_interrupt_flag(Arc::clone(&INTERRUPT))
        .run(&registry, &selection)
    {
        Ok(report) => report,
        Err(err) => {
            eprintln!("{} {err}", "error:".red().bold());
            return exit_code::CONFIG_ERROR;
        }
    };

    output::print_report(&report);
    if let Some(path) = &cli.report {
        if let Err(err) = report.write_log(path) {
            warn!("failed to write report to {}: {err:#}", path.display());
        }
    }

    exit_code_for(&report, INTERRUPT.load(Ordering::SeqCst))
}
