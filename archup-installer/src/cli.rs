use clap::Parser;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(author, version, about = "archup — one-shot Arch Linux bootstrap provisioner")]
pub struct Cli {
    /// Report intended actions without invoking any adapter.
    #[arg(long)]
    pub dry_run: bool,

    /// Omit optional sections (gaming, NVIDIA, fonts, shell, AUR helper, ...).
    #[arg(long)]
    pub skip_optional: bool,

    /// Restrict the run to these steps plus their dependencies.
    #[arg(long, value_delimiter = ',', value_name = "STEP,...")]
    pub only: Option<Vec<String>>,

    /// Keep executing subsequent steps after a required step fails.
    #[arg(long)]
    pub continue_on_required_failure: bool,

    /// Print the execution plan and exit.
    #[arg(long)]
    pub plan: bool,

    /// Target user for shell, groups, and the AUR helper
    /// (defaults to $SUDO_USER, then $USER).
    #[arg(long)]
    pub user: Option<String>,

    /// Write the run report to this path (one JSON object per step).
    #[arg(long, value_name = "PATH")]
    pub report: Option<PathBuf>,

    /// Per-command timeout in seconds.
    #[arg(long, default_value_t = 600)]
    pub timeout_secs: u64,

    /// Advisory lock file guarding against concurrent runs.
    #[arg(long, default_value = "/run/archup.lock")]
    pub lock_file: PathBuf,
}
