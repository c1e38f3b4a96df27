//! Builtin provisioning step catalogue for a fresh Arch Linux host.
//!
//! The catalogue is intent-only data plus thin closures over the
//! capability adapters; all sequencing, blocking, and reporting policy
//! lives in the engine.

use crate::caps::{
    AccountOps, Capabilities, FileOps, PackageOps, ProcessOps, ServiceOps,
};
use crate::preflight::{self, PreflightConfig};
use crate::registry::StepRegistry;
use crate::step::Step;
use anyhow::Result;
use archup_error::RegistryResult;
use std::env;
use std::fs;
use std::path::{Path, PathBuf};

const BASE_TOOLS: &[&str] = &[
    "git", "curl", "wget", "htop", "btop", "ripgrep", "fd", "bat", "fzf", "tmux", "tree",
    "unzip", "zip", "rsync", "man-db", "man-pages",
];

const DEV_TOOLS: &[&str] = &[
    "base-devel",
    "gcc",
    "make",
    "cmake",
    "pkgconf",
    "python",
    "python-pip",
    "nodejs",
    "npm",
    "rustup",
    "docker",
    "docker-compose",
];

const FONTS: &[&str] = &[
    "ttf-jetbrains-mono-nerd",
    "ttf-firacode-nerd",
    "noto-fonts",
    "noto-fonts-emoji",
    "ttf-liberation",
];

const GAMING: &[&str] = &[
    "steam",
    "lutris",
    "wine-staging",
    "gamemode",
    "lib32-gamemode",
    "mangohud",
];

const NVIDIA: &[&str] = &[
    "nvidia",
    "nvidia-utils",
    "lib32-nvidia-utils",
    "nvidia-settings",
];

const STARSHIP_INIT_LINE: &str = "eval \"$(starship init zsh)\"";
const YAY_AUR_URL: &str = "https://aur.archlinux.org/yay.git";
const WHEEL_PATTERN: &str = r"(?m)^#\s*(%wheel\s+ALL=\(ALL(:ALL)?\)\s+ALL)\s*$";

/// NVIDIA's PCI vendor id, as exposed in sysfs.
const NVIDIA_PCI_VENDOR: &str = "0x10de";

#[derive(Debug, Clone)]
pub struct BootstrapConfig {
    /// Account that receives group memberships, the shell setup, and the
    /// AUR helper build.
    pub user: String,
    pub pacman_conf: PathBuf,
    pub sudoers_path: PathBuf,
    pub modprobe_dir: PathBuf,
    pub pci_devices_path: PathBuf,
    pub aur_build_dir: PathBuf,
    pub home_override: Option<PathBuf>,
}

impl Default for BootstrapConfig {
    fn default() -> Self {
        Self::for_user(&detect_user())
    }
}

impl BootstrapConfig {
    pub fn for_user(user: &str) -> Self {
        Self {
            user: user.to_string(),
            pacman_conf: PathBuf::from("/etc/pacman.conf"),
            sudoers_path: PathBuf::from("/etc/sudoers"),
            modprobe_dir: PathBuf::from("/etc/modprobe.d"),
            pci_devices_path: PathBuf::from("/sys/bus/pci/devices"),
            aur_build_dir: PathBuf::from("/tmp/archup-yay"),
            home_override: None,
        }
    }

    pub fn home_dir(&self) -> PathBuf {
        if let Some(dir) = &self.home_override {
            return dir.clone();
        }
        if self.user == "root" {
            PathBuf::from("/root")
        } else {
            Path::new("/home").join(&self.user)
        }
    }
}

/// Bootstrap usually runs under sudo; the interactive user is the one
/// shell and group changes should land on.
fn detect_user() -> String {
    env::var("SUDO_USER")
        .or_else(|_| env::var("USER"))
        .unwrap_or_else(|_| "root".to_string())
}

pub fn build_registry(cfg: &BootstrapConfig) -> RegistryResult<StepRegistry> {
    StepRegistry::from_steps(build_steps(cfg))
}

pub fn build_steps(cfg: &BootstrapConfig) -> Vec<Step> {
    let mut steps = Vec::new();

    let preflight_cfg = PreflightConfig::default();
    steps.push(
        Step::new(
            "preflight",
            "Read-only host checks (Arch release, disk space, tools, mirror reachability)",
            move |_caps| preflight::run(&preflight_cfg),
        )
        .required(),
    );

    steps.push(
        Step::new("system-update", "Full system upgrade", |caps| {
            caps.full_upgrade()?;
            Ok(())
        })
        .required()
        .after(&["preflight"]),
    );

    steps.push(
        Step::new(
            "mirror-refresh",
            "Install reflector and rank the fastest mirrors",
            |caps| {
                caps.ensure_installed(&["reflector"])?;
                caps.run_command(
                    "reflector",
                    &[
                        "--latest",
                        "20",
                        "--protocol",
                        "https",
                        "--sort",
                        "rate",
                        "--save",
                        "/etc/pacman.d/mirrorlist",
                    ],
                )?;
                Ok(())
            },
        )
        .after(&["system-update"]),
    );

    // Gaming and the NVIDIA stack pull 32-bit packages; multilib is their
    // load-bearing prerequisite, so it is required rather than best-effort.
    steps.push(
        Step::new("multilib-repo", "Enable the multilib repository", |caps| {
            caps.enable_repo("multilib")?;
            Ok(())
        })
        .required()
        .after(&["system-update"]),
    );

    steps.push(
        package_group("base-tools", "Everyday CLI tools", BASE_TOOLS)
            .required()
            .after(&["system-update"]),
    );

    steps.push(
        package_group(
            "dev-tools",
            "Compilers, interpreters, and container tooling",
            DEV_TOOLS,
        )
        .required()
        .after(&["system-update"]),
    );

    steps.push(
        Step::new(
            "docker-service",
            "Enable and start the Docker daemon",
            |caps| {
                caps.ensure_enabled("docker.service")?;
                Ok(())
            },
        )
        .after(&["dev-tools"])
        .skip_when(|caps| {
            Ok(caps
                .is_enabled("docker.service")?
                .then(|| "docker.service already enabled".to_string()))
        }),
    );

    let user = cfg.user.clone();
    let sudoers = cfg.sudoers_path.clone();
    steps.push(
        Step::new(
            "wheel-group",
            "Admin group membership and the sudoers %wheel rule",
            move |caps| {
                caps.add_user_to_group(&user, "wheel")?;
                caps.ensure_pattern_replaced(&sudoers, WHEEL_PATTERN, "$1")?;
                Ok(())
            },
        )
        .after(&["preflight"]),
    );

    let user = cfg.user.clone();
    let probe_user = cfg.user.clone();
    steps.push(
        Step::new(
            "user-groups",
            "Docker group membership for the target user",
            move |caps| {
                caps.add_user_to_group(&user, "docker")?;
                Ok(())
            },
        )
        .after(&["dev-tools"])
        .skip_when(move |caps| {
            Ok(caps
                .user_in_group(&probe_user, "docker")?
                .then(|| format!("{probe_user} already in docker group")))
        }),
    );

    steps.push(
        package_group("fonts", "Terminal and desktop font set", FONTS).after(&["system-update"]),
    );

    steps.push(
        Step::new("firewall", "Install ufw and enable the firewall", |caps| {
            caps.ensure_installed(&["ufw"])?;
            caps.ensure_enabled("ufw.service")?;
            Ok(())
        })
        .after(&["base-tools"]),
    );

    let user = cfg.user.clone();
    let zshrc = cfg.home_dir().join(".zshrc");
    steps.push(
        Step::new(
            "shell-env",
            "Zsh with the starship prompt for the target user",
            move |caps| {
                caps.ensure_installed(&["zsh", "starship"])?;
                caps.ensure_line_in_file(&zshrc, STARSHIP_INIT_LINE)?;
                caps.ensure_login_shell(&user, "/usr/bin/zsh")?;
                Ok(())
            },
        )
        .after(&["base-tools"]),
    );

    let user = cfg.user.clone();
    let build_dir = cfg.aur_build_dir.clone();
    steps.push(
        Step::new(
            "aur-helper",
            "Build and install the yay AUR helper",
            move |caps| {
                let dir = build_dir.display().to_string();
                caps.run_command("rm", &["-rf", &dir])?;
                caps.run_command(
                    "sudo",
                    &["-u", &user, "git", "clone", "--depth", "1", YAY_AUR_URL, &dir],
                )?;
                // makepkg refuses to run as root; build as the target user.
                caps.run_command(
                    "sh",
                    &[
                        "-c",
                        &format!("cd '{dir}' && sudo -u '{user}' makepkg -si --noconfirm"),
                    ],
                )?;
                Ok(())
            },
        )
        .after(&["dev-tools"])
        .skip_when(|caps| {
            Ok(caps
                .is_installed("yay")?
                .then(|| "yay already installed".to_string()))
        }),
    );

    steps.push(
        package_group("gaming", "Steam, Lutris, Wine, and friends", GAMING)
            .after(&["multilib-repo"]),
    );

    let pci = cfg.pci_devices_path.clone();
    let modeset_conf = cfg.modprobe_dir.join("archup-nvidia.conf");
    steps.push(
        Step::new(
            "nvidia-drivers",
            "Proprietary NVIDIA driver stack",
            move |caps| {
                caps.ensure_installed(NVIDIA)?;
                caps.ensure_line_in_file(&modeset_conf, "options nvidia-drm modeset=1")?;
                Ok(())
            },
        )
        .after(&["multilib-repo"])
        .skip_when(move |_caps| {
            if nvidia_gpu_present(&pci)? {
                Ok(None)
            } else {
                Ok(Some("no NVIDIA GPU on the PCI bus".to_string()))
            }
        }),
    );

    steps
}

fn package_group(
    name: &'static str,
    description: &'static str,
    packages: &'static [&'static str],
) -> Step {
    Step::new(name, description, move |caps: &dyn Capabilities| {
        caps.ensure_installed(packages)?;
        Ok(())
    })
    .skip_when(move |caps: &dyn Capabilities| {
        for pkg in packages {
            if !caps.is_installed(pkg)? {
                return Ok(None);
            }
        }
        Ok(Some("all packages already installed".to_string()))
    })
}

/// Scans sysfs for a PCI device with NVIDIA's vendor id.
pub fn nvidia_gpu_present(pci_devices: &Path) -> Result<bool> {
    if !pci_devices.exists() {
        return Ok(false);
    }
    for entry in fs::read_dir(pci_devices)? {
        let entry = entry?;
        if let Ok(vendor) = fs::read_to_string(entry.path().join("vendor")) {
            if vendor.trim().eq_ignore_ascii_case(NVIDIA_PCI_VENDOR) {
                return Ok(true);
            }
        }
    }
    Ok(false)
}
