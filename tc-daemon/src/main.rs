//! Thermal control daemon (thermalctld)
//!
//! Regulates the system fan PWM of a network switch from the sensors
//! published in the hw-management tree.
//!
//! # Lifecycle
//! - Safe PWM is written as soon as the configuration is loaded
//! - Suspend and BMC ownership stop control and leave the PWM as is
//! - SIGINT/SIGTERM stop control and leave the fans at full speed

mod control;
mod logging;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use tc_core::constants::paths;
use tc_core::{DiagnosticContext, SensorTree, ThermalManager};
use tracing::{info, warn};

const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Command line options
struct Options {
    config: PathBuf,
    root: PathBuf,
    log_level: Option<String>,
}

fn print_help() {
    eprintln!("thermalctld {} - switch thermal control daemon", VERSION);
    eprintln!();
    eprintln!("USAGE:");
    eprintln!("    thermalctld [OPTIONS]");
    eprintln!();
    eprintln!("OPTIONS:");
    eprintln!("    -c, --config PATH      System configuration (default {})", paths::SYSTEM_CONFIG);
    eprintln!("    -r, --root PATH        hw-management tree root (default {})", paths::TREE_ROOT);
    eprintln!("    -l, --log-level LEVEL  Log level (trace, debug, info, warn, error)");
    eprintln!("    -f, --foreground       Run in foreground (always on)");
    eprintln!("    -v, --version          Print version");
    eprintln!("    -h, --help             Print this help");
    eprintln!();
    eprintln!("ENVIRONMENT:");
    eprintln!("    THERMALCTL_LOG         Log level when --log-level is not given");
}

fn print_version() {
    println!("thermalctld {}", VERSION);
}

/// Value following option `args[*i]`; exits if it is missing
fn option_value(args: &[String], i: &mut usize) -> String {
    *i += 1;
    match args.get(*i) {
        Some(v) => v.clone(),
        None => {
            eprintln!("Error: {} requires an argument", args[*i - 1]);
            std::process::exit(1);
        }
    }
}

/// Returns `None` when the process should exit after printing help/version
fn parse_args(args: &[String]) -> Option<Options> {
    let mut opts = Options {
        config: PathBuf::from(paths::SYSTEM_CONFIG),
        root: PathBuf::from(paths::TREE_ROOT),
        log_level: None,
    };

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "-h" | "--help" => {
                print_help();
                return None;
            }
            "-v" | "--version" => {
                print_version();
                return None;
            }
            "-f" | "--foreground" => {
                // Foreground mode is always on (no daemonization implemented)
            }
            "-c" | "--config" => opts.config = PathBuf::from(option_value(args, &mut i)),
            "-r" | "--root" => opts.root = PathBuf::from(option_value(args, &mut i)),
            "-l" | "--log-level" => opts.log_level = Some(option_value(args, &mut i)),
            arg => {
                eprintln!("Unknown argument: {}", arg);
                print_help();
                std::process::exit(1);
            }
        }
        i += 1;
    }
    Some(opts)
}

fn is_root() -> bool {
    // SAFETY: geteuid has no preconditions and only returns the effective uid.
    unsafe { libc::geteuid() == 0 }
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
    std::panic::set_hook(Box::new(|panic_info| {
        let location = panic_info
            .location()
            .map(|l| format!("{}:{}:{}", l.file(), l.line(), l.column()))
            .unwrap_or_else(|| "unknown".to_string());

        let message = if let Some(s) = panic_info.payload().downcast_ref::<&str>() {
            s.to_string()
        } else if let Some(s) = panic_info.payload().downcast_ref::<String>() {
            s.clone()
        } else {
            "Unknown panic".to_string()
        };

        // stderr ends up in the journal when running as a service
        eprintln!("PANIC at {}: {}", location, message);
    }));

    let args: Vec<String> = std::env::args().collect();
    let Some(opts) = parse_args(&args) else {
        return Ok(());
    };

    let log_level = opts
        .log_level
        .clone()
        .or_else(|| std::env::var("THERMALCTL_LOG").ok())
        .unwrap_or_else(|| "info".to_string());
    let (reload_handle, sink) = logging::init(&log_level);

    info!("STARTUP: thermalctld {} starting", VERSION);
    info!("STARTUP: Logging to {}", sink);
    info!("STARTUP: Tree root: {}", opts.root.display());
    info!("STARTUP: Configuration: {}", opts.config.display());
    info!("STARTUP: PID: {}", std::process::id());
    if !is_root() {
        warn!("not running as root, PWM writes may fail");
    }

    let diag = Arc::new(DiagnosticContext::new());
    let tree = SensorTree::new(&opts.root);
    let manager = ThermalManager::new(tree, &opts.config, diag)
        .with_context(|| format!("cannot initialise thermal control for {}", opts.root.display()))?;

    let state = Arc::new(control::ControlState::new());
    let signal_state = state.clone();
    if let Err(e) = ctrlc::set_handler(move || {
        info!("SIGNAL: Received SIGINT/SIGTERM - initiating shutdown");
        signal_state.request_shutdown();
    }) {
        warn!("Failed to set signal handler: {}. Shutdown via signals may not work cleanly.", e);
    }

    let levels = logging::LevelControl::new(reload_handle, &log_level);
    control::run_control_loop(manager, state, levels).await;

    info!("SHUTDOWN: thermalctld terminated");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(list: &[&str]) -> Vec<String> {
        std::iter::once("thermalctld").chain(list.iter().copied()).map(String::from).collect()
    }

    #[test]
    fn test_defaults() {
        let opts = parse_args(&args(&[])).unwrap();
        assert_eq!(opts.config, PathBuf::from(paths::SYSTEM_CONFIG));
        assert_eq!(opts.root, PathBuf::from(paths::TREE_ROOT));
        assert!(opts.log_level.is_none());
    }

    #[test]
    fn test_options_with_values() {
        let opts = parse_args(&args(&["-c", "/tmp/tc.json", "--root", "/tmp/hw", "-f", "-l", "debug"])).unwrap();
        assert_eq!(opts.config, PathBuf::from("/tmp/tc.json"));
        assert_eq!(opts.root, PathBuf::from("/tmp/hw"));
        assert_eq!(opts.log_level.as_deref(), Some("debug"));
    }

    #[test]
    fn test_version_exits() {
        assert!(parse_args(&args(&["--version"])).is_none());
    }
}
