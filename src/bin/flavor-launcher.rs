//! Flavorpack launcher binary
//!
//! Embedded at the start of every package. Locates its own executable,
//! validates the appended PSPF/2025 data and execs the packaged child. All
//! arguments are forwarded to the child verbatim unless FLAVOR_LAUNCHER_CLI=1
//! switches the launcher into its own CLI mode.

use flavorpack::exit_codes::{EXIT_INVALID_ARGS, EXIT_IO_ERROR, EXIT_PANIC};
use flavorpack::pspf::cli;
use flavorpack::{LaunchOptions, launch_package};
use std::{env, panic, process};

fn main() {
    // A panic must exit with the reserved panic code, not unwind into the OS
    panic::set_hook(Box::new(|panic_info| {
        eprintln!("PANIC: {panic_info}");
        process::exit(EXIT_PANIC);
    }));

    let result = panic::catch_unwind(run);

    match result {
        Ok(exit_code) => process::exit(exit_code),
        Err(_) => {
            eprintln!("fatal: unhandled panic in launcher");
            process::exit(EXIT_PANIC);
        }
    }
}

fn run() -> i32 {
    flavorpack::logger::JsonLogger::init();

    let args: Vec<String> = env::args().collect();

    let exe_path = match env::current_exe() {
        Ok(path) => path,
        Err(e) => {
            eprintln!("failed to locate own executable: {e}");
            return EXIT_IO_ERROR;
        }
    };

    // CLI mode is opted into through the environment only; the launcher must
    // never interpret arguments that belong to the packaged application.
    let cli_mode = flavorpack::utils::is_env_true(flavorpack::pspf::constants::ENV_LAUNCHER_CLI);

    if cli_mode {
        let command_args = &args[1..];
        let command = command_args.first().map_or("inspect", String::as_str);

        return match command {
            "inspect" => cli::inspect(&exe_path),
            "verify" => cli::verify(&exe_path),
            "metadata" => cli::metadata(&exe_path),
            "extract" => {
                if command_args.len() < 3 {
                    eprintln!("usage: {} extract <slot_index> <output_dir>", args[0]);
                    EXIT_INVALID_ARGS
                } else {
                    cli::extract(&exe_path, &command_args[1], &command_args[2])
                }
            }
            "dump" => {
                if command_args.len() < 2 {
                    eprintln!("usage: {} dump <output_dir>", args[0]);
                    EXIT_INVALID_ARGS
                } else {
                    cli::dump(&exe_path, &command_args[1])
                }
            }
            "shell" => cli::shell(&exe_path),
            "run" => cli::run(&exe_path, command_args.get(1..).unwrap_or(&[])),
            "help" | "--help" => cli::help(),
            other => {
                eprintln!("unknown command '{other}'");
                eprintln!(
                    "available commands: inspect, verify, metadata, extract, dump, shell, run, help"
                );
                EXIT_INVALID_ARGS
            }
        };
    }

    // Standard execution: forward SIGINT/SIGTERM to a spawned child (the
    // exec path replaces this process and never reaches the forwarder).
    install_signal_forwarder();

    log::debug!("🚀 launching package: {}", exe_path.display());
    let forwarded = args[1..].to_vec();
    match launch_package(&exe_path, &forwarded, &LaunchOptions::default()) {
        Ok(code) => {
            log::debug!("✅ child exited with code {code}");
            code
        }
        Err(e) => {
            log::error!("❌ launch error: {e}");
            explain_launch_failure(&e);
            e.exit_code()
        }
    }
}

/// Per-error remediation hints, so a failing package tells the user what to
/// try next instead of just the error line.
fn explain_launch_failure(error: &flavorpack::FlavorError) {
    use flavorpack::FlavorError;

    match error {
        FlavorError::Integrity(_) | FlavorError::Crypto(_) => {
            eprintln!("❌ Package integrity verification failed");
            eprintln!();
            eprintln!("This package's seal could not be verified. It may have been");
            eprintln!("tampered with, corrupted in transit, or signed with a different key.");
            eprintln!();
            eprintln!("To use a different validation level, set FLAVOR_VALIDATION:");
            eprintln!("  export FLAVOR_VALIDATION=relaxed  # skip the signature check");
            eprintln!("  export FLAVOR_VALIDATION=none     # skip all checks (testing only)");
            eprintln!("For more details, run with FLAVOR_LOG_LEVEL=debug");
        }
        FlavorError::Format(_) => {
            eprintln!("❌ Package format check failed: {error}");
            eprintln!();
            eprintln!("The file does not look like a valid PSPF/2025 package.");
            eprintln!("FLAVOR_LAUNCHER_CLI=1 with the 'dump' command saves its regions");
            eprintln!("for inspection.");
        }
        FlavorError::Config(_) => {
            eprintln!("❌ Package configuration error: {error}");
            eprintln!();
            eprintln!("The embedded manifest references something that does not exist.");
            eprintln!("FLAVOR_LAUNCHER_CLI=1 with the 'metadata' command shows it.");
        }
        _ => {
            eprintln!("❌ Failed to launch package: {error}");
            eprintln!();
            eprintln!("For more details, run with FLAVOR_LOG_LEVEL=debug");
        }
    }
}

#[cfg(unix)]
fn install_signal_forwarder() {
    use flavorpack::CHILD_PID;
    use signal_hook::consts::{SIGINT, SIGTERM};
    use std::sync::atomic::Ordering;

    for signal in [SIGINT, SIGTERM] {
        // Safety boundary lives inside signal-hook; the handler only reads an
        // atomic and re-raises at the child.
        let result = unsafe {
            signal_hook::low_level::register(signal, move || {
                let pid = CHILD_PID.load(Ordering::SeqCst);
                if pid != 0 {
                    unsafe {
                        libc::kill(pid as libc::pid_t, signal);
                    }
                } else {
                    // No child yet: behave as if the handler were not installed
                    let _ = signal_hook::low_level::emulate_default_handler(signal);
                }
            })
        };
        if result.is_err() {
            log::debug!("could not register forwarder for signal {signal}");
        }
    }
}

#[cfg(not(unix))]
fn install_signal_forwarder() {}
