//! Flavorpack builder binary

use clap::Parser;
use flavorpack::exit_codes::{EXIT_BUILD_ERROR, EXIT_PANIC, EXIT_SUCCESS};
use flavorpack::version::full_version;
use flavorpack::{BuildOptions, build_package};
use std::{panic, path::PathBuf, process};

#[derive(Parser, Debug)]
#[command(version = full_version(), about = "Build PSPF/2025 packages")]
struct Args {
    /// Path to the manifest JSON
    #[arg(short, long)]
    manifest: PathBuf,

    /// Output path for the package
    #[arg(short, long)]
    output: PathBuf,

    /// Path to the launcher binary (or set FLAVOR_LAUNCHER_BIN)
    #[arg(long)]
    launcher_bin: Option<PathBuf>,

    /// Directory holding flavor-private.key / flavor-public.key
    #[arg(long)]
    key_dir: Option<PathBuf>,

    /// Seed for deterministic key derivation
    #[arg(long)]
    key_seed: Option<String>,

    /// Persist the resolved key pair to this directory
    #[arg(long)]
    save_keys: Option<PathBuf>,

    /// Base directory for {workenv} resolution in slot sources
    #[arg(long)]
    workenv_base: Option<PathBuf>,

    /// Skip the full verification pass after building
    #[arg(long)]
    skip_verification: bool,

    /// Log level (trace, debug, info, warn, error, json:<level>)
    #[arg(long)]
    log_level: Option<String>,
}

fn main() {
    panic::set_hook(Box::new(|panic_info| {
        eprintln!("PANIC: {panic_info}");
        process::exit(EXIT_PANIC);
    }));

    let result = panic::catch_unwind(run);

    match result {
        Ok(exit_code) => process::exit(exit_code),
        Err(_) => {
            eprintln!("fatal: unhandled panic in builder");
            process::exit(EXIT_PANIC);
        }
    }
}

fn run() -> i32 {
    let args = Args::parse();

    if let Some(ref level) = args.log_level {
        flavorpack::logger::JsonLogger::init_with_level(level);
    } else {
        flavorpack::logger::JsonLogger::init();
    }

    let options = BuildOptions {
        launcher_bin: args.launcher_bin,
        skip_verification: args.skip_verification,
        explicit_keys: None,
        key_seed: args.key_seed,
        key_dir: args.key_dir,
        save_keys: args.save_keys,
        workenv_base: args.workenv_base,
    };

    match build_package(&args.manifest, &args.output, &options) {
        Ok(()) => EXIT_SUCCESS,
        Err(e) => {
            eprintln!("❌ build error: {e}");
            // The builder never recovers locally: one error record, abort
            let code = e.exit_code();
            if code == flavorpack::exit_codes::EXIT_EXECUTION_ERROR {
                EXIT_BUILD_ERROR
            } else {
                code
            }
        }
    }
}
