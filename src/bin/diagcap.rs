//! Diagnostic collector (diagcap) - Main binary entry point

use chrono::Utc;
use diagcap::cli::args::{CollectArgs, Command, UnpackArgs, parse_args};
use diagcap::cli::output::{format_event, print_report};
use diagcap::io::archive;
use diagcap::models::ProgressEvent;
use diagcap::services::shutdown::{CleanupTask, Shutdown};
use diagcap::{CollectConfig, CollectOptions, ProgressNotifier};
use std::io::Write;
use std::process;
use std::sync::Arc;

const EXIT_USAGE: i32 = 2;
const EXIT_PARTIAL: i32 = 3;
const EXIT_FAILURE: i32 = 4;
const EXIT_INTERRUPTED: i32 = 130;

fn main() {
    // Initialize logger (controlled by RUST_LOG environment variable)
    // Example: RUST_LOG=debug diagcap collect --coordinators 10.0.0.1 -o out.tar.gz
    env_logger::init();

    let args: Vec<String> = std::env::args().collect();

    if args.len() < 2 {
        print_help();
        return;
    }

    match args[1].as_str() {
        "--help" | "-h" => {
            print_help();
            return;
        }
        "--version" | "-v" => {
            print_version();
            return;
        }
        _ => {}
    }

    let cli_args = match parse_args(&args) {
        Ok(a) => a,
        Err(e) => {
            eprintln!("Error: {e}");
            eprintln!("Use --help for usage information");
            process::exit(EXIT_USAGE);
        }
    };

    let exit_code = match &cli_args.command {
        Command::Collect(collect_args) => handle_collect(collect_args),
        Command::Unpack(unpack_args) => handle_unpack(unpack_args),
    };

    process::exit(exit_code);
}

fn exit_code_for(err: &diagcap::Error) -> i32 {
    match err {
        diagcap::Error::InvalidInput(_) => EXIT_USAGE,
        diagcap::Error::Cancelled => EXIT_INTERRUPTED,
        _ => EXIT_FAILURE,
    }
}

fn handle_collect(args: &CollectArgs) -> i32 {
    let mut config = CollectConfig::default();
    config.apply_env();
    args.apply_to(&mut config);
    if let Err(e) = config.validate() {
        eprintln!("Error: {e}");
        return EXIT_USAGE;
    }

    // Pin the staging directory so cleanup removes exactly what the run used.
    let staging = config.staging_root(Utc::now());
    let staging_preexisting = staging.exists();
    config.staging_dir = Some(staging.clone());

    let notifier: Option<ProgressNotifier> = if config.quiet {
        None
    } else {
        Some(Arc::new(|event: &ProgressEvent| {
            eprintln!("{}", format_event(event));
        }))
    };

    let shutdown = Arc::new(Shutdown::new(notifier.clone()));

    // Must run before any other thread exists so every thread inherits the mask.
    install_signal_listener(&shutdown);

    let mut opts = match CollectOptions::new(config) {
        Ok(opts) => opts,
        Err(e) => {
            eprintln!("Error: {e}");
            return exit_code_for(&e);
        }
    };
    opts.notifier = notifier;

    if let Err(e) = register_cleanup(&shutdown, &opts, staging, staging_preexisting) {
        log::warn!("Failed to register cleanup: {e}");
    }

    let result = diagcap::collect(&opts);
    shutdown.cleanup();

    match result {
        Ok(report) => {
            if !opts.config.quiet {
                print_report(&report);
            }
            if report.is_partial() {
                EXIT_PARTIAL
            } else {
                0
            }
        }
        Err(e) => {
            eprintln!("Error: {e}");
            exit_code_for(&e)
        }
    }
}

#[cfg(unix)]
fn install_signal_listener(shutdown: &Arc<Shutdown>) {
    let listener = diagcap::services::shutdown::spawn_signal_listener(
        Arc::clone(shutdown),
        |_signal| process::exit(EXIT_INTERRUPTED),
    );
    if let Err(e) = listener {
        log::warn!("Interrupts will not trigger cleanup: {e}");
    }
}

#[cfg(not(unix))]
fn install_signal_listener(_shutdown: &Arc<Shutdown>) {}

fn register_cleanup(
    shutdown: &Shutdown,
    opts: &CollectOptions,
    staging: std::path::PathBuf,
    staging_preexisting: bool,
) -> diagcap::Result<()> {
    let cancel = opts.cancel.clone();
    shutdown.add_cancel_only_tasks(vec![CleanupTask::new(
        "cancel remote operations",
        move || {
            cancel.cancel();
            Ok(())
        },
    )])?;

    // A directory the user pointed us at is left in place.
    if !staging_preexisting {
        shutdown.add("remove staging directory", move || {
            if staging.exists() {
                std::fs::remove_dir_all(&staging)?;
            }
            Ok(())
        })?;
    }

    shutdown.add_final_steps(vec![CleanupTask::new("flush console", || {
        std::io::stdout().flush()?;
        std::io::stderr().flush()?;
        Ok(())
    })])
}

fn handle_unpack(args: &UnpackArgs) -> i32 {
    match archive::extract(&args.archive, &args.to) {
        Ok(files) => {
            println!(
                "Extracted {} files from {} into {}",
                files.len(),
                args.archive.display(),
                args.to.display()
            );
            0
        }
        Err(e) => {
            eprintln!("Error: {e}");
            exit_code_for(&e)
        }
    }
}

fn print_help() {
    println!("Diagnostic collector (diagcap) - Package cluster logs and configuration");
    println!();
    println!("USAGE:");
    println!("    diagcap collect --output <FILE> --coordinators <SEL> [--executors <SEL>] [OPTIONS]");
    println!("    diagcap unpack <ARCHIVE> --to <DIR>");
    println!();
    println!("COMMANDS:");
    println!("    collect   Capture every host and write one archive");
    println!("    unpack    Extract an archive produced by collect");
    println!();
    println!("GLOBAL OPTIONS:");
    println!("    -h, --help                 Show this help message");
    println!("    -v, --version              Show version information");
    println!();
    println!("COLLECT OPTIONS:");
    println!("    -o, --output <FILE>        Archive to write: .tar, .tar.gz, .tgz or .zip");
    println!("    --coordinators <SEL>       Coordinator hosts (comma-separated)");
    println!("    --executors <SEL>          Executor hosts (comma-separated)");
    println!("    --conf-dir <DIR>           Configuration root (default: /opt/app/conf)");
    println!("    --log-dir <DIR>            Log root (default: /var/log/app)");
    println!("    --gc-log-dir <DIR>         GC log directory (default: from JVM flags)");
    println!("    --log-age <DAYS>           Only logs modified in the last DAYS days (0 = all)");
    println!("    --exclude <GLOB>           Skip files matching GLOB (repeatable)");
    println!("    --staging-dir <DIR>        Working directory (default: temp dir)");
    println!("    --job-profiles <N>         Job profiles to download (split 40/20/20/20)");
    println!("    --slow-exec <N>            Override slow-execution profile count");
    println!("    --slow-planning <N>        Override slow-planning profile count");
    println!("    --high-cost <N>            Override high-cost profile count");
    println!("    --recent-errors <N>        Override recent-error profile count");
    println!("    --profile-workers <N>      Concurrent profile downloads (default: 4)");
    println!("    --queries-age <DAYS>       Ignore queries older than DAYS days (0 = all)");
    println!("    --url <URL>                REST endpoint (default: http://localhost:9047)");
    println!("    --jvm-process <NAME>       JVM process name for GC flags (default: java)");
    println!("    --transport <NAME>         Remote transport: local (default)");
    println!("    -q, --quiet                Suppress progress output");
    println!();
    println!("ENVIRONMENT:");
    println!("    DIAGCAP_TOKEN              REST access token (enables job profiles)");
    println!("    DIAGCAP_STAGING_DIR        Default staging directory");
    println!("    DIAGCAP_URL                Default REST endpoint");
    println!("    RUST_LOG                   Log level, e.g. RUST_LOG=debug");
    println!();
    println!("EXIT CODES:");
    println!("    0 success, 2 usage error, 3 partial collection, 4 failure, 130 interrupted");
    println!();
    println!("EXAMPLES:");
    println!("    diagcap collect --coordinators 10.0.0.1 --executors 10.0.0.2,10.0.0.3 -o diag.tar.gz");
    println!("    DIAGCAP_TOKEN=... diagcap collect --coordinators localhost --job-profiles 20 -o diag.zip");
    println!("    diagcap unpack diag.tar.gz --to ./diag");
}

fn print_version() {
    const VERSION: &str = env!("CARGO_PKG_VERSION");
    const GIT_HASH: &str = env!("GIT_HASH");
    const GIT_DATE: &str = env!("GIT_DATE");
    const BUILD_TARGET: &str = env!("BUILD_TARGET");

    println!("diagcap {VERSION}");
    println!("Commit: {GIT_HASH} ({GIT_DATE})");
    println!("Target: {BUILD_TARGET}");

    #[cfg(debug_assertions)]
    println!("Build: debug");
    #[cfg(not(debug_assertions))]
    println!("Build: release");
}
