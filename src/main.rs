// MrcSleuth - main.rs
//
// Command-line entry point. Handles:
// 1. CLI argument parsing
// 2. Config loading and logging initialisation (debug mode support)
// 3. Opening the console source (log file or serial device)
// 4. Running the parse session and writing the report
//
// Exit status: 0 PASSED, 1 FAILED, 2 when the source cannot be opened or the
// report cannot be written.

use clap::Parser;
use mrcsleuth::app::output;
use mrcsleuth::app::session::{ParseSession, SessionOptions};
use mrcsleuth::app::signal::{LedSignal, TracingPwm};
use mrcsleuth::app::source::LineSource;
use mrcsleuth::core::collab::{FaultSignal, LogOnlySignal};
use mrcsleuth::core::registry::HandlerRegistry;
use mrcsleuth::platform::config::{self, PlatformPaths};
use mrcsleuth::util::{self, error::Result};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;

const EXIT_FAILED: u8 = 1;
const EXIT_ERROR: u8 = 2;

/// MrcSleuth - Memory reference code debug console parser.
///
/// Reads a BIOS/MRC debug console transcript (a saved log or a live serial
/// device), extracts the memory population and faults, and reports whether
/// the boot's testplan passed.
#[derive(Parser, Debug)]
#[command(name = "mrcsleuth", version, about)]
struct Cli {
    /// Console log file or serial character device.
    source: PathBuf,

    /// Config file (defaults to the platform config directory).
    #[arg(short = 'c', long = "config")]
    config: Option<PathBuf>,

    /// JSON report target: a file to append to, or `stdout`.
    #[arg(short = 'o', long = "output", default_value = output::STDOUT_TARGET)]
    output: String,

    /// Also write the RAM inventory as CSV.
    #[arg(long = "inventory-csv")]
    inventory_csv: Option<PathBuf>,

    /// Enable debug logging (equivalent to RUST_LOG=debug).
    #[arg(short = 'd', long = "debug")]
    debug: bool,

    /// Test name recorded in the report.
    #[arg(long = "name", default_value = util::constants::DEFAULT_TEST_NAME)]
    name: String,
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    // Config is read before logging so its level can take effect; its
    // warnings are replayed once the subscriber exists.
    let config_path = cli
        .config
        .clone()
        .unwrap_or_else(|| PlatformPaths::resolve().default_config_file());
    let (app_config, config_warnings) = config::load_config(&config_path);

    util::logging::init(
        cli.debug,
        app_config.log_level.as_deref(),
        app_config.log_file.as_deref(),
    );
    for w in &config_warnings {
        tracing::warn!(warning = %w, "Config warning");
    }

    tracing::info!(
        version = util::constants::APP_VERSION,
        debug = cli.debug,
        source = %cli.source.display(),
        config = %config_path.display(),
        "MrcSleuth starting"
    );

    match run(&cli, &app_config) {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::from(EXIT_FAILED),
        Err(e) => {
            tracing::error!(error = %e, "Run aborted");
            eprintln!("Error: {e}");
            ExitCode::from(EXIT_ERROR)
        }
    }
}

/// Parse the source and write the report. Returns whether the run passed.
fn run(cli: &Cli, app_config: &config::AppConfig) -> Result<bool> {
    let cancel = Arc::new(AtomicBool::new(false));
    let (kind, source) = LineSource::open(&cli.source, cancel)?;

    let signal: Box<dyn FaultSignal> = if app_config.leds.enabled {
        Box::new(LedSignal::new(TracingPwm::new(app_config.leds)))
    } else {
        Box::new(LogOnlySignal)
    };
    let options = SessionOptions::from_config(app_config, cli.name.clone());
    let mut session = ParseSession::new(HandlerRegistry::builtin(), options)?.with_signal(signal);

    for line in source {
        match line {
            Ok(l) => session.process_line(&l),
            Err(e) => {
                tracing::warn!(error = %e, "Console stream interrupted");
                break;
            }
        }
        if kind.is_live() && session.is_settled() {
            tracing::info!("All required goals resolved; leaving live console");
            break;
        }
    }
    let outcome = session.finish();

    output::save_report(&outcome.report, &cli.output)?;
    if let Some(path) = &cli.inventory_csv {
        output::save_inventory(&outcome.report.components, path)?;
    }

    let passed = outcome.report.verdict.passed();
    if !passed {
        for e in &outcome.report.errors {
            eprintln!("FAILED: {e}");
        }
    }
    Ok(passed)
}
