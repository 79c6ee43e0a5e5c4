use anyhow::{Context, Result};
use bladebar_core::{init_wrapper_logging, AppDirs, Config, APP_NAME, BUS_DIR_ENV, LOG_ENV};
use bladebar_plugin::{WorkerArgs, WrapperExit};
use bladebar_wrapper::{builtin_modules, set_process_name, HeadlessEmbedder};
use std::path::PathBuf;
use std::process::ExitCode;

fn main() -> ExitCode {
    let filter = std::env::var(LOG_ENV).ok();
    let _guard = match init_wrapper_logging(filter.as_deref()) {
        Ok(guard) => Some(guard),
        Err(err) => {
            eprintln!("bladebar-wrapper: failed to initialize logging: {err}");
            None
        }
    };

    let argv: Vec<String> = std::env::args().collect();
    if let Ok(args) = WorkerArgs::parse(&argv) {
        let name = args.process_name();
        if let Err(err) = set_process_name(&name) {
            tracing::warn!(error = %err, name = %name, "failed to change the process name");
        }
    }
    let bus_dir = bus_dir();

    let runtime = match tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
    {
        Ok(runtime) => runtime,
        Err(err) => {
            tracing::error!(error = %err, "failed to start the wrapper runtime");
            return WrapperExit::Failure.into();
        }
    };

    let registry = builtin_modules();
    let exit = runtime.block_on(bladebar_wrapper::run(
        &argv,
        &registry,
        &HeadlessEmbedder,
        &bus_dir,
    ));
    tracing::debug!(code = exit.code(), %exit, "wrapper exiting");
    exit.into()
}

/// The panel passes the bus directory in the environment; fall back to the
/// configured one when started by hand.
fn bus_dir() -> PathBuf {
    if let Some(dir) = std::env::var_os(BUS_DIR_ENV) {
        return PathBuf::from(dir);
    }
    configured_bus_dir().unwrap_or_else(|err| {
        let fallback = std::env::temp_dir().join(APP_NAME).join("bus");
        tracing::warn!(error = format!("{err:#}"), fallback = %fallback.display(), "using fallback bus directory");
        fallback
    })
}

fn configured_bus_dir() -> Result<PathBuf> {
    let dirs = AppDirs::discover().context("failed to resolve application directories")?;
    let config = Config::load_or_default(&dirs).context("failed to load configuration")?;
    Ok(config.bus_dir(&dirs))
}
