use anyhow::{Context, Result};
use bladebar_core::{init_logging, AppDirs, Config, PanelConfig, PluginEntry};
use bladebar_plugin::{
    PluginInstance, Property, ProviderSignal, Supervisor, SupervisorConfig, SupervisorError,
    SupervisorEvent, Value, WorkerExit, WorkerHandle,
};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::time::Duration;
use tokio::time::Instant;

#[derive(Debug, Parser)]
#[command(name = "bladebar", version, about = "Panel that runs every plugin in its own process")]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Start the configured plugins and supervise them until Ctrl-C
    Run(RunCommand),
    /// Plugin management commands
    #[command(subcommand)]
    Plugins(PluginsCommand),
}

#[derive(Debug, Subcommand)]
enum PluginsCommand {
    /// List configured plugins and their endpoints
    List,
}

const DEFAULT_SHUTDOWN_TIMEOUT_SECS: u64 = 5;

#[derive(Debug, Parser, Clone)]
struct RunCommand {
    /// Only start plugins with these unique ids
    #[arg(long, value_delimiter = ',')]
    only: Vec<u32>,
    /// Wrapper binary (takes precedence over config)
    #[arg(long)]
    wrapper: Option<PathBuf>,
    /// Bus directory (takes precedence over config)
    #[arg(long)]
    bus_dir: Option<PathBuf>,
    /// Seconds to wait for plugins to quit before killing them
    #[arg(long, default_value_t = DEFAULT_SHUTDOWN_TIMEOUT_SECS)]
    shutdown_timeout: u64,
}

impl Default for RunCommand {
    fn default() -> Self {
        Self {
            only: Vec::new(),
            wrapper: None,
            bus_dir: None,
            shutdown_timeout: DEFAULT_SHUTDOWN_TIMEOUT_SECS,
        }
    }
}

impl RunCommand {
    fn selects(&self, entry: &PluginEntry) -> bool {
        self.only.is_empty() || self.only.contains(&entry.unique_id)
    }
}

fn plugin_instance(entry: &PluginEntry) -> PluginInstance {
    let name = entry.resolved_name();
    PluginInstance {
        unique_id: entry.unique_id,
        module_path: entry.module.clone(),
        display_name: entry.display_name.clone().unwrap_or_else(|| name.clone()),
        comment: entry.comment.clone().unwrap_or_default(),
        arguments: entry.arguments.clone(),
        name,
    }
}

/// Properties every plugin receives right after it is spawned.
fn initial_properties(panel: &PanelConfig) -> Vec<Property> {
    vec![
        Property::Size(i32::try_from(panel.size).unwrap_or(i32::MAX)),
        Property::Mode(panel.mode.as_raw()),
        Property::Nrows(i32::try_from(panel.nrows).unwrap_or(1)),
        Property::Locked(panel.locked),
        Property::Sensitive(true),
        Property::BackgroundAlpha(1.0),
    ]
}

/// Worker remote events are addressed as `<plugin name>:<event>`.
fn split_target(name: &str) -> Option<(&str, &str)> {
    let (target, event) = name.split_once(':')?;
    (!target.is_empty() && !event.is_empty()).then_some((target, event))
}

struct Panel {
    supervisor: Supervisor,
    panel: PanelConfig,
    restart_on_request: bool,
    shutting_down: bool,
}

impl Panel {
    fn new(supervisor: Supervisor, panel: PanelConfig, restart_on_request: bool) -> Self {
        Self {
            supervisor,
            panel,
            restart_on_request,
            shutting_down: false,
        }
    }

    fn start(&mut self, instance: PluginInstance) -> Result<WorkerHandle, SupervisorError> {
        let handle = self.supervisor.spawn(instance)?;
        self.supervisor
            .push_properties(handle, initial_properties(&self.panel))?;
        Ok(handle)
    }

    fn should_respawn(&self, exit: &WorkerExit) -> bool {
        exit.restart_requested() && self.restart_on_request && !self.shutting_down
    }

    fn handle_event(&mut self, event: SupervisorEvent) {
        match event {
            SupervisorEvent::Connected { handle } => {
                tracing::info!(%handle, "plugin connected");
            }
            SupervisorEvent::ProviderSignal { handle, signal } => self.on_signal(handle, signal),
            SupervisorEvent::RemoteEvent {
                handle,
                name,
                payload,
                event_handle,
            } => self.on_remote_event(handle, &name, payload, event_handle),
            SupervisorEvent::Terminated {
                handle,
                instance,
                exit,
            } => {
                if self.should_respawn(&exit) {
                    tracing::info!(%handle, name = %instance.name, "restarting plugin on request");
                    if let Err(err) = self.start(instance) {
                        tracing::error!(%handle, error = %err, "failed to restart plugin");
                    }
                } else if exit.is_clean() {
                    tracing::info!(%handle, name = %instance.name, %exit, "plugin stopped");
                } else {
                    tracing::warn!(%handle, name = %instance.name, %exit, "plugin terminated");
                }
            }
        }
    }

    fn on_signal(&mut self, handle: WorkerHandle, signal: ProviderSignal) {
        match signal {
            ProviderSignal::RemovePlugin => {
                tracing::info!(%handle, "removing plugin");
                if let Err(err) = self
                    .supervisor
                    .push_properties(handle, vec![Property::Removed, Property::Quit])
                {
                    tracing::warn!(%handle, error = %err, "failed to remove plugin");
                }
            }
            ProviderSignal::LockPanel | ProviderSignal::UnlockPanel => {
                self.panel.locked = signal == ProviderSignal::LockPanel;
                for other in self.supervisor.live_handles() {
                    let locked = vec![Property::Locked(self.panel.locked)];
                    if let Err(err) = self.supervisor.push_properties(other, locked) {
                        tracing::debug!(handle = %other, error = %err, "skipping lock update");
                    }
                }
            }
            other => tracing::info!(%handle, signal = ?other, "plugin signal"),
        }
    }

    fn on_remote_event(
        &mut self,
        handle: WorkerHandle,
        name: &str,
        payload: Option<Value>,
        event_handle: u32,
    ) {
        let mut handled = false;
        if let Some((target, event)) = split_target(name) {
            for other in self.supervisor.live_handles() {
                if other == handle {
                    continue;
                }
                let matches = self
                    .supervisor
                    .worker(other)
                    .is_some_and(|worker| worker.instance().name == target);
                if !matches {
                    continue;
                }
                match self.supervisor.send_remote_event(other, event, payload.clone()) {
                    Ok(_) => handled = true,
                    Err(err) => tracing::debug!(handle = %other, error = %err, "failed to forward remote event"),
                }
            }
        }
        tracing::debug!(%handle, event = name, handled, "remote event from plugin");
        if let Err(err) = self
            .supervisor
            .reply_remote_event(handle, event_handle, handled)
        {
            tracing::debug!(%handle, error = %err, "failed to answer remote event");
        }
    }
}

async fn run(config: Config, dirs: &AppDirs, command: RunCommand) -> Result<()> {
    let mut supervisor_config = SupervisorConfig::from_config(&config, dirs);
    if let Some(wrapper) = &command.wrapper {
        supervisor_config.wrapper_binary = wrapper.clone();
    }
    if let Some(bus_dir) = &command.bus_dir {
        supervisor_config.bus_dir = bus_dir.clone();
    }
    std::fs::create_dir_all(&supervisor_config.bus_dir).with_context(|| {
        format!(
            "failed to create bus directory {}",
            supervisor_config.bus_dir.display()
        )
    })?;

    tracing::info!(
        "Starting panel (wrapper: {}, bus: {})",
        supervisor_config.wrapper_binary.display(),
        supervisor_config.bus_dir.display()
    );

    let mut panel = Panel::new(
        Supervisor::new(supervisor_config),
        config.panel.clone(),
        config.wrapper.restart_on_request,
    );

    let mut started = 0;
    for entry in config.plugins.iter().filter(|entry| command.selects(entry)) {
        match panel.start(plugin_instance(entry)) {
            Ok(handle) => {
                started += 1;
                tracing::info!(%handle, module = %entry.module.display(), "plugin started");
            }
            Err(err) => tracing::error!(unique_id = entry.unique_id, error = %err, "failed to start plugin"),
        }
    }
    if started == 0 {
        println!("No plugins to run. Add [[plugins]] entries to config.toml.");
        return Ok(());
    }

    let shutdown_timeout = Duration::from_secs(command.shutdown_timeout);
    let mut deadline: Option<Instant> = None;
    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    loop {
        tokio::select! {
            event = panel.supervisor.next_event() => match event {
                Some(event) => panel.handle_event(event),
                None => break,
            },
            signal = &mut ctrl_c, if !panel.shutting_down => {
                if let Err(err) = signal {
                    tracing::warn!(error = %err, "failed to listen for Ctrl-C");
                }
                panel.shutting_down = true;
                let asked = panel.supervisor.shutdown();
                tracing::info!(asked, "shutting down plugins");
                deadline = Some(Instant::now() + shutdown_timeout);
            }
            _ = tokio::time::sleep_until(deadline.unwrap_or_else(Instant::now)), if deadline.is_some() => {
                tracing::warn!("plugins did not quit in time, killing them");
                for handle in panel.supervisor.live_handles() {
                    let _ = panel.supervisor.kill(handle);
                }
                deadline = None;
            }
        }
    }

    tracing::info!("all plugins stopped");
    Ok(())
}

fn print_plugins(config: &Config, dirs: &AppDirs) {
    if config.plugins.is_empty() {
        println!("No plugins configured. Add [[plugins]] entries to config.toml.");
        return;
    }
    let bus_dir = config.bus_dir(dirs);
    for entry in &config.plugins {
        let instance = plugin_instance(entry);
        let endpoint = instance.endpoint();
        println!(
            "Plugin {}: {} ({})",
            instance.unique_id, instance.name, instance.display_name
        );
        println!("  module:   {}", instance.module_path.display());
        if !instance.arguments.is_empty() {
            println!("  args:     {}", instance.arguments.join(" "));
        }
        println!("  endpoint: {endpoint}");
        println!("  socket:   {}", endpoint.socket_path(&bus_dir).display());
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let dirs = AppDirs::discover()?;
    let config = Config::load_or_default(&dirs)?;
    let _logging = init_logging(&config.logging, &dirs)?;

    match cli.command {
        Some(Command::Plugins(PluginsCommand::List)) => print_plugins(&config, &dirs),
        Some(Command::Run(command)) => run(config, &dirs, command).await?,
        None => run(config, &dirs, RunCommand::default()).await?,
    }
    Ok(())
}
