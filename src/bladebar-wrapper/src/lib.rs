//! The wrapper process that hosts exactly one plugin instance.
//!
//! The panel starts a wrapper per plugin. It loads the plugin module,
//! connects back to the endpoint registered for its unique id, constructs the
//! provider, embeds it and then serves the connection until the panel asks it
//! to quit or goes away. The process exit code tells the panel which of those
//! happened.

pub mod modules;
pub mod plug;
pub mod runtime;

use bladebar_plugin::endpoint;
use bladebar_plugin::{
    ArgumentError, ConnectionError, FrameReader, FrameWriter, ModuleLoadError, ModuleLoader,
    ProviderContext, ProviderInit, WorkerArgs, WrapperExit, API_VERSION,
};
use plug::Embedder;
use runtime::WorkerRuntime;
use std::path::Path;
use thiserror::Error;
use tokio::net::unix::{OwnedReadHalf, OwnedWriteHalf};

pub use modules::builtin_modules;
pub use plug::{Background, HeadlessEmbedder, HeadlessPlug, Plug};

#[derive(Debug, Error)]
pub enum StartupError {
    #[error(transparent)]
    Arguments(#[from] ArgumentError),
    #[error(transparent)]
    ModuleLoad(#[from] ModuleLoadError),
    #[error("plugin module {module} failed to pre-initialize")]
    PreinitRejected { module: String },
    #[error(transparent)]
    Connection(#[from] ConnectionError),
    #[error("plugin module {module} did not create a provider for {name}")]
    NoProvider { module: String, name: String },
}

impl StartupError {
    /// Exit code the wrapper reports for this failure.
    pub fn exit(&self) -> WrapperExit {
        match self {
            StartupError::Arguments(_) => WrapperExit::ArgumentsFailed,
            StartupError::PreinitRejected { .. } => WrapperExit::PreinitFailed,
            StartupError::NoProvider { .. } => WrapperExit::NoProvider,
            StartupError::ModuleLoad(_) | StartupError::Connection(_) => WrapperExit::Failure,
        }
    }
}

/// Rename the calling process, the way `ps` and `top` show it.
#[cfg(target_os = "linux")]
pub fn set_process_name(name: &str) -> std::io::Result<()> {
    std::fs::write("/proc/self/comm", name)
}

#[cfg(not(target_os = "linux"))]
pub fn set_process_name(_name: &str) -> std::io::Result<()> {
    Ok(())
}

/// A wrapper that finished startup and is ready to serve its connection.
pub struct Started {
    pub runtime: WorkerRuntime,
    pub reader: FrameReader<OwnedReadHalf>,
    pub writer: FrameWriter<OwnedWriteHalf>,
}

/// Run a wrapper to completion and return its exit code.
pub async fn run(
    argv: &[String],
    loader: &dyn ModuleLoader,
    embedder: &dyn Embedder,
    bus_dir: &Path,
) -> WrapperExit {
    match start(argv, loader, embedder, bus_dir).await {
        Ok(Started {
            runtime,
            reader,
            writer,
        }) => runtime.run(reader, writer).await,
        Err(err) => {
            tracing::error!(error = %err, "wrapper startup failed");
            err.exit()
        }
    }
}

/// Everything up to the run loop: arguments, module, connection, provider, plug.
pub async fn start(
    argv: &[String],
    loader: &dyn ModuleLoader,
    embedder: &dyn Embedder,
    bus_dir: &Path,
) -> Result<Started, StartupError> {
    let args = WorkerArgs::parse(argv)?;
    match args.api_version() {
        Some(API_VERSION) => {}
        version => tracing::debug!(?version, expected = API_VERSION, "wrapper started without a matching api suffix"),
    }

    let module = loader.load(&args.module_path)?;
    tracing::debug!(module = module.name(), path = %args.module_path.display(), "loaded plugin module");

    if !module.preinit(argv) {
        return Err(StartupError::PreinitRejected {
            module: module.name().to_string(),
        });
    }

    let endpoint = args.endpoint();
    let stream = endpoint::connect(bus_dir, endpoint).await?;
    tracing::info!(%endpoint, name = %args.name, "connected to the panel");

    let (context, upstream) = ProviderContext::new(args.unique_id);
    let init = ProviderInit {
        unique_id: args.unique_id,
        name: args.name.clone(),
        display_name: args.display_name.clone(),
        comment: args.comment.clone(),
        arguments: args.arguments.clone(),
        context,
    };
    let provider = module
        .new_provider(init)
        .ok_or_else(|| StartupError::NoProvider {
            module: module.name().to_string(),
            name: args.name.clone(),
        })?;

    let plug = embedder.embed(args.socket_id, provider.as_ref());
    let (read_half, write_half) = stream.into_split();

    Ok(Started {
        runtime: WorkerRuntime::new(provider, plug, upstream),
        reader: FrameReader::new(read_half),
        writer: FrameWriter::new(write_half),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use bladebar_plugin::{
        Endpoint, Message, ModuleRegistry, PluginModule, PluginProvider, Property, ProviderSignal,
    };

    struct Refusing;

    impl PluginModule for Refusing {
        fn name(&self) -> &str {
            "refusing"
        }

        fn preinit(&self, _argv: &[String]) -> bool {
            false
        }

        fn new_provider(&self, _init: ProviderInit) -> Option<Box<dyn PluginProvider>> {
            None
        }
    }

    struct Empty;

    impl PluginModule for Empty {
        fn name(&self) -> &str {
            "empty"
        }

        fn new_provider(&self, _init: ProviderInit) -> Option<Box<dyn PluginProvider>> {
            None
        }
    }

    fn argv(module: &str, unique_id: &str) -> Vec<String> {
        ["bladebar-wrapper-2.0", module, unique_id, "0", "test", "Test", "a test plugin"]
            .iter()
            .map(|s| s.to_string())
            .collect()
    }

    fn registry() -> ModuleRegistry {
        let mut registry = builtin_modules();
        registry.register(Refusing).register(Empty);
        registry
    }

    #[test]
    fn startup_errors_map_to_exit_codes() {
        let cases = [
            (
                StartupError::Arguments(ArgumentError::TooFew {
                    found: 1,
                    required: 7,
                }),
                WrapperExit::ArgumentsFailed,
            ),
            (
                StartupError::ModuleLoad(ModuleLoadError::InvalidPath("/".into())),
                WrapperExit::Failure,
            ),
            (
                StartupError::PreinitRejected {
                    module: "x".into(),
                },
                WrapperExit::PreinitFailed,
            ),
            (
                StartupError::Connection(ConnectionError::BusUnavailable {
                    path: "/nope".into(),
                }),
                WrapperExit::Failure,
            ),
            (
                StartupError::NoProvider {
                    module: "x".into(),
                    name: "y".into(),
                },
                WrapperExit::NoProvider,
            ),
        ];
        for (err, exit) in cases {
            assert_eq!(err.exit(), exit, "{err}");
        }
    }

    #[tokio::test]
    async fn early_failures_return_their_codes() {
        let tmp = tempfile::tempdir().unwrap();
        let registry = registry();
        let bus = tmp.path();

        let short: Vec<String> = vec!["bladebar-wrapper-2.0".into()];
        assert_eq!(
            run(&short, &registry, &HeadlessEmbedder, bus).await,
            WrapperExit::ArgumentsFailed
        );
        assert_eq!(
            run(&argv("libclock.so", "x"), &registry, &HeadlessEmbedder, bus).await,
            WrapperExit::ArgumentsFailed
        );
        assert_eq!(
            run(&argv("libmissing.so", "1"), &registry, &HeadlessEmbedder, bus).await,
            WrapperExit::Failure
        );
        assert_eq!(
            run(&argv("librefusing.so", "1"), &registry, &HeadlessEmbedder, bus).await,
            WrapperExit::PreinitFailed
        );
        // nobody registered endpoint 1
        assert_eq!(
            run(&argv("libclock.so", "1"), &registry, &HeadlessEmbedder, bus).await,
            WrapperExit::Failure
        );
    }

    #[tokio::test]
    async fn missing_provider_is_reported_after_connecting() {
        let tmp = tempfile::tempdir().unwrap();
        let (listener, _) = endpoint::register(tmp.path(), Endpoint::new(4)).unwrap();
        let registry = registry();
        let args = argv("libempty.so", "4");

        let (exit, accepted) = tokio::join!(
            run(&args, &registry, &HeadlessEmbedder, tmp.path()),
            listener.accept()
        );
        assert!(accepted.is_ok());
        assert_eq!(exit, WrapperExit::NoProvider);
    }

    #[tokio::test]
    async fn clock_wrapper_talks_to_the_panel() {
        let tmp = tempfile::tempdir().unwrap();
        let (listener, _) = endpoint::register(tmp.path(), Endpoint::new(7)).unwrap();
        let registry = registry();

        let panel = async {
            let (stream, _) = listener.accept().await.unwrap();
            let (read_half, write_half) = stream.into_split();
            let mut reader = FrameReader::new(read_half);
            let mut writer = FrameWriter::new(write_half);

            writer
                .send(&Message::Set(vec![Property::Size(30), Property::Mode(0)]))
                .await
                .unwrap();
            writer
                .send(&Message::remote_event("refresh", None, 1))
                .await
                .unwrap();

            let mut signals = Vec::new();
            loop {
                match reader.read().await.unwrap().unwrap() {
                    Message::ProviderSignal { signal } => signals.push(signal),
                    Message::RemoteEventResult { handle, result } => {
                        assert_eq!((handle, result), (1, true));
                        break;
                    }
                    other => panic!("unexpected frame {other:?}"),
                }
            }
            writer.send(&Message::Set(vec![Property::Quit])).await.unwrap();

            // whatever is still queued is flushed before the wrapper hangs up
            while let Some(message) = reader.read().await.unwrap() {
                if let Message::ProviderSignal { signal } = message {
                    signals.push(signal);
                }
            }
            signals
        };

        let mut argv = argv("/usr/lib/bladebar/plugins/libclock.so", "7");
        argv.push("%H:%M".into());
        let (exit, signals) = tokio::join!(
            run(&argv, &registry, &HeadlessEmbedder, tmp.path()),
            panel
        );
        assert_eq!(exit, WrapperExit::Success);
        assert_eq!(
            signals,
            vec![ProviderSignal::ShowConfigure, ProviderSignal::ShowAbout]
        );
    }
}
