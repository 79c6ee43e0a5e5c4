//! Plugin-facing side of the wrapper: the provider capability trait, module
//! factories, and the context a provider uses to talk back to the panel.

use crate::correlation::{Correlator, PendingEvent};
use crate::protocol::{Message, ProviderSignal, Value};
use bladebar_core::PanelMode;
use std::cell::RefCell;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::rc::Rc;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::mpsc;

/// Failures a provider reports from a remote event handler.
#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("invalid payload for {event}: {message}")]
    InvalidPayload { event: String, message: String },
    #[error("{message}")]
    Other { message: String },
}

pub type ProviderResult<T> = Result<T, ProviderError>;

/// Capabilities of a constructed plugin.
///
/// Every panel property maps onto exactly one method. Defaults do nothing so a
/// plugin only implements what it reacts to.
pub trait PluginProvider {
    /// Internal plugin name (e.g. "clock").
    fn name(&self) -> &str;

    fn unique_id(&self) -> u32;

    fn set_size(&mut self, _size: i32) {}

    fn set_mode(&mut self, _mode: PanelMode) {}

    fn set_screen_position(&mut self, _position: i32) {}

    fn set_nrows(&mut self, _rows: i32) {}

    fn set_locked(&mut self, _locked: bool) {}

    fn set_sensitive(&mut self, _sensitive: bool) {}

    /// The plugin was removed from the panel for good.
    fn removed(&mut self) {}

    fn save(&mut self) {}

    fn show_configure(&mut self) {}

    fn show_about(&mut self) {}

    fn ask_remove(&mut self) {}

    /// Handle a named event from the panel. `Ok(true)` when the event was consumed.
    fn remote_event(&mut self, _name: &str, _payload: Option<&Value>) -> ProviderResult<bool> {
        Ok(false)
    }

    /// Release plugin data right before the provider is dropped.
    fn free_data(&mut self) {}
}

/// Construction data handed to a module factory.
pub struct ProviderInit {
    pub unique_id: u32,
    pub name: String,
    pub display_name: String,
    pub comment: String,
    pub arguments: Vec<String>,
    pub context: ProviderContext,
}

/// A plugin module: optional pre-initialization plus a provider factory.
pub trait PluginModule {
    /// Registry name; a module path resolves to the module with this name.
    fn name(&self) -> &str;

    /// Runs before the embedding toolkit initializes. `false` aborts the wrapper.
    fn preinit(&self, _argv: &[String]) -> bool {
        true
    }

    fn new_provider(&self, init: ProviderInit) -> Option<Box<dyn PluginProvider>>;
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ModuleLoadError {
    #[error("failed to open plugin module {path}: no module named {name:?}")]
    NotFound { path: PathBuf, name: String },
    #[error("failed to open plugin module {0}: not a module path")]
    InvalidPath(PathBuf),
}

/// Resolves a module path to a loaded module.
pub trait ModuleLoader {
    fn load(&self, path: &Path) -> Result<Arc<dyn PluginModule>, ModuleLoadError>;
}

/// Modules compiled into the wrapper, looked up by the module path's file stem.
#[derive(Default, Clone)]
pub struct ModuleRegistry {
    modules: BTreeMap<String, Arc<dyn PluginModule>>,
}

impl ModuleRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, module: impl PluginModule + 'static) -> &mut Self {
        let module: Arc<dyn PluginModule> = Arc::new(module);
        self.modules.insert(module.name().to_string(), module);
        self
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.modules.keys().map(String::as_str)
    }

    /// `/usr/lib/bladebar/plugins/libclock.so` and `clock` both name `clock`.
    pub fn module_name(path: &Path) -> Option<String> {
        let stem = path.file_stem()?.to_str()?;
        let name = stem.strip_prefix("lib").unwrap_or(stem);
        (!name.is_empty()).then(|| name.to_string())
    }
}

impl ModuleLoader for ModuleRegistry {
    fn load(&self, path: &Path) -> Result<Arc<dyn PluginModule>, ModuleLoadError> {
        let name = Self::module_name(path)
            .ok_or_else(|| ModuleLoadError::InvalidPath(path.to_path_buf()))?;
        self.modules
            .get(&name)
            .cloned()
            .ok_or_else(|| ModuleLoadError::NotFound {
                path: path.to_path_buf(),
                name,
            })
    }
}

/// Handle a provider keeps to raise signals and remote events toward the panel.
///
/// Everything sent through it is queued and written by the wrapper's run loop
/// in the order it was emitted.
#[derive(Clone)]
pub struct ProviderContext {
    unique_id: u32,
    outbound: mpsc::UnboundedSender<Message>,
    correlator: Rc<RefCell<Correlator>>,
}

/// Run-loop end of a [`ProviderContext`].
pub struct Upstream {
    pub outbound: mpsc::UnboundedReceiver<Message>,
    pub correlator: Rc<RefCell<Correlator>>,
}

impl ProviderContext {
    pub fn new(unique_id: u32) -> (Self, Upstream) {
        let (tx, rx) = mpsc::unbounded_channel();
        let correlator = Rc::new(RefCell::new(Correlator::new()));
        let context = Self {
            unique_id,
            outbound: tx,
            correlator: Rc::clone(&correlator),
        };
        let upstream = Upstream {
            outbound: rx,
            correlator,
        };
        (context, upstream)
    }

    pub fn unique_id(&self) -> u32 {
        self.unique_id
    }

    /// Queue a provider signal. `false` once the run loop is gone.
    pub fn emit_signal(&self, signal: ProviderSignal) -> bool {
        self.outbound
            .send(Message::ProviderSignal { signal })
            .is_ok()
    }

    /// Queue a remote event for the panel and get a token for its result.
    pub fn remote_event(&self, name: &str, payload: Option<Value>) -> PendingEvent {
        let (handle, pending) = self.correlator.borrow_mut().issue(self.unique_id);
        if self
            .outbound
            .send(Message::remote_event(name, payload, handle))
            .is_err()
        {
            self.correlator.borrow_mut().cancel(handle);
        }
        pending
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Dummy;

    struct DummyProvider(u32);

    impl PluginProvider for DummyProvider {
        fn name(&self) -> &str {
            "dummy"
        }

        fn unique_id(&self) -> u32 {
            self.0
        }
    }

    impl PluginModule for Dummy {
        fn name(&self) -> &str {
            "dummy"
        }

        fn new_provider(&self, init: ProviderInit) -> Option<Box<dyn PluginProvider>> {
            Some(Box::new(DummyProvider(init.unique_id)))
        }
    }

    #[test]
    fn module_names_come_from_file_stems() {
        assert_eq!(
            ModuleRegistry::module_name(Path::new("/usr/lib/bladebar/plugins/libclock.so")),
            Some("clock".to_string())
        );
        assert_eq!(
            ModuleRegistry::module_name(Path::new("separator")),
            Some("separator".to_string())
        );
        assert_eq!(ModuleRegistry::module_name(Path::new("/")), None);
        assert_eq!(ModuleRegistry::module_name(Path::new("lib.so")), None);
    }

    #[test]
    fn registry_loads_known_modules_only() {
        let mut registry = ModuleRegistry::new();
        registry.register(Dummy);
        assert_eq!(registry.names().collect::<Vec<_>>(), vec!["dummy"]);

        let module = registry.load(Path::new("/opt/libdummy.so")).unwrap();
        let (context, _upstream) = ProviderContext::new(4);
        let provider = module
            .new_provider(ProviderInit {
                unique_id: 4,
                name: "dummy".into(),
                display_name: "Dummy".into(),
                comment: String::new(),
                arguments: vec![],
                context,
            })
            .unwrap();
        assert_eq!(provider.unique_id(), 4);

        assert!(matches!(
            registry.load(Path::new("/opt/libmissing.so")),
            Err(ModuleLoadError::NotFound { .. })
        ));
    }

    #[test]
    fn context_queues_in_emission_order() {
        let (context, mut upstream) = ProviderContext::new(9);
        assert!(context.emit_signal(ProviderSignal::ShowAbout));
        let pending = context.remote_event("hello", None);
        assert!(context.emit_signal(ProviderSignal::ExpandPlugin));

        assert_eq!(
            upstream.outbound.try_recv().unwrap(),
            Message::ProviderSignal {
                signal: ProviderSignal::ShowAbout
            }
        );
        assert_eq!(
            upstream.outbound.try_recv().unwrap(),
            Message::remote_event("hello", None, pending.handle())
        );
        assert_eq!(
            upstream.outbound.try_recv().unwrap(),
            Message::ProviderSignal {
                signal: ProviderSignal::ExpandPlugin
            }
        );
        assert!(upstream.correlator.borrow().is_pending(pending.handle()));
    }

    #[test]
    fn context_without_run_loop_cancels_events() {
        let (context, upstream) = ProviderContext::new(9);
        let correlator = Rc::clone(&upstream.correlator);
        drop(upstream);

        assert!(!context.emit_signal(ProviderSignal::LockPanel));
        let mut pending = context.remote_event("hello", None);
        assert_eq!(correlator.borrow().pending_count(), 0);
        assert_eq!(pending.try_result(), None);
    }
}
