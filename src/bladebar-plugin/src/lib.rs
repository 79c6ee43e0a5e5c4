//! Out-of-process plugins for the Blade panel.
//!
//! Every plugin instance runs inside its own wrapper process so a crashing
//! plugin cannot take the panel down. This crate holds both ends of that
//! arrangement:
//! - [`protocol`]: the typed property and message vocabulary, JSON encoded
//! - [`endpoint`]: per-plugin endpoints on the bus directory and frame I/O
//! - [`correlation`]: remote-event handles and result matching
//! - [`launch`]: the argument vector a wrapper is started with
//! - [`provider`]: the capability traits plugins implement inside a wrapper
//! - [`supervisor`]: the panel side, which spawns and tracks wrappers
//!
//! # Protocol
//!
//! One JSON document per line, in both directions:
//! - the panel sends `Set` property batches and `RemoteEvent`s
//! - the wrapper answers with `RemoteEventResult`s and raises `ProviderSignal`s
//!   and `RemoteEvent`s of its own
//!
//! ```text
//! {"type":"Set","params":[{"kind":"set-size","value":{"type":"int","value":30}}]}
//! {"type":"ProviderSignal","params":{"signal":"expand-plugin"}}
//! ```
//!
//! # Usage
//!
//! ```rust,ignore
//! use bladebar_plugin::{PluginInstance, Property, Supervisor, SupervisorConfig};
//!
//! let mut supervisor = Supervisor::new(SupervisorConfig::from_config(&config, &dirs));
//! let handle = supervisor.spawn(instance)?;
//! supervisor.push_properties(handle, vec![Property::Size(30)])?;
//! while let Some(event) = supervisor.next_event().await {
//!     // react to signals, remote events and exits
//! }
//! ```

pub mod correlation;
pub mod endpoint;
pub mod launch;
pub mod lifecycle;
pub mod protocol;
pub mod provider;
pub mod supervisor;

pub use correlation::{Correlator, PendingEvent};
pub use endpoint::{ConnectionError, Endpoint, FrameError, FrameReader, FrameWriter};
pub use launch::{ArgumentError, PluginInstance, WorkerArgs};
pub use lifecycle::{WorkerExit, WorkerState, WrapperExit};
pub use protocol::{
    CodecError, Message, Property, PropertyKind, ProviderSignal, Value, ValueType, API_VERSION,
};
pub use provider::{
    ModuleLoadError, ModuleLoader, ModuleRegistry, PluginModule, PluginProvider, ProviderContext,
    ProviderError, ProviderInit, ProviderResult, Upstream,
};
pub use supervisor::{
    Supervisor, SupervisorConfig, SupervisorError, SupervisorEvent, Worker, WorkerHandle,
};
