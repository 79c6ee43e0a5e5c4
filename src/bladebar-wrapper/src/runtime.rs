//! Run loop of a wrapper process once its provider is embedded.

use crate::plug::Plug;
use bladebar_core::PanelMode;
use bladebar_plugin::{
    FrameError, FrameReader, FrameWriter, Message, PluginProvider, Property, Upstream, Value,
    WrapperExit,
};
use std::panic::{self, AssertUnwindSafe};
use tokio::io::{AsyncRead, AsyncWrite};

pub struct WorkerRuntime {
    unique_id: u32,
    provider: Box<dyn PluginProvider>,
    plug: Box<dyn Plug>,
    upstream: Upstream,
    exit: Option<WrapperExit>,
}

impl WorkerRuntime {
    pub fn new(provider: Box<dyn PluginProvider>, plug: Box<dyn Plug>, upstream: Upstream) -> Self {
        Self {
            unique_id: provider.unique_id(),
            provider,
            plug,
            upstream,
            exit: None,
        }
    }

    pub fn plug(&self) -> &dyn Plug {
        self.plug.as_ref()
    }

    /// Exit requested by a quit action, if any.
    pub fn exit_requested(&self) -> Option<WrapperExit> {
        self.exit
    }

    /// Apply a property batch in order. A quit entry only takes effect once
    /// the whole batch has been applied.
    pub fn apply(&mut self, batch: Vec<Property>) {
        for property in batch {
            self.apply_one(property);
        }
    }

    fn apply_one(&mut self, property: Property) {
        tracing::trace!(unique_id = self.unique_id, kind = %property.kind(), "applying property");
        match property {
            Property::Size(size) => self.provider.set_size(size),
            Property::Mode(raw) => match PanelMode::from_raw(raw) {
                Some(mode) => self.provider.set_mode(mode),
                None => tracing::warn!(unique_id = self.unique_id, raw, "ignoring unknown panel mode"),
            },
            Property::ScreenPosition(position) => self.provider.set_screen_position(position),
            Property::Nrows(rows) => self.provider.set_nrows(rows),
            Property::Locked(locked) => self.provider.set_locked(locked),
            Property::Sensitive(sensitive) => self.provider.set_sensitive(sensitive),
            Property::BackgroundAlpha(alpha) => self.plug.set_background_alpha(alpha),
            Property::BackgroundColor(color) => self.plug.set_background_color(Some(color.as_str())),
            Property::BackgroundImage(image) => self.plug.set_background_image(Some(image.as_str())),
            Property::BackgroundUnset => self.plug.set_background_color(None),
            Property::Removed => self.provider.removed(),
            Property::Save => self.provider.save(),
            Property::ShowConfigure => self.provider.show_configure(),
            Property::ShowAbout => self.provider.show_about(),
            Property::AskRemove => self.provider.ask_remove(),
            Property::Quit => {
                self.exit.get_or_insert(WrapperExit::Success);
            }
            Property::QuitForRestart => self.exit = Some(WrapperExit::SuccessAndRestart),
        }
    }

    /// Hand a remote event to the provider. Errors and panics count as not handled.
    pub fn dispatch_remote_event(&mut self, name: &str, payload: Option<&Value>) -> bool {
        let provider = &mut self.provider;
        match panic::catch_unwind(AssertUnwindSafe(|| provider.remote_event(name, payload))) {
            Ok(Ok(handled)) => handled,
            Ok(Err(err)) => {
                tracing::warn!(unique_id = self.unique_id, event = name, error = %err, "remote event failed");
                false
            }
            Err(_) => {
                tracing::error!(unique_id = self.unique_id, event = name, "remote event handler panicked");
                false
            }
        }
    }

    /// Handle one frame from the panel; returns the reply to send, if any.
    pub fn handle_message(&mut self, message: Message) -> Option<Message> {
        match message {
            Message::Set(batch) => {
                self.apply(batch);
                None
            }
            Message::RemoteEvent {
                name,
                value,
                handle,
            } => {
                let payload = value.into_payload();
                let result = self.dispatch_remote_event(&name, payload.as_ref());
                tracing::debug!(unique_id = self.unique_id, event = %name, handle, result, "remote event handled");
                Some(Message::RemoteEventResult { handle, result })
            }
            Message::RemoteEventResult { handle, result } => {
                let resolved = self
                    .upstream
                    .correlator
                    .borrow_mut()
                    .resolve(self.unique_id, handle, result);
                if !resolved {
                    tracing::debug!(unique_id = self.unique_id, handle, "ignoring result for unknown remote event");
                }
                None
            }
            Message::ProviderSignal { signal } => {
                tracing::warn!(unique_id = self.unique_id, ?signal, "panel sent a provider signal; dropping it");
                None
            }
        }
    }

    /// Serve the connection until a quit action or until the panel goes away.
    pub async fn run<R, W>(mut self, mut reader: FrameReader<R>, mut writer: FrameWriter<W>) -> WrapperExit
    where
        R: AsyncRead + Unpin,
        W: AsyncWrite + Unpin,
    {
        let exit = loop {
            if let Some(exit) = self.exit {
                break exit;
            }

            tokio::select! {
                incoming = reader.read() => match incoming {
                    Ok(Some(message)) => {
                        if let Some(reply) = self.handle_message(message) {
                            if let Err(err) = writer.send(&reply).await {
                                tracing::warn!(unique_id = self.unique_id, error = %err, "failed to reply to the panel");
                                break WrapperExit::Failure;
                            }
                        }
                    }
                    Ok(None) => {
                        tracing::warn!(unique_id = self.unique_id, "panel connection closed");
                        break WrapperExit::Failure;
                    }
                    Err(FrameError::Codec(err)) => {
                        tracing::warn!(unique_id = self.unique_id, error = %err, "dropping malformed frame");
                    }
                    Err(FrameError::Io(err)) => {
                        tracing::warn!(unique_id = self.unique_id, error = %err, "panel connection failed");
                        break WrapperExit::Failure;
                    }
                },
                Some(message) = self.upstream.outbound.recv() => {
                    if let Err(err) = writer.send(&message).await {
                        tracing::warn!(unique_id = self.unique_id, error = %err, "failed to write to the panel");
                        break WrapperExit::Failure;
                    }
                }
            }
        };

        if exit.is_success() {
            while let Ok(message) = self.upstream.outbound.try_recv() {
                if writer.send(&message).await.is_err() {
                    break;
                }
            }
        }

        self.finish();
        tracing::info!(unique_id = self.unique_id, %exit, "wrapper run loop finished");
        exit
    }

    fn finish(&mut self) {
        self.provider.free_data();
        self.plug.destroy();
        let evicted = self.upstream.correlator.borrow_mut().evict(self.unique_id);
        if evicted > 0 {
            tracing::debug!(unique_id = self.unique_id, evicted, "dropped unanswered remote events");
        }
    }
}
