use bladebar_core::PanelMode;
use bladebar_plugin::{
    PluginModule, PluginProvider, ProviderContext, ProviderError, ProviderInit, ProviderResult,
    ProviderSignal, Value,
};
use chrono::format::{Item, StrftimeItems};
use chrono::{Local, Utc};

pub const MODULE_NAME: &str = "clock";

/// `%R` is the 24-hour `HH:MM` time.
pub const DEFAULT_FORMAT: &str = "%R";

/// Module factory for the clock plugin.
#[derive(Debug, Clone, Copy, Default)]
pub struct ClockModule;

impl PluginModule for ClockModule {
    fn name(&self) -> &str {
        MODULE_NAME
    }

    fn new_provider(&self, init: ProviderInit) -> Option<Box<dyn PluginProvider>> {
        Some(Box::new(ClockProvider::new(init)))
    }
}

/// Shows the current time in a strftime format.
///
/// Arguments: an optional format and `--utc`. Remote events: `refresh`
/// re-renders the label, `set-format` takes a string payload.
pub struct ClockProvider {
    unique_id: u32,
    name: String,
    format: String,
    utc: bool,
    size: i32,
    mode: PanelMode,
    sensitive: bool,
    label: String,
    context: ProviderContext,
}

impl ClockProvider {
    pub fn new(init: ProviderInit) -> Self {
        let utc = init.arguments.iter().any(|arg| arg == "--utc");
        let format = match init.arguments.iter().find(|arg| !arg.starts_with("--")) {
            Some(format) => match validate_format(format) {
                Ok(()) => format.clone(),
                Err(message) => {
                    tracing::warn!(unique_id = init.unique_id, format = %format, %message, "invalid clock format, using default");
                    DEFAULT_FORMAT.to_string()
                }
            },
            None => DEFAULT_FORMAT.to_string(),
        };

        let mut provider = Self {
            unique_id: init.unique_id,
            name: init.name,
            format,
            utc,
            size: 0,
            mode: PanelMode::default(),
            sensitive: true,
            label: String::new(),
            context: init.context,
        };
        provider.render();

        provider.context.emit_signal(ProviderSignal::ShowConfigure);
        provider.context.emit_signal(ProviderSignal::ShowAbout);
        provider
    }

    pub fn format(&self) -> &str {
        &self.format
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn mode(&self) -> PanelMode {
        self.mode
    }

    pub fn size(&self) -> i32 {
        self.size
    }

    pub fn is_sensitive(&self) -> bool {
        self.sensitive
    }

    fn render(&mut self) {
        self.label = if self.utc {
            Utc::now().format(&self.format).to_string()
        } else {
            Local::now().format(&self.format).to_string()
        };
        tracing::trace!(unique_id = self.unique_id, label = %self.label, "clock updated");
    }

    fn set_format(&mut self, payload: Option<&Value>) -> ProviderResult<bool> {
        let invalid = |message: String| ProviderError::InvalidPayload {
            event: "set-format".into(),
            message,
        };
        let format = payload
            .and_then(Value::as_str)
            .ok_or_else(|| invalid("expected a string".into()))?;
        validate_format(format).map_err(invalid)?;

        self.format = format.to_string();
        self.render();
        Ok(true)
    }
}

/// Reject formats chrono cannot render.
pub fn validate_format(format: &str) -> Result<(), String> {
    if format.is_empty() {
        return Err("format is empty".into());
    }
    if StrftimeItems::new(format).any(|item| matches!(item, Item::Error)) {
        return Err(format!("{format:?} is not a valid strftime format"));
    }
    Ok(())
}

impl PluginProvider for ClockProvider {
    fn name(&self) -> &str {
        &self.name
    }

    fn unique_id(&self) -> u32 {
        self.unique_id
    }

    fn set_size(&mut self, size: i32) {
        self.size = size;
    }

    fn set_mode(&mut self, mode: PanelMode) {
        self.mode = mode;
    }

    fn set_sensitive(&mut self, sensitive: bool) {
        self.sensitive = sensitive;
    }

    fn show_configure(&mut self) {
        tracing::info!(unique_id = self.unique_id, format = %self.format, utc = self.utc, "clock settings");
    }

    fn show_about(&mut self) {
        tracing::info!(unique_id = self.unique_id, "clock: shows the current date and time");
    }

    fn ask_remove(&mut self) {
        self.context.emit_signal(ProviderSignal::RemovePlugin);
    }

    fn remote_event(&mut self, name: &str, payload: Option<&Value>) -> ProviderResult<bool> {
        match name {
            "refresh" => {
                self.render();
                Ok(true)
            }
            "set-format" => self.set_format(payload),
            _ => Ok(false),
        }
    }

    fn free_data(&mut self) {
        tracing::debug!(unique_id = self.unique_id, "clock freed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bladebar_plugin::{Message, Upstream};

    fn clock(arguments: &[&str]) -> (ClockProvider, Upstream) {
        let (context, upstream) = ProviderContext::new(3);
        let provider = ClockProvider::new(ProviderInit {
            unique_id: 3,
            name: MODULE_NAME.into(),
            display_name: "Clock".into(),
            comment: String::new(),
            arguments: arguments.iter().map(|s| s.to_string()).collect(),
            context,
        });
        (provider, upstream)
    }

    fn signals(upstream: &mut Upstream) -> Vec<ProviderSignal> {
        let mut signals = Vec::new();
        while let Ok(message) = upstream.outbound.try_recv() {
            if let Message::ProviderSignal { signal } = message {
                signals.push(signal);
            }
        }
        signals
    }

    #[test]
    fn announces_dialogs_on_construction() {
        let (provider, mut upstream) = clock(&[]);
        assert_eq!(provider.format(), DEFAULT_FORMAT);
        assert_eq!(provider.label().len(), 5);
        assert_eq!(
            signals(&mut upstream),
            vec![ProviderSignal::ShowConfigure, ProviderSignal::ShowAbout]
        );
    }

    #[test]
    fn format_and_utc_come_from_arguments() {
        let (provider, _upstream) = clock(&["--utc", "%Y"]);
        assert_eq!(provider.format(), "%Y");
        assert_eq!(provider.label().len(), 4);
    }

    #[test]
    fn invalid_format_argument_falls_back() {
        let (provider, _upstream) = clock(&["%Q%"]);
        assert_eq!(provider.format(), DEFAULT_FORMAT);
    }

    #[test]
    fn set_format_validates_payload() {
        let (mut provider, _upstream) = clock(&[]);

        assert!(provider
            .remote_event("set-format", Some(&Value::String("%H".into())))
            .unwrap());
        assert_eq!(provider.format(), "%H");
        assert_eq!(provider.label().len(), 2);

        assert!(matches!(
            provider.remote_event("set-format", None),
            Err(ProviderError::InvalidPayload { .. })
        ));
        assert!(matches!(
            provider.remote_event("set-format", Some(&Value::Int(1))),
            Err(ProviderError::InvalidPayload { .. })
        ));
        assert!(matches!(
            provider.remote_event("set-format", Some(&Value::String("%Q%".into()))),
            Err(ProviderError::InvalidPayload { .. })
        ));
        assert_eq!(provider.format(), "%H");
    }

    #[test]
    fn unknown_events_are_not_handled() {
        let (mut provider, _upstream) = clock(&[]);
        assert!(provider.remote_event("refresh", None).unwrap());
        assert!(!provider.remote_event("explode", None).unwrap());
    }

    #[test]
    fn ask_remove_requests_removal() {
        let (mut provider, mut upstream) = clock(&[]);
        signals(&mut upstream);
        provider.ask_remove();
        assert_eq!(signals(&mut upstream), vec![ProviderSignal::RemovePlugin]);
    }

    #[test]
    fn panel_properties_are_tracked() {
        let (mut provider, _upstream) = clock(&[]);
        provider.set_size(48);
        provider.set_mode(PanelMode::Deskbar);
        provider.set_sensitive(false);
        assert_eq!(provider.size(), 48);
        assert_eq!(provider.mode(), PanelMode::Deskbar);
        assert!(!provider.is_sensitive());
    }
}
