use bladebar_core::PanelMode;
use bladebar_plugin::{
    PluginModule, PluginProvider, ProviderContext, ProviderError, ProviderInit, ProviderResult,
    ProviderSignal, Value,
};
use std::fmt;
use std::str::FromStr;

pub const MODULE_NAME: &str = "separator";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SeparatorStyle {
    /// Empty gap.
    Space,
    #[default]
    Line,
    Handle,
    Dots,
    /// Takes up all free space, pushing later items to the panel's end.
    Expand,
}

impl SeparatorStyle {
    pub fn as_str(&self) -> &'static str {
        match self {
            SeparatorStyle::Space => "space",
            SeparatorStyle::Line => "line",
            SeparatorStyle::Handle => "handle",
            SeparatorStyle::Dots => "dots",
            SeparatorStyle::Expand => "expand",
        }
    }
}

impl fmt::Display for SeparatorStyle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SeparatorStyle {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "space" | "transparent" => Ok(SeparatorStyle::Space),
            "line" | "separator" => Ok(SeparatorStyle::Line),
            "handle" => Ok(SeparatorStyle::Handle),
            "dots" => Ok(SeparatorStyle::Dots),
            "expand" => Ok(SeparatorStyle::Expand),
            other => Err(format!("unknown separator style {other:?}")),
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SeparatorModule;

impl PluginModule for SeparatorModule {
    fn name(&self) -> &str {
        MODULE_NAME
    }

    fn new_provider(&self, init: ProviderInit) -> Option<Box<dyn PluginProvider>> {
        Some(Box::new(SeparatorProvider::new(init)))
    }
}

pub struct SeparatorProvider {
    unique_id: u32,
    name: String,
    style: SeparatorStyle,
    mode: PanelMode,
    size: i32,
    context: ProviderContext,
}

impl SeparatorProvider {
    pub fn new(init: ProviderInit) -> Self {
        let style = match init.arguments.first() {
            Some(arg) => arg.parse::<SeparatorStyle>().unwrap_or_else(|message: String| {
                tracing::warn!(unique_id = init.unique_id, %message, "using the default separator style");
                SeparatorStyle::default()
            }),
            None => SeparatorStyle::default(),
        };

        let provider = Self {
            unique_id: init.unique_id,
            name: init.name,
            style,
            mode: PanelMode::default(),
            size: 0,
            context: init.context,
        };

        provider.context.emit_signal(ProviderSignal::SmallPlugin);
        provider.context.emit_signal(ProviderSignal::ShowConfigure);
        if style == SeparatorStyle::Expand {
            provider.context.emit_signal(ProviderSignal::ExpandPlugin);
        }
        provider
    }

    pub fn style(&self) -> SeparatorStyle {
        self.style
    }

    pub fn mode(&self) -> PanelMode {
        self.mode
    }

    pub fn size(&self) -> i32 {
        self.size
    }

    /// Switch style, telling the panel when the item starts or stops expanding.
    pub fn set_style(&mut self, style: SeparatorStyle) {
        if style == self.style {
            return;
        }
        match (self.style, style) {
            (SeparatorStyle::Expand, _) => {
                self.context.emit_signal(ProviderSignal::CollapsePlugin);
            }
            (_, SeparatorStyle::Expand) => {
                self.context.emit_signal(ProviderSignal::ExpandPlugin);
            }
            _ => {}
        }
        tracing::debug!(unique_id = self.unique_id, from = %self.style, to = %style, "separator style changed");
        self.style = style;
    }
}

impl PluginProvider for SeparatorProvider {
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

    fn show_configure(&mut self) {
        tracing::info!(unique_id = self.unique_id, style = %self.style, "separator settings");
    }

    fn remote_event(&mut self, name: &str, payload: Option<&Value>) -> ProviderResult<bool> {
        if name != "set-style" {
            return Ok(false);
        }
        let invalid = |message: String| ProviderError::InvalidPayload {
            event: name.to_string(),
            message,
        };
        let style = payload
            .and_then(Value::as_str)
            .ok_or_else(|| invalid("expected a string".into()))?
            .parse::<SeparatorStyle>()
            .map_err(invalid)?;
        self.set_style(style);
        Ok(true)
    }
}
