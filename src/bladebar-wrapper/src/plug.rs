//! The window a provider is embedded into.
//!
//! Only the narrow surface the wrapper drives is modelled here. The headless
//! implementation keeps the state in memory so a wrapper runs without a
//! display server.

use bladebar_plugin::PluginProvider;

/// Background the plug currently paints.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum Background {
    #[default]
    Unset,
    Color(String),
    Image(String),
}

/// Top-level window of a wrapper, embedded into the panel's socket window.
pub trait Plug {
    fn socket_id(&self) -> u64;

    fn set_background_alpha(&mut self, alpha: f64);

    /// `None` unsets the background entirely.
    fn set_background_color(&mut self, color: Option<&str>);

    fn set_background_image(&mut self, image: Option<&str>);

    fn background(&self) -> &Background;

    fn background_alpha(&self) -> f64;

    /// Tear the window down; called once after the run loop ends.
    fn destroy(&mut self) {}
}

/// Creates plugs for constructed providers.
pub trait Embedder {
    fn embed(&self, socket_id: u64, provider: &dyn PluginProvider) -> Box<dyn Plug>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct HeadlessEmbedder;

impl Embedder for HeadlessEmbedder {
    fn embed(&self, socket_id: u64, provider: &dyn PluginProvider) -> Box<dyn Plug> {
        tracing::debug!(socket_id, plugin = provider.name(), "embedding plugin headless");
        Box::new(HeadlessPlug::new(socket_id))
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct HeadlessPlug {
    socket_id: u64,
    alpha: f64,
    background: Background,
    destroyed: bool,
}

impl HeadlessPlug {
    pub fn new(socket_id: u64) -> Self {
        Self {
            socket_id,
            alpha: 1.0,
            background: Background::Unset,
            destroyed: false,
        }
    }

    pub fn is_destroyed(&self) -> bool {
        self.destroyed
    }
}

impl Plug for HeadlessPlug {
    fn socket_id(&self) -> u64 {
        self.socket_id
    }

    fn set_background_alpha(&mut self, alpha: f64) {
        self.alpha = alpha.clamp(0.0, 1.0);
    }

    fn set_background_color(&mut self, color: Option<&str>) {
        self.background = match color {
            Some(color) => Background::Color(color.to_string()),
            None => Background::Unset,
        };
    }

    fn set_background_image(&mut self, image: Option<&str>) {
        match image {
            Some(image) => self.background = Background::Image(image.to_string()),
            None if matches!(self.background, Background::Image(_)) => {
                self.background = Background::Unset
            }
            None => {}
        }
    }

    fn background(&self) -> &Background {
        &self.background
    }

    fn background_alpha(&self) -> f64 {
        self.alpha
    }

    fn destroy(&mut self) {
        self.destroyed = true;
    }
}
