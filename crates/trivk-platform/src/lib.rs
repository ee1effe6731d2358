// SPDX-License-Identifier: CEPL-1.0
//! Window-system glue. Re-exports winit so the app depends on a single version.
pub use winit;

use tracing::debug;
use winit::dpi::LogicalSize;
use winit::window::{Window, WindowAttributes};

pub const DEFAULT_TITLE: &str = "trivk";
pub const DEFAULT_WIDTH: u32 = 1024;
pub const DEFAULT_HEIGHT: u32 = 768;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct WindowSpec {
    pub title: String,
    pub width: u32,
    pub height: u32,
}

impl Default for WindowSpec {
    fn default() -> Self {
        Self {
            title: DEFAULT_TITLE.to_owned(),
            width: DEFAULT_WIDTH,
            height: DEFAULT_HEIGHT,
        }
    }
}

impl WindowSpec {
    pub fn attributes(&self) -> WindowAttributes {
        debug!(
            "window attributes: \"{}\" {}x{}",
            self.title, self.width, self.height
        );
        Window::default_attributes()
            .with_title(self.title.clone())
            .with_inner_size(LogicalSize::new(self.width, self.height))
            .with_resizable(true)
    }
}

/// Size of the drawable area in physical pixels.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct DrawableSize {
    pub width: u32,
    pub height: u32,
}

impl DrawableSize {
    /// Minimized windows report a zero-area drawable.
    pub fn is_empty(self) -> bool {
        self.width == 0 || self.height == 0
    }
}

pub fn drawable_size(window: &Window) -> DrawableSize {
    let size = window.inner_size();
    DrawableSize {
        width: size.width,
        height: size.height,
    }
}
