//! User interface rendering and input handling.
//!
//! - **renderer**: frame painting for the host area, panel, status bar,
//!   and overlays
//! - **keymapper**: keyboard input to PTY byte sequence mapping

pub mod keymapper;
pub mod renderer;

pub use keymapper::KeyMapper;
pub use renderer::{PanelRenderer, PanelView};
