//! Platform layer: the winit window and keyboard input.
//!
//! Surface creation lives in the RHI; this crate only hands out the raw
//! display and window handles it needs.

mod input;
mod window;

pub use input::{Action, InputState, KeyCode};
pub use window::Window;
