//! Shared styling for the display surface.

use egui::{Color32, Frame, Stroke};

use crate::session::ConnectionState;

/// Dark palette of the message board.
pub struct UiColors;

impl UiColors {
    /// Primary background color for main content areas (RGB: 30, 30, 30)
    pub const MAIN_BG: Color32 = Color32::from_rgb(30, 30, 30);

    /// Background of the message area (RGB: 25, 25, 25)
    pub const INNER_BG: Color32 = Color32::from_rgb(25, 25, 25);

    /// Border color for component separation (RGB: 60, 60, 60)
    pub const BORDER: Color32 = Color32::from_rgb(60, 60, 60);

    /// Connected indicator - Green
    pub const ACTIVE: Color32 = Color32::from_rgb(50, 200, 20);

    /// Connecting/disconnecting indicator - Amber
    pub const PENDING: Color32 = Color32::from_rgb(220, 170, 20);

    /// Disconnected indicator - Red
    pub const INACTIVE: Color32 = Color32::from_rgb(200, 50, 20);
}

pub fn status_color(state: ConnectionState) -> Color32 {
    match state {
        ConnectionState::Connected => UiColors::ACTIVE,
        ConnectionState::Connecting | ConnectionState::Disconnecting => UiColors::PENDING,
        ConnectionState::Disconnected => UiColors::INACTIVE,
    }
}

pub fn create_frame(bg_color: Color32, border_color: Color32) -> Frame {
    Frame::new()
        .stroke(Stroke::new(1.0, border_color))
        .fill(bg_color)
        .inner_margin(4)
        .outer_margin(2)
}
