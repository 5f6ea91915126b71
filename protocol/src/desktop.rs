use serde::Deserialize;
use serde::Serialize;

use crate::mission::MissionId;

/// Capability tier a desktop action belongs to. The permission bridge
/// gates on the class, never on individual actions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CapabilityClass {
    /// Observation only; always permitted.
    ReadOnly,
    /// Synthesizes user input (mouse/keyboard).
    Input,
    /// Manipulates windows.
    WindowManagement,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Region {
    pub x: i32,
    pub y: i32,
    pub width: u32,
    pub height: u32,
}

/// A desktop-automation primitive with its parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DesktopAction {
    Screenshot {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        region: Option<Region>,
    },
    Click {
        x: i32,
        y: i32,
    },
    DoubleClick {
        x: i32,
        y: i32,
    },
    RightClick {
        x: i32,
        y: i32,
    },
    TypeText {
        text: String,
        #[serde(default)]
        interval_ms: u64,
    },
    Hotkey {
        keys: Vec<String>,
    },
    MoveMouse {
        x: i32,
        y: i32,
    },
    Scroll {
        clicks: i32,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        x: Option<i32>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        y: Option<i32>,
    },
    Drag {
        from_x: i32,
        from_y: i32,
        to_x: i32,
        to_y: i32,
        #[serde(default)]
        duration_ms: u64,
    },
    CursorPosition,
    ScreenSize,
    ActiveWindow,
    ListWindows,
    FocusWindow {
        title: String,
    },
    MinimizeWindow {
        title: String,
    },
    MaximizeWindow {
        title: String,
    },
    CloseWindow {
        title: String,
    },
    ResizeWindow {
        title: String,
        width: u32,
        height: u32,
    },
    MoveWindow {
        title: String,
        x: i32,
        y: i32,
    },
}

impl DesktopAction {
    pub fn capability(&self) -> CapabilityClass {
        match self {
            DesktopAction::Screenshot { .. }
            | DesktopAction::CursorPosition
            | DesktopAction::ScreenSize
            | DesktopAction::ActiveWindow
            | DesktopAction::ListWindows => CapabilityClass::ReadOnly,
            DesktopAction::Click { .. }
            | DesktopAction::DoubleClick { .. }
            | DesktopAction::RightClick { .. }
            | DesktopAction::TypeText { .. }
            | DesktopAction::Hotkey { .. }
            | DesktopAction::MoveMouse { .. }
            | DesktopAction::Scroll { .. }
            | DesktopAction::Drag { .. } => CapabilityClass::Input,
            DesktopAction::FocusWindow { .. }
            | DesktopAction::MinimizeWindow { .. }
            | DesktopAction::MaximizeWindow { .. }
            | DesktopAction::CloseWindow { .. }
            | DesktopAction::ResizeWindow { .. }
            | DesktopAction::MoveWindow { .. } => CapabilityClass::WindowManagement,
        }
    }

    /// Stable wire name, used in results and audit messages.
    pub fn name(&self) -> &'static str {
        match self {
            DesktopAction::Screenshot { .. } => "screenshot",
            DesktopAction::Click { .. } => "click",
            DesktopAction::DoubleClick { .. } => "double_click",
            DesktopAction::RightClick { .. } => "right_click",
            DesktopAction::TypeText { .. } => "type_text",
            DesktopAction::Hotkey { .. } => "hotkey",
            DesktopAction::MoveMouse { .. } => "move_mouse",
            DesktopAction::Scroll { .. } => "scroll",
            DesktopAction::Drag { .. } => "drag",
            DesktopAction::CursorPosition => "cursor_position",
            DesktopAction::ScreenSize => "screen_size",
            DesktopAction::ActiveWindow => "active_window",
            DesktopAction::ListWindows => "list_windows",
            DesktopAction::FocusWindow { .. } => "focus_window",
            DesktopAction::MinimizeWindow { .. } => "minimize_window",
            DesktopAction::MaximizeWindow { .. } => "maximize_window",
            DesktopAction::CloseWindow { .. } => "close_window",
            DesktopAction::ResizeWindow { .. } => "resize_window",
            DesktopAction::MoveWindow { .. } => "move_window",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DesktopRequest {
    pub id: String,
    pub mission_id: MissionId,
    pub action: DesktopAction,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DesktopResult {
    pub request_id: String,
    pub mission_id: MissionId,
    pub action: String,
    pub success: bool,
    /// Capability payload (image data, window list, coordinates, ...),
    /// opaque to the core.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub duration_ms: u64,
}
