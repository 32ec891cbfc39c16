//! Actions accepted by the controller queue

use std::fmt;

use crate::action_queue::ActionId;
use crate::unit::SwipeStep;

/// A unit of work run on the controller's worker
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    Connect,
    Click { x: i32, y: i32 },
    Swipe { steps: Vec<SwipeStep> },
    PressKey { key: i32 },
    Screencap,
    StartApp { intent: String },
    StopApp { intent: String },
}

impl Action {
    pub fn name(&self) -> &'static str {
        match self {
            Action::Connect => "connect",
            Action::Click { .. } => "click",
            Action::Swipe { .. } => "swipe",
            Action::PressKey { .. } => "press_key",
            Action::Screencap => "screencap",
            Action::StartApp { .. } => "start_app",
            Action::StopApp { .. } => "stop_app",
        }
    }
}

/// An action together with the id it was posted under
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActionRecord {
    pub id: ActionId,
    pub action: Action,
}

impl fmt::Display for ActionRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{} {}", self.id, self.action.name())
    }
}

/// Axis-aligned rectangle in screen coordinates
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Rect {
    pub x: i32,
    pub y: i32,
    pub width: i32,
    pub height: i32,
}

impl Rect {
    pub fn new(x: i32, y: i32, width: i32, height: i32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    pub fn contains(&self, x: i32, y: i32) -> bool {
        x >= self.x && x < self.x + self.width.max(1) && y >= self.y && y < self.y + self.height.max(1)
    }
}

/// Device events reported while actions run
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ControllerEvent {
    ActionStarted { id: ActionId, uuid: Option<String> },
    ActionCompleted { id: ActionId, uuid: Option<String> },
    ActionFailed { id: ActionId, uuid: Option<String> },
    UuidGot { uuid: String },
    ResolutionGot { width: i32, height: i32 },
    ScreencapInited,
    TouchInputInited,
    ConnectSuccess,
    ConnectFailed { why: String },
}
