//! Seam between the server and the application it lives inside. The server
//! asks the host for an element snapshot or an audio probe; everything else
//! about the UI toolkit stays on the host's side of this trait.

use serde::{Deserialize, Serialize};

/// Element id the host assigns to the transient toast/notification text.
pub const TOAST_ELEMENT_ID: &str = "message";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Point {
    pub x: i32,
    pub y: i32,
}

/// One on-screen element as the host reports it: toolkit id, visible text,
/// and the center of its bounds in screen coordinates.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UiElement {
    pub id: String,
    pub text: String,
    pub center: Point,
}

impl UiElement {
    pub fn new(id: impl Into<String>, text: impl Into<String>, x: i32, y: i32) -> UiElement {
        UiElement {
            id: id.into(),
            text: text.into(),
            center: Point { x, y },
        }
    }
}

/// What the embedding application exposes to the server.
///
/// Implementations must be callable from worker threads; `elements` should
/// return quickly since the finder polls it in a loop.
pub trait HostContext: Send + Sync {
    /// Process-level hooks (instrumentation patching, crash handlers,
    /// metadata collection). Runs at most once per server, from the first
    /// `install`.
    fn initialize(&self) {}

    /// Snapshot of the elements currently on screen, in draw order. The
    /// last element with the toast id is taken as the most recent toast.
    fn elements(&self) -> Vec<UiElement>;

    /// Whether the sound-output subsystem is currently playing.
    fn audio_active(&self) -> bool {
        false
    }
}
