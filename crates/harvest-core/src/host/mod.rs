//! Host page abstraction.
//!
//! The engine never touches a browser directly. Everything it reads comes
//! from [`HostPage::snapshot`] and everything it does goes through the other
//! methods, so the same flow drives a live CDP session or the in-memory page
//! used by tests and dry runs.

pub mod demo;
pub mod memory;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use crate::dom::{DomSnapshot, NodeId};
use crate::errors::HostError;

/// Notification that the page's element tree changed.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct MutationTick(pub u64);

/// Pointer and mouse event types dispatched by the click driver.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PointerEventKind {
    PointerOver,
    MouseOver,
    PointerEnter,
    MouseEnter,
    PointerDown,
    MouseDown,
    PointerUp,
    MouseUp,
    Click,
}

impl PointerEventKind {
    /// DOM event type name.
    pub fn dom_type(&self) -> &'static str {
        match self {
            PointerEventKind::PointerOver => "pointerover",
            PointerEventKind::MouseOver => "mouseover",
            PointerEventKind::PointerEnter => "pointerenter",
            PointerEventKind::MouseEnter => "mouseenter",
            PointerEventKind::PointerDown => "pointerdown",
            PointerEventKind::MouseDown => "mousedown",
            PointerEventKind::PointerUp => "pointerup",
            PointerEventKind::MouseUp => "mouseup",
            PointerEventKind::Click => "click",
        }
    }

    pub fn is_pointer(&self) -> bool {
        matches!(
            self,
            PointerEventKind::PointerOver
                | PointerEventKind::PointerEnter
                | PointerEventKind::PointerDown
                | PointerEventKind::PointerUp
        )
    }

    /// `enter` events do not bubble.
    pub fn bubbles(&self) -> bool {
        !matches!(
            self,
            PointerEventKind::PointerEnter | PointerEventKind::MouseEnter
        )
    }

    /// Primary button state while the event fires.
    pub fn buttons(&self) -> u8 {
        match self {
            PointerEventKind::PointerDown | PointerEventKind::MouseDown => 1,
            _ => 0,
        }
    }
}

/// A synthetic event at a viewport coordinate.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InteractionEvent {
    pub kind: PointerEventKind,
    pub client_x: f64,
    pub client_y: f64,
}

/// Capabilities the engine needs from the page it drives.
#[async_trait]
pub trait HostPage: Send + Sync {
    /// Capture the current element tree.
    async fn snapshot(&self) -> Result<DomSnapshot, HostError>;

    /// Current page URL.
    async fn location(&self) -> Result<String, HostError>;

    /// Full navigation to `url`.
    async fn navigate(&self, url: &str) -> Result<(), HostError>;

    /// Replace only the URL fragment; `fragment` includes the leading `#`.
    async fn set_fragment(&self, fragment: &str) -> Result<(), HostError>;

    async fn scroll_into_view(&self, node: NodeId) -> Result<(), HostError>;

    async fn set_scroll_top(&self, node: NodeId, top: f64) -> Result<(), HostError>;

    async fn focus(&self, node: NodeId) -> Result<(), HostError>;

    async fn dispatch(&self, node: NodeId, event: InteractionEvent) -> Result<(), HostError>;

    /// Resolve after the next rendering frame.
    async fn next_frame(&self) -> Result<(), HostError>;

    /// Subscribe to element-tree change notifications.
    fn mutations(&self) -> broadcast::Receiver<MutationTick>;

    async fn write_clipboard(&self, text: &str) -> Result<(), HostError>;
}
