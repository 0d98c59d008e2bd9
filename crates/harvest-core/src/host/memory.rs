//! In-memory host page.
//!
//! Holds a mutable [`DomSnapshot`] and a set of reactions that play the part
//! of the page's own scripts: a navigation that reveals a dialog, a click
//! that activates a panel, a scroll that re-renders a virtualized list.
//! Every change is broadcast as a [`MutationTick`].

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::broadcast;
use tracing::debug;

use super::{HostPage, InteractionEvent, MutationTick, PointerEventKind};
use crate::dom::{DomSnapshot, NodeId};
use crate::errors::HostError;

pub type DomReaction = Arc<dyn Fn(&mut DomSnapshot) + Send + Sync>;
pub type LocationReaction = Arc<dyn Fn(&mut DomSnapshot, &str) + Send + Sync>;
pub type ScrollReaction = Arc<dyn Fn(&mut DomSnapshot, NodeId, f64) + Send + Sync>;

#[derive(Clone)]
struct ClickReaction {
    delay: Duration,
    apply: DomReaction,
}

struct PageState {
    dom: DomSnapshot,
    location: String,
    clipboard: Option<String>,
    clipboard_fails: bool,
    focused: Option<NodeId>,
    events: Vec<(NodeId, PointerEventKind)>,
    navigations: Vec<String>,
    snapshots: u64,
}

struct Inner {
    state: Mutex<PageState>,
    ticks: broadcast::Sender<MutationTick>,
    seq: AtomicU64,
    on_location: Mutex<Vec<(String, LocationReaction)>>,
    on_click: Mutex<HashMap<NodeId, ClickReaction>>,
    on_scroll: Mutex<HashMap<NodeId, ScrollReaction>>,
}

impl Inner {
    fn tick(&self) {
        let seq = self.seq.fetch_add(1, Ordering::Relaxed);
        // No subscribers is fine.
        let _ = self.ticks.send(MutationTick(seq));
    }

    fn apply(&self, reaction: &DomReaction) {
        {
            let mut state = self.state.lock();
            reaction(&mut state.dom);
        }
        self.tick();
    }

    fn change_location(&self, url: String) {
        let reactions: Vec<LocationReaction> = self
            .on_location
            .lock()
            .iter()
            .filter(|(pattern, _)| url.contains(pattern.as_str()))
            .map(|(_, reaction)| reaction.clone())
            .collect();
        {
            let mut state = self.state.lock();
            state.location = url.clone();
            state.navigations.push(url.clone());
            for reaction in &reactions {
                reaction(&mut state.dom, &url);
            }
        }
        self.tick();
    }
}

/// Scriptable page backed by an owned element tree.
#[derive(Clone)]
pub struct MemoryHost {
    inner: Arc<Inner>,
    frame: Duration,
}

impl MemoryHost {
    pub fn new(dom: DomSnapshot, location: &str) -> Self {
        let (ticks, _) = broadcast::channel(256);
        Self {
            inner: Arc::new(Inner {
                state: Mutex::new(PageState {
                    dom,
                    location: location.to_string(),
                    clipboard: None,
                    clipboard_fails: false,
                    focused: None,
                    events: Vec::new(),
                    navigations: Vec::new(),
                    snapshots: 0,
                }),
                ticks,
                seq: AtomicU64::new(0),
                on_location: Mutex::new(Vec::new()),
                on_click: Mutex::new(HashMap::new()),
                on_scroll: Mutex::new(HashMap::new()),
            }),
            frame: Duration::from_millis(16),
        }
    }

    pub fn with_frame_interval(mut self, frame: Duration) -> Self {
        self.frame = frame;
        self
    }

    /// Run `reaction` whenever the location changes to a URL containing `pattern`.
    pub fn on_location<F>(&self, pattern: &str, reaction: F)
    where
        F: Fn(&mut DomSnapshot, &str) + Send + Sync + 'static,
    {
        self.inner
            .on_location
            .lock()
            .push((pattern.to_string(), Arc::new(reaction)));
    }

    /// Run `reaction` `delay` after `node` receives a click.
    pub fn on_click<F>(&self, node: NodeId, delay: Duration, reaction: F)
    where
        F: Fn(&mut DomSnapshot) + Send + Sync + 'static,
    {
        self.inner.on_click.lock().insert(
            node,
            ClickReaction {
                delay,
                apply: Arc::new(reaction),
            },
        );
    }

    /// Run `reaction` after the scroll offset of `node` changes.
    pub fn on_scroll<F>(&self, node: NodeId, reaction: F)
    where
        F: Fn(&mut DomSnapshot, NodeId, f64) + Send + Sync + 'static,
    {
        self.inner.on_scroll.lock().insert(node, Arc::new(reaction));
    }

    /// Apply an out-of-band change and notify observers.
    pub fn mutate<F>(&self, change: F)
    where
        F: FnOnce(&mut DomSnapshot),
    {
        {
            let mut state = self.inner.state.lock();
            change(&mut state.dom);
        }
        self.inner.tick();
    }

    pub fn fail_clipboard(&self, fails: bool) {
        self.inner.state.lock().clipboard_fails = fails;
    }

    pub fn clipboard(&self) -> Option<String> {
        self.inner.state.lock().clipboard.clone()
    }

    pub fn current_location(&self) -> String {
        self.inner.state.lock().location.clone()
    }

    pub fn navigations(&self) -> Vec<String> {
        self.inner.state.lock().navigations.clone()
    }

    pub fn focused(&self) -> Option<NodeId> {
        self.inner.state.lock().focused
    }

    /// Events dispatched to `node`, in order.
    pub fn events_for(&self, node: NodeId) -> Vec<PointerEventKind> {
        self.inner
            .state
            .lock()
            .events
            .iter()
            .filter(|(target, _)| *target == node)
            .map(|(_, kind)| *kind)
            .collect()
    }

    pub fn snapshot_count(&self) -> u64 {
        self.inner.state.lock().snapshots
    }

    pub fn receiver_count(&self) -> usize {
        self.inner.ticks.receiver_count()
    }

    fn require_node(state: &PageState, node: NodeId) -> Result<(), HostError> {
        if state.dom.contains(node) {
            Ok(())
        } else {
            Err(HostError::new(format!("node {node} is detached")))
        }
    }
}

#[async_trait]
impl HostPage for MemoryHost {
    async fn snapshot(&self) -> Result<DomSnapshot, HostError> {
        let mut state = self.inner.state.lock();
        state.snapshots += 1;
        Ok(state.dom.clone())
    }

    async fn location(&self) -> Result<String, HostError> {
        Ok(self.current_location())
    }

    async fn navigate(&self, url: &str) -> Result<(), HostError> {
        debug!(url, "memory host navigate");
        self.inner.change_location(url.to_string());
        Ok(())
    }

    async fn set_fragment(&self, fragment: &str) -> Result<(), HostError> {
        let current = self.current_location();
        let base = current.split('#').next().unwrap_or_default();
        let fragment = fragment.trim_start_matches('#');
        self.inner.change_location(format!("{base}#{fragment}"));
        Ok(())
    }

    async fn scroll_into_view(&self, node: NodeId) -> Result<(), HostError> {
        let state = self.inner.state.lock();
        Self::require_node(&state, node)
    }

    async fn set_scroll_top(&self, node: NodeId, top: f64) -> Result<(), HostError> {
        let reaction = self.inner.on_scroll.lock().get(&node).cloned();
        {
            let mut state = self.inner.state.lock();
            Self::require_node(&state, node)?;
            let mut applied = top;
            if let Some(data) = state.dom.get_mut(node) {
                applied = top.clamp(0.0, data.scroll.max_scroll_top());
                data.scroll.scroll_top = applied;
            }
            if let Some(reaction) = reaction {
                reaction(&mut state.dom, node, applied);
            }
        }
        self.inner.tick();
        Ok(())
    }

    async fn focus(&self, node: NodeId) -> Result<(), HostError> {
        let mut state = self.inner.state.lock();
        Self::require_node(&state, node)?;
        state.focused = Some(node);
        Ok(())
    }

    async fn dispatch(&self, node: NodeId, event: InteractionEvent) -> Result<(), HostError> {
        {
            let mut state = self.inner.state.lock();
            Self::require_node(&state, node)?;
            state.events.push((node, event.kind));
        }
        if event.kind != PointerEventKind::Click {
            return Ok(());
        }

        let reaction = self.inner.on_click.lock().get(&node).cloned();
        if let Some(reaction) = reaction {
            if reaction.delay.is_zero() {
                self.inner.apply(&reaction.apply);
            } else {
                let inner = Arc::clone(&self.inner);
                tokio::spawn(async move {
                    tokio::time::sleep(reaction.delay).await;
                    inner.apply(&reaction.apply);
                });
            }
        }
        Ok(())
    }

    async fn next_frame(&self) -> Result<(), HostError> {
        tokio::time::sleep(self.frame).await;
        Ok(())
    }

    fn mutations(&self) -> broadcast::Receiver<MutationTick> {
        self.inner.ticks.subscribe()
    }

    async fn write_clipboard(&self, text: &str) -> Result<(), HostError> {
        let mut state = self.inner.state.lock();
        if state.clipboard_fails {
            return Err(HostError::new("clipboard write denied"));
        }
        state.clipboard = Some(text.to_string());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dom::{ElementSpec, ScrollMetrics, Viewport};

    fn host() -> (MemoryHost, NodeId) {
        let mut dom = DomSnapshot::new(Viewport::default());
        let root = dom.root();
        let list = dom.append(
            root,
            ElementSpec::new("div")
                .rect(0.0, 0.0, 200.0, 100.0)
                .scroll(ScrollMetrics::new(0.0, 300.0, 100.0)),
        );
        (MemoryHost::new(dom, "https://chatgpt.com/"), list)
    }

    #[tokio::test]
    async fn scroll_is_clamped_and_broadcast() {
        let (host, list) = host();
        let mut ticks = host.mutations();
        host.set_scroll_top(list, 999.0).await.unwrap();
        assert!(ticks.recv().await.is_ok());
        let snap = host.snapshot().await.unwrap();
        assert_eq!(snap.get(list).unwrap().scroll.scroll_top, 200.0);
    }

    #[tokio::test]
    async fn set_fragment_keeps_base_url() {
        let (host, _) = host();
        host.navigate("https://chatgpt.com/c/abc#old").await.unwrap();
        host.set_fragment("#settings/Personalization").await.unwrap();
        assert_eq!(
            host.current_location(),
            "https://chatgpt.com/c/abc#settings/Personalization"
        );
    }

    #[tokio::test(start_paused = true)]
    async fn delayed_click_reaction_fires_later() {
        let (host, list) = host();
        host.on_click(list, Duration::from_millis(200), |dom| {
            let root = dom.root();
            dom.append(root, ElementSpec::new("dialog"));
        });
        let before = host.snapshot().await.unwrap().len();
        host.dispatch(
            list,
            InteractionEvent {
                kind: PointerEventKind::Click,
                client_x: 1.0,
                client_y: 1.0,
            },
        )
        .await
        .unwrap();
        assert_eq!(host.snapshot().await.unwrap().len(), before);
        tokio::time::sleep(Duration::from_millis(250)).await;
        assert_eq!(host.snapshot().await.unwrap().len(), before + 1);
    }

    #[tokio::test]
    async fn actions_on_detached_nodes_fail() {
        let (host, _) = host();
        assert!(host.focus(NodeId(999)).await.is_err());
        host.fail_clipboard(true);
        assert!(host.write_clipboard("x").await.is_err());
    }
}
