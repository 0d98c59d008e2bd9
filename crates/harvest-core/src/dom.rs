//! Element-tree snapshot of the host page.
//!
//! A [`DomSnapshot`] is an arena of elements keyed by [`NodeId`]. Ids are
//! stable for as long as the underlying element stays attached, so a node
//! found in one snapshot can be handed back to the host for an action and
//! looked up again in the next snapshot. Text nodes are folded into their
//! parent element's `text`.

use std::collections::{BTreeMap, HashMap};
use std::fmt;

use serde::{Deserialize, Serialize};

/// Stable handle of an element in the host page.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NodeId(pub u64);

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Bounding client rectangle in CSS pixels.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Rect {
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
}

impl Rect {
    pub fn new(x: f64, y: f64, width: f64, height: f64) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    pub fn top(&self) -> f64 {
        self.y
    }

    pub fn left(&self) -> f64 {
        self.x
    }

    pub fn bottom(&self) -> f64 {
        self.y + self.height
    }

    pub fn right(&self) -> f64 {
        self.x + self.width
    }

    pub fn is_empty(&self) -> bool {
        self.width <= 0.0 || self.height <= 0.0
    }

    pub fn translate(&self, dx: f64, dy: f64) -> Self {
        Self::new(self.x + dx, self.y + dy, self.width, self.height)
    }
}

/// The subset of computed style the engine looks at.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ComputedStyle {
    pub display: String,
    pub visibility: String,
    pub opacity: f64,
    pub overflow_y: String,
}

impl Default for ComputedStyle {
    fn default() -> Self {
        Self {
            display: "block".into(),
            visibility: "visible".into(),
            opacity: 1.0,
            overflow_y: "visible".into(),
        }
    }
}

impl ComputedStyle {
    pub fn scrolls_vertically(&self) -> bool {
        matches!(self.overflow_y.as_str(), "auto" | "scroll" | "overlay")
    }
}

/// Vertical scroll position and extent of an element.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ScrollMetrics {
    pub scroll_top: f64,
    pub scroll_height: f64,
    pub client_height: f64,
}

impl ScrollMetrics {
    pub fn new(scroll_top: f64, scroll_height: f64, client_height: f64) -> Self {
        Self {
            scroll_top,
            scroll_height,
            client_height,
        }
    }

    pub fn max_scroll_top(&self) -> f64 {
        (self.scroll_height - self.client_height).max(0.0)
    }

    pub fn overflows(&self) -> bool {
        self.scroll_height > self.client_height
    }

    pub fn at_bottom(&self, epsilon: f64) -> bool {
        (self.scroll_top + self.client_height - self.scroll_height).abs() < epsilon
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Viewport {
    pub width: f64,
    pub height: f64,
}

impl Default for Viewport {
    fn default() -> Self {
        Self {
            width: 1280.0,
            height: 900.0,
        }
    }
}

/// One element of the snapshot.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeData {
    pub id: NodeId,
    #[serde(default)]
    pub parent: Option<NodeId>,
    #[serde(default)]
    pub children: Vec<NodeId>,
    pub tag: String,
    #[serde(default)]
    pub attrs: BTreeMap<String, String>,
    /// Concatenated direct text-node children.
    #[serde(default)]
    pub text: String,
    /// Direct text nodes with their position among `children`. Empty when
    /// the element's own text precedes all of its children.
    #[serde(default)]
    pub text_runs: Vec<TextRun>,
    #[serde(default)]
    pub style: ComputedStyle,
    #[serde(default)]
    pub rect: Rect,
    #[serde(default)]
    pub scroll: ScrollMetrics,
    /// The `hidden` attribute or property is set.
    #[serde(default)]
    pub hidden: bool,
}

/// A direct text node, placed before `children[before]` (or after the last
/// child when `before == children.len()`).
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TextRun {
    pub before: usize,
    pub text: String,
}

enum Content<'a> {
    Text(&'a str),
    Child(NodeId),
}

impl NodeData {
    /// Own text and children in document order.
    fn content(&self) -> Vec<Content<'_>> {
        let mut out = Vec::with_capacity(self.children.len() + self.text_runs.len() + 1);
        if self.text_runs.is_empty() {
            if !self.text.is_empty() {
                out.push(Content::Text(&self.text));
            }
            out.extend(self.children.iter().copied().map(Content::Child));
            return out;
        }
        let mut runs = self.text_runs.iter().peekable();
        for (index, child) in self.children.iter().enumerate() {
            while let Some(run) = runs.next_if(|run| run.before <= index) {
                out.push(Content::Text(&run.text));
            }
            out.push(Content::Child(*child));
        }
        out.extend(runs.map(|run| Content::Text(&run.text)));
        out
    }

    pub fn attr(&self, name: &str) -> Option<&str> {
        self.attrs.get(name).map(String::as_str)
    }

    pub fn role(&self) -> Option<&str> {
        self.attr("role")
    }

    pub fn is_tag(&self, tag: &str) -> bool {
        self.tag.eq_ignore_ascii_case(tag)
    }

    pub fn is_heading(&self) -> bool {
        matches!(self.tag.as_str(), "h1" | "h2" | "h3" | "h4" | "h5" | "h6")
    }

    pub fn classes(&self) -> impl Iterator<Item = &str> {
        self.attr("class").unwrap_or("").split_ascii_whitespace()
    }

    pub fn has_class(&self, class: &str) -> bool {
        self.classes().any(|c| c == class)
    }

    /// `[class*="fragment"]` semantics.
    pub fn class_contains(&self, fragment: &str) -> bool {
        self.attr("class")
            .map(|value| value.contains(fragment))
            .unwrap_or(false)
    }

    /// `[style*="fragment"]` semantics on the inline style attribute.
    pub fn inline_style_contains(&self, fragment: &str) -> bool {
        self.attr("style")
            .map(|value| value.contains(fragment))
            .unwrap_or(false)
    }
}

/// Description of an element to append through [`DomSnapshot::append`].
#[derive(Clone, Debug)]
pub struct ElementSpec {
    tag: String,
    attrs: BTreeMap<String, String>,
    text: String,
    style: ComputedStyle,
    rect: Rect,
    scroll: ScrollMetrics,
    hidden: bool,
}

impl ElementSpec {
    pub fn new(tag: &str) -> Self {
        Self {
            tag: tag.to_ascii_lowercase(),
            attrs: BTreeMap::new(),
            text: String::new(),
            style: ComputedStyle::default(),
            rect: Rect::default(),
            scroll: ScrollMetrics::default(),
            hidden: false,
        }
    }

    pub fn attr(mut self, name: &str, value: &str) -> Self {
        self.attrs.insert(name.to_string(), value.to_string());
        self
    }

    pub fn class(self, value: &str) -> Self {
        self.attr("class", value)
    }

    pub fn role(self, value: &str) -> Self {
        self.attr("role", value)
    }

    pub fn text(mut self, value: &str) -> Self {
        self.text = value.to_string();
        self
    }

    pub fn rect(mut self, x: f64, y: f64, width: f64, height: f64) -> Self {
        self.rect = Rect::new(x, y, width, height);
        self
    }

    pub fn at(mut self, rect: Rect) -> Self {
        self.rect = rect;
        self
    }

    pub fn display(mut self, value: &str) -> Self {
        self.style.display = value.to_string();
        self
    }

    pub fn visibility(mut self, value: &str) -> Self {
        self.style.visibility = value.to_string();
        self
    }

    pub fn opacity(mut self, value: f64) -> Self {
        self.style.opacity = value;
        self
    }

    pub fn overflow_y(mut self, value: &str) -> Self {
        self.style.overflow_y = value.to_string();
        self
    }

    pub fn scroll(mut self, metrics: ScrollMetrics) -> Self {
        self.scroll = metrics;
        self
    }

    pub fn hidden(mut self) -> Self {
        self.hidden = true;
        self.style.display = "none".into();
        self
    }
}

#[derive(Deserialize)]
struct RawSnapshot {
    root: NodeId,
    #[serde(default)]
    viewport: Viewport,
    nodes: Vec<NodeData>,
}

#[derive(Serialize)]
struct RawSnapshotRef<'a> {
    root: NodeId,
    viewport: Viewport,
    nodes: Vec<&'a NodeData>,
}

/// Arena of elements captured at one instant.
#[derive(Clone, Debug, PartialEq)]
pub struct DomSnapshot {
    root: NodeId,
    viewport: Viewport,
    nodes: HashMap<NodeId, NodeData>,
    next_id: u64,
}

impl<'de> Deserialize<'de> for DomSnapshot {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let raw = RawSnapshot::deserialize(deserializer)?;
        let next_id = raw.nodes.iter().map(|n| n.id.0).max().unwrap_or(0) + 1;
        let nodes: HashMap<NodeId, NodeData> =
            raw.nodes.into_iter().map(|node| (node.id, node)).collect();
        if !nodes.contains_key(&raw.root) {
            return Err(serde::de::Error::custom(format!(
                "snapshot root {} missing from node list",
                raw.root
            )));
        }
        Ok(Self {
            root: raw.root,
            viewport: raw.viewport,
            nodes,
            next_id,
        })
    }
}

impl Serialize for DomSnapshot {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        let mut nodes: Vec<&NodeData> = self.nodes.values().collect();
        nodes.sort_by_key(|node| node.id);
        RawSnapshotRef {
            root: self.root,
            viewport: self.viewport,
            nodes,
        }
        .serialize(serializer)
    }
}

impl DomSnapshot {
    /// Empty document with a `body` root covering the viewport.
    pub fn new(viewport: Viewport) -> Self {
        let root = NodeId(1);
        let body = NodeData {
            id: root,
            parent: None,
            children: Vec::new(),
            tag: "body".into(),
            attrs: BTreeMap::new(),
            text: String::new(),
            text_runs: Vec::new(),
            style: ComputedStyle::default(),
            rect: Rect::new(0.0, 0.0, viewport.width, viewport.height),
            scroll: ScrollMetrics::default(),
            hidden: false,
        };
        let mut nodes = HashMap::new();
        nodes.insert(root, body);
        Self {
            root,
            viewport,
            nodes,
            next_id: 2,
        }
    }

    pub fn root(&self) -> NodeId {
        self.root
    }

    pub fn viewport(&self) -> Viewport {
        self.viewport
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn get(&self, id: NodeId) -> Option<&NodeData> {
        self.nodes.get(&id)
    }

    pub fn get_mut(&mut self, id: NodeId) -> Option<&mut NodeData> {
        self.nodes.get_mut(&id)
    }

    pub fn contains(&self, id: NodeId) -> bool {
        self.nodes.contains_key(&id)
    }

    pub fn parent(&self, id: NodeId) -> Option<NodeId> {
        self.get(id).and_then(|node| node.parent)
    }

    pub fn children(&self, id: NodeId) -> &[NodeId] {
        self.get(id)
            .map(|node| node.children.as_slice())
            .unwrap_or(&[])
    }

    /// Strict ancestors, nearest first.
    pub fn ancestors(&self, id: NodeId) -> Ancestors<'_> {
        Ancestors {
            snapshot: self,
            next: self.parent(id),
        }
    }

    pub fn is_ancestor(&self, ancestor: NodeId, node: NodeId) -> bool {
        self.ancestors(node).any(|candidate| candidate == ancestor)
    }

    /// Descendants of `scope` in document order, `scope` excluded.
    pub fn descendants(&self, scope: NodeId) -> Vec<NodeId> {
        let mut out = Vec::new();
        let mut stack: Vec<NodeId> = self.children(scope).iter().rev().copied().collect();
        while let Some(id) = stack.pop() {
            out.push(id);
            stack.extend(self.children(id).iter().rev().copied());
        }
        out
    }

    /// Document-order descendants of `scope` matching `pred`.
    pub fn find_all<F>(&self, scope: NodeId, mut pred: F) -> Vec<NodeId>
    where
        F: FnMut(&NodeData) -> bool,
    {
        self.descendants(scope)
            .into_iter()
            .filter(|id| self.get(*id).map(&mut pred).unwrap_or(false))
            .collect()
    }

    pub fn find_first<F>(&self, scope: NodeId, mut pred: F) -> Option<NodeId>
    where
        F: FnMut(&NodeData) -> bool,
    {
        self.descendants(scope)
            .into_iter()
            .find(|id| self.get(*id).map(&mut pred).unwrap_or(false))
    }

    /// `Element.closest` semantics: the node itself or its nearest matching ancestor.
    pub fn closest<F>(&self, id: NodeId, mut pred: F) -> Option<NodeId>
    where
        F: FnMut(&NodeData) -> bool,
    {
        let node = self.get(id)?;
        if pred(node) {
            return Some(id);
        }
        self.ancestors(id)
            .find(|ancestor| self.get(*ancestor).map(&mut pred).unwrap_or(false))
    }

    /// Whitespace-collapsed text of the subtree.
    pub fn text_content(&self, id: NodeId) -> String {
        self.text_excluding(id, |_| false)
    }

    /// Whitespace-collapsed text of the subtree, skipping subtrees rooted at
    /// elements for which `skip` returns true. `id` itself is never skipped.
    pub fn text_excluding<F>(&self, id: NodeId, skip: F) -> String
    where
        F: Fn(&NodeData) -> bool,
    {
        let mut pieces: Vec<&str> = Vec::new();
        let mut stack = vec![Content::Child(id)];
        while let Some(item) = stack.pop() {
            let current = match item {
                Content::Text(text) => {
                    pieces.push(text);
                    continue;
                }
                Content::Child(current) => current,
            };
            let Some(node) = self.get(current) else {
                continue;
            };
            if current != id && skip(node) {
                continue;
            }
            stack.extend(node.content().into_iter().rev());
        }
        collapse_whitespace(&pieces.join(" "))
    }

    /// Append a new element as the last child of `parent`.
    pub fn append(&mut self, parent: NodeId, spec: ElementSpec) -> NodeId {
        let id = NodeId(self.next_id);
        self.next_id += 1;
        let node = NodeData {
            id,
            parent: Some(parent),
            children: Vec::new(),
            tag: spec.tag,
            attrs: spec.attrs,
            text: spec.text,
            text_runs: Vec::new(),
            style: spec.style,
            rect: spec.rect,
            scroll: spec.scroll,
            hidden: spec.hidden,
        };
        self.nodes.insert(id, node);
        if let Some(parent_node) = self.nodes.get_mut(&parent) {
            parent_node.children.push(id);
        }
        id
    }

    /// Detach `id` and its subtree.
    pub fn remove(&mut self, id: NodeId) {
        if id == self.root {
            return;
        }
        if let Some(parent) = self.parent(id) {
            if let Some(parent_node) = self.nodes.get_mut(&parent) {
                parent_node.children.retain(|child| *child != id);
            }
        }
        let mut doomed = self.descendants(id);
        doomed.push(id);
        for node in doomed {
            self.nodes.remove(&node);
        }
    }

    pub fn clear_children(&mut self, id: NodeId) {
        for child in self.children(id).to_vec() {
            self.remove(child);
        }
    }

    pub fn set_attr(&mut self, id: NodeId, name: &str, value: &str) {
        if let Some(node) = self.nodes.get_mut(&id) {
            node.attrs.insert(name.to_string(), value.to_string());
        }
    }

    pub fn remove_attr(&mut self, id: NodeId, name: &str) {
        if let Some(node) = self.nodes.get_mut(&id) {
            node.attrs.remove(name);
        }
    }

    pub fn set_text(&mut self, id: NodeId, text: &str) {
        if let Some(node) = self.nodes.get_mut(&id) {
            node.text = text.to_string();
            node.text_runs.clear();
        }
    }

    /// Append a text node after the current last child of `id`.
    pub fn append_text(&mut self, id: NodeId, text: &str) {
        let Some(node) = self.nodes.get_mut(&id) else {
            return;
        };
        if node.text_runs.is_empty() && !node.text.is_empty() {
            node.text_runs.push(TextRun {
                before: 0,
                text: node.text.clone(),
            });
        }
        node.text_runs.push(TextRun {
            before: node.children.len(),
            text: text.to_string(),
        });
        node.text.push_str(text);
    }

    /// Toggle `display` and the `hidden` flag together.
    pub fn set_shown(&mut self, id: NodeId, shown: bool) {
        if let Some(node) = self.nodes.get_mut(&id) {
            node.hidden = !shown;
            node.style.display = if shown { "block".into() } else { "none".into() };
        }
    }
}

pub struct Ancestors<'a> {
    snapshot: &'a DomSnapshot,
    next: Option<NodeId>,
}

impl Iterator for Ancestors<'_> {
    type Item = NodeId;

    fn next(&mut self) -> Option<Self::Item> {
        let current = self.next?;
        self.next = self.snapshot.parent(current);
        Some(current)
    }
}

/// Collapse whitespace runs to a single space and trim.
pub fn collapse_whitespace(raw: &str) -> String {
    raw.split_whitespace().collect::<Vec<_>>().join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> (DomSnapshot, NodeId, NodeId, NodeId) {
        let mut dom = DomSnapshot::new(Viewport::default());
        let root = dom.root();
        let section = dom.append(root, ElementSpec::new("section").class("card panel"));
        let para = dom.append(section, ElementSpec::new("p").text("Memory is"));
        let bold = dom.append(para, ElementSpec::new("b").text("  full "));
        (dom, section, para, bold)
    }

    #[test]
    fn text_content_collapses_whitespace_across_children() {
        let (dom, section, _, _) = sample();
        assert_eq!(dom.text_content(section), "Memory is full");
    }

    #[test]
    fn closest_includes_self_and_walks_up() {
        let (dom, section, para, bold) = sample();
        assert_eq!(dom.closest(bold, |n| n.is_tag("b")), Some(bold));
        assert_eq!(dom.closest(bold, |n| n.has_class("card")), Some(section));
        assert_eq!(dom.closest(para, |n| n.is_tag("table")), None);
        assert!(dom.is_ancestor(section, bold));
    }

    #[test]
    fn remove_detaches_whole_subtree() {
        let (mut dom, section, para, bold) = sample();
        dom.remove(para);
        assert!(!dom.contains(para));
        assert!(!dom.contains(bold));
        assert!(dom.children(section).is_empty());
    }

    #[test]
    fn snapshot_deserializes_from_node_list() {
        let json = serde_json::json!({
            "root": 1,
            "viewport": { "width": 800.0, "height": 600.0 },
            "nodes": [
                { "id": 1, "tag": "body", "children": [2] },
                { "id": 2, "parent": 1, "tag": "button", "text": "Manage",
                  "attrs": { "class": "btn" },
                  "style": { "overflowY": "auto" },
                  "scroll": { "scrollTop": 0.0, "scrollHeight": 10.0, "clientHeight": 5.0 } }
            ]
        });
        let dom: DomSnapshot = serde_json::from_value(json).expect("snapshot");
        let button = dom.get(NodeId(2)).expect("button");
        assert!(button.has_class("btn"));
        assert!(button.style.scrolls_vertically());
        assert!(button.scroll.overflows());
        assert_eq!(button.style.visibility, "visible");
        assert_eq!(dom.text_content(dom.root()), "Manage");
    }

    #[test]
    fn text_content_keeps_inline_elements_in_place() {
        let mut dom = DomSnapshot::new(Viewport::default());
        let root = dom.root();
        let row = dom.append(root, ElementSpec::new("div"));
        dom.append_text(row, "Likes ");
        dom.append(row, ElementSpec::new("b").text("green"));
        dom.append_text(row, " tea daily");
        assert_eq!(dom.text_content(row), "Likes green tea daily");

        let button = dom.append(row, ElementSpec::new("button").text("Delete"));
        dom.append_text(row, "!");
        assert_eq!(
            dom.text_excluding(row, |node| node.is_tag("button")),
            "Likes green tea daily !"
        );
        assert!(dom.contains(button));
    }

    #[test]
    fn text_runs_deserialize_in_document_order() {
        let json = serde_json::json!({
            "root": 1,
            "nodes": [
                { "id": 1, "tag": "body", "children": [2] },
                { "id": 2, "parent": 1, "tag": "p", "children": [3],
                  "text": "Memory is  now",
                  "textRuns": [
                      { "before": 0, "text": "Memory is " },
                      { "before": 1, "text": " now" }
                  ] },
                { "id": 3, "parent": 2, "tag": "b", "text": "full" }
            ]
        });
        let dom: DomSnapshot = serde_json::from_value(json).expect("snapshot");
        assert_eq!(dom.text_content(NodeId(2)), "Memory is full now");
    }

    #[test]
    fn snapshot_rejects_missing_root() {
        let json = serde_json::json!({ "root": 9, "nodes": [{ "id": 1, "tag": "body" }] });
        assert!(serde_json::from_value::<DomSnapshot>(json).is_err());
    }
}
