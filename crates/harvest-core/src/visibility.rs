//! Visibility oracle shared by every lookup.

use crate::dom::{DomSnapshot, NodeData, NodeId};

/// An element is visible when it is attached, rendered, opaque, has a
/// non-empty box and overlaps the viewport.
///
/// An ancestor with `display: none` hides the whole subtree, which a real
/// layout engine expresses as a zero-size box.
pub fn is_visible(snapshot: &DomSnapshot, id: NodeId) -> bool {
    let Some(node) = snapshot.get(id) else {
        return false;
    };
    if !is_rendered(node) {
        return false;
    }
    if snapshot
        .ancestors(id)
        .filter_map(|ancestor| snapshot.get(ancestor))
        .any(|ancestor| ancestor.hidden || ancestor.style.display == "none")
    {
        return false;
    }

    let rect = node.rect;
    if rect.is_empty() {
        return false;
    }
    let viewport = snapshot.viewport();
    rect.bottom() >= 0.0
        && rect.right() >= 0.0
        && rect.top() <= viewport.height
        && rect.left() <= viewport.width
}

fn is_rendered(node: &NodeData) -> bool {
    !node.hidden
        && node.style.display != "none"
        && node.style.visibility != "hidden"
        && node.style.opacity > 0.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dom::{ElementSpec, Viewport};

    fn dom() -> DomSnapshot {
        DomSnapshot::new(Viewport {
            width: 1000.0,
            height: 800.0,
        })
    }

    #[test]
    fn plain_box_in_viewport_is_visible() {
        let mut dom = dom();
        let root = dom.root();
        let node = dom.append(root, ElementSpec::new("div").rect(10.0, 10.0, 100.0, 20.0));
        assert!(is_visible(&dom, node));
    }

    #[test]
    fn style_rules_hide_elements() {
        let mut dom = dom();
        let root = dom.root();
        let none = dom.append(root, ElementSpec::new("div").rect(0.0, 0.0, 10.0, 10.0).display("none"));
        let hidden = dom.append(
            root,
            ElementSpec::new("div").rect(0.0, 0.0, 10.0, 10.0).visibility("hidden"),
        );
        let clear = dom.append(root, ElementSpec::new("div").rect(0.0, 0.0, 10.0, 10.0).opacity(0.0));
        let empty = dom.append(root, ElementSpec::new("div").rect(0.0, 0.0, 0.0, 10.0));
        for id in [none, hidden, clear, empty] {
            assert!(!is_visible(&dom, id), "{id} should be hidden");
        }
    }

    #[test]
    fn boxes_outside_viewport_are_hidden() {
        let mut dom = dom();
        let root = dom.root();
        let below = dom.append(root, ElementSpec::new("div").rect(0.0, 801.0, 10.0, 10.0));
        let left = dom.append(root, ElementSpec::new("div").rect(-50.0, 0.0, 10.0, 10.0));
        let edge = dom.append(root, ElementSpec::new("div").rect(0.0, 800.0, 10.0, 10.0));
        assert!(!is_visible(&dom, below));
        assert!(!is_visible(&dom, left));
        assert!(is_visible(&dom, edge));
    }

    #[test]
    fn hidden_ancestor_hides_subtree() {
        let mut dom = dom();
        let root = dom.root();
        let panel = dom.append(root, ElementSpec::new("div").rect(0.0, 0.0, 100.0, 100.0).hidden());
        let child = dom.append(panel, ElementSpec::new("span").rect(0.0, 0.0, 50.0, 10.0));
        assert!(!is_visible(&dom, child));
        dom.set_shown(panel, true);
        assert!(is_visible(&dom, child));
    }

    #[test]
    fn detached_nodes_are_not_visible() {
        let dom = dom();
        assert!(!is_visible(&dom, NodeId(4242)));
    }
}
