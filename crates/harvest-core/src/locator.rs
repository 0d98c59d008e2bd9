//! Record container and scroll host discovery inside the dialog.

use serde::{Deserialize, Serialize};

use crate::dom::{DomSnapshot, NodeData, NodeId};

/// Minimum number of same-tag siblings that make a plausible row list.
const MIN_ROW_SIBLINGS: usize = 5;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HarvestMode {
    Table,
    RowList,
    Fallback,
}

/// Where records live and which element scrolls them.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ContainerDescriptor {
    pub record_container: Option<NodeId>,
    pub scroll_host: NodeId,
    pub mode: HarvestMode,
}

fn is_table(node: &NodeData) -> bool {
    node.is_tag("table") || matches!(node.role(), Some("table") | Some("grid"))
}

/// `[class*="overflow-y"]`, `[style*="overflow-y"]` or a scrolling computed style.
fn declares_vertical_overflow(node: &NodeData) -> bool {
    node.class_contains("overflow-y")
        || node.class_contains("overflow-auto")
        || node.inline_style_contains("overflow-y")
        || node.style.scrolls_vertically()
}

fn is_scroll_candidate(node: &NodeData) -> bool {
    declares_vertical_overflow(node) || node.scroll.overflows()
}

/// Element under `scope` (inclusive) that has enough same-tag children to
/// look like a list of rows.
fn row_parent(snapshot: &DomSnapshot, scope: NodeId) -> Option<NodeId> {
    std::iter::once(scope)
        .chain(snapshot.descendants(scope))
        .find(|id| has_row_children(snapshot, *id))
}

fn has_row_children(snapshot: &DomSnapshot, id: NodeId) -> bool {
    let children = snapshot.children(id);
    if children.len() < MIN_ROW_SIBLINGS {
        return children
            .iter()
            .filter_map(|child| snapshot.get(*child))
            .any(|child| child.role() == Some("row"));
    }
    let Some(first_tag) = children.first().and_then(|c| snapshot.get(*c)).map(|n| n.tag.as_str())
    else {
        return false;
    };
    children
        .iter()
        .filter_map(|child| snapshot.get(*child))
        .filter(|child| child.tag == first_tag)
        .count()
        >= MIN_ROW_SIBLINGS
}

/// Find the list inside `modal`.
///
/// 1. A table: its nearest ancestor declaring vertical overflow scrolls it,
///    else its nearest overflowing ancestor, else the dialog itself
/// 2. An overflow candidate holding row-like children
/// 3. Nothing recognizable: rows are collected from the whole dialog
pub fn locate(snapshot: &DomSnapshot, modal: NodeId) -> ContainerDescriptor {
    if let Some(table) = snapshot.find_first(modal, is_table) {
        let within_modal = |id: &NodeId| *id == modal || snapshot.is_ancestor(modal, *id);
        let scroll_host = snapshot
            .closest(table, declares_vertical_overflow)
            .filter(within_modal)
            .or_else(|| {
                snapshot
                    .closest(table, |node| node.scroll.overflows())
                    .filter(within_modal)
            })
            .unwrap_or(modal);
        return ContainerDescriptor {
            record_container: Some(table),
            scroll_host,
            mode: HarvestMode::Table,
        };
    }

    let candidates = std::iter::once(modal)
        .chain(snapshot.descendants(modal))
        .filter(|id| snapshot.get(*id).map(is_scroll_candidate).unwrap_or(false));
    for candidate in candidates {
        if let Some(rows) = row_parent(snapshot, candidate) {
            return ContainerDescriptor {
                record_container: Some(rows),
                scroll_host: candidate,
                mode: HarvestMode::RowList,
            };
        }
    }

    ContainerDescriptor {
        record_container: None,
        scroll_host: modal,
        mode: HarvestMode::Fallback,
    }
}

/// The list has at least one row with content.
pub fn list_ready(snapshot: &DomSnapshot, modal: NodeId) -> bool {
    let descriptor = locate(snapshot, modal);
    match (descriptor.mode, descriptor.record_container) {
        (HarvestMode::Table, Some(table)) => snapshot
            .find_all(table, |node| node.is_tag("tr") || node.role() == Some("row"))
            .into_iter()
            .any(|row| !snapshot.text_content(row).is_empty()),
        (HarvestMode::RowList, Some(rows)) => !snapshot.children(rows).is_empty(),
        _ => snapshot
            .find_first(modal, |node| node.role() == Some("row") || node.is_tag("tr"))
            .is_some(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dom::{ElementSpec, ScrollMetrics, Viewport};

    fn modal(dom: &mut DomSnapshot) -> NodeId {
        let root = dom.root();
        dom.append(root, ElementSpec::new("div").role("dialog").rect(0.0, 0.0, 800.0, 600.0))
    }

    #[test]
    fn table_scrolls_with_overflow_wrapper() {
        let mut dom = DomSnapshot::new(Viewport::default());
        let modal = modal(&mut dom);
        let wrapper = dom.append(modal, ElementSpec::new("div").class("max-h-96 overflow-y-auto"));
        let table = dom.append(wrapper, ElementSpec::new("table"));
        let found = locate(&dom, modal);
        assert_eq!(found.mode, HarvestMode::Table);
        assert_eq!(found.record_container, Some(table));
        assert_eq!(found.scroll_host, wrapper);
    }

    #[test]
    fn table_without_wrapper_scrolls_modal() {
        let mut dom = DomSnapshot::new(Viewport::default());
        let modal = modal(&mut dom);
        dom.append(modal, ElementSpec::new("div").role("grid"));
        let found = locate(&dom, modal);
        assert_eq!(found.mode, HarvestMode::Table);
        assert_eq!(found.scroll_host, modal);
    }

    #[test]
    fn overflowing_row_list_is_detected() {
        let mut dom = DomSnapshot::new(Viewport::default());
        let modal = modal(&mut dom);
        let list = dom.append(
            modal,
            ElementSpec::new("div").scroll(ScrollMetrics::new(0.0, 900.0, 300.0)),
        );
        for n in 0..6 {
            dom.append(list, ElementSpec::new("div").text(&format!("record number {n}")));
        }
        let found = locate(&dom, modal);
        assert_eq!(found.mode, HarvestMode::RowList);
        assert_eq!(found.scroll_host, list);
        assert_eq!(found.record_container, Some(list));
        assert!(list_ready(&dom, modal));
    }

    #[test]
    fn short_lists_fall_back_to_modal() {
        let mut dom = DomSnapshot::new(Viewport::default());
        let modal = modal(&mut dom);
        let list = dom.append(modal, ElementSpec::new("div").class("overflow-y-auto"));
        for n in 0..3 {
            dom.append(list, ElementSpec::new("div").text(&format!("record number {n}")));
        }
        let found = locate(&dom, modal);
        assert_eq!(found.mode, HarvestMode::Fallback);
        assert_eq!(found.scroll_host, modal);
        assert_eq!(found.record_container, None);
        assert!(!list_ready(&dom, modal));
    }
}
