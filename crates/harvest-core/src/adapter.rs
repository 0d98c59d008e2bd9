//! Host-specific lookups.
//!
//! The navigator and locator only know the shape of the flow. Which tab to
//! click, which heading names the dialog and which button opens it are
//! answered here, over plain snapshots.

use url::Url;

use crate::config::HostProfile;
use crate::dom::{collapse_whitespace, DomSnapshot, NodeData, NodeId};
use crate::visibility::is_visible;

/// Lookups the flow needs from a concrete host UI.
pub trait HostAdapter: Send + Sync {
    fn supports_location(&self, url: &str) -> bool;

    fn settings_url(&self) -> &str;

    fn settings_fragment(&self) -> &str;

    fn default_title(&self) -> &str;

    /// Visible element carrying the capacity phrase.
    fn find_trigger(&self, snapshot: &DomSnapshot) -> Option<NodeId>;

    /// Element carrying the capacity phrase, visible or not.
    fn find_marker(&self, snapshot: &DomSnapshot) -> Option<NodeId>;

    fn find_settings_tab(&self, snapshot: &DomSnapshot) -> Option<NodeId>;

    fn is_tab_selected(&self, snapshot: &DomSnapshot, tab: NodeId) -> bool;

    /// Id of the panel the tab controls.
    fn panel_id(&self, snapshot: &DomSnapshot, tab: NodeId) -> Option<String>;

    /// The panel with `panel_id`, when it is active and visible.
    fn find_active_panel(&self, snapshot: &DomSnapshot, panel_id: &str) -> Option<NodeId>;

    fn find_management_section(&self, snapshot: &DomSnapshot, panel: NodeId) -> Option<NodeId>;

    fn find_manage_button(&self, snapshot: &DomSnapshot, scope: NodeId) -> Option<NodeId>;

    fn find_modal_root(&self, snapshot: &DomSnapshot) -> Option<NodeId>;

    fn modal_title(&self, snapshot: &DomSnapshot, modal: NodeId) -> Option<String>;

    fn find_usage_box(&self, snapshot: &DomSnapshot, modal: NodeId) -> Option<NodeId>;

    /// Element whose text is the record content of `cell`.
    fn row_text_root(&self, snapshot: &DomSnapshot, cell: NodeId) -> NodeId;

    /// Controls whose text must not leak into record text.
    fn is_control(&self, node: &NodeData) -> bool;
}

const TEXT_TAGS: &[&str] = &["div", "span", "p"];
const KEYWORD_TAGS: &[&str] = &["div", "h1", "h2", "h3", "h4", "h5", "h6", "span", "p", "button"];
const TITLE_TAGS: &[&str] = &["h1", "h2", "h3"];

/// Adapter for the ChatGPT web UI.
#[derive(Clone, Debug, Default)]
pub struct ChatGptAdapter {
    profile: HostProfile,
}

impl ChatGptAdapter {
    pub fn new(profile: HostProfile) -> Self {
        Self { profile }
    }

    pub fn profile(&self) -> &HostProfile {
        &self.profile
    }

    fn marker_candidates(&self, snapshot: &DomSnapshot) -> Vec<NodeId> {
        let phrases = &self.profile.trigger_phrases;
        let own_text: Vec<NodeId> = snapshot.find_all(snapshot.root(), |node| {
            let text = collapse_whitespace(&node.text);
            phrases.iter().any(|phrase| text.contains(phrase.as_str()))
        });
        if !own_text.is_empty() {
            return own_text;
        }

        // The phrase may span inline children; keep the innermost match.
        let matching: Vec<NodeId> = snapshot
            .find_all(snapshot.root(), |node| {
                TEXT_TAGS.contains(&node.tag.as_str())
            })
            .into_iter()
            .filter(|id| {
                let text = snapshot.text_content(*id);
                phrases.iter().any(|phrase| text.contains(phrase.as_str()))
            })
            .collect();
        matching
            .iter()
            .copied()
            .filter(|id| {
                !matching
                    .iter()
                    .any(|other| other != id && snapshot.is_ancestor(*id, *other))
            })
            .collect()
    }

    fn is_manage_control(&self, node: &NodeData) -> bool {
        node.is_tag("button") || node.has_class("btn") || node.role() == Some("button")
    }
}

impl HostAdapter for ChatGptAdapter {
    fn supports_location(&self, url: &str) -> bool {
        let Ok(parsed) = Url::parse(url) else {
            return false;
        };
        let Some(host) = parsed.host_str() else {
            return false;
        };
        self.profile.supported_domains.iter().any(|domain| {
            host == domain || host.ends_with(&format!(".{domain}"))
        })
    }

    fn settings_url(&self) -> &str {
        &self.profile.settings_url
    }

    fn settings_fragment(&self) -> &str {
        &self.profile.settings_fragment
    }

    fn default_title(&self) -> &str {
        &self.profile.default_title
    }

    fn find_trigger(&self, snapshot: &DomSnapshot) -> Option<NodeId> {
        self.marker_candidates(snapshot)
            .into_iter()
            .find(|id| is_visible(snapshot, *id))
    }

    fn find_marker(&self, snapshot: &DomSnapshot) -> Option<NodeId> {
        self.marker_candidates(snapshot).into_iter().next()
    }

    fn find_settings_tab(&self, snapshot: &DomSnapshot) -> Option<NodeId> {
        let test_id = self.profile.settings_tab_test_id.as_str();
        snapshot.find_first(snapshot.root(), |node| {
            node.attr("data-testid") == Some(test_id) && node.role() == Some("tab")
        })
    }

    fn is_tab_selected(&self, snapshot: &DomSnapshot, tab: NodeId) -> bool {
        snapshot
            .get(tab)
            .and_then(|node| node.attr("aria-selected"))
            == Some("true")
    }

    fn panel_id(&self, snapshot: &DomSnapshot, tab: NodeId) -> Option<String> {
        snapshot
            .get(tab)?
            .attr("aria-controls")
            .map(str::trim)
            .filter(|id| !id.is_empty())
            .map(str::to_string)
    }

    fn find_active_panel(&self, snapshot: &DomSnapshot, panel_id: &str) -> Option<NodeId> {
        let panel = snapshot.find_first(snapshot.root(), |node| node.attr("id") == Some(panel_id))?;
        let node = snapshot.get(panel)?;
        let active = node.attr("data-state") == Some("active") && !node.hidden;
        (active && is_visible(snapshot, panel)).then_some(panel)
    }

    fn find_management_section(&self, snapshot: &DomSnapshot, panel: NodeId) -> Option<NodeId> {
        let keywords = &self.profile.management_keywords;
        let heading = snapshot
            .find_all(panel, |node| {
                KEYWORD_TAGS.contains(&node.tag.as_str()) || node.role().is_some()
            })
            .into_iter()
            .filter(|id| is_visible(snapshot, *id))
            .filter(|id| {
                let text = snapshot.text_content(*id);
                keywords.iter().any(|keyword| text.contains(keyword.as_str()))
            })
            .min_by(|a, b| {
                let top = |id: &NodeId| snapshot.get(*id).map(|n| n.rect.top()).unwrap_or(f64::MAX);
                top(a).total_cmp(&top(b))
            })?;

        let section = snapshot
            .closest(heading, |node| {
                (node.is_tag("div") && node.has_class("w-full"))
                    || node.is_tag("section")
                    || node.attrs.contains_key("data-section")
                    || node.has_class("card")
                    || node.has_class("panel")
            })
            .filter(|section| *section == panel || snapshot.is_ancestor(panel, *section))
            .or_else(|| snapshot.parent(heading).filter(|parent| *parent != panel))
            .unwrap_or(heading);
        Some(section)
    }

    fn find_manage_button(&self, snapshot: &DomSnapshot, scope: NodeId) -> Option<NodeId> {
        let labels = &self.profile.manage_labels;
        snapshot
            .find_all(scope, |node| self.is_manage_control(node))
            .into_iter()
            .filter(|id| is_visible(snapshot, *id))
            .find(|id| {
                let text = snapshot.text_content(*id);
                labels.iter().any(|label| text == *label)
            })
    }

    fn find_modal_root(&self, snapshot: &DomSnapshot) -> Option<NodeId> {
        let keywords = &self.profile.modal_title_keywords;
        snapshot
            .find_all(snapshot.root(), |node| TITLE_TAGS.contains(&node.tag.as_str()))
            .into_iter()
            .filter(|id| {
                let text = snapshot.text_content(*id);
                keywords.iter().any(|keyword| text.contains(keyword.as_str()))
            })
            .filter_map(|heading| {
                snapshot
                    .closest(heading, |node| {
                        node.has_class("popover")
                            || node.role() == Some("dialog")
                            || node.attr("aria-modal") == Some("true")
                    })
                    .or_else(|| {
                        snapshot.closest(heading, |node| {
                            node.is_tag("section") || (node.is_tag("div") && node.attrs.contains_key("id"))
                        })
                    })
                    .or_else(|| snapshot.closest(heading, |node| node.is_tag("div")))
            })
            .find(|root| is_visible(snapshot, *root))
    }

    fn modal_title(&self, snapshot: &DomSnapshot, modal: NodeId) -> Option<String> {
        let keywords = &self.profile.modal_title_keywords;
        snapshot
            .find_all(modal, |node| TITLE_TAGS.contains(&node.tag.as_str()))
            .into_iter()
            .map(|heading| snapshot.text_content(heading))
            .find(|text| keywords.iter().any(|keyword| text.contains(keyword.as_str())))
    }

    fn find_usage_box(&self, snapshot: &DomSnapshot, modal: NodeId) -> Option<NodeId> {
        snapshot.find_first(modal, |node| node.has_class("rounded-lg") && node.has_class("border"))
    }

    fn row_text_root(&self, snapshot: &DomSnapshot, cell: NodeId) -> NodeId {
        snapshot
            .find_first(cell, |node| {
                node.has_class("whitespace-pre-wrap") || node.has_class("py-2")
            })
            .unwrap_or(cell)
    }

    fn is_control(&self, node: &NodeData) -> bool {
        node.is_tag("button")
            || node.is_tag("svg")
            || node.has_class("icon")
            || node.role() == Some("button")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dom::{ElementSpec, Viewport};

    fn adapter() -> ChatGptAdapter {
        ChatGptAdapter::default()
    }

    #[test]
    fn supported_locations_match_host_names() {
        let adapter = adapter();
        assert!(adapter.supports_location("https://chatgpt.com/c/123"));
        assert!(adapter.supports_location("https://chat.openai.com/"));
        assert!(!adapter.supports_location("https://example.com/chatgpt.com"));
        assert!(!adapter.supports_location("not a url"));
    }

    #[test]
    fn trigger_needs_visible_marker() {
        let adapter = adapter();
        let mut dom = DomSnapshot::new(Viewport::default());
        let root = dom.root();
        let banner = dom.append(
            root,
            ElementSpec::new("div")
                .text("Memory is full")
                .rect(0.0, 0.0, 200.0, 20.0)
                .hidden(),
        );
        assert_eq!(adapter.find_trigger(&dom), None);
        assert_eq!(adapter.find_marker(&dom), Some(banner));
        dom.set_shown(banner, true);
        assert_eq!(adapter.find_trigger(&dom), Some(banner));
    }

    #[test]
    fn marker_split_across_inline_children_resolves_innermost() {
        let adapter = adapter();
        let mut dom = DomSnapshot::new(Viewport::default());
        let root = dom.root();
        let outer = dom.append(root, ElementSpec::new("div").rect(0.0, 0.0, 400.0, 40.0));
        let para = dom.append(outer, ElementSpec::new("p").text("Memory is").rect(0.0, 0.0, 400.0, 20.0));
        dom.append(para, ElementSpec::new("b").text("full").rect(60.0, 0.0, 30.0, 20.0));
        assert_eq!(adapter.find_trigger(&dom), Some(para));
    }

    #[test]
    fn manage_button_requires_exact_label() {
        let adapter = adapter();
        let mut dom = DomSnapshot::new(Viewport::default());
        let root = dom.root();
        dom.append(root, ElementSpec::new("button").text("Manage settings").rect(0.0, 0.0, 80.0, 20.0));
        let exact = dom.append(root, ElementSpec::new("div").class("btn").text(" Manage ").rect(0.0, 30.0, 80.0, 20.0));
        assert_eq!(adapter.find_manage_button(&dom, root), Some(exact));
    }

    #[test]
    fn management_section_prefers_topmost_keyword() {
        let adapter = adapter();
        let mut dom = DomSnapshot::new(Viewport::default());
        let root = dom.root();
        let panel = dom.append(root, ElementSpec::new("div").rect(0.0, 0.0, 600.0, 600.0));
        let lower = dom.append(panel, ElementSpec::new("section").rect(0.0, 300.0, 600.0, 100.0));
        dom.append(lower, ElementSpec::new("span").text("記憶").rect(0.0, 300.0, 50.0, 20.0));
        let upper = dom.append(panel, ElementSpec::new("div").class("w-full").rect(0.0, 100.0, 600.0, 100.0));
        dom.append(upper, ElementSpec::new("div").text("Manage memory").rect(0.0, 100.0, 200.0, 20.0));
        assert_eq!(adapter.find_management_section(&dom, panel), Some(upper));
    }

    #[test]
    fn modal_root_walks_up_to_dialog() {
        let adapter = adapter();
        let mut dom = DomSnapshot::new(Viewport::default());
        let root = dom.root();
        let dialog = dom.append(root, ElementSpec::new("div").role("dialog").rect(0.0, 0.0, 500.0, 500.0));
        let header = dom.append(dialog, ElementSpec::new("div").rect(0.0, 0.0, 500.0, 40.0));
        dom.append(header, ElementSpec::new("h2").text("Saved memories").rect(0.0, 0.0, 200.0, 30.0));
        assert_eq!(adapter.find_modal_root(&dom), Some(dialog));
        assert_eq!(adapter.modal_title(&dom, dialog).as_deref(), Some("Saved memories"));
    }
}
