//! Attached page targets and their flat-mode sessions.

use dashmap::DashMap;
use serde::{Deserialize, Serialize};

use crate::ids::PageId;

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageEntry {
    pub target_id: String,
    pub session_id: String,
    pub url: Option<String>,
}

/// Concurrent page registry, indexed by page, session and target.
#[derive(Default)]
pub struct Registry {
    pages: DashMap<PageId, PageEntry>,
    sessions: DashMap<String, PageId>,
    targets: DashMap<String, PageId>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, page: PageId, entry: PageEntry) {
        self.sessions.insert(entry.session_id.clone(), page);
        self.targets.insert(entry.target_id.clone(), page);
        self.pages.insert(page, entry);
    }

    pub fn get(&self, page: &PageId) -> Option<PageEntry> {
        self.pages.get(page).map(|entry| entry.value().clone())
    }

    pub fn session(&self, page: &PageId) -> Option<String> {
        self.pages.get(page).map(|entry| entry.session_id.clone())
    }

    pub fn page_for_session(&self, session: &str) -> Option<PageId> {
        self.sessions.get(session).map(|entry| *entry.value())
    }

    pub fn page_for_target(&self, target: &str) -> Option<PageId> {
        self.targets.get(target).map(|entry| *entry.value())
    }

    pub fn set_url(&self, page: &PageId, url: impl Into<String>) {
        if let Some(mut entry) = self.pages.get_mut(page) {
            entry.url = Some(url.into());
        }
    }

    pub fn remove(&self, page: &PageId) -> Option<PageEntry> {
        let (_, entry) = self.pages.remove(page)?;
        self.sessions.remove(&entry.session_id);
        self.targets.remove(&entry.target_id);
        Some(entry)
    }

    pub fn pages(&self) -> Vec<PageId> {
        self.pages.iter().map(|entry| *entry.key()).collect()
    }

    pub fn is_empty(&self) -> bool {
        self.pages.is_empty()
    }

    pub fn clear(&self) {
        self.pages.clear();
        self.sessions.clear();
        self.targets.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lookups_follow_insert_and_remove() {
        let registry = Registry::new();
        let page = PageId::new();
        registry.insert(
            page,
            PageEntry {
                target_id: "T1".into(),
                session_id: "S1".into(),
                url: None,
            },
        );
        assert_eq!(registry.page_for_session("S1"), Some(page));
        assert_eq!(registry.page_for_target("T1"), Some(page));

        registry.set_url(&page, "https://chatgpt.com/");
        assert_eq!(
            registry.get(&page).and_then(|entry| entry.url).as_deref(),
            Some("https://chatgpt.com/")
        );

        registry.remove(&page);
        assert!(registry.page_for_session("S1").is_none());
        assert!(registry.is_empty());
    }
}
