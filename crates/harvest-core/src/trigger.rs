//! Capacity trigger detection.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::adapter::HostAdapter;
use crate::dom::DomSnapshot;

/// Result of one trigger scan.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TriggerSignal {
    pub detected: bool,
    pub timestamp: DateTime<Utc>,
    pub location: String,
}

/// Scan `snapshot` for a visible capacity phrase.
///
/// Pure over the snapshot, so repeated scans of the same page agree.
pub fn scan(adapter: &dyn HostAdapter, snapshot: &DomSnapshot, location: &str) -> TriggerSignal {
    TriggerSignal {
        detected: adapter.find_trigger(snapshot).is_some(),
        timestamp: Utc::now(),
        location: location.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapter::ChatGptAdapter;
    use crate::dom::{ElementSpec, Viewport};

    #[test]
    fn repeated_scans_agree() {
        let adapter = ChatGptAdapter::default();
        let mut dom = DomSnapshot::new(Viewport::default());
        let root = dom.root();
        dom.append(
            root,
            ElementSpec::new("span")
                .text("儲存的記憶已滿")
                .rect(0.0, 0.0, 120.0, 20.0),
        );

        let first = scan(&adapter, &dom, "https://chatgpt.com/");
        let second = scan(&adapter, &dom, "https://chatgpt.com/");
        assert!(first.detected);
        assert_eq!(first.detected, second.detected);
        assert_eq!(first.location, second.location);
    }

    #[test]
    fn absent_phrase_is_not_detected() {
        let adapter = ChatGptAdapter::default();
        let dom = DomSnapshot::new(Viewport::default());
        assert!(!scan(&adapter, &dom, "https://chatgpt.com/").detected);
    }
}
