//! Markdown report of harvested records.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;

use crate::config::Locale;
use crate::usage::UsagePercentage;

/// A finished harvest. `count` always equals `items.len()`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Report {
    title: String,
    usage: Option<UsagePercentage>,
    items: Vec<String>,
    count: usize,
}

impl Report {
    pub fn new(title: impl Into<String>, usage: Option<UsagePercentage>, items: Vec<String>) -> Self {
        let count = items.len();
        Self {
            title: title.into(),
            usage,
            items,
            count,
        }
    }

    pub fn title(&self) -> &str {
        &self.title
    }

    pub fn usage(&self) -> Option<UsagePercentage> {
        self.usage
    }

    pub fn items(&self) -> &[String] {
        &self.items
    }

    pub fn count(&self) -> usize {
        self.count
    }

    /// Render as Markdown: title, optional usage line, count line, then one
    /// numbered paragraph per record.
    pub fn render(&self, locale: Locale) -> String {
        let mut out = format!("# {}\n\n", self.title);
        if let Some(usage) = self.usage {
            match locale {
                Locale::ZhTw => out.push_str(&format!("> 使用量：{usage}\n\n")),
                Locale::En => out.push_str(&format!("> Usage: {usage}\n\n")),
            }
        }
        match locale {
            Locale::ZhTw => out.push_str(&format!("共 {} 筆\n\n---\n\n", self.count)),
            Locale::En => out.push_str(&format!("{} items\n\n---\n\n", self.count)),
        }
        let body = self
            .items
            .iter()
            .enumerate()
            .map(|(index, item)| format!("{}. {}", index + 1, item))
            .collect::<Vec<_>>()
            .join("\n\n");
        out.push_str(&body);
        out.push('\n');
        out
    }

    /// Recover the numbered items from rendered Markdown.
    ///
    /// Numbering must run 1, 2, 3, ...; a line whose number breaks the
    /// sequence is treated as text, not as a new item.
    pub fn parse_items(markdown: &str) -> Vec<String> {
        let mut items = Vec::new();
        for line in markdown.lines() {
            let Some(caps) = ITEM_LINE.captures(line) else {
                continue;
            };
            let number = caps.get(1).and_then(|m| m.as_str().parse::<usize>().ok());
            if number == Some(items.len() + 1) {
                if let Some(text) = caps.get(2) {
                    items.push(text.as_str().trim().to_string());
                }
            }
        }
        items
    }
}

static ITEM_LINE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^(\d+)\.\s+(.*)$").expect("valid item pattern"));

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Report {
        Report::new(
            "儲存的記憶",
            Some(UsagePercentage::clamped(87)),
            vec![
                "Prefers concise answers".to_string(),
                "Lives in Taipei, works remotely".to_string(),
            ],
        )
    }

    #[test]
    fn renders_header_usage_and_paragraph_items() {
        let text = sample().render(Locale::ZhTw);
        assert_eq!(
            text,
            "# 儲存的記憶\n\n> 使用量：87%\n\n共 2 筆\n\n---\n\n1. Prefers concise answers\n\n2. Lives in Taipei, works remotely\n"
        );
    }

    #[test]
    fn usage_line_is_omitted_when_unknown() {
        let report = Report::new("Saved memories", None, vec!["A record long enough".into()]);
        let text = report.render(Locale::En);
        assert!(!text.contains("Usage"));
        assert!(text.starts_with("# Saved memories\n\n1 items"));
    }

    #[test]
    fn parse_items_recovers_rendered_list() {
        let report = sample();
        let parsed = Report::parse_items(&report.render(Locale::En));
        assert_eq!(parsed, report.items());
        assert_eq!(parsed.len(), report.count());
    }

    #[test]
    fn parse_items_ignores_out_of_sequence_numbers() {
        let parsed = Report::parse_items("1. first record\n\n2024. not an item\n\n2. second record\n");
        assert_eq!(parsed, vec!["first record", "second record"]);
    }

    #[test]
    fn serialized_count_matches_items() {
        let value = serde_json::to_value(sample()).unwrap();
        assert_eq!(value["count"], 2);
        assert_eq!(value["usage"], 87);
    }
}
