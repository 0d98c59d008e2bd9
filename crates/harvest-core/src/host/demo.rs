//! A scripted replica of the assistant's settings flow.
//!
//! Backs `--dry-run` and the scenario tests: a capacity banner, a settings
//! dialog revealed by the settings URL, a personalization tab that activates
//! its panel, a memory management section with a Manage button, and a
//! saved-memories dialog whose list is virtualized.

use std::sync::Arc;
use std::time::Duration;

use crate::config::Locale;
use crate::dom::{DomSnapshot, ElementSpec, NodeId, Rect, ScrollMetrics, Viewport};

use super::memory::MemoryHost;

const LIST_TOP: f64 = 150.0;
const LIST_LEFT: f64 = 170.0;
const LIST_WIDTH: f64 = 940.0;
const LIST_HEIGHT: f64 = 400.0;

/// Markup used for the list inside the saved-memories dialog.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ListLayout {
    /// `table > tbody > tr` rows under an `overflow-y` wrapper.
    Table,
    /// Plain `div` rows inside a scrolling `div`.
    Rows,
}

#[derive(Clone, Debug)]
pub struct DemoOptions {
    pub records: Vec<String>,
    pub locale: Locale,
    pub layout: ListLayout,
    /// Rows mounted at once; `None` renders the whole list.
    pub window_rows: Option<usize>,
    pub row_height: f64,
    pub capacity_marker: bool,
    pub management_section: bool,
    pub usage_percent: Option<u32>,
    pub location: String,
    pub modal_delay: Duration,
}

impl Default for DemoOptions {
    fn default() -> Self {
        Self {
            records: Vec::new(),
            locale: Locale::ZhTw,
            layout: ListLayout::Table,
            window_rows: Some(15),
            row_height: 40.0,
            capacity_marker: true,
            management_section: true,
            usage_percent: Some(87),
            location: "https://chatgpt.com/".into(),
            modal_delay: Duration::from_millis(150),
        }
    }
}

impl DemoOptions {
    /// Options with `count` generated records.
    pub fn with_records(count: usize) -> Self {
        Self {
            records: sample_records(count),
            ..Self::default()
        }
    }
}

/// Generated record texts, all long enough to survive the length filter.
pub fn sample_records(count: usize) -> Vec<String> {
    const TOPICS: [&str; 6] = [
        "prefers concise answers with code samples",
        "is building a Rust service on tokio",
        "writes documentation in Traditional Chinese",
        "asked to keep meeting notes as bullet lists",
        "uses PostgreSQL for the billing backend",
        "likes examples that include error handling",
    ];
    (1..=count)
        .map(|n| format!("Memory {n:03}: user {}", TOPICS[(n - 1) % TOPICS.len()]))
        .collect()
}

/// Handles to the interesting elements of the demo page.
#[derive(Clone, Debug)]
pub struct DemoNodes {
    pub marker: Option<NodeId>,
    pub settings: NodeId,
    pub tab: NodeId,
    pub panel: NodeId,
    pub section: NodeId,
    pub manage_button: Option<NodeId>,
    pub modal: NodeId,
    pub usage_box: Option<NodeId>,
    pub scroll_host: NodeId,
    pub list: NodeId,
}

pub struct DemoPage {
    pub host: MemoryHost,
    pub nodes: DemoNodes,
    pub options: DemoOptions,
}

struct Labels {
    marker: &'static str,
    tab: &'static str,
    management: &'static str,
    manage: &'static str,
    modal_title: &'static str,
    delete: &'static str,
    other_section: &'static str,
}

fn labels(locale: Locale) -> Labels {
    match locale {
        Locale::ZhTw => Labels {
            marker: "儲存的記憶已滿",
            tab: "個人化",
            management: "管理記憶",
            manage: "管理",
            modal_title: "儲存的記憶",
            delete: "刪除",
            other_section: "自訂指令",
        },
        Locale::En => Labels {
            marker: "Memory is full",
            tab: "Personalization",
            management: "Manage memory",
            manage: "Manage",
            modal_title: "Saved memories",
            delete: "Delete",
            other_section: "Custom instructions",
        },
    }
}

fn usage_text(locale: Locale, percent: u32) -> String {
    match locale {
        Locale::ZhTw => format!("{percent}% 滿"),
        Locale::En => format!("{percent}% full"),
    }
}

impl DemoPage {
    pub fn build(options: DemoOptions) -> Self {
        let text = labels(options.locale);
        let mut dom = DomSnapshot::new(Viewport::default());
        let root = dom.root();

        let marker = options.capacity_marker.then(|| {
            dom.append(
                root,
                ElementSpec::new("div")
                    .class("text-token-text-primary")
                    .text(text.marker)
                    .rect(40.0, 20.0, 600.0, 32.0),
            )
        });

        let settings = dom.append(
            root,
            ElementSpec::new("div")
                .role("dialog")
                .attr("data-state", "open")
                .rect(200.0, 60.0, 880.0, 780.0)
                .hidden(),
        );
        let tab = dom.append(
            settings,
            ElementSpec::new("button")
                .role("tab")
                .attr("data-testid", "personalization-tab")
                .attr("aria-selected", "false")
                .attr("aria-controls", "radix-panel-personalization")
                .text(text.tab)
                .rect(220.0, 120.0, 160.0, 36.0),
        );
        let panel = dom.append(
            settings,
            ElementSpec::new("div")
                .role("tabpanel")
                .attr("id", "radix-panel-personalization")
                .attr("data-state", "inactive")
                .rect(400.0, 120.0, 660.0, 600.0)
                .hidden(),
        );

        let section = dom.append(
            panel,
            ElementSpec::new("div")
                .class("w-full")
                .rect(420.0, 300.0, 620.0, 120.0),
        );
        let mut manage_button = None;
        if options.management_section {
            dom.append(
                section,
                ElementSpec::new("div")
                    .text(text.management)
                    .rect(430.0, 310.0, 300.0, 24.0),
            );
            if let Some(percent) = options.usage_percent {
                dom.append(
                    section,
                    ElementSpec::new("div")
                        .text(&usage_text(options.locale, percent))
                        .rect(430.0, 340.0, 200.0, 20.0),
                );
            }
            manage_button = Some(dom.append(
                section,
                ElementSpec::new("button")
                    .class("btn relative btn-secondary")
                    .text(text.manage)
                    .rect(900.0, 330.0, 100.0, 36.0),
            ));
        } else {
            dom.append(
                section,
                ElementSpec::new("div")
                    .text(text.other_section)
                    .rect(430.0, 310.0, 300.0, 24.0),
            );
        }

        let modal = dom.append(
            root,
            ElementSpec::new("div")
                .role("dialog")
                .attr("aria-modal", "true")
                .rect(150.0, 40.0, 980.0, 820.0)
                .hidden(),
        );
        dom.append(
            modal,
            ElementSpec::new("h2")
                .text(text.modal_title)
                .rect(170.0, 60.0, 400.0, 30.0),
        );
        let usage_box = options.usage_percent.map(|percent| {
            dom.append(
                modal,
                ElementSpec::new("div")
                    .class("rounded-lg border border-token-border-light")
                    .text(&usage_text(options.locale, percent))
                    .rect(170.0, 100.0, 300.0, 30.0),
            )
        });

        let total_height = options.records.len() as f64 * options.row_height;
        let scroll_host = dom.append(
            modal,
            ElementSpec::new("div")
                .class("overflow-y-auto")
                .overflow_y("auto")
                .rect(LIST_LEFT, LIST_TOP, LIST_WIDTH, LIST_HEIGHT)
                .scroll(ScrollMetrics::new(
                    0.0,
                    total_height.max(LIST_HEIGHT),
                    LIST_HEIGHT,
                )),
        );
        let list = match options.layout {
            ListLayout::Table => {
                let table = dom.append(
                    scroll_host,
                    ElementSpec::new("table").rect(LIST_LEFT, LIST_TOP, LIST_WIDTH, total_height),
                );
                dom.append(
                    table,
                    ElementSpec::new("tbody").rect(LIST_LEFT, LIST_TOP, LIST_WIDTH, total_height),
                )
            }
            ListLayout::Rows => scroll_host,
        };

        let layout = ListRender {
            list,
            records: Arc::new(options.records.clone()),
            layout: options.layout,
            window_rows: options.window_rows,
            row_height: options.row_height,
            delete_label: text.delete,
        };
        layout.render(&mut dom, 0.0);

        let host = MemoryHost::new(dom, &options.location);

        host.on_location("#settings", move |dom, _url| {
            dom.set_shown(settings, true);
        });

        host.on_click(tab, Duration::ZERO, move |dom| {
            dom.set_attr(tab, "aria-selected", "true");
            dom.set_attr(panel, "data-state", "active");
            dom.set_shown(panel, true);
        });

        if let Some(button) = manage_button {
            host.on_click(button, options.modal_delay, move |dom| {
                dom.set_shown(modal, true);
            });
        }

        host.on_scroll(scroll_host, move |dom, _node, top| {
            layout.render(dom, top);
        });

        Self {
            host,
            nodes: DemoNodes {
                marker,
                settings,
                tab,
                panel,
                section,
                manage_button,
                modal,
                usage_box,
                scroll_host,
                list,
            },
            options,
        }
    }
}

#[derive(Clone)]
struct ListRender {
    list: NodeId,
    records: Arc<Vec<String>>,
    layout: ListLayout,
    window_rows: Option<usize>,
    row_height: f64,
    delete_label: &'static str,
}

impl ListRender {
    /// Remount the rows visible at `scroll_top`.
    fn render(&self, dom: &mut DomSnapshot, scroll_top: f64) {
        dom.clear_children(self.list);
        let total = self.records.len();
        let (first, last) = match self.window_rows {
            Some(window) => {
                let first = ((scroll_top / self.row_height).floor() as usize).min(total);
                (first, (first + window).min(total))
            }
            None => (0, total),
        };

        for index in first..last {
            let top = LIST_TOP + index as f64 * self.row_height - scroll_top;
            let rect = Rect::new(LIST_LEFT, top, LIST_WIDTH, self.row_height);
            let text_rect = Rect::new(LIST_LEFT + 8.0, top + 4.0, LIST_WIDTH - 120.0, 24.0);
            let button_rect = Rect::new(LIST_LEFT + LIST_WIDTH - 100.0, top + 4.0, 32.0, 32.0);
            let record = &self.records[index];
            match self.layout {
                ListLayout::Table => {
                    let row = dom.append(self.list, ElementSpec::new("tr").at(rect));
                    let cell = dom.append(row, ElementSpec::new("td").at(rect));
                    dom.append(
                        cell,
                        ElementSpec::new("div")
                            .class("whitespace-pre-wrap")
                            .text(record)
                            .at(text_rect),
                    );
                    let actions = dom.append(row, ElementSpec::new("td").at(button_rect));
                    self.append_delete(dom, actions, button_rect);
                }
                ListLayout::Rows => {
                    let row = dom.append(self.list, ElementSpec::new("div").class("py-2").at(rect));
                    dom.append(
                        row,
                        ElementSpec::new("div")
                            .class("whitespace-pre-wrap")
                            .text(record)
                            .at(text_rect),
                    );
                    self.append_delete(dom, row, button_rect);
                }
            }
        }
    }

    fn append_delete(&self, dom: &mut DomSnapshot, parent: NodeId, rect: Rect) {
        let button = dom.append(
            parent,
            ElementSpec::new("button")
                .attr("aria-label", self.delete_label)
                .text(self.delete_label)
                .at(rect),
        );
        dom.append(button, ElementSpec::new("svg").class("icon").at(rect));
    }
}
