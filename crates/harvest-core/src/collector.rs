//! Scroll harvesting of the record list.
//!
//! The list is virtualized: only rows near the visible window are mounted,
//! and rows are remounted as the list scrolls. The harvester walks the
//! scroll host from top to bottom, reading the mounted rows after every
//! step, and relies on [`RecordSet`] for deduplication.

use std::collections::HashSet;
use std::time::Duration;

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use tokio::time::{sleep, Instant};
use tracing::{debug, info, warn};

use crate::adapter::HostAdapter;
use crate::config::ScrollTuning;
use crate::dom::{collapse_whitespace, DomSnapshot, NodeData, NodeId};
use crate::errors::HarvestError;
use crate::host::HostPage;
use crate::locator::{locate, ContainerDescriptor, HarvestMode};
use crate::visibility::is_visible;

static ZERO_WIDTH: Lazy<Regex> =
    Lazy::new(|| Regex::new("[\u{200B}-\u{200D}\u{FEFF}]").expect("valid zero-width pattern"));

/// Strip zero-width characters and collapse whitespace.
pub fn normalize_record(raw: &str) -> String {
    collapse_whitespace(&ZERO_WIDTH.replace_all(raw, ""))
}

/// Insertion-ordered set of normalized record texts.
#[derive(Clone, Debug, Default)]
pub struct RecordSet {
    min_chars: usize,
    seen: HashSet<String>,
    ordered: Vec<String>,
}

impl RecordSet {
    pub fn new(min_chars: usize) -> Self {
        Self {
            min_chars,
            seen: HashSet::new(),
            ordered: Vec::new(),
        }
    }

    /// Normalize and insert `raw`; returns whether it was new.
    pub fn offer(&mut self, raw: &str) -> bool {
        let text = normalize_record(raw);
        if text.chars().count() < self.min_chars {
            return false;
        }
        if !self.seen.insert(text.clone()) {
            return false;
        }
        self.ordered.push(text);
        true
    }

    /// Insert every item, returning how many were new.
    pub fn merge<I, S>(&mut self, items: I) -> usize
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        items
            .into_iter()
            .filter(|item| self.offer(item.as_ref()))
            .count()
    }

    pub fn len(&self) -> usize {
        self.ordered.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ordered.is_empty()
    }

    pub fn contains(&self, text: &str) -> bool {
        self.seen.contains(&normalize_record(text))
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.ordered.iter().map(String::as_str)
    }

    pub fn into_vec(self) -> Vec<String> {
        self.ordered
    }
}

fn is_row(node: &NodeData) -> bool {
    node.is_tag("tr") || node.role() == Some("row")
}

fn is_cell(node: &NodeData) -> bool {
    node.is_tag("td") || matches!(node.role(), Some("cell") | Some("gridcell"))
}

/// Record text of one row: the first cell's content, without control text.
fn row_text(snapshot: &DomSnapshot, adapter: &dyn HostAdapter, row: NodeId) -> String {
    let cell = snapshot
        .children(row)
        .iter()
        .copied()
        .find(|child| snapshot.get(*child).map(is_cell).unwrap_or(false))
        .unwrap_or(row);
    let root = adapter.row_text_root(snapshot, cell);
    snapshot.text_excluding(root, |node| adapter.is_control(node))
}

/// Raw record texts currently mounted in the list.
pub fn extract_rows(
    snapshot: &DomSnapshot,
    adapter: &dyn HostAdapter,
    modal: NodeId,
    descriptor: &ContainerDescriptor,
) -> Vec<String> {
    let visible_rows = |ids: Vec<NodeId>| -> Vec<String> {
        ids.into_iter()
            .filter(|id| is_visible(snapshot, *id))
            .map(|row| row_text(snapshot, adapter, row))
            .collect()
    };

    match (descriptor.mode, descriptor.record_container) {
        (HarvestMode::Table, Some(table)) => visible_rows(snapshot.find_all(table, |node| {
            is_row(node)
        })
        .into_iter()
        .filter(|row| {
            !snapshot
                .ancestors(*row)
                .take_while(|ancestor| *ancestor != table)
                .any(|ancestor| snapshot.get(ancestor).map(|n| n.is_tag("thead")).unwrap_or(false))
        })
        .collect()),
        (HarvestMode::RowList, Some(list)) => visible_rows(snapshot.children(list).to_vec()),
        _ => {
            let rows = snapshot.find_all(modal, is_row);
            if !rows.is_empty() {
                return visible_rows(rows);
            }
            snapshot
                .find_all(modal, |node| {
                    node.is_tag("td") || node.has_class("whitespace-pre-wrap") || node.has_class("py-2")
                })
                .into_iter()
                .filter(|id| is_visible(snapshot, *id))
                .map(|id| snapshot.text_excluding(id, |node| adapter.is_control(node)))
                .collect()
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    /// Idle threshold reached with the host at its bottom.
    SettledAtBottom,
    /// Idle threshold plus grace reached without touching bottom.
    IdleCeiling,
    /// The scan budget ran out.
    TimeBudget,
    /// The dialog disappeared mid-scan.
    ContainerLost,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct HarvestStats {
    pub rounds: u32,
    pub idle_rounds: u32,
    pub elapsed_ms: u64,
    pub stop: StopReason,
    pub mode: HarvestMode,
}

#[derive(Clone, Debug, PartialEq)]
pub struct Harvest {
    pub records: Vec<String>,
    pub stats: HarvestStats,
}

struct Scan<'a, H: ?Sized> {
    host: &'a H,
    adapter: &'a dyn HostAdapter,
    modal: NodeId,
    descriptor: ContainerDescriptor,
    records: RecordSet,
}

impl<'a, H> Scan<'a, H>
where
    H: HostPage + ?Sized,
{
    /// Read the mounted rows; returns the fresh snapshot and how many records were new.
    async fn read(&mut self) -> Result<(DomSnapshot, usize), HarvestError> {
        let snapshot = self.host.snapshot().await?;
        if !snapshot.contains(self.descriptor.scroll_host) && snapshot.contains(self.modal) {
            let relocated = locate(&snapshot, self.modal);
            debug!(
                old = %self.descriptor.scroll_host,
                new = %relocated.scroll_host,
                "scroll host remounted; relocating"
            );
            self.descriptor = relocated;
        }
        let rows = extract_rows(&snapshot, self.adapter, self.modal, &self.descriptor);
        let fresh = self.records.merge(rows);
        Ok((snapshot, fresh))
    }

    async fn scroll_to(&self, top: f64, pause: Duration) -> Result<(), HarvestError> {
        self.host.set_scroll_top(self.descriptor.scroll_host, top).await?;
        self.host.next_frame().await?;
        sleep(pause).await;
        Ok(())
    }
}

/// Scroll the list end to end and collect every record.
///
/// Steps:
/// 1. Jump to the top and read the first window
/// 2. Advance by `step_ratio` of the visible height, settle, read; count idle rounds
/// 3. Stop when idle at the bottom, idle past the grace ceiling, or out of time
/// 4. Jump back to the top for a final read
pub async fn harvest<H>(
    host: &H,
    adapter: &dyn HostAdapter,
    modal: NodeId,
    descriptor: ContainerDescriptor,
    tuning: &ScrollTuning,
) -> Result<Harvest, HarvestError>
where
    H: HostPage + ?Sized,
{
    let started = Instant::now();
    let mut scan = Scan {
        host,
        adapter,
        modal,
        descriptor,
        records: RecordSet::new(tuning.min_record_chars),
    };

    scan.scroll_to(0.0, tuning.end_bounce()).await?;
    let (mut snapshot, _) = scan.read().await?;

    let mut rounds = 0u32;
    let mut idle = 0u32;
    let stop = loop {
        if started.elapsed() >= tuning.max_scan() {
            warn!(records = scan.records.len(), "scroll budget exhausted");
            break StopReason::TimeBudget;
        }
        let Some(metrics) = snapshot.get(scan.descriptor.scroll_host).map(|n| n.scroll) else {
            break StopReason::ContainerLost;
        };

        let step = (metrics.client_height * tuning.step_ratio).floor().max(1.0);
        let target = (metrics.scroll_top + step).min(metrics.scroll_height);
        scan.scroll_to(target, tuning.settle()).await?;

        let (next, fresh) = scan.read().await?;
        snapshot = next;
        rounds += 1;
        idle = if fresh == 0 { idle + 1 } else { 0 };

        let at_bottom = snapshot
            .get(scan.descriptor.scroll_host)
            .map(|n| n.scroll.at_bottom(tuning.bottom_epsilon_px))
            .unwrap_or(true);
        debug!(rounds, fresh, idle, at_bottom, total = scan.records.len(), "scroll round");

        if idle >= tuning.idle_rounds && at_bottom {
            break StopReason::SettledAtBottom;
        }
        if idle >= tuning.idle_rounds + tuning.idle_grace_rounds {
            break StopReason::IdleCeiling;
        }
    };

    if snapshot.contains(scan.descriptor.scroll_host) {
        scan.scroll_to(0.0, tuning.end_bounce()).await?;
        scan.read().await?;
    }

    let stats = HarvestStats {
        rounds,
        idle_rounds: idle,
        elapsed_ms: started.elapsed().as_millis() as u64,
        stop,
        mode: scan.descriptor.mode,
    };
    info!(
        records = scan.records.len(),
        rounds,
        stop = ?stop,
        elapsed_ms = stats.elapsed_ms,
        "harvest finished"
    );
    Ok(Harvest {
        records: scan.records.into_vec(),
        stats,
    })
}
