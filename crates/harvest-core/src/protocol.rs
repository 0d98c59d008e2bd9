//! Request/response messages exchanged with collaborators.
//!
//! Requests are tagged by `action`; every response carries `success`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, warn};

use crate::config::Locale;
use crate::facade::{MemoryHarvester, RunOutcome};
use crate::report::Report;

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "camelCase")]
pub enum Request {
    GetMemoryStatus,
    ExportMemories,
    Ping,
    GetMarkdown,
    DetectMemoryFull,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Response {
    Status(StatusResponse),
    Export(ExportResponse),
    Ping(PingResponse),
    Markdown(MarkdownResponse),
    MemoryFull(MemoryFullResponse),
    Failure(FailureResponse),
}

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusResponse {
    pub success: bool,
    pub is_full: bool,
    pub timestamp: DateTime<Utc>,
    pub data: Vec<String>,
    pub usage: Option<String>,
    pub markdown: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct ExportResponse {
    pub success: bool,
    pub markdown: String,
    pub data: Vec<String>,
    pub usage: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct PingResponse {
    pub success: bool,
    pub status: &'static str,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct MarkdownResponse {
    pub success: bool,
    pub markdown: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MemoryFullResponse {
    pub success: bool,
    pub memory_full: bool,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct FailureResponse {
    pub success: bool,
    pub error: String,
}

impl Response {
    pub fn failure(error: impl Into<String>) -> Self {
        Response::Failure(FailureResponse {
            success: false,
            error: error.into(),
        })
    }

    pub fn is_success(&self) -> bool {
        match self {
            Response::Status(r) => r.success,
            Response::Export(r) => r.success,
            Response::Ping(r) => r.success,
            Response::Markdown(r) => r.success,
            Response::MemoryFull(r) => r.success,
            Response::Failure(r) => r.success,
        }
    }

    pub fn to_value(&self) -> Value {
        serde_json::to_value(self).unwrap_or_else(|err| {
            serde_json::json!({ "success": false, "error": err.to_string() })
        })
    }
}

fn export_response(report: &Report, locale: Locale) -> ExportResponse {
    ExportResponse {
        success: true,
        markdown: report.render(locale),
        data: report.items().to_vec(),
        usage: report.usage().map(|usage| usage.to_string()),
    }
}

fn busy_message(locale: Locale) -> &'static str {
    match locale {
        Locale::ZhTw => "匯出正在進行中",
        Locale::En => "Export already in progress",
    }
}

fn unknown_action_message(locale: Locale) -> &'static str {
    match locale {
        Locale::ZhTw => "未知的訊息類型",
        Locale::En => "Unknown message type",
    }
}

/// Answer one request.
pub async fn handle(harvester: &MemoryHarvester, request: Request) -> Response {
    let locale = harvester.config().locale;
    debug!(request = ?request, "handling message");
    match request {
        Request::Ping => Response::Ping(PingResponse {
            success: true,
            status: "ready",
        }),
        Request::GetMarkdown => Response::Markdown(MarkdownResponse {
            success: true,
            markdown: harvester.last_markdown(),
        }),
        Request::DetectMemoryFull => match harvester.detect_memory_full().await {
            Ok(memory_full) => Response::MemoryFull(MemoryFullResponse {
                success: true,
                memory_full,
            }),
            Err(err) => Response::failure(err.user_message(locale)),
        },
        Request::GetMemoryStatus => match harvester.check_status().await {
            Ok(status) => {
                let last = harvester.last_report();
                Response::Status(StatusResponse {
                    success: true,
                    is_full: status.is_full,
                    timestamp: status.timestamp,
                    data: last
                        .as_ref()
                        .map(|report| report.items().to_vec())
                        .unwrap_or_default(),
                    usage: last
                        .as_ref()
                        .and_then(|report| report.usage())
                        .map(|usage| usage.to_string()),
                    markdown: last.as_ref().map(|report| report.render(locale)),
                })
            }
            Err(err) => Response::failure(err.user_message(locale)),
        },
        Request::ExportMemories => match harvester.main_flow().await {
            Ok(RunOutcome::Completed(report)) => Response::Export(export_response(&report, locale)),
            Ok(RunOutcome::AlreadyRunning) => Response::failure(busy_message(locale)),
            Err(err) => {
                warn!(%err, kind = err.kind().as_str(), "export failed");
                Response::failure(err.user_message(locale))
            }
        },
    }
}

/// Decode a raw message, answer it, and encode the reply.
pub async fn handle_value(harvester: &MemoryHarvester, message: Value) -> Value {
    match serde_json::from_value::<Request>(message) {
        Ok(request) => handle(harvester, request).await.to_value(),
        Err(err) => {
            debug!(%err, "unrecognised message");
            Response::failure(unknown_action_message(harvester.config().locale)).to_value()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn requests_decode_from_action_tag() {
        let request: Request = serde_json::from_value(json!({ "action": "getMemoryStatus" })).unwrap();
        assert_eq!(request, Request::GetMemoryStatus);
        let request: Request = serde_json::from_value(json!({ "action": "detectMemoryFull" })).unwrap();
        assert_eq!(request, Request::DetectMemoryFull);
        assert!(serde_json::from_value::<Request>(json!({ "action": "explode" })).is_err());
    }

    #[test]
    fn failure_serializes_flat() {
        let value = Response::failure("boom").to_value();
        assert_eq!(value, json!({ "success": false, "error": "boom" }));
    }

    #[test]
    fn status_uses_camel_case_fields() {
        let response = Response::MemoryFull(MemoryFullResponse {
            success: true,
            memory_full: true,
        });
        assert_eq!(response.to_value(), json!({ "success": true, "memoryFull": true }));
        assert!(response.is_success());
    }

    #[test]
    fn export_carries_usage_text() {
        let report = Report::new(
            "Saved memories",
            Some(crate::usage::UsagePercentage::clamped(87)),
            vec!["Prefers short answers".into()],
        );
        let response = export_response(&report, Locale::En);
        assert_eq!(response.usage.as_deref(), Some("87%"));
        assert_eq!(response.data.len(), 1);
        assert!(response.markdown.starts_with("# Saved memories"));
    }
}
