//! Typed message content

use crate::wire::JsonObject;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

fn default_true() -> bool {
    true
}

/// `status` field of reply content
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ReplyStatus {
    #[default]
    Ok,
    Error,
    /// Deprecated since protocol 5.1; still used for interrupted work
    Abort,
}

/// Content with no fields, serialized as `{}`
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Empty {}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct KernelInfoRequest {}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LanguageInfo {
    pub name: String,
    #[serde(default)]
    pub version: String,
    #[serde(default)]
    pub mimetype: String,
    #[serde(default)]
    pub file_extension: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pygments_lexer: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub codemirror_mode: Option<Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HelpLink {
    pub text: String,
    pub url: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KernelInfoReply {
    #[serde(default)]
    pub status: ReplyStatus,
    pub protocol_version: String,
    #[serde(default)]
    pub implementation: String,
    #[serde(default)]
    pub implementation_version: String,
    pub language_info: LanguageInfo,
    #[serde(default)]
    pub banner: String,
    #[serde(default)]
    pub help_links: Vec<HelpLink>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecuteRequest {
    pub code: String,
    #[serde(default)]
    pub silent: bool,
    #[serde(default = "default_true")]
    pub store_history: bool,
    #[serde(default)]
    pub user_expressions: JsonObject,
    #[serde(default = "default_true")]
    pub allow_stdin: bool,
    #[serde(default)]
    pub stop_on_error: bool,
}

impl ExecuteRequest {
    pub fn new(code: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            silent: false,
            store_history: true,
            user_expressions: JsonObject::new(),
            allow_stdin: true,
            stop_on_error: false,
        }
    }
}

/// `execute_reply`, discriminated by `status`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum ExecuteReply {
    Ok {
        execution_count: u64,
        #[serde(default)]
        user_expressions: JsonObject,
        #[serde(default)]
        payload: Vec<Value>,
    },
    Error {
        #[serde(default)]
        execution_count: u64,
        ename: String,
        evalue: String,
        #[serde(default)]
        traceback: Vec<String>,
    },
    Abort {
        #[serde(default)]
        execution_count: u64,
    },
}

impl ExecuteReply {
    pub fn status(&self) -> ReplyStatus {
        match self {
            ExecuteReply::Ok { .. } => ReplyStatus::Ok,
            ExecuteReply::Error { .. } => ReplyStatus::Error,
            ExecuteReply::Abort { .. } => ReplyStatus::Abort,
        }
    }

    pub fn execution_count(&self) -> u64 {
        match self {
            ExecuteReply::Ok { execution_count, .. }
            | ExecuteReply::Error { execution_count, .. }
            | ExecuteReply::Abort { execution_count } => *execution_count,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecuteInput {
    pub code: String,
    pub execution_count: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecuteResult {
    pub execution_count: u64,
    pub data: JsonObject,
    #[serde(default)]
    pub metadata: JsonObject,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StreamName {
    Stdout,
    Stderr,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Stream {
    pub name: StreamName,
    pub text: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionState {
    Starting,
    Busy,
    Idle,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KernelStatus {
    pub execution_state: ExecutionState,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IsCompleteRequest {
    pub code: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Completeness {
    Complete,
    Incomplete,
    Invalid,
    Unknown,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IsCompleteReply {
    pub status: Completeness,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub indent: String,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct InterruptRequest {}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct InterruptReply {
    #[serde(default)]
    pub status: ReplyStatus,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ShutdownRequest {
    #[serde(default)]
    pub restart: bool,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ShutdownReply {
    #[serde(default)]
    pub status: ReplyStatus,
    #[serde(default)]
    pub restart: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommOpen {
    pub comm_id: String,
    pub target_name: String,
    #[serde(default)]
    pub data: JsonObject,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_module: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommMsg {
    pub comm_id: String,
    #[serde(default)]
    pub data: JsonObject,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommClose {
    pub comm_id: String,
    #[serde(default)]
    pub data: JsonObject,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct CommInfoRequest {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_name: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommTarget {
    pub target_name: String,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct CommInfoReply {
    #[serde(default)]
    pub status: ReplyStatus,
    pub comms: BTreeMap<String, CommTarget>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryRequest {
    #[serde(default)]
    pub output: bool,
    #[serde(default)]
    pub raw: bool,
    pub hist_access_type: String,
    #[serde(default)]
    pub session: Option<i64>,
    #[serde(default)]
    pub start: Option<u64>,
    #[serde(default)]
    pub stop: Option<u64>,
    #[serde(default)]
    pub n: Option<usize>,
    #[serde(default)]
    pub pattern: Option<String>,
    #[serde(default)]
    pub unique: bool,
}

/// `(session, line_number, input)`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryEntry(pub i64, pub u64, pub String);

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct HistoryReply {
    #[serde(default)]
    pub status: ReplyStatus,
    pub history: Vec<HistoryEntry>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InputRequest {
    pub prompt: String,
    #[serde(default)]
    pub password: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InputReply {
    pub value: String,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct DisplayData {
    pub data: JsonObject,
    #[serde(default)]
    pub metadata: JsonObject,
    #[serde(default)]
    pub transient: JsonObject,
}

impl DisplayData {
    pub fn display_id(&self) -> Option<&str> {
        self.transient.get("display_id").and_then(Value::as_str)
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ConnectRequest {}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConnectReply {
    #[serde(default)]
    pub status: ReplyStatus,
    pub shell_port: u16,
    pub iopub_port: u16,
    pub stdin_port: u16,
    pub hb_port: u16,
    pub control_port: u16,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompleteRequest {
    pub code: String,
    pub cursor_pos: usize,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct CompleteReply {
    #[serde(default)]
    pub status: ReplyStatus,
    pub matches: Vec<String>,
    pub cursor_start: usize,
    pub cursor_end: usize,
    #[serde(default)]
    pub metadata: JsonObject,
}

/// IOPUB `error` broadcast, and the body of error replies
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorContent {
    pub ename: String,
    pub evalue: String,
    #[serde(default)]
    pub traceback: Vec<String>,
}

/// Generic `<type>_reply` with `status: error`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorReply {
    pub status: ReplyStatus,
    #[serde(flatten)]
    pub error: ErrorContent,
}

impl ErrorReply {
    pub fn new(error: ErrorContent) -> Self {
        Self {
            status: ReplyStatus::Error,
            error,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ClearOutput {
    #[serde(default)]
    pub wait: bool,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_execute_request_defaults() {
        let request: ExecuteRequest = serde_json::from_value(json!({"code": "x"})).unwrap();
        assert!(request.store_history);
        assert!(request.allow_stdin);
        assert!(!request.silent);
        assert_eq!(request, ExecuteRequest::new("x"));
    }

    #[test]
    fn test_execute_reply_status_tag() {
        let ok = ExecuteReply::Ok {
            execution_count: 3,
            user_expressions: JsonObject::new(),
            payload: vec![],
        };
        let value = serde_json::to_value(&ok).unwrap();
        assert_eq!(value["status"], "ok");
        assert_eq!(value["execution_count"], 3);

        let abort: ExecuteReply =
            serde_json::from_value(json!({"status": "abort", "execution_count": 2})).unwrap();
        assert_eq!(abort.status(), ReplyStatus::Abort);
        assert_eq!(abort.execution_count(), 2);

        let error: ExecuteReply = serde_json::from_value(json!({
            "status": "error",
            "execution_count": 1,
            "ename": "ValueError",
            "evalue": "bad",
            "traceback": ["line 1"]
        }))
        .unwrap();
        assert_eq!(error.status(), ReplyStatus::Error);
    }

    #[test]
    fn test_error_reply_is_flat() {
        let reply = ErrorReply::new(ErrorContent {
            ename: "Panic".to_string(),
            evalue: "boom".to_string(),
            traceback: vec![],
        });
        assert_eq!(
            serde_json::to_value(&reply).unwrap(),
            json!({"status": "error", "ename": "Panic", "evalue": "boom", "traceback": []})
        );
    }

    #[test]
    fn test_history_entry_is_a_triple() {
        let entry = HistoryEntry(0, 4, "print(1)".to_string());
        assert_eq!(serde_json::to_value(&entry).unwrap(), json!([0, 4, "print(1)"]));
    }

    #[test]
    fn test_display_id_lookup() {
        let mut display = DisplayData::default();
        assert_eq!(display.display_id(), None);
        display
            .transient
            .insert("display_id".to_string(), json!("plot-1"));
        assert_eq!(display.display_id(), Some("plot-1"));
    }
}
