//! Request/response protocol between the routing layer and the broker
//!
//! Newline-delimited JSON over a Unix socket. Every workspace request
//! carries the caller identity established by the (external) auth layer.

use crate::admission::RateLimitStatus;
use crate::error::{ErrorKind, WorkspaceError};
use crate::lifecycle::WorkspaceView;
use crate::registry::{TerminalSession, WorkspaceId};
use secrecy::SecretString;
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use workspace_runtime::ExecOutput;

/// Authenticated caller
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Caller {
    pub owner_id: String,
    /// Subscription tier as asserted by the auth layer
    pub tier: String,
    /// Admission key; the owner id when absent
    #[serde(default)]
    pub client_id: Option<String>,
}

impl Caller {
    pub fn admission_key(&self) -> &str {
        self.client_id
            .as_deref()
            .filter(|c| !c.is_empty())
            .unwrap_or(&self.owner_id)
    }
}

/// Request from the routing layer to the broker
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Request {
    CreateWorkspace {
        caller: Caller,
        name: String,
        /// Never serialized back out
        #[serde(default, skip_serializing)]
        secret: Option<SecretString>,
        request_id: String,
    },

    GetWorkspace {
        caller: Caller,
        workspace_id: String,
        request_id: String,
    },

    ListWorkspaces {
        caller: Caller,
        request_id: String,
    },

    StartWorkspace {
        caller: Caller,
        workspace_id: String,
        request_id: String,
    },

    StopWorkspace {
        caller: Caller,
        workspace_id: String,
        request_id: String,
    },

    DeleteWorkspace {
        caller: Caller,
        workspace_id: String,
        request_id: String,
    },

    OpenTerminal {
        caller: Caller,
        workspace_id: String,
        request_id: String,
    },

    CloseTerminal {
        caller: Caller,
        workspace_id: String,
        request_id: String,
    },

    /// Run a command inside a running workspace
    Exec {
        caller: Caller,
        workspace_id: String,
        command: Vec<String>,
        request_id: String,
    },

    /// Liveness check
    Health { request_id: String },
}

impl Request {
    pub fn request_id(&self) -> &str {
        match self {
            Request::CreateWorkspace { request_id, .. } => request_id,
            Request::GetWorkspace { request_id, .. } => request_id,
            Request::ListWorkspaces { request_id, .. } => request_id,
            Request::StartWorkspace { request_id, .. } => request_id,
            Request::StopWorkspace { request_id, .. } => request_id,
            Request::DeleteWorkspace { request_id, .. } => request_id,
            Request::OpenTerminal { request_id, .. } => request_id,
            Request::CloseTerminal { request_id, .. } => request_id,
            Request::Exec { request_id, .. } => request_id,
            Request::Health { request_id } => request_id,
        }
    }

    /// Get request type as string for logging
    pub fn request_type(&self) -> &'static str {
        match self {
            Request::CreateWorkspace { .. } => "create_workspace",
            Request::GetWorkspace { .. } => "get_workspace",
            Request::ListWorkspaces { .. } => "list_workspaces",
            Request::StartWorkspace { .. } => "start_workspace",
            Request::StopWorkspace { .. } => "stop_workspace",
            Request::DeleteWorkspace { .. } => "delete_workspace",
            Request::OpenTerminal { .. } => "open_terminal",
            Request::CloseTerminal { .. } => "close_terminal",
            Request::Exec { .. } => "exec",
            Request::Health { .. } => "health",
        }
    }

    pub fn caller(&self) -> Option<&Caller> {
        match self {
            Request::CreateWorkspace { caller, .. }
            | Request::GetWorkspace { caller, .. }
            | Request::ListWorkspaces { caller, .. }
            | Request::StartWorkspace { caller, .. }
            | Request::StopWorkspace { caller, .. }
            | Request::DeleteWorkspace { caller, .. }
            | Request::OpenTerminal { caller, .. }
            | Request::CloseTerminal { caller, .. }
            | Request::Exec { caller, .. } => Some(caller),
            Request::Health { .. } => None,
        }
    }

    /// HTTP route this request corresponds to, used for admission exemptions
    pub fn path(&self) -> String {
        match self {
            Request::CreateWorkspace { .. } | Request::ListWorkspaces { .. } => {
                "/api/workspaces".to_string()
            }
            Request::GetWorkspace { workspace_id, .. }
            | Request::DeleteWorkspace { workspace_id, .. } => {
                format!("/api/workspaces/{}", workspace_id)
            }
            Request::StartWorkspace { workspace_id, .. } => {
                format!("/api/workspaces/{}/start", workspace_id)
            }
            Request::StopWorkspace { workspace_id, .. } => {
                format!("/api/workspaces/{}/stop", workspace_id)
            }
            Request::OpenTerminal { workspace_id, .. }
            | Request::CloseTerminal { workspace_id, .. } => {
                format!("/api/workspaces/{}/terminal", workspace_id)
            }
            Request::Exec { workspace_id, .. } => {
                format!("/api/workspaces/{}/exec", workspace_id)
            }
            Request::Health { .. } => "/health".to_string(),
        }
    }
}

/// Response from the broker
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Response {
    Workspace {
        workspace: WorkspaceView,
        rate_limit: Option<RateLimitStatus>,
        request_id: String,
    },

    WorkspaceList {
        workspaces: Vec<WorkspaceView>,
        rate_limit: Option<RateLimitStatus>,
        request_id: String,
    },

    Deleted {
        workspace_id: WorkspaceId,
        rate_limit: Option<RateLimitStatus>,
        request_id: String,
    },

    Terminal {
        session: TerminalSession,
        rate_limit: Option<RateLimitStatus>,
        request_id: String,
    },

    TerminalClosed {
        workspace_id: WorkspaceId,
        /// Session that was detached, if one was open
        session_id: Option<Uuid>,
        rate_limit: Option<RateLimitStatus>,
        request_id: String,
    },

    ExecResult {
        output: ExecOutput,
        rate_limit: Option<RateLimitStatus>,
        request_id: String,
    },

    /// Pong response
    Pong { version: String, request_id: String },

    /// Error response
    Error {
        kind: ErrorKind,
        message: String,
        /// HTTP-equivalent status code
        status: u16,
        retry_after_secs: Option<u64>,
        rate_limit: Option<RateLimitStatus>,
        request_id: String,
    },
}

impl Response {
    pub fn request_id(&self) -> &str {
        match self {
            Response::Workspace { request_id, .. } => request_id,
            Response::WorkspaceList { request_id, .. } => request_id,
            Response::Deleted { request_id, .. } => request_id,
            Response::Terminal { request_id, .. } => request_id,
            Response::TerminalClosed { request_id, .. } => request_id,
            Response::ExecResult { request_id, .. } => request_id,
            Response::Pong { request_id, .. } => request_id,
            Response::Error { request_id, .. } => request_id,
        }
    }

    pub fn is_error(&self) -> bool {
        matches!(self, Response::Error { .. })
    }

    pub fn error(
        request_id: String,
        error: &WorkspaceError,
        rate_limit: Option<RateLimitStatus>,
    ) -> Self {
        Response::Error {
            kind: error.kind(),
            message: error.to_string(),
            status: error.status_code(),
            retry_after_secs: error.retry_after_secs(),
            rate_limit,
            request_id,
        }
    }

    pub fn rate_limit(&self) -> Option<&RateLimitStatus> {
        match self {
            Response::Workspace { rate_limit, .. }
            | Response::WorkspaceList { rate_limit, .. }
            | Response::Deleted { rate_limit, .. }
            | Response::Terminal { rate_limit, .. }
            | Response::TerminalClosed { rate_limit, .. }
            | Response::ExecResult { rate_limit, .. }
            | Response::Error { rate_limit, .. } => rate_limit.as_ref(),
            Response::Pong { .. } => None,
        }
    }

    /// Headers the routing layer should attach to its HTTP response
    pub fn headers(&self) -> Vec<(&'static str, String)> {
        let mut headers = self
            .rate_limit()
            .map(RateLimitStatus::headers)
            .unwrap_or_default();
        if let Response::Error {
            retry_after_secs: Some(secs),
            ..
        } = self
        {
            headers.push(("Retry-After", secs.to_string()));
        }
        headers
    }
}

/// Decode a request from JSON
pub fn decode_request(data: &str) -> Result<Request, serde_json::Error> {
    serde_json::from_str(data)
}

/// Encode a response to JSON line
pub fn encode_response(response: &Response) -> String {
    serde_json::to_string(response).unwrap_or_default()
}

/// Decode a response from JSON
pub fn decode_response(data: &str) -> Result<Response, serde_json::Error> {
    serde_json::from_str(data)
}

#[cfg(test)]
mod tests {
    use super::*;
    use secrecy::ExposeSecret;

    #[test]
    fn test_create_request_decodes_secret_and_hides_it() {
        let json = r#"{
            "type": "create_workspace",
            "caller": {"owner_id": "u1", "tier": "free"},
            "name": "demo",
            "secret": "sk-hidden",
            "request_id": "req-1"
        }"#;

        let request = decode_request(json).unwrap();
        assert_eq!(request.request_id(), "req-1");
        assert_eq!(request.request_type(), "create_workspace");
        match &request {
            Request::CreateWorkspace { secret, .. } => {
                assert_eq!(secret.as_ref().unwrap().expose_secret(), "sk-hidden");
            }
            other => panic!("unexpected request {:?}", other),
        }

        assert!(!format!("{:?}", request).contains("sk-hidden"));
        assert!(!serde_json::to_string(&request).unwrap().contains("sk-hidden"));
    }

    #[test]
    fn test_admission_key_falls_back_to_owner() {
        let caller = Caller {
            owner_id: "u1".to_string(),
            tier: "pro".to_string(),
            client_id: None,
        };
        assert_eq!(caller.admission_key(), "u1");

        let caller = Caller {
            client_id: Some("10.0.0.7".to_string()),
            ..caller
        };
        assert_eq!(caller.admission_key(), "10.0.0.7");
    }

    #[test]
    fn test_paths_follow_routes() {
        let caller = Caller {
            owner_id: "u1".to_string(),
            tier: "free".to_string(),
            client_id: None,
        };
        let request = Request::StopWorkspace {
            caller: caller.clone(),
            workspace_id: "abc".to_string(),
            request_id: "r".to_string(),
        };
        assert_eq!(request.path(), "/api/workspaces/abc/stop");

        let health = Request::Health {
            request_id: "r".to_string(),
        };
        assert_eq!(health.path(), "/health");
        assert!(health.caller().is_none());
    }

    #[test]
    fn test_exec_request_decodes_command() {
        let json = r#"{
            "type": "exec",
            "caller": {"owner_id": "u1", "tier": "pro"},
            "workspace_id": "abc",
            "command": ["ls", "-la"],
            "request_id": "req-2"
        }"#;

        let request = decode_request(json).unwrap();
        assert_eq!(request.request_type(), "exec");
        assert_eq!(request.path(), "/api/workspaces/abc/exec");
        match request {
            Request::Exec { command, .. } => assert_eq!(command, vec!["ls", "-la"]),
            other => panic!("unexpected request {:?}", other),
        }

        let close = decode_request(
            r#"{"type":"close_terminal","caller":{"owner_id":"u1","tier":"free"},"workspace_id":"abc","request_id":"r"}"#,
        )
        .unwrap();
        assert_eq!(close.path(), "/api/workspaces/abc/terminal");
    }

    #[test]
    fn test_error_response_carries_retry_hint() {
        let err = WorkspaceError::RateLimitExceeded {
            limit: 60,
            retry_after_secs: 17,
        };
        let status = RateLimitStatus {
            limit: 60,
            remaining: 0,
            reset_after_secs: 17,
            reset_at: 1_700_000_017,
        };
        let response = Response::error("req-9".to_string(), &err, Some(status));

        assert!(response.is_error());
        let json = encode_response(&response);
        let decoded = decode_response(&json).unwrap();
        match decoded {
            Response::Error {
                kind,
                status,
                retry_after_secs,
                ..
            } => {
                assert_eq!(kind, ErrorKind::RateLimitExceeded);
                assert_eq!(status, 429);
                assert_eq!(retry_after_secs, Some(17));
            }
            other => panic!("unexpected response {:?}", other),
        }

        let headers = response.headers();
        assert!(headers.contains(&("X-RateLimit-Limit", "60".to_string())));
        assert!(headers.contains(&("X-RateLimit-Remaining", "0".to_string())));
        assert!(headers.contains(&("X-RateLimit-Reset", "1700000017".to_string())));
        assert!(headers.contains(&("Retry-After", "17".to_string())));
    }
}
