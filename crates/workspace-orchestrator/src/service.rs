//! Workspace service
//!
//! Puts the admission controller in front of the lifecycle controller and
//! serves the protocol over a Unix socket, one task per connection.

use crate::admission::{AdmissionController, RateLimitStatus};
use crate::error::{Result, WorkspaceError};
use crate::lifecycle::{CreateWorkspace, WorkspaceController};
use crate::protocol::{decode_request, encode_response, Request, Response};
use crate::registry::WorkspaceId;
use crate::tier::Tier;
use std::path::Path;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::{UnixListener, UnixStream};
use tracing::{debug, error, info, warn};

pub const SERVICE_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Longest request line accepted from a client; longer lines close the connection
const MAX_LINE_BYTES: usize = 64 * 1024;

#[derive(Clone)]
pub struct WorkspaceService {
    controller: Arc<WorkspaceController>,
    admission: Arc<AdmissionController>,
}

impl WorkspaceService {
    pub fn new(controller: Arc<WorkspaceController>, admission: Arc<AdmissionController>) -> Self {
        Self {
            controller,
            admission,
        }
    }

    pub fn controller(&self) -> &Arc<WorkspaceController> {
        &self.controller
    }

    pub fn admission(&self) -> &Arc<AdmissionController> {
        &self.admission
    }

    /// Serve requests on a Unix socket until the listener fails
    pub async fn run(&self, socket_path: &Path) -> anyhow::Result<()> {
        // Remove old socket if exists
        let _ = std::fs::remove_file(socket_path);

        let listener = UnixListener::bind(socket_path)?;

        // Only the owning user may connect
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(socket_path, std::fs::Permissions::from_mode(0o600))?;
        }

        info!(socket = %socket_path.display(), version = SERVICE_VERSION, "Workspace service listening");

        loop {
            match listener.accept().await {
                Ok((stream, _)) => {
                    let service = self.clone();
                    tokio::spawn(async move {
                        if let Err(e) = service.handle_client(stream).await {
                            error!(error = %e, "Client handler error");
                        }
                    });
                }
                Err(e) => {
                    error!(error = %e, "Accept error");
                }
            }
        }
    }

    async fn handle_client(&self, stream: UnixStream) -> anyhow::Result<()> {
        let (reader, mut writer) = stream.into_split();
        let mut reader = BufReader::new(reader);
        let mut line = Vec::new();

        loop {
            line.clear();
            let n = (&mut reader)
                .take(MAX_LINE_BYTES as u64 + 1)
                .read_until(b'\n', &mut line)
                .await?;
            if n == 0 {
                break; // Client disconnected
            }

            if line.len() > MAX_LINE_BYTES && !line.ends_with(b"\n") {
                warn!(limit = MAX_LINE_BYTES, "Request line too long, closing connection");
                let err = WorkspaceError::InvalidRequest("request too large".to_string());
                let response = Response::error("unknown".to_string(), &err, None);
                writer.write_all(encode_response(&response).as_bytes()).await?;
                writer.write_all(b"\n").await?;
                break;
            }

            let response = match std::str::from_utf8(&line) {
                Ok(text) => match decode_request(text.trim()) {
                    Ok(request) => self.handle_request(request).await,
                    Err(e) => {
                        let err = WorkspaceError::InvalidRequest(format!("malformed request: {}", e));
                        Response::error("unknown".to_string(), &err, None)
                    }
                },
                Err(_) => {
                    let err = WorkspaceError::InvalidRequest("request is not UTF-8".to_string());
                    Response::error("unknown".to_string(), &err, None)
                }
            };

            writer.write_all(encode_response(&response).as_bytes()).await?;
            writer.write_all(b"\n").await?;
        }

        Ok(())
    }

    /// Admit, dispatch and answer a single request
    pub async fn handle_request(&self, request: Request) -> Response {
        let request_id = request.request_id().to_string();

        debug!(
            request_id = %request_id,
            request_type = %request.request_type(),
            "Handling workspace request"
        );

        let Some(caller) = request.caller() else {
            return Response::Pong {
                version: SERVICE_VERSION.to_string(),
                request_id,
            };
        };

        let tier: Tier = match caller.tier.parse() {
            Ok(tier) => tier,
            Err(e) => {
                warn!(request_id = %request_id, tier = %caller.tier, "Rejected unknown tier");
                return Response::error(request_id, &e, None);
            }
        };

        let admission = self
            .admission
            .check(&request.path(), caller.admission_key(), tier);
        let rate_limit = admission.status().cloned();
        if let Err(e) = admission.into_result() {
            return Response::error(request_id, &e, rate_limit);
        }

        match self.dispatch(request, rate_limit.clone()).await {
            Ok(response) => response,
            Err(e) => {
                debug!(request_id = %request_id, error = %e, "Workspace request failed");
                Response::error(request_id, &e, rate_limit)
            }
        }
    }

    async fn dispatch(
        &self,
        request: Request,
        rate_limit: Option<RateLimitStatus>,
    ) -> Result<Response> {
        let controller = &self.controller;
        let response = match request {
            Request::CreateWorkspace {
                caller,
                name,
                secret,
                request_id,
            } => {
                let create = CreateWorkspace { name, secret };
                let workspace = controller
                    .create(&caller.owner_id, create, &caller.tier)
                    .await?;
                Response::Workspace {
                    workspace,
                    rate_limit,
                    request_id,
                }
            }

            Request::GetWorkspace {
                caller,
                workspace_id,
                request_id,
            } => {
                let id: WorkspaceId = workspace_id.parse()?;
                Response::Workspace {
                    workspace: controller.get(&caller.owner_id, id).await?,
                    rate_limit,
                    request_id,
                }
            }

            Request::ListWorkspaces { caller, request_id } => Response::WorkspaceList {
                workspaces: controller.list(&caller.owner_id),
                rate_limit,
                request_id,
            },

            Request::StartWorkspace {
                caller,
                workspace_id,
                request_id,
            } => {
                let id: WorkspaceId = workspace_id.parse()?;
                Response::Workspace {
                    workspace: controller.start(&caller.owner_id, id).await?,
                    rate_limit,
                    request_id,
                }
            }

            Request::StopWorkspace {
                caller,
                workspace_id,
                request_id,
            } => {
                let id: WorkspaceId = workspace_id.parse()?;
                Response::Workspace {
                    workspace: controller.stop(&caller.owner_id, id).await?,
                    rate_limit,
                    request_id,
                }
            }

            Request::DeleteWorkspace {
                caller,
                workspace_id,
                request_id,
            } => {
                let id: WorkspaceId = workspace_id.parse()?;
                controller.delete(&caller.owner_id, id).await?;
                Response::Deleted {
                    workspace_id: id,
                    rate_limit,
                    request_id,
                }
            }

            Request::OpenTerminal {
                caller,
                workspace_id,
                request_id,
            } => {
                let id: WorkspaceId = workspace_id.parse()?;
                Response::Terminal {
                    session: controller.open_terminal(&caller.owner_id, id).await?,
                    rate_limit,
                    request_id,
                }
            }

            Request::CloseTerminal {
                caller,
                workspace_id,
                request_id,
            } => {
                let id: WorkspaceId = workspace_id.parse()?;
                let closed = controller.close_terminal(&caller.owner_id, id).await?;
                Response::TerminalClosed {
                    workspace_id: id,
                    session_id: closed.map(|session| session.id),
                    rate_limit,
                    request_id,
                }
            }

            Request::Exec {
                caller,
                workspace_id,
                command,
                request_id,
            } => {
                let id: WorkspaceId = workspace_id.parse()?;
                Response::ExecResult {
                    output: controller.exec(&caller.owner_id, id, command).await?,
                    rate_limit,
                    request_id,
                }
            }

            Request::Health { request_id } => Response::Pong {
                version: SERVICE_VERSION.to_string(),
                request_id,
            },
        };
        Ok(response)
    }
}
