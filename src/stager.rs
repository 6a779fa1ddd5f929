//! Payload staging
//!
//! Renders a template for one target, pushes the bytes to a temporary file on
//! that target and, when escalation hands the file to a different user, makes
//! it world-readable. Staging never removes what it wrote; the dispatcher
//! decides when the file is discarded.

use crate::error::ErrorKind;
use crate::render::{RenderError, RenderRequest, Renderer};
use crate::target::Target;
use crate::transport::{RemoteCommand, Transport, TransportError};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, warn};

/// A rendered payload sitting in a temporary file on one target
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StagedPayload {
    /// Name of the target the file was written to
    pub target: String,
    pub remote_path: String,
    pub len: usize,
}

impl StagedPayload {
    pub fn belongs_to(&self, target: &Target) -> bool {
        self.target == target.name
    }
}

/// Decides when a staged file needs `chmod a+r`
///
/// The file is owned by the login user. Repair is needed when escalation runs
/// the action as someone else, unless that user is listed in `skip_users`
/// (typically `root`, who can read it anyway).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RepairPolicy {
    pub skip_users: Vec<String>,
}

impl RepairPolicy {
    pub fn skipping(users: impl IntoIterator<Item = impl Into<String>>) -> Self {
        Self {
            skip_users: users.into_iter().map(Into::into).collect(),
        }
    }

    pub fn needs_repair(&self, target: &Target) -> bool {
        if !target.escalation.enabled {
            return false;
        }
        let escalation_user = &target.escalation.user;
        // An unknown login user can never be shown to match
        if target.auth.user.as_deref() == Some(escalation_user.as_str()) {
            return false;
        }
        !self.skip_users.iter().any(|u| u == escalation_user)
    }
}

#[derive(Debug, Error)]
pub enum StageError {
    #[error(transparent)]
    Render(#[from] RenderError),

    #[error("{source}")]
    Transport {
        #[source]
        source: TransportError,
        /// Set when the transfer landed before the failure
        staged: Option<StagedPayload>,
    },

    #[error("{}: permission repair on {} failed: {message}", .staged.target, .staged.remote_path)]
    PermissionRepair {
        staged: StagedPayload,
        message: String,
    },
}

impl StageError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            StageError::Render(e) => e.kind(),
            StageError::Transport { source, .. } => source.kind(),
            StageError::PermissionRepair { .. } => ErrorKind::PermissionRepair,
        }
    }

    /// The remote file left behind by a partial stage, if any
    pub fn staged(&self) -> Option<&StagedPayload> {
        match self {
            StageError::Render(_) => None,
            StageError::Transport { staged, .. } => staged.as_ref(),
            StageError::PermissionRepair { staged, .. } => Some(staged),
        }
    }
}

pub struct PayloadStager {
    renderer: Arc<dyn Renderer>,
    transport: Arc<dyn Transport>,
    policy: RepairPolicy,
}

impl PayloadStager {
    pub fn new(
        renderer: Arc<dyn Renderer>,
        transport: Arc<dyn Transport>,
        policy: RepairPolicy,
    ) -> Self {
        Self {
            renderer,
            transport,
            policy,
        }
    }

    /// Render, transfer and, when the policy asks for it, repair permissions
    pub async fn stage(
        &self,
        target: &Target,
        request: &RenderRequest,
    ) -> Result<StagedPayload, StageError> {
        let staged = self.transfer(target, request).await?;
        self.repair(target, &staged).await?;
        Ok(staged)
    }

    /// Render and push the payload; nothing is written remotely on error
    pub async fn transfer(
        &self,
        target: &Target,
        request: &RenderRequest,
    ) -> Result<StagedPayload, StageError> {
        let bytes = self.renderer.render(&request.template, &request.vars)?;

        let remote_name = remote_name(&request.template);
        let remote_path = self
            .transport
            .transfer(target, &remote_name, &bytes)
            .await
            .map_err(|source| StageError::Transport {
                source,
                staged: None,
            })?;

        let staged = StagedPayload {
            target: target.name.clone(),
            remote_path,
            len: bytes.len(),
        };
        debug!(target = %target.name, "Staged {} bytes at {}", staged.len, staged.remote_path);
        Ok(staged)
    }

    /// `chmod a+r` the staged file if escalation hands it to another user
    ///
    /// A no-op when the policy says no repair is needed. Errors carry the
    /// staged payload so the caller can still remove it.
    pub async fn repair(&self, target: &Target, staged: &StagedPayload) -> Result<(), StageError> {
        if !self.policy.needs_repair(target) {
            return Ok(());
        }

        let command = RemoteCommand::plain(format!(
            "chmod a+r {}",
            shell_words::quote(&staged.remote_path)
        ));

        match self.transport.execute(target, &command).await {
            Ok(output) if output.success() => Ok(()),
            Ok(output) => {
                warn!(
                    target = %target.name,
                    "chmod a+r {} exited with {}",
                    staged.remote_path,
                    output.exit_code
                );
                let message = match output.stderr.trim() {
                    "" => format!("exit code {}", output.exit_code),
                    stderr => stderr.to_string(),
                };
                Err(StageError::PermissionRepair {
                    staged: staged.clone(),
                    message,
                })
            }
            Err(source) => Err(StageError::Transport {
                source,
                staged: Some(staged.clone()),
            }),
        }
    }
}

/// `guest.xml.j2` is staged as `guest.xml`
fn remote_name(template: &Path) -> String {
    let file_name = template
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let stripped = [".j2", ".tera", ".tmpl"]
        .iter()
        .find_map(|ext| file_name.strip_suffix(ext))
        .unwrap_or(file_name.as_str());
    if stripped.is_empty() {
        "source".to_string()
    } else {
        stripped.to_string()
    }
}
