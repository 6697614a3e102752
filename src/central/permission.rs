use std::fmt;

use async_trait::async_trait;
use serde::Serialize;
use tracing::{info, instrument};

use crate::error::CentralError;

/// Platform permissions the central may need before scanning.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Hash, derive_more::Display, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PermissionKind {
    #[display("fine location")]
    FineLocation,
}

#[derive(Debug, Clone, Copy, Eq, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PermissionStatus {
    Granted,
    Denied,
}

impl PermissionStatus {
    #[must_use]
    pub fn is_granted(self) -> bool {
        matches!(self, Self::Granted)
    }
}

/// Platform permission collaborator.
#[async_trait]
pub trait PermissionGate: Send + Sync + fmt::Debug {
    async fn check(&self, kind: PermissionKind) -> PermissionStatus;

    /// Prompts for the permission. Only called after `check` reported denial.
    async fn request(&self, kind: PermissionKind) -> PermissionStatus;
}

/// Gate for platforms that have no runtime permission model.
#[derive(Debug, Clone, Copy, Default)]
pub struct AlwaysGranted;

#[async_trait]
impl PermissionGate for AlwaysGranted {
    async fn check(&self, _kind: PermissionKind) -> PermissionStatus {
        PermissionStatus::Granted
    }

    async fn request(&self, _kind: PermissionKind) -> PermissionStatus {
        PermissionStatus::Granted
    }
}

/// Gate with fixed answers.
#[derive(Debug, Clone, Copy)]
pub struct FixedPermission {
    checked: PermissionStatus,
    requested: PermissionStatus,
}

impl FixedPermission {
    #[must_use]
    pub fn new(checked: PermissionStatus, requested: PermissionStatus) -> Self {
        Self { checked, requested }
    }

    #[must_use]
    pub fn denied() -> Self {
        Self::new(PermissionStatus::Denied, PermissionStatus::Denied)
    }
}

#[async_trait]
impl PermissionGate for FixedPermission {
    async fn check(&self, _kind: PermissionKind) -> PermissionStatus {
        self.checked
    }

    async fn request(&self, _kind: PermissionKind) -> PermissionStatus {
        self.requested
    }
}

/// Checks a permission and prompts once when it is not yet granted.
#[instrument(skip(gate), level = "debug")]
pub(crate) async fn ensure_granted(
    gate: &dyn PermissionGate,
    kind: PermissionKind,
) -> Result<(), CentralError> {
    if gate.check(kind).await.is_granted() {
        return Ok(());
    }

    let requested = gate.request(kind).await;
    info!(%kind, ?requested, "permission prompt answered");
    if requested.is_granted() {
        Ok(())
    } else {
        Err(CentralError::PermissionDenied { kind })
    }
}
