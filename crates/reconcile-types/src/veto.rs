//! Veto decisions

use serde::{Deserialize, Serialize};

/// Whether a resource may be actuated right now
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VetoResponse {
    pub allowed: bool,

    /// Name of the veto that decided (set on denial)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub veto_name: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,

    /// When denied, record the skip only and publish no ActuationVetoed event
    #[serde(default)]
    pub suppress_event: bool,
}

impl VetoResponse {
    /// Allow actuation
    pub fn allowed() -> Self {
        Self {
            allowed: true,
            veto_name: None,
            message: None,
            suppress_event: false,
        }
    }

    /// Deny actuation
    pub fn denied(veto_name: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            allowed: false,
            veto_name: Some(veto_name.into()),
            message: Some(message.into()),
            suppress_event: false,
        }
    }

    /// Suppress the ActuationVetoed event for this denial
    pub fn suppressing_event(mut self) -> Self {
        self.suppress_event = true;
        self
    }

    /// Name used when reporting a skip
    pub fn veto_name_or_default(&self) -> &str {
        self.veto_name.as_deref().unwrap_or("UnknownVeto")
    }
}

impl Default for VetoResponse {
    fn default() -> Self {
        Self::allowed()
    }
}
