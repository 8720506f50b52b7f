use std::fmt;

use serde::{Deserialize, Serialize};

use super::locks::DecisionAction;

/// Inbound decision, as posted by an administrator.
///
/// Fields stay loose (`Option`/`String`); the validator reports every
/// problem in one pass.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "action", content = "payload", rename_all = "snake_case")]
pub enum DecisionRequest {
    Approve(ApprovePayload),
    Reject(RejectPayload),
}

impl DecisionRequest {
    pub fn action(&self) -> DecisionAction {
        match self {
            DecisionRequest::Approve(_) => DecisionAction::Approve,
            DecisionRequest::Reject(_) => DecisionAction::Reject,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ApprovePayload {
    pub parent_data: Option<ParentData>,
    pub child_data: Option<ChildData>,
    pub enrollment_data: Option<EnrollmentData>,
    pub notes: Option<String>,
}

#[derive(Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ParentData {
    pub name: Option<String>,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub password: Option<String>,
    pub send_welcome_email: Option<bool>,
}

impl fmt::Debug for ParentData {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ParentData")
            .field("name", &self.name)
            .field("email", &self.email)
            .field("phone", &self.phone)
            .field("password", &self.password.as_ref().map(|_| "<redacted>"))
            .field("send_welcome_email", &self.send_welcome_email)
            .finish()
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ChildData {
    pub name: Option<String>,
    pub date_of_birth: Option<String>,
    pub gender: Option<String>,
    pub program_id: Option<String>,
    pub start_date: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct EnrollmentData {
    pub program_id: Option<String>,
    pub status: Option<String>,
    pub start_date: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RejectPayload {
    pub rejection_reason: Option<String>,
    pub notify_parent: Option<bool>,
    pub notes: Option<String>,
}
