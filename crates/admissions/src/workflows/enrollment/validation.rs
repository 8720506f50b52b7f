use std::fmt;

use chrono::{DateTime, NaiveDate};
use serde::Serialize;

use super::domain::{normalize_email, EnrollmentStatus};
use super::requests::{
    ApprovePayload, ChildData, DecisionRequest, EnrollmentData, ParentData, RejectPayload,
};

pub const DEFAULT_MAX_REASON_LENGTH: usize = 1000;
pub const DEFAULT_MIN_PASSWORD_LENGTH: usize = 8;
const MAX_NAME_LENGTH: usize = 200;

/// Stable machine-readable reason attached to a field violation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldErrorCode {
    Required,
    TooShort,
    TooLong,
    InvalidFormat,
    InFuture,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FieldError {
    pub field: String,
    pub code: FieldErrorCode,
    pub message: String,
}

/// Every violation found in one pass over a payload.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, thiserror::Error)]
#[serde(transparent)]
#[error("payload failed validation ({} field error(s))", .0.len())]
pub struct ValidationErrors(pub Vec<FieldError>);

impl ValidationErrors {
    fn push(&mut self, field: &str, code: FieldErrorCode, message: impl Into<String>) {
        self.0.push(FieldError {
            field: field.to_string(),
            code,
            message: message.into(),
        });
    }

    pub fn fields(&self) -> impl Iterator<Item = &str> {
        self.0.iter().map(|error| error.field.as_str())
    }

    pub fn has(&self, field: &str) -> bool {
        self.fields().any(|candidate| candidate == field)
    }

    fn into_result<T>(self, value: impl FnOnce() -> T) -> Result<T, ValidationErrors> {
        if self.0.is_empty() {
            Ok(value())
        } else {
            Err(self)
        }
    }
}

/// Guardian login details that passed validation.
#[derive(Clone, PartialEq, Eq)]
pub struct NewGuardian {
    pub name: String,
    pub email: String,
    pub phone: Option<String>,
    pub password: String,
}

impl fmt::Debug for NewGuardian {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NewGuardian")
            .field("name", &self.name)
            .field("email", &self.email)
            .field("phone", &self.phone)
            .field("password", &"<redacted>")
            .finish()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewChild {
    pub name: String,
    pub date_of_birth: NaiveDate,
    pub gender: Option<String>,
    pub program_id: Option<String>,
    pub start_date: Option<NaiveDate>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewEnrollment {
    pub program_id: Option<String>,
    pub status: EnrollmentStatus,
    pub start_date: Option<NaiveDate>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApprovalPlan {
    pub guardian: NewGuardian,
    pub send_welcome_email: bool,
    pub child: NewChild,
    pub enrollment: NewEnrollment,
    pub notes: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RejectionPlan {
    pub reason: String,
    pub notify_parent: bool,
    pub notes: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValidatedDecision {
    Approve(ApprovalPlan),
    Reject(RejectionPlan),
}

/// Side-effect free payload checks run before any lookup or mutation.
#[derive(Debug, Clone)]
pub struct ApplicationValidator {
    max_reason_length: usize,
    min_password_length: usize,
}

impl Default for ApplicationValidator {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_REASON_LENGTH, DEFAULT_MIN_PASSWORD_LENGTH)
    }
}

impl ApplicationValidator {
    pub fn new(max_reason_length: usize, min_password_length: usize) -> Self {
        Self {
            max_reason_length: max_reason_length.max(1),
            min_password_length,
        }
    }

    /// `today` anchors the date-of-birth check.
    pub fn validate(
        &self,
        request: DecisionRequest,
        today: NaiveDate,
    ) -> Result<ValidatedDecision, ValidationErrors> {
        match request {
            DecisionRequest::Approve(payload) => self
                .validate_approval(payload, today)
                .map(ValidatedDecision::Approve),
            DecisionRequest::Reject(payload) => self
                .validate_rejection(payload)
                .map(ValidatedDecision::Reject),
        }
    }

    pub fn validate_rejection(
        &self,
        payload: RejectPayload,
    ) -> Result<RejectionPlan, ValidationErrors> {
        let mut errors = ValidationErrors::default();
        let reason = trimmed(payload.rejection_reason);

        match &reason {
            None => errors.push(
                "rejectionReason",
                FieldErrorCode::Required,
                "a rejection reason is required",
            ),
            Some(reason) if reason.chars().count() > self.max_reason_length => errors.push(
                "rejectionReason",
                FieldErrorCode::TooLong,
                format!(
                    "rejection reason must be at most {} characters",
                    self.max_reason_length
                ),
            ),
            Some(_) => {}
        }

        errors.into_result(|| RejectionPlan {
            reason: reason.unwrap_or_default(),
            notify_parent: payload.notify_parent.unwrap_or(true),
            notes: trimmed(payload.notes),
        })
    }

    pub fn validate_approval(
        &self,
        payload: ApprovePayload,
        today: NaiveDate,
    ) -> Result<ApprovalPlan, ValidationErrors> {
        let mut errors = ValidationErrors::default();

        let guardian = match payload.parent_data {
            Some(parent) => self.check_parent(parent, &mut errors),
            None => {
                errors.push("parentData", FieldErrorCode::Required, "parent data is required");
                None
            }
        };

        let child = match payload.child_data {
            Some(child) => check_child(child, today, &mut errors),
            None => {
                errors.push("childData", FieldErrorCode::Required, "child data is required");
                None
            }
        };

        let enrollment = match payload.enrollment_data {
            Some(enrollment) => check_enrollment(enrollment, &mut errors),
            None => {
                errors.push(
                    "enrollmentData",
                    FieldErrorCode::Required,
                    "enrollment data is required",
                );
                None
            }
        };

        match (guardian, child, enrollment) {
            (Some((guardian, send_welcome_email)), Some(child), Some(enrollment))
                if errors.0.is_empty() =>
            {
                Ok(ApprovalPlan {
                    guardian,
                    send_welcome_email,
                    child,
                    enrollment,
                    notes: trimmed(payload.notes),
                })
            }
            _ => Err(errors),
        }
    }

    fn check_parent(
        &self,
        parent: ParentData,
        errors: &mut ValidationErrors,
    ) -> Option<(NewGuardian, bool)> {
        let name = required_name(parent.name, "parentData.name", errors);

        let email = match trimmed(parent.email) {
            None => {
                errors.push(
                    "parentData.email",
                    FieldErrorCode::Required,
                    "guardian email is required",
                );
                None
            }
            Some(email) if !looks_like_email(&email) => {
                errors.push(
                    "parentData.email",
                    FieldErrorCode::InvalidFormat,
                    "guardian email is not a valid address",
                );
                None
            }
            Some(email) => Some(normalize_email(&email)),
        };

        let password = match parent.password.filter(|password| !password.is_empty()) {
            None => {
                errors.push(
                    "parentData.password",
                    FieldErrorCode::Required,
                    "an initial password is required",
                );
                None
            }
            Some(password) if password.chars().count() < self.min_password_length => {
                errors.push(
                    "parentData.password",
                    FieldErrorCode::TooShort,
                    format!(
                        "password must be at least {} characters",
                        self.min_password_length
                    ),
                );
                None
            }
            Some(password) => Some(password),
        };

        Some((
            NewGuardian {
                name: name?,
                email: email?,
                phone: trimmed(parent.phone),
                password: password?,
            },
            parent.send_welcome_email.unwrap_or(true),
        ))
    }
}

fn check_child(child: ChildData, today: NaiveDate, errors: &mut ValidationErrors) -> Option<NewChild> {
    let name = required_name(child.name, "childData.name", errors);

    let date_of_birth = match trimmed(child.date_of_birth) {
        None => {
            errors.push(
                "childData.dateOfBirth",
                FieldErrorCode::Required,
                "date of birth is required",
            );
            None
        }
        Some(raw) => match parse_date(&raw) {
            None => {
                errors.push(
                    "childData.dateOfBirth",
                    FieldErrorCode::InvalidFormat,
                    "date of birth must be YYYY-MM-DD",
                );
                None
            }
            Some(date) if date > today => {
                errors.push(
                    "childData.dateOfBirth",
                    FieldErrorCode::InFuture,
                    "date of birth cannot be in the future",
                );
                None
            }
            Some(date) => Some(date),
        },
    };

    let start_date = match trimmed(child.start_date) {
        None => None,
        Some(raw) => match parse_date(&raw) {
            Some(date) => Some(date),
            None => {
                errors.push(
                    "childData.startDate",
                    FieldErrorCode::InvalidFormat,
                    "start date must be YYYY-MM-DD",
                );
                return None;
            }
        },
    };

    Some(NewChild {
        name: name?,
        date_of_birth: date_of_birth?,
        gender: trimmed(child.gender),
        program_id: trimmed(child.program_id),
        start_date,
    })
}

fn check_enrollment(
    enrollment: EnrollmentData,
    errors: &mut ValidationErrors,
) -> Option<NewEnrollment> {
    let status = match trimmed(enrollment.status) {
        None => Some(EnrollmentStatus::default()),
        Some(raw) => {
            let status = EnrollmentStatus::parse(&raw);
            if status.is_none() {
                errors.push(
                    "enrollmentData.status",
                    FieldErrorCode::InvalidFormat,
                    format!("unknown enrollment status '{raw}'"),
                );
            }
            status
        }
    };

    let start_date = match trimmed(enrollment.start_date) {
        None => Some(None),
        Some(raw) => {
            let date = parse_date(&raw);
            if date.is_none() {
                errors.push(
                    "enrollmentData.startDate",
                    FieldErrorCode::InvalidFormat,
                    "start date must be YYYY-MM-DD",
                );
            }
            date.map(Some)
        }
    };

    Some(NewEnrollment {
        program_id: trimmed(enrollment.program_id),
        status: status?,
        start_date: start_date?,
    })
}

fn required_name(value: Option<String>, field: &str, errors: &mut ValidationErrors) -> Option<String> {
    match trimmed(value) {
        None => {
            errors.push(field, FieldErrorCode::Required, "name is required");
            None
        }
        Some(name) if name.chars().count() > MAX_NAME_LENGTH => {
            errors.push(
                field,
                FieldErrorCode::TooLong,
                format!("name must be at most {MAX_NAME_LENGTH} characters"),
            );
            None
        }
        Some(name) => Some(name),
    }
}

fn trimmed(value: Option<String>) -> Option<String> {
    value
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

fn looks_like_email(value: &str) -> bool {
    if value.chars().any(char::is_whitespace) {
        return false;
    }
    let Some((local, domain)) = value.split_once('@') else {
        return false;
    };
    !local.is_empty()
        && !domain.contains('@')
        && domain
            .split_once('.')
            .is_some_and(|(head, tail)| !head.is_empty() && !tail.is_empty() && !tail.ends_with('.'))
}

pub(crate) fn parse_date(value: &str) -> Option<NaiveDate> {
    let trimmed = value.trim();
    if let Ok(date) = NaiveDate::parse_from_str(trimmed, "%Y-%m-%d") {
        return Some(date);
    }
    DateTime::parse_from_rfc3339(trimmed)
        .ok()
        .map(|dt| dt.date_naive())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn email_shape_checks() {
        assert!(looks_like_email("rosa@example.com"));
        assert!(looks_like_email("r.lopez+kids@mail.school.org"));
        assert!(!looks_like_email("rosa@example"));
        assert!(!looks_like_email("@example.com"));
        assert!(!looks_like_email("rosa@@example.com"));
        assert!(!looks_like_email("rosa lopez@example.com"));
        assert!(!looks_like_email("rosa@.com"));
    }

    #[test]
    fn enrollment_data_is_parsed_leniently() {
        let mut errors = ValidationErrors::default();
        let enrollment = check_enrollment(
            EnrollmentData {
                program_id: Some(" prek-am ".to_string()),
                status: Some("Waitlisted".to_string()),
                start_date: Some("2025-09-01T00:00:00Z".to_string()),
            },
            &mut errors,
        )
        .expect("valid enrollment data");

        assert!(errors.0.is_empty());
        assert_eq!(enrollment.program_id.as_deref(), Some("prek-am"));
        assert_eq!(enrollment.status, EnrollmentStatus::Waitlisted);
        assert_eq!(enrollment.start_date, NaiveDate::from_ymd_opt(2025, 9, 1));
    }

    #[test]
    fn bad_enrollment_values_are_field_errors() {
        let mut errors = ValidationErrors::default();
        let enrollment = check_enrollment(
            EnrollmentData {
                program_id: None,
                status: Some("enrolled".to_string()),
                start_date: Some("next week".to_string()),
            },
            &mut errors,
        );

        assert!(enrollment.is_none());
        assert!(errors.has("enrollmentData.status"));
        assert!(errors.has("enrollmentData.startDate"));
    }

    #[test]
    fn parse_date_accepts_plain_and_rfc3339() {
        let expected = NaiveDate::from_ymd_opt(2019, 4, 2).expect("valid");
        assert_eq!(parse_date("2019-04-02"), Some(expected));
        assert_eq!(parse_date("2019-04-02T00:00:00Z"), Some(expected));
        assert_eq!(parse_date("04/02/2019"), None);
    }
}
