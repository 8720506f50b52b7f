//! CSV intake of submitted enrollment applications.
//!
//! Public-facing application forms are exported as CSV. Each row becomes a
//! `pending` [`Application`] owned by the importing tenant. Rows that cannot
//! be understood are reported and skipped rather than failing the whole file.

use std::io::Read;
use std::path::Path;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Deserializer};
use tracing::{info, warn};

use crate::workflows::enrollment::domain::{
    Application, ApplicationId, ChildDetails, GuardianContact, TenantId,
};
use crate::workflows::enrollment::memory::InMemoryEnrollmentStore;
use crate::workflows::enrollment::repository::StoreError;

#[derive(Debug)]
pub enum IntakeImportError {
    Io(std::io::Error),
    Csv(csv::Error),
    Store(StoreError),
}

impl std::fmt::Display for IntakeImportError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            IntakeImportError::Io(err) => write!(f, "failed to read intake export: {}", err),
            IntakeImportError::Csv(err) => write!(f, "invalid intake CSV data: {}", err),
            IntakeImportError::Store(err) => {
                write!(f, "could not register imported application: {}", err)
            }
        }
    }
}

impl std::error::Error for IntakeImportError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            IntakeImportError::Io(err) => Some(err),
            IntakeImportError::Csv(err) => Some(err),
            IntakeImportError::Store(err) => Some(err),
        }
    }
}

impl From<std::io::Error> for IntakeImportError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err)
    }
}

impl From<csv::Error> for IntakeImportError {
    fn from(err: csv::Error) -> Self {
        Self::Csv(err)
    }
}

impl From<StoreError> for IntakeImportError {
    fn from(err: StoreError) -> Self {
        Self::Store(err)
    }
}

#[derive(Debug, Deserialize)]
struct IntakeRow {
    #[serde(rename = "Application ID")]
    application_id: String,
    #[serde(rename = "Guardian Name")]
    guardian_name: String,
    #[serde(rename = "Guardian Email")]
    guardian_email: String,
    #[serde(rename = "Guardian Phone", default, deserialize_with = "blank_as_none")]
    guardian_phone: Option<String>,
    #[serde(rename = "Child Name")]
    child_name: String,
    #[serde(rename = "Date of Birth")]
    date_of_birth: String,
    #[serde(rename = "Gender", default, deserialize_with = "blank_as_none")]
    gender: Option<String>,
    #[serde(rename = "Program", default, deserialize_with = "blank_as_none")]
    program: Option<String>,
}

fn blank_as_none<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let opt = Option::<String>::deserialize(deserializer)?;
    Ok(opt.filter(|value| !value.trim().is_empty()))
}

/// Row that was left out of the import, with the 1-based CSV line number.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SkippedRow {
    pub line: u64,
    pub reason: String,
}

#[derive(Debug, Default)]
pub struct IntakeBatch {
    pub applications: Vec<Application>,
    pub skipped: Vec<SkippedRow>,
}

pub struct ApplicationIntakeImporter;

impl ApplicationIntakeImporter {
    pub fn from_path<P: AsRef<Path>>(
        path: P,
        tenant_id: &TenantId,
        submitted_at: DateTime<Utc>,
    ) -> Result<IntakeBatch, IntakeImportError> {
        let file = std::fs::File::open(path)?;
        Self::from_reader(file, tenant_id, submitted_at)
    }

    pub fn from_reader<R: Read>(
        reader: R,
        tenant_id: &TenantId,
        submitted_at: DateTime<Utc>,
    ) -> Result<IntakeBatch, IntakeImportError> {
        let mut csv_reader = csv::ReaderBuilder::new()
            .trim(csv::Trim::All)
            .from_reader(reader);
        let headers = csv_reader.headers()?.clone();
        let mut record = csv::StringRecord::new();
        let mut batch = IntakeBatch::default();

        while csv_reader.read_record(&mut record)? {
            let line = record.position().map_or(0, csv::Position::line);
            let row: IntakeRow = record.deserialize(Some(&headers))?;
            match into_application(row, tenant_id, submitted_at) {
                Ok(application) => batch.applications.push(application),
                Err(reason) => {
                    warn!(line, %reason, "skipping intake row");
                    batch.skipped.push(SkippedRow { line, reason });
                }
            }
        }

        Ok(batch)
    }

    /// Register every imported application with the store. Duplicate ids fail the load.
    pub fn load_into(
        batch: &IntakeBatch,
        store: &InMemoryEnrollmentStore,
    ) -> Result<usize, IntakeImportError> {
        for application in &batch.applications {
            store.insert_application(application.clone())?;
        }
        info!(
            imported = batch.applications.len(),
            skipped = batch.skipped.len(),
            "intake batch loaded"
        );
        Ok(batch.applications.len())
    }
}

fn into_application(
    row: IntakeRow,
    tenant_id: &TenantId,
    submitted_at: DateTime<Utc>,
) -> Result<Application, String> {
    if row.application_id.is_empty() {
        return Err("missing application id".to_string());
    }
    if row.guardian_name.is_empty() || row.child_name.is_empty() {
        return Err(format!("application {} is missing a name", row.application_id));
    }
    if !row.guardian_email.contains('@') {
        return Err(format!(
            "application {} has an invalid guardian email",
            row.application_id
        ));
    }
    let date_of_birth = NaiveDate::parse_from_str(&row.date_of_birth, "%Y-%m-%d")
        .map_err(|_| {
            format!(
                "application {} has an unreadable date of birth '{}'",
                row.application_id, row.date_of_birth
            )
        })?;

    Ok(Application::pending(
        ApplicationId(row.application_id),
        tenant_id.clone(),
        GuardianContact {
            name: row.guardian_name,
            email: row.guardian_email,
            phone: row.guardian_phone,
        },
        ChildDetails {
            name: row.child_name,
            date_of_birth,
            gender: row.gender,
        },
        row.program,
        submitted_at,
    ))
}
