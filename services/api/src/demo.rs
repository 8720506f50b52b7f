use crate::infra::{build_runtime, Runtime};
use admissions::config::ProcessingConfig;
use admissions::error::AppError;
use admissions::workflows::enrollment::{
    AccountRole, ActorContext, Application, ApplicationId, ApprovePayload, ChildData,
    DecisionAction, DecisionRequest, EnrollmentData, ManualClock, ParentData,
    ProcessedApplication, ProcessingError, RejectPayload, TenantId,
};
use admissions::workflows::intake::{ApplicationIntakeImporter, IntakeBatch};
use chrono::{Duration, Utc};
use clap::Args;
use serde::Serialize;
use std::path::PathBuf;
use std::sync::Arc;

const DEMO_INTAKE: &str = "Application ID,Guardian Name,Guardian Email,Guardian Phone,Child Name,Date of Birth,Gender,Program\n\
app-1001,Rosa Lopez,rosa.lopez@example.com,555-0100,Maya Lopez,2020-03-14,F,prek-am\n\
app-1002,Sam Chen,sam.chen@example.com,,Lily Chen,2021-07-02,,toddlers\n";

#[derive(Args, Debug)]
pub(crate) struct DemoArgs {
    /// Tenant the demo runs under.
    #[arg(long, default_value = "demo-school")]
    pub(crate) tenant: String,
    /// Intake CSV export to use instead of the built-in sample.
    #[arg(long)]
    pub(crate) intake_csv: Option<PathBuf>,
}

#[derive(Args, Debug)]
pub(crate) struct ImportArgs {
    /// Intake CSV export to validate
    pub(crate) csv: PathBuf,
    /// Tenant that will own the imported applications
    #[arg(long)]
    pub(crate) tenant: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ImportSummary {
    tenant_id: TenantId,
    accepted: Vec<ApplicationId>,
    skipped: Vec<SkippedLine>,
}

#[derive(Debug, Serialize)]
struct SkippedLine {
    line: u64,
    reason: String,
}

pub(crate) fn run_import(args: ImportArgs) -> Result<(), AppError> {
    let tenant = TenantId(args.tenant);
    let batch = ApplicationIntakeImporter::from_path(&args.csv, &tenant, Utc::now())?;

    let summary = ImportSummary {
        tenant_id: tenant,
        accepted: batch
            .applications
            .iter()
            .map(|application| application.id.clone())
            .collect(),
        skipped: batch
            .skipped
            .into_iter()
            .map(|row| SkippedLine {
                line: row.line,
                reason: row.reason,
            })
            .collect(),
    };
    match serde_json::to_string_pretty(&summary) {
        Ok(rendered) => println!("{rendered}"),
        Err(err) => println!("could not render import summary: {err}"),
    }
    Ok(())
}

pub(crate) fn run_demo(args: DemoArgs) -> Result<(), AppError> {
    let tenant = TenantId(args.tenant);
    let batch = match &args.intake_csv {
        Some(path) => ApplicationIntakeImporter::from_path(path, &tenant, Utc::now())?,
        None => {
            ApplicationIntakeImporter::from_reader(DEMO_INTAKE.as_bytes(), &tenant, Utc::now())?
        }
    };
    let Some((first, second)) = first_two(&batch) else {
        println!("Intake export needs at least two applications for the demo.");
        return Ok(());
    };
    let approval = approval_request(first);
    let (first, second) = (first.id.clone(), second.id.clone());

    let config = ProcessingConfig {
        password_hash_rounds: 1_000,
        ..ProcessingConfig::default()
    };
    let clock = Arc::new(ManualClock::new(Utc::now()));
    let Runtime {
        processor,
        store,
        outbox,
        ..
    } = build_runtime(Default::default(), clock.clone(), &config);
    ApplicationIntakeImporter::load_into(&batch, &store)?;

    let dana = ActorContext::new("admin-dana", "Dana Ortiz", AccountRole::Admin, tenant.0.clone());
    let lee = ActorContext::new("admin-lee", "Lee Park", AccountRole::Admin, tenant.0.clone());
    let outsider = ActorContext::new("admin-kim", "Kim Ross", AccountRole::Admin, "other-school");

    println!("Enrollment application processing demo");
    println!(
        "- Loaded {} pending application(s) for {} ({} skipped)",
        batch.applications.len(),
        tenant,
        batch.skipped.len()
    );

    println!("\n1. {} opens {} for approval", dana.name, first);
    match processor.claim(&dana, &first, DecisionAction::Approve) {
        Ok(lock) => println!("   lock held until {}", lock.expires_at.format("%H:%M:%S")),
        Err(err) => report_error(&err),
    }

    println!("\n2. {} tries to approve {} at the same time", lee.name, first);
    if let Err(err) = processor.process(&lee, &first, approval.clone()) {
        report_error(&err);
    }

    let ttl = config.lock_ttl();
    println!(
        "\n3. {} walks away; {} later the lock has expired",
        dana.name,
        humanize(ttl)
    );
    clock.advance(ttl + Duration::seconds(1));
    match processor.process(&lee, &first, approval) {
        Ok(processed) => report_approval(&processed),
        Err(err) => report_error(&err),
    }

    println!("\n4. {} comes back and tries to reject {}", dana.name, first);
    if let Err(err) = processor.process(&dana, &first, rejection("Program is full")) {
        report_error(&err);
    }

    println!("\n5. {} rejects {}", dana.name, second);
    match processor.process(&dana, &second, rejection("Age cutoff for the toddler room")) {
        Ok(processed) => println!(
            "   status {} | reason: {}",
            processed.application.status.label(),
            processed.application.rejection_reason.unwrap_or_default()
        ),
        Err(err) => report_error(&err),
    }

    println!(
        "\n6. {} from another school looks up {}",
        outsider.name, second
    );
    if let Err(err) = processor.application(&outsider, &second) {
        report_error(&err);
    }

    let sent = outbox.sent();
    println!("\nOutbox ({} notification(s), passwords never included)", sent.len());
    for notification in sent {
        println!(
            "- {} -> {} ({})",
            notification.template, notification.recipient, notification.application_id
        );
    }

    Ok(())
}

fn first_two(batch: &IntakeBatch) -> Option<(&Application, &Application)> {
    let mut applications = batch.applications.iter();
    Some((applications.next()?, applications.next()?))
}

fn approval_request(application: &Application) -> DecisionRequest {
    let guardian = &application.guardian;
    let child = &application.child;

    DecisionRequest::Approve(ApprovePayload {
        parent_data: Some(ParentData {
            name: Some(guardian.name.clone()),
            email: Some(guardian.email.clone()),
            phone: guardian.phone.clone(),
            password: Some("welcome-2025".to_string()),
            send_welcome_email: Some(true),
        }),
        child_data: Some(ChildData {
            name: Some(child.name.clone()),
            date_of_birth: Some(child.date_of_birth.to_string()),
            gender: child.gender.clone(),
            program_id: None,
            start_date: None,
        }),
        enrollment_data: Some(EnrollmentData {
            program_id: application.program_id.clone(),
            status: None,
            start_date: None,
        }),
        notes: Some("Approved during demo".to_string()),
    })
}

fn rejection(reason: &str) -> DecisionRequest {
    DecisionRequest::Reject(RejectPayload {
        rejection_reason: Some(reason.to_string()),
        notify_parent: Some(true),
        notes: None,
    })
}

fn report_approval(processed: &ProcessedApplication) {
    println!("   status {}", processed.application.status.label());
    if let Some(created) = &processed.created {
        println!(
            "   guardian account {} ({})",
            created.guardian.id, created.guardian.email
        );
        println!("   household \"{}\"", created.household.name);
        println!(
            "   child {} {} born {}",
            created.child.first_name, created.child.last_name, created.child.date_of_birth
        );
        println!(
            "   enrollment {} [{}]",
            created.enrollment.id,
            created.enrollment.program_id.as_deref().unwrap_or("no program")
        );
    }
}

fn report_error(err: &ProcessingError) {
    println!("   refused: {} ({})", err, err.code());
}

fn humanize(duration: Duration) -> String {
    let minutes = duration.num_minutes();
    if minutes > 0 {
        format!("{minutes} minute(s)")
    } else {
        format!("{} second(s)", duration.num_seconds())
    }
}
