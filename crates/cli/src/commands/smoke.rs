//! End-to-end smoke run: migrate a throwaway in-memory database, seed the
//! demo dataset, then walk a booking through create, both approval levels,
//! and an administrative cancellation, timing each step.

use std::time::Instant;

use chrono::{Duration, Utc};
use serde::Serialize;

use motorpool_core::domain::approval::ApprovalLevel;
use motorpool_core::domain::booking::{Booking, BookingStatus, ReservationWindow};
use motorpool_core::domain::fleet::VehicleId;
use motorpool_core::domain::user::UserId;
use motorpool_core::workflow::Decision;
use motorpool_db::repositories::Page;
use motorpool_db::{connect_with_settings, migrations, DemoDataset};
use motorpool_engine::{
    ActorContext, ApprovalListRequest, ApproverAssignments, CancelBookingRequest,
    CreateBookingRequest, DecisionRequest, Services,
};

use crate::commands::CommandResult;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
enum SmokeStatus {
    Pass,
    Fail,
    Skipped,
}

#[derive(Debug, Serialize)]
struct SmokeCheck {
    name: &'static str,
    status: SmokeStatus,
    elapsed_ms: u64,
    message: String,
}

#[derive(Debug, Serialize)]
struct SmokeReport {
    command: &'static str,
    status: SmokeStatus,
    summary: String,
    total_elapsed_ms: u64,
    checks: Vec<SmokeCheck>,
}

const STEPS: &[&str] = &[
    "migrate",
    "seed",
    "create_booking",
    "approve_level_one",
    "approve_level_two",
    "cancel_booking",
];

pub fn run() -> CommandResult {
    let started = Instant::now();

    let runtime = match tokio::runtime::Builder::new_current_thread().enable_all().build() {
        Ok(runtime) => runtime,
        Err(error) => {
            return CommandResult::failure(
                "smoke",
                "runtime_init",
                format!("failed to initialize async runtime: {error}"),
                3,
            );
        }
    };

    let checks = runtime.block_on(run_workflow());
    finalize_report(checks, started.elapsed().as_millis() as u64)
}

async fn run_workflow() -> Vec<SmokeCheck> {
    let mut checks = Vec::new();

    macro_rules! step {
        ($name:expr, $body:expr) => {{
            let step_started = Instant::now();
            match $body.await {
                Ok(message) => {
                    checks.push(SmokeCheck {
                        name: $name,
                        status: SmokeStatus::Pass,
                        elapsed_ms: step_started.elapsed().as_millis() as u64,
                        message,
                    });
                }
                Err(message) => {
                    checks.push(SmokeCheck {
                        name: $name,
                        status: SmokeStatus::Fail,
                        elapsed_ms: step_started.elapsed().as_millis() as u64,
                        message,
                    });
                    skip_remaining($name, &mut checks);
                    return checks;
                }
            }
        }};
    }

    let pool = match connect_with_settings("sqlite::memory:", 1, 30).await {
        Ok(pool) => pool,
        Err(error) => {
            checks.push(SmokeCheck {
                name: "migrate",
                status: SmokeStatus::Fail,
                elapsed_ms: 0,
                message: format!("failed to open throwaway database: {error}"),
            });
            skip_remaining("migrate", &mut checks);
            return checks;
        }
    };

    step!("migrate", async {
        migrations::run_pending(&pool).await.map_err(|error| error.to_string())?;
        Ok::<String, String>("schema applied to throwaway database".to_string())
    });
    step!("seed", async {
        let summary = DemoDataset::load(&pool).await.map_err(|error| error.to_string())?;
        Ok::<String, String>(format!(
            "{} users, {} vehicles, {} drivers",
            summary.users, summary.vehicles, summary.drivers
        ))
    });

    let services = Services::from_pool(pool.clone());
    let employee = ActorContext::new(UserId("employee-1".to_string()));
    let admin = ActorContext::new(UserId("admin-1".to_string()));
    let mut booking: Option<Booking> = None;

    step!("create_booking", async {
        let start = Utc::now() + Duration::days(1);
        let window = ReservationWindow::new(start, start + Duration::hours(8))
            .map_err(|error| error.to_string())?;
        let created = services
            .bookings
            .create(
                &employee,
                CreateBookingRequest {
                    requester: UserId("employee-1".to_string()),
                    vehicle_id: VehicleId("vehicle-1".to_string()),
                    driver_id: None,
                    window,
                    department: Some("engineering".to_string()),
                    notes: Some("smoke run".to_string()),
                    approvers: ApproverAssignments::default(),
                },
            )
            .await
            .map_err(|error| error.to_string())?;
        let id = created.id.0.clone();
        booking = Some(created);
        Ok::<String, String>(format!("booking `{id}` pending"))
    });

    let booking = match booking {
        Some(booking) => booking,
        None => return checks,
    };

    for (step_name, approver, level, expected) in [
        (
            "approve_level_one",
            "approver-l1-1",
            ApprovalLevel::First,
            BookingStatus::InProgress,
        ),
        (
            "approve_level_two",
            "approver-l2-1",
            ApprovalLevel::Second,
            BookingStatus::Approved,
        ),
    ] {
        let services = &services;
        let admin = &admin;
        let booking_id = booking.id.clone();
        step!(step_name, async move {
            let approval = services
                .approvals
                .list(
                    admin,
                    ApprovalListRequest {
                        booking_id: Some(booking_id.clone()),
                        show_all: true,
                        ..ApprovalListRequest::default()
                    },
                    Page::default(),
                )
                .await
                .map_err(|error| error.to_string())?
                .into_iter()
                .find(|approval| approval.level == level)
                .ok_or_else(|| format!("level {} approval row missing", level.number()))?;

            let (_, updated) = services
                .approvals
                .record_decision(
                    &ActorContext::new(UserId(approver.to_string())),
                    DecisionRequest {
                        approval_id: approval.id,
                        decision: Decision::Approved,
                        comments: None,
                    },
                )
                .await
                .map_err(|error| error.to_string())?;

            let status = updated.map(|booking| booking.status);
            if status == Some(expected) {
                Ok::<String, String>(format!("booking now {expected:?}"))
            } else {
                Err(format!("expected booking {expected:?}, got {status:?}"))
            }
        });
    }

    {
        let services = &services;
        let admin = &admin;
        let booking_id = booking.id.clone();
        step!("cancel_booking", async move {
            let cancelled = services
                .bookings
                .cancel(
                    admin,
                    CancelBookingRequest {
                        booking_id,
                        reason: "smoke run complete".to_string(),
                    },
                )
                .await
                .map_err(|error| error.to_string())?;
            if cancelled.status == BookingStatus::Cancelled {
                Ok::<String, String>("booking cancelled, vehicle released".to_string())
            } else {
                Err(format!("expected cancelled booking, got {:?}", cancelled.status))
            }
        });
    }

    checks
}

fn skip_remaining(failed: &str, checks: &mut Vec<SmokeCheck>) {
    let next = STEPS
        .iter()
        .position(|step| *step == failed)
        .map_or(STEPS.len(), |index| (index + 1).min(STEPS.len()));
    for step in &STEPS[next..] {
        checks.push(SmokeCheck {
            name: step,
            status: SmokeStatus::Skipped,
            elapsed_ms: 0,
            message: "skipped after earlier failure".to_string(),
        });
    }
}

fn finalize_report(checks: Vec<SmokeCheck>, total_elapsed_ms: u64) -> CommandResult {
    let all_pass = checks.iter().all(|check| check.status == SmokeStatus::Pass);
    let status = if all_pass { SmokeStatus::Pass } else { SmokeStatus::Fail };
    let report = SmokeReport {
        command: "smoke",
        status,
        summary: if all_pass {
            "smoke: full booking workflow round trip passed".to_string()
        } else {
            "smoke: workflow round trip failed".to_string()
        },
        total_elapsed_ms,
        checks,
    };

    let output = serde_json::to_string_pretty(&report).unwrap_or_else(|error| {
        format!(
            "{{\"command\":\"smoke\",\"status\":\"fail\",\"summary\":\"{}\"}}",
            error.to_string().replace('\\', "\\\\").replace('"', "\\\"")
        )
    });

    CommandResult { exit_code: if all_pass { 0 } else { 7 }, output }
}
