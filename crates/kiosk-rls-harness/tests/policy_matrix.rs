#![allow(missing_docs, clippy::unwrap_used, clippy::expect_used)]
//! End-to-end runs of the policy matrix against the in-memory RLS backend.
//!
//! A correctly configured backend must produce a clean run; each broken
//! policy must surface as exactly the failing checks it affects while every
//! other check still runs.

use assert_matches::assert_matches;
use kiosk_rls_harness::testing::{self, Fault, MemoryBackend, ATHLETE_ID};
use kiosk_rls_harness::{
    BackendError, CapturedConsole, Harness, HarnessError, Role, RunReport, Verdict,
};
use serde_json::json;

async fn run(backend: &MemoryBackend) -> (RunReport, CapturedConsole) {
    let config = testing::config();
    let console = CapturedConsole::new();
    let report = Harness::new(backend, &config, &console)
        .run(1, testing::fixed_clock)
        .await
        .unwrap();
    (report, console)
}

fn verdict_of(report: &RunReport, label: &str) -> Verdict {
    report.runs[0]
        .records()
        .iter()
        .find(|r| r.label == label)
        .map(|r| r.verdict)
        .unwrap_or_else(|| panic!("no check labelled {label}"))
}

fn failing_labels(report: &RunReport) -> Vec<String> {
    report.runs[0]
        .records()
        .iter()
        .filter(|r| r.verdict.is_failure())
        .map(|r| r.label.clone())
        .collect()
}

#[tokio::test]
async fn sound_policies_pass_every_check() {
    let backend = MemoryBackend::standard();
    let (report, console) = run(&backend).await;

    assert_eq!(failing_labels(&report), Vec::<String>::new());
    assert_eq!(report.exit_code(), 0);

    let tally = &report.runs[0];
    // 3 resources x (6 non-staff + 4 staff) + 2 workflow checks
    assert_eq!(tally.records().len(), 32);
    assert_eq!(tally.passed(), 32);
    assert!(console.text().contains("All RLS checks passed"));
    assert!(console.lines().contains(&"== access_logs / non-staff (expect denied) ==".to_string()));
}

#[tokio::test]
async fn harness_rows_are_cleaned_up_except_access_denials() {
    let backend = MemoryBackend::standard();
    run(&backend).await;

    let logs = backend.rows("access_logs");
    // the non-staff denial plus the check-in log; the staff row was deleted
    assert_eq!(logs.len(), 2);
    assert!(logs.iter().any(|r| r["reason_code"] == "PAYMENT_BLOCKED"
        && r["rejection_reason"] == "rls harness denied"));
    assert!(logs.iter().all(|r| r["reason_code"] != "MANUAL_REVIEW"));

    // staff removes what non-staff wrote to counters and slots
    assert!(backend.rows("athlete_monthly_counters").is_empty());
    assert!(backend.rows("schedule_slot_assignments").is_empty());
}

#[tokio::test]
async fn repeated_runs_do_not_accumulate_counter_rows() {
    let backend = MemoryBackend::standard();
    let config = testing::config();
    let console = CapturedConsole::new();

    let report = Harness::new(&backend, &config, &console)
        .run(3, testing::fixed_clock)
        .await
        .unwrap();

    assert_eq!(report.exit_code(), 0);
    assert_eq!(report.stability.failure_count(), 0);
    assert!(backend.rows("athlete_monthly_counters").is_empty());
    // one denial and one check-in per run
    assert_eq!(backend.rows("access_logs").len(), 6);
}

#[tokio::test]
async fn denied_log_id_feeds_the_non_staff_update_attempt() {
    let backend = MemoryBackend::standard();
    run(&backend).await;

    let denial_id = backend
        .rows("access_logs")
        .into_iter()
        .find(|r| r["reason_code"] == "PAYMENT_BLOCKED")
        .map(|r| r["id"].clone())
        .unwrap();
    let denial = backend
        .rows("access_logs")
        .into_iter()
        .find(|r| r["id"] == denial_id)
        .unwrap();
    assert_eq!(denial["rejection_reason"], "rls harness denied");

    let calls = backend.calls();
    let insert = calls
        .iter()
        .position(|c| c == "non-staff insert access_logs")
        .unwrap();
    let update = calls
        .iter()
        .position(|c| c == "non-staff update access_logs")
        .unwrap();
    assert!(insert < update);
}

#[tokio::test]
async fn leaked_reads_fail_only_the_select_check() {
    let backend = MemoryBackend::standard()
        .seed(
            "athlete_monthly_counters",
            json!({ "athlete_id": "someone-else", "period_start": "2026-09-01" }),
        )
        .with_fault(Fault::LeakReads("athlete_monthly_counters".into()));
    let (report, console) = run(&backend).await;

    assert_eq!(
        failing_labels(&report),
        vec!["athlete_monthly_counters: non-staff select is blocked or empty"]
    );
    assert_eq!(report.exit_code(), 1);
    assert!(console
        .lines_starting_with("FAIL")
        .iter()
        .any(|l| l.contains("got 1 row(s)")));
}

#[tokio::test]
async fn self_granted_access_is_caught() {
    let backend =
        MemoryBackend::standard().with_fault(Fault::AcceptPrivilegedInsert("access_logs".into()));
    let (report, _) = run(&backend).await;

    assert_eq!(
        failing_labels(&report),
        vec!["access_logs: non-staff cannot insert privileged row"]
    );
}

#[tokio::test]
async fn non_staff_writes_are_caught_on_own_and_athlete_rows() {
    let backend = MemoryBackend::standard()
        .with_fault(Fault::AllowNonStaffWrites("schedule_slot_assignments".into()));
    let (report, _) = run(&backend).await;

    assert_eq!(
        failing_labels(&report),
        vec![
            "schedule_slot_assignments: non-staff cannot update its own row",
            "schedule_slot_assignments: non-staff cannot update athlete rows",
            "schedule_slot_assignments: non-staff cannot delete its own row",
        ]
    );
}

#[tokio::test]
async fn rejected_self_service_insert_skips_its_dependent_checks() {
    let backend = MemoryBackend::standard()
        .with_fault(Fault::RejectSelfServiceInsert("access_logs".into()));
    let (report, console) = run(&backend).await;

    assert_eq!(
        failing_labels(&report),
        vec!["access_logs: non-staff can insert self-limiting row"]
    );
    assert_eq!(
        verdict_of(&report, "access_logs: non-staff cannot update its own row"),
        Verdict::Skipped
    );
    assert_eq!(
        verdict_of(&report, "access_logs: non-staff cannot delete its own row"),
        Verdict::Skipped
    );
    // the athlete-wide attempt does not depend on the insert
    assert_eq!(
        verdict_of(&report, "access_logs: non-staff cannot update athlete rows"),
        Verdict::Pass
    );
    assert_eq!(report.runs[0].skipped(), 2);
    assert_eq!(console.lines_starting_with("SKIP").len(), 2);
}

#[tokio::test]
async fn denied_staff_breaks_the_lifecycle_but_the_run_continues() {
    let backend =
        MemoryBackend::standard().with_fault(Fault::DenyStaff("athlete_monthly_counters".into()));
    let (report, _) = run(&backend).await;

    assert_eq!(
        failing_labels(&report),
        vec![
            "athlete_monthly_counters: staff can select",
            "athlete_monthly_counters: staff can insert",
        ]
    );
    assert_eq!(
        verdict_of(&report, "athlete_monthly_counters: staff can delete its row"),
        Verdict::Skipped
    );
    // later resources and the workflow still ran
    assert_eq!(
        verdict_of(&report, "schedule_slot_assignments: staff can delete its row"),
        Verdict::Pass
    );
    assert_eq!(
        verdict_of(&report, "kiosk_check_in: staff sees the resulting access log"),
        Verdict::Pass
    );
}

#[tokio::test]
async fn missing_representation_skips_staff_round_trip() {
    let backend = MemoryBackend::standard()
        .with_fault(Fault::OmitInsertedRows("schedule_slot_assignments".into()));
    let (report, _) = run(&backend).await;

    assert_eq!(
        verdict_of(&report, "schedule_slot_assignments: staff can insert"),
        Verdict::Pass
    );
    assert_eq!(
        verdict_of(&report, "schedule_slot_assignments: staff can update its row"),
        Verdict::Skipped
    );
    assert_eq!(report.exit_code(), 0);
}

#[tokio::test]
async fn staff_transport_faults_are_inconclusive() {
    let backend = MemoryBackend::standard().with_fault(Fault::StaffTransportDown);
    let (report, console) = run(&backend).await;

    let tally = &report.runs[0];
    assert_eq!(tally.failed(), 0);
    // per resource: select and insert; plus the workflow read
    assert_eq!(tally.inconclusive(), 7);
    assert_eq!(report.exit_code(), 1);
    assert!(console.text().contains("inconclusive"));
}

#[tokio::test]
async fn check_in_without_side_effect_is_detected() {
    let backend = MemoryBackend::standard().with_fault(Fault::CheckInWithoutSideEffect);
    let (report, console) = run(&backend).await;

    // the denial row written earlier for the same athlete does not count
    assert_eq!(
        failing_labels(&report),
        vec!["kiosk_check_in: staff sees the resulting access log"]
    );
    assert_eq!(report.exit_code(), 1);
    assert!(console
        .lines_starting_with("FAIL")
        .iter()
        .any(|l| l.contains("already existed before the call")));
}

#[tokio::test]
async fn check_in_for_an_athlete_without_logs_is_detected() {
    let backend = MemoryBackend::standard()
        .with_check_in_athlete("athlete-from-kiosk")
        .with_fault(Fault::CheckInWithoutSideEffect);
    let (report, _) = run(&backend).await;

    assert_eq!(
        failing_labels(&report),
        vec!["kiosk_check_in: staff sees the resulting access log"]
    );
}

#[tokio::test]
async fn check_in_read_back_targets_the_reported_log() {
    let backend = MemoryBackend::standard();
    let (report, console) = run(&backend).await;

    let log_id = backend
        .rows("access_logs")
        .into_iter()
        .find(|r| r["access_granted"] == true)
        .map(|r| r["id"].as_str().unwrap().to_string())
        .unwrap();
    assert_eq!(
        verdict_of(&report, "kiosk_check_in: staff sees the resulting access log"),
        Verdict::Pass
    );
    assert!(console
        .text()
        .contains(&format!("staff sees the resulting access log | new row {}", log_id)));

    // staff reads a baseline before the procedure runs
    let calls = backend.calls();
    let rpc = calls
        .iter()
        .position(|c| c == "non-staff rpc kiosk_check_in")
        .unwrap();
    assert_eq!(calls[rpc - 1], "staff select access_logs");
    assert_eq!(calls[rpc + 1], "staff select access_logs");
}

#[tokio::test]
async fn denied_check_in_falls_back_to_configured_athlete() {
    let backend = MemoryBackend::standard().with_fault(Fault::CheckInDenied);
    let (report, console) = run(&backend).await;

    // without a new log the read-back fails too, even though older rows exist
    assert_eq!(
        failing_labels(&report),
        vec![
            "kiosk_check_in: non-staff can check in",
            "kiosk_check_in: staff sees the resulting access log",
        ]
    );
    assert!(console
        .text()
        .contains(&format!("falling back to {}", ATHLETE_ID)));
}

#[tokio::test]
async fn check_in_sends_configured_lookup_and_timezone() {
    let backend = MemoryBackend::standard();
    run(&backend).await;

    let log = backend
        .rows("access_logs")
        .into_iter()
        .find(|r| r["access_granted"] == true)
        .unwrap();
    assert_eq!(log["timezone"], "America/Montevideo");
    assert_eq!(log["checked_in_at"], "2026-10-19T12:00:00.000Z");
}

#[tokio::test]
async fn null_lookup_fields_still_call_the_procedure() {
    let backend = MemoryBackend::standard();
    let mut config = testing::config();
    config.fixtures.dni = None;
    config.fixtures.phone = None;
    let console = CapturedConsole::new();

    let report = Harness::new(&backend, &config, &console)
        .run(1, testing::fixed_clock)
        .await
        .unwrap();

    assert!(backend.calls().contains(&"non-staff rpc kiosk_check_in".to_string()));
    assert!(console.text().contains("null lookup fields"));
    assert_eq!(report.exit_code(), 0);
}

#[tokio::test]
async fn bad_credentials_abort_before_any_check() {
    let backend = MemoryBackend::new()
        .with_account(testing::STAFF_EMAIL, testing::PASSWORD, Role::Staff)
        .with_account(testing::NON_STAFF_EMAIL, "a-different-password", Role::NonStaff);
    let config = testing::config();
    let console = CapturedConsole::new();

    let err = Harness::new(&backend, &config, &console)
        .run(1, testing::fixed_clock)
        .await
        .unwrap_err();

    assert_matches!(
        err,
        HarnessError::Authentication { role: Role::NonStaff, source: BackendError::Api { status: 400, .. } }
    );
    assert!(backend.calls().is_empty());
    assert!(console.lines_starting_with("PASS").is_empty());
}

#[tokio::test]
async fn repeated_runs_classify_identically() {
    let backend = MemoryBackend::standard()
        .seed("access_logs", json!({ "athlete_id": "someone-else" }))
        .with_fault(Fault::LeakReads("access_logs".into()));
    let config = testing::config();
    let console = CapturedConsole::new();

    let report = Harness::new(&backend, &config, &console)
        .run(2, testing::fixed_clock)
        .await
        .unwrap();

    assert_eq!(report.runs.len(), 2);
    assert_eq!(report.stability.failure_count(), 0);
    assert_eq!(report.stability.passed(), 1);
    // one leaked select per run
    assert_eq!(report.failure_count(), 2);
    assert!(console.lines().contains(&"== run 2 of 2 ==".to_string()));
    assert!(console.text().contains("2 RLS check(s) failed across 2 runs"));
}

#[tokio::test]
async fn leak_hidden_by_an_empty_table_shows_up_as_instability() {
    // first run reads an empty table, second run sees rows left by the first
    let backend = MemoryBackend::standard().with_fault(Fault::LeakReads("access_logs".into()));
    let config = testing::config();
    let console = CapturedConsole::new();

    let report = Harness::new(&backend, &config, &console)
        .run(2, testing::fixed_clock)
        .await
        .unwrap();

    assert_eq!(report.runs[0].failure_count(), 0);
    assert_eq!(report.runs[1].failure_count(), 1);
    assert_eq!(report.stability.failed(), 1);
    assert_eq!(
        report.stability.records()[0].label,
        "stable classification: access_logs: non-staff select is blocked or empty"
    );
    assert_eq!(report.exit_code(), 1);
}

#[tokio::test]
async fn report_round_trips_through_json_file() {
    let backend = MemoryBackend::standard();
    let (report, _) = run(&backend).await;
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("rls-report.json");

    report.write_json(&path).unwrap();

    let written: serde_json::Value =
        serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
    assert_eq!(written["runs"][0]["passed"], 32);
    assert_eq!(
        written["runs"][0]["records"][0]["label"],
        "access_logs: non-staff select is blocked or empty"
    );
    assert_eq!(
        written["runs"][0]["records"][0]["phase"],
        "non-staff denied checks (access log)"
    );
}
