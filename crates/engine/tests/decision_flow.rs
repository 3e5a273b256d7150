//! End-to-end decision pipeline tests over in-memory and file stores.
//!
//! The active strategy is pinned to the logistic bandit in most tests:
//! a cold logistic model scores exactly 0.5 on every arm, which makes
//! winners and gate outcomes deterministic.

use std::sync::Arc;

use chrono::{NaiveDate, NaiveDateTime};

use nudge_core::config::BanditKind;
use nudge_core::{
    Arm, Category, Channel, DecisionReason, DecisionRequest, EngineConfig, NudgeError,
    NudgeResult, Tone,
};
use nudge_engine::{EngineStores, NudgeEngine};
use nudge_store::{
    ExposureLog, MemoryEventLog, MemoryExposureLog, MemoryPassiveLog, MemoryStateStore, StateStore,
};

fn at(h: u32, m: u32) -> NaiveDateTime {
    NaiveDate::from_ymd_opt(2024, 3, 12)
        .unwrap()
        .and_hms_opt(h, m, 0)
        .unwrap()
}

fn logistic_cfg() -> EngineConfig {
    let mut cfg = EngineConfig::default();
    cfg.bandit.strategy = BanditKind::Logistic;
    cfg
}

struct Harness {
    engine: NudgeEngine,
    state: Arc<MemoryStateStore>,
    events: Arc<MemoryEventLog>,
    exposures: Arc<MemoryExposureLog>,
}

fn harness(cfg: EngineConfig) -> Harness {
    let state = Arc::new(MemoryStateStore::new());
    let events = Arc::new(MemoryEventLog::new());
    let exposures = Arc::new(MemoryExposureLog::new());
    let stores = EngineStores {
        state: state.clone(),
        events: events.clone(),
        exposures: exposures.clone(),
        passives: Arc::new(MemoryPassiveLog::new()),
    };
    let engine = NudgeEngine::new(cfg, stores).unwrap();
    Harness {
        engine,
        state,
        events,
        exposures,
    }
}

#[test]
fn test_open_guardrails_select_exactly_one_arm() {
    let mut h = harness(logistic_cfg());
    let request = DecisionRequest::new(Category::Hydration).at(at(10, 0));

    let response = h.engine.decide(&request).unwrap();

    assert!(response.allowed);
    assert_eq!(response.reason, DecisionReason::Ok);
    // Cold logistic scores tie at 0.5; the baseline segment prefers
    // gentle and push, so that cell wins the 3x2 grid.
    assert_eq!(response.arm.as_deref(), Some("morning|gentle|push|hydration"));
    assert_eq!(response.propensity, 0.5);
    assert!(response.propensity >= response.threshold);
    assert_eq!(response.uplift, Some(0.01));
    assert!(response.uplift.unwrap() >= response.tau);
    assert!(response.text.is_some());
    assert_eq!(response.budget_remaining, 5);
    assert!(!response.explanation.is_empty());

    // One exposure event and one treatment row were appended.
    assert_eq!(h.events.len(), 1);
    let rows = h.exposures.read_all().unwrap();
    assert_eq!(rows.len(), 1);
    assert!(rows[0].treatment);
    assert_eq!(rows[0].reason, "send");

    // The decision is traceable by id.
    let traced = h.engine.trace(&response.decision_id).unwrap();
    assert_eq!(traced.arm, response.arm);
}

#[test]
fn test_feedback_updates_every_strategy() {
    let mut h = harness(logistic_cfg());
    let response = h
        .engine
        .decide(&DecisionRequest::new(Category::Hydration).at(at(10, 0)))
        .unwrap();
    let key = response.arm.unwrap();
    let arm: Arm = key.parse().unwrap();

    let width_before = h.engine.bandits_mut().linucb_mut().confidence_width(&arm);
    assert_eq!(h.engine.bandits().beta().mean(&arm), 0.5);

    let report = h.engine.feedback_at(&key, 1.0, at(10, 5)).unwrap();

    assert_eq!(report.updated, BanditKind::ALL.to_vec());
    assert!(report.failed.is_empty());
    assert!(report.guardrail_updated);

    // Positive reward lifts the Beta posterior mean above the prior.
    let mean = h.engine.bandits().beta().mean(&arm);
    assert!((mean - 2.0 / 3.0).abs() < 1e-12);
    // And shrinks the LinUCB confidence width for the observed arm.
    let width_after = h.engine.bandits_mut().linucb_mut().confidence_width(&arm);
    assert!(width_after < width_before);

    // Every strategy snapshot was persisted.
    for kind in BanditKind::ALL {
        let blob = h.state.load_raw(&format!("bandit_{kind}")).unwrap();
        assert!(blob.is_some(), "missing blob for {kind}");
    }
}

#[test]
fn test_budget_exhaustion_blocks() {
    let mut cfg = logistic_cfg();
    cfg.policy.budget_per_day = 1;
    let mut h = harness(cfg);

    let first = h
        .engine
        .decide(&DecisionRequest::new(Category::Hydration).at(at(10, 0)))
        .unwrap();
    assert!(first.allowed);
    assert_eq!(first.budget_remaining, 0);

    let second = h
        .engine
        .decide(&DecisionRequest::new(Category::Posture).at(at(10, 1)))
        .unwrap();
    assert!(!second.allowed);
    assert_eq!(second.reason, DecisionReason::Budget);
    assert_eq!(second.budget_remaining, 0);
}

#[test]
fn test_cooldown_blocks_and_reports_remaining() {
    let mut h = harness(logistic_cfg());
    let first = h
        .engine
        .decide(&DecisionRequest::new(Category::Hydration).at(at(10, 0)))
        .unwrap();
    assert!(first.allowed);

    let second = h
        .engine
        .decide(&DecisionRequest::new(Category::Hydration).at(at(10, 30)))
        .unwrap();
    assert!(!second.allowed);
    assert_eq!(second.reason, DecisionReason::Cooldown);
    // Hydration cooldown is 5400s and 1800s have elapsed.
    assert_eq!(second.cooldown_remaining_s, Some(3600));
}

#[test]
fn test_quiet_hours_block() {
    let mut h = harness(logistic_cfg());
    let response = h
        .engine
        .decide(&DecisionRequest::new(Category::Sleep).at(at(23, 0)))
        .unwrap();
    assert!(!response.allowed);
    assert_eq!(response.reason, DecisionReason::Quiet);
}

#[test]
fn test_dry_run_consumes_nothing() {
    let mut h = harness(logistic_cfg());
    let request = DecisionRequest::new(Category::Hydration).at(at(10, 0)).dry_run();

    let response = h.engine.decide(&request).unwrap();
    assert!(response.allowed);
    assert_eq!(response.budget_remaining, 6);
    assert!(response.text.is_some());
    assert!(h.events.is_empty());
    assert!(h.exposures.is_empty());

    // A real send right afterwards is still allowed: no cooldown or
    // budget was consumed by the dry run.
    let committed = h
        .engine
        .decide(&DecisionRequest::new(Category::Hydration).at(at(10, 1)))
        .unwrap();
    assert!(committed.allowed);
    assert_eq!(h.events.len(), 1);
}

#[test]
fn test_low_uplift_suppresses_and_logs_control_row() {
    let mut cfg = logistic_cfg();
    cfg.uplift.default_uplift = -1.0;
    let mut h = harness(cfg);

    let response = h
        .engine
        .decide(&DecisionRequest::new(Category::Hydration).at(at(10, 0)))
        .unwrap();

    assert!(!response.allowed);
    assert_eq!(response.reason, DecisionReason::LowUplift);
    assert_eq!(response.uplift, Some(-1.0));
    assert_eq!(response.tau, 0.01);
    assert!(response.arm.is_some());
    // Budget untouched, no event row, but a control exposure row for
    // the trainer.
    assert_eq!(response.budget_remaining, 6);
    assert!(h.events.is_empty());
    let rows = h.exposures.read_all().unwrap();
    assert_eq!(rows.len(), 1);
    assert!(!rows[0].treatment);
    assert_eq!(rows[0].reason, "low_uplift");
    assert_eq!(Some(rows[0].arm.clone()), response.arm);
}

#[test]
fn test_below_threshold_when_no_candidate_clears_gate() {
    let mut cfg = logistic_cfg();
    cfg.policy.send_threshold = 0.6;
    let mut h = harness(cfg);

    let response = h
        .engine
        .decide(&DecisionRequest::new(Category::Hydration).at(at(10, 0)))
        .unwrap();

    assert!(!response.allowed);
    assert_eq!(response.reason, DecisionReason::BelowThreshold);
    assert_eq!(
        response.arm.as_deref(),
        Some("morning|gentle|in_app|hydration")
    );
    assert_eq!(response.propensity, 0.5);
    assert_eq!(response.explanation.len(), 1);
    assert_eq!(response.explanation[0].signal, "below_threshold");
    assert!((response.explanation[0].value + 0.1).abs() < 1e-12);
    assert!(h.events.is_empty());
    assert!(h.exposures.is_empty());
}

#[test]
fn test_three_negatives_escalate_category() {
    let mut h = harness(logistic_cfg());
    let key = "morning|gentle|push|hydration";

    h.engine.feedback_at(key, 0.0, at(9, 0)).unwrap();
    h.engine.feedback_at(key, 0.0, at(9, 30)).unwrap();
    h.engine.feedback_at(key, 0.0, at(10, 20)).unwrap();

    let response = h
        .engine
        .decide(&DecisionRequest::new(Category::Hydration).at(at(11, 0)))
        .unwrap();
    assert!(!response.allowed);
    assert_eq!(response.reason, DecisionReason::Escalated);
    // Escalated at 10:20 for six hours; 40 minutes have passed.
    assert_eq!(response.escalation_remaining_s, Some(19_200));

    // Other categories are unaffected.
    let other = h
        .engine
        .decide(&DecisionRequest::new(Category::Movement).at(at(11, 0)))
        .unwrap();
    assert!(other.allowed);
}

#[test]
fn test_window_enforcement_blocks_outside_hours() {
    let mut cfg = logistic_cfg();
    cfg.windows.enforce = true;
    cfg.windows
        .hours_by_category
        .insert(Category::Hydration, vec![9, 10]);
    let mut h = harness(cfg);

    let outside = h
        .engine
        .decide(&DecisionRequest::new(Category::Hydration).at(at(14, 0)))
        .unwrap();
    assert!(!outside.allowed);
    assert_eq!(outside.reason, DecisionReason::OutsideWindow);

    let inside = h
        .engine
        .decide(&DecisionRequest::new(Category::Hydration).at(at(10, 0)))
        .unwrap();
    assert!(inside.allowed);

    // Categories without configured hours are unrestricted.
    let unrestricted = h
        .engine
        .decide(&DecisionRequest::new(Category::Focus).at(at(14, 0)))
        .unwrap();
    assert!(unrestricted.allowed);
}

#[test]
fn test_pinned_tone_and_channel_narrow_the_grid() {
    let mut h = harness(logistic_cfg());
    let request = DecisionRequest::new(Category::Posture)
        .at(at(10, 0))
        .with_tone(Tone::Strict)
        .with_channel(Channel::InApp);

    let response = h.engine.decide(&request).unwrap();
    assert!(response.allowed);
    assert_eq!(response.arm.as_deref(), Some("morning|strict|in_app|posture"));
}

#[test]
fn test_strategy_override_per_request() {
    // Config default is the Beta strategy; the request overrides it.
    let mut h = harness(EngineConfig::default());
    let request = DecisionRequest::new(Category::Hydration).at(at(10, 0));
    let mut overridden = request.clone();
    overridden.strategy = Some(BanditKind::Logistic);

    let response = h.engine.decide(&overridden).unwrap();
    // A cold logistic model predicts exactly 0.5; Beta samples do not.
    assert_eq!(response.propensity, 0.5);
}

#[test]
fn test_empty_grid_yields_no_candidates() {
    let mut cfg = logistic_cfg();
    cfg.policy.grid_tones = Vec::new();
    let mut h = harness(cfg);

    let response = h
        .engine
        .decide(&DecisionRequest::new(Category::Hydration).at(at(10, 0)))
        .unwrap();
    assert!(!response.allowed);
    assert_eq!(response.reason, DecisionReason::NoCandidates);
}

#[test]
fn test_diagnose_reports_guardrail_and_scoring_state() {
    let mut h = harness(logistic_cfg());
    h.engine
        .decide(&DecisionRequest::new(Category::Hydration).at(at(10, 0)))
        .unwrap();

    let diagnosis = h
        .engine
        .diagnose(Category::Hydration, Tone::Gentle, Channel::Push, at(10, 30));

    assert_eq!(diagnosis.arm, "morning|gentle|push|hydration");
    assert!(!diagnosis.quiet);
    assert_eq!(diagnosis.budget_remaining, 5);
    assert_eq!(diagnosis.cooldown_remaining_s, 3600);
    assert_eq!(diagnosis.escalation_remaining_s, 0);
    assert_eq!(diagnosis.propensity, 0.5);
    assert_eq!(diagnosis.threshold, 0.28);
    assert_eq!(diagnosis.uplift, 0.01);
    assert_eq!(diagnosis.tau, 0.01);
    assert!(!diagnosis.window.in_window);
    assert_eq!(diagnosis.window.next_hour, None);
}

#[test]
fn test_explain_reports_logistic_contributions() {
    let mut h = harness(logistic_cfg());
    let key = "morning|gentle|push|hydration";
    h.engine.feedback_at(key, 1.0, at(10, 0)).unwrap();

    let arm: Arm = key.parse().unwrap();
    let contributions = h.engine.explain(&arm);

    // Bias plus the four one-hot axes are active for a full arm.
    assert_eq!(contributions.len(), 5);
    for (name, value) in &contributions {
        assert!(*value > 0.0, "{name} should contribute positively");
    }
}

#[test]
fn test_train_uplift_persists_table() {
    let mut h = harness(logistic_cfg());
    let table = h.engine.train_uplift().unwrap();

    // No joined rows clear min_cell, so the table is empty but present.
    assert!(table.is_empty());
    assert!(h.state.load_raw("uplift").unwrap().is_some());
    assert_eq!(h.engine.uplift_table().len(), 0);
}

#[test]
fn test_feedback_failures_are_isolated_per_strategy() {
    struct FailingStore {
        inner: MemoryStateStore,
        fail_blob: String,
    }

    impl StateStore for FailingStore {
        fn load_raw(&self, name: &str) -> NudgeResult<Option<Vec<u8>>> {
            self.inner.load_raw(name)
        }

        fn save_raw(&self, name: &str, payload: &[u8]) -> NudgeResult<()> {
            if name == self.fail_blob {
                return Err(NudgeError::state("simulated save failure"));
            }
            self.inner.save_raw(name, payload)
        }
    }

    let events = Arc::new(MemoryEventLog::new());
    let stores = EngineStores {
        state: Arc::new(FailingStore {
            inner: MemoryStateStore::new(),
            fail_blob: "bandit_linucb".to_string(),
        }),
        events: events.clone(),
        exposures: Arc::new(MemoryExposureLog::new()),
        passives: Arc::new(MemoryPassiveLog::new()),
    };
    let mut engine = NudgeEngine::new(logistic_cfg(), stores).unwrap();

    let report = engine
        .feedback_at("morning|gentle|push|hydration", 1.0, at(10, 0))
        .unwrap();

    assert_eq!(
        report.updated,
        vec![BanditKind::Beta, BanditKind::Logistic, BanditKind::Thompson]
    );
    assert_eq!(report.failed.len(), 1);
    assert_eq!(report.failed[0].0, BanditKind::LinUcb);
    // The durable event row was written before the fan-out.
    assert_eq!(events.len(), 1);
}

#[test]
fn test_malformed_arm_key_still_logs_event() {
    let mut h = harness(logistic_cfg());
    let report = h.engine.feedback_at("not-an-arm", 1.0, at(10, 0)).unwrap();

    assert!(report.updated.is_empty());
    assert!(report.failed.is_empty());
    assert!(!report.guardrail_updated);
    assert_eq!(h.events.len(), 1);
}

#[test]
fn test_file_stores_survive_restart() {
    let dir = tempfile::tempdir().unwrap();
    let key = "morning|gentle|push|hydration";

    {
        let mut engine =
            NudgeEngine::new(logistic_cfg(), EngineStores::file(dir.path())).unwrap();
        let response = engine
            .decide(&DecisionRequest::new(Category::Hydration).at(at(10, 0)))
            .unwrap();
        assert!(response.allowed);
        engine.feedback_at(key, 1.0, at(10, 5)).unwrap();
    }

    assert!(dir.path().join("events.csv").exists());
    assert!(dir.path().join("exposures.csv").exists());
    assert!(dir.path().join("guardrails.json").exists());
    assert!(dir.path().join("bandit_beta.json").exists());

    let mut engine = NudgeEngine::new(logistic_cfg(), EngineStores::file(dir.path())).unwrap();
    let arm: Arm = key.parse().unwrap();
    // Bandit posteriors were restored from the blobs.
    let mean = engine.bandits().beta().mean(&arm);
    assert!((mean - 2.0 / 3.0).abs() < 1e-12);
    // Guardrail state was restored: the 10:00 send still cools down.
    let blocked = engine
        .decide(&DecisionRequest::new(Category::Hydration).at(at(10, 30)))
        .unwrap();
    assert!(!blocked.allowed);
    assert_eq!(blocked.reason, DecisionReason::Cooldown);
}
