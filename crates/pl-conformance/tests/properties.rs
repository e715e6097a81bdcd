//! Pipeline-level properties: determinism, row-order independence and
//! hold-time monotonicity.

use proofline::{
    DecisionStatus, JobOutcome, LoadOptions, PipelineConfig, Specification, run_job,
};
use proptest::prelude::*;

fn spec(hold_time_s: f64) -> Specification {
    serde_json::from_str(&format!(
        r#"{{
            "industry": "powder",
            "job_id": "prop",
            "spec": {{"target_temp_C": 180.0, "hold_time_s": {hold_time_s}, "sensor_uncertainty_C": 2.0}},
            "data_requirements": {{"max_sample_period_s": 30.0, "allowed_gaps_s": 60.0}}
        }}"#
    ))
    .expect("spec parses")
}

fn iso(offset_s: usize) -> String {
    format!(
        "2024-03-01T{:02}:{:02}:{:02}Z",
        8 + offset_s / 3600,
        (offset_s / 60) % 60,
        offset_s % 60
    )
}

fn rows(temps: &[u32]) -> Vec<String> {
    temps
        .iter()
        .enumerate()
        .map(|(k, temp)| format!("{},{temp}", iso(k * 30)))
        .collect()
}

fn csv(rows: &[String]) -> Vec<u8> {
    let mut body = String::from("Timestamp,Temperature\n");
    for row in rows {
        body.push_str(row);
        body.push('\n');
    }
    body.into_bytes()
}

fn run(rows: &[String], hold_time_s: f64) -> JobOutcome {
    run_job(
        &csv(rows),
        &spec(hold_time_s),
        &PipelineConfig::default(),
        &LoadOptions::default(),
    )
}

fn root_hash(outcome: &JobOutcome) -> Option<String> {
    outcome.bundle.as_ref().map(|bundle| bundle.root_hash.clone())
}

/// Warm-up at 100 °C followed by `plateau` samples at 190 °C.
fn plateau(plateau: usize) -> Vec<u32> {
    let mut temps = vec![100; 5];
    temps.extend(std::iter::repeat_n(190, plateau));
    temps
}

fn temps() -> impl Strategy<Value = Vec<u32>> {
    prop::collection::vec(100_u32..200, 13..60)
}

fn ordered_and_shuffled() -> impl Strategy<Value = (Vec<String>, Vec<String>)> {
    temps().prop_flat_map(|temps| {
        let ordered = rows(&temps);
        (Just(ordered.clone()), Just(ordered).prop_shuffle())
    })
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn prop_identical_inputs_give_identical_outcomes(temps in temps()) {
        let rows = rows(&temps);
        let first = run(&rows, 240.0);
        let second = run(&rows, 240.0);
        prop_assert_eq!(&first.decision, &second.decision);
        prop_assert!(root_hash(&first).is_some());
        prop_assert_eq!(root_hash(&first), root_hash(&second));
    }

    #[test]
    fn prop_row_order_does_not_matter((ordered, shuffled) in ordered_and_shuffled()) {
        let a = run(&ordered, 240.0);
        let b = run(&shuffled, 240.0);
        prop_assert_eq!(&a.decision, &b.decision);
        prop_assert_eq!(root_hash(&a), root_hash(&b));
    }

    #[test]
    fn prop_longer_plateau_never_shortens_the_hold(short in 1_usize..30, extra in 0_usize..30) {
        let shorter = run(&rows(&plateau(short)), 240.0);
        let longer = run(&rows(&plateau(short + extra)), 240.0);
        prop_assert!(
            shorter.decision.actual_hold_time_s <= longer.decision.actual_hold_time_s
        );
        if shorter.decision.status == DecisionStatus::Pass {
            prop_assert_eq!(longer.decision.status, DecisionStatus::Pass);
        }
    }

    #[test]
    fn prop_passing_job_passes_any_shorter_requirement(
        temps in temps(),
        required in 30_u32..900,
        slack in 0_u32..900,
    ) {
        let rows = rows(&temps);
        let relaxed = f64::from(required);
        let demanding = f64::from(required + slack);
        let strict = run(&rows, demanding);
        if strict.decision.status == DecisionStatus::Pass {
            prop_assert_eq!(run(&rows, relaxed).decision.status, DecisionStatus::Pass);
        }
    }
}

#[test]
fn fahrenheit_header_converts_to_celsius() {
    let body = (0..5)
        .map(|k| format!("{},356", iso(k * 30)))
        .collect::<Vec<_>>()
        .join("\n");
    let bytes = format!("Timestamp,Temp (°F)\n{body}\n").into_bytes();
    let outcome = run_job(
        &bytes,
        &spec(60.0),
        &PipelineConfig::default(),
        &LoadOptions::default(),
    );

    let dataset = outcome.dataset.as_ref().expect("dataset");
    let temps = dataset.column("temperature").expect("temperature");
    assert!(temps.values().iter().all(|value| (value - 180.0).abs() < 1e-9));
    assert_eq!(outcome.decision.status, DecisionStatus::Fail);
    assert!(
        outcome
            .decision
            .max_temp_c
            .is_some_and(|max| (max - 180.0).abs() < 1e-9)
    );
}
