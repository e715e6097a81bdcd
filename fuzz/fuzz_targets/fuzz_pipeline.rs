//! Fuzz harness for the full job pipeline.
//!
//! Whatever the input, `run_job` must produce a classified verdict with at
//! least one reason, and any sealed bundle must verify against the dataset
//! it was built from.

#![no_main]
use libfuzzer_sys::fuzz_target;
use proofline::{
    DataRequirements, DecisionStatus, LoadOptions, PipelineConfig, ProcessSpec, Specification,
    run_job, verify,
};

fuzz_target!(|data: &[u8]| {
    let Some((&selector, body)) = data.split_first() else {
        return;
    };

    let spec = Specification {
        industry: ["powder", "autoclave", "sterile", "concrete", "fuzz"][usize::from(selector % 5)]
            .into(),
        job_id: "fuzz".to_owned(),
        spec: ProcessSpec {
            target_temp_c: 180.0,
            hold_time_s: 60.0 * f64::from(selector % 8 + 1),
            sensor_uncertainty_c: 2.0,
            temp_band_c: None,
        },
        data_requirements: DataRequirements {
            max_sample_period_s: 30.0,
            allowed_gaps_s: 120.0,
        },
        sensor_selection: None,
        logic: None,
        preconditions: None,
    };
    let config = if selector & 0x80 == 0 {
        PipelineConfig::lenient()
    } else {
        PipelineConfig::strict()
    };

    let outcome = run_job(body, &spec, &config, &LoadOptions::default());
    assert!(!outcome.decision.reasons.is_empty());
    assert_eq!(
        outcome.decision.pass,
        outcome.decision.status == DecisionStatus::Pass
    );
    if let (Some(bundle), Some(dataset)) = (&outcome.bundle, &outcome.dataset) {
        assert!(verify(bundle, &outcome.decision, dataset).is_verified());
    }
});
