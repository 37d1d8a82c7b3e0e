use std::collections::HashSet;

use testrig_core::{Flavor, Results, StageKind, StageOutcome, StageStatus};

#[test]
fn stage_identifiers_unique_and_file_name_safe() {
    let mut seen = HashSet::new();
    for kind in StageKind::PRECEDENCE {
        let id = kind.as_str();
        assert!(seen.insert(id), "duplicate stage identifier {id:?}");
        assert!(
            id.chars().all(|c| c.is_ascii_lowercase() || c == '_'),
            "stage identifier {id:?} is used in log file names"
        );
    }
    assert_eq!(seen.len(), 5);
}

#[test]
fn precedence_starts_with_compile_and_ends_with_validation() {
    assert_eq!(StageKind::PRECEDENCE.first(), Some(&StageKind::Compile));
    assert_eq!(StageKind::PRECEDENCE.last(), Some(&StageKind::CoverageValidation));
}

#[test]
fn stage_accessor_matches_precedence_order() {
    let results = Results {
        compile: StageOutcome::new(-5, Default::default()),
        test: StageOutcome::new(-4, Default::default()),
        parse: StageOutcome::new(-3, Default::default()),
        coverage: StageOutcome::new(-2, Default::default()),
        coverage_validation: StageOutcome::new(-1, Default::default()),
        ..Results::default()
    };
    let codes: Vec<_> = results.stages().map(|(_, o)| o.result.unwrap_or_default()).collect();
    assert_eq!(codes, vec![-5, -4, -3, -2, -1]);
}

#[test]
fn flavors_schedule_debug_first() {
    assert_eq!(Flavor::ALL, [Flavor::Debug, Flavor::Release]);
    assert_eq!(Flavor::Debug.to_string(), "Debug");
    assert!(Flavor::Debug < Flavor::Release);
}

#[test]
fn status_labels_are_distinct() {
    let labels: HashSet<_> = [
        StageStatus::NotRun,
        StageStatus::Succeeded,
        StageStatus::Failed,
        StageStatus::Unknown,
    ]
    .into_iter()
    .map(StageStatus::as_str)
    .collect();
    assert_eq!(labels.len(), 4);
}
