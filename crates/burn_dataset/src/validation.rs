//! Pre-training checks over an indexed instance-mask dataset.
//!
//! Three per-frame problems are counted: a frame whose image or mask file is
//! gone, a mask that does not decode, and a mask holding no instance. Any of
//! them warns; crossing a configured count or ratio limit fails. A dataset with
//! no instance anywhere fails outright since no box or mask target exists.

use crate::layout::{index_dataset, summarize_dataset};
use crate::types::{
    DatasetLayout, DatasetResult, DatasetSummary, SampleIndex, ValidationOutcome,
    ValidationReport, ValidationThresholds,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FrameProblem {
    MissingPair,
    UndecodableMask,
    NoInstances,
}

impl FrameProblem {
    const ALL: [FrameProblem; 3] = [
        FrameProblem::MissingPair,
        FrameProblem::UndecodableMask,
        FrameProblem::NoInstances,
    ];

    fn describe(self) -> &'static str {
        match self {
            FrameProblem::MissingPair => "frames missing their image or mask",
            FrameProblem::UndecodableMask => "undecodable masks",
            FrameProblem::NoInstances => "masks without instances",
        }
    }

    fn count(self, summary: &DatasetSummary) -> usize {
        match self {
            FrameProblem::MissingPair => summary.missing_mask,
            FrameProblem::UndecodableMask => summary.invalid,
            FrameProblem::NoInstances => summary.empty,
        }
    }

    fn limits(self, thresholds: &ValidationThresholds) -> (Option<usize>, Option<f32>) {
        match self {
            FrameProblem::MissingPair => (thresholds.max_missing, thresholds.max_missing_ratio),
            FrameProblem::UndecodableMask => {
                (thresholds.max_invalid, thresholds.max_invalid_ratio)
            }
            FrameProblem::NoInstances => (thresholds.max_empty, thresholds.max_empty_ratio),
        }
    }
}

/// Frames the checks looked at, decodable or not.
fn frames_checked(summary: &DatasetSummary) -> usize {
    summary.total + summary.missing_mask + summary.invalid
}

fn escalate(outcome: &mut ValidationOutcome, to: ValidationOutcome) {
    let rank = |o: ValidationOutcome| match o {
        ValidationOutcome::Pass => 0,
        ValidationOutcome::Warn => 1,
        ValidationOutcome::Fail => 2,
    };
    if rank(to) > rank(*outcome) {
        *outcome = to;
    }
}

pub fn validate_summary(
    summary: DatasetSummary,
    thresholds: &ValidationThresholds,
) -> ValidationReport {
    let frames = frames_checked(&summary);
    let mut outcome = ValidationOutcome::Pass;
    let mut reasons = Vec::new();

    if frames == 0 {
        escalate(&mut outcome, ValidationOutcome::Fail);
        reasons.push("no image/mask pairs found".to_string());
    }

    for problem in FrameProblem::ALL {
        let count = problem.count(&summary);
        if count == 0 {
            continue;
        }
        let ratio = count as f32 / frames.max(1) as f32;
        let (max_count, max_ratio) = problem.limits(thresholds);
        let what = problem.describe();
        match (max_count, max_ratio) {
            (Some(max), _) if count > max => {
                escalate(&mut outcome, ValidationOutcome::Fail);
                reasons.push(format!("{what}: {count} of {frames} frames, limit {max}"));
            }
            (_, Some(max_r)) if ratio > max_r => {
                escalate(&mut outcome, ValidationOutcome::Fail);
                reasons.push(format!(
                    "{what}: {:.1}% of {frames} frames, limit {:.1}%",
                    ratio * 100.0,
                    max_r * 100.0
                ));
            }
            _ => {
                escalate(&mut outcome, ValidationOutcome::Warn);
                reasons.push(format!("{what}: {count} of {frames} frames"));
            }
        }
    }

    if summary.total > 0 && summary.instances == 0 {
        escalate(&mut outcome, ValidationOutcome::Fail);
        reasons.push(format!(
            "none of the {} decodable masks holds an instance",
            summary.total
        ));
    }

    ValidationReport {
        outcome,
        reasons,
        summary,
    }
}

pub fn summarize_with_thresholds(
    indices: &[SampleIndex],
    thresholds: &ValidationThresholds,
) -> ValidationReport {
    validate_summary(summarize_dataset(indices), thresholds)
}

pub fn summarize_layout_with_thresholds(
    layout: &DatasetLayout,
    thresholds: &ValidationThresholds,
) -> DatasetResult<ValidationReport> {
    let indices = index_dataset(layout)?;
    Ok(summarize_with_thresholds(&indices, thresholds))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn instance_free_masks_warn_without_limits() {
        let summary = DatasetSummary {
            total: 10,
            non_empty: 9,
            empty: 1,
            instances: 14,
            ..Default::default()
        };
        let report = validate_summary(summary, &ValidationThresholds::default());
        assert_eq!(report.outcome, ValidationOutcome::Warn);
        assert_eq!(
            report.reasons,
            vec!["masks without instances: 1 of 10 frames".to_string()]
        );
    }

    #[test]
    fn ratio_limit_fails() {
        let summary = DatasetSummary {
            total: 4,
            non_empty: 2,
            empty: 2,
            instances: 2,
            ..Default::default()
        };
        let thresholds = ValidationThresholds {
            max_empty_ratio: Some(0.25),
            ..Default::default()
        };
        let report = validate_summary(summary, &thresholds);
        assert_eq!(report.outcome, ValidationOutcome::Fail);
        assert_eq!(
            report.reasons,
            vec!["masks without instances: 50.0% of 4 frames, limit 25.0%".to_string()]
        );
    }

    #[test]
    fn missing_and_undecodable_frames_count_toward_the_ratio() {
        let summary = DatasetSummary {
            total: 2,
            non_empty: 2,
            instances: 3,
            missing_mask: 1,
            invalid: 1,
            ..Default::default()
        };
        let thresholds = ValidationThresholds {
            max_invalid: Some(0),
            ..Default::default()
        };
        let report = validate_summary(summary, &thresholds);
        assert_eq!(report.outcome, ValidationOutcome::Fail);
        assert_eq!(
            report.reasons,
            vec![
                "frames missing their image or mask: 1 of 4 frames".to_string(),
                "undecodable masks: 1 of 4 frames, limit 0".to_string(),
            ]
        );
    }

    #[test]
    fn dataset_without_any_instance_fails() {
        let summary = DatasetSummary {
            total: 3,
            empty: 3,
            ..Default::default()
        };
        let report = validate_summary(summary, &ValidationThresholds::default());
        assert_eq!(report.outcome, ValidationOutcome::Fail);
        assert!(report
            .reasons
            .last()
            .is_some_and(|r| r.contains("none of the 3 decodable masks")));
    }

    #[test]
    fn nothing_checked_fails() {
        let report = validate_summary(DatasetSummary::default(), &ValidationThresholds::default());
        assert_eq!(report.outcome, ValidationOutcome::Fail);
    }
}
