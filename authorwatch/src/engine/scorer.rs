// authorwatch/src/engine/scorer.rs
//
// Behavioral authorship scoring.
//
// Each rule inspects one telemetry feature and, when it fires, appends its
// signal and adds its penalty to a running suspicion total. Rules are
// independent; the total is only clamped once at the end:
//
//   high_paste_ratio            pasteCharRatio > 0.6              0.30
//   moderate_paste_ratio        0.3 < pasteCharRatio <= 0.6       0.15
//   low_edit_ratio              deleteRatio < 0.02                0.25
//   highly_linear_editing       linearEditingScore > 0.9          0.20
//   multiple_paste_events       pasteEvents > 3                   0.15
//   fast_completion_no_testing  executionCount == 0, totalTime < 120s  0.20
//   frequent_focus_loss         focusLossCount > 5                0.10
//   low_typing_variance         burstiness < 0.3                  0.15
//
// authorship = 1 - min(suspicion, 1), reported to four decimals; config
// validation keeps non-zero penalties at or above that resolution. The rule
// order is fixed because the order of signals in the result is part of the
// output.

use crate::config::ScoringConfig;
use crate::events::{feature, AnalysisResult, Confidence, FeatureSet, Signal};

pub struct BehaviorScorer {
    config: ScoringConfig,
}

impl BehaviorScorer {
    pub fn new(config: ScoringConfig) -> Self { Self { config } }

    pub fn score(&self, features: &FeatureSet) -> AnalysisResult {
        let c = &self.config;
        let mut signals   = Vec::new();
        let mut suspicion = 0.0f64;
        let mut fire = |signal: Signal| {
            suspicion += c.penalty(signal);
            signals.push(signal);
        };

        let paste_ratio = features.get(feature::PASTE_CHAR_RATIO);
        if paste_ratio > c.high_paste_ratio {
            fire(Signal::HighPasteRatio);
        } else if paste_ratio > c.moderate_paste_ratio {
            fire(Signal::ModeratePasteRatio);
        }

        if features.get(feature::DELETE_RATIO) < c.low_delete_ratio {
            fire(Signal::LowEditRatio);
        }

        if features.get(feature::LINEAR_EDITING_SCORE) > c.linear_editing {
            fire(Signal::HighlyLinearEditing);
        }

        if features.count(feature::PASTE_EVENTS) > c.max_paste_events {
            fire(Signal::MultiplePasteEvents);
        }

        if features.count(feature::EXECUTION_COUNT) == 0
            && features.get(feature::TOTAL_TIME) < c.fast_completion_secs
        {
            fire(Signal::FastCompletionNoTesting);
        }

        if features.count(feature::FOCUS_LOSS_COUNT) > c.max_focus_loss {
            fire(Signal::FrequentFocusLoss);
        }

        if features.get(feature::BURSTINESS) < c.low_burstiness {
            fire(Signal::LowTypingVariance);
        }

        let authorship = 1.0 - suspicion.min(1.0);

        AnalysisResult {
            authorship_score: (authorship * 10000.0).round() / 10000.0,
            confidence:       Confidence::from_signal_count(signals.len()),
            signals,
        }
    }
}

impl Default for BehaviorScorer { fn default() -> Self { Self::new(ScoringConfig::default()) } }

#[cfg(test)]
mod tests {
    use super::*;

    /// A session where nothing fires.
    fn clean() -> FeatureSet {
        FeatureSet::new()
            .with(feature::PASTE_CHAR_RATIO, 0.1)
            .with(feature::DELETE_RATIO, 0.15)
            .with(feature::LINEAR_EDITING_SCORE, 0.5)
            .with(feature::PASTE_EVENTS, 1.0)
            .with(feature::EXECUTION_COUNT, 4.0)
            .with(feature::TOTAL_TIME, 900.0)
            .with(feature::FOCUS_LOSS_COUNT, 1.0)
            .with(feature::BURSTINESS, 0.6)
    }

    #[test]
    fn paste_heavy_linear_session() {
        let f = FeatureSet::new()
            .with(feature::PASTE_CHAR_RATIO, 0.7)
            .with(feature::DELETE_RATIO, 0.01)
            .with(feature::LINEAR_EDITING_SCORE, 0.95)
            .with(feature::PASTE_EVENTS, 0.0)
            .with(feature::EXECUTION_COUNT, 1.0)
            .with(feature::TOTAL_TIME, 300.0)
            .with(feature::FOCUS_LOSS_COUNT, 0.0)
            .with(feature::BURSTINESS, 0.5);
        let r = BehaviorScorer::default().score(&f);
        assert_eq!(r.signals, vec![Signal::HighPasteRatio, Signal::LowEditRatio, Signal::HighlyLinearEditing]);
        assert_eq!(r.authorship_score, 0.25);
        assert_eq!(r.confidence, Confidence::Medium);
    }

    #[test]
    fn clean_session_scores_full_authorship() {
        let r = BehaviorScorer::default().score(&clean());
        assert!(r.signals.is_empty());
        assert_eq!(r.authorship_score, 1.0);
        assert_eq!(r.confidence, Confidence::Low);
    }

    #[test]
    fn empty_feature_set_fires_the_zero_default_rules() {
        // deleteRatio 0, executionCount 0 with totalTime 0, burstiness 0
        let r = BehaviorScorer::default().score(&FeatureSet::new());
        assert_eq!(r.signals, vec![Signal::LowEditRatio, Signal::FastCompletionNoTesting, Signal::LowTypingVariance]);
        assert_eq!(r.authorship_score, 0.4);
        assert_eq!(r.confidence, Confidence::Medium);
    }

    #[test]
    fn moderate_paste_is_exclusive_with_high() {
        let s = BehaviorScorer::default();
        let at_boundary = s.score(&clean().with(feature::PASTE_CHAR_RATIO, 0.6));
        assert_eq!(at_boundary.signals, vec![Signal::ModeratePasteRatio]);
        let high = s.score(&clean().with(feature::PASTE_CHAR_RATIO, 0.61));
        assert_eq!(high.signals, vec![Signal::HighPasteRatio]);
        let low = s.score(&clean().with(feature::PASTE_CHAR_RATIO, 0.3));
        assert!(low.signals.is_empty());
    }

    #[test]
    fn fractional_counts_are_truncated() {
        let s = BehaviorScorer::default();
        assert!(s.score(&clean().with(feature::PASTE_EVENTS, 3.9)).signals.is_empty());
        assert_eq!(s.score(&clean().with(feature::PASTE_EVENTS, 4.0)).signals, vec![Signal::MultiplePasteEvents]);
        // 0.5 executions truncates to zero, so a short session fires
        let quick = clean().with(feature::EXECUTION_COUNT, 0.5).with(feature::TOTAL_TIME, 60.0);
        assert_eq!(s.score(&quick).signals, vec![Signal::FastCompletionNoTesting]);
    }

    #[test]
    fn everything_fires_and_clamps_to_zero() {
        let f = FeatureSet::new()
            .with(feature::PASTE_CHAR_RATIO, 0.9)
            .with(feature::PASTE_EVENTS, 10.0)
            .with(feature::FOCUS_LOSS_COUNT, 9.0)
            .with(feature::LINEAR_EDITING_SCORE, 1.0);
        let r = BehaviorScorer::default().score(&f);
        assert_eq!(r.signals, vec![
            Signal::HighPasteRatio,
            Signal::LowEditRatio,
            Signal::HighlyLinearEditing,
            Signal::MultiplePasteEvents,
            Signal::FastCompletionNoTesting,
            Signal::FrequentFocusLoss,
            Signal::LowTypingVariance,
        ]);
        assert_eq!(r.authorship_score, 0.0);
        assert_eq!(r.confidence, Confidence::High);
    }

    #[test]
    fn adding_a_trigger_never_raises_authorship() {
        let s = BehaviorScorer::default();
        let base = clean();
        let base_score = s.score(&base).authorship_score;
        let triggers = [
            (feature::PASTE_CHAR_RATIO, 0.45),
            (feature::PASTE_CHAR_RATIO, 0.8),
            (feature::DELETE_RATIO, 0.0),
            (feature::LINEAR_EDITING_SCORE, 0.99),
            (feature::PASTE_EVENTS, 5.0),
            (feature::FOCUS_LOSS_COUNT, 8.0),
            (feature::BURSTINESS, 0.1),
        ];
        for (key, value) in triggers {
            let r = s.score(&base.clone().with(key, value));
            assert_eq!(r.signals.len(), 1, "{key}={value}");
            assert!(r.authorship_score < base_score, "{key}={value}");
        }
        let no_tests = base.clone().with(feature::EXECUTION_COUNT, 0.0).with(feature::TOTAL_TIME, 30.0);
        assert!(s.score(&no_tests).authorship_score < base_score);
    }

    #[test]
    fn configured_penalties_apply() {
        let mut config = ScoringConfig::default();
        config.penalties.insert(Signal::LowTypingVariance, 0.5);
        let r = BehaviorScorer::new(config).score(&clean().with(feature::BURSTINESS, 0.0));
        assert_eq!(r.signals, vec![Signal::LowTypingVariance]);
        assert_eq!(r.authorship_score, 0.5);
    }

    #[test]
    fn smallest_valid_penalty_survives_rounding() {
        let mut config = ScoringConfig::default();
        config.penalties.insert(Signal::FrequentFocusLoss, crate::config::PENALTY_RESOLUTION);
        assert!(config.validate().is_ok());
        let r = BehaviorScorer::new(config).score(&clean().with(feature::FOCUS_LOSS_COUNT, 9.0));
        assert_eq!(r.signals, vec![Signal::FrequentFocusLoss]);
        assert!(r.authorship_score < 1.0);
        assert_eq!(r.authorship_score, 0.9999);
    }
}
