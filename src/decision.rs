//! Decision service contract: contexts handed to the service and the decisions it returns.
use std::fmt;

use crate::{
    entities::{Experiment, Feature, UserContext, Variation},
    Error, ProjectConfig,
};

/// Context for deciding a feature for a user.
#[derive(Clone, Copy)]
pub struct FeatureDecisionContext<'a> {
    /// Feature being decided.
    pub feature: &'a Feature,
    /// Snapshot the feature was resolved from.
    pub project_config: &'a dyn ProjectConfig,
}

/// Context for deciding an experiment for a user.
#[derive(Clone, Copy)]
pub struct ExperimentDecisionContext<'a> {
    /// Experiment being decided.
    pub experiment: &'a Experiment,
    /// Snapshot the experiment was resolved from.
    pub project_config: &'a dyn ProjectConfig,
}

impl fmt::Debug for FeatureDecisionContext<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FeatureDecisionContext")
            .field("feature", &self.feature.key)
            .field("revision", &self.project_config.revision())
            .finish()
    }
}

impl fmt::Debug for ExperimentDecisionContext<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExperimentDecisionContext")
            .field("experiment", &self.experiment.key)
            .field("revision", &self.project_config.revision())
            .finish()
    }
}

/// Where a feature decision came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DecisionSource {
    /// The user was bucketed into a feature test. Impressions are recorded for these.
    FeatureTest,
    /// The user was bucketed into a rollout rule.
    #[default]
    Rollout,
}

/// Assignment of a user to an experiment.
///
/// `variation: None` means the user is not assigned, which is not an error.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ExperimentDecision {
    /// Decided experiment.
    pub experiment: Experiment,
    /// Assigned variation, one of `experiment.variations`.
    pub variation: Option<Variation>,
}

/// Assignment of a user to a feature through one of its experiments or its rollout.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct FeatureDecision {
    /// Experiment (feature test or rollout rule) that made the decision.
    pub experiment: Experiment,
    /// Assigned variation, one of `experiment.variations`.
    pub variation: Option<Variation>,
    /// Whether the decision came from a feature test or a rollout.
    pub source: DecisionSource,
}

impl FeatureDecision {
    /// Whether the decided variation enables the feature. `false` if the user is not assigned.
    pub fn feature_enabled(&self) -> bool {
        self.variation
            .as_ref()
            .map_or(false, |variation| variation.feature_enabled)
    }
}

/// Error reported by a [`DecisionService`].
///
/// A service may still hand back a usable decision alongside the error, in which case the error
/// is a diagnostic and the client proceeds with `decision`.
#[derive(Debug, Clone)]
pub struct DecisionError<D> {
    /// What went wrong.
    pub error: Error,
    /// Decision made despite the error, if any.
    pub decision: Option<D>,
}

impl<D> DecisionError<D> {
    /// An error without a usable decision.
    pub fn fatal(error: Error) -> Self {
        DecisionError {
            error,
            decision: None,
        }
    }

    /// An error accompanied by a usable decision.
    pub fn with_decision(error: Error, decision: D) -> Self {
        DecisionError {
            error,
            decision: Some(decision),
        }
    }
}

impl<D> fmt::Display for DecisionError<D> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.error, f)
    }
}

/// Result returned by a [`DecisionService`].
pub type DecisionResult<D> = std::result::Result<D, DecisionError<D>>;

/// Computes variation assignments for users.
///
/// Bucketing, targeting and forced variations all live behind this trait.
pub trait DecisionService: Send + Sync {
    /// Decide which variation of `context.feature` the user gets.
    fn get_feature_decision(
        &self,
        context: &FeatureDecisionContext<'_>,
        user: &UserContext,
    ) -> DecisionResult<FeatureDecision>;

    /// Decide which variation of `context.experiment` the user gets.
    fn get_experiment_decision(
        &self,
        context: &ExperimentDecisionContext<'_>,
        user: &UserContext,
    ) -> DecisionResult<ExperimentDecision>;
}

#[cfg(test)]
mod tests {
    use super::*;

    fn variation(feature_enabled: bool) -> Variation {
        Variation {
            id: "v1".to_owned(),
            key: "v1".to_owned(),
            feature_enabled,
            variables: Default::default(),
        }
    }

    #[test]
    fn unassigned_decision_is_disabled() {
        assert!(!FeatureDecision::default().feature_enabled());
    }

    #[test]
    fn feature_enabled_follows_variation() {
        let mut decision = FeatureDecision {
            variation: Some(variation(true)),
            ..Default::default()
        };
        assert!(decision.feature_enabled());

        decision.variation = Some(variation(false));
        assert!(!decision.feature_enabled());
    }

    #[test]
    fn decision_error_displays_inner_error() {
        let err: DecisionError<FeatureDecision> =
            DecisionError::with_decision(Error::Decision("no audience".to_owned()), Default::default());
        assert_eq!(err.to_string(), "decision error: no audience");
        assert!(err.decision.is_some());
        assert!(DecisionError::<FeatureDecision>::fatal(Error::ClientClosed)
            .decision
            .is_none());
    }
}
