//! Read-only view of a project configuration snapshot.
use crate::{
    entities::{Event, Experiment, Feature, Variable},
    Result,
};

/// An immutable, versioned snapshot of a project's features, experiments, variables and events.
///
/// Snapshots are shared behind an `Arc` and never mutated. A configuration source replaces them
/// wholesale when a new revision becomes available.
pub trait ProjectConfig: Send + Sync {
    /// Look up a feature by key.
    ///
    /// # Errors
    ///
    /// [`Error::FeatureNotFound`](crate::Error::FeatureNotFound) if there is no such feature.
    fn get_feature_by_key(&self, feature_key: &str) -> Result<&Feature>;

    /// Look up an experiment by key.
    ///
    /// # Errors
    ///
    /// [`Error::ExperimentNotFound`](crate::Error::ExperimentNotFound) if there is no such
    /// experiment.
    fn get_experiment_by_key(&self, experiment_key: &str) -> Result<&Experiment>;

    /// Look up a variable declared on the feature `feature_key`.
    ///
    /// # Errors
    ///
    /// [`Error::FeatureNotFound`](crate::Error::FeatureNotFound) or
    /// [`Error::VariableNotFound`](crate::Error::VariableNotFound).
    fn get_variable_by_key(&self, feature_key: &str, variable_key: &str) -> Result<&Variable>;

    /// Look up a conversion event by key.
    ///
    /// # Errors
    ///
    /// [`Error::EventNotFound`](crate::Error::EventNotFound) if there is no such event.
    fn get_event_by_key(&self, event_key: &str) -> Result<&Event>;

    /// Id of the attribute `attribute_key`, if the project declares it.
    fn get_attribute_id(&self, _attribute_key: &str) -> Option<&str> {
        None
    }

    /// All features of the project.
    fn feature_list(&self) -> Vec<&Feature>;

    /// Project id.
    fn project_id(&self) -> &str;
    /// Account id.
    fn account_id(&self) -> &str;
    /// Revision of the configuration.
    fn revision(&self) -> &str;
    /// Whether visitor IPs should be anonymized.
    fn anonymize_ip(&self) -> bool;
    /// Whether bot filtering is enabled.
    fn bot_filtering(&self) -> bool;
    /// Name of the client that produced this snapshot.
    fn client_name(&self) -> &str;
    /// Version of the client that produced this snapshot.
    fn client_version(&self) -> &str;
}
