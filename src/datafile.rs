//! Datafile wire format and the [`ProjectConfig`] implementation built from it.
use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::{
    entities::{
        Event, Experiment, Feature, Rollout, Variable, VariableType, Variation, VariationVariable,
    },
    Error, ProjectConfig, Result, CLIENT_NAME, CLIENT_VERSION,
};

/// Project datafile, as served by the configuration backend.
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct Datafile {
    #[serde(default)]
    version: String,
    project_id: String,
    #[serde(default)]
    account_id: String,
    #[serde(default)]
    revision: String,
    #[serde(default, rename = "anonymizeIP")]
    anonymize_ip: bool,
    #[serde(default)]
    bot_filtering: bool,
    #[serde(default)]
    experiments: Vec<DatafileExperiment>,
    #[serde(default)]
    feature_flags: Vec<DatafileFeatureFlag>,
    #[serde(default)]
    events: Vec<DatafileEvent>,
    #[serde(default)]
    attributes: Vec<DatafileAttribute>,
    #[serde(default)]
    rollouts: Vec<DatafileRollout>,
}

/// `TryParse` allows the subfield to fail parsing without failing the parsing of the whole
/// structure.
#[derive(Debug, Serialize, Deserialize)]
#[serde(untagged)]
enum TryParse<T> {
    Parsed(T),
    ParseFailed(serde_json::Value),
}

impl<T> From<TryParse<T>> for Option<T> {
    fn from(value: TryParse<T>) -> Self {
        match value {
            TryParse::Parsed(v) => Some(v),
            TryParse::ParseFailed(_) => None,
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct DatafileExperiment {
    id: String,
    key: String,
    #[serde(default)]
    layer_id: String,
    #[serde(default)]
    variations: Vec<DatafileVariation>,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct DatafileVariation {
    id: String,
    key: String,
    #[serde(default)]
    feature_enabled: bool,
    #[serde(default)]
    variables: Vec<DatafileVariationVariable>,
}

#[derive(Debug, Serialize, Deserialize)]
struct DatafileVariationVariable {
    id: String,
    value: String,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct DatafileFeatureFlag {
    id: String,
    key: String,
    #[serde(default)]
    rollout_id: String,
    #[serde(default)]
    experiment_ids: Vec<String>,
    #[serde(default)]
    variables: Vec<DatafileVariable>,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct DatafileVariable {
    id: String,
    key: String,
    #[serde(rename = "type", default = "unset_type")]
    variable_type: TryParse<VariableType>,
    #[serde(default)]
    default_value: String,
}

fn unset_type() -> TryParse<VariableType> {
    TryParse::ParseFailed(serde_json::Value::Null)
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct DatafileEvent {
    id: String,
    key: String,
    #[serde(default)]
    experiment_ids: Vec<String>,
}

#[derive(Debug, Serialize, Deserialize)]
struct DatafileAttribute {
    id: String,
    key: String,
}

#[derive(Debug, Serialize, Deserialize)]
struct DatafileRollout {
    id: String,
    #[serde(default)]
    experiments: Vec<DatafileExperiment>,
}

impl From<DatafileExperiment> for Experiment {
    fn from(experiment: DatafileExperiment) -> Self {
        Experiment {
            id: experiment.id,
            key: experiment.key,
            layer_id: experiment.layer_id,
            variations: experiment
                .variations
                .into_iter()
                .map(|variation| (variation.key.clone(), variation.into()))
                .collect(),
        }
    }
}

impl From<DatafileVariation> for Variation {
    fn from(variation: DatafileVariation) -> Self {
        Variation {
            id: variation.id,
            key: variation.key,
            feature_enabled: variation.feature_enabled,
            variables: variation
                .variables
                .into_iter()
                .map(|v| {
                    (
                        v.id.clone(),
                        VariationVariable {
                            id: v.id,
                            value: v.value,
                        },
                    )
                })
                .collect(),
        }
    }
}

impl From<DatafileVariable> for Variable {
    fn from(variable: DatafileVariable) -> Self {
        Variable {
            id: variable.id,
            key: variable.key,
            variable_type: variable.variable_type.into(),
            default_value: variable.default_value,
        }
    }
}

/// [`ProjectConfig`] backed by a parsed datafile, indexed by key.
///
/// # Examples
///
/// ```
/// # use expkit::{DatafileProjectConfig, ProjectConfig};
/// let config = DatafileProjectConfig::from_json(r#"{"projectId": "42", "revision": "3"}"#).unwrap();
/// assert_eq!(config.project_id(), "42");
/// assert!(config.get_feature_by_key("missing").is_err());
/// ```
#[derive(Debug)]
pub struct DatafileProjectConfig {
    version: String,
    project_id: String,
    account_id: String,
    revision: String,
    anonymize_ip: bool,
    bot_filtering: bool,
    experiments: HashMap<String, Experiment>,
    features: HashMap<String, Feature>,
    events: HashMap<String, Event>,
    attribute_ids: HashMap<String, String>,
}

impl DatafileProjectConfig {
    /// Parse a datafile JSON document.
    ///
    /// # Errors
    ///
    /// [`Error::DatafileParse`] if the document is not a valid datafile. Unknown variable types
    /// are not an error; such variables are kept with an unset type.
    pub fn from_json(datafile: &str) -> Result<Self> {
        let datafile: Datafile = serde_json::from_str(datafile)?;
        Ok(DatafileProjectConfig::from(datafile))
    }

    /// Datafile format version.
    pub fn version(&self) -> &str {
        &self.version
    }
}

impl From<Datafile> for DatafileProjectConfig {
    fn from(datafile: Datafile) -> Self {
        let experiments_by_id: HashMap<String, Experiment> = datafile
            .experiments
            .into_iter()
            .map(|experiment| (experiment.id.clone(), Experiment::from(experiment)))
            .collect();

        let rollouts_by_id: HashMap<String, Rollout> = datafile
            .rollouts
            .into_iter()
            .map(|rollout| {
                (
                    rollout.id.clone(),
                    Rollout {
                        id: rollout.id,
                        experiments: rollout.experiments.into_iter().map(Into::into).collect(),
                    },
                )
            })
            .collect();

        let features = datafile
            .feature_flags
            .into_iter()
            .map(|flag| {
                let feature_experiments = flag
                    .experiment_ids
                    .iter()
                    .filter_map(|experiment_id| {
                        let experiment = experiments_by_id.get(experiment_id);
                        if experiment.is_none() {
                            log::warn!(target: "expkit",
                                       feature_key = flag.key.as_str(),
                                       experiment_id = experiment_id.as_str();
                                       "datafile: feature references unknown experiment");
                        }
                        experiment.cloned()
                    })
                    .collect();
                let rollout = match flag.rollout_id.as_str() {
                    "" => None,
                    rollout_id => rollouts_by_id.get(rollout_id).cloned(),
                };
                let feature = Feature {
                    id: flag.id,
                    key: flag.key.clone(),
                    feature_experiments,
                    rollout,
                    variable_map: flag
                        .variables
                        .into_iter()
                        .map(|variable| (variable.key.clone(), variable.into()))
                        .collect(),
                };
                (flag.key, feature)
            })
            .collect();

        let experiments = experiments_by_id
            .into_values()
            .map(|experiment| (experiment.key.clone(), experiment))
            .collect();

        let events = datafile
            .events
            .into_iter()
            .map(|event| {
                (
                    event.key.clone(),
                    Event {
                        id: event.id,
                        key: event.key,
                        experiment_ids: event.experiment_ids,
                    },
                )
            })
            .collect();

        let attribute_ids = datafile
            .attributes
            .into_iter()
            .map(|attribute| (attribute.key, attribute.id))
            .collect();

        DatafileProjectConfig {
            version: datafile.version,
            project_id: datafile.project_id,
            account_id: datafile.account_id,
            revision: datafile.revision,
            anonymize_ip: datafile.anonymize_ip,
            bot_filtering: datafile.bot_filtering,
            experiments,
            features,
            events,
            attribute_ids,
        }
    }
}

impl ProjectConfig for DatafileProjectConfig {
    fn get_feature_by_key(&self, feature_key: &str) -> Result<&Feature> {
        self.features
            .get(feature_key)
            .ok_or_else(|| Error::FeatureNotFound(feature_key.to_owned()))
    }

    fn get_experiment_by_key(&self, experiment_key: &str) -> Result<&Experiment> {
        self.experiments
            .get(experiment_key)
            .ok_or_else(|| Error::ExperimentNotFound(experiment_key.to_owned()))
    }

    fn get_variable_by_key(&self, feature_key: &str, variable_key: &str) -> Result<&Variable> {
        self.get_feature_by_key(feature_key)?
            .variable_map
            .get(variable_key)
            .ok_or_else(|| Error::VariableNotFound {
                feature_key: feature_key.to_owned(),
                variable_key: variable_key.to_owned(),
            })
    }

    fn get_event_by_key(&self, event_key: &str) -> Result<&Event> {
        self.events
            .get(event_key)
            .ok_or_else(|| Error::EventNotFound(event_key.to_owned()))
    }

    fn get_attribute_id(&self, attribute_key: &str) -> Option<&str> {
        self.attribute_ids.get(attribute_key).map(String::as_str)
    }

    fn feature_list(&self) -> Vec<&Feature> {
        self.features.values().collect()
    }

    fn project_id(&self) -> &str {
        &self.project_id
    }

    fn account_id(&self) -> &str {
        &self.account_id
    }

    fn revision(&self) -> &str {
        &self.revision
    }

    fn anonymize_ip(&self) -> bool {
        self.anonymize_ip
    }

    fn bot_filtering(&self) -> bool {
        self.bot_filtering
    }

    fn client_name(&self) -> &str {
        CLIENT_NAME
    }

    fn client_version(&self) -> &str {
        CLIENT_VERSION
    }
}

#[cfg(test)]
mod tests {
    use std::fs;

    use super::DatafileProjectConfig;
    use crate::{entities::VariableType, Error, ProjectConfig};

    fn load() -> DatafileProjectConfig {
        let json = fs::read_to_string("tests/data/datafile.json")
            .expect("Failed to open tests/data/datafile.json");
        DatafileProjectConfig::from_json(&json).unwrap()
    }

    #[test]
    fn parses_identity_fields() {
        let config = load();
        assert_eq!(config.version(), "4");
        assert_eq!(config.project_id(), "15389410617");
        assert_eq!(config.account_id(), "8362480420");
        assert_eq!(config.revision(), "7");
        assert!(config.anonymize_ip());
        assert!(config.bot_filtering());
        assert_eq!(config.client_name(), crate::CLIENT_NAME);
    }

    #[test]
    fn resolves_feature_references() {
        let config = load();
        let feature = config.get_feature_by_key("checkout_flow").unwrap();
        assert_eq!(feature.feature_experiments.len(), 1);
        assert_eq!(feature.feature_experiments[0].key, "checkout_test");
        assert_eq!(
            feature.rollout.as_ref().map(|rollout| rollout.id.as_str()),
            Some("rollout_1")
        );

        let variable = config
            .get_variable_by_key("checkout_flow", "button_color")
            .unwrap();
        assert_eq!(variable.variable_type, Some(VariableType::String));
        assert_eq!(variable.default_value, "blue");

        let experiment = config.get_experiment_by_key("checkout_test").unwrap();
        let treatment = &experiment.variations["treatment"];
        assert!(treatment.feature_enabled);
        assert_eq!(treatment.variable_override(&variable.id), Some("green"));
    }

    #[test]
    fn unknown_variable_type_is_unset() {
        let config = load();
        let variable = config
            .get_variable_by_key("checkout_flow", "layout")
            .unwrap();
        assert_eq!(variable.variable_type, None);
    }

    #[test]
    fn lookups_report_missing_keys() {
        let config = load();
        assert!(matches!(
            config.get_feature_by_key("nope"),
            Err(Error::FeatureNotFound(key)) if key == "nope"
        ));
        assert!(matches!(
            config.get_experiment_by_key("nope"),
            Err(Error::ExperimentNotFound(_))
        ));
        assert!(matches!(
            config.get_variable_by_key("checkout_flow", "nope"),
            Err(Error::VariableNotFound { .. })
        ));
        assert!(matches!(
            config.get_variable_by_key("nope", "button_color"),
            Err(Error::FeatureNotFound(_))
        ));
        assert!(matches!(
            config.get_event_by_key("nope"),
            Err(Error::EventNotFound(_))
        ));
    }

    #[test]
    fn exposes_events_and_attributes() {
        let config = load();
        let event = config.get_event_by_key("sample_conversion").unwrap();
        assert_eq!(event.id, "15368860886");
        assert_eq!(event.experiment_ids, vec!["15402980349".to_owned()]);
        assert_eq!(config.get_attribute_id("country"), Some("111094"));
        assert_eq!(config.get_attribute_id("unknown"), None);
        assert_eq!(config.feature_list().len(), 2);
    }

    #[test]
    fn skips_dangling_experiment_ids() {
        let config = DatafileProjectConfig::from_json(
            r#"
              {
                "projectId": "1",
                "featureFlags": [
                  {"id": "f1", "key": "f", "experimentIds": ["missing"], "variables": []}
                ]
              }
            "#,
        )
        .unwrap();
        let feature = config.get_feature_by_key("f").unwrap();
        assert!(feature.feature_experiments.is_empty());
        assert!(feature.rollout.is_none());
    }

    #[test]
    fn rejects_malformed_datafile() {
        assert!(matches!(
            DatafileProjectConfig::from_json("{\"experiments\": 5}"),
            Err(Error::DatafileParse(_))
        ));
    }
}
