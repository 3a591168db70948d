#![allow(dead_code)]

use std::sync::{
    atomic::{AtomicUsize, Ordering},
    Arc, Mutex,
};

use expkit::{
    Client, ClientConfig, DatafileProjectConfig, DecisionResult, DecisionService, DecisionSource,
    Error, EventProcessor, ExecutionContext, ExperimentDecision, ExperimentDecisionContext,
    FeatureDecision, FeatureDecisionContext, ProjectConfig, ProjectConfigManager, Result,
    UserContext, UserEvent,
};

pub const PANIC_MESSAGE: &str = "I'm panicking";

pub fn init_logger() {
    let _ = env_logger::builder().is_test(true).try_init();
}

pub fn datafile_config() -> Arc<DatafileProjectConfig> {
    let json = std::fs::read_to_string("tests/data/datafile.json")
        .expect("Failed to open tests/data/datafile.json");
    Arc::new(DatafileProjectConfig::from_json(&json).unwrap())
}

/// Project with a single feature `test_feature` declaring `test_variable`, and an experiment
/// `test_experiment` whose only variation `variation_on` overrides the variable.
pub fn single_variable_config(
    variable_type: &str,
    default_value: &str,
    override_value: &str,
    feature_enabled: bool,
) -> Arc<DatafileProjectConfig> {
    let datafile = serde_json::json!({
        "version": "4",
        "projectId": "15389410617",
        "accountId": "8362480420",
        "revision": "1",
        "experiments": [{
            "id": "11111",
            "key": "test_experiment",
            "layerId": "33333",
            "variations": [{
                "id": "22222",
                "key": "variation_on",
                "featureEnabled": feature_enabled,
                "variables": [{"id": "1", "value": override_value}]
            }]
        }],
        "featureFlags": [{
            "id": "44444",
            "key": "test_feature",
            "experimentIds": ["11111"],
            "variables": [{
                "id": "1",
                "key": "test_variable",
                "type": variable_type,
                "defaultValue": default_value
            }]
        }]
    });
    Arc::new(DatafileProjectConfig::from_json(&datafile.to_string()).unwrap())
}

/// Feature decision assigning `variation_key` of `experiment_key`.
pub fn feature_decision(
    config: &dyn ProjectConfig,
    experiment_key: &str,
    variation_key: &str,
    source: DecisionSource,
) -> FeatureDecision {
    let experiment = config.get_experiment_by_key(experiment_key).unwrap().clone();
    let variation = experiment.variations[variation_key].clone();
    FeatureDecision {
        experiment,
        variation: Some(variation),
        source,
    }
}

/// Experiment decision assigning `variation_key` of `experiment_key`.
pub fn experiment_decision(
    config: &dyn ProjectConfig,
    experiment_key: &str,
    variation_key: &str,
) -> ExperimentDecision {
    let experiment = config.get_experiment_by_key(experiment_key).unwrap().clone();
    let variation = experiment.variations[variation_key].clone();
    ExperimentDecision {
        experiment,
        variation: Some(variation),
    }
}

pub struct StaticConfigManager {
    config: Result<Arc<dyn ProjectConfig>>,
    pub calls: AtomicUsize,
}

impl StaticConfigManager {
    pub fn new(config: Arc<dyn ProjectConfig>) -> Arc<Self> {
        Arc::new(StaticConfigManager {
            config: Ok(config),
            calls: AtomicUsize::new(0),
        })
    }

    pub fn failing(error: Error) -> Arc<Self> {
        Arc::new(StaticConfigManager {
            config: Err(error),
            calls: AtomicUsize::new(0),
        })
    }
}

impl ProjectConfigManager for StaticConfigManager {
    fn get_config(&self) -> Result<Arc<dyn ProjectConfig>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.config.clone()
    }
}

pub struct PanickingConfigManager;

impl ProjectConfigManager for PanickingConfigManager {
    fn get_config(&self) -> Result<Arc<dyn ProjectConfig>> {
        panic!("{}", PANIC_MESSAGE);
    }
}

/// Decision service returning canned results and counting calls.
pub struct ScriptedDecisionService {
    feature: DecisionResult<FeatureDecision>,
    experiment: DecisionResult<ExperimentDecision>,
    pub feature_calls: AtomicUsize,
    pub experiment_calls: AtomicUsize,
}

impl ScriptedDecisionService {
    pub fn new(
        feature: DecisionResult<FeatureDecision>,
        experiment: DecisionResult<ExperimentDecision>,
    ) -> Arc<Self> {
        Arc::new(ScriptedDecisionService {
            feature,
            experiment,
            feature_calls: AtomicUsize::new(0),
            experiment_calls: AtomicUsize::new(0),
        })
    }

    pub fn features(feature: DecisionResult<FeatureDecision>) -> Arc<Self> {
        Self::new(feature, Ok(ExperimentDecision::default()))
    }

    pub fn experiments(experiment: DecisionResult<ExperimentDecision>) -> Arc<Self> {
        Self::new(Ok(FeatureDecision::default()), experiment)
    }

    pub fn calls(&self) -> usize {
        self.feature_calls.load(Ordering::SeqCst) + self.experiment_calls.load(Ordering::SeqCst)
    }
}

impl DecisionService for ScriptedDecisionService {
    fn get_feature_decision(
        &self,
        _context: &FeatureDecisionContext<'_>,
        _user: &UserContext,
    ) -> DecisionResult<FeatureDecision> {
        self.feature_calls.fetch_add(1, Ordering::SeqCst);
        self.feature.clone()
    }

    fn get_experiment_decision(
        &self,
        _context: &ExperimentDecisionContext<'_>,
        _user: &UserContext,
    ) -> DecisionResult<ExperimentDecision> {
        self.experiment_calls.fetch_add(1, Ordering::SeqCst);
        self.experiment.clone()
    }
}

pub struct PanickingDecisionService;

impl DecisionService for PanickingDecisionService {
    fn get_feature_decision(
        &self,
        _context: &FeatureDecisionContext<'_>,
        _user: &UserContext,
    ) -> DecisionResult<FeatureDecision> {
        panic!("{}", PANIC_MESSAGE);
    }

    fn get_experiment_decision(
        &self,
        _context: &ExperimentDecisionContext<'_>,
        _user: &UserContext,
    ) -> DecisionResult<ExperimentDecision> {
        panic!("{}", PANIC_MESSAGE);
    }
}

#[derive(Default)]
pub struct RecordingProcessor {
    events: Mutex<Vec<UserEvent>>,
}

impl RecordingProcessor {
    pub fn events(&self) -> Vec<UserEvent> {
        self.events.lock().unwrap().clone()
    }
}

impl EventProcessor for RecordingProcessor {
    fn process_event(&self, event: UserEvent) {
        self.events.lock().unwrap().push(event);
    }
}

#[derive(Default)]
pub struct RecordingExecutionContext {
    pub terminations: AtomicUsize,
}

impl ExecutionContext for RecordingExecutionContext {
    fn terminate_and_wait(&self) {
        self.terminations.fetch_add(1, Ordering::SeqCst);
    }
}

pub struct Harness {
    pub client: Client,
    pub events: Arc<RecordingProcessor>,
    pub context: Arc<RecordingExecutionContext>,
}

pub fn harness(
    config_manager: Arc<dyn ProjectConfigManager>,
    decision_service: Arc<dyn DecisionService>,
) -> Harness {
    init_logger();

    let events = Arc::new(RecordingProcessor::default());
    let context = Arc::new(RecordingExecutionContext::default());
    let client = ClientConfig::new(config_manager, decision_service)
        .event_processor(events.clone())
        .execution_context(context.clone())
        .to_client();
    Harness {
        client,
        events,
        context,
    }
}
