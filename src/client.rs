use std::{
    any::Any,
    cell::RefCell,
    collections::HashMap,
    panic::{self, AssertUnwindSafe},
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc, PoisonError, RwLock,
    },
};

use crate::{
    decision::{
        DecisionError, DecisionResult, DecisionService, DecisionSource, ExperimentDecisionContext,
        FeatureDecision, FeatureDecisionContext,
    },
    entities::{Attributes, Experiment, Feature, UserContext, Variable, Variation},
    event::{EventProcessor, PendingEvents, UserEvent},
    variable::{self, VariableValue},
    ClientConfig, Error, ExecutionContext, ProjectConfig, ProjectConfigManager, Result,
};

/// Decision and feature variable evaluation client.
///
/// The client resolves features and experiments from the current [`ProjectConfig`] snapshot,
/// asks the [`DecisionService`] for an assignment, and hands impression and conversion events to
/// the [`EventProcessor`].
///
/// # Error handling
///
/// No method panics. A panic raised by the configuration source, the decision service or the
/// client itself is caught and returned as [`Error::PanicRecovered`], and no event is emitted for
/// that call.
///
/// Event delivery is fire-and-forget: if the [`EventProcessor`] panics, the panic is logged, the
/// remaining events of that call are dropped, and the call still returns its value.
///
/// Non-fatal errors reported by the decision service alongside a usable decision are logged and
/// otherwise ignored.
///
/// # Examples
///
/// ```
/// # use std::sync::Arc;
/// # use expkit::{ClientConfig, ConfigurationStore, DecisionService, UserContext};
/// # fn test(decision_service: Arc<dyn DecisionService>) {
/// let client = ClientConfig::new(Arc::new(ConfigurationStore::new()), decision_service).to_client();
/// let enabled = client
///     .is_feature_enabled("new_checkout", &UserContext::new("user-1"))
///     .unwrap_or(false);
/// client.close();
/// # }
/// ```
pub struct Client {
    config_manager: Arc<dyn ProjectConfigManager>,
    decision_service: Arc<dyn DecisionService>,
    event_processor: Arc<dyn EventProcessor>,
    execution_context: Arc<dyn ExecutionContext>,
    /// Set once by [`Client::close`]. Checked before every event handed to the processor.
    closed: AtomicBool,
    /// Held for reading while events are dispatched. `close()` takes it for writing to wait for
    /// in-flight dispatches, unless it is called from the event processor itself.
    dispatch_gate: RwLock<()>,
}

thread_local! {
    /// Clients currently dispatching events on this thread, by address.
    static DISPATCHING: RefCell<Vec<usize>> = const { RefCell::new(Vec::new()) };
}

/// Marks a client as dispatching on the current thread for as long as it is alive.
struct DispatchScope {
    client: usize,
}

impl DispatchScope {
    fn enter(client: &Client) -> Self {
        let client = client as *const Client as usize;
        DISPATCHING.with(|active| active.borrow_mut().push(client));
        DispatchScope { client }
    }

    fn is_active(client: &Client) -> bool {
        let client = client as *const Client as usize;
        DISPATCHING.with(|active| active.borrow().contains(&client))
    }
}

impl Drop for DispatchScope {
    fn drop(&mut self) {
        DISPATCHING.with(|active| {
            let mut active = active.borrow_mut();
            if let Some(position) = active.iter().rposition(|&client| client == self.client) {
                active.remove(position);
            }
        });
    }
}

/// All variables of a feature, evaluated for one user.
#[derive(Debug, Clone, Default)]
pub struct FeatureVariables {
    /// Whether the feature is enabled for the user.
    pub enabled: bool,
    /// Variable values keyed by variable key, rendered as strings.
    ///
    /// Variables whose value failed to parse as their declared type are missing.
    pub variables: HashMap<String, String>,
    /// First error encountered while evaluating variables, in variable key order.
    pub error: Option<Error>,
}

impl Client {
    /// Create a new `Client` using the specified configuration.
    pub fn new(config: ClientConfig) -> Self {
        Client {
            config_manager: config.config_manager,
            decision_service: config.decision_service,
            event_processor: config.event_processor,
            execution_context: config.execution_context,
            closed: AtomicBool::new(false),
            dispatch_gate: RwLock::new(()),
        }
    }

    /// Track a conversion event for the user.
    ///
    /// An event key unknown to the current configuration is not an error: nothing is tracked.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is unavailable.
    pub fn track(&self, event_key: &str, user: &UserContext, tags: &Attributes) -> Result<()> {
        self.guarded("track", |events| {
            let config = self.config_manager.get_config()?;

            let event = match config.get_event_by_key(event_key) {
                Ok(event) => event,
                Err(err) => {
                    log::warn!(target: "expkit",
                               event_key = event_key,
                               user_id = user.id.as_str();
                               "not tracking event: {}", err);
                    return Ok(());
                }
            };

            events.push(UserEvent::conversion(config.as_ref(), event, user, tags));
            Ok(())
        })
    }

    /// Get the variation key the user is assigned in the experiment and record an impression.
    ///
    /// Returns `Ok(None)` if the user is not assigned or if the experiment does not exist.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is unavailable or the decision service fails
    /// without a decision.
    pub fn activate(&self, experiment_key: &str, user: &UserContext) -> Result<Option<String>> {
        self.guarded("activate", |events| {
            let config = self.config_manager.get_config()?;

            let Some((experiment, variation)) =
                self.resolve_experiment(config.as_ref(), experiment_key, user)?
            else {
                return Ok(None);
            };

            events.push(UserEvent::impression(
                config.as_ref(),
                experiment,
                &variation,
                user,
            ));
            Ok(Some(variation.key))
        })
    }

    /// Get the variation key the user is assigned in the experiment without recording an
    /// impression.
    ///
    /// Returns `Ok(None)` if the user is not assigned or if the experiment does not exist.
    ///
    /// # Errors
    ///
    /// Same as [`Client::activate`].
    pub fn get_variation(&self, experiment_key: &str, user: &UserContext) -> Result<Option<String>> {
        self.guarded("get_variation", |_events| {
            let config = self.config_manager.get_config()?;
            let assignment = self.resolve_experiment(config.as_ref(), experiment_key, user)?;
            Ok(assignment.map(|(_experiment, variation)| variation.key))
        })
    }

    /// Whether the feature is enabled for the user.
    ///
    /// Records an impression if the user was bucketed through a feature test.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is unavailable, the feature does not exist, or the
    /// decision service fails without a decision.
    pub fn is_feature_enabled(&self, feature_key: &str, user: &UserContext) -> Result<bool> {
        self.guarded("is_feature_enabled", |events| {
            let config = self.config_manager.get_config()?;
            let feature = config.get_feature_by_key(feature_key)?;
            self.feature_enabled(config.as_ref(), feature, user, events)
        })
    }

    /// Keys of all features enabled for the user, sorted.
    ///
    /// Features that fail to evaluate are logged and left out.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is unavailable.
    pub fn get_enabled_features(&self, user: &UserContext) -> Result<Vec<String>> {
        self.guarded("get_enabled_features", |events| {
            let config = self.config_manager.get_config()?;

            let mut features = config.feature_list();
            features.sort_by(|a, b| a.key.cmp(&b.key));

            let mut enabled = Vec::new();
            for feature in features {
                match self.feature_enabled(config.as_ref(), feature, user, events) {
                    Ok(true) => enabled.push(feature.key.clone()),
                    Ok(false) => {}
                    Err(err) => {
                        log::warn!(target: "expkit",
                                   feature_key = feature.key.as_str(),
                                   user_id = user.id.as_str();
                                   "skipping feature that failed to evaluate: {}", err);
                    }
                }
            }
            Ok(enabled)
        })
    }

    /// Get the value of a boolean feature variable.
    ///
    /// # Errors
    ///
    /// See [`Client::get_feature_variable`].
    pub fn get_feature_variable_boolean(
        &self,
        feature_key: &str,
        variable_key: &str,
        user: &UserContext,
    ) -> Result<bool> {
        self.get_feature_variable(feature_key, variable_key, user)
    }

    /// Get the value of a double feature variable.
    ///
    /// # Errors
    ///
    /// See [`Client::get_feature_variable`].
    pub fn get_feature_variable_double(
        &self,
        feature_key: &str,
        variable_key: &str,
        user: &UserContext,
    ) -> Result<f64> {
        self.get_feature_variable(feature_key, variable_key, user)
    }

    /// Get the value of an integer feature variable.
    ///
    /// # Errors
    ///
    /// See [`Client::get_feature_variable`].
    pub fn get_feature_variable_integer(
        &self,
        feature_key: &str,
        variable_key: &str,
        user: &UserContext,
    ) -> Result<i64> {
        self.get_feature_variable(feature_key, variable_key, user)
    }

    /// Get the value of a string feature variable.
    ///
    /// # Errors
    ///
    /// See [`Client::get_feature_variable`].
    pub fn get_feature_variable_string(
        &self,
        feature_key: &str,
        variable_key: &str,
        user: &UserContext,
    ) -> Result<String> {
        self.get_feature_variable(feature_key, variable_key, user)
    }

    /// Get the value of a feature variable as `T`.
    ///
    /// The value is the override of the user's variation if that variation enables the feature,
    /// and the variable's default otherwise.
    ///
    /// # Errors
    ///
    /// - Configuration, feature and variable lookup errors.
    /// - [`Error::InvalidVariableType`] if the variable is not declared as `T`, whatever its
    ///   value.
    /// - [`Error::VariableParse`] if the value is not a valid `T` literal.
    ///
    /// # Examples
    ///
    /// ```
    /// # use expkit::{Client, UserContext};
    /// # fn test(client: &Client) {
    /// let max_items: i64 = client
    ///     .get_feature_variable("cart", "max_items", &UserContext::new("user-1"))
    ///     .unwrap_or(10);
    /// # }
    /// ```
    pub fn get_feature_variable<T: VariableValue>(
        &self,
        feature_key: &str,
        variable_key: &str,
        user: &UserContext,
    ) -> Result<T> {
        self.guarded("get_feature_variable", |_events| {
            let (config, decision) = self.resolve_feature(feature_key, user)?;
            let variable = config.get_variable_by_key(feature_key, variable_key)?;

            let raw = variable::select_raw_value(variable, &decision);
            variable::coerce::<T>(variable, raw).map_err(|err| {
                log::warn!(target: "expkit",
                           feature_key = feature_key,
                           variable_key = variable_key,
                           user_id = user.id.as_str();
                           "unable to read feature variable: {}", err);
                err
            })
        })
    }

    /// Evaluate every variable of the feature for the user.
    ///
    /// A variable that fails to parse is left out of [`FeatureVariables::variables`] and reported
    /// in [`FeatureVariables::error`]; the other variables are still returned.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is unavailable, the feature does not exist, or the
    /// decision service fails without a decision.
    pub fn get_all_feature_variables(
        &self,
        feature_key: &str,
        user: &UserContext,
    ) -> Result<FeatureVariables> {
        self.guarded("get_all_feature_variables", |_events| {
            let (config, decision) = self.resolve_feature(feature_key, user)?;
            let feature = config.get_feature_by_key(feature_key)?;

            let mut declared: Vec<&Variable> = feature.variable_map.values().collect();
            declared.sort_by(|a, b| a.key.cmp(&b.key));

            let mut result = FeatureVariables {
                enabled: decision.feature_enabled(),
                variables: HashMap::with_capacity(declared.len()),
                error: None,
            };
            for variable in declared {
                let raw = variable::select_raw_value(variable, &decision);
                match variable::render(variable, raw) {
                    Ok(value) => {
                        result.variables.insert(variable.key.clone(), value);
                    }
                    Err(err) => {
                        log::warn!(target: "expkit",
                                   feature_key = feature_key,
                                   variable_key = variable.key.as_str();
                                   "leaving out feature variable: {}", err);
                        result.error.get_or_insert(err);
                    }
                }
            }
            Ok(result)
        })
    }

    /// Get the current configuration snapshot.
    ///
    /// # Errors
    ///
    /// Returns the configuration source's error.
    pub fn get_project_config(&self) -> Result<Arc<dyn ProjectConfig>> {
        self.guarded("get_project_config", |_events| {
            self.config_manager.get_config()
        })
    }

    /// Close the client: stop background work of the execution context and wait for it to drain.
    ///
    /// After `close()` returns, no event reaches the event processor and all other methods return
    /// [`Error::ClientClosed`]. Calling `close()` again does nothing.
    ///
    /// `close()` may be called from within the event processor; events of the call being
    /// dispatched that were not yet handed over are dropped.
    pub fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            log::debug!(target: "expkit", "client is already closed");
            return;
        }

        if DispatchScope::is_active(self) {
            log::debug!(target: "expkit", "closing client from its event processor");
        } else {
            // Wait for in-flight dispatches; they stop at the next event.
            drop(self.dispatch_gate.write().unwrap_or_else(PoisonError::into_inner));
        }

        log::debug!(target: "expkit", "closing client");
        if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(|| {
            self.execution_context.terminate_and_wait()
        })) {
            log::error!(target: "expkit",
                        "execution context panicked while shutting down: {}",
                        panic_message(payload.as_ref()));
        }
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Fetch the configuration, look up the feature and decide it for the user.
    fn resolve_feature(
        &self,
        feature_key: &str,
        user: &UserContext,
    ) -> Result<(Arc<dyn ProjectConfig>, FeatureDecision)> {
        let config = self.config_manager.get_config()?;
        let feature = config.get_feature_by_key(feature_key)?;
        let decision = self.decide_feature(config.as_ref(), feature, user)?;
        Ok((config, decision))
    }

    fn decide_feature(
        &self,
        config: &dyn ProjectConfig,
        feature: &Feature,
        user: &UserContext,
    ) -> Result<FeatureDecision> {
        let context = FeatureDecisionContext {
            feature,
            project_config: config,
        };
        let decision = fail_open(
            self.decision_service.get_feature_decision(&context, user),
            &feature.key,
            user,
        )?;

        if let Some(variation) = &decision.variation {
            check_membership(&decision.experiment, variation)?;
        }

        log::trace!(target: "expkit",
                    feature_key = feature.key.as_str(),
                    user_id = user.id.as_str(),
                    variation_key = decision.variation.as_ref().map(|v| v.key.as_str());
                    "decided feature");
        Ok(decision)
    }

    fn feature_enabled(
        &self,
        config: &dyn ProjectConfig,
        feature: &Feature,
        user: &UserContext,
        events: &mut PendingEvents,
    ) -> Result<bool> {
        let decision = self.decide_feature(config, feature, user)?;

        if decision.source == DecisionSource::FeatureTest {
            if let Some(variation) = &decision.variation {
                events.push(UserEvent::impression(
                    config,
                    &decision.experiment,
                    variation,
                    user,
                ));
            }
        }

        Ok(decision.feature_enabled())
    }

    /// Look up the experiment and decide it for the user.
    ///
    /// A missing experiment yields `Ok(None)`, unlike a missing feature.
    fn resolve_experiment<'c>(
        &self,
        config: &'c dyn ProjectConfig,
        experiment_key: &str,
        user: &UserContext,
    ) -> Result<Option<(&'c Experiment, Variation)>> {
        let experiment = match config.get_experiment_by_key(experiment_key) {
            Ok(experiment) => experiment,
            Err(err) => {
                log::debug!(target: "expkit",
                            experiment_key = experiment_key,
                            user_id = user.id.as_str();
                            "no assignment: {}", err);
                return Ok(None);
            }
        };

        let context = ExperimentDecisionContext {
            experiment,
            project_config: config,
        };
        let decision = fail_open(
            self.decision_service.get_experiment_decision(&context, user),
            experiment_key,
            user,
        )?;

        let Some(variation) = decision.variation else {
            return Ok(None);
        };
        check_membership(experiment, &variation)?;
        Ok(Some((experiment, variation)))
    }

    /// Run a public method body, converting panics to [`Error::PanicRecovered`].
    ///
    /// Events pushed by `body` reach the event processor only if `body` returns `Ok`.
    fn guarded<T>(
        &self,
        method: &'static str,
        body: impl FnOnce(&mut PendingEvents) -> Result<T>,
    ) -> Result<T> {
        if self.is_closed() {
            return Err(Error::ClientClosed);
        }

        let mut events = PendingEvents::new();
        let value = panic::catch_unwind(AssertUnwindSafe(|| body(&mut events)))
            .unwrap_or_else(|payload| Err(recovered(method, payload.as_ref())))?;

        self.dispatch(method, events);
        Ok(value)
    }

    /// Hand events to the processor until the client is closed or the processor panics.
    fn dispatch(&self, method: &'static str, events: PendingEvents) {
        if events.is_empty() {
            return;
        }

        let _gate = self.dispatch_gate.read().unwrap_or_else(PoisonError::into_inner);
        let _scope = DispatchScope::enter(self);

        let total = events.len();
        for (sent, event) in events.into_iter().enumerate() {
            if self.is_closed() {
                log::debug!(target: "expkit",
                            method = method,
                            dropped = total - sent;
                            "client closed, dropping events");
                return;
            }

            log::trace!(target: "expkit",
                        method = method,
                        visitor_id = event.visitor_id.as_str();
                        "dispatching event");
            if let Err(payload) =
                panic::catch_unwind(AssertUnwindSafe(|| self.event_processor.process_event(event)))
            {
                log::error!(target: "expkit",
                            method = method,
                            dropped = total - sent - 1;
                            "event processor panicked, dropping remaining events: {}",
                            panic_message(payload.as_ref()));
                return;
            }
        }
    }
}

/// Apply the fail-open policy: a decision returned with an error is used, the error is logged.
fn fail_open<D>(result: DecisionResult<D>, key: &str, user: &UserContext) -> Result<D> {
    match result {
        Ok(decision) => Ok(decision),
        Err(DecisionError {
            error,
            decision: Some(decision),
        }) => {
            log::warn!(target: "expkit",
                       key = key,
                       user_id = user.id.as_str();
                       "using decision despite error: {}", error);
            Ok(decision)
        }
        Err(DecisionError {
            error,
            decision: None,
        }) => Err(error),
    }
}

fn check_membership(experiment: &Experiment, variation: &Variation) -> Result<()> {
    match experiment.variations.get(&variation.key) {
        Some(own) if own.id == variation.id => Ok(()),
        _ => {
            log::warn!(target: "expkit",
                       experiment_key = experiment.key.as_str(),
                       variation_key = variation.key.as_str();
                       "internal: decided variation is not part of the experiment");
            Err(Error::Decision(format!(
                "variation {:?} does not belong to experiment {:?}",
                variation.key, experiment.key
            )))
        }
    }
}

fn recovered(method: &'static str, payload: &(dyn Any + Send)) -> Error {
    let message = panic_message(payload);
    log::error!(target: "expkit", method = method; "recovered from panic: {}", message);
    Error::PanicRecovered(message)
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&'static str>() {
        (*message).to_owned()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_owned()
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::{check_membership, fail_open, panic_message};
    use crate::{
        decision::{DecisionError, FeatureDecision},
        entities::{Experiment, UserContext, Variation},
        Error,
    };

    fn variation(id: &str) -> Variation {
        Variation {
            id: id.to_owned(),
            key: id.to_owned(),
            feature_enabled: true,
            variables: HashMap::new(),
        }
    }

    #[test]
    fn fail_open_keeps_decision_with_error() {
        let decision = FeatureDecision {
            variation: Some(variation("v1")),
            ..Default::default()
        };
        let result = fail_open(
            Err(DecisionError::with_decision(
                Error::Decision("diagnostic".to_owned()),
                decision.clone(),
            )),
            "feature",
            &UserContext::new("u"),
        );
        assert_eq!(result.unwrap(), decision);
    }

    #[test]
    fn fail_open_keeps_unassigned_decision_with_error() {
        let result = fail_open(
            Err(DecisionError::with_decision(
                Error::Decision("diagnostic".to_owned()),
                FeatureDecision::default(),
            )),
            "feature",
            &UserContext::new("u"),
        );
        assert_eq!(result.unwrap().variation, None);
    }

    #[test]
    fn fail_open_surfaces_error_without_decision() {
        let result = fail_open::<FeatureDecision>(
            Err(DecisionError::fatal(Error::Decision("boom".to_owned()))),
            "feature",
            &UserContext::new("u"),
        );
        assert!(matches!(result, Err(Error::Decision(message)) if message == "boom"));
    }

    #[test]
    fn membership_requires_same_variation() {
        let experiment = Experiment {
            key: "exp".to_owned(),
            variations: [("v1".to_owned(), variation("v1"))].into(),
            ..Default::default()
        };
        assert!(check_membership(&experiment, &variation("v1")).is_ok());
        assert!(check_membership(&experiment, &variation("v2")).is_err());
    }

    #[test]
    fn panic_message_reads_str_and_string_payloads() {
        let payload = std::panic::catch_unwind(|| panic!("I'm panicking")).unwrap_err();
        assert_eq!(panic_message(payload.as_ref()), "I'm panicking");

        let payload = std::panic::catch_unwind(|| panic!("{} {}", "formatted", 1)).unwrap_err();
        assert_eq!(panic_message(payload.as_ref()), "formatted 1");

        let payload = std::panic::catch_unwind(|| std::panic::panic_any(5_u8)).unwrap_err();
        assert_eq!(panic_message(payload.as_ref()), "unknown panic");
    }
}
