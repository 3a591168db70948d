use std::sync::Arc;

use crate::{
    event::NoopEventProcessor, Client, DecisionService, EventProcessor, ExecutionContext,
    ProjectConfigManager, ThreadGroup,
};

/// Configuration for [`Client`].
pub struct ClientConfig {
    pub(crate) config_manager: Arc<dyn ProjectConfigManager>,
    pub(crate) decision_service: Arc<dyn DecisionService>,
    pub(crate) event_processor: Arc<dyn EventProcessor>,
    pub(crate) execution_context: Arc<dyn ExecutionContext>,
}

impl ClientConfig {
    /// Create a configuration from the two required collaborators.
    ///
    /// Events are discarded until an event processor is set, and the client owns an empty
    /// [`ThreadGroup`].
    ///
    /// ```
    /// # use std::sync::Arc;
    /// # use expkit::{ClientConfig, ConfigurationStore, DecisionService};
    /// # fn test(decision_service: Arc<dyn DecisionService>) {
    /// let config = ClientConfig::new(Arc::new(ConfigurationStore::new()), decision_service);
    /// # }
    /// ```
    pub fn new(
        config_manager: Arc<dyn ProjectConfigManager>,
        decision_service: Arc<dyn DecisionService>,
    ) -> Self {
        ClientConfig {
            config_manager,
            decision_service,
            event_processor: Arc::new(NoopEventProcessor),
            execution_context: Arc::new(ThreadGroup::new()),
        }
    }

    /// Set the processor impression and conversion events are handed to.
    ///
    /// ```
    /// # use std::sync::Arc;
    /// # use expkit::{ClientConfig, ConfigurationStore, DecisionService, UserEvent};
    /// # fn test(decision_service: Arc<dyn DecisionService>) {
    /// let config = ClientConfig::new(Arc::new(ConfigurationStore::new()), decision_service)
    ///     .event_processor(Arc::new(|event: UserEvent| println!("{:?}", event)));
    /// # }
    /// ```
    pub fn event_processor(mut self, event_processor: Arc<dyn EventProcessor>) -> Self {
        self.event_processor = event_processor;
        self
    }

    /// Set the execution context whose background work [`Client::close`] drains.
    pub fn execution_context(mut self, execution_context: Arc<dyn ExecutionContext>) -> Self {
        self.execution_context = execution_context;
        self
    }

    /// Create a new [`Client`] using this configuration.
    pub fn to_client(self) -> Client {
        Client::new(self)
    }
}
