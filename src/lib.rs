//! Feature flag and experiment decision client.
//!
//! # Overview
//!
//! The crate revolves around a [`Client`] that answers questions about a user: which variation
//! of an experiment the user sees, whether a feature is enabled, and what values the feature's
//! variables take. The client composes three collaborators:
//!
//! - a [`ProjectConfigManager`] providing the current [`ProjectConfig`] snapshot (for example a
//!   [`ConfigurationStore`] holding a [`DatafileProjectConfig`]),
//! - a [`DecisionService`] bucketing users into variations,
//! - an [`EventProcessor`] receiving impression and conversion [`UserEvent`]s.
//!
//! # Error Handling
//!
//! Errors are represented by the [`Error`] enum.
//!
//! The client never panics: panics raised by collaborators are recovered and returned as
//! [`Error::PanicRecovered`]. In production, it is recommended to fall back to a default value on
//! error, as feature evaluation should not be critical enough to cause system crashes.
//!
//! # Logging
//!
//! The package uses the [`log`](https://docs.rs/log/latest/log/) crate for logging messages under
//! the `expkit` target. Consider integrating a `log`-compatible logger implementation for better
//! visibility into client operations.

#![warn(rustdoc::missing_crate_level_docs)]
#![warn(missing_docs)]

mod client;
mod config;
mod configuration_store;
mod datafile;
mod decision;
mod error;
mod event;
mod execution_context;
mod project_config;
mod variable;

pub mod entities;

pub use client::{Client, FeatureVariables};
pub use config::ClientConfig;
pub use configuration_store::{ConfigurationStore, ProjectConfigManager};
pub use datafile::DatafileProjectConfig;
pub use decision::{
    DecisionError, DecisionResult, DecisionService, DecisionSource, ExperimentDecision,
    ExperimentDecisionContext, FeatureDecision, FeatureDecisionContext,
};
pub use entities::{AttributeValue, Attributes, UserContext};
pub use error::{Error, Result};
pub use event::{
    ConversionEvent, EventContext, EventProcessor, ImpressionEvent, UserEvent, UserEventKind,
    VisitorAttribute, BOT_FILTERING_ATTRIBUTE,
};
pub use execution_context::{ExecutionContext, ShutdownSignal, ThreadGroup};
pub use project_config::ProjectConfig;
pub use variable::VariableValue;

/// Client name reported in event context.
pub const CLIENT_NAME: &str = "expkit";
/// Client version reported in event context.
pub const CLIENT_VERSION: &str = env!("CARGO_PKG_VERSION");
