//! User events (impressions and conversions) and the event processor they are handed to.
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{
    entities::{AttributeValue, Attributes, Event, Experiment, UserContext, Variation},
    ProjectConfig,
};

/// Reserved attribute key sent when bot filtering is enabled for the project.
pub const BOT_FILTERING_ATTRIBUTE: &str = "$opt_bot_filtering";

const CUSTOM_ATTRIBUTE_TYPE: &str = "custom";
const REVENUE_TAG: &str = "revenue";
const VALUE_TAG: &str = "value";

/// Project identity stamped on every event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventContext {
    /// Project id.
    pub project_id: String,
    /// Account id.
    pub account_id: String,
    /// Revision of the snapshot the event was built from.
    pub revision: String,
    /// Whether the visitor IP should be anonymized.
    #[serde(rename = "anonymizeIP")]
    pub anonymize_ip: bool,
    /// Whether bot filtering is enabled.
    pub bot_filtering: bool,
    /// Client name.
    pub client_name: String,
    /// Client version.
    pub client_version: String,
}

impl EventContext {
    fn from_config(config: &dyn ProjectConfig) -> Self {
        EventContext {
            project_id: config.project_id().to_owned(),
            account_id: config.account_id().to_owned(),
            revision: config.revision().to_owned(),
            anonymize_ip: config.anonymize_ip(),
            bot_filtering: config.bot_filtering(),
            client_name: config.client_name().to_owned(),
            client_version: config.client_version().to_owned(),
        }
    }
}

/// A user attribute as attached to an event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VisitorAttribute {
    /// Attribute id, or the reserved key for built-in attributes.
    pub entity_id: String,
    /// Attribute key.
    pub key: String,
    /// Always `"custom"`.
    #[serde(rename = "type")]
    pub attribute_type: String,
    /// Attribute value.
    pub value: AttributeValue,
}

/// A user was exposed to a variation of an experiment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImpressionEvent {
    /// Layer (campaign) id of the experiment.
    pub entity_id: String,
    /// Experiment id.
    pub experiment_id: String,
    /// Experiment key.
    pub experiment_key: String,
    /// Variation id.
    pub variation_id: String,
    /// Variation key.
    pub variation_key: String,
    /// User attributes known to the project.
    pub attributes: Vec<VisitorAttribute>,
}

/// A user performed a tracked action.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConversionEvent {
    /// Event id.
    pub entity_id: String,
    /// Event key.
    pub key: String,
    /// User attributes known to the project.
    pub attributes: Vec<VisitorAttribute>,
    /// Caller-supplied tags, verbatim.
    pub tags: Attributes,
    /// Integral `revenue` tag, if present.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub revenue: Option<i64>,
    /// Numeric `value` tag, if present.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value: Option<f64>,
}

/// Payload of a [`UserEvent`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", tag = "type")]
pub enum UserEventKind {
    /// An impression.
    Impression(ImpressionEvent),
    /// A conversion.
    Conversion(ConversionEvent),
}

/// An event handed to the [`EventProcessor`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserEvent {
    /// Unique id of the event.
    pub uuid: Uuid,
    /// When the event was created.
    pub timestamp: DateTime<Utc>,
    /// Id of the user the event is about.
    pub visitor_id: String,
    /// Project identity.
    pub event_context: EventContext,
    /// Impression or conversion payload.
    #[serde(flatten)]
    pub kind: UserEventKind,
}

impl UserEvent {
    fn new(config: &dyn ProjectConfig, user: &UserContext, kind: UserEventKind) -> Self {
        UserEvent {
            uuid: Uuid::new_v4(),
            timestamp: Utc::now(),
            visitor_id: user.id.clone(),
            event_context: EventContext::from_config(config),
            kind,
        }
    }

    /// Build an impression for `user` being assigned `variation` of `experiment`.
    pub fn impression(
        config: &dyn ProjectConfig,
        experiment: &Experiment,
        variation: &Variation,
        user: &UserContext,
    ) -> Self {
        let impression = ImpressionEvent {
            entity_id: experiment.layer_id.clone(),
            experiment_id: experiment.id.clone(),
            experiment_key: experiment.key.clone(),
            variation_id: variation.id.clone(),
            variation_key: variation.key.clone(),
            attributes: visitor_attributes(config, &user.attributes),
        };
        UserEvent::new(config, user, UserEventKind::Impression(impression))
    }

    /// Build a conversion for `user` performing `event`.
    pub fn conversion(
        config: &dyn ProjectConfig,
        event: &Event,
        user: &UserContext,
        tags: &Attributes,
    ) -> Self {
        let conversion = ConversionEvent {
            entity_id: event.id.clone(),
            key: event.key.clone(),
            attributes: visitor_attributes(config, &user.attributes),
            tags: tags.clone(),
            revenue: revenue_tag(tags),
            value: match tags.get(VALUE_TAG) {
                Some(AttributeValue::Number(value)) => Some(*value),
                _ => None,
            },
        };
        UserEvent::new(config, user, UserEventKind::Conversion(conversion))
    }

    /// The impression payload, if this is an impression.
    pub fn as_impression(&self) -> Option<&ImpressionEvent> {
        match &self.kind {
            UserEventKind::Impression(impression) => Some(impression),
            UserEventKind::Conversion(_) => None,
        }
    }

    /// The conversion payload, if this is a conversion.
    pub fn as_conversion(&self) -> Option<&ConversionEvent> {
        match &self.kind {
            UserEventKind::Conversion(conversion) => Some(conversion),
            UserEventKind::Impression(_) => None,
        }
    }
}

fn revenue_tag(tags: &Attributes) -> Option<i64> {
    match tags.get(REVENUE_TAG) {
        // `i64::MAX as f64` is 2^63, which is itself out of range.
        Some(AttributeValue::Number(n))
            if n.fract() == 0.0 && (i64::MIN as f64..i64::MAX as f64).contains(n) =>
        {
            Some(*n as i64)
        }
        Some(other) => {
            log::debug!(target: "expkit", "ignoring revenue tag that is not a 64-bit integer: {:?}", other);
            None
        }
        None => None,
    }
}

/// Attributes known to the project, plus the bot filtering marker.
fn visitor_attributes(config: &dyn ProjectConfig, attributes: &Attributes) -> Vec<VisitorAttribute> {
    // Sorted for a stable payload.
    let mut known: Vec<_> = attributes
        .iter()
        .filter_map(|(key, value)| {
            let Some(entity_id) = config.get_attribute_id(key) else {
                log::debug!(target: "expkit", attribute_key = key.as_str(); "dropping attribute unknown to the project");
                return None;
            };
            Some(VisitorAttribute {
                entity_id: entity_id.to_owned(),
                key: key.clone(),
                attribute_type: CUSTOM_ATTRIBUTE_TYPE.to_owned(),
                value: value.clone(),
            })
        })
        .collect();
    known.sort_by(|a, b| a.key.cmp(&b.key));

    if config.bot_filtering() {
        known.push(VisitorAttribute {
            entity_id: BOT_FILTERING_ATTRIBUTE.to_owned(),
            key: BOT_FILTERING_ATTRIBUTE.to_owned(),
            attribute_type: CUSTOM_ATTRIBUTE_TYPE.to_owned(),
            value: AttributeValue::Boolean(true),
        });
    }
    known
}

/// Receives user events for asynchronous delivery.
///
/// `process_event` must not block on delivery. Batching, retries and transport are up to the
/// implementation.
pub trait EventProcessor: Send + Sync {
    /// Accept an event. Fire-and-forget.
    fn process_event(&self, event: UserEvent);
}

pub(crate) struct NoopEventProcessor;
impl EventProcessor for NoopEventProcessor {
    fn process_event(&self, _event: UserEvent) {}
}

impl<T: Fn(UserEvent) + Send + Sync> EventProcessor for T {
    fn process_event(&self, event: UserEvent) {
        self(event);
    }
}

/// Events collected during a client call, handed to the processor once the call succeeds.
pub(crate) type PendingEvents = Vec<UserEvent>;
