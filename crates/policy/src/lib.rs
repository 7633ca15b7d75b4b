//! Tag policy: the YAML model, its loader/validator, and the pure tag evaluator.

mod evaluate;
mod loader;
mod model;

pub use evaluate::{evaluate, NO_RULES, NO_TAGS};
pub use loader::PolicyError;
pub use model::{
    ComplianceLevel, EmailNotifications, ExcludedResource, GlobalSettings, NotificationConfig, Pattern, Policy,
    ResourceSettings, SlackNotifications, TagCriteria, TagValidation, DEFAULT_BATCH_SIZE,
};
