//! Shared type definitions
//!
//! Provider configuration, the universal error taxonomy and the canonical
//! models are kept here so that the engine, stores and any future service
//! agree on a single schema.

pub mod errors;
pub mod models;
pub mod provider;

pub use errors::UniversalErrorKind;
pub use models::{
    ActionResult, Country, IncomingSms, LifecycleStatus, NumberResult, PriceData, Service, StatusResult,
    WebhookSms,
};
pub use provider::{
    AuthType, CaseFold, CoerceType, ConditionalFields, EndpointTemplate, HmacAlgorithm,
    HttpMethod, MappingConfig, NormalizationMode, PricingSettings, ProviderConfig,
    ResponseShape, TransformRule, WebhookAuthConfig, WebhookMapping, WebhookStrategy,
};
