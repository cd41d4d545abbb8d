pub mod automap;
pub mod config;
pub mod connection;
pub mod datapoint;
pub mod error;
pub mod events;
pub mod hierarchy;
pub mod namespace;
pub mod publisher;
pub mod topic;

pub use automap::{AutoMapConfig, AutoMapper, CustomRule};
pub use config::{
    ConfigError, ConfigProperties, ConfigValidationError, ConfigValue, DefaultSecretResolver,
    FromConfigValue, MissingKeyError, PropertyMeta, R2eConfig, RegisteredSection, SecretResolver,
    register_section, registered_sections, validate_keys, validate_section,
};
pub use connection::{
    Connection, ConnectionConfiguration, ConnectionDescriptor, ConnectionManager, ConnectionState,
    InputConfiguration, OutputConfiguration,
};
pub use datapoint::{DataPoint, Quality};
pub use error::AppError;
pub use events::{
    AutoMappingFailedEvent, DataReceivedEvent, HierarchyActivatedEvent, ResolvedPlacement,
    StatusChangedEvent, TopicAddedEvent, TopicConfigurationUpdatedEvent, TopicDataUpdatedEvent,
    TopicRemovedEvent,
};
pub use hierarchy::{
    HierarchicalPath, HierarchyConfigError, HierarchyConfiguration, HierarchyNode, HierarchyRegistry,
};
pub use namespace::{NSTreeNode, NamespaceNode, NamespaceRegistry};
pub use publisher::{ModelDocument, OutputPublisher, PendingPublish, build_model_document, uns_path_topic};
pub use topic::{TopicConfiguration, TopicConfigurationRepository};
