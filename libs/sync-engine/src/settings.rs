use broker_api::{ConnectionInfo, ConnectionProfile};

/// Per-connection context, created at connect time and dropped at disconnect.
///
/// Handed explicitly to the components that depend on what was connected
/// (schema-encoded produce, schema lookups) instead of living in a global.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionSettings {
    pub profile: ConnectionProfile,
    pub schema_registry_connected: bool,
}

impl ConnectionSettings {
    pub fn new(profile: ConnectionProfile, info: ConnectionInfo) -> Self {
        Self {
            profile,
            schema_registry_connected: info.schema_registry_connected,
        }
    }

    pub fn name(&self) -> &str {
        &self.profile.name
    }
}
