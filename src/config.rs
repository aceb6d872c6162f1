/// Configuration for the secret-service client.
///
/// All tunables live here and are consumed at construction. There is no
/// ambient/global configuration state.
use std::time::Duration;

/// Connection settings for the external secret service.
#[derive(Debug, Clone)]
pub struct VaultConfig {
    /// Service URL (e.g., "http://127.0.0.1:8200").
    pub address: String,
    /// Access token sent as `X-Vault-Token` on every request.
    pub token: String,
    /// Transit secrets engine mount path.
    pub transit_mount: String,
    /// KV v2 secrets engine mount path.
    pub kv_mount: String,
    /// Default lease TTL applied when provisioning the transit mount.
    pub default_lease_ttl: String,
    /// Maximum lease TTL applied when provisioning the transit mount.
    pub max_lease_ttl: String,
    /// Timeout for crypto and secret-storage requests.
    pub request_timeout: Duration,
    /// Shorter timeout for health probes.
    pub health_timeout: Duration,
}

impl VaultConfig {
    pub fn new(address: impl Into<String>, token: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            token: token.into(),
            transit_mount: "transit".to_string(),
            kv_mount: "secret".to_string(),
            default_lease_ttl: "87600h".to_string(),
            max_lease_ttl: "87600h".to_string(),
            request_timeout: Duration::from_secs(10),
            health_timeout: Duration::from_secs(2),
        }
    }

    pub fn with_transit_mount(mut self, mount: impl Into<String>) -> Self {
        self.transit_mount = mount.into();
        self
    }

    pub fn with_kv_mount(mut self, mount: impl Into<String>) -> Self {
        self.kv_mount = mount.into();
        self
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    pub fn with_health_timeout(mut self, timeout: Duration) -> Self {
        self.health_timeout = timeout;
        self
    }
}
