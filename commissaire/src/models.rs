use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::ModelError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HostStatus {
    Investigating,
    Bootstrapping,
    Active,
    Inactive,
    Failed,
    Disassociated,
}

impl HostStatus {
    pub fn is_available(self) -> bool {
        matches!(self, HostStatus::Active)
    }
}

/// A managed host. `ssh_priv_key` is accepted on deserialize (host-creation
/// requests carry it) but is never re-emitted: `#[serde(skip_serializing)]`
/// is what makes the "secure" projection the only one this type can produce
/// through `serde_json::to_*`, so persistence and API responses can't
/// accidentally leak it by sharing the ordinary `Serialize` impl.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Host {
    pub address: String,
    pub status: HostStatus,
    #[serde(default)]
    pub os: String,
    #[serde(default = "default_unmeasured")]
    pub cpus: i64,
    #[serde(default = "default_unmeasured")]
    pub memory: i64,
    #[serde(default = "default_unmeasured")]
    pub space: i64,
    #[serde(default)]
    pub last_check: Option<DateTime<Utc>>,
    #[serde(skip_serializing, default)]
    pub ssh_priv_key: Option<String>,
}

fn default_unmeasured() -> i64 {
    -1
}

impl Host {
    pub fn new_investigating(address: String) -> Self {
        Self {
            address,
            status: HostStatus::Investigating,
            os: String::new(),
            cpus: -1,
            memory: -1,
            space: -1,
            last_check: None,
            ssh_priv_key: None,
        }
    }

    pub fn from_secure_bytes(bytes: &[u8]) -> Result<Self, ModelError> {
        serde_json::from_slice(bytes).map_err(|e| ModelError::BadRecord(e.to_string()))
    }

    pub fn to_secure_bytes(&self) -> Vec<u8> {
        // ssh_priv_key is always omitted by Serialize; this is the secure
        // projection used for both persistence and HTTP responses.
        serde_json::to_vec(self).expect("Host serializes")
    }
}

/// Body of `PUT /host/{address}`.
#[derive(Debug, Clone, Deserialize)]
pub struct HostCreateRequest {
    pub ssh_priv_key: String,
    #[serde(default)]
    pub cluster: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct HostCounts {
    pub total: usize,
    pub available: usize,
    pub unavailable: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Cluster {
    #[serde(default = "default_cluster_status")]
    pub status: String,
    #[serde(default)]
    pub hostset: Vec<String>,
}

fn default_cluster_status() -> String {
    "ok".to_string()
}

impl Cluster {
    pub fn new() -> Self {
        Self {
            status: default_cluster_status(),
            hostset: Vec::new(),
        }
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, ModelError> {
        serde_json::from_slice(bytes).map_err(|e| ModelError::BadRecord(e.to_string()))
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        serde_json::to_vec(self).expect("Cluster serializes")
    }

    pub fn has_host(&self, address: &str) -> bool {
        self.hostset.iter().any(|a| a == address)
    }

    pub fn add_host(&mut self, address: &str) {
        if !self.has_host(address) {
            self.hostset.push(address.to_string());
        }
    }

    pub fn remove_host(&mut self, address: &str) {
        self.hostset.retain(|a| a != address);
    }

    /// Renders the API view of this cluster: stored fields plus the derived
    /// `hosts` counter triplet (never persisted, computed from the Host
    /// directory at read time).
    pub fn to_json_with_counts(&self, counts: HostCounts) -> serde_json::Value {
        serde_json::json!({
            "status": self.status,
            "hostset": self.hostset,
            "hosts": counts,
        })
    }
}

impl Default for Cluster {
    fn default() -> Self {
        Self::new()
    }
}

/// Body of `PUT /cluster/{name}/hosts`: an application-level compare-and-set
/// on the hostset, since etcd's per-key CAS isn't exercised by this core.
#[derive(Debug, Clone, Deserialize)]
pub struct ClusterHostsUpdate {
    pub old: Vec<String>,
    pub new: Vec<String>,
}

/// Body of `PUT /cluster/{name}/upgrade`.
#[derive(Debug, Clone, Deserialize)]
pub struct ClusterUpgradeRequest {
    pub upgrade_to: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProgressStatus {
    InProcess,
    Finished,
    Failed,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClusterRestart {
    pub status: ProgressStatus,
    #[serde(default)]
    pub restarted: Vec<String>,
    #[serde(default)]
    pub in_process: Vec<String>,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl ClusterRestart {
    pub fn new(started_at: DateTime<Utc>) -> Self {
        Self {
            status: ProgressStatus::InProcess,
            restarted: Vec::new(),
            in_process: Vec::new(),
            started_at,
            finished_at: None,
        }
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, ModelError> {
        serde_json::from_slice(bytes).map_err(|e| ModelError::BadRecord(e.to_string()))
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        serde_json::to_vec(self).expect("ClusterRestart serializes")
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClusterUpgrade {
    pub status: ProgressStatus,
    pub upgrade_to: String,
    #[serde(default)]
    pub upgraded: Vec<String>,
    #[serde(default)]
    pub in_process: Vec<String>,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl ClusterUpgrade {
    pub fn new(upgrade_to: String, started_at: DateTime<Utc>) -> Self {
        Self {
            status: ProgressStatus::InProcess,
            upgrade_to,
            upgraded: Vec::new(),
            in_process: Vec::new(),
            started_at,
            finished_at: None,
        }
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, ModelError> {
        serde_json::from_slice(bytes).map_err(|e| ModelError::BadRecord(e.to_string()))
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        serde_json::to_vec(self).expect("ClusterUpgrade serializes")
    }
}

/// Envelope for `GET /clusters`.
#[derive(Debug, Clone, Serialize)]
pub struct Clusters {
    pub clusters: Vec<String>,
}

/// Envelope for `GET /hosts`.
#[derive(Debug, Clone, Serialize)]
pub struct Hosts {
    pub hosts: Vec<Host>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn host_secure_projection_never_emits_the_key() {
        let mut host = Host::new_investigating("10.0.0.1".into());
        host.ssh_priv_key = Some("c2VjcmV0".into());
        let bytes = host.to_secure_bytes();
        let text = String::from_utf8(bytes).unwrap();
        assert!(!text.contains("ssh_priv_key"));
        assert!(!text.contains("c2VjcmV0"));
    }

    #[test]
    fn host_roundtrips_through_secure_bytes() {
        let host = Host::new_investigating("10.0.0.2".into());
        let bytes = host.to_secure_bytes();
        let back = Host::from_secure_bytes(&bytes).unwrap();
        assert_eq!(back.address, "10.0.0.2");
        assert_eq!(back.status, HostStatus::Investigating);
        assert_eq!(back.cpus, -1);
    }

    #[test]
    fn cluster_add_host_is_idempotent() {
        let mut cluster = Cluster::new();
        cluster.add_host("10.0.0.1");
        cluster.add_host("10.0.0.1");
        assert_eq!(cluster.hostset, vec!["10.0.0.1".to_string()]);
    }
}
