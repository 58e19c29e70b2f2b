use async_trait::async_trait;

/// Abstracts the container-manager membership probe. The investigator polls
/// this during the final lifecycle step; it never needs to know whether the
/// backend is Kubernetes, something else, or a test double.
#[async_trait]
pub trait ContainerManager: Send + Sync {
    async fn node_registered(&self, address: &str) -> bool;
}

/// Polls a Kubernetes-style API server for a Node object matching `address`.
/// Any transport failure is treated as "not registered" — the investigator
/// retries rather than surfacing the error.
pub struct HttpContainerManager {
    client: reqwest::Client,
    base_url: String,
}

impl HttpContainerManager {
    pub fn new(base_url: String) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url,
        }
    }
}

#[async_trait]
impl ContainerManager for HttpContainerManager {
    async fn node_registered(&self, address: &str) -> bool {
        let url = format!("{}/api/v1/nodes/{}", self.base_url, address);
        match self.client.get(&url).send().await {
            Ok(resp) => resp.status().is_success(),
            Err(e) => {
                tracing::warn!(address, error = %e, "container manager probe failed");
                false
            }
        }
    }
}

#[cfg(test)]
pub mod stub {
    use std::sync::Mutex;

    use super::*;

    /// Fails the first `fail_attempts` polls for a given address, then
    /// reports registered — used to exercise the 3-attempt retry loop.
    pub struct FlakyContainerManager {
        pub fail_attempts: usize,
        counts: Mutex<std::collections::HashMap<String, usize>>,
    }

    impl FlakyContainerManager {
        pub fn new(fail_attempts: usize) -> Self {
            Self {
                fail_attempts,
                counts: Mutex::new(std::collections::HashMap::new()),
            }
        }
    }

    #[async_trait]
    impl ContainerManager for FlakyContainerManager {
        async fn node_registered(&self, address: &str) -> bool {
            let mut counts = self.counts.lock().unwrap();
            let count = counts.entry(address.to_string()).or_insert(0);
            *count += 1;
            *count > self.fail_attempts
        }
    }

    pub struct AlwaysRegistered;

    #[async_trait]
    impl ContainerManager for AlwaysRegistered {
        async fn node_registered(&self, _address: &str) -> bool {
            true
        }
    }

    pub struct NeverRegistered;

    #[async_trait]
    impl ContainerManager for NeverRegistered {
        async fn node_registered(&self, _address: &str) -> bool {
            false
        }
    }
}
