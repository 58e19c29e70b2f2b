use clap::Parser;

#[derive(Parser, Debug, Clone)]
pub struct EtcdArgs {
    /// Comma-separated list of etcd gRPC endpoints
    #[arg(
        long,
        env = "ETCD_ENDPOINTS",
        default_value = "http://127.0.0.1:2379",
        value_delimiter = ','
    )]
    pub etcd_endpoints: Vec<String>,

    #[arg(long, env = "ETCD_USERNAME")]
    pub etcd_username: Option<String>,

    #[arg(long, env = "ETCD_PASSWORD")]
    pub etcd_password: Option<String>,

    /// PEM-encoded CA certificate used to verify the etcd endpoints over TLS
    #[arg(long, env = "ETCD_CA_CERT")]
    pub etcd_ca_cert: Option<String>,
}

impl EtcdArgs {
    pub fn endpoints(&self) -> &[String] {
        &self.etcd_endpoints
    }
}

#[derive(Debug, Clone, Copy, clap::ValueEnum)]
pub enum StrictHostKeyChecking {
    /// Accept the host key on first contact, reject if it later changes.
    AcceptNew,
    /// Never verify the host key (not recommended outside local testing).
    Off,
}

#[derive(Parser, Debug, Clone)]
pub struct SshArgs {
    #[arg(long, env = "SSH_CONNECT_TIMEOUT_SECS", default_value_t = 15)]
    pub ssh_connect_timeout_secs: u64,

    #[arg(long, env = "SSH_PORT", default_value_t = 22)]
    pub ssh_port: u16,

    #[arg(long, env = "SSH_USER", default_value = "root")]
    pub ssh_user: String,

    #[arg(
        long,
        env = "SSH_STRICT_HOST_KEY_CHECKING",
        value_enum,
        default_value_t = StrictHostKeyChecking::AcceptNew
    )]
    pub ssh_strict_host_key_checking: StrictHostKeyChecking,

    /// Identity file used to reach already-bootstrapped hosts for rolling
    /// restart/upgrade. The per-host provisioning key supplied at host
    /// creation is never persisted (see `Host::ssh_priv_key`), so cluster-exec
    /// authenticates with this separately managed, cluster-wide key instead.
    #[arg(
        long,
        env = "SSH_FLEET_KEY_PATH",
        default_value = "/etc/commissaire/fleet_key"
    )]
    pub ssh_fleet_key_path: std::path::PathBuf,
}

#[derive(Parser, Debug, Clone)]
pub struct PoolArgs {
    /// Capacity of the investigate queue before host-creation requests backpressure.
    #[arg(long, env = "INVESTIGATE_QUEUE_CAPACITY", default_value_t = 128)]
    pub investigate_queue_capacity: usize,

    /// Maximum number of concurrently running cluster-exec tasks.
    #[arg(long, env = "CLUSTER_EXEC_POOL_SIZE", default_value_t = 4)]
    pub cluster_exec_pool_size: usize,
}
