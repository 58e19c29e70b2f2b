use clap::Parser;
use commissaire_common::args::{EtcdArgs, PoolArgs, SshArgs};

#[derive(Parser, Debug, Clone)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Port the management API listens on.
    #[arg(long, env = "HTTP_PORT", default_value_t = 8000)]
    pub http_port: u16,

    /// Base URL of the container-manager API used for the node-registered probe.
    #[arg(
        long,
        env = "CONTAINER_MANAGER_URL",
        default_value = "http://127.0.0.1:8080"
    )]
    pub container_manager_url: String,

    #[command(flatten)]
    pub etcd: EtcdArgs,

    #[command(flatten)]
    pub ssh: SshArgs,

    #[command(flatten)]
    pub pool: PoolArgs,
}
