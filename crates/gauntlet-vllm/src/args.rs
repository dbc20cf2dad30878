use clap::Parser;

#[derive(Debug, Parser)]
#[command(author, version, about)]
pub struct Args {
    #[arg(long, env = "SERVER_HOST", default_value = "0.0.0.0")]
    pub host: String,

    #[arg(long, env = "SERVER_PORT", default_value_t = 8005)]
    pub port: u16,

    #[arg(
        long,
        env = "MONGO_URL",
        default_value = "mongodb://localhost:27017/?directConnection=true"
    )]
    pub mongo_url: String,

    #[arg(long, env = "DATABASE_NAME", default_value = "benchmark_vllm")]
    pub db_name: String,

    #[arg(long, env = "VLLM_NAMESPACE", default_value = "vllm")]
    pub namespace: String,

    #[arg(long, env = "VLLM_IMAGE", default_value = "vllm/vllm-openai:latest")]
    pub image: String,

    #[arg(long, env = "VLLM_MAX_FAILURES", default_value_t = 2)]
    pub max_failures: u32,

    /// Bounded wait for an evicted deployment to leave the cluster, seconds.
    #[arg(long, env = "VLLM_TIMEOUT", default_value_t = 600)]
    pub evict_timeout_secs: u64,

    #[arg(long, env = "DEPLOYMENT_TIMEOUT", default_value_t = 600)]
    pub deployment_timeout_secs: u64,

    #[arg(long, env = "RECONCILE_INTERVAL", default_value_t = 30)]
    pub reconcile_interval_secs: u64,

    #[arg(long, env = "OTLP_ENDPOINT")]
    pub otlp_endpoint: Option<String>,

    #[arg(long, env = "OTLP_TOKEN")]
    pub otlp_token: Option<String>,
}
