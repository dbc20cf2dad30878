use clap::Parser;

#[derive(Debug, Parser)]
#[command(author, version, about)]
pub struct Args {
    #[arg(long, env = "SERVER_HOST", default_value = "0.0.0.0")]
    pub host: String,

    #[arg(long, env = "SERVER_PORT", default_value_t = 8002)]
    pub port: u16,

    #[arg(
        long,
        env = "MONGO_URL",
        default_value = "mongodb://localhost:27017/?directConnection=true"
    )]
    pub mongo_url: String,

    #[arg(long, env = "DATABASE_NAME", default_value = "deploy_db")]
    pub db_name: String,

    #[arg(long, env = "DEFAULT_NAMESPACE", default_value = "default")]
    pub default_namespace: String,

    #[arg(long, env = "LOG_TAIL_LINES", default_value_t = 100)]
    pub log_tail_lines: i64,

    /// Per-call cluster timeout for apply, in seconds.
    #[arg(long, env = "DEPLOYMENT_TIMEOUT", default_value_t = 600)]
    pub deployment_timeout_secs: u64,

    #[arg(long, env = "JOB_MAX_FAILURES", default_value_t = 3)]
    pub job_max_failures: u32,

    #[arg(long, env = "RECONCILE_INTERVAL", default_value_t = 30)]
    pub reconcile_interval_secs: u64,

    #[arg(long, env = "OTLP_ENDPOINT")]
    pub otlp_endpoint: Option<String>,

    #[arg(long, env = "OTLP_TOKEN")]
    pub otlp_token: Option<String>,
}
