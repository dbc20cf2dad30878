use clap::Parser;

#[derive(Debug, Parser)]
#[command(author, version, about)]
pub struct Args {
    #[arg(long, env = "SERVER_HOST", default_value = "0.0.0.0")]
    pub host: String,

    #[arg(long, env = "SERVER_PORT", default_value_t = 8004)]
    pub port: u16,

    #[arg(
        long,
        env = "MONGO_URL",
        default_value = "mongodb://localhost:27017/?directConnection=true"
    )]
    pub mongo_url: String,

    #[arg(long, env = "DATABASE_NAME", default_value = "gauntlet_eval")]
    pub db_name: String,

    #[arg(
        long,
        env = "BENCHMARK_DEPLOY_URL",
        default_value = "http://localhost:8002"
    )]
    pub deployer_url: String,

    #[arg(long, env = "DEFAULT_NAMESPACE", default_value = "default")]
    pub default_namespace: String,

    #[arg(long, env = "EVALUATION_DELAY_MINUTES", default_value_t = 30)]
    pub evaluation_delay_minutes: u64,

    #[arg(long, env = "SWEEP_INTERVAL", default_value_t = 30)]
    pub sweep_interval_secs: u64,

    #[arg(long, env = "MAX_ATTEMPTS", default_value_t = 3)]
    pub max_attempts: u32,

    #[arg(long, env = "OTLP_ENDPOINT")]
    pub otlp_endpoint: Option<String>,

    #[arg(long, env = "OTLP_TOKEN")]
    pub otlp_token: Option<String>,
}
