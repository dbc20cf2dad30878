use clap::Parser;

#[derive(Debug, Parser)]
#[command(author, version, about)]
pub struct Args {
    #[arg(long, env = "SERVER_HOST", default_value = "0.0.0.0")]
    pub host: String,

    #[arg(long, env = "SERVER_PORT", default_value_t = 8003)]
    pub port: u16,

    #[arg(
        long,
        env = "MLFLOW_TRACKING_URI",
        default_value = "http://localhost:5000"
    )]
    pub mlflow_tracking_uri: String,

    #[arg(long, env = "SOURCE_TOKEN")]
    pub source_token: Option<String>,

    /// Owner of the source repository applications are mirrored into.
    #[arg(long, env = "SOURCE_OWNER")]
    pub source_owner: String,

    #[arg(long, env = "SOURCE_REPO")]
    pub source_repo: String,

    #[arg(long, env = "SOURCE_BRANCH", default_value = "main")]
    pub source_branch: String,

    #[arg(long, env = "TEMPLATE_PATH", default_value = "template/vllm.yaml")]
    pub template_path: String,

    #[arg(long, env = "APPLICATIONS_DIR", default_value = "applications")]
    pub applications_dir: String,

    #[arg(long, env = "POLLING_INTERVAL", default_value_t = 60)]
    pub polling_interval_secs: u64,

    #[arg(long, env = "OTLP_ENDPOINT")]
    pub otlp_endpoint: Option<String>,

    #[arg(long, env = "OTLP_TOKEN")]
    pub otlp_token: Option<String>,
}
