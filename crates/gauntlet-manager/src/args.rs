use clap::Parser;

#[derive(Debug, Parser)]
#[command(author, version, about)]
pub struct Args {
    #[arg(long, env = "SERVER_HOST", default_value = "0.0.0.0")]
    pub host: String,

    #[arg(long, env = "SERVER_PORT", default_value_t = 8001)]
    pub port: u16,

    #[arg(
        long,
        env = "MONGO_URL",
        default_value = "mongodb://localhost:27017/?directConnection=true"
    )]
    pub mongo_url: String,

    #[arg(long, env = "DATABASE_NAME", default_value = "gauntlet_manager")]
    pub db_name: String,

    /// Token for the external source API; public repositories work without one.
    #[arg(long, env = "SOURCE_TOKEN")]
    pub source_token: Option<String>,

    #[arg(long, env = "OTLP_ENDPOINT")]
    pub otlp_endpoint: Option<String>,

    #[arg(long, env = "OTLP_TOKEN")]
    pub otlp_token: Option<String>,
}
