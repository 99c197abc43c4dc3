use leaddesk_lib::config::Config;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = Config::from_env()?;
    leaddesk_lib::run(config).await
}
