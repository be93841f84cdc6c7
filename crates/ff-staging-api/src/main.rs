use anyhow::Result;

#[tokio::main]
async fn main() -> Result<()> {
    let config = ff_staging_api::load_config()?;
    ff_staging_api::run(config).await
}
