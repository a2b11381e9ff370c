use anyhow::Result;

#[tokio::main]
async fn main() -> Result<()> {
    iflow_cli::run().await
}
