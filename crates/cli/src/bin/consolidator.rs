use anyhow::Result;

#[tokio::main]
async fn main() -> Result<()> {
    consolidator_cli::main_entry().await
}
