use anyhow::Result;

#[tokio::main]
async fn main() -> Result<()> {
    goldmine_cli::run_app().await
}
