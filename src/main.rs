#[tokio::main]
async fn main() -> anyhow::Result<()> {
    memory_harvester::cli::run().await
}
