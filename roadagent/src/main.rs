#[tokio::main]
async fn main() -> anyhow::Result<()> {
    roadagent::run_cli().await
}
