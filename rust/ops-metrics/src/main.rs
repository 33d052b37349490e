use ops_metrics::telemetry;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    telemetry::init_tracing();
    ops_metrics::run().await
}
