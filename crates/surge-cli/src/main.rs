mod cli;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    if surge_core::logging::init().is_err() {
        surge_core::logging::init_stderr();
    }
    cli::run_from_args().await
}
