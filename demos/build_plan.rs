use clap::Parser;
use cogpack::error::{Result, StackableErr};
use cogpack::executor::CancelToken;
use cogpack::{config, executor};

/// Runs a `Plan` JSON file against a `BuildConfig` TOML file using the
/// bollard-backed solver.
#[derive(Parser, Debug)]
#[command(about)]
struct Args {
    /// Path to a `Plan` JSON file
    #[arg(long)]
    plan: std::path::PathBuf,
    /// Path to a `BuildConfig` TOML file
    #[arg(long)]
    build_config: std::path::PathBuf,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let args = Args::parse();

    let plan = config::load_plan(&args.plan).await?;
    let build_config = config::load_build_config(&args.build_config).await?;
    let solver = cogpack::BollardSolver::connect_with_defaults()?;
    let cancel = CancelToken::new();
    let _ctrl_c_guard = cancel.spawn_on_ctrl_c();

    let output = executor::build(&plan, &build_config, &solver, &cancel).await?;
    println!("built {}", output.image_ref);
    println!(
        "{}",
        serde_json::to_string_pretty(&output.image_config).stack()?
    );
    Ok(())
}
