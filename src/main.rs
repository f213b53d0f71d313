use std::path::PathBuf;
use std::process::ExitCode;

use sftp_deploy::{init_logging, DeployOptions, Deployer};
use tracing::error;

const USAGE: &str = "usage: sftp-deploy <options.json> <file>...";

#[tokio::main]
async fn main() -> ExitCode {
    init_logging();

    let mut args = std::env::args().skip(1);
    let Some(options_path) = args.next() else {
        eprintln!("{}", USAGE);
        return ExitCode::from(2);
    };
    let files: Vec<PathBuf> = args.map(PathBuf::from).collect();

    match run(PathBuf::from(options_path), files).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{}", e);
            ExitCode::FAILURE
        }
    }
}

async fn run(options_path: PathBuf, files: Vec<PathBuf>) -> Result<(), Box<dyn std::error::Error>> {
    let base = std::env::current_dir()?;
    let options = DeployOptions::load(&options_path).await?;
    let resolved = options.resolve(&base).await?;

    Deployer::connect_with(resolved, base).run(files).await?;
    Ok(())
}
