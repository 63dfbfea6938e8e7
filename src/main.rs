use metacrawl::cli::Cli;
use metacrawl::orchestration::{self, RunOutcome};
use metacrawl::{logging, worker};

#[tokio::main]
async fn main() {
    // clap handles usage errors itself with exit code 2.
    let cli = Cli::parse_args();

    let (cfg, worker_role) = match cli.into_config() {
        Ok(parsed) => parsed,
        Err(e) => {
            eprintln!("metacrawl: {}", e);
            std::process::exit(1);
        }
    };

    if let Err(e) = logging::init(&cfg.out_dir) {
        eprintln!("metacrawl: logging setup failed: {}", e);
        std::process::exit(1);
    }

    match worker_role {
        Some((index, total)) => {
            if let Err(e) = worker::run_worker(cfg, index, total).await {
                tracing::error!(error = %e, "worker failed");
                std::process::exit(1);
            }
        }
        None => match orchestration::run(cfg).await {
            Ok(RunOutcome::Completed) | Ok(RunOutcome::Stopped) => {}
            Err(e) => {
                eprintln!("metacrawl: {}", e);
                std::process::exit(1);
            }
        },
    }
}
