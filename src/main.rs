use github_webhook::api::create_router;
use github_webhook::builder::ExternalBuilder;
use github_webhook::config::Config;
use github_webhook::error::{Result, WebhookError};
use github_webhook::github::GitHubClient;
use github_webhook::logging::{FileLogger, setup_logging};
use github_webhook::notification::Notification;
use github_webhook::orchestrator::Orchestrator;
use github_webhook::runner::{BuildRunner, DEFAULT_MAX_JOBS};
use github_webhook::AppState;
use std::sync::Arc;
use tracing::{error, info};

/// Builds the current head of `branch` once, on this task.
async fn run_once(runner: &BuildRunner, full_name: &str, branch: &str) -> Result<()> {
    let notification =
        Notification::from_remote(runner.orchestrator().remote(), full_name, branch).await?;
    runner.run(notification).await?;
    Ok(())
}

async fn shutdown_signal() {
    if tokio::signal::ctrl_c().await.is_err() {
        error!("Failed to listen for Ctrl-C; graceful shutdown disabled");
        std::future::pending::<()>().await;
    }
    info!("Shutdown requested");
}

async fn serve(bind_address: &str, config: Arc<Config>, runner: BuildRunner) -> Result<()> {
    if config.secret().is_none() {
        return Err(WebhookError::ConfigError(
            "GITHUB_SECRET not defined".to_string(),
        ));
    }

    let state = Arc::new(AppState {
        config,
        runner: runner.clone(),
    });
    let app = create_router(state);

    info!("Listening on {}", bind_address);
    let listener = tokio::net::TcpListener::bind(bind_address).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("Waiting for {} running build(s)", runner.in_flight());
    runner.wait_idle().await;
    Ok(())
}

#[tokio::main]
async fn main() {
    dotenv::dotenv().ok();

    let config = match Config::from_env() {
        Ok(cfg) => Arc::new(cfg),
        Err(e) => {
            eprintln!("Configuration error: {}", e);
            std::process::exit(1);
        }
    };

    let file_logger = config.log_dir.clone().map(FileLogger::new);
    let log_guard = match setup_logging(file_logger.as_ref()) {
        Ok(guard) => guard,
        Err(e) => {
            eprintln!("Logging error: {}", e);
            std::process::exit(1);
        }
    };

    let orchestrator = Orchestrator::new(
        Arc::clone(&config),
        Arc::new(GitHubClient::from_config(&config)),
        Arc::new(ExternalBuilder::from_config(&config)),
    );
    let runner = BuildRunner::new(orchestrator, DEFAULT_MAX_JOBS);

    let args: Vec<String> = std::env::args().skip(1).collect();
    let result = match args.as_slice() {
        [full_name, branch] => run_once(&runner, full_name, branch).await,
        [bind_address] => serve(bind_address, Arc::clone(&config), runner).await,
        [] => serve(&config.bind_address, Arc::clone(&config), runner).await,
        _ => Err(WebhookError::ConfigError(
            "invalid number of arguments; usage: github_webhook [listen-addr] | <owner/name> <branch>"
                .to_string(),
        )),
    };

    if let Err(e) = result {
        error!("error: {}", e);
        drop(log_guard);
        std::process::exit(1);
    }
}
