mod cli;
mod demo;
mod infra;
mod poller;
mod routes;
mod server;

use onboarding_engine::error::AppError;

pub async fn run() -> Result<(), AppError> {
    cli::run().await
}
