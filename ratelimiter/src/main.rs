use std::env;

use actix_web::{web, App, HttpServer};
use anyhow::Context;
use log::info;
use ratelimiter::{config::LimiterConfig, limited, rate_limiters::KeyedRateLimiter, unlimited};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    env_logger::init();

    let config =
        LimiterConfig::from_env().context("Failed to read the rate limiter configuration")?;
    let host = env::var("HOST").unwrap_or_else(|_| "127.0.0.1".to_owned());
    let port: u16 = match env::var("PORT") {
        Ok(port) => port.parse().context("PORT must be a valid port number")?,
        Err(_) => 8080,
    };

    info!(
        "Allowing {} requests every {}s per client on {host}:{port}",
        config.quota(),
        config.interval_secs()
    );

    // shared by every worker, so a client is limited once per process
    let limiter = web::Data::new(KeyedRateLimiter::new(config));
    HttpServer::new(move || {
        App::new()
            .app_data(limiter.clone())
            .service(limited)
            .service(unlimited)
    })
    .bind((host.as_str(), port))
    .context("Failed to bind to port")?
    .run()
    .await
    .context("Failed to run the server")
}
