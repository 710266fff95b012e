use actix_web::{get, web, HttpRequest, HttpResponse, Responder};
use log::{debug, warn};

use crate::{error::ApiError, rate_limiters::KeyedRateLimiter};

pub const REMAINING_HEADER: &str = "x-ratelimit-remaining";

#[get("/limited")]
pub async fn limited(
    limiter: web::Data<KeyedRateLimiter>,
    req: HttpRequest,
) -> Result<HttpResponse, ApiError> {
    let ip = req
        .connection_info()
        .peer_addr()
        .map(str::to_owned)
        .ok_or_else(|| {
            warn!("Failed to get IP address");
            ApiError::MissingClientAddress
        })?;

    let admitted = limiter.try_acquire(&ip).map_err(|denied| {
        debug!("Rate limit exceeded for {ip}");
        ApiError::RateLimited {
            retry_after_secs: denied.retry_after_secs(),
        }
    })?;

    Ok(HttpResponse::Ok()
        .insert_header((REMAINING_HEADER, admitted.remaining().to_string()))
        .body("Limited, but ok for now, don't over use me!"))
}

#[get("/unlimited")]
pub async fn unlimited() -> impl Responder {
    HttpResponse::Ok().body("Unlimited! Let's Go!")
}
