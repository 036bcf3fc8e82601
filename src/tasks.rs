use std::sync::Arc;
use std::time::Duration;

use rocket::fairing::{Fairing, Info, Kind};
use rocket::tokio::{self, time};
use rocket::{Orbit, Rocket};

use crate::config::Config;
use crate::db::SharedDb;
use crate::models::session::Session;
use crate::rate_limit::RateLimiter;

/// Periodic housekeeping started once the server is up: expired sessions are
/// deleted and stale rate-limit buckets dropped.
pub struct BackgroundTasks;

#[rocket::async_trait]
impl Fairing for BackgroundTasks {
    fn info(&self) -> Info {
        Info {
            name: "Session sweeper",
            kind: Kind::Liftoff,
        }
    }

    async fn on_liftoff(&self, rocket: &Rocket<Orbit>) {
        let (Some(db), Some(config), Some(limiter)) = (
            rocket.state::<SharedDb>(),
            rocket.state::<Config>(),
            rocket.state::<Arc<RateLimiter>>(),
        ) else {
            log::error!("[task] Managed state missing, session sweeper not started");
            return;
        };

        let minutes = config.session_cleanup_minutes.max(1);
        let (db, limiter) = (Arc::clone(db), Arc::clone(limiter));
        tokio::spawn(async move {
            let mut ticker = time::interval(Duration::from_secs(minutes * 60));
            // The first tick completes immediately; skip it so start-up stays quiet.
            ticker.tick().await;
            loop {
                ticker.tick().await;
                sweep(&db).await;
                limiter.cleanup();
                log::debug!("[task] {} rate-limit keys tracked", limiter.tracked_keys());
            }
        });

        log::info!("[task] Session sweeper running every {} min", minutes);
    }
}

async fn sweep(db: &SharedDb) {
    let db = Arc::clone(db);
    match tokio::task::spawn_blocking(move || Session::cleanup_expired(&*db)).await {
        Ok(Ok(0)) => {}
        Ok(Ok(n)) => log::info!("[task] Removed {} expired sessions", n),
        Ok(Err(e)) => log::error!("[task] Session sweep failed: {}", e),
        Err(e) => log::error!("[task] Session sweep task panicked: {}", e),
    }
}
