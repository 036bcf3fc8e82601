#[macro_use]
extern crate rocket;

mod blurhash;
mod boot;
mod cli;
mod config;
mod db;
mod migrations;
mod models;
mod rate_limit;
mod routes;
mod security;
mod status;
mod tasks;
mod xmlid;

#[cfg(test)]
mod tests;

use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use rocket::data::{Limits, ToByteUnit};
use rocket::{Build, Rocket};

use cli::{Cli, Command};
use config::Config;
use db::SharedDb;
use migrations::RunOptions;
use rate_limit::RateLimiter;

/// Assemble the server around an open database. Shared by `serve` and the
/// HTTP tests.
pub fn build_rocket(config: Config, db: SharedDb) -> Rocket<Build> {
    let limiter = Arc::new(RateLimiter::new(
        config.login_max_attempts,
        Duration::from_secs(config.login_window_secs),
    ));

    // Multipart uploads carry images up to 20 MiB.
    let limits = Limits::default()
        .limit("file", 20.mebibytes())
        .limit("data-form", 21.mebibytes());
    let figment = rocket::Config::figment().merge(("limits", limits));

    rocket::custom(figment)
        .manage(db)
        .manage(limiter)
        .manage(config)
        .attach(tasks::BackgroundTasks)
        .mount("/api", routes::api_routes())
        .register("/", catchers![routes::default_catcher])
}

fn serve(config: Config, db: SharedDb) -> Result<(), String> {
    if config.migrations.auto_migrate {
        let options = RunOptions::from_config(&config.migrations).map_err(|e| e.to_string())?;
        migrations::run_pending(&*db, &migrations::registry(), &options).map_err(|e| e.to_string())?;
    } else {
        log::info!("[migrate] AUTO_MIGRATE is off, skipping migrations");
    }
    match models::user::User::count(&*db) {
        Ok(0) => log::warn!("No users yet; create an admin with `crearis create-user --role admin`"),
        Ok(n) => log::info!("{} user account(s)", n),
        Err(e) => log::warn!("Could not count users: {}", e),
    }

    rocket::execute(build_rocket(config, db).launch())
        .map(|_| ())
        .map_err(|e| e.to_string())
}

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let cli = Cli::parse();

    let config = match Config::from_env() {
        Ok(config) => config,
        Err(e) => {
            log::error!("Configuration error: {}", e);
            std::process::exit(1);
        }
    };

    let command = cli.command.unwrap_or(Command::Serve);

    // Boot check: verify/create directories before touching the database
    if matches!(command, Command::Serve) {
        if let Err(e) = boot::run(&config) {
            log::error!("{}", e);
            std::process::exit(1);
        }
    }

    let db = match db::open(&config.database, config.pool_size) {
        Ok(db) => db,
        Err(e) => {
            log::error!("Database connection failed: {}", e);
            std::process::exit(1);
        }
    };

    let result = match &command {
        Command::Serve => serve(config, db),
        Command::Migrate(args) => cli::migrate(&*db, &config, args),
        Command::Rollback(args) => cli::rollback(&*db, args),
        Command::ResetPassword(args) => cli::reset_password(&*db, &config, args),
        Command::CreateUser(args) => cli::create_user(&*db, &config, args),
    };

    if let Err(e) = result {
        log::error!("Command failed: {}", e);
        std::process::exit(1);
    }
}
