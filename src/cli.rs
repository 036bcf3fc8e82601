use std::io::{self, BufRead, Write};

use clap::{Args, Parser, Subcommand};

use crate::config::Config;
use crate::db::Database;
use crate::migrations::{self, package_range, runner, RunOptions};
use crate::security::credentials;

#[derive(Parser, Debug)]
#[command(name = "crearis")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Start the HTTP server (default)
    Serve,

    /// Apply pending migrations, or show their status
    Migrate(MigrateArgs),

    /// Undo applied migrations
    Rollback(RollbackArgs),

    /// Replace a user's password with a generated one
    ResetPassword(ResetPasswordArgs),

    /// Create a user account
    CreateUser(CreateUserArgs),
}

#[derive(Args, Debug)]
pub struct MigrateArgs {
    /// Only print applied and pending migrations
    #[arg(long)]
    pub status: bool,

    /// First package to run (A-E)
    #[arg(long, env = "DB_MIGRATION_STARTWITH")]
    pub from: Option<String>,

    /// Last package to run (A-E)
    #[arg(long, env = "DB_MIGRATION_ENDWITH")]
    pub to: Option<String>,

    /// Include manual-only migrations such as demo data
    #[arg(long)]
    pub manual: bool,
}

#[derive(Args, Debug)]
pub struct RollbackArgs {
    /// Number of applied migrations to undo
    #[arg(long, conflicts_with = "to")]
    pub count: Option<usize>,

    /// Undo everything applied after this migration (id or number)
    #[arg(long)]
    pub to: Option<String>,

    /// Perform the rollback instead of printing the plan
    #[arg(long)]
    pub force: bool,
}

#[derive(Args, Debug)]
pub struct ResetPasswordArgs {
    /// Account sysmail address
    pub sysmail: String,

    /// Skip the confirmation prompt
    #[arg(long)]
    pub yes: bool,
}

#[derive(Args, Debug)]
pub struct CreateUserArgs {
    #[arg(long)]
    pub sysmail: String,

    #[arg(long)]
    pub username: String,

    #[arg(long, default_value = "user")]
    pub role: String,

    /// Read the password from this environment variable instead of generating one
    #[arg(long, value_name = "VAR")]
    pub password_env: Option<String>,
}

// ── Commands ────────────────────────────────────────────

pub fn migrate(db: &dyn Database, config: &Config, args: &MigrateArgs) -> Result<(), String> {
    let registry = migrations::registry();

    if args.status {
        let status = migrations::status(db, &registry).map_err(|e| e.to_string())?;
        println!(
            "{} of {} migrations applied ({} backend)",
            status.completed,
            status.total,
            db.kind().as_str()
        );
        if let Some(last) = &status.last_applied {
            println!("Last applied: {}", last);
        }
        let describe = |id: &str| {
            registry
                .iter()
                .find(|m| m.id == id)
                .map_or_else(|| id.to_string(), |m| m.summary())
        };
        for id in &status.failed {
            println!("  FAILED   {}", describe(id));
        }
        for id in &status.pending {
            println!("  pending  {}", describe(id));
        }
        return Ok(());
    }

    let options = RunOptions {
        range: package_range(args.from.as_deref(), args.to.as_deref()).map_err(|e| e.to_string())?,
        run_manual: args.manual || config.migrations.run_manual,
    };
    let report = migrations::run_pending(db, &registry, &options).map_err(|e| e.to_string())?;
    println!(
        "Applied {} migration(s), {} already applied, {} manual skipped",
        report.ran.len(),
        report.already_applied,
        report.skipped_manual.len()
    );
    for id in &report.ran {
        println!("  applied  {}", id);
    }
    for id in &report.skipped_manual {
        println!("  manual   {} (use --manual)", id);
    }
    Ok(())
}

pub fn rollback(db: &dyn Database, args: &RollbackArgs) -> Result<(), String> {
    let registry = migrations::registry();
    let plan = match &args.to {
        Some(target) => runner::plan_rollback_to(db, target).map_err(|e| e.to_string())?,
        None => runner::plan_rollback(db, args.count.unwrap_or(1)).map_err(|e| e.to_string())?,
    };

    if plan.is_empty() {
        println!("Nothing to roll back");
        return Ok(());
    }

    if !args.force {
        println!("Would roll back (newest first):");
        for id in &plan {
            let reversible = registry
                .iter()
                .find(|m| m.id == id.as_str())
                .is_some_and(|m| m.is_reversible());
            println!("  {}{}", id, if reversible { "" } else { "  (irreversible, skipped)" });
        }
        println!("Re-run with --force to apply");
        return Ok(());
    }

    let report = match &args.to {
        Some(target) => migrations::rollback_to(db, &registry, target),
        None => migrations::rollback(db, &registry, args.count.unwrap_or(1)),
    }
    .map_err(|e| e.to_string())?;

    for id in &report.rolled_back {
        println!("  rolled back  {}", id);
    }
    for id in &report.skipped {
        println!("  skipped      {}", id);
    }
    Ok(())
}

pub fn reset_password(db: &dyn Database, config: &Config, args: &ResetPasswordArgs) -> Result<(), String> {
    if !args.yes && !confirm(&format!("Reset the password of {}?", args.sysmail))? {
        println!("Aborted");
        return Ok(());
    }
    let password =
        credentials::reset_password(db, &args.sysmail, config.bcrypt_cost).map_err(|e| e.to_string())?;
    println!("New password for {}: {}", args.sysmail, password);
    println!("All sessions of this user have been ended.");
    Ok(())
}

pub fn create_user(db: &dyn Database, config: &Config, args: &CreateUserArgs) -> Result<(), String> {
    let password = match &args.password_env {
        Some(var) => Some(std::env::var(var).map_err(|_| format!("environment variable {} is not set", var))?),
        None => None,
    };
    let (id, generated) = credentials::create_user(
        db,
        &args.sysmail,
        &args.username,
        &args.role,
        password.as_deref(),
        config.bcrypt_cost,
    )
    .map_err(|e| e.to_string())?;

    println!("Created user {} ({}, role {})", id, args.username, args.role);
    if let Some(pw) = generated {
        println!("Generated password: {}", pw);
    }
    Ok(())
}

fn confirm(question: &str) -> Result<bool, String> {
    print!("{} [y/N] ", question);
    io::stdout().flush().map_err(|e| e.to_string())?;
    let mut answer = String::new();
    io::stdin()
        .lock()
        .read_line(&mut answer)
        .map_err(|e| e.to_string())?;
    Ok(matches!(answer.trim().to_ascii_lowercase().as_str(), "y" | "yes"))
}
