use log::{error, info, warn};
use std::fs;
use std::path::{Path, PathBuf};

use crate::config::{Config, DatabaseConfig};

#[derive(Debug, Default, PartialEq, Eq)]
pub struct BootReport {
    pub warnings: u32,
    pub errors: u32,
}

/// Directories the configured instance writes to.
fn required_dirs(config: &Config) -> Vec<PathBuf> {
    let mut dirs = vec![config.uploads_dir.clone()];
    if let DatabaseConfig::Sqlite { path } = &config.database {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            dirs.push(parent.to_path_buf());
        }
    }
    dirs
}

fn writable(dir: &Path) -> Result<(), std::io::Error> {
    let test_file = dir.join(".write_test");
    fs::write(&test_file, "test")?;
    let _ = fs::remove_file(&test_file);
    Ok(())
}

/// Run boot checks before Rocket launches: create missing directories and
/// verify they are writable. An `Err` means the server must not start.
pub fn run(config: &Config) -> Result<BootReport, String> {
    info!("Crearis boot check starting...");
    let mut report = BootReport::default();

    // ── 1. Directories ─────────────────────────────────
    for dir in required_dirs(config) {
        if !dir.exists() {
            match fs::create_dir_all(&dir) {
                Ok(_) => info!("  Created directory: {}", dir.display()),
                Err(e) => {
                    error!("  FAILED to create directory {}: {}", dir.display(), e);
                    report.errors += 1;
                    continue;
                }
            }
        }

        // ── 2. Writable ────────────────────────────────
        if let Err(e) = writable(&dir) {
            if dir == config.uploads_dir {
                warn!("  Uploads directory not writable: {} (local images will fail)", e);
                report.warnings += 1;
            } else {
                error!("  Database directory not writable: {}", e);
                report.errors += 1;
            }
        }
    }

    // ── 3. Rocket.toml exists ───────────────────────────
    if !Path::new("Rocket.toml").exists() && std::env::var("ROCKET_SECRET_KEY").is_err() {
        warn!("  Neither Rocket.toml nor ROCKET_SECRET_KEY found; session cookies will not survive restarts");
        report.warnings += 1;
    }

    // ── Summary ─────────────────────────────────────────
    if report.errors > 0 {
        return Err(format!(
            "Boot check FAILED: {} error(s), {} warning(s)",
            report.errors, report.warnings
        ));
    }
    if report.warnings > 0 {
        warn!(
            "Boot check passed with {} warning(s). Some features may not work correctly.",
            report.warnings
        );
    } else {
        info!("Boot check passed. All systems go.");
    }
    Ok(report)
}
