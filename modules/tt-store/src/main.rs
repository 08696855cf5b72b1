//! tt-store: opens (and if needed creates) the archive and reports what it holds.
//!
//! Data directory: TT_DATA_DIR, default ./var

use tt_store::{Archive, Config};

fn main() {
    dotenv::dotenv().ok();
    env_logger::init();

    let config = Config::from_env();
    log::info!("[TT_STORE] Opening archive at: {}", config.data_dir.display());
    if let Ok(json) = serde_json::to_string(&config) {
        log::debug!("[TT_STORE] Config: {}", json);
    }

    let archive = match Archive::open(&config) {
        Ok(archive) => archive,
        Err(e) => {
            log::error!("[TT_STORE] Failed to open archive: {}", e);
            std::process::exit(1);
        }
    };

    match archive.summary() {
        Ok(summary) => {
            log::info!(
                "[TT_STORE] {} profiles ({} authenticated), {} people, {} schedules due",
                summary.profiles,
                summary.authenticated_profiles,
                summary.people,
                summary.schedules_due
            );
            log::info!(
                "[TT_STORE] {} tweets across {} partitions",
                summary.tweets,
                summary.tweet_partitions
            );
            match serde_json::to_string_pretty(&summary) {
                Ok(json) => println!("{}", json),
                Err(e) => log::warn!("[TT_STORE] Could not render summary: {}", e),
            }
        }
        Err(e) => {
            log::error!("[TT_STORE] Failed to read archive summary: {}", e);
            std::process::exit(1);
        }
    }

    match archive.profiles.list() {
        Ok(profiles) => {
            for profile in profiles {
                log::info!(
                    "[TT_STORE] Profile {} (priority {}): {}",
                    profile.profile_alias,
                    profile.priority,
                    profile.auth_flag.status_label()
                );
            }
        }
        Err(e) => log::warn!("[TT_STORE] Could not list profiles: {}", e),
    }

    if let Err(e) = archive.close() {
        log::warn!("[TT_STORE] Error while closing archive: {}", e);
    }
}
