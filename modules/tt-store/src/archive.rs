//! Registry of every table handle, built once from a [`Config`].

use std::sync::Arc;

use chrono::Utc;
use tt_types::ArchiveSummary;

use crate::config::Config;
use crate::db::store::Store;
use crate::db::tables::{
    MAIN_SCHEMA, People, Profiles, Schedules, Threads, Timelines, Tweets, profiles,
};
use crate::error::StoreResult;

pub struct Archive {
    profiles_store: Arc<Store>,
    main_store: Arc<Store>,
    pub profiles: Profiles,
    pub people: People,
    pub schedules: Schedules,
    pub timelines: Timelines,
    pub threads: Threads,
    pub tweets: Tweets,
}

impl Archive {
    /// Bind every table to its file under `config.data_dir`. No connection is opened yet.
    pub fn open(config: &Config) -> StoreResult<Self> {
        let profiles_store = Arc::new(Store::new(
            config.profiles_path(),
            &profiles::SCHEMA,
            config.isolation_level,
        )?);
        let main_store = Arc::new(Store::new(
            config.main_path(),
            &MAIN_SCHEMA,
            config.isolation_level,
        )?);
        let tweets = Tweets::new(
            config.tweets_dir(),
            config.partition_scale,
            config.isolation_level,
        )?;
        log::debug!(
            "[TT_STORE] Archive bound to {} (partition scale {})",
            config.data_dir.display(),
            config.partition_scale
        );

        Ok(Self {
            profiles: Profiles::new(profiles_store.clone()),
            people: People::new(main_store.clone()),
            schedules: Schedules::new(main_store.clone()),
            timelines: Timelines::new(main_store.clone()),
            threads: Threads::new(main_store.clone()),
            tweets,
            profiles_store,
            main_store,
        })
    }

    pub fn summary(&self) -> StoreResult<ArchiveSummary> {
        Ok(ArchiveSummary {
            profiles: self.profiles.list()?.len(),
            authenticated_profiles: self.profiles.authenticated()?.len(),
            people: self.people.count()?,
            schedules_due: self.schedules.due(Utc::now())?.len(),
            tweet_partitions: self.tweets.partitions()?.len(),
            tweets: self.tweets.count()?,
        })
    }

    /// Close the shared connections; tweet partitions are closed after every call already.
    pub fn close(&self) -> StoreResult<()> {
        self.profiles_store.close()?;
        self.main_store.close()?;
        log::debug!("[TT_STORE] Archive closed");
        Ok(())
    }
}
