use std::time::{Instant, SystemTime, UNIX_EPOCH};

use anyhow::Result;
use prometheus::{
    HistogramOpts, HistogramVec, IntCounter, IntCounterVec, IntGauge, IntGaugeVec, Opts, Registry,
};

pub struct Metrics {
    filter_rules: IntGaugeVec,
    filter_status: IntGaugeVec,
    filter_updated: IntGaugeVec,
    refresh_duration: HistogramVec,
    cache_lookups: IntCounterVec,
    profiles: IntGauge,
    devices: IntGauge,
    profiledb_sync: IntGaugeVec,
    errors: IntCounter,
}

impl Metrics {
    pub fn new(registry: &Registry) -> Result<Self> {
        let filter_rules = IntGaugeVec::new(
            Opts::new("filter_rules_total", "Rules loaded per filter"),
            &["filter"],
        )?;
        let filter_status = IntGaugeVec::new(
            Opts::new("filter_status", "1 when the last refresh of the filter succeeded"),
            &["filter"],
        )?;
        let filter_updated = IntGaugeVec::new(
            Opts::new("filter_updated_seconds", "Time of the last successful refresh"),
            &["filter"],
        )?;
        let refresh_duration = HistogramVec::new(
            HistogramOpts::new("refresh_duration_seconds", "Duration of refresh rounds"),
            &["component"],
        )?;
        let cache_lookups = IntCounterVec::new(
            Opts::new("cache_lookups_total", "Result cache lookups"),
            &["cache", "result"],
        )?;
        let profiles = IntGauge::new("profiledb_profiles_total", "Profiles in the profile cache")?;
        let devices = IntGauge::new("profiledb_devices_total", "Devices in the profile cache")?;
        let profiledb_sync = IntGaugeVec::new(
            Opts::new("profiledb_sync_seconds", "Time of the last successful sync"),
            &["kind"],
        )?;
        let errors = IntCounter::new("errors_total", "Collected non-fatal errors")?;

        registry.register(Box::new(filter_rules.clone()))?;
        registry.register(Box::new(filter_status.clone()))?;
        registry.register(Box::new(filter_updated.clone()))?;
        registry.register(Box::new(refresh_duration.clone()))?;
        registry.register(Box::new(cache_lookups.clone()))?;
        registry.register(Box::new(profiles.clone()))?;
        registry.register(Box::new(devices.clone()))?;
        registry.register(Box::new(profiledb_sync.clone()))?;
        registry.register(Box::new(errors.clone()))?;

        Ok(Self {
            filter_rules,
            filter_status,
            filter_updated,
            refresh_duration,
            cache_lookups,
            profiles,
            devices,
            profiledb_sync,
            errors,
        })
    }

    #[cfg(test)]
    pub fn unregistered() -> Self {
        Self::new(&Registry::new()).expect("fresh registry")
    }

    pub fn set_filter_status(&self, filter: &str, rules: Option<usize>) {
        match rules {
            Some(rules) => {
                self.filter_rules
                    .with_label_values(&[filter])
                    .set(rules as i64);
                self.filter_status.with_label_values(&[filter]).set(1);
                self.filter_updated
                    .with_label_values(&[filter])
                    .set(unix_now());
            }
            None => self.filter_status.with_label_values(&[filter]).set(0),
        }
    }

    pub fn filter_status(&self, filter: &str) -> i64 {
        self.filter_status.with_label_values(&[filter]).get()
    }

    pub fn observe_refresh(&self, component: &str, started: Instant) {
        self.refresh_duration
            .with_label_values(&[component])
            .observe(started.elapsed().as_secs_f64());
    }

    pub fn cache_lookup(&self, cache: &str, hit: bool) {
        let result = if hit { "hit" } else { "miss" };
        self.cache_lookups.with_label_values(&[cache, result]).inc();
    }

    pub fn cache_lookups(&self, cache: &str, hit: bool) -> u64 {
        let result = if hit { "hit" } else { "miss" };
        self.cache_lookups.with_label_values(&[cache, result]).get()
    }

    pub fn set_profiledb_size(&self, profiles: usize, devices: usize) {
        self.profiles.set(profiles as i64);
        self.devices.set(devices as i64);
    }

    pub fn profiledb_synced(&self, full: bool) {
        let kind = if full { "full" } else { "incremental" };
        self.profiledb_sync.with_label_values(&[kind]).set(unix_now());
    }

    pub fn errors_counter(&self) -> IntCounter {
        self.errors.clone()
    }
}

fn unix_now() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |d| d.as_secs() as i64)
}
