//! The measurement and sync jobs run by the daemon

use crate::assembler::Assembler;
use crate::config::{Config, TriggerStyle};
use crate::credentials::CredentialProvider;
use crate::location;
use crate::output::{OutputManager, UiState};
use crate::radio::{RadioReader, TelephonyProvider};
use crate::scheduler::{Job, JobOutcome, MEASUREMENT_JOB, SYNC_JOB, Scheduler, Trigger};
use crate::storage::MeasurementStore;
use crate::sync::{SyncDispatcher, SyncError, SyncOutcome};
use crate::testing::sms::SmsGateway;
use crate::testing::{LiveProbes, Measurement, ProbeTargets};
use crate::utils::http_client;
use anyhow::Result;
use async_trait::async_trait;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};

/// Long-lived collaborators shared by every run
pub struct Agent {
    pub config_path: PathBuf,
    pub store: Arc<dyn MeasurementStore>,
    pub credentials: Arc<dyn CredentialProvider>,
    pub telephony: Arc<dyn TelephonyProvider>,
    pub sms: Arc<dyn SmsGateway>,
    pub output: OutputManager,
}

impl Agent {
    /// Current preferences; a broken file falls back to defaults for this run
    pub fn config(&self) -> Config {
        match Config::load_or_default(&self.config_path) {
            Ok(config) => config,
            Err(e) => {
                warn!("Using default configuration: {e:#}");
                Config::default()
            }
        }
    }

    pub async fn measure(&self, config: &Config) -> Result<Measurement> {
        let http = http_client(Duration::from_secs(config.backend.request_timeout_s))?;
        let probes = LiveProbes::new(
            http,
            ProbeTargets::from_config(config),
            Arc::clone(&self.credentials),
            Arc::clone(&self.sms),
        );
        let location: Arc<dyn location::LocationProvider> =
            Arc::from(location::provider_from_config(&config.location));

        let assembler = Assembler::new(
            RadioReader::new(Arc::clone(&self.telephony)),
            location,
            Arc::new(probes),
            Arc::clone(&self.store),
            Arc::clone(&self.credentials),
        )
        .with_fix_timeout(Duration::from_secs(config.location.fix_timeout_s));

        self.output.show(&UiState::Loading);
        let measurement = assembler.run(config.tests, config.sim.slot).await;
        self.output.show(&UiState::from_measurement(measurement.clone()));
        Ok(measurement)
    }

    pub async fn sync(&self, config: &Config) -> Result<SyncOutcome, SyncError> {
        let http = http_client(Duration::from_secs(config.backend.request_timeout_s))
            .map_err(SyncError::Client)?;
        SyncDispatcher::new(
            http,
            config.backend.base_url.clone(),
            Arc::clone(&self.store),
            Arc::clone(&self.credentials),
        )
        .sync()
        .await
    }

    async fn sync_job(&self, config: &Config) -> JobOutcome {
        match self.sync(config).await {
            Ok(SyncOutcome::Synced(n)) => {
                info!("Sync finished: {n} measurements uploaded");
                JobOutcome::Success
            }
            Ok(SyncOutcome::NothingToSync) => JobOutcome::Success,
            Ok(SyncOutcome::Skipped(reason)) => {
                warn!("Sync skipped: {reason:?}; run `polaris login` to upload");
                JobOutcome::Success
            }
            Err(e) => {
                warn!("Sync failed: {e}");
                JobOutcome::Retry
            }
        }
    }
}

pub struct MeasurementJob(pub Arc<Agent>);

#[async_trait]
impl Job for MeasurementJob {
    async fn run(&self) -> JobOutcome {
        let config = self.0.config();
        if let Err(e) = self.0.measure(&config).await {
            error!("Measurement job could not start: {e:#}");
            return JobOutcome::Retry;
        }
        if config.schedule.sync_after_measurement
            && self.0.sync_job(&config).await == JobOutcome::Retry
        {
            warn!("Follow-up sync failed; the periodic sync job will retry");
        }
        JobOutcome::Success
    }
}

pub struct SyncJob(pub Arc<Agent>);

#[async_trait]
impl Job for SyncJob {
    async fn run(&self) -> JobOutcome {
        let config = self.0.config();
        self.0.sync_job(&config).await
    }
}

pub fn measurement_trigger(config: &Config) -> Trigger {
    let period = config.schedule.measurement_interval();
    match config.schedule.trigger {
        TriggerStyle::Periodic => Trigger::Periodic { interval: period },
        TriggerStyle::ExactAlarm => Trigger::ExactAlarm { delay: period },
    }
}

/// Register both jobs, superseding any earlier registration
pub fn register(scheduler: &Scheduler, agent: &Arc<Agent>, config: &Config) {
    scheduler.enqueue_unique(
        MEASUREMENT_JOB,
        measurement_trigger(config),
        config.schedule.require_network,
        Arc::new(MeasurementJob(Arc::clone(agent))),
    );
    scheduler.enqueue_unique(
        SYNC_JOB,
        Trigger::Periodic {
            interval: config.schedule.sync_interval(),
        },
        config.schedule.require_network,
        Arc::new(SyncJob(Arc::clone(agent))),
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::credentials::StaticCredentials;
    use crate::network_monitor::NoConstraint;
    use crate::radio::fake::FakeTelephony;
    use crate::storage::MockMeasurementStore;
    use crate::sync::SkipReason;
    use crate::network_monitor::ConnectivityCheck;
    use crate::radio::{CellInfo, NetworkType, Subscription};
    use crate::testing::sms::ReportSubscription;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct NoSms;

    #[async_trait]
    impl SmsGateway for NoSms {
        async fn send(&self, _number: &str, _text: &str) -> Result<ReportSubscription> {
            anyhow::bail!("no modem")
        }
    }

    /// Counts every modem query
    #[derive(Default)]
    struct CountingTelephony {
        reads: AtomicUsize,
    }

    impl CountingTelephony {
        fn reads(&self) -> usize {
            self.reads.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl TelephonyProvider for CountingTelephony {
        async fn subscriptions(&self) -> Result<Vec<Subscription>> {
            self.reads.fetch_add(1, Ordering::SeqCst);
            Ok(Vec::new())
        }

        async fn cell_infos(&self) -> Result<Vec<CellInfo>> {
            self.reads.fetch_add(1, Ordering::SeqCst);
            Ok(Vec::new())
        }

        async fn network_operator(&self, _subscription: &Subscription) -> Result<Option<String>> {
            Ok(None)
        }

        async fn access_technology(&self, _subscription: &Subscription) -> Result<NetworkType> {
            Ok(NetworkType::Others)
        }
    }

    struct Offline;

    #[async_trait]
    impl ConnectivityCheck for Offline {
        async fn is_connected(&self) -> bool {
            false
        }
    }

    fn agent_with(
        dir: &tempfile::TempDir,
        store: MockMeasurementStore,
        token: &str,
        telephony: Arc<dyn TelephonyProvider>,
    ) -> Arc<Agent> {
        Arc::new(Agent {
            config_path: dir.path().join("polaris.conf"),
            store: Arc::new(store),
            credentials: Arc::new(StaticCredentials::new(token, "a@b.c")),
            telephony,
            sms: Arc::new(NoSms),
            output: OutputManager::new(),
        })
    }

    fn agent(dir: &tempfile::TempDir, store: MockMeasurementStore, token: &str) -> Arc<Agent> {
        agent_with(dir, store, token, Arc::new(FakeTelephony::default()))
    }

    #[test]
    fn test_measurement_trigger_follows_style() {
        let mut config = Config::default();
        assert_eq!(
            measurement_trigger(&config),
            Trigger::Periodic {
                interval: Duration::from_secs(15 * 60)
            }
        );
        config.schedule.trigger = TriggerStyle::ExactAlarm;
        config.schedule.measurement_interval_min = 5;
        assert_eq!(
            measurement_trigger(&config),
            Trigger::ExactAlarm {
                delay: Duration::from_secs(300)
            }
        );
    }

    #[tokio::test]
    async fn test_measurement_without_cell_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = MockMeasurementStore::new();
        store.expect_insert().never();

        let agent = agent(&dir, store, "tok");
        let measurement = agent.measure(&agent.config()).await.unwrap();
        assert!(measurement.is_empty());

        let outcome = MeasurementJob(agent).run().await;
        assert_eq!(outcome, JobOutcome::Success);
    }

    #[tokio::test]
    async fn test_sync_job_outcomes() {
        let dir = tempfile::tempdir().unwrap();

        let logged_out = agent(&dir, MockMeasurementStore::new(), "");
        assert_eq!(
            logged_out.sync(&logged_out.config()).await.unwrap(),
            SyncOutcome::Skipped(SkipReason::NoCredential)
        );
        assert_eq!(SyncJob(logged_out).run().await, JobOutcome::Success);

        let mut failing = MockMeasurementStore::new();
        failing
            .expect_unsynced()
            .returning(|_| Err(anyhow::anyhow!("database locked")));
        assert_eq!(
            SyncJob(agent(&dir, failing, "tok")).run().await,
            JobOutcome::Retry
        );
    }

    #[tokio::test]
    async fn test_register_uses_unique_names() {
        let dir = tempfile::tempdir().unwrap();
        let agent = agent(&dir, MockMeasurementStore::new(), "");
        let scheduler = Scheduler::new(Arc::new(NoConstraint));

        let mut config = Config::default();
        config.schedule.trigger = TriggerStyle::ExactAlarm;
        register(&scheduler, &agent, &config);
        register(&scheduler, &agent, &config);

        assert!(scheduler.is_scheduled(MEASUREMENT_JOB));
        assert!(scheduler.is_scheduled(SYNC_JOB));
        scheduler.shutdown();
        assert!(!scheduler.is_scheduled(SYNC_JOB));
    }

    #[tokio::test(start_paused = true)]
    async fn test_measurement_waits_for_network() {
        let dir = tempfile::tempdir().unwrap();
        let telephony = Arc::new(CountingTelephony::default());
        let agent = agent_with(&dir, MockMeasurementStore::new(), "", telephony.clone());
        let config = Config::default();
        assert!(config.schedule.require_network);

        let offline = Scheduler::new(Arc::new(Offline));
        register(&offline, &agent, &config);
        tokio::time::sleep(Duration::from_secs(300)).await;
        assert_eq!(telephony.reads(), 0);
        offline.shutdown();

        let online = Scheduler::new(Arc::new(NoConstraint));
        register(&online, &agent, &config);
        tokio::time::sleep(Duration::from_secs(1)).await;
        assert!(telephony.reads() > 0);
    }

    #[tokio::test]
    async fn test_failed_follow_up_sync_keeps_measurement_successful() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = Config::default();
        config.schedule.sync_after_measurement = true;
        config.save(dir.path().join("polaris.conf")).unwrap();

        let mut store = MockMeasurementStore::new();
        store.expect_insert().never();
        store
            .expect_unsynced()
            .times(1)
            .returning(|_| Err(anyhow::anyhow!("database locked")));

        let outcome = MeasurementJob(agent(&dir, store, "tok")).run().await;
        assert_eq!(outcome, JobOutcome::Success);
    }
}
