use std::{sync::Arc, time::Duration};

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use log::{debug, error};
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tokio_stream::{wrappers::IntervalStream, StreamExt};

#[async_trait]
pub trait Refresher: Send + Sync {
    async fn refresh(&self) -> Result<()>;
}

pub fn spawn_worker(
    name: &'static str,
    refresher: Arc<dyn Refresher>,
    interval: Duration,
    timeout: Duration,
) -> tokio::task::JoinHandle<()> {
    let mut ticks = interval_at(Instant::now() + interval, interval);
    ticks.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut ticks = IntervalStream::new(ticks);
    tokio::spawn(async move {
        while ticks.next().await.is_some() {
            debug!("{}: refreshing", name);
            if let Err(err) = refresh_with_timeout(refresher.as_ref(), timeout).await {
                error!("{}: refresh failed: {:#}", name, err);
            }
        }
    })
}

async fn refresh_with_timeout(refresher: &dyn Refresher, timeout: Duration) -> Result<()> {
    tokio::time::timeout(timeout, refresher.refresh())
        .await
        .map_err(|_| anyhow!("timed out after {:?}", timeout))?
}

#[cfg(test)]
mod tests {
    use std::{
        sync::{
            atomic::{AtomicUsize, Ordering},
            Arc,
        },
        time::Duration,
    };

    use anyhow::{bail, Result};
    use async_trait::async_trait;

    use super::{refresh_with_timeout, spawn_worker, Refresher};

    #[derive(Default)]
    struct Counting {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl Refresher for Counting {
        async fn refresh(&self) -> Result<()> {
            if self.calls.fetch_add(1, Ordering::SeqCst) == 0 {
                bail!("first refresh fails");
            }
            Ok(())
        }
    }

    struct Slow;

    #[async_trait]
    impl Refresher for Slow {
        async fn refresh(&self) -> Result<()> {
            tokio::time::sleep(Duration::from_secs(60)).await;
            Ok(())
        }
    }

    #[tokio::test(start_paused = true)]
    async fn should_keep_refreshing_after_failures() {
        let refresher = Arc::new(Counting::default());
        let worker = spawn_worker(
            "test",
            refresher.clone(),
            Duration::from_secs(10),
            Duration::from_secs(1),
        );

        tokio::time::sleep(Duration::from_secs(35)).await;
        worker.abort();

        assert_eq!(refresher.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn should_time_out_slow_refresh() {
        let result = refresh_with_timeout(&Slow, Duration::from_secs(1)).await;

        assert!(result.is_err());
    }
}
