//! Periodic health probing of the downstream service
//!
//! The monitor is advisory: it never gates requests. It probes the
//! configured endpoint on an interval and invokes the change callback once
//! per transition between healthy and unhealthy.

use bastion_config::HealthConfig;
use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::config::HttpConfig;
use crate::transport::{send_with_deadline, Transport};
use crate::types::{HttpMethod, HttpRequest};

/// Called with the new status whenever health flips
pub type HealthCallback = Arc<dyn Fn(&HealthStatus) + Send + Sync>;

/// Latest probe results
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HealthStatus {
    pub is_healthy: bool,
    pub last_check_time: Option<DateTime<Utc>>,
    pub last_healthy_time: Option<DateTime<Utc>>,
    #[serde(with = "humantime_serde")]
    pub response_time: Option<Duration>,
    pub last_error: Option<String>,
    pub consecutive_failures: u32,
    pub checks: u64,
}

impl Default for HealthStatus {
    fn default() -> Self {
        Self {
            is_healthy: true,
            last_check_time: None,
            last_healthy_time: None,
            response_time: None,
            last_error: None,
            consecutive_failures: 0,
            checks: 0,
        }
    }
}

struct MonitorInner {
    config: HealthConfig,
    http: HttpConfig,
    transport: Arc<dyn Transport>,
    status: RwLock<HealthStatus>,
    on_change: Option<HealthCallback>,
}

struct RunningProbe {
    shutdown: oneshot::Sender<()>,
    handle: JoinHandle<()>,
}

/// Background prober for the health endpoint
pub struct HealthMonitor {
    inner: Arc<MonitorInner>,
    running: Mutex<Option<RunningProbe>>,
}

impl HealthMonitor {
    pub fn new(
        config: HealthConfig,
        http: HttpConfig,
        transport: Arc<dyn Transport>,
        on_change: Option<HealthCallback>,
    ) -> Self {
        Self {
            inner: Arc::new(MonitorInner {
                config,
                http,
                transport,
                status: RwLock::new(HealthStatus::default()),
                on_change,
            }),
            running: Mutex::new(None),
        }
    }

    /// Start probing on the configured interval. Does nothing if already running.
    ///
    /// Must be called from within a tokio runtime.
    pub fn start(&self) {
        let mut running = self.running.lock();
        if running.as_ref().map(|probe| !probe.handle.is_finished()).unwrap_or(false) {
            return;
        }

        let (shutdown, mut shutdown_rx) = oneshot::channel();
        let inner = self.inner.clone();
        let period = self.inner.config.interval;

        let handle = tokio::spawn(async move {
            let mut ticker = interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        inner.probe().await;
                    }
                    _ = &mut shutdown_rx => {
                        debug!("Health monitor shutting down");
                        break;
                    }
                }
            }
        });

        info!(
            "Health monitor started for {} every {:?}",
            self.inner.config.endpoint, period
        );
        *running = Some(RunningProbe { shutdown, handle });
    }

    pub fn stop(&self) {
        if let Some(probe) = self.running.lock().take() {
            let _ = probe.shutdown.send(());
            probe.handle.abort();
            info!("Health monitor stopped");
        }
    }

    pub fn is_running(&self) -> bool {
        self.running
            .lock()
            .as_ref()
            .map(|probe| !probe.handle.is_finished())
            .unwrap_or(false)
    }

    /// Probe immediately and return the updated status
    pub async fn check_now(&self) -> HealthStatus {
        self.inner.probe().await
    }

    pub fn status(&self) -> HealthStatus {
        self.inner.status.read().clone()
    }
}

impl Drop for HealthMonitor {
    fn drop(&mut self) {
        self.stop();
    }
}

impl MonitorInner {
    async fn probe(&self) -> HealthStatus {
        let started = Instant::now();
        let outcome = match self.http.resolve_url(&self.config.endpoint) {
            Ok(url) => send_with_deadline(
                self.transport.as_ref(),
                HttpRequest::new(HttpMethod::Get, url),
                self.config.timeout,
            )
            .await
            .and_then(|response| response.error_for_status()),
            Err(e) => Err(e),
        };
        let elapsed = started.elapsed();
        let now = Utc::now();

        let (snapshot, flipped) = {
            let mut status = self.status.write();
            let was_healthy = status.is_healthy;

            status.checks += 1;
            status.last_check_time = Some(now);
            status.response_time = Some(elapsed);
            match &outcome {
                Ok(_) => {
                    status.is_healthy = true;
                    status.last_healthy_time = Some(now);
                    status.last_error = None;
                    status.consecutive_failures = 0;
                }
                Err(error) => {
                    status.is_healthy = false;
                    status.last_error = Some(error.to_string());
                    status.consecutive_failures += 1;
                }
            }

            (status.clone(), was_healthy != status.is_healthy)
        };

        if flipped {
            if snapshot.is_healthy {
                info!("Health check recovered after {:?}", elapsed);
            } else {
                warn!(
                    "Health check failed: {}",
                    snapshot.last_error.as_deref().unwrap_or("unknown error")
                );
            }
            if let Some(callback) = &self.on_change {
                callback(&snapshot);
            }
        }

        snapshot
    }
}
