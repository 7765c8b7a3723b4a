use embassy_futures::select::{Either, select};
use embassy_sync::{blocking_mutex::raw::RawMutex, signal::Signal};
use embassy_time::{Duration, Instant, Timer, with_timeout};
use heapless::Vec;

use crate::{
    batch::{AcquisitionBatch, ChangeTracker, SampleResult, Timestamp},
    config::DeviceConfig,
    hal::Board,
    registry::Registry,
    sensor::{Driver, DriverError, Readings, SensorDriver},
    sink::BatchSink,
    time::WallClock,
};

/// Upper bound for a single `sample()` call, on top of the drivers' own time budgets.
pub const SAMPLE_BUDGET: Duration = Duration::from_secs(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum SchedulerState {
    Idle,
    Sampling,
    Sleeping,
    ShuttingDown,
    Halted,
}

/// Drives the sample / sleep loop until `shutdown` is signaled.
pub struct Scheduler<'a, B: Board, S: BatchSink, M: RawMutex> {
    config: &'a DeviceConfig,
    registry: Registry<B>,
    sink: S,
    shutdown: &'a Signal<M, ()>,
    clock: Option<&'a WallClock>,
    changes: ChangeTracker,
    state: SchedulerState,
}

impl<'a, B: Board, S: BatchSink, M: RawMutex> Scheduler<'a, B, S, M> {
    pub fn new(config: &'a DeviceConfig, registry: Registry<B>, sink: S, shutdown: &'a Signal<M, ()>) -> Self {
        Self {
            config,
            registry,
            sink,
            shutdown,
            clock: None,
            changes: ChangeTracker::new(),
            state: SchedulerState::Idle,
        }
    }

    /// Stamps batches with UTC once `clock` is synchronized.
    pub fn with_clock(mut self, clock: &'a WallClock) -> Self {
        self.clock = Some(clock);
        self
    }

    pub fn state(&self) -> SchedulerState {
        self.state
    }

    pub fn registry(&self) -> &Registry<B> {
        &self.registry
    }

    pub fn sink(&self) -> &S {
        &self.sink
    }

    pub async fn run(&mut self) {
        info!("Scheduler> starting with {} sensors", self.registry.len());
        while self.state != SchedulerState::Halted {
            self.once().await;
        }
        info!("Scheduler> halted");
    }

    /// Performs one state transition.
    pub async fn once(&mut self) {
        let next = match self.state {
            SchedulerState::Idle => {
                if self.shutdown.signaled() {
                    SchedulerState::ShuttingDown
                } else {
                    SchedulerState::Sampling
                }
            }
            SchedulerState::Sampling => self.handle_sampling().await,
            SchedulerState::Sleeping => self.handle_sleeping().await,
            SchedulerState::ShuttingDown => self.handle_shutting_down().await,
            SchedulerState::Halted => SchedulerState::Halted,
        };
        if next != self.state {
            trace!("Scheduler> {:?} -> {:?}", self.state, next);
        }
        self.state = next;
    }

    /// Samples every sensor once, in configuration order.
    ///
    /// Returns `None` when shutdown was requested before all sensors were sampled; the partial batch is discarded.
    pub async fn acquire(&mut self) -> Option<AcquisitionBatch> {
        let utc = match self.clock {
            Some(clock) => clock.now().await,
            None => None,
        };
        let timestamp = Timestamp { uptime: Instant::now(), utc };
        let attempts = self.config.sample_attempts.max(1);

        let mut results = Vec::new();
        for (index, driver) in self.registry.drivers_mut().iter_mut().enumerate() {
            if self.shutdown.signaled() {
                info!("Scheduler> shutdown requested, discarding cycle after {} sensors", index);
                return None;
            }
            let Some(spec) = self.config.sensors.get(index) else {
                break;
            };
            let outcome = sample_with_attempts(driver, attempts).await;
            let changed = match &outcome {
                Ok(readings) => {
                    debug!("Scheduler> sensor {}: {:?}", index, readings.as_slice());
                    self.changes.update(index, spec, readings)
                }
                Err(e) => {
                    warn!("Scheduler> sensor {} failed: {:?}", index, e);
                    false
                }
            };
            let _ = results.push(SampleResult {
                sensor_index: index,
                kind: spec.kind(),
                tags: spec.tags().try_into().unwrap_or_default(),
                outcome,
                changed,
            });
        }

        Some(AcquisitionBatch {
            device_name: self.config.device_name.clone(),
            timestamp,
            results,
        })
    }

    async fn handle_sampling(&mut self) -> SchedulerState {
        let Some(batch) = self.acquire().await else {
            return SchedulerState::ShuttingDown;
        };
        info!(
            "Scheduler> batch at {}: {} results, {} failed, upload {}",
            batch.timestamp,
            batch.results.len(),
            batch.failures(),
            batch.upload_requested()
        );
        self.sink.deliver(batch).await;
        SchedulerState::Sleeping
    }

    async fn handle_sleeping(&mut self) -> SchedulerState {
        info!("Scheduler> sleeping for {}s", self.config.sleep_interval.as_secs());
        match select(Timer::after(self.config.sleep_interval), self.shutdown.wait()).await {
            Either::First(()) => {
                debug!("Scheduler> woke up");
                SchedulerState::Idle
            }
            Either::Second(()) => {
                info!("Scheduler> shutdown requested while sleeping");
                SchedulerState::ShuttingDown
            }
        }
    }

    async fn handle_shutting_down(&mut self) -> SchedulerState {
        info!("Scheduler> shutting down {} sensors", self.registry.len());
        self.registry.shutdown().await;
        SchedulerState::Halted
    }
}

/// Retries transient failures up to `attempts` times within the same cycle.
async fn sample_with_attempts<B: Board>(driver: &mut Driver<B>, attempts: u8) -> Result<Readings, DriverError> {
    let mut attempt = 1;
    loop {
        let result = match with_timeout(SAMPLE_BUDGET, driver.sample()).await {
            Ok(result) => result,
            Err(e) => Err(DriverError::from(e)),
        };
        match result {
            Err(e) if e.is_transient() && attempt < attempts => {
                debug!("Scheduler> attempt {} of {} failed: {:?}", attempt, attempts, e);
                attempt += 1;
            }
            result => return result,
        }
    }
}
