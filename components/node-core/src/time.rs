use crate::fmt::FormatableNaiveDateTime;
use chrono::{Duration, NaiveDateTime};
use embassy_sync::{blocking_mutex::raw::CriticalSectionRawMutex, mutex::Mutex};
use embassy_time::Instant;

/// Correlates uptime with UTC once the transport side learned the real time.
pub struct WallClock {
    boot_time: Mutex<CriticalSectionRawMutex, Option<NaiveDateTime>>,
}

impl Default for WallClock {
    fn default() -> Self {
        Self::new()
    }
}

impl WallClock {
    pub const fn new() -> Self {
        Self { boot_time: Mutex::new(None) }
    }

    pub async fn sync(&self, now: NaiveDateTime) {
        let since_boot = Instant::now();
        let new_boot_time = now - Duration::milliseconds(since_boot.as_millis() as i64);
        let mut guard = self.boot_time.lock().await;
        match *guard {
            Some(current_boot_time) => {
                if current_boot_time != new_boot_time {
                    *guard = Some(new_boot_time);
                    let drift = new_boot_time - current_boot_time;
                    info!("Clock> re-synchronized: {} (drift: {} ms)", FormatableNaiveDateTime(&now), drift.num_milliseconds());
                }
            }
            None => {
                *guard = Some(new_boot_time);
                info!("Clock> initially synchronized: {}", FormatableNaiveDateTime(&now));
            }
        };
    }

    /// `None` until the first [`WallClock::sync`].
    pub async fn now(&self) -> Option<NaiveDateTime> {
        let guard = self.boot_time.lock().await;
        (*guard).map(|boot_time| boot_time + Duration::milliseconds(Instant::now().as_millis() as i64))
    }

    pub async fn is_synchronized(&self) -> bool {
        self.boot_time.lock().await.is_some()
    }
}
