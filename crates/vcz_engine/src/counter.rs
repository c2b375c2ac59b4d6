use std::sync::atomic::{AtomicU64, Ordering};

use tokio::{sync::Mutex, time::Instant};

/// Exponential Moving Average (EMA) smoothing factor
/// Higher values = more responsive to changes, lower values = smoother
const EMA_ALPHA: f64 = 0.3;

/// Counter of the bytes downloaded and the rate in which they arrive.
#[derive(Debug)]
pub struct Counter {
    pub total_downloaded: AtomicU64,
    pub download_rate: AtomicU64,

    // -- internal state --
    window_downloaded: AtomicU64,
    last_update: Mutex<Instant>,
    ema_download: Mutex<f64>,
}

impl Default for Counter {
    fn default() -> Self {
        Self {
            total_downloaded: AtomicU64::new(0),
            download_rate: AtomicU64::new(0),
            window_downloaded: AtomicU64::new(0),
            last_update: Mutex::new(Instant::now()),
            ema_download: Mutex::new(0.0),
        }
    }
}

impl Counter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record downloaded bytes
    pub fn record_download(&self, bytes: u64) {
        self.total_downloaded.fetch_add(bytes, Ordering::Relaxed);
        self.window_downloaded.fetch_add(bytes, Ordering::Relaxed);
    }

    pub fn downloaded(&self) -> u64 {
        self.total_downloaded.load(Ordering::Relaxed)
    }

    /// Bytes per second, as of the last [`Counter::update_rates`].
    pub fn rate(&self) -> u64 {
        self.download_rate.load(Ordering::Relaxed)
    }

    /// Update the rate with EMA smoothing
    pub async fn update_rates(&self) {
        let now = Instant::now();
        let mut last_update = self.last_update.lock().await;
        let elapsed = now.duration_since(*last_update).as_secs_f64();

        // Minimum 1ms elapsed
        if elapsed < 0.001 {
            return;
        }

        let downloaded = self.window_downloaded.swap(0, Ordering::Relaxed);
        let dl_rate = downloaded as f64 / elapsed;

        let mut ema_dl = self.ema_download.lock().await;

        *ema_dl = if *ema_dl == 0.0 {
            dl_rate
        } else {
            EMA_ALPHA * dl_rate + (1.0 - EMA_ALPHA) * *ema_dl
        };

        self.download_rate.store(*ema_dl as u64, Ordering::Relaxed);

        *last_update = now;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio::time;

    #[tokio::test(start_paused = true)]
    async fn download_rate() {
        let counter = Counter::new();

        // first update sets the EMA to the first instantaneous rate
        counter.record_download(1000);
        time::advance(Duration::from_millis(100)).await;
        counter.update_rates().await;

        let dl1 = counter.rate();
        assert!((9000..=11000).contains(&dl1), "{dl1}");

        // same data, the EMA should stay close
        counter.record_download(1000);
        time::advance(Duration::from_millis(100)).await;
        counter.update_rates().await;

        let dl2 = counter.rate();
        assert!((dl2 as i64 - dl1 as i64).abs() < 1000);

        // double the data, 0.3 * 20_000 + 0.7 * 10_000
        counter.record_download(2000);
        time::advance(Duration::from_millis(100)).await;
        counter.update_rates().await;

        let dl3 = counter.rate();
        assert!((11700..=14300).contains(&dl3), "{dl3}");
        assert_eq!(counter.downloaded(), 4000);
    }

    #[tokio::test(start_paused = true)]
    async fn too_soon_is_ignored() {
        let counter = Counter::new();
        time::advance(Duration::from_millis(100)).await;
        counter.update_rates().await;

        counter.record_download(500);
        counter.update_rates().await;

        assert_eq!(counter.rate(), 0);
        assert_eq!(counter.downloaded(), 500);
    }
}
