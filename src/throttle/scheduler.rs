use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{AcquireError, Semaphore};
use tokio::task::JoinHandle;
use tokio::time::{self, MissedTickBehavior};

/// Smallest period handed to the interval timer; tokio rejects a zero period.
const MIN_INTERVAL: Duration = Duration::from_nanos(1);

/// Longest period handed to the interval timer. Rates too small to express as
/// a `Duration` saturate here; the timer deadline must stay representable.
const MAX_INTERVAL: Duration = Duration::from_secs(365 * 24 * 60 * 60);

/// Emits one pacing token every `1 / rate` seconds until stopped.
///
/// Tokens are the only admission mechanism for starting a request. The
/// scheduler knows nothing about workers or requests: it adds a permit to a
/// shared semaphore on every tick, and at most `capacity` unused tokens are
/// banked. Ticks that land on a full bank are dropped, so a slow period never
/// turns into a burst later on.
///
/// The emitting task is scoped to this handle: dropping the handle (or calling
/// [`TokenScheduler::stop`]) aborts it and wakes every waiter with an error.
#[derive(Debug)]
pub struct TokenScheduler {
    tokens: Arc<Semaphore>,
    interval: Duration,
    task: JoinHandle<()>,
}

impl TokenScheduler {
    /// Spawns the emitting task on the current tokio runtime.
    ///
    /// `rate` must be positive and finite; callers validate it first.
    pub fn start(rate: f64, capacity: usize) -> Self {
        let interval = period_for(rate);
        let tokens = Arc::new(Semaphore::new(0));
        let task = tokio::spawn(emit_tokens(Arc::clone(&tokens), interval, capacity.max(1)));

        debug!(message = "Token scheduler started.", interval_us = %interval.as_micros(), capacity);
        Self {
            tokens,
            interval,
            task,
        }
    }

    /// A handle workers use to wait for tokens.
    pub fn tokens(&self) -> Tokens {
        Tokens(Arc::clone(&self.tokens))
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Stops emission. Workers blocked on a token are released with an error.
    pub fn stop(&self) {
        self.task.abort();
        self.tokens.close();
    }
}

fn period_for(rate: f64) -> Duration {
    Duration::try_from_secs_f64(rate.recip())
        .unwrap_or(MAX_INTERVAL)
        .clamp(MIN_INTERVAL, MAX_INTERVAL)
}

impl Drop for TokenScheduler {
    fn drop(&mut self) {
        self.stop();
    }
}

async fn emit_tokens(tokens: Arc<Semaphore>, period: Duration, capacity: usize) {
    let mut ticker = time::interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    // The first tick completes immediately; the first token is due one period in.
    ticker.tick().await;
    loop {
        ticker.tick().await;
        if tokens.available_permits() < capacity {
            tokens.add_permits(1);
        }
    }
}

/// Consumer side of a [`TokenScheduler`].
#[derive(Clone, Debug)]
pub struct Tokens(Arc<Semaphore>);

impl Tokens {
    /// Waits for one token and consumes it.
    ///
    /// Fails once the scheduler has been stopped.
    pub async fn acquire(&self) -> Result<(), AcquireError> {
        let permit = self.0.acquire().await?;
        permit.forget();
        Ok(())
    }

    /// Tokens emitted but not yet consumed.
    pub fn available(&self) -> usize {
        self.0.available_permits()
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use tokio::time;
    use tokio_test::{assert_pending, assert_ready_err, assert_ready_ok, task};

    use super::*;

    #[tokio::test(start_paused = true)]
    async fn emits_one_token_per_interval() {
        let scheduler = TokenScheduler::start(10.0, 100);
        let tokens = scheduler.tokens();
        assert_eq!(scheduler.interval(), Duration::from_millis(100));

        time::sleep(Duration::from_millis(350)).await;
        assert_eq!(tokens.available(), 3);

        time::sleep(Duration::from_millis(100)).await;
        assert_eq!(tokens.available(), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn first_token_arrives_after_one_interval() {
        let scheduler = TokenScheduler::start(4.0, 1);
        let tokens = scheduler.tokens();

        let mut acquire = task::spawn(tokens.acquire());
        assert_pending!(acquire.poll());

        time::sleep(Duration::from_millis(260)).await;
        assert!(acquire.is_woken());
        assert_ready_ok!(acquire.poll());
    }

    #[tokio::test(start_paused = true)]
    async fn bank_is_capped_at_capacity() {
        let scheduler = TokenScheduler::start(100.0, 2);
        let tokens = scheduler.tokens();

        time::sleep(Duration::from_secs(1)).await;
        assert_eq!(tokens.available(), 2);

        tokens.acquire().await.unwrap();
        tokens.acquire().await.unwrap();
        assert_eq!(tokens.available(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn stop_releases_waiters_and_ends_emission() {
        let scheduler = TokenScheduler::start(10.0, 10);
        let tokens = scheduler.tokens();

        let mut acquire = task::spawn(tokens.acquire());
        assert_pending!(acquire.poll());

        scheduler.stop();
        assert_ready_err!(acquire.poll());

        time::sleep(Duration::from_secs(1)).await;
        assert_eq!(tokens.available(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn huge_rate_degrades_to_unthrottled() {
        let scheduler = TokenScheduler::start(f64::MAX, 8);
        assert_eq!(scheduler.interval(), MIN_INTERVAL);

        let tokens = scheduler.tokens();
        for _ in 0..8 {
            tokens.acquire().await.unwrap();
        }
    }

    #[tokio::test(start_paused = true)]
    async fn tiny_rate_saturates_to_longest_interval() {
        let scheduler = TokenScheduler::start(1e-20, 8);
        assert_eq!(scheduler.interval(), MAX_INTERVAL);

        time::sleep(Duration::from_secs(60)).await;
        assert_eq!(scheduler.tokens().available(), 0);
    }

    #[test]
    fn period_stays_within_timer_bounds() {
        assert_eq!(period_for(4.0), Duration::from_millis(250));
        assert_eq!(period_for(f64::MIN_POSITIVE), MAX_INTERVAL);
        assert_eq!(period_for(1e-3), Duration::from_secs(1000));
        assert_eq!(period_for(1e12), MIN_INTERVAL);
    }
}
