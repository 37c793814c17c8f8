// crates/alertpipe-channels/src/rate_limit.rs
// ============================================================================
// Module: Token Bucket
// Description: A shared, async-friendly rate limiter.
// Purpose: Give the email sender a single global rate limit across its
//          worker pool (§4.2's scheduling model calls this out as the one
//          piece of mutable state Dispatcher workers share besides the
//          Matcher's snapshot handle). Refilled on a background tick rather
//          than on every acquire, so callers never pay for wall-clock math.
// Dependencies: tokio
// ============================================================================

use std::sync::Mutex;
use std::time::Duration;

use tokio::sync::Notify;
use tokio::time::Instant;

/// A token bucket with a background refill task.
///
/// # Invariants
/// - `capacity` bounds the number of tokens a long idle period can bank.
/// - Refill happens once per [`TokenBucket::spawn_refill`] tick, not
///   continuously; callers waiting on [`TokenBucket::acquire`] are woken on
///   every refill, not just when their turn comes up.
pub struct TokenBucket {
    state: Mutex<BucketState>,
    notify: Notify,
}

struct BucketState {
    tokens: u32,
    capacity: u32,
    refill_per_tick: u32,
}

impl TokenBucket {
    /// Builds a bucket starting full, with capacity `capacity` and
    /// `refill_per_tick` tokens restored on every [`TokenBucket::tick`].
    #[must_use]
    pub fn new(capacity: u32, refill_per_tick: u32) -> Self {
        Self {
            state: Mutex::new(BucketState {
                tokens: capacity,
                capacity,
                refill_per_tick,
            }),
            notify: Notify::new(),
        }
    }

    /// Restores `refill_per_tick` tokens, capped at `capacity`, and wakes
    /// any tasks waiting on [`TokenBucket::acquire`].
    pub fn tick(&self) {
        #[allow(clippy::unwrap_used)]
        let mut state = self.state.lock().unwrap();
        state.tokens = (state.tokens + state.refill_per_tick).min(state.capacity);
        drop(state);
        self.notify.notify_waiters();
    }

    /// Waits until a token is available, then consumes it.
    pub async fn acquire(&self) {
        loop {
            {
                #[allow(clippy::unwrap_used)]
                let mut state = self.state.lock().unwrap();
                if state.tokens > 0 {
                    state.tokens -= 1;
                    return;
                }
            }
            self.notify.notified().await;
        }
    }

    /// Spawns the periodic refill task for `bucket`, ticking every
    /// `interval`. Returns the task handle so callers can abort it on
    /// shutdown.
    pub fn spawn_refill(bucket: std::sync::Arc<TokenBucket>, interval: Duration) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval_at(Instant::now() + interval, interval);
            loop {
                ticker.tick().await;
                bucket.tick();
            }
        })
    }
}
