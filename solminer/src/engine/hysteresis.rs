//! Standby debounce.
//!
//! Solar input hovers around the standby threshold at dawn and dusk;
//! without a hold-off the device would flap between standby and
//! ultra-eco every cycle. A requested standby flip must persist for a
//! full hold interval before it is latched, in either direction.

use tokio::time::{Duration, Instant};

#[derive(Debug)]
pub struct StandbyDebounce {
    hold: Duration,
    latched: bool,
    pending_since: Option<Instant>,
}

impl StandbyDebounce {
    pub fn new(hold: Duration) -> Self {
        Self { hold, latched: false, pending_since: None }
    }

    /// Latched standby state.
    pub fn current(&self) -> bool {
        self.latched
    }

    /// Feed the requested state for this cycle; returns the debounced
    /// state to act on. The request must be sustained for the full
    /// hold interval before the latch flips.
    pub fn update(&mut self, requested: bool, now: Instant) -> bool {
        if requested == self.latched {
            self.pending_since = None;
            return self.latched;
        }

        match self.pending_since {
            None => {
                self.pending_since = Some(now);
            }
            Some(since) if now.duration_since(since) >= self.hold => {
                self.latched = requested;
                self.pending_since = None;
            }
            Some(_) => {}
        }

        self.latched
    }

    /// Latch a state immediately, discarding any pending flip. Used by
    /// the emergency-stop path, which must not wait out the hold.
    pub fn force(&mut self, standby: bool) {
        self.latched = standby;
        self.pending_since = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const HOLD: Duration = Duration::from_secs(600);

    #[tokio::test(start_paused = true)]
    async fn sustained_request_latches_after_the_hold() {
        let mut debounce = StandbyDebounce::new(HOLD);

        assert!(!debounce.update(true, Instant::now()));
        tokio::time::advance(HOLD / 2).await;
        assert!(!debounce.update(true, Instant::now()));
        tokio::time::advance(HOLD / 2).await;
        assert!(debounce.update(true, Instant::now()));
    }

    #[tokio::test(start_paused = true)]
    async fn a_blip_resets_the_pending_flip() {
        let mut debounce = StandbyDebounce::new(HOLD);

        debounce.update(true, Instant::now());
        tokio::time::advance(HOLD - Duration::from_secs(1)).await;
        // Cloud passes, watts recover for one cycle.
        assert!(!debounce.update(false, Instant::now()));
        tokio::time::advance(Duration::from_secs(2)).await;
        // The hold starts over from the renewed request.
        assert!(!debounce.update(true, Instant::now()));
    }

    #[tokio::test(start_paused = true)]
    async fn oscillating_input_toggles_at_most_once_per_hold() {
        let mut debounce = StandbyDebounce::new(HOLD);
        let step = HOLD / 4;

        let mut toggles = 0;
        let mut previous = debounce.current();
        for cycle in 0..32 {
            let requested = cycle % 2 == 0;
            let state = debounce.update(requested, Instant::now());
            if state != previous {
                toggles += 1;
                previous = state;
            }
            tokio::time::advance(step).await;
        }

        // 32 cycles * HOLD/4 = 8 holds of wall time; an oscillating
        // input never sustains a request long enough to latch.
        assert_eq!(toggles, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn leaving_standby_is_debounced_too() {
        let mut debounce = StandbyDebounce::new(HOLD);
        debounce.force(true);

        assert!(debounce.update(false, Instant::now()));
        tokio::time::advance(HOLD).await;
        assert!(!debounce.update(false, Instant::now()));
    }

    #[tokio::test(start_paused = true)]
    async fn force_bypasses_the_hold() {
        let mut debounce = StandbyDebounce::new(HOLD);
        debounce.force(true);
        assert!(debounce.current());
        // No pending flip survives a force.
        assert!(debounce.update(true, Instant::now()));
    }
}
