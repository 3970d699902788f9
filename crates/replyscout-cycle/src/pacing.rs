//! Randomized pacing sleeps and the interrupt channel that cuts them short.

use std::time::Duration;

use rand::Rng;
use replyscout_core::{PacingBounds, MAX_PAUSE_SECS};
use tokio::sync::watch;
use tracing::info;

/// Sending half, held by whoever observes the interrupt (e.g. Ctrl-C).
#[derive(Debug)]
pub struct ShutdownTrigger {
    tx: watch::Sender<bool>,
}

impl ShutdownTrigger {
    pub fn trigger(&self) {
        self.tx.send_replace(true);
    }
}

/// Receiving half, checked between suspension points.
#[derive(Debug, Clone)]
pub struct Shutdown {
    rx: watch::Receiver<bool>,
}

pub fn shutdown_channel() -> (ShutdownTrigger, Shutdown) {
    let (tx, rx) = watch::channel(false);
    (ShutdownTrigger { tx }, Shutdown { rx })
}

impl Shutdown {
    /// A signal that never fires.
    pub fn never() -> Self {
        shutdown_channel().1
    }

    pub fn is_triggered(&self) -> bool {
        *self.rx.borrow()
    }

    /// Resolves once triggered. Pending forever if the trigger is dropped unfired.
    pub async fn triggered(&mut self) {
        if self.rx.wait_for(|fired| *fired).await.is_err() {
            std::future::pending::<()>().await;
        }
    }
}

pub fn sample_duration<R: Rng + ?Sized>(bounds: PacingBounds, rng: &mut R) -> Duration {
    let secs = if bounds.max_secs > bounds.min_secs {
        rng.random_range(bounds.min_secs..=bounds.max_secs)
    } else {
        bounds.min_secs
    };
    Duration::try_from_secs_f64(secs.clamp(0.0, MAX_PAUSE_SECS)).unwrap_or(Duration::ZERO)
}

#[derive(Debug, Clone)]
pub struct Pacer {
    shutdown: Shutdown,
}

impl Pacer {
    pub fn new(shutdown: Shutdown) -> Self {
        Self { shutdown }
    }

    pub fn interrupted(&self) -> bool {
        self.shutdown.is_triggered()
    }

    /// Sleeps a uniform random duration within `bounds`. Returns `false` if the
    /// sleep was cut short by an interrupt.
    pub async fn pause(&mut self, bounds: PacingBounds, what: &'static str) -> bool {
        let duration = sample_duration(bounds, &mut rand::rng());
        if duration.is_zero() {
            return !self.interrupted();
        }
        info!(what, secs = duration.as_secs_f64(), "sleeping");
        tokio::select! {
            _ = tokio::time::sleep(duration) => true,
            _ = self.shutdown.triggered() => false,
        }
    }

    /// Like `pause` but quiet; used for the short settle wait before reading a batch.
    pub async fn settle(&mut self, bounds: PacingBounds) -> bool {
        let duration = sample_duration(bounds, &mut rand::rng());
        if duration.is_zero() {
            return !self.interrupted();
        }
        tokio::select! {
            _ = tokio::time::sleep(duration) => true,
            _ = self.shutdown.triggered() => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    #[test]
    fn samples_stay_within_bounds() {
        let mut rng = StdRng::seed_from_u64(9);
        let bounds = PacingBounds::new(1.5, 2.5);
        for _ in 0..500 {
            let d = sample_duration(bounds, &mut rng).as_secs_f64();
            assert!((1.5..=2.5).contains(&d), "{d}");
        }
        assert_eq!(
            sample_duration(PacingBounds::new(3.0, 3.0), &mut rng),
            Duration::from_secs(3)
        );
    }

    #[test]
    fn unvalidated_huge_bounds_are_clamped_instead_of_panicking() {
        let mut rng = StdRng::seed_from_u64(1);
        let d = sample_duration(PacingBounds::new(1e20, 1e20), &mut rng);
        assert_eq!(d, Duration::from_secs_f64(MAX_PAUSE_SECS));
        assert_eq!(
            sample_duration(PacingBounds::new(f64::NAN, f64::NAN), &mut rng),
            Duration::ZERO
        );
    }

    #[tokio::test(start_paused = true)]
    async fn pause_runs_to_completion_without_interrupt() {
        let mut pacer = Pacer::new(Shutdown::never());
        assert!(pacer.pause(PacingBounds::new(30.0, 60.0), "after_reply").await);
    }

    #[tokio::test(start_paused = true)]
    async fn interrupt_cuts_a_pause_short() {
        let (trigger, shutdown) = shutdown_channel();
        let mut pacer = Pacer::new(shutdown);
        let started = tokio::time::Instant::now();

        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(5)).await;
            trigger.trigger();
        });

        assert!(!pacer.pause(PacingBounds::new(600.0, 900.0), "after_full_cycle").await);
        assert!(started.elapsed() < Duration::from_secs(600));
        assert!(pacer.interrupted());
    }
}
