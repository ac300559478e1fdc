use std::time::Duration;

/// Inter-call delay honoring the provider's per-credential rate limit.
///
/// The delay is injected rather than hard-coded so tests run with
/// `Pacer::none()` and never sleep.
#[derive(Debug, Clone, Copy)]
pub struct Pacer {
    delay: Duration,
}

impl Pacer {
    pub fn new(delay: Duration) -> Self {
        Self { delay }
    }

    pub fn from_millis(delay_ms: u64) -> Self {
        Self::new(Duration::from_millis(delay_ms))
    }

    pub fn none() -> Self {
        Self { delay: Duration::ZERO }
    }

    pub async fn pause(&self) {
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
    }
}
