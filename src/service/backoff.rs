use std::time::Duration;

const INITIAL_DELAY: Duration = Duration::from_secs(1);
const MAX_DELAY: Duration = Duration::from_secs(5);

/// Delay between retries after temporary accept errors
///
/// Starts at one second and doubles on every consecutive failure, capped at
/// five seconds. A successful accept resets it.
#[derive(Debug, Clone, Default)]
pub struct AcceptBackoff {
    current: Option<Duration>,
}

impl AcceptBackoff {
    pub fn new() -> Self {
        Self::default()
    }

    /// Delay to wait before the next accept attempt
    pub fn next_delay(&mut self) -> Duration {
        let delay = match self.current {
            None => INITIAL_DELAY,
            Some(previous) => (previous * 2).min(MAX_DELAY),
        };
        self.current = Some(delay);
        delay
    }

    pub fn reset(&mut self) {
        self.current = None;
    }
}
