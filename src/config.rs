use std::time::Duration;

/// Timing knobs for a session.
///
/// Defaults match the module's known-good behaviour; each can be overridden
/// through an environment variable by [`Config::from_env`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    /// Bounded wait for each event-pump iteration (`TC001_PUMP_INTERVAL_MS`).
    pub pump_interval: Duration,
    /// Event-handling passes `stop` spends draining a cancelled transfer
    /// (`TC001_DRAIN_ITERATIONS`).
    pub drain_iterations: u32,
    /// Wait per drain pass (`TC001_DRAIN_INTERVAL_MS`).
    pub drain_interval: Duration,
    /// Timeout for each handshake control transfer (`TC001_CONTROL_TIMEOUT_MS`).
    pub control_timeout: Duration,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            pump_interval: Duration::from_millis(20),
            drain_iterations: 10,
            drain_interval: Duration::from_millis(10),
            control_timeout: Duration::from_millis(1000),
        }
    }
}

impl Config {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            pump_interval: read_env_ms("TC001_PUMP_INTERVAL_MS", defaults.pump_interval),
            drain_iterations: read_env_u32("TC001_DRAIN_ITERATIONS", defaults.drain_iterations),
            drain_interval: read_env_ms("TC001_DRAIN_INTERVAL_MS", defaults.drain_interval),
            control_timeout: read_env_ms("TC001_CONTROL_TIMEOUT_MS", defaults.control_timeout),
        }
    }

    /// Replace zero values with the defaults. A zero drain budget would
    /// leave every stopped transfer in flight.
    pub fn sanitized(self) -> Self {
        let defaults = Self::default();
        let or_default = |d: Duration, fallback: Duration| if d.is_zero() { fallback } else { d };
        Self {
            pump_interval: or_default(self.pump_interval, defaults.pump_interval),
            drain_iterations: if self.drain_iterations == 0 {
                defaults.drain_iterations
            } else {
                self.drain_iterations
            },
            drain_interval: or_default(self.drain_interval, defaults.drain_interval),
            control_timeout: or_default(self.control_timeout, defaults.control_timeout),
        }
    }
}

fn read_env_u32(name: &str, default: u32) -> u32 {
    std::env::var(name)
        .ok()
        .and_then(|v| v.trim().parse::<u32>().ok())
        .filter(|&n| n > 0)
        .unwrap_or(default)
}

fn read_env_ms(name: &str, default: Duration) -> Duration {
    std::env::var(name)
        .ok()
        .and_then(|v| v.trim().parse::<u64>().ok())
        .filter(|&ms| ms > 0)
        .map(Duration::from_millis)
        .unwrap_or(default)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_env_overrides() {
        std::env::set_var("TC001_TEST_MS_VALID", " 35 ");
        std::env::set_var("TC001_TEST_MS_ZERO", "0");
        std::env::set_var("TC001_TEST_U32_BAD", "many");

        let fallback = Duration::from_millis(7);
        assert_eq!(read_env_ms("TC001_TEST_MS_VALID", fallback), Duration::from_millis(35));
        assert_eq!(read_env_ms("TC001_TEST_MS_ZERO", fallback), fallback);
        assert_eq!(read_env_ms("TC001_TEST_MS_UNSET", fallback), fallback);
        assert_eq!(read_env_u32("TC001_TEST_U32_BAD", 10), 10);
    }

    #[test]
    fn test_zero_drain_iterations_falls_back() {
        std::env::set_var("TC001_TEST_U32_ZERO", "0");
        assert_eq!(read_env_u32("TC001_TEST_U32_ZERO", 10), 10);

        let config = Config {
            drain_iterations: 0,
            drain_interval: Duration::ZERO,
            ..Config::default()
        }
        .sanitized();
        assert_eq!(config, Config::default());

        let custom = Config {
            drain_iterations: 3,
            ..Config::default()
        };
        assert_eq!(custom.clone().sanitized(), custom);
    }
}
