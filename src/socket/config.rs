use std::time::Duration;

/// Tuning knobs for the I/O state machines.
///
/// Controls timeouts, buffer sizes, retry budgets and the optional speed
/// floors. Use `IoConfig::builder()` for ergonomic construction.
///
/// ## Retry budgets
///
/// - read_attempts: pairs of consecutive dry read calls tolerated before an unfinished frame fails
/// - write_attempts: write calls sending nothing tolerated before a send fails
///
/// ## Speed floors
///
/// When a minimum speed is set, a transfer whose average speed stays below it
/// for longer than the matching duration fails with a slow-transfer error.
#[derive(Debug, Clone, PartialEq)]
pub struct IoConfig {
    /// Time a stream client may spend connecting before it counts as refused
    pub connection_timeout: Duration,
    /// Default wait budget for a select
    pub io_timeout: Duration,
    /// Bytes requested per stream read
    pub read_buffer_size: usize,
    /// Receive buffer and send limit for datagrams
    pub max_datagram_size: usize,
    /// Largest payload accepted for an out-of-band write
    pub oob_max_packet_size: usize,
    pub read_attempts: u32,
    pub write_attempts: u32,
    /// Bytes per second
    pub min_receive_speed: Option<f64>,
    pub min_receive_speed_duration: Duration,
    /// Bytes per second
    pub min_send_speed: Option<f64>,
    pub min_send_speed_duration: Duration,
}

impl IoConfig {
    /// Create a new builder for IoConfig
    pub fn builder() -> IoConfigBuilder {
        IoConfigBuilder::new()
    }
}

impl Default for IoConfig {
    fn default() -> Self {
        Self {
            connection_timeout: Duration::from_secs(60),
            io_timeout: Duration::from_secs(30),
            read_buffer_size: 8192,
            max_datagram_size: 65507,
            oob_max_packet_size: 1,
            read_attempts: 10,
            write_attempts: 10,
            min_receive_speed: None,
            min_receive_speed_duration: Duration::ZERO,
            min_send_speed: None,
            min_send_speed_duration: Duration::ZERO,
        }
    }
}

/// Builder for IoConfig.
///
/// All fields are optional and fall back to IoConfig::default().
#[derive(Debug, Default)]
pub struct IoConfigBuilder {
    connection_timeout: Option<Duration>,
    io_timeout: Option<Duration>,
    read_buffer_size: Option<usize>,
    max_datagram_size: Option<usize>,
    oob_max_packet_size: Option<usize>,
    read_attempts: Option<u32>,
    write_attempts: Option<u32>,
    min_receive_speed: Option<(f64, Duration)>,
    min_send_speed: Option<(f64, Duration)>,
}

impl IoConfigBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn connection_timeout(mut self, timeout: Duration) -> Self {
        self.connection_timeout = Some(timeout);
        self
    }

    pub fn io_timeout(mut self, timeout: Duration) -> Self {
        self.io_timeout = Some(timeout);
        self
    }

    pub fn read_buffer_size(mut self, size: usize) -> Self {
        self.read_buffer_size = Some(size.max(1));
        self
    }

    pub fn max_datagram_size(mut self, size: usize) -> Self {
        self.max_datagram_size = Some(size.max(1));
        self
    }

    pub fn oob_max_packet_size(mut self, size: usize) -> Self {
        self.oob_max_packet_size = Some(size);
        self
    }

    pub fn read_attempts(mut self, attempts: u32) -> Self {
        self.read_attempts = Some(attempts.max(1));
        self
    }

    pub fn write_attempts(mut self, attempts: u32) -> Self {
        self.write_attempts = Some(attempts.max(1));
        self
    }

    /// Fail receives averaging below `bytes_per_sec` for longer than `duration`
    pub fn min_receive_speed(mut self, bytes_per_sec: f64, duration: Duration) -> Self {
        self.min_receive_speed = Some((bytes_per_sec, duration));
        self
    }

    /// Fail sends averaging below `bytes_per_sec` for longer than `duration`
    pub fn min_send_speed(mut self, bytes_per_sec: f64, duration: Duration) -> Self {
        self.min_send_speed = Some((bytes_per_sec, duration));
        self
    }

    pub fn build(self) -> IoConfig {
        let default = IoConfig::default();
        IoConfig {
            connection_timeout: self.connection_timeout.unwrap_or(default.connection_timeout),
            io_timeout: self.io_timeout.unwrap_or(default.io_timeout),
            read_buffer_size: self.read_buffer_size.unwrap_or(default.read_buffer_size),
            max_datagram_size: self.max_datagram_size.unwrap_or(default.max_datagram_size),
            oob_max_packet_size: self
                .oob_max_packet_size
                .unwrap_or(default.oob_max_packet_size),
            read_attempts: self.read_attempts.unwrap_or(default.read_attempts),
            write_attempts: self.write_attempts.unwrap_or(default.write_attempts),
            min_receive_speed: self.min_receive_speed.map(|(speed, _)| speed),
            min_receive_speed_duration: self
                .min_receive_speed
                .map_or(default.min_receive_speed_duration, |(_, duration)| duration),
            min_send_speed: self.min_send_speed.map(|(speed, _)| speed),
            min_send_speed_duration: self
                .min_send_speed
                .map_or(default.min_send_speed_duration, |(_, duration)| duration),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builder_defaults() {
        assert_eq!(IoConfig::builder().build(), IoConfig::default());
    }

    #[test]
    fn test_builder_overrides() {
        let config = IoConfig::builder()
            .read_attempts(0)
            .min_receive_speed(512.0, Duration::from_secs(3))
            .oob_max_packet_size(4)
            .build();
        assert_eq!(config.read_attempts, 1);
        assert_eq!(config.min_receive_speed, Some(512.0));
        assert_eq!(config.min_receive_speed_duration, Duration::from_secs(3));
        assert_eq!(config.min_send_speed, None);
        assert_eq!(config.oob_max_packet_size, 4);
    }
}
