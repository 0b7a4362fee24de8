use std::time::Duration;

/// Timeouts for the request channel.
///
/// Every wait on the request path is bounded by one of these.
#[derive(Debug, Clone)]
pub struct ChannelConfig {
    /// How long `request` waits to take the channel. Default: 3 s.
    pub lock_timeout: Duration,
    /// How long the request bytes may take to leave the host. Default: 500 ms.
    ///
    /// Applied as the link's write timeout. It bounds each write and, on
    /// serial links, the wait for the output queue to drain, so one request
    /// may spend up to about twice this before failing with `TxTimeout`.
    pub tx_timeout: Duration,
    /// How long to wait for the reply once sent. Default: 1 s.
    pub reply_timeout: Duration,
    /// Read timeout of the transport task, bounding how quickly it notices
    /// shutdown. Default: 20 ms.
    pub rx_poll_interval: Duration,
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            lock_timeout: Duration::from_secs(3),
            tx_timeout: Duration::from_millis(500),
            reply_timeout: Duration::from_secs(1),
            rx_poll_interval: Duration::from_millis(20),
        }
    }
}

impl ChannelConfig {
    /// Override the reply timeout.
    pub fn with_reply_timeout(mut self, timeout: Duration) -> Self {
        self.reply_timeout = timeout;
        self
    }

    /// Override the lock timeout.
    pub fn with_lock_timeout(mut self, timeout: Duration) -> Self {
        self.lock_timeout = timeout;
        self
    }
}
