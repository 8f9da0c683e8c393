use std::time::Duration;

use linkmux_frame::FrameConfig;

/// Resend policy for important packets.
#[derive(Debug, Clone)]
pub struct ResendConfig {
    /// Time to wait for an acknowledgement before resending. Default: 500 ms.
    pub timeout: Duration,
    /// Resends attempted before the connection is declared dead. Default: 5.
    pub retries: u32,
}

impl Default for ResendConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_millis(500),
            retries: 5,
        }
    }
}

/// Configuration for a connection bound to a stream transport.
#[derive(Debug, Clone, Default)]
pub struct ConnectionConfig {
    pub resend: ResendConfig,
    pub frame: FrameConfig,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let cfg = ConnectionConfig::default();
        assert_eq!(cfg.resend.timeout, Duration::from_millis(500));
        assert_eq!(cfg.resend.retries, 5);
        assert_eq!(cfg.frame.max_payload_size, linkmux_frame::DEFAULT_MAX_PAYLOAD);
    }

    #[test]
    fn struct_update_overrides() {
        let cfg = ConnectionConfig {
            resend: ResendConfig {
                retries: 1,
                ..ResendConfig::default()
            },
            ..ConnectionConfig::default()
        };
        assert_eq!(cfg.resend.retries, 1);
        assert_eq!(cfg.resend.timeout, Duration::from_millis(500));
    }
}
