//! エージェントの設定

use crate::{AgentError, Result};
use relay_vars::MAX_VALUE_LENGTH;
use std::time::Duration;

/// エージェントの設定
#[derive(Debug, Clone, PartialEq)]
pub struct AgentConfig {
    /// ピアのホスト
    pub host: String,
    /// ピアのポート
    pub port: u16,
    /// 接続試行を続ける時間
    pub connect_timeout: Duration,
    /// 接続試行の間隔
    pub retry_interval: Duration,
    /// ライブラリ解決を待つ時間
    pub library_timeout: Duration,
    /// 制御リスナーの待ち受けアドレス
    pub control_host: String,
    /// 失敗時に一時停止するかどうかの初期値
    pub pause_on_failure: bool,
    /// 変数値やログメッセージの最大文字数
    pub max_value_length: usize,
    /// RUNモードで一時停止を問い合わせる最小間隔
    pub run_mode_pause_check: Duration,
}

impl AgentConfig {
    /// 既定値で設定を作成する
    pub fn new(port: u16) -> Self {
        Self {
            host: "localhost".to_string(),
            port,
            connect_timeout: Duration::from_secs(30),
            retry_interval: Duration::from_secs(2),
            library_timeout: Duration::from_secs(30),
            control_host: "127.0.0.1".to_string(),
            pause_on_failure: false,
            max_value_length: MAX_VALUE_LENGTH,
            run_mode_pause_check: Duration::from_secs(2),
        }
    }

    /// リスナー引数から設定を作成する
    ///
    /// `[port]`、`[host, port]`、`[host, port, timeout_secs]` のいずれかを受け付けます。
    ///
    /// # Examples
    /// ```
    /// use relay_core::AgentConfig;
    ///
    /// let config = AgentConfig::from_listener_args(&["10.0.0.5", "4000", "5"]).unwrap();
    /// assert_eq!(config.host, "10.0.0.5");
    /// assert_eq!(config.port, 4000);
    /// assert_eq!(config.connect_timeout.as_secs(), 5);
    /// ```
    pub fn from_listener_args<S: AsRef<str>>(args: &[S]) -> Result<Self> {
        let args: Vec<&str> = args.iter().map(|s| s.as_ref().trim()).collect();
        match args.as_slice() {
            [port] => Ok(Self::new(parse_port(port)?)),
            [host, port] => Ok(Self::new(parse_port(port)?).with_host(*host)),
            [host, port, timeout] => {
                let seconds = timeout.parse::<u64>().map_err(|e| {
                    AgentError::InvalidArguments(format!(
                        "invalid connection timeout '{}': {}",
                        timeout, e
                    ))
                })?;
                Ok(Self::new(parse_port(port)?)
                    .with_host(*host)
                    .with_connect_timeout(Duration::from_secs(seconds)))
            }
            _ => Err(AgentError::InvalidArguments(format!(
                "expected [port], [host, port] or [host, port, timeout], got {} argument(s)",
                args.len()
            ))),
        }
    }

    pub fn with_host(mut self, host: impl Into<String>) -> Self {
        self.host = host.into();
        self
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    pub fn with_retry_interval(mut self, interval: Duration) -> Self {
        self.retry_interval = interval;
        self
    }

    pub fn with_library_timeout(mut self, timeout: Duration) -> Self {
        self.library_timeout = timeout;
        self
    }

    pub fn with_control_host(mut self, host: impl Into<String>) -> Self {
        self.control_host = host.into();
        self
    }

    pub fn with_pause_on_failure(mut self, enabled: bool) -> Self {
        self.pause_on_failure = enabled;
        self
    }

    pub fn with_max_value_length(mut self, length: usize) -> Self {
        self.max_value_length = length;
        self
    }

    pub fn with_run_mode_pause_check(mut self, interval: Duration) -> Self {
        self.run_mode_pause_check = interval;
        self
    }

    /// 接続先の `host:port`
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

fn parse_port(s: &str) -> Result<u16> {
    s.parse::<u16>()
        .map_err(|e| AgentError::InvalidArguments(format!("invalid port '{}': {}", s, e)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_single_argument_is_port() {
        let config = AgentConfig::from_listener_args(&["4242"]).unwrap();
        assert_eq!(config.host, "localhost");
        assert_eq!(config.port, 4242);
        assert_eq!(config.connect_timeout, Duration::from_secs(30));
    }

    #[test]
    fn test_host_and_port() {
        let config = AgentConfig::from_listener_args(&["ci-box", " 4242 "]).unwrap();
        assert_eq!(config.address(), "ci-box:4242");
    }

    #[test]
    fn test_invalid_arguments() {
        let empty: [&str; 0] = [];
        assert!(matches!(
            AgentConfig::from_listener_args(&empty),
            Err(AgentError::InvalidArguments(_))
        ));
        assert!(AgentConfig::from_listener_args(&["port"]).is_err());
        assert!(AgentConfig::from_listener_args(&["h", "1", "soon"]).is_err());
        assert!(AgentConfig::from_listener_args(&["h", "1", "2", "3"]).is_err());
    }

    #[test]
    fn test_defaults() {
        let config = AgentConfig::new(1);
        assert_eq!(config.retry_interval, Duration::from_secs(2));
        assert_eq!(config.library_timeout, Duration::from_secs(30));
        assert_eq!(config.control_host, "127.0.0.1");
        assert_eq!(config.max_value_length, 2048);
        assert!(!config.pause_on_failure);
    }
}
