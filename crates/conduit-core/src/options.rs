use std::time::Duration;

use serde::Deserialize;

/// 配置加载/校验失败。
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to parse transport options: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("invalid transport options: {0}")]
    Invalid(&'static str),
}

/// 传输层的全部可调参数。
///
/// # 教案级注释
///
/// ## 意图（Why）
/// - 背压阈值、读缓冲大小、排空超时与各传输的特有参数原本散落在各实现中，统一收敛后
///   宿主只需加载一份 TOML 即可完成装配；
/// - 配置读取本身属于宿主职责，这里只提供结构与默认值。
///
/// ## 契约（What）
/// - 所有字段都有默认值，缺省字段不会导致解析失败；
/// - [`TransportOptions::validate`] 保证 `resume_threshold <= pause_threshold` 且阈值非零。
#[derive(Clone, Debug, Default, Deserialize, PartialEq, Eq)]
#[serde(default, deny_unknown_fields)]
pub struct TransportOptions {
    pub channel: ChannelOptions,
    pub buffer: BufferOptions,
    pub lifecycle: LifecycleOptions,
    pub pipe: PipeOptions,
    pub websocket: WebSocketOptions,
    pub tls: TlsOptions,
    pub socket: SocketOptions,
}

impl TransportOptions {
    /// 从 TOML 文本加载并校验。
    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        let options: TransportOptions = toml::from_str(text)?;
        options.validate()?;
        Ok(options)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.channel.validate()?;
        if self.buffer.read_buffer_size == 0 {
            return Err(ConfigError::Invalid("buffer.read_buffer_size must be positive"));
        }
        if self.pipe.poll_quantum_ms == 0 {
            return Err(ConfigError::Invalid("pipe.poll_quantum_ms must be positive"));
        }
        if self.websocket.max_message_size == 0 {
            return Err(ConfigError::Invalid("websocket.max_message_size must be positive"));
        }
        Ok(())
    }
}

/// 单个方向队列的背压阈值。
#[derive(Clone, Copy, Debug, Deserialize, PartialEq, Eq)]
#[serde(default, deny_unknown_fields)]
pub struct ChannelOptions {
    /// 缓冲字节数达到该值时挂起生产者。
    pub pause_threshold: usize,
    /// 缓冲字节数回落到该值以下时唤醒生产者。
    pub resume_threshold: usize,
}

impl Default for ChannelOptions {
    fn default() -> Self {
        Self {
            pause_threshold: 64 * 1024,
            resume_threshold: 32 * 1024,
        }
    }
}

impl ChannelOptions {
    pub fn new(pause_threshold: usize, resume_threshold: usize) -> Self {
        Self {
            pause_threshold,
            resume_threshold,
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.pause_threshold == 0 {
            return Err(ConfigError::Invalid("channel.pause_threshold must be positive"));
        }
        if self.resume_threshold > self.pause_threshold {
            return Err(ConfigError::Invalid(
                "channel.resume_threshold must not exceed channel.pause_threshold",
            ));
        }
        Ok(())
    }
}

#[derive(Clone, Copy, Debug, Deserialize, PartialEq, Eq)]
#[serde(default, deny_unknown_fields)]
pub struct BufferOptions {
    /// 接收泵每次原始读取使用的缓冲大小。
    pub read_buffer_size: usize,
    /// 缓冲池最多保留的空闲缓冲数量。
    pub max_pooled: usize,
}

impl Default for BufferOptions {
    fn default() -> Self {
        Self {
            read_buffer_size: 4096,
            max_pooled: 64,
        }
    }
}

#[derive(Clone, Copy, Debug, Deserialize, PartialEq, Eq)]
#[serde(default, deny_unknown_fields)]
pub struct LifecycleOptions {
    /// `dispose` 等待发送泵排空的最长时间，超时后强制关闭句柄。
    pub drain_timeout_ms: u64,
}

impl Default for LifecycleOptions {
    fn default() -> Self {
        Self {
            drain_timeout_ms: 5_000,
        }
    }
}

impl LifecycleOptions {
    pub fn drain_timeout(&self) -> Duration {
        Duration::from_millis(self.drain_timeout_ms)
    }
}

#[derive(Clone, Copy, Debug, Deserialize, PartialEq, Eq)]
#[serde(default, deny_unknown_fields)]
pub struct PipeOptions {
    /// `None` 表示一直重试直到取消。
    pub connect_timeout_ms: Option<u64>,
    /// 两次建连尝试之间的固定等待量子。
    pub poll_quantum_ms: u64,
}

impl Default for PipeOptions {
    fn default() -> Self {
        Self {
            connect_timeout_ms: Some(5_000),
            poll_quantum_ms: 50,
        }
    }
}

impl PipeOptions {
    pub fn connect_timeout(&self) -> Option<Duration> {
        self.connect_timeout_ms.map(Duration::from_millis)
    }

    pub fn poll_quantum(&self) -> Duration {
        Duration::from_millis(self.poll_quantum_ms)
    }
}

#[derive(Clone, Copy, Debug, Deserialize, PartialEq, Eq)]
#[serde(default, deny_unknown_fields)]
pub struct WebSocketOptions {
    /// 单条入站消息允许的最大字节数。
    pub max_message_size: usize,
    /// 监听侧完成 HTTP 升级握手的时限。
    pub handshake_timeout_ms: u64,
}

impl Default for WebSocketOptions {
    fn default() -> Self {
        Self {
            max_message_size: 16 * 1024 * 1024,
            handshake_timeout_ms: 10_000,
        }
    }
}

impl WebSocketOptions {
    pub fn handshake_timeout(&self) -> Duration {
        Duration::from_millis(self.handshake_timeout_ms)
    }
}

#[derive(Clone, Copy, Debug, Deserialize, PartialEq, Eq)]
#[serde(default, deny_unknown_fields)]
pub struct TlsOptions {
    pub handshake_timeout_ms: u64,
}

impl Default for TlsOptions {
    fn default() -> Self {
        Self {
            handshake_timeout_ms: 10_000,
        }
    }
}

impl TlsOptions {
    pub fn handshake_timeout(&self) -> Duration {
        Duration::from_millis(self.handshake_timeout_ms)
    }
}

#[derive(Clone, Copy, Debug, Deserialize, PartialEq, Eq)]
#[serde(default, deny_unknown_fields)]
pub struct SocketOptions {
    pub nodelay: bool,
}

impl Default for SocketOptions {
    fn default() -> Self {
        Self { nodelay: true }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_document_yields_defaults() {
        let options = TransportOptions::from_toml_str("").expect("defaults are valid");
        assert_eq!(options, TransportOptions::default());
        assert_eq!(options.pipe.poll_quantum(), Duration::from_millis(50));
    }

    #[test]
    fn partial_document_overrides_fields() {
        let options = TransportOptions::from_toml_str(
            r#"
            [channel]
            pause_threshold = 1024
            resume_threshold = 512

            [pipe]
            connect_timeout_ms = 250
            "#,
        )
        .expect("valid document");
        assert_eq!(options.channel, ChannelOptions::new(1024, 512));
        assert_eq!(options.pipe.connect_timeout(), Some(Duration::from_millis(250)));
        assert_eq!(options.pipe.poll_quantum_ms, 50);
    }

    #[test]
    fn inverted_thresholds_are_rejected() {
        let err = TransportOptions::from_toml_str(
            r#"
            [channel]
            pause_threshold = 10
            resume_threshold = 20
            "#,
        )
        .unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
    }

    #[test]
    fn unknown_keys_are_rejected() {
        let err = TransportOptions::from_toml_str("[socket]\nlinger = 3\n").unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }
}
