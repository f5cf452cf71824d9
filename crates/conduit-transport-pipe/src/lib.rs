#![deny(unsafe_code)]
#![doc = r#"
# conduit-transport-pipe

## 设计动机（Why）
- **定位**：命名管道传输。与套接字不同，管道服务端在两次 `accept` 之间没有空闲实例，
  客户端只能轮询重试，因此建连被建模为一台显式的状态机；
- **可测试性**：重试节奏依赖注入的 [`Clock`](conduit_core::Clock)，打开原语依赖
  [`PipeOpener`]，超时与取消都能在虚拟时间下确定性验证。

## 核心契约（What）
- [`PipeConnector`]：`Idle → Connecting → Connected | TimedOut | Failed | Cancelled`；
- [`PipeConnectionFactory`] / [`PipeListenerFactory`]：`EndPoint::Pipe` 的拨号与监听；
- 建连后字节流交给 [`StreamTransport`](conduit_core::StreamTransport)，泵与生命周期复用核心实现。

## 平台差异（How）
- Windows：原生命名管道 `\\server\pipe\name`，`ERROR_PIPE_BUSY` 与“不存在”视为未就绪，
  模拟级别映射为 `SECURITY_*` QoS 标志；
- 类 Unix：映射为 `$TMPDIR/conduit-pipe-<name>` 的域套接字，仅支持本机服务器名。
"#]

mod connect;
mod error;
mod factory;

#[cfg(unix)]
#[path = "unix.rs"]
mod platform;
#[cfg(windows)]
#[path = "windows.rs"]
mod platform;

pub use connect::{Attempt, ConnectState, PipeConnector, PipeOpener};
pub use factory::{PipeConnectionFactory, PipeConnectionListener, PipeListenerFactory};
pub use platform::PlatformOpener;
#[cfg(unix)]
pub use platform::socket_path;
