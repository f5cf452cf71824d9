#![doc = r#"
# conduit-tck

## 章节定位（Why）
- **目标**：传输兼容性套件（Transport Compatibility Kit）。每种传输都必须呈现相同的
  连接契约，这些断言只依赖 [`ConnectionFactory`](conduit_core::ConnectionFactory) 与
  [`ListenerFactory`](conduit_core::ListenerFactory)，因此可被任意传输复用；
- **使用方式**：各传输 crate 在 `tests/tck.rs` 中构造 [`TransportUnderTest`]，逐项调用断言。

## 结构概览（How）
- [`contract`]：往返、发送先结束、`dispose` 幂等、`abort`、背压有界、解绑与取消；
- [`tls`]：在被测传输之上叠加 TLS 后重复收发与收尾检查；
- 断言返回 `anyhow::Result<()>`，失败信息携带上下文，便于直接定位违例的契约。
"#]

pub mod contract;
mod harness;
pub mod tls;

pub use harness::{BOUND, TransportUnderTest, read_exact};
