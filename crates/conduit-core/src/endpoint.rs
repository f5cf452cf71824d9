use std::{
    fmt,
    hash::{Hash, Hasher},
    str::FromStr,
};

use crate::error::{ErrorKind, TransportError};

/// 拨号/绑定所用的端点描述。
///
/// # 教案级注释
///
/// ## 意图（Why）
/// - 套接字、命名管道与 WebSocket 的寻址方式完全不同，统一为一个标签枚举后，
///   [`crate::ConnectorRegistry`] 才能据此选择正确的传输变体；
/// - 端点只在建连/绑定阶段使用，连接建立后不再修改。
///
/// ## 契约（What）
/// - 不可变、按值比较；
/// - `Display` 输出适合日志的形式。
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum EndPoint {
    /// 网络地址（主机名或 IP + 端口）。
    Network { host: String, port: u16 },
    /// 命名管道地址。
    Pipe(PipeAddress),
    /// URI 地址（WebSocket）。
    Uri(UriAddress),
}

impl EndPoint {
    pub fn network(host: impl Into<String>, port: u16) -> Self {
        EndPoint::Network {
            host: host.into(),
            port,
        }
    }

    /// 日志中使用的短类别标签。
    pub fn kind(&self) -> &'static str {
        match self {
            EndPoint::Network { .. } => "network",
            EndPoint::Pipe(_) => "pipe",
            EndPoint::Uri(_) => "uri",
        }
    }
}

impl From<std::net::SocketAddr> for EndPoint {
    fn from(addr: std::net::SocketAddr) -> Self {
        EndPoint::Network {
            host: addr.ip().to_string(),
            port: addr.port(),
        }
    }
}

impl From<PipeAddress> for EndPoint {
    fn from(addr: PipeAddress) -> Self {
        EndPoint::Pipe(addr)
    }
}

impl From<UriAddress> for EndPoint {
    fn from(addr: UriAddress) -> Self {
        EndPoint::Uri(addr)
    }
}

impl fmt::Display for EndPoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EndPoint::Network { host, port } if host.contains(':') => write!(f, "[{host}]:{port}"),
            EndPoint::Network { host, port } => write!(f, "{host}:{port}"),
            EndPoint::Pipe(pipe) => fmt::Display::fmt(pipe, f),
            EndPoint::Uri(uri) => fmt::Display::fmt(uri, f),
        }
    }
}

/// 客户端在命名管道上请求的模拟级别。
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum ImpersonationLevel {
    #[default]
    Anonymous,
    Identification,
    Impersonation,
    Delegation,
}

/// 命名管道的拨号安全选项；只影响建连，不参与端点相等性比较。
///
/// 默认以匿名级别拨号并开启 write-through，写入在对端收到后才返回。
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct PipeSecurityOptions {
    pub impersonation: ImpersonationLevel,
    pub write_through: bool,
}

impl Default for PipeSecurityOptions {
    fn default() -> Self {
        Self {
            impersonation: ImpersonationLevel::Anonymous,
            write_through: true,
        }
    }
}

const LOCAL_SERVER: &str = ".";
const RESERVED_PIPE_NAME: &str = "anonymous";

/// 命名管道地址 `\\<server>\pipe\<name>`。
///
/// # 契约（What）
/// - 构造时拒绝空的服务器名/管道名、包含分隔符的管道名以及保留名 `anonymous`（大小写不敏感）；
/// - 相等性与哈希只比较 `server_name` 与 `pipe_name`。
#[derive(Clone, Debug)]
pub struct PipeAddress {
    server_name: String,
    pipe_name: String,
    security: PipeSecurityOptions,
}

impl PipeAddress {
    /// 本机管道。
    pub fn local(pipe_name: impl Into<String>) -> Result<Self, TransportError> {
        Self::new(LOCAL_SERVER, pipe_name)
    }

    pub fn new(
        server_name: impl Into<String>,
        pipe_name: impl Into<String>,
    ) -> Result<Self, TransportError> {
        let server_name = server_name.into();
        let pipe_name = pipe_name.into();
        if server_name.is_empty() {
            return Err(invalid_pipe("server name must not be empty"));
        }
        if pipe_name.is_empty() {
            return Err(invalid_pipe("pipe name must not be empty"));
        }
        if pipe_name.contains(['\\', '/']) || server_name.contains(['\\', '/']) {
            return Err(invalid_pipe("pipe and server names must not contain path separators"));
        }
        if pipe_name.eq_ignore_ascii_case(RESERVED_PIPE_NAME) {
            return Err(invalid_pipe("pipe name `anonymous` is reserved"));
        }
        Ok(Self {
            server_name,
            pipe_name,
            security: PipeSecurityOptions::default(),
        })
    }

    pub fn with_security(mut self, security: PipeSecurityOptions) -> Self {
        self.security = security;
        self
    }

    pub fn server_name(&self) -> &str {
        &self.server_name
    }

    pub fn pipe_name(&self) -> &str {
        &self.pipe_name
    }

    pub fn security(&self) -> PipeSecurityOptions {
        self.security
    }

    /// 是否指向本机。
    pub fn is_local(&self) -> bool {
        self.server_name == LOCAL_SERVER || self.server_name.eq_ignore_ascii_case("localhost")
    }

    /// 渲染为 `\\server\pipe\name`。
    pub fn path(&self) -> String {
        format!(r"\\{}\pipe\{}", self.server_name, self.pipe_name)
    }
}

fn invalid_pipe(message: &'static str) -> TransportError {
    TransportError::new(
        ErrorKind::InvalidEndpoint,
        "conduit.endpoint.invalid_pipe_address",
        message,
    )
}

impl PartialEq for PipeAddress {
    fn eq(&self, other: &Self) -> bool {
        self.server_name == other.server_name && self.pipe_name == other.pipe_name
    }
}

impl Eq for PipeAddress {}

impl Hash for PipeAddress {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.server_name.hash(state);
        self.pipe_name.hash(state);
    }
}

impl fmt::Display for PipeAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.path())
    }
}

impl FromStr for PipeAddress {
    type Err = TransportError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let rest = s
            .strip_prefix(r"\\")
            .ok_or_else(|| invalid_pipe(r"pipe path must start with `\\`"))?;
        let mut parts = rest.splitn(3, '\\');
        let server = parts.next().unwrap_or_default();
        let marker = parts.next().unwrap_or_default();
        let name = parts.next().unwrap_or_default();
        if !marker.eq_ignore_ascii_case("pipe") {
            return Err(invalid_pipe(r"pipe path must look like `\\server\pipe\name`"));
        }
        PipeAddress::new(server, name)
    }
}

/// URI 端点，主要用于 WebSocket。
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct UriAddress {
    uri: String,
}

impl UriAddress {
    /// 只做最小的结构校验：必须包含 `scheme://authority`。
    pub fn parse(uri: impl Into<String>) -> Result<Self, TransportError> {
        let uri = uri.into();
        match uri.split_once("://") {
            Some((scheme, rest)) if !scheme.is_empty() && !rest.is_empty() => Ok(Self { uri }),
            _ => Err(TransportError::new(
                ErrorKind::InvalidEndpoint,
                "conduit.endpoint.invalid_uri",
                format!("`{uri}` is not an absolute uri"),
            )),
        }
    }

    pub fn as_str(&self) -> &str {
        &self.uri
    }

    /// 小写的 scheme。
    pub fn scheme(&self) -> String {
        self.uri
            .split_once("://")
            .map(|(scheme, _)| scheme.to_ascii_lowercase())
            .unwrap_or_default()
    }

    fn authority(&self) -> &str {
        let rest = self.uri.split_once("://").map(|(_, rest)| rest).unwrap_or("");
        let end = rest.find(['/', '?', '#']).unwrap_or(rest.len());
        let authority = &rest[..end];
        authority.rsplit_once('@').map(|(_, host)| host).unwrap_or(authority)
    }

    /// 主机部分（去掉 IPv6 方括号）。
    pub fn host(&self) -> &str {
        let authority = self.authority();
        if let Some(stripped) = authority.strip_prefix('[') {
            return stripped.split_once(']').map(|(host, _)| host).unwrap_or(stripped);
        }
        authority.split_once(':').map(|(host, _)| host).unwrap_or(authority)
    }

    /// authority 之后的部分（路径与查询），缺省为 `/`。
    pub fn path(&self) -> &str {
        let rest = self.uri.split_once("://").map(|(_, rest)| rest).unwrap_or("");
        match rest.find(['/', '?', '#']) {
            Some(start) if rest[start..].starts_with('/') => &rest[start..],
            _ => "/",
        }
    }

    /// 显式端口，缺省时按 scheme 推导（ws/http → 80，wss/https → 443）。
    pub fn port(&self) -> Option<u16> {
        let authority = self.authority();
        let explicit = match authority.rfind(']') {
            Some(bracket) => authority[bracket + 1..].strip_prefix(':'),
            None => authority.split_once(':').map(|(_, port)| port),
        };
        if let Some(port) = explicit {
            return port.parse().ok();
        }
        match self.scheme().as_str() {
            "ws" | "http" => Some(80),
            "wss" | "https" => Some(443),
            _ => None,
        }
    }
}

impl fmt::Display for UriAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.uri)
    }
}
