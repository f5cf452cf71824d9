//! Windows 平台：原生命名管道。

use std::{io, mem};

use async_trait::async_trait;
use conduit_core::{ImpersonationLevel, PipeAddress, TransportError, map_io_error};
use tokio::{
    net::windows::named_pipe::{ClientOptions, NamedPipeClient, NamedPipeServer, ServerOptions},
    sync::Mutex,
};

use crate::{
    connect::{Attempt, PipeOpener},
    error,
};

pub(crate) type ClientStream = NamedPipeClient;
pub(crate) type ServerStream = NamedPipeServer;

/// `ERROR_FILE_NOT_FOUND`
const FILE_NOT_FOUND: i32 = 2;
/// `ERROR_PIPE_BUSY`：所有实例都在服务其他客户端。
const PIPE_BUSY: i32 = 231;

const SECURITY_ANONYMOUS: u32 = 0;
const SECURITY_IDENTIFICATION: u32 = 1 << 16;
const SECURITY_IMPERSONATION: u32 = 2 << 16;
const SECURITY_DELEGATION: u32 = 3 << 16;

/// 原生命名管道可访问远端服务器，不做预检查。
pub(crate) fn check_supported(_: &PipeAddress) -> Result<(), TransportError> {
    Ok(())
}

fn qos_flags(level: ImpersonationLevel) -> u32 {
    match level {
        ImpersonationLevel::Anonymous => SECURITY_ANONYMOUS,
        ImpersonationLevel::Identification => SECURITY_IDENTIFICATION,
        ImpersonationLevel::Impersonation => SECURITY_IMPERSONATION,
        ImpersonationLevel::Delegation => SECURITY_DELEGATION,
    }
}

/// 单次尝试打开客户端句柄；管道忙或尚未创建时返回未就绪。
#[derive(Clone, Copy, Debug, Default)]
pub struct PlatformOpener;

#[async_trait]
impl PipeOpener for PlatformOpener {
    type Stream = ClientStream;

    async fn try_open(&self, address: &PipeAddress) -> Attempt<ClientStream> {
        let result = ClientOptions::new()
            .security_qos_flags(qos_flags(address.security().impersonation))
            .open(address.path());
        match result {
            Ok(client) => Attempt::Ready(client),
            Err(err) if matches!(err.raw_os_error(), Some(PIPE_BUSY | FILE_NOT_FOUND)) => {
                Attempt::NotReady
            }
            Err(err) => Attempt::Failed(err),
        }
    }
}

/// 服务端总是预先持有一个等待中的实例，`accept` 成功后立即创建下一个。
#[derive(Debug)]
pub(crate) struct PlatformListener {
    path: String,
    write_through: bool,
    pending: Mutex<NamedPipeServer>,
}

impl PlatformListener {
    pub(crate) fn bind(address: &PipeAddress) -> Result<Self, TransportError> {
        let path = address.path();
        let write_through = address.security().write_through;
        let first = create_instance(&path, write_through, true)
            .map_err(|err| map_io_error(error::BIND, err))?;
        Ok(Self {
            path,
            write_through,
            pending: Mutex::new(first),
        })
    }

    pub(crate) async fn accept(&self) -> Result<ServerStream, TransportError> {
        let mut pending = self.pending.lock().await;
        pending
            .connect()
            .await
            .map_err(|err| map_io_error(error::ACCEPT, err))?;
        let next = create_instance(&self.path, self.write_through, false)
            .map_err(|err| map_io_error(error::ACCEPT, err))?;
        Ok(mem::replace(&mut *pending, next))
    }
}

fn create_instance(path: &str, write_through: bool, first: bool) -> io::Result<NamedPipeServer> {
    ServerOptions::new()
        .first_pipe_instance(first)
        .write_through(write_through)
        .create(path)
}
