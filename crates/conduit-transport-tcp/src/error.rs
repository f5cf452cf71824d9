use conduit_core::OperationKind;

pub(crate) const CONNECT: OperationKind =
    OperationKind::new("conduit.tcp.connect_failed", "tcp connect");
pub(crate) const BIND: OperationKind = OperationKind::new("conduit.tcp.bind_failed", "tcp bind");
pub(crate) const ACCEPT: OperationKind =
    OperationKind::new("conduit.tcp.accept_failed", "tcp accept");
pub(crate) const READ: OperationKind = OperationKind::new("conduit.tcp.read_failed", "tcp read");
pub(crate) const WRITE: OperationKind =
    OperationKind::new("conduit.tcp.write_failed", "tcp write");
pub(crate) const CONFIGURE: OperationKind =
    OperationKind::new("conduit.tcp.configure_failed", "tcp socket configure");
