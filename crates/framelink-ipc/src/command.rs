use framelink_frame::{Request, RequestKind};

/// A command sent by another process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RemoteCommand {
    /// Close the source with this name.
    Close(String),
    CloseAll,
    /// Report the trace position, optionally of one named source.
    TracePosition(Option<String>),
}

impl RemoteCommand {
    /// `None` for a close request without a name.
    pub fn from_request(request: Request) -> Option<Self> {
        match request.kind {
            RequestKind::Close => request.arg.map(Self::Close),
            RequestKind::CloseAll => Some(Self::CloseAll),
            RequestKind::TracePosition => Some(Self::TracePosition(request.arg)),
        }
    }

    pub fn into_request(self) -> Request {
        let (kind, arg) = match self {
            Self::Close(name) => (RequestKind::Close, Some(name)),
            Self::CloseAll => (RequestKind::CloseAll, None),
            Self::TracePosition(name) => (RequestKind::TracePosition, name),
        };
        Request { kind, arg }
    }
}
