use tokio::io::{AsyncRead, AsyncWrite, BufReader, BufWriter, ReadHalf, WriteHalf};

/// Buffer size for the connection's reader and writer.
pub(crate) const CONN_BUF_SIZE: usize = 32 * 1024;

/// Object-safe alias for the underlying transport, so the client works over
/// Unix sockets, TCP, or in-memory pipes alike.
pub(crate) trait RawStream: AsyncRead + AsyncWrite + Send + Unpin {}

impl<T: AsyncRead + AsyncWrite + Send + Unpin> RawStream for T {}

/// The mutable half of a client: the buffered stream halves plus the health
/// flags. Lives behind the connection mutex; the mutex is held for the whole
/// `[write op code, finish reading response]` interval of each operation.
pub(crate) struct Connection {
    pub(crate) reader: BufReader<ReadHalf<Box<dyn RawStream>>>,
    pub(crate) writer: BufWriter<WriteHalf<Box<dyn RawStream>>>,
    /// Set while a request is in flight and cleared when its response phase
    /// completes. An operation that finds it already set knows an earlier
    /// operation died mid-wire and the byte stream cannot be trusted.
    pub(crate) broken: bool,
    /// Set by `close`; every later operation fails.
    pub(crate) closed: bool,
}

impl Connection {
    pub(crate) fn new(stream: Box<dyn RawStream>) -> Self {
        let (read_half, write_half) = tokio::io::split(stream);
        Self {
            reader: BufReader::with_capacity(CONN_BUF_SIZE, read_half),
            writer: BufWriter::with_capacity(CONN_BUF_SIZE, write_half),
            broken: false,
            closed: false,
        }
    }
}
