pub mod connection;
pub mod pool;

use crate::error::{Error, IoErrorContext, ProtocolError};
use crate::framed::FramedWriter;
use crate::handshake::{handshake, HandshakeInfo};
use crate::logger::process_stderr;
use crate::nar::copy_nar;
use crate::protocol::messages::LogMessage;
use crate::protocol::types::{
    AddPermRootRequest, AddSignaturesRequest, BasicDerivation, BuildDerivationRequest, BuildMode,
    BuildPathsRequest, BuildResult, ClientSettings, GCOptions, GCResult, KeyedBuildResult,
    MissingInfo, PathInfo, QueryValidPathsRequest, VerifyStoreRequest,
};
use crate::protocol::{OpCode, MAX_STRING_SIZE, PROTOCOL_VERSION};
use crate::serialization::{Codec, Deserialize, Serialize};
use bytes::{Bytes, BytesMut};
use connection::{Connection, RawStream};
use std::collections::BTreeMap;
use std::future::Future;
use std::io;
use std::path::Path;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{ready, Context, Poll};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, ReadBuf};
use tokio::net::UnixStream;
use tokio::sync::mpsc::{self, UnboundedSender};
use tokio::sync::{Mutex, OwnedMutexGuard};
use tokio_util::sync::{CancellationToken, PollSender};
use tracing::debug;

/// Copy buffer size for streaming request payloads.
const STREAM_BUF_SIZE: usize = 8192;

/// Chunk size for the NAR download channel.
const NAR_CHUNK_SIZE: usize = 64 * 1024;

/// Chunks buffered between the NAR copier task and the reader. Lets the
/// copier work ahead of the consumer without unbounded memory growth.
const NAR_CHANNEL_CAPACITY: usize = 4;

/// Options for establishing a connection.
#[derive(Debug, Clone)]
pub struct ConnectOptions {
    log_sink: Option<UnboundedSender<LogMessage>>,
    cancel: Option<CancellationToken>,
    max_string_size: u64,
}

impl Default for ConnectOptions {
    fn default() -> Self {
        Self {
            log_sink: None,
            cancel: None,
            max_string_size: MAX_STRING_SIZE,
        }
    }
}

impl ConnectOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Deliver daemon log messages to the given channel. Without a sink,
    /// log messages are silently discarded.
    pub fn log_sink(mut self, sink: UnboundedSender<LogMessage>) -> Self {
        self.log_sink = Some(sink);
        self
    }

    /// Cancel in-flight operations when the token fires. A cancelled
    /// operation returns [`Error::Cancelled`] and leaves the connection
    /// unusable; it should be closed.
    pub fn cancel_token(mut self, token: CancellationToken) -> Self {
        self.cancel = Some(token);
        self
    }

    /// Override the maximum accepted wire string size.
    pub fn max_string_size(mut self, max: u64) -> Self {
        self.max_string_size = max;
        self
    }
}

/// A client for the Nix daemon worker protocol.
///
/// The client owns one connection. It is cheap to clone; clones share the
/// connection and their operations are serialised on it in arrival order.
/// For parallelism open several clients (or use a
/// [`ConnectionPool`](pool::ConnectionPool)).
#[derive(Clone)]
pub struct DaemonClient {
    conn: Arc<Mutex<Connection>>,
    info: HandshakeInfo,
    codec: Codec,
    logs: Option<UnboundedSender<LogMessage>>,
    cancel: Option<CancellationToken>,
}

impl DaemonClient {
    /// Connect to the daemon's Unix socket and perform the handshake.
    pub async fn connect(socket_path: &Path) -> Result<Self, Error> {
        Self::connect_with_options(socket_path, ConnectOptions::default()).await
    }

    pub async fn connect_with_options(
        socket_path: &Path,
        options: ConnectOptions,
    ) -> Result<Self, Error> {
        let stream = UnixStream::connect(socket_path)
            .await
            .io_context("connect to daemon socket")?;
        Self::from_stream(stream, options).await
    }

    /// Build a client over an already-established transport (useful for
    /// testing with in-memory pipes).
    pub async fn from_stream<S>(stream: S, options: ConnectOptions) -> Result<Self, Error>
    where
        S: AsyncRead + AsyncWrite + Send + Unpin + 'static,
    {
        let codec = Codec {
            version: PROTOCOL_VERSION,
            max_string: options.max_string_size,
        };

        let mut conn = Connection::new(Box::new(stream) as Box<dyn RawStream>);
        let info = handshake(
            &mut conn.reader,
            &mut conn.writer,
            options.log_sink.as_ref(),
            codec,
        )
        .await?;

        debug!(version = %info.version, daemon = %info.daemon_version, "connected to nix daemon");

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            codec: Codec {
                version: info.version,
                ..codec
            },
            info,
            logs: options.log_sink,
            cancel: options.cancel,
        })
    }

    /// The handshake information negotiated with the daemon.
    pub fn info(&self) -> &HandshakeInfo {
        &self.info
    }

    /// Shut down the connection. All subsequent operations fail with
    /// [`Error::Closed`]. Idempotent.
    pub async fn close(&self) -> Result<(), Error> {
        let mut conn = self.conn.clone().lock_owned().await;
        if conn.closed {
            return Ok(());
        }
        conn.closed = true;
        conn.writer
            .shutdown()
            .await
            .io_context("shut down connection")?;
        debug!("closed nix daemon connection");
        Ok(())
    }

    /// Whether the connection can still carry operations. Used by the pool
    /// to validate idle connections before reuse.
    pub(crate) fn is_reusable(&self) -> bool {
        match self.conn.try_lock() {
            Ok(conn) => !conn.broken && !conn.closed,
            Err(_) => false,
        }
    }

    // -- engine ------------------------------------------------------------

    /// Acquire the connection for one operation, honouring cancellation and
    /// the health flags.
    async fn lock(&self) -> Result<OwnedMutexGuard<Connection>, Error> {
        let guard = match &self.cancel {
            Some(token) if token.is_cancelled() => return Err(Error::Cancelled),
            Some(token) => {
                tokio::select! {
                    biased;
                    _ = token.cancelled() => return Err(Error::Cancelled),
                    guard = self.conn.clone().lock_owned() => guard,
                }
            }
            None => self.conn.clone().lock_owned().await,
        };

        if guard.closed {
            return Err(Error::Closed);
        }
        if guard.broken {
            return Err(Error::Broken);
        }
        Ok(guard)
    }

    /// Race a protocol phase against the cancellation token.
    async fn run_cancellable<T>(
        &self,
        fut: impl Future<Output = Result<T, Error>>,
    ) -> Result<T, Error> {
        match &self.cancel {
            Some(token) => {
                tokio::select! {
                    biased;
                    _ = token.cancelled() => Err(Error::Cancelled),
                    result = fut => result,
                }
            }
            None => fut.await,
        }
    }

    /// Clear the in-flight mark when the operation left the wire in sync: on
    /// success, or on a clean in-band daemon error.
    fn finish<T>(conn: &mut Connection, result: Result<T, Error>) -> Result<T, Error> {
        match &result {
            Ok(_) | Err(Error::Daemon(_)) => conn.broken = false,
            Err(_) => {}
        }
        result
    }

    /// Execute a simple request/response operation: write the op code and
    /// request, flush, drain stderr, read the response. The connection lock
    /// is held for the whole exchange.
    async fn do_op<Req, Resp>(&self, op: OpCode, req: &Req) -> Result<Resp, Error>
    where
        Req: Serialize + ?Sized,
        Resp: Deserialize,
    {
        let mut conn = self.lock().await?;
        conn.broken = true;
        let codec = self.codec;

        let result = self
            .run_cancellable(async {
                let Connection { reader, writer, .. } = &mut *conn;

                (op as u64)
                    .serialize(writer, codec)
                    .await
                    .io_context(format_args!("{op} write op"))?;
                req.serialize(writer, codec)
                    .await
                    .io_context(format_args!("{op} write request"))?;
                writer
                    .flush()
                    .await
                    .io_context(format_args!("{op} flush"))?;

                process_stderr(reader, self.logs.as_ref(), codec).await?;

                let resp = Resp::deserialize(reader, codec)
                    .await
                    .io_context(format_args!("{op} read response"))?;
                Ok(resp)
            })
            .await;

        Self::finish(&mut conn, result)
    }

    /// Execute a streaming-request operation: write the preamble, flush,
    /// stream `source` through a framed writer, then drain stderr. Used by
    /// `AddToStoreNar` and `AddBuildLog`; `AddMultipleToStore` has its own
    /// body because the framed section is structured.
    async fn do_streaming_op<R>(
        &self,
        op: OpCode,
        preamble: &[u8],
        mut source: R,
    ) -> Result<(), Error>
    where
        R: AsyncRead + Unpin,
    {
        let mut conn = self.lock().await?;
        conn.broken = true;
        let codec = self.codec;

        let result = self
            .run_cancellable(async {
                let Connection { reader, writer, .. } = &mut *conn;

                (op as u64)
                    .serialize(writer, codec)
                    .await
                    .io_context(format_args!("{op} write op"))?;
                writer
                    .write_all(preamble)
                    .await
                    .io_context(format_args!("{op} write request"))?;
                writer
                    .flush()
                    .await
                    .io_context(format_args!("{op} flush"))?;

                let mut framed = FramedWriter::new(&mut *writer);
                let mut buf = [0u8; STREAM_BUF_SIZE];
                loop {
                    let n = source
                        .read(&mut buf)
                        .await
                        .io_context(format_args!("{op} read source"))?;
                    if n == 0 {
                        break;
                    }
                    framed
                        .write(&buf[..n])
                        .await
                        .io_context(format_args!("{op} stream data"))?;
                }
                framed
                    .close()
                    .await
                    .io_context(format_args!("{op} close framed stream"))?;
                drop(framed);

                writer
                    .flush()
                    .await
                    .io_context(format_args!("{op} flush stream"))?;

                process_stderr(reader, self.logs.as_ref(), codec).await?;
                Ok(())
            })
            .await;

        Self::finish(&mut conn, result)
    }

    /// Serialize a value into an in-memory buffer with this connection's
    /// codec.
    async fn encode<T: Serialize + ?Sized>(&self, value: &T) -> Result<Vec<u8>, ProtocolError> {
        let mut buf = Vec::new();
        value.serialize(&mut buf, self.codec).await?;
        Ok(buf)
    }

    // -- queries -----------------------------------------------------------

    /// Check whether the given store path is valid (exists in the store).
    pub async fn is_valid_path(&self, path: &str) -> Result<bool, Error> {
        self.do_op::<str, bool>(OpCode::IsValidPath, path).await
    }

    /// Retrieve the metadata for a store path. A path that is not in the
    /// store yields `Ok(None)`, not an error.
    pub async fn query_path_info(&self, path: &str) -> Result<Option<PathInfo>, Error> {
        self.do_op::<str, Option<PathInfo>>(OpCode::QueryPathInfo, path)
            .await
    }

    /// Look up a store path by its hash part. `Ok(None)` if nothing matches.
    pub async fn query_path_from_hash_part(
        &self,
        hash_part: &str,
    ) -> Result<Option<String>, Error> {
        // The daemon signals "not found" with an empty string.
        let path = self
            .do_op::<str, String>(OpCode::QueryPathFromHashPart, hash_part)
            .await?;
        Ok((!path.is_empty()).then_some(path))
    }

    /// All valid store paths known to the daemon.
    pub async fn query_all_valid_paths(&self) -> Result<Vec<String>, Error> {
        self.do_op::<(), Vec<String>>(OpCode::QueryAllValidPaths, &())
            .await
    }

    /// The subset of `paths` that are valid. With `substitute`, the daemon
    /// may try to substitute missing paths first.
    pub async fn query_valid_paths(
        &self,
        paths: &[String],
        substitute: bool,
    ) -> Result<Vec<String>, Error> {
        let req = QueryValidPathsRequest { paths, substitute };
        self.do_op(OpCode::QueryValidPaths, &req).await
    }

    /// The subset of `paths` available from a substituter.
    pub async fn query_substitutable_paths(&self, paths: &[String]) -> Result<Vec<String>, Error> {
        self.do_op::<[String], Vec<String>>(OpCode::QuerySubstitutablePaths, paths)
            .await
    }

    /// The derivations known to have produced the given store path.
    pub async fn query_valid_derivers(&self, path: &str) -> Result<Vec<String>, Error> {
        self.do_op::<str, Vec<String>>(OpCode::QueryValidDerivers, path)
            .await
    }

    /// The store paths that reference (depend on) the given path.
    pub async fn query_referrers(&self, path: &str) -> Result<Vec<String>, Error> {
        self.do_op::<str, Vec<String>>(OpCode::QueryReferrers, path)
            .await
    }

    /// Output name to store path for the given derivation.
    pub async fn query_derivation_output_map(
        &self,
        drv_path: &str,
    ) -> Result<BTreeMap<String, String>, Error> {
        self.do_op::<str, BTreeMap<String, String>>(OpCode::QueryDerivationOutputMap, drv_path)
            .await
    }

    /// Which of `paths` need building or substitution, and the expected
    /// download and unpacked sizes.
    pub async fn query_missing(&self, paths: &[String]) -> Result<MissingInfo, Error> {
        self.do_op::<[String], MissingInfo>(OpCode::QueryMissing, paths)
            .await
    }

    /// Content-addressed realisations registered for the given output id.
    pub async fn query_realisation(&self, output_id: &str) -> Result<Vec<String>, Error> {
        self.do_op::<str, Vec<String>>(OpCode::QueryRealisation, output_id)
            .await
    }

    // -- builds ------------------------------------------------------------

    /// Build the given derivation or store paths.
    pub async fn build_paths(&self, paths: &[String], mode: BuildMode) -> Result<(), Error> {
        let req = BuildPathsRequest { paths, mode };
        // The daemon acknowledges with a single word.
        let _: u64 = self.do_op(OpCode::BuildPaths, &req).await?;
        Ok(())
    }

    /// Like [`build_paths`](Self::build_paths), but returns a
    /// [`KeyedBuildResult`] per derived path.
    pub async fn build_paths_with_results(
        &self,
        paths: &[String],
        mode: BuildMode,
    ) -> Result<Vec<KeyedBuildResult>, Error> {
        let req = BuildPathsRequest { paths, mode };
        self.do_op(OpCode::BuildPathsWithResults, &req).await
    }

    /// Build a single derivation from its definition.
    pub async fn build_derivation(
        &self,
        drv_path: &str,
        derivation: &BasicDerivation,
        mode: BuildMode,
    ) -> Result<BuildResult, Error> {
        let req = BuildDerivationRequest {
            drv_path,
            derivation,
            mode,
        };
        self.do_op(OpCode::BuildDerivation, &req).await
    }

    /// Ensure the given store path is valid, building or substituting it if
    /// necessary.
    pub async fn ensure_path(&self, path: &str) -> Result<(), Error> {
        let _: u64 = self.do_op::<str, u64>(OpCode::EnsurePath, path).await?;
        Ok(())
    }

    // -- store modification ------------------------------------------------

    /// Import a NAR into the store. `info` describes the path; `source`
    /// provides the NAR bytes, streamed to the daemon in framed chunks.
    pub async fn add_to_store_nar<R>(
        &self,
        path: &str,
        info: &PathInfo,
        source: R,
        repair: bool,
        dont_check_sigs: bool,
    ) -> Result<(), Error>
    where
        R: AsyncRead + Unpin,
    {
        let mut preamble = self.encode(path).await?;
        preamble.extend(self.encode(info).await?);
        preamble.extend(self.encode(&repair).await?);
        preamble.extend(self.encode(&dont_check_sigs).await?);
        self.do_streaming_op(OpCode::AddToStoreNar, &preamble, source)
            .await
    }

    /// Import several store paths in one operation. The `repair` and
    /// `dont_check_sigs` flags travel outside the framed stream; the item
    /// count and every item (keyed path info, then raw NAR bytes) travel
    /// inside a single framed stream.
    pub async fn add_multiple_to_store<R>(
        &self,
        items: Vec<AddToStoreItem<R>>,
        repair: bool,
        dont_check_sigs: bool,
    ) -> Result<(), Error>
    where
        R: AsyncRead + Unpin,
    {
        let op = OpCode::AddMultipleToStore;
        let mut conn = self.lock().await?;
        conn.broken = true;
        let codec = self.codec;

        let result = self
            .run_cancellable(async {
                let Connection { reader, writer, .. } = &mut *conn;

                (op as u64)
                    .serialize(writer, codec)
                    .await
                    .io_context(format_args!("{op} write op"))?;
                repair
                    .serialize(writer, codec)
                    .await
                    .io_context(format_args!("{op} write repair"))?;
                dont_check_sigs
                    .serialize(writer, codec)
                    .await
                    .io_context(format_args!("{op} write dontCheckSigs"))?;
                writer
                    .flush()
                    .await
                    .io_context(format_args!("{op} flush"))?;

                let mut framed = FramedWriter::new(&mut *writer);

                let mut header = Vec::new();
                (items.len() as u64).serialize(&mut header, codec).await?;
                framed
                    .write(&header)
                    .await
                    .io_context(format_args!("{op} write count"))?;

                for mut item in items {
                    let mut header = Vec::new();
                    item.path.serialize(&mut header, codec).await?;
                    item.info.serialize(&mut header, codec).await?;
                    framed
                        .write(&header)
                        .await
                        .io_context(format_args!("{op} write path info"))?;

                    let mut buf = [0u8; STREAM_BUF_SIZE];
                    loop {
                        let n = item
                            .source
                            .read(&mut buf)
                            .await
                            .io_context(format_args!("{op} read source"))?;
                        if n == 0 {
                            break;
                        }
                        framed
                            .write(&buf[..n])
                            .await
                            .io_context(format_args!("{op} stream NAR"))?;
                    }
                }

                framed
                    .close()
                    .await
                    .io_context(format_args!("{op} close framed stream"))?;
                drop(framed);

                writer
                    .flush()
                    .await
                    .io_context(format_args!("{op} flush stream"))?;

                process_stderr(reader, self.logs.as_ref(), codec).await?;
                Ok(())
            })
            .await;

        Self::finish(&mut conn, result)
    }

    /// Upload a build log for the given derivation path.
    pub async fn add_build_log<R>(&self, drv_path: &str, log: R) -> Result<(), Error>
    where
        R: AsyncRead + Unpin,
    {
        let preamble = self.encode(drv_path).await?;
        self.do_streaming_op(OpCode::AddBuildLog, &preamble, log)
            .await
    }

    /// Attach signatures to a store path.
    pub async fn add_signatures(&self, path: &str, sigs: &[String]) -> Result<(), Error> {
        let req = AddSignaturesRequest { path, sigs };
        self.do_op::<_, ()>(OpCode::AddSignatures, &req).await
    }

    /// Register a content-addressed realisation for a derivation output.
    pub async fn register_drv_output(&self, realisation: &str) -> Result<(), Error> {
        self.do_op::<str, ()>(OpCode::RegisterDrvOutput, realisation)
            .await
    }

    // -- GC roots and maintenance -------------------------------------------

    /// Add a temporary GC root for the duration of the daemon session.
    pub async fn add_temp_root(&self, path: &str) -> Result<(), Error> {
        self.do_op::<str, ()>(OpCode::AddTempRoot, path).await
    }

    /// Add an indirect GC root: a symlink outside the store pointing at a
    /// store path.
    pub async fn add_indirect_root(&self, path: &str) -> Result<(), Error> {
        self.do_op::<str, ()>(OpCode::AddIndirectRoot, path).await
    }

    /// Add a permanent GC root linking `gc_root` to `store_path`. Returns
    /// the resulting root path.
    pub async fn add_perm_root(&self, store_path: &str, gc_root: &str) -> Result<String, Error> {
        let req = AddPermRootRequest {
            store_path,
            gc_root,
        };
        self.do_op(OpCode::AddPermRoot, &req).await
    }

    /// The GC roots known to the daemon, as a map from root link path to
    /// store path.
    pub async fn find_roots(&self) -> Result<BTreeMap<String, String>, Error> {
        self.do_op::<(), BTreeMap<String, String>>(OpCode::FindRoots, &())
            .await
    }

    /// Run the garbage collector.
    pub async fn collect_garbage(&self, options: &GCOptions) -> Result<GCResult, Error> {
        self.do_op(OpCode::CollectGarbage, options).await
    }

    /// Optimise the store by hard-linking identical files.
    pub async fn optimise_store(&self) -> Result<(), Error> {
        self.do_op::<(), ()>(OpCode::OptimiseStore, &()).await
    }

    /// Check store consistency. Returns whether errors were found.
    pub async fn verify_store(&self, check_contents: bool, repair: bool) -> Result<bool, Error> {
        let req = VerifyStoreRequest {
            check_contents,
            repair,
        };
        self.do_op(OpCode::VerifyStore, &req).await
    }

    /// Send the client build settings to the daemon. Typically called once
    /// after connecting.
    pub async fn set_options(&self, settings: &ClientSettings) -> Result<(), Error> {
        self.do_op::<_, ()>(OpCode::SetOptions, settings).await
    }

    // -- NAR download --------------------------------------------------------

    /// Stream the NAR serialisation of a store path.
    ///
    /// The returned reader owns the connection for as long as it lives: the
    /// daemon sends the archive as raw self-delimiting bytes, so a
    /// background task parses it structurally and forwards the bytes
    /// through a bounded channel. Reading the archive to completion (or
    /// dropping the reader) releases the connection; a dropped reader
    /// leaves it broken, a fully-read one leaves it reusable.
    pub async fn nar_from_path(&self, path: &str) -> Result<NarReader, Error> {
        let op = OpCode::NarFromPath;
        let mut conn = self.lock().await?;
        conn.broken = true;
        let codec = self.codec;

        let result = self
            .run_cancellable(async {
                let Connection { reader, writer, .. } = &mut *conn;

                (op as u64)
                    .serialize(writer, codec)
                    .await
                    .io_context(format_args!("{op} write op"))?;
                path.serialize(writer, codec)
                    .await
                    .io_context(format_args!("{op} write path"))?;
                writer
                    .flush()
                    .await
                    .io_context(format_args!("{op} flush"))?;

                process_stderr(reader, self.logs.as_ref(), codec).await?;
                Ok(())
            })
            .await;

        if let Err(err) = result {
            if matches!(err, Error::Daemon(_)) {
                conn.broken = false;
            }
            return Err(err);
        }

        let (tx, rx) = mpsc::channel(NAR_CHANNEL_CAPACITY);
        let cancel = self.cancel.clone();

        tokio::spawn(async move {
            let Connection { reader, broken, .. } = &mut *conn;

            let copy = async {
                let mut sink = ChunkWriter::new(PollSender::new(tx.clone()), NAR_CHUNK_SIZE);
                copy_nar(&mut sink, reader).await?;
                sink.flush().await.io_context("flush NAR chunk")?;
                Ok::<(), ProtocolError>(())
            };

            let result = match &cancel {
                Some(token) => {
                    tokio::select! {
                        biased;
                        _ = token.cancelled() => Err(ProtocolError::io(
                            "NAR download",
                            io::Error::new(io::ErrorKind::Interrupted, "operation cancelled"),
                        )),
                        result = copy => result,
                    }
                }
                None => copy.await,
            };

            match result {
                Ok(()) => *broken = false,
                Err(err) => {
                    debug!("NAR download ended early: {err}");
                    let _ = tx.send(Err(io::Error::other(err))).await;
                }
            }
            // The guard drops here, releasing the connection.
        });

        Ok(NarReader {
            rx,
            chunk: Bytes::new(),
        })
    }
}

/// One store path to import via
/// [`add_multiple_to_store`](DaemonClient::add_multiple_to_store).
pub struct AddToStoreItem<R> {
    pub path: String,
    pub info: PathInfo,
    pub source: R,
}

/// Streaming reader over a NAR download; see
/// [`DaemonClient::nar_from_path`].
///
/// Yields exactly the archive's bytes and then EOF. Errors from the
/// underlying parse (or a fired cancellation token) surface as
/// `io::Error`s.
pub struct NarReader {
    rx: mpsc::Receiver<io::Result<Bytes>>,
    chunk: Bytes,
}

impl AsyncRead for NarReader {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        loop {
            if !this.chunk.is_empty() {
                let n = this.chunk.len().min(buf.remaining());
                buf.put_slice(&this.chunk.split_to(n));
                return Poll::Ready(Ok(()));
            }

            match ready!(this.rx.poll_recv(cx)) {
                Some(Ok(chunk)) => this.chunk = chunk,
                Some(Err(err)) => return Poll::Ready(Err(err)),
                None => return Poll::Ready(Ok(())),
            }
        }
    }
}

/// An `AsyncWrite` that freezes its buffer into [`Bytes`] chunks and sends
/// them through a bounded channel. A full channel exerts back-pressure on
/// the copier via `Poll::Pending`; a dropped receiver surfaces as
/// `BrokenPipe`.
struct ChunkWriter {
    sender: PollSender<io::Result<Bytes>>,
    buf: BytesMut,
    chunk_size: usize,
}

impl ChunkWriter {
    fn new(sender: PollSender<io::Result<Bytes>>, chunk_size: usize) -> Self {
        Self {
            sender,
            buf: BytesMut::with_capacity(chunk_size),
            chunk_size,
        }
    }

    fn poll_emit_chunk(&mut self, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        if self.buf.is_empty() {
            return Poll::Ready(Ok(()));
        }

        ready!(self.sender.poll_reserve(cx))
            .map_err(|_| io::Error::new(io::ErrorKind::BrokenPipe, "NAR reader dropped"))?;

        let chunk = std::mem::replace(&mut self.buf, BytesMut::with_capacity(self.chunk_size));
        self.sender
            .send_item(Ok(chunk.freeze()))
            .map_err(|_| io::Error::new(io::ErrorKind::BrokenPipe, "NAR reader dropped"))?;
        Poll::Ready(Ok(()))
    }
}

impl AsyncWrite for ChunkWriter {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        let this = self.get_mut();
        if this.buf.len() >= this.chunk_size {
            ready!(this.poll_emit_chunk(cx))?;
        }

        let n = buf.len().min(this.chunk_size - this.buf.len());
        this.buf.extend_from_slice(&buf[..n]);
        Poll::Ready(Ok(n))
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        ready!(this.poll_emit_chunk(cx))?;
        Poll::Ready(Ok(()))
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        self.poll_flush(cx)
    }
}
