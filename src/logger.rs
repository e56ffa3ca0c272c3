//! The stderr dispatcher: consumes the daemon's interleaved log stream
//! between a request flush and the response body.

use crate::error::{DaemonError, Error, IoErrorContext, ProtocolError, Trace};
use crate::protocol::messages::{
    Activity, ActivityResult, ActivityType, LogField, LogMessage, LogTag, ResultType, Verbosity,
};
use crate::serialization::{Codec, Deserialize};
use tokio::io::AsyncRead;
use tokio::sync::mpsc::UnboundedSender;

/// Read and dispatch stderr messages until the `Last` terminator.
///
/// Non-error messages go to `sink`; a `None` sink (or a sink whose receiver
/// is gone) discards them. An `Error` message decodes into a
/// [`DaemonError`] and is returned as the result; the connection remains in
/// sync afterwards, since the daemon ends the request on it. Every other
/// outcome that is not `Ok` is a protocol error and the connection should be
/// closed.
pub async fn process_stderr<R: AsyncRead + Unpin>(
    reader: &mut R,
    sink: Option<&UnboundedSender<LogMessage>>,
    codec: Codec,
) -> Result<(), Error> {
    loop {
        let raw = u64::deserialize(reader, codec)
            .await
            .io_context("read stderr message tag")?;
        let tag = LogTag::try_from(raw)?;

        let message = match tag {
            LogTag::Last => return Ok(()),
            LogTag::Error => return Err(Error::Daemon(read_daemon_error(reader, codec).await?)),

            LogTag::Next => {
                let text = String::deserialize(reader, codec)
                    .await
                    .io_context("read log line")?;
                LogMessage::Next(text)
            }

            LogTag::StartActivity => LogMessage::StartActivity(read_activity(reader, codec).await?),

            LogTag::StopActivity => {
                let id = u64::deserialize(reader, codec)
                    .await
                    .io_context("read stop activity id")?;
                LogMessage::StopActivity(id)
            }

            LogTag::Result => LogMessage::Result(read_activity_result(reader, codec).await?),

            LogTag::Read | LogTag::Write => {
                // Byte counters: consume and discard.
                u64::deserialize(reader, codec)
                    .await
                    .io_context("read transfer count")?;
                continue;
            }
        };

        if let Some(sink) = sink {
            // A dropped receiver means the caller stopped listening; that is
            // not an error for the protocol.
            let _ = sink.send(message);
        }
    }
}

async fn read_daemon_error<R: AsyncRead + Unpin>(
    reader: &mut R,
    codec: Codec,
) -> Result<DaemonError, ProtocolError> {
    let kind = String::deserialize(reader, codec)
        .await
        .io_context("read error type")?;
    let level = u64::deserialize(reader, codec)
        .await
        .io_context("read error level")?;
    let name = String::deserialize(reader, codec)
        .await
        .io_context("read error name")?;
    let message = String::deserialize(reader, codec)
        .await
        .io_context("read error message")?;

    // havePos carries no structured position in this protocol version, but
    // must be consumed.
    u64::deserialize(reader, codec)
        .await
        .io_context("read error havePos")?;

    let nr_traces = u64::deserialize(reader, codec)
        .await
        .io_context("read error trace count")?;
    let mut traces = Vec::new();
    for _ in 0..nr_traces {
        let have_pos = u64::deserialize(reader, codec)
            .await
            .io_context("read trace havePos")?;
        let message = String::deserialize(reader, codec)
            .await
            .io_context("read trace message")?;
        traces.push(Trace { have_pos, message });
    }

    Ok(DaemonError {
        kind,
        level,
        name,
        message,
        traces,
    })
}

async fn read_activity<R: AsyncRead + Unpin>(
    reader: &mut R,
    codec: Codec,
) -> Result<Activity, ProtocolError> {
    let id = u64::deserialize(reader, codec)
        .await
        .io_context("read activity id")?;
    let level = u64::deserialize(reader, codec)
        .await
        .io_context("read activity level")?;
    let kind = u64::deserialize(reader, codec)
        .await
        .io_context("read activity type")?;
    let text = String::deserialize(reader, codec)
        .await
        .io_context("read activity text")?;
    let fields = read_fields(reader, codec).await?;
    let parent = u64::deserialize(reader, codec)
        .await
        .io_context("read activity parent")?;

    Ok(Activity {
        id,
        level: Verbosity::try_from(level)?,
        kind: ActivityType::try_from(kind)?,
        text,
        fields,
        parent,
    })
}

async fn read_activity_result<R: AsyncRead + Unpin>(
    reader: &mut R,
    codec: Codec,
) -> Result<ActivityResult, ProtocolError> {
    let id = u64::deserialize(reader, codec)
        .await
        .io_context("read result id")?;
    let kind = u64::deserialize(reader, codec)
        .await
        .io_context("read result type")?;
    let fields = read_fields(reader, codec).await?;

    Ok(ActivityResult {
        id,
        kind: ResultType::try_from(kind)?,
        fields,
    })
}

/// A field sequence: a count word, then per field a type tag (0 = int,
/// 1 = string) and the payload. A zero count is routine.
async fn read_fields<R: AsyncRead + Unpin>(
    reader: &mut R,
    codec: Codec,
) -> Result<Vec<LogField>, ProtocolError> {
    let count = u64::deserialize(reader, codec)
        .await
        .io_context("read field count")?;

    let mut fields = Vec::new();
    for _ in 0..count {
        let tag = u64::deserialize(reader, codec)
            .await
            .io_context("read field type")?;
        let field = match tag {
            0 => LogField::Int(
                u64::deserialize(reader, codec)
                    .await
                    .io_context("read int field")?,
            ),
            1 => LogField::String(
                String::deserialize(reader, codec)
                    .await
                    .io_context("read string field")?,
            ),
            other => return Err(ProtocolError::UnknownFieldType(other)),
        };
        fields.push(field);
    }
    Ok(fields)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::serialization::Serialize;
    use std::io::Cursor;
    use tokio::sync::mpsc;

    fn codec() -> Codec {
        Codec::default()
    }

    async fn put_word(buf: &mut Vec<u8>, value: u64) {
        value.serialize(buf, codec()).await.unwrap();
    }

    async fn put_str(buf: &mut Vec<u8>, value: &str) {
        value.serialize(buf, codec()).await.unwrap();
    }

    async fn drain(
        buf: Vec<u8>,
    ) -> (Result<(), Error>, Vec<LogMessage>, u64) {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut cursor = Cursor::new(buf);
        let result = process_stderr(&mut cursor, Some(&tx), codec()).await;
        drop(tx);
        let mut messages = Vec::new();
        while let Some(m) = rx.recv().await {
            messages.push(m);
        }
        (result, messages, cursor.position())
    }

    #[tokio::test]
    async fn last_terminates_immediately() {
        let mut buf = Vec::new();
        put_word(&mut buf, LogTag::Last as u64).await;
        let (result, messages, _) = drain(buf).await;
        assert!(result.is_ok());
        assert!(messages.is_empty());
    }

    #[tokio::test]
    async fn next_delivers_text() {
        let mut buf = Vec::new();
        put_word(&mut buf, LogTag::Next as u64).await;
        put_str(&mut buf, "building '/nix/store/x'...").await;
        put_word(&mut buf, LogTag::Last as u64).await;

        let (result, messages, _) = drain(buf).await;
        assert!(result.is_ok());
        assert_eq!(
            messages,
            vec![LogMessage::Next("building '/nix/store/x'...".to_string())]
        );
    }

    #[tokio::test]
    async fn error_surfaces_daemon_error_with_traces() {
        let mut buf = Vec::new();
        put_word(&mut buf, LogTag::Error as u64).await;
        put_str(&mut buf, "Error").await;
        put_word(&mut buf, 0).await; // level
        put_str(&mut buf, "X").await;
        put_str(&mut buf, "not valid").await;
        put_word(&mut buf, 0).await; // havePos
        put_word(&mut buf, 2).await; // traces
        put_word(&mut buf, 0).await;
        put_str(&mut buf, "in m").await;
        put_word(&mut buf, 1).await;
        put_str(&mut buf, "at n").await;

        let (result, messages, pos) = drain(buf).await;
        let err = match result.unwrap_err() {
            Error::Daemon(err) => err,
            other => panic!("expected daemon error, got {other:?}"),
        };
        assert_eq!(err.kind, "Error");
        assert_eq!(err.name, "X");
        assert_eq!(err.message, "not valid");
        assert_eq!(
            err.traces,
            vec![
                Trace {
                    have_pos: 0,
                    message: "in m".to_string()
                },
                Trace {
                    have_pos: 1,
                    message: "at n".to_string()
                },
            ]
        );
        assert!(messages.is_empty());
        // The dispatcher consumed the whole error record, leaving the stream
        // positioned after it.
        assert_eq!(pos, 136);
    }

    #[tokio::test]
    async fn activity_lifecycle_delivered_in_order() {
        let mut buf = Vec::new();

        put_word(&mut buf, LogTag::StartActivity as u64).await;
        put_word(&mut buf, 1).await; // id
        put_word(&mut buf, 3).await; // level: Info
        put_word(&mut buf, 105).await; // type: Builds
        put_str(&mut buf, "building").await;
        put_word(&mut buf, 2).await; // two fields
        put_word(&mut buf, 0).await;
        put_word(&mut buf, 42).await;
        put_word(&mut buf, 1).await;
        put_str(&mut buf, "out").await;
        put_word(&mut buf, 0).await; // parent

        put_word(&mut buf, LogTag::Result as u64).await;
        put_word(&mut buf, 1).await; // id
        put_word(&mut buf, 105).await; // type: Progress
        put_word(&mut buf, 0).await; // no fields

        put_word(&mut buf, LogTag::StopActivity as u64).await;
        put_word(&mut buf, 1).await;

        put_word(&mut buf, LogTag::Last as u64).await;

        let (result, messages, _) = drain(buf).await;
        assert!(result.is_ok());
        assert_eq!(messages.len(), 3);
        match &messages[0] {
            LogMessage::StartActivity(act) => {
                assert_eq!(act.id, 1);
                assert_eq!(act.level, Verbosity::Info);
                assert_eq!(act.kind, ActivityType::Builds);
                assert_eq!(act.text, "building");
                assert_eq!(
                    act.fields,
                    vec![LogField::Int(42), LogField::String("out".to_string())]
                );
                assert_eq!(act.parent, 0);
            }
            other => panic!("expected StartActivity, got {other:?}"),
        }
        match &messages[1] {
            LogMessage::Result(r) => {
                assert_eq!(r.id, 1);
                assert_eq!(r.kind, ResultType::Progress);
                assert!(r.fields.is_empty());
            }
            other => panic!("expected Result, got {other:?}"),
        }
        assert_eq!(messages[2], LogMessage::StopActivity(1));
    }

    #[tokio::test]
    async fn read_write_counters_dropped() {
        let mut buf = Vec::new();
        put_word(&mut buf, LogTag::Read as u64).await;
        put_word(&mut buf, 8192).await;
        put_word(&mut buf, LogTag::Write as u64).await;
        put_word(&mut buf, 4096).await;
        put_word(&mut buf, LogTag::Next as u64).await;
        put_str(&mut buf, "still here").await;
        put_word(&mut buf, LogTag::Last as u64).await;

        let (result, messages, _) = drain(buf).await;
        assert!(result.is_ok());
        assert_eq!(messages, vec![LogMessage::Next("still here".to_string())]);
    }

    #[tokio::test]
    async fn unknown_tag_is_fatal() {
        let mut buf = Vec::new();
        put_word(&mut buf, 0x12345678).await;

        let (result, _, _) = drain(buf).await;
        match result.unwrap_err() {
            Error::Protocol(ProtocolError::UnknownLogTag(0x12345678)) => {}
            other => panic!("expected unknown tag error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn nil_sink_discards() {
        let mut buf = Vec::new();
        put_word(&mut buf, LogTag::Next as u64).await;
        put_str(&mut buf, "dropped").await;
        put_word(&mut buf, LogTag::Last as u64).await;

        let mut cursor = Cursor::new(buf);
        process_stderr(&mut cursor, None, codec()).await.unwrap();
        // The whole stream was still consumed.
        assert_eq!(cursor.position(), cursor.get_ref().len() as u64);
    }

    #[tokio::test]
    async fn unknown_field_type_is_fatal() {
        let mut buf = Vec::new();
        put_word(&mut buf, LogTag::StartActivity as u64).await;
        put_word(&mut buf, 1).await;
        put_word(&mut buf, 0).await;
        put_word(&mut buf, 100).await;
        put_str(&mut buf, "x").await;
        put_word(&mut buf, 1).await; // one field
        put_word(&mut buf, 2).await; // bogus field type

        let (result, _, _) = drain(buf).await;
        match result.unwrap_err() {
            Error::Protocol(ProtocolError::UnknownFieldType(2)) => {}
            other => panic!("expected unknown field type, got {other:?}"),
        }
    }
}
