//! Line reader for the analysis server's stdout.
//!
//! Runs on a dedicated thread for the lifetime of the process. Each line is
//! classified as a response or an event and turned into a job for the
//! dispatch context; nothing consumer-supplied ever runs on this thread.
//!
//! End of stream is the normal shutdown path. A malformed line or a failing
//! pipe ends the loop; an orphan response is reported and skipped.

use std::io::{self, BufRead, BufReader, Read};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use tracing::{debug, error, trace};

use crate::error::ProtocolError;
use crate::protocol::{ProtocolMessage, ResponseMessage};
use crate::server::Shared;

/// Outcome of the reader thread.
pub type ReaderHandle = JoinHandle<Result<(), ProtocolError>>;

/// Spawn the reader thread over `output`.
pub(crate) fn spawn_reader<R>(output: R, shared: Arc<Shared>) -> io::Result<ReaderHandle>
where
    R: Read + Send + 'static,
{
    thread::Builder::new()
        .name("das-reader".to_string())
        .spawn(move || read_loop(BufReader::new(output), &shared))
}

/// Read lines until end of stream or a fatal protocol error.
pub(crate) fn read_loop<R: BufRead>(mut reader: R, shared: &Shared) -> Result<(), ProtocolError> {
    let mut line = String::new();

    loop {
        line.clear();
        match reader.read_line(&mut line) {
            Ok(0) => {
                debug!("Analysis server stdout closed");
                return Ok(());
            }
            Ok(_) => {}
            Err(e) => {
                let err = if e.kind() == io::ErrorKind::InvalidData {
                    ProtocolError::malformed("<invalid UTF-8>", e.to_string())
                } else {
                    ProtocolError::ReadFailed {
                        reason: e.to_string(),
                    }
                };
                shared.report(err.clone());
                return Err(err);
            }
        }

        if line.trim().is_empty() {
            continue;
        }

        if let Err(err) = handle_line(&line, shared) {
            shared.report(err.clone());
            if err.is_fatal() {
                error!("Stopping analysis server reader: {}", err);
                return Err(err);
            }
        }
    }
}

/// Classify one line and dispatch whatever it resolves to.
pub(crate) fn handle_line(line: &str, shared: &Shared) -> Result<(), ProtocolError> {
    if shared.is_closed() {
        trace!("Ignoring output after stop: {}", line.trim_end());
        return Ok(());
    }

    match ProtocolMessage::parse(line)? {
        ProtocolMessage::Response(ResponseMessage { id, outcome }) => {
            let entry = shared
                .lock_pending()
                .take(&id)
                .ok_or_else(|| ProtocolError::OrphanResponse { id: id.clone() })?;

            let method = entry.method.clone();
            match entry.resolve(outcome) {
                Some(job) => {
                    debug!("<- response {} ({})", id, method);
                    shared.dispatch(job);
                }
                None => debug!("<- response {} ({}) has no handler, dropping", id, method),
            }
        }
        ProtocolMessage::Event(event) => {
            let name = event.event.clone();
            let job = shared.lock_subscriptions().route(event);
            match job {
                Some(job) => {
                    debug!("<- event {}", name);
                    shared.dispatch(job);
                }
                None => trace!("<- event {} has no subscriber, ignoring", name),
            }
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::correlator::{PendingRequest, Reply};
    use crate::dispatch::EventLoop;
    use crate::protocol::{Event, RequestId};
    use pretty_assertions::assert_eq;
    use std::io::Cursor;
    use std::sync::Mutex;

    fn shared_with_loop() -> (Arc<Shared>, EventLoop) {
        let event_loop = EventLoop::new();
        let shared = Arc::new(Shared::new(Arc::new(event_loop.handle())));
        (shared, event_loop)
    }

    fn errors_into(shared: &Shared) -> Arc<Mutex<Vec<ProtocolError>>> {
        let errors = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&errors);
        shared.set_diagnostics(Arc::new(move |e: ProtocolError| sink.lock().unwrap().push(e)));
        errors
    }

    #[test]
    fn test_response_dispatches_callback_and_removes_entry() {
        let (shared, mut event_loop) = shared_with_loop();
        let versions = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&versions);
        shared.lock_pending().register(
            &RequestId::from("0"),
            PendingRequest::new(
                "server.getVersion",
                Reply::new().on_success(move |ok| {
                    sink.lock()
                        .unwrap()
                        .push((ok.method.clone(), ok.get_str("version").map(String::from)))
                }),
            ),
        );

        let input = "{\"id\":\"0\",\"result\":{\"version\":\"1.6.0\"}}\n";
        read_loop(Cursor::new(input), &shared).unwrap();

        // Nothing runs until the dispatch context does.
        assert!(versions.lock().unwrap().is_empty());
        assert_eq!(event_loop.run_pending().unwrap(), 1);
        assert_eq!(
            *versions.lock().unwrap(),
            vec![("server.getVersion".to_string(), Some("1.6.0".to_string()))]
        );
        assert!(shared.lock_pending().is_empty());
    }

    #[test]
    fn test_error_response_dispatches_errback_only() {
        let (shared, mut event_loop) = shared_with_loop();
        let outcome = Arc::new(Mutex::new(Vec::new()));
        let ok_sink = Arc::clone(&outcome);
        let err_sink = Arc::clone(&outcome);
        shared.lock_pending().register(
            &RequestId::from("1"),
            PendingRequest::new(
                "server.setSubscriptions",
                Reply::new()
                    .on_success(move |_| ok_sink.lock().unwrap().push("success".to_string()))
                    .on_error(move |f| err_sink.lock().unwrap().push(f.error.code)),
            ),
        );

        let input = "{\"id\":\"1\",\"error\":{\"code\":\"INVALID_PARAMETER\",\"message\":\"bad\"}}\n";
        read_loop(Cursor::new(input), &shared).unwrap();
        event_loop.run_pending().unwrap();

        assert_eq!(*outcome.lock().unwrap(), vec!["INVALID_PARAMETER".to_string()]);
    }

    #[test]
    fn test_event_routed_to_subscriber() {
        let (shared, mut event_loop) = shared_with_loop();
        let events = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&events);
        shared
            .lock_subscriptions()
            .subscribe("server.connected", Arc::new(move |e: Event| sink.lock().unwrap().push(e)));

        let input = concat!(
            "{\"event\":\"server.connected\",\"params\":{\"version\":\"1.6.0\"}}\n",
            "{\"event\":\"server.status\",\"params\":{}}\n",
        );
        read_loop(Cursor::new(input), &shared).unwrap();
        event_loop.run_pending().unwrap();

        let events = events.lock().unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].event, "server.connected");
        assert_eq!(events[0].get_str("version"), Some("1.6.0"));
    }

    #[test]
    fn test_orphan_response_is_reported_and_reading_continues() {
        let (shared, mut event_loop) = shared_with_loop();
        let errors = errors_into(&shared);
        let hits = Arc::new(Mutex::new(0));
        let sink = Arc::clone(&hits);
        shared
            .lock_subscriptions()
            .subscribe("server.status", Arc::new(move |_: Event| *sink.lock().unwrap() += 1));

        let input = concat!(
            "{\"id\":\"99\",\"result\":{}}\n",
            "{\"event\":\"server.status\",\"params\":{}}\n",
        );
        read_loop(Cursor::new(input), &shared).unwrap();
        event_loop.run_pending().unwrap();

        assert_eq!(
            *errors.lock().unwrap(),
            vec![ProtocolError::OrphanResponse {
                id: "99".to_string()
            }]
        );
        assert_eq!(*hits.lock().unwrap(), 1);
    }

    #[test]
    fn test_malformed_line_stops_reader() {
        let (shared, mut event_loop) = shared_with_loop();
        let errors = errors_into(&shared);
        let hits = Arc::new(Mutex::new(0));
        let sink = Arc::clone(&hits);
        shared
            .lock_subscriptions()
            .subscribe("server.status", Arc::new(move |_: Event| *sink.lock().unwrap() += 1));

        let input = concat!(
            "{\"foo\":1}\n",
            "{\"event\":\"server.status\",\"params\":{}}\n",
        );
        let result = read_loop(Cursor::new(input), &shared);
        event_loop.run_pending().unwrap();

        assert!(matches!(
            result,
            Err(ProtocolError::MalformedMessage { .. })
        ));
        assert_eq!(errors.lock().unwrap().len(), 1);
        assert_eq!(*hits.lock().unwrap(), 0);
    }

    #[test]
    fn test_invalid_utf8_is_malformed() {
        let (shared, _event_loop) = shared_with_loop();
        let input: &[u8] = b"{\"event\":\"\xff\xfe\"}\n";
        let result = read_loop(Cursor::new(input), &shared);
        assert!(matches!(
            result,
            Err(ProtocolError::MalformedMessage { .. })
        ));
    }

    #[test]
    fn test_blank_lines_are_skipped() {
        let (shared, _event_loop) = shared_with_loop();
        assert_eq!(read_loop(Cursor::new("\n  \n"), &shared), Ok(()));
    }

    #[test]
    fn test_output_after_close_is_ignored() {
        let (shared, mut event_loop) = shared_with_loop();
        let hits = Arc::new(Mutex::new(0));
        let sink = Arc::clone(&hits);
        shared
            .lock_subscriptions()
            .subscribe("server.status", Arc::new(move |_: Event| *sink.lock().unwrap() += 1));

        shared.close();
        let input = "{\"event\":\"server.status\",\"params\":{}}\n{\"id\":\"5\"}\n";
        assert_eq!(read_loop(Cursor::new(input), &shared), Ok(()));
        assert_eq!(event_loop.run_pending().unwrap(), 0);
        assert_eq!(*hits.lock().unwrap(), 0);
    }
}
