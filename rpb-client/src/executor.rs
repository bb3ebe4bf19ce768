//! # Request Executor
//!
//! Purpose: Send one framed request over a pooled connection and turn the
//! reply frames into typed responses.
//!
//! ## Design Principles
//! 1. **Scoped Acquisition**: A `PendingRequest` owns its connection; every
//!    read consumes it, so the connection is released on every exit path.
//! 2. **Three Arities**: Single replies, paginated lists (`done` marks the
//!    last page) and streamed MapReduce results share one frame reader.
//! 3. **Failure Triage**: Store errors keep the connection, transport
//!    failures discard it, and fatal failures tear down the pool.
//! 4. **One Quiet Retry**: A peer that closed an idle connection gets one
//!    reconnect-and-resend before the request fails.

use bytes::Bytes;
use prost::Message;
use rpb_common::messages::{
    Ack, RpbErrorResp, RpbListBucketsResp, RpbListKeysResp, RpbMapRedResp,
    RpbRequest, RpbResponse,
};
use rpb_common::{encode, encode_message, Frame, MessageCode};
use tracing::{debug, trace};

use crate::error::{ClientError, ClientResult};
use crate::pool::{ConnectionPool, PooledConnection};

/// A list response split across frames.
pub trait Paginated: RpbResponse {
    /// Moves this page's entries out of the message.
    fn take_items(&mut self) -> Vec<Vec<u8>>;
    /// True on the last page.
    fn is_done(&self) -> bool;
}

impl Paginated for RpbListKeysResp {
    fn take_items(&mut self) -> Vec<Vec<u8>> {
        std::mem::take(&mut self.keys)
    }

    fn is_done(&self) -> bool {
        self.done.unwrap_or(false)
    }
}

impl Paginated for RpbListBucketsResp {
    fn take_items(&mut self) -> Vec<Vec<u8>> {
        std::mem::take(&mut self.buckets)
    }

    fn is_done(&self) -> bool {
        self.done.unwrap_or(false)
    }
}

/// Sends requests through a connection pool.
#[derive(Debug, Clone)]
pub struct RequestExecutor {
    pool: ConnectionPool,
}

impl RequestExecutor {
    pub fn new(pool: ConnectionPool) -> Self {
        RequestExecutor { pool }
    }

    pub fn pool(&self) -> &ConnectionPool {
        &self.pool
    }

    /// Acquires a connection and writes the encoded request on it.
    pub fn execute<Q: RpbRequest>(&self, request: &Q) -> ClientResult<PendingRequest> {
        self.send(Q::CODE, encode_message(Q::CODE, request))
    }

    /// Sends a request that has no payload (ping, client id, server info).
    pub fn execute_empty(&self, code: MessageCode) -> ClientResult<PendingRequest> {
        self.send(code, encode(code, &[]))
    }

    /// Sends a request and decodes its single response.
    pub fn request<Q: RpbRequest, R: RpbResponse>(&self, request: &Q) -> ClientResult<R> {
        debug_assert_eq!(Q::CODE.response(), Some(R::CODE));
        self.execute(request)?.read_single()
    }

    /// Sends a request that the store acknowledges without a payload.
    pub fn request_ack<Q: RpbRequest>(&self, request: &Q) -> ClientResult<()> {
        self.execute(request)?.read_ack()
    }

    fn send(&self, code: MessageCode, frame: Bytes) -> ClientResult<PendingRequest> {
        let mut conn = self.pool.acquire()?;
        if let Err(err) = conn.send(&frame) {
            settle(&mut conn, &err);
            return Err(err);
        }
        trace!(conn = conn.id(), code = %code, "request sent");
        Ok(PendingRequest {
            conn,
            frame,
            code,
            settled: false,
        })
    }
}

/// A request that has been written and whose reply has not been read yet.
///
/// Dropping it unread discards the connection, since its reply is still
/// queued on the socket.
pub struct PendingRequest {
    conn: PooledConnection,
    frame: Bytes,
    code: MessageCode,
    settled: bool,
}

impl PendingRequest {
    /// Reads exactly one response frame and decodes it.
    pub fn read_single<R: RpbResponse>(mut self) -> ClientResult<R> {
        let result = self
            .first_frame()
            .and_then(|frame| interpret::<R>(frame, R::CODE));
        self.settle(result)
    }

    /// Reads one payload-free acknowledgement.
    pub fn read_ack(mut self) -> ClientResult<()> {
        let expected = self.code.response().unwrap_or(MessageCode::ErrorResp);
        let result = self
            .first_frame()
            .and_then(|frame| interpret::<Ack>(frame, expected))
            .map(drop);
        self.settle(result)
    }

    /// Reads pages until one carries the `done` marker and concatenates them.
    pub fn read_paginated<R: Paginated>(mut self) -> ClientResult<Vec<Vec<u8>>> {
        let result = self.collect_pages::<R>();
        self.settle(result)
    }

    /// Reads MapReduce frames until `done`, keeping every result blob in
    /// arrival order. A blob in the final frame is kept too.
    pub fn read_streamed(mut self) -> ClientResult<Vec<Vec<u8>>> {
        let result = self.collect_stream();
        self.settle(result)
    }

    fn collect_pages<R: Paginated>(&mut self) -> ClientResult<Vec<Vec<u8>>> {
        let mut items = Vec::new();
        let mut frame = self.first_frame()?;
        let mut pages = 1usize;
        loop {
            let mut page: R = interpret(frame, R::CODE)?;
            items.extend(page.take_items());
            if page.is_done() {
                debug!(code = %self.code, pages, items = items.len(), "paginated response complete");
                return Ok(items);
            }
            frame = self.next_frame()?;
            pages += 1;
        }
    }

    fn collect_stream(&mut self) -> ClientResult<Vec<Vec<u8>>> {
        let mut blobs = Vec::new();
        let mut frame = self.first_frame()?;
        loop {
            let part: RpbMapRedResp = interpret(frame, MessageCode::MapRedResp)?;
            if let Some(blob) = part.response {
                blobs.push(blob);
            }
            if part.done.unwrap_or(false) {
                debug!(blobs = blobs.len(), "streamed response complete");
                return Ok(blobs);
            }
            frame = self.next_frame()?;
        }
    }

    fn first_frame(&mut self) -> ClientResult<Frame> {
        if let Some(frame) = self.conn.recv()? {
            return Ok(frame);
        }
        debug!(conn = self.conn.id(), code = %self.code, "peer closed idle connection, retrying once");
        self.conn.reconnect()?;
        self.conn.send(&self.frame)?;
        self.conn.recv()?.ok_or(ClientError::ConnectionClosed)
    }

    fn next_frame(&mut self) -> ClientResult<Frame> {
        self.conn.recv()?.ok_or(ClientError::ConnectionClosed)
    }

    fn settle<T>(mut self, result: ClientResult<T>) -> ClientResult<T> {
        if let Err(err) = &result {
            settle(&mut self.conn, err);
        }
        self.settled = true;
        result
    }
}

impl Drop for PendingRequest {
    fn drop(&mut self) {
        if !self.settled {
            debug!(conn = self.conn.id(), code = %self.code, "reply left unread, discarding connection");
            self.conn.discard();
        }
    }
}

fn settle(conn: &mut PooledConnection, err: &ClientError) {
    match err {
        // The whole reply was read, so the stream is still in step.
        ClientError::Server { .. } => {}
        err if err.is_fatal() => conn.invalidate_pool(),
        _ => conn.discard(),
    }
}

fn interpret<R: Message + Default>(frame: Frame, expected: MessageCode) -> ClientResult<R> {
    if frame.code == MessageCode::ErrorResp.as_u8() {
        let err = RpbErrorResp::decode(frame.payload)?;
        return Err(ClientError::Server {
            message: String::from_utf8_lossy(&err.errmsg).into_owned(),
            code: err.errcode,
        });
    }
    if frame.code != expected.as_u8() {
        return Err(ClientError::UnexpectedResponse {
            expected,
            actual: frame.code,
        });
    }
    if expected.is_empty_ack() {
        return Ok(R::default());
    }
    Ok(R::decode(frame.payload)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ClientConfig;
    use crate::pool::PoolPhase;
    use rpb_common::messages::{RpbGetClientIdResp, RpbListKeysReq};
    use std::io::{Read, Write};
    use std::net::{TcpListener, TcpStream};
    use std::thread;
    use std::time::Duration;

    fn spawn_server(handler: impl FnOnce(TcpListener) + Send + 'static) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").expect("bind");
        let addr = listener.local_addr().expect("addr").to_string();
        thread::spawn(move || handler(listener));
        addr
    }

    fn read_request(stream: &mut TcpStream) -> (u8, Vec<u8>) {
        let mut header = [0u8; 5];
        stream.read_exact(&mut header).expect("header");
        let len = u32::from_be_bytes([header[0], header[1], header[2], header[3]]) as usize;
        let mut payload = vec![0u8; len - 1];
        stream.read_exact(&mut payload).expect("payload");
        (header[4], payload)
    }

    fn write_frame(stream: &mut TcpStream, code: MessageCode, payload: &[u8]) {
        let _ = stream.write_all(&encode(code, payload));
        let _ = stream.flush();
    }

    fn executor(addr: String) -> RequestExecutor {
        RequestExecutor::new(ConnectionPool::new(
            ClientConfig::new(addr)
                .with_read_timeout(Duration::from_secs(2))
                .with_write_timeout(Duration::from_secs(2)),
        ))
    }

    #[test]
    fn error_response_keeps_connection() {
        let addr = spawn_server(|listener| {
            let (mut stream, _) = listener.accept().expect("accept");
            let (code, _) = read_request(&mut stream);
            assert_eq!(code, MessageCode::GetClientIdReq.as_u8());
            let err = RpbErrorResp {
                errmsg: b"overload".to_vec(),
                errcode: 1,
            };
            write_frame(&mut stream, MessageCode::ErrorResp, &err.encode_to_vec());
            thread::sleep(Duration::from_millis(200));
        });
        let executor = executor(addr);
        let err = executor
            .execute_empty(MessageCode::GetClientIdReq)
            .and_then(|pending| pending.read_single::<RpbGetClientIdResp>())
            .unwrap_err();
        assert_eq!(err.to_string(), "overload");
        assert_eq!(executor.pool().idle_count(), 1);
    }

    #[test]
    fn unexpected_code_discards_connection() {
        let addr = spawn_server(|listener| {
            let (mut stream, _) = listener.accept().expect("accept");
            read_request(&mut stream);
            write_frame(&mut stream, MessageCode::PingResp, &[]);
            thread::sleep(Duration::from_millis(200));
        });
        let executor = executor(addr);
        let err = executor
            .execute_empty(MessageCode::GetClientIdReq)
            .and_then(|pending| pending.read_single::<RpbGetClientIdResp>())
            .unwrap_err();
        assert!(matches!(
            err,
            ClientError::UnexpectedResponse {
                expected: MessageCode::GetClientIdResp,
                actual: 2
            }
        ));
        assert_eq!(executor.pool().idle_count(), 0);
    }

    #[test]
    fn ack_skips_payload_decode() {
        let addr = spawn_server(|listener| {
            let (mut stream, _) = listener.accept().expect("accept");
            read_request(&mut stream);
            write_frame(&mut stream, MessageCode::PingResp, &[]);
        });
        let executor = executor(addr);
        executor
            .execute_empty(MessageCode::PingReq)
            .and_then(PendingRequest::read_ack)
            .expect("ping");
    }

    #[test]
    fn pages_are_concatenated_in_order() {
        let addr = spawn_server(|listener| {
            let (mut stream, _) = listener.accept().expect("accept");
            let (code, payload) = read_request(&mut stream);
            assert_eq!(code, MessageCode::ListKeysReq.as_u8());
            let req = RpbListKeysReq::decode(payload.as_slice()).expect("decode");
            assert_eq!(req.bucket, b"b");
            for (keys, done) in [(vec!["a", "b"], None), (vec!["c"], None), (vec![], Some(true))] {
                let page = RpbListKeysResp {
                    keys: keys.into_iter().map(|k| k.as_bytes().to_vec()).collect(),
                    done,
                };
                write_frame(&mut stream, MessageCode::ListKeysResp, &page.encode_to_vec());
            }
        });
        let executor = executor(addr);
        let request = RpbListKeysReq {
            bucket: b"b".to_vec(),
            ..Default::default()
        };
        let keys = executor
            .execute(&request)
            .and_then(PendingRequest::read_paginated::<RpbListKeysResp>)
            .expect("list keys");
        assert_eq!(keys, vec![b"a".to_vec(), b"b".to_vec(), b"c".to_vec()]);
    }

    #[test]
    fn streamed_blob_in_final_frame_is_kept() {
        let addr = spawn_server(|listener| {
            let (mut stream, _) = listener.accept().expect("accept");
            read_request(&mut stream);
            let parts = [
                RpbMapRedResp {
                    phase: Some(0),
                    response: Some(b"[1]".to_vec()),
                    done: None,
                },
                RpbMapRedResp {
                    phase: Some(0),
                    response: None,
                    done: None,
                },
                RpbMapRedResp {
                    phase: Some(1),
                    response: Some(b"[2]".to_vec()),
                    done: Some(true),
                },
            ];
            for part in parts {
                write_frame(&mut stream, MessageCode::MapRedResp, &part.encode_to_vec());
            }
        });
        let executor = executor(addr);
        let request = rpb_common::messages::RpbMapRedReq {
            request: b"{}".to_vec(),
            content_type: b"application/json".to_vec(),
        };
        let blobs = executor
            .execute(&request)
            .and_then(PendingRequest::read_streamed)
            .expect("map reduce");
        assert_eq!(blobs, vec![b"[1]".to_vec(), b"[2]".to_vec()]);
    }

    #[test]
    fn idle_close_is_retried_once() {
        let addr = spawn_server(|listener| {
            let (mut first, _) = listener.accept().expect("accept first");
            read_request(&mut first);
            drop(first);
            let (mut second, _) = listener.accept().expect("accept second");
            let (code, _) = read_request(&mut second);
            assert_eq!(code, MessageCode::PingReq.as_u8());
            write_frame(&mut second, MessageCode::PingResp, &[]);
            thread::sleep(Duration::from_millis(200));
        });
        let executor = executor(addr);
        executor
            .execute_empty(MessageCode::PingReq)
            .and_then(PendingRequest::read_ack)
            .expect("retried ping");
        assert_eq!(executor.pool().phase(), PoolPhase::Connected);
        assert_eq!(executor.pool().idle_count(), 1);
    }

    #[test]
    fn second_close_tears_down_pool() {
        let addr = spawn_server(|listener| {
            for _ in 0..2 {
                let (mut stream, _) = listener.accept().expect("accept");
                read_request(&mut stream);
            }
        });
        let executor = executor(addr);
        let err = executor
            .execute_empty(MessageCode::PingReq)
            .and_then(PendingRequest::read_ack)
            .unwrap_err();
        assert!(matches!(err, ClientError::ConnectionClosed));
        assert_eq!(executor.pool().phase(), PoolPhase::Uninitialized);
    }

    #[test]
    fn truncated_header_is_short_response() {
        let addr = spawn_server(|listener| {
            let (mut stream, _) = listener.accept().expect("accept");
            read_request(&mut stream);
            let _ = stream.write_all(&[0, 0, 0]);
        });
        let executor = executor(addr);
        let err = executor
            .execute_empty(MessageCode::PingReq)
            .and_then(PendingRequest::read_ack)
            .unwrap_err();
        assert!(matches!(err, ClientError::ShortResponse { read: 3 }));
        assert!(!err.is_fatal());
        assert_eq!(executor.pool().phase(), PoolPhase::Connected);
    }
}
