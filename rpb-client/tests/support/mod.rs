//! In-process stand-in for a store node.
//!
//! Speaks the real frame format on a loopback port and keeps every value in
//! memory. Vector clocks are write counters: a put descends from every
//! sibling written at or before the clock it echoes.
//!
//! Special cases:
//! - bucket `errors`: every get answers with an error response
//! - key `slow`: gets are answered after `SLOW_REPLY`
//! - bucket type `counters`/`sets`/`maps`: data type keyspaces

#![allow(dead_code)]

use std::collections::BTreeMap;
use std::io::{Read, Write};
use std::net::{TcpListener, TcpStream};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use prost::Message;
use rpb_client::{Client, ClientConfig};
use rpb_common::messages::{
    DataType, DtFetchReq, DtFetchResp, DtUpdateReq, DtUpdateResp, DtValue, FlagOp,
    IndexQueryType, MapEntry, MapOp, RpbBucketProps, RpbContent, RpbCounterGetReq,
    RpbCounterGetResp, RpbCounterUpdateReq, RpbCounterUpdateResp, RpbDelReq, RpbErrorResp, RpbGetBucketReq, RpbGetBucketResp,
    RpbGetClientIdResp, RpbGetReq, RpbGetResp, RpbGetServerInfoResp, RpbIndexReq, RpbIndexResp,
    RpbListBucketsResp, RpbListKeysReq, RpbListKeysResp, RpbMapRedReq, RpbMapRedResp, RpbPair,
    RpbPutReq, RpbPutResp, RpbResetBucketReq, RpbSearchDoc, RpbSearchQueryReq,
    RpbSearchQueryResp, RpbSetBucketReq, RpbSetClientIdReq, SetOp,
};
use rpb_common::{encode, encode_message, MessageCode};

pub const SLOW_REPLY: Duration = Duration::from_millis(400);
pub const NODE: &str = "fake@127.0.0.1";
pub const VERSION: &str = "2.9.10-fake";
const PAGE: usize = 2;

struct Version {
    content: RpbContent,
    written_at: u64,
}

#[derive(Default)]
struct Entry {
    clock: u64,
    versions: Vec<Version>,
}

#[derive(Default)]
struct State {
    objects: BTreeMap<(String, String), Entry>,
    props: BTreeMap<String, RpbBucketProps>,
    counters: BTreeMap<(String, String), i64>,
    data_types: BTreeMap<(String, String, String), (DataType, DtValue, u64)>,
    generated: u64,
}

/// Handle on a running fake store. The listener lives until the test exits.
#[derive(Clone)]
pub struct FakeStore {
    addr: String,
    state: Arc<Mutex<State>>,
    accepted: Arc<AtomicUsize>,
}

impl FakeStore {
    pub fn start() -> FakeStore {
        let listener = TcpListener::bind("127.0.0.1:0").expect("bind");
        let store = FakeStore {
            addr: listener.local_addr().expect("addr").to_string(),
            state: Arc::new(Mutex::new(State::default())),
            accepted: Arc::new(AtomicUsize::new(0)),
        };
        let server = store.clone();
        thread::spawn(move || {
            for stream in listener.incoming() {
                let Ok(stream) = stream else { return };
                server.accepted.fetch_add(1, Ordering::SeqCst);
                let conn = server.clone();
                thread::spawn(move || conn.serve(stream));
            }
        });
        store
    }

    pub fn addr(&self) -> &str {
        &self.addr
    }

    /// Connections accepted so far.
    pub fn accepted(&self) -> usize {
        self.accepted.load(Ordering::SeqCst)
    }

    /// Waits up to two seconds for `count` accepted connections, since the
    /// accept loop can trail the client's handshake.
    pub fn wait_for_accepted(&self, count: usize) -> usize {
        let deadline = std::time::Instant::now() + Duration::from_secs(2);
        while self.accepted() < count && std::time::Instant::now() < deadline {
            thread::sleep(Duration::from_millis(10));
        }
        thread::sleep(Duration::from_millis(20));
        self.accepted()
    }

    pub fn config(&self, pool_size: usize) -> ClientConfig {
        ClientConfig::new(self.addr.clone())
            .with_pool_size(pool_size)
            .with_read_timeout(Duration::from_secs(5))
            .with_write_timeout(Duration::from_secs(5))
    }

    pub fn client(&self) -> Client {
        Client::new(self.config(1))
    }

    pub fn set_allow_mult(&self, bucket: &str) {
        let mut state = self.state.lock().expect("state");
        state.props.entry(bucket.to_string()).or_default().allow_mult = Some(true);
    }

    /// Raw sibling values currently stored under a key.
    pub fn values(&self, bucket: &str, key: &str) -> Vec<Vec<u8>> {
        let state = self.state.lock().expect("state");
        state
            .objects
            .get(&(bucket.to_string(), key.to_string()))
            .map(|entry| entry.versions.iter().map(|v| v.content.value.clone()).collect())
            .unwrap_or_default()
    }

    fn serve(&self, mut stream: TcpStream) {
        let mut client_id = b"fake-client".to_vec();
        loop {
            let mut header = [0u8; 5];
            // EOF or reset: the client dropped the connection.
            if stream.read_exact(&mut header).is_err() {
                return;
            }
            let len = u32::from_be_bytes([header[0], header[1], header[2], header[3]]) as usize;
            let mut payload = vec![0u8; len.saturating_sub(1)];
            if stream.read_exact(&mut payload).is_err() {
                return;
            }
            let Some(code) = MessageCode::from_u8(header[4]) else {
                write_error(&mut stream, "unknown message code");
                continue;
            };
            let frames = self.dispatch(code, &payload, &mut client_id);
            for frame in frames {
                if stream.write_all(&frame).is_err() {
                    return;
                }
            }
            let _ = stream.flush();
        }
    }

    fn dispatch(&self, code: MessageCode, payload: &[u8], client_id: &mut Vec<u8>) -> Vec<bytes::Bytes> {
        match code {
            MessageCode::PingReq => vec![encode(MessageCode::PingResp, &[])],
            MessageCode::GetClientIdReq => vec![encode_message(
                MessageCode::GetClientIdResp,
                &RpbGetClientIdResp {
                    client_id: client_id.clone(),
                },
            )],
            MessageCode::SetClientIdReq => {
                *client_id = decode::<RpbSetClientIdReq>(payload).client_id;
                vec![encode(MessageCode::SetClientIdResp, &[])]
            }
            MessageCode::GetServerInfoReq => vec![encode_message(
                MessageCode::GetServerInfoResp,
                &RpbGetServerInfoResp {
                    node: Some(NODE.as_bytes().to_vec()),
                    server_version: Some(VERSION.as_bytes().to_vec()),
                },
            )],
            MessageCode::GetReq => self.get(decode(payload)),
            MessageCode::PutReq => vec![self.put(decode(payload))],
            MessageCode::DelReq => {
                self.delete(decode(payload));
                vec![encode(MessageCode::DelResp, &[])]
            }
            MessageCode::ListBucketsReq => self.list_buckets(),
            MessageCode::ListKeysReq => self.list_keys(decode(payload)),
            MessageCode::GetBucketReq => vec![self.get_bucket(decode(payload))],
            MessageCode::SetBucketReq => {
                self.set_bucket(decode(payload));
                vec![encode(MessageCode::SetBucketResp, &[])]
            }
            MessageCode::ResetBucketReq => {
                let req: RpbResetBucketReq = decode(payload);
                self.lock().props.remove(&text(&req.bucket));
                vec![encode(MessageCode::ResetBucketResp, &[])]
            }
            MessageCode::MapRedReq => self.map_reduce(decode(payload)),
            MessageCode::IndexReq => vec![self.index(decode(payload))],
            MessageCode::SearchQueryReq => vec![self.search(decode(payload))],
            MessageCode::CounterUpdateReq => vec![self.counter_update(decode(payload))],
            MessageCode::CounterGetReq => vec![self.counter_get(decode(payload))],
            MessageCode::DtFetchReq => vec![self.dt_fetch(decode(payload))],
            MessageCode::DtUpdateReq => vec![self.dt_update(decode(payload))],
            _ => vec![error_frame("unsupported request")],
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, State> {
        self.state.lock().expect("state")
    }

    fn get(&self, req: RpbGetReq) -> Vec<bytes::Bytes> {
        let bucket = text(&req.bucket);
        let key = text(&req.key);
        if bucket == "errors" {
            return vec![error_frame("simulated failure")];
        }
        if key == "slow" {
            thread::sleep(SLOW_REPLY);
        }
        let state = self.lock();
        let Some(entry) = state.objects.get(&(bucket, key)) else {
            return vec![encode_message(MessageCode::GetResp, &RpbGetResp::default())];
        };
        let vclock = clock_bytes(entry.clock);
        if req.if_modified.as_deref() == Some(vclock.as_slice()) {
            let resp = RpbGetResp {
                unchanged: Some(true),
                ..Default::default()
            };
            return vec![encode_message(MessageCode::GetResp, &resp)];
        }
        if entry.versions.is_empty() {
            let resp = RpbGetResp {
                vclock: req.deletedvclock.unwrap_or(false).then_some(vclock),
                ..Default::default()
            };
            return vec![encode_message(MessageCode::GetResp, &resp)];
        }
        let head = req.head.unwrap_or(false);
        let resp = RpbGetResp {
            content: entry
                .versions
                .iter()
                .map(|version| {
                    let mut content = version.content.clone();
                    if head {
                        content.value.clear();
                    }
                    content
                })
                .collect(),
            vclock: Some(vclock),
            unchanged: None,
        };
        vec![encode_message(MessageCode::GetResp, &resp)]
    }

    fn put(&self, req: RpbPutReq) -> bytes::Bytes {
        let bucket = text(&req.bucket);
        let mut state = self.lock();
        let allow_mult = state
            .props
            .get(&bucket)
            .and_then(|props| props.allow_mult)
            .unwrap_or(false);
        let (key, generated) = match req.key.as_deref() {
            Some(key) if !key.is_empty() => (text(key), false),
            _ => {
                state.generated += 1;
                (format!("gen{:04}", state.generated), true)
            }
        };
        let seen = req.vclock.as_deref().map(parse_clock).unwrap_or(0);
        let entry = state.objects.entry((bucket, key.clone())).or_default();
        entry.clock += 1;
        let mut content = req.content;
        content.vtag = Some(format!("vt{}", entry.clock).into_bytes());
        content.last_mod = Some(1_700_000_000 + entry.clock as u32);
        content.last_mod_usecs = Some(entry.clock as u32);
        let version = Version {
            content,
            written_at: entry.clock,
        };
        if allow_mult {
            entry.versions.retain(|v| v.written_at > seen);
            entry.versions.push(version);
        } else {
            entry.versions = vec![version];
        }

        let return_head = req.return_head.unwrap_or(false);
        let return_body = req.return_body.unwrap_or(false);
        let content = if return_head || return_body {
            entry
                .versions
                .iter()
                .map(|v| {
                    let mut content = v.content.clone();
                    if !return_body {
                        content.value.clear();
                    }
                    content
                })
                .collect()
        } else {
            Vec::new()
        };
        let resp = RpbPutResp {
            content,
            vclock: Some(clock_bytes(entry.clock)),
            key: generated.then(|| key.into_bytes()),
        };
        encode_message(MessageCode::PutResp, &resp)
    }

    fn delete(&self, req: RpbDelReq) {
        let bucket = text(&req.bucket);
        let key = text(&req.key);
        let mut state = self.lock();
        if let Some(kind) = req.r#type.as_deref().map(text) {
            if state.data_types.remove(&(kind, bucket.clone(), key.clone())).is_some() {
                return;
            }
        }
        state.counters.remove(&(bucket.clone(), key.clone()));
        let entry = state.objects.entry((bucket, key)).or_default();
        entry.clock += 1;
        entry.versions.clear();
    }

    fn live_keys(state: &State, bucket: &str) -> Vec<Vec<u8>> {
        state
            .objects
            .iter()
            .filter(|((b, _), entry)| b == bucket && !entry.versions.is_empty())
            .map(|((_, key), _)| key.as_bytes().to_vec())
            .collect()
    }

    fn list_keys(&self, req: RpbListKeysReq) -> Vec<bytes::Bytes> {
        let keys = Self::live_keys(&self.lock(), &text(&req.bucket));
        let mut frames: Vec<_> = keys
            .chunks(PAGE)
            .map(|page| {
                encode_message(
                    MessageCode::ListKeysResp,
                    &RpbListKeysResp {
                        keys: page.to_vec(),
                        done: None,
                    },
                )
            })
            .collect();
        frames.push(encode_message(
            MessageCode::ListKeysResp,
            &RpbListKeysResp {
                keys: Vec::new(),
                done: Some(true),
            },
        ));
        frames
    }

    fn list_buckets(&self) -> Vec<bytes::Bytes> {
        let state = self.lock();
        let mut buckets: Vec<Vec<u8>> = state
            .objects
            .iter()
            .filter(|(_, entry)| !entry.versions.is_empty())
            .map(|((bucket, _), _)| bucket.as_bytes().to_vec())
            .collect();
        buckets.dedup();
        let mut frames: Vec<_> = buckets
            .chunks(PAGE)
            .map(|page| {
                encode_message(
                    MessageCode::ListBucketsResp,
                    &RpbListBucketsResp {
                        buckets: page.to_vec(),
                        done: None,
                    },
                )
            })
            .collect();
        frames.push(encode_message(
            MessageCode::ListBucketsResp,
            &RpbListBucketsResp {
                buckets: Vec::new(),
                done: Some(true),
            },
        ));
        frames
    }

    fn get_bucket(&self, req: RpbGetBucketReq) -> bytes::Bytes {
        let state = self.lock();
        let stored = state.props.get(&text(&req.bucket)).cloned().unwrap_or_default();
        let props = RpbBucketProps {
            n_val: Some(stored.n_val.unwrap_or(3)),
            allow_mult: Some(stored.allow_mult.unwrap_or(false)),
            last_write_wins: Some(stored.last_write_wins.unwrap_or(false)),
            search: Some(stored.search.unwrap_or(false)),
            ..Default::default()
        };
        encode_message(MessageCode::GetBucketResp, &RpbGetBucketResp { props })
    }

    fn set_bucket(&self, req: RpbSetBucketReq) {
        let mut state = self.lock();
        let props = state.props.entry(text(&req.bucket)).or_default();
        let update = req.props;
        props.n_val = update.n_val.or(props.n_val);
        props.allow_mult = update.allow_mult.or(props.allow_mult);
        props.last_write_wins = update.last_write_wins.or(props.last_write_wins);
        props.search = update.search.or(props.search);
    }

    /// Echoes each input value as its own result frame, then `done`.
    fn map_reduce(&self, req: RpbMapRedReq) -> Vec<bytes::Bytes> {
        if req.content_type != b"application/json" {
            return vec![error_frame("unsupported content type")];
        }
        let Ok(job) = serde_json::from_slice::<serde_json::Value>(&req.request) else {
            return vec![error_frame("invalid job")];
        };
        let state = self.lock();
        let inputs: Vec<(String, String)> = match &job["inputs"] {
            serde_json::Value::String(bucket) => Self::live_keys(&state, bucket)
                .into_iter()
                .map(|key| (bucket.clone(), text(&key)))
                .collect(),
            serde_json::Value::Array(pairs) => pairs
                .iter()
                .filter_map(|pair| {
                    Some((pair[0].as_str()?.to_string(), pair[1].as_str()?.to_string()))
                })
                .collect(),
            _ => return vec![error_frame("invalid inputs")],
        };
        let mut frames = Vec::new();
        for (bucket, key) in inputs {
            let Some(entry) = state.objects.get(&(bucket, key)) else {
                continue;
            };
            for version in &entry.versions {
                frames.push(encode_message(
                    MessageCode::MapRedResp,
                    &RpbMapRedResp {
                        phase: Some(0),
                        response: Some(version.content.value.clone()),
                        done: None,
                    },
                ));
            }
        }
        frames.push(encode_message(
            MessageCode::MapRedResp,
            &RpbMapRedResp {
                phase: None,
                response: None,
                done: Some(true),
            },
        ));
        frames
    }

    fn index(&self, req: RpbIndexReq) -> bytes::Bytes {
        let bucket = text(&req.bucket);
        let index = req.index.clone();
        let state = self.lock();
        let matches = |value: &[u8]| match IndexQueryType::try_from(req.qtype) {
            Ok(IndexQueryType::Eq) => req.key.as_deref() == Some(value),
            Ok(IndexQueryType::Range) => {
                req.range_min.as_deref().is_some_and(|min| value >= min)
                    && req.range_max.as_deref().is_some_and(|max| value <= max)
            }
            Err(_) => false,
        };
        let keys = state
            .objects
            .iter()
            .filter(|((b, _), _)| *b == bucket)
            .filter(|(_, entry)| {
                entry.versions.iter().any(|version| {
                    version.content.indexes.iter().any(|pair| {
                        pair.key == index && pair.value.as_deref().is_some_and(|v| matches(v))
                    })
                })
            })
            .map(|((_, key), _)| key.as_bytes().to_vec())
            .collect();
        encode_message(
            MessageCode::IndexResp,
            &RpbIndexResp {
                keys,
                ..Default::default()
            },
        )
    }

    /// Index name is the bucket; `field:term` matches values containing term.
    fn search(&self, req: RpbSearchQueryReq) -> bytes::Bytes {
        let bucket = text(&req.index);
        let query = text(&req.q);
        let term = query.split_once(':').map(|(_, term)| term).unwrap_or(&query).to_string();
        let state = self.lock();
        let hits: Vec<RpbSearchDoc> = state
            .objects
            .iter()
            .filter(|((b, _), _)| *b == bucket)
            .filter_map(|((_, key), entry)| {
                let version = entry.versions.first()?;
                text(&version.content.value).contains(&term).then(|| RpbSearchDoc {
                    fields: vec![
                        RpbPair::new("_yz_rk", key.as_bytes()),
                        RpbPair::new("value", version.content.value.clone()),
                    ],
                })
            })
            .collect();
        let num_found = hits.len() as u32;
        let rows = req.rows.unwrap_or(10) as usize;
        let start = req.start.unwrap_or(0) as usize;
        let resp = RpbSearchQueryResp {
            docs: hits.into_iter().skip(start).take(rows).collect(),
            max_score: Some(1.0),
            num_found: Some(num_found),
        };
        encode_message(MessageCode::SearchQueryResp, &resp)
    }

    fn counter_update(&self, req: RpbCounterUpdateReq) -> bytes::Bytes {
        let mut state = self.lock();
        let value = state
            .counters
            .entry((text(&req.bucket), text(&req.key)))
            .or_insert(0);
        *value += req.amount;
        let resp = RpbCounterUpdateResp {
            value: req.returnvalue.unwrap_or(false).then_some(*value),
        };
        encode_message(MessageCode::CounterUpdateResp, &resp)
    }

    fn counter_get(&self, req: RpbCounterGetReq) -> bytes::Bytes {
        let state = self.lock();
        let resp = RpbCounterGetResp {
            value: state.counters.get(&(text(&req.bucket), text(&req.key))).copied(),
        };
        encode_message(MessageCode::CounterGetResp, &resp)
    }

    fn dt_fetch(&self, req: DtFetchReq) -> bytes::Bytes {
        let kind_name = text(&req.r#type);
        let Some(kind) = bucket_type_kind(&kind_name) else {
            return error_frame(&format!("bucket type {kind_name} is not a data type"));
        };
        let state = self.lock();
        let resp = match state.data_types.get(&(kind_name, text(&req.bucket), text(&req.key))) {
            Some((stored, value, version)) => DtFetchResp {
                context: Some(format!("ctx{version}").into_bytes()),
                r#type: *stored as i32,
                value: Some(value.clone()),
            },
            None => DtFetchResp {
                context: None,
                r#type: kind as i32,
                value: None,
            },
        };
        encode_message(MessageCode::DtFetchResp, &resp)
    }

    fn dt_update(&self, req: DtUpdateReq) -> bytes::Bytes {
        let kind_name = text(&req.r#type);
        let Some(kind) = bucket_type_kind(&kind_name) else {
            return error_frame(&format!("bucket type {kind_name} is not a data type"));
        };
        let mut state = self.lock();
        let (key, generated) = match req.key.as_deref() {
            Some(key) if !key.is_empty() => (text(key), false),
            _ => {
                state.generated += 1;
                (format!("dt{:04}", state.generated), true)
            }
        };
        let slot = state
            .data_types
            .entry((kind_name, text(&req.bucket), key.clone()))
            .or_insert_with(|| (kind, DtValue::default(), 0));
        let (_, value, version) = slot;
        if let Some(op) = &req.op.counter_op {
            value.counter_value = Some(value.counter_value.unwrap_or(0) + op.increment.unwrap_or(1));
        }
        if let Some(op) = &req.op.set_op {
            apply_set(&mut value.set_value, op);
        }
        if let Some(op) = &req.op.map_op {
            apply_map(&mut value.map_value, op);
        }
        *version += 1;
        let resp = DtUpdateResp {
            key: generated.then(|| key.into_bytes()),
            context: Some(format!("ctx{version}").into_bytes()),
            ..Default::default()
        };
        encode_message(MessageCode::DtUpdateResp, &resp)
    }
}

fn bucket_type_kind(name: &str) -> Option<DataType> {
    match name {
        "counters" => Some(DataType::Counter),
        "sets" => Some(DataType::Set),
        "maps" => Some(DataType::Map),
        _ => None,
    }
}

fn apply_set(members: &mut Vec<Vec<u8>>, op: &SetOp) {
    members.retain(|member| !op.removes.contains(member));
    for add in &op.adds {
        if !members.contains(add) {
            members.push(add.clone());
        }
    }
    members.sort();
}

fn apply_map(entries: &mut Vec<MapEntry>, op: &MapOp) {
    entries.retain(|entry| !op.removes.contains(&entry.field));
    for update in &op.updates {
        let index = match entries.iter().position(|entry| entry.field == update.field) {
            Some(index) => index,
            None => {
                entries.push(MapEntry {
                    field: update.field.clone(),
                    ..Default::default()
                });
                entries.len() - 1
            }
        };
        let entry = &mut entries[index];
        if let Some(op) = &update.counter_op {
            entry.counter_value = Some(entry.counter_value.unwrap_or(0) + op.increment.unwrap_or(1));
        }
        if let Some(op) = &update.set_op {
            apply_set(&mut entry.set_value, op);
        }
        if let Some(register) = &update.register_op {
            entry.register_value = Some(register.clone());
        }
        if let Some(flag) = update.flag_op {
            entry.flag_value = Some(flag == FlagOp::Enable as i32);
        }
        if let Some(op) = &update.map_op {
            apply_map(&mut entry.map_value, op);
        }
    }
}

fn decode<M: Message + Default>(payload: &[u8]) -> M {
    M::decode(payload).expect("decode request")
}

fn text(bytes: &[u8]) -> String {
    String::from_utf8_lossy(bytes).into_owned()
}

pub fn clock_bytes(clock: u64) -> Vec<u8> {
    clock.to_be_bytes().to_vec()
}

pub fn parse_clock(bytes: &[u8]) -> u64 {
    <[u8; 8]>::try_from(bytes).map(u64::from_be_bytes).unwrap_or(0)
}

fn error_frame(message: &str) -> bytes::Bytes {
    encode_message(
        MessageCode::ErrorResp,
        &RpbErrorResp {
            errmsg: message.as_bytes().to_vec(),
            errcode: 1,
        },
    )
}

fn write_error(stream: &mut TcpStream, message: &str) {
    let _ = stream.write_all(&error_frame(message));
}
