//! # Client Benchmark Harness
//!
//! Purpose: Drive a live store node through the client so pool sizing and
//! per-operation latency can be compared over time.
//!
//! ## Design Principles
//! 1. **Deterministic Workload**: Keys are picked with a fixed-seed PRNG.
//! 2. **Setup Off the Clock**: Values are built and keys seeded before timing.
//! 3. **One Thread per Connection**: Workers match the pool size, so every
//!    connection stays busy without callers queuing on the pool.
//!
//! Usage: `rpb-bench [addr] [pool_size] [ops] [key_count] [value_size]`
//! Log level comes from `RUST_LOG` (default `info`).

use std::env;
use std::hint::black_box;
use std::thread;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use rpb_client::{Client, ClientConfig, Options, DEFAULT_ADDR};
use tracing::info;
use tracing_subscriber::EnvFilter;

const DEFAULT_POOL_SIZE: usize = 4;
const DEFAULT_OP_COUNT: usize = 10_000;
const DEFAULT_KEY_COUNT: usize = 1_024;
const DEFAULT_VALUE_SIZE: usize = 128;
const BUCKET: &str = "rpb-bench";

struct BenchConfig {
    addr: String,
    pool_size: usize,
    op_count: usize,
    key_count: usize,
    value_size: usize,
}

impl BenchConfig {
    fn from_args() -> Self {
        let mut args = env::args().skip(1);
        let addr = args.next().unwrap_or_else(|| DEFAULT_ADDR.to_string());
        BenchConfig {
            addr,
            pool_size: parse_usize(args.next(), DEFAULT_POOL_SIZE).max(1),
            op_count: parse_usize(args.next(), DEFAULT_OP_COUNT),
            key_count: parse_usize(args.next(), DEFAULT_KEY_COUNT).max(1),
            value_size: parse_usize(args.next(), DEFAULT_VALUE_SIZE),
        }
    }
}

fn parse_usize(value: Option<String>, fallback: usize) -> usize {
    value.and_then(|raw| raw.parse().ok()).unwrap_or(fallback)
}

/// XorShift keeps the key sequence reproducible between runs.
struct XorShift64 {
    state: u64,
}

impl XorShift64 {
    fn new(seed: u64) -> Self {
        Self { state: seed }
    }

    fn next_u64(&mut self) -> u64 {
        let mut x = self.state;
        x ^= x << 13;
        x ^= x >> 7;
        x ^= x << 17;
        self.state = x;
        x
    }

    fn next_index(&mut self, len: usize) -> usize {
        (self.next_u64() % len as u64) as usize
    }
}

fn key_name(index: usize) -> String {
    format!("key-{index:08}")
}

fn build_value(size: usize, seed: u64) -> Vec<u8> {
    let mut value = vec![0u8; size];
    let bytes = seed.to_le_bytes();
    let copy_len = value.len().min(bytes.len());
    value[..copy_len].copy_from_slice(&bytes[..copy_len]);
    value
}

fn report(label: &str, mut latencies: Vec<Duration>, elapsed: Duration) {
    if latencies.is_empty() {
        println!("{label}: no operations");
        return;
    }
    latencies.sort_unstable();
    let ops = latencies.len();
    let secs = elapsed.as_secs_f64();
    let percentile = |p: f64| latencies[((ops as f64 * p) as usize).min(ops - 1)];
    println!(
        "{label}: {ops} ops in {secs:.3}s ({:.0} ops/s, p50 {:?}, p99 {:?}, max {:?})",
        ops as f64 / secs,
        percentile(0.50),
        percentile(0.99),
        latencies[ops - 1],
    );
}

/// Runs `op` on `pool_size` threads, splitting `op_count` between them.
fn run_phase<F>(label: &str, client: &Client, config: &BenchConfig, seed: u64, op: F) -> Result<()>
where
    F: Fn(&Client, usize) -> Result<()> + Send + Copy + 'static,
{
    let per_thread = config.op_count / config.pool_size;
    let key_count = config.key_count;
    let start = Instant::now();
    let workers: Vec<_> = (0..config.pool_size)
        .map(|worker| {
            let client = client.clone();
            thread::spawn(move || -> Result<Vec<Duration>> {
                let mut rng = XorShift64::new(seed ^ (worker as u64 + 1));
                let mut latencies = Vec::with_capacity(per_thread);
                for _ in 0..per_thread {
                    let index = rng.next_index(key_count);
                    let began = Instant::now();
                    op(&client, index)?;
                    latencies.push(began.elapsed());
                }
                Ok(latencies)
            })
        })
        .collect();

    let mut latencies = Vec::with_capacity(config.op_count);
    for worker in workers {
        let worker_latencies = worker
            .join()
            .map_err(|_| anyhow::anyhow!("{label} worker panicked"))??;
        latencies.extend(worker_latencies);
    }
    report(label, latencies, start.elapsed());
    Ok(())
}

fn main() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).with_target(false).init();

    if let Err(err) = run() {
        eprintln!("rpb-bench failed: {err:#}");
        std::process::exit(1);
    }
}

fn run() -> Result<()> {
    let config = BenchConfig::from_args();
    let client = Client::with_config(ClientConfig::new(&config.addr).with_pool_size(config.pool_size))
        .with_context(|| format!("connecting to {}", config.addr))?;
    let info = client.server_info().context("reading server info")?;
    info!(node = %info.node, version = %info.version, "connected");

    println!(
        "addr={}, pool={}, ops={}, keys={}, value_size={}",
        config.addr, config.pool_size, config.op_count, config.key_count, config.value_size
    );

    let value = build_value(config.value_size, 0xA5A5_A5A5_A5A5_A5A5);
    for index in 0..config.key_count {
        let mut object = client.new_object_in(BUCKET, &key_name(index));
        object.content_type = "application/octet-stream".to_string();
        object.data = value.clone();
        object
            .store()
            .with_context(|| format!("seeding {}", key_name(index)))?;
    }

    run_phase("PING", &client, &config, 0x1234_5678_9ABC_DEF0, |client, _| {
        client.ping().context("ping")
    })?;

    run_phase("GET", &client, &config, 0x0FED_CBA9_8765_4321, |client, index| {
        let object = client
            .get_from(BUCKET, &key_name(index), Options::default())
            .with_context(|| format!("get {}", key_name(index)))?;
        black_box(object.data);
        Ok(())
    })?;

    let value_size = config.value_size;
    run_phase("PUT", &client, &config, 0x5A5A_5A5A_5A5A_5A5A, move |client, index| {
        let mut object = client.new_object_in(BUCKET, &key_name(index));
        object.data = build_value(value_size, index as u64);
        object.store().with_context(|| format!("put {}", key_name(index)))
    })?;

    client.close();
    Ok(())
}
