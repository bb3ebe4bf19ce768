//! # Legacy Counters
//!
//! Purpose: Increment and read the store's original counters, which live in
//! plain buckets with `allow_mult` enabled rather than under a bucket type.

use rpb_common::messages::{
    RpbCounterGetReq, RpbCounterGetResp, RpbCounterUpdateReq, RpbCounterUpdateResp, RpbDelReq,
};
use tracing::trace;

use crate::bucket::Bucket;
use crate::error::{ClientError, ClientResult};
use crate::options::{Options, Quorum};

/// A counter under one bucket and key.
#[derive(Debug, Clone)]
pub struct Counter {
    bucket: Bucket,
    key: String,
    /// Value as of the last reload or reloading update.
    pub value: i64,
    pub options: Options,
}

impl Counter {
    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn bucket(&self) -> &Bucket {
        &self.bucket
    }

    /// Reads the current value. A missing counter reads as zero.
    pub fn reload(&mut self) -> ClientResult<()> {
        let request = RpbCounterGetReq {
            bucket: self.bucket.name().as_bytes().to_vec(),
            key: self.key.as_bytes().to_vec(),
            r: self.options.wire_r(),
            pr: self.options.wire_pr(),
            notfound_ok: Some(true),
            ..Default::default()
        };
        let resp: RpbCounterGetResp = self.bucket.client().executor().request(&request)?;
        self.value = resp.value.unwrap_or_default();
        Ok(())
    }

    pub fn increment(&mut self, amount: i64) -> ClientResult<()> {
        self.update(amount, false)
    }

    /// Increments and stores the resulting value in `value`.
    pub fn increment_and_reload(&mut self, amount: i64) -> ClientResult<()> {
        self.update(amount, true)
    }

    pub fn decrement(&mut self, amount: i64) -> ClientResult<()> {
        self.update(negate(amount)?, false)
    }

    pub fn decrement_and_reload(&mut self, amount: i64) -> ClientResult<()> {
        self.update(negate(amount)?, true)
    }

    /// Deletes the counter on every replica.
    pub fn destroy(&self) -> ClientResult<()> {
        let all = Some(Quorum::ALL);
        let options = &self.options;
        let request = RpbDelReq {
            bucket: self.bucket.name().as_bytes().to_vec(),
            key: self.key.as_bytes().to_vec(),
            r: options.wire_r().or(all),
            pr: options.wire_pr().or(all),
            w: options.wire_w().or(all),
            pw: options.wire_pw().or(all),
            dw: options.wire_dw(),
            rw: options.wire_rw(),
            sloppy_quorum: Some(false),
            ..Default::default()
        };
        self.bucket.client().executor().request_ack(&request)
    }

    fn update(&mut self, amount: i64, reload: bool) -> ClientResult<()> {
        let request = RpbCounterUpdateReq {
            bucket: self.bucket.name().as_bytes().to_vec(),
            key: self.key.as_bytes().to_vec(),
            amount,
            w: self.options.wire_w(),
            dw: self.options.wire_dw(),
            pw: self.options.wire_pw(),
            returnvalue: Some(reload),
        };
        let resp: RpbCounterUpdateResp = self.bucket.client().executor().request(&request)?;
        if reload {
            self.value = resp.value.unwrap_or_default();
        }
        trace!(bucket = self.bucket.name(), key = %self.key, amount, "counter updated");
        Ok(())
    }
}

fn negate(amount: i64) -> ClientResult<i64> {
    amount
        .checked_neg()
        .ok_or(ClientError::CounterOverflow { amount })
}

impl Bucket {
    /// Returns the counter at `key` with its current value loaded.
    pub fn get_counter(&self, key: &str, options: Options) -> ClientResult<Counter> {
        let mut counter = self.counter_without_load(key, options);
        counter.reload()?;
        Ok(counter)
    }

    /// Returns a counter handle without reading it; `value` starts at zero.
    pub fn counter_without_load(&self, key: &str, options: Options) -> Counter {
        Counter {
            bucket: self.clone(),
            key: key.to_string(),
            value: 0,
            options,
        }
    }
}
