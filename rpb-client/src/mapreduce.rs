//! # MapReduce
//!
//! Purpose: Submit MapReduce jobs and collect their streamed results.
//!
//! ## Design Principles
//! 1. **Opaque Results**: Each result blob is returned as the store sent it,
//!    in arrival order; decoding is up to the caller.
//! 2. **Typed Jobs**: The builder assembles the JSON job document through
//!    serde instead of string concatenation.

use rpb_common::messages::RpbMapRedReq;
use serde::Serialize;
use tracing::debug;

use crate::client::Client;
use crate::error::ClientResult;

const JOB_CONTENT_TYPE: &str = "application/json";
const LANGUAGE: &str = "javascript";

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
enum Inputs {
    Bucket(String),
    Keys(Vec<[String; 2]>),
}

#[derive(Debug, Clone, PartialEq, Serialize)]
struct Function {
    language: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    source: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    name: Option<String>,
    keep: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
struct LinkWalk {
    bucket: String,
    keep: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "lowercase")]
enum Phase {
    Map(Function),
    Reduce(Function),
    Link(LinkWalk),
}

#[derive(Serialize)]
struct Job<'a> {
    inputs: &'a Inputs,
    query: &'a [Phase],
}

/// Builder for a MapReduce job.
///
/// Inputs are either explicit bucket/key pairs or a whole bucket; calling
/// [`add_bucket`](Self::add_bucket) replaces any pairs added before.
#[derive(Debug, Clone)]
pub struct MapReduce {
    client: Client,
    inputs: Inputs,
    phases: Vec<Phase>,
}

impl MapReduce {
    pub fn new(client: Client) -> Self {
        MapReduce {
            client,
            inputs: Inputs::Keys(Vec::new()),
            phases: Vec::new(),
        }
    }

    /// Adds one bucket/key input.
    pub fn add(&mut self, bucket: impl Into<String>, key: impl Into<String>) -> &mut Self {
        let pair = [bucket.into(), key.into()];
        match &mut self.inputs {
            Inputs::Keys(keys) => keys.push(pair),
            Inputs::Bucket(_) => self.inputs = Inputs::Keys(vec![pair]),
        }
        self
    }

    /// Uses every key of `bucket` as input.
    pub fn add_bucket(&mut self, bucket: impl Into<String>) -> &mut Self {
        self.inputs = Inputs::Bucket(bucket.into());
        self
    }

    /// Adds a map phase running the given JavaScript source.
    pub fn map(&mut self, source: impl Into<String>, keep: bool) -> &mut Self {
        self.phases.push(Phase::Map(Function::source(source.into(), keep)));
        self
    }

    /// Adds the built-in map phase that parses each value as JSON.
    pub fn map_object_value(&mut self, keep: bool) -> &mut Self {
        self.phases.push(Phase::Map(Function::named("Riak.mapValuesJson", keep)));
        self
    }

    pub fn reduce(&mut self, source: impl Into<String>, keep: bool) -> &mut Self {
        self.phases.push(Phase::Reduce(Function::source(source.into(), keep)));
        self
    }

    /// Follows links into `bucket`.
    pub fn link_bucket(&mut self, bucket: impl Into<String>, keep: bool) -> &mut Self {
        self.phases.push(Phase::Link(LinkWalk {
            bucket: bucket.into(),
            keep,
        }));
        self
    }

    /// Renders the job document.
    pub fn query(&self) -> ClientResult<String> {
        let job = Job {
            inputs: &self.inputs,
            query: &self.phases,
        };
        Ok(serde_json::to_string(&job)?)
    }

    pub fn run(&self) -> ClientResult<Vec<Vec<u8>>> {
        let query = self.query()?;
        self.client.run_map_reduce(&query)
    }
}

impl Function {
    fn source(source: String, keep: bool) -> Self {
        Function {
            language: LANGUAGE,
            source: Some(source),
            name: None,
            keep,
        }
    }

    fn named(name: &str, keep: bool) -> Self {
        Function {
            language: LANGUAGE,
            source: None,
            name: Some(name.to_string()),
            keep,
        }
    }
}

impl Client {
    /// Starts building a MapReduce job on this client.
    pub fn map_reduce(&self) -> MapReduce {
        MapReduce::new(self.clone())
    }

    /// Runs a JSON job document and returns the result blobs in order.
    pub fn run_map_reduce(&self, job: &str) -> ClientResult<Vec<Vec<u8>>> {
        let request = RpbMapRedReq {
            request: job.as_bytes().to_vec(),
            content_type: JOB_CONTENT_TYPE.as_bytes().to_vec(),
        };
        let blobs = self.executor().execute(&request)?.read_streamed()?;
        debug!(results = blobs.len(), "mapreduce complete");
        Ok(blobs)
    }
}
