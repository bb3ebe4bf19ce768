//! # Quorum Options
//!
//! Purpose: Per-request replica tunables (`r`, `pr`, `w`, `dw`, `pw`, `rw`).
//!
//! The store accepts either a replica count or one of four symbolic values,
//! encoded as the largest `u32` values:
//!
//! ```text
//! one     = u32::MAX - 1
//! quorum  = u32::MAX - 2
//! all     = u32::MAX - 3
//! default = u32::MAX - 4
//! ```

use tracing::debug;

/// A replica count or one of the store's symbolic quorum values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Quorum {
    One,
    Quorum,
    All,
    Default,
    N(u32),
}

impl Quorum {
    pub const ONE: u32 = u32::MAX - 1;
    pub const QUORUM: u32 = u32::MAX - 2;
    pub const ALL: u32 = u32::MAX - 3;
    pub const DEFAULT: u32 = u32::MAX - 4;

    /// Value placed in the request field.
    pub const fn to_wire(self) -> u32 {
        match self {
            Quorum::One => Self::ONE,
            Quorum::Quorum => Self::QUORUM,
            Quorum::All => Self::ALL,
            Quorum::Default => Self::DEFAULT,
            Quorum::N(n) => n,
        }
    }

    pub const fn from_wire(value: u32) -> Self {
        match value {
            Self::ONE => Quorum::One,
            Self::QUORUM => Quorum::Quorum,
            Self::ALL => Quorum::All,
            Self::DEFAULT => Quorum::Default,
            n => Quorum::N(n),
        }
    }
}

impl From<u32> for Quorum {
    fn from(value: u32) -> Self {
        Quorum::from_wire(value)
    }
}

/// Optional quorum settings attached to a request.
///
/// Each operation only forwards the fields it understands: reads use `r`
/// and `pr`, writes use `w`, `dw` and `pw`, deletes use all six.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Options {
    pub r: Option<Quorum>,
    pub pr: Option<Quorum>,
    pub w: Option<Quorum>,
    pub dw: Option<Quorum>,
    pub pw: Option<Quorum>,
    pub rw: Option<Quorum>,
}

impl Options {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets an option by its wire name. Unknown names are ignored.
    pub fn set(&mut self, key: &str, value: impl Into<Quorum>) -> &mut Self {
        let value = Some(value.into());
        match key {
            "r" => self.r = value,
            "pr" => self.pr = value,
            "w" => self.w = value,
            "dw" => self.dw = value,
            "pw" => self.pw = value,
            "rw" => self.rw = value,
            other => debug!(option = other, "ignoring unknown quorum option"),
        }
        self
    }

    pub fn with_r(mut self, value: impl Into<Quorum>) -> Self {
        self.r = Some(value.into());
        self
    }

    pub fn with_pr(mut self, value: impl Into<Quorum>) -> Self {
        self.pr = Some(value.into());
        self
    }

    pub fn with_w(mut self, value: impl Into<Quorum>) -> Self {
        self.w = Some(value.into());
        self
    }

    pub fn with_dw(mut self, value: impl Into<Quorum>) -> Self {
        self.dw = Some(value.into());
        self
    }

    pub fn with_pw(mut self, value: impl Into<Quorum>) -> Self {
        self.pw = Some(value.into());
        self
    }

    pub fn with_rw(mut self, value: impl Into<Quorum>) -> Self {
        self.rw = Some(value.into());
        self
    }

    pub(crate) fn wire_r(&self) -> Option<u32> {
        self.r.map(Quorum::to_wire)
    }

    pub(crate) fn wire_pr(&self) -> Option<u32> {
        self.pr.map(Quorum::to_wire)
    }

    pub(crate) fn wire_w(&self) -> Option<u32> {
        self.w.map(Quorum::to_wire)
    }

    pub(crate) fn wire_dw(&self) -> Option<u32> {
        self.dw.map(Quorum::to_wire)
    }

    pub(crate) fn wire_pw(&self) -> Option<u32> {
        self.pw.map(Quorum::to_wire)
    }

    pub(crate) fn wire_rw(&self) -> Option<u32> {
        self.rw.map(Quorum::to_wire)
    }
}
