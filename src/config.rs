//! Free-list memory ceilings
//!
//! Every list kind has two ceilings: one for the bytes cached by a single
//! list and one for the bytes cached by all lists of that kind together.
//! Exceeding either on a free triggers garbage collection.
//!
//! Limits can be written in TOML:
//!
//! ```toml
//! [regular]
//! global = 1048576
//! per_list = 65536
//!
//! [block]
//! global = -1          # unbounded
//! per_list = "unbounded"
//! ```
//!
//! and overridden from the environment with `PHOTON_FL__<KIND>__<FIELD>`,
//! e.g. `PHOTON_FL__BLOCK__PER_LIST=2097152`.

use crate::error::{Error, Result};
use crate::freelist::ListKind;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;
use tracing::debug;

/// Environment prefix for limit overrides
pub const ENV_PREFIX: &str = "PHOTON_FL";

/// A memory ceiling in bytes, or no ceiling at all
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "LimitRepr", into = "LimitRepr")]
pub enum Limit {
    Bytes(usize),
    Unbounded,
}

impl Limit {
    /// Whether `bytes` cached memory is over this ceiling
    pub fn is_exceeded_by(self, bytes: usize) -> bool {
        match self {
            Limit::Bytes(limit) => bytes > limit,
            Limit::Unbounded => false,
        }
    }

    /// Convert from the integer convention where `-1` means unbounded
    pub fn from_raw(value: i64) -> Result<Self> {
        match value {
            -1 => Ok(Limit::Unbounded),
            v if v >= 0 => usize::try_from(v)
                .map(Limit::Bytes)
                .map_err(|_| Error::Config(format!("Limit {} does not fit in usize", v))),
            v => Err(Error::Config(format!(
                "Invalid limit {}: expected a byte count or -1 for unbounded",
                v
            ))),
        }
    }
}

impl fmt::Display for Limit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Limit::Bytes(n) => write!(f, "{} bytes", n),
            Limit::Unbounded => write!(f, "unbounded"),
        }
    }
}

/// Wire form of a [`Limit`]: an integer or a string
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
enum LimitRepr {
    Int(i64),
    Text(String),
}

impl TryFrom<LimitRepr> for Limit {
    type Error = Error;

    fn try_from(repr: LimitRepr) -> Result<Self> {
        match repr {
            LimitRepr::Int(v) => Limit::from_raw(v),
            LimitRepr::Text(s) => {
                let s = s.trim();
                if s.eq_ignore_ascii_case("unbounded") {
                    return Ok(Limit::Unbounded);
                }
                let v = s
                    .parse::<i64>()
                    .map_err(|e| Error::Config(format!("Invalid limit '{}': {}", s, e)))?;
                Limit::from_raw(v)
            }
        }
    }
}

impl From<Limit> for LimitRepr {
    fn from(limit: Limit) -> Self {
        match limit {
            // Limits past i64::MAX cannot be written back as TOML integers
            Limit::Bytes(n) => match i64::try_from(n) {
                Ok(v) => LimitRepr::Int(v),
                Err(_) => LimitRepr::Text(n.to_string()),
            },
            Limit::Unbounded => LimitRepr::Int(-1),
        }
    }
}

/// Ceilings for one list kind
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct KindLimits {
    /// Sum of cached bytes across every list of the kind
    pub global: Limit,
    /// Cached bytes on any single list
    pub per_list: Limit,
}

impl KindLimits {
    pub const fn new(global: Limit, per_list: Limit) -> Self {
        Self { global, per_list }
    }

    pub const fn unbounded() -> Self {
        Self::new(Limit::Unbounded, Limit::Unbounded)
    }
}

/// Ceilings for all four list kinds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FreeListLimits {
    pub regular: KindLimits,
    pub array: KindLimits,
    pub block: KindLimits,
    pub factory: KindLimits,
}

impl Default for FreeListLimits {
    fn default() -> Self {
        Self {
            regular: KindLimits::new(Limit::Bytes(1024 * 1024), Limit::Bytes(64 * 1024)),
            array: KindLimits::new(Limit::Bytes(4 * 1024 * 1024), Limit::Bytes(256 * 1024)),
            block: KindLimits::new(Limit::Bytes(16 * 1024 * 1024), Limit::Bytes(1024 * 1024)),
            factory: KindLimits::new(Limit::Bytes(16 * 1024 * 1024), Limit::Bytes(1024 * 1024)),
        }
    }
}

impl FreeListLimits {
    /// No ceilings anywhere: memory stays cached until collected explicitly
    pub fn unbounded() -> Self {
        Self {
            regular: KindLimits::unbounded(),
            array: KindLimits::unbounded(),
            block: KindLimits::unbounded(),
            factory: KindLimits::unbounded(),
        }
    }

    /// Build from eight raw integers in the order regular, array, block,
    /// factory (global then per-list), `-1` meaning unbounded
    #[allow(clippy::too_many_arguments)]
    pub fn from_raw(
        reg_global: i64,
        reg_list: i64,
        arr_global: i64,
        arr_list: i64,
        blk_global: i64,
        blk_list: i64,
        fac_global: i64,
        fac_list: i64,
    ) -> Result<Self> {
        Ok(Self {
            regular: KindLimits::new(Limit::from_raw(reg_global)?, Limit::from_raw(reg_list)?),
            array: KindLimits::new(Limit::from_raw(arr_global)?, Limit::from_raw(arr_list)?),
            block: KindLimits::new(Limit::from_raw(blk_global)?, Limit::from_raw(blk_list)?),
            factory: KindLimits::new(Limit::from_raw(fac_global)?, Limit::from_raw(fac_list)?),
        })
    }

    /// Ceilings for one list kind
    pub fn for_kind(&self, kind: ListKind) -> KindLimits {
        match kind {
            ListKind::Regular => self.regular,
            ListKind::Array => self.array,
            ListKind::Block => self.block,
            ListKind::Factory => self.factory,
        }
    }

    /// Parse limits from a TOML document; missing kinds keep their defaults
    pub fn from_toml_str(s: &str) -> Result<Self> {
        toml::from_str(s).map_err(|e| Error::Config(format!("Failed to parse limits: {}", e)))
    }

    /// Render as TOML
    pub fn to_toml_string(&self) -> Result<String> {
        toml::to_string_pretty(self)
            .map_err(|e| Error::Config(format!("Failed to serialize limits: {}", e)))
    }

    /// Load limits: defaults, then the optional TOML file, then
    /// `PHOTON_FL__*` environment variables
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let defaults = ::config::Config::try_from(&Self::default())
            .map_err(|e| Error::Config(format!("Failed to seed defaults: {}", e)))?;

        let mut builder = ::config::Config::builder().add_source(defaults);
        if let Some(path) = path {
            debug!(path = ?path, "Loading free-list limits");
            builder = builder.add_source(
                ::config::File::from(path)
                    .format(::config::FileFormat::Toml)
                    .required(true),
            );
        }
        builder = builder.add_source(
            ::config::Environment::with_prefix(ENV_PREFIX)
                .prefix_separator("__")
                .separator("__"),
        );

        builder
            .build()
            .and_then(|c| c.try_deserialize::<Self>())
            .map_err(|e| Error::Config(format!("Failed to load limits: {}", e)))
    }
}
