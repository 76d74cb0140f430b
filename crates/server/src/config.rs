//! Launcher configuration: the page-cache memory budget.

use thiserror::Error;

/// The `--mem` argument did not parse as a size.
///
/// Surfaced from startup; the launcher exits non-zero on it.
#[derive(Debug, Error)]
#[error("invalid memory budget {arg:?}")]
pub struct InvalidMem {
    pub arg: String,
    #[source]
    pub source: parse_size::Error,
}

/// Parses a budget such as `512KB`, `64MB` or `1GB` into bytes; a bare
/// number is taken as bytes.
pub fn parse_mem(arg: &str) -> Result<u64, InvalidMem> {
    parse_size::parse_size(arg).map_err(|source| InvalidMem {
        arg: arg.to_string(),
        source,
    })
}
