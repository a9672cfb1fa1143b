//! Hierarchical chunk identifiers.
//!
//! A chunk id is a sequence of domains, one per chunking depth. Each domain
//! holds one order code per dimension. The textual form joins the codes of
//! a domain with `|` and the domains with `.`:
//!
//! ```text
//! root            the whole cube
//! 0|P             depth 1, second dimension pseudo
//! 0|P.3|1         depth 2
//! ```

use cubefile_common::{CubeError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Order code of a pseudo level.
pub const PSEUDO_ORDER_CODE: i32 = -1;

/// Text token for the root id.
pub const ROOT_TOKEN: &str = "root";

const PSEUDO_TOKEN: &str = "P";
const DOMAIN_SEPARATOR: char = '.';
const CODE_SEPARATOR: char = '|';

/// One order code per dimension.
pub type Domain = Vec<i32>;

/// Identifier of a chunk in the chunk hierarchy.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
pub struct ChunkId {
    domains: Vec<Domain>,
}

impl ChunkId {
    /// The root chunk id.
    pub fn root() -> Self {
        Self::default()
    }

    /// Builds an id from domains, checking that all have the same
    /// non-zero dimensionality.
    pub fn from_domains(domains: Vec<Domain>) -> Result<Self> {
        let id = Self { domains };
        if let Some(first) = id.domains.first() {
            if first.is_empty() {
                return Err(id.malformed("empty domain"));
            }
            if id.domains.iter().any(|d| d.len() != first.len()) {
                return Err(id.malformed("domains differ in dimensionality"));
            }
        }
        Ok(id)
    }

    /// Returns true for the root id.
    pub fn is_root(&self) -> bool {
        self.domains.is_empty()
    }

    /// Number of domains.
    pub fn depth(&self) -> usize {
        self.domains.len()
    }

    /// Dimensionality, or `None` for the root id.
    pub fn num_dims(&self) -> Option<usize> {
        self.domains.first().map(Vec::len)
    }

    /// All domains, outermost first.
    pub fn domains(&self) -> &[Domain] {
        &self.domains
    }

    /// Domain at `index`.
    pub fn domain(&self, index: usize) -> Option<&[i32]> {
        self.domains.get(index).map(Vec::as_slice)
    }

    /// Innermost domain; these are the chunk's coordinates in its parent.
    pub fn last_domain(&self) -> Option<&[i32]> {
        self.domains.last().map(Vec::as_slice)
    }

    /// Returns a new id with `domain` appended.
    pub fn child(&self, domain: &[i32]) -> ChunkId {
        let mut domains = Vec::with_capacity(self.domains.len() + 1);
        domains.extend(self.domains.iter().cloned());
        domains.push(domain.to_vec());
        ChunkId { domains }
    }

    /// Returns the first `depth` domains as an id.
    pub fn prefix(&self, depth: usize) -> ChunkId {
        ChunkId {
            domains: self.domains[..depth.min(self.domains.len())].to_vec(),
        }
    }

    /// Returns true if `self` is a (non-strict) prefix of `other`.
    pub fn is_prefix_of(&self, other: &ChunkId) -> bool {
        other.domains.len() >= self.domains.len()
            && other.domains[..self.domains.len()] == self.domains[..]
    }

    /// Parses the textual form, requiring `num_dims` codes per domain.
    pub fn parse_with_dims(text: &str, num_dims: usize) -> Result<Self> {
        let id: ChunkId = text.parse()?;
        match id.num_dims() {
            Some(n) if n != num_dims => Err(id.malformed(&format!(
                "expected {} dimensions, found {}",
                num_dims, n
            ))),
            _ => Ok(id),
        }
    }

    fn malformed(&self, reason: &str) -> CubeError {
        CubeError::MalformedChunkId {
            id: self.to_string(),
            reason: reason.to_string(),
        }
    }
}

fn parse_code(token: &str, id: &str) -> Result<i32> {
    if token == PSEUDO_TOKEN {
        return Ok(PSEUDO_ORDER_CODE);
    }
    match token.parse::<i32>() {
        Ok(code) if code >= 0 => Ok(code),
        _ => Err(CubeError::MalformedChunkId {
            id: id.to_string(),
            reason: format!("invalid order code '{}'", token),
        }),
    }
}

impl FromStr for ChunkId {
    type Err = CubeError;

    fn from_str(text: &str) -> Result<Self> {
        let trimmed = text.trim();
        if trimmed == ROOT_TOKEN {
            return Ok(ChunkId::root());
        }
        let body = trimmed
            .strip_prefix(ROOT_TOKEN)
            .and_then(|rest| rest.strip_prefix(DOMAIN_SEPARATOR))
            .unwrap_or(trimmed);
        if body.is_empty() {
            return Err(CubeError::MalformedChunkId {
                id: text.to_string(),
                reason: "empty id".to_string(),
            });
        }

        let domains = body
            .split(DOMAIN_SEPARATOR)
            .map(|domain| {
                domain
                    .split(CODE_SEPARATOR)
                    .map(|token| parse_code(token, text))
                    .collect::<Result<Domain>>()
            })
            .collect::<Result<Vec<_>>>()?;

        ChunkId::from_domains(domains).map_err(|_| CubeError::MalformedChunkId {
            id: text.to_string(),
            reason: "domains differ in dimensionality".to_string(),
        })
    }
}

impl fmt::Display for ChunkId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_root() {
            return f.write_str(ROOT_TOKEN);
        }
        for (i, domain) in self.domains.iter().enumerate() {
            if i > 0 {
                write!(f, "{}", DOMAIN_SEPARATOR)?;
            }
            for (j, code) in domain.iter().enumerate() {
                if j > 0 {
                    write!(f, "{}", CODE_SEPARATOR)?;
                }
                if *code == PSEUDO_ORDER_CODE {
                    f.write_str(PSEUDO_TOKEN)?;
                } else {
                    write!(f, "{}", code)?;
                }
            }
        }
        Ok(())
    }
}
