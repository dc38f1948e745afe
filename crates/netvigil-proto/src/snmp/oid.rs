use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::Error;

/// An SNMP object identifier.
///
/// Ordering is lexicographic over arcs, which is the MIB walk order.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Oid(Vec<u32>);

impl Oid {
    pub fn from_arcs(arcs: &[u32]) -> Self {
        Self(arcs.to_vec())
    }

    pub fn arcs(&self) -> &[u32] {
        &self.0
    }

    /// Whether `self` lies inside the subtree rooted at `prefix`.
    pub fn starts_with(&self, prefix: &Oid) -> bool {
        self.0.starts_with(&prefix.0)
    }

    /// Arcs following `prefix`, if `self` lies inside its subtree.
    pub fn suffix_after(&self, prefix: &Oid) -> Option<&[u32]> {
        self.0.strip_prefix(prefix.0.as_slice())
    }

    /// Append one arc (typically a table index).
    #[must_use]
    pub fn child(&self, arc: u32) -> Self {
        let mut arcs = Vec::with_capacity(self.0.len() + 1);
        arcs.extend_from_slice(&self.0);
        arcs.push(arc);
        Self(arcs)
    }

    pub fn last(&self) -> Option<u32> {
        self.0.last().copied()
    }
}

impl fmt::Display for Oid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, arc) in self.0.iter().enumerate() {
            if i > 0 {
                f.write_str(".")?;
            }
            write!(f, "{arc}")?;
        }
        Ok(())
    }
}

impl FromStr for Oid {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Error> {
        let trimmed = s.trim().trim_start_matches('.');
        if trimmed.is_empty() {
            return Err(Error::protocol(format!("empty OID {s:?}")));
        }
        trimmed
            .split('.')
            .map(|arc| {
                arc.parse::<u32>()
                    .map_err(|_| Error::protocol(format!("invalid OID {s:?}")))
            })
            .collect::<Result<Vec<_>, _>>()
            .map(Self)
    }
}

impl TryFrom<String> for Oid {
    type Error = Error;

    fn try_from(s: String) -> Result<Self, Error> {
        s.parse()
    }
}

impl From<Oid> for String {
    fn from(oid: Oid) -> Self {
        oid.to_string()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn parses_with_or_without_leading_dot() {
        let a: Oid = ".1.3.6.1.2.1.1.1.0".parse().unwrap();
        let b: Oid = "1.3.6.1.2.1.1.1.0".parse().unwrap();
        assert_eq!(a, b);
        assert_eq!(a.to_string(), "1.3.6.1.2.1.1.1.0");
    }

    #[test]
    fn rejects_garbage() {
        assert!("1.3.x".parse::<Oid>().is_err());
        assert!("".parse::<Oid>().is_err());
    }

    #[test]
    fn walk_order_is_lexicographic() {
        let a = Oid::from_arcs(&[1, 3, 6, 1, 2, 1, 2, 2, 1, 2, 9]);
        let b = Oid::from_arcs(&[1, 3, 6, 1, 2, 1, 2, 2, 1, 2, 10]);
        let c = Oid::from_arcs(&[1, 3, 6, 1, 2, 1, 2, 2, 1, 3]);
        assert!(a < b);
        assert!(b < c);
    }

    #[test]
    fn subtree_membership() {
        let root = Oid::from_arcs(&[1, 3, 6, 1, 2, 1, 2, 2, 1, 2]);
        let row = root.child(7);
        assert!(row.starts_with(&root));
        assert_eq!(row.suffix_after(&root), Some(&[7][..]));
        let sibling = Oid::from_arcs(&[1, 3, 6, 1, 2, 1, 2, 2, 1, 3, 7]);
        assert!(!sibling.starts_with(&root));
    }
}
