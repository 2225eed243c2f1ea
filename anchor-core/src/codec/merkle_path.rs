use crate::error::{Error, Result};
use std::fmt;
use std::str::FromStr;

/// One step down the Merkle tree from root to leaf.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Left,
    Right,
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Direction::Left => "L",
            Direction::Right => "R",
        })
    }
}

/// A `/`-separated sequence of `L`/`R` directions locating a leaf within a
/// Merkle tree, as embedded in an anchor commit's `path` field.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct MerklePath(pub Vec<Direction>);

impl MerklePath {
    pub fn root() -> Self {
        MerklePath(Vec::new())
    }

    pub fn push(&self, dir: Direction) -> Self {
        let mut steps = self.0.clone();
        steps.push(dir);
        MerklePath(steps)
    }
}

impl fmt::Display for MerklePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let parts: Vec<String> = self.0.iter().map(|d| d.to_string()).collect();
        write!(f, "{}", parts.join("/"))
    }
}

impl FromStr for MerklePath {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        if s.is_empty() {
            return Ok(MerklePath::root());
        }
        let mut steps = Vec::new();
        for segment in s.split('/') {
            let dir = match segment {
                "L" => Direction::Left,
                "R" => Direction::Right,
                other => {
                    return Err(Error::InvalidWitnessCar(format!(
                        "invalid merkle path segment {other:?} in {s:?}"
                    )))
                }
            };
            steps.push(dir);
        }
        Ok(MerklePath(steps))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_through_display() {
        let path = MerklePath::root().push(Direction::Left).push(Direction::Right);
        assert_eq!(path.to_string(), "L/R");
        assert_eq!(path, "L/R".parse().unwrap());
    }

    #[test]
    fn empty_path_is_root() {
        let path: MerklePath = "".parse().unwrap();
        assert_eq!(path, MerklePath::root());
        assert_eq!(path.to_string(), "");
    }

    #[test]
    fn rejects_invalid_segment() {
        let err = "L/X".parse::<MerklePath>().unwrap_err();
        assert!(matches!(err, Error::InvalidWitnessCar(_)));
    }
}
