use serde::{Deserialize, Serialize};

/// Nearest-neighbor strategy used to build the index
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IndexStrategy {
    /// Exhaustive inner-product scan over every chunk vector.
    /// Always returns the true top-k; cost grows linearly with the document.
    Exact,

    /// Hierarchical navigable small world graph.
    /// Sub-linear search with high recall, tuned by [`HnswParams`].
    #[default]
    Approximate,
}

impl IndexStrategy {
    /// Check if this strategy guarantees the true top-k
    pub fn is_exact(&self) -> bool {
        matches!(self, IndexStrategy::Exact)
    }
}

impl std::fmt::Display for IndexStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            IndexStrategy::Exact => write!(f, "exact"),
            IndexStrategy::Approximate => write!(f, "approximate"),
        }
    }
}

impl std::str::FromStr for IndexStrategy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "exact" | "flat" | "brute-force" => Ok(IndexStrategy::Exact),
            "approximate" | "approx" | "hnsw" => Ok(IndexStrategy::Approximate),
            _ => Err(format!(
                "Invalid index strategy: '{s}'. Valid values are: exact, approximate"
            )),
        }
    }
}

/// Largest `max_connections` that `hnsw_rs` accepts; above it the library exits the process
pub const MAX_HNSW_CONNECTIONS: usize = 256;

/// Graph parameters for the approximate strategy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HnswParams {
    /// Maximum links per node per layer (M)
    pub max_connections: usize,
    /// Candidate list size while inserting
    pub ef_construction: usize,
    /// Candidate list size while searching; raised to k when k is larger
    pub ef_search: usize,
}

impl Default for HnswParams {
    fn default() -> Self {
        Self {
            max_connections: 32,
            ef_construction: 40,
            ef_search: 64,
        }
    }
}

impl HnswParams {
    pub fn validate(&self) -> Result<(), String> {
        if self.max_connections == 0 {
            return Err("max_connections must be positive".to_string());
        }
        if self.max_connections > MAX_HNSW_CONNECTIONS {
            return Err(format!(
                "max_connections must be at most {MAX_HNSW_CONNECTIONS}, got {}",
                self.max_connections
            ));
        }
        if self.ef_construction == 0 || self.ef_search == 0 {
            return Err("ef_construction and ef_search must be positive".to_string());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_str() {
        assert_eq!(
            "exact".parse::<IndexStrategy>().unwrap(),
            IndexStrategy::Exact
        );
        assert_eq!(
            "approximate".parse::<IndexStrategy>().unwrap(),
            IndexStrategy::Approximate
        );

        // Test case insensitive and aliases
        assert_eq!(
            "HNSW".parse::<IndexStrategy>().unwrap(),
            IndexStrategy::Approximate
        );
        assert_eq!("Flat".parse::<IndexStrategy>().unwrap(), IndexStrategy::Exact);

        assert!("ivf".parse::<IndexStrategy>().is_err());
    }

    #[test]
    fn test_display_round_trips() {
        for strategy in [IndexStrategy::Exact, IndexStrategy::Approximate] {
            assert_eq!(
                strategy.to_string().parse::<IndexStrategy>().unwrap(),
                strategy
            );
        }
        assert_eq!(IndexStrategy::default(), IndexStrategy::Approximate);
        assert!(IndexStrategy::Exact.is_exact());
    }

    #[test]
    fn test_hnsw_params() {
        let params = HnswParams::default();
        assert_eq!(params.max_connections, 32);
        assert_eq!(params.ef_construction, 40);
        assert_eq!(params.ef_search, 64);
        assert!(params.validate().is_ok());

        let bad = HnswParams {
            max_connections: 0,
            ..params
        };
        assert!(bad.validate().is_err());

        let widest = HnswParams {
            max_connections: MAX_HNSW_CONNECTIONS,
            ..params
        };
        assert!(widest.validate().is_ok());

        let too_wide = HnswParams {
            max_connections: MAX_HNSW_CONNECTIONS + 1,
            ..params
        };
        assert!(too_wide.validate().unwrap_err().contains("at most 256"));
    }
}
