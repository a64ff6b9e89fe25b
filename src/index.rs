//! Exact nearest-neighbour search over corpus embeddings.

use std::error::Error;
use std::fmt;

/// Distances and identifiers of the nearest vectors, both in ascending distance order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SearchHits {
    /// Squared L2 distances.
    pub distances: Vec<f32>,
    /// Identifiers of the matching vectors (insertion positions).
    pub ids: Vec<usize>,
}

impl SearchHits {
    /// Identifier of the closest vector, if any.
    pub fn nearest(&self) -> Option<usize> {
        self.ids.first().copied()
    }
}

/// Read-only nearest-neighbour lookup shared across concurrent requests.
pub trait SimilarityIndex: Send + Sync {
    /// Returns up to `k` nearest vectors to `query`, closest first.
    fn search(&self, query: &[f32], k: usize) -> Result<SearchHits, IndexError>;

    /// Number of indexed vectors.
    fn len(&self) -> usize;

    /// Whether the index holds no vectors.
    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Brute-force index ranking by squared Euclidean distance.
#[derive(Debug, Clone, Default)]
pub struct FlatL2Index {
    dimension: Option<usize>,
    data: Vec<f32>,
}

impl FlatL2Index {
    /// Creates an empty index; the first added vector fixes the dimensionality.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates an index from `vectors`, assigning identifiers in iteration order.
    pub fn build<I>(vectors: I) -> Result<Self, IndexError>
    where
        I: IntoIterator<Item = Vec<f32>>,
    {
        let mut index = Self::new();
        for vector in vectors {
            index.add(&vector)?;
        }
        Ok(index)
    }

    /// Appends one vector; its identifier is the previous length.
    pub fn add(&mut self, vector: &[f32]) -> Result<usize, IndexError> {
        if vector.is_empty() {
            return Err(IndexError::EmptyVector);
        }
        match self.dimension {
            Some(expected) if expected != vector.len() => {
                return Err(IndexError::DimensionMismatch {
                    expected,
                    got: vector.len(),
                });
            }
            Some(_) => {}
            None => self.dimension = Some(vector.len()),
        }
        let id = self.len();
        self.data.extend_from_slice(vector);
        Ok(id)
    }

    /// Vector dimensionality, once known.
    pub fn dimension(&self) -> Option<usize> {
        self.dimension
    }
}

impl SimilarityIndex for FlatL2Index {
    fn search(&self, query: &[f32], k: usize) -> Result<SearchHits, IndexError> {
        let Some(dimension) = self.dimension else {
            return Ok(SearchHits::default());
        };
        if query.len() != dimension {
            return Err(IndexError::DimensionMismatch {
                expected: dimension,
                got: query.len(),
            });
        }
        if k == 0 {
            return Ok(SearchHits::default());
        }
        let mut scored: Vec<(usize, f32)> = self
            .data
            .chunks_exact(dimension)
            .enumerate()
            .map(|(id, vector)| (id, squared_l2(vector, query)))
            .collect();
        // stable sort keeps insertion order among equal distances; NaN ranks last
        scored.sort_by(|a, b| {
            a.1.is_nan()
                .cmp(&b.1.is_nan())
                .then_with(|| a.1.total_cmp(&b.1))
        });
        scored.truncate(k);
        let (ids, distances) = scored.into_iter().unzip();
        Ok(SearchHits { distances, ids })
    }

    fn len(&self) -> usize {
        match self.dimension {
            Some(dimension) => self.data.len() / dimension,
            None => 0,
        }
    }
}

fn squared_l2(a: &[f32], b: &[f32]) -> f32 {
    a.iter()
        .zip(b)
        .map(|(x, y)| {
            let d = x - y;
            d * d
        })
        .sum()
}

/// Errors raised while building or querying an index.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IndexError {
    /// Vector length differs from the index dimensionality.
    DimensionMismatch {
        /// Dimensionality fixed at build time.
        expected: usize,
        /// Length of the offending vector.
        got: usize,
    },
    /// Zero-length vectors cannot be indexed.
    EmptyVector,
}

impl fmt::Display for IndexError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::DimensionMismatch { expected, got } => {
                write!(f, "vector has {got} dimensions, index expects {expected}")
            }
            Self::EmptyVector => write!(f, "cannot index an empty vector"),
        }
    }
}

impl Error for IndexError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn orders_by_ascending_distance() {
        let index = FlatL2Index::build(vec![
            vec![0.0, 1.0],
            vec![1.0, 0.0],
            vec![0.7, 0.3],
        ])
        .expect("build");
        let hits = index.search(&[1.0, 0.0], 2).expect("search");
        assert_eq!(hits.ids, vec![1, 2]);
        assert_eq!(hits.distances[0], 0.0);
        assert!(hits.distances[0] <= hits.distances[1]);
    }

    #[test]
    fn caps_results_at_index_size() {
        let index = FlatL2Index::build(vec![vec![1.0], vec![2.0]]).expect("build");
        let hits = index.search(&[1.9], 10).expect("search");
        assert_eq!(hits.ids, vec![1, 0]);
        assert_eq!(index.len(), 2);
    }

    #[test]
    fn ties_keep_insertion_order() {
        let index = FlatL2Index::build(vec![vec![1.0], vec![-1.0]]).expect("build");
        assert_eq!(index.search(&[0.0], 1).expect("search").nearest(), Some(0));
    }

    #[test]
    fn nan_distances_rank_last_without_panicking() {
        let index = FlatL2Index::build(vec![
            vec![f32::NAN, 0.0],
            vec![2.0, 0.0],
            vec![-f32::NAN, 1.0],
            vec![1.0, 0.0],
        ])
        .expect("build");
        let hits = index.search(&[1.0, 0.0], 4).expect("search");
        assert_eq!(&hits.ids[..2], &[3, 1]);
        assert!(hits.distances[2..].iter().all(|d| d.is_nan()));
    }

    #[test]
    fn rejects_dimension_mismatch() {
        let mut index = FlatL2Index::new();
        index.add(&[1.0, 2.0]).expect("first vector");
        assert_eq!(
            index.add(&[1.0]),
            Err(IndexError::DimensionMismatch {
                expected: 2,
                got: 1
            })
        );
        assert!(index.search(&[1.0, 2.0, 3.0], 1).is_err());
    }

    #[test]
    fn empty_index_returns_no_hits() {
        let index = FlatL2Index::new();
        assert!(index.is_empty());
        assert_eq!(index.search(&[1.0], 3).expect("search"), SearchHits::default());
    }
}
