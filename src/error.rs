#[derive(Debug)]
pub enum SortError {
    CapacityExceeded {
        requested: usize,
        capacity: usize,
    },
    InvalidBucketCount {
        bucket_count: u32,
    },
    Other(String),
}

impl std::fmt::Display for SortError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::CapacityExceeded {
                requested,
                capacity,
            } => write!(
                f,
                "primitive count {requested} exceeds pre-allocated scratch capacity {capacity}"
            ),
            Self::InvalidBucketCount { bucket_count } => {
                write!(f, "bucket count {bucket_count} is outside the supported range")
            }
            Self::Other(msg) => f.write_str(msg),
        }
    }
}

impl std::error::Error for SortError {}

impl From<&str> for SortError {
    fn from(value: &str) -> Self {
        Self::Other(value.to_string())
    }
}

impl From<String> for SortError {
    fn from(value: String) -> Self {
        Self::Other(value)
    }
}
