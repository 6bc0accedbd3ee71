use std::fmt;

/// Replication role recorded in a partition's `_local/vbstate` document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PartitionState {
    Active,
    Replica,
    Pending,
    Dead,
    Unknown,
}

impl PartitionState {
    /// Case-sensitive mapping of a recorded state name.
    pub fn from_name(name: &str) -> Self {
        match name {
            "active" => Self::Active,
            "replica" => Self::Replica,
            "pending" => Self::Pending,
            "dead" => Self::Dead,
            _ => Self::Unknown,
        }
    }

    pub fn is_active(self) -> bool {
        self == Self::Active
    }
}

impl fmt::Display for PartitionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Active => "active",
            Self::Replica => "replica",
            Self::Pending => "pending",
            Self::Dead => "dead",
            Self::Unknown => "unknown",
        };
        f.write_str(name)
    }
}

/// One view of a design document. Absent sources are empty strings.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ViewDefinition {
    pub name: String,
    pub map_source: String,
    pub reduce_source: String,
}

impl ViewDefinition {
    pub fn new(name: impl Into<String>, map_source: impl Into<String>, reduce_source: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            map_source: map_source.into(),
            reduce_source: reduce_source.into(),
        }
    }

    pub fn has_map(&self) -> bool {
        !self.map_source.is_empty()
    }

    pub fn has_reduce(&self) -> bool {
        !self.reduce_source.is_empty()
    }
}

/// A key/value pair emitted by a map function, both serialized as JSON text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MapResult {
    pub key: Vec<u8>,
    pub value: Vec<u8>,
}

impl MapResult {
    pub fn new(key: impl Into<Vec<u8>>, value: impl Into<Vec<u8>>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
        }
    }

    pub fn key_str(&self) -> std::borrow::Cow<'_, str> {
        String::from_utf8_lossy(&self.key)
    }

    pub fn value_str(&self) -> std::borrow::Cow<'_, str> {
        String::from_utf8_lossy(&self.value)
    }
}
