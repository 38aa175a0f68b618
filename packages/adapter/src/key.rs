//! Path keys: validated slash-delimited addresses into a hierarchical key space.

use std::fmt;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// Errors related to key parsing and validation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KeyError {
    /// A key component is not usable as a path segment.
    InvalidComponent {
        component: String,
        position: usize,
        message: String,
    },
}

impl fmt::Display for KeyError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            KeyError::InvalidComponent {
                component,
                position,
                message,
            } => {
                write!(
                    f,
                    "invalid key component '{}' at position {}: {}",
                    component, position, message
                )
            }
        }
    }
}

impl std::error::Error for KeyError {}

/// A validated path key.
///
/// Keys are the only addressing mechanism in AgentDeck: every stored value,
/// subscription and channel is identified by one. A key's position in the
/// hierarchy is derived purely from slash-splitting its rendered form.
///
/// # Key Syntax
///
/// - Components are separated by `/`
/// - Empty components are ignored (normalizes `//` and trailing `/`)
/// - `.` and `..` are rejected, as are components containing `\`
///
/// # Examples
///
/// ```rust
/// use agentdeck_adapter::PathKey;
///
/// let key = PathKey::parse("agents/worker-3").unwrap();
/// assert_eq!(key.len(), 2);
///
/// // Trailing slashes are normalized
/// assert_eq!(PathKey::parse("foo/bar/").unwrap(), PathKey::parse("foo/bar").unwrap());
/// ```
#[derive(Clone, Debug, Hash, PartialEq, Eq, PartialOrd, Ord)]
pub struct PathKey {
    components: Vec<String>,
}

impl PathKey {
    /// The empty key, addressing the root of an adapter's key space.
    pub fn root() -> Self {
        PathKey {
            components: Vec::new(),
        }
    }

    /// Parse a key string, validating components.
    pub fn parse(s: &str) -> Result<Self, KeyError> {
        let components: Vec<String> = s
            .split('/')
            .filter(|c| !c.is_empty())
            .map(|c| c.to_string())
            .collect();

        for (i, component) in components.iter().enumerate() {
            Self::validate_component(component, i)?;
        }

        Ok(PathKey { components })
    }

    /// Try to create a key from components, validating each.
    pub fn try_from_components(components: Vec<String>) -> Result<Self, KeyError> {
        for (i, component) in components.iter().enumerate() {
            Self::validate_component(component, i)?;
        }
        Ok(PathKey { components })
    }

    fn validate_component(component: &str, position: usize) -> Result<(), KeyError> {
        if component.is_empty() {
            return Err(KeyError::InvalidComponent {
                component: component.to_string(),
                position,
                message: "empty component".to_string(),
            });
        }
        if component == "." || component == ".." {
            return Err(KeyError::InvalidComponent {
                component: component.to_string(),
                position,
                message: "relative path segment".to_string(),
            });
        }
        if component.contains('\\') {
            return Err(KeyError::InvalidComponent {
                component: component.to_string(),
                position,
                message: "backslash in component".to_string(),
            });
        }
        Ok(())
    }

    /// The key's components, in order.
    pub fn components(&self) -> &[String] {
        &self.components
    }

    pub fn len(&self) -> usize {
        self.components.len()
    }

    pub fn is_empty(&self) -> bool {
        self.components.is_empty()
    }

    /// Append a single component, returning a new key.
    pub fn child(&self, component: &str) -> Result<Self, KeyError> {
        Self::validate_component(component, self.components.len())?;
        let mut components = self.components.clone();
        components.push(component.to_string());
        Ok(PathKey { components })
    }

    /// Concatenate two keys.
    pub fn join(&self, other: &PathKey) -> Self {
        let mut components = self.components.clone();
        components.extend(other.components.iter().cloned());
        PathKey { components }
    }

    /// The key with its last component removed, or `None` at the root.
    pub fn parent(&self) -> Option<Self> {
        if self.components.is_empty() {
            return None;
        }
        Some(PathKey {
            components: self.components[..self.components.len() - 1].to_vec(),
        })
    }

    /// The last component, or `None` at the root.
    pub fn leaf(&self) -> Option<&str> {
        self.components.last().map(|s| s.as_str())
    }

    /// Whether `prefix` addresses this key or one of its ancestors.
    ///
    /// The root key is a prefix of every key.
    pub fn starts_with(&self, prefix: &PathKey) -> bool {
        if prefix.components.len() > self.components.len() {
            return false;
        }
        self.components[..prefix.components.len()] == prefix.components[..]
    }

    /// Remove `prefix` from the front of this key.
    pub fn strip_prefix(&self, prefix: &PathKey) -> Option<Self> {
        if !self.starts_with(prefix) {
            return None;
        }
        Some(PathKey {
            components: self.components[prefix.components.len()..].to_vec(),
        })
    }
}

impl fmt::Display for PathKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.components.join("/"))
    }
}

impl std::str::FromStr for PathKey {
    type Err = KeyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        PathKey::parse(s)
    }
}

impl Serialize for PathKey {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for PathKey {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        PathKey::parse(&s).map_err(serde::de::Error::custom)
    }
}

/// Construct a `PathKey` from a literal, panicking on invalid input.
///
/// Intended for statically known keys:
///
/// ```rust
/// use agentdeck_adapter::key;
///
/// let k = key!("agents/worker-3");
/// assert_eq!(k.len(), 2);
/// ```
#[macro_export]
macro_rules! key {
    ($s:expr) => {
        $crate::PathKey::parse($s).expect("invalid key literal")
    };
}
