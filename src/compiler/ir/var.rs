//! IR variables and their tags

use crate::types::Type;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Sort of an IR variable
///
/// `Move` tags only appear in memory-level programs; lowering replaces every `Move`-tagged
/// variable with the scalar and map components of its layout.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Tag {
    /// Boolean
    Bool,
    /// 256-bit unsigned machine word
    Bit256,
    /// Unbounded mathematical integer
    Int,
    /// Uninterpreted map from key tuple to value
    GhostMap(Vec<Tag>, Box<Tag>),
    /// Structured value or reference (memory-level only)
    Move(Type),
}

impl Tag {
    /// Tag of the flat integer-indexed map used by composed layouts
    pub fn composed_map() -> Tag {
        Tag::GhostMap(vec![Tag::Int], Box::new(Tag::Int))
    }

    /// The Move type, if this is a memory-level tag
    pub fn move_type(&self) -> Option<&Type> {
        match self {
            Tag::Move(t) => Some(t),
            _ => None,
        }
    }

    /// True for memory-level tags
    pub fn is_move(&self) -> bool {
        matches!(self, Tag::Move(_))
    }

    /// True for reference tags
    pub fn is_reference(&self) -> bool {
        matches!(self, Tag::Move(Type::Reference(_)))
    }
}

impl fmt::Display for Tag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Tag::Bool => write!(f, "bool"),
            Tag::Bit256 => write!(f, "bv256"),
            Tag::Int => write!(f, "int"),
            Tag::GhostMap(keys, value) => {
                write!(f, "ghostmap(")?;
                for (i, k) in keys.iter().enumerate() {
                    if i > 0 {
                        write!(f, "*")?;
                    }
                    write!(f, "{}", k)?;
                }
                write!(f, ")->{}", value)
            }
            Tag::Move(t) => write!(f, "move({})", t),
        }
    }
}

/// Named, tagged IR variable
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Var {
    /// Unique name
    pub name: String,
    /// Sort
    pub tag: Tag,
}

impl Var {
    /// Creates a variable
    pub fn new(name: impl Into<String>, tag: Tag) -> Self {
        Self {
            name: name.into(),
            tag,
        }
    }

    /// Move type of a memory-level variable
    pub fn move_type(&self) -> Option<&Type> {
        self.tag.move_type()
    }
}

impl fmt::Display for Var {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ValueType;

    #[test]
    fn test_tag_display() {
        assert_eq!(Tag::composed_map().to_string(), "ghostmap(int)->int");
        assert_eq!(
            Tag::Move(Type::Reference(ValueType::U64)).to_string(),
            "move(&u64)"
        );
    }

    #[test]
    fn test_reference_tag() {
        let r = Var::new("r", Tag::Move(Type::Reference(ValueType::Bool)));
        assert!(r.tag.is_reference());
        assert!(!Tag::Bit256.is_reference());
    }
}
