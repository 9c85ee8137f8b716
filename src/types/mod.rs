//! # Resolved Type Model
//!
//! Canonical, fully monomorphized types as seen by the compiler. Generic parameters have
//! already been substituted by the time a function reaches [`crate::compiler::Scene`], so
//! every type here is concrete and equality is purely structural.
//!
//! ## Type Hierarchy
//!
//! ```text
//! Type
//! ├── Value(ValueType)
//! │   ├── Bool, Bits(w), Address, Signer, MathInt      (simple)
//! │   ├── Vector(elem), GhostArray(elem)               (containers)
//! │   ├── Struct(StructType)                           (composite)
//! │   └── Enum(EnumType)                               (container of variants)
//! └── Reference(ValueType)
//! ```
//!
//! ## Composed Size
//!
//! Each value type knows how many integer-keyed slots it occupies when stored in a composed
//! (flat map) layout. Containers reserve room for their largest possible contents:
//!
//! | Type | Slots |
//! |------|-------|
//! | simple | 1 |
//! | struct | sum of fields |
//! | enum | 1 + widest variant |
//! | vector | 2 + 2^64 * elem |
//! | ghost array | 2^256 * elem |

use crate::compiler::ir::Tag;
use crate::{Error, Result};
use lazy_static::lazy_static;
use num_bigint::BigUint;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

lazy_static! {
    static ref WIDTH_MASKS: Vec<BigUint> = BitWidth::ALL
        .iter()
        .map(|w| (BigUint::from(1u8) << w.bits()) - 1u8)
        .collect();
    static ref VECTOR_CAPACITY: BigUint = BigUint::from(1u8) << 64;
    static ref GHOST_ARRAY_CAPACITY: BigUint = BigUint::from(1u8) << 256;
}

/// Slot offset of a vector's length, relative to the vector
pub const VEC_LENGTH_OFFSET: u32 = 0;
/// Slot offset of a vector's digest, relative to the vector
pub const VEC_DIGEST_OFFSET: u32 = 1;
/// Slot offset of a vector's first element, relative to the vector
pub const VEC_CONTENT_OFFSET: u32 = 2;
/// Slot offset of an enum's variant index, relative to the enum
pub const ENUM_VARIANT_OFFSET: u32 = 0;
/// Slot offset of an enum's content, relative to the enum
pub const ENUM_CONTENT_OFFSET: u32 = 1;

/// Width of a fixed-size unsigned integer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum BitWidth {
    /// u8
    W8,
    /// u16
    W16,
    /// u32
    W32,
    /// u64
    W64,
    /// u128
    W128,
    /// u256
    W256,
}

impl BitWidth {
    /// All widths, narrowest first
    pub const ALL: [BitWidth; 6] = [
        BitWidth::W8,
        BitWidth::W16,
        BitWidth::W32,
        BitWidth::W64,
        BitWidth::W128,
        BitWidth::W256,
    ];

    /// Number of bits
    pub fn bits(self) -> u32 {
        match self {
            BitWidth::W8 => 8,
            BitWidth::W16 => 16,
            BitWidth::W32 => 32,
            BitWidth::W64 => 64,
            BitWidth::W128 => 128,
            BitWidth::W256 => 256,
        }
    }

    /// Width from a bit count
    pub fn from_bits(bits: u32) -> Option<Self> {
        BitWidth::ALL.iter().copied().find(|w| w.bits() == bits)
    }

    /// Largest representable value, `2^bits - 1`
    pub fn mask(self) -> BigUint {
        WIDTH_MASKS[self as usize].clone()
    }
}

/// Module identity: account address plus module name
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ModuleName {
    /// Publishing address
    pub address: BigUint,
    /// Module name
    pub name: String,
}

impl ModuleName {
    /// Creates a module name
    pub fn new(address: impl Into<BigUint>, name: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            name: name.into(),
        }
    }

    /// Identifier-safe rendering, used as a prefix for IR variable names
    pub fn to_var_name(&self) -> String {
        format!("x{}${}", self.address.to_str_radix(16), self.name)
    }
}

impl fmt::Display for ModuleName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{}::{}", self.address.to_str_radix(16), self.name)
    }
}

/// Module-qualified name of a datatype or function
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct QualifiedName {
    /// Defining module
    pub module: ModuleName,
    /// Simple name
    pub name: String,
}

impl QualifiedName {
    /// Creates a qualified name
    pub fn new(module: ModuleName, name: impl Into<String>) -> Self {
        Self {
            module,
            name: name.into(),
        }
    }

    /// Identifier-safe rendering
    pub fn to_var_name(&self) -> String {
        format!("{}${}", self.module.to_var_name(), self.name)
    }
}

impl fmt::Display for QualifiedName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}::{}", self.module, self.name)
    }
}

/// Named, typed field of a struct or enum variant
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Field {
    /// Field name
    pub name: String,
    /// Field type
    pub ty: ValueType,
}

impl Field {
    /// Creates a field
    pub fn new(name: impl Into<String>, ty: ValueType) -> Self {
        Self {
            name: name.into(),
            ty,
        }
    }
}

/// Anything with an (optionally unknown) list of fields: structs and enum variants
pub trait Composite: fmt::Display {
    /// Declared fields, or `None` for native types
    fn declared_fields(&self) -> Option<&[Field]>;

    /// Fields, failing for native types
    fn fields(&self, operation: &str) -> Result<&[Field]> {
        self.declared_fields().ok_or_else(|| Error::NativeType {
            operation: operation.to_string(),
            ty: self.to_string(),
        })
    }

    /// Field at `index`
    fn field(&self, index: usize, operation: &str) -> Result<&Field> {
        let fields = self.fields(operation)?;
        fields.get(index).ok_or_else(|| Error::IndexOutOfRange {
            index,
            len: fields.len(),
            ty: self.to_string(),
        })
    }

    /// Slot offset of field `index` within a composed layout of this composite
    fn field_offset(&self, index: usize) -> Result<BigUint> {
        let fields = self.fields("compute field offsets of")?;
        if index > fields.len() {
            return Err(Error::IndexOutOfRange {
                index,
                len: fields.len(),
                ty: self.to_string(),
            });
        }
        let mut offset = BigUint::from(0u8);
        for field in &fields[..index] {
            offset += field.ty.size()?;
        }
        Ok(offset)
    }

    /// Total slots occupied by the fields
    fn composite_size(&self) -> Result<BigUint> {
        let count = self.fields("compute the size of")?.len();
        self.field_offset(count)
    }
}

/// Struct type with resolved type arguments
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct StructType {
    /// Qualified name
    pub name: QualifiedName,
    /// Resolved type arguments
    pub type_args: Vec<ValueType>,
    /// Fields, or `None` for a native struct
    pub fields: Option<Vec<Field>>,
}

impl Composite for StructType {
    fn declared_fields(&self) -> Option<&[Field]> {
        self.fields.as_deref()
    }
}

impl fmt::Display for StructType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write_datatype_name(f, &self.name, &self.type_args)
    }
}

/// One variant of an enum
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Variant {
    /// Variant name
    pub name: String,
    /// Position within the enum
    pub index: usize,
    /// Fields, or `None` when unknown
    pub fields: Option<Vec<Field>>,
}

impl Composite for Variant {
    fn declared_fields(&self) -> Option<&[Field]> {
        self.fields.as_deref()
    }
}

impl fmt::Display for Variant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name)
    }
}

/// Enum type with resolved type arguments
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct EnumType {
    /// Qualified name
    pub name: QualifiedName,
    /// Resolved type arguments
    pub type_args: Vec<ValueType>,
    /// Variants, in index order
    pub variants: Vec<Variant>,
}

impl EnumType {
    /// Variant at `index`
    pub fn variant(&self, index: usize) -> Result<&Variant> {
        self.variants.get(index).ok_or_else(|| Error::IndexOutOfRange {
            index,
            len: self.variants.len(),
            ty: self.to_string(),
        })
    }

    /// Highest valid variant index
    pub fn last_variant_index(&self) -> Result<usize> {
        self.variants
            .len()
            .checked_sub(1)
            .ok_or_else(|| Error::NativeType {
                operation: "select a variant of".to_string(),
                ty: self.to_string(),
            })
    }

    /// Slots reserved for the content: the widest variant
    pub fn content_size(&self) -> Result<BigUint> {
        let mut widest = BigUint::from(0u8);
        for variant in &self.variants {
            let size = variant.composite_size()?;
            if size > widest {
                widest = size;
            }
        }
        Ok(widest)
    }
}

impl fmt::Display for EnumType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write_datatype_name(f, &self.name, &self.type_args)
    }
}

fn write_datatype_name(
    f: &mut fmt::Formatter<'_>,
    name: &QualifiedName,
    type_args: &[ValueType],
) -> fmt::Result {
    write!(f, "{}", name)?;
    if !type_args.is_empty() {
        write!(f, "<")?;
        for (i, t) in type_args.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{}", t)?;
        }
        write!(f, ">")?;
    }
    Ok(())
}

fn datatype_sym_name(name: &QualifiedName, type_args: &[ValueType]) -> String {
    if type_args.is_empty() {
        name.to_var_name()
    } else {
        let args: Vec<String> = type_args.iter().map(|t| t.sym_name_ext()).collect();
        format!("{}${}", name.to_var_name(), args.join("$$"))
    }
}

/// A storable (non-reference) type
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ValueType {
    // === Simple ===
    /// Boolean
    Bool,
    /// Unsigned fixed-width integer
    Bits(BitWidth),
    /// 256-bit account address
    Address,
    /// 256-bit signer capability
    Signer,
    /// Unbounded mathematical integer (verification only)
    MathInt,

    // === Aggregates ===
    /// Growable vector
    Vector(Box<ValueType>),
    /// Struct with named fields
    Struct(Arc<StructType>),
    /// Tagged union
    Enum(Arc<EnumType>),
    /// Sparse map from u256 index to element (verification only)
    GhostArray(Box<ValueType>),
}

impl ValueType {
    /// u8
    pub const U8: ValueType = ValueType::Bits(BitWidth::W8);
    /// u16
    pub const U16: ValueType = ValueType::Bits(BitWidth::W16);
    /// u32
    pub const U32: ValueType = ValueType::Bits(BitWidth::W32);
    /// u64
    pub const U64: ValueType = ValueType::Bits(BitWidth::W64);
    /// u128
    pub const U128: ValueType = ValueType::Bits(BitWidth::W128);
    /// u256
    pub const U256: ValueType = ValueType::Bits(BitWidth::W256);

    /// `vector<elem>`
    pub fn vector(elem: ValueType) -> Self {
        ValueType::Vector(Box::new(elem))
    }

    /// Ghost array of `elem`
    pub fn ghost_array(elem: ValueType) -> Self {
        ValueType::GhostArray(Box::new(elem))
    }

    /// Struct type from parts
    pub fn structure(name: QualifiedName, type_args: Vec<ValueType>, fields: Option<Vec<Field>>) -> Self {
        ValueType::Struct(Arc::new(StructType {
            name,
            type_args,
            fields,
        }))
    }

    /// Enum type from parts
    pub fn enumeration(name: QualifiedName, type_args: Vec<ValueType>, variants: Vec<Variant>) -> Self {
        ValueType::Enum(Arc::new(EnumType {
            name,
            type_args,
            variants,
        }))
    }

    /// True for types held in a single scalar
    pub fn is_simple(&self) -> bool {
        matches!(
            self,
            ValueType::Bool
                | ValueType::Bits(_)
                | ValueType::Address
                | ValueType::Signer
                | ValueType::MathInt
        )
    }

    /// Bit width for integer-like scalars (address and signer are 256 bits)
    pub fn bit_width(&self) -> Option<BitWidth> {
        match self {
            ValueType::Bits(w) => Some(*w),
            ValueType::Address | ValueType::Signer => Some(BitWidth::W256),
            _ => None,
        }
    }

    /// IR tag of a variable holding this type
    pub fn tag(&self) -> Tag {
        match self {
            ValueType::Bool => Tag::Bool,
            ValueType::Bits(_) | ValueType::Address | ValueType::Signer => Tag::Bit256,
            ValueType::MathInt => Tag::Int,
            _ => Tag::Move(Type::Value(self.clone())),
        }
    }

    /// Slots occupied in a composed layout
    pub fn size(&self) -> Result<BigUint> {
        match self {
            ValueType::Bool
            | ValueType::Bits(_)
            | ValueType::Address
            | ValueType::Signer
            | ValueType::MathInt => Ok(BigUint::from(1u8)),
            ValueType::Struct(s) => s.composite_size(),
            ValueType::Enum(e) => Ok(BigUint::from(ENUM_CONTENT_OFFSET) + e.content_size()?),
            ValueType::Vector(_) => Ok(BigUint::from(VEC_CONTENT_OFFSET) + self.content_size()?),
            ValueType::GhostArray(_) => self.content_size(),
        }
    }

    /// Slots reserved for the contents of a container type
    pub fn content_size(&self) -> Result<BigUint> {
        match self {
            ValueType::Vector(elem) => Ok(&*VECTOR_CAPACITY * elem.size()?),
            ValueType::GhostArray(elem) => Ok(&*GHOST_ARRAY_CAPACITY * elem.size()?),
            ValueType::Enum(e) => e.content_size(),
            other => Err(Error::type_mismatch(
                "content size",
                "vector, ghost array or enum",
                other,
            )),
        }
    }

    /// Suffix used to build unique, type-specific IR variable names
    pub fn sym_name_ext(&self) -> String {
        match self {
            ValueType::Bool => "bool".to_string(),
            ValueType::Bits(w) => format!("u{}", w.bits()),
            ValueType::Address => "address".to_string(),
            ValueType::Signer => "signer".to_string(),
            ValueType::MathInt => "mathint".to_string(),
            ValueType::Vector(elem) => format!("vector!{}", elem.sym_name_ext()),
            ValueType::Struct(s) => datatype_sym_name(&s.name, &s.type_args),
            ValueType::Enum(e) => datatype_sym_name(&e.name, &e.type_args),
            ValueType::GhostArray(elem) => format!("array!{}", elem.sym_name_ext()),
        }
    }

    /// Element type of a vector
    pub fn as_vector(&self) -> Option<&ValueType> {
        match self {
            ValueType::Vector(elem) => Some(elem),
            _ => None,
        }
    }

    /// Struct definition, if this is a struct
    pub fn as_struct(&self) -> Option<&Arc<StructType>> {
        match self {
            ValueType::Struct(s) => Some(s),
            _ => None,
        }
    }

    /// Enum definition, if this is an enum
    pub fn as_enum(&self) -> Option<&Arc<EnumType>> {
        match self {
            ValueType::Enum(e) => Some(e),
            _ => None,
        }
    }

    /// Datatype name, for structs and enums
    pub fn datatype_name(&self) -> Option<&QualifiedName> {
        match self {
            ValueType::Struct(s) => Some(&s.name),
            ValueType::Enum(e) => Some(&e.name),
            _ => None,
        }
    }
}

impl fmt::Display for ValueType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ValueType::Bool => write!(f, "bool"),
            ValueType::Bits(w) => write!(f, "u{}", w.bits()),
            ValueType::Address => write!(f, "address"),
            ValueType::Signer => write!(f, "signer"),
            ValueType::MathInt => write!(f, "(mathint)"),
            ValueType::Vector(elem) => write!(f, "vector<{}>", elem),
            ValueType::Struct(s) => write!(f, "{}", s),
            ValueType::Enum(e) => write!(f, "{}", e),
            ValueType::GhostArray(elem) => write!(f, "(ghost)<{}>", elem),
        }
    }
}

/// Any type a local, stack slot, parameter or return value can have
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Type {
    /// A storable value
    Value(ValueType),
    /// A reference to a value (mutable and immutable references are not distinguished)
    Reference(ValueType),
}

impl Type {
    /// IR tag of a variable holding this type
    pub fn tag(&self) -> Tag {
        match self {
            Type::Value(v) => v.tag(),
            Type::Reference(_) => Tag::Move(self.clone()),
        }
    }

    /// Suffix used to build unique IR variable names
    pub fn sym_name_ext(&self) -> String {
        match self {
            Type::Value(v) => v.sym_name_ext(),
            Type::Reference(v) => format!("ref!{}", v.sym_name_ext()),
        }
    }

    /// The value type, if not a reference
    pub fn as_value(&self) -> Option<&ValueType> {
        match self {
            Type::Value(v) => Some(v),
            Type::Reference(_) => None,
        }
    }

    /// The referenced type, if a reference
    pub fn referent(&self) -> Option<&ValueType> {
        match self {
            Type::Reference(v) => Some(v),
            Type::Value(_) => None,
        }
    }

    /// True for references
    pub fn is_reference(&self) -> bool {
        matches!(self, Type::Reference(_))
    }
}

impl From<ValueType> for Type {
    fn from(v: ValueType) -> Self {
        Type::Value(v)
    }
}

impl fmt::Display for Type {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Type::Value(v) => write!(f, "{}", v),
            Type::Reference(v) => write!(f, "&{}", v),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn module() -> ModuleName {
        ModuleName::new(1u8, "m")
    }

    fn point() -> ValueType {
        ValueType::structure(
            QualifiedName::new(module(), "Point"),
            vec![],
            Some(vec![
                Field::new("x", ValueType::U64),
                Field::new("y", ValueType::U64),
            ]),
        )
    }

    #[test]
    fn test_masks() {
        assert_eq!(BitWidth::W8.mask(), BigUint::from(255u32));
        assert_eq!(BitWidth::W64.mask(), BigUint::from(u64::MAX));
        assert_eq!(BitWidth::from_bits(128), Some(BitWidth::W128));
        assert_eq!(BitWidth::from_bits(7), None);
    }

    #[test]
    fn test_display_names() {
        assert_eq!(ValueType::vector(ValueType::U8).to_string(), "vector<u8>");
        assert_eq!(point().to_string(), "0x1::m::Point");
        assert_eq!(Type::Reference(ValueType::U64).to_string(), "&u64");

        let generic = ValueType::structure(
            QualifiedName::new(module(), "Box"),
            vec![ValueType::U64, ValueType::Bool],
            Some(vec![]),
        );
        assert_eq!(generic.to_string(), "0x1::m::Box<u64, bool>");
    }

    #[test]
    fn test_sym_name_ext() {
        assert_eq!(ValueType::vector(ValueType::U64).sym_name_ext(), "vector!u64");
        assert_eq!(point().sym_name_ext(), "x1$m$Point");
        assert_eq!(
            Type::Reference(ValueType::Bool).sym_name_ext(),
            "ref!bool"
        );
        let generic = ValueType::structure(
            QualifiedName::new(module(), "Pair"),
            vec![ValueType::U8, ValueType::U64],
            Some(vec![]),
        );
        assert_eq!(generic.sym_name_ext(), "x1$m$Pair$u8$$u64");
    }

    #[test]
    fn test_tags() {
        assert_eq!(ValueType::Bool.tag(), Tag::Bool);
        assert_eq!(ValueType::Address.tag(), Tag::Bit256);
        assert_eq!(ValueType::MathInt.tag(), Tag::Int);
        assert!(matches!(point().tag(), Tag::Move(_)));
    }

    #[test]
    fn test_sizes() {
        assert_eq!(point().size().unwrap(), BigUint::from(2u8));

        let vec_of_points = ValueType::vector(point());
        let expected = BigUint::from(2u8) + (BigUint::from(1u8) << 64) * 2u8;
        assert_eq!(vec_of_points.size().unwrap(), expected);

        let ghost = ValueType::ghost_array(ValueType::Bool);
        assert_eq!(ghost.size().unwrap(), BigUint::from(1u8) << 256);
    }

    #[test]
    fn test_enum_size_uses_widest_variant() {
        let option = ValueType::enumeration(
            QualifiedName::new(module(), "Shape"),
            vec![],
            vec![
                Variant {
                    name: "Empty".to_string(),
                    index: 0,
                    fields: Some(vec![]),
                },
                Variant {
                    name: "Segment".to_string(),
                    index: 1,
                    fields: Some(vec![Field::new("a", point()), Field::new("b", point())]),
                },
            ],
        );
        assert_eq!(option.size().unwrap(), BigUint::from(5u8));
    }

    #[test]
    fn test_native_struct_has_no_size() {
        let native = ValueType::structure(QualifiedName::new(module(), "UID"), vec![], None);
        assert!(matches!(native.size(), Err(Error::NativeType { .. })));
    }

    #[test]
    fn test_field_offsets() {
        let s = point();
        let st = s.as_struct().unwrap();
        assert_eq!(st.field_offset(0).unwrap(), BigUint::from(0u8));
        assert_eq!(st.field_offset(1).unwrap(), BigUint::from(1u8));
        assert!(st.field_offset(3).is_err());
    }
}
