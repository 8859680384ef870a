//! Semantic column types and their mapping to Postgres.

use crate::SchemaError;
use std::fmt;
use std::str::FromStr;

/// Largest dimension pgvector accepts for the `vector` type.
pub const DEFAULT_MAX_VECTOR_DIMENSION: u32 = 16_000;

/// Engine-imposed limits the type mapper validates against.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TypeLimits {
    /// Maximum accepted `vector(n)` dimension.
    pub max_vector_dimension: u32,
}

impl Default for TypeLimits {
    fn default() -> Self {
        Self {
            max_vector_dimension: DEFAULT_MAX_VECTOR_DIMENSION,
        }
    }
}

/// Abstract column types a plugin can declare.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SemanticType {
    /// UUID
    Uuid,
    /// TEXT
    Text,
    /// VARCHAR, optionally length-bounded
    Varchar(Option<u32>),
    /// SMALLINT (2 bytes)
    SmallInt,
    /// INTEGER (4 bytes)
    Integer,
    /// BIGINT (8 bytes)
    BigInt,
    /// REAL (4 bytes floating point)
    Real,
    /// DOUBLE PRECISION (8 bytes floating point)
    DoublePrecision,
    /// NUMERIC (arbitrary precision)
    Numeric,
    /// BOOLEAN
    Boolean,
    /// TIMESTAMP (without time zone)
    Timestamp,
    /// TIMESTAMPTZ
    Timestamptz,
    /// DATE
    Date,
    /// TIME
    Time,
    /// JSON
    Json,
    /// JSONB
    Jsonb,
    /// BYTEA (binary)
    Bytea,
    /// TEXT[]
    TextArray,
    /// pgvector `vector(n)`, fixed dimension
    Vector(u32),
}

impl SemanticType {
    /// Parse a declared type name such as `uuid`, `timestamp with time zone`
    /// or `vector(384)`.
    ///
    /// Matching is case-insensitive and tolerant of extra whitespace.
    pub fn parse(decl: &str) -> Result<Self, SchemaError> {
        let unsupported = || SchemaError::UnsupportedType {
            ty: decl.trim().to_string(),
        };

        let normalized = decl
            .split_whitespace()
            .collect::<Vec<_>>()
            .join(" ")
            .to_ascii_lowercase();

        if let Some(element) = normalized.strip_suffix("[]") {
            return match element.trim() {
                "text" => Ok(SemanticType::TextArray),
                _ => Err(unsupported()),
            };
        }

        let (base, arg) = match normalized.split_once('(') {
            Some((base, rest)) => {
                let arg = rest.strip_suffix(')').ok_or_else(unsupported)?;
                (base.trim(), Some(arg.trim()))
            }
            None => (normalized.as_str(), None),
        };

        let ty = match (base, arg) {
            ("uuid", None) => SemanticType::Uuid,
            ("text", None) => SemanticType::Text,
            ("varchar" | "character varying", None) => SemanticType::Varchar(None),
            ("varchar" | "character varying", Some(len)) => {
                match len.parse::<u32>() {
                    Ok(len) if len > 0 => SemanticType::Varchar(Some(len)),
                    _ => return Err(unsupported()),
                }
            }
            ("smallint" | "int2", None) => SemanticType::SmallInt,
            ("integer" | "int" | "int4", None) => SemanticType::Integer,
            ("bigint" | "int8", None) => SemanticType::BigInt,
            ("real" | "float4", None) => SemanticType::Real,
            ("double precision" | "float8", None) => SemanticType::DoublePrecision,
            ("numeric" | "decimal", None) => SemanticType::Numeric,
            ("boolean" | "bool", None) => SemanticType::Boolean,
            ("timestamp" | "timestamp without time zone", None) => SemanticType::Timestamp,
            ("timestamptz" | "timestamp with time zone", None) => SemanticType::Timestamptz,
            ("date", None) => SemanticType::Date,
            ("time", None) => SemanticType::Time,
            ("json", None) => SemanticType::Json,
            ("jsonb", None) => SemanticType::Jsonb,
            ("bytea", None) => SemanticType::Bytea,
            ("vector", Some(dim)) => {
                let dim = dim.parse::<u32>().map_err(|_| unsupported())?;
                SemanticType::Vector(dim)
            }
            _ => return Err(unsupported()),
        };

        Ok(ty)
    }

    /// Whether a foreign key may link a column of this type to one of `other`.
    ///
    /// Types within the textual family and within the integer family are
    /// comparable in Postgres. Vectors are only compatible with vectors of the
    /// exact same dimension.
    pub fn is_compatible_with(&self, other: &SemanticType) -> bool {
        use SemanticType::*;

        match (self, other) {
            (Text | Varchar(_), Text | Varchar(_)) => true,
            (SmallInt | Integer | BigInt, SmallInt | Integer | BigInt) => true,
            (Vector(a), Vector(b)) => a == b,
            (a, b) => a == b,
        }
    }
}

impl FromStr for SemanticType {
    type Err = SchemaError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        SemanticType::parse(s)
    }
}

impl fmt::Display for SemanticType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SemanticType::Uuid => write!(f, "uuid"),
            SemanticType::Text => write!(f, "text"),
            SemanticType::Varchar(None) => write!(f, "varchar"),
            SemanticType::Varchar(Some(len)) => write!(f, "varchar({})", len),
            SemanticType::SmallInt => write!(f, "smallint"),
            SemanticType::Integer => write!(f, "integer"),
            SemanticType::BigInt => write!(f, "bigint"),
            SemanticType::Real => write!(f, "real"),
            SemanticType::DoublePrecision => write!(f, "double precision"),
            SemanticType::Numeric => write!(f, "numeric"),
            SemanticType::Boolean => write!(f, "boolean"),
            SemanticType::Timestamp => write!(f, "timestamp"),
            SemanticType::Timestamptz => write!(f, "timestamptz"),
            SemanticType::Date => write!(f, "date"),
            SemanticType::Time => write!(f, "time"),
            SemanticType::Json => write!(f, "json"),
            SemanticType::Jsonb => write!(f, "jsonb"),
            SemanticType::Bytea => write!(f, "bytea"),
            SemanticType::TextArray => write!(f, "text[]"),
            SemanticType::Vector(dim) => write!(f, "vector({})", dim),
        }
    }
}

/// Map a semantic type to the Postgres type syntax used in DDL.
///
/// Vector dimensions are checked against `limits`; everything else in the
/// enumeration maps unconditionally.
pub fn map_type(ty: &SemanticType, limits: &TypeLimits) -> Result<String, SchemaError> {
    let native = match ty {
        SemanticType::Uuid => "UUID".to_string(),
        SemanticType::Text => "TEXT".to_string(),
        SemanticType::Varchar(None) => "VARCHAR".to_string(),
        SemanticType::Varchar(Some(len)) => format!("VARCHAR({})", len),
        SemanticType::SmallInt => "SMALLINT".to_string(),
        SemanticType::Integer => "INTEGER".to_string(),
        SemanticType::BigInt => "BIGINT".to_string(),
        SemanticType::Real => "REAL".to_string(),
        SemanticType::DoublePrecision => "DOUBLE PRECISION".to_string(),
        SemanticType::Numeric => "NUMERIC".to_string(),
        SemanticType::Boolean => "BOOLEAN".to_string(),
        SemanticType::Timestamp => "TIMESTAMP".to_string(),
        SemanticType::Timestamptz => "TIMESTAMPTZ".to_string(),
        SemanticType::Date => "DATE".to_string(),
        SemanticType::Time => "TIME".to_string(),
        SemanticType::Json => "JSON".to_string(),
        SemanticType::Jsonb => "JSONB".to_string(),
        SemanticType::Bytea => "BYTEA".to_string(),
        SemanticType::TextArray => "TEXT[]".to_string(),
        SemanticType::Vector(dim) => {
            if *dim == 0 || *dim > limits.max_vector_dimension {
                return Err(SchemaError::InvalidVectorDimension {
                    dimension: *dim,
                    max: limits.max_vector_dimension,
                });
            }
            format!("vector({})", dim)
        }
    };

    Ok(native)
}
