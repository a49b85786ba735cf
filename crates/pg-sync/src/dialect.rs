//! The PostgreSQL implementation of [`schema_types::SqlDialect`] (spec.md
//! §4.1, §4.5 "vendor-provided"). The sole production dialect, though the
//! strategy trait is what spec.md asks to keep the vendor mapping behind.

use schema_types::dialect::{canonicalize, Error};
use schema_types::{types, SimpleSchema, SqlDialect};

pub struct Postgres;

/// PostgreSQL's identifier length ceiling (`NAMEDATALEN` - 1).
const MAX_IDENTIFIER_LENGTH: usize = 63;

impl SqlDialect for Postgres {
    fn to_sql(&self, schema: &SimpleSchema) -> String {
        let base = match schema.shorthand() {
            "j" | "a" => "jsonb",
            "b" => "boolean",
            "t" => "timestamp with time zone",
            "i" => "bigint",
            "f" => "double precision",
            "s" if schema.format.as_deref() == Some("uuid") => "uuid",
            "s" => "text",
            _ => "text",
        };
        if schema.is_nullable() {
            base.to_string()
        } else {
            format!("{} not null", base)
        }
    }

    fn from_sql(&self, type_name: &str, is_nullable: bool) -> Result<SimpleSchema, Error> {
        let (mut base_types, format) = match type_name {
            "jsonb" | "json" => (types::OBJECT, None),
            "boolean" | "bool" => (types::BOOLEAN, None),
            "timestamp with time zone" | "timestamptz" => {
                (types::STRING, Some("date-time".to_string()))
            }
            "uuid" => (types::STRING, Some("uuid".to_string())),
            "bigint" | "integer" | "int4" | "int8" | "smallint" => (types::INTEGER, None),
            "double precision" | "numeric" | "real" | "float8" | "float4" => {
                (types::FRACTIONAL, None)
            }
            "text" | "character varying" | "varchar" => (types::STRING, None),
            other => return Err(Error::UnknownSqlType(other.to_string())),
        };
        if is_nullable {
            base_types = base_types | types::NULL;
        }
        Ok(SimpleSchema {
            types: base_types,
            format,
        })
    }

    fn canonicalize_identifier(&self, raw: &str) -> Result<String, Error> {
        canonicalize(raw, self.max_identifier_length())
    }

    fn max_identifier_length(&self) -> usize {
        MAX_IDENTIFIER_LENGTH
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use schema_types::Types;

    fn simple(types: Types, format: Option<&str>) -> SimpleSchema {
        SimpleSchema {
            types,
            format: format.map(str::to_string),
        }
    }

    #[test]
    fn to_sql_distinguishes_datetime_from_plain_string() {
        let dialect = Postgres;
        assert_eq!(
            dialect.to_sql(&simple(types::STRING, Some("date-time"))),
            "timestamp with time zone not null"
        );
        assert_eq!(dialect.to_sql(&simple(types::STRING, None)), "text not null");
    }

    #[test]
    fn to_sql_marks_nullable_columns() {
        let dialect = Postgres;
        assert_eq!(
            dialect.to_sql(&simple(types::INTEGER | types::NULL, None)),
            "bigint"
        );
    }

    #[test]
    fn from_sql_round_trips_shorthand_family() {
        let dialect = Postgres;
        let schema = dialect.from_sql("bigint", false).unwrap();
        assert_eq!(schema.shorthand(), "i");
        assert!(!schema.is_nullable());
    }

    #[test]
    fn from_sql_rejects_unknown_type_name() {
        let dialect = Postgres;
        assert!(matches!(
            dialect.from_sql("money", false),
            Err(Error::UnknownSqlType(_))
        ));
    }
}
