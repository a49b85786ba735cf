//! Stable, vendor-independent tags identifying a SQL type family.
//!
//! Used to disambiguate type-split columns (`canonical__<shorthand>`) when
//! two streamed schemas disagree on the type of the same field name.

use crate::types::{self, Types};

/// A short tag such as `s`, `i`, `b`, `f`, `t` identifying a type family.
/// Two schemas with the same shorthand must produce the same SQL type
/// family (`schema_types::SqlDialect::to_sql` invariant).
pub fn sql_shorthand(simplified_type: Types, format: Option<&str>) -> &'static str {
    if simplified_type.overlaps(types::OBJECT) {
        "j"
    } else if simplified_type.overlaps(types::ARRAY) {
        "a"
    } else if simplified_type.overlaps(types::BOOLEAN) {
        "b"
    } else if is_datetime(simplified_type, format) {
        "t"
    } else if simplified_type.overlaps(types::INTEGER) && !simplified_type.overlaps(types::FRACTIONAL)
    {
        "i"
    } else if simplified_type.overlaps(types::INT_OR_FRAC) {
        "f"
    } else if simplified_type.overlaps(types::STRING) {
        "s"
    } else {
        "u"
    }
}

fn is_datetime(simplified_type: Types, format: Option<&str>) -> bool {
    simplified_type.overlaps(types::STRING) && matches!(format, Some("date-time"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn shorthand_distinguishes_datetime_from_plain_string() {
        assert_eq!(sql_shorthand(types::STRING, None), "s");
        assert_eq!(sql_shorthand(types::STRING, Some("date-time")), "t");
    }

    #[test]
    fn shorthand_prefers_integer_over_fractional_when_pure() {
        assert_eq!(sql_shorthand(types::INTEGER, None), "i");
        assert_eq!(sql_shorthand(types::INT_OR_FRAC, None), "f");
    }
}
