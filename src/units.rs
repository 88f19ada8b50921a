//! Physical quantity strings such as `"30mil"` or `"150W/m-K"`.
//!
//! Every value in the configuration records is a `<number><unit>` string
//! normalized to SI through a fixed table. The empty string means "not
//! specified" and is never read as zero.

use crate::error::ConfigError;

/// Kind of physical quantity a field holds, selecting the unit table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QuantityKind {
    Length,
    Conductivity,
    SpecificHeat,
    Density,
    /// Thermal contact resistance in K*m^2/W.
    ContactResistance,
    Dimensionless,
}

/// Numeric part and unit suffix of a quantity string.
#[derive(Debug, Clone, PartialEq)]
pub struct Quantity {
    pub value: f64,
    pub unit: String,
}

/// Splits `"1.2mil"` into `(1.2, "mil")`.
///
/// Returns `None` if the string does not start with a number.
pub fn parse_quantity(text: &str) -> Option<Quantity> {
    let text = text.trim();
    let numeric_len = text
        .char_indices()
        .take_while(|(_, c)| c.is_ascii_digit() || matches!(c, '-' | '+' | '.' | 'e' | 'E'))
        .map(|(i, c)| i + c.len_utf8())
        .last()?;

    // The numeric charset may swallow a leading 'e' of a unit; back off until it parses.
    let mut end = numeric_len;
    while end > 0 {
        if let Ok(value) = text[..end].parse::<f64>() {
            return Some(Quantity {
                value,
                unit: text[end..].trim().to_string(),
            });
        }
        end -= 1;
    }
    None
}

/// Scale factor that converts `unit` of the given kind into SI.
fn si_factor(kind: QuantityKind, unit: &str) -> Option<f64> {
    match kind {
        QuantityKind::Length => match unit {
            "m" => Some(1.0),
            "cm" => Some(1e-2),
            "mm" => Some(1e-3),
            "um" => Some(1e-6),
            "mil" => Some(25.4e-6),
            "in" => Some(25.4e-3),
            _ => None,
        },
        QuantityKind::Conductivity => match unit {
            "W/m-K" | "W/mK" | "W/m/K" => Some(1.0),
            _ => None,
        },
        QuantityKind::SpecificHeat => match unit {
            "J/gm-K" | "J/g-K" => Some(1e3),
            "J/kg-K" => Some(1.0),
            _ => None,
        },
        QuantityKind::Density => match unit {
            "gm/cc" | "g/cc" => Some(1e3),
            "kg/m3" | "kg/m^3" => Some(1.0),
            _ => None,
        },
        QuantityKind::ContactResistance => match unit {
            "K-m2/W" | "m2K/W" => Some(1.0),
            "K-mm2/W" => Some(1e-6),
            _ => None,
        },
        QuantityKind::Dimensionless => unit.is_empty().then_some(1.0),
    }
}

/// Normalizes a quantity string into SI.
///
/// - `""` returns `Ok(None)` (not applicable).
/// - A bare number is accepted for dimensionless values and for an explicit
///   zero of any kind (e.g. the conductivity of air).
/// - Anything else that does not match the unit table is a
///   [`ConfigError::BadUnit`].
pub fn normalize(
    kind: QuantityKind,
    text: &str,
    entity: &str,
    field: &'static str,
) -> Result<Option<f64>, ConfigError> {
    if text.trim().is_empty() {
        return Ok(None);
    }
    let bad = || ConfigError::BadUnit {
        entity: entity.to_string(),
        field,
        text: text.to_string(),
    };
    let q = parse_quantity(text).ok_or_else(bad)?;
    if q.unit.is_empty() && q.value == 0.0 {
        return Ok(Some(0.0));
    }
    let factor = si_factor(kind, &q.unit).ok_or_else(bad)?;
    let value = q.value * factor;
    if !value.is_finite() {
        return Err(bad());
    }
    Ok(Some(value))
}

/// Like [`normalize`] but for values that must be present.
pub fn require(
    kind: QuantityKind,
    text: &str,
    entity: &str,
    field: &'static str,
) -> Result<f64, ConfigError> {
    normalize(kind, text, entity, field)?.ok_or_else(|| ConfigError::MissingField {
        entity: entity.to_string(),
        field,
    })
}

/// Rejects zero, negative and non-finite lengths.
pub fn positive_length(value: f64, entity: &str, field: &'static str) -> Result<f64, ConfigError> {
    if value.is_finite() && value > 0.0 {
        Ok(value)
    } else {
        Err(ConfigError::InvalidThickness {
            entity: entity.to_string(),
            field,
            value,
        })
    }
}

/// Converts mils to metres.
pub fn mil(value: f64) -> f64 {
    value * 25.4e-6
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_quantity() {
        let q = parse_quantity("30mil").unwrap();
        assert_eq!(q.value, 30.0);
        assert_eq!(q.unit, "mil");

        let q = parse_quantity(".343W/m-K").unwrap();
        assert!((q.value - 0.343).abs() < 1e-12);
        assert_eq!(q.unit, "W/m-K");

        let q = parse_quantity("1e-3m").unwrap();
        assert!((q.value - 1e-3).abs() < 1e-15);
        assert_eq!(q.unit, "m");

        assert!(parse_quantity("mil").is_none());
    }

    #[test]
    fn test_normalize_lengths() {
        let t = normalize(QuantityKind::Length, "1.2mil", "Cu", "thickness")
            .unwrap()
            .unwrap();
        assert!((t - 30.48e-6).abs() < 1e-12, "t = {t}");

        let t = normalize(QuantityKind::Length, "6mm", "wall", "thickness")
            .unwrap()
            .unwrap();
        assert!((t - 6e-3).abs() < 1e-15);
    }

    #[test]
    fn test_normalize_material_units() {
        let c = normalize(QuantityKind::SpecificHeat, "0.860J/gm-K", "Al", "specific_heat")
            .unwrap()
            .unwrap();
        assert!((c - 860.0).abs() < 1e-9);

        let rho = normalize(QuantityKind::Density, "2.70gm/cc", "Al", "density")
            .unwrap()
            .unwrap();
        assert!((rho - 2700.0).abs() < 1e-9);
    }

    #[test]
    fn test_empty_is_unspecified_and_zero_is_zero() {
        assert_eq!(
            normalize(QuantityKind::Conductivity, "", "X", "conductivity").unwrap(),
            None
        );
        assert_eq!(
            normalize(QuantityKind::Conductivity, "0", "Air", "conductivity").unwrap(),
            Some(0.0)
        );
    }

    #[test]
    fn test_unknown_unit_is_rejected() {
        let err = normalize(QuantityKind::Length, "3furlong", "L1", "thickness").unwrap_err();
        assert!(matches!(err, ConfigError::BadUnit { .. }), "{err}");

        // Bare non-zero numbers carry no unit for a dimensional quantity.
        assert!(normalize(QuantityKind::Length, "3", "L1", "thickness").is_err());
    }

    #[test]
    fn test_require_reports_missing_field() {
        let err = require(QuantityKind::Length, "", "core1", "thickness").unwrap_err();
        assert!(matches!(err, ConfigError::MissingField { .. }));
        assert!(err.to_string().contains("core1"));
    }
}
