//! Unit-preserving resource quantity arithmetic.
//!
//! Kubernetes expresses CPU in decimal-SI quantities ("500m", "2") and memory
//! in binary-SI quantities ("128Mi", "2Gi"). Internally we normalize CPU to
//! millicores and memory to bytes, and every arithmetic operation carries the
//! unit tag through so a memory value never stringifies with a millicore
//! suffix. A 73847603-byte working set multiplied by a 1.2 safety factor must
//! come back as "88617123" bytes, not "88617123600m".

use std::cmp::Ordering;
use std::fmt;

/// Error type for quantity parsing and arithmetic.
#[derive(Debug, thiserror::Error)]
pub enum QuantityError {
    #[error("Failed to parse resource quantity: {0}")]
    Parse(String),

    #[error("Arithmetic overflow: {0} * {1} exceeds the representable range")]
    Overflow(i64, f64),

    #[error("Invalid multiplication factor: {0}")]
    InvalidFactor(f64),
}

/// Formatting family of a quantity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Format {
    /// Decimal SI, used for CPU. Canonical magnitude is millicores.
    DecimalSI,
    /// Binary SI, used for memory. Canonical magnitude is bytes.
    BinarySI,
}

/// A resource quantity in canonical integer units with its format tag.
///
/// `DecimalSI` magnitudes are millicores; `BinarySI` magnitudes are bytes.
/// Comparison is magnitude-based and tag-independent ("1000m" == "1"), while
/// arithmetic and printing preserve the tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ResourceQuantity {
    magnitude: i64,
    format: Format,
}

impl ResourceQuantity {
    /// A CPU quantity from millicores.
    pub fn millicores(m: i64) -> Self {
        Self {
            magnitude: m,
            format: Format::DecimalSI,
        }
    }

    /// A memory quantity from bytes.
    pub fn bytes(b: i64) -> Self {
        Self {
            magnitude: b,
            format: Format::BinarySI,
        }
    }

    /// Canonical magnitude (millicores or bytes depending on the tag).
    pub fn magnitude(&self) -> i64 {
        self.magnitude
    }

    /// The formatting family this quantity prints with.
    pub fn format(&self) -> Format {
        self.format
    }

    pub fn is_zero(&self) -> bool {
        self.magnitude == 0
    }

    /// Parse a CPU quantity string (e.g., "100m", "1", "0.5", "500000n") to
    /// a DecimalSI quantity in millicores.
    pub fn parse_cpu(quantity: &str) -> Result<Self, QuantityError> {
        let quantity = quantity.trim();
        if quantity.is_empty() {
            return Err(QuantityError::Parse("empty CPU quantity".to_string()));
        }

        let millis = if let Some(val) = quantity.strip_suffix('n') {
            // Nanocores to millicores
            parse_int(val, quantity)? / 1_000_000
        } else if let Some(val) = quantity.strip_suffix('u') {
            // Microcores to millicores
            parse_int(val, quantity)? / 1_000
        } else if let Some(val) = quantity.strip_suffix('m') {
            parse_int(val, quantity)?
        } else {
            // Whole cores, possibly fractional
            let cores: f64 = quantity
                .parse()
                .map_err(|_| QuantityError::Parse(quantity.to_string()))?;
            if !cores.is_finite() || cores < 0.0 {
                return Err(QuantityError::Parse(quantity.to_string()));
            }
            (cores * 1000.0).round() as i64
        };

        Ok(Self::millicores(millis))
    }

    /// Parse a memory quantity string (e.g., "128Mi", "1Gi", "256000Ki",
    /// "500M", plain bytes) to a BinarySI quantity in bytes.
    pub fn parse_memory(quantity: &str) -> Result<Self, QuantityError> {
        let quantity = quantity.trim();
        if quantity.is_empty() {
            return Err(QuantityError::Parse("empty memory quantity".to_string()));
        }

        const KI: i64 = 1024;
        let bytes = if let Some(val) = quantity.strip_suffix("Ki") {
            parse_int(val, quantity)? * KI
        } else if let Some(val) = quantity.strip_suffix("Mi") {
            parse_int(val, quantity)? * KI * KI
        } else if let Some(val) = quantity.strip_suffix("Gi") {
            parse_int(val, quantity)? * KI * KI * KI
        } else if let Some(val) = quantity.strip_suffix("Ti") {
            parse_int(val, quantity)? * KI * KI * KI * KI
        } else if let Some(val) = quantity
            .strip_suffix('K')
            .or_else(|| quantity.strip_suffix('k'))
        {
            parse_int(val, quantity)? * 1_000
        } else if let Some(val) = quantity.strip_suffix('M') {
            parse_int(val, quantity)? * 1_000_000
        } else if let Some(val) = quantity.strip_suffix('G') {
            parse_int(val, quantity)? * 1_000_000_000
        } else {
            parse_int(quantity, quantity)?
        };

        Ok(Self::bytes(bytes))
    }

    /// Multiply by a factor, preserving the unit tag.
    ///
    /// DecimalSI operates on the millicore magnitude, BinarySI on the byte
    /// magnitude. The result is floored to the canonical integer domain.
    pub fn multiply(&self, factor: f64) -> Result<Self, QuantityError> {
        if !factor.is_finite() || factor < 0.0 {
            return Err(QuantityError::InvalidFactor(factor));
        }

        let scaled = self.magnitude as f64 * factor;
        if scaled > i64::MAX as f64 {
            return Err(QuantityError::Overflow(self.magnitude, factor));
        }

        Ok(Self {
            magnitude: scaled.floor() as i64,
            format: self.format,
        })
    }

    /// Compare two quantities by canonical magnitude, ignoring the tag.
    pub fn compare(&self, other: &Self) -> Ordering {
        self.magnitude.cmp(&other.magnitude)
    }

    /// Clamp into `[lo, hi]`. Returns `self` (tag preserved) when in range,
    /// otherwise the violated bound with the bound's tag.
    pub fn clamp(&self, lo: &Self, hi: &Self) -> Self {
        if self.magnitude < lo.magnitude {
            *lo
        } else if self.magnitude > hi.magnitude {
            *hi
        } else {
            *self
        }
    }
}

impl fmt::Display for ResourceQuantity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.format {
            Format::DecimalSI => write!(f, "{}m", self.magnitude),
            Format::BinarySI => {
                const KI: i64 = 1024;
                const MI: i64 = KI * KI;
                const GI: i64 = MI * KI;
                if self.magnitude != 0 && self.magnitude % GI == 0 {
                    write!(f, "{}Gi", self.magnitude / GI)
                } else if self.magnitude != 0 && self.magnitude % MI == 0 {
                    write!(f, "{}Mi", self.magnitude / MI)
                } else if self.magnitude != 0 && self.magnitude % KI == 0 {
                    write!(f, "{}Ki", self.magnitude / KI)
                } else {
                    write!(f, "{}", self.magnitude)
                }
            }
        }
    }
}

fn parse_int(val: &str, original: &str) -> Result<i64, QuantityError> {
    let val = val.trim();
    val.parse::<i64>()
        .ok()
        .filter(|n| *n >= 0)
        .ok_or_else(|| QuantityError::Parse(original.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_cpu() {
        assert_eq!(ResourceQuantity::parse_cpu("100m").unwrap().magnitude(), 100);
        assert_eq!(ResourceQuantity::parse_cpu("1").unwrap().magnitude(), 1000);
        assert_eq!(ResourceQuantity::parse_cpu("0.5").unwrap().magnitude(), 500);
        assert_eq!(ResourceQuantity::parse_cpu("2.5").unwrap().magnitude(), 2500);
        assert_eq!(
            ResourceQuantity::parse_cpu("500000000n").unwrap().magnitude(),
            500
        );
        assert_eq!(
            ResourceQuantity::parse_cpu("500000u").unwrap().magnitude(),
            500
        );
        assert!(ResourceQuantity::parse_cpu("abc").is_err());
        assert!(ResourceQuantity::parse_cpu("").is_err());
    }

    #[test]
    fn test_parse_memory() {
        assert_eq!(
            ResourceQuantity::parse_memory("128Mi").unwrap().magnitude(),
            128 * 1024 * 1024
        );
        assert_eq!(
            ResourceQuantity::parse_memory("1Gi").unwrap().magnitude(),
            1024 * 1024 * 1024
        );
        assert_eq!(
            ResourceQuantity::parse_memory("256Ki").unwrap().magnitude(),
            256 * 1024
        );
        assert_eq!(
            ResourceQuantity::parse_memory("500M").unwrap().magnitude(),
            500_000_000
        );
        assert_eq!(
            ResourceQuantity::parse_memory("1000000").unwrap().magnitude(),
            1_000_000
        );
        assert!(ResourceQuantity::parse_memory("12Qi").is_err());
    }

    #[test]
    fn test_display_preserves_format() {
        assert_eq!(ResourceQuantity::millicores(1500).to_string(), "1500m");
        assert_eq!(
            ResourceQuantity::bytes(2 * 1024 * 1024 * 1024).to_string(),
            "2Gi"
        );
        assert_eq!(
            ResourceQuantity::bytes(128 * 1024 * 1024).to_string(),
            "128Mi"
        );
        // Non-aligned byte counts print as raw bytes, never with an SI suffix
        assert_eq!(ResourceQuantity::bytes(88617123).to_string(), "88617123");
    }

    #[test]
    fn test_roundtrip_by_magnitude_and_tag() {
        for q in [
            ResourceQuantity::millicores(100),
            ResourceQuantity::millicores(4000),
            ResourceQuantity::bytes(88617123),
            ResourceQuantity::bytes(512 * 1024 * 1024),
        ] {
            let parsed = match q.format() {
                Format::DecimalSI => ResourceQuantity::parse_cpu(&q.to_string()).unwrap(),
                Format::BinarySI => ResourceQuantity::parse_memory(&q.to_string()).unwrap(),
            };
            assert_eq!(parsed, q);
        }
    }

    #[test]
    fn test_multiply_preserves_tag() {
        // The bug class this exists to forbid: memory scaled in "millicore
        // mode" would stringify as "88617123600m".
        let mem = ResourceQuantity::bytes(73847603);
        let scaled = mem.multiply(1.2).unwrap();
        assert_eq!(scaled.magnitude(), 88617123);
        assert_eq!(scaled.format(), Format::BinarySI);
        assert_eq!(scaled.to_string(), "88617123");

        let cpu = ResourceQuantity::millicores(100);
        let scaled = cpu.multiply(1.2).unwrap();
        assert_eq!(scaled.magnitude(), 120);
        assert_eq!(scaled.to_string(), "120m");
    }

    #[test]
    fn test_multiply_overflow() {
        let big = ResourceQuantity::bytes(i64::MAX);
        assert!(matches!(
            big.multiply(2.0),
            Err(QuantityError::Overflow(_, _))
        ));
    }

    #[test]
    fn test_multiply_rejects_bad_factor() {
        let q = ResourceQuantity::millicores(100);
        assert!(q.multiply(-1.0).is_err());
        assert!(q.multiply(f64::NAN).is_err());
    }

    #[test]
    fn test_compare_is_tag_independent() {
        let one_core = ResourceQuantity::parse_cpu("1").unwrap();
        let thousand_m = ResourceQuantity::parse_cpu("1000m").unwrap();
        assert_eq!(one_core.compare(&thousand_m), Ordering::Equal);

        let gi = ResourceQuantity::parse_memory("1Gi").unwrap();
        assert_eq!(gi.magnitude(), 1073741824);
    }

    #[test]
    fn test_clamp() {
        let lo = ResourceQuantity::millicores(100);
        let hi = ResourceQuantity::millicores(4000);

        let below = ResourceQuantity::millicores(10);
        assert_eq!(below.clamp(&lo, &hi), lo);

        let above = ResourceQuantity::millicores(8000);
        assert_eq!(above.clamp(&lo, &hi), hi);

        let inside = ResourceQuantity::millicores(250);
        assert_eq!(inside.clamp(&lo, &hi), inside);
    }

    #[test]
    fn test_is_zero() {
        assert!(ResourceQuantity::millicores(0).is_zero());
        assert!(!ResourceQuantity::bytes(1).is_zero());
    }
}
