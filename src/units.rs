use std::collections::HashMap;

#[derive(Debug, Clone, Copy, PartialEq)]
struct UnitConversion {
    label: &'static str,
    multiplier: f64,
}

/// Canonical label and scaling factor for a raw unit-of-measure string.
#[derive(Debug, Clone, PartialEq)]
pub struct ConvertedUnit {
    pub label: String,
    pub multiplier: f64,
}

/// Immutable alias -> canonical unit table, built once at startup and shared by reference.
#[derive(Debug, Clone)]
pub struct UnitTable {
    aliases: HashMap<&'static str, &'static str>,
    conversions: HashMap<&'static str, UnitConversion>,
}

impl UnitTable {
    pub fn standard() -> Self {
        let conversions = HashMap::from([
            ("B", conversion("bytes", 1.0)),
            ("KB", conversion("bytes", 1e3)),
            ("MB", conversion("bytes", 1e6)),
            ("GB", conversion("bytes", 1e9)),
            ("TB", conversion("bytes", 1e12)),
            ("s", conversion("seconds", 1.0)),
            ("ms", conversion("seconds", 1e-3)),
            ("us", conversion("seconds", 1e-6)),
            ("%", conversion("percent", 1.0)),
        ]);

        // Some agent plugins report "Bytes" for B and "M" for MB.
        let aliases = HashMap::from([
            ("Bytes", "B"),
            ("B", "B"),
            ("KB", "KB"),
            ("M", "MB"),
            ("MB", "MB"),
            ("GB", "GB"),
            ("TB", "TB"),
            ("s", "s"),
            ("ms", "ms"),
            ("us", "us"),
            ("%", "%"),
        ]);

        Self {
            aliases,
            conversions,
        }
    }

    /// Unknown units pass through unchanged with a multiplier of 1.
    pub fn convert(&self, uom: &str) -> ConvertedUnit {
        self.aliases
            .get(uom)
            .and_then(|canonical| self.conversions.get(canonical))
            .map(|c| ConvertedUnit {
                label: c.label.to_string(),
                multiplier: c.multiplier,
            })
            .unwrap_or_else(|| ConvertedUnit {
                label: uom.to_string(),
                multiplier: 1.0,
            })
    }
}

impl Default for UnitTable {
    fn default() -> Self {
        Self::standard()
    }
}

fn conversion(label: &'static str, multiplier: f64) -> UnitConversion {
    UnitConversion { label, multiplier }
}
