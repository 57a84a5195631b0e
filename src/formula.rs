//! Formula ingestion and normalization
//!
//! A formula is a declarative scent recipe: named ingredients with
//! percentages, note types, and an optional carrier solvent. Upstream
//! producers have historically been sloppy about key naming (`noteType` vs
//! `note_type`, `cas` vs `cas_number`, `name` vs `ingredient`), so this
//! boundary normalizes everything into one strict schema via serde aliases.
//! Nothing past this module ever special-cases alternate key names.

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Fragrance layering tag.
///
/// Used twice: as a compile-time sort key (carriers and base notes dispense
/// first) and as the grouping key for layered execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "&'static str")]
pub enum NoteType {
    Top,
    Heart,
    Base,
    Carrier,
    /// Missing or unrecognized tag; treated as a heart note.
    Unknown,
}

impl From<String> for NoteType {
    fn from(s: String) -> Self {
        match s.trim().to_lowercase().as_str() {
            "top" => NoteType::Top,
            // "middle" is the older name for heart notes
            "heart" | "middle" => NoteType::Heart,
            "base" => NoteType::Base,
            "carrier" => NoteType::Carrier,
            _ => NoteType::Unknown,
        }
    }
}

impl From<NoteType> for &'static str {
    fn from(n: NoteType) -> Self {
        n.as_str()
    }
}

impl NoteType {
    pub fn as_str(self) -> &'static str {
        match self {
            NoteType::Top => "top",
            NoteType::Heart => "heart",
            NoteType::Base => "base",
            NoteType::Carrier => "carrier",
            NoteType::Unknown => "",
        }
    }

    /// Sort rank for liquid dispensing: carriers and long runs lead.
    pub fn liquid_rank(self) -> u8 {
        match self {
            NoteType::Carrier => 0,
            NoteType::Base => 1,
            NoteType::Heart | NoteType::Unknown => 2,
            NoteType::Top => 3,
        }
    }

    /// Sort rank for atomizer runs: base notes establish first.
    pub fn atomizer_rank(self) -> u8 {
        match self {
            NoteType::Base => 0,
            NoteType::Heart | NoteType::Carrier | NoteType::Unknown => 1,
            NoteType::Top => 2,
        }
    }
}

impl Default for NoteType {
    fn default() -> Self {
        NoteType::Unknown
    }
}

impl std::fmt::Display for NoteType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// One named ingredient of a formula.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Ingredient {
    #[serde(alias = "ingredient")]
    pub name: String,

    /// Share of the total formula, 0-100.
    #[serde(default)]
    pub percentage: f64,

    /// Scent family (citrus, woody, musk, ...). Free text.
    #[serde(default)]
    pub category: String,

    #[serde(default, alias = "noteType")]
    pub note_type: NoteType,

    /// CAS registry number, when known.
    #[serde(default, alias = "cas_number")]
    pub cas: Option<String>,
}

impl Ingredient {
    /// Carrier solvents are excluded from atomizer and accord mapping.
    pub fn is_carrier(&self) -> bool {
        self.note_type == NoteType::Carrier
            || matches!(self.category.to_lowercase().as_str(), "carrier" | "solvent")
    }
}

/// Optional carrier entry kept separate from the aroma ingredients.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Carrier {
    #[serde(default = "default_carrier_name")]
    pub name: String,

    #[serde(default)]
    pub percentage: f64,

    #[serde(default, alias = "cas_number")]
    pub cas: Option<String>,
}

fn default_carrier_name() -> String {
    "Ethanol".to_string()
}

/// A complete declarative scent recipe.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Formula {
    #[serde(default = "default_formula_name")]
    pub name: String,

    #[serde(default)]
    pub description: String,

    pub ingredients: Vec<Ingredient>,

    #[serde(default)]
    pub carrier: Option<Carrier>,
}

fn default_formula_name() -> String {
    "Unnamed".to_string()
}

impl Formula {
    /// Parse a formula from JSON text.
    ///
    /// A missing `ingredients` array is reported as [`Error::Formula`]
    /// rather than a raw deserialization error, since it is the one
    /// structural requirement producers most often get wrong.
    pub fn from_json(raw: &str) -> Result<Formula> {
        let value: serde_json::Value = serde_json::from_str(raw)?;
        if value.get("ingredients").map(|v| v.is_array()) != Some(true) {
            return Err(Error::Formula(
                "formula JSON must contain an 'ingredients' array".to_string(),
            ));
        }
        Ok(serde_json::from_value(value)?)
    }

    /// The aroma ingredients: everything that is not a carrier solvent.
    pub fn aroma_ingredients(&self) -> impl Iterator<Item = &Ingredient> {
        self.ingredients.iter().filter(|i| !i.is_carrier())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_note_type_parse_aliases() {
        assert_eq!(NoteType::from("Top".to_string()), NoteType::Top);
        assert_eq!(NoteType::from("middle".to_string()), NoteType::Heart);
        assert_eq!(NoteType::from("HEART".to_string()), NoteType::Heart);
        assert_eq!(NoteType::from("carrier".to_string()), NoteType::Carrier);
        assert_eq!(NoteType::from("whatever".to_string()), NoteType::Unknown);
    }

    #[test]
    fn test_liquid_rank_ordering() {
        assert!(NoteType::Carrier.liquid_rank() < NoteType::Base.liquid_rank());
        assert!(NoteType::Base.liquid_rank() < NoteType::Heart.liquid_rank());
        assert!(NoteType::Heart.liquid_rank() < NoteType::Top.liquid_rank());
        assert_eq!(NoteType::Unknown.liquid_rank(), NoteType::Heart.liquid_rank());
    }

    #[test]
    fn test_atomizer_rank_ordering() {
        assert!(NoteType::Base.atomizer_rank() < NoteType::Heart.atomizer_rank());
        assert!(NoteType::Heart.atomizer_rank() < NoteType::Top.atomizer_rank());
        assert_eq!(NoteType::Unknown.atomizer_rank(), NoteType::Heart.atomizer_rank());
    }

    #[test]
    fn test_key_alias_normalization() {
        let json = r#"{
            "name": "Alias Test",
            "ingredients": [
                {"ingredient": "Hedione", "percentage": 12.0, "noteType": "heart", "cas_number": "24851-98-7"},
                {"name": "Linalool", "percentage": 8.0, "note_type": "top", "cas": "78-70-6"}
            ]
        }"#;
        let formula = Formula::from_json(json).unwrap();
        assert_eq!(formula.ingredients[0].name, "Hedione");
        assert_eq!(formula.ingredients[0].note_type, NoteType::Heart);
        assert_eq!(formula.ingredients[0].cas.as_deref(), Some("24851-98-7"));
        assert_eq!(formula.ingredients[1].note_type, NoteType::Top);
    }

    #[test]
    fn test_missing_ingredients_rejected() {
        let err = Formula::from_json(r#"{"name": "empty"}"#).unwrap_err();
        assert!(matches!(err, Error::Formula(_)));
    }

    #[test]
    fn test_carrier_detection() {
        let ing = Ingredient {
            name: "DPG".to_string(),
            percentage: 60.0,
            category: "Solvent".to_string(),
            note_type: NoteType::Unknown,
            cas: None,
        };
        assert!(ing.is_carrier());
    }
}
