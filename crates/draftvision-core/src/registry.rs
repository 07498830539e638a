// Schema registry: which raw fields feed each position group's model.
//
// The registry is static configuration. Adding a position group means adding
// a schema entry (in code or in registry.toml), never new model code.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, HashSet};
use thiserror::Error;

use crate::error::{EngineError, Result};

// ---------------------------------------------------------------------------
// Error type
// ---------------------------------------------------------------------------

#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("failed to parse registry: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("alias `{alias}` is claimed by both `{first}` and `{second}`")]
    DuplicateAlias {
        alias: String,
        first: String,
        second: String,
    },

    #[error("position group `{0}` declares no fields")]
    EmptySchema(String),

    #[error("position group `{group}` lists field `{field}` more than once")]
    DuplicateField { group: String, field: String },

    #[error("position group name must not be blank")]
    BlankGroup,

    #[error("position group `{0}` is declared more than once")]
    DuplicateGroup(String),
}

// ---------------------------------------------------------------------------
// Public types
// ---------------------------------------------------------------------------

/// Field declaration for one position group.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PositionSchema {
    /// Canonical group code, e.g. "QB" or "DL".
    pub group: String,
    /// Raw position strings that map to this group. The group code itself
    /// always resolves, whether or not it is listed here.
    #[serde(default)]
    pub aliases: Vec<String>,
    /// Numeric inputs, in output column order.
    #[serde(default)]
    pub numeric: Vec<String>,
    /// Categorical inputs, one-hot encoded after the numeric columns.
    #[serde(default)]
    pub categorical: Vec<String>,
}

impl PositionSchema {
    pub fn new(group: &str, aliases: &[&str], numeric: &[&str], categorical: &[&str]) -> Self {
        Self {
            group: group.to_string(),
            aliases: aliases.iter().map(|s| s.to_string()).collect(),
            numeric: numeric.iter().map(|s| s.to_string()).collect(),
            categorical: categorical.iter().map(|s| s.to_string()).collect(),
        }
    }

    /// Borrowed view of the field lists.
    pub fn fields(&self) -> FieldSet<'_> {
        FieldSet {
            numeric: &self.numeric,
            categorical: &self.categorical,
        }
    }

    /// Whether two schemas feed a model the same inputs. Aliases do not
    /// affect the feature space, so they are ignored.
    pub fn same_fields(&self, other: &PositionSchema) -> bool {
        self.numeric == other.numeric && self.categorical == other.categorical
    }
}

/// The relevant inputs for one position group.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FieldSet<'a> {
    pub numeric: &'a [String],
    pub categorical: &'a [String],
}

/// Raw deserialization target for registry.toml.
#[derive(Debug, Deserialize)]
struct RegistryFile {
    positions: Vec<PositionSchema>,
}

/// Lookup from raw position strings to position-group schemas.
#[derive(Debug, Clone)]
pub struct SchemaRegistry {
    schemas: BTreeMap<String, PositionSchema>,
    aliases: HashMap<String, String>,
}

// ---------------------------------------------------------------------------
// Built-in schemas
// ---------------------------------------------------------------------------

/// Physical-testing measurements shared by every group.
const COMBINE_FIELDS: &[&str] = &["height", "weight", "forty", "vertical", "bench", "broad_jump"];

/// Team context shared by every group.
const CONTEXT_FIELDS: &[&str] = &["team_sos"];

const CATEGORICAL_FIELDS: &[&str] = &["school", "conference"];

fn builtin_schema(group: &str, aliases: &[&str], position_stats: &[&str]) -> PositionSchema {
    let numeric: Vec<&str> = position_stats
        .iter()
        .chain(CONTEXT_FIELDS)
        .chain(COMBINE_FIELDS)
        .copied()
        .collect();
    PositionSchema::new(group, aliases, &numeric, CATEGORICAL_FIELDS)
}

/// The schemas shipped with the engine.
pub fn builtin_schemas() -> Vec<PositionSchema> {
    vec![
        builtin_schema(
            "QB",
            &["QB"],
            &[
                "pass_completions",
                "pass_attempts",
                "pass_yards",
                "pass_touchdowns",
                "pass_interceptions",
                "pass_rating",
            ],
        ),
        builtin_schema(
            "RB",
            &["RB", "HB", "FB"],
            &[
                "rush_attempts",
                "rush_yards",
                "rush_touchdowns",
                "rush_yards_per_attempt",
                "receptions",
                "receiving_yards",
            ],
        ),
        builtin_schema(
            "WR",
            &["WR", "TE"],
            &[
                "receptions",
                "receiving_yards",
                "receiving_touchdowns",
                "yards_per_reception",
            ],
        ),
        builtin_schema("OL", &["OL", "OT", "T", "C", "G", "OG"], &[]),
        builtin_schema(
            "DL",
            &["DL", "DE", "DT", "NT"],
            &["tackles_for_loss", "sacks", "hurries", "total_tackles"],
        ),
        builtin_schema(
            "LB",
            &["LB", "ILB", "OLB"],
            &[
                "tackles_for_loss",
                "sacks",
                "hurries",
                "total_tackles",
                "solo_tackles",
            ],
        ),
        builtin_schema(
            "DB",
            &["DB", "CB", "S"],
            &["total_tackles", "solo_tackles", "passes_defended"],
        ),
    ]
}

// ---------------------------------------------------------------------------
// Registry
// ---------------------------------------------------------------------------

fn normalize_key(s: &str) -> String {
    s.trim().to_uppercase()
}

impl SchemaRegistry {
    /// Build a registry from explicit schemas. Blank or repeated groups,
    /// empty schemas, repeated fields and aliases claimed by two groups are
    /// rejected.
    pub fn new(schemas: Vec<PositionSchema>) -> std::result::Result<Self, RegistryError> {
        let mut claimed: HashMap<String, String> = HashMap::new();
        let mut groups = HashSet::new();
        for schema in &schemas {
            if schema.group.trim().is_empty() {
                return Err(RegistryError::BlankGroup);
            }
            if !groups.insert(schema.group.as_str()) {
                return Err(RegistryError::DuplicateGroup(schema.group.clone()));
            }
            if schema.numeric.is_empty() && schema.categorical.is_empty() {
                return Err(RegistryError::EmptySchema(schema.group.clone()));
            }
            let mut seen = HashSet::new();
            for field in schema.numeric.iter().chain(&schema.categorical) {
                if !seen.insert(field.as_str()) {
                    return Err(RegistryError::DuplicateField {
                        group: schema.group.clone(),
                        field: field.clone(),
                    });
                }
            }
            let keys = std::iter::once(&schema.group).chain(&schema.aliases);
            for key in keys {
                let key = normalize_key(key);
                match claimed.get(&key) {
                    Some(first) if *first != schema.group => {
                        return Err(RegistryError::DuplicateAlias {
                            alias: key,
                            first: first.clone(),
                            second: schema.group.clone(),
                        });
                    }
                    _ => {
                        claimed.insert(key, schema.group.clone());
                    }
                }
            }
        }
        Ok(Self::assemble(schemas))
    }

    /// The registry shipped with the engine.
    pub fn builtin() -> Self {
        Self::assemble(builtin_schemas())
    }

    /// Parse a registry from TOML text containing `[[positions]]` tables.
    pub fn from_toml_str(text: &str) -> std::result::Result<Self, RegistryError> {
        let file: RegistryFile = toml::from_str(text)?;
        Self::new(file.positions)
    }

    fn assemble(schemas: Vec<PositionSchema>) -> Self {
        let mut aliases = HashMap::new();
        let mut by_group = BTreeMap::new();
        for schema in schemas {
            aliases.insert(normalize_key(&schema.group), schema.group.clone());
            for alias in &schema.aliases {
                aliases.insert(normalize_key(alias), schema.group.clone());
            }
            by_group.insert(schema.group.clone(), schema);
        }
        Self {
            schemas: by_group,
            aliases,
        }
    }

    /// Resolve a raw position string (case-insensitive) to its group schema.
    pub fn resolve(&self, position: &str) -> Result<&PositionSchema> {
        self.aliases
            .get(&normalize_key(position))
            .and_then(|group| self.schemas.get(group))
            .ok_or_else(|| EngineError::UnknownPosition(position.to_string()))
    }

    /// Group code for a raw position string.
    pub fn group_of(&self, position: &str) -> Result<&str> {
        self.resolve(position).map(|s| s.group.as_str())
    }

    /// Numeric and categorical inputs for a position.
    pub fn fields_for(&self, position: &str) -> Result<FieldSet<'_>> {
        self.resolve(position).map(PositionSchema::fields)
    }

    /// All schemas, ordered by group code.
    pub fn schemas(&self) -> impl Iterator<Item = &PositionSchema> {
        self.schemas.values()
    }

    pub fn len(&self) -> usize {
        self.schemas.len()
    }

    pub fn is_empty(&self) -> bool {
        self.schemas.is_empty()
    }
}

impl Default for SchemaRegistry {
    fn default() -> Self {
        Self::builtin()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
