//! Decoding of request/response payloads into typed inventory values.
//!
//! Every payload passes through `check_sentinel` before any row is read, so
//! downstream code never inspects result rows positionally for errors.
use crate::error::{EngineError, Result};
use crate::models::{Entity, EntityKind, PartialFields, Repository};
use serde::Deserialize;
use serde_json::Value;
use std::collections::HashMap;

/// The reserved first field of a failed response row.
pub const ERROR_MARKER: &str = "Error";

fn is_marker(cell: &str) -> bool {
    cell == ERROR_MARKER || cell == "Error:"
}

/// Fails with `EngineError::Sentinel` when `value` encodes an error instead
/// of data: a single row whose first field is the error marker, or a bare
/// string prefixed with `Error:`.
pub fn check_sentinel(value: &Value) -> Result<()> {
    match value {
        Value::Array(rows) if rows.len() == 1 => {
            let Some(row) = rows[0].as_array() else {
                return Ok(());
            };
            match row.first().and_then(Value::as_str) {
                Some(first) if is_marker(first) => {
                    let message = row[1..]
                        .iter()
                        .map(cell_text)
                        .collect::<Vec<_>>()
                        .join(" ");
                    Err(EngineError::Sentinel(message))
                }
                _ => Ok(()),
            }
        }
        Value::String(s) if s.trim_start().starts_with("Error:") => Err(EngineError::Sentinel(
            s.trim_start()["Error:".len()..].trim().to_string(),
        )),
        _ => Ok(()),
    }
}

fn cell_text(cell: &Value) -> String {
    match cell {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Decodes a row table (`[[cell, ...], ...]`) after sentinel detection.
pub fn rows(value: &Value) -> Result<Vec<Vec<String>>> {
    check_sentinel(value)?;
    let table = value
        .as_array()
        .ok_or_else(|| EngineError::Decode(format!("expected a row table, got {}", value)))?;
    table
        .iter()
        .map(|row| match row {
            Value::Array(cells) => Ok(cells.iter().map(cell_text).collect::<Vec<_>>()),
            Value::String(line) => Ok(line.split_whitespace().map(String::from).collect::<Vec<_>>()),
            other => Err(EngineError::Decode(format!("expected a row, got {}", other))),
        })
        .filter(|row| !matches!(row, Ok(cells) if cells.is_empty()))
        .collect()
}

/// `list --versions` rows: `name version [version ...]`. The last listed
/// version is the linked one.
pub fn installed_entities(value: &Value, kind: EntityKind) -> Result<Vec<Entity>> {
    Ok(rows(value)?
        .into_iter()
        .map(|row| {
            let mut entity = Entity::named(row[0].clone(), kind);
            entity.installed_version = row.get(1..).and_then(|v| v.last()).cloned();
            entity.is_installed = true;
            entity
        })
        .collect())
}

/// `outdated --verbose` rows, e.g. `wget (1.21.3) < 1.24.5` or
/// `firefox (124.0) != 125.0`. Pinned suffixes like `[pinned at 1.0]` are
/// ignored.
pub fn outdated_entities(value: &Value, kind: EntityKind) -> Result<Vec<Entity>> {
    let mut entities = Vec::new();
    for row in rows(value)? {
        let separator = row.iter().position(|c| c == "<" || c == "!=");
        let (installed, latest) = match separator {
            Some(sep) => (&row[1..sep], &row[sep + 1..]),
            None => (&row[1..], &[][..]),
        };
        let installed = installed
            .iter()
            .flat_map(|c| c.split(','))
            .map(|c| c.trim_matches(|ch: char| ch == '(' || ch == ')').trim())
            .filter(|c| !c.is_empty())
            .last()
            .map(String::from);
        let latest = latest
            .iter()
            .take_while(|c| !c.starts_with('['))
            .last()
            .cloned();

        let mut entity = Entity::named(row[0].clone(), kind);
        entity.installed_version = installed;
        entity.latest_version = latest;
        entity.is_installed = true;
        entities.push(entity);
    }
    Ok(entities)
}

/// One-name-per-row listings (`leaves`, `formulae`, `casks`).
pub fn name_entities(value: &Value, kind: EntityKind, installed: bool) -> Result<Vec<Entity>> {
    Ok(rows(value)?
        .into_iter()
        .map(|row| {
            let mut entity = Entity::named(row[0].clone(), kind);
            entity.is_installed = installed;
            entity
        })
        .collect())
}

/// `tap` rows: one repository name per row.
pub fn repositories(value: &Value) -> Result<Vec<Repository>> {
    Ok(rows(value)?
        .into_iter()
        .map(|row| Repository {
            name: row[0].clone(),
            status: "installed".to_string(),
            description: None,
        })
        .collect())
}

// -----------------------------------------------------------------------------
// `info --json=v2`
// -----------------------------------------------------------------------------
#[derive(Deserialize, Debug, Default)]
struct InfoDocument {
    #[serde(default)]
    formulae: Vec<FormulaInfo>,
    #[serde(default)]
    casks: Vec<CaskInfo>,
}

#[derive(Deserialize, Debug, Default)]
struct FormulaVersions {
    stable: Option<String>,
}

#[derive(Deserialize, Debug)]
struct InstalledKeg {
    version: String,
}

#[derive(Deserialize, Debug)]
struct FormulaInfo {
    name: String,
    /// `user/tap/name` for formulae outside homebrew/core.
    full_name: Option<String>,
    #[serde(default)]
    aliases: Vec<String>,
    #[serde(default)]
    oldnames: Vec<String>,
    desc: Option<String>,
    homepage: Option<String>,
    #[serde(default)]
    versions: FormulaVersions,
    #[serde(default)]
    dependencies: Vec<String>,
    #[serde(default)]
    conflicts_with: Vec<String>,
    #[serde(default)]
    installed: Vec<InstalledKeg>,
    #[serde(default)]
    deprecated: bool,
    deprecation_reason: Option<String>,
    #[serde(default)]
    disabled: bool,
    disable_reason: Option<String>,
}

#[derive(Deserialize, Debug)]
struct CaskInfo {
    token: String,
    full_token: Option<String>,
    #[serde(default)]
    old_tokens: Vec<String>,
    desc: Option<String>,
    homepage: Option<String>,
    version: Option<String>,
    installed: Option<String>,
    #[serde(default)]
    depends_on: Value,
    #[serde(default)]
    conflicts_with: Value,
    #[serde(default)]
    deprecated: bool,
    deprecation_reason: Option<String>,
    #[serde(default)]
    disabled: bool,
    disable_reason: Option<String>,
}

fn advisory(
    deprecated: bool,
    deprecation_reason: Option<String>,
    disabled: bool,
    disable_reason: Option<String>,
) -> Option<String> {
    if disabled {
        Some(match disable_reason {
            Some(reason) => format!("Disabled: {}", reason),
            None => "Disabled".to_string(),
        })
    } else if deprecated {
        Some(match deprecation_reason {
            Some(reason) => format!("Deprecated: {}", reason),
            None => "Deprecated".to_string(),
        })
    } else {
        None
    }
}

/// Flattens cask `depends_on`/`conflicts_with` objects (`{"cask": [..],
/// "formula": [..]}`) into a name list.
fn cask_names(value: &Value) -> Vec<String> {
    let Some(obj) = value.as_object() else {
        return Vec::new();
    };
    ["formula", "cask"]
        .iter()
        .filter_map(|key| obj.get(*key))
        .filter_map(Value::as_array)
        .flatten()
        .filter_map(Value::as_str)
        .map(String::from)
        .collect()
}

impl From<FormulaInfo> for Entity {
    fn from(info: FormulaInfo) -> Self {
        let installed_version = info.installed.last().map(|k| k.version.clone());
        Entity {
            is_installed: installed_version.is_some(),
            name: info.name,
            kind: EntityKind::Formula,
            installed_version,
            latest_version: info.versions.stable,
            size_kb: None,
            description: info.desc,
            homepage: info.homepage,
            dependencies: info.dependencies,
            conflicts: info.conflicts_with,
            warning: advisory(
                info.deprecated,
                info.deprecation_reason,
                info.disabled,
                info.disable_reason,
            ),
        }
    }
}

impl From<CaskInfo> for Entity {
    fn from(info: CaskInfo) -> Self {
        Entity {
            is_installed: info.installed.is_some(),
            dependencies: cask_names(&info.depends_on),
            conflicts: cask_names(&info.conflicts_with),
            name: info.token,
            kind: EntityKind::Cask,
            installed_version: info.installed,
            latest_version: info.version,
            size_kb: None,
            description: info.desc,
            homepage: info.homepage,
            warning: advisory(
                info.deprecated,
                info.deprecation_reason,
                info.disabled,
                info.disable_reason,
            ),
        }
    }
}

/// An info entry with the other names brew resolves to it.
struct Described {
    qualified: Option<String>,
    aliases: Vec<String>,
    entity: Entity,
}

impl Described {
    fn answers_to(&self, name: &str) -> bool {
        self.entity.name == name
            || self.qualified.as_deref() == Some(name)
            || self.aliases.iter().any(|alias| alias == name)
    }
}

fn described_entities(value: &Value) -> Result<Vec<Described>> {
    check_sentinel(value)?;
    let doc: InfoDocument = serde_json::from_value(value.clone())?;
    let formulae = doc.formulae.into_iter().map(|mut info| Described {
        qualified: info.full_name.take(),
        aliases: std::mem::take(&mut info.aliases)
            .into_iter()
            .chain(std::mem::take(&mut info.oldnames))
            .collect(),
        entity: Entity::from(info),
    });
    let casks = doc.casks.into_iter().map(|mut info| Described {
        qualified: info.full_token.take(),
        aliases: std::mem::take(&mut info.old_tokens),
        entity: Entity::from(info),
    });
    Ok(formulae.chain(casks).collect())
}

/// The single entity described by `info --json=v2 <name>`.
///
/// `name` may be the short name, the tap-qualified name, an alias or an old
/// name. A tap-qualified lookup keeps the qualified name so the entity lines
/// up with the listing row it came from; an alias resolves to the canonical
/// entity. A document with exactly one entry is taken as the answer.
pub fn info_entity(value: &Value, name: &str) -> Result<Entity> {
    let mut described = described_entities(value)?;
    let index = match described.iter().position(|d| d.answers_to(name)) {
        Some(index) => index,
        None if described.len() == 1 => 0,
        None => {
            return Err(EngineError::Decode(format!(
                "no info returned for '{}'",
                name
            )))
        }
    };
    let found = described.swap_remove(index);
    let mut entity = found.entity;
    if found.qualified.as_deref() == Some(name) {
        entity.name = name.to_string();
    }
    Ok(entity)
}

/// Enrichment map from `info --json=v2 --installed`.
pub fn installed_info(value: &Value) -> Result<HashMap<String, PartialFields>> {
    Ok(described_entities(value)?
        .into_iter()
        .map(|d| d.entity)
        .map(|e| {
            let fields = PartialFields {
                description: e.description,
                homepage: e.homepage,
                dependencies: Some(e.dependencies),
                conflicts: Some(e.conflicts),
                warning: e.warning,
                ..PartialFields::default()
            };
            (e.name, fields)
        })
        .collect())
}
