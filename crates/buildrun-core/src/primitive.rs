//! Build primitives and their command rendering.
//!
//! A build script can do exactly two things: place one block ([`Place`]) or
//! fill a box ([`Fill`]). Both are validated on construction, so anything
//! that reaches the command dispatcher is a single well-formed command line.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use crate::coords::{BoundingRegion, Point3};
use crate::error::CoreError;

/// Largest box a single fill may cover; the worker rejects bigger ones.
pub const MAX_FILL_VOLUME: i64 = 32_768;

const DEFAULT_NAMESPACE: &str = "minecraft";

/// Placement mode for [`Place`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PlaceMode {
    Replace,
    Destroy,
    Keep,
}

impl PlaceMode {
    pub const VALID: &'static [&'static str] = &["replace", "destroy", "keep"];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Replace => "replace",
            Self::Destroy => "destroy",
            Self::Keep => "keep",
        }
    }
}

impl FromStr for PlaceMode {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "replace" => Ok(Self::Replace),
            "destroy" => Ok(Self::Destroy),
            "keep" => Ok(Self::Keep),
            other => Err(CoreError::invalid(format!(
                "invalid placement mode: {}. Must be one of: {}",
                other,
                Self::VALID.join(", ")
            ))),
        }
    }
}

/// Fill mode for [`Fill`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FillMode {
    Destroy,
    Hollow,
    Keep,
    Outline,
    Replace,
}

impl FillMode {
    pub const VALID: &'static [&'static str] = &["destroy", "hollow", "keep", "outline", "replace"];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Destroy => "destroy",
            Self::Hollow => "hollow",
            Self::Keep => "keep",
            Self::Outline => "outline",
            Self::Replace => "replace",
        }
    }
}

impl FromStr for FillMode {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "destroy" => Ok(Self::Destroy),
            "hollow" => Ok(Self::Hollow),
            "keep" => Ok(Self::Keep),
            "outline" => Ok(Self::Outline),
            "replace" => Ok(Self::Replace),
            other => Err(CoreError::invalid(format!(
                "invalid fill mode: {}. Must be one of: {}",
                other,
                Self::VALID.join(", ")
            ))),
        }
    }
}

/// Block state qualifiers, rendered as `[key=value,...]`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockStates(BTreeMap<String, String>);

impl BlockStates {
    pub fn new() -> Self {
        Self::default()
    }

    /// Validate and insert one state.
    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<String>) -> Result<(), CoreError> {
        let key = key.into();
        let value = value.into();
        if key.is_empty() || !key.chars().all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_') {
            return Err(CoreError::invalid(format!("invalid block state key: {:?}", key)));
        }
        if value.is_empty() || !value.chars().all(is_state_value_char) {
            return Err(CoreError::invalid(format!(
                "invalid value for block state {}: {:?}",
                key, value
            )));
        }
        self.0.insert(key, value);
        Ok(())
    }

    /// Builder form of [`BlockStates::insert`].
    pub fn with(mut self, key: impl Into<String>, value: impl Into<String>) -> Result<Self, CoreError> {
        self.insert(key, value)?;
        Ok(self)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }
}

impl fmt::Display for BlockStates {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.0.is_empty() {
            return Ok(());
        }
        let joined = self
            .0
            .iter()
            .map(|(k, v)| format!("{}={}", k, v))
            .collect::<Vec<_>>()
            .join(",");
        write!(f, "[{}]", joined)
    }
}

fn is_state_value_char(c: char) -> bool {
    c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_' || c == '-' || c == '.'
}

/// Normalize a block identifier, adding the default namespace when missing.
///
/// Only `[a-z0-9_.-/]` are accepted around a single optional `:`, so a block
/// name can never smuggle extra arguments into a command line.
pub fn normalize_block(block: &str) -> Result<String, CoreError> {
    let block = block.trim();
    let (namespace, path) = match block.split_once(':') {
        Some((ns, path)) => (ns, path),
        None => (DEFAULT_NAMESPACE, block),
    };
    let valid_part = |s: &str| {
        !s.is_empty()
            && s.chars().all(|c| {
                c.is_ascii_lowercase() || c.is_ascii_digit() || matches!(c, '_' | '.' | '-' | '/')
            })
    };
    if !valid_part(namespace) || !valid_part(path) {
        return Err(CoreError::invalid(format!("invalid block type: {:?}", block)));
    }
    Ok(format!("{}:{}", namespace, path))
}

/// Place a single block.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Place {
    pub pos: Point3,
    pub block: String,
    pub states: BlockStates,
    pub mode: Option<PlaceMode>,
}

impl Place {
    pub fn new(pos: Point3, block: &str) -> Result<Self, CoreError> {
        Ok(Self {
            pos,
            block: normalize_block(block)?,
            states: BlockStates::new(),
            mode: None,
        })
    }

    /// Set the placement mode from its textual form.
    pub fn with_mode(mut self, mode: &str) -> Result<Self, CoreError> {
        self.mode = Some(mode.parse()?);
        Ok(self)
    }

    pub fn with_states(mut self, states: BlockStates) -> Self {
        self.states = states;
        self
    }

    /// Render the protocol command line.
    pub fn to_command(&self) -> String {
        let mut command = format!("setblock {} {}{}", self.pos, self.block, self.states);
        if let Some(mode) = self.mode {
            command.push(' ');
            command.push_str(mode.as_str());
        }
        command
    }
}

/// Fill the box between two corners.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Fill {
    pub from: Point3,
    pub to: Point3,
    pub block: String,
    pub states: BlockStates,
    pub mode: Option<FillMode>,
    pub replace_filter: Option<String>,
    pub replace_filter_states: BlockStates,
}

impl Fill {
    /// Create a fill, rejecting boxes larger than [`MAX_FILL_VOLUME`].
    pub fn new(from: Point3, to: Point3, block: &str) -> Result<Self, CoreError> {
        let dimensions = BoundingRegion::from_corners(from, to).dimensions();
        match dimensions.volume() {
            Some(volume) if volume <= MAX_FILL_VOLUME => {}
            _ => {
                return Err(CoreError::invalid(format!(
                    "fill from ({}) to ({}) covers {} blocks, limit is {}",
                    from, to, dimensions, MAX_FILL_VOLUME
                )))
            }
        }
        Ok(Self {
            from,
            to,
            block: normalize_block(block)?,
            states: BlockStates::new(),
            mode: None,
            replace_filter: None,
            replace_filter_states: BlockStates::new(),
        })
    }

    pub fn with_mode(mut self, mode: &str) -> Result<Self, CoreError> {
        self.mode = Some(mode.parse()?);
        Ok(self)
    }

    pub fn with_states(mut self, states: BlockStates) -> Self {
        self.states = states;
        self
    }

    /// Restrict a `replace` fill to blocks matching `filter`.
    ///
    /// The filter is only rendered when the mode is `replace`.
    pub fn with_replace_filter(mut self, filter: &str, states: BlockStates) -> Result<Self, CoreError> {
        self.replace_filter = Some(normalize_block(filter)?);
        self.replace_filter_states = states;
        Ok(self)
    }

    pub fn region(&self) -> BoundingRegion {
        BoundingRegion::from_corners(self.from, self.to)
    }

    pub fn volume(&self) -> Option<i64> {
        self.region().dimensions().volume()
    }

    /// Render the protocol command line.
    pub fn to_command(&self) -> String {
        let mut command = format!(
            "fill {} {} {}{}",
            self.from, self.to, self.block, self.states
        );
        if let Some(mode) = self.mode {
            command.push(' ');
            command.push_str(mode.as_str());
            if let (FillMode::Replace, Some(filter)) = (mode, &self.replace_filter) {
                command.push(' ');
                command.push_str(filter);
                command.push_str(&self.replace_filter_states.to_string());
            }
        }
        command
    }
}

/// Command that persists the blocks inside `region` as structure `name`.
pub fn structure_save_command(name: &str, region: &BoundingRegion) -> String {
    format!("structure save {} {} {}", name, region.min, region.max)
}

/// Whether `name` is usable as a structure identifier and artifact file stem.
pub fn is_valid_structure_name(name: &str) -> bool {
    !name.is_empty()
        && name.len() <= 64
        && name
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || matches!(c, '_' | '-' | '.'))
        && !name.starts_with('.')
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_place_command_with_states_and_mode() {
        let states = BlockStates::new().with("half", "lower").unwrap();
        let place = Place::new(Point3::new(2, 1, 0), "oak_door")
            .unwrap()
            .with_states(states)
            .with_mode("keep")
            .unwrap();
        assert_eq!(
            place.to_command(),
            "setblock 2 1 0 minecraft:oak_door[half=lower] keep"
        );
    }

    #[test]
    fn test_place_keeps_explicit_namespace() {
        let place = Place::new(Point3::new(0, 0, 0), "mymod:fancy_block").unwrap();
        assert_eq!(place.to_command(), "setblock 0 0 0 mymod:fancy_block");
    }

    #[test]
    fn test_unknown_place_mode_is_invalid_argument() {
        let err = Place::new(Point3::new(0, 0, 0), "stone")
            .unwrap()
            .with_mode("teleport")
            .unwrap_err();
        match err {
            CoreError::InvalidArgument(msg) => {
                assert!(msg.contains("teleport"));
                assert!(msg.contains("replace, destroy, keep"));
            }
            other => panic!("expected InvalidArgument, got {other:?}"),
        }
    }

    #[test]
    fn test_fill_modes() {
        for mode in FillMode::VALID {
            assert_eq!(mode.parse::<FillMode>().unwrap().as_str(), *mode);
        }
        assert!("teleport".parse::<FillMode>().is_err());
        // place-only modes are not fill modes and vice versa
        assert!("hollow".parse::<PlaceMode>().is_err());
    }

    #[test]
    fn test_fill_replace_filter_rendered_only_for_replace() {
        let filter_states = BlockStates::new().with("waterlogged", "true").unwrap();
        let fill = Fill::new(Point3::new(0, 0, 0), Point3::new(3, 3, 3), "glass")
            .unwrap()
            .with_mode("replace")
            .unwrap()
            .with_replace_filter("oak_stairs", filter_states.clone())
            .unwrap();
        assert_eq!(
            fill.to_command(),
            "fill 0 0 0 3 3 3 minecraft:glass replace minecraft:oak_stairs[waterlogged=true]"
        );

        let hollow = Fill::new(Point3::new(0, 0, 0), Point3::new(3, 3, 3), "glass")
            .unwrap()
            .with_mode("hollow")
            .unwrap()
            .with_replace_filter("oak_stairs", filter_states)
            .unwrap();
        assert_eq!(hollow.to_command(), "fill 0 0 0 3 3 3 minecraft:glass hollow");
    }

    #[test]
    fn test_fill_volume_limit() {
        let ok = Fill::new(Point3::new(0, 0, 0), Point3::new(31, 31, 31), "stone");
        assert!(ok.is_ok());
        let too_big = Fill::new(Point3::new(0, 0, 0), Point3::new(32, 31, 31), "stone");
        assert!(matches!(too_big, Err(CoreError::InvalidArgument(_))));
    }

    #[test]
    fn test_fill_volume_overflow_rejected() {
        // 2097152^3 is exactly 2^63.
        let huge = Fill::new(
            Point3::new(0, 0, 0),
            Point3::new(2_097_151, 2_097_151, 2_097_151),
            "stone",
        );
        assert!(matches!(huge, Err(CoreError::InvalidArgument(_))));

        let extreme = Fill::new(
            Point3::new(i32::MIN, i32::MIN, i32::MIN),
            Point3::new(i32::MAX, i32::MAX, i32::MAX),
            "stone",
        );
        assert!(matches!(extreme, Err(CoreError::InvalidArgument(_))));
    }

    #[test]
    fn test_block_injection_rejected() {
        assert!(normalize_block("stone\nop @a").is_err());
        assert!(normalize_block("stone keep").is_err());
        assert!(normalize_block("a:b:c").is_err());
        assert!(normalize_block("").is_err());
        assert_eq!(normalize_block(" stone ").unwrap(), "minecraft:stone");
    }

    #[test]
    fn test_state_validation() {
        let mut states = BlockStates::new();
        assert!(states.insert("facing", "north").is_ok());
        assert!(states.insert("Facing", "north").is_err());
        assert!(states.insert("facing", "north]").is_err());
        assert!(states.insert("age", "").is_err());
        assert_eq!(states.to_string(), "[facing=north]");
    }

    #[test]
    fn test_structure_save_command() {
        let region = BoundingRegion::from_corners(Point3::new(5, 0, 5), Point3::new(-1, 10, 2));
        assert_eq!(
            structure_save_command("structure_abc", &region),
            "structure save structure_abc -1 0 2 5 10 5"
        );
    }

    #[test]
    fn test_structure_names() {
        assert!(is_valid_structure_name("taj_mahal-2"));
        assert!(!is_valid_structure_name("Taj Mahal"));
        assert!(!is_valid_structure_name("../etc/passwd"));
        assert!(!is_valid_structure_name(""));
    }
}
