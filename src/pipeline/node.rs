/// Config graph nodes
///
/// A pipeline document is a tree of JSON-like values. Mappings carrying a
/// `_target_` key are invocable; everything else is plain data that is rebuilt
/// with its nested invocables substituted by their results.
use serde_json::Value as Json;

use super::value::Value;
use crate::error::{PipelineError, PipelineResult};

pub const KEY_TARGET: &str = "_target_";
pub const KEY_ARGS: &str = "_args_";
pub const KEY_CACHE_RESULT: &str = "_cache_result_";
pub const KEY_CALL: &str = "_call_";
pub const KEY_RECURSIVE: &str = "_recursive_";

/// How resolved arguments are handed to a target
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CallMode {
    /// `_args_` positionally, everything else by name
    #[default]
    Keyword,
    /// `_args_` followed by the keyword values in authored order, no names
    Positional,
}

impl CallMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Keyword => "keyword",
            Self::Positional => "positional",
        }
    }
}

/// Per-node control keys
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeOptions {
    /// `_cache_result_`; false skips fingerprinting and the cache entirely
    pub cache_result: bool,
    pub call: CallMode,
    /// `_recursive_`; `None` inherits from the enclosing node
    pub recursive: Option<bool>,
}

impl Default for NodeOptions {
    fn default() -> Self {
        Self {
            cache_result: true,
            call: CallMode::Keyword,
            recursive: None,
        }
    }
}

/// A node carrying a target
#[derive(Debug, Clone, PartialEq)]
pub struct Invocation {
    pub target: String,
    pub args: Vec<ConfigNode>,
    /// Keyword arguments in authored order
    pub kwargs: Vec<(String, ConfigNode)>,
    pub options: NodeOptions,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ConfigNode {
    Scalar(Value),
    List(Vec<ConfigNode>),
    /// Mapping without a target, in authored order
    Mapping(Vec<(String, ConfigNode)>),
    Invocable(Invocation),
}

impl ConfigNode {
    /// Build a node tree from a JSON document
    pub fn from_json(json: &Json) -> PipelineResult<Self> {
        Self::parse(json, "root")
    }

    fn parse(json: &Json, path: &str) -> PipelineResult<Self> {
        match json {
            Json::Array(items) => items
                .iter()
                .enumerate()
                .map(|(i, item)| Self::parse(item, &format!("{}[{}]", path, i)))
                .collect::<PipelineResult<Vec<_>>>()
                .map(ConfigNode::List),
            Json::Object(map) if map.contains_key(KEY_TARGET) => {
                Invocation::parse(map, path).map(ConfigNode::Invocable)
            }
            Json::Object(map) => map
                .iter()
                .map(|(k, v)| Ok((k.clone(), Self::parse(v, &format!("{}.{}", path, k))?)))
                .collect::<PipelineResult<Vec<_>>>()
                .map(ConfigNode::Mapping),
            Json::Number(n) if n.is_u64() && n.as_i64().is_none() => {
                Err(PipelineError::InvalidConfig {
                    path: path.to_string(),
                    reason: format!("integer {} does not fit in a signed 64-bit value", n),
                })
            }
            scalar => Ok(ConfigNode::Scalar(Value::from(scalar.clone()))),
        }
    }

    /// Plain-data view of the node, with control keys kept as data.
    ///
    /// Used for arguments of non-recursive nodes, which receive their nested
    /// configs unresolved.
    pub fn to_value(&self) -> Value {
        match self {
            Self::Scalar(v) => v.clone(),
            Self::List(items) => Value::List(items.iter().map(ConfigNode::to_value).collect()),
            Self::Mapping(entries) => Value::Map(
                entries
                    .iter()
                    .map(|(k, v)| (k.clone(), v.to_value()))
                    .collect(),
            ),
            Self::Invocable(inv) => inv.to_value(),
        }
    }

    /// Number of invocable nodes in this subtree
    pub fn count_invocables(&self) -> usize {
        match self {
            Self::Scalar(_) => 0,
            Self::List(items) => items.iter().map(ConfigNode::count_invocables).sum(),
            Self::Mapping(entries) => entries.iter().map(|(_, v)| v.count_invocables()).sum(),
            Self::Invocable(inv) => {
                1 + inv.args.iter().map(ConfigNode::count_invocables).sum::<usize>()
                    + inv
                        .kwargs
                        .iter()
                        .map(|(_, v)| v.count_invocables())
                        .sum::<usize>()
            }
        }
    }
}

impl Invocation {
    fn parse(map: &serde_json::Map<String, Json>, path: &str) -> PipelineResult<Self> {
        let invalid = |reason: String| PipelineError::InvalidConfig {
            path: path.to_string(),
            reason,
        };

        let target = match map.get(KEY_TARGET) {
            Some(Json::String(s)) if !s.trim().is_empty() => s.trim().to_string(),
            Some(other) => {
                return Err(invalid(format!(
                    "{} must be a non-empty string, got {}",
                    KEY_TARGET, other
                )))
            }
            None => return Err(invalid(format!("missing {}", KEY_TARGET))),
        };

        let mut options = NodeOptions::default();
        let mut args = Vec::new();
        let mut kwargs = Vec::new();

        for (key, value) in map {
            let child_path = format!("{}.{}", path, key);
            match key.as_str() {
                KEY_TARGET => {}
                KEY_ARGS => match value {
                    Json::Array(items) => {
                        for (i, item) in items.iter().enumerate() {
                            args.push(ConfigNode::parse(item, &format!("{}[{}]", child_path, i))?);
                        }
                    }
                    other => {
                        return Err(invalid(format!("{} must be a list, got {}", KEY_ARGS, other)))
                    }
                },
                KEY_CACHE_RESULT => {
                    options.cache_result = value.as_bool().ok_or_else(|| {
                        invalid(format!("{} must be a bool, got {}", KEY_CACHE_RESULT, value))
                    })?;
                }
                KEY_RECURSIVE => {
                    options.recursive = Some(value.as_bool().ok_or_else(|| {
                        invalid(format!("{} must be a bool, got {}", KEY_RECURSIVE, value))
                    })?);
                }
                KEY_CALL => {
                    options.call = match value.as_str() {
                        Some("keyword") => CallMode::Keyword,
                        Some("positional") => CallMode::Positional,
                        _ => {
                            return Err(invalid(format!(
                                "{} must be \"keyword\" or \"positional\", got {}",
                                KEY_CALL, value
                            )))
                        }
                    };
                }
                _ => kwargs.push((key.clone(), ConfigNode::parse(value, &child_path)?)),
            }
        }

        Ok(Self {
            target,
            args,
            kwargs,
            options,
        })
    }

    /// Names of the keyword arguments, in authored order
    pub fn arg_names(&self) -> Vec<String> {
        self.kwargs.iter().map(|(k, _)| k.clone()).collect()
    }

    fn to_value(&self) -> Value {
        let mut map = std::collections::BTreeMap::new();
        map.insert(KEY_TARGET.to_string(), Value::Str(self.target.clone()));
        if !self.args.is_empty() {
            map.insert(
                KEY_ARGS.to_string(),
                Value::List(self.args.iter().map(ConfigNode::to_value).collect()),
            );
        }
        if !self.options.cache_result {
            map.insert(KEY_CACHE_RESULT.to_string(), Value::Bool(false));
        }
        if self.options.call != CallMode::Keyword {
            map.insert(KEY_CALL.to_string(), Value::from(self.options.call.as_str()));
        }
        if let Some(recursive) = self.options.recursive {
            map.insert(KEY_RECURSIVE.to_string(), Value::Bool(recursive));
        }
        for (k, v) in &self.kwargs {
            map.insert(k.clone(), v.to_value());
        }
        Value::Map(map)
    }
}
