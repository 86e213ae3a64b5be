//! Built-in targets
//!
//! Registered under their canonical ids (`confgraph::builtins::<name>`), which
//! is also what exclusion lists refer to. `confgraph targets` prints them.

use anyhow::{bail, Context, Result};
use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;

use crate::error::PipelineResult;
use crate::pipeline::{Arguments, TargetRegistry, Value};

/// Registry holding every built-in target
pub fn registry() -> PipelineResult<TargetRegistry> {
    let mut registry = TargetRegistry::new();
    register_builtins(&mut registry)?;
    Ok(registry)
}

pub fn register_builtins(registry: &mut TargetRegistry) -> PipelineResult<()> {
    registry
        .register_fn(identity)?
        .register_fn(make_list)?
        .register_fn(make_dict)?
        .register_fn(get_item)?
        .register_fn(sum)?
        .register_fn(join)?
        .register_fn(dl_to_ld)?
        .register_fn(ld_to_dl)?
        .register_fn(read_text)?
        .register_fn(sleep)?;
    registry.register_fn_non_deterministic(now)?;
    Ok(())
}

fn argument<'a>(args: &'a Arguments, name: &str, index: usize) -> Result<&'a Value> {
    args.named_or_positional(name, index)
        .with_context(|| format!("missing required argument: {}", name))
}

fn list_argument<'a>(args: &'a Arguments, name: &str, index: usize) -> Result<&'a [Value]> {
    let value = argument(args, name, index)?;
    value
        .as_list()
        .with_context(|| format!("{} must be a list, got {}", name, value.kind()))
}

/// Returns `value` unchanged
pub fn identity(args: Arguments) -> Result<Value> {
    argument(&args, "value", 0).cloned()
}

/// `items` as a list, or all positional arguments when `items` is absent
pub fn make_list(args: Arguments) -> Result<Value> {
    if let Some(items) = args.get("items") {
        return Ok(Value::List(list_items(items)?));
    }
    let (positional, _) = args.into_parts();
    Ok(Value::List(positional))
}

fn list_items(items: &Value) -> Result<Vec<Value>> {
    match items {
        Value::List(items) => Ok(items.clone()),
        other => bail!("items must be a list, got {}", other.kind()),
    }
}

/// All keyword arguments as a map
pub fn make_dict(args: Arguments) -> Result<Value> {
    let (_, keyword) = args.into_parts();
    Ok(Value::Map(keyword))
}

/// Look up `key` in a map or an index in a list
pub fn get_item(args: Arguments) -> Result<Value> {
    let container = argument(&args, "container", 0)?;
    let key = argument(&args, "key", 1)?;

    match (container, key) {
        (Value::Map(map), Value::Str(k)) => map
            .get(k)
            .cloned()
            .with_context(|| format!("key {:?} not found", k)),
        (Value::List(items), Value::Int(i)) => {
            let index = if *i < 0 { items.len() as i64 + i } else { *i };
            usize::try_from(index)
                .ok()
                .and_then(|i| items.get(i))
                .cloned()
                .with_context(|| format!("index {} out of range for list of {}", i, items.len()))
        }
        (c, k) => bail!("cannot index {} with {}", c.kind(), k.kind()),
    }
}

/// Sum of numeric `values`; ints stay ints unless a float is present
pub fn sum(args: Arguments) -> Result<Value> {
    let values = list_argument(&args, "values", 0)?;

    if values.iter().all(|v| matches!(v, Value::Int(_))) {
        let mut total: i64 = 0;
        for v in values {
            if let Value::Int(i) = v {
                total = total.checked_add(*i).context("integer overflow")?;
            }
        }
        return Ok(Value::Int(total));
    }

    let mut total = 0.0;
    for v in values {
        total += v
            .as_f64()
            .with_context(|| format!("cannot sum {}", v.kind()))?;
    }
    Ok(Value::Float(total))
}

/// Join string `values` with `separator` (default "")
pub fn join(args: Arguments) -> Result<Value> {
    let values = list_argument(&args, "values", 0)?;
    let separator = match args.get("separator") {
        Some(v) => v.as_str().context("separator must be a string")?,
        None => "",
    };

    let parts = values
        .iter()
        .map(|v| match v {
            Value::Str(s) => Ok(s.clone()),
            Value::Int(_) | Value::Float(_) | Value::Bool(_) => Ok(v.to_string()),
            other => bail!("cannot join {}", other.kind()),
        })
        .collect::<Result<Vec<_>>>()?;
    Ok(Value::from(parts.join(separator)))
}

/// Dict of lists to list of dicts; stops at the shortest list
pub fn dl_to_ld(args: Arguments) -> Result<Value> {
    let data = argument(&args, "data", 0)?;
    let columns = data.as_map().context("data must be a map of lists")?;

    let mut lists = Vec::with_capacity(columns.len());
    for (name, column) in columns {
        let items = column
            .as_list()
            .with_context(|| format!("column {} must be a list", name))?;
        lists.push((name, items));
    }

    let rows = lists.iter().map(|(_, items)| items.len()).min().unwrap_or(0);
    let out = (0..rows)
        .map(|row| {
            Value::Map(
                lists
                    .iter()
                    .map(|(name, items)| ((*name).clone(), items[row].clone()))
                    .collect(),
            )
        })
        .collect();
    Ok(Value::List(out))
}

/// List of dicts to dict of lists, keyed by the first row's keys.
///
/// With `as_json_string: true` every cell is replaced by its JSON text.
pub fn ld_to_dl(args: Arguments) -> Result<Value> {
    let rows = list_argument(&args, "data", 0)?;
    let as_json = args
        .get("as_json_string")
        .and_then(Value::as_bool)
        .unwrap_or(false);

    let Some(first) = rows.first() else {
        return Ok(Value::Map(BTreeMap::new()));
    };
    let keys: Vec<&String> = first.as_map().context("rows must be maps")?.keys().collect();

    let mut out = BTreeMap::new();
    for key in keys {
        let mut column = Vec::with_capacity(rows.len());
        for (i, row) in rows.iter().enumerate() {
            let cell = row
                .as_map()
                .and_then(|m| m.get(key))
                .with_context(|| format!("row {} has no key {:?}", i, key))?;
            column.push(if as_json {
                Value::from(serde_json::to_string(cell)?)
            } else {
                cell.clone()
            });
        }
        out.insert(key.clone(), Value::List(column));
    }
    Ok(Value::Map(out))
}

/// Contents of the UTF-8 file at `path`
pub fn read_text(args: Arguments) -> Result<Value> {
    let path = argument(&args, "path", 0)?
        .as_str()
        .context("path must be a string")?;
    let text = std::fs::read_to_string(Path::new(path))
        .with_context(|| format!("failed to read {}", path))?;
    Ok(Value::from(text))
}

/// Sleep for `seconds`, then return `value` (null when absent)
pub fn sleep(args: Arguments) -> Result<Value> {
    let seconds = argument(&args, "seconds", 0)?
        .as_f64()
        .context("seconds must be a number")?;
    if !(0.0..=3600.0).contains(&seconds) {
        bail!("seconds must be between 0 and 3600, got {}", seconds);
    }
    std::thread::sleep(Duration::from_secs_f64(seconds));
    Ok(args.named_or_positional("value", 1).cloned().unwrap_or(Value::Null))
}

/// Current UTC time as RFC 3339
pub fn now(_args: Arguments) -> Result<Value> {
    Ok(Value::from(chrono::Utc::now().to_rfc3339()))
}
