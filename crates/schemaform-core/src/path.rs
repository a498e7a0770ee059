use serde_json::{Map, Value};

/// One step of a dotted/bracket path.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Segment {
    Key(String),
    Index(usize),
}

/// Parses `a.b[0].c`, `items[2]` and `a["x.y"]` style paths.
pub fn parse(path: &str) -> Vec<Segment> {
    let mut segments = Vec::new();
    let mut current = String::new();
    let mut chars = path.trim().chars();

    while let Some(ch) = chars.next() {
        match ch {
            '.' => flush(&mut current, &mut segments),
            '[' => {
                flush(&mut current, &mut segments);
                let mut inner = String::new();
                for next in chars.by_ref() {
                    if next == ']' {
                        break;
                    }
                    inner.push(next);
                }
                push_bracket(inner.trim(), &mut segments);
            }
            other => current.push(other),
        }
    }
    flush(&mut current, &mut segments);
    segments
}

fn flush(current: &mut String, segments: &mut Vec<Segment>) {
    if !current.is_empty() {
        segments.push(Segment::Key(std::mem::take(current)));
    }
}

fn push_bracket(inner: &str, segments: &mut Vec<Segment>) {
    let quoted = inner
        .strip_prefix('"')
        .and_then(|rest| rest.strip_suffix('"'))
        .or_else(|| inner.strip_prefix('\'').and_then(|rest| rest.strip_suffix('\'')));
    if let Some(key) = quoted {
        segments.push(Segment::Key(key.to_string()));
    } else if let Ok(index) = inner.parse::<usize>() {
        segments.push(Segment::Index(index));
    } else if !inner.is_empty() {
        segments.push(Segment::Key(inner.to_string()));
    }
}

/// First key of the path, usually the field id a variable points into.
pub fn root_key(path: &str) -> Option<String> {
    match parse(path).into_iter().next() {
        Some(Segment::Key(key)) => Some(key),
        _ => None,
    }
}

/// Last key of the path, skipping trailing indexes.
pub fn last_key(path: &str) -> Option<String> {
    parse(path).into_iter().rev().find_map(|segment| match segment {
        Segment::Key(key) => Some(key),
        Segment::Index(_) => None,
    })
}

pub fn get<'a>(root: &'a Value, path: &str) -> Option<&'a Value> {
    get_segments(root, &parse(path))
}

pub fn get_segments<'a>(root: &'a Value, segments: &[Segment]) -> Option<&'a Value> {
    segments
        .iter()
        .try_fold(root, |current, segment| step(current, segment))
}

/// Looks a path up in a map whose keys are the first path segment.
pub fn lookup<'a>(map: &'a Map<String, Value>, path: &str) -> Option<&'a Value> {
    let segments = parse(path);
    let (first, rest) = segments.split_first()?;
    let head = match first {
        Segment::Key(key) => map.get(key)?,
        Segment::Index(index) => map.get(&index.to_string())?,
    };
    get_segments(head, rest)
}

fn step<'a>(current: &'a Value, segment: &Segment) -> Option<&'a Value> {
    match (segment, current) {
        (Segment::Key(key), Value::Object(map)) => map.get(key),
        (Segment::Key(key), Value::Array(items)) => {
            key.parse::<usize>().ok().and_then(|index| items.get(index))
        }
        (Segment::Index(index), Value::Array(items)) => items.get(*index),
        (Segment::Index(index), Value::Object(map)) => map.get(&index.to_string()),
        _ => None,
    }
}

/// Writes `value` at `path`, creating intermediate containers as needed.
pub fn set(root: &mut Value, path: &str, value: Value) {
    set_segments(root, &parse(path), value);
}

pub fn set_segments(root: &mut Value, segments: &[Segment], value: Value) {
    let Some((last, parents)) = segments.split_last() else {
        *root = value;
        return;
    };

    let mut current = root;
    for (idx, segment) in parents.iter().enumerate() {
        let index_next = matches!(segments[idx + 1], Segment::Index(_));
        current = child_mut(current, segment, index_next);
    }

    match last {
        Segment::Key(key) => {
            ensure_object(current).insert(key.clone(), value);
        }
        Segment::Index(index) => {
            let items = ensure_array(current);
            if items.len() <= *index {
                items.resize(*index + 1, Value::Null);
            }
            items[*index] = value;
        }
    }
}

fn child_mut<'a>(current: &'a mut Value, segment: &Segment, index_next: bool) -> &'a mut Value {
    let empty = || {
        if index_next {
            Value::Array(Vec::new())
        } else {
            Value::Object(Map::new())
        }
    };
    let slot = match segment {
        Segment::Key(key) => ensure_object(current)
            .entry(key.clone())
            .or_insert_with(empty),
        Segment::Index(index) => {
            let items = ensure_array(current);
            if items.len() <= *index {
                items.resize(*index + 1, Value::Null);
            }
            &mut items[*index]
        }
    };
    if slot.is_null() {
        *slot = empty();
    }
    slot
}

fn ensure_object(value: &mut Value) -> &mut Map<String, Value> {
    if !value.is_object() {
        *value = Value::Object(Map::new());
    }
    match value {
        Value::Object(map) => map,
        _ => unreachable!("value was just replaced with an object"),
    }
}

fn ensure_array(value: &mut Value) -> &mut Vec<Value> {
    if !value.is_array() {
        *value = Value::Array(Vec::new());
    }
    match value {
        Value::Array(items) => items,
        _ => unreachable!("value was just replaced with an array"),
    }
}
