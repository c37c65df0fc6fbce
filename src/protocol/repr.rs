//! Python-style rendering of arguments for the `argsrepr` / `kwargsrepr` headers.
//!
//! Monitoring tools written against the Celery protocol display these strings
//! verbatim, so they mimic Python's `repr` of a tuple and a dict.

use serde_json::{Map, Value};

/// Render positional arguments as a Python tuple.
pub fn args_repr(args: &[Value]) -> String {
    match args {
        [] => "()".to_string(),
        [single] => format!("({},)", value_repr(single)),
        _ => format!("({})", join(args.iter().map(value_repr))),
    }
}

/// Render keyword arguments as a Python dict.
pub fn kwargs_repr(kwargs: &Map<String, Value>) -> String {
    dict_repr(kwargs)
}

/// Render a single JSON value the way Python would print it.
pub fn value_repr(value: &Value) -> String {
    match value {
        Value::Null => "None".to_string(),
        Value::Bool(true) => "True".to_string(),
        Value::Bool(false) => "False".to_string(),
        Value::Number(n) => n.to_string(),
        Value::String(s) => str_repr(s),
        Value::Array(items) => format!("[{}]", join(items.iter().map(value_repr))),
        Value::Object(map) => dict_repr(map),
    }
}

fn dict_repr(map: &Map<String, Value>) -> String {
    let entries = map
        .iter()
        .map(|(key, value)| format!("{}: {}", str_repr(key), value_repr(value)));
    format!("{{{}}}", join(entries))
}

fn str_repr(s: &str) -> String {
    // Python switches to double quotes when that avoids escaping
    let quote = if s.contains('\'') && !s.contains('"') {
        '"'
    } else {
        '\''
    };

    let mut out = String::with_capacity(s.len() + 2);
    out.push(quote);
    for c in s.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            c if c == quote => {
                out.push('\\');
                out.push(c);
            }
            c => out.push(c),
        }
    }
    out.push(quote);
    out
}

fn join(parts: impl Iterator<Item = String>) -> String {
    parts.collect::<Vec<_>>().join(", ")
}
