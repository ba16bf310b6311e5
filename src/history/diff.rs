use serde_json::Value;

/// Structural comparison of two JSON values, used to decide whether a
/// historical snapshot is the current version of an entity.
///
/// Objects are compared field by field, recursively. Arrays are compared
/// as unordered multisets: equal when every element of one side pairs
/// with a distinct, deep-equal element of the other. Scalars compare by
/// value.
pub fn has_differences(a: &Value, b: &Value) -> bool {
    !deep_equal(a, b)
}

fn deep_equal(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Object(a), Value::Object(b)) => {
            a.len() == b.len()
                && a.iter()
                    .all(|(key, av)| b.get(key).map_or(false, |bv| deep_equal(av, bv)))
        }
        (Value::Array(a), Value::Array(b)) => multisets_equal(a, b),
        _ => a == b,
    }
}

// deep_equal is an equivalence relation, so greedy pairing is exact.
fn multisets_equal(a: &[Value], b: &[Value]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    let mut matched = vec![false; b.len()];
    'outer: for av in a {
        for (i, bv) in b.iter().enumerate() {
            if !matched[i] && deep_equal(av, bv) {
                matched[i] = true;
                continue 'outer;
            }
        }
        return false;
    }
    true
}
