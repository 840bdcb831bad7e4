#![no_main]

use arbitrary::Arbitrary;
use libfuzzer_sys::fuzz_target;
use serde_json::{Map, Value};

use systest_executor::matcher;

/// Small JSON tree; depth is bounded by the input size.
#[derive(Arbitrary, Debug)]
enum FuzzValue {
    Null,
    Bool(bool),
    Number(i64),
    Text(String),
    Array(Vec<FuzzValue>),
    Object(Vec<(String, FuzzValue)>),
}

impl FuzzValue {
    fn into_json(self) -> Value {
        match self {
            Self::Null => Value::Null,
            Self::Bool(b) => Value::Bool(b),
            Self::Number(n) => Value::from(n),
            Self::Text(s) => Value::String(s),
            Self::Array(items) => Value::Array(items.into_iter().map(Self::into_json).collect()),
            Self::Object(fields) => Value::Object(
                fields
                    .into_iter()
                    .map(|(k, v)| (k, v.into_json()))
                    .collect::<Map<_, _>>(),
            ),
        }
    }
}

fuzz_target!(|input: (FuzzValue, FuzzValue)| {
    let expected = input.0.into_json();
    let actual = input.1.into_json();

    // every value contains itself
    assert!(matcher::contains(&actual, &actual));
    let _ = matcher::contains(&expected, &actual);
});
