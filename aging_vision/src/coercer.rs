// THEORY:
// The coercer is the boundary between untrusted model text and the typed
// `AgingReport`. The model is asked for JSON, but nothing guarantees it
// complies: it may apologise in prose, drop a key, invent a sixth crack level
// or return a list of five reasons.
//
// The policy is absolute: malformed upstream output never reaches the caller
// as a malformed report. Validation either yields a fully valid report or a
// `SchemaViolation`, and a violation is always turned into the fallback report
// with the violation text as its single reason. The same input text always
// produces the same result.
//
// Checks run in a fixed order so the reported reason is deterministic:
// parse, top-level object, key presence (crack_level, danger_level, reasons),
// then the domain of each field in that same order.

use crate::error::SchemaViolation;
use crate::report::{AgingReport, CrackLevel, DangerLevel, MAX_CRACK_LEVEL};
use serde_json::{Map, Value};

pub const REQUIRED_KEYS: [&str; 3] = ["crack_level", "danger_level", "reasons"];

/// Outcome of coercing one piece of model output.
#[derive(Debug, Clone, PartialEq)]
pub enum Coercion {
    Valid(AgingReport),
    Fallback {
        report: AgingReport,
        violation: SchemaViolation,
    },
}

impl Coercion {
    pub fn report(&self) -> &AgingReport {
        match self {
            Coercion::Valid(report) | Coercion::Fallback { report, .. } => report,
        }
    }

    pub fn into_report(self) -> AgingReport {
        match self {
            Coercion::Valid(report) | Coercion::Fallback { report, .. } => report,
        }
    }

    pub fn violation(&self) -> Option<&SchemaViolation> {
        match self {
            Coercion::Valid(_) => None,
            Coercion::Fallback { violation, .. } => Some(violation),
        }
    }

    pub fn is_fallback(&self) -> bool {
        matches!(self, Coercion::Fallback { .. })
    }
}

/// Turns raw model text into a report, degrading to the fallback on any problem.
pub fn coerce(raw_text: &str) -> AgingReport {
    coerce_detailed(raw_text).into_report()
}

pub fn coerce_detailed(raw_text: &str) -> Coercion {
    match validate(raw_text) {
        Ok(report) => Coercion::Valid(report),
        Err(violation) => Coercion::Fallback {
            report: AgingReport::fallback(violation.to_string()),
            violation,
        },
    }
}

/// Strict validation without the fallback step.
pub fn validate(raw_text: &str) -> Result<AgingReport, SchemaViolation> {
    let value: Value =
        serde_json::from_str(raw_text).map_err(|e| SchemaViolation::Parse(e.to_string()))?;
    let object = match value {
        Value::Object(object) => object,
        other => return Err(SchemaViolation::NotAnObject(kind_of(&other))),
    };

    for key in REQUIRED_KEYS {
        if !object.contains_key(key) {
            return Err(SchemaViolation::MissingKey(key));
        }
    }

    let crack_level = crack_level_of(field(&object, "crack_level"))?;
    let danger_level = danger_level_of(field(&object, "danger_level"))?;
    let reasons = reasons_of(field(&object, "reasons"))?;
    AgingReport::new(crack_level, danger_level, reasons)
}

fn field<'a>(object: &'a Map<String, Value>, key: &str) -> &'a Value {
    object.get(key).unwrap_or(&Value::Null)
}

fn crack_level_of(value: &Value) -> Result<CrackLevel, SchemaViolation> {
    let invalid = || SchemaViolation::InvalidValue {
        field: "crack_level",
        detail: format!("expected an integer between 0 and {MAX_CRACK_LEVEL}, found {value}"),
    };
    let level = value.as_u64().ok_or_else(invalid)?;
    let level = u8::try_from(level).map_err(|_| invalid())?;
    CrackLevel::new(level)
}

fn danger_level_of(value: &Value) -> Result<DangerLevel, SchemaViolation> {
    match value {
        Value::String(label) => label.parse(),
        other => Err(SchemaViolation::InvalidValue {
            field: "danger_level",
            detail: format!("expected one of low, medium, high, found {other}"),
        }),
    }
}

fn reasons_of(value: &Value) -> Result<Vec<String>, SchemaViolation> {
    let items = value.as_array().ok_or_else(|| SchemaViolation::InvalidValue {
        field: "reasons",
        detail: format!("expected an array of strings, found {}", kind_of(value)),
    })?;
    items
        .iter()
        .enumerate()
        .map(|(index, item)| {
            item.as_str()
                .map(str::to_owned)
                .ok_or_else(|| SchemaViolation::InvalidValue {
                    field: "reasons",
                    detail: format!("entry {index} is {}, expected a string", kind_of(item)),
                })
        })
        .collect()
}

fn kind_of(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn valid_output_passes_through_unchanged() {
        let raw = r#"{"crack_level":3,"danger_level":"high","reasons":["visible diagonal crack","spalling"]}"#;
        let coercion = coerce_detailed(raw);
        assert!(!coercion.is_fallback());
        assert_eq!(
            serde_json::to_value(coercion.report()).unwrap(),
            serde_json::from_str::<Value>(raw).unwrap()
        );
    }

    #[test]
    fn every_in_domain_combination_is_accepted() {
        for level in 0..=5u8 {
            for danger in DangerLevel::ALL {
                for reasons in [json!([]), json!(["one"]), json!(["one", "two"])] {
                    let raw = json!({
                        "crack_level": level,
                        "danger_level": danger.as_str(),
                        "reasons": reasons,
                    });
                    let report = validate(&raw.to_string()).unwrap();
                    assert_eq!(serde_json::to_value(&report).unwrap(), raw);
                }
            }
        }
    }

    #[test]
    fn prose_falls_back_with_parse_reason() {
        let report = coerce("I cannot assess this.");
        assert_eq!(report.crack_level().get(), 0);
        assert_eq!(report.danger_level(), DangerLevel::Low);
        assert_eq!(report.reasons().len(), 1);
        assert!(report.reasons()[0].starts_with("JSON parse error: "));
    }

    #[test]
    fn empty_and_truncated_text_fall_back() {
        for raw in ["", "   ", r#"{"crack_level": 3,"#, "```json\n{}\n```"] {
            let coercion = coerce_detailed(raw);
            assert!(matches!(coercion.violation(), Some(SchemaViolation::Parse(_))), "{raw:?}");
        }
    }

    #[test]
    fn non_object_json_falls_back() {
        let report = coerce("[1, 2, 3]");
        assert_eq!(
            report.reasons(),
            ["JSON parse error: expected an object, found an array".to_string()]
        );
    }

    #[test]
    fn each_missing_key_falls_back_without_partial_data() {
        let full = json!({"crack_level": 4, "danger_level": "high", "reasons": ["rebar exposed"]});
        for key in REQUIRED_KEYS {
            let mut partial = full.clone();
            partial.as_object_mut().unwrap().remove(key);
            let report = coerce(&partial.to_string());
            assert_eq!(report, AgingReport::fallback(format!("missing key: {key}")));
        }
    }

    #[test]
    fn first_missing_key_in_schema_order_is_reported() {
        let report = coerce(r#"{"unrelated": true}"#);
        assert_eq!(report.reasons(), ["missing key: crack_level".to_string()]);
    }

    #[test]
    fn out_of_domain_values_fall_back() {
        let cases = [
            (json!({"crack_level": 6, "danger_level": "low", "reasons": []}), "crack_level"),
            (json!({"crack_level": -1, "danger_level": "low", "reasons": []}), "crack_level"),
            (json!({"crack_level": 2.5, "danger_level": "low", "reasons": []}), "crack_level"),
            (json!({"crack_level": "3", "danger_level": "low", "reasons": []}), "crack_level"),
            (json!({"crack_level": 300, "danger_level": "low", "reasons": []}), "crack_level"),
            (json!({"crack_level": 1, "danger_level": "extreme", "reasons": []}), "danger_level"),
            (json!({"crack_level": 1, "danger_level": 2, "reasons": []}), "danger_level"),
            (json!({"crack_level": 1, "danger_level": "low", "reasons": "cracks"}), "reasons"),
            (json!({"crack_level": 1, "danger_level": "low", "reasons": ["a", 7]}), "reasons"),
            (json!({"crack_level": 1, "danger_level": "low", "reasons": ["a", "b", "c"]}), "reasons"),
        ];
        for (raw, field) in cases {
            let coercion = coerce_detailed(&raw.to_string());
            match coercion.violation() {
                Some(SchemaViolation::InvalidValue { field: got, .. }) => assert_eq!(*got, field, "{raw}"),
                other => panic!("expected invalid value for {field}, got {other:?}"),
            }
            let report = coercion.report();
            assert_eq!(report.crack_level().get(), 0);
            assert_eq!(report.danger_level(), DangerLevel::Low);
            assert!(report.reasons()[0].starts_with(&format!("invalid value for {field}")));
        }
    }

    #[test]
    fn japanese_danger_labels_are_normalised() {
        let report = coerce(r#"{"crack_level":2,"danger_level":"中","reasons":["剥離"]}"#);
        assert_eq!(report.danger_level(), DangerLevel::Medium);
        assert_eq!(report.reasons(), ["剥離".to_string()]);
    }

    #[test]
    fn extra_keys_are_ignored() {
        let report = coerce(r#"{"crack_level":1,"danger_level":"low","reasons":[],"confidence":0.4}"#);
        assert_eq!(report.crack_level().get(), 1);
    }

    #[test]
    fn coercion_is_deterministic() {
        let raw = r#"{"crack_level": 9}"#;
        assert_eq!(coerce_detailed(raw), coerce_detailed(raw));
    }
}
