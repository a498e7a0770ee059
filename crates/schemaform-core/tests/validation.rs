use serde_json::{Map, Value, json};

use schemaform_core::{
    CustomValidators, Schema, Snapshot, ValidatorKind, Warning, active_json_schema,
    active_validators, validate,
};

fn signup() -> Snapshot {
    let schema = Schema::from_value(json!({
        "title": "Signup",
        "globals": { "maxBio": 20 },
        "sections": [
            {
                "id": "account",
                "fields": [
                    {
                        "id": "email",
                        "type": "email",
                        "label": "Email",
                        "validators": [
                            { "type": "required", "message": "Email is required" },
                            { "type": "email" }
                        ]
                    },
                    {
                        "id": "username",
                        "type": "text",
                        "validators": [
                            { "type": "minLength", "value": 3 },
                            { "type": "pattern", "value": "^[a-z0-9_]+$", "message": "Lowercase only" }
                        ]
                    },
                    {
                        "id": "age",
                        "type": "integer",
                        "validators": [
                            { "type": "min", "value": 13 },
                            { "type": "max", "value": 120 }
                        ]
                    },
                    { "id": "business", "type": "checkbox" },
                    {
                        "id": "vat",
                        "type": "text",
                        "validators": [{
                            "type": "required",
                            "when": { "==": [{ "var": "business" }, true] }
                        }]
                    },
                    {
                        "id": "bio",
                        "type": "textarea",
                        "validators": [{ "type": "maxLength", "value": "${globals.maxBio}" }]
                    },
                    {
                        "id": "terms",
                        "type": "checkbox",
                        "validators": [{ "type": "required", "message": "Accept the terms" }]
                    }
                ]
            },
            {
                "id": "web",
                "visibilityRule": { "==": [{ "var": "business" }, true] },
                "fields": [{
                    "id": "site",
                    "type": "url",
                    "validators": [{ "type": "required" }, { "type": "url" }]
                }]
            }
        ]
    }))
    .expect("schema");
    Snapshot::create(schema, Map::new()).expect("create")
}

fn fill(snapshot: Snapshot, values: Value) -> Snapshot {
    let mut current = snapshot;
    for (field, value) in values.as_object().cloned().unwrap_or_default() {
        current = current.update(&field, value).expect("update");
    }
    current
}

#[test]
fn hidden_fields_and_false_conditions_drop_validators() {
    let snapshot = signup();
    let active = active_validators(&snapshot);
    assert!(active.contains_key("email"));
    assert!(!active.contains_key("vat"), "gated by business");
    assert!(!active.contains_key("site"), "section hidden");

    let business = snapshot.update("business", json!(true)).expect("update");
    let active = active_validators(&business);
    assert_eq!(
        active.get("vat").map(|validators| validators[0].kind),
        Some(ValidatorKind::Required)
    );
    assert_eq!(active.get("site").map(Vec::len), Some(2));
}

#[test]
fn templated_bounds_resolve_against_globals() {
    let active = active_validators(&signup());
    assert_eq!(active["bio"][0].value, Some(json!(20)));
}

#[test]
fn first_failure_per_field_is_reported() {
    let snapshot = fill(
        signup(),
        json!({
            "email": "not-an-email",
            "username": "Ab",
            "age": 9,
            "bio": "x".repeat(21),
        }),
    );
    let report = validate(&snapshot, &CustomValidators::new());
    assert!(!report.valid);
    assert_eq!(report.message("email"), Some("Invalid email address"));
    assert_eq!(report.message("username"), Some("Must be at least 3 characters"));
    assert_eq!(report.message("age"), Some("Must be at least 13"));
    assert_eq!(report.message("bio"), Some("Must be at most 20 characters"));
    assert_eq!(report.message("terms"), Some("Accept the terms"));
    assert_eq!(report.message("vat"), None);
}

#[test]
fn valid_submission_passes_and_clears_errors() {
    let invalid = signup();
    let report = invalid.validate(&CustomValidators::new());
    let marked = invalid.with_validation(&report);
    assert_eq!(
        marked.errors().get("email").map(String::as_str),
        Some("Email is required")
    );
    assert_eq!(
        marked.field_ui("email").and_then(|ui| ui.error.clone()),
        Some("Email is required".to_string())
    );

    let filled = fill(
        marked,
        json!({
            "email": "ada@example.com",
            "username": "ada_l",
            "age": 36,
            "terms": true,
        }),
    );
    let report = filled.validate(&CustomValidators::new());
    assert!(report.valid, "{:?}", report.errors);
    let cleared = filled.with_validation(&report);
    assert!(cleared.errors().is_empty());
    assert!(cleared.field_ui("email").expect("email").error.is_none());
}

#[test]
fn empty_optional_values_skip_format_checks() {
    let snapshot = fill(signup(), json!({ "username": "", "age": null }));
    let report = validate(&snapshot, &CustomValidators::new());
    assert_eq!(report.message("username"), None);
    assert_eq!(report.message("age"), None);
}

#[test]
fn custom_validators_run_by_name() {
    let schema = Schema::from_value(json!({
        "sections": [{ "id": "main", "fields": [
            {
                "id": "code",
                "type": "text",
                "validators": [{ "type": "custom", "value": "even", "message": "Must be even" }]
            },
            {
                "id": "other",
                "type": "text",
                "validators": [{ "type": "custom", "value": { "name": "unregistered" } }]
            }
        ]}]
    }))
    .expect("schema");
    let snapshot = Snapshot::create(schema, Map::new())
        .and_then(|snap| snap.update("code", json!("7")))
        .and_then(|snap| snap.update("other", json!("x")))
        .expect("snapshot");
    let customs = CustomValidators::new().with("even", |value, _, _| {
        value
            .as_str()
            .and_then(|text| text.parse::<i64>().ok())
            .is_some_and(|n| n % 2 == 0)
    });

    let report = validate(&snapshot, &customs);
    assert_eq!(report.message("code"), Some("Must be even"));
    assert_eq!(report.message("other"), None);
    assert_eq!(
        report.warnings,
        vec![Warning::UnknownCustomValidator {
            field: "other".into(),
            name: "unregistered".into()
        }]
    );
}

#[test]
fn invalid_patterns_warn_instead_of_failing() {
    let schema = Schema::from_value(json!({
        "sections": [{ "id": "main", "fields": [{
            "id": "zip",
            "type": "text",
            "defaultValue": "12345",
            "validators": [{ "type": "pattern", "value": "([0-9" }]
        }]}]
    }))
    .expect("schema");
    let snapshot = Snapshot::create(schema, Map::new()).expect("create");
    let report = validate(&snapshot, &CustomValidators::new());
    assert!(report.valid);
    assert!(matches!(
        report.warnings.as_slice(),
        [Warning::InvalidPattern { field, .. }] if field == "zip"
    ));
}

#[test]
fn active_schema_lists_visible_constraints() {
    let schema = active_json_schema(&signup());
    assert_eq!(schema["type"], json!("object"));
    assert_eq!(schema["title"], json!("Signup"));
    assert_eq!(schema["required"], json!(["email", "terms"]));

    let props = &schema["properties"];
    assert_eq!(props["email"]["format"], json!("email"));
    assert_eq!(props["email"]["title"], json!("Email"));
    assert_eq!(props["username"]["minLength"], json!(3));
    assert_eq!(props["username"]["pattern"], json!("^[a-z0-9_]+$"));
    assert_eq!(props["age"]["type"], json!("integer"));
    assert_eq!(props["age"]["minimum"], json!(13));
    assert_eq!(props["age"]["maximum"], json!(120));
    assert_eq!(props["bio"]["maxLength"], json!(20));
    assert_eq!(props["terms"]["type"], json!("boolean"));
    assert!(props.get("site").is_none());
}

#[test]
fn active_schema_follows_visibility_changes() {
    let business = signup().update("business", json!(true)).expect("update");
    let schema = active_json_schema(&business);
    assert_eq!(schema["properties"]["site"]["format"], json!("uri"));
    assert_eq!(
        schema["required"],
        json!(["email", "vat", "terms", "site"])
    );
}

#[test]
fn active_schema_resolves_templated_defaults() {
    let schema = Schema::from_value(json!({
        "globals": { "maxItems": 5 },
        "sections": [{ "id": "cart", "fields": [
            { "id": "limit", "type": "number", "defaultValue": "${globals.maxItems}" },
            { "id": "note", "type": "text", "defaultValue": "Up to ${globals.maxItems} items" },
            { "id": "plain", "type": "text", "defaultValue": "fixed" }
        ]}]
    }))
    .expect("schema");
    let snapshot = Snapshot::create(schema, Map::new()).expect("create");
    let props = &active_json_schema(&snapshot)["properties"];
    assert_eq!(props["limit"]["default"], json!(5));
    assert_eq!(props["note"]["default"], json!("Up to 5 items"));
    assert_eq!(props["plain"]["default"], json!("fixed"));
}
