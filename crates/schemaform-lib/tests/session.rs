use anyhow::Result;
use schemaform_core::{
    ConfigError, EngineConfig, EngineError, OptionItem, OptionsError, OptionsRequest, SchemaError,
};
use schemaform_lib::{FormSession, SessionConfig, SessionError};
use serde_json::{Map, Value, json};

const ORDER_FORM: &str = r#"
{
  "id": "order",
  "title": "Order",
  "globals": { "currency": "EUR", "api": "https://shop.test" },
  "submission": { "stripHidden": true, "transform": "wrap" },
  "sections": [
    {
      "id": "customer",
      "fields": [
        {
          "id": "name",
          "type": "text",
          "label": "Name",
          "validators": [{ "type": "required", "message": "Tell us your name" }]
        },
        {
          "id": "quantity",
          "type": "number",
          "label": "Quantity in ${globals.currency}",
          "defaultValue": 1,
          "validators": [{ "type": "min", "value": 1 }]
        },
        { "id": "giftWrap", "type": "checkbox" },
        {
          "id": "greeting",
          "type": "text",
          "placeholder": "For ${name}",
          "visibilityRule": { "==": [{ "var": "giftWrap" }, true] }
        }
      ]
    },
    {
      "id": "delivery",
      "fields": [
        {
          "id": "country",
          "type": "select",
          "options": [
            { "label": "France", "value": "FR" },
            { "label": "Spain", "value": "ES" }
          ]
        },
        {
          "id": "store",
          "type": "select",
          "options": {
            "url": "${globals.api}/stores/${country}",
            "dependsOn": ["country"],
            "labelKey": "title",
            "valueKey": "code"
          }
        }
      ]
    }
  ]
}
"#;

fn init_tracing() {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
}

fn session() -> Result<FormSession> {
    init_tracing();
    let session = FormSession::new(SessionConfig::new(ORDER_FORM))?.with_transform(
        "wrap",
        |payload: Map<String, Value>| {
            let mut out = Map::new();
            out.insert("order".into(), Value::Object(payload));
            Ok(out)
        },
    );
    Ok(session)
}

fn stores(request: &OptionsRequest) -> Result<Vec<OptionItem>, OptionsError> {
    let country = request.url.rsplit('/').next().unwrap_or_default().to_string();
    Ok(request.extract(&json!([
        { "code": format!("{country}-1"), "title": format!("{country} central") }
    ])))
}

#[test]
fn session_starts_from_defaults() -> Result<()> {
    let session = session()?;
    let snapshot = session.snapshot();
    assert_eq!(snapshot.value("quantity"), Some(&json!(1)));
    assert_eq!(snapshot.value("name"), Some(&json!("")));
    assert!(!snapshot.is_field_visible("greeting"));
    assert_eq!(snapshot.globals()["currency"], json!("EUR"));
    Ok(())
}

#[test]
fn caller_globals_override_schema_globals() -> Result<()> {
    init_tracing();
    let session = FormSession::new(
        SessionConfig::new(ORDER_FORM).with_globals_json(r#"{ "currency": "USD" }"#),
    )?;
    assert_eq!(session.snapshot().globals()["currency"], json!("USD"));
    assert_eq!(session.snapshot().globals()["api"], json!("https://shop.test"));
    Ok(())
}

#[test]
fn set_value_json_cascades_visibility() -> Result<()> {
    let mut session = session()?;
    let snapshot = session.set_value_json("giftWrap", "true")?;
    assert!(snapshot.is_field_visible("greeting"));
    Ok(())
}

#[test]
fn unknown_field_keeps_previous_snapshot() -> Result<()> {
    let mut session = session()?;
    let before = session.snapshot().clone();
    let err = session
        .set_value("nope", json!(1))
        .expect_err("unknown field");
    assert!(matches!(
        err,
        SessionError::Engine(EngineError::UnknownField(ref id)) if id == "nope"
    ));
    assert_eq!(session.snapshot(), &before);
    Ok(())
}

#[test]
fn patch_is_all_or_nothing() -> Result<()> {
    let mut session = session()?;
    let err = session
        .submit_patch_json(r#"{ "name": "Ada", "zzz_unknown": 3 }"#)
        .expect_err("unknown field in patch");
    assert!(matches!(err, SessionError::Engine(EngineError::UnknownField(_))));
    assert_eq!(session.snapshot().value("name"), Some(&json!("")));

    let outcome = session.submit_patch_json(r#"{ "name": "Ada", "country": "FR" }"#)?;
    assert_eq!(outcome.changed.len(), 2);
    assert_eq!(outcome.option_requests.len(), 1);
    assert_eq!(outcome.option_requests[0].field, "store");
    assert_eq!(outcome.option_requests[0].url, "https://shop.test/stores/FR");
    assert_eq!(session.snapshot().value("name"), Some(&json!("Ada")));

    let encoded = serde_json::to_value(&outcome)?;
    assert_eq!(encoded["changed"], json!(["country", "name"]));
    assert_eq!(encoded["optionRequests"][0]["field"], json!("store"));
    Ok(())
}

#[test]
fn malformed_patches_are_rejected() -> Result<()> {
    let mut session = session()?;
    assert!(matches!(
        session.submit_patch_json("[1, 2]"),
        Err(SessionError::InvalidPatch(_))
    ));
    assert!(matches!(
        session.submit_patch_json("{}"),
        Err(SessionError::InvalidPatch(_))
    ));
    assert!(matches!(
        session.submit_patch_json("{ not json"),
        Err(SessionError::Json(_))
    ));
    Ok(())
}

#[test]
fn validate_writes_errors_into_snapshot() -> Result<()> {
    let mut session = session()?;
    session.set_value("quantity", json!(0))?;
    let report = session.validate();
    assert!(!report.valid);
    assert_eq!(report.message("name"), Some("Tell us your name"));
    assert_eq!(report.message("quantity"), Some("Must be at least 1"));
    assert_eq!(
        session.snapshot().errors().get("name").map(String::as_str),
        Some("Tell us your name")
    );

    session.submit_patch_json(r#"{ "name": "Ada", "quantity": 2 }"#)?;
    let report: Value = serde_json::from_str(&session.validate_json()?)?;
    assert_eq!(report["valid"], json!(true));
    assert!(session.snapshot().errors().is_empty());
    Ok(())
}

#[test]
fn payload_and_submission() -> Result<()> {
    let mut session = session()?;
    session.submit_patch_json(r#"{ "name": "Ada", "greeting": "hi" }"#)?;

    let everything: Value = serde_json::from_str(&session.payload_json(false, false)?)?;
    assert_eq!(everything["greeting"], json!("hi"));
    let visible: Value = serde_json::from_str(&session.payload_json(true, false)?)?;
    assert!(visible.get("greeting").is_none());

    let submitted: Value = serde_json::from_str(&session.submit_json()?)?;
    assert_eq!(submitted["order"]["name"], json!("Ada"));
    assert!(submitted["order"].get("greeting").is_none());
    Ok(())
}

#[test]
fn submission_without_registered_transform_fails() -> Result<()> {
    init_tracing();
    let session = FormSession::new(SessionConfig::new(ORDER_FORM))?;
    assert!(matches!(
        session.submit_json(),
        Err(SessionError::Engine(EngineError::UnknownTransform(name))) if name == "wrap"
    ));
    Ok(())
}

#[test]
fn ui_view_resolves_field_text() -> Result<()> {
    let mut session = session()?;
    let view: Value = serde_json::from_str(&session.ui_json()?)?;
    assert_eq!(view["text"]["quantity"]["label"], json!("Quantity in EUR"));
    assert_eq!(view["text"]["greeting"]["placeholder"], json!("For "));
    assert_eq!(view["ui"]["fields"]["greeting"]["visible"], json!(false));
    assert_eq!(view["ui"]["fields"]["country"]["options"][1]["value"], json!("ES"));

    session.set_value("name", json!("Ada"))?;
    let view: Value = serde_json::from_str(&session.ui_json()?)?;
    assert_eq!(view["text"]["greeting"]["placeholder"], json!("For Ada"));
    assert_eq!(view["values"]["name"], json!("Ada"));
    Ok(())
}

#[test]
fn active_schema_tracks_required_fields() -> Result<()> {
    let session = session()?;
    let schema: Value = serde_json::from_str(&session.active_schema_json()?)?;
    assert_eq!(schema["title"], json!("Order"));
    assert_eq!(schema["required"], json!(["name"]));
    assert_eq!(schema["properties"]["quantity"]["minimum"], json!(1));
    assert!(schema["properties"].get("greeting").is_none());
    Ok(())
}

#[test]
fn options_refresh_through_resolver() -> Result<()> {
    let mut session = session()?;
    let mut resolver = stores;
    assert_eq!(session.load_initial_options(&mut resolver)?, 0);

    session.set_value("country", json!("ES"))?;
    assert_eq!(session.refresh_options("country", &mut resolver)?, 1);
    let store = session.snapshot().field_ui("store").expect("store ui");
    assert_eq!(
        store.options.as_deref(),
        Some(&[OptionItem::new("ES central", "ES-1")][..])
    );
    assert_eq!(session.refresh_options("name", &mut resolver)?, 0);
    Ok(())
}

#[test]
fn reset_returns_to_initial_snapshot() -> Result<()> {
    let mut session = session()?;
    let initial = session.snapshot().clone();
    session.submit_patch_json(r#"{ "name": "Ada", "giftWrap": true }"#)?;
    session.validate();
    assert_ne!(session.snapshot(), &initial);

    session.reset();
    assert_eq!(session.snapshot(), &initial);
    Ok(())
}

#[test]
fn engine_settings_come_from_toml() -> Result<()> {
    init_tracing();
    let strict_form = r#"{
      "sections": [{
        "id": "main",
        "fields": [{ "id": "a", "type": "text", "visibilityRule": { "frobnicate": [1] } }]
      }]
    }"#;

    let lenient = FormSession::new(SessionConfig::new(strict_form))?;
    assert!(!lenient.snapshot().is_field_visible("a"));
    assert!(!lenient.snapshot().warnings().is_empty());

    let strict = FormSession::new(
        SessionConfig::new(strict_form).with_engine_toml("strict_schema = true\n"),
    );
    assert!(matches!(
        strict,
        Err(SessionError::Engine(EngineError::Schema(SchemaError::UnknownOperator { .. })))
    ));

    let zero = FormSession::new(SessionConfig::new(ORDER_FORM).with_engine_toml("max_passes = 0"));
    assert!(matches!(zero, Err(SessionError::Config(_))));

    let literal = FormSession::new(SessionConfig::new(ORDER_FORM).with_engine(EngineConfig {
        max_passes: 0,
        ..EngineConfig::default()
    }));
    assert!(matches!(
        literal,
        Err(SessionError::Engine(EngineError::Config(ConfigError::ZeroPasses)))
    ));
    Ok(())
}

#[test]
fn globals_must_be_objects() -> Result<()> {
    init_tracing();
    let err = FormSession::new(SessionConfig::new(ORDER_FORM).with_params_json("[1]"))
        .expect_err("params must be an object");
    assert!(matches!(err, SessionError::NotAnObject("params_json")));

    let session =
        FormSession::new(SessionConfig::new(ORDER_FORM).with_globals_json("null"))?;
    assert_eq!(session.snapshot().globals()["currency"], json!("EUR"));
    Ok(())
}
