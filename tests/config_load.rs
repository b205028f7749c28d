//! Integration test: verify that `templates/config.yaml` parses
//! into a valid `Config` and matches the built-in defaults.

use std::path::Path;

use installer_llm::config::Config;

#[tokio::test]
async fn template_config_parses() {
    let path = Path::new(env!("CARGO_MANIFEST_DIR")).join("templates/config.yaml");
    let cfg = Config::load(&path).await.expect("templates/config.yaml should load");
    assert_eq!(cfg, Config::default());
    assert_eq!(cfg.server.socket_addr().unwrap().port(), 8765);
}

#[tokio::test]
async fn save_then_load_keeps_values() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("config.yaml");

    let mut cfg = Config::default();
    cfg.model.tokenizer = "bytes".into();
    cfg.compile.eval_fraction = 0.0;
    cfg.server.facts_file = Some("facts.json".into());
    cfg.save(&path).await.unwrap();

    assert_eq!(Config::load(&path).await.unwrap(), cfg);
}

#[test]
fn unknown_keys_are_rejected() {
    let err = Config::from_yaml("model:\n  tokeniser: o200k\n").unwrap_err();
    assert!(format!("{err:#}").contains("tokeniser"));
}

#[test]
fn invalid_values_are_rejected() {
    let err = Config::from_yaml("compile:\n  eval_fraction: 1.5\n").unwrap_err();
    assert!(err.to_string().contains("eval_fraction"));

    let err = Config::from_yaml("server:\n  addr: not-an-address\n").unwrap_err();
    assert!(err.to_string().contains("server.addr"));
}
