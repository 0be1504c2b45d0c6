use serde::{Deserialize, Serialize};
use serde_json::json;
use natgrad_utils::*;
use std::{env, fs};

#[derive(Serialize, Deserialize, Debug, PartialEq)]
struct Settings {
    zeta: u32,
    alpha: Vec<f64>,
}

#[test]
fn test_jsonify_sorts_keys() {
    let settings = Settings {
        zeta: 3,
        alpha: vec![0.5, 1.0],
    };
    assert_eq!(jsonify(&settings), r#"{"alpha":[0.5,1.0],"zeta":3}"#);
}

#[test]
fn test_jsonify_internal_sorts_nested_objects() {
    let value = json!({"b": [{"y": 1, "x": 2}], "a": {"d": 1, "c": 2}});
    assert_eq!(
        serde_json::to_string(&jsonify_internal(&value)).unwrap(),
        r#"{"a":{"c":2,"d":1},"b":[{"x":2,"y":1}]}"#
    );
}

#[test]
fn test_load_json_arg_from_string() {
    let settings: Settings = load_json_arg(r#"{"zeta": 7, "alpha": []}"#).unwrap();
    assert_eq!(
        settings,
        Settings {
            zeta: 7,
            alpha: vec![]
        }
    );
}

#[test]
fn test_load_json_arg_from_file() {
    let path = env::temp_dir().join("natgrad_utils_load_json_arg.json");
    fs::write(&path, r#"{"zeta": 1, "alpha": [2.0]}"#).unwrap();
    let settings: Settings = load_json_arg(path.to_str().unwrap()).unwrap();
    assert_eq!(settings.alpha, vec![2.0]);
    fs::remove_file(&path).unwrap();
}

#[test]
fn test_load_json_arg_errors() {
    assert!(load_json_arg::<Settings>("not json").is_err());
    assert!(load_json_arg::<Settings>("/definitely/missing/file.json").is_err());
}
