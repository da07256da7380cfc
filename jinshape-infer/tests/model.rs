use jinshape_infer::{Config, IntegerIndexPolicy, Literal, Structure, VariableIndexPolicy};
use serde_json::json;

#[test]
fn required_unless_defined_or_defaulted() {
    assert!(Structure::scalar().is_required());
    assert!(!Structure::scalar().maybe_defined().is_required());
    assert!(!Structure::scalar().with_default().is_required());
    assert!(Structure::scalar().checked_defined().is_required());
}

#[test]
fn display_shows_only_the_shape() {
    let structure = Structure::dictionary()
        .with_field("user", Structure::dictionary().with_field("name", Structure::string()))
        .with_field("tags", Structure::list(Structure::scalar()))
        .with_field("pair", Structure::tuple(Some(vec![Structure::number()])))
        .with_field("rest", Structure::tuple(None))
        .with_field("any", Structure::unknown().with_label("any").at_line(3));

    assert_eq!(
        structure.to_string(),
        "{'any': <unknown>, 'pair': (<number>,), 'rest': (...), 'tags': [<scalar>], 'user': {'name': <string>}}"
    );
}

#[test]
fn debug_repr_lists_every_flag() {
    let structure = Structure::dictionary().with_field(
        "x",
        Structure::number()
            .with_label("x")
            .with_linenos([2, 5])
            .maybe_defined()
            .checked_undefined(),
    );

    assert_eq!(
        structure.debug_repr(),
        [
            "Dictionary(label=None, required=true, constant=false, linenos=[], may_be_d=false, c_as_u=false, c_as_d=false, {",
            "    x: Number(label=x, required=false, constant=false, linenos=[2, 5], may_be_d=true, c_as_u=true, c_as_d=false)",
            "})",
        ]
        .join("\n")
    );
}

#[test]
fn serializes_kind_children_and_flags() {
    let structure = Structure::dictionary().with_field(
        "size",
        Structure::number()
            .with_label("size")
            .at_line(4)
            .with_default()
            .with_value(Literal::Integer(20)),
    );

    let value = serde_json::to_value(&structure).unwrap();
    assert_eq!(
        value,
        json!({
            "type": "dictionary",
            "fields": {
                "size": {
                    "type": "number",
                    "label": "size",
                    "linenos": [4],
                    "required": false,
                    "constant": false,
                    "may_be_defined": false,
                    "used_with_default": true,
                    "checked_as_defined": false,
                    "checked_as_undefined": false,
                    "value": 20,
                }
            },
            "linenos": [],
            "required": true,
            "constant": false,
            "may_be_defined": false,
            "used_with_default": false,
            "checked_as_defined": false,
            "checked_as_undefined": false,
        })
    );
}

#[test]
fn serializes_tuples_with_their_extension_flag() {
    let value = serde_json::to_value(Structure::tuple(None).extensible()).unwrap();
    assert_eq!(value["type"], "tuple");
    assert_eq!(value["items"], serde_json::Value::Null);
    assert_eq!(value["may_be_extended"], true);
}

#[test]
fn config_defaults() {
    let config = Config::default();
    assert_eq!(config.integer_index_policy, IntegerIndexPolicy::List);
    assert_eq!(config.variable_index_policy, VariableIndexPolicy::Dictionary);
    assert!(!config.boolean_conditions);
    assert_eq!(config.template_root(), std::path::PathBuf::from("templates"));
    assert_eq!(
        config.with_package_name("app").template_root(),
        std::path::PathBuf::from("app").join("templates")
    );
}

#[test]
fn index_policies_parse_from_names() {
    assert_eq!("tuple".parse::<IntegerIndexPolicy>().unwrap(), IntegerIndexPolicy::Tuple);
    assert_eq!("list".parse::<VariableIndexPolicy>().unwrap(), VariableIndexPolicy::List);
    let err = "set".parse::<IntegerIndexPolicy>().unwrap_err();
    assert_eq!(err.to_string(), "unknown index policy 'set'");
}
