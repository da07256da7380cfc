use jinshape_infer::{
    parse, Config, Error, InferError, Inferrer, Literal, NullLoader, ScalarKind, StmtVisitor,
    Structure,
};

fn lines(structure: &Structure) -> Vec<usize> {
    structure.linenos.iter().copied().collect()
}

fn infer(source: &str) -> Result<Structure, Error> {
    Inferrer::new(&Config::default()).infer_source(source)
}

#[test]
fn declaration_types_parameters_from_defaults_and_usage() {
    let template = "
    {% macro input(name, value='', type='text', size=20) -%}
        <input type=\"{{ type }}\" name=\"{{ name }}\" value=\"{{value|e }}\" size=\"{{ size }}\">
        {{ x }}
    {%- endmacro %}
    ";
    let ast = parse(template).unwrap();
    let config = Config::default();
    let mut visitor = StmtVisitor::new(&config, &NullLoader);
    let structure = visitor.visit_template(&ast).unwrap();

    let declaration = visitor.macros().get("input").expect("macro is registered");
    assert_eq!(declaration.name, "input");

    let [(name, name_param)] = declaration.args.as_slice() else {
        panic!("expected one positional parameter, got {:?}", declaration.args);
    };
    assert_eq!(name, "name");
    assert_eq!(name_param.scalar_kind(), Some(ScalarKind::Scalar));
    assert_eq!(name_param.label.as_deref(), Some("argument #1"));
    assert_eq!(lines(name_param), vec![2]);

    let keywords: Vec<_> = declaration
        .kwargs
        .iter()
        .map(|(name, param)| {
            (
                name.as_str(),
                param.scalar_kind(),
                param.label.clone().unwrap_or_default(),
                param.value.clone(),
            )
        })
        .collect();
    assert_eq!(
        keywords,
        vec![
            (
                "value",
                Some(ScalarKind::String),
                "argument \"value\"".to_string(),
                Some(Literal::String(String::new())),
            ),
            (
                "type",
                Some(ScalarKind::String),
                "argument \"type\"".to_string(),
                Some(Literal::String("text".to_string())),
            ),
            (
                "size",
                Some(ScalarKind::Number),
                "argument \"size\"".to_string(),
                Some(Literal::Integer(20)),
            ),
        ]
    );
    assert!(declaration.kwargs.iter().all(|(_, param)| lines(param) == vec![2]));

    assert_eq!(structure.to_string(), "{'x': <scalar>}");
    let x = structure.field("x").unwrap();
    assert_eq!(x.label.as_deref(), Some("x"));
    assert_eq!(lines(x), vec![4]);
}

#[test]
fn default_conflicting_with_body_usage() {
    let template = "
    {% macro input(name, value='') -%}
        {{ value.x }}
    {%- endmacro %}
    ";
    let err = infer(template).unwrap_err();
    assert!(matches!(err, Error::Infer(InferError::MergeConflict { .. })));
    assert_eq!(
        err.to_string(),
        "variable \"argument \"value\"\" (used as string on lines 2) conflicts with \
         variable \"value\" (used as dictionary on lines: 3)"
    );
}

#[test]
fn implicit_macro_variables_are_not_requirements() {
    let template = "{% macro list_all() %}{{ varargs }}{{ kwargs }}{{ caller }}{% endmacro %}";
    assert_eq!(infer(template).unwrap().to_string(), "{}");
}

#[test]
fn calls_pass_parameter_shapes_to_arguments() {
    let template = "
    {% macro format_hello(name, n, m='test', o='test', dict_arg={'field': 123}) -%}
        Hello, {{ name }}!
        {{ n }}
        {{ dict_arg.field }}
    {%- endmacro %}

    {{ format_hello('Anton', 2, 'value', 'value') }}
    {{ format_hello(name='Anton', n=2, m='value', o='value') }}
    {{ format_hello('Anton', n=2, m='value', o='value') }}
    {{ format_hello(name, 2, m='value', o='value') }}
    {{ format_hello(name, 2, m='value', o='value', dict_arg=d) }}
    ";
    let structure = infer(template).unwrap();

    assert_eq!(structure.to_string(), "{'d': {}, 'name': <scalar>}");

    let name = structure.field("name").unwrap();
    assert_eq!(name.label.as_deref(), Some("name"));
    assert_eq!(lines(name), vec![2, 11, 12]);

    let d = structure.field("d").unwrap();
    assert!(d.is_dictionary());
    assert_eq!(d.label.as_deref(), Some("d"));
    assert_eq!(lines(d), vec![2, 12]);
}

#[test]
fn call_arguments_inherit_nested_shapes() {
    let template = "
    {% macro user(login, name, is_active=True) %}
        {{ login }} {{ name.first }} {{ name.last }} {{ is_active }}
    {% endmacro %}
    {{ user(data.login, data.name, is_active=data.is_active) }}
    ";
    let structure = infer(template).unwrap();
    let data = structure.field("data").unwrap();

    assert_eq!(
        data.to_string(),
        "{'is_active': <boolean>, 'login': <scalar>, 'name': {'first': <scalar>, 'last': <scalar>}}"
    );
    assert_eq!(lines(data), vec![5]);
    assert_eq!(lines(data.field("login").unwrap()), vec![2, 5]);
    assert_eq!(lines(data.field("is_active").unwrap()), vec![2, 5]);

    let user_name = data.field("name").unwrap();
    assert_eq!(user_name.label.as_deref(), Some("name"));
    assert_eq!(lines(user_name), vec![2, 5]);
    assert_eq!(lines(user_name.field("first").unwrap()), vec![3]);
}

#[test]
fn call_arguments_conflicting_with_parameters() {
    let template = "
    {% macro format_hello(name, n, m='test', o='test') -%}
        Hello, {{ name }}!
        {{ n }}
    {%- endmacro %}

    {{ format_hello({}, 2, 'value', 'value') }}
    ";
    assert_eq!(
        infer(template).unwrap_err().to_string(),
        "unnamed variable (used as dictionary on lines 7) conflicts with \
         variable \"argument #1\" (used as scalar on lines: 2)"
    );

    let template = "
    {% macro format_hello(name, n, m='test', o='test') -%}
        Hello, {{ name }}!
        {{ n }}
    {%- endmacro %}

    {{ format_hello(a, 2, 'value', {}) }}
    ";
    assert_eq!(
        infer(template).unwrap_err().to_string(),
        "unnamed variable (used as dictionary on lines 7) conflicts with \
         variable \"argument \"o\"\" (used as string on lines: 2)"
    );
}

#[test]
fn wrong_argument_counts_and_names() {
    let declaration = "
    {% macro format_hello(name, n, m='test', o='test') -%}
        Hello, {{ name }}!
        {{ n }}
    {%- endmacro %}
    ";
    let error_for = |call: &str| {
        let err = infer(&format!("{declaration}{call}")).unwrap_err();
        assert!(matches!(err, Error::Infer(InferError::InvalidExpression { .. })));
        err.to_string()
    };

    assert_eq!(
        error_for("{{ format_hello() }}"),
        "line 6: incorrect usage of \"format_hello\". it takes exactly 2 positional arguments"
    );
    assert_eq!(
        error_for("{{ format_hello(1, 2, 'test', 'test', 5) }}"),
        "line 6: incorrect usage of \"format_hello\". it takes exactly 2 positional arguments"
    );
    assert_eq!(
        error_for("{{ format_hello(1, 2, missing=123) }}"),
        "line 6: incorrect usage of \"format_hello\". unknown keyword argument \"missing\" is passed"
    );
}

#[test]
fn calls_before_the_declaration_are_unknown() {
    assert_eq!(
        infer("{{ later(x) }}{% macro later(v) %}{{ v }}{% endmacro %}")
            .unwrap_err()
            .to_string(),
        "line 1: \"later\" call is not supported"
    );
}
