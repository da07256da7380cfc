use jinshape_infer::{
    infer, Config, Error, InferError, Inferrer, Literal, ScalarKind, Shape, Structure,
};

fn infer_with(source: &str, config: &Config) -> Result<Structure, Error> {
    Inferrer::new(config).infer_source(source)
}

fn infer_ok(source: &str) -> Structure {
    infer_with(source, &Config::default()).unwrap_or_else(|err| panic!("inference failed: {err}"))
}

fn lines(structure: &Structure) -> Vec<usize> {
    structure.linenos.iter().copied().collect()
}

#[test]
fn constant_dictionary_is_elided_but_its_inputs_are_not() {
    let structure = infer_ok("{% set d = {'x': 123, a: z.qwerty} %}{{ d.x }}");

    assert_eq!(structure.to_string(), "{'a': <scalar>, 'z': {'qwerty': <unknown>}}");
    assert!(!structure.contains_field("d"));
}

#[test]
fn loop_target_describes_the_list_items() {
    let structure = infer_ok("{% for row in items %}{{ row.x }}{% endfor %}");

    assert_eq!(structure.to_string(), "{'items': [{'x': <scalar>}]}");
    let items = structure.field("items").unwrap();
    assert_eq!(items.label.as_deref(), Some("items"));
    assert!(items.is_required());
}

#[test]
fn conditional_assignment_makes_variable_optional() {
    let structure = infer_ok("{% if x is undefined %}{% set x = 1 %}{% endif %}{{ x }}");

    let x = structure.field("x").unwrap();
    assert_eq!(x.scalar_kind(), Some(ScalarKind::Number));
    assert!(x.may_be_defined);
    assert!(!x.constant);
    assert!(!x.is_required());
}

#[test]
fn attribute_accesses_on_one_root_merge() {
    let structure = infer_ok("{{ x.field }}{{ x.other }}");
    assert_eq!(structure.to_string(), "{'x': {'field': <scalar>, 'other': <scalar>}}");
}

#[test]
fn scalar_then_attribute_usage_conflicts() {
    let err = infer_with("{{ x }}{{ x.field }}", &Config::default()).unwrap_err();
    assert!(matches!(err, Error::Infer(InferError::MergeConflict { .. })));
    assert_eq!(
        err.to_string(),
        "variable \"x\" (used as scalar on lines 1) conflicts with variable \"x\" (used as dictionary on lines: 1)"
    );
}

#[test]
fn checks_survive_when_the_absent_branch_leaves_the_name_alone() {
    let template = "
    {%- if x is undefined %}
        {{ test }}
    {%- endif %}

    {%- if y is undefined %}
        {% set y = 123 %}
    {%- endif %}

    {%- if y is defined %}
        {{ y }}
    {%- endif %}

    {%- if z is undefined %}
        {{ z }}
    {%- endif %}
    ";
    let structure = infer_ok(template);

    let x = structure.field("x").unwrap();
    assert!(x.is_unknown());
    assert!(x.checked_as_undefined);
    assert!(x.is_required());
    assert_eq!(lines(x), vec![2]);

    let test = structure.field("test").unwrap();
    assert_eq!(test.scalar_kind(), Some(ScalarKind::Scalar));
    assert_eq!(lines(test), vec![3]);

    let y = structure.field("y").unwrap();
    assert_eq!(y.scalar_kind(), Some(ScalarKind::Number));
    assert!(y.may_be_defined);
    assert!(!y.checked_as_defined && !y.checked_as_undefined);
    assert_eq!(lines(y), vec![6, 7, 10, 11]);

    let z = structure.field("z").unwrap();
    assert_eq!(z.scalar_kind(), Some(ScalarKind::Scalar));
    assert!(!z.checked_as_undefined);
    assert!(z.is_required());
    assert_eq!(lines(z), vec![14, 15]);
}

#[test]
fn assignment_in_the_else_branch_of_a_defined_check() {
    let template = "
    {% if y is defined %}
        {# pass #}
    {% else %}
        {% set y = 'atata' %}
    {% endif %}
    {{ y }}
    ";
    let structure = infer_ok(template);

    let y = structure.field("y").unwrap();
    assert_eq!(y.scalar_kind(), Some(ScalarKind::String));
    assert!(y.may_be_defined);
    assert!(!y.constant);
    assert_eq!(lines(y), vec![2, 5, 7]);
}

#[test]
fn usage_before_the_guard_stays_required() {
    let template = "
    {{ x }}
    {% if x is undefined %}
        {% set x = 'atata' %}
    {% endif %}
    {{ x }}
    ";
    let structure = infer_ok(template);

    let x = structure.field("x").unwrap();
    assert_eq!(x.scalar_kind(), Some(ScalarKind::String));
    assert!(!x.may_be_defined);
    assert!(x.is_required());
    assert_eq!(lines(x), vec![2, 3, 4, 6]);
}

#[test]
fn boolean_conditions_type_the_tested_names() {
    let config = Config::default().with_boolean_conditions(true);
    let template = "
    {%- if new_configuration is undefined %}
      {%- if production is defined and production %}
        {% set new_configuration = 'prefix-' ~ timestamp %}
      {%- else %}
        {% set new_configuration = 'prefix-' ~ timestamp %}
      {%- endif %}
    {%- endif %}
    ";
    let structure = infer_with(template, &config).unwrap();

    let new_configuration = structure.field("new_configuration").unwrap();
    assert_eq!(new_configuration.scalar_kind(), Some(ScalarKind::String));
    assert!(new_configuration.may_be_defined);
    assert!(new_configuration.checked_as_undefined);
    assert_eq!(lines(new_configuration), vec![2, 4, 6]);

    let production = structure.field("production").unwrap();
    assert_eq!(production.scalar_kind(), Some(ScalarKind::Boolean));
    assert!(production.checked_as_defined);
    assert_eq!(lines(production), vec![3]);

    let timestamp = structure.field("timestamp").unwrap();
    assert_eq!(timestamp.scalar_kind(), Some(ScalarKind::String));
    assert_eq!(lines(timestamp), vec![4, 6]);
}

#[test]
fn without_boolean_conditions_tested_names_stay_unknown() {
    let structure = infer_ok("{% if flag %}yes{% endif %}");
    assert!(structure.field("flag").unwrap().is_unknown());

    let config = Config::default().with_boolean_conditions(true);
    let structure = infer_with("{% if flag %}yes{% endif %}", &config).unwrap();
    assert_eq!(
        structure.field("flag").unwrap().scalar_kind(),
        Some(ScalarKind::Boolean)
    );
}

#[test]
fn checks_inside_a_ternary() {
    let config = Config::default().with_boolean_conditions(true);
    let structure =
        infer_with("{{ 'x and y' if x and y is defined else ':(' }}", &config).unwrap();

    let x = structure.field("x").unwrap();
    assert_eq!(x.scalar_kind(), Some(ScalarKind::Boolean));
    assert!(!x.checked_as_defined);

    let y = structure.field("y").unwrap();
    assert!(y.is_unknown());
    assert!(y.checked_as_defined);
}

#[test]
fn defined_check_combined_with_attribute_access() {
    let config = Config::default().with_boolean_conditions(true);
    let template = "
    {% if x is defined and x.a == 'a' %}
        {{ x.b }}
    {% endif %}
    ";
    let structure = infer_with(template, &config).unwrap();

    let x = structure.field("x").unwrap();
    assert_eq!(x.to_string(), "{'a': <unknown>, 'b': <scalar>}");
    assert!(x.checked_as_defined);
    assert_eq!(lines(x), vec![2, 3]);
}

#[test]
fn negated_check_flips_to_undefined() {
    let structure = infer_ok("{% if not x is defined %}fallback{% endif %}");
    let x = structure.field("x").unwrap();
    assert!(x.checked_as_undefined);
    assert!(!x.checked_as_defined);
}

#[test]
fn default_filter_makes_variable_optional() {
    let structure = infer_ok("{{ title|default('Untitled') }}");

    let title = structure.field("title").unwrap();
    assert_eq!(title.scalar_kind(), Some(ScalarKind::String));
    assert!(title.used_with_default);
    assert!(!title.is_required());
    assert_eq!(title.value, Some(Literal::String("Untitled".to_string())));
}

#[test]
fn one_plain_usage_makes_a_defaulted_variable_required() {
    let structure = infer_ok("{{ title|default('Untitled') }}{{ title }}");
    assert!(structure.field("title").unwrap().is_required());
}

#[test]
fn keep_constants_retains_assignments() {
    let config = Config::default();
    let template = "{% set greeting = 'hi' %}{{ greeting }}{{ name }}";

    let stripped = Inferrer::new(&config).infer_source(template).unwrap();
    assert!(!stripped.contains_field("greeting"));

    let kept = Inferrer::new(&config)
        .keep_constants(true)
        .infer_source(template)
        .unwrap();
    let greeting = kept.field("greeting").unwrap();
    assert!(greeting.constant);
    assert_eq!(greeting.scalar_kind(), Some(ScalarKind::String));
}

#[test]
fn constants_nested_in_dictionaries_are_stripped() {
    let config = Config::default();
    let template = "{% macro show(d={'fixed': 1}) %}{{ d.fixed }}{{ d.free }}{% endmacro %}{{ show(d=options) }}";
    let structure = Inferrer::new(&config).infer_source(template).unwrap();

    let options = structure.field("options").unwrap();
    assert!(!options.contains_field("fixed"));
    assert!(options.contains_field("free"));
}

#[test]
fn infer_uses_the_configured_template_directory() {
    let config = Config::default().with_template_directory("definitely-missing-directory");
    let err = infer("{% include 'nav.html' %}", &config).unwrap_err();
    assert!(matches!(err, Error::Load(_)));

    let structure = infer("{{ x }}", &config).unwrap();
    assert_eq!(structure.field("x").unwrap().shape, Shape::Scalar(ScalarKind::Scalar));
}
