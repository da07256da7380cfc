use jinshape_infer::{
    parse, AssignTarget, BinaryOperator, CompareOperator, ExpressionKind, Literal, Statement,
    UnaryOperator,
};

fn single_output(source: &str) -> ExpressionKind {
    let template = parse(source).unwrap_or_else(|err| panic!("parse failed: {err}"));
    let [Statement::Output(output)] = template.body.as_slice() else {
        panic!("expected a single output statement, got {:?}", template.body);
    };
    let [node] = output.nodes.as_slice() else {
        panic!("expected a single node, got {:?}", output.nodes);
    };
    node.kind.clone()
}

#[test]
fn parses_data_and_variables() {
    let template = parse("Hello {{ name }}!").unwrap();
    let [Statement::Output(output)] = template.body.as_slice() else {
        panic!("expected output");
    };
    assert_eq!(output.nodes.len(), 3);
    assert!(matches!(&output.nodes[0].kind, ExpressionKind::TemplateData(text) if text == "Hello "));
    assert_eq!(output.nodes[1].as_name(), Some("name"));
}

#[test]
fn comments_and_raw_blocks_produce_no_expressions() {
    let template = parse("{# {{ hidden }} #}{% raw %}{{ shown }}{% endraw %}").unwrap();
    let [Statement::Output(output)] = template.body.as_slice() else {
        panic!("expected output");
    };
    assert!(output
        .nodes
        .iter()
        .all(|node| matches!(&node.kind, ExpressionKind::TemplateData(_))));
}

#[test]
fn tracks_lines_across_data() {
    let template = parse("line one\n{% if x %}\n{{ y }}\n{% endif %}").unwrap();
    let if_stmt = template
        .body
        .iter()
        .find_map(|stmt| match stmt {
            Statement::If(stmt) => Some(stmt),
            _ => None,
        })
        .expect("if statement");
    assert_eq!(if_stmt.span.line, 2);
    assert_eq!(if_stmt.test.line(), 2);
}

#[test]
fn concatenation_binds_tighter_than_addition_and_logic() {
    match single_output("{{ a or b and c }}") {
        ExpressionKind::Binary(binary) => {
            assert_eq!(binary.operator, BinaryOperator::Or);
            assert!(matches!(
                &binary.right.kind,
                ExpressionKind::Binary(inner) if inner.operator == BinaryOperator::And
            ));
        }
        other => panic!("unexpected {other:?}"),
    }

    match single_output("{{ a + b ~ c }}") {
        ExpressionKind::Binary(binary) => {
            assert_eq!(binary.operator, BinaryOperator::Add);
            assert!(matches!(&binary.right.kind, ExpressionKind::Concat(nodes) if nodes.len() == 2));
        }
        other => panic!("unexpected {other:?}"),
    }
}

#[test]
fn filters_apply_to_the_negated_value() {
    match single_output("{{ -x|abs }}") {
        ExpressionKind::Filter(filter) => {
            assert_eq!(filter.name, "abs");
            assert!(matches!(
                &filter.node.kind,
                ExpressionKind::Unary(unary) if unary.operator == UnaryOperator::Negative
            ));
        }
        other => panic!("unexpected {other:?}"),
    }
}

#[test]
fn parses_not_in_and_is_not() {
    match single_output("{{ x not in y }}") {
        ExpressionKind::Compare(compare) => {
            assert_eq!(compare.comparisons[0].0, CompareOperator::NotIn);
        }
        other => panic!("unexpected {other:?}"),
    }

    match single_output("{{ x is not defined }}") {
        ExpressionKind::Unary(unary) => {
            assert_eq!(unary.operator, UnaryOperator::Not);
            assert!(matches!(&unary.operand.kind, ExpressionKind::Test(test) if test.name == "defined"));
        }
        other => panic!("unexpected {other:?}"),
    }
}

#[test]
fn parses_ternary_with_optional_else() {
    match single_output("{{ a if b }}") {
        ExpressionKind::Conditional(conditional) => {
            assert_eq!(conditional.test.as_name(), Some("b"));
            assert!(conditional.else_branch.is_none());
        }
        other => panic!("unexpected {other:?}"),
    }
}

#[test]
fn parses_literals() {
    match single_output("{{ [1, 2.5, 'a' 'b', true, none] }}") {
        ExpressionKind::List(items) => {
            let literals: Vec<_> = items.iter().filter_map(|item| item.as_literal()).collect();
            assert_eq!(
                literals,
                vec![
                    &Literal::Integer(1),
                    &Literal::Float(2.5),
                    &Literal::String("ab".to_string()),
                    &Literal::Boolean(true),
                    &Literal::None,
                ]
            );
        }
        other => panic!("unexpected {other:?}"),
    }

    assert!(matches!(single_output("{{ {'a': 1} }}"), ExpressionKind::Dict(entries) if entries.len() == 1));
    assert!(matches!(single_output("{{ (1,) }}"), ExpressionKind::Tuple(items) if items.len() == 1));
}

#[test]
fn dotted_integer_becomes_subscript() {
    match single_output("{{ items.0 }}") {
        ExpressionKind::Getitem(getitem) => {
            assert_eq!(getitem.index.as_literal(), Some(&Literal::Integer(0)));
        }
        other => panic!("unexpected {other:?}"),
    }
}

#[test]
fn parses_call_arguments() {
    match single_output("{{ f(1, key=2) }}") {
        ExpressionKind::Call(call) => {
            assert_eq!(call.arguments.positional.len(), 1);
            assert_eq!(call.arguments.keywords[0].name, "key");
        }
        other => panic!("unexpected {other:?}"),
    }

    let err = parse("{{ f(key=1, 2) }}").unwrap_err();
    assert!(err.message.contains("positional argument follows keyword argument"));
}

#[test]
fn parses_for_with_tuple_target_filter_and_else() {
    let template =
        parse("{% for k, v in items if v recursive %}{{ k }}{% else %}empty{% endfor %}").unwrap();
    let [Statement::For(stmt)] = template.body.as_slice() else {
        panic!("expected for");
    };
    assert!(matches!(&stmt.target, AssignTarget::Tuple(items, _) if items.len() == 2));
    assert!(stmt.filter.is_some());
    assert!(stmt.recursive);
    assert_eq!(stmt.else_body.len(), 1);
}

#[test]
fn elif_nests_into_else() {
    let template = parse("{% if a %}1{% elif b %}2{% else %}3{% endif %}").unwrap();
    let [Statement::If(stmt)] = template.body.as_slice() else {
        panic!("expected if");
    };
    let [Statement::If(nested)] = stmt.else_body.as_slice() else {
        panic!("expected nested if");
    };
    assert_eq!(nested.test.as_name(), Some("b"));
    assert_eq!(nested.else_body.len(), 1);
}

#[test]
fn parses_set_block_with_filters() {
    let template = parse("{% set body | trim | upper %} text {% endset %}").unwrap();
    let [Statement::AssignBlock(stmt)] = template.body.as_slice() else {
        panic!("expected block set");
    };
    let names: Vec<_> = stmt.filters.iter().map(|filter| filter.name.as_str()).collect();
    assert_eq!(names, vec!["trim", "upper"]);
}

#[test]
fn parses_macro_parameters() {
    let template = parse("{% macro m(a, b=1) %}{% endmacro %}").unwrap();
    let [Statement::Macro(stmt)] = template.body.as_slice() else {
        panic!("expected macro");
    };
    assert_eq!(stmt.name, "m");
    assert!(stmt.parameters[0].default.is_none());
    assert!(stmt.parameters[1].default.is_some());

    let err = parse("{% macro m(a=1, b) %}{% endmacro %}").unwrap_err();
    assert!(err.message.contains("non-default argument follows default argument"));
}

#[test]
fn parses_include_options() {
    let template = parse("{% include 'nav.html' ignore missing without context %}").unwrap();
    let [Statement::Include(stmt)] = template.body.as_slice() else {
        panic!("expected include");
    };
    assert!(stmt.ignore_missing);
    assert!(!stmt.with_context);
}

#[test]
fn keeps_unsupported_tags_for_later_rejection() {
    let template = parse("{% import 'forms.html' as forms %}").unwrap();
    assert!(matches!(
        template.body.as_slice(),
        [Statement::Unsupported(stmt)] if stmt.tag == "import"
    ));
}

#[test]
fn reports_unknown_tags_with_position() {
    let err = parse("\n  {% frobnicate %}").unwrap_err();
    assert_eq!(err.message, "unknown tag 'frobnicate'");
    assert_eq!(err.line, 2);
}

#[test]
fn reports_unclosed_blocks() {
    let err = parse("{% if x %}never closed").unwrap_err();
    assert!(err.message.contains("'endif'"), "{}", err.message);
}
