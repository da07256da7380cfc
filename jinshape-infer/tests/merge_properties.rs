use jinshape_infer::{merge, merge_rtypes, BinaryOperator, InferError, ScalarKind, Structure};
use proptest::prelude::*;

fn leaf() -> impl Strategy<Value = Structure> {
    prop_oneof![
        Just(Structure::unknown()),
        Just(Structure::scalar()),
        Just(Structure::string()),
        Just(Structure::number()),
        Just(Structure::boolean()),
    ]
}

fn structure() -> impl Strategy<Value = Structure> {
    let tree = leaf().prop_recursive(3, 24, 4, |inner| {
        prop_oneof![
            inner.clone().prop_map(Structure::list),
            prop::collection::btree_map("[a-e]", inner.clone(), 0..4).prop_map(|fields| {
                fields
                    .into_iter()
                    .fold(Structure::dictionary(), |dict, (key, value)| {
                        dict.with_field(key, value)
                    })
            }),
            prop::collection::vec(inner, 0..3).prop_map(|items| Structure::tuple(Some(items))),
        ]
    });
    (tree, 1usize..40, prop::option::of("[a-z]{1,6}")).prop_map(|(structure, line, label)| {
        let structure = structure.at_line(line);
        match label {
            Some(label) => structure.with_label(label),
            None => structure,
        }
    })
}

fn dictionary_of(keys: &[String], line: usize) -> Structure {
    keys.iter().fold(Structure::dictionary(), |dict, key| {
        dict.with_field(key.clone(), Structure::scalar().at_line(line))
    })
}

proptest! {
    #[test]
    fn merging_with_itself_is_identity(s in structure()) {
        let merged = merge(&s, &s).expect("self merge");
        prop_assert_eq!(merged, s);
    }

    #[test]
    fn shape_does_not_depend_on_order(a in structure(), b in structure()) {
        let ab = merge(&a, &b);
        let ba = merge(&b, &a);
        prop_assert_eq!(ab.is_ok(), ba.is_ok());
        if let (Ok(ab), Ok(ba)) = (ab, ba) {
            prop_assert_eq!(ab.to_string(), ba.to_string());
            prop_assert_eq!(ab.kind_name(), ba.kind_name());
        }
    }

    #[test]
    fn unknown_is_absorbed(s in structure()) {
        let left = merge(&Structure::unknown(), &s).expect("unknown first");
        let right = merge(&s, &Structure::unknown()).expect("unknown second");
        prop_assert_eq!(&left.shape, &s.shape);
        prop_assert_eq!(&right.shape, &s.shape);
    }

    #[test]
    fn dictionaries_merge_into_the_union_of_their_keys(
        first in prop::collection::btree_set("[a-h]", 0..6),
        second in prop::collection::btree_set("[a-h]", 0..6),
    ) {
        let first: Vec<String> = first.into_iter().collect();
        let second: Vec<String> = second.into_iter().collect();
        let merged = merge(&dictionary_of(&first, 1), &dictionary_of(&second, 2)).expect("merge");

        let keys: Vec<&String> = merged.fields().expect("dictionary").keys().collect();
        let mut expected: Vec<&String> = first.iter().chain(second.iter()).collect();
        expected.sort();
        expected.dedup();
        prop_assert_eq!(keys, expected);

        for key in first.iter().filter(|key| second.contains(key)) {
            let field = merged.field(key).expect("shared key");
            prop_assert!(field.linenos.contains(&1) && field.linenos.contains(&2));
        }
    }

    #[test]
    fn scalars_never_merge_with_dictionaries(
        kind in prop_oneof![
            Just(ScalarKind::Scalar),
            Just(ScalarKind::String),
            Just(ScalarKind::Number),
            Just(ScalarKind::Boolean),
        ],
        keys in prop::collection::vec("[a-d]", 0..3),
    ) {
        let dict = dictionary_of(&keys, 2);
        let scalar = Structure::of_kind(kind).at_line(1);
        let is_conflict = |result: Result<Structure, InferError>| {
            matches!(result, Err(InferError::MergeConflict { .. }))
        };
        prop_assert!(is_conflict(merge(&scalar, &dict)));
        prop_assert!(is_conflict(merge(&dict, &scalar)));
    }
}

#[test]
fn merge_keeps_first_label_and_unions_lines() {
    let first = Structure::scalar().with_label("x").at_line(3);
    let second = Structure::string().with_label("y").at_line(7);
    let merged = merge(&first, &second).unwrap();

    assert_eq!(merged.scalar_kind(), Some(ScalarKind::String));
    assert_eq!(merged.label.as_deref(), Some("x"));
    assert_eq!(merged.linenos.iter().copied().collect::<Vec<_>>(), vec![3, 7]);
}

#[test]
fn merge_takes_constant_and_definedness_from_the_first_usage() {
    let assigned = Structure::number().as_constant().maybe_defined();
    let used = Structure::scalar();

    let merged = merge(&assigned, &used).unwrap();
    assert!(merged.constant);
    assert!(merged.may_be_defined);

    let merged = merge(&used, &assigned).unwrap();
    assert!(!merged.constant);
    assert!(!merged.may_be_defined);
}

#[test]
fn default_usage_survives_only_when_every_usage_has_one() {
    let with_default = Structure::scalar().with_default();
    let merged = merge(&with_default, &with_default.clone()).unwrap();
    assert!(!merged.is_required());

    let merged = merge(&with_default, &Structure::scalar()).unwrap();
    assert!(merged.is_required());
}

#[test]
fn conflicting_scalar_kinds_are_reported() {
    let first = Structure::string().with_label("x").at_line(1);
    let second = Structure::number().with_label("x").at_line(4);
    let err = merge(&first, &second).unwrap_err();
    assert_eq!(
        err.to_string(),
        "variable \"x\" (used as string on lines 1) conflicts with variable \"x\" (used as number on lines: 4)"
    );
}

#[test]
fn unnamed_structures_are_reported_as_such() {
    let first = Structure::dictionary().at_line(7);
    let second = Structure::scalar().with_label("argument #1").at_line(2);
    let err = merge(&first, &second).unwrap_err();
    assert_eq!(
        err.to_string(),
        "unnamed variable (used as dictionary on lines 7) conflicts with variable \"argument #1\" (used as scalar on lines: 2)"
    );
}

#[test]
fn tuples_of_different_length_conflict_unless_extensible() {
    let pair = Structure::tuple(Some(vec![Structure::scalar(), Structure::scalar()]));
    let single = Structure::tuple(Some(vec![Structure::number()]));
    assert!(merge(&pair, &single).is_err());

    let merged = merge(&pair, &single.extensible()).unwrap();
    let items = merged.tuple_items().unwrap();
    assert_eq!(items.len(), 2);
    assert_eq!(items[0].scalar_kind(), Some(ScalarKind::Number));
    assert_eq!(items[1].scalar_kind(), Some(ScalarKind::Scalar));
}

#[test]
fn unknown_arity_tuple_takes_the_known_items() {
    let unknown_arity = Structure::tuple(None);
    let pair = Structure::tuple(Some(vec![Structure::string(), Structure::unknown()]));
    let merged = merge(&unknown_arity, &pair).unwrap();
    assert_eq!(merged.to_string(), "(<string>, <unknown>)");
}

#[test]
fn merge_does_not_touch_shared_children() {
    let original = Structure::dictionary().with_field("a", Structure::scalar());
    let copy = original.clone();
    let merged = merge(
        &copy,
        &Structure::dictionary().with_field("a", Structure::number()),
    )
    .unwrap();

    assert_eq!(original.field("a").unwrap().scalar_kind(), Some(ScalarKind::Scalar));
    assert_eq!(merged.field("a").unwrap().scalar_kind(), Some(ScalarKind::Number));
}

#[test]
fn arithmetic_needs_matching_operand_kinds() {
    let text = Structure::string().at_line(1);
    let number = Structure::number().at_line(1);

    assert!(merge_rtypes(&text, &number, Some(BinaryOperator::Add)).is_err());
    assert!(merge_rtypes(&text, &number, Some(BinaryOperator::Subtract)).is_err());
    assert!(merge_rtypes(&Structure::unknown(), &number, Some(BinaryOperator::Add)).is_ok());
    assert!(merge_rtypes(&number, &number, Some(BinaryOperator::Multiply)).is_ok());
}
