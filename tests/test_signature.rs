use pretty_assertions::assert_eq;
use rstest::rstest;
use teleprompt::{Field, FieldType, Signature, SignatureError};

#[test]
fn parse_question_context_answer() {
    let signature = Signature::parse("question, context -> answer").unwrap();
    assert_eq!(signature.input_fields.len(), 2);
    assert_eq!(signature.output_fields.len(), 1);
    assert!(signature.validate().is_ok());
}

#[test]
fn missing_output_side_fails() {
    assert!(matches!(
        Signature::parse("question -> "),
        Err(SignatureError::EmptyOutputs)
    ));
}

#[rstest]
#[case("question -> answer", "question -> answer")]
#[case("  a ,b  ->  c,  d ", "a, b -> c, d")]
#[case("x: int, y: float -> z: bool", "x, y -> z")]
fn display_is_canonical(#[case] spec: &str, #[case] canonical: &str) {
    assert_eq!(Signature::parse(spec).unwrap().to_string(), canonical);
}

#[test]
fn reparse_of_canonical_form_is_stable() {
    let first = Signature::parse("question, context -> answer, score").unwrap();
    let second = Signature::parse(&first.to_string()).unwrap();
    assert_eq!(first.to_string(), second.to_string());
}

#[test]
fn builder_style_assembly() {
    let mut signature = Signature::new("qa").with_instruction("Answer the question.");
    signature.push(Field::input("question")).unwrap();
    signature
        .push(Field::output("answer").with_type(FieldType::Int))
        .unwrap();
    assert!(signature.validate().is_ok());
    assert_eq!(signature.task_instruction(), "Answer the question.");
    assert_eq!(signature.field("answer").unwrap().ty, FieldType::Int);
}
