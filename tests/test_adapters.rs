use pretty_assertions::assert_eq;
use serde_json::json;
use teleprompt::{
    Adapter, BamlAdapter, ChatAdapter, Example, JsonAdapter, LMResponse, Signature, XmlAdapter,
};

fn qa() -> Signature {
    Signature::parse("question -> answer").unwrap()
}

#[tokio::test]
async fn chat_adapter_formats_a_single_user_line() {
    let request = ChatAdapter
        .format(&qa(), &Example::new().with_input("question", "What is Go?"), &[])
        .unwrap();

    let user = request.messages.last().unwrap();
    assert_eq!(user.role(), "user");
    assert_eq!(user.content(), "question: What is Go?");
}

#[tokio::test]
async fn chat_adapter_parses_prefixed_reply() {
    let response = LMResponse::assistant("m", "answer: Go is a language");
    let outputs = ChatAdapter.parse(&qa(), &response).await.unwrap();
    assert_eq!(outputs["answer"], json!("Go is a language"));
}

#[tokio::test]
async fn json_adapter_recovers_fenced_and_embedded_objects() {
    let adapter = JsonAdapter::default();

    let fenced = LMResponse::assistant("m", "```json\n{\"answer\":\"x\"}\n```");
    assert_eq!(
        adapter.parse(&qa(), &fenced).await.unwrap()["answer"],
        json!("x")
    );

    let embedded = LMResponse::assistant("m", "junk {\"answer\":\"x\"} tail");
    assert_eq!(
        adapter.parse(&qa(), &embedded).await.unwrap()["answer"],
        json!("x")
    );
}

#[tokio::test]
async fn json_adapter_round_trips_formatted_outputs() {
    let signature = Signature::parse("question -> answer, certainty: float").unwrap();
    let adapter = JsonAdapter::default();

    // Format a demo's outputs, feed them back as a response, and expect
    // the same values out of parse.
    let demo = Example::new()
        .with_input("question", "q")
        .with_output("answer", "yes")
        .with_output("certainty", json!(0.9));
    let request = adapter.format(&signature, &demo.clone(), &[demo]).unwrap();
    let assistant_turn = request.messages.messages[2].content().to_string();

    let outputs = adapter
        .parse(&signature, &LMResponse::assistant("m", assistant_turn))
        .await
        .unwrap();
    assert_eq!(outputs["answer"], json!("yes"));
    assert_eq!(outputs["certainty"], json!(0.9));
}

#[tokio::test]
async fn baml_adapter_round_trips_marked_fields() {
    let adapter = BamlAdapter;
    let response = LMResponse::assistant(
        "m",
        "[[ ## answer ## ]]\nforty-two\n\n[[ ## completed ## ]]",
    );
    let outputs = adapter.parse(&qa(), &response).await.unwrap();
    assert_eq!(outputs["answer"], json!("forty-two"));
}

#[tokio::test]
async fn xml_adapter_handles_escapes() {
    let adapter = XmlAdapter::default();
    let response = LMResponse::assistant("m", "<answer>a &lt; b</answer>");
    let outputs = adapter.parse(&qa(), &response).await.unwrap();
    assert_eq!(outputs["answer"], json!("a < b"));
}
