use std::sync::Arc;
use std::time::Duration;

use teleprompt::{
    Cache, Chat, LM, LMConfig, LMRequest, LmError, MemoryCache, Message, RetryPolicy,
    StaticProvider, parse_sse_line, request_cache_key, stream_chunks,
};

#[tokio::test]
async fn second_identical_call_is_served_from_cache() {
    let provider = Arc::new(StaticProvider::text("answer: cached"));
    let cache = Arc::new(MemoryCache::new());
    let lm = LM::with_provider(LMConfig::default(), provider.clone()).with_cache(cache.clone());

    let request = LMRequest::from_chat(Chat::new(vec![Message::user("hello")]));
    lm.call(request.clone()).await.unwrap();
    lm.call(request).await.unwrap();

    assert_eq!(provider.request_count(), 1);
    assert_eq!(cache.len().await, 1);
    assert_eq!(lm.usage().cache_hits, 1);
}

#[tokio::test]
async fn cache_key_covers_model_and_sampling_knobs() {
    let mut request = LMRequest::from_prompt("p");
    request.temperature = 0.2;
    let base = request_cache_key("model-a", &request);

    assert_eq!(base, request_cache_key("model-a", &request));
    assert_ne!(base, request_cache_key("model-b", &request));

    request.max_tokens = 99;
    assert_ne!(base, request_cache_key("model-a", &request));
}

#[tokio::test]
async fn transient_failures_retry_then_succeed() {
    let provider = Arc::new(StaticProvider::text("recovered"));
    provider.push_failure(LmError::Network {
        message: "connection reset".into(),
    });

    let lm = LM::with_provider(LMConfig::default(), provider.clone()).with_retry(
        RetryPolicy::builder()
            .initial_wait(Duration::from_millis(1))
            .max_retries(2)
            .build(),
    );

    let response = lm.call(LMRequest::from_prompt("q")).await.unwrap();
    assert_eq!(response.content(), "recovered");
    assert_eq!(provider.request_count(), 2);
}

#[tokio::test]
async fn sse_stream_passthrough() {
    assert!(parse_sse_line("data: [DONE]").is_some());

    let body = concat!(
        "data: {\"choices\":[{\"delta\":{\"content\":\"to\"}}]}\n",
        "\n",
        "data: {\"choices\":[{\"delta\":{\"content\":\"ken\"}}]}\n",
        "data: [DONE]\n",
    );
    let (mut rx, task) = stream_chunks(std::io::Cursor::new(body.as_bytes().to_vec()));

    let mut assembled = String::new();
    while let Some(chunk) = rx.recv().await {
        if chunk.done {
            break;
        }
        assembled.push_str(&chunk.delta);
    }
    assert_eq!(assembled, "token");
    task.await.unwrap();
}
