use blockplan::llm_interaction::{ApiFlavor, OpenAiClient, OpenAiConfig};
use blockplan::{ChatMessage, GenerationError, LlmClient, Prompt};
use serde_json::json;
use wiremock::matchers::{body_partial_json, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn client(server: &MockServer, flavor: ApiFlavor) -> OpenAiClient {
    OpenAiClient::new(OpenAiConfig {
        base_url: format!("{}/v1", server.uri()),
        flavor,
        reasoning_model: "o4-mini".to_string(),
        chat_model: "gpt-4o-mini".to_string(),
        reasoning_effort: "medium".to_string(),
    })
}

fn prompt() -> Prompt {
    Prompt {
        system: "You are a solution design assistant.".to_string(),
        context: vec![ChatMessage::user("We need an online store")],
        auxiliary: Some("Available blocks:\n- cart: Shopping cart".to_string()),
        temperature: 0.3,
    }
}

#[test_log::test(tokio::test)]
async fn test_responses_api_success() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/responses"))
        .and(header("authorization", "Bearer sk-test"))
        .and(body_partial_json(json!({
            "model": "o4-mini",
            "instructions": "You are a solution design assistant.\n\nAvailable blocks:\n- cart: Shopping cart",
            "input": [{ "role": "user", "content": "We need an online store" }],
            "reasoning": { "effort": "medium" }
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "id": "resp_1",
            "output": [
                { "type": "reasoning", "summary": [] },
                {
                    "type": "message",
                    "role": "assistant",
                    "content": [{ "type": "output_text", "text": "  Use the cart block.  " }]
                }
            ]
        })))
        .expect(1)
        .mount(&server)
        .await;

    let text = client(&server, ApiFlavor::Responses)
        .generate("sk-test", &prompt())
        .await
        .unwrap();
    assert_eq!(text, "Use the cart block.");
}

#[test_log::test(tokio::test)]
async fn test_chat_completions_success() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .and(body_partial_json(json!({
            "model": "gpt-4o-mini",
            "messages": [
                { "role": "system", "content": "You are a solution design assistant.\n\nAvailable blocks:\n- cart: Shopping cart" },
                { "role": "user", "content": "We need an online store" }
            ]
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "choices": [{ "message": { "role": "assistant", "content": "Design proposal" } }]
        })))
        .mount(&server)
        .await;

    let text = client(&server, ApiFlavor::ChatCompletions)
        .generate("sk-test", &prompt())
        .await
        .unwrap();
    assert_eq!(text, "Design proposal");
}

#[test_log::test(tokio::test)]
async fn test_unauthorized_maps_to_auth() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/responses"))
        .respond_with(ResponseTemplate::new(401).set_body_string("invalid api key"))
        .mount(&server)
        .await;

    let err = client(&server, ApiFlavor::Responses)
        .generate("sk-bad", &prompt())
        .await
        .unwrap_err();
    assert!(matches!(err, GenerationError::Auth(_)));
}

#[test_log::test(tokio::test)]
async fn test_too_many_requests_maps_to_rate_limited() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/responses"))
        .respond_with(
            ResponseTemplate::new(429)
                .insert_header("retry-after", "12")
                .set_body_string("rate limit exceeded"),
        )
        .mount(&server)
        .await;

    let err = client(&server, ApiFlavor::Responses)
        .generate("sk-test", &prompt())
        .await
        .unwrap_err();
    match err {
        GenerationError::RateLimited { retry_after, message } => {
            assert_eq!(retry_after, Some(12));
            assert_eq!(message, "rate limit exceeded");
        }
        other => panic!("Expected RateLimited, got {:?}", other),
    }
}

#[test_log::test(tokio::test)]
async fn test_server_error_and_empty_output_map_to_transport() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .respond_with(ResponseTemplate::new(503).set_body_string("overloaded"))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/v1/responses"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "output": [] })))
        .mount(&server)
        .await;

    let err = client(&server, ApiFlavor::ChatCompletions)
        .generate("sk-test", &prompt())
        .await
        .unwrap_err();
    assert!(matches!(err, GenerationError::Transport(_)));

    let err = client(&server, ApiFlavor::Responses)
        .generate("sk-test", &prompt())
        .await
        .unwrap_err();
    assert!(matches!(err, GenerationError::Transport(_)));
}

#[test_log::test(tokio::test)]
async fn test_unreachable_provider_maps_to_transport() {
    let client = OpenAiClient::new(OpenAiConfig {
        base_url: "http://127.0.0.1:1/v1".to_string(),
        flavor: ApiFlavor::Responses,
        reasoning_model: "o4-mini".to_string(),
        chat_model: "gpt-4o-mini".to_string(),
        reasoning_effort: "medium".to_string(),
    });
    let err = client.generate("sk-test", &prompt()).await.unwrap_err();
    assert!(matches!(err, GenerationError::Transport(_)));
}
