/// Returns true when the sandbox forbids binding a local port, in which case
/// tests backed by a mock upstream should return early.
pub fn should_skip_httpmock() -> bool {
    if can_bind_localhost() {
        return false;
    }
    eprintln!("skipping mock-upstream test: sandbox forbids binding to localhost");
    true
}

fn can_bind_localhost() -> bool {
    match std::net::TcpListener::bind(("127.0.0.1", 0)) {
        Ok(listener) => {
            drop(listener);
            true
        }
        Err(err) if err.kind() == std::io::ErrorKind::PermissionDenied => false,
        Err(err) => panic!("failed to bind localhost for mock-upstream tests: {err}"),
    }
}

/// One upstream `data:` frame carrying a single text delta.
pub fn delta_frame(text: &str) -> String {
    let chunk = serde_json::json!({ "choices": [{ "delta": { "content": text } }] });
    format!("data: {chunk}\n\n")
}

/// Upstream SSE body made of one delta frame per text, terminated by `[DONE]`.
pub fn upstream_sse_body(texts: &[&str]) -> String {
    let mut body: String = texts.iter().map(|text| delta_frame(text)).collect();
    body.push_str("data: [DONE]\n\n");
    body
}
