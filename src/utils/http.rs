use futures_util::StreamExt;

/// Reads at most `max_bytes` of a response body as lossy UTF-8, appending a
/// marker when the body was cut short.
pub(crate) async fn response_text_truncated(
    response: reqwest::Response,
    max_bytes: usize,
) -> String {
    let (bytes, truncated) = response_bytes_truncated(response, max_bytes).await;
    let mut body = String::from_utf8_lossy(&bytes).into_owned();
    if truncated {
        if !body.is_empty() {
            body.push('\n');
        }
        body.push_str("...(truncated)");
    }
    body
}

/// Pulls body chunks until `max_bytes` are buffered and then stops reading,
/// so an oversized or stalled body never holds the caller past the cap.
async fn response_bytes_truncated(
    response: reqwest::Response,
    max_bytes: usize,
) -> (Vec<u8>, bool) {
    let max_bytes = max_bytes.max(1);
    let declared_larger = response
        .content_length()
        .is_some_and(|len| len > max_bytes as u64);
    let mut out = Vec::<u8>::new();
    let mut truncated = false;

    let mut stream = response.bytes_stream();
    while let Some(next) = stream.next().await {
        let Ok(chunk) = next else {
            break;
        };
        let remaining = max_bytes.saturating_sub(out.len());
        if chunk.len() < remaining {
            out.extend_from_slice(chunk.as_ref());
            continue;
        }

        out.extend_from_slice(&chunk.as_ref()[..remaining]);
        truncated = chunk.len() > remaining || declared_larger;
        break;
    }
    (out, truncated)
}
