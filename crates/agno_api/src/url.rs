/// Default base URL for a locally running agent service.
pub const DEFAULT_AGNO_BASE_URL: &str = "http://localhost:7777";

/// Normalize a user-supplied base URL to the versioned API root.
///
/// Normalization rules:
/// 1) trim whitespace and trailing `/`
/// 2) without a scheme, prepend `http://` when the host mentions localhost or
///    127.0.0.1, else `https://`
/// 3) append `/v1` unless already present
pub fn normalize_agno_url(input: &str) -> String {
    let base = if input.trim().is_empty() {
        DEFAULT_AGNO_BASE_URL
    } else {
        input.trim()
    };

    let mut url = base.trim_end_matches('/').to_string();
    if !url.starts_with("http://") && !url.starts_with("https://") {
        let scheme = if url.contains("localhost") || url.contains("127.0.0.1") {
            "http"
        } else {
            "https"
        };
        url = format!("{scheme}://{url}");
    }

    if url.ends_with("/v1") {
        url
    } else {
        format!("{url}/v1")
    }
}

/// Endpoint that starts a streaming run. The target agent travels in the
/// request body.
pub fn runs_endpoint(base_url: &str) -> String {
    format!("{}/agent/runs", normalize_agno_url(base_url))
}

/// Endpoint that lists the agents the service exposes.
pub fn agents_endpoint(base_url: &str) -> String {
    format!("{}/agents", normalize_agno_url(base_url))
}
