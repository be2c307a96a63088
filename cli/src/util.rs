use serde_json::json;

pub fn client() -> reqwest::Client {
    reqwest::Client::new()
}

fn render(value: &serde_json::Value) -> String {
    serde_json::to_string_pretty(value).unwrap_or_else(|_| value.to_string())
}

pub fn exit_error(message: &str, docs_hint: Option<&str>) -> ! {
    let mut err = json!({
        "error": "cli_error",
        "message": message
    });
    if let Some(hint) = docs_hint {
        err["docs_hint"] = json!(hint);
    }
    eprintln!("{}", render(&err));
    std::process::exit(4);
}

pub fn print_json(value: &serde_json::Value) {
    println!("{}", render(value));
}

pub fn print_json_err(value: &serde_json::Value) {
    eprintln!("{}", render(value));
}

/// The admin token, or a usage error if none was given.
pub fn require_admin_token(token: Option<&str>) -> &str {
    match token.map(str::trim).filter(|t| !t.is_empty()) {
        Some(token) => token,
        None => exit_error(
            "An admin token is required for this command",
            Some("Set --admin-token or SENTINEL_ADMIN_TOKEN to the server's admin token."),
        ),
    }
}

/// Join `segments` onto the base URL, percent-encoding each one.
/// Identities such as IPv6 addresses contain characters that are not
/// path-safe, so they are never formatted into the path directly.
pub fn build_url(api_url: &str, segments: &[&str]) -> Result<reqwest::Url, String> {
    let mut url =
        reqwest::Url::parse(api_url).map_err(|e| format!("Invalid API URL '{api_url}': {e}"))?;
    url.path_segments_mut()
        .map_err(|_| format!("API URL '{api_url}' cannot be used as a base"))?
        .pop_if_empty()
        .extend(segments);
    Ok(url)
}

/// Execute an API request, print response, exit with structured code.
///
/// Exit codes: 0=success (2xx), 1=client error (4xx), 2=server error (5xx),
///             3=connection error, 4=usage error
pub async fn api_request(
    api_url: &str,
    method: reqwest::Method,
    segments: &[&str],
    token: Option<&str>,
    include: bool,
) -> i32 {
    let url = match build_url(api_url, segments) {
        Ok(url) => url,
        Err(message) => {
            print_json_err(&json!({
                "error": "cli_error",
                "message": message
            }));
            return 4;
        }
    };
    tracing::debug!(%method, %url, "sending request");

    let mut req = client().request(method, url);
    if let Some(t) = token {
        req = req.header("Authorization", format!("Bearer {t}"));
    }

    let resp = match req.send().await {
        Ok(r) => r,
        Err(e) => {
            print_json_err(&json!({
                "error": "connection_error",
                "message": format!("{e}"),
                "docs_hint": "Is the API server running? Check SENTINEL_API_URL."
            }));
            return 3;
        }
    };

    let status = resp.status().as_u16();
    let exit_code = exit_code_for_status(status);

    // Collect headers before consuming response
    let headers: serde_json::Map<String, serde_json::Value> = if include {
        resp.headers()
            .iter()
            .map(|(k, v)| (k.to_string(), json!(v.to_str().unwrap_or("<binary>"))))
            .collect()
    } else {
        serde_json::Map::new()
    };

    let resp_body: serde_json::Value = match resp.json().await {
        Ok(v) => v,
        Err(e) => json!({"raw_error": format!("Failed to parse response as JSON: {e}")}),
    };

    let output = if include {
        json!({
            "status": status,
            "headers": headers,
            "body": resp_body
        })
    } else {
        resp_body
    };

    if exit_code == 0 {
        print_json(&output);
    } else {
        print_json_err(&output);
    }

    exit_code
}

pub fn exit_code_for_status(status: u16) -> i32 {
    match status {
        200..=299 => 0,
        400..=499 => 1,
        _ => 2,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identities_are_percent_encoded_as_one_segment() {
        let url = build_url(
            "http://localhost:3000",
            &["v1", "admin", "admission", "identities", "2001:db8::1/64"],
        )
        .unwrap();
        assert_eq!(
            url.as_str(),
            "http://localhost:3000/v1/admin/admission/identities/2001:db8::1%2F64"
        );
    }

    #[test]
    fn base_path_prefix_is_preserved() {
        let url = build_url("http://gateway.internal/sentinel/", &["health"]).unwrap();
        assert_eq!(url.as_str(), "http://gateway.internal/sentinel/health");
    }

    #[test]
    fn invalid_base_url_is_reported() {
        assert!(build_url("not a url", &["health"]).is_err());
        assert!(build_url("mailto:ops@example.com", &["health"]).is_err());
    }

    #[test]
    fn status_codes_map_to_exit_codes() {
        assert_eq!(exit_code_for_status(200), 0);
        assert_eq!(exit_code_for_status(204), 0);
        assert_eq!(exit_code_for_status(401), 1);
        assert_eq!(exit_code_for_status(429), 1);
        assert_eq!(exit_code_for_status(503), 2);
    }
}
