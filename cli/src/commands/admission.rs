use crate::util::{api_request, require_admin_token};

const ADMISSION_PREFIX: [&str; 3] = ["v1", "admin", "admission"];

fn identity_path<'a>(identity: &'a str, action: Option<&'a str>) -> Vec<&'a str> {
    let mut segments: Vec<&str> = ADMISSION_PREFIX.to_vec();
    segments.push("identities");
    segments.push(identity);
    segments.extend(action);
    segments
}

pub async fn stats(api_url: &str, token: Option<&str>, include: bool) -> i32 {
    let token = require_admin_token(token);
    let mut segments = ADMISSION_PREFIX.to_vec();
    segments.push("stats");
    api_request(
        api_url,
        reqwest::Method::GET,
        &segments,
        Some(token),
        include,
    )
    .await
}

pub async fn inspect(api_url: &str, token: Option<&str>, identity: &str, include: bool) -> i32 {
    let token = require_admin_token(token);
    api_request(
        api_url,
        reqwest::Method::GET,
        &identity_path(identity, None),
        Some(token),
        include,
    )
    .await
}

pub async fn reset(api_url: &str, token: Option<&str>, identity: &str, include: bool) -> i32 {
    let token = require_admin_token(token);
    api_request(
        api_url,
        reqwest::Method::POST,
        &identity_path(identity, Some("reset")),
        Some(token),
        include,
    )
    .await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identity_paths_match_admin_routes() {
        assert_eq!(
            identity_path("10.0.0.1", None).join("/"),
            "v1/admin/admission/identities/10.0.0.1"
        );
        assert_eq!(
            identity_path("::1", Some("reset")).join("/"),
            "v1/admin/admission/identities/::1/reset"
        );
    }
}
