use percent_encoding::{utf8_percent_encode, AsciiSet, NON_ALPHANUMERIC};

const QUERY_VALUE: &AsciiSet = &NON_ALPHANUMERIC.remove(b'-').remove(b'_').remove(b'.').remove(b'~');

fn trim_base(base: &str) -> &str {
    base.trim_end_matches('/')
}

pub fn relay_presence_url(api_base: &str, subject_id: &str) -> String {
    let encoded = utf8_percent_encode(subject_id.trim(), QUERY_VALUE);
    format!("{}/v1/users/{encoded}", trim_base(api_base))
}

pub fn currently_playing_url(api_base: &str) -> String {
    format!("{}/me/player/currently-playing", trim_base(api_base))
}

pub fn token_url(accounts_base: &str) -> String {
    format!("{}/api/token", trim_base(accounts_base))
}

/// Authorization-code + PKCE entry point for the streaming service.
pub fn authorize_url(
    accounts_base: &str,
    client_id: &str,
    redirect_uri: &str,
    scope: &str,
    code_challenge: &str,
) -> String {
    let params = [
        ("client_id", client_id),
        ("response_type", "code"),
        ("redirect_uri", redirect_uri),
        ("scope", scope),
        ("code_challenge_method", "S256"),
        ("code_challenge", code_challenge),
    ];
    let query = params
        .iter()
        .map(|(k, v)| format!("{k}={}", utf8_percent_encode(v, QUERY_VALUE)))
        .collect::<Vec<_>>()
        .join("&");
    format!("{}/authorize?{query}", trim_base(accounts_base))
}
