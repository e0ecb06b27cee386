//! Authorization-code flow with PKCE, used once to obtain the first token pair.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use cobalt_core::{urls, StreamingConfig};
use rand::distributions::Alphanumeric;
use rand::Rng;
use sha2::{Digest, Sha256};

const VERIFIER_LEN: usize = 128;

pub fn generate_verifier() -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(VERIFIER_LEN)
        .map(char::from)
        .collect()
}

pub fn code_challenge(verifier: &str) -> String {
    URL_SAFE_NO_PAD.encode(Sha256::digest(verifier.as_bytes()))
}

pub fn authorize_url(cfg: &StreamingConfig, verifier: &str) -> String {
    urls::authorize_url(
        &cfg.accounts_base,
        &cfg.client_id,
        &cfg.redirect_uri,
        &cfg.scope,
        &code_challenge(verifier),
    )
}
