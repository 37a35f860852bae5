// ── Connection-request callback (§4.5, Open Question 1) ──
//
// An authenticated GET to the device's stored callback URL, used to
// nudge a CPE with no open session into starting one. Tries HTTP Basic
// first; on a 401 challenge, answers with Digest using the challenge
// header the device returned. See DESIGN.md for why Basic-first beats
// always-Digest here.

use fleet_config::ConnectionRequestAuth;
use secrecy::{ExposeSecret, SecretString};

use crate::error::CwmpError;

pub async fn send(client: &reqwest::Client, url: &str, username: &str, password: &SecretString, preferred: ConnectionRequestAuth) -> Result<(), CwmpError> {
    let basic_response = client.get(url).basic_auth(username, Some(password.expose_secret())).send().await?;

    if basic_response.status().is_success() {
        return Ok(());
    }
    if basic_response.status() != reqwest::StatusCode::UNAUTHORIZED {
        return Err(CwmpError::ConnectionRequestFailed(format!("unexpected status {}", basic_response.status())));
    }

    let Some(challenge_header) = basic_response.headers().get(reqwest::header::WWW_AUTHENTICATE) else {
        return Err(CwmpError::ConnectionRequestFailed("401 with no WWW-Authenticate challenge".into()));
    };
    let challenge_header = challenge_header.to_str().map_err(|e| CwmpError::ConnectionRequestFailed(e.to_string()))?;

    if preferred == ConnectionRequestAuth::Basic {
        // The device demanded Digest even though Basic was preferred;
        // fall through and answer the challenge anyway rather than fail.
        tracing::debug!("connection-request target requires Digest despite configured preference");
    }

    let mut prompt = digest_auth::parse(challenge_header).map_err(|e| CwmpError::ConnectionRequestFailed(e.to_string()))?;
    let context = digest_auth::AuthContext::new(username, password.expose_secret(), url);
    let answer = prompt.respond(&context).map_err(|e| CwmpError::ConnectionRequestFailed(e.to_string()))?.to_header_string();

    let response = client.get(url).header(reqwest::header::AUTHORIZATION, answer).send().await?;
    if response.status().is_success() {
        Ok(())
    } else {
        Err(CwmpError::ConnectionRequestFailed(format!("digest attempt returned {}", response.status())))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn digest_answer_is_built_from_the_challenge_header() {
        let challenge = r#"Digest realm="cpe", nonce="abc123", qop="auth""#;
        let mut prompt = digest_auth::parse(challenge).unwrap();
        let context = digest_auth::AuthContext::new("admin", "secret", "/");
        let answer = prompt.respond(&context).unwrap().to_header_string();
        assert!(answer.starts_with("Digest "));
        assert!(answer.contains("username=\"admin\""));
    }
}
