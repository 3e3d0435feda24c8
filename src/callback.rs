//! OAuth redirect callback.
//!
//! After the user finishes the identity provider's consent screen the
//! authorization manager redirects to
//! `{scheme}://{host-app-id}/authorize-authorization-callback`, adding an
//! `error` query parameter (base64 encoded) when the grant failed.

use base64::Engine;
use base64::alphabet;
use base64::engine::{DecodePaddingMode, GeneralPurpose, GeneralPurposeConfig};
use url::form_urlencoded;

/// Path the host routes back to this client.
pub const AUTHORIZATION_CALLBACK_PATH: &str = "authorize-authorization-callback";

const LENIENT_STANDARD: GeneralPurpose = GeneralPurpose::new(
    &alphabet::STANDARD,
    GeneralPurposeConfig::new().with_decode_padding_mode(DecodePaddingMode::Indifferent),
);

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthorizationCallbackOutcome {
    Success,
    /// Decoded error message, or the raw value when it was not valid base64.
    Failed(String),
}

impl AuthorizationCallbackOutcome {
    /// Notification text for the host.
    pub fn message(&self) -> String {
        match self {
            AuthorizationCallbackOutcome::Success => "Authorized successfully.".to_string(),
            AuthorizationCallbackOutcome::Failed(error) => {
                format!("Authorization failed. {}", error)
            }
        }
    }
}

/// Parses the callback query string. Accepts a bare query (with or without a
/// leading `?`) or a full callback URI.
pub fn parse_authorization_callback(input: &str) -> AuthorizationCallbackOutcome {
    let query = match input.split_once('?') {
        Some((_, query)) => query,
        None if input.contains("://") => "",
        None => input,
    };
    let query = query.split('#').next().unwrap_or_default();

    let error = form_urlencoded::parse(query.as_bytes())
        .find(|(key, _)| key == "error")
        .map(|(_, value)| value.into_owned());

    match error {
        None => AuthorizationCallbackOutcome::Success,
        Some(encoded) => AuthorizationCallbackOutcome::Failed(decode_error(&encoded)),
    }
}

fn decode_error(encoded: &str) -> String {
    // Query decoding turns '+' into ' '; restore it for the base64 alphabet.
    let candidate = encoded.trim().replace(' ', "+");
    LENIENT_STANDARD
        .decode(candidate.as_bytes())
        .ok()
        .and_then(|bytes| String::from_utf8(bytes).ok())
        .unwrap_or_else(|| encoded.to_string())
}
