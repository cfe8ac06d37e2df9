//! Callback Types
//!
//! Parameters carried on the authorization redirect.

use url::Url;

/// Callback parameters from authorization redirect.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct CallbackParams {
    /// Authorization code (if success).
    pub code: Option<String>,
    /// State parameter.
    pub state: Option<String>,
    /// Error code (if authorization failed).
    pub error: Option<String>,
    /// Error description.
    pub error_description: Option<String>,
    /// Error URI.
    pub error_uri: Option<String>,
}

impl CallbackParams {
    /// Parse callback parameters from URL.
    pub fn from_url(url: &Url) -> Self {
        let mut params = Self::default();

        for (key, value) in url.query_pairs() {
            match key.as_ref() {
                "code" => params.code = Some(value.into_owned()),
                "state" => params.state = Some(value.into_owned()),
                "error" => params.error = Some(value.into_owned()),
                "error_description" => params.error_description = Some(value.into_owned()),
                "error_uri" => params.error_uri = Some(value.into_owned()),
                _ => {}
            }
        }

        params
    }

    /// Parse callback parameters from URL string.
    pub fn from_url_str(url_str: &str) -> Result<Self, url::ParseError> {
        let url = Url::parse(url_str)?;
        Ok(Self::from_url(&url))
    }

    /// Check if callback contains an error.
    pub fn is_error(&self) -> bool {
        self.error.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_callback_params_from_url() {
        // Brokerage codes are percent-encoded and end in '@'.
        let params =
            CallbackParams::from_url_str("https://127.0.0.1/callback?code=C0.b2F1dGg%40&state=xyz789")
                .unwrap();

        assert_eq!(params.code.as_deref(), Some("C0.b2F1dGg@"));
        assert_eq!(params.state.as_deref(), Some("xyz789"));
        assert!(!params.is_error());
    }

    #[test]
    fn test_callback_params_error() {
        let params = CallbackParams::from_url_str(
            "https://127.0.0.1/callback?error=access_denied&error_description=User%20denied",
        )
        .unwrap();

        assert!(params.code.is_none());
        assert_eq!(params.error.as_deref(), Some("access_denied"));
        assert_eq!(params.error_description.as_deref(), Some("User denied"));
        assert!(params.is_error());
    }
}
