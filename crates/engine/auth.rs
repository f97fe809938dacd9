use std::{fmt, path::PathBuf};
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AuthError {
    #[error("at most one of basic_auth, oauth2, bearer_token & bearer_token_file must be configured")]
    MutuallyExclusive,
    #[error("oauth2 requires {0}")]
    IncompleteOAuth2(&'static str),
}

/// Credential fields as they arrive from flags, before validation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RawAuth {
    pub username: Option<String>,
    pub password: Option<String>,
    pub bearer_token: Option<String>,
    pub bearer_token_file: Option<PathBuf>,
    pub oauth2_client_id: Option<String>,
    pub oauth2_client_secret: Option<String>,
    pub oauth2_token_url: Option<String>,
    pub oauth2_scopes: Vec<String>,
}

#[derive(Clone, PartialEq, Eq)]
pub struct OAuth2Config {
    pub client_id: String,
    pub client_secret: String,
    pub token_url: String,
    pub scopes: Vec<String>,
}

/// Authentication of one endpoint. Exactly one mechanism, or none.
#[derive(Clone, Default, PartialEq, Eq)]
pub enum Auth {
    #[default]
    None,
    Basic {
        username: String,
        password: String,
    },
    BearerToken(String),
    BearerTokenFile(PathBuf),
    OAuth2(OAuth2Config),
}

// Secrets stay out of logs.
impl fmt::Debug for Auth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::None => write!(f, "None"),
            Self::Basic { username, .. } => write!(f, "Basic({username}:<redacted>)"),
            Self::BearerToken(_) => write!(f, "BearerToken(<redacted>)"),
            Self::BearerTokenFile(path) => write!(f, "BearerTokenFile({})", path.display()),
            Self::OAuth2(config) => write!(
                f,
                "OAuth2(client_id={}, token_url={})",
                config.client_id, config.token_url
            ),
        }
    }
}

impl fmt::Debug for OAuth2Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OAuth2Config")
            .field("client_id", &self.client_id)
            .field("token_url", &self.token_url)
            .field("scopes", &self.scopes)
            .finish_non_exhaustive()
    }
}

fn present(value: &Option<String>) -> Option<&str> {
    value.as_deref().filter(|value| !value.is_empty())
}

impl RawAuth {
    pub fn into_auth(self) -> Result<Auth, AuthError> {
        let basic = present(&self.username).is_some() || present(&self.password).is_some();
        let bearer = present(&self.bearer_token).is_some();
        let bearer_file = self
            .bearer_token_file
            .as_ref()
            .is_some_and(|path| !path.as_os_str().is_empty());
        let oauth2 = present(&self.oauth2_client_id).is_some()
            || present(&self.oauth2_client_secret).is_some()
            || present(&self.oauth2_token_url).is_some();

        let configured = [basic, bearer, bearer_file, oauth2]
            .into_iter()
            .filter(|set| *set)
            .count();
        if configured > 1 {
            return Err(AuthError::MutuallyExclusive);
        }

        if basic {
            return Ok(Auth::Basic {
                username: self.username.unwrap_or_default(),
                password: self.password.unwrap_or_default(),
            });
        }
        if bearer {
            return Ok(Auth::BearerToken(self.bearer_token.unwrap_or_default()));
        }
        if bearer_file {
            return Ok(Auth::BearerTokenFile(
                self.bearer_token_file.unwrap_or_default(),
            ));
        }
        if oauth2 {
            let client_id = self
                .oauth2_client_id
                .filter(|value| !value.is_empty())
                .ok_or(AuthError::IncompleteOAuth2("client_id"))?;
            let token_url = self
                .oauth2_token_url
                .filter(|value| !value.is_empty())
                .ok_or(AuthError::IncompleteOAuth2("token_url"))?;
            return Ok(Auth::OAuth2(OAuth2Config {
                client_id,
                client_secret: self.oauth2_client_secret.unwrap_or_default(),
                token_url,
                scopes: self.oauth2_scopes,
            }));
        }

        Ok(Auth::None)
    }
}
