//! AWS credential discovery for the pricing tool server.
//!
//! Resolution order: environment variables, then the shared credentials file
//! (`AWS_SHARED_CREDENTIALS_FILE` or `~/.aws/credentials`) for the configured
//! profile.

use std::collections::HashMap;
use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use secrecy::{ExposeSecret, SecretString};
use tracing::debug;

use crate::errors::CredentialsError;

#[derive(Clone, Debug)]
pub struct AwsCredentials {
    pub access_key_id: String,
    pub secret_access_key: SecretString,
    pub session_token: Option<SecretString>,
    pub source: CredentialSource,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum CredentialSource {
    Environment,
    SharedFile { path: PathBuf, profile: String },
    Static,
}

impl CredentialSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Environment => "environment",
            Self::SharedFile { .. } => "shared_file",
            Self::Static => "static",
        }
    }
}

impl AwsCredentials {
    pub fn new(access_key_id: impl Into<String>, secret_access_key: impl Into<String>) -> Self {
        let secret_access_key: String = secret_access_key.into();
        Self {
            access_key_id: access_key_id.into(),
            secret_access_key: SecretString::from(secret_access_key),
            session_token: None,
            source: CredentialSource::Static,
        }
    }

    /// Environment block handed to the pricing server process.
    pub fn to_process_env(&self, region: &str) -> Vec<(String, String)> {
        let mut vars = vec![
            ("AWS_ACCESS_KEY_ID".to_string(), self.access_key_id.clone()),
            ("AWS_SECRET_ACCESS_KEY".to_string(), self.secret_access_key.expose_secret().to_string()),
            ("AWS_REGION".to_string(), region.to_string()),
        ];
        if let Some(token) = &self.session_token {
            vars.push(("AWS_SESSION_TOKEN".to_string(), token.expose_secret().to_string()));
        }
        vars
    }
}

pub trait CredentialsProvider: Send + Sync {
    fn credentials(&self) -> Result<AwsCredentials, CredentialsError>;
}

/// Fixed credentials, or a provider that always misses.
#[derive(Clone, Debug)]
pub struct StaticCredentials {
    credentials: Option<AwsCredentials>,
}

impl StaticCredentials {
    pub fn new(credentials: AwsCredentials) -> Self {
        Self { credentials: Some(credentials) }
    }

    pub fn missing() -> Self {
        Self { credentials: None }
    }
}

impl CredentialsProvider for StaticCredentials {
    fn credentials(&self) -> Result<AwsCredentials, CredentialsError> {
        self.credentials
            .clone()
            .ok_or_else(|| CredentialsError::Missing { profile: "static".to_string() })
    }
}

#[derive(Clone, Debug)]
pub struct DefaultCredentialsChain {
    profile: String,
}

impl DefaultCredentialsChain {
    pub fn new(profile: impl Into<String>) -> Self {
        Self { profile: profile.into() }
    }
}

impl CredentialsProvider for DefaultCredentialsChain {
    fn credentials(&self) -> Result<AwsCredentials, CredentialsError> {
        let lookup = |key: &str| env::var(key).ok();
        let credentials_file = lookup("AWS_SHARED_CREDENTIALS_FILE")
            .map(PathBuf::from)
            .or_else(|| dirs::home_dir().map(|home| home.join(".aws").join("credentials")));
        resolve_credentials(&lookup, credentials_file.as_deref(), &self.profile)
    }
}

pub fn resolve_credentials(
    lookup: &dyn Fn(&str) -> Option<String>,
    credentials_file: Option<&Path>,
    profile: &str,
) -> Result<AwsCredentials, CredentialsError> {
    let resolved = resolve_from_sources(lookup, credentials_file, profile);
    match &resolved {
        Ok(credentials) => debug!(
            event_name = "credentials.resolved",
            source = credentials.source.as_str(),
            profile,
            session_token = credentials.session_token.is_some(),
            "resolved AWS credentials"
        ),
        Err(error) => debug!(
            event_name = "credentials.missing",
            profile,
            checked_file = ?credentials_file,
            error = %error,
            "no AWS credentials resolved"
        ),
    }
    resolved
}

fn resolve_from_sources(
    lookup: &dyn Fn(&str) -> Option<String>,
    credentials_file: Option<&Path>,
    profile: &str,
) -> Result<AwsCredentials, CredentialsError> {
    let non_empty = |key: &str| lookup(key).filter(|value| !value.trim().is_empty());

    if let (Some(access_key_id), Some(secret_access_key)) =
        (non_empty("AWS_ACCESS_KEY_ID"), non_empty("AWS_SECRET_ACCESS_KEY"))
    {
        return Ok(AwsCredentials {
            access_key_id,
            secret_access_key: secret_access_key.into(),
            session_token: non_empty("AWS_SESSION_TOKEN").map(SecretString::from),
            source: CredentialSource::Environment,
        });
    }

    let missing = || CredentialsError::Missing { profile: profile.to_string() };
    let Some(path) = credentials_file.filter(|path| path.exists()) else {
        return Err(missing());
    };

    let raw = fs::read_to_string(path).map_err(|error| CredentialsError::Unreadable {
        path: path.display().to_string(),
        message: error.to_string(),
    })?;
    let profiles = parse_credentials_file(&raw);
    let section = profiles.get(profile).ok_or_else(missing)?;

    match (section.get("aws_access_key_id"), section.get("aws_secret_access_key")) {
        (Some(access_key_id), Some(secret_access_key)) => Ok(AwsCredentials {
            access_key_id: access_key_id.clone(),
            secret_access_key: secret_access_key.clone().into(),
            session_token: section.get("aws_session_token").cloned().map(SecretString::from),
            source: CredentialSource::SharedFile {
                path: path.to_path_buf(),
                profile: profile.to_string(),
            },
        }),
        _ => Err(missing()),
    }
}

fn parse_credentials_file(raw: &str) -> HashMap<String, HashMap<String, String>> {
    let mut profiles: HashMap<String, HashMap<String, String>> = HashMap::new();
    let mut current: Option<String> = None;

    for line in raw.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') || line.starts_with(';') {
            continue;
        }

        if let Some(name) = line.strip_prefix('[').and_then(|rest| rest.strip_suffix(']')) {
            let name = name.trim().trim_start_matches("profile ").trim().to_string();
            profiles.entry(name.clone()).or_default();
            current = Some(name);
            continue;
        }

        let (Some(profile), Some((key, value))) = (current.as_ref(), line.split_once('=')) else {
            continue;
        };
        let value = value.trim();
        if value.is_empty() {
            continue;
        }
        profiles
            .entry(profile.clone())
            .or_default()
            .insert(key.trim().to_ascii_lowercase(), value.to_string());
    }

    profiles
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::fs;
    use std::io::{self, Write};
    use std::sync::{Arc, Mutex};

    use secrecy::ExposeSecret;
    use tempfile::TempDir;

    use super::{resolve_credentials, CredentialSource, CredentialsProvider, StaticCredentials};
    use crate::errors::CredentialsError;

    fn env_of(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> =
            pairs.iter().map(|(key, value)| (key.to_string(), value.to_string())).collect();
        move |key: &str| vars.get(key).cloned()
    }

    #[test]
    fn environment_credentials_take_precedence() {
        let lookup = env_of(&[
            ("AWS_ACCESS_KEY_ID", "AKIAENV"),
            ("AWS_SECRET_ACCESS_KEY", "env-secret"),
            ("AWS_SESSION_TOKEN", "env-token"),
        ]);

        let credentials = resolve_credentials(&lookup, None, "default").expect("env credentials");
        assert_eq!(credentials.access_key_id, "AKIAENV");
        assert_eq!(credentials.source, CredentialSource::Environment);

        let env = credentials.to_process_env("us-east-1");
        assert!(env.contains(&("AWS_SESSION_TOKEN".to_string(), "env-token".to_string())));
        assert!(env.contains(&("AWS_REGION".to_string(), "us-east-1".to_string())));
    }

    #[test]
    fn shared_file_profile_is_used_when_env_is_empty() {
        let dir = TempDir::new().expect("tempdir");
        let path = dir.path().join("credentials");
        fs::write(
            &path,
            "[default]\naws_access_key_id = AKIADEFAULT\naws_secret_access_key = default-secret\n\n\
             [pricing]\naws_access_key_id=AKIAPRICING\naws_secret_access_key=pricing-secret\n",
        )
        .expect("write credentials");

        let lookup = env_of(&[("AWS_ACCESS_KEY_ID", "  ")]);
        let credentials =
            resolve_credentials(&lookup, Some(&path), "pricing").expect("profile credentials");

        assert_eq!(credentials.access_key_id, "AKIAPRICING");
        assert_eq!(credentials.secret_access_key.expose_secret(), "pricing-secret");
        assert!(credentials.session_token.is_none());
    }

    #[test]
    fn missing_profile_reports_missing_credentials() {
        let dir = TempDir::new().expect("tempdir");
        let path = dir.path().join("credentials");
        fs::write(&path, "[default]\naws_access_key_id = AKIADEFAULT\n").expect("write");

        let lookup = env_of(&[]);
        let error = resolve_credentials(&lookup, Some(&path), "default").unwrap_err();
        assert_eq!(error, CredentialsError::Missing { profile: "default".to_string() });

        let error = resolve_credentials(&lookup, None, "ops").unwrap_err();
        assert!(error.to_string().contains("credentials"));
    }

    #[test]
    fn static_missing_provider_fails() {
        assert!(StaticCredentials::missing().credentials().is_err());
    }

    #[derive(Clone, Default)]
    struct CapturedLogs(Arc<Mutex<Vec<u8>>>);

    impl Write for CapturedLogs {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn resolution_logs_source_without_secrets() {
        let logs = CapturedLogs::default();
        let writer = logs.clone();
        let subscriber = tracing_subscriber::fmt()
            .with_max_level(tracing::Level::DEBUG)
            .with_ansi(false)
            .with_writer(move || writer.clone())
            .finish();

        let lookup = env_of(&[
            ("AWS_ACCESS_KEY_ID", "AKIAENV"),
            ("AWS_SECRET_ACCESS_KEY", "env-secret"),
            ("AWS_SESSION_TOKEN", "env-token"),
        ]);
        tracing::subscriber::with_default(subscriber, || {
            resolve_credentials(&lookup, None, "default").expect("env credentials");
        });

        let output = String::from_utf8(logs.0.lock().unwrap().clone()).unwrap();
        assert!(output.contains("credentials.resolved"), "{output}");
        assert!(output.contains("environment"), "{output}");
        assert!(!output.contains("env-secret"));
        assert!(!output.contains("env-token"));
    }
}
