//! The shared AWS credentials file.

use std::{
    env, io,
    path::{Path, PathBuf},
};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::{fs, io::AsyncWriteExt};
use tracing::debug;

use crate::SessionCredentials;

const AWS_SHARED_CREDENTIALS_FILE: &str = "AWS_SHARED_CREDENTIALS_FILE";
const AWS_SHARED_CREDENTIALS_FILE_DEFAULT: &[&str] = &[".aws", "credentials"];

const AWS_ACCESS_KEY_ID: &str = "aws_access_key_id";
const AWS_SECRET_ACCESS_KEY: &str = "aws_secret_access_key";
const AWS_SESSION_TOKEN: &str = "aws_session_token";
const AWS_SECURITY_TOKEN: &str = "aws_security_token";
const AWS_SESSION_EXPIRATION: &str = "aws_session_expiration";

const EXPIRATION_FORMAT: &str = "%Y-%m-%dT%H:%M:%S+0000";

/// Somewhere to keep credentials, keyed by profile name.
#[async_trait]
pub trait CredentialsStore: Send + Sync {
    /// Store `credentials` for `profile`, replacing anything previously stored for it.
    ///
    /// # Errors
    ///
    /// Returns an error if the store can't be updated. Other profiles must be left intact.
    async fn write(&self, profile: &str, credentials: &SessionCredentials)
        -> Result<(), StoreError>;

    /// Load the credentials stored for `profile`.
    ///
    /// # Errors
    ///
    /// [`StoreError::NotFound`] if nothing is stored for `profile`.
    async fn read(&self, profile: &str) -> Result<SessionCredentials, StoreError>;

    /// Where the credentials are kept, for display.
    fn location(&self) -> String;
}

/// An INI-style AWS shared credentials file.
///
/// Each profile is a `[name]` section. Writing a profile rewrites the whole file through a
/// temporary file, so a failed write never leaves other profiles half-written. On Unix the file is
/// only readable by its owner.
#[derive(Clone, Debug)]
pub struct CredentialsFile {
    path: PathBuf,
}

impl CredentialsFile {
    /// Use the credentials file at `path`.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Locate the credentials file using `AWS_SHARED_CREDENTIALS_FILE`, falling back to
    /// `~/.aws/credentials`.
    ///
    /// # Errors
    ///
    /// Fails if the variable isn't set and the home directory can't be determined.
    pub fn from_env() -> Result<Self, StoreError> {
        if let Some(path) = env::var_os(AWS_SHARED_CREDENTIALS_FILE).filter(|path| !path.is_empty())
        {
            return Ok(Self::new(path));
        }

        let mut path = dirs_next::home_dir().ok_or(StoreError::NoHomeDirectory)?;
        for segment in AWS_SHARED_CREDENTIALS_FILE_DEFAULT {
            path.push(segment);
        }
        Ok(Self::new(path))
    }

    /// The path of the credentials file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn read_existing(&self) -> Result<String, StoreError> {
        match fs::read_to_string(&self.path).await {
            Ok(content) => Ok(content),
            Err(error) if error.kind() == io::ErrorKind::NotFound => Ok(String::new()),
            Err(error) => Err(StoreError::io("read", &self.path, error)),
        }
    }

    async fn replace_contents(&self, content: &str) -> Result<(), StoreError> {
        if let Some(dir) = self.path.parent() {
            let mut builder = fs::DirBuilder::new();
            builder.recursive(true);
            #[cfg(unix)]
            builder.mode(0o700);
            builder
                .create(dir)
                .await
                .map_err(|error| StoreError::io("create directory for", &self.path, error))?;
        }

        let file_name = self
            .path
            .file_name()
            .map_or_else(|| "credentials".into(), |name| name.to_string_lossy());
        let temp_path = self
            .path
            .with_file_name(format!(".{file_name}.{}.tmp", std::process::id()));

        let result = write_private(&temp_path, content).await;
        let result = match result {
            Ok(()) => fs::rename(&temp_path, &self.path).await,
            Err(error) => Err(error),
        };
        if let Err(error) = result {
            let _ = fs::remove_file(&temp_path).await;
            return Err(StoreError::io("write", &self.path, error));
        }

        Ok(())
    }
}

#[async_trait]
impl CredentialsStore for CredentialsFile {
    async fn write(
        &self,
        profile: &str,
        credentials: &SessionCredentials,
    ) -> Result<(), StoreError> {
        let existing = self.read_existing().await?;
        let content = upsert_section(&existing, profile, &render_section(profile, credentials));
        self.replace_contents(&content).await?;
        debug!(profile, path = %self.path.display(), "wrote credentials");
        Ok(())
    }

    async fn read(&self, profile: &str) -> Result<SessionCredentials, StoreError> {
        let content = self.read_existing().await?;
        parse_section(&content, profile).map_err(|error| match error {
            ParseError::NotFound => StoreError::NotFound {
                profile: profile.to_string(),
                path: self.path.clone(),
            },
            ParseError::Malformed(reason) => StoreError::Malformed {
                profile: profile.to_string(),
                path: self.path.clone(),
                reason,
            },
        })
    }

    fn location(&self) -> String {
        dirs_next::home_dir()
            .and_then(|home| {
                self.path
                    .strip_prefix(home)
                    .ok()
                    .map(|relative| format!("~/{}", relative.display()))
            })
            .unwrap_or_else(|| self.path.display().to_string())
    }
}

async fn write_private(path: &Path, content: &str) -> io::Result<()> {
    let mut options = fs::OpenOptions::new();
    options.write(true).create(true).truncate(true);
    #[cfg(unix)]
    options.mode(0o600);

    let mut file = options.open(path).await?;
    file.write_all(content.as_bytes()).await?;
    file.sync_all().await?;

    // `mode` only applies to newly created files.
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        fs::set_permissions(path, std::fs::Permissions::from_mode(0o600)).await?;
    }

    Ok(())
}

/// An error reading or writing stored credentials.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// There is no section for the profile.
    #[error("profile [{profile}] not found in {}", path.display())]
    NotFound {
        /// The profile that was looked up.
        profile: String,

        /// The file that was searched.
        path: PathBuf,
    },

    /// The profile's section is missing values or has invalid ones.
    #[error("profile [{profile}] in {} is malformed: {reason}", path.display())]
    Malformed {
        /// The profile that was read.
        profile: String,

        /// The file that was read.
        path: PathBuf,

        /// What is wrong with the section.
        reason: String,
    },

    /// The file couldn't be accessed.
    #[error("failed to {action} credentials file {}: {source}", path.display())]
    Io {
        /// What was being attempted.
        action: &'static str,

        /// The file that was being accessed.
        path: PathBuf,

        /// The underlying error.
        source: io::Error,
    },

    /// There's no home directory to put `.aws/credentials` in.
    #[error("could not determine home directory; set AWS_SHARED_CREDENTIALS_FILE")]
    NoHomeDirectory,
}

impl StoreError {
    fn io(action: &'static str, path: &Path, source: io::Error) -> Self {
        Self::Io {
            action,
            path: path.to_path_buf(),
            source,
        }
    }
}

#[derive(Debug, PartialEq, Eq)]
enum ParseError {
    NotFound,
    Malformed(String),
}

fn parse_section_name(line: &str) -> Option<&str> {
    line.trim()
        .strip_prefix('[')
        .and_then(|line| line.strip_suffix(']'))
        .map(str::trim)
}

fn render_section(profile: &str, credentials: &SessionCredentials) -> String {
    let expiration = credentials.expires_at.format(EXPIRATION_FORMAT);
    format!(
        "[{profile}]\n\
         {AWS_ACCESS_KEY_ID} = {}\n\
         {AWS_SECRET_ACCESS_KEY} = {}\n\
         {AWS_SESSION_TOKEN} = {}\n\
         {AWS_SECURITY_TOKEN} = {}\n\
         {AWS_SESSION_EXPIRATION} = {expiration}\n",
        credentials.access_key_id,
        credentials.secret_access_key,
        credentials.session_token,
        credentials.session_token,
    )
}

/// Drop every `[profile]` section from `content` and append `section`.
fn upsert_section(content: &str, profile: &str, section: &str) -> String {
    let mut in_profile = false;
    let kept: Vec<_> = content
        .lines()
        .filter(|line| {
            if let Some(name) = parse_section_name(line) {
                in_profile = name == profile;
            }
            !in_profile
        })
        .collect();

    let mut updated = kept.join("\n").trim_end().to_string();
    if !updated.is_empty() {
        updated.push_str("\n\n");
    }
    updated.push_str(section);
    updated
}

fn parse_section(content: &str, profile: &str) -> Result<SessionCredentials, ParseError> {
    let mut in_profile = false;
    let mut found = false;
    let mut access_key_id = None;
    let mut secret_access_key = None;
    let mut session_token = None;
    let mut expiration = None;

    for line in content.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') || line.starts_with(';') {
            continue;
        }

        if let Some(name) = parse_section_name(line) {
            if in_profile {
                break;
            }
            in_profile = name == profile;
            found |= in_profile;
        } else if in_profile {
            let mut kv = line.splitn(2, '=').map(str::trim);
            match [kv.next(), kv.next()] {
                [Some(AWS_ACCESS_KEY_ID), Some(value)] => access_key_id = Some(value),
                [Some(AWS_SECRET_ACCESS_KEY), Some(value)] => secret_access_key = Some(value),
                [Some(AWS_SESSION_TOKEN), Some(value)] => session_token = Some(value),
                [Some(AWS_SESSION_EXPIRATION), Some(value)] => expiration = Some(value),
                _ => {}
            }
        }
    }

    let access_key_id = access_key_id.filter(|value| !value.is_empty());
    let (true, Some(access_key_id)) = (found, access_key_id) else {
        return Err(ParseError::NotFound);
    };

    let missing = |key: &str| ParseError::Malformed(format!("missing {key}"));
    let expiration = expiration.ok_or_else(|| missing(AWS_SESSION_EXPIRATION))?;

    Ok(SessionCredentials {
        access_key_id: access_key_id.to_string(),
        secret_access_key: secret_access_key
            .ok_or_else(|| missing(AWS_SECRET_ACCESS_KEY))?
            .to_string(),
        session_token: session_token
            .ok_or_else(|| missing(AWS_SESSION_TOKEN))?
            .to_string(),
        expires_at: parse_expiration(expiration).ok_or_else(|| {
            ParseError::Malformed(format!(
                "invalid {AWS_SESSION_EXPIRATION} {expiration:?}"
            ))
        })?,
    })
}

fn parse_expiration(value: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_str(value, "%Y-%m-%dT%H:%M:%S%z")
        .or_else(|_| DateTime::parse_from_rfc3339(value))
        .ok()
        .map(|expiration| expiration.with_timezone(&Utc))
}
