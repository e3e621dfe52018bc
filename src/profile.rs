use std::{
    env, io,
    path::{Path, PathBuf},
};

use tokio::fs;
use tracing::debug;

const AWS_CONFIG_FILE: &str = "AWS_CONFIG_FILE";
const AWS_CONFIG_FILE_DEFAULT: &[&str] = &[".aws", "config"];

/// A reference to a profile in AWS shared configuration.
///
/// The config file is located with the `AWS_CONFIG_FILE` environment variable (falling back to
/// `~/.aws/config`), but this can be overridden with [`with_config_file`](Self::with_config_file).
///
/// # Example
///
/// ```no_run
/// # #[tokio::main] async fn main() {
/// use aws_sso_login::ProfileSource;
///
/// let settings = ProfileSource::new("my-profile")
///     .with_config_file(".myconfig")
///     .load()
///     .await;
/// # }
/// ```
#[allow(clippy::module_name_repetitions)]
#[derive(Clone, Debug)]
pub struct ProfileSource {
    config_file: Option<PathBuf>,
    profile: String,
}

impl ProfileSource {
    /// Refer to the profile called `name`.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            config_file: None,
            profile: name.into(),
        }
    }

    /// Set the location of the AWS shared config file.
    #[must_use]
    pub fn with_config_file(self, path: impl Into<PathBuf>) -> Self {
        Self {
            config_file: Some(path.into()),
            ..self
        }
    }

    /// Load whatever SSO settings the profile has.
    ///
    /// Shared config is the lowest precedence source, so a missing or unreadable file, or a
    /// missing profile, simply contributes nothing.
    pub async fn load(self) -> ProfileSettings {
        let Some(path) = self.config_file.or_else(get_config_file_from_env) else {
            debug!("no AWS config file to read");
            return ProfileSettings::default();
        };

        match read_file(&path).await {
            Ok(config) => parse_profile(&config, &self.profile).unwrap_or_else(|| {
                debug!(profile = %self.profile, path = %path.display(), "profile not defined");
                ProfileSettings::default()
            }),
            Err(error) => {
                debug!(path = %path.display(), %error, "unable to read AWS config file");
                ProfileSettings::default()
            }
        }
    }
}

/// SSO settings found in a shared config profile.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ProfileSettings {
    /// `sso_start_url`
    pub start_url: Option<String>,

    /// `sso_region`
    pub region: Option<String>,

    /// `sso_account_id`
    pub account_id: Option<String>,

    /// `sso_role_name`
    pub role_name: Option<String>,
}

fn get_config_file_from_env() -> Option<PathBuf> {
    env::var_os(AWS_CONFIG_FILE)
        .filter(|path| !path.is_empty())
        .map(PathBuf::from)
        .or_else(|| {
            let mut path = dirs_next::home_dir()?;
            for segment in AWS_CONFIG_FILE_DEFAULT {
                path.push(segment);
            }
            Some(path)
        })
}

fn parse_profile_name(line: &str) -> Option<&str> {
    line.trim().strip_suffix(']').and_then(|line| {
        line.strip_prefix("[profile ")
            .or_else(|| line.strip_prefix('['))
            .map(str::trim)
    })
}

fn parse_profile(config: &str, profile: &str) -> Option<ProfileSettings> {
    let mut in_profile = false;
    let mut found = false;
    let mut settings = ProfileSettings::default();

    for line in config.lines() {
        let line = line.trim_matches(' ');
        if line.is_empty() || line.starts_with('#') || line.starts_with(';') {
            continue;
        }

        if let Some(next_profile) = parse_profile_name(line) {
            if in_profile {
                break;
            }
            in_profile = next_profile == profile;
            found |= in_profile;
        } else if in_profile {
            let mut kv = line
                .splitn(2, '=')
                .map(|kv| kv.trim_matches(' '))
                .filter(|kv| !kv.is_empty());
            let value = |value: &str| Some(value.to_string());
            match [kv.next(), kv.next()] {
                [Some("sso_region"), Some(region)] => settings.region = value(region),
                [Some("sso_start_url"), Some(url)] => settings.start_url = value(url),
                [Some("sso_account_id"), Some(id)] => settings.account_id = value(id),
                [Some("sso_role_name"), Some(role)] => settings.role_name = value(role),
                _ => {}
            }
        }
    }

    found.then_some(settings)
}

async fn read_file(path: &Path) -> Result<String, io::Error> {
    let meta = fs::metadata(&path).await?;
    if !meta.is_file() {
        return Err(io::Error::new(io::ErrorKind::Other, "not a file"));
    }

    fs::read_to_string(path).await
}
