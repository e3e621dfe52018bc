use std::fmt;

use crate::{ProfileSettings, Region};

/// Login settings from the command line and environment.
///
/// Every field is optional here. [`LoginConfig::resolve`] fills gaps from the shared config
/// profile and reports anything still missing.
#[derive(Clone, Debug, Default)]
pub struct Settings {
    /// The SSO start URL, e.g. `https://my-org.awsapps.com/start`.
    pub start_url: Option<String>,

    /// The AWS account to get credentials for.
    pub account_id: Option<String>,

    /// The credentials file profile to write.
    pub profile: Option<String>,

    /// The region of the SSO instance.
    pub region: Option<String>,

    /// The role to assume.
    pub role_name: Option<String>,

    /// Check the credentials with STS before and after storing them.
    pub validate: bool,
}

/// Fully resolved login configuration.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LoginConfig {
    /// The SSO start URL.
    pub start_url: String,

    /// The AWS account to get credentials for.
    pub account_id: String,

    /// The credentials file profile to write.
    pub profile: String,

    /// The region of the SSO instance.
    pub region: Region,

    /// The role to assume.
    pub role_name: String,

    /// Check the credentials with STS before and after storing them.
    pub validate: bool,
}

impl LoginConfig {
    /// Merge `settings` with the shared config `profile`, with `settings` taking precedence.
    ///
    /// Empty values count as unset.
    ///
    /// # Errors
    ///
    /// [`ConfigError::Missing`] lists every required setting that has no value.
    pub fn resolve(settings: Settings, profile: ProfileSettings) -> Result<Self, ConfigError> {
        fn pick(primary: Option<String>, fallback: Option<String>) -> Option<String> {
            primary
                .filter(|value| !value.is_empty())
                .or_else(|| fallback.filter(|value| !value.is_empty()))
        }

        let start_url = pick(settings.start_url, profile.start_url);
        let account_id = pick(settings.account_id, profile.account_id);
        let profile_name = pick(settings.profile, None);
        let region = pick(settings.region, profile.region);
        let role_name = pick(settings.role_name, profile.role_name);

        match (start_url, account_id, profile_name, region, role_name) {
            (Some(start_url), Some(account_id), Some(profile), Some(region), Some(role_name)) => {
                Ok(Self {
                    start_url,
                    account_id,
                    profile,
                    region: Region::from(region),
                    role_name,
                    validate: settings.validate,
                })
            }
            (start_url, account_id, profile, region, role_name) => {
                let missing = [
                    (start_url.is_none(), MissingSetting::StartUrl),
                    (account_id.is_none(), MissingSetting::AccountId),
                    (profile.is_none(), MissingSetting::Profile),
                    (region.is_none(), MissingSetting::Region),
                    (role_name.is_none(), MissingSetting::RoleName),
                ]
                .into_iter()
                .filter_map(|(missing, setting)| missing.then_some(setting))
                .collect();
                Err(ConfigError::Missing(missing))
            }
        }
    }
}

/// A required setting with no value.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MissingSetting {
    /// `sso_start_url`
    StartUrl,

    /// `sso_account_id`
    AccountId,

    /// The profile name.
    Profile,

    /// `sso_region`
    Region,

    /// `sso_role_name`
    RoleName,
}

impl MissingSetting {
    fn sources(self) -> &'static str {
        match self {
            Self::StartUrl => "--sso-url, AWS_SSO_URL, or ~/.aws/config",
            Self::AccountId => "--account-id, AWS_SSO_ACCOUNT_ID, or ~/.aws/config",
            Self::Profile => "--profile or AWS_PROFILE",
            Self::Region => "--region, AWS_REGION, or ~/.aws/config",
            Self::RoleName => "--role, AWS_SSO_ROLE, or ~/.aws/config",
        }
    }
}

impl fmt::Display for MissingSetting {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let name = match self {
            Self::StartUrl => "sso_start_url",
            Self::AccountId => "sso_account_id",
            Self::Profile => "profile",
            Self::Region => "sso_region",
            Self::RoleName => "sso_role_name",
        };
        write!(f, "{name} ({})", self.sources())
    }
}

/// The login configuration is incomplete.
#[derive(Debug, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    /// One or more required settings have no value.
    #[error("missing required configuration:{}", format_missing(.0))]
    Missing(Vec<MissingSetting>),
}

fn format_missing(missing: &[MissingSetting]) -> String {
    missing
        .iter()
        .map(|setting| format!("\n  - {setting}"))
        .collect()
}
