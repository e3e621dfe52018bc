#![cfg_attr(docsrs, feature(doc_cfg))]
#![warn(missing_docs, clippy::pedantic)]

//! AWS SSO login for the command line.
//!
//! Signs in through the OAuth2 device authorization grant, exchanges the resulting access token
//! for temporary role credentials, optionally checks them with STS, and stores them in the AWS
//! shared credentials file.
//!
//! [`SsoFlow`] is the main entrypoint to the crate:
//!
//! ```no_run
//! # #[tokio::main] async fn main() -> Result<(), Box<dyn std::error::Error>> {
//! use aws_sso_login::{
//!     CredentialsFile, DeviceAuthorization, LoginConfig, ProfileSettings, Settings, SsoFlow,
//! };
//! use tokio_util::sync::CancellationToken;
//!
//! let settings = Settings {
//!     start_url: Some("https://my-org.awsapps.com/start".into()),
//!     account_id: Some("111122223333".into()),
//!     profile: Some("work".into()),
//!     region: Some("us-east-1".into()),
//!     role_name: Some("Admin".into()),
//!     validate: false,
//! };
//! let config = LoginConfig::resolve(settings, ProfileSettings::default())?;
//!
//! let flow = SsoFlow::connect(config, |authorization: &DeviceAuthorization| {
//!     println!(
//!         "Go to {} and confirm the code {}",
//!         authorization.verification_uri, authorization.user_code
//!     );
//! })
//! .await;
//! let outcome = flow
//!     .run(&CredentialsFile::from_env()?, &CancellationToken::new())
//!     .await?;
//! println!("credentials expire at {}", outcome.credentials.expires_at);
//! # Ok(()) }
//! ```

pub mod cli;
mod config;
mod credentials;
mod device_auth;
mod flow;
mod output;
mod profile;
mod region;
mod sso;
mod sso_oidc;
mod store;
mod sts;

pub use crate::{
    config::{ConfigError, LoginConfig, MissingSetting, Settings},
    credentials::{AccessToken, SessionCredentials},
    device_auth::{DeviceAuthFlow, DEFAULT_EXPIRES_IN, DEFAULT_INTERVAL, SLOW_DOWN_INCREMENT},
    flow::{
        AwsClients, LoginOutcome, Progress, SsoApi, SsoApiError, SsoFlow, SsoFlowError,
        ValidationError, ValidationStage, VerificationPrompt,
    },
    output::{Browser, SystemBrowser, TerminalPrompt},
    profile::{ProfileSettings, ProfileSource},
    region::Region,
    sso::{GetRoleCredentials, GetRoleCredentialsRequest, RoleCredentialExchange},
    sso_oidc::{
        ClientRegistration, CreateTokenRequest, DeviceAuthorization, PollToken, RegisterClient,
        RegisterClientRequest, StartDeviceAuth, StartDeviceAuthRequest, TokenPoll,
    },
    store::{CredentialsFile, CredentialsStore, StoreError},
    sts::{CallerIdentity, GetCallerIdentity},
};

const _: () = assert!(
    const_str::equal!(env!("CARGO_PKG_VERSION_MAJOR"), "0"),
    "client naming scheme needs updated for 1.0"
);
const CLIENT_NAME: &str = concat!(
    env!("CARGO_PKG_NAME"),
    "@",
    "0.",
    env!("CARGO_PKG_VERSION_MINOR")
);

/// An error that ends a login.
#[derive(Debug, thiserror::Error)]
pub enum SsoError {
    /// Required configuration was missing.
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// No credentials could be obtained.
    #[error(transparent)]
    Flow(#[from] SsoFlowError),

    /// The credentials file couldn't be located or updated.
    #[error(transparent)]
    Store(#[from] StoreError),

    /// Credentials were obtained but are unusable.
    #[error(transparent)]
    Validation(#[from] ValidationError),
}
