use std::{fmt, future::Future};

use async_trait::async_trait;
use aws_config::{BehaviorVersion, SdkConfig};
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::{
    sso::{self, GetRoleCredentials, GetRoleCredentialsRequest, RoleCredentialExchange},
    sso_oidc::{
        self, ClientRegistration, CreateTokenRequest, DeviceAuthorization, PollToken,
        RegisterClient, RegisterClientRequest, StartDeviceAuth, StartDeviceAuthRequest, TokenPoll,
    },
    sts::{self, CallerIdentity, GetCallerIdentity},
    CredentialsStore, DeviceAuthFlow, LoginConfig, Region, SessionCredentials, SsoError,
    StoreError,
};

/// Everything the flow needs from AWS.
///
/// This is implemented for anything that provides all five capabilities, in particular
/// [`AwsClients`].
pub trait SsoApi:
    RegisterClient + StartDeviceAuth + PollToken + GetRoleCredentials + GetCallerIdentity
{
}

impl<T> SsoApi for T where
    T: RegisterClient + StartDeviceAuth + PollToken + GetRoleCredentials + GetCallerIdentity
{
}

/// A configured SSO login: authenticate, exchange for role credentials, optionally validate, and
/// store them.
#[allow(clippy::module_name_repetitions)]
pub struct SsoFlow<C, V, P = ()> {
    api: C,
    config: LoginConfig,
    verification_prompt: V,
    progress: P,
}

impl<V> SsoFlow<AwsClients, V>
where
    V: VerificationPrompt,
{
    /// Construct a flow backed by the AWS SDK, in the configured region.
    pub async fn connect(config: LoginConfig, verification_prompt: V) -> Self {
        let api = AwsClients::new(config.region.clone()).await;
        Self::new(api, config, verification_prompt)
    }
}

impl<C, V> SsoFlow<C, V>
where
    C: SsoApi,
    V: VerificationPrompt,
{
    /// Construct a flow using the given API implementation.
    pub fn new(api: C, config: LoginConfig, verification_prompt: V) -> Self {
        Self {
            api,
            config,
            verification_prompt,
            progress: (),
        }
    }
}

impl<C, V, P> SsoFlow<C, V, P>
where
    C: SsoApi,
    V: VerificationPrompt,
    P: Progress,
{
    /// Report progress of the flow to `progress`.
    #[must_use]
    pub fn with_progress<NewP: Progress>(self, progress: NewP) -> SsoFlow<C, V, NewP> {
        SsoFlow {
            api: self.api,
            config: self.config,
            verification_prompt: self.verification_prompt,
            progress,
        }
    }

    /// The resolved configuration this flow runs with.
    pub fn config(&self) -> &LoginConfig {
        &self.config
    }

    /// Perform the login and write the credentials to `store`.
    ///
    /// When validation is enabled the credentials are checked before they are written, and read
    /// back from the store and checked again afterwards.
    ///
    /// # Errors
    ///
    /// Any failure ends the flow. [`SsoError::Flow`] means no credentials could be obtained,
    /// [`SsoError::Validation`] means credentials were obtained but are unusable. Nothing is
    /// written to `store` unless credentials were obtained (and validated, if enabled).
    pub async fn run<S>(
        &self,
        store: &S,
        cancel: &CancellationToken,
    ) -> Result<LoginOutcome, SsoError>
    where
        S: CredentialsStore + ?Sized,
    {
        let token = DeviceAuthFlow::new(&self.api)
            .authenticate(&self.config.start_url, &self.verification_prompt, cancel)
            .await?;
        self.progress.authenticated();

        let exchange = RoleCredentialExchange::new(&self.api);
        let credentials = exchange
            .get_role_credentials(
                &token,
                &self.config.account_id,
                &self.config.role_name,
                cancel,
            )
            .await?;
        info!(
            account_id = %self.config.account_id,
            role_name = %self.config.role_name,
            expires_at = %credentials.expires_at,
            "obtained role credentials"
        );

        let mut identity = None;
        if self.config.validate {
            identity = Some(
                self.validate(&exchange, &credentials, ValidationStage::Fresh, cancel)
                    .await?,
            );
        }

        store.write(&self.config.profile, &credentials).await?;
        self.progress
            .credentials_written(&self.config.profile, &store.location());

        if self.config.validate {
            let saved = store
                .read(&self.config.profile)
                .await
                .map_err(ValidationError::ReadBack)?;
            identity = Some(
                self.validate(&exchange, &saved, ValidationStage::Saved, cancel)
                    .await?,
            );
        }

        Ok(LoginOutcome {
            credentials,
            identity,
        })
    }

    async fn validate(
        &self,
        exchange: &RoleCredentialExchange<'_, C>,
        credentials: &SessionCredentials,
        stage: ValidationStage,
        cancel: &CancellationToken,
    ) -> Result<CallerIdentity, SsoError> {
        self.progress.validating(stage);
        let identity = exchange
            .validate_credentials(credentials, cancel)
            .await
            .map_err(|error| match error {
                SsoFlowError::Api(source) => {
                    SsoError::from(ValidationError::Rejected { stage, source })
                }
                error => SsoError::from(error),
            })?;
        self.progress.validated(stage, &identity);
        Ok(identity)
    }
}

impl<C, V, P> fmt::Debug for SsoFlow<C, V, P>
where
    C: fmt::Debug,
{
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("SsoFlow")
            .field("api", &self.api)
            .field("config", &self.config)
            .field("verification_prompt", &"_")
            .field("progress", &"_")
            .finish()
    }
}

/// The result of a successful login.
#[derive(Debug)]
pub struct LoginOutcome {
    /// The credentials that were written.
    pub credentials: SessionCredentials,

    /// The identity the credentials belong to, if validation was enabled.
    pub identity: Option<CallerIdentity>,
}

/// An SSO verification prompt.
///
/// The AWS SSO authentication flow requires users to explicitly grant access by visiting a URL and
/// confirming a code. There are many ways this could be presented depending on the context, so
/// verification prompts are modelled with this trait.
///
/// The trait is implemented for functions taking a `&DeviceAuthorization`, so a trivial prompt
/// could look like:
///
/// ```
/// use aws_sso_login::{DeviceAuthorization, VerificationPrompt};
///
/// fn prompt() -> impl VerificationPrompt {
///     |authorization: &DeviceAuthorization| {
///         println!(
///             "Go to {} and enter {}",
///             authorization.verification_uri, authorization.user_code
///         );
///     }
/// }
/// ```
///
/// Prompting can't fail. Anything that goes wrong while presenting the prompt (such as not being
/// able to launch a browser) should fall back to telling the user what to do.
pub trait VerificationPrompt: Send + Sync {
    /// Ask the user to grant access.
    fn prompt(&self, authorization: &DeviceAuthorization);
}

impl<F> VerificationPrompt for F
where
    F: Fn(&DeviceAuthorization) + Send + Sync,
{
    fn prompt(&self, authorization: &DeviceAuthorization) {
        self(authorization);
    }
}

/// Receives progress notifications from [`SsoFlow::run`].
///
/// All methods default to doing nothing.
pub trait Progress: Send + Sync {
    /// The device authorization grant produced an access token.
    fn authenticated(&self) {}

    /// Validation of credentials is starting.
    fn validating(&self, _stage: ValidationStage) {}

    /// Credentials were successfully validated.
    fn validated(&self, _stage: ValidationStage, _identity: &CallerIdentity) {}

    /// Credentials for `profile` were written to `location`.
    fn credentials_written(&self, _profile: &str, _location: &str) {}
}

impl Progress for () {}

/// Which credentials are being validated.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ValidationStage {
    /// The credentials as returned by SSO, before they are stored.
    Fresh,

    /// The credentials as read back from the store.
    Saved,
}

impl fmt::Display for ValidationStage {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Self::Fresh => write!(f, "credentials"),
            Self::Saved => write!(f, "saved credentials"),
        }
    }
}

/// The AWS SDK clients for one region.
pub struct AwsClients {
    region: Region,
    sso_oidc: sso_oidc::Client,
    sso: sso::Client,
}

impl AwsClients {
    /// Construct anonymous clients for `region`.
    pub async fn new(region: Region) -> Self {
        let sdk_config = Self::sdk_config(&region).await;
        Self {
            sso_oidc: sso_oidc::Client::new(&sdk_config),
            sso: sso::Client::new(&sdk_config),
            region,
        }
    }

    // The OIDC endpoints are unauthenticated and GetRoleCredentials carries a bearer token, so
    // the SDK must not go looking for credentials to sign with.
    async fn sdk_config(region: &Region) -> SdkConfig {
        aws_config::defaults(BehaviorVersion::latest())
            .region(region.0.clone())
            .no_credentials()
            .load()
            .await
    }
}

impl fmt::Debug for AwsClients {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("AwsClients")
            .field("region", &self.region)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl RegisterClient for AwsClients {
    async fn register_client(
        &self,
        request: RegisterClientRequest,
    ) -> Result<ClientRegistration, String> {
        self.sso_oidc.register_client(request).await
    }
}

#[async_trait]
impl StartDeviceAuth for AwsClients {
    async fn start_device_authorization(
        &self,
        request: StartDeviceAuthRequest,
    ) -> Result<DeviceAuthorization, String> {
        self.sso_oidc.start_device_authorization(request).await
    }
}

#[async_trait]
impl PollToken for AwsClients {
    async fn create_token(&self, request: &CreateTokenRequest) -> TokenPoll {
        self.sso_oidc.create_token(request).await
    }
}

#[async_trait]
impl GetRoleCredentials for AwsClients {
    async fn get_role_credentials(
        &self,
        request: GetRoleCredentialsRequest,
    ) -> Result<SessionCredentials, String> {
        self.sso.get_role_credentials(request).await
    }
}

#[async_trait]
impl GetCallerIdentity for AwsClients {
    async fn get_caller_identity(
        &self,
        credentials: &SessionCredentials,
    ) -> Result<CallerIdentity, String> {
        sts::Client::new(self.region.clone())
            .get_caller_identity(credentials)
            .await
    }
}

/// Await `future` unless `cancel` fires first.
pub(crate) async fn cancellable<F: Future>(
    cancel: &CancellationToken,
    future: F,
) -> Result<F::Output, SsoFlowError> {
    tokio::select! {
        biased;
        () = cancel.cancelled() => Err(SsoFlowError::Cancelled),
        output = future => Ok(output),
    }
}

/// An error that occurred while obtaining credentials.
#[derive(Debug, thiserror::Error)]
pub enum SsoFlowError {
    /// Indicates that an AWS API call returned an error.
    ///
    /// This could be due to invalid configuration caught by the server, or a network issue. The
    /// error message should be sufficient to aid end-user debugging.
    #[error("could not obtain credentials: {0}")]
    Api(#[from] SsoApiError),

    /// The user didn't grant access before the device code expired.
    #[error(
        "could not obtain credentials: timed out waiting for SSO authorization \
         (the device code expired)"
    )]
    AuthorizationTimeout,

    /// The flow was cancelled, typically because the overall deadline passed.
    #[error("operation cancelled: the overall timeout was exceeded or the login was interrupted")]
    Cancelled,
}

/// An API error that occurred during authentication.
///
/// This could be due to invalid configuration caught by the server, or a network issue. The error
/// message should be sufficient to aid end-user debugging.
#[derive(Debug, thiserror::Error)]
#[error("failed to {operation}: {message}")]
pub struct SsoApiError {
    operation: &'static str,
    message: String,
}

impl SsoApiError {
    pub(crate) fn new(operation: &'static str, message: impl Into<String>) -> Self {
        Self {
            operation,
            message: message.into(),
        }
    }

    /// The step that failed, e.g. `"create token"`.
    #[must_use]
    pub fn operation(&self) -> &'static str {
        self.operation
    }
}

/// Credentials were obtained, but turned out to be unusable.
#[derive(Debug, thiserror::Error)]
pub enum ValidationError {
    /// The identity check rejected the credentials.
    #[error("credentials were obtained but are invalid: {stage} failed validation: {source}")]
    Rejected {
        /// Which credentials were being checked.
        stage: ValidationStage,

        /// The identity check's error.
        source: SsoApiError,
    },

    /// The credentials couldn't be read back after writing them.
    #[error("credentials were obtained but could not be read back for validation: {0}")]
    ReadBack(#[source] StoreError),
}
