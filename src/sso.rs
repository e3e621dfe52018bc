//! Cleaned up AWS SSO API.

use std::fmt;

use async_trait::async_trait;
use aws_config::SdkConfig;
use aws_sdk_sso::{
    error::DisplayErrorContext, operation::get_role_credentials::GetRoleCredentialsOutput,
};
use chrono::{DateTime, Utc};
use tokio_util::sync::CancellationToken;

use crate::{
    flow::cancellable,
    sts::{CallerIdentity, GetCallerIdentity},
    AccessToken, SessionCredentials, SsoApiError, SsoFlowError,
};

/// Exchange an SSO access token for role credentials.
#[async_trait]
pub trait GetRoleCredentials: Send + Sync {
    /// Fetch temporary credentials for one account and role.
    ///
    /// # Errors
    ///
    /// Returns the service's error message, e.g. for an invalid token or unknown role.
    async fn get_role_credentials(
        &self,
        request: GetRoleCredentialsRequest,
    ) -> Result<SessionCredentials, String>;
}

/// Parameters for [`GetRoleCredentials::get_role_credentials`].
#[derive(Debug)]
pub struct GetRoleCredentialsRequest {
    /// Bearer token from the device authorization flow.
    pub access_token: AccessToken,

    /// Account to get credentials for.
    pub account_id: String,

    /// Role to assume in that account.
    pub role_name: String,
}

/// Turns an access token into validated temporary IAM credentials.
///
/// Nothing here is retried: a bad token, denied access or an unknown account or role won't get
/// better by asking again.
#[derive(Debug)]
pub struct RoleCredentialExchange<'a, C> {
    client: &'a C,
}

impl<'a, C> RoleCredentialExchange<'a, C> {
    /// Construct an exchange that talks to `client`.
    pub fn new(client: &'a C) -> Self {
        Self { client }
    }
}

impl<'a, C> RoleCredentialExchange<'a, C>
where
    C: GetRoleCredentials,
{
    /// Get credentials for `role_name` in `account_id`.
    ///
    /// # Errors
    ///
    /// [`SsoFlowError::Api`] if the exchange fails, [`SsoFlowError::Cancelled`] if `cancel` fires.
    pub async fn get_role_credentials(
        &self,
        access_token: &AccessToken,
        account_id: &str,
        role_name: &str,
        cancel: &CancellationToken,
    ) -> Result<SessionCredentials, SsoFlowError> {
        let request = GetRoleCredentialsRequest {
            access_token: access_token.clone(),
            account_id: account_id.to_string(),
            role_name: role_name.to_string(),
        };
        cancellable(cancel, self.client.get_role_credentials(request))
            .await?
            .map_err(|error| SsoApiError::new("get role credentials", error).into())
    }
}

impl<'a, C> RoleCredentialExchange<'a, C>
where
    C: GetCallerIdentity,
{
    /// Check that `credentials` are usable by asking who they belong to.
    ///
    /// # Errors
    ///
    /// [`SsoFlowError::Api`] if the identity check rejects the credentials,
    /// [`SsoFlowError::Cancelled`] if `cancel` fires.
    pub async fn validate_credentials(
        &self,
        credentials: &SessionCredentials,
        cancel: &CancellationToken,
    ) -> Result<CallerIdentity, SsoFlowError> {
        cancellable(cancel, self.client.get_caller_identity(credentials))
            .await?
            .map_err(|error| SsoApiError::new("get caller identity", error).into())
    }
}

/// AWS SSO backed by `aws-sdk-sso`.
pub struct Client {
    inner: aws_sdk_sso::Client,
}

impl Client {
    pub(crate) fn new(config: &SdkConfig) -> Self {
        Self {
            inner: aws_sdk_sso::Client::new(config),
        }
    }
}

impl fmt::Debug for Client {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("Client").finish_non_exhaustive()
    }
}

#[async_trait]
impl GetRoleCredentials for Client {
    async fn get_role_credentials(
        &self,
        request: GetRoleCredentialsRequest,
    ) -> Result<SessionCredentials, String> {
        self.inner
            .get_role_credentials()
            .access_token(request.access_token.as_str())
            .account_id(request.account_id)
            .role_name(request.role_name)
            .send()
            .await
            .map_err(|error| DisplayErrorContext(error).to_string())
            .and_then(TryInto::try_into)
    }
}

impl TryFrom<GetRoleCredentialsOutput> for SessionCredentials {
    type Error = String;

    fn try_from(res: GetRoleCredentialsOutput) -> Result<Self, Self::Error> {
        macro_rules! invalid_res {
            ($msg:literal) => {
                concat!("invalid GetRoleCredentials response: ", $msg)
            };
        }

        let credentials = res
            .role_credentials
            .ok_or(invalid_res!("missing role_credentials"))?;
        Ok(Self {
            access_key_id: credentials
                .access_key_id
                .ok_or(invalid_res!("missing access_key_id"))?,
            secret_access_key: credentials
                .secret_access_key
                .ok_or(invalid_res!("missing secret_access_key"))?,
            session_token: credentials
                .session_token
                .ok_or(invalid_res!("missing session_token"))?,
            expires_at: DateTime::<Utc>::from_timestamp_millis(credentials.expiration)
                .ok_or(invalid_res!("expiration out of range"))?,
        })
    }
}
