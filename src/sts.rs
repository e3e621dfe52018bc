//! Identity check with AWS STS.

use std::fmt;

use async_trait::async_trait;
use aws_config::BehaviorVersion;
use aws_sdk_sts::error::DisplayErrorContext;

use crate::{Region, SessionCredentials};

/// Ask who a set of credentials belongs to.
#[async_trait]
pub trait GetCallerIdentity: Send + Sync {
    /// Call `GetCallerIdentity`, signed with `credentials`.
    ///
    /// # Errors
    ///
    /// Returns the service's error message if the credentials are rejected.
    async fn get_caller_identity(
        &self,
        credentials: &SessionCredentials,
    ) -> Result<CallerIdentity, String>;
}

/// The identity behind a set of credentials.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CallerIdentity {
    /// The account the credentials belong to.
    pub account: String,

    /// The ARN of the assumed role session.
    pub arn: String,

    /// The unique identifier of the calling entity.
    pub user_id: String,
}

/// STS backed by `aws-sdk-sts`.
///
/// Unlike the other clients this one signs requests, so a new SDK client is built for every set of
/// credentials.
pub struct Client {
    region: Region,
}

impl Client {
    pub(crate) fn new(region: Region) -> Self {
        Self { region }
    }
}

impl fmt::Debug for Client {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("Client")
            .field("region", &self.region)
            .finish()
    }
}

#[async_trait]
impl GetCallerIdentity for Client {
    async fn get_caller_identity(
        &self,
        credentials: &SessionCredentials,
    ) -> Result<CallerIdentity, String> {
        let sdk_config = aws_config::defaults(BehaviorVersion::latest())
            .region(self.region.0.clone())
            .credentials_provider(aws_credential_types::Credentials::from(
                credentials.clone(),
            ))
            .load()
            .await;

        let output = aws_sdk_sts::Client::new(&sdk_config)
            .get_caller_identity()
            .send()
            .await
            .map_err(|error| DisplayErrorContext(error).to_string())?;

        Ok(CallerIdentity {
            account: output.account.unwrap_or_default(),
            arn: output.arn.unwrap_or_default(),
            user_id: output.user_id.unwrap_or_default(),
        })
    }
}
