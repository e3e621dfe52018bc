//! Cleaned up AWS SSO OIDC API.
//!
//! The three calls of the device authorization grant are expressed as narrow capability traits so
//! that [`DeviceAuthFlow`](crate::DeviceAuthFlow) can be driven by something other than the SDK.

use std::{fmt, time::Duration};

use async_trait::async_trait;
use aws_config::SdkConfig;
use aws_sdk_ssooidc::{
    config::http::HttpResponse,
    error::{DisplayErrorContext, SdkError},
    operation::{
        create_token::{CreateTokenError, CreateTokenOutput},
        register_client::RegisterClientOutput,
        start_device_authorization::StartDeviceAuthorizationOutput,
    },
};
use url::Url;

use crate::AccessToken;

pub(crate) const DEVICE_CODE_GRANT_TYPE: &str = "urn:ietf:params:oauth:grant-type:device_code";
const CLIENT_TYPE: &str = "public";

/// Register a public OIDC client.
#[async_trait]
pub trait RegisterClient: Send + Sync {
    /// Register a client with the given request.
    ///
    /// # Errors
    ///
    /// Returns the service's error message if registration fails.
    async fn register_client(
        &self,
        request: RegisterClientRequest,
    ) -> Result<ClientRegistration, String>;
}

/// Start a device authorization for a registered client.
#[async_trait]
pub trait StartDeviceAuth: Send + Sync {
    /// Start device authorization against an SSO start URL.
    ///
    /// # Errors
    ///
    /// Returns the service's error message if the authorization cannot be started.
    async fn start_device_authorization(
        &self,
        request: StartDeviceAuthRequest,
    ) -> Result<DeviceAuthorization, String>;
}

/// Poll the OIDC token endpoint once.
///
/// Implementations classify the server's answer rather than returning an error, so that pacing
/// signals can be told apart from terminal failures without inspecting error types.
#[async_trait]
pub trait PollToken: Send + Sync {
    /// Attempt to exchange a device code for an access token.
    async fn create_token(&self, request: &CreateTokenRequest) -> TokenPoll;
}

/// The outcome of one token endpoint poll.
#[derive(Debug)]
pub enum TokenPoll {
    /// The user granted access.
    Token(AccessToken),

    /// The user has not finished authorizing yet (`authorization_pending`).
    Pending,

    /// The client is polling too fast (`slow_down`).
    SlowDown,

    /// The device code expired before the user granted access.
    Expired,

    /// Any other error. Not retried.
    Failed(String),
}

/// Parameters for [`RegisterClient::register_client`].
#[derive(Debug, Hash)]
pub struct RegisterClientRequest {
    /// Friendly name of the client, shown in the SSO portal.
    pub client_name: String,
}

/// A client registration. Only held for the duration of one authentication.
#[derive(Clone)]
pub struct ClientRegistration {
    /// The client ID.
    pub client_id: String,

    /// The client secret. Not printed in `Debug` output.
    pub client_secret: String,
}

impl fmt::Debug for ClientRegistration {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("ClientRegistration")
            .field("client_id", &self.client_id)
            .finish_non_exhaustive()
    }
}

/// Parameters for [`StartDeviceAuth::start_device_authorization`].
#[allow(missing_docs)]
#[derive(Debug, Clone)]
pub struct StartDeviceAuthRequest {
    pub client_id: String,
    pub client_secret: String,
    pub start_url: String,
}

/// Parameters for [`PollToken::create_token`].
#[allow(missing_docs)]
#[derive(Clone)]
pub struct CreateTokenRequest {
    pub client_id: String,
    pub client_secret: String,
    pub device_code: String,
}

impl fmt::Debug for CreateTokenRequest {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("CreateTokenRequest")
            .field("client_id", &self.client_id)
            .finish_non_exhaustive()
    }
}

/// A pending device authorization.
///
/// `verification_uri` is the "complete" URI (with the user code embedded) when the server
/// provides one, otherwise the base verification URI.
#[derive(Debug, Clone)]
pub struct DeviceAuthorization {
    /// The code the user should confirm in the browser.
    pub user_code: String,

    /// Where the user should go to grant access.
    pub verification_uri: Url,

    /// Opaque code identifying this authorization to the token endpoint.
    pub device_code: String,

    /// How long the device code stays valid. Zero if the server didn't say.
    pub expires_in: Duration,

    /// Minimum delay between token polls. Zero if the server didn't say.
    pub interval: Duration,
}

/// SSO OIDC backed by `aws-sdk-ssooidc`.
///
/// The OIDC endpoints are unauthenticated, so the client is expected to be built from a config
/// without credentials.
pub struct Client {
    inner: aws_sdk_ssooidc::Client,
}

impl Client {
    pub(crate) fn new(config: &SdkConfig) -> Self {
        Self {
            inner: aws_sdk_ssooidc::Client::new(config),
        }
    }
}

impl fmt::Debug for Client {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("Client").finish_non_exhaustive()
    }
}

#[async_trait]
impl RegisterClient for Client {
    async fn register_client(
        &self,
        request: RegisterClientRequest,
    ) -> Result<ClientRegistration, String> {
        self.inner
            .register_client()
            .client_name(request.client_name)
            .client_type(CLIENT_TYPE)
            .send()
            .await
            .map_err(|error| DisplayErrorContext(error).to_string())
            .and_then(TryInto::try_into)
    }
}

#[async_trait]
impl StartDeviceAuth for Client {
    async fn start_device_authorization(
        &self,
        request: StartDeviceAuthRequest,
    ) -> Result<DeviceAuthorization, String> {
        self.inner
            .start_device_authorization()
            .client_id(request.client_id)
            .client_secret(request.client_secret)
            .start_url(request.start_url)
            .send()
            .await
            .map_err(|error| DisplayErrorContext(error).to_string())
            .and_then(TryInto::try_into)
    }
}

#[async_trait]
impl PollToken for Client {
    async fn create_token(&self, request: &CreateTokenRequest) -> TokenPoll {
        let result = self
            .inner
            .create_token()
            .client_id(&request.client_id)
            .client_secret(&request.client_secret)
            .device_code(&request.device_code)
            .grant_type(DEVICE_CODE_GRANT_TYPE)
            .send()
            .await;
        classify_token_response(result)
    }
}

/// Sort a `CreateToken` response into a [`TokenPoll`].
fn classify_token_response(
    result: Result<CreateTokenOutput, SdkError<CreateTokenError, HttpResponse>>,
) -> TokenPoll {
    match result {
        Ok(output) => match output.access_token() {
            Some(token) => TokenPoll::Token(AccessToken::new(token)),
            None => {
                TokenPoll::Failed("invalid CreateToken response: missing access_token".to_string())
            }
        },
        Err(error) => match error.as_service_error() {
            Some(service) if service.is_authorization_pending_exception() => TokenPoll::Pending,
            Some(service) if service.is_slow_down_exception() => TokenPoll::SlowDown,
            Some(service) if service.is_expired_token_exception() => TokenPoll::Expired,
            _ => TokenPoll::Failed(DisplayErrorContext(&error).to_string()),
        },
    }
}

impl TryFrom<RegisterClientOutput> for ClientRegistration {
    type Error = String;

    fn try_from(res: RegisterClientOutput) -> Result<Self, Self::Error> {
        macro_rules! invalid_res {
            ($msg:literal) => {
                concat!("invalid RegisterClient response: ", $msg)
            };
        }

        Ok(Self {
            client_id: res.client_id.ok_or(invalid_res!("missing client_id"))?,
            client_secret: res
                .client_secret
                .ok_or(invalid_res!("missing client_secret"))?,
        })
    }
}

impl TryFrom<StartDeviceAuthorizationOutput> for DeviceAuthorization {
    type Error = String;

    fn try_from(res: StartDeviceAuthorizationOutput) -> Result<Self, Self::Error> {
        macro_rules! invalid_res {
            ($msg:literal) => {
                concat!("invalid StartDeviceAuthorization response: ", $msg)
            };
        }

        let verification_uri = res
            .verification_uri_complete
            .filter(|uri| !uri.is_empty())
            .or(res.verification_uri.filter(|uri| !uri.is_empty()))
            .ok_or(invalid_res!("missing verification_uri"))?;

        Ok(Self {
            user_code: res.user_code.ok_or(invalid_res!("missing user_code"))?,
            verification_uri: verification_uri.parse().map_err(|error| {
                format!(
                    invalid_res!("verification_uri is not a valid URL ({})"),
                    error
                )
            })?,
            device_code: res.device_code.ok_or(invalid_res!("missing device_code"))?,
            expires_in: seconds(res.expires_in),
            interval: seconds(res.interval),
        })
    }
}

// The service models these as i32; anything not positive means "not specified".
fn seconds(value: i32) -> Duration {
    Duration::from_secs(u64::try_from(value).unwrap_or(0))
}

#[cfg(test)]
mod tests {
    use super::*;

    use aws_sdk_ssooidc::{
        operation::start_device_authorization::builders::StartDeviceAuthorizationOutputBuilder,
        types::error::{
            AuthorizationPendingException, ExpiredTokenException, InvalidGrantException,
            SlowDownException,
        },
    };
    use aws_smithy_types::body::SdkBody;

    fn service_error(error: CreateTokenError) -> SdkError<CreateTokenError, HttpResponse> {
        SdkError::service_error(
            error,
            HttpResponse::new(400_u16.try_into().unwrap(), SdkBody::empty()),
        )
    }

    #[test]
    fn classifies_token_responses() {
        let token = classify_token_response(Ok(CreateTokenOutput::builder()
            .access_token("access-token")
            .build()));
        match token {
            TokenPoll::Token(token) => assert_eq!(token.as_str(), "access-token"),
            poll => panic!("unexpected poll outcome: {poll:?}"),
        }

        let pending = classify_token_response(Err(service_error(
            CreateTokenError::AuthorizationPendingException(
                AuthorizationPendingException::builder().build(),
            ),
        )));
        assert!(matches!(pending, TokenPoll::Pending));

        let slow_down = classify_token_response(Err(service_error(
            CreateTokenError::SlowDownException(SlowDownException::builder().build()),
        )));
        assert!(matches!(slow_down, TokenPoll::SlowDown));

        let expired = classify_token_response(Err(service_error(
            CreateTokenError::ExpiredTokenException(ExpiredTokenException::builder().build()),
        )));
        assert!(matches!(expired, TokenPoll::Expired));
    }

    #[test]
    fn other_token_responses_fail() {
        let invalid_grant = classify_token_response(Err(service_error(
            CreateTokenError::InvalidGrantException(InvalidGrantException::builder().build()),
        )));
        match invalid_grant {
            TokenPoll::Failed(message) => assert!(message.contains("InvalidGrantException")),
            poll => panic!("unexpected poll outcome: {poll:?}"),
        }

        let no_token = classify_token_response(Ok(CreateTokenOutput::builder().build()));
        match no_token {
            TokenPoll::Failed(message) => assert_eq!(
                message,
                "invalid CreateToken response: missing access_token"
            ),
            poll => panic!("unexpected poll outcome: {poll:?}"),
        }
    }

    fn output() -> StartDeviceAuthorizationOutputBuilder {
        StartDeviceAuthorizationOutput::builder()
            .device_code("device-code")
            .user_code("ABCD-EFGH")
            .verification_uri("https://device.sso.us-east-1.amazonaws.com/")
            .expires_in(600)
            .interval(1)
    }

    #[test]
    fn prefers_complete_verification_uri() {
        let auth = DeviceAuthorization::try_from(
            output()
                .verification_uri_complete(
                    "https://device.sso.us-east-1.amazonaws.com/?user_code=ABCD-EFGH",
                )
                .build(),
        )
        .unwrap();

        assert_eq!(
            auth.verification_uri.as_str(),
            "https://device.sso.us-east-1.amazonaws.com/?user_code=ABCD-EFGH"
        );
        assert_eq!(auth.expires_in, Duration::from_secs(600));
        assert_eq!(auth.interval, Duration::from_secs(1));
    }

    #[test]
    fn falls_back_to_base_verification_uri() {
        let auth = DeviceAuthorization::try_from(output().build()).unwrap();
        assert_eq!(
            auth.verification_uri.as_str(),
            "https://device.sso.us-east-1.amazonaws.com/"
        );
        assert_eq!(auth.user_code, "ABCD-EFGH");
        assert_eq!(auth.device_code, "device-code");
    }

    #[test]
    fn unspecified_timings_are_zero() {
        let auth =
            DeviceAuthorization::try_from(output().expires_in(0).interval(-1).build()).unwrap();
        assert_eq!(auth.expires_in, Duration::ZERO);
        assert_eq!(auth.interval, Duration::ZERO);
    }

    #[test]
    fn rejects_missing_fields() {
        let error = DeviceAuthorization::try_from(
            StartDeviceAuthorizationOutput::builder()
                .user_code("ABCD-EFGH")
                .verification_uri("https://device.sso.us-east-1.amazonaws.com/")
                .build(),
        )
        .unwrap_err();
        assert_eq!(
            error,
            "invalid StartDeviceAuthorization response: missing device_code"
        );

        let error = DeviceAuthorization::try_from(
            StartDeviceAuthorizationOutput::builder()
                .device_code("device-code")
                .user_code("ABCD-EFGH")
                .build(),
        )
        .unwrap_err();
        assert_eq!(
            error,
            "invalid StartDeviceAuthorization response: missing verification_uri"
        );
    }

    #[test]
    fn rejects_invalid_verification_uri() {
        let error = DeviceAuthorization::try_from(output().verification_uri("not a url").build())
            .unwrap_err();
        assert!(error.starts_with(
            "invalid StartDeviceAuthorization response: verification_uri is not a valid URL"
        ));
    }

    #[test]
    fn registration_requires_secret() {
        let error = ClientRegistration::try_from(
            RegisterClientOutput::builder().client_id("client").build(),
        )
        .unwrap_err();
        assert_eq!(error, "invalid RegisterClient response: missing client_secret");
    }
}
