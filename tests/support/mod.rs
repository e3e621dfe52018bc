use std::{
    collections::VecDeque,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc, Mutex,
    },
    time::Duration,
};

use async_trait::async_trait;
use aws_sso_login::{
    AccessToken, CallerIdentity, ClientRegistration, CreateTokenRequest, DeviceAuthorization,
    GetCallerIdentity, GetRoleCredentials, GetRoleCredentialsRequest, LoginConfig, PollToken,
    Region, RegisterClient, RegisterClientRequest, SessionCredentials, StartDeviceAuth,
    StartDeviceAuthRequest, TokenPoll,
};
use chrono::{DateTime, Utc};

pub const START_URL: &str = "https://x.awsapps.com/start";
pub const ACCESS_TOKEN: &str = "access-token";
pub const ROLE_ARN: &str = "arn:aws:sts::111122223333:assumed-role/Admin/user@example.com";

pub fn config(validate: bool) -> LoginConfig {
    LoginConfig {
        start_url: START_URL.to_string(),
        account_id: "111122223333".to_string(),
        profile: "work".to_string(),
        region: Region::new("us-east-1"),
        role_name: "Admin".to_string(),
        validate,
    }
}

pub fn role_credentials() -> SessionCredentials {
    SessionCredentials {
        access_key_id: "AKIAEXAMPLE".to_string(),
        secret_access_key: "secret".to_string(),
        session_token: "session-token".to_string(),
        expires_at: DateTime::<Utc>::from_timestamp_millis(1_700_000_000_000).unwrap(),
    }
}

/// A scripted stand-in for SSO OIDC, SSO and STS.
#[derive(Default)]
pub struct FakeAws {
    script: Mutex<VecDeque<TokenPoll>>,
    identity_error: Option<String>,
    pub polls: Arc<AtomicUsize>,
    pub validated: Arc<Mutex<Vec<SessionCredentials>>>,
}

impl FakeAws {
    pub fn new(script: Vec<TokenPoll>) -> Self {
        Self {
            script: Mutex::new(script.into()),
            ..Self::default()
        }
    }

    pub fn rejecting_identity(self, error: &str) -> Self {
        Self {
            identity_error: Some(error.to_string()),
            ..self
        }
    }
}

#[async_trait]
impl RegisterClient for FakeAws {
    async fn register_client(
        &self,
        _request: RegisterClientRequest,
    ) -> Result<ClientRegistration, String> {
        Ok(ClientRegistration {
            client_id: "client-id".to_string(),
            client_secret: "client-secret".to_string(),
        })
    }
}

#[async_trait]
impl StartDeviceAuth for FakeAws {
    async fn start_device_authorization(
        &self,
        request: StartDeviceAuthRequest,
    ) -> Result<DeviceAuthorization, String> {
        assert_eq!(request.start_url, START_URL);
        Ok(DeviceAuthorization {
            user_code: "ABCD-EFGH".to_string(),
            verification_uri: "https://device.sso.us-east-1.amazonaws.com/?user_code=ABCD-EFGH"
                .parse()
                .unwrap(),
            device_code: "device-code".to_string(),
            expires_in: Duration::from_secs(600),
            interval: Duration::from_secs(1),
        })
    }
}

#[async_trait]
impl PollToken for FakeAws {
    async fn create_token(&self, request: &CreateTokenRequest) -> TokenPoll {
        assert_eq!(request.device_code, "device-code");
        self.polls.fetch_add(1, Ordering::SeqCst);
        self.script
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(TokenPoll::Pending)
    }
}

#[async_trait]
impl GetRoleCredentials for FakeAws {
    async fn get_role_credentials(
        &self,
        request: GetRoleCredentialsRequest,
    ) -> Result<SessionCredentials, String> {
        assert_eq!(request.access_token, AccessToken::new(ACCESS_TOKEN));
        assert_eq!(request.account_id, "111122223333");
        assert_eq!(request.role_name, "Admin");
        Ok(role_credentials())
    }
}

#[async_trait]
impl GetCallerIdentity for FakeAws {
    async fn get_caller_identity(
        &self,
        credentials: &SessionCredentials,
    ) -> Result<CallerIdentity, String> {
        self.validated.lock().unwrap().push(credentials.clone());
        match &self.identity_error {
            Some(error) => Err(error.clone()),
            None => Ok(CallerIdentity {
                account: "111122223333".to_string(),
                arn: ROLE_ARN.to_string(),
                user_id: "AROAEXAMPLE:user@example.com".to_string(),
            }),
        }
    }
}
