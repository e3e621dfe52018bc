//! The OIDC device authorization grant.

use std::time::Duration;

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::{
    flow::cancellable,
    sso_oidc::{
        ClientRegistration, CreateTokenRequest, DeviceAuthorization, PollToken, RegisterClient,
        RegisterClientRequest, StartDeviceAuth, StartDeviceAuthRequest, TokenPoll,
    },
    AccessToken, SsoApiError, SsoFlowError, VerificationPrompt, CLIENT_NAME,
};

/// Polling interval used when the server doesn't specify one.
pub const DEFAULT_INTERVAL: Duration = Duration::from_secs(5);

/// How long to keep polling when the server doesn't say when the device code expires.
pub const DEFAULT_EXPIRES_IN: Duration = Duration::from_secs(5 * 60);

/// How much a `slow_down` response adds to the polling interval.
pub const SLOW_DOWN_INCREMENT: Duration = Duration::from_secs(5);

/// Obtains an SSO access token via the OAuth2 device authorization grant.
///
/// The flow registers a public client, starts a device authorization for the SSO start URL,
/// hands the verification URL and user code to a [`VerificationPrompt`], and then polls the token
/// endpoint until the user grants access, the device code expires, or the flow is cancelled.
///
/// The region is whatever the underlying client was built for.
#[derive(Debug)]
pub struct DeviceAuthFlow<'a, C> {
    client: &'a C,
}

impl<'a, C> DeviceAuthFlow<'a, C>
where
    C: RegisterClient + StartDeviceAuth + PollToken,
{
    /// Construct a flow that talks to `client`.
    pub fn new(client: &'a C) -> Self {
        Self { client }
    }

    /// Run the whole flow and return the access token.
    ///
    /// # Errors
    ///
    /// Registration and authorization failures are returned immediately with the failed step in
    /// [`SsoApiError`]. If the device code expires first, [`SsoFlowError::AuthorizationTimeout`] is
    /// returned. If `cancel` fires at any point, [`SsoFlowError::Cancelled`] is returned.
    pub async fn authenticate<V>(
        &self,
        start_url: &str,
        prompt: &V,
        cancel: &CancellationToken,
    ) -> Result<AccessToken, SsoFlowError>
    where
        V: VerificationPrompt + ?Sized,
    {
        let registration = cancellable(
            cancel,
            self.client.register_client(RegisterClientRequest {
                client_name: CLIENT_NAME.to_string(),
            }),
        )
        .await?
        .map_err(|error| SsoApiError::new("register client", error))?;
        debug!(client_id = %registration.client_id, "registered OIDC client");

        let authorization = cancellable(
            cancel,
            self.client.start_device_authorization(StartDeviceAuthRequest {
                client_id: registration.client_id.clone(),
                client_secret: registration.client_secret.clone(),
                start_url: start_url.to_string(),
            }),
        )
        .await?
        .map_err(|error| SsoApiError::new("start device authorization", error))?;
        info!(
            verification_uri = %authorization.verification_uri,
            expires_in = ?authorization.expires_in,
            "started device authorization"
        );

        prompt.prompt(&authorization);

        self.poll_for_token(&registration, &authorization, cancel)
            .await
    }

    /// Poll the token endpoint until the user has granted access.
    ///
    /// # Errors
    ///
    /// See [`authenticate`](Self::authenticate).
    pub async fn poll_for_token(
        &self,
        registration: &ClientRegistration,
        authorization: &DeviceAuthorization,
        cancel: &CancellationToken,
    ) -> Result<AccessToken, SsoFlowError> {
        let request = CreateTokenRequest {
            client_id: registration.client_id.clone(),
            client_secret: registration.client_secret.clone(),
            device_code: authorization.device_code.clone(),
        };
        let mut state = PollState::new(authorization, Instant::now());

        while !state.is_expired(Instant::now()) {
            match cancellable(cancel, self.client.create_token(&request)).await? {
                TokenPoll::Token(token) => {
                    info!("device authorization granted");
                    return Ok(token);
                }
                TokenPoll::Pending => {
                    debug!(interval = ?state.interval(), "authorization pending");
                }
                TokenPoll::SlowDown => {
                    state.slow_down();
                    debug!(interval = ?state.interval(), "token endpoint asked to slow down");
                }
                TokenPoll::Expired => return Err(SsoFlowError::AuthorizationTimeout),
                TokenPoll::Failed(error) => {
                    return Err(SsoApiError::new("create token", error).into());
                }
            }

            cancellable(
                cancel,
                tokio::time::sleep_until(state.next_poll(Instant::now())),
            )
            .await?;
        }

        Err(SsoFlowError::AuthorizationTimeout)
    }
}

/// Pacing state for the token polling loop.
///
/// The interval only ever grows, and the deadline is fixed when polling starts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct PollState {
    deadline: Instant,
    interval: Duration,
}

impl PollState {
    pub(crate) fn new(authorization: &DeviceAuthorization, now: Instant) -> Self {
        let interval = non_zero_or(authorization.interval, DEFAULT_INTERVAL);
        let expires_in = non_zero_or(authorization.expires_in, DEFAULT_EXPIRES_IN);
        Self {
            deadline: now + expires_in,
            interval,
        }
    }

    pub(crate) fn interval(&self) -> Duration {
        self.interval
    }

    pub(crate) fn is_expired(&self, now: Instant) -> bool {
        now >= self.deadline
    }

    pub(crate) fn slow_down(&mut self) {
        self.interval += SLOW_DOWN_INCREMENT;
    }

    /// When to poll next. Never later than the deadline.
    pub(crate) fn next_poll(&self, now: Instant) -> Instant {
        (now + self.interval).min(self.deadline)
    }
}

fn non_zero_or(value: Duration, default: Duration) -> Duration {
    if value.is_zero() {
        default
    } else {
        value
    }
}

#[cfg(test)]
mod tests {
    use std::{
        collections::VecDeque,
        sync::{
            atomic::{AtomicUsize, Ordering},
            Mutex,
        },
    };

    use async_trait::async_trait;

    use super::*;

    /// A fake OIDC service that answers token polls from a script and records when each poll
    /// happened on the (paused) tokio clock.
    #[derive(Default)]
    struct FakeOidc {
        register_error: Option<String>,
        script: Mutex<VecDeque<TokenPoll>>,
        polls: Mutex<Vec<Instant>>,
        starts: AtomicUsize,
        authorization_interval: u64,
        authorization_expires_in: u64,
    }

    impl FakeOidc {
        fn new(interval: u64, expires_in: u64, script: Vec<TokenPoll>) -> Self {
            Self {
                script: Mutex::new(script.into()),
                authorization_interval: interval,
                authorization_expires_in: expires_in,
                ..Self::default()
            }
        }

        fn authorization(&self) -> DeviceAuthorization {
            DeviceAuthorization {
                user_code: "ABCD-EFGH".to_string(),
                verification_uri: "https://device.sso.us-east-1.amazonaws.com/?user_code=ABCD-EFGH"
                    .parse()
                    .unwrap(),
                device_code: "device-code".to_string(),
                expires_in: Duration::from_secs(self.authorization_expires_in),
                interval: Duration::from_secs(self.authorization_interval),
            }
        }

        fn poll_offsets(&self, start: Instant) -> Vec<u64> {
            self.polls
                .lock()
                .unwrap()
                .iter()
                .map(|at| (*at - start).as_secs())
                .collect()
        }
    }

    #[async_trait]
    impl RegisterClient for FakeOidc {
        async fn register_client(
            &self,
            request: RegisterClientRequest,
        ) -> Result<ClientRegistration, String> {
            assert_eq!(request.client_name, CLIENT_NAME);
            match &self.register_error {
                Some(error) => Err(error.clone()),
                None => Ok(ClientRegistration {
                    client_id: "client-id".to_string(),
                    client_secret: "client-secret".to_string(),
                }),
            }
        }
    }

    #[async_trait]
    impl StartDeviceAuth for FakeOidc {
        async fn start_device_authorization(
            &self,
            request: StartDeviceAuthRequest,
        ) -> Result<DeviceAuthorization, String> {
            assert_eq!(request.client_id, "client-id");
            assert_eq!(request.start_url, "https://x.awsapps.com/start");
            self.starts.fetch_add(1, Ordering::SeqCst);
            Ok(self.authorization())
        }
    }

    #[async_trait]
    impl PollToken for FakeOidc {
        async fn create_token(&self, request: &CreateTokenRequest) -> TokenPoll {
            assert_eq!(request.device_code, "device-code");
            self.polls.lock().unwrap().push(Instant::now());
            self.script
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or(TokenPoll::Pending)
        }
    }

    fn token(value: &str) -> TokenPoll {
        TokenPoll::Token(AccessToken::new(value))
    }

    fn registration() -> ClientRegistration {
        ClientRegistration {
            client_id: "client-id".to_string(),
            client_secret: "client-secret".to_string(),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn pending_polls_wait_one_interval_each() {
        let oidc = FakeOidc::new(
            3,
            600,
            vec![
                TokenPoll::Pending,
                TokenPoll::Pending,
                TokenPoll::Pending,
                token("access-token"),
            ],
        );
        let start = Instant::now();

        let token = DeviceAuthFlow::new(&oidc)
            .poll_for_token(&registration(), &oidc.authorization(), &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(token.as_str(), "access-token");
        assert_eq!(oidc.poll_offsets(start), vec![0, 3, 6, 9]);
    }

    #[tokio::test(start_paused = true)]
    async fn slow_down_grows_interval_by_fixed_increment() {
        let oidc = FakeOidc::new(
            1,
            600,
            vec![
                TokenPoll::SlowDown,
                TokenPoll::Pending,
                TokenPoll::SlowDown,
                TokenPoll::Pending,
                token("access-token"),
            ],
        );
        let start = Instant::now();

        DeviceAuthFlow::new(&oidc)
            .poll_for_token(&registration(), &oidc.authorization(), &CancellationToken::new())
            .await
            .unwrap();

        // 1s, then +5 on each slow_down; pending keeps whatever the interval is.
        assert_eq!(oidc.poll_offsets(start), vec![0, 6, 12, 23, 34]);
    }

    #[tokio::test(start_paused = true)]
    async fn times_out_without_polling_past_deadline() {
        let oidc = FakeOidc::new(5, 12, vec![]);
        let start = Instant::now();

        let error = DeviceAuthFlow::new(&oidc)
            .poll_for_token(&registration(), &oidc.authorization(), &CancellationToken::new())
            .await
            .unwrap_err();

        assert!(matches!(error, SsoFlowError::AuthorizationTimeout));
        assert_eq!(oidc.poll_offsets(start), vec![0, 5, 10]);
        assert_eq!(start.elapsed(), Duration::from_secs(12));
    }

    #[tokio::test(start_paused = true)]
    async fn zero_timings_use_defaults() {
        let oidc = FakeOidc::new(0, 0, vec![]);
        let start = Instant::now();

        let error = DeviceAuthFlow::new(&oidc)
            .poll_for_token(&registration(), &oidc.authorization(), &CancellationToken::new())
            .await
            .unwrap_err();

        assert!(matches!(error, SsoFlowError::AuthorizationTimeout));
        let offsets = oidc.poll_offsets(start);
        assert_eq!(offsets.len(), 60);
        assert!(offsets.windows(2).all(|pair| pair[1] - pair[0] == 5));
        assert_eq!(start.elapsed(), DEFAULT_EXPIRES_IN);
    }

    #[tokio::test(start_paused = true)]
    async fn terminal_error_stops_polling() {
        let oidc = FakeOidc::new(
            5,
            600,
            vec![
                TokenPoll::Failed("InvalidGrantException: invalid_grant".to_string()),
                token("never-reached"),
            ],
        );

        let error = DeviceAuthFlow::new(&oidc)
            .poll_for_token(&registration(), &oidc.authorization(), &CancellationToken::new())
            .await
            .unwrap_err();

        assert_eq!(
            error.to_string(),
            "could not obtain credentials: failed to create token: InvalidGrantException: invalid_grant"
        );
        assert_eq!(oidc.polls.lock().unwrap().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn expired_device_code_is_a_timeout() {
        let oidc = FakeOidc::new(5, 600, vec![TokenPoll::Pending, TokenPoll::Expired]);

        let error = DeviceAuthFlow::new(&oidc)
            .poll_for_token(&registration(), &oidc.authorization(), &CancellationToken::new())
            .await
            .unwrap_err();

        assert!(matches!(error, SsoFlowError::AuthorizationTimeout));
        assert_eq!(oidc.polls.lock().unwrap().len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn cancellation_interrupts_sleep() {
        let oidc = FakeOidc::new(30, 600, vec![]);
        let cancel = CancellationToken::new();
        let start = Instant::now();

        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(7)).await;
            trigger.cancel();
        });

        let error = DeviceAuthFlow::new(&oidc)
            .poll_for_token(&registration(), &oidc.authorization(), &cancel)
            .await
            .unwrap_err();

        assert!(matches!(error, SsoFlowError::Cancelled));
        assert_eq!(start.elapsed(), Duration::from_secs(7));
        assert_eq!(oidc.polls.lock().unwrap().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn authenticate_prompts_with_authorization() {
        let oidc = FakeOidc::new(1, 600, vec![TokenPoll::Pending, token("access-token")]);
        let prompted = Mutex::new(Vec::new());

        let token = DeviceAuthFlow::new(&oidc)
            .authenticate(
                "https://x.awsapps.com/start",
                &|authorization: &DeviceAuthorization| {
                    prompted.lock().unwrap().push((
                        authorization.verification_uri.to_string(),
                        authorization.user_code.clone(),
                    ));
                },
                &CancellationToken::new(),
            )
            .await
            .unwrap();

        assert_eq!(token.as_str(), "access-token");
        assert_eq!(
            *prompted.lock().unwrap(),
            vec![(
                "https://device.sso.us-east-1.amazonaws.com/?user_code=ABCD-EFGH".to_string(),
                "ABCD-EFGH".to_string()
            )]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn registration_failure_is_not_retried() {
        let oidc = FakeOidc {
            register_error: Some("InvalidClientMetadataException".to_string()),
            ..FakeOidc::new(5, 600, vec![])
        };

        let error = DeviceAuthFlow::new(&oidc)
            .authenticate(
                "https://x.awsapps.com/start",
                &|_: &DeviceAuthorization| panic!("should not prompt"),
                &CancellationToken::new(),
            )
            .await
            .unwrap_err();

        assert_eq!(
            error.to_string(),
            "could not obtain credentials: failed to register client: InvalidClientMetadataException"
        );
        assert_eq!(oidc.starts.load(Ordering::SeqCst), 0);
        assert!(oidc.polls.lock().unwrap().is_empty());
    }

    #[test]
    fn poll_state_never_sleeps_past_deadline() {
        let now = Instant::now();
        let authorization = FakeOidc::new(4, 10, vec![]).authorization();
        let mut state = PollState::new(&authorization, now);

        assert_eq!(state.next_poll(now), now + Duration::from_secs(4));
        state.slow_down();
        assert_eq!(state.interval(), Duration::from_secs(9));
        assert_eq!(
            state.next_poll(now + Duration::from_secs(4)),
            now + Duration::from_secs(10)
        );
        assert!(!state.is_expired(now + Duration::from_secs(9)));
        assert!(state.is_expired(now + Duration::from_secs(10)));
    }
}
