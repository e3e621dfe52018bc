//! The `aws-sso-login` command.

use std::{ffi::OsString, future::Future, io, process::ExitCode, time::Duration};

use chrono::Local;
use clap::Parser;
use clap_verbosity_flag::{OffLevel, Verbosity};
use console::style;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::{
    output, CredentialsFile, LoginConfig, ProfileSettings, ProfileSource, Settings, SsoError,
    SsoFlow, SystemBrowser, TerminalPrompt,
};

const EXPIRES_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Log in to AWS with SSO and store temporary role credentials in the shared credentials file.
#[derive(Debug, Parser)]
#[command(name = "aws-sso-login")]
pub struct Args {
    /// SSO start URL, e.g. https://my-org.awsapps.com/start
    #[arg(long = "sso-url", env = "AWS_SSO_URL", value_name = "URL")]
    pub sso_url: Option<String>,

    /// AWS account ID to get credentials for
    #[arg(long, env = "AWS_SSO_ACCOUNT_ID", value_name = "ID")]
    pub account_id: Option<String>,

    /// Credentials file profile to write
    #[arg(long, env = "AWS_PROFILE", value_name = "NAME")]
    pub profile: Option<String>,

    /// Region of the SSO instance
    #[arg(long, env = "AWS_REGION", value_name = "REGION")]
    pub region: Option<String>,

    /// Role to assume
    #[arg(long, env = "AWS_SSO_ROLE", value_name = "NAME")]
    pub role: Option<String>,

    /// Check the credentials with STS before and after saving them
    #[arg(long)]
    pub validate: bool,

    /// Don't try to open a browser, just print the verification URL
    #[arg(long)]
    pub no_browser: bool,

    /// Give up if the whole login takes longer than this
    #[arg(long, value_name = "SECONDS", default_value_t = 600)]
    pub timeout: u64,

    #[allow(missing_docs)]
    #[command(flatten)]
    pub verbosity: Verbosity<OffLevel>,
}

impl Args {
    fn settings(&self) -> Settings {
        Settings {
            start_url: self.sso_url.clone(),
            account_id: self.account_id.clone(),
            profile: self.profile.clone(),
            region: self.region.clone(),
            role_name: self.role.clone(),
            validate: self.validate,
        }
    }
}

/// Run the command with `args` (including the program name), reporting `version` if asked.
pub async fn main(args: Vec<OsString>, version: &str) -> ExitCode {
    if let Some(version) = requested_version(&args, version) {
        println!("{version}");
        return ExitCode::SUCCESS;
    }

    let args = match Args::try_parse_from(args) {
        Ok(args) => args,
        Err(error) => {
            let _ = error.print();
            return if error.use_stderr() {
                ExitCode::FAILURE
            } else {
                ExitCode::SUCCESS
            };
        }
    };

    if let Err(error) = init_logging(&args.verbosity) {
        eprintln!("failed to initialise logging: {error}");
    }

    match run(&args).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(error) => {
            output::error(&error);
            ExitCode::FAILURE
        }
    }
}

/// `version`, if the first argument asks for it. Checked before anything else is parsed.
fn requested_version<'a>(args: &[OsString], version: &'a str) -> Option<&'a str> {
    matches!(
        args.get(1).and_then(|arg| arg.to_str()),
        Some("-version" | "--version")
    )
    .then_some(version)
}

async fn run(args: &Args) -> Result<(), SsoError> {
    let profile = match &args.profile {
        Some(profile) if !profile.is_empty() => ProfileSource::new(profile).load().await,
        _ => ProfileSettings::default(),
    };
    let config = LoginConfig::resolve(args.settings(), profile)?;
    debug!(?config, "resolved configuration");

    let store = CredentialsFile::from_env()?;
    let cancel = cancel_after(Duration::from_secs(args.timeout));

    let prompt = if args.no_browser {
        TerminalPrompt::without_browser()
    } else {
        TerminalPrompt::with_browser(SystemBrowser)
    };
    let flow = SsoFlow::connect(config, prompt)
        .await
        .with_progress(TerminalPrompt::without_browser());

    let outcome = flow.run(&store, &cancel).await;
    cancel.cancel();
    let outcome = outcome?;

    let config = flow.config();
    let expires = outcome.credentials.expires_at.with_timezone(&Local);
    println!();
    println!(
        "  {}  {}",
        style("Profile:").dim(),
        style(&config.profile).bold()
    );
    println!("  {}     {}", style("Role:").dim(), config.role_name);
    println!(
        "  {}  {}",
        style("Expires:").dim(),
        style(expires.format(EXPIRES_FORMAT)).yellow()
    );

    Ok(())
}

/// A token that fires after `timeout`, or on Ctrl-C.
///
/// Cancelling the token stops the watcher.
fn cancel_after(timeout: Duration) -> CancellationToken {
    cancel_on(timeout, tokio::signal::ctrl_c())
}

/// A token that fires after `timeout`, or when `interrupt` completes.
///
/// If `interrupt` fails the timeout still applies.
fn cancel_on<F>(timeout: Duration, interrupt: F) -> CancellationToken
where
    F: Future<Output = io::Result<()>> + Send + 'static,
{
    let cancel = CancellationToken::new();
    let watcher = cancel.clone();
    tokio::spawn(async move {
        let deadline = tokio::time::sleep(timeout);
        tokio::pin!(deadline);

        tokio::select! {
            () = watcher.cancelled() => return,
            () = &mut deadline => {
                warn!(?timeout, "login timed out");
                watcher.cancel();
                return;
            }
            result = interrupt => match result {
                Ok(()) => {
                    debug!("interrupted");
                    watcher.cancel();
                    return;
                }
                Err(error) => warn!(%error, "unable to listen for Ctrl-C"),
            },
        }

        tokio::select! {
            () = watcher.cancelled() => {}
            () = deadline => {
                warn!(?timeout, "login timed out");
                watcher.cancel();
            }
        }
    });
    cancel
}

// Off unless asked for with -v or RUST_LOG. Logs go to stderr.
fn init_logging(verbosity: &Verbosity<OffLevel>) -> Result<(), Box<dyn std::error::Error>> {
    let filter = if let Some(level) = verbosity.log_level() {
        EnvFilter::try_new(level.to_string())?
    } else if std::env::var_os("RUST_LOG").is_some() {
        EnvFilter::try_from_default_env()?
    } else {
        return Ok(());
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(std::io::stderr)
                .with_target(true)
                .compact(),
        )
        .try_init()?;

    Ok(())
}
