//! Terminal output.

use std::{fmt, io};

use console::style;
use tracing::warn;

use crate::{CallerIdentity, DeviceAuthorization, Progress, ValidationStage, VerificationPrompt};

/// Print a success message with a green check mark.
pub(crate) fn success(message: impl fmt::Display) {
    println!("{} {message}", style("✓").green());
}

/// Print an error message with a red cross.
pub(crate) fn error(message: impl fmt::Display) {
    println!("{} {}", style("✗").red(), style(message).red());
}

/// Print an informational message with a cyan arrow.
pub(crate) fn info(message: impl fmt::Display) {
    println!("{} {message}", style("→").cyan());
}

/// Print something we're waiting on.
pub(crate) fn wait(message: impl fmt::Display) {
    println!("{} {}", style("◌").yellow(), style(message).yellow());
}

/// Print an indented `label value` line.
pub(crate) fn field(label: &str, value: impl fmt::Display) {
    println!("  {} {value}", style(label).dim());
}

/// Opens URLs for the user.
pub trait Browser: Send + Sync {
    /// Open `url`.
    ///
    /// # Errors
    ///
    /// If no browser could be launched.
    fn open(&self, url: &str) -> io::Result<()>;
}

/// The system default browser.
#[derive(Clone, Copy, Debug, Default)]
pub struct SystemBrowser;

impl Browser for SystemBrowser {
    fn open(&self, url: &str) -> io::Result<()> {
        webbrowser::open(url)
    }
}

/// Interactive prompt and progress reporting on the terminal.
#[derive(Default)]
pub struct TerminalPrompt {
    browser: Option<Box<dyn Browser>>,
}

impl TerminalPrompt {
    /// Prompt on the terminal and try to open the verification URL in `browser`.
    pub fn with_browser(browser: impl Browser + 'static) -> Self {
        Self {
            browser: Some(Box::new(browser)),
        }
    }

    /// Prompt on the terminal only.
    #[must_use]
    pub fn without_browser() -> Self {
        Self::default()
    }
}

impl fmt::Debug for TerminalPrompt {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("TerminalPrompt")
            .field("browser", &self.browser.is_some())
            .finish()
    }
}

impl VerificationPrompt for TerminalPrompt {
    fn prompt(&self, authorization: &DeviceAuthorization) {
        let url = authorization.verification_uri.as_str();
        match self.browser {
            Some(_) => info("Opening browser for SSO login..."),
            None => info("Open this URL to sign in with SSO:"),
        }
        println!();
        println!("  {}  {}", style("URL:").dim(), style(url).cyan());
        println!(
            "  {} {}",
            style("Code:").dim(),
            style(&authorization.user_code).bold()
        );
        println!();

        if let Some(browser) = &self.browser {
            if let Err(error) = browser.open(url) {
                warn!(%error, "failed to open browser");
                wait("Could not open browser automatically. Please open the URL manually.");
            }
        }

        wait("Waiting for authorization...");
    }
}

impl Progress for TerminalPrompt {
    fn authenticated(&self) {
        success("Authenticated");
    }

    fn validating(&self, stage: ValidationStage) {
        match stage {
            ValidationStage::Fresh => wait("Validating credentials with STS..."),
            ValidationStage::Saved => wait("Verifying saved credentials..."),
        }
    }

    fn validated(&self, stage: ValidationStage, identity: &CallerIdentity) {
        match stage {
            ValidationStage::Fresh => success("Credentials validated"),
            ValidationStage::Saved => success("Saved credentials verified"),
        }
        field("ARN:", &identity.arn);
    }

    fn credentials_written(&self, _profile: &str, location: &str) {
        success(format_args!("Credentials written to {}", style(location).cyan()));
    }
}
