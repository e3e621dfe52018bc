use std::{borrow::Cow, fmt};

use aws_sdk_sso::config::Region as SdkRegion;

/// The AWS region of an SSO instance.
///
/// OIDC, SSO and STS calls are all made in this region.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct Region(pub(crate) SdkRegion);

impl Region {
    /// A region by name, e.g. `"eu-west-1"`.
    pub fn new(name: impl Into<Cow<'static, str>>) -> Self {
        Self(SdkRegion::new(name))
    }
}

impl From<String> for Region {
    fn from(name: String) -> Self {
        Self::new(name)
    }
}

impl AsRef<str> for Region {
    fn as_ref(&self) -> &str {
        self.0.as_ref()
    }
}

impl fmt::Debug for Region {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{:?}", self.as_ref())
    }
}

impl fmt::Display for Region {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(self.as_ref())
    }
}
