//! Device, location, and network signals captured when a session is created.

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::LazyLock;
use validator::Validate;
use woothee::parser::Parser;

use crate::error::{Error, Result};
use crate::limits::FINGERPRINT_PATTERN;

/// Compiled fingerprint regex (lazy initialization).
static FINGERPRINT_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(FINGERPRINT_PATTERN).expect("invalid fingerprint pattern"));

static UA_PARSER: LazyLock<Parser> = LazyLock::new(Parser::new);

/// Coarse device class used for policy applicability.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeviceClass {
    Desktop,
    Mobile,
    Tablet,
}

impl DeviceClass {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Desktop => "desktop",
            Self::Mobile => "mobile",
            Self::Tablet => "tablet",
        }
    }

    /// Classify a user agent string.
    ///
    /// woothee categories: pc, smartphone, mobilephone, crawler, appliance, misc.
    /// woothee reports iPads as smartphones, so tablets are picked out by OS
    /// name or an explicit "Tablet" token.
    pub fn from_user_agent(user_agent: &str) -> Option<Self> {
        if user_agent.is_empty() {
            return None;
        }

        let result = UA_PARSER.parse(user_agent)?;

        if result.os == "iPad" || user_agent.contains("Tablet") {
            return Some(Self::Tablet);
        }

        match result.category {
            "pc" => Some(Self::Desktop),
            "smartphone" | "mobilephone" => Some(Self::Mobile),
            _ => None,
        }
    }
}

impl fmt::Display for DeviceClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Coarse geolocation resolved from the network origin.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Validate)]
pub struct GeoLocation {
    /// ISO 3166-1 alpha-2 country code
    #[validate(length(equal = 2))]
    pub country: String,
    #[validate(length(max = 128))]
    pub city: Option<String>,
}

impl GeoLocation {
    pub fn new(country: impl Into<String>, city: Option<&str>) -> Self {
        Self {
            country: country.into().to_uppercase(),
            city: city.map(str::to_string),
        }
    }
}

/// Signals supplied by the authenticator for a new session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Validate)]
pub struct SessionSignals {
    /// Network origin (IP address or proxy-normalized origin key)
    #[validate(length(min = 1, max = 45))]
    pub origin: String,
    /// Client fingerprint hash (hex)
    pub fingerprint: String,
    /// Raw user agent, used to derive the device class when none is given
    #[validate(length(max = 512))]
    pub user_agent: Option<String>,
    /// Explicit device class reported by the client
    pub device_class: Option<DeviceClass>,
    #[validate(nested)]
    pub geo: Option<GeoLocation>,
}

impl SessionSignals {
    pub fn new(origin: impl Into<String>, fingerprint: impl Into<String>) -> Self {
        Self {
            origin: origin.into(),
            fingerprint: fingerprint.into(),
            user_agent: None,
            device_class: None,
            geo: None,
        }
    }

    pub fn with_user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.user_agent = Some(user_agent.into());
        self
    }

    pub fn with_device_class(mut self, device_class: DeviceClass) -> Self {
        self.device_class = Some(device_class);
        self
    }

    pub fn with_geo(mut self, geo: GeoLocation) -> Self {
        self.geo = Some(geo);
        self
    }

    /// Validate field lengths and the fingerprint format.
    pub fn check(&self) -> Result<()> {
        self.validate()
            .map_err(|e| Error::validation(format!("invalid session signals: {}", e)))?;

        if !FINGERPRINT_REGEX.is_match(&self.fingerprint) {
            return Err(Error::validation("fingerprint must be a 16-128 char hex digest"));
        }

        Ok(())
    }

    /// Device class reported by the client, else derived from the user agent.
    ///
    /// Unclassifiable agents fall back to desktop.
    pub fn resolved_device_class(&self) -> DeviceClass {
        self.device_class
            .or_else(|| {
                self.user_agent
                    .as_deref()
                    .and_then(DeviceClass::from_user_agent)
            })
            .unwrap_or(DeviceClass::Desktop)
    }

    pub fn country(&self) -> Option<&str> {
        self.geo.as_ref().map(|g| g.country.as_str())
    }
}
