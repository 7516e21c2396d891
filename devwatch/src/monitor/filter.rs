use std::{ffi::OsStr, fmt, str::FromStr};

use serde::{Deserialize, Serialize};

use crate::error::Error;

/// A (subsystem, devtype) pair restricting which events a subscription
/// delivers. A missing devtype matches any devtype of the subsystem.
///
/// The text form is `subsystem` or `subsystem/devtype`, e.g. `tty` or
/// `usb/usb_device`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Filter {
    pub subsystem: String,
    #[serde(default)]
    pub devtype: Option<String>,
}

impl Filter {
    pub fn new(subsystem: impl Into<String>) -> Self {
        Self {
            subsystem: subsystem.into(),
            devtype: None,
        }
    }

    pub fn with_devtype(mut self, devtype: impl Into<String>) -> Self {
        self.devtype = Some(devtype.into());
        self
    }

    /// Whether a device with the given subsystem and devtype passes.
    pub fn matches(&self, subsystem: Option<&OsStr>, devtype: Option<&OsStr>) -> bool {
        if subsystem != Some(OsStr::new(&self.subsystem)) {
            return false;
        }
        match &self.devtype {
            Some(wanted) => devtype == Some(OsStr::new(wanted)),
            None => true,
        }
    }
}

impl fmt::Display for Filter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.devtype {
            Some(devtype) => write!(f, "{}/{}", self.subsystem, devtype),
            None => write!(f, "{}", self.subsystem),
        }
    }
}

impl FromStr for Filter {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = |reason: &str| Error::InvalidFilter {
            filter: s.to_string(),
            reason: reason.to_string(),
        };

        let s = s.trim();
        let (subsystem, devtype) = match s.split_once('/') {
            Some((subsystem, devtype)) => (subsystem.trim(), Some(devtype.trim())),
            None => (s, None),
        };
        if subsystem.is_empty() {
            return Err(invalid("empty subsystem"));
        }
        match devtype {
            Some("") => Err(invalid("empty devtype")),
            Some(devtype) if devtype.contains('/') => Err(invalid("too many '/' separators")),
            Some(devtype) => Ok(Filter::new(subsystem).with_devtype(devtype)),
            None => Ok(Filter::new(subsystem)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;

    #[test_case("tty", Filter::new("tty"); "subsystem only")]
    #[test_case("usb/usb_device", Filter::new("usb").with_devtype("usb_device"); "with devtype")]
    #[test_case(" block / disk ", Filter::new("block").with_devtype("disk"); "surrounding whitespace")]
    fn parses(text: &str, expected: Filter) {
        assert_eq!(text.parse::<Filter>().unwrap(), expected);
    }

    #[test_case(""; "empty")]
    #[test_case("/disk"; "missing subsystem")]
    #[test_case("usb/"; "missing devtype")]
    #[test_case("usb/a/b"; "extra separator")]
    fn rejects(text: &str) {
        assert!(matches!(
            text.parse::<Filter>(),
            Err(Error::InvalidFilter { .. })
        ));
    }

    #[test]
    fn display_matches_text_form() {
        assert_eq!(Filter::new("tty").to_string(), "tty");
        assert_eq!(
            Filter::new("usb").with_devtype("usb_device").to_string(),
            "usb/usb_device"
        );
    }

    #[test]
    fn devtype_is_optional_when_matching() {
        let tty = Filter::new("tty");
        assert!(tty.matches(Some(OsStr::new("tty")), None));
        assert!(tty.matches(Some(OsStr::new("tty")), Some(OsStr::new("anything"))));
        assert!(!tty.matches(Some(OsStr::new("usb")), None));
        assert!(!tty.matches(None, None));

        let usb = Filter::new("usb").with_devtype("usb_device");
        assert!(usb.matches(Some(OsStr::new("usb")), Some(OsStr::new("usb_device"))));
        assert!(!usb.matches(Some(OsStr::new("usb")), Some(OsStr::new("usb_interface"))));
        assert!(!usb.matches(Some(OsStr::new("usb")), None));
    }
}
