//! Release channels and their `latest-*` pointer links.

use std::collections::BTreeMap;
use std::fmt;

use cairn_core::{is_reserved_link, Link, NodeStat};

pub use cairn_core::PREVIOUS_LINK;

/// Release channel of a version name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Channel {
    Release,
    PreRelease,
    Build,
}

impl Channel {
    pub const ALL: [Channel; 3] = [Channel::Release, Channel::PreRelease, Channel::Build];

    /// Classify a version name by substring, case-insensitively.
    ///
    /// `pre-release` is checked first because it also contains `release`.
    /// Anything else is a build.
    pub fn classify(version: &str) -> Channel {
        let lower = version.to_ascii_lowercase();
        if lower.contains("pre-release") {
            Channel::PreRelease
        } else if lower.contains("release") {
            Channel::Release
        } else {
            Channel::Build
        }
    }

    /// Link name of this channel's pointer.
    pub fn pointer_name(self) -> &'static str {
        match self {
            Channel::Release => "latest-release",
            Channel::PreRelease => "latest-pre-release",
            Channel::Build => "latest-build",
        }
    }
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Channel::Release => write!(f, "release"),
            Channel::PreRelease => write!(f, "pre-release"),
            Channel::Build => write!(f, "build"),
        }
    }
}

/// `previous` or one of the `latest-*` pointers.
pub fn is_reserved(name: &str) -> bool {
    is_reserved_link(name)
}

/// Point the channel of `version` at `target`. Returns the channel touched.
pub fn upsert_pointer(
    links: &mut BTreeMap<String, Link>,
    version: &str,
    target: &NodeStat,
) -> Channel {
    let channel = Channel::classify(version);
    let name = channel.pointer_name();
    links.insert(name.to_string(), target.to_link(name));
    channel
}

#[cfg(test)]
mod tests {
    use cairn_core::Cid;
    use rstest::rstest;

    use super::*;

    #[rstest]
    #[case("1.0.0-build", Channel::Build)]
    #[case("2.0.0-release", Channel::Release)]
    #[case("2.1.0-pre-release", Channel::PreRelease)]
    #[case("3.0.0-PRE-RELEASE", Channel::PreRelease)]
    #[case("nightly", Channel::Build)]
    #[case("", Channel::Build)]
    fn classify_cases(#[case] version: &str, #[case] expected: Channel) {
        assert_eq!(Channel::classify(version), expected);
    }

    #[test]
    fn pre_release_wins_over_release() {
        assert_eq!(
            Channel::classify("4.0.0-release-pre-release"),
            Channel::PreRelease
        );
    }

    #[test]
    fn reserved_names() {
        assert!(is_reserved("previous"));
        assert!(is_reserved("latest-build"));
        assert!(is_reserved("latest-pre-release"));
        assert!(!is_reserved("1.0.0-build"));
        assert!(!is_reserved("latest"));
    }

    #[test]
    fn every_pointer_name_is_reserved() {
        for channel in Channel::ALL {
            assert!(is_reserved(channel.pointer_name()), "{channel}");
        }
    }

    #[test]
    fn upsert_replaces_existing_pointer() {
        let mut links = BTreeMap::new();
        let a = NodeStat::new(Cid::parse("bafya").unwrap(), 1);
        let b = NodeStat::new(Cid::parse("bafyb").unwrap(), 2);

        upsert_pointer(&mut links, "1.0.0-build", &a);
        let channel = upsert_pointer(&mut links, "1.1.0-build", &b);

        assert_eq!(channel, Channel::Build);
        assert_eq!(links.len(), 1);
        assert_eq!(links["latest-build"].hash, b.cid);
        assert_eq!(links["latest-build"].tsize, 2);
    }
}
