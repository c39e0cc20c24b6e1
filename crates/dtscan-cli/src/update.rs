//! Release check against the project's `releases/latest` redirect.

use std::cmp::Ordering;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub(crate) struct Version {
    major: u64,
    minor: u64,
    patch: u64,
}

impl Version {
    /// Parse `1.2.3` or `v1.2.3`, ignoring any pre-release or build suffix.
    pub(crate) fn parse(raw: &str) -> Option<Self> {
        let core = raw.trim().trim_start_matches('v');
        let core = core.split(['-', '+']).next()?;
        let mut parts = core.split('.').map(str::parse::<u64>);
        let version = Self {
            major: parts.next()?.ok()?,
            minor: parts.next()?.ok()?,
            patch: parts.next()?.ok()?,
        };
        parts.next().is_none().then_some(version)
    }
}

#[derive(Debug, PartialEq, Eq)]
pub(crate) enum UpdateStatus {
    UpToDate,
    Available {
        /// Release page the redirect landed on.
        url: String,
        version: String,
        /// The major version changed.
        major: bool,
    },
}

/// Follow `release_url` to the newest release tag and compare it to
/// `current`.
///
/// # Errors
///
/// Fails if the request fails or either version cannot be parsed.
pub(crate) async fn check_for_update(
    http: &reqwest::Client,
    release_url: &str,
    current: &str,
) -> anyhow::Result<UpdateStatus> {
    let response = http.get(release_url).send().await?.error_for_status()?;
    let url = response.url().to_string();
    let tag = url
        .trim_end_matches('/')
        .rsplit('/')
        .next()
        .unwrap_or_default()
        .to_string();

    let latest = Version::parse(&tag)
        .ok_or_else(|| anyhow::anyhow!("release tag \"{tag}\" is not a version"))?;
    let installed = Version::parse(current)
        .ok_or_else(|| anyhow::anyhow!("installed version \"{current}\" is not a version"))?;
    tracing::debug!(%tag, current, "latest release");

    Ok(match latest.cmp(&installed) {
        Ordering::Greater => UpdateStatus::Available {
            url,
            version: tag,
            major: latest.major > installed.major,
        },
        Ordering::Equal | Ordering::Less => UpdateStatus::UpToDate,
    })
}
