use serde::Serialize;

/// Distribution family, as far as network-config file naming is concerned.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum DistroFamily {
    /// rhel, fedora, centos, redhat: `/etc/sysconfig/network-scripts/ifcfg-<if>`
    Rhel,
    /// SLES / openSUSE: `/etc/sysconfig/network/ifcfg-<if>`
    Suse,
    /// Ubuntu / Debian: `/etc/network/interfaces`, not restored.
    Debian,
    Unknown,
}

impl DistroFamily {
    /// Classify the contents of `/etc/os-release`.
    ///
    /// `ID` is checked first, then `ID_LIKE`.
    pub fn from_os_release(text: &str) -> Self {
        let field = |key: &str| {
            text.lines()
                .filter_map(|l| l.trim().strip_prefix(key))
                .filter_map(|rest| rest.strip_prefix('='))
                .map(|v| v.trim_matches('"').to_ascii_lowercase())
                .next()
        };

        let mut candidates = Vec::new();
        if let Some(id) = field("ID") {
            candidates.push(id);
        }
        if let Some(like) = field("ID_LIKE") {
            candidates.extend(like.split_whitespace().map(str::to_string));
        }

        candidates
            .iter()
            .map(|id| Self::from_id(id))
            .find(|family| *family != DistroFamily::Unknown)
            .unwrap_or(DistroFamily::Unknown)
    }

    fn from_id(id: &str) -> Self {
        match id {
            "rhel" | "fedora" | "centos" | "redhat" => DistroFamily::Rhel,
            "sles" | "sled" | "suse" | "opensuse" | "opensuse-leap" => DistroFamily::Suse,
            "ubuntu" | "debian" => DistroFamily::Debian,
            _ => DistroFamily::Unknown,
        }
    }

    /// ifcfg file prefix for address restoration, if the family has one.
    pub fn ifcfg_prefix(&self) -> Option<&'static str> {
        match self {
            DistroFamily::Rhel => Some("/etc/sysconfig/network-scripts/ifcfg-"),
            DistroFamily::Suse => Some("/etc/sysconfig/network/ifcfg-"),
            DistroFamily::Debian | DistroFamily::Unknown => None,
        }
    }
}

impl std::fmt::Display for DistroFamily {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DistroFamily::Rhel => write!(f, "rhel"),
            DistroFamily::Suse => write!(f, "suse"),
            DistroFamily::Debian => write!(f, "debian"),
            DistroFamily::Unknown => write!(f, "unknown"),
        }
    }
}
